//! Blocking HTTP client for the Rachio public API (subset used by the bridge).
//!
//! - Blocking client using `ureq` (no async).
//! - Uses the models in `crate::models::rachio`.
//! - Covers the read endpoints for the account graph, device state, current schedule and
//!   schedule queue, plus the write endpoints behind hub commands.
//!
//! Authentication
//! - Static bearer token (the account's API key); there is no refresh flow.

use http::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::rc::Rc;
use std::time::Duration;

use crate::models::rachio::*;

pub const DEFAULT_BASE_URL: &str = "https://api.rach.io/1/public";

#[derive(Debug)]
pub enum RachioClientError {
    Transport(String),
    Http { status: u16, message: String },
    Json { path: String, message: String },
}

impl core::fmt::Display for RachioClientError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            RachioClientError::Transport(s) => write!(f, "transport error: {}", s),
            RachioClientError::Http { status, message } => write!(f, "http {}: {}", status, message),
            RachioClientError::Json { path, message } => write!(f, "json error at `{}`: {}", path, message),
        }
    }
}

impl std::error::Error for RachioClientError {}

impl RachioClientError {
    /// 401/403: the API key was rejected.
    pub fn is_auth(&self) -> bool {
        matches!(self, RachioClientError::Http { status: 401 | 403, .. })
    }
}

impl From<ureq::Error> for RachioClientError {
    fn from(value: ureq::Error) -> Self {
        RachioClientError::Transport(value.to_string())
    }
}

impl From<serde_path_to_error::Error<serde_json::Error>> for RachioClientError {
    fn from(value: serde_path_to_error::Error<serde_json::Error>) -> Self {
        RachioClientError::Json {
            path: value.path().to_string(),
            message: value.into_inner().to_string(),
        }
    }
}

/// Operations the bridge needs from the cloud service.
///
/// Reads return a snapshot; writes return `()` once the service accepted the command.
/// Implemented by [`RachioClient`] and by scripted fakes in tests.
pub trait RachioApi {
    fn get_person_info(&self) -> Result<PersonInfo, RachioClientError>;
    fn get_person(&self, person_id: &PersonId) -> Result<Person, RachioClientError>;
    fn get_device(&self, device_id: &DeviceId) -> Result<Device, RachioClientError>;
    fn get_current_schedule(&self, device_id: &DeviceId) -> Result<CurrentSchedule, RachioClientError>;
    fn get_schedule_items(&self, device_id: &DeviceId) -> Result<Vec<ScheduleItem>, RachioClientError>;
    fn get_zone(&self, zone_id: &ZoneId) -> Result<Zone, RachioClientError>;
    fn get_schedule_rule(&self, rule_id: &ScheduleRuleId) -> Result<ScheduleRule, RachioClientError>;
    fn get_flex_schedule_rule(&self, rule_id: &ScheduleRuleId) -> Result<FlexScheduleRule, RachioClientError>;

    fn turn_device_on(&self, device_id: &DeviceId) -> Result<(), RachioClientError>;
    fn turn_device_off(&self, device_id: &DeviceId) -> Result<(), RachioClientError>;
    fn stop_water(&self, device_id: &DeviceId) -> Result<(), RachioClientError>;
    fn set_rain_delay(&self, device_id: &DeviceId, seconds: i64) -> Result<(), RachioClientError>;
    fn start_zone(&self, zone_id: &ZoneId, seconds: i64) -> Result<(), RachioClientError>;
    fn start_schedule_rule(&self, rule_id: &ScheduleRuleId) -> Result<(), RachioClientError>;
    fn skip_schedule_rule(&self, rule_id: &ScheduleRuleId) -> Result<(), RachioClientError>;
    fn set_seasonal_adjustment(&self, rule_id: &ScheduleRuleId, ratio: f64) -> Result<(), RachioClientError>;
}

impl<T: RachioApi + ?Sized> RachioApi for Rc<T> {
    fn get_person_info(&self) -> Result<PersonInfo, RachioClientError> {
        (**self).get_person_info()
    }
    fn get_person(&self, person_id: &PersonId) -> Result<Person, RachioClientError> {
        (**self).get_person(person_id)
    }
    fn get_device(&self, device_id: &DeviceId) -> Result<Device, RachioClientError> {
        (**self).get_device(device_id)
    }
    fn get_current_schedule(&self, device_id: &DeviceId) -> Result<CurrentSchedule, RachioClientError> {
        (**self).get_current_schedule(device_id)
    }
    fn get_schedule_items(&self, device_id: &DeviceId) -> Result<Vec<ScheduleItem>, RachioClientError> {
        (**self).get_schedule_items(device_id)
    }
    fn get_zone(&self, zone_id: &ZoneId) -> Result<Zone, RachioClientError> {
        (**self).get_zone(zone_id)
    }
    fn get_schedule_rule(&self, rule_id: &ScheduleRuleId) -> Result<ScheduleRule, RachioClientError> {
        (**self).get_schedule_rule(rule_id)
    }
    fn get_flex_schedule_rule(&self, rule_id: &ScheduleRuleId) -> Result<FlexScheduleRule, RachioClientError> {
        (**self).get_flex_schedule_rule(rule_id)
    }
    fn turn_device_on(&self, device_id: &DeviceId) -> Result<(), RachioClientError> {
        (**self).turn_device_on(device_id)
    }
    fn turn_device_off(&self, device_id: &DeviceId) -> Result<(), RachioClientError> {
        (**self).turn_device_off(device_id)
    }
    fn stop_water(&self, device_id: &DeviceId) -> Result<(), RachioClientError> {
        (**self).stop_water(device_id)
    }
    fn set_rain_delay(&self, device_id: &DeviceId, seconds: i64) -> Result<(), RachioClientError> {
        (**self).set_rain_delay(device_id, seconds)
    }
    fn start_zone(&self, zone_id: &ZoneId, seconds: i64) -> Result<(), RachioClientError> {
        (**self).start_zone(zone_id, seconds)
    }
    fn start_schedule_rule(&self, rule_id: &ScheduleRuleId) -> Result<(), RachioClientError> {
        (**self).start_schedule_rule(rule_id)
    }
    fn skip_schedule_rule(&self, rule_id: &ScheduleRuleId) -> Result<(), RachioClientError> {
        (**self).skip_schedule_rule(rule_id)
    }
    fn set_seasonal_adjustment(&self, rule_id: &ScheduleRuleId, ratio: f64) -> Result<(), RachioClientError> {
        (**self).set_seasonal_adjustment(rule_id, ratio)
    }
}

pub struct RachioClient {
    agent: ureq::Agent,
    base_url: String,
    api_key: String,
}

impl RachioClient {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>, timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build();

        RachioClient {
            agent: ureq::Agent::new_with_config(config),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.api_key)
    }

    fn read_body(mut res: http::Response<ureq::Body>) -> Result<(StatusCode, String), RachioClientError> {
        let status = res.status();
        let body = res.body_mut().read_to_string()?;
        Ok((status, body))
    }

    fn check_status(status: StatusCode, body: String) -> Result<String, RachioClientError> {
        if status.is_success() {
            Ok(body)
        } else {
            let message = if body.is_empty() {
                status.canonical_reason().unwrap_or("<no body>").to_string()
            } else {
                body
            };
            Err(RachioClientError::Http {
                status: status.as_u16(),
                message,
            })
        }
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, RachioClientError> {
        let res = self
            .agent
            .get(&self.url(path))
            .header("Accept", "application/json")
            .header("Authorization", self.bearer())
            .call()?;
        let (status, body) = Self::read_body(res)?;
        let body = Self::check_status(status, body)?;
        let de = &mut serde_json::Deserializer::from_str(&body);
        Ok(serde_path_to_error::deserialize(de)?)
    }

    fn put_json<B: Serialize>(&self, path: &str, payload: &B) -> Result<(), RachioClientError> {
        let res = self
            .agent
            .put(&self.url(path))
            .header("Accept", "application/json")
            .header("Authorization", self.bearer())
            .send_json(payload)?;
        let (status, body) = Self::read_body(res)?;
        Self::check_status(status, body).map(|_| ())
    }
}

impl RachioApi for RachioClient {
    fn get_person_info(&self) -> Result<PersonInfo, RachioClientError> {
        self.get_json("/person/info")
    }

    fn get_person(&self, person_id: &PersonId) -> Result<Person, RachioClientError> {
        self.get_json(&format!("/person/{}", person_id.0))
    }

    fn get_device(&self, device_id: &DeviceId) -> Result<Device, RachioClientError> {
        self.get_json(&format!("/device/{}", device_id.0))
    }

    fn get_current_schedule(&self, device_id: &DeviceId) -> Result<CurrentSchedule, RachioClientError> {
        self.get_json(&format!("/device/{}/current_schedule", device_id.0))
    }

    fn get_schedule_items(&self, device_id: &DeviceId) -> Result<Vec<ScheduleItem>, RachioClientError> {
        self.get_json(&format!("/device/{}/scheduleitem", device_id.0))
    }

    fn get_zone(&self, zone_id: &ZoneId) -> Result<Zone, RachioClientError> {
        self.get_json(&format!("/zone/{}", zone_id.0))
    }

    fn get_schedule_rule(&self, rule_id: &ScheduleRuleId) -> Result<ScheduleRule, RachioClientError> {
        self.get_json(&format!("/schedulerule/{}", rule_id.0))
    }

    fn get_flex_schedule_rule(&self, rule_id: &ScheduleRuleId) -> Result<FlexScheduleRule, RachioClientError> {
        self.get_json(&format!("/flexschedulerule/{}", rule_id.0))
    }

    fn turn_device_on(&self, device_id: &DeviceId) -> Result<(), RachioClientError> {
        self.put_json("/device/on", &json!({ "id": device_id }))
    }

    fn turn_device_off(&self, device_id: &DeviceId) -> Result<(), RachioClientError> {
        self.put_json("/device/off", &json!({ "id": device_id }))
    }

    fn stop_water(&self, device_id: &DeviceId) -> Result<(), RachioClientError> {
        self.put_json("/device/stop_water", &json!({ "id": device_id }))
    }

    fn set_rain_delay(&self, device_id: &DeviceId, seconds: i64) -> Result<(), RachioClientError> {
        self.put_json("/device/rain_delay", &json!({ "id": device_id, "duration": seconds }))
    }

    fn start_zone(&self, zone_id: &ZoneId, seconds: i64) -> Result<(), RachioClientError> {
        self.put_json("/zone/start", &json!({ "id": zone_id, "duration": seconds }))
    }

    fn start_schedule_rule(&self, rule_id: &ScheduleRuleId) -> Result<(), RachioClientError> {
        self.put_json("/schedulerule/start", &json!({ "id": rule_id }))
    }

    fn skip_schedule_rule(&self, rule_id: &ScheduleRuleId) -> Result<(), RachioClientError> {
        self.put_json("/schedulerule/skip", &json!({ "id": rule_id }))
    }

    fn set_seasonal_adjustment(&self, rule_id: &ScheduleRuleId, ratio: f64) -> Result<(), RachioClientError> {
        self.put_json(
            "/schedulerule/seasonal_adjustment",
            &json!({ "id": rule_id, "adjustment": ratio }),
        )
    }
}
