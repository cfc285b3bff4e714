//! Models for the subset of the Rachio public API (v1) the bridge consumes.
//!
//! Notes
//! - Field names follow the API (`camelCase`), ids are newtype wrappers.
//! - Timestamps stay as epoch milliseconds (`i64`), the unit the API delivers them in.
//! - Anything the API may omit is an `Option`; change detection relies on telling
//!   "absent" apart from "present but zero".

use serde::{Deserialize, Serialize};

// =====================
// Scalar ID newtype wrappers
// =====================

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PersonId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ZoneId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScheduleRuleId(pub String);

// =====================
// Lookup enums exposed to the hub as index values
// =====================

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum RunType {
    // 0=NONE, 1=AUTOMATIC, 2=MANUAL, 3=OTHER
    None_,
    Automatic,
    Manual,
    Other,
}

impl RunType {
    const ALL: [RunType; 4] = [RunType::None_, RunType::Automatic, RunType::Manual, RunType::Other];

    pub fn name(self) -> &'static str {
        match self {
            RunType::None_ => "NONE",
            RunType::Automatic => "AUTOMATIC",
            RunType::Manual => "MANUAL",
            RunType::Other => "OTHER",
        }
    }

    pub fn code(self) -> i64 {
        match self {
            RunType::None_ => 0,
            RunType::Automatic => 1,
            RunType::Manual => 2,
            RunType::Other => 3,
        }
    }

    /// Case-insensitive; anything unrecognised maps to `Other`.
    pub fn from_name(name: &str) -> Self {
        Self::ALL
            .into_iter()
            .find(|t| t.name().eq_ignore_ascii_case(name))
            .unwrap_or(RunType::Other)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ScheduleType {
    // 0=NONE, 1=FIXED, 2=FLEX, 3=OTHER
    None_,
    Fixed,
    Flex,
    Other,
}

impl ScheduleType {
    const ALL: [ScheduleType; 4] = [
        ScheduleType::None_,
        ScheduleType::Fixed,
        ScheduleType::Flex,
        ScheduleType::Other,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ScheduleType::None_ => "NONE",
            ScheduleType::Fixed => "FIXED",
            ScheduleType::Flex => "FLEX",
            ScheduleType::Other => "OTHER",
        }
    }

    pub fn code(self) -> i64 {
        match self {
            ScheduleType::None_ => 0,
            ScheduleType::Fixed => 1,
            ScheduleType::Flex => 2,
            ScheduleType::Other => 3,
        }
    }

    /// Case-insensitive; the API documents no exhaustive list, so unknown names map to `Other`.
    pub fn from_name(name: &str) -> Self {
        Self::ALL
            .into_iter()
            .find(|t| t.name().eq_ignore_ascii_case(name))
            .unwrap_or(ScheduleType::Other)
    }
}

// =====================
// Account graph
// =====================

/// Response of `GET /person/info`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonInfo {
    pub id: PersonId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Person {
    pub id: PersonId,
    pub username: Option<String>,
    #[serde(default)]
    pub devices: Vec<Device>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    pub mac_address: String,
    #[serde(default)]
    pub on: bool,
    /// `ONLINE` or `OFFLINE`.
    pub status: Option<String>,
    #[serde(default)]
    pub paused: bool,
    pub rain_delay_expiration_date: Option<i64>,
    #[serde(default)]
    pub zones: Vec<Zone>,
    #[serde(default)]
    pub schedule_rules: Vec<ScheduleRule>,
    #[serde(default)]
    pub flex_schedule_rules: Vec<FlexScheduleRule>,
}

impl Device {
    pub fn is_online(&self) -> bool {
        self.status.as_deref() == Some("ONLINE")
    }

    pub fn zone(&self, zone_id: &ZoneId) -> Option<&Zone> {
        self.zones.iter().find(|z| &z.id == zone_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CustomNozzle {
    pub name: Option<String>,
    pub inches_per_hour: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Zone {
    pub id: ZoneId,
    pub zone_number: i64,
    pub name: String,
    #[serde(default)]
    pub enabled: bool,
    pub available_water: Option<f64>,
    pub root_zone_depth: Option<f64>,
    pub management_allowed_depletion: Option<f64>,
    /// Ratio, 0.0 - 1.0.
    pub efficiency: Option<f64>,
    pub yard_area_square_feet: Option<i64>,
    pub irrigation_amount: Option<f64>,
    pub depth_of_water: Option<f64>,
    pub runtime: Option<i64>,
    pub custom_nozzle: Option<CustomNozzle>,
}

impl Zone {
    pub fn inches_per_hour(&self) -> Option<f64> {
        self.custom_nozzle.as_ref().and_then(|n| n.inches_per_hour)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRule {
    pub id: ScheduleRuleId,
    pub name: String,
    #[serde(default)]
    pub enabled: bool,
    pub rain_delay: Option<bool>,
    pub total_duration: Option<i64>,
    /// Ratio, 0.0 - ~1.5.
    pub seasonal_adjustment: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlexScheduleRule {
    pub id: ScheduleRuleId,
    pub name: String,
    #[serde(default)]
    pub enabled: bool,
    pub rain_delay: Option<bool>,
    /// Seconds.
    pub total_duration: Option<i64>,
}

// =====================
// Ephemeral watering state
// =====================

/// Response of `GET /device/{id}/current_schedule`; `{}` while the device is idle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CurrentSchedule {
    pub status: Option<String>,
    pub zone_id: Option<ZoneId>,
    pub schedule_rule_id: Option<ScheduleRuleId>,
    #[serde(rename = "type")]
    pub r#type: Option<String>,
    pub start_date: Option<i64>,
    /// Seconds.
    pub duration: Option<i64>,
    pub cycling: Option<bool>,
    pub cycle_count: Option<i64>,
    pub total_cycle_count: Option<i64>,
}

impl CurrentSchedule {
    pub fn is_processing(&self) -> bool {
        self.status.as_deref() == Some("PROCESSING")
    }

    pub fn run_type(&self) -> Option<RunType> {
        self.r#type.as_deref().map(RunType::from_name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleItem {
    pub absolute_start_date: i64,
    pub schedule_rule_id: Option<ScheduleRuleId>,
    pub schedule_type: Option<String>,
}

impl ScheduleItem {
    pub fn schedule_type(&self) -> ScheduleType {
        self.schedule_type
            .as_deref()
            .map(ScheduleType::from_name)
            .unwrap_or(ScheduleType::Other)
    }
}

/// Earliest queued item overall.
pub fn next_item(items: &[ScheduleItem]) -> Option<&ScheduleItem> {
    items.iter().min_by_key(|i| i.absolute_start_date)
}

/// Earliest queued item belonging to `rule_id`.
pub fn next_item_for<'a>(items: &'a [ScheduleItem], rule_id: &ScheduleRuleId) -> Option<&'a ScheduleItem> {
    items
        .iter()
        .filter(|i| i.schedule_rule_id.as_ref() == Some(rule_id))
        .min_by_key(|i| i.absolute_start_date)
}
