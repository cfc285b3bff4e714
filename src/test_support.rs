//! Test doubles: a scripted Rachio API and a hub host that records every push.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use crate::client::{RachioApi, RachioClientError};
use crate::hub::{Driver, DriverValue, HubError, NodeAddress, NodeAttrs, NodeDef, NodeHost, NodeRecord, NodeTable};
use crate::models::rachio::*;
use crate::session::Session;

pub const NOW: i64 = 1_700_000_000;
pub const MAC: &str = "F0AD4E012345";
pub const CONTROLLER_ADDR: &str = "f0ad4e012345";

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().expect("valid timestamp")
}

pub fn addr(s: &str) -> NodeAddress {
    NodeAddress::new(s).expect("valid address")
}

pub fn sample_device() -> Device {
    serde_json::from_value(json!({
        "id": "dev-1",
        "name": "Front Yard",
        "macAddress": MAC,
        "on": true,
        "status": "ONLINE",
        "paused": false,
        "zones": [
            zone_json("zone-1", 1, "Lawn"),
            zone_json("zone-2", 2, "Beds"),
            zone_json("zone-3", 3, "Drip")
        ],
        "scheduleRules": [{
            "id": "rule-00ab",
            "name": "Morning",
            "enabled": true,
            "rainDelay": false,
            "totalDuration": 45,
            "seasonalAdjustment": 0.85
        }],
        "flexScheduleRules": [{
            "id": "flex-00cd",
            "name": "Flex Daily",
            "enabled": true,
            "totalDuration": 3600
        }]
    }))
    .expect("device fixture")
}

fn zone_json(id: &str, number: i64, name: &str) -> serde_json::Value {
    json!({
        "id": id,
        "zoneNumber": number,
        "name": name,
        "enabled": true,
        "availableWater": 0.17,
        "rootZoneDepth": 6.0,
        "managementAllowedDepletion": 0.5,
        "efficiency": 0.8,
        "yardAreaSquareFeet": 1000,
        "depthOfWater": 0.51,
        "runtime": 900,
        "customNozzle": {"name": "Fixed Spray Head", "inchesPerHour": 1.4}
    })
}

pub fn running_on(zone_id: &str, rule_id: Option<&str>) -> CurrentSchedule {
    CurrentSchedule {
        status: Some("PROCESSING".into()),
        zone_id: Some(ZoneId(zone_id.into())),
        schedule_rule_id: rule_id.map(|r| ScheduleRuleId(r.into())),
        r#type: Some("AUTOMATIC".into()),
        start_date: Some((NOW - 120) * 1000),
        duration: Some(600),
        cycling: Some(false),
        cycle_count: Some(1),
        total_cycle_count: Some(2),
    }
}

pub struct FakeRachio {
    pub person_id: PersonId,
    pub devices: RefCell<Vec<Device>>,
    pub current: RefCell<HashMap<DeviceId, CurrentSchedule>>,
    pub items: RefCell<HashMap<DeviceId, Vec<ScheduleItem>>>,
    pub fail_reads: Cell<bool>,
    /// Number of upcoming write calls that fail.
    pub write_failures: Cell<u32>,
    pub calls: RefCell<Vec<String>>,
}

impl FakeRachio {
    pub fn new(devices: Vec<Device>) -> Rc<Self> {
        Rc::new(FakeRachio {
            person_id: PersonId("person-1".into()),
            devices: RefCell::new(devices),
            current: RefCell::new(HashMap::new()),
            items: RefCell::new(HashMap::new()),
            fail_reads: Cell::new(false),
            write_failures: Cell::new(0),
            calls: RefCell::new(Vec::new()),
        })
    }

    pub fn session(self: &Rc<Self>) -> Rc<Session> {
        Session::connect(Box::new(Rc::clone(self)), None).expect("session")
    }

    pub fn set_current(&self, device_id: &str, current: CurrentSchedule) {
        self.current.borrow_mut().insert(DeviceId(device_id.into()), current);
    }

    pub fn set_items(&self, device_id: &str, items: Vec<ScheduleItem>) {
        self.items.borrow_mut().insert(DeviceId(device_id.into()), items);
    }

    pub fn edit_device(&self, device_id: &str, edit: impl FnOnce(&mut Device)) {
        let mut devices = self.devices.borrow_mut();
        let device = devices
            .iter_mut()
            .find(|d| d.id.0 == device_id)
            .expect("device present");
        edit(device);
    }

    pub fn writes(&self) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .filter(|c| !c.starts_with("get_"))
            .cloned()
            .collect()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls.borrow().iter().filter(|c| c.starts_with(prefix)).count()
    }

    pub fn clear_calls(&self) {
        self.calls.borrow_mut().clear();
    }

    fn read<T>(&self, call: String, found: impl FnOnce(&Self) -> Option<T>) -> Result<T, RachioClientError> {
        self.calls.borrow_mut().push(call);
        if self.fail_reads.get() {
            return Err(RachioClientError::Transport("connection refused".into()));
        }
        found(self).ok_or(RachioClientError::Http {
            status: 404,
            message: "not found".into(),
        })
    }

    fn write(&self, call: String, effect: impl FnOnce(&Self)) -> Result<(), RachioClientError> {
        self.calls.borrow_mut().push(call);
        let failures = self.write_failures.get();
        if failures > 0 {
            self.write_failures.set(failures - 1);
            return Err(RachioClientError::Transport("SSL: WRONG_VERSION_NUMBER".into()));
        }
        effect(self);
        Ok(())
    }

    fn find_zone(&self, zone_id: &ZoneId) -> Option<Zone> {
        self.devices
            .borrow()
            .iter()
            .flat_map(|d| d.zones.iter())
            .find(|z| &z.id == zone_id)
            .cloned()
    }

    fn device_of_zone(&self, zone_id: &ZoneId) -> Option<DeviceId> {
        self.devices
            .borrow()
            .iter()
            .find(|d| d.zone(zone_id).is_some())
            .map(|d| d.id.clone())
    }
}

impl RachioApi for FakeRachio {
    fn get_person_info(&self) -> Result<PersonInfo, RachioClientError> {
        self.read("get_person_info".into(), |s| {
            Some(PersonInfo {
                id: s.person_id.clone(),
            })
        })
    }

    fn get_person(&self, person_id: &PersonId) -> Result<Person, RachioClientError> {
        self.read(format!("get_person {}", person_id.0), |s| {
            (&s.person_id == person_id).then(|| Person {
                id: s.person_id.clone(),
                username: Some("gardener".into()),
                devices: s.devices.borrow().clone(),
            })
        })
    }

    fn get_device(&self, device_id: &DeviceId) -> Result<Device, RachioClientError> {
        self.read(format!("get_device {}", device_id.0), |s| {
            s.devices.borrow().iter().find(|d| &d.id == device_id).cloned()
        })
    }

    fn get_current_schedule(&self, device_id: &DeviceId) -> Result<CurrentSchedule, RachioClientError> {
        self.read(format!("get_current_schedule {}", device_id.0), |s| {
            Some(s.current.borrow().get(device_id).cloned().unwrap_or_default())
        })
    }

    fn get_schedule_items(&self, device_id: &DeviceId) -> Result<Vec<ScheduleItem>, RachioClientError> {
        self.read(format!("get_schedule_items {}", device_id.0), |s| {
            Some(s.items.borrow().get(device_id).cloned().unwrap_or_default())
        })
    }

    fn get_zone(&self, zone_id: &ZoneId) -> Result<Zone, RachioClientError> {
        self.read(format!("get_zone {}", zone_id.0), |s| s.find_zone(zone_id))
    }

    fn get_schedule_rule(&self, rule_id: &ScheduleRuleId) -> Result<ScheduleRule, RachioClientError> {
        self.read(format!("get_schedule_rule {}", rule_id.0), |s| {
            s.devices
                .borrow()
                .iter()
                .flat_map(|d| d.schedule_rules.iter())
                .find(|r| &r.id == rule_id)
                .cloned()
        })
    }

    fn get_flex_schedule_rule(&self, rule_id: &ScheduleRuleId) -> Result<FlexScheduleRule, RachioClientError> {
        self.read(format!("get_flex_schedule_rule {}", rule_id.0), |s| {
            s.devices
                .borrow()
                .iter()
                .flat_map(|d| d.flex_schedule_rules.iter())
                .find(|r| &r.id == rule_id)
                .cloned()
        })
    }

    fn turn_device_on(&self, device_id: &DeviceId) -> Result<(), RachioClientError> {
        self.write(format!("turn_device_on {}", device_id.0), |s| {
            s.edit_device(&device_id.0, |d| d.on = true)
        })
    }

    fn turn_device_off(&self, device_id: &DeviceId) -> Result<(), RachioClientError> {
        self.write(format!("turn_device_off {}", device_id.0), |s| {
            s.edit_device(&device_id.0, |d| d.on = false)
        })
    }

    fn stop_water(&self, device_id: &DeviceId) -> Result<(), RachioClientError> {
        self.write(format!("stop_water {}", device_id.0), |s| {
            s.current.borrow_mut().remove(device_id);
        })
    }

    fn set_rain_delay(&self, device_id: &DeviceId, seconds: i64) -> Result<(), RachioClientError> {
        self.write(format!("set_rain_delay {} {}", device_id.0, seconds), |s| {
            s.edit_device(&device_id.0, |d| d.rain_delay_expiration_date = Some((NOW + seconds) * 1000))
        })
    }

    fn start_zone(&self, zone_id: &ZoneId, seconds: i64) -> Result<(), RachioClientError> {
        self.write(format!("start_zone {} {}", zone_id.0, seconds), |s| {
            if let Some(device_id) = s.device_of_zone(zone_id) {
                let mut current = running_on(&zone_id.0, None);
                current.r#type = Some("MANUAL".into());
                current.duration = Some(seconds);
                s.current.borrow_mut().insert(device_id, current);
            }
        })
    }

    fn start_schedule_rule(&self, rule_id: &ScheduleRuleId) -> Result<(), RachioClientError> {
        self.write(format!("start_schedule_rule {}", rule_id.0), |_| {})
    }

    fn skip_schedule_rule(&self, rule_id: &ScheduleRuleId) -> Result<(), RachioClientError> {
        self.write(format!("skip_schedule_rule {}", rule_id.0), |_| {})
    }

    fn set_seasonal_adjustment(&self, rule_id: &ScheduleRuleId, ratio: f64) -> Result<(), RachioClientError> {
        self.write(format!("set_seasonal_adjustment {} {}", rule_id.0, ratio), |s| {
            for d in s.devices.borrow_mut().iter_mut() {
                for r in d.schedule_rules.iter_mut().filter(|r| &r.id == rule_id) {
                    r.seasonal_adjustment = Some(ratio);
                }
            }
        })
    }
}

/// Hub host that keeps a `NodeTable` and records every driver push and report.
#[derive(Default)]
pub struct RecordingHost {
    pub table: NodeTable,
    pub emitted: Vec<(NodeAddress, Driver, DriverValue)>,
    pub reports: Vec<NodeAddress>,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.emitted.clear();
        self.reports.clear();
    }

    pub fn emitted_for(&self, address: &str) -> Vec<(Driver, DriverValue)> {
        self.emitted
            .iter()
            .filter(|(a, _, _)| a.as_str() == address)
            .map(|(_, d, v)| (*d, *v))
            .collect()
    }

    /// Last value pushed for `driver` on `address`.
    pub fn last(&self, address: &str, driver: Driver) -> Option<DriverValue> {
        self.emitted
            .iter()
            .rev()
            .find(|(a, d, _)| a.as_str() == address && *d == driver)
            .map(|(_, _, v)| *v)
    }

    pub fn drivers_pushed(&self, address: &str) -> Vec<Driver> {
        let mut drivers: Vec<Driver> = self.emitted_for(address).into_iter().map(|(d, _)| d).collect();
        drivers.sort();
        drivers.dedup();
        drivers
    }
}

impl NodeHost for RecordingHost {
    fn register_node(&mut self, address: &NodeAddress, def: &'static NodeDef, attrs: NodeAttrs) -> Result<(), HubError> {
        self.table.register_node(address, def, attrs)
    }

    fn find_node(&self, address: &NodeAddress) -> Option<&NodeRecord> {
        self.table.find_node(address)
    }

    fn set_driver(&mut self, address: &NodeAddress, driver: Driver, value: DriverValue) {
        self.emitted.push((address.clone(), driver, value));
        self.table.set_driver(address, driver, value);
    }

    fn report_driver(&mut self, address: &NodeAddress) {
        self.reports.push(address.clone());
        self.table.report_driver(address);
    }
}
