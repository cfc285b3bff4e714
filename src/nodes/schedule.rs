//! Fixed schedule rule node.
//!
//! Drivers: ST running, GV0 enabled, GV1 rain delay, GV2 total duration (as reported),
//! GV3 seasonal adjustment in percent, GV4 minutes until the rule next runs.

use chrono::{DateTime, Utc};
use log::{error, info, warn};
use std::rc::Rc;

use crate::client::RachioClientError;
use crate::hub::{Driver, DriverDef, NodeAddress, NodeDef, NodeHost, uom};
use crate::models::rachio::{CurrentSchedule, DeviceId, ScheduleItem, ScheduleRule, ScheduleRuleId};
use crate::nodes::entity::{CommandError, NodeCore, changed, next_run_minutes, rule_running, running_value};
use crate::session::Session;
use crate::utils::{percent_from_ratio, ratio_from_percent};

pub static NODE_DEF: NodeDef = NodeDef {
    id: "rachio_schedule",
    drivers: &[
        DriverDef { driver: Driver::St, uom: uom::ON_OFF },
        DriverDef { driver: Driver::Gv0, uom: uom::BOOLEAN },
        DriverDef { driver: Driver::Gv1, uom: uom::BOOLEAN },
        DriverDef { driver: Driver::Gv2, uom: uom::MINUTES },
        DriverDef { driver: Driver::Gv3, uom: uom::PERCENT },
        DriverDef { driver: Driver::Gv4, uom: uom::MINUTES },
    ],
};

pub struct ScheduleNode {
    pub(crate) core: NodeCore,
    session: Rc<Session>,
    device_id: DeviceId,
    rule: ScheduleRule,
    current: Option<CurrentSchedule>,
}

impl ScheduleNode {
    pub fn new(
        session: Rc<Session>,
        address: NodeAddress,
        primary: NodeAddress,
        device_id: DeviceId,
        rule: ScheduleRule,
    ) -> Self {
        ScheduleNode {
            core: NodeCore::new(address, rule.name.clone(), Some(primary)),
            session,
            device_id,
            rule,
            current: None,
        }
    }

    pub fn rule_id(&self) -> &ScheduleRuleId {
        &self.rule.id
    }

    pub fn is_running(&self) -> bool {
        self.current.as_ref().is_some_and(|c| rule_running(c, &self.rule.id))
    }

    fn fetch(&self) -> Result<(ScheduleRule, CurrentSchedule, Vec<ScheduleItem>), RachioClientError> {
        let api = self.session.api();
        Ok((
            api.get_schedule_rule(&self.rule.id)?,
            api.get_current_schedule(&self.device_id)?,
            api.get_schedule_items(&self.device_id)?,
        ))
    }

    pub fn update_at(&mut self, host: &mut dyn NodeHost, force: bool, now: DateTime<Utc>) -> Result<(), RachioClientError> {
        let (rule, current, items) = self.fetch().map_err(|e| {
            error!(
                "Connection error on {} Rachio schedule refresh, may be temporary: {}",
                self.core.name, e
            );
            e
        })?;
        let old = &self.rule;
        let core = &mut self.core;

        core.emit_derived(host, force, Driver::St, running_value(rule_running(&current, &rule.id)));
        core.emit_if(host, changed(force, &old.enabled, &rule.enabled), Driver::Gv0, rule.enabled);
        core.emit_if(
            host,
            changed(force, &old.rain_delay, &rule.rain_delay),
            Driver::Gv1,
            rule.rain_delay.unwrap_or(false),
        );
        core.emit_if(
            host,
            changed(force, &old.total_duration, &rule.total_duration),
            Driver::Gv2,
            rule.total_duration.unwrap_or(0),
        );
        core.emit_if(
            host,
            changed(force, &old.seasonal_adjustment, &rule.seasonal_adjustment),
            Driver::Gv3,
            rule.seasonal_adjustment.map(percent_from_ratio).unwrap_or(0.0),
        );
        core.emit_derived(host, force, Driver::Gv4, next_run_minutes(&items, &rule.id, now));

        self.rule = rule;
        self.current = Some(current);
        self.core.report(host);
        Ok(())
    }

    pub fn command(&mut self, host: &mut dyn NodeHost, command: &str, value: Option<f64>) -> Result<(), CommandError> {
        match command {
            "START" => self.start(host),
            "SKIP" => self.skip(host),
            "ADJUST" => self.adjust(host, value),
            "QUERY" | "ST" => {
                info!("Query command received on {} Rachio schedule", self.core.name);
                self.update_at(host, true, Utc::now()).map_err(|source| CommandError::Remote {
                    node: self.core.address.clone(),
                    command: "QUERY",
                    source,
                })
            }
            "APPLY" => {
                self.core.apply(value);
                Ok(())
            }
            other => Err(self.core.unsupported(other)),
        }
    }

    pub fn start(&mut self, host: &mut dyn NodeHost) -> Result<(), CommandError> {
        let api = self.session.api();
        self.core.remote("START", || api.start_schedule_rule(&self.rule.id))?;
        info!("Command received to start watering schedule {}", self.core.name);
        self.resync(host);
        Ok(())
    }

    pub fn skip(&mut self, host: &mut dyn NodeHost) -> Result<(), CommandError> {
        let api = self.session.api();
        self.core.remote("SKIP", || api.skip_schedule_rule(&self.rule.id))?;
        info!("Command received to skip watering schedule {}", self.core.name);
        self.resync(host);
        Ok(())
    }

    /// Set the seasonal adjustment from a hub percentage (120 means 1.2).
    pub fn adjust(&mut self, host: &mut dyn NodeHost, percent: Option<f64>) -> Result<(), CommandError> {
        let ratio = ratio_from_percent(self.core.require_value("ADJUST", percent)?);
        let api = self.session.api();
        self.core
            .remote("ADJUST", || api.set_seasonal_adjustment(&self.rule.id, ratio))?;
        info!(
            "Command received to change seasonal adjustment on schedule {} to {}",
            self.core.name, ratio
        );
        self.resync(host);
        Ok(())
    }

    fn resync(&mut self, host: &mut dyn NodeHost) {
        if self.update_at(host, false, Utc::now()).is_err() {
            warn!(
                "Schedule {} accepted the command but the follow-up refresh failed",
                self.core.name
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::DriverValue;
    use crate::test_support::*;
    use serde_json::json;

    const ADDR: &str = "f0ad4e012345ab";

    fn schedule(fake: &Rc<FakeRachio>) -> ScheduleNode {
        let rule = sample_device().schedule_rules.remove(0);
        ScheduleNode::new(
            fake.session(),
            addr(ADDR),
            addr(CONTROLLER_ADDR),
            DeviceId("dev-1".into()),
            rule,
        )
    }

    #[test]
    fn forced_update_exposes_percent_and_next_run() {
        let fake = FakeRachio::new(vec![sample_device()]);
        let items: Vec<ScheduleItem> = serde_json::from_value(json!([
            {"absoluteStartDate": (NOW + 60) * 1000, "scheduleRuleId": "flex-00cd", "scheduleType": "FLEX"},
            {"absoluteStartDate": (NOW + 600) * 1000, "scheduleRuleId": "rule-00ab", "scheduleType": "FIXED"},
            {"absoluteStartDate": (NOW + 9000) * 1000, "scheduleRuleId": "rule-00ab", "scheduleType": "FIXED"}
        ]))
        .expect("items");
        fake.set_items("dev-1", items);
        let mut node = schedule(&fake);
        let mut host = RecordingHost::new();

        node.update_at(&mut host, true, at(NOW)).expect("update");
        assert_eq!(host.drivers_pushed(ADDR).len(), NODE_DEF.drivers.len());
        assert_eq!(host.last(ADDR, Driver::St), Some(DriverValue::Int(0)));
        assert_eq!(host.last(ADDR, Driver::Gv2), Some(DriverValue::Int(45)));
        assert_eq!(host.last(ADDR, Driver::Gv3), Some(DriverValue::Float(85.0)));
        // earliest item of this rule, not the earliest overall
        assert_eq!(host.last(ADDR, Driver::Gv4), Some(DriverValue::Float(10.0)));
    }

    #[test]
    fn running_follows_rule_id() {
        let fake = FakeRachio::new(vec![sample_device()]);
        let mut node = schedule(&fake);
        let mut host = RecordingHost::new();
        node.update_at(&mut host, true, at(NOW)).expect("update");
        host.clear();

        fake.set_current("dev-1", running_on("zone-2", Some("rule-00ab")));
        node.update_at(&mut host, false, at(NOW)).expect("update");
        assert_eq!(host.emitted_for(ADDR), vec![(Driver::St, DriverValue::Int(100))]);

        host.clear();
        fake.set_current("dev-1", running_on("zone-2", None));
        node.update_at(&mut host, false, at(NOW)).expect("update");
        assert_eq!(host.emitted_for(ADDR), vec![(Driver::St, DriverValue::Int(0))]);
    }

    #[test]
    fn adjust_sends_ratio() {
        let fake = FakeRachio::new(vec![sample_device()]);
        let mut node = schedule(&fake);
        let mut host = RecordingHost::new();
        node.update_at(&mut host, true, at(NOW)).expect("update");
        host.clear();

        node.command(&mut host, "ADJUST", Some(120.0)).expect("adjust");
        assert_eq!(fake.writes(), vec!["set_seasonal_adjustment rule-00ab 1.2".to_string()]);
        assert_eq!(host.emitted_for(ADDR), vec![(Driver::Gv3, DriverValue::Float(120.0))]);
    }

    #[test]
    fn adjust_without_value_is_rejected() {
        let fake = FakeRachio::new(vec![sample_device()]);
        let mut node = schedule(&fake);
        let mut host = RecordingHost::new();
        assert!(matches!(
            node.command(&mut host, "ADJUST", None),
            Err(CommandError::MissingValue { command: "ADJUST", .. })
        ));
        assert!(fake.writes().is_empty());
    }

    #[test]
    fn skip_gives_up_after_two_attempts() {
        let fake = FakeRachio::new(vec![sample_device()]);
        let mut node = schedule(&fake);
        let mut host = RecordingHost::new();

        fake.write_failures.set(2);
        assert!(node.command(&mut host, "SKIP", None).is_err());
        assert_eq!(fake.count("skip_schedule_rule"), 2);

        fake.write_failures.set(1);
        node.command(&mut host, "START", None).expect("start");
        assert_eq!(fake.count("start_schedule_rule"), 2);
    }

    #[test]
    fn zone_commands_are_not_schedule_commands() {
        let fake = FakeRachio::new(vec![sample_device()]);
        let mut node = schedule(&fake);
        let mut host = RecordingHost::new();
        assert!(matches!(
            node.command(&mut host, "RAIN_DELAY", Some(10.0)),
            Err(CommandError::Unsupported { .. })
        ));
        node.command(&mut host, "APPLY", None).expect("apply");
    }
}
