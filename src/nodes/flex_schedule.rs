//! Flex schedule rule node.
//!
//! Drivers: ST running, GV0 enabled, GV2 total duration in whole minutes, GV4 minutes until
//! the rule next runs. Accepts only the common commands.

use chrono::{DateTime, Utc};
use log::{error, info};
use std::rc::Rc;

use crate::client::RachioClientError;
use crate::hub::{Driver, DriverDef, NodeAddress, NodeDef, NodeHost, uom};
use crate::models::rachio::{CurrentSchedule, DeviceId, FlexScheduleRule, ScheduleItem, ScheduleRuleId};
use crate::nodes::entity::{CommandError, NodeCore, changed, next_run_minutes, rule_running, running_value};
use crate::session::Session;

// GV1 and GV3 are not carried: flex rules have no per-rule rain delay flag or seasonal
// adjustment.
pub static NODE_DEF: NodeDef = NodeDef {
    id: "rachio_flexschedule",
    drivers: &[
        DriverDef { driver: Driver::St, uom: uom::ON_OFF },
        DriverDef { driver: Driver::Gv0, uom: uom::BOOLEAN },
        DriverDef { driver: Driver::Gv2, uom: uom::MINUTES },
        DriverDef { driver: Driver::Gv4, uom: uom::MINUTES },
    ],
};

pub struct FlexScheduleNode {
    pub(crate) core: NodeCore,
    session: Rc<Session>,
    device_id: DeviceId,
    rule: FlexScheduleRule,
    current: Option<CurrentSchedule>,
}

impl FlexScheduleNode {
    pub fn new(
        session: Rc<Session>,
        address: NodeAddress,
        primary: NodeAddress,
        device_id: DeviceId,
        rule: FlexScheduleRule,
    ) -> Self {
        FlexScheduleNode {
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

    fn fetch(&self) -> Result<(FlexScheduleRule, CurrentSchedule, Vec<ScheduleItem>), RachioClientError> {
        let api = self.session.api();
        let rule = api.get_flex_schedule_rule(&self.rule.id)?;
        let current = api.get_current_schedule(&self.device_id)?;
        let items = api.get_schedule_items(&self.device_id)?;
        Ok((rule, current, items))
    }

    pub fn update_at(&mut self, host: &mut dyn NodeHost, force: bool, now: DateTime<Utc>) -> Result<(), RachioClientError> {
        let (rule, current, items) = match self.fetch() {
            Ok(v) => v,
            Err(e) => {
                error!(
                    "Connection error on {} Rachio flex schedule refresh, may be temporary: {}",
                    self.core.name, e
                );
                return Err(e);
            }
        };
        let old = &self.rule;
        let core = &mut self.core;

        core.emit_derived(host, force, Driver::St, running_value(rule_running(&current, &rule.id)));
        core.emit_if(host, changed(force, &old.enabled, &rule.enabled), Driver::Gv0, rule.enabled);
        // remote duration is in seconds, the hub shows whole minutes
        core.emit_if(
            host,
            changed(force, &old.total_duration, &rule.total_duration),
            Driver::Gv2,
            rule.total_duration.map(|s| s / 60).unwrap_or(0),
        );
        core.emit_derived(host, force, Driver::Gv4, next_run_minutes(&items, &rule.id, now));

        self.rule = rule;
        self.current = Some(current);
        self.core.report(host);
        Ok(())
    }

    pub fn command(&mut self, host: &mut dyn NodeHost, command: &str, value: Option<f64>) -> Result<(), CommandError> {
        match command {
            "QUERY" | "ST" => {
                info!("Query command received on {} Rachio flex schedule", self.core.name);
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
}
