//! Shared machinery for the four node kinds and the closed `Entity` union over them.
//!
//! Every node keeps the last snapshot it fetched and the last value it pushed for each
//! driver. An update pushes a driver when forced, when its source field changed (value or
//! presence), or, for values derived from the clock or from "which node is running", when
//! the derived value differs from the one last pushed.

use chrono::{DateTime, Utc};
use log::{error, info, warn};
use std::collections::BTreeMap;
use std::fmt;

use crate::client::RachioClientError;
use crate::hub::{Driver, DriverValue, NodeAddress, NodeAttrs, NodeDef, NodeHost};
use crate::models::rachio::{CurrentSchedule, ScheduleItem, ScheduleRuleId, next_item_for};
use crate::nodes::controller::ControllerNode;
use crate::nodes::flex_schedule::FlexScheduleNode;
use crate::nodes::schedule::ScheduleNode;
use crate::nodes::zone::ZoneNode;
use crate::services::discovery::DiscoveryError;
use crate::utils::{MAX_COMMAND_ATTEMPTS, minutes_to_seconds, minutes_until, ms_to_secs, with_retries};

/// Driver value for a running/idle state.
pub const RUNNING: i64 = 100;
pub const IDLE: i64 = 0;

pub fn running_value(running: bool) -> DriverValue {
    DriverValue::Int(if running { RUNNING } else { IDLE })
}

#[derive(Debug)]
pub enum CommandError {
    MissingValue { node: NodeAddress, command: &'static str },
    InvalidValue { node: NodeAddress, command: &'static str, value: f64 },
    Remote { node: NodeAddress, command: &'static str, source: RachioClientError },
    Unsupported { node: NodeAddress, command: String },
    UnknownNode(String),
    NotDiscovered,
    Discovery(DiscoveryError),
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::MissingValue { node, command } => write!(f, "{} on {}: no value supplied", command, node),
            CommandError::InvalidValue { node, command, value } => {
                write!(f, "{} on {}: invalid value {}", command, node, value)
            }
            CommandError::Remote { node, command, source } => write!(f, "{} on {} failed: {}", command, node, source),
            CommandError::Unsupported { node, command } => write!(f, "node {} does not accept {}", node, command),
            CommandError::UnknownNode(a) => write!(f, "no node with address {}", a),
            CommandError::NotDiscovered => write!(f, "discovery has not completed"),
            CommandError::Discovery(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for CommandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CommandError::Remote { source, .. } => Some(source),
            CommandError::Discovery(e) => Some(e),
            _ => None,
        }
    }
}

/// Identity and driver bookkeeping common to every node.
#[derive(Debug, Clone)]
pub struct NodeCore {
    pub address: NodeAddress,
    pub name: String,
    pub primary: Option<NodeAddress>,
    drivers: BTreeMap<Driver, DriverValue>,
}

impl NodeCore {
    pub fn new(address: NodeAddress, name: impl Into<String>, primary: Option<NodeAddress>) -> Self {
        NodeCore {
            address,
            name: name.into(),
            primary,
            drivers: BTreeMap::new(),
        }
    }

    pub fn driver(&self, driver: Driver) -> Option<DriverValue> {
        self.drivers.get(&driver).copied()
    }

    pub fn emit(&mut self, host: &mut dyn NodeHost, driver: Driver, value: impl Into<DriverValue>) {
        let value = value.into();
        host.set_driver(&self.address, driver, value);
        self.drivers.insert(driver, value);
    }

    /// Push `value` when `changed` (which already folds in `force`).
    pub fn emit_if(&mut self, host: &mut dyn NodeHost, changed: bool, driver: Driver, value: impl Into<DriverValue>) {
        if changed {
            self.emit(host, driver, value);
        }
    }

    /// Push `value` when forced or when it differs from the last pushed value.
    pub fn emit_derived(&mut self, host: &mut dyn NodeHost, force: bool, driver: Driver, value: impl Into<DriverValue>) {
        let value = value.into();
        if force || self.driver(driver) != Some(value) {
            self.emit(host, driver, value);
        }
    }

    pub fn report(&self, host: &mut dyn NodeHost) {
        host.report_driver(&self.address);
    }

    /// Run a remote write with the bounded retry policy.
    pub fn remote(
        &self,
        command: &'static str,
        op: impl FnMut() -> Result<(), RachioClientError>,
    ) -> Result<(), CommandError> {
        let what = format!("{} on {} ({})", command, self.name, self.address);
        with_retries(MAX_COMMAND_ATTEMPTS, &what, op).map_err(|source| {
            error!("Giving up on {}: {}", what, source);
            CommandError::Remote {
                node: self.address.clone(),
                command,
                source,
            }
        })
    }

    pub fn require_value(&self, command: &'static str, value: Option<f64>) -> Result<f64, CommandError> {
        value.ok_or_else(|| {
            error!("{} requested on {} but no value specified", command, self.name);
            CommandError::MissingValue {
                node: self.address.clone(),
                command,
            }
        })
    }

    /// Minutes parameter converted to seconds. Anything that is not at least one whole second
    /// once converted (zero, negative, non-finite, sub-second) is rejected.
    pub fn require_duration(&self, command: &'static str, value: Option<f64>) -> Result<i64, CommandError> {
        let minutes = self.require_value(command, value)?;
        let seconds = if minutes.is_finite() { minutes_to_seconds(minutes) } else { 0 };
        if seconds < 1 {
            error!("{} requested on {} with unusable duration {}", command, self.name, minutes);
            return Err(CommandError::InvalidValue {
                node: self.address.clone(),
                command,
                value: minutes,
            });
        }
        Ok(seconds)
    }

    pub fn unsupported(&self, command: &str) -> CommandError {
        warn!("{} ({}) does not accept command {}", self.name, self.address, command);
        CommandError::Unsupported {
            node: self.address.clone(),
            command: command.to_string(),
        }
    }

    pub fn apply(&self, value: Option<f64>) {
        info!("Received apply command on {} (value {:?})", self.name, value);
    }
}

/// `force`, or the two values differ (including one side being absent).
pub fn changed<T: PartialEq + ?Sized>(force: bool, previous: &T, current: &T) -> bool {
    force || previous != current
}

/// Whether `rule_id` is the rule the device is running right now.
pub fn rule_running(current: &CurrentSchedule, rule_id: &ScheduleRuleId) -> bool {
    current.schedule_rule_id.as_ref() == Some(rule_id)
}

/// Minutes until the earliest queued run of `rule_id`, 0.0 when none is queued.
pub fn next_run_minutes(items: &[ScheduleItem], rule_id: &ScheduleRuleId, now: DateTime<Utc>) -> f64 {
    next_item_for(items, rule_id)
        .map(|i| minutes_until(ms_to_secs(i.absolute_start_date), now.timestamp()))
        .unwrap_or(0.0)
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EntityKind {
    Controller,
    Zone,
    Schedule,
    FlexSchedule,
}

impl EntityKind {
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Controller,
        EntityKind::Zone,
        EntityKind::Schedule,
        EntityKind::FlexSchedule,
    ];

    pub fn label(self) -> &'static str {
        match self {
            EntityKind::Controller => "controller",
            EntityKind::Zone => "zone",
            EntityKind::Schedule => "schedule",
            EntityKind::FlexSchedule => "flex schedule",
        }
    }
}

/// One pollable node of any kind.
pub enum Entity {
    Controller(ControllerNode),
    Zone(ZoneNode),
    Schedule(ScheduleNode),
    FlexSchedule(FlexScheduleNode),
}

impl Entity {
    fn core(&self) -> &NodeCore {
        match self {
            Entity::Controller(n) => &n.core,
            Entity::Zone(n) => &n.core,
            Entity::Schedule(n) => &n.core,
            Entity::FlexSchedule(n) => &n.core,
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Controller(_) => EntityKind::Controller,
            Entity::Zone(_) => EntityKind::Zone,
            Entity::Schedule(_) => EntityKind::Schedule,
            Entity::FlexSchedule(_) => EntityKind::FlexSchedule,
        }
    }

    pub fn address(&self) -> &NodeAddress {
        &self.core().address
    }

    pub fn name(&self) -> &str {
        &self.core().name
    }

    #[cfg(test)]
    pub fn driver(&self, driver: Driver) -> Option<DriverValue> {
        self.core().driver(driver)
    }

    /// Identifier of the remote object this node mirrors.
    pub fn remote_id(&self) -> &str {
        match self {
            Entity::Controller(n) => &n.device_id().0,
            Entity::Zone(n) => &n.zone_id().0,
            Entity::Schedule(n) => &n.rule_id().0,
            Entity::FlexSchedule(n) => &n.rule_id().0,
        }
    }

    pub fn node_def(&self) -> &'static NodeDef {
        match self {
            Entity::Controller(_) => &crate::nodes::controller::NODE_DEF,
            Entity::Zone(_) => &crate::nodes::zone::NODE_DEF,
            Entity::Schedule(_) => &crate::nodes::schedule::NODE_DEF,
            Entity::FlexSchedule(_) => &crate::nodes::flex_schedule::NODE_DEF,
        }
    }

    pub fn attrs(&self) -> NodeAttrs {
        let core = self.core();
        NodeAttrs {
            name: core.name.clone(),
            primary: core.primary.clone(),
        }
    }

    /// Running state as of the last successful refresh.
    pub fn is_running(&self) -> bool {
        match self {
            Entity::Controller(n) => n.is_running(),
            Entity::Zone(n) => n.is_running(),
            Entity::Schedule(n) => n.is_running(),
            Entity::FlexSchedule(n) => n.is_running(),
        }
    }

    pub fn update(&mut self, host: &mut dyn NodeHost, force: bool) -> Result<(), RachioClientError> {
        self.update_at(host, force, Utc::now())
    }

    pub fn update_at(&mut self, host: &mut dyn NodeHost, force: bool, now: DateTime<Utc>) -> Result<(), RachioClientError> {
        match self {
            Entity::Controller(n) => n.update_at(host, force, now),
            Entity::Zone(n) => n.update_at(host, force, now),
            Entity::Schedule(n) => n.update_at(host, force, now),
            Entity::FlexSchedule(n) => n.update_at(host, force, now),
        }
    }

    pub fn report(&self, host: &mut dyn NodeHost) {
        self.core().report(host);
    }

    pub fn command(&mut self, host: &mut dyn NodeHost, command: &str, value: Option<f64>) -> Result<(), CommandError> {
        match self {
            Entity::Controller(n) => n.command(host, command, value),
            Entity::Zone(n) => n.command(host, command, value),
            Entity::Schedule(n) => n.command(host, command, value),
            Entity::FlexSchedule(n) => n.command(host, command, value),
        }
    }
}
