use log::{info, warn};
use std::fmt;
use std::rc::Rc;

use crate::client::RachioClientError;
use crate::hub::{HubError, NodeAddress, NodeHost};
use crate::models::rachio::Device;
use crate::nodes::controller::ControllerNode;
use crate::nodes::entity::Entity;
use crate::nodes::flex_schedule::FlexScheduleNode;
use crate::nodes::schedule::ScheduleNode;
use crate::nodes::zone::ZoneNode;
use crate::registry::{PassSummary, Registry, RegistryError};
use crate::session::Session;

#[derive(Debug)]
pub enum DiscoveryError {
    Remote(RachioClientError),
    Hub(HubError),
}

impl fmt::Display for DiscoveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscoveryError::Remote(e) if e.is_auth() => write!(f, "Rachio rejected the API key: {}", e),
            DiscoveryError::Remote(e) => write!(f, "Rachio discovery failed: {}", e),
            DiscoveryError::Hub(e) => write!(f, "hub refused a discovered node: {}", e),
        }
    }
}

impl std::error::Error for DiscoveryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DiscoveryError::Remote(e) => Some(e),
            DiscoveryError::Hub(e) => Some(e),
        }
    }
}

impl From<RachioClientError> for DiscoveryError {
    fn from(e: RachioClientError) -> Self {
        DiscoveryError::Remote(e)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DiscoverySummary {
    pub devices: usize,
    pub added: usize,
    pub skipped: usize,
    pub initial_pass: PassSummary,
}

/// Hub address of a controller: its MAC address, lower-cased.
pub fn controller_address(device: &Device) -> String {
    device.mac_address.to_lowercase()
}

/// Last two characters of a rule id, the suffix that keeps schedule addresses within the
/// hub's length limit.
pub fn rule_suffix(rule_id: &str) -> &str {
    let start = rule_id
        .char_indices()
        .rev()
        .nth(1)
        .map(|(i, _)| i)
        .unwrap_or(0);
    &rule_id[start..]
}

/// Walk the account graph behind `session` and register every device, zone, schedule and
/// flex schedule the registry does not know yet, then run one forced update pass.
///
/// Safe to call again: known addresses are skipped, so a second run only adds what is new.
pub fn discover(
    session: &Rc<Session>,
    registry: &mut Registry,
    host: &mut dyn NodeHost,
) -> Result<DiscoverySummary, DiscoveryError> {
    let person = session.api().get_person(session.person_id())?;
    let mut summary = DiscoverySummary {
        devices: person.devices.len(),
        ..Default::default()
    };
    info!("{} Rachio controller(s) found", person.devices.len());

    for device in person.devices {
        let base = controller_address(&device);
        let Some(parent) = parse_address(&base, &device.name) else {
            summary.skipped += 1;
            continue;
        };
        let device_id = device.id.clone();
        let name = device.name.clone();

        info!(
            "{} zone(s), {} schedule(s), {} flex schedule(s) on \"{}\"",
            device.zones.len(),
            device.schedule_rules.len(),
            device.flex_schedule_rules.len(),
            name
        );
        let zones = device.zones.clone();
        let rules = device.schedule_rules.clone();
        let flex_rules = device.flex_schedule_rules.clone();

        let controller = ControllerNode::new(Rc::clone(session), parent.clone(), device);
        add(registry, host, Entity::Controller(controller), &mut summary)?;

        for zone in zones {
            let Some(address) = parse_address(&format!("{}{}", base, zone.zone_number), &zone.name) else {
                summary.skipped += 1;
                continue;
            };
            let node = ZoneNode::new(Rc::clone(session), address, parent.clone(), device_id.clone(), zone);
            add(registry, host, Entity::Zone(node), &mut summary)?;
        }

        for rule in rules {
            let Some(address) = parse_address(&format!("{}{}", base, rule_suffix(&rule.id.0)), &rule.name) else {
                summary.skipped += 1;
                continue;
            };
            let node = ScheduleNode::new(Rc::clone(session), address, parent.clone(), device_id.clone(), rule);
            add(registry, host, Entity::Schedule(node), &mut summary)?;
        }

        for rule in flex_rules {
            let Some(address) = parse_address(&format!("{}{}", base, rule_suffix(&rule.id.0)), &rule.name) else {
                summary.skipped += 1;
                continue;
            };
            let node = FlexScheduleNode::new(Rc::clone(session), address, parent.clone(), device_id.clone(), rule);
            add(registry, host, Entity::FlexSchedule(node), &mut summary)?;
        }
    }

    info!(
        "Discovery added {} node(s), skipped {}; populating initial values",
        summary.added, summary.skipped
    );
    summary.initial_pass = registry.update_all(host, true);
    Ok(summary)
}

fn parse_address(raw: &str, name: &str) -> Option<NodeAddress> {
    match NodeAddress::new(raw) {
        Ok(a) => Some(a),
        Err(e) => {
            warn!("Skipping \"{}\": {}", name, e);
            None
        }
    }
}

/// Register `entity` unless its address is taken. A taken address held by a different
/// remote object is a suffix collision and is logged; the newcomer is dropped.
fn add(
    registry: &mut Registry,
    host: &mut dyn NodeHost,
    entity: Entity,
    summary: &mut DiscoverySummary,
) -> Result<(), DiscoveryError> {
    if let Some(existing) = registry.get(entity.address()) {
        if existing.remote_id() != entity.remote_id() {
            warn!(
                "Address collision on {}: {} \"{}\" ({}) is already taken by {} \"{}\" ({}); skipping",
                entity.address(),
                entity.kind().label(),
                entity.name(),
                entity.remote_id(),
                existing.kind().label(),
                existing.name(),
                existing.remote_id()
            );
        }
        summary.skipped += 1;
        return Ok(());
    }
    match registry.register(host, entity) {
        Ok(()) => {
            summary.added += 1;
            Ok(())
        }
        Err(RegistryError::Duplicate(_)) => {
            summary.skipped += 1;
            Ok(())
        }
        Err(RegistryError::Hub(e)) => Err(DiscoveryError::Hub(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::{Driver, DriverValue};
    use crate::models::rachio::ScheduleRule;
    use crate::nodes::entity::EntityKind;
    use crate::test_support::*;

    #[test]
    fn suffix_is_last_two_characters() {
        assert_eq!(rule_suffix("3c59a593-04b8-42df-91db-758f4fe4a97f"), "7f");
        assert_eq!(rule_suffix("x"), "x");
        assert_eq!(rule_suffix("abé"), "bé");
    }

    #[test]
    fn discovers_the_whole_account() {
        let fake = FakeRachio::new(vec![sample_device()]);
        let session = fake.session();
        let mut registry = Registry::new();
        let mut host = RecordingHost::new();

        let summary = discover(&session, &mut registry, &mut host).expect("discover");
        assert_eq!(summary.devices, 1);
        assert_eq!(summary.added, 6);
        assert_eq!(summary.initial_pass.updated, 6);
        assert_eq!(registry.count(EntityKind::Zone), 3);
        for a in [CONTROLLER_ADDR, "f0ad4e0123451", "f0ad4e0123453", "f0ad4e012345ab", "f0ad4e012345cd"] {
            assert!(registry.contains(&addr(a)), "missing {}", a);
        }
        // initial values are populated by the forced pass
        assert_eq!(host.last(CONTROLLER_ADDR, Driver::Gv0), Some(DriverValue::Int(1)));
        assert_eq!(
            host.table.find_node(&addr("f0ad4e012345cd")).map(|n| n.def_id),
            Some("rachio_flexschedule")
        );
    }

    #[test]
    fn rediscovery_only_adds_new_entities() {
        let fake = FakeRachio::new(vec![sample_device()]);
        let session = fake.session();
        let mut registry = Registry::new();
        let mut host = RecordingHost::new();
        discover(&session, &mut registry, &mut host).expect("discover");

        fake.edit_device("dev-1", |d| {
            let mut extra = d.schedule_rules[0].clone();
            extra.id = crate::models::rachio::ScheduleRuleId("rule-77ef".into());
            extra.name = "Evening".into();
            d.schedule_rules.push(extra);
        });
        let summary = discover(&session, &mut registry, &mut host).expect("discover");
        assert_eq!(summary.added, 1);
        assert_eq!(summary.skipped, 6);
        assert!(registry.contains(&addr("f0ad4e012345ef")));
    }

    #[test]
    fn suffix_collision_keeps_the_first_rule() {
        let mut device = sample_device();
        let clash: ScheduleRule = serde_json::from_value(serde_json::json!({
            "id": "other-99ab",
            "name": "Clash",
            "enabled": true
        }))
        .expect("rule");
        device.schedule_rules.push(clash);
        let fake = FakeRachio::new(vec![device]);
        let session = fake.session();
        let mut registry = Registry::new();
        let mut host = RecordingHost::new();

        let summary = discover(&session, &mut registry, &mut host).expect("discover");
        assert_eq!(summary.added, 6);
        assert_eq!(summary.skipped, 1);
        let kept = registry.get(&addr("f0ad4e012345ab")).expect("schedule");
        assert_eq!(kept.remote_id(), "rule-00ab");
    }

    #[test]
    fn overlong_addresses_are_skipped() {
        let mut device = sample_device();
        device.zones[0].zone_number = 123;
        let fake = FakeRachio::new(vec![device]);
        let session = fake.session();
        let mut registry = Registry::new();
        let mut host = RecordingHost::new();

        let summary = discover(&session, &mut registry, &mut host).expect("discover");
        assert_eq!(summary.skipped, 1);
        assert_eq!(registry.count(EntityKind::Zone), 2);
    }

    #[test]
    fn connection_failure_is_a_discovery_error() {
        let fake = FakeRachio::new(vec![sample_device()]);
        let session = fake.session();
        fake.fail_reads.set(true);
        let mut registry = Registry::new();
        let mut host = RecordingHost::new();

        let err = discover(&session, &mut registry, &mut host).unwrap_err();
        assert!(matches!(err, DiscoveryError::Remote(_)));
        assert!(registry.is_empty());
        assert_eq!(host.table.len(), 0);
    }
}
