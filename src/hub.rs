//! Hub side of the bridge: node addresses, driver codes and the node host contract.
//!
//! The hub knows nodes by a short ASCII address and exposes a fixed set of numeric
//! "drivers" per node type. `NodeTable` is the in-process host used by the binary; it keeps
//! the latest value of every driver and logs the ones that changed on each report.

use log::{debug, info, warn};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

/// Longest address the hub accepts.
pub const MAX_ADDRESS_LEN: usize = 14;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    Empty,
    NotAscii(String),
    TooLong(String),
}

impl fmt::Display for AddressError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressError::Empty => write!(f, "address is empty"),
            AddressError::NotAscii(a) => write!(f, "address {:?} is not ASCII", a),
            AddressError::TooLong(a) => {
                write!(f, "address {:?} is {} characters (max {})", a, a.len(), MAX_ADDRESS_LEN)
            }
        }
    }
}

impl std::error::Error for AddressError {}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeAddress(String);

impl NodeAddress {
    pub fn new(address: impl Into<String>) -> Result<Self, AddressError> {
        let address = address.into();
        if address.is_empty() {
            return Err(AddressError::Empty);
        }
        if !address.is_ascii() {
            return Err(AddressError::NotAscii(address));
        }
        if address.len() > MAX_ADDRESS_LEN {
            return Err(AddressError::TooLong(address));
        }
        Ok(NodeAddress(address))
    }

    /// Address known at compile time to satisfy the hub's rules.
    pub(crate) fn from_static(address: &'static str) -> Self {
        debug_assert!(Self::new(address).is_ok(), "invalid static address {:?}", address);
        NodeAddress(address.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Driver {
    St,
    Gv0,
    Gv1,
    Gv2,
    Gv3,
    Gv4,
    Gv5,
    Gv6,
    Gv7,
    Gv8,
    Gv9,
    Gv10,
    Gv11,
    Gv12,
}

impl Driver {
    pub fn code(self) -> &'static str {
        match self {
            Driver::St => "ST",
            Driver::Gv0 => "GV0",
            Driver::Gv1 => "GV1",
            Driver::Gv2 => "GV2",
            Driver::Gv3 => "GV3",
            Driver::Gv4 => "GV4",
            Driver::Gv5 => "GV5",
            Driver::Gv6 => "GV6",
            Driver::Gv7 => "GV7",
            Driver::Gv8 => "GV8",
            Driver::Gv9 => "GV9",
            Driver::Gv10 => "GV10",
            Driver::Gv11 => "GV11",
            Driver::Gv12 => "GV12",
        }
    }
}

impl fmt::Display for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum DriverValue {
    Int(i64),
    Float(f64),
}

impl From<bool> for DriverValue {
    fn from(value: bool) -> Self {
        DriverValue::Int(i64::from(value))
    }
}

impl From<i64> for DriverValue {
    fn from(value: i64) -> Self {
        DriverValue::Int(value)
    }
}

impl From<f64> for DriverValue {
    fn from(value: f64) -> Self {
        DriverValue::Float(value)
    }
}

impl fmt::Display for DriverValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverValue::Int(v) => write!(f, "{}", v),
            DriverValue::Float(v) => write!(f, "{}", v),
        }
    }
}

/// Units of measure the hub renders driver values with.
pub mod uom {
    pub const BOOLEAN: u16 = 2;
    pub const SQUARE_FEET: u16 = 18;
    pub const INCHES_PER_HOUR: u16 = 24;
    pub const INDEX: u16 = 25;
    pub const MINUTES: u16 = 45;
    pub const PERCENT: u16 = 51;
    pub const RAW: u16 = 56;
    pub const ON_OFF: u16 = 78;
    pub const INCHES: u16 = 105;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverDef {
    pub driver: Driver,
    pub uom: u16,
}

/// A node type as the hub knows it: its id and the drivers it carries.
#[derive(Debug, PartialEq, Eq)]
pub struct NodeDef {
    pub id: &'static str,
    pub drivers: &'static [DriverDef],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeAttrs {
    pub name: String,
    /// Owning node; `None` for primary nodes.
    pub primary: Option<NodeAddress>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubError {
    AlreadyRegistered(NodeAddress),
    UnknownPrimary { address: NodeAddress, primary: NodeAddress },
}

impl fmt::Display for HubError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HubError::AlreadyRegistered(a) => write!(f, "node {} already registered", a),
            HubError::UnknownPrimary { address, primary } => {
                write!(f, "node {} refers to unknown primary {}", address, primary)
            }
        }
    }
}

impl std::error::Error for HubError {}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeRecord {
    pub def_id: &'static str,
    pub name: String,
    pub primary: Option<NodeAddress>,
    pub drivers: BTreeMap<Driver, DriverValue>,
}

/// Contract the bridge relies on from the hub's node host.
pub trait NodeHost {
    fn register_node(&mut self, address: &NodeAddress, def: &'static NodeDef, attrs: NodeAttrs) -> Result<(), HubError>;
    fn find_node(&self, address: &NodeAddress) -> Option<&NodeRecord>;
    fn set_driver(&mut self, address: &NodeAddress, driver: Driver, value: DriverValue);
    fn report_driver(&mut self, address: &NodeAddress);
}

#[derive(Debug, Default)]
pub struct NodeTable {
    nodes: HashMap<NodeAddress, NodeRecord>,
    dirty: HashMap<NodeAddress, BTreeSet<Driver>>,
}

impl NodeTable {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[cfg(test)]
    pub fn driver(&self, address: &NodeAddress, driver: Driver) -> Option<DriverValue> {
        self.nodes.get(address).and_then(|n| n.drivers.get(&driver).copied())
    }
}

impl NodeHost for NodeTable {
    fn register_node(&mut self, address: &NodeAddress, def: &'static NodeDef, attrs: NodeAttrs) -> Result<(), HubError> {
        if self.nodes.contains_key(address) {
            return Err(HubError::AlreadyRegistered(address.clone()));
        }
        if let Some(primary) = attrs.primary.as_ref()
            && !self.nodes.contains_key(primary)
        {
            return Err(HubError::UnknownPrimary {
                address: address.clone(),
                primary: primary.clone(),
            });
        }
        let drivers = def
            .drivers
            .iter()
            .map(|d| (d.driver, DriverValue::Int(0)))
            .collect();
        info!("Hub: node {} ({}) added as {}", address, attrs.name, def.id);
        self.nodes.insert(
            address.clone(),
            NodeRecord {
                def_id: def.id,
                name: attrs.name,
                primary: attrs.primary,
                drivers,
            },
        );
        Ok(())
    }

    fn find_node(&self, address: &NodeAddress) -> Option<&NodeRecord> {
        self.nodes.get(address)
    }

    fn set_driver(&mut self, address: &NodeAddress, driver: Driver, value: DriverValue) {
        let Some(node) = self.nodes.get_mut(address) else {
            warn!("Hub: driver {} set on unknown node {}", driver, address);
            return;
        };
        node.drivers.insert(driver, value);
        self.dirty.entry(address.clone()).or_default().insert(driver);
    }

    fn report_driver(&mut self, address: &NodeAddress) {
        let Some(node) = self.nodes.get(address) else {
            return;
        };
        let changed = self.dirty.remove(address).unwrap_or_default();
        if changed.is_empty() {
            debug!("Hub: node {} unchanged", address);
            return;
        }
        let values = changed
            .iter()
            .filter_map(|d| node.drivers.get(d).map(|v| format!("{}={}", d, v)))
            .collect::<Vec<_>>()
            .join(", ");
        info!("Hub: node {} ({}) {}", address, node.name, values);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static TEST_DEF: NodeDef = NodeDef {
        id: "test_node",
        drivers: &[
            DriverDef { driver: Driver::St, uom: uom::ON_OFF },
            DriverDef { driver: Driver::Gv0, uom: uom::BOOLEAN },
        ],
    };

    fn addr(s: &str) -> NodeAddress {
        NodeAddress::new(s).expect("valid address")
    }

    #[test]
    fn address_limits() {
        assert!(NodeAddress::new("f0ad4e01234512").is_ok());
        assert_eq!(
            NodeAddress::new("f0ad4e0123451234"),
            Err(AddressError::TooLong("f0ad4e0123451234".into()))
        );
        assert_eq!(NodeAddress::new(""), Err(AddressError::Empty));
        assert!(matches!(NodeAddress::new("zoneé"), Err(AddressError::NotAscii(_))));
    }

    #[test]
    fn bool_driver_values_are_zero_or_one() {
        assert_eq!(DriverValue::from(true), DriverValue::Int(1));
        assert_eq!(DriverValue::from(false), DriverValue::Int(0));
    }

    #[test]
    fn table_registers_and_tracks_drivers() {
        let mut table = NodeTable::new();
        let parent = addr("parent");
        table
            .register_node(&parent, &TEST_DEF, NodeAttrs { name: "P".into(), primary: None })
            .expect("register");
        assert_eq!(table.driver(&parent, Driver::St), Some(DriverValue::Int(0)));

        table.set_driver(&parent, Driver::St, DriverValue::Int(100));
        table.report_driver(&parent);
        assert_eq!(table.driver(&parent, Driver::St), Some(DriverValue::Int(100)));
        assert_eq!(table.find_node(&parent).map(|n| n.def_id), Some("test_node"));
    }

    #[test]
    fn table_rejects_duplicates_and_orphans() {
        let mut table = NodeTable::new();
        let a = addr("a");
        table
            .register_node(&a, &TEST_DEF, NodeAttrs { name: "A".into(), primary: None })
            .expect("register");
        assert_eq!(
            table.register_node(&a, &TEST_DEF, NodeAttrs { name: "A".into(), primary: None }),
            Err(HubError::AlreadyRegistered(a.clone()))
        );
        let orphan = table.register_node(
            &addr("b"),
            &TEST_DEF,
            NodeAttrs {
                name: "B".into(),
                primary: Some(addr("missing")),
            },
        );
        assert!(matches!(orphan, Err(HubError::UnknownPrimary { .. })));
        assert_eq!(table.len(), 1);
    }
}
