//! Owner of every discovered entity, keyed by hub address.
//!
//! Entities are added once and never replaced; passes walk them grouped by kind
//! (controllers, zones, schedules, flex schedules), each group in registration order.

use log::{info, warn};
use std::collections::HashMap;
use std::fmt;

use crate::hub::{HubError, NodeAddress, NodeHost};
use crate::nodes::entity::{Entity, EntityKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    Duplicate(NodeAddress),
    Hub(HubError),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::Duplicate(a) => write!(f, "address {} is already registered", a),
            RegistryError::Hub(e) => write!(f, "hub rejected node: {}", e),
        }
    }
}

impl std::error::Error for RegistryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RegistryError::Hub(e) => Some(e),
            RegistryError::Duplicate(_) => None,
        }
    }
}

impl From<HubError> for RegistryError {
    fn from(e: HubError) -> Self {
        RegistryError::Hub(e)
    }
}

/// Outcome of one update pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassSummary {
    pub updated: usize,
    pub failed: usize,
    pub running: usize,
}

#[derive(Default)]
pub struct Registry {
    entities: Vec<Entity>,
    index: HashMap<NodeAddress, usize>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn contains(&self, address: &NodeAddress) -> bool {
        self.index.contains_key(address)
    }

    pub fn get(&self, address: &NodeAddress) -> Option<&Entity> {
        self.index.get(address).map(|&i| &self.entities[i])
    }

    pub fn get_mut(&mut self, address: &NodeAddress) -> Option<&mut Entity> {
        self.index.get(address).map(|&i| &mut self.entities[i])
    }

    #[cfg(test)]
    pub fn count(&self, kind: EntityKind) -> usize {
        self.entities.iter().filter(|e| e.kind() == kind).count()
    }

    /// Take ownership of `entity` and declare it to the hub unless the hub already knows the
    /// address (a restart of the bridge against a persistent hub).
    pub fn register(&mut self, host: &mut dyn NodeHost, entity: Entity) -> Result<(), RegistryError> {
        let address = entity.address().clone();
        if self.contains(&address) {
            return Err(RegistryError::Duplicate(address));
        }
        if host.find_node(&address).is_none() {
            host.register_node(&address, entity.node_def(), entity.attrs())?;
        } else {
            info!("Node {} already known to the hub, reusing it", address);
        }
        info!(
            "Registered {} {} ({})",
            entity.kind().label(),
            entity.name(),
            address
        );
        self.index.insert(address, self.entities.len());
        self.entities.push(entity);
        Ok(())
    }

    /// Update every entity. A failure on one entity is counted and the pass moves on.
    pub fn update_all(&mut self, host: &mut dyn NodeHost, force: bool) -> PassSummary {
        let mut summary = PassSummary::default();
        for kind in EntityKind::ALL {
            for entity in self.entities.iter_mut().filter(|e| e.kind() == kind) {
                match entity.update(host, force) {
                    Ok(()) => {
                        summary.updated += 1;
                        if entity.is_running() {
                            summary.running += 1;
                        }
                    }
                    Err(_) => summary.failed += 1,
                }
            }
        }
        if summary.failed > 0 {
            warn!(
                "Update pass (force={}): {} updated, {} failed",
                force, summary.updated, summary.failed
            );
        }
        summary
    }

    pub fn report_all(&self, host: &mut dyn NodeHost) {
        for kind in EntityKind::ALL {
            for entity in self.entities.iter().filter(|e| e.kind() == kind) {
                entity.report(host);
            }
        }
    }
}
