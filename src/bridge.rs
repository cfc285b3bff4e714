//! The bridge node and the surface the poll loop and the hub talk to.
//!
//! `Bridge` owns the session and the registry. Before a successful discovery it has neither
//! a session nor entities; polls are then no-ops and commands to entity addresses fail with
//! `CommandError::NotDiscovered`.

use log::{info, warn};
use std::rc::Rc;
use std::time::Duration;

use crate::client::{RachioApi, RachioClient};
use crate::hub::{HubError, NodeAddress, NodeAttrs, NodeDef, NodeHost};
use crate::models::rachio::PersonId;
use crate::nodes::entity::{CommandError, Entity};
use crate::registry::{PassSummary, Registry};
use crate::services::discovery::{self, DiscoveryError, DiscoverySummary};
use crate::session::Session;

pub const BRIDGE_ADDRESS: &str = "rachio";

pub static BRIDGE_DEF: NodeDef = NodeDef {
    id: "rachio",
    drivers: &[],
};

pub struct Bridge {
    address: NodeAddress,
    base_url: String,
    timeout: Duration,
    session: Option<Rc<Session>>,
    registry: Registry,
}

impl Bridge {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Bridge {
            address: NodeAddress::from_static(BRIDGE_ADDRESS),
            base_url: base_url.into(),
            timeout,
            session: None,
            registry: Registry::new(),
        }
    }

    #[cfg(test)]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn is_discovered(&self) -> bool {
        self.session.is_some()
    }

    fn register_self(&self, host: &mut dyn NodeHost) -> Result<(), HubError> {
        if host.find_node(&self.address).is_some() {
            return Ok(());
        }
        host.register_node(
            &self.address,
            &BRIDGE_DEF,
            NodeAttrs {
                name: "Rachio Bridge".to_string(),
                primary: None,
            },
        )
    }

    /// Authenticate with `api_key` and discover the account behind it.
    pub fn discover(&mut self, host: &mut dyn NodeHost, api_key: &str) -> Result<DiscoverySummary, DiscoveryError> {
        let client = RachioClient::new(api_key, self.base_url.clone(), self.timeout);
        self.discover_with(host, Box::new(client), None)
    }

    /// Discover through an already built API adapter. Without `person_id` the account owning
    /// the credentials is used.
    pub fn discover_with(
        &mut self,
        host: &mut dyn NodeHost,
        api: Box<dyn RachioApi>,
        person_id: Option<PersonId>,
    ) -> Result<DiscoverySummary, DiscoveryError> {
        self.register_self(host).map_err(DiscoveryError::Hub)?;
        let session = Session::connect(api, person_id)?;
        let summary = discovery::discover(&session, &mut self.registry, host)?;
        self.session = Some(session);
        Ok(summary)
    }

    /// Run discovery again with the session already established, picking up new entities.
    pub fn rediscover(&mut self, host: &mut dyn NodeHost) -> Result<DiscoverySummary, CommandError> {
        let session = self.session.clone().ok_or(CommandError::NotDiscovered)?;
        discovery::discover(&session, &mut self.registry, host).map_err(CommandError::Discovery)
    }

    /// Diff-only pass.
    pub fn poll_short(&mut self, host: &mut dyn NodeHost) -> PassSummary {
        self.registry.update_all(host, false)
    }

    /// Forced pass: every driver of every entity is pushed.
    pub fn poll_long(&mut self, host: &mut dyn NodeHost) -> PassSummary {
        self.registry.update_all(host, true)
    }

    pub fn report_all(&self, host: &mut dyn NodeHost) {
        self.registry.report_all(host);
    }

    /// Route a hub command to the node at `address`.
    pub fn dispatch(
        &mut self,
        host: &mut dyn NodeHost,
        address: &str,
        command: &str,
        value: Option<f64>,
    ) -> Result<(), CommandError> {
        if address == self.address.as_str() {
            return self.bridge_command(host, command);
        }
        if !self.is_discovered() {
            return Err(CommandError::NotDiscovered);
        }
        let found: Option<&mut Entity> = match NodeAddress::new(address) {
            Ok(a) => self.registry.get_mut(&a),
            Err(_) => None,
        };
        let Some(entity) = found else {
            warn!("Command {} for unknown node {}", command, address);
            return Err(CommandError::UnknownNode(address.to_string()));
        };
        entity.command(host, command, value)
    }

    fn bridge_command(&mut self, host: &mut dyn NodeHost, command: &str) -> Result<(), CommandError> {
        match command {
            "DISCOVER" => {
                let summary = self.rediscover(host)?;
                info!("Rediscovery added {} node(s)", summary.added);
                Ok(())
            }
            "QUERY" => {
                self.report_all(host);
                Ok(())
            }
            other => {
                warn!("Rachio bridge does not accept command {}", other);
                Err(CommandError::Unsupported {
                    node: self.address.clone(),
                    command: other.to_string(),
                })
            }
        }
    }
}
