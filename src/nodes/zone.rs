//! Zone node: one per watering zone of a controller.
//!
//! A zone is running when its controller's current schedule is watering it. The soil and
//! nozzle figures come straight from the zone snapshot.

use chrono::{DateTime, Utc};
use log::{error, info, warn};
use std::rc::Rc;

use crate::client::RachioClientError;
use crate::hub::{Driver, DriverDef, NodeAddress, NodeDef, NodeHost, uom};
use crate::models::rachio::{CurrentSchedule, DeviceId, Zone, ZoneId};
use crate::nodes::entity::{CommandError, NodeCore, changed, running_value};
use crate::session::Session;
use crate::utils::whole_percent;

// ST running, GV0 enabled, GV1 zone number, GV2 available water, GV3 root zone depth,
// GV4 allowed depletion, GV5 efficiency, GV6 area, GV7 irrigation amount,
// GV8 depth of water, GV9 runtime, GV10 nozzle inches per hour
pub static NODE_DEF: NodeDef = NodeDef {
    id: "rachio_zone",
    drivers: &[
        DriverDef { driver: Driver::St, uom: uom::ON_OFF },
        DriverDef { driver: Driver::Gv0, uom: uom::BOOLEAN },
        DriverDef { driver: Driver::Gv1, uom: uom::RAW },
        DriverDef { driver: Driver::Gv2, uom: uom::INCHES },
        DriverDef { driver: Driver::Gv3, uom: uom::INCHES },
        DriverDef { driver: Driver::Gv4, uom: uom::INCHES },
        DriverDef { driver: Driver::Gv5, uom: uom::PERCENT },
        DriverDef { driver: Driver::Gv6, uom: uom::SQUARE_FEET },
        DriverDef { driver: Driver::Gv7, uom: uom::INCHES },
        DriverDef { driver: Driver::Gv8, uom: uom::INCHES },
        DriverDef { driver: Driver::Gv9, uom: uom::MINUTES },
        DriverDef { driver: Driver::Gv10, uom: uom::INCHES_PER_HOUR },
    ],
};

pub struct ZoneNode {
    pub(crate) core: NodeCore,
    session: Rc<Session>,
    device_id: DeviceId,
    zone: Zone,
    current: Option<CurrentSchedule>,
}

impl ZoneNode {
    pub fn new(session: Rc<Session>, address: NodeAddress, primary: NodeAddress, device_id: DeviceId, zone: Zone) -> Self {
        ZoneNode {
            core: NodeCore::new(address, zone.name.clone(), Some(primary)),
            session,
            device_id,
            zone,
            current: None,
        }
    }

    pub fn zone_id(&self) -> &ZoneId {
        &self.zone.id
    }

    fn runs_here(&self, current: &CurrentSchedule) -> bool {
        current.is_processing() && current.zone_id.as_ref() == Some(&self.zone.id)
    }

    pub fn update_at(&mut self, host: &mut dyn NodeHost, force: bool, _now: DateTime<Utc>) -> Result<(), RachioClientError> {
        let api = self.session.api();
        let fetched = api
            .get_zone(&self.zone.id)
            .and_then(|zone| Ok((zone, api.get_current_schedule(&self.device_id)?)));
        let (zone, current) = match fetched {
            Ok(v) => v,
            Err(e) => {
                error!(
                    "Connection error on {} Rachio zone refresh, may be temporary: {}",
                    self.core.name, e
                );
                return Err(e);
            }
        };
        let running = self.runs_here(&current);
        let old = &self.zone;
        let core = &mut self.core;

        core.emit_derived(host, force, Driver::St, running_value(running));
        core.emit_if(host, changed(force, &old.enabled, &zone.enabled), Driver::Gv0, zone.enabled);
        core.emit_if(
            host,
            changed(force, &old.zone_number, &zone.zone_number),
            Driver::Gv1,
            zone.zone_number,
        );

        let measures = [
            (Driver::Gv2, old.available_water, zone.available_water),
            (Driver::Gv3, old.root_zone_depth, zone.root_zone_depth),
            (Driver::Gv4, old.management_allowed_depletion, zone.management_allowed_depletion),
            (Driver::Gv7, old.irrigation_amount, zone.irrigation_amount),
            (Driver::Gv8, old.depth_of_water, zone.depth_of_water),
            (Driver::Gv10, old.inches_per_hour(), zone.inches_per_hour()),
        ];
        for (driver, before, after) in measures {
            core.emit_if(host, changed(force, &before, &after), driver, after.unwrap_or(0.0));
        }

        core.emit_if(
            host,
            changed(force, &old.efficiency, &zone.efficiency),
            Driver::Gv5,
            zone.efficiency.map(whole_percent).unwrap_or(0),
        );
        core.emit_if(
            host,
            changed(force, &old.yard_area_square_feet, &zone.yard_area_square_feet),
            Driver::Gv6,
            zone.yard_area_square_feet.unwrap_or(0),
        );
        // runtime is exposed as the API reports it
        core.emit_if(
            host,
            changed(force, &old.runtime, &zone.runtime),
            Driver::Gv9,
            zone.runtime.unwrap_or(0),
        );

        self.zone = zone;
        self.current = Some(current);
        self.core.report(host);
        Ok(())
    }

    pub fn command(&mut self, host: &mut dyn NodeHost, command: &str, value: Option<f64>) -> Result<(), CommandError> {
        match command {
            "START" => self.start(host, value),
            "QUERY" | "ST" => {
                info!("Query command received on {} Rachio zone", self.core.name);
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

    /// Water this zone for `minutes`.
    pub fn start(&mut self, host: &mut dyn NodeHost, minutes: Option<f64>) -> Result<(), CommandError> {
        let seconds = self.core.require_duration("START", minutes)?;
        let api = self.session.api();
        self.core.remote("START", || api.start_zone(&self.zone.id, seconds))?;
        info!(
            "Command received to start watering zone {} for {} second(s)",
            self.core.name, seconds
        );
        if self.update_at(host, false, Utc::now()).is_err() {
            warn!(
                "Zone {} started but the follow-up refresh failed",
                self.core.name
            );
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.current.as_ref().is_some_and(|c| self.runs_here(c))
    }
}
