//! Controller node: one per Rachio device.
//!
//! Drivers:
//! - ST   running (0/100)            - GV7  cycling
//! - GV0  connected                  - GV8  cycle count
//! - GV1  enabled                    - GV9  total cycle count
//! - GV2  paused                     - GV10 active run type
//! - GV3  rain delay minutes left    - GV11 minutes until next run
//! - GV4  active zone number         - GV12 type of next run
//! - GV5  active run minutes left
//! - GV6  active run minutes elapsed

use chrono::{DateTime, Utc};
use log::{error, info, warn};
use std::rc::Rc;

use crate::client::{RachioApi, RachioClientError};
use crate::hub::{Driver, DriverDef, NodeAddress, NodeDef, NodeHost, uom};
use crate::models::rachio::{CurrentSchedule, Device, DeviceId, ScheduleItem, ZoneId, next_item};
use crate::nodes::entity::{CommandError, NodeCore, changed, running_value};
use crate::session::Session;
use crate::utils::{minutes_until, ms_to_secs, rain_delay_minutes, run_progress};

pub static NODE_DEF: NodeDef = NodeDef {
    id: "rachio_device",
    drivers: &[
        DriverDef { driver: Driver::St, uom: uom::ON_OFF },
        DriverDef { driver: Driver::Gv0, uom: uom::BOOLEAN },
        DriverDef { driver: Driver::Gv1, uom: uom::BOOLEAN },
        DriverDef { driver: Driver::Gv2, uom: uom::BOOLEAN },
        DriverDef { driver: Driver::Gv3, uom: uom::MINUTES },
        DriverDef { driver: Driver::Gv4, uom: uom::RAW },
        DriverDef { driver: Driver::Gv5, uom: uom::MINUTES },
        DriverDef { driver: Driver::Gv6, uom: uom::MINUTES },
        DriverDef { driver: Driver::Gv7, uom: uom::BOOLEAN },
        DriverDef { driver: Driver::Gv8, uom: uom::RAW },
        DriverDef { driver: Driver::Gv9, uom: uom::RAW },
        DriverDef { driver: Driver::Gv10, uom: uom::INDEX },
        DriverDef { driver: Driver::Gv11, uom: uom::MINUTES },
        DriverDef { driver: Driver::Gv12, uom: uom::INDEX },
    ],
};

pub struct ControllerNode {
    pub(crate) core: NodeCore,
    session: Rc<Session>,
    device: Device,
    current: Option<CurrentSchedule>,
    /// Zone whose number GV4 shows. Lags `current` while a zone lookup keeps failing.
    shown_zone: Option<ZoneId>,
}

impl ControllerNode {
    pub fn new(session: Rc<Session>, address: NodeAddress, device: Device) -> Self {
        ControllerNode {
            core: NodeCore::new(address, device.name.clone(), None),
            session,
            device,
            current: None,
            shown_zone: None,
        }
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device.id
    }

    /// Whether the device was watering at the last successful refresh.
    pub fn is_running(&self) -> bool {
        self.current.as_ref().is_some_and(|c| c.is_processing())
    }

    fn fetch(&self) -> Result<(Device, CurrentSchedule, Vec<ScheduleItem>), RachioClientError> {
        let api = self.session.api();
        let id = &self.device.id;
        Ok((api.get_device(id)?, api.get_current_schedule(id)?, api.get_schedule_items(id)?))
    }

    pub fn update_at(&mut self, host: &mut dyn NodeHost, force: bool, now: DateTime<Utc>) -> Result<(), RachioClientError> {
        let (device, current, items) = match self.fetch() {
            Ok(v) => v,
            Err(e) => {
                error!(
                    "Connection error on {} Rachio controller refresh, may be temporary: {}",
                    self.core.name, e
                );
                return Err(e);
            }
        };
        let now_s = now.timestamp();
        let prev = self.current.as_ref();
        let core = &mut self.core;

        // ST -> whether any schedule is running
        core.emit_derived(host, force, Driver::St, running_value(current.is_processing()));

        // GV0 -> connected
        if changed(force, &self.device.status, &device.status) {
            core.emit(host, Driver::Gv0, device.is_online());
        }

        // GV1 -> enabled
        core.emit_if(host, changed(force, &self.device.on, &device.on), Driver::Gv1, device.on);

        // GV2 -> paused
        core.emit_if(host, changed(force, &self.device.paused, &device.paused), Driver::Gv2, device.paused);

        // GV3 -> rain delay minutes remaining
        let rain_delay = device
            .rain_delay_expiration_date
            .map(|ms| rain_delay_minutes(ms, now_s))
            .unwrap_or(0);
        core.emit_derived(host, force, Driver::Gv3, rain_delay);

        // GV4 -> active zone number
        if changed(force, &self.shown_zone, &current.zone_id) {
            match current.zone_id.as_ref() {
                None => {
                    core.emit(host, Driver::Gv4, 0_i64);
                    self.shown_zone = None;
                }
                Some(zone_id) => match active_zone_number(self.session.api(), &device, zone_id) {
                    Ok(number) => {
                        core.emit(host, Driver::Gv4, number);
                        self.shown_zone = Some(zone_id.clone());
                    }
                    Err(e) => error!("Error updating active zone on {} Rachio controller: {}", core.name, e),
                },
            }
        }

        // GV5/GV6 -> active run minutes remaining / elapsed
        let (remaining, elapsed) = match (current.start_date, current.duration) {
            (Some(start_ms), Some(duration_s)) => run_progress(start_ms, duration_s, now_s),
            _ => (0.0, 0.0),
        };
        core.emit_derived(host, force, Driver::Gv5, remaining);
        core.emit_derived(host, force, Driver::Gv6, elapsed);

        // GV7 -> cycling
        let prev_cycling = prev.and_then(|c| c.cycling);
        core.emit_if(
            host,
            changed(force, &prev_cycling, &current.cycling),
            Driver::Gv7,
            current.cycling.unwrap_or(false),
        );

        // GV8 -> cycle count
        let prev_count = prev.and_then(|c| c.cycle_count);
        core.emit_if(
            host,
            changed(force, &prev_count, &current.cycle_count),
            Driver::Gv8,
            current.cycle_count.unwrap_or(0),
        );

        // GV9 -> total cycle count
        let prev_total = prev.and_then(|c| c.total_cycle_count);
        core.emit_if(
            host,
            changed(force, &prev_total, &current.total_cycle_count),
            Driver::Gv9,
            current.total_cycle_count.unwrap_or(0),
        );

        // GV10 -> active run type
        let prev_type = prev.and_then(|c| c.r#type.clone());
        core.emit_if(
            host,
            changed(force, &prev_type, &current.r#type),
            Driver::Gv10,
            current.run_type().map(|t| t.code()).unwrap_or(0),
        );

        // GV11/GV12 -> minutes until the next queued run and its type
        let (next_minutes, next_type) = match next_item(&items) {
            Some(item) => (
                minutes_until(ms_to_secs(item.absolute_start_date), now_s),
                item.schedule_type().code(),
            ),
            None => (0.0, 0),
        };
        core.emit_derived(host, force, Driver::Gv11, next_minutes);
        core.emit_derived(host, force, Driver::Gv12, next_type);

        self.device = device;
        self.current = Some(current);
        self.core.report(host);
        Ok(())
    }

    pub fn command(&mut self, host: &mut dyn NodeHost, command: &str, value: Option<f64>) -> Result<(), CommandError> {
        match command {
            "DON" => self.enable(host),
            "DOF" => self.disable(host),
            "STOP" => self.stop(host),
            "RAIN_DELAY" => self.rain_delay(host, value),
            "QUERY" | "ST" => {
                info!("Query command received on {} Rachio controller", self.core.name);
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

    /// Enables schedules, weather intelligence and water budget on the device.
    pub fn enable(&mut self, host: &mut dyn NodeHost) -> Result<(), CommandError> {
        let api = self.session.api();
        self.core.remote("DON", || api.turn_device_on(&self.device.id))?;
        info!("Command received to enable {} controller", self.core.name);
        self.resync(host);
        Ok(())
    }

    pub fn disable(&mut self, host: &mut dyn NodeHost) -> Result<(), CommandError> {
        let api = self.session.api();
        self.core.remote("DOF", || api.turn_device_off(&self.device.id))?;
        info!("Command received to disable {} controller", self.core.name);
        self.resync(host);
        Ok(())
    }

    pub fn stop(&mut self, host: &mut dyn NodeHost) -> Result<(), CommandError> {
        let api = self.session.api();
        self.core.remote("STOP", || api.stop_water(&self.device.id))?;
        info!("Command received to stop watering on {} controller", self.core.name);
        self.resync(host);
        Ok(())
    }

    pub fn rain_delay(&mut self, host: &mut dyn NodeHost, minutes: Option<f64>) -> Result<(), CommandError> {
        let seconds = self.core.require_duration("RAIN_DELAY", minutes)?;
        let api = self.session.api();
        self.core
            .remote("RAIN_DELAY", || api.set_rain_delay(&self.device.id, seconds))?;
        info!(
            "Rain delay of {} second(s) set on {} controller",
            seconds, self.core.name
        );
        self.resync(host);
        Ok(())
    }

    fn resync(&mut self, host: &mut dyn NodeHost) {
        if self.update_at(host, false, Utc::now()).is_err() {
            warn!(
                "{} controller accepted the command but the follow-up refresh failed",
                self.core.name
            );
        }
    }
}

/// Zone number of `zone_id`, from the device snapshot when it lists the zone.
fn active_zone_number(api: &dyn RachioApi, device: &Device, zone_id: &ZoneId) -> Result<i64, RachioClientError> {
    match device.zone(zone_id) {
        Some(zone) => Ok(zone.zone_number),
        None => api.get_zone(zone_id).map(|z| z.zone_number),
    }
}
