// rmmu_host/src/extras/rmmu/sequencer.rs

//! User-visible operations built from zone transfers.

use crate::core_traits::{Axis, Endstop, HomingMode, PresenceSensor};

use super::params::ParkingSensing;
use super::{
    LoadIntent, PrintJob, Rmmu, RmmuError, RmmuEvent, RmmuResult, SensorReport, UnloadIntent, Zone,
};

const IDLER_HOMING_DISTANCE: f64 = 300.0;
const IDLER_BACKOFF: f64 = 2.0;
const SENSOR_ISSUE_RETRACT: f64 = 100.0;
/// Yield between slots during long sweeps.
pub(super) const SWEEP_YIELD_SECONDS: f64 = 0.1;

impl Rmmu {
    /// Clears the transient state. The idler is not homed anymore afterwards.
    pub fn reset(&mut self) {
        log::debug!("{}: reset", self.params.name);
        self.state.reset();
    }

    pub fn home(&mut self) -> RmmuResult<()> {
        log::info!("Homing {}...", self.params.name);
        self.reset();
        self.home_idler()?;
        self.state.is_homed = true;
        self.notify(RmmuEvent::Homed { unit: self.params.name.clone() });
        log::info!("{} homed", self.params.name);
        Ok(())
    }

    fn home_idler(&mut self) -> RmmuResult<()> {
        let p = &self.params;
        let reached = {
            let mut motion = self.io.motion.lock();
            motion.set_position(Axis::Pulley, 0.0);
            motion.set_position(Axis::Idler, 0.0);
            motion.move_axis(Axis::Idler, IDLER_BACKOFF, p.idler_homing_speed, p.idler_homing_accel)?;
            let reached = motion.homing_move(
                Axis::Idler,
                -IDLER_HOMING_DISTANCE,
                p.idler_homing_speed,
                p.idler_homing_accel,
                HomingMode::UntilTriggered,
            )?;
            if reached {
                motion.set_position(Axis::Idler, -1.0);
                motion.move_axis(Axis::Idler, p.idler_home_position + 1.0, p.idler_homing_speed, p.idler_homing_accel)?;
            }
            reached
        };
        if !reached {
            return Err(RmmuError::sensor(None, "idler endstop did not trigger"));
        }
        self.idler_position = self.params.idler_home_position;
        self.state.selected_slot = None;
        Ok(())
    }

    /// Positions the idler on `slot`, or on its home position for `None`. Homes first if needed.
    pub(super) fn move_idler(&mut self, slot: Option<usize>) -> RmmuResult<()> {
        if !self.state.is_homed {
            self.home()?;
        }
        let target = match slot {
            Some(s) => self.slots[s].idler_position,
            None => self.params.idler_home_position,
        };
        let distance = target - self.idler_position;
        if distance.abs() > f64::EPSILON {
            self.io
                .motion
                .lock()
                .move_axis(Axis::Idler, distance, self.params.idler_speed, self.params.idler_accel)?;
        }
        self.idler_position = target;
        self.state.selected_slot = slot;
        Ok(())
    }

    fn release_idler_after_failure(&mut self) {
        if let Err(e) = self.move_idler(None) {
            log::error!("{}: could not release idler: {}", self.params.name, e);
        }
    }

    pub fn select(&mut self, slot: Option<usize>) -> RmmuResult<()> {
        if let Some(s) = slot {
            self.check_slot(s)?;
        }
        self.move_idler(slot)
    }

    // --- load / unload ---

    pub fn load(&mut self, slot: usize, intent: LoadIntent) -> RmmuResult<()> {
        self.check_slot(slot)?;
        log::info!("{}: loading filament T{}...", self.params.name, slot);
        if !self.state.is_homed {
            self.home()?;
        }

        match intent {
            LoadIntent::Fresh => self.prepare_fresh_load(slot)?,
            LoadIntent::Continuation => {
                if !self.toolhead_has_filament() || self.slots[slot].zone != Zone::ToolheadSensor {
                    return Err(RmmuError::sensor(
                        Some(slot),
                        "expected filament at the toolhead sensor to continue loading",
                    ));
                }
            }
        }

        self.persist_loaded(None, -1.0);
        if let Err(e) = self.advance(slot, Zone::Nozzle) {
            self.release_idler_after_failure();
            self.notify(RmmuEvent::LoadingError { toolhead: self.params.toolhead, tool: slot });
            return Err(e);
        }
        if self.state.selected_slot.is_some() {
            self.move_idler(None)?;
        }

        self.notify(RmmuEvent::FilamentChanged { toolhead: self.params.toolhead, tool: slot });
        self.state.record_load(slot);
        let temperature = self.io.heater.lock().target();
        self.persist_loaded(Some(slot), temperature);
        log::info!("{}: filament T{} loaded", self.params.name, slot);
        Ok(())
    }

    /// The toolhead must be empty before a fresh load. A known filament is unloaded first.
    fn prepare_fresh_load(&mut self, slot: usize) -> RmmuResult<()> {
        if self.toolhead_has_filament() {
            return match self.state.loaded_slot {
                Some(loaded) => {
                    log::info!("{}: T{} still loaded, unloading it first", self.params.name, loaded);
                    self.unload(loaded, UnloadIntent::Manual)
                }
                None => Err(RmmuError::sensor(Some(slot), "unknown filament in toolhead")),
            };
        }

        // Nothing in the toolhead: any slot still tracked inside it is stale.
        if let Some(stale) = self.state.loaded_slot.take() {
            log::warn!("{}: T{} recorded as loaded but toolhead is empty", self.params.name, stale);
        }
        for s in self.slots.iter_mut().filter(|s| s.zone > Zone::ReverseBowden) {
            s.zone = Zone::ReverseBowden;
        }
        Ok(())
    }

    pub fn unload(&mut self, slot: usize, intent: UnloadIntent) -> RmmuResult<()> {
        self.check_slot(slot)?;
        log::info!("{}: unloading filament T{}...", self.params.name, slot);
        if intent.expects_filament() {
            if !self.toolhead_has_filament() {
                return Err(RmmuError::sensor(Some(slot), "no filament in toolhead"));
            }
            if self.slots[slot].zone <= Zone::ReverseBowden {
                return Err(RmmuError::sensor(Some(slot), "filament in toolhead is not this tool"));
            }
        }
        if !self.state.is_homed {
            self.home()?;
        }

        if let Err(e) = self.retract_to_rest(slot, intent) {
            self.release_idler_after_failure();
            return Err(e);
        }

        if self.state.loaded_slot == Some(slot) {
            self.state.loaded_slot = None;
        }
        self.persist_loaded(None, -1.0);
        self.move_idler(None)?;
        log::info!("{}: filament T{} unloaded", self.params.name, slot);
        Ok(())
    }

    fn retract_to_rest(&mut self, slot: usize, intent: UnloadIntent) -> RmmuResult<()> {
        if self.slots[slot].zone == Zone::Nozzle {
            self.transfer(slot, Zone::CoolingZone)?;
            if intent == UnloadIntent::ToolChange {
                self.io.reactor.pause(self.params.cooling_zone_unloading_pause / 1000.0);
            }
        }
        let rest = self.params.rest_zone();
        if self.slots[slot].zone > rest {
            self.advance(slot, rest)?;
        }
        Ok(())
    }

    // --- filament homing ---

    /// Runs each slot's filament into its first sensor and back to rest.
    pub fn home_filaments(&mut self, slot: Option<usize>) -> RmmuResult<()> {
        if let Some(s) = slot {
            self.check_slot(s)?;
        }
        if self.toolhead_has_filament() {
            return Err(RmmuError::sensor(slot, "filament in hotend, can not home filaments"));
        }
        if !self.state.is_homed {
            self.home()?;
        }

        let targets: Vec<usize> = match slot {
            Some(s) => vec![s],
            None => (0..self.params.tool_count).collect(),
        };
        for (n, s) in targets.iter().copied().enumerate() {
            if n > 0 {
                self.io.reactor.pause(SWEEP_YIELD_SECONDS);
            }
            if let Err(e) = self.home_filament(s).and_then(|_| self.check_homed_filament(s)) {
                log::error!("{}: filament homing stopped at T{}", self.params.name, s);
                self.release_idler_after_failure();
                return Err(e);
            }
        }
        self.move_idler(None)
    }

    pub(super) fn home_filament(&mut self, slot: usize) -> RmmuResult<()> {
        log::info!("{}: homing filament T{}...", self.params.name, slot);
        // Slots left in the bowden by a failed load or unload are homed back like parked ones.
        match self.slots[slot].zone {
            Zone::Ejected => return Err(RmmuError::sensor(Some(slot), "no filament to home")),
            z if z > Zone::ReverseBowden => return Err(RmmuError::not_allowed(Some(slot), "filament is loaded")),
            _ => {}
        }
        let first_sensor = match self.params.parking_sensing {
            ParkingSensing::None => Zone::ToolheadSensor,
            _ => Zone::ParkingSensor,
        };
        self.advance(slot, first_sensor)?;
        self.advance(slot, self.params.rest_zone())?;
        self.slots[slot].homed = true;
        Ok(())
    }

    /// After homing, the parking sensor must agree with a parked filament.
    fn check_homed_filament(&mut self, slot: usize) -> RmmuResult<()> {
        let consistent = match self.params.parking_sensing {
            ParkingSensing::Shared => !self.endstop_triggered(Endstop::Parking),
            ParkingSensing::PerTool => self.endstop_triggered(Endstop::ParkingTool(slot)),
            ParkingSensing::None => !self.toolhead_has_filament(),
        };
        if consistent {
            return Ok(());
        }
        self.slots[slot].homed = false;
        self.move_idler(Some(slot))?;
        self.pulley_set_position(0.0);
        self.pulley_move(-SENSOR_ISSUE_RETRACT, 100.0, 500.0)?;
        Err(RmmuError::sensor(Some(slot), "parking sensor disagrees after homing"))
    }

    // --- eject ---

    pub fn eject(&mut self, slot: Option<usize>) -> RmmuResult<()> {
        let targets: Vec<usize> = match slot {
            Some(s) => {
                self.check_slot(s)?;
                vec![s]
            }
            None => (0..self.params.tool_count).collect(),
        };
        let mut moved = false;
        for s in targets {
            if self.is_ejected(s) {
                log::info!("{}: filament T{} already ejected", self.params.name, s);
                self.slots[s].zone = Zone::Ejected;
                continue;
            }
            if self.slots[s].zone > Zone::ReverseBowden {
                return Err(RmmuError::not_allowed(Some(s), "filament is loaded, unload it first"));
            }
            log::info!("{}: ejecting filament T{}...", self.params.name, s);
            moved = true;
            if let Err(e) = self.advance(s, Zone::Ejected) {
                self.release_idler_after_failure();
                return Err(e);
            }
            self.slots[s].homed = false;
        }
        if moved {
            self.move_idler(None)?;
        }
        Ok(())
    }

    fn is_ejected(&self, slot: usize) -> bool {
        self.slots[slot].zone == Zone::Ejected
            || self.feeder_sensor_triggered(slot) == Some(false)
            || self.tool_endstop_triggered(slot) == Some(false)
    }

    // --- diagnostics ---

    /// Whether `slot` has filament ready, by sensor when possible, otherwise by homing it.
    pub fn test_filament(&mut self, slot: usize) -> RmmuResult<bool> {
        self.check_slot(slot)?;
        let tool_endstop = self.tool_endstop_triggered(slot);
        let feeder = self.feeder_sensor_triggered(slot);
        if tool_endstop.is_some() || feeder.is_some() {
            let available = tool_endstop.unwrap_or(true) && feeder.unwrap_or(true);
            if !available {
                log::warn!("{}: filament T{} not detected", self.params.name, slot);
            }
            return Ok(available);
        }
        match self.home_filament(slot) {
            Ok(()) => Ok(true),
            Err(e) => {
                log::warn!("{}: filament T{} not available: {}", self.params.name, slot, e);
                Ok(false)
            }
        }
    }

    /// Moves one slot's filament by `distance`. Its zone is unknown afterwards until homed.
    pub fn move_filament(&mut self, slot: usize, distance: f64, speed: f64, accel: f64, sync: bool) -> RmmuResult<()> {
        self.check_slot(slot)?;
        if !self.state.is_homed {
            self.home()?;
        }
        self.move_idler(Some(slot))?;
        self.pulley_set_position(0.0);
        if sync {
            self.synced_move(distance, speed, accel)?;
        } else {
            self.pulley_move(distance, speed, accel)?;
        }
        self.slots[slot].homed = false;
        self.move_idler(None)
    }

    pub fn query_sensors(&self) -> SensorReport {
        let n = self.params.tool_count;
        let feeder_sensors = if self.params.has_feeder_sensors() {
            (0..n).map(|i| self.sensor_triggered(PresenceSensor::Feeder(i))).collect()
        } else {
            Vec::new()
        };
        let parking_tool_endstops = if self.params.has_tool_endstops() {
            (0..n).map(|i| self.endstop_triggered(Endstop::ParkingTool(i))).collect()
        } else {
            Vec::new()
        };
        SensorReport {
            unit: self.params.name.clone(),
            toolhead_sensor: self.toolhead_has_filament(),
            feeder_sensors,
            toolhead_endstop: self.endstop_triggered(Endstop::Toolhead),
            parking_endstop: self
                .params
                .parking_endstop_pin
                .as_ref()
                .map(|_| self.endstop_triggered(Endstop::Parking)),
            parking_tool_endstops,
        }
    }

    // --- print lifecycle ---

    pub fn start_print(&mut self, job: PrintJob) {
        self.state.start_print(job);
        self.state.needs_initial_purging = true;
    }

    pub fn end_print(&mut self) {
        log::info!("{}: print ended", self.params.name);
        self.state.end_print();
    }

    pub fn set_needs_initial_purging(&mut self, value: bool) {
        self.state.needs_initial_purging = value;
    }

    /// Slot and temperature persisted by the last successful load.
    pub fn saved_loaded_filament(&self) -> (Option<usize>, Option<f64>) {
        (self.state.loaded_slot, self.saved_loaded_temperature())
    }

    /// Heats, unloads `slot`, then turns the heater off again. Used when a print starts with
    /// another tool's filament in the hotend.
    pub fn unload_at_temperature(&mut self, slot: usize, temperature: f64) -> RmmuResult<()> {
        log::info!("{}: heating to {:.0}C to unload T{}...", self.params.name, temperature, slot);
        self.io.heater.lock().set_target(temperature, true);
        let result = self.unload(slot, UnloadIntent::Manual);
        self.io.heater.lock().set_target(0.0, false);
        result
    }

    pub fn can_extrude_at(&self, temperature: f64) -> bool {
        let heater = self.io.heater.lock();
        temperature > heater.min_extrude_temp() && temperature < heater.max_temp()
    }

    pub fn preheat(&self, temperature: f64) {
        self.io.heater.lock().set_target(temperature, false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_traits::VariableStore;
    use crate::sim::{SimBench, NO_PARKING_SENSOR_CONFIG, PER_TOOL_SENSOR_CONFIG, SHARED_SENSOR_CONFIG};
    use serde_json::json;

    #[test]
    fn home_resets_selection_and_notifies() {
        let (mut hub, bench) = SimBench::from_config_str(SHARED_SENSOR_CONFIG).unwrap();
        let unit = hub.unit_mut(0).unwrap();
        unit.select(Some(2)).unwrap();
        assert_eq!(unit.state().selected_slot, Some(2));
        assert_eq!(bench.motion(0).lock().selected_slot(), Some(2));

        unit.home().unwrap();
        assert!(unit.state().is_homed);
        assert_eq!(unit.state().selected_slot, None);
        assert_eq!(bench.motion(0).lock().selected_slot(), None);
        assert!(bench
            .notifier
            .events()
            .contains(&RmmuEvent::Homed { unit: "rmmu_t0".to_string() }));
    }

    #[test]
    fn load_then_unload_round_trip_persists_state() {
        let (mut hub, bench) = SimBench::from_config_str(SHARED_SENSOR_CONFIG).unwrap();
        let unit = hub.unit_mut(0).unwrap();
        unit.load(1, LoadIntent::Fresh).unwrap();
        assert_eq!(unit.zone(1), Some(Zone::Nozzle));
        assert_eq!(bench.variables.lock().get("rmmu_t0_loaded_filament"), Some(json!(1)));
        assert_eq!(unit.state().selected_slot, None);

        unit.unload(1, UnloadIntent::Manual).unwrap();
        assert_eq!(unit.zone(1), Some(Zone::ParkingPosition));
        assert_eq!(bench.variables.lock().get("rmmu_t0_loaded_filament"), Some(json!(-1)));
        assert!(!bench.motion(0).lock().toolhead_triggered());
    }

    #[test]
    fn fresh_load_unloads_the_previous_tool() {
        let (mut hub, _bench) = SimBench::from_config_str(SHARED_SENSOR_CONFIG).unwrap();
        let unit = hub.unit_mut(0).unwrap();
        unit.load(0, LoadIntent::Fresh).unwrap();
        unit.load(3, LoadIntent::Fresh).unwrap();
        assert_eq!(unit.zone(0), Some(Zone::ParkingPosition));
        assert_eq!(unit.zone(3), Some(Zone::Nozzle));
        assert_eq!(unit.state().loaded_slot, Some(3));
    }

    #[test]
    fn unknown_filament_blocks_fresh_load() {
        let (mut hub, bench) = SimBench::from_config_str(SHARED_SENSOR_CONFIG).unwrap();
        bench.motion(0).lock().force_presence(PresenceSensor::Toolhead, Some(true));
        let unit = hub.unit_mut(0).unwrap();
        let err = unit.load(2, LoadIntent::Fresh).unwrap_err();
        assert!(matches!(err, RmmuError::SensorFault { tool: Some(2), .. }));
    }

    #[test]
    fn continuation_requires_filament_at_sensor() {
        let (mut hub, _bench) = SimBench::from_config_str(SHARED_SENSOR_CONFIG).unwrap();
        let unit = hub.unit_mut(0).unwrap();
        let err = unit.load(1, LoadIntent::Continuation).unwrap_err();
        assert!(matches!(err, RmmuError::SensorFault { .. }));
        assert_eq!(unit.zone(1), Some(Zone::ParkingPosition));
    }

    #[test]
    fn manual_unload_needs_filament() {
        let (mut hub, _bench) = SimBench::from_config_str(SHARED_SENSOR_CONFIG).unwrap();
        let unit = hub.unit_mut(0).unwrap();
        assert!(matches!(
            unit.unload(0, UnloadIntent::Manual),
            Err(RmmuError::SensorFault { tool: Some(0), .. })
        ));
    }

    #[test]
    fn tool_change_unload_waits_for_cooling() {
        let (mut hub, bench) = SimBench::from_config_str(SHARED_SENSOR_CONFIG).unwrap();
        let unit = hub.unit_mut(0).unwrap();
        unit.load(0, LoadIntent::Fresh).unwrap();
        let before = bench.reactor.pause_count();
        unit.unload(0, UnloadIntent::ToolChange).unwrap();
        assert_eq!(bench.reactor.pause_count(), before + 1);
    }

    #[test]
    fn unload_cleans_a_sticky_toolhead_sensor() {
        let (mut hub, bench) = SimBench::from_config_str(SHARED_SENSOR_CONFIG).unwrap();
        let unit = hub.unit_mut(0).unwrap();
        unit.load(2, LoadIntent::Fresh).unwrap();
        // Sensor sticks until the filament moved forward once more.
        bench.motion(0).lock().set_sticky_toolhead_sensor(true);
        unit.unload(2, UnloadIntent::Manual).unwrap();
        assert_eq!(unit.zone(2), Some(Zone::ParkingPosition));
    }

    #[test]
    fn home_filaments_sweeps_every_slot() {
        let (mut hub, bench) = SimBench::from_config_str(SHARED_SENSOR_CONFIG).unwrap();
        let unit = hub.unit_mut(0).unwrap();
        unit.home_filaments(None).unwrap();
        assert!(unit.slots().iter().all(|s| s.homed && s.zone == Zone::ParkingPosition));
        assert_eq!(bench.reactor.pause_count(), 3);
        assert_eq!(unit.state().selected_slot, None);
    }

    #[test]
    fn home_filaments_refuses_loaded_hotend() {
        let (mut hub, bench) = SimBench::from_config_str(SHARED_SENSOR_CONFIG).unwrap();
        bench.motion(0).lock().force_presence(PresenceSensor::Toolhead, Some(true));
        let unit = hub.unit_mut(0).unwrap();
        bench.motion(0).lock().clear_log();
        assert!(matches!(unit.home_filaments(None), Err(RmmuError::SensorFault { .. })));
        assert!(bench.motion(0).lock().log().is_empty());
    }

    #[test]
    fn home_filaments_aborts_batch_on_first_failure() {
        let (mut hub, bench) = SimBench::from_config_str(SHARED_SENSOR_CONFIG).unwrap();
        bench.motion(0).lock().force_endstop(Endstop::Parking, Some(true));
        let unit = hub.unit_mut(0).unwrap();
        let err = unit.home_filaments(None).unwrap_err();
        assert!(matches!(
            err,
            RmmuError::TransitionFailure { tool: 0, from: Zone::ParkingSensor, to: Zone::ParkingPosition, .. }
        ));
        assert!(!unit.slots()[0].homed);
        assert!(!unit.slots()[1].homed);
        assert_eq!(unit.state().selected_slot, None);
    }

    #[test]
    fn home_filaments_without_parking_sensor_uses_toolhead() {
        let (mut hub, _bench) = SimBench::from_config_str(NO_PARKING_SENSOR_CONFIG).unwrap();
        let unit = hub.unit_mut(0).unwrap();
        unit.home_filaments(Some(1)).unwrap();
        assert_eq!(unit.zone(1), Some(Zone::ReverseBowden));
        assert!(unit.slots()[1].homed);
    }

    #[test]
    fn failed_load_leaves_a_slot_that_can_be_homed() {
        let (mut hub, bench) = SimBench::from_config_str(SHARED_SENSOR_CONFIG).unwrap();
        bench.motion(0).lock().set_extruder_slip(true);
        let unit = hub.unit_mut(0).unwrap();
        assert!(unit.load(0, LoadIntent::Fresh).is_err());
        assert_eq!(unit.zone(0), Some(Zone::ReverseBowden));

        bench.motion(0).lock().set_extruder_slip(false);
        unit.home_filaments(Some(0)).unwrap();
        assert_eq!(unit.zone(0), Some(Zone::ParkingPosition));
        assert!(unit.slots()[0].homed);
        assert!(!bench.motion(0).lock().toolhead_triggered());
    }

    #[test]
    fn failed_load_leaves_a_slot_that_can_be_ejected() {
        let (mut hub, bench) = SimBench::from_config_str(SHARED_SENSOR_CONFIG).unwrap();
        bench.motion(0).lock().set_extruder_slip(true);
        let unit = hub.unit_mut(0).unwrap();
        assert!(unit.load(2, LoadIntent::Fresh).is_err());
        assert_eq!(unit.zone(2), Some(Zone::ReverseBowden));

        unit.eject(Some(2)).unwrap();
        assert_eq!(unit.zone(2), Some(Zone::Ejected));
        assert!(!bench.motion(0).lock().has_filament(2));
    }

    #[test]
    fn fresh_load_demotes_a_stale_loaded_slot() {
        let (mut hub, bench) = SimBench::from_config_str(PER_TOOL_SENSOR_CONFIG).unwrap();
        let unit = hub.unit_mut(0).unwrap();
        unit.load(3, LoadIntent::Fresh).unwrap();
        // Pulled out of the toolhead behind the unit's back.
        unit.move_filament(3, -200.0, 50.0, 200.0, false).unwrap();
        assert!(!bench.motion(0).lock().toolhead_triggered());
        assert_eq!(unit.state().loaded_slot, Some(3));

        unit.load(1, LoadIntent::Fresh).unwrap();
        assert_eq!(unit.zone(3), Some(Zone::ReverseBowden));
        assert_eq!(unit.zone(1), Some(Zone::Nozzle));
        assert_eq!(unit.state().loaded_slot, Some(1));

        unit.eject(Some(3)).unwrap();
        assert_eq!(unit.zone(3), Some(Zone::Ejected));
        assert!(!bench.motion(0).lock().has_filament(3));
        assert_eq!(unit.zone(1), Some(Zone::Nozzle));
    }

    #[test]
    fn eject_is_idempotent() {
        let (mut hub, bench) = SimBench::from_config_str(PER_TOOL_SENSOR_CONFIG).unwrap();
        let unit = hub.unit_mut(0).unwrap();
        unit.eject(Some(2)).unwrap();
        assert_eq!(unit.zone(2), Some(Zone::Ejected));
        assert!(!bench.motion(0).lock().has_filament(2));

        bench.motion(0).lock().clear_log();
        unit.eject(Some(2)).unwrap();
        assert!(bench.motion(0).lock().log().is_empty());
    }

    #[test]
    fn eject_refuses_loaded_filament() {
        let (mut hub, _bench) = SimBench::from_config_str(SHARED_SENSOR_CONFIG).unwrap();
        let unit = hub.unit_mut(0).unwrap();
        unit.load(1, LoadIntent::Fresh).unwrap();
        assert!(matches!(
            unit.eject(Some(1)),
            Err(RmmuError::ConcurrencyViolation { tool: Some(1), .. })
        ));
    }

    #[test]
    fn query_sensors_reports_configured_sensors_only() {
        let (hub, _bench) = SimBench::from_config_str(PER_TOOL_SENSOR_CONFIG).unwrap();
        let report = hub.unit(0).unwrap().query_sensors();
        assert_eq!(report.parking_endstop, None);
        assert_eq!(report.parking_tool_endstops, vec![true; 4]);
        assert!(report.feeder_sensors.is_empty());
        assert!(!report.toolhead_sensor);
    }
}
