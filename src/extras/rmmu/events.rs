// rmmu_host/src/extras/rmmu/events.rs

//! Feeder sensor events. They run between operations, never inside one.

use super::{LoadIntent, Rmmu, RmmuError, RmmuEvent, RmmuResult, UnloadIntent, Zone};

impl Rmmu {
    /// The feeder sensor of `slot` lost its filament, or the extruder reported a clog.
    ///
    /// Always pauses the print. Without a clog the loaded filament is unloaded and the slot
    /// ejected; a clog is left for the operator.
    pub fn on_runout(&mut self, slot: usize, clogged: bool) -> RmmuResult<()> {
        self.check_slot(slot)?;
        log::warn!(
            "{}: filament runout on T{}{}",
            self.params.name,
            slot,
            if clogged { " (clogged)" } else { "" }
        );
        self.state.runout_slot = Some(slot);
        self.notify(RmmuEvent::BeforeRunout { toolhead: self.params.toolhead, tool: slot, clogged });
        self.io.print.lock().pause();

        if clogged {
            return Ok(());
        }

        let loaded = self.state.loaded_slot.unwrap_or(slot);
        if let Err(e) = self.unload(loaded, UnloadIntent::Runout) {
            log::error!("{}: can not eject T{}, unloading failed", self.params.name, slot);
            return Err(e);
        }
        self.eject(Some(slot))
    }

    /// Filament was pushed into the feeder of `slot`. Pulls it to its parking position and,
    /// when the print is paused for a runout on this slot, loads it and resumes.
    pub fn on_insert(&mut self, slot: usize) -> RmmuResult<()> {
        self.check_slot(slot)?;
        if !self.params.has_tool_endstops() {
            return Err(RmmuError::config(Some(slot), "filament insert needs per-tool parking sensors"));
        }
        if self.tool_endstop_triggered(slot) == Some(true) {
            return Err(RmmuError::sensor(Some(slot), "parking sensor already triggered"));
        }
        if self.state.is_printing() && self.toolhead_has_filament() {
            return Err(RmmuError::sensor(Some(slot), "toolhead sensor triggered during a print"));
        }

        log::info!("{}: loading filament T{} into the device...", self.params.name, slot);
        if !self.state.is_homed {
            self.home()?;
        }
        self.slots[slot].zone = Zone::Ejected;
        if let Err(e) = self.insert_and_maybe_resume(slot) {
            if let Err(release) = self.move_idler(None) {
                log::error!("{}: could not release idler: {}", self.params.name, release);
            }
            return Err(e);
        }
        self.state.runout_slot = None;
        self.move_idler(None)
    }

    fn insert_and_maybe_resume(&mut self, slot: usize) -> RmmuResult<()> {
        self.transfer(slot, Zone::ParkingPosition)?;
        self.advance(slot, self.params.rest_zone())?;
        self.slots[slot].homed = true;

        let resume = self.state.is_printing()
            && self.state.runout_slot == Some(slot)
            && self.io.print.lock().is_paused();
        if !resume {
            return Ok(());
        }
        self.advance(slot, Zone::ToolheadSensor)?;
        self.load(slot, LoadIntent::Continuation)?;
        self.notify(RmmuEvent::AfterInsert { toolhead: self.params.toolhead, tool: slot });
        self.io.print.lock().resume();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_traits::PrintControl;
    use crate::extras::rmmu::PrintJob;
    use crate::sim::{SimBench, PER_TOOL_SENSOR_CONFIG, SHARED_SENSOR_CONFIG};

    #[test]
    fn insert_parks_new_filament() {
        let (mut hub, bench) = SimBench::from_config_str(PER_TOOL_SENSOR_CONFIG).unwrap();
        let unit = hub.unit_mut(0).unwrap();
        unit.eject(Some(1)).unwrap();
        bench.motion(0).lock().insert_filament(1);

        unit.on_insert(1).unwrap();
        assert_eq!(unit.zone(1), Some(Zone::ParkingPosition));
        assert!(bench.motion(0).lock().tool_sensor_triggered(1));
        assert!(!bench.print.lock().is_paused());
    }

    #[test]
    fn insert_rejects_triggered_sensor() {
        let (mut hub, _bench) = SimBench::from_config_str(PER_TOOL_SENSOR_CONFIG).unwrap();
        let err = hub.unit_mut(0).unwrap().on_insert(0).unwrap_err();
        assert!(matches!(err, RmmuError::SensorFault { tool: Some(0), .. }));
    }

    #[test]
    fn insert_needs_tool_sensors() {
        let (mut hub, _bench) = SimBench::from_config_str(SHARED_SENSOR_CONFIG).unwrap();
        let err = hub.unit_mut(0).unwrap().on_insert(0).unwrap_err();
        assert!(matches!(err, RmmuError::Configuration { .. }));
    }

    #[test]
    fn insert_after_runout_resumes_print() {
        let (mut hub, bench) = SimBench::from_config_str(PER_TOOL_SENSOR_CONFIG).unwrap();
        let unit = hub.unit_mut(0).unwrap();
        unit.start_print(PrintJob::new(2, [2]));
        unit.load(2, LoadIntent::Fresh).unwrap();

        unit.on_runout(2, false).unwrap();
        assert!(bench.print.lock().is_paused());
        assert_eq!(unit.zone(2), Some(Zone::Ejected));

        bench.motion(0).lock().insert_filament(2);
        unit.on_insert(2).unwrap();
        assert_eq!(unit.zone(2), Some(Zone::Nozzle));
        assert!(!bench.print.lock().is_paused());
        assert!(!unit.state().runout_detected());
        assert!(bench
            .notifier
            .events()
            .contains(&RmmuEvent::AfterInsert { toolhead: 0, tool: 2 }));
    }
}
