// rmmu_host/src/extras/rmmu/calibrate.rs

use serde_json::json;

use crate::core_traits::{Endstop, HomingMode};

use super::sequencer::SWEEP_YIELD_SECONDS;
use super::transfer::{transition_failure, Direction};
use super::{CalibrationSample, Rmmu, RmmuError, RmmuEvent, RmmuResult, RetryPolicy, Zone, VARS_REVERSE_BOWDEN_LENGTH};

const STEP_OFF_DISTANCE: f64 = 100.0;
const STEP_OFF_MAX_STEPS: usize = 10;
const MEASURE_STEP_DISTANCE: f64 = 10.0;
const MEASURE_MAX_STEPS: usize = 100;

impl Rmmu {
    /// Measures the reverse bowden length with every slot and stores the mean.
    ///
    /// Every slot needs filament at its parking sensor before anything moves. The result is
    /// committed only when every slot produced a sample.
    pub fn calibrate(&mut self) -> RmmuResult<f64> {
        if !self.params.has_tool_endstops() {
            return Err(RmmuError::config(None, "calibration needs per-tool parking sensors"));
        }
        if self.toolhead_has_filament() {
            return Err(RmmuError::sensor(None, "filament in hotend, can not calibrate"));
        }
        for slot in 0..self.params.tool_count {
            if !self.endstop_triggered(Endstop::ParkingTool(slot)) {
                return Err(RmmuError::sensor(Some(slot), "filament missing at parking sensor"));
            }
        }

        log::info!("{}: calibrating reverse bowden length, please wait...", self.params.name);
        if !self.state.is_homed {
            self.home()?;
        }

        let mut samples = Vec::with_capacity(self.params.tool_count);
        for slot in 0..self.params.tool_count {
            if slot > 0 {
                self.io.reactor.pause(SWEEP_YIELD_SECONDS);
            }
            match self.measure_slot(slot) {
                Ok(sample) => samples.push(sample),
                Err(e) => {
                    log::error!("{}: calibration aborted, nothing saved", self.params.name);
                    if let Err(release) = self.move_idler(None) {
                        log::error!("{}: could not release idler: {}", self.params.name, release);
                    }
                    return Err(e);
                }
            }
        }
        self.move_idler(None)?;

        let length = samples.iter().map(|s| s.reverse_bowden_length).sum::<f64>() / samples.len() as f64;
        self.reverse_bowden_length = length;
        self.save_variable(VARS_REVERSE_BOWDEN_LENGTH, json!(length));
        log::info!("{}: average reverse bowden length {:.1}mm saved", self.params.name, length);
        self.notify(RmmuEvent::CalibrationFinished {
            unit: self.params.name.clone(),
            reverse_bowden_length: length,
        });
        Ok(length)
    }

    /// Steps off the parking sensor, then counts fine steps up to the toolhead sensor.
    fn measure_slot(&mut self, slot: usize) -> RmmuResult<CalibrationSample> {
        if self.slots[slot].zone > Zone::ReverseBowden {
            return Err(RmmuError::not_allowed(Some(slot), "filament is loaded"));
        }
        self.move_idler(Some(slot))?;

        let step_off = RetryPolicy::steps(STEP_OFF_DISTANCE, STEP_OFF_MAX_STEPS);
        if !self.seek(Endstop::ParkingTool(slot), HomingMode::UntilReleased, Direction::Backward, step_off)? {
            return Err(RmmuError::sensor(Some(slot), "could not move filament off its parking sensor"));
        }
        self.slots[slot].zone = Zone::ReverseBowden;
        self.pulley_set_position(0.0);
        self.bind_endstop(Endstop::Toolhead);

        let speed = self.params.filament_homing_speed;
        let accel = self.params.filament_homing_accel;
        let mut steps = None;
        for m in 0..MEASURE_MAX_STEPS {
            self.pulley_homing_move(MEASURE_STEP_DISTANCE, speed, accel, HomingMode::UntilTriggered)?;
            if self.endstop_triggered(Endstop::Toolhead) {
                steps = Some(m + 1);
                break;
            }
        }
        let Some(steps) = steps else {
            return Err(transition_failure(
                slot,
                Zone::ReverseBowden,
                Zone::ToolheadSensor,
                "toolhead sensor not reached while measuring",
            ));
        };

        let length = steps as f64 * MEASURE_STEP_DISTANCE;
        log::info!("{}: reverse bowden length T{} = {:.1}mm", self.params.name, slot, length);
        self.slots[slot].zone = Zone::ToolheadSensor;
        self.advance(slot, self.params.rest_zone())?;
        self.slots[slot].homed = true;
        Ok(CalibrationSample { slot, reverse_bowden_length: length })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_traits::VariableStore;
    use crate::sim::{SimBench, PER_TOOL_SENSOR_CONFIG, SHARED_SENSOR_CONFIG};
    use float_cmp::assert_approx_eq;

    #[test]
    fn calibration_commits_the_mean() {
        let (mut hub, bench) = SimBench::from_config_str(PER_TOOL_SENSOR_CONFIG).unwrap();
        let unit = hub.unit_mut(0).unwrap();
        let length = unit.calibrate().unwrap();
        // Parking sensor sits 500mm behind the toolhead sensor; 10mm steps overshoot by one.
        assert_approx_eq!(f64, length, 510.0);
        assert_approx_eq!(f64, unit.reverse_bowden_length(), 510.0);
        assert_eq!(bench.variables.lock().get("rmmu_t0_reverse_bowden_length"), Some(json!(510.0)));
        assert!(unit.slots().iter().all(|s| s.zone == Zone::ParkingPosition));
        assert!(bench.notifier.events().iter().any(|e| matches!(e, RmmuEvent::CalibrationFinished { .. })));
    }

    #[test]
    fn calibration_without_tool_sensors_is_a_configuration_error() {
        let (mut hub, bench) = SimBench::from_config_str(SHARED_SENSOR_CONFIG).unwrap();
        bench.motion(0).lock().clear_log();
        let err = hub.unit_mut(0).unwrap().calibrate().unwrap_err();
        assert!(matches!(err, RmmuError::Configuration { tool: None, .. }));
        assert!(bench.motion(0).lock().log().is_empty());
    }

    #[test]
    fn jammed_slot_discards_every_sample() {
        let (mut hub, bench) = SimBench::from_config_str(PER_TOOL_SENSOR_CONFIG).unwrap();
        bench.motion(0).lock().jam(2, Some(-200.0));
        let unit = hub.unit_mut(0).unwrap();
        let before = unit.reverse_bowden_length();

        let err = unit.calibrate().unwrap_err();
        assert!(matches!(err, RmmuError::TransitionFailure { tool: 2, .. }));
        assert_approx_eq!(f64, unit.reverse_bowden_length(), before);
        assert_eq!(bench.variables.lock().get("rmmu_t0_reverse_bowden_length"), None);
        assert_eq!(unit.state().selected_slot, None);
    }
}
