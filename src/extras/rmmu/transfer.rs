// rmmu_host/src/extras/rmmu/transfer.rs

//! Adjacent-zone filament moves and the retry policy shared by every sensor-seeking move.

use crate::core_traits::{Axis, Endstop, HomingMode};

use super::params::ParkingSensing;
use super::{Rmmu, RmmuError, RmmuResult, Zone};

const EXTRUDER_TEST_TRIES: usize = 4;
const EXTRUDER_TEST_RETRACT: f64 = 100.0;
const EJECT_STEP_DISTANCE: f64 = 100.0;
const EJECT_FINAL_RETRACT: f64 = 250.0;
const BOWDEN_SEARCH_STEP: f64 = 100.0;

/// How hard a sensor-seeking move tries before giving up.
///
/// One optional long homing move covering the expected distance, then up to `max_steps`
/// short homing moves, then `tries - 1` jiggle retries. Jiggle retry `i` backs off by
/// `jiggle_retract` and homes again at `speed / i` and `accel / i`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub long_distance: Option<f64>,
    pub step_distance: f64,
    pub max_steps: usize,
    pub jiggle_distance: f64,
    pub jiggle_retract: f64,
    pub tries: usize,
}

impl RetryPolicy {
    /// Stepping only, no long move and no jiggle.
    pub fn steps(step_distance: f64, max_steps: usize) -> Self {
        RetryPolicy {
            long_distance: None,
            step_distance,
            max_steps,
            jiggle_distance: 0.0,
            jiggle_retract: 0.0,
            tries: 1,
        }
    }

    pub fn with_long_move(mut self, distance: f64) -> Self {
        self.long_distance = Some(distance);
        self
    }

    pub fn with_jiggle(mut self, distance: f64, retract: f64, tries: usize) -> Self {
        self.jiggle_distance = distance;
        self.jiggle_retract = retract;
        self.tries = tries.max(1);
        self
    }

    /// Upper bound on the homing moves one seek issues.
    pub fn max_homing_moves(&self) -> usize {
        usize::from(self.long_distance.is_some()) + self.max_steps + self.tries.saturating_sub(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Direction {
    Forward,
    Backward,
}

impl Direction {
    fn sign(self) -> f64 {
        match self {
            Direction::Forward => 1.0,
            Direction::Backward => -1.0,
        }
    }
}

impl Rmmu {
    // --- policies ---

    fn toolhead_policy(&self) -> RetryPolicy {
        match self.params.parking_sensing {
            ParkingSensing::None => {
                let max_steps = ((self.reverse_bowden_length * 1.5) / BOWDEN_SEARCH_STEP) as usize;
                RetryPolicy::steps(BOWDEN_SEARCH_STEP, max_steps)
            }
            _ => RetryPolicy::steps(self.params.toolhead_sensor_step_distance, self.params.toolhead_sensor_max_steps)
                .with_long_move(self.reverse_bowden_length + 50.0)
                .with_jiggle(30.0, 10.0, self.params.toolhead_sensor_retries),
        }
    }

    fn parking_load_policy(&self) -> RetryPolicy {
        let step = self.params.filament_parking_distance + 10.0;
        match self.params.parking_sensing {
            ParkingSensing::PerTool => RetryPolicy::steps(step, 20).with_jiggle(30.0, 10.0, self.params.parking_sensor_retries),
            _ => RetryPolicy::steps(step, self.params.parking_sensor_max_steps)
                .with_jiggle(30.0, 10.0, self.params.parking_sensor_retries),
        }
    }

    fn parking_unload_policy(&self) -> RetryPolicy {
        RetryPolicy::steps(50.0, 10)
            .with_long_move(self.reverse_bowden_length + 100.0)
            .with_jiggle(50.0, 10.0, 10)
    }

    fn insert_policy(&self) -> RetryPolicy {
        RetryPolicy::steps(25.0, 10)
    }

    fn eject_policy(&self) -> RetryPolicy {
        let max_steps = ((self.reverse_bowden_length * 1.5) / EJECT_STEP_DISTANCE).ceil() as usize;
        RetryPolicy::steps(EJECT_STEP_DISTANCE, max_steps.max(1))
    }

    // --- primitives ---

    fn endstop_reached(&self, endstop: Endstop, mode: HomingMode) -> bool {
        let triggered = self.endstop_triggered(endstop);
        match mode {
            HomingMode::UntilTriggered => triggered,
            HomingMode::UntilReleased => !triggered,
        }
    }

    pub(super) fn pulley_homing_move(&self, distance: f64, speed: f64, accel: f64, mode: HomingMode) -> RmmuResult<bool> {
        let reached = self
            .io
            .motion
            .lock()
            .homing_move(Axis::Pulley, distance, speed, accel, mode)?;
        log::debug!(
            "{}: pulley homing move {:.1}mm at {:.1}mm/s ({:?}): {}",
            self.params.name,
            distance,
            speed,
            mode,
            if reached { "reached" } else { "not reached" }
        );
        Ok(reached)
    }

    /// Moves the pulley until `endstop` reaches the state `mode` asks for.
    ///
    /// Binds the endstop first. Returns whether the state was reached within `policy`; a
    /// sensor that is already in the wanted state costs no move at all.
    pub(super) fn seek(
        &mut self,
        endstop: Endstop,
        mode: HomingMode,
        direction: Direction,
        policy: RetryPolicy,
    ) -> RmmuResult<bool> {
        self.bind_endstop(endstop);
        if self.endstop_reached(endstop, mode) {
            return Ok(true);
        }

        let sign = direction.sign();
        let speed = self.params.filament_homing_speed;
        let accel = self.params.filament_homing_accel;

        if let Some(distance) = policy.long_distance {
            self.pulley_homing_move(sign * distance, speed, accel, mode)?;
            if self.endstop_reached(endstop, mode) {
                return Ok(true);
            }
        }

        for _ in 0..policy.max_steps {
            self.pulley_set_position(0.0);
            self.pulley_homing_move(sign * policy.step_distance, speed, accel, mode)?;
            if self.endstop_reached(endstop, mode) {
                return Ok(true);
            }
        }

        for i in 1..policy.tries {
            let factor = i as f64;
            log::warn!("{}: {:?} not reached, retry {}...", self.params.name, endstop, i);
            self.pulley_set_position(0.0);
            if policy.jiggle_retract > 0.0 {
                self.pulley_move(-sign * policy.jiggle_retract, speed / factor, accel / factor)?;
            }
            self.pulley_homing_move(
                sign * (policy.jiggle_distance + policy.jiggle_retract),
                speed / factor,
                accel / factor,
                mode,
            )?;
            if self.endstop_reached(endstop, mode) {
                log::info!("{}: {:?} reached on retry {}", self.params.name, endstop, i);
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn ensure_extrudable(&self, slot: usize, from: Zone, to: Zone) -> RmmuResult<()> {
        if self.io.heater.lock().can_extrude() {
            return Ok(());
        }
        let temperature = self.params.loading_temperature;
        if temperature > 0.0 {
            log::info!("{}: heating extruder to {:.0}C", self.params.name, temperature);
            let mut heater = self.io.heater.lock();
            heater.set_target(temperature, true);
            if heater.can_extrude() {
                return Ok(());
            }
        }
        Err(transition_failure(slot, from, to, "extruder temperature too low"))
    }

    // --- transfers ---

    /// Moves `slot` from its current zone to the adjacent zone `to`.
    ///
    /// On success the slot is in `to`. On failure the slot keeps its zone, except when the
    /// extruder test gives up: the filament is then retracted into the reverse bowden.
    pub fn transfer(&mut self, slot: usize, to: Zone) -> RmmuResult<()> {
        self.check_slot(slot)?;
        let from = self.slots[slot].zone;
        if !from.is_adjacent(to) {
            return Err(RmmuError::not_allowed(
                Some(slot),
                format!("{:?} is not adjacent to {:?}", from, to),
            ));
        }

        let extruder_only = matches!((from, to), (Zone::CoolingZone, Zone::Nozzle) | (Zone::Nozzle, Zone::CoolingZone));
        if !extruder_only {
            self.move_idler(Some(slot))?;
        }

        log::debug!("{}: T{} {:?} -> {:?}", self.params.name, slot, from, to);
        let result = match (from, to) {
            (Zone::Ejected, Zone::ParkingPosition) => self.insert_to_parking_position(slot),
            (Zone::ParkingPosition, Zone::ParkingSensor) => self.parking_position_to_sensor(slot),
            // The parking sensor is the bowden entrance; nothing moves.
            (Zone::ParkingSensor, Zone::ReverseBowden) => Ok(()),
            (Zone::ReverseBowden, Zone::ToolheadSensor) => self.reverse_bowden_to_toolhead_sensor(slot),
            (Zone::ToolheadSensor, Zone::CoolingZone) => self.toolhead_sensor_to_cooling_zone(slot),
            (Zone::CoolingZone, Zone::Nozzle) => self.cooling_zone_to_nozzle(slot),
            (Zone::Nozzle, Zone::CoolingZone) => self.nozzle_to_cooling_zone(slot),
            (Zone::CoolingZone, Zone::ToolheadSensor) => self.cooling_zone_to_toolhead_sensor(slot),
            (Zone::ToolheadSensor, Zone::ReverseBowden) => self.toolhead_sensor_to_reverse_bowden(slot),
            (Zone::ReverseBowden, Zone::ParkingSensor) => self.reverse_bowden_to_parking_sensor(slot),
            (Zone::ParkingSensor, Zone::ParkingPosition) => self.parking_sensor_to_parking_position(slot),
            (Zone::ParkingPosition, Zone::Ejected) => self.parking_position_to_ejected(slot),
            _ => Err(RmmuError::not_allowed(Some(slot), format!("no transfer from {:?} to {:?}", from, to))),
        };

        match result {
            Ok(()) => {
                self.slots[slot].zone = to;
                Ok(())
            }
            Err(e) => {
                log::error!("{}: {}", self.params.name, e);
                Err(e)
            }
        }
    }

    /// Steps `slot` one adjacent zone at a time until it is in `target`.
    pub fn advance(&mut self, slot: usize, target: Zone) -> RmmuResult<()> {
        self.check_slot(slot)?;
        while let Some(next) = self.slots[slot].zone.step_towards(target) {
            self.transfer(slot, next)?;
        }
        Ok(())
    }

    fn insert_to_parking_position(&mut self, slot: usize) -> RmmuResult<()> {
        let (from, to) = (Zone::Ejected, Zone::ParkingPosition);
        if !self.params.has_tool_endstops() {
            return Err(RmmuError::config(Some(slot), "inserting filament needs per-tool parking sensors"));
        }
        let policy = self.insert_policy();
        if !self.seek(Endstop::ParkingTool(slot), HomingMode::UntilTriggered, Direction::Forward, policy)? {
            return Err(transition_failure(slot, from, to, "parking sensor did not trigger"));
        }
        self.pulley_set_position(0.0);
        self.pulley_move(
            self.params.filament_parking_distance,
            self.params.filament_parking_speed,
            self.params.filament_parking_accel,
        )?;
        if !self.endstop_triggered(Endstop::ParkingTool(slot)) {
            return Err(transition_failure(slot, from, to, "filament lost after parking"));
        }
        Ok(())
    }

    fn parking_position_to_sensor(&mut self, slot: usize) -> RmmuResult<()> {
        let (from, to) = (Zone::ParkingPosition, Zone::ParkingSensor);
        let policy = self.parking_load_policy();
        let reached = match self.params.parking_sensing {
            ParkingSensing::None => true,
            ParkingSensing::Shared => self.seek(Endstop::Parking, HomingMode::UntilTriggered, Direction::Forward, policy)?,
            // Parked filament sits past its sensor; the sensor edge is behind it.
            ParkingSensing::PerTool => {
                self.seek(Endstop::ParkingTool(slot), HomingMode::UntilReleased, Direction::Backward, policy)?
            }
        };
        if !reached {
            return Err(transition_failure(slot, from, to, "parking sensor not reached"));
        }
        Ok(())
    }

    fn reverse_bowden_to_toolhead_sensor(&mut self, slot: usize) -> RmmuResult<()> {
        let policy = self.toolhead_policy();
        if !self.seek(Endstop::Toolhead, HomingMode::UntilTriggered, Direction::Forward, policy)? {
            return Err(transition_failure(
                slot,
                Zone::ReverseBowden,
                Zone::ToolheadSensor,
                "toolhead sensor did not trigger",
            ));
        }
        Ok(())
    }

    fn toolhead_sensor_to_cooling_zone(&mut self, slot: usize) -> RmmuResult<()> {
        let (from, to) = (Zone::ToolheadSensor, Zone::CoolingZone);
        self.ensure_extrudable(slot, from, to)?;
        let p = &self.params;
        if !p.make_extruder_test {
            self.synced_move(
                p.extruder_gears_to_cooling_zone_distance + p.toolhead_sensor_to_extruder_gears_distance,
                p.cooling_zone_loading_speed,
                p.cooling_zone_loading_accel,
            )?;
            return self.move_idler(None);
        }
        if self.extruder_test(slot)? {
            Ok(())
        } else {
            self.slots[slot].zone = Zone::ReverseBowden;
            Err(transition_failure(slot, from, to, "extruder test failed"))
        }
    }

    /// Pushes the filament into the extruder gears and pulls it partly back. The toolhead
    /// sensor still seeing filament means the gears grabbed it. Ends with the idler released.
    fn extruder_test(&mut self, slot: usize) -> RmmuResult<bool> {
        let gears = self.params.toolhead_sensor_to_extruder_gears_distance;
        let cooling = self.params.extruder_gears_to_cooling_zone_distance;
        let speed = self.params.cooling_zone_loading_speed;
        let accel = self.params.cooling_zone_loading_accel;
        log::info!("{}: extruder test with T{}...", self.params.name, slot);

        for i in 1..=EXTRUDER_TEST_TRIES {
            let factor = i as f64;
            self.synced_move(cooling + gears, speed / factor, accel / factor)?;
            self.synced_move(-(cooling + gears / 2.0), speed / factor, accel / factor)?;
            if self.toolhead_has_filament() {
                self.synced_move(cooling + gears / 2.0, speed / factor, accel / factor)?;
                self.move_idler(None)?;
                log::info!("{}: extruder test successful", self.params.name);
                return Ok(true);
            }

            log::warn!("{}: extruder test {} failed", self.params.name, i);
            self.synced_move(-EXTRUDER_TEST_RETRACT, speed / factor, accel / factor)?;
            let policy = RetryPolicy::steps(
                BOWDEN_SEARCH_STEP,
                ((self.reverse_bowden_length * 1.5) / BOWDEN_SEARCH_STEP) as usize,
            );
            if !self.seek(Endstop::Toolhead, HomingMode::UntilTriggered, Direction::Forward, policy)? {
                self.synced_move(-EXTRUDER_TEST_RETRACT, speed / factor, accel / factor)?;
                self.move_idler(None)?;
                return Ok(false);
            }
        }

        self.synced_move(-EXTRUDER_TEST_RETRACT, speed, accel)?;
        self.move_idler(None)?;
        Ok(false)
    }

    fn cooling_zone_to_nozzle(&mut self, slot: usize) -> RmmuResult<()> {
        let (from, to) = (Zone::CoolingZone, Zone::Nozzle);
        self.ensure_extrudable(slot, from, to)?;
        self.synced_move(
            self.params.cooling_zone_to_nozzle_distance,
            self.params.cooling_zone_loading_speed,
            self.params.cooling_zone_loading_accel,
        )?;
        if !self.toolhead_has_filament() {
            return Err(transition_failure(slot, from, to, "toolhead sensor lost filament"));
        }
        Ok(())
    }

    fn nozzle_to_cooling_zone(&mut self, slot: usize) -> RmmuResult<()> {
        self.ensure_extrudable(slot, Zone::Nozzle, Zone::CoolingZone)?;
        self.synced_move(
            -self.params.cooling_zone_to_nozzle_distance,
            self.params.cooling_zone_unloading_speed,
            self.params.cooling_zone_unloading_accel,
        )
    }

    fn cooling_zone_to_toolhead_sensor(&mut self, slot: usize) -> RmmuResult<()> {
        self.ensure_extrudable(slot, Zone::CoolingZone, Zone::ToolheadSensor)?;
        let p = &self.params;
        self.synced_move(
            -(p.extruder_gears_to_cooling_zone_distance + p.toolhead_sensor_to_extruder_gears_distance / 2.0),
            p.cooling_zone_unloading_speed,
            p.cooling_zone_unloading_accel,
        )
    }

    fn toolhead_sensor_to_reverse_bowden(&mut self, slot: usize) -> RmmuResult<()> {
        let speed = self.params.filament_homing_speed;
        let accel = self.params.filament_homing_accel;
        self.pulley_set_position(0.0);
        self.pulley_move(-self.params.filament_homing_parking_distance, speed, accel)?;
        if !self.toolhead_has_filament() {
            return Ok(());
        }

        let cleaning = self.params.filament_cleaning_distance;
        if cleaning > 0.0 {
            log::warn!("{}: toolhead sensor still triggered, cleaning it...", self.params.name);
            self.pulley_move(cleaning, speed, accel)?;
            self.pulley_move(-2.0 * cleaning, speed, accel)?;
            if !self.toolhead_has_filament() {
                log::info!("{}: toolhead sensor cleaned", self.params.name);
                return Ok(());
            }
        }
        Err(transition_failure(
            slot,
            Zone::ToolheadSensor,
            Zone::ReverseBowden,
            "toolhead sensor still triggered",
        ))
    }

    fn reverse_bowden_to_parking_sensor(&mut self, slot: usize) -> RmmuResult<()> {
        let endstop = match self.params.parking_sensing {
            ParkingSensing::None => return Ok(()),
            ParkingSensing::Shared => Endstop::Parking,
            ParkingSensing::PerTool => Endstop::ParkingTool(slot),
        };
        let policy = self.parking_unload_policy();
        if !self.seek(endstop, HomingMode::UntilReleased, Direction::Backward, policy)? {
            return Err(transition_failure(
                slot,
                Zone::ReverseBowden,
                Zone::ParkingSensor,
                "parking sensor still triggered",
            ));
        }
        Ok(())
    }

    fn parking_sensor_to_parking_position(&mut self, slot: usize) -> RmmuResult<()> {
        // Shared parks behind the sensor (released), per-tool parks past it (triggered).
        let (endstop, direction, want_triggered) = match self.params.parking_sensing {
            ParkingSensing::None => return Ok(()),
            ParkingSensing::Shared => (Endstop::Parking, -1.0, false),
            ParkingSensing::PerTool => (Endstop::ParkingTool(slot), 1.0, true),
        };
        let distance = self.params.filament_parking_distance;
        let speed = self.params.filament_parking_speed;
        let accel = self.params.filament_parking_accel;

        self.bind_endstop(endstop);
        self.pulley_set_position(0.0);
        self.pulley_move(direction * distance, speed, accel)?;

        for i in 1..self.params.parking_sensor_retries {
            if self.endstop_triggered(endstop) == want_triggered {
                break;
            }
            let factor = i as f64;
            log::warn!("{}: T{} not parked, retry {}...", self.params.name, slot, i);
            self.pulley_set_position(0.0);
            self.pulley_move(-direction * 10.0, speed / factor, accel / factor)?;
            self.pulley_move(direction * 50.0, speed / factor, accel / factor)?;
        }

        if self.endstop_triggered(endstop) != want_triggered {
            return Err(transition_failure(
                slot,
                Zone::ParkingSensor,
                Zone::ParkingPosition,
                "filament not parked",
            ));
        }
        Ok(())
    }

    fn parking_position_to_ejected(&mut self, slot: usize) -> RmmuResult<()> {
        let speed = self.params.filament_parking_speed;
        let accel = self.params.filament_parking_accel;
        if self.params.has_tool_endstops() {
            let policy = self.eject_policy();
            if !self.seek(Endstop::ParkingTool(slot), HomingMode::UntilReleased, Direction::Backward, policy)? {
                return Err(transition_failure(
                    slot,
                    Zone::ParkingPosition,
                    Zone::Ejected,
                    "parking sensor still triggered",
                ));
            }
            self.pulley_set_position(0.0);
            self.pulley_move(-EJECT_FINAL_RETRACT, speed, accel)
        } else {
            self.pulley_set_position(0.0);
            self.pulley_move(-(self.reverse_bowden_length * 1.5), speed, accel)
        }
    }
}

pub(super) fn transition_failure(slot: usize, from: Zone, to: Zone, reason: &str) -> RmmuError {
    RmmuError::TransitionFailure { tool: slot, from, to, reason: reason.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_traits::Endstop;
    use crate::sim::{SimBench, SimMove, SHARED_SENSOR_CONFIG};

    #[test]
    fn retry_bound_counts_every_phase() {
        let policy = RetryPolicy::steps(50.0, 5).with_long_move(550.0).with_jiggle(30.0, 10.0, 3);
        assert_eq!(policy.max_homing_moves(), 8);
        assert_eq!(RetryPolicy::steps(25.0, 10).max_homing_moves(), 10);
    }

    #[test]
    fn never_triggering_sensor_exhausts_the_policy() {
        let (mut hub, bench) = SimBench::from_config_str(SHARED_SENSOR_CONFIG).unwrap();
        let unit = hub.unit_mut(0).unwrap();
        unit.home().unwrap();
        unit.slots[1].zone = Zone::ReverseBowden;
        let expected = unit.toolhead_policy().max_homing_moves();

        let motion = bench.motion(0);
        motion.lock().force_endstop(Endstop::Toolhead, Some(false));
        motion.lock().clear_log();

        let err = unit.transfer(1, Zone::ToolheadSensor).unwrap_err();
        assert!(matches!(err, RmmuError::TransitionFailure { tool: 1, from: Zone::ReverseBowden, .. }));
        assert_eq!(motion.lock().homing_move_count(), expected);
        assert_eq!(expected, 8);
        assert_eq!(unit.zone(1), Some(Zone::ReverseBowden));
    }

    #[test]
    fn jiggle_retries_slow_down() {
        let (mut hub, bench) = SimBench::from_config_str(SHARED_SENSOR_CONFIG).unwrap();
        let unit = hub.unit_mut(0).unwrap();
        unit.home().unwrap();
        unit.slots[1].zone = Zone::ReverseBowden;
        let speed = unit.params.filament_homing_speed;
        let accel = unit.params.filament_homing_accel;

        let motion = bench.motion(0);
        motion.lock().force_endstop(Endstop::Toolhead, Some(false));
        motion.lock().clear_log();
        unit.transfer(1, Zone::ToolheadSensor).unwrap_err();

        let log = motion.lock().log().to_vec();
        let homing: Vec<(f64, f64)> = log
            .iter()
            .filter_map(|m| match m {
                SimMove::Homing { axis: Axis::Pulley, speed, accel, .. } => Some((*speed, *accel)),
                _ => None,
            })
            .collect();
        assert_eq!(homing.len(), 8);
        // Long move, five steps and the first jiggle run at full speed.
        for (s, a) in &homing[..7] {
            assert_eq!((*s, *a), (speed, accel));
        }
        assert_eq!(homing[7], (speed / 2.0, accel / 2.0));

        let retracts: Vec<(f64, f64)> = log
            .iter()
            .filter_map(|m| match m {
                SimMove::Move { axis: Axis::Pulley, speed, accel, .. } => Some((*speed, *accel)),
                _ => None,
            })
            .collect();
        assert_eq!(retracts.last(), Some(&(speed / 2.0, accel / 2.0)));
    }

    #[test]
    fn non_adjacent_transfer_is_rejected_without_moving() {
        let (mut hub, bench) = SimBench::from_config_str(SHARED_SENSOR_CONFIG).unwrap();
        let unit = hub.unit_mut(0).unwrap();
        bench.motion(0).lock().clear_log();
        let err = unit.transfer(0, Zone::ToolheadSensor).unwrap_err();
        assert!(matches!(err, RmmuError::ConcurrencyViolation { tool: Some(0), .. }));
        assert!(bench.motion(0).lock().log().is_empty());
    }

    #[test]
    fn every_successful_transfer_moves_one_zone() {
        let (mut hub, _bench) = SimBench::from_config_str(SHARED_SENSOR_CONFIG).unwrap();
        let unit = hub.unit_mut(0).unwrap();
        unit.home().unwrap();
        let mut previous = unit.zone(2).unwrap();
        while let Some(next) = previous.step_towards(Zone::Nozzle) {
            unit.transfer(2, next).unwrap();
            let now = unit.zone(2).unwrap();
            assert!(now.is_adjacent(previous));
            previous = now;
        }
        assert_eq!(previous, Zone::Nozzle);
    }

    #[test]
    fn failed_extruder_test_leaves_filament_in_bowden() {
        let (mut hub, bench) = SimBench::from_config_str(SHARED_SENSOR_CONFIG).unwrap();
        let unit = hub.unit_mut(0).unwrap();
        unit.home().unwrap();
        unit.advance(0, Zone::ToolheadSensor).unwrap();

        // Gears never grab the filament.
        bench.motion(0).lock().set_extruder_slip(true);
        bench.motion(0).lock().clear_log();
        let err = unit.transfer(0, Zone::CoolingZone).unwrap_err();
        assert!(matches!(err, RmmuError::TransitionFailure { to: Zone::CoolingZone, .. }));
        assert_eq!(unit.zone(0), Some(Zone::ReverseBowden));
        assert_eq!(unit.state().selected_slot, None);

        // Three synced moves per try, each try slower than the last, then a full speed retract.
        let speed = unit.params.cooling_zone_loading_speed;
        let accel = unit.params.cooling_zone_loading_accel;
        let synced: Vec<(f64, f64)> = bench
            .motion(0)
            .lock()
            .log()
            .iter()
            .filter_map(|m| match m {
                SimMove::Synced { speed, accel, .. } => Some((*speed, *accel)),
                _ => None,
            })
            .collect();
        assert_eq!(synced.len(), 3 * EXTRUDER_TEST_TRIES + 1);
        for i in 1..=EXTRUDER_TEST_TRIES {
            let factor = i as f64;
            for entry in &synced[3 * (i - 1)..3 * i] {
                assert_eq!(*entry, (speed / factor, accel / factor));
            }
        }
        assert_eq!(synced.last(), Some(&(speed, accel)));
    }

    #[test]
    fn cold_extruder_blocks_cooling_zone() {
        let (mut hub, bench) = SimBench::from_config_str(SHARED_SENSOR_CONFIG).unwrap();
        bench.heater(0).lock().current_temp = 25.0;
        let unit = hub.unit_mut(0).unwrap();
        unit.home().unwrap();
        unit.advance(3, Zone::ToolheadSensor).unwrap();
        let err = unit.transfer(3, Zone::CoolingZone).unwrap_err();
        assert!(matches!(err, RmmuError::TransitionFailure { tool: 3, .. }));
        assert_eq!(unit.zone(3), Some(Zone::ToolheadSensor));
    }
}
