// rmmu_host/src/sim.rs

//! A one-dimensional filament simulator standing in for the printer's motion system.
//!
//! Each slot's filament tip is a coordinate along the feed path. The toolhead sensor sits at
//! 0, the extruder gears at `+gears_distance`, the shared parking sensor at
//! `-reverse_bowden_length` and per-tool parking sensors further back when a ptfe adapter
//! carries a shared sensor too. A tip pulled far enough behind its per-tool sensor leaves the
//! feeder and is gone.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::configfile::Configfile;
use crate::core_traits::{
    Axis, Endstop, HomingMode, MotionError, MotionPrimitives, PresenceSensor, PrintControl, VariableStore,
};
use crate::extras::rmmu::{
    Collaborators, ParkingSensing, RecordingNotifier, RmmuError, RmmuParams, RmmuResult, VARS_LOADED_FILAMENT,
};
use crate::extras::rmmu_hub::RmmuHub;
use crate::heaters::Heater;
use crate::reactor::VirtualReactor;
use crate::save_variables::MemoryVariables;

pub const SHARED_SENSOR_CONFIG: &str = "
[rmmu rmmu_t0]
parking_endstop_pin: PA1
";

pub const PER_TOOL_SENSOR_CONFIG: &str = "
[rmmu rmmu_t0]
has_ptfe_adapter: true
parking_t0_endstop_pin: PB0
parking_t1_endstop_pin: PB1
parking_t2_endstop_pin: PB2
parking_t3_endstop_pin: PB3
";

pub const NO_PARKING_SENSOR_CONFIG: &str = "
[rmmu rmmu_t0]
";

pub const TWO_UNIT_CONFIG: &str = "
[rmmu rmmu_t0]
parking_endstop_pin: PA1

[rmmu rmmu_t1]
tool_count: 2
idler_positions: 30, 60
parking_endstop_pin: PA2
";

const HOMING_RESOLUTION: f64 = 1.0;
const IDLER_TOLERANCE: f64 = 0.5;
/// Distance behind a per-tool sensor after which the filament has left the feeder.
const EJECT_MARGIN: f64 = 100.0;
/// Spacing between the shared and the per-tool parking sensors.
const ADAPTER_LENGTH: f64 = 100.0;
const INSERTED_TIP_OFFSET: f64 = 20.0;

#[derive(Debug, Clone, PartialEq)]
pub struct SimGeometry {
    pub idler_positions: Vec<f64>,
    pub reverse_bowden_length: f64,
    pub parking_sensing: ParkingSensing,
    pub shared_parking_sensor: bool,
    pub tool_sensors: bool,
    pub gears_distance: f64,
    pub cooling_zone_distance: f64,
    pub nozzle_distance: f64,
    /// Where filament rests without any parking sensor.
    pub bowden_rest_distance: f64,
    /// Slot whose filament starts in the nozzle.
    pub loaded_slot: Option<usize>,
}

impl Default for SimGeometry {
    fn default() -> Self {
        SimGeometry {
            idler_positions: vec![102.0, 76.0, 50.0, 24.0],
            reverse_bowden_length: 500.0,
            parking_sensing: ParkingSensing::Shared,
            shared_parking_sensor: true,
            tool_sensors: false,
            gears_distance: 10.0,
            cooling_zone_distance: 40.0,
            nozzle_distance: 45.0,
            bowden_rest_distance: 50.0,
            loaded_slot: None,
        }
    }
}

impl SimGeometry {
    /// Geometry matching a unit's configuration. Uses the configured reverse bowden length,
    /// not a calibrated one.
    pub fn from_params(params: &RmmuParams, loaded_slot: Option<usize>) -> Self {
        SimGeometry {
            idler_positions: params.idler_positions.clone(),
            reverse_bowden_length: params.reverse_bowden_length,
            parking_sensing: params.parking_sensing,
            shared_parking_sensor: params.parking_endstop_pin.is_some(),
            tool_sensors: params.has_tool_endstops(),
            gears_distance: params.toolhead_sensor_to_extruder_gears_distance,
            cooling_zone_distance: params.extruder_gears_to_cooling_zone_distance,
            nozzle_distance: params.cooling_zone_to_nozzle_distance,
            bowden_rest_distance: params.filament_homing_parking_distance,
            loaded_slot,
        }
    }

    fn tool_sensor_at(&self) -> f64 {
        if self.shared_parking_sensor {
            -(self.reverse_bowden_length + ADAPTER_LENGTH)
        } else {
            -self.reverse_bowden_length
        }
    }

    fn rest_tip(&self) -> f64 {
        match self.parking_sensing {
            ParkingSensing::Shared => -self.reverse_bowden_length - 50.0,
            ParkingSensing::PerTool => self.tool_sensor_at() + 50.0,
            ParkingSensing::None => -self.bowden_rest_distance,
        }
    }

    fn loaded_tip(&self) -> f64 {
        self.gears_distance + self.cooling_zone_distance + self.nozzle_distance
    }
}

/// One entry per commanded move.
#[derive(Debug, Clone, PartialEq)]
pub enum SimMove {
    Move { axis: Axis, distance: f64, speed: f64, accel: f64 },
    Homing { axis: Axis, distance: f64, speed: f64, accel: f64, mode: HomingMode, reached: bool },
    Synced { distance: f64, speed: f64, accel: f64 },
}

#[derive(Debug)]
pub struct SimMotion {
    geometry: SimGeometry,
    /// Filament tip per slot; `None` once ejected.
    tips: Vec<Option<f64>>,
    idler: f64,
    pulley: f64,
    bound: Option<Endstop>,
    forced_endstops: Vec<(Endstop, bool)>,
    forced_sensors: Vec<(PresenceSensor, bool)>,
    jams: Vec<Option<f64>>,
    extruder_slip: bool,
    sticky_toolhead: bool,
    toolhead_latched: bool,
    log: Vec<SimMove>,
}

impl SimMotion {
    pub fn new(geometry: SimGeometry) -> Self {
        let count = geometry.idler_positions.len();
        let rest = geometry.rest_tip();
        let tips = (0..count)
            .map(|i| Some(if geometry.loaded_slot == Some(i) { geometry.loaded_tip() } else { rest }))
            .collect();
        SimMotion {
            geometry,
            tips,
            idler: 0.0,
            pulley: 0.0,
            bound: None,
            forced_endstops: Vec::new(),
            forced_sensors: Vec::new(),
            jams: vec![None; count],
            extruder_slip: false,
            sticky_toolhead: false,
            toolhead_latched: false,
            log: Vec::new(),
        }
    }

    pub fn geometry(&self) -> &SimGeometry {
        &self.geometry
    }

    pub fn pulley_position(&self) -> f64 {
        self.pulley
    }

    pub fn bound_endstop(&self) -> Option<Endstop> {
        self.bound
    }

    pub fn log(&self) -> &[SimMove] {
        &self.log
    }

    pub fn clear_log(&mut self) {
        self.log.clear();
    }

    pub fn homing_move_count(&self) -> usize {
        self.log.iter().filter(|m| matches!(m, SimMove::Homing { .. })).count()
    }

    pub fn tip(&self, slot: usize) -> Option<f64> {
        self.tips.get(slot).copied().flatten()
    }

    pub fn has_filament(&self, slot: usize) -> bool {
        self.tip(slot).is_some()
    }

    /// Slot the idler engages, if it sits on one.
    pub fn selected_slot(&self) -> Option<usize> {
        self.geometry
            .idler_positions
            .iter()
            .position(|p| (p - self.idler).abs() <= IDLER_TOLERANCE)
    }

    /// Overrides what `endstop` reads; `None` goes back to the simulated value.
    pub fn force_endstop(&mut self, endstop: Endstop, value: Option<bool>) {
        self.forced_endstops.retain(|(e, _)| *e != endstop);
        if let Some(v) = value {
            self.forced_endstops.push((endstop, v));
        }
    }

    pub fn force_presence(&mut self, sensor: PresenceSensor, value: Option<bool>) {
        self.forced_sensors.retain(|(s, _)| *s != sensor);
        if let Some(v) = value {
            self.forced_sensors.push((sensor, v));
        }
    }

    /// Gears that never grab: synchronized moves stop at the gears.
    pub fn set_extruder_slip(&mut self, slip: bool) {
        self.extruder_slip = slip;
    }

    /// The toolhead sensor keeps reporting filament after it left, until the filament moves
    /// forward once. Only happens once.
    pub fn set_sticky_toolhead_sensor(&mut self, sticky: bool) {
        self.sticky_toolhead = sticky;
        if !sticky {
            self.toolhead_latched = false;
        }
    }

    /// Forward movement of `slot` stops at `at`.
    pub fn jam(&mut self, slot: usize, at: Option<f64>) {
        if let Some(j) = self.jams.get_mut(slot) {
            *j = at;
        }
    }

    /// Puts new filament into the feeder of `slot`, just short of its parking sensor.
    pub fn insert_filament(&mut self, slot: usize) {
        let tip = self.geometry.tool_sensor_at() - INSERTED_TIP_OFFSET;
        if let Some(t) = self.tips.get_mut(slot) {
            *t = Some(tip);
        }
    }

    pub fn toolhead_triggered(&self) -> bool {
        self.toolhead_latched || self.tips.iter().flatten().any(|t| *t >= 0.0)
    }

    pub fn tool_sensor_triggered(&self, slot: usize) -> bool {
        self.geometry.tool_sensors && self.tip(slot).is_some_and(|t| t >= self.geometry.tool_sensor_at())
    }

    fn parking_triggered(&self) -> bool {
        let at = -self.geometry.reverse_bowden_length;
        self.geometry.shared_parking_sensor && self.tips.iter().flatten().any(|t| *t >= at)
    }

    fn raw_endstop(&self, endstop: Endstop) -> bool {
        match endstop {
            Endstop::Toolhead => self.toolhead_triggered(),
            Endstop::Parking => self.parking_triggered(),
            Endstop::ParkingTool(slot) => self.tool_sensor_triggered(slot),
        }
    }

    fn endstop_state(&self, endstop: Endstop) -> bool {
        self.forced_endstops
            .iter()
            .find(|(e, _)| *e == endstop)
            .map_or_else(|| self.raw_endstop(endstop), |(_, v)| *v)
    }

    fn homing_reached(&self, mode: HomingMode) -> Result<bool, MotionError> {
        let endstop = self.bound.ok_or(MotionError::NoEndstop(Axis::Pulley))?;
        let triggered = self.endstop_state(endstop);
        Ok(match mode {
            HomingMode::UntilTriggered => triggered,
            HomingMode::UntilReleased => !triggered,
        })
    }

    /// Moves one tip, applying jams, slip, the sticky sensor and ejection.
    fn move_tip(&mut self, slot: usize, distance: f64, synced: bool) {
        let Some(Some(old)) = self.tips.get(slot).copied() else {
            return;
        };
        let mut new = old + distance;
        if distance > 0.0 {
            if let Some(jam) = self.jams[slot] {
                new = new.min(old.max(jam));
            }
            if synced && self.extruder_slip {
                new = new.min(old.max(self.geometry.gears_distance));
            }
        }
        if self.sticky_toolhead && old >= 0.0 && new < 0.0 {
            self.toolhead_latched = true;
        }
        self.tips[slot] = if new < self.geometry.tool_sensor_at() - EJECT_MARGIN { None } else { Some(new) };
    }

    fn move_selected(&mut self, distance: f64) {
        if distance > 0.0 && self.toolhead_latched {
            self.toolhead_latched = false;
            self.sticky_toolhead = false;
        }
        if let Some(slot) = self.selected_slot() {
            self.move_tip(slot, distance, false);
        }
    }
}

impl MotionPrimitives for SimMotion {
    fn set_position(&mut self, axis: Axis, position: f64) {
        match axis {
            Axis::Idler => self.idler = position,
            Axis::Pulley => self.pulley = position,
        }
    }

    fn move_axis(&mut self, axis: Axis, distance: f64, speed: f64, accel: f64) -> Result<(), MotionError> {
        if speed <= 0.0 || accel <= 0.0 {
            return Err(MotionError::Rejected(format!("invalid speed {} or accel {}", speed, accel)));
        }
        self.log.push(SimMove::Move { axis, distance, speed, accel });
        match axis {
            Axis::Idler => self.idler += distance,
            Axis::Pulley => {
                self.pulley += distance;
                self.move_selected(distance);
            }
        }
        Ok(())
    }

    fn homing_move(
        &mut self,
        axis: Axis,
        distance: f64,
        speed: f64,
        accel: f64,
        mode: HomingMode,
    ) -> Result<bool, MotionError> {
        if axis == Axis::Idler {
            self.idler = 0.0;
            self.log.push(SimMove::Homing { axis, distance, speed, accel, mode, reached: true });
            return Ok(true);
        }

        let sign = distance.signum();
        let mut remaining = distance.abs();
        let mut reached = self.homing_reached(mode)?;
        while !reached && remaining > 0.0 {
            let step = remaining.min(HOMING_RESOLUTION);
            remaining -= step;
            self.pulley += sign * step;
            self.move_selected(sign * step);
            reached = self.homing_reached(mode)?;
        }
        self.log.push(SimMove::Homing { axis, distance, speed, accel, mode, reached });
        Ok(reached)
    }

    fn attach_pulley_endstop(&mut self, endstop: Endstop) {
        self.bound = Some(endstop);
    }

    fn read_endstop(&self, endstop: Endstop) -> bool {
        self.endstop_state(endstop)
    }

    fn read_presence_sensor(&self, sensor: PresenceSensor) -> bool {
        if let Some((_, v)) = self.forced_sensors.iter().find(|(s, _)| *s == sensor) {
            return *v;
        }
        match sensor {
            PresenceSensor::Toolhead => self.toolhead_triggered(),
            PresenceSensor::Feeder(slot) => self.has_filament(slot),
        }
    }

    fn synchronized_move(&mut self, distance: f64, speed: f64, accel: f64) -> Result<(), MotionError> {
        if speed <= 0.0 || accel <= 0.0 {
            return Err(MotionError::Rejected(format!("invalid speed {} or accel {}", speed, accel)));
        }
        self.log.push(SimMove::Synced { distance, speed, accel });
        let selected = self.selected_slot();
        let gears = self.geometry.gears_distance;
        for slot in 0..self.tips.len() {
            let in_gears = self.tip(slot).is_some_and(|t| t > gears);
            if selected == Some(slot) || in_gears {
                self.move_tip(slot, distance, true);
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct SimPrintControl {
    paused: bool,
}

impl SimPrintControl {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PrintControl for SimPrintControl {
    fn is_paused(&self) -> bool {
        self.paused
    }

    fn pause(&mut self) {
        log::info!("Print paused");
        self.paused = true;
    }

    fn resume(&mut self) {
        log::info!("Print resumed");
        self.paused = false;
    }
}

/// Handles to everything a simulated hub talks to.
pub struct SimBench {
    pub notifier: Arc<RecordingNotifier>,
    pub variables: Arc<Mutex<dyn VariableStore>>,
    pub print: Arc<Mutex<SimPrintControl>>,
    pub reactor: Arc<VirtualReactor>,
    motions: Vec<Arc<Mutex<SimMotion>>>,
    heaters: Vec<Arc<Mutex<Heater>>>,
}

impl SimBench {
    /// Builds a hub over in-memory variables from configuration text.
    pub fn from_config_str(content: &str) -> RmmuResult<(RmmuHub, SimBench)> {
        let mut config = Configfile::new(None);
        config.parse(content).map_err(|e| RmmuError::config(None, e))?;
        Self::build(&config, Arc::new(Mutex::new(MemoryVariables::new())))
    }

    /// Builds a hub with one simulated motion system and a preheated extruder per unit.
    /// Filament recorded as loaded in `variables` starts in the nozzle.
    pub fn build(config: &Configfile, variables: Arc<Mutex<dyn VariableStore>>) -> RmmuResult<(RmmuHub, SimBench)> {
        let mut bench = SimBench {
            notifier: Arc::new(RecordingNotifier::new()),
            variables,
            print: Arc::new(Mutex::new(SimPrintControl::new())),
            reactor: Arc::new(VirtualReactor::new()),
            motions: Vec::new(),
            heaters: Vec::new(),
        };

        let notifier = bench.notifier.clone();
        let print = bench.print.clone();
        let hub = RmmuHub::from_config(config, notifier, print, |params| bench.collaborators(params))?;
        Ok((hub, bench))
    }

    fn collaborators(&mut self, params: &RmmuParams) -> Collaborators {
        let loaded = self
            .variables
            .lock()
            .get(&params.variable_name(VARS_LOADED_FILAMENT))
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
            .filter(|v| *v < params.tool_count);
        let motion = Arc::new(Mutex::new(SimMotion::new(SimGeometry::from_params(params, loaded))));
        let heater_name = if params.toolhead == 0 { "extruder".to_string() } else { format!("extruder{}", params.toolhead) };
        let heater = Arc::new(Mutex::new(Heater::preheated(heater_name, 220.0)));
        self.motions.push(motion.clone());
        self.heaters.push(heater.clone());
        Collaborators {
            motion,
            heater,
            variables: self.variables.clone(),
            print: self.print.clone(),
            notifier: self.notifier.clone(),
            reactor: self.reactor.clone(),
        }
    }

    /// Motion system of unit `index`.
    pub fn motion(&self, index: usize) -> Arc<Mutex<SimMotion>> {
        self.motions[index].clone()
    }

    pub fn heater(&self, index: usize) -> Arc<Mutex<Heater>> {
        self.heaters[index].clone()
    }
}
