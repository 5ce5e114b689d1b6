// rmmu_host/src/extras/rmmu/mod.rs

//! One RMMU unit: an idler that picks one of `tool_count` filament slots and a pulley that
//! feeds the picked filament through a shared reverse bowden into one toolhead.
//!
//! Filament position is tracked per slot as a [`Zone`]. Every movement goes through
//! [`Rmmu::transfer`], which only ever moves a slot to an adjacent zone; the operations in
//! `sequencer`, `calibrate` and `events` compose those transfers.

mod calibrate;
mod endstops;
mod error;
mod events;
mod params;
mod sequencer;
mod state;
mod transfer;

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;

use crate::configfile::Configfile;
use crate::core_traits::{
    Axis, Endstop, HeaterControl, MotionPrimitives, Notifier, PresenceSensor, PrintControl, Reactor,
    VariableStore,
};

pub use endstops::EndstopMux;
pub use error::RmmuError;
pub use params::{ParkingSensing, RmmuParams};
pub use state::{
    CalibrationSample, DeviceState, LoadIntent, PrintJob, RmmuEvent, SensorReport, ToolSlot, UnloadIntent, Zone,
};
pub use transfer::RetryPolicy;

pub type RmmuResult<T> = Result<T, RmmuError>;

pub const VARS_LOADED_FILAMENT: &str = "loaded_filament";
pub const VARS_LOADED_FILAMENT_TEMP: &str = "loaded_filament_temp";
pub const VARS_REVERSE_BOWDEN_LENGTH: &str = "reverse_bowden_length";

/// Everything a unit talks to outside of itself.
#[derive(Clone)]
pub struct Collaborators {
    pub motion: Arc<Mutex<dyn MotionPrimitives>>,
    pub heater: Arc<Mutex<dyn HeaterControl>>,
    pub variables: Arc<Mutex<dyn VariableStore>>,
    pub print: Arc<Mutex<dyn PrintControl>>,
    pub notifier: Arc<dyn Notifier>,
    pub reactor: Arc<dyn Reactor>,
}

pub struct Rmmu {
    params: RmmuParams,
    slots: Vec<ToolSlot>,
    state: DeviceState,
    endstops: EndstopMux,
    /// Idler coordinate as last commanded.
    idler_position: f64,
    /// Configured length, or the persisted calibration result.
    reverse_bowden_length: f64,
    io: Collaborators,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RmmuStatus {
    pub name: String,
    pub toolhead: usize,
    pub tool_count: usize,
    pub is_homed: bool,
    pub selected_slot: Option<usize>,
    pub loaded_slot: Option<usize>,
    pub filament_change_count: u32,
    pub runout_detected: bool,
    pub needs_initial_purging: bool,
    pub is_printing: bool,
    pub reverse_bowden_length: f64,
    pub parking_sensing: ParkingSensing,
    pub slots: Vec<ToolSlot>,
}

impl Rmmu {
    pub fn new(config: &Configfile, section: &str, io: Collaborators) -> RmmuResult<Self> {
        let params = RmmuParams::new(config, section)?;
        Ok(Self::with_params(params, io))
    }

    /// Builds the unit and restores the persisted calibration and loaded filament.
    pub fn with_params(params: RmmuParams, io: Collaborators) -> Self {
        let (saved_length, saved_loaded) = {
            let vars = io.variables.lock();
            (
                vars.get(&params.variable_name(VARS_REVERSE_BOWDEN_LENGTH)).and_then(|v| v.as_f64()),
                vars.get(&params.variable_name(VARS_LOADED_FILAMENT)).and_then(|v| v.as_i64()),
            )
        };

        let rest_zone = params.rest_zone();
        let mut slots: Vec<ToolSlot> = params
            .idler_positions
            .iter()
            .enumerate()
            .map(|(i, pos)| ToolSlot::new(i, *pos, rest_zone))
            .collect();

        let mut state = DeviceState::default();
        if let Some(loaded) = saved_loaded.filter(|t| *t >= 0 && (*t as usize) < params.tool_count) {
            let loaded = loaded as usize;
            slots[loaded].zone = Zone::Nozzle;
            state.loaded_slot = Some(loaded);
        }

        let reverse_bowden_length = match saved_length {
            Some(len) if len > 0.0 => {
                log::info!("{}: using calibrated reverse bowden length {:.1}mm", params.name, len);
                len
            }
            _ => params.reverse_bowden_length,
        };

        Rmmu {
            idler_position: params.idler_home_position,
            params,
            slots,
            state,
            endstops: EndstopMux::new(),
            reverse_bowden_length,
            io,
        }
    }

    pub fn name(&self) -> &str {
        &self.params.name
    }

    pub fn params(&self) -> &RmmuParams {
        &self.params
    }

    pub fn tool_count(&self) -> usize {
        self.params.tool_count
    }

    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    pub fn slots(&self) -> &[ToolSlot] {
        &self.slots
    }

    pub fn zone(&self, slot: usize) -> Option<Zone> {
        self.slots.get(slot).map(|s| s.zone)
    }

    pub fn reverse_bowden_length(&self) -> f64 {
        self.reverse_bowden_length
    }

    pub fn bound_endstop(&self) -> Option<Endstop> {
        self.endstops.current()
    }

    pub fn get_status(&self) -> RmmuStatus {
        RmmuStatus {
            name: self.params.name.clone(),
            toolhead: self.params.toolhead,
            tool_count: self.params.tool_count,
            is_homed: self.state.is_homed,
            selected_slot: self.state.selected_slot,
            loaded_slot: self.state.loaded_slot,
            filament_change_count: self.state.filament_change_count,
            runout_detected: self.state.runout_detected(),
            needs_initial_purging: self.state.needs_initial_purging,
            is_printing: self.state.is_printing(),
            reverse_bowden_length: self.reverse_bowden_length,
            parking_sensing: self.params.parking_sensing,
            slots: self.slots.clone(),
        }
    }

    fn check_slot(&self, slot: usize) -> RmmuResult<()> {
        if slot >= self.params.tool_count {
            return Err(RmmuError::config(
                Some(slot),
                format!("{} has only {} tools", self.params.name, self.params.tool_count),
            ));
        }
        Ok(())
    }

    // --- collaborator helpers ---

    fn notify(&self, event: RmmuEvent) {
        self.io.notifier.notify(event);
    }

    fn bind_endstop(&mut self, endstop: Endstop) {
        let mut motion = self.io.motion.lock();
        self.endstops.bind(&mut *motion, endstop);
    }

    fn endstop_triggered(&self, endstop: Endstop) -> bool {
        self.io.motion.lock().read_endstop(endstop)
    }

    fn sensor_triggered(&self, sensor: PresenceSensor) -> bool {
        self.io.motion.lock().read_presence_sensor(sensor)
    }

    pub fn toolhead_has_filament(&self) -> bool {
        self.sensor_triggered(PresenceSensor::Toolhead)
    }

    /// Per-slot parking sensor, `None` when the unit has none.
    fn tool_endstop_triggered(&self, slot: usize) -> Option<bool> {
        if self.params.has_tool_endstops() {
            Some(self.endstop_triggered(Endstop::ParkingTool(slot)))
        } else {
            None
        }
    }

    fn feeder_sensor_triggered(&self, slot: usize) -> Option<bool> {
        if self.params.has_feeder_sensors() {
            Some(self.sensor_triggered(PresenceSensor::Feeder(slot)))
        } else {
            None
        }
    }

    fn pulley_set_position(&self, position: f64) {
        self.io.motion.lock().set_position(Axis::Pulley, position);
    }

    fn pulley_move(&self, distance: f64, speed: f64, accel: f64) -> RmmuResult<()> {
        self.io.motion.lock().move_axis(Axis::Pulley, distance, speed, accel)?;
        Ok(())
    }

    fn synced_move(&self, distance: f64, speed: f64, accel: f64) -> RmmuResult<()> {
        self.io.motion.lock().synchronized_move(distance, speed, accel)?;
        Ok(())
    }

    fn save_variable(&self, suffix: &str, value: serde_json::Value) {
        let name = self.params.variable_name(suffix);
        self.io.variables.lock().set(&name, value);
    }

    fn saved_loaded_temperature(&self) -> Option<f64> {
        let name = self.params.variable_name(VARS_LOADED_FILAMENT_TEMP);
        self.io.variables.lock().get(&name).and_then(|v| v.as_f64())
    }

    fn persist_loaded(&self, slot: Option<usize>, temperature: f64) {
        let value = slot.map_or(json!(-1), |s| json!(s));
        self.save_variable(VARS_LOADED_FILAMENT, value);
        self.save_variable(VARS_LOADED_FILAMENT_TEMP, json!(temperature));
    }
}

/// Collects every event for later inspection.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<RmmuEvent>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RmmuEvent> {
        self.events.lock().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, event: RmmuEvent) {
        log::debug!("RMMU event: {:?}", event);
        self.events.lock().push(event);
    }
}
