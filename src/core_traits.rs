// rmmu_host/src/core_traits.rs

//! Boundary ports between the RMMU core and the rest of the printer host.
//!
//! The core never talks to steppers, heaters or the console directly. Everything it needs from
//! the outside world goes through one of the traits below, which keeps the transport logic
//! testable against the simulator in [`crate::sim`].

use serde::Serialize;
use thiserror::Error;

use crate::extras::rmmu::RmmuEvent;

/// Steppers owned by one RMMU unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Axis {
    /// Selects which slot's filament engages the pulley.
    Idler,
    /// Feeds filament along the shared reverse bowden.
    Pulley,
}

/// Endstops that can be bound to the pulley's single homing circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Endstop {
    /// Toolhead filament sensor wired as the pulley endstop.
    Toolhead,
    /// Shared parking sensor in the ptfe adapter.
    Parking,
    /// Per-slot parking sensor.
    ParkingTool(usize),
}

/// Filament presence switches that are read but never used for homing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PresenceSensor {
    Toolhead,
    Feeder(usize),
}

/// What ends a homing move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HomingMode {
    /// Stop as soon as the bound endstop reports triggered.
    UntilTriggered,
    /// Stop as soon as the bound endstop reports open.
    UntilReleased,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MotionError {
    #[error("no endstop bound to {0:?}")]
    NoEndstop(Axis),
    #[error("move rejected: {0}")]
    Rejected(String),
}

/// Motion primitives provided by the printer's motion system.
///
/// Every move is blocking from the caller's point of view: when a call returns the stepper
/// has finished moving (the host waited for the move queue to drain).
pub trait MotionPrimitives: Send {
    /// Redefine the current position of `axis` without moving.
    fn set_position(&mut self, axis: Axis, position: f64);

    fn move_axis(&mut self, axis: Axis, distance: f64, speed: f64, accel: f64) -> Result<(), MotionError>;

    /// Relative homing move. Returns whether the end condition was reached before the distance ran out.
    fn homing_move(&mut self, axis: Axis, distance: f64, speed: f64, accel: f64, mode: HomingMode) -> Result<bool, MotionError>;

    /// Detach the pulley's homing circuit from its current endstop and attach it to `endstop`.
    fn attach_pulley_endstop(&mut self, endstop: Endstop);

    fn read_endstop(&self, endstop: Endstop) -> bool;

    fn read_presence_sensor(&self, sensor: PresenceSensor) -> bool;

    /// Pulley and extruder moving together by `distance`.
    fn synchronized_move(&mut self, distance: f64, speed: f64, accel: f64) -> Result<(), MotionError>;
}

/// The extruder heater of the toolhead fed by a unit.
pub trait HeaterControl: Send {
    fn set_target(&mut self, temp: f64, wait: bool);
    fn target(&self) -> f64;
    fn can_extrude(&self) -> bool;
    fn min_extrude_temp(&self) -> f64;
    fn max_temp(&self) -> f64;
}

/// Typed notifications for the outer command layer.
pub trait Notifier: Send + Sync {
    fn notify(&self, event: RmmuEvent);
}

/// Saved variables that survive a host restart.
pub trait VariableStore: Send {
    fn get(&self, name: &str) -> Option<serde_json::Value>;
    fn set(&mut self, name: &str, value: serde_json::Value);
}

/// Pause/resume state of the running print.
pub trait PrintControl: Send {
    fn is_paused(&self) -> bool;
    fn pause(&mut self);
    fn resume(&mut self);
}

/// Cooperative scheduler of the host.
pub trait Reactor: Send + Sync {
    fn monotonic(&self) -> f64;
    /// Yield to other host tasks for `seconds`.
    fn pause(&self, seconds: f64);
}
