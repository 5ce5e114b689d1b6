// rmmu_host/src/extras/rmmu/state.rs

use std::collections::BTreeSet;

use serde::Serialize;

/// Where the tip of a slot's filament is. The order of the variants is the order along the
/// filament path, from outside the device to the nozzle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Zone {
    Ejected,
    ParkingPosition,
    ParkingSensor,
    ReverseBowden,
    ToolheadSensor,
    CoolingZone,
    Nozzle,
}

impl Zone {
    pub const ALL: [Zone; 7] = [
        Zone::Ejected,
        Zone::ParkingPosition,
        Zone::ParkingSensor,
        Zone::ReverseBowden,
        Zone::ToolheadSensor,
        Zone::CoolingZone,
        Zone::Nozzle,
    ];

    fn ordinal(self) -> usize {
        self as usize
    }

    pub fn next(self) -> Option<Zone> {
        Zone::ALL.get(self.ordinal() + 1).copied()
    }

    pub fn prev(self) -> Option<Zone> {
        self.ordinal().checked_sub(1).map(|i| Zone::ALL[i])
    }

    pub fn is_adjacent(self, other: Zone) -> bool {
        self.ordinal().abs_diff(other.ordinal()) == 1
    }

    /// The adjacent zone one step closer to `target`, or `None` when already there.
    pub fn step_towards(self, target: Zone) -> Option<Zone> {
        match self.cmp(&target) {
            std::cmp::Ordering::Less => self.next(),
            std::cmp::Ordering::Greater => self.prev(),
            std::cmp::Ordering::Equal => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSlot {
    pub index: usize,
    /// Idler position that engages this slot.
    pub idler_position: f64,
    pub zone: Zone,
    pub homed: bool,
}

impl ToolSlot {
    pub fn new(index: usize, idler_position: f64, rest_zone: Zone) -> Self {
        Self { index, idler_position, zone: rest_zone, homed: false }
    }
}

/// A print the outer layer started. Its presence means "mid print".
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct PrintJob {
    pub initial_tool: usize,
    /// Logical tools the sliced file uses.
    pub required_tools: BTreeSet<usize>,
}

impl PrintJob {
    pub fn new(initial_tool: usize, required_tools: impl IntoIterator<Item = usize>) -> Self {
        Self { initial_tool, required_tools: required_tools.into_iter().collect() }
    }

    pub fn uses(&self, tool: usize) -> bool {
        self.required_tools.contains(&tool)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeviceState {
    pub is_homed: bool,
    /// Slot the idler currently engages; `None` is neutral.
    pub selected_slot: Option<usize>,
    /// Slot whose filament sits in the toolhead.
    pub loaded_slot: Option<usize>,
    pub filament_change_count: u32,
    pub loads_since_print_start: u32,
    /// Slot whose runout paused the print, until a load or insert recovers it.
    pub runout_slot: Option<usize>,
    pub needs_initial_purging: bool,
    pub active_print: Option<PrintJob>,
}

impl DeviceState {
    pub fn runout_detected(&self) -> bool {
        self.runout_slot.is_some()
    }

    pub fn is_printing(&self) -> bool {
        self.active_print.is_some()
    }

    /// Clears the transient flags; the active print and counters survive.
    pub fn reset(&mut self) {
        self.is_homed = false;
        self.selected_slot = None;
        self.runout_slot = None;
        self.needs_initial_purging = false;
    }

    /// Counts a finished load. The first load of a print is not a change.
    pub fn record_load(&mut self, slot: usize) {
        if self.loads_since_print_start > 0 {
            self.filament_change_count += 1;
        }
        self.loads_since_print_start += 1;
        self.loaded_slot = Some(slot);
        self.runout_slot = None;
    }

    pub fn start_print(&mut self, job: PrintJob) {
        self.filament_change_count = 0;
        self.loads_since_print_start = 0;
        self.active_print = Some(job);
    }

    pub fn end_print(&mut self) {
        self.reset();
        self.active_print = None;
    }
}

/// Why filament is being loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadIntent {
    /// The toolhead should be empty; a known stale filament is unloaded first.
    Fresh,
    /// An earlier phase already brought the filament to the toolhead sensor.
    Continuation,
}

/// Why filament is being unloaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnloadIntent {
    /// Operator request; filament must be present in the toolhead.
    Manual,
    /// Tool change during a print; adds the cooling zone pause.
    ToolChange,
    /// The spool ran out; the toolhead may already be empty.
    Runout,
}

impl UnloadIntent {
    pub fn expects_filament(self) -> bool {
        !matches!(self, UnloadIntent::Runout)
    }
}

/// Events for the outer command layer. Tool indices are local slot indices unless a field
/// says otherwise.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum RmmuEvent {
    Homed { unit: String },
    FilamentChanged { toolhead: usize, tool: usize },
    LoadingError { toolhead: usize, tool: usize },
    BeforeRunout { toolhead: usize, tool: usize, clogged: bool },
    AfterInsert { toolhead: usize, tool: usize },
    BeforeFilamentChange { toolhead: usize, tool: usize },
    MoveToLoadingPosition { toolhead: usize },
    /// Logical tool groups after a change.
    SpoolJoinChanged { groups: Vec<Vec<usize>> },
    RemapChanged { groups: Vec<Vec<usize>> },
    CalibrationFinished { unit: String, reverse_bowden_length: f64 },
}

/// Snapshot of every sensor a unit can read.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorReport {
    pub unit: String,
    pub toolhead_sensor: bool,
    pub feeder_sensors: Vec<bool>,
    pub toolhead_endstop: bool,
    pub parking_endstop: Option<bool>,
    pub parking_tool_endstops: Vec<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CalibrationSample {
    pub slot: usize,
    pub reverse_bowden_length: f64,
}
