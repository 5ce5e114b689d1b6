// rmmu_host/src/lib.rs

// Host-side controller for RMMU multi-material filament feeders.

pub mod configfile;
pub mod core_traits;
pub mod heaters;
pub mod reactor;
pub mod save_variables;
pub mod sim;

// RMMU units, the hub that aggregates them, and tool routing
pub mod extras;

pub use extras::rmmu::{Rmmu, RmmuError, RmmuResult};
pub use extras::rmmu_hub::RmmuHub;
