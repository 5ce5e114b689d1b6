// rmmu_host/src/extras/mod.rs

pub mod rmmu;
pub mod rmmu_hub;
pub mod routing;
