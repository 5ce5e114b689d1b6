// rmmu_host/src/extras/rmmu/endstops.rs

use crate::core_traits::{Endstop, MotionPrimitives};

/// The pulley has one homing circuit. This tracks which logical sensor it is attached to.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct EndstopMux {
    current: Option<Endstop>,
}

impl EndstopMux {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<Endstop> {
        self.current
    }

    /// Detaches the circuit from the previous sensor and attaches it to `endstop`. Forwarded to
    /// the motion system even when `endstop` is already bound.
    pub fn bind(&mut self, motion: &mut dyn MotionPrimitives, endstop: Endstop) {
        if let Some(previous) = self.current.replace(endstop) {
            if previous != endstop {
                log::debug!("Pulley endstop: {:?} -> {:?}", previous, endstop);
            }
        } else {
            log::debug!("Pulley endstop: {:?}", endstop);
        }
        motion.attach_pulley_endstop(endstop);
    }
}
