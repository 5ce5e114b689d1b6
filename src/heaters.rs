// rmmu_host/src/heaters.rs

use crate::core_traits::HeaterControl;

#[derive(Debug, Clone)]
pub struct Heater {
    pub name: String,
    pub target_temp: f64,
    pub current_temp: f64,
    pub min_extrude_temp: f64,
    pub max_temp: f64,
}

impl Heater {
    pub fn new(name: String) -> Self {
        Heater {
            name,
            target_temp: 0.0,
            current_temp: 25.0, // Ambient temperature
            min_extrude_temp: 170.0,
            max_temp: 300.0,
        }
    }

    /// A heater that already sits at `temp`, for setups where temperature is not under test.
    pub fn preheated(name: String, temp: f64) -> Self {
        let mut heater = Heater::new(name);
        heater.target_temp = temp;
        heater.current_temp = temp;
        heater
    }

    pub fn get_current_temp(&self) -> f64 {
        self.current_temp
    }
}

impl HeaterControl for Heater {
    fn set_target(&mut self, temp: f64, wait: bool) {
        let temp = temp.clamp(0.0, self.max_temp);
        self.target_temp = temp;
        log::info!("Heater '{}': target temperature set to {:.1}C", self.name, temp);
        if wait {
            // No thermal model; waiting means the target has been reached.
            self.current_temp = temp.max(25.0);
        }
    }

    fn target(&self) -> f64 {
        self.target_temp
    }

    fn can_extrude(&self) -> bool {
        self.current_temp >= self.min_extrude_temp
    }

    fn min_extrude_temp(&self) -> f64 {
        self.min_extrude_temp
    }

    fn max_temp(&self) -> f64 {
        self.max_temp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heater_creation_and_set_target() {
        let mut heater = Heater::new("extruder_test".to_string());
        assert_eq!(heater.name, "extruder_test");
        assert_eq!(heater.target(), 0.0);
        assert!(!heater.can_extrude());

        heater.set_target(200.5, false);
        assert_eq!(heater.target(), 200.5);
        assert!(!heater.can_extrude());

        heater.set_target(220.0, true);
        assert_eq!(heater.get_current_temp(), 220.0);
        assert!(heater.can_extrude());
    }

    #[test]
    fn heater_target_is_clamped() {
        let mut heater = Heater::new("extruder".to_string());
        heater.set_target(500.0, false);
        assert_eq!(heater.target(), 300.0);
    }
}
