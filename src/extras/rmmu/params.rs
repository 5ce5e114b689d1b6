// rmmu_host/src/extras/rmmu/params.rs

use serde::Serialize;

use crate::configfile::{ConfigError, Configfile};

use super::state::Zone;

/// Which sensor marks the end of the reverse bowden on the feeder side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ParkingSensing {
    /// No parking sensor; filament rests inside the reverse bowden.
    None,
    /// One sensor in the ptfe adapter shared by every slot.
    Shared,
    /// A parking sensor per slot, used together with a ptfe adapter.
    PerTool,
}

impl ParkingSensing {
    /// Zone a slot's filament returns to when it is not loaded.
    pub fn rest_zone(self) -> Zone {
        match self {
            ParkingSensing::Shared | ParkingSensing::PerTool => Zone::ParkingPosition,
            ParkingSensing::None => Zone::ReverseBowden,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RmmuParams {
    /// Unit name, e.g. `rmmu_t0`. Prefixes every saved variable.
    pub name: String,
    /// Physical toolhead this unit feeds.
    pub toolhead: usize,
    pub tool_count: usize,
    pub idler_positions: Vec<f64>,
    pub reverse_bowden_length: f64,

    pub toolhead_sensor_to_extruder_gears_distance: f64,
    pub extruder_gears_to_cooling_zone_distance: f64,
    pub cooling_zone_to_nozzle_distance: f64,
    pub has_ptfe_adapter: bool,
    pub make_extruder_test: bool,

    pub parking_endstop_pin: Option<String>,
    /// Empty unless every slot has one.
    pub parking_tool_endstop_pins: Vec<String>,
    /// Empty unless every slot has one.
    pub feeder_sensor_pins: Vec<String>,
    pub parking_sensing: ParkingSensing,

    pub idler_speed: f64,
    pub idler_accel: f64,
    pub idler_home_position: f64,
    pub idler_homing_speed: f64,
    pub idler_homing_accel: f64,

    pub filament_homing_speed: f64,
    pub filament_homing_accel: f64,
    pub filament_homing_parking_distance: f64,
    pub filament_cleaning_distance: f64,

    pub filament_parking_speed: f64,
    pub filament_parking_accel: f64,
    pub filament_parking_distance: f64,

    pub cooling_zone_loading_speed: f64,
    pub cooling_zone_loading_accel: f64,
    pub cooling_zone_unloading_speed: f64,
    pub cooling_zone_unloading_accel: f64,
    /// Milliseconds.
    pub cooling_zone_unloading_pause: f64,

    pub toolhead_sensor_step_distance: f64,
    pub toolhead_sensor_max_steps: usize,
    pub toolhead_sensor_retries: usize,
    pub parking_sensor_max_steps: usize,
    pub parking_sensor_retries: usize,

    /// 0 disables automatic heating before extruder moves.
    pub loading_temperature: f64,
}

const DEFAULT_IDLER_POSITIONS: [f64; 4] = [102.0, 76.0, 50.0, 24.0];

fn parse_toolhead_suffix(name: &str) -> Option<usize> {
    name.rsplit_once("_t").and_then(|(_, n)| n.parse().ok())
}

impl RmmuParams {
    /// Reads `[<section>]`, e.g. `[rmmu rmmu_t0]`.
    pub fn new(config: &Configfile, section: &str) -> Result<Self, ConfigError> {
        if !config.has_section(section) {
            return Err(ConfigError::SectionNotFound(section.to_string()));
        }
        let name = section
            .split_whitespace()
            .last()
            .unwrap_or(section)
            .to_lowercase();

        let default_toolhead = parse_toolhead_suffix(&name).unwrap_or(0) as i64;
        let toolhead = config.getint(section, "toolhead", Some(default_toolhead), Some(0), None)? as usize;

        let tool_count = config.getint(section, "tool_count", Some(4), Some(1), Some(32))? as usize;
        let default_positions = if tool_count == DEFAULT_IDLER_POSITIONS.len() {
            Some(DEFAULT_IDLER_POSITIONS.to_vec())
        } else {
            None
        };
        let idler_positions = config.getfloatlist(section, "idler_positions", default_positions)?;
        if idler_positions.len() != tool_count {
            return Err(ConfigError::ValidationError(format!(
                "'idler_positions' in section [{}] lists {} positions but tool_count is {}",
                section,
                idler_positions.len(),
                tool_count
            )));
        }

        let reverse_bowden_length = config.getfloat(section, "reverse_bowden_length", Some(500.0), None, None)?;
        if reverse_bowden_length <= 0.0 {
            return Err(ConfigError::ValidationError(format!(
                "'reverse_bowden_length' in section [{}] must be positive",
                section
            )));
        }

        let parking_endstop_pin = config.get_optional(section, "parking_endstop_pin")?;
        let parking_tool_endstop_pins = Self::per_tool_pins(config, section, tool_count, "parking_t", "_endstop_pin")?;
        let feeder_sensor_pins = Self::per_tool_pins(config, section, tool_count, "feeder_t", "_sensor_pin")?;
        let has_ptfe_adapter = config.getboolean(section, "has_ptfe_adapter", Some(false))?;

        let parking_sensing = if parking_endstop_pin.is_some() {
            ParkingSensing::Shared
        } else if has_ptfe_adapter && !parking_tool_endstop_pins.is_empty() {
            ParkingSensing::PerTool
        } else {
            ParkingSensing::None
        };

        let positive = Some(f64::MIN_POSITIVE);
        Ok(RmmuParams {
            name,
            toolhead,
            tool_count,
            idler_positions,
            reverse_bowden_length,
            toolhead_sensor_to_extruder_gears_distance: config.getfloat(section, "toolhead_sensor_to_extruder_gears_distance", Some(10.0), Some(0.0), None)?,
            extruder_gears_to_cooling_zone_distance: config.getfloat(section, "extruder_gears_to_cooling_zone_distance", Some(40.0), Some(0.0), None)?,
            cooling_zone_to_nozzle_distance: config.getfloat(section, "cooling_zone_to_nozzle_distance", Some(45.0), Some(0.0), None)?,
            has_ptfe_adapter,
            make_extruder_test: config.getboolean(section, "make_extruder_test", Some(true))?,
            parking_endstop_pin,
            parking_tool_endstop_pins,
            feeder_sensor_pins,
            parking_sensing,
            idler_speed: config.getfloat(section, "idler_speed", Some(300.0), positive, None)?,
            idler_accel: config.getfloat(section, "idler_accel", Some(3000.0), positive, None)?,
            idler_home_position: config.getfloat(section, "idler_home_position", Some(0.0), None, None)?,
            idler_homing_speed: config.getfloat(section, "idler_homing_speed", Some(40.0), positive, None)?,
            idler_homing_accel: config.getfloat(section, "idler_homing_accel", Some(200.0), positive, None)?,
            filament_homing_speed: config.getfloat(section, "filament_homing_speed", Some(250.0), positive, None)?,
            filament_homing_accel: config.getfloat(section, "filament_homing_accel", Some(2000.0), positive, None)?,
            filament_homing_parking_distance: config.getfloat(section, "filament_homing_parking_distance", Some(50.0), positive, None)?,
            filament_cleaning_distance: config.getfloat(section, "filament_cleaning_distance", Some(100.0), Some(0.0), None)?,
            filament_parking_speed: config.getfloat(section, "filament_parking_speed", Some(300.0), positive, None)?,
            filament_parking_accel: config.getfloat(section, "filament_parking_accel", Some(2000.0), positive, None)?,
            filament_parking_distance: config.getfloat(section, "filament_parking_distance", Some(50.0), positive, None)?,
            cooling_zone_loading_speed: config.getfloat(section, "cooling_zone_loading_speed", Some(30.0), positive, None)?,
            cooling_zone_loading_accel: config.getfloat(section, "cooling_zone_loading_accel", Some(500.0), positive, None)?,
            cooling_zone_unloading_speed: config.getfloat(section, "cooling_zone_unloading_speed", Some(50.0), positive, None)?,
            cooling_zone_unloading_accel: config.getfloat(section, "cooling_zone_unloading_accel", Some(1000.0), positive, None)?,
            cooling_zone_unloading_pause: config.getfloat(section, "cooling_zone_unloading_pause", Some(1000.0), Some(0.0), None)?,
            toolhead_sensor_step_distance: config.getfloat(section, "toolhead_sensor_step_distance", Some(50.0), positive, None)?,
            toolhead_sensor_max_steps: config.getint(section, "toolhead_sensor_max_steps", Some(5), Some(0), None)? as usize,
            toolhead_sensor_retries: config.getint(section, "toolhead_sensor_retries", Some(3), Some(1), None)? as usize,
            parking_sensor_max_steps: config.getint(section, "parking_sensor_max_steps", Some(5), Some(0), None)? as usize,
            parking_sensor_retries: config.getint(section, "parking_sensor_retries", Some(5), Some(1), None)? as usize,
            loading_temperature: config.getfloat(section, "loading_temperature", Some(0.0), Some(0.0), None)?,
        })
    }

    /// Collects `<prefix><i><suffix>` for every slot. Either all slots have the pin or none do.
    fn per_tool_pins(
        config: &Configfile,
        section: &str,
        tool_count: usize,
        prefix: &str,
        suffix: &str,
    ) -> Result<Vec<String>, ConfigError> {
        let mut pins = Vec::with_capacity(tool_count);
        for i in 0..tool_count {
            if let Some(pin) = config.get_optional(section, &format!("{}{}{}", prefix, i, suffix))? {
                pins.push(pin);
            }
        }
        if !pins.is_empty() && pins.len() != tool_count {
            return Err(ConfigError::ValidationError(format!(
                "Section [{}] configures {} of {} '{}<n>{}' pins; configure all or none",
                section,
                pins.len(),
                tool_count,
                prefix,
                suffix
            )));
        }
        Ok(pins)
    }

    /// Every slot has its own parking sensor.
    pub fn has_tool_endstops(&self) -> bool {
        !self.parking_tool_endstop_pins.is_empty()
    }

    pub fn has_feeder_sensors(&self) -> bool {
        !self.feeder_sensor_pins.is_empty()
    }

    pub fn rest_zone(&self) -> Zone {
        self.parking_sensing.rest_zone()
    }

    pub fn variable_name(&self, suffix: &str) -> String {
        format!("{}_{}", self.name, suffix)
    }
}
