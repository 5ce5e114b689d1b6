// rmmu_host/src/configfile.rs
// Reads the printer configuration that describes one or more RMMU units.

use std::collections::HashMap;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    SectionNotFound(String),
    OptionNotFound(String, String),
    ParseError(String, String, String), // option, value, type_expected
    ValidationError(String), // General validation like min/max
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::SectionNotFound(s) => write!(f, "Section not found: [{}]", s),
            ConfigError::OptionNotFound(s, o) => write!(f, "Option '{}' not found in section '[{}]'", o, s),
            ConfigError::ParseError(o, v, t) => write!(f, "Failed to parse option '{}' value '{}' as {}", o, v, t),
            ConfigError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Default, Clone)]
pub struct Configfile {
    // section_name -> { option_name -> raw value }, names stored lowercase.
    data: HashMap<String, HashMap<String, String>>,
    // Sections in the order they first appeared; units are aggregated in this order.
    order: Vec<String>,
    filename: Option<String>,
}

impl Configfile {
    pub fn new(filename: Option<String>) -> Self {
        Configfile {
            data: HashMap::new(),
            order: Vec::new(),
            filename,
        }
    }

    pub fn from_file(path: &str) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Unable to read config file '{}': {}", path, e))?;
        let mut cf = Configfile::new(Some(path.to_string()));
        cf.parse(&content)?;
        Ok(cf)
    }

    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    /// Parses an INI-style configuration string.
    pub fn parse(&mut self, config_content: &str) -> Result<(), String> {
        self.data.clear();
        self.order.clear();
        let mut current_section_name: Option<String> = None;

        for line_raw in config_content.lines() {
            let line_no_comment = match line_raw.find(|c| c == '#' || c == ';') {
                Some(index) => &line_raw[..index],
                None => line_raw,
            };
            let line = line_no_comment.trim();

            if line.is_empty() {
                continue;
            }

            if line.starts_with('[') && line.ends_with(']') {
                // "rmmu rmmu_t0" keeps its type prefix; whitespace runs collapse to one space.
                let section_name = line[1..line.len() - 1]
                    .split_whitespace()
                    .collect::<Vec<_>>()
                    .join(" ")
                    .to_lowercase();
                if section_name.is_empty() {
                    return Err("Empty section name found".to_string());
                }
                self.add_section(&section_name);
                current_section_name = Some(section_name);
                continue;
            }

            let section_name = match current_section_name {
                Some(ref name) => name.clone(),
                None => return Err(format!("Line outside of section: {}", line_raw)),
            };

            // Accept both "key = value" and "key: value", whichever separator comes first.
            let split_at = line.find(|c| c == '=' || c == ':');
            let (key, value) = match split_at {
                Some(idx) => (line[..idx].trim().to_lowercase(), line[idx + 1..].trim().to_string()),
                None => return Err(format!("Malformed line in section [{}]: {}", section_name, line_raw)),
            };
            if key.is_empty() {
                return Err(format!("Empty key found in section [{}]", section_name));
            }
            self.set(&section_name, &key, &value);
        }
        Ok(())
    }

    pub fn has_section(&self, section: &str) -> bool {
        self.data.contains_key(&section.to_lowercase())
    }

    /// Section names starting with `prefix`, in file order.
    pub fn get_prefix_sections(&self, prefix: &str) -> Vec<String> {
        let prefix = prefix.to_lowercase();
        self.order
            .iter()
            .filter(|name| name.starts_with(&prefix))
            .cloned()
            .collect()
    }

    pub fn add_section(&mut self, section_name: &str) {
        let name = section_name.to_lowercase();
        if !self.data.contains_key(&name) {
            self.order.push(name.clone());
            self.data.insert(name, HashMap::new());
        }
    }

    pub fn set(&mut self, section: &str, option: &str, value: &str) {
        self.add_section(section);
        if let Some(options) = self.data.get_mut(&section.to_lowercase()) {
            options.insert(option.to_lowercase(), value.to_string());
        }
    }

    fn get_str(&self, section: &str, option: &str) -> Result<&String, ConfigError> {
        self.data
            .get(&section.to_lowercase())
            .ok_or_else(|| ConfigError::SectionNotFound(section.to_string()))?
            .get(&option.to_lowercase())
            .ok_or_else(|| ConfigError::OptionNotFound(section.to_string(), option.to_string()))
    }

    pub fn get(&self, section: &str, option: &str, default: Option<&str>) -> Result<String, ConfigError> {
        match self.get_str(section, option) {
            Ok(s) => Ok(s.clone()),
            Err(ConfigError::OptionNotFound(..)) if default.is_some() => Ok(default.unwrap_or_default().to_string()),
            Err(e) => Err(e),
        }
    }

    /// Like `get` but a missing option is `None` instead of an error.
    pub fn get_optional(&self, section: &str, option: &str) -> Result<Option<String>, ConfigError> {
        match self.get_str(section, option) {
            Ok(s) => Ok(Some(s.clone())),
            Err(ConfigError::OptionNotFound(..)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn get_parsed<T>(&self, section: &str, option: &str, default: Option<T>, type_name: &str) -> Result<T, ConfigError>
    where
        T: FromStr,
    {
        match self.get_str(section, option) {
            Ok(s) => s
                .parse::<T>()
                .map_err(|_| ConfigError::ParseError(option.to_string(), s.clone(), type_name.to_string())),
            Err(ConfigError::OptionNotFound(..)) => {
                default.ok_or_else(|| ConfigError::OptionNotFound(section.to_string(), option.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    fn check_range<T>(section: &str, option: &str, value: T, minval: Option<T>, maxval: Option<T>) -> Result<T, ConfigError>
    where
        T: PartialOrd + std::fmt::Display + Copy,
    {
        if let Some(min) = minval {
            if value < min {
                return Err(ConfigError::ValidationError(format!(
                    "Option '{}' in section '[{}]' ({}) must be >= {}", option, section, value, min
                )));
            }
        }
        if let Some(max) = maxval {
            if value > max {
                return Err(ConfigError::ValidationError(format!(
                    "Option '{}' in section '[{}]' ({}) must be <= {}", option, section, value, max
                )));
            }
        }
        Ok(value)
    }

    pub fn getfloat(&self, section: &str, option: &str, default: Option<f64>, minval: Option<f64>, maxval: Option<f64>) -> Result<f64, ConfigError> {
        let value = self.get_parsed(section, option, default, "float")?;
        Self::check_range(section, option, value, minval, maxval)
    }

    pub fn getint(&self, section: &str, option: &str, default: Option<i64>, minval: Option<i64>, maxval: Option<i64>) -> Result<i64, ConfigError> {
        let value = self.get_parsed(section, option, default, "integer")?;
        Self::check_range(section, option, value, minval, maxval)
    }

    pub fn getboolean(&self, section: &str, option: &str, default: Option<bool>) -> Result<bool, ConfigError> {
        match self.get_str(section, option) {
            Ok(s_val) => match s_val.to_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => Ok(true),
                "false" | "no" | "off" | "0" => Ok(false),
                _ => Err(ConfigError::ParseError(option.to_string(), s_val.clone(), "boolean".to_string())),
            },
            Err(ConfigError::OptionNotFound(..)) => {
                default.ok_or_else(|| ConfigError::OptionNotFound(section.to_string(), option.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    /// Comma separated list of raw strings; empty entries are dropped.
    pub fn getlist(&self, section: &str, option: &str, default: Option<Vec<String>>) -> Result<Vec<String>, ConfigError> {
        match self.get_str(section, option) {
            Ok(s) => Ok(s
                .split(',')
                .map(|item| item.trim())
                .filter(|item| !item.is_empty())
                .map(|item| item.to_string())
                .collect()),
            Err(ConfigError::OptionNotFound(..)) => {
                default.ok_or_else(|| ConfigError::OptionNotFound(section.to_string(), option.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    pub fn getfloatlist(&self, section: &str, option: &str, default: Option<Vec<f64>>) -> Result<Vec<f64>, ConfigError> {
        let raw = match self.getlist(section, option, None) {
            Ok(items) => items,
            Err(ConfigError::OptionNotFound(..)) => {
                return default.ok_or_else(|| ConfigError::OptionNotFound(section.to_string(), option.to_string()));
            }
            Err(e) => return Err(e),
        };
        raw.iter()
            .map(|item| {
                item.parse::<f64>()
                    .map_err(|_| ConfigError::ParseError(option.to_string(), item.clone(), "float".to_string()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_parsed_config(content: &str) -> Configfile {
        let mut cf = Configfile::new(None);
        cf.parse(content).unwrap();
        cf
    }

    #[test]
    fn test_parse_unit_sections() {
        let content = "[rmmu rmmu_t0]\ntool_count: 4\nreverse_bowden_length = 620\n\n[RMMU   rmmu_t1]\ntool_count: 2";
        let cf = create_parsed_config(content);

        assert_eq!(cf.getint("rmmu rmmu_t0", "tool_count", None, None, None).unwrap(), 4);
        assert_eq!(cf.getfloat("rmmu rmmu_t0", "REVERSE_BOWDEN_LENGTH", None, None, None).unwrap(), 620.0);
        assert_eq!(cf.getint("rmmu rmmu_t1", "tool_count", None, None, None).unwrap(), 2);
        assert_eq!(cf.get_prefix_sections("rmmu "), vec!["rmmu rmmu_t0".to_string(), "rmmu rmmu_t1".to_string()]);
    }

    #[test]
    fn test_parse_with_comments_and_pins() {
        let content = r#"
# full line comment
[rmmu rmmu_t0] ; trailing comment
  parking_endstop_pin: ^PB5   # shared ptfe adapter sensor
  ; idler_speed = 10
[rmmu_hub]
"#;
        let cf = create_parsed_config(content);
        assert_eq!(cf.get("rmmu rmmu_t0", "parking_endstop_pin", None).unwrap(), "^PB5");
        assert_eq!(cf.get_optional("rmmu rmmu_t0", "idler_speed").unwrap(), None);
        assert!(cf.has_section("rmmu_hub"));
    }

    #[test]
    fn test_getters_with_defaults() {
        let cf = create_parsed_config("[types]\nmyfloat = 3.5\nmybool = No\npositions: 102, 76,50 ,24");

        assert_eq!(cf.getfloat("types", "myfloat", None, None, None).unwrap(), 3.5);
        assert!(!cf.getboolean("types", "mybool", None).unwrap());
        assert_eq!(cf.getfloatlist("types", "positions", None).unwrap(), vec![102.0, 76.0, 50.0, 24.0]);

        assert_eq!(cf.get("types", "nonexistent", Some("fallback")).unwrap(), "fallback");
        assert_eq!(cf.getint("types", "missing_int", Some(100), None, None).unwrap(), 100);
        assert!(cf.getboolean("types", "missing_bool", Some(true)).unwrap());
        assert_eq!(cf.getfloatlist("types", "missing_list", Some(vec![1.0])).unwrap(), vec![1.0]);

        assert!(cf.get("types", "required_missing", None).is_err());
        assert!(matches!(
            cf.getfloat("nosection", "x", Some(1.0), None, None),
            Err(ConfigError::SectionNotFound(_))
        ));
    }

    #[test]
    fn test_range_validation() {
        let cf = create_parsed_config("[validation]\nval = 10.0\ncount = 0");
        assert_eq!(cf.getfloat("validation", "val", None, Some(0.0), Some(20.0)).unwrap(), 10.0);

        match cf.getfloat("validation", "val", None, Some(15.0), None) {
            Err(ConfigError::ValidationError(msg)) => assert!(msg.contains("must be >= 15")),
            other => panic!("Expected ValidationError for minval, got {:?}", other),
        }
        match cf.getint("validation", "count", None, Some(1), None) {
            Err(ConfigError::ValidationError(msg)) => assert!(msg.contains("must be >= 1")),
            other => panic!("Expected ValidationError for minval, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_errors() {
        assert!(Configfile::new(None).parse("[]\nkey=val").is_err());
        assert!(Configfile::new(None).parse("[sec]\n=val").is_err());
        assert!(Configfile::new(None).parse("[sec]\njustavalue").is_err());
        assert!(Configfile::new(None).parse("key=val").is_err());

        let cf = create_parsed_config("[sec]\nflag = maybe\nlist = 1,x");
        assert!(matches!(cf.getboolean("sec", "flag", None), Err(ConfigError::ParseError(..))));
        assert!(matches!(cf.getfloatlist("sec", "list", None), Err(ConfigError::ParseError(..))));
    }

    #[test]
    fn test_from_file_keeps_filename() {
        let path = std::env::temp_dir().join(format!("rmmu_config_{}.cfg", std::process::id()));
        std::fs::write(&path, "[rmmu rmmu_t0]\ntool_count: 2\n").unwrap();
        let path = path.to_str().unwrap().to_string();

        let cf = Configfile::from_file(&path).unwrap();
        assert_eq!(cf.filename(), Some(path.as_str()));
        assert_eq!(cf.getint("rmmu rmmu_t0", "tool_count", None, None, None).unwrap(), 2);
        assert_eq!(create_parsed_config("[a]\nb = 1").filename(), None);

        std::fs::remove_file(&path).unwrap();
        assert!(Configfile::from_file(&path).is_err());
    }
}
