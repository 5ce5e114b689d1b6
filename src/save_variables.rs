// rmmu_host/src/save_variables.rs

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde_json::Value;

use crate::core_traits::VariableStore;

#[derive(Debug, Default, Clone)]
pub struct MemoryVariables {
    values: BTreeMap<String, Value>,
}

impl MemoryVariables {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VariableStore for MemoryVariables {
    fn get(&self, name: &str) -> Option<Value> {
        self.values.get(&name.to_lowercase()).cloned()
    }

    fn set(&mut self, name: &str, value: Value) {
        self.values.insert(name.to_lowercase(), value);
    }
}

/// Variables kept in a JSON object on disk. The whole file is rewritten on every `set`.
#[derive(Debug)]
pub struct JsonFileVariables {
    path: PathBuf,
    values: BTreeMap<String, Value>,
}

impl JsonFileVariables {
    /// Opens `path`, starting empty when the file does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, String> {
        let path = path.into();
        let values = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .map_err(|e| format!("Unable to read variables file {}: {}", path.display(), e))?;
            if content.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&content)
                    .map_err(|e| format!("Unable to parse variables file {}: {}", path.display(), e))?
            }
        } else {
            BTreeMap::new()
        };
        Ok(Self { path, values })
    }

    fn flush(&self) -> Result<(), String> {
        let content = serde_json::to_string_pretty(&self.values).map_err(|e| e.to_string())?;
        std::fs::write(&self.path, content).map_err(|e| e.to_string())
    }
}

impl VariableStore for JsonFileVariables {
    fn get(&self, name: &str) -> Option<Value> {
        self.values.get(&name.to_lowercase()).cloned()
    }

    fn set(&mut self, name: &str, value: Value) {
        self.values.insert(name.to_lowercase(), value);
        if let Err(e) = self.flush() {
            log::error!("Unable to save variables to {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn memory_variables_are_case_insensitive() {
        let mut vars = MemoryVariables::new();
        vars.set("RMMU_T0_loaded_filament", json!(2));
        assert_eq!(vars.get("rmmu_t0_loaded_filament"), Some(json!(2)));
        assert_eq!(vars.get("missing"), None);
    }

    #[test]
    fn json_file_variables_persist_across_open() {
        let path = std::env::temp_dir().join(format!("rmmu_vars_{}.json", std::process::id()));
        let _ = std::fs::remove_file(&path);

        let mut vars = JsonFileVariables::open(&path).unwrap();
        vars.set("rmmu_t0_reverse_bowden_length", json!(612.5));
        drop(vars);

        let reopened = JsonFileVariables::open(&path).unwrap();
        assert_eq!(reopened.get("rmmu_t0_reverse_bowden_length"), Some(json!(612.5)));
        let _ = std::fs::remove_file(&path);
    }
}
