use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::model::history::{DEFAULT_CAPACITY, DEFAULT_CHART_WINDOW};
use crate::model::view::{Expansion, SortKey, SortState, ViewState};
use crate::monitor::MonitorSettings;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub history: HistoryConfig,
    pub view: ViewConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub refresh_rate_ms: u64,
    pub show_threads: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        GeneralConfig {
            refresh_rate_ms: 2000,
            show_threads: false,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub capacity: usize,
    pub chart_window: usize,
    pub prefill: bool,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        HistoryConfig {
            capacity: DEFAULT_CAPACITY,
            chart_window: DEFAULT_CHART_WINDOW,
            prefill: true,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ViewConfig {
    pub default_sort: String,
    pub descending: bool,
    pub tree_mode: bool,
    pub expand_all: bool,
}

impl Default for ViewConfig {
    fn default() -> Self {
        ViewConfig {
            default_sort: "cpu".to_string(),
            descending: true,
            tree_mode: false,
            expand_all: true,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Config {
    pub fn monitor_settings(&self) -> MonitorSettings {
        MonitorSettings {
            interval: Duration::from_millis(self.general.refresh_rate_ms),
            history_capacity: self.history.capacity,
            prefill_history: self.history.prefill,
        }
    }

    /// Initial view state. An unknown sort name falls back to CPU.
    pub fn view_state(&self) -> ViewState {
        let key = self.view.default_sort.parse().unwrap_or_else(|_| {
            tracing::warn!(sort = %self.view.default_sort, "unknown sort key in config, using cpu");
            SortKey::Cpu
        });
        ViewState {
            filter_text: String::new(),
            sort: SortState::new(key, self.view.descending),
            tree_mode: self.view.tree_mode,
            expansion: if self.view.expand_all {
                Expansion::all_expanded()
            } else {
                Expansion::all_collapsed()
            },
        }
    }
}

pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("vitals").join("config.toml"))
}

pub fn load_config() -> Config {
    match config_path() {
        Some(path) if path.exists() => load_config_from_path(&path),
        _ => Config::default(),
    }
}

pub fn load_config_from_path(path: &Path) -> Config {
    match std::fs::read_to_string(path) {
        Ok(contents) => toml::from_str(&contents).unwrap_or_else(|err| {
            tracing::warn!(path = %path.display(), %err, "invalid config, using defaults");
            Config::default()
        }),
        Err(_) => Config::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = Config::default();
        assert_eq!(config.general.refresh_rate_ms, 2000);
        assert!(!config.general.show_threads);
        assert_eq!(config.history.capacity, 900);
        assert_eq!(config.history.chart_window, 150);
        assert_eq!(config.view.default_sort, "cpu");
        assert!(config.view.descending);
        assert_eq!(config.logging.level, "info");
        assert!(config.history.prefill);
        assert!(config.monitor_settings().prefill_history);
    }

    #[test]
    fn parse_partial_toml() {
        let toml_str = r#"
[general]
refresh_rate_ms = 500
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.general.refresh_rate_ms, 500);
        // Other fields should be defaults
        assert_eq!(config.history.capacity, 900);
        assert!(config.view.expand_all);
    }

    #[test]
    fn parse_full_toml() {
        let toml_str = r#"
[general]
refresh_rate_ms = 1000
show_threads = true

[history]
capacity = 60
chart_window = 30
prefill = false

[view]
default_sort = "memory"
descending = false
tree_mode = true
expand_all = false

[logging]
level = "debug"
json = true
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert!(config.general.show_threads);
        assert_eq!(config.history.chart_window, 30);
        assert!(config.logging.json);

        let settings = config.monitor_settings();
        assert_eq!(settings.interval, Duration::from_secs(1));
        assert_eq!(settings.history_capacity, 60);
        assert!(!settings.prefill_history);

        let view = config.view_state();
        assert_eq!(view.sort, SortState::new(SortKey::MemoryBytes, false));
        assert!(view.tree_mode);
        assert!(!view.expansion.is_expanded(1));
    }

    #[test]
    fn unknown_sort_falls_back_to_cpu() {
        let config: Config = toml::from_str("[view]\ndefault_sort = \"colour\"\n").unwrap();
        assert_eq!(config.view_state().sort.key, SortKey::Cpu);
    }

    #[test]
    fn missing_file_returns_default() {
        let config = load_config_from_path(Path::new("/nonexistent/path/config.toml"));
        assert_eq!(config.general.refresh_rate_ms, 2000);
    }

    #[test]
    fn invalid_toml_returns_default() {
        let temp = std::env::temp_dir().join("vitals_test_invalid.toml");
        std::fs::write(&temp, "this is not valid toml {{{{").unwrap();
        let config = load_config_from_path(&temp);
        assert_eq!(config.general.refresh_rate_ms, 2000);
        let _ = std::fs::remove_file(&temp);
    }
}
