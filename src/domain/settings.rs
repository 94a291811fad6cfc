use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_false")]
    pub show_file_line: bool,
    #[serde(default = "default_true")]
    pub show_thread_ids: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_false(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_false(),
            show_thread_ids: default_true(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "accessory_launcher".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

/// How the owning service is started once an accessory is authorized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSettings {
    /// Executable of the long-running device service. Empty disables spawning.
    #[serde(default)]
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Prefix of the environment variables carrying the accessory descriptor.
    #[serde(default = "default_env_prefix")]
    pub env_prefix: String,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            program: String::new(),
            args: Vec::new(),
            env_prefix: default_env_prefix(),
        }
    }
}

fn default_env_prefix() -> String {
    "ACCESSORY_".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    // Logging Settings
    #[serde(default)]
    pub log_settings: LogSettings,

    // Service Settings
    #[serde(default)]
    pub service: ServiceSettings,

    // Permission Settings
    /// Cancel a coordinator still waiting for the user after this long.
    #[serde(default)]
    pub permission_timeout_ms: Option<u64>,

    #[serde(default = "default_true")]
    pub notify_on_detect: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_settings: LogSettings::default(),
            service: ServiceSettings::default(),
            permission_timeout_ms: None,
            notify_on_detect: default_true(),
        }
    }
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::load(settings_path))
    }

    /// Load from an explicit path, falling back to defaults when the file is
    /// missing or unreadable.
    pub fn load(settings_path: PathBuf) -> Self {
        let settings = match Self::load_from_file(&settings_path) {
            Ok(settings) => settings,
            Err(e) => {
                // Logging is not up yet at this point.
                if settings_path.exists() {
                    eprintln!(
                        "Ignoring unreadable settings {}: {}",
                        settings_path.display(),
                        e
                    );
                }
                Settings::default()
            }
        };

        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("AccessoryLauncher");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_settings_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "accessory_launcher_{}_{}.json",
            name,
            std::process::id()
        ))
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let path = temp_settings_path("missing");
        let _ = fs::remove_file(&path);

        let service = SettingsService::load(path);
        assert_eq!(service.get().log_settings.level, "info");
        assert_eq!(service.get().service.env_prefix, "ACCESSORY_");
        assert!(service.get().permission_timeout_ms.is_none());
        assert!(service.get().notify_on_detect);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let path = temp_settings_path("partial");
        fs::write(
            &path,
            r#"{ "service": { "program": "/usr/bin/vehicle-server" }, "permission_timeout_ms": 5000 }"#,
        )
        .unwrap();

        let service = SettingsService::load(path.clone());
        assert_eq!(service.get().service.program, "/usr/bin/vehicle-server");
        assert_eq!(service.get().service.env_prefix, "ACCESSORY_");
        assert_eq!(service.get().permission_timeout_ms, Some(5000));
        assert!(service.get().log_settings.console_logging_enabled);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_save_then_load() {
        let path = temp_settings_path("save");
        let mut service = SettingsService::load(path.clone());
        service.settings.notify_on_detect = false;
        service.settings.service.args = vec!["--verbose".to_string()];
        service.save().unwrap();

        let reloaded = SettingsService::load(path.clone());
        assert!(!reloaded.get().notify_on_detect);
        assert_eq!(reloaded.get().service.args, vec!["--verbose".to_string()]);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_malformed_file_yields_defaults() {
        let path = temp_settings_path("malformed");
        fs::write(&path, "{ not json").unwrap();

        let service = SettingsService::load(path.clone());
        assert!(service.get().service.program.is_empty());

        let _ = fs::remove_file(&path);
    }
}
