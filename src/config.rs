/*
 * This file is part of Hyperfan.
 *
 * Copyright (C) 2025 Hyperfan contributors
 *
 * Hyperfan is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Hyperfan is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Hyperfan. If not, see <https://www.gnu.org/licenses/>.
 */

use std::collections::HashMap;
use std::env;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::calibration::{Params, DEFAULT_PWM_STEP, DEFAULT_STALL_RPM};
use crate::error::{Result, SensorError};
use crate::sensors::{PwmConfig, PwmModes, SensorId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Sensor poll period
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Delay between two calibration steps
    #[serde(default = "default_test_interval_ms")]
    pub test_interval_ms: u64,
    #[serde(default = "default_pwm_step")]
    pub pwm_step: u8,
    #[serde(default = "default_stall_rpm")]
    pub stall_rpm: i64,
    #[serde(default = "default_manual_mode")]
    pub manual_mode: i32,
    #[serde(default = "default_automatic_mode")]
    pub automatic_mode: i32,
    /// User-chosen display names, keyed by sensor id ("temp1", "pwm2", ...)
    #[serde(default)]
    pub names: HashMap<String, String>,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_test_interval_ms() -> u64 {
    1000
}

fn default_pwm_step() -> u8 {
    DEFAULT_PWM_STEP
}

fn default_stall_rpm() -> i64 {
    DEFAULT_STALL_RPM
}

fn default_manual_mode() -> i32 {
    PwmModes::default().manual
}

fn default_automatic_mode() -> i32 {
    PwmModes::default().automatic
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            test_interval_ms: default_test_interval_ms(),
            pwm_step: default_pwm_step(),
            stall_rpm: default_stall_rpm(),
            manual_mode: default_manual_mode(),
            automatic_mode: default_automatic_mode(),
            names: HashMap::new(),
        }
    }
}

impl Settings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn pwm_config(&self) -> PwmConfig {
        PwmConfig {
            modes: PwmModes { manual: self.manual_mode, automatic: self.automatic_mode },
            calibration: Params { step: self.pwm_step, stall_rpm: self.stall_rpm },
            test_interval: Duration::from_millis(self.test_interval_ms),
        }
    }

    pub fn name_for(&self, id: SensorId) -> Option<&str> {
        self.names.get(&id.to_string()).map(String::as_str)
    }
}

pub fn config_path() -> PathBuf {
    if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
        return Path::new(&xdg).join("fancal").join("settings.json");
    }
    if let Ok(home) = env::var("HOME") {
        return Path::new(&home)
            .join(".config")
            .join("fancal")
            .join("settings.json");
    }
    system_config_path()
}

pub fn system_config_path() -> PathBuf {
    PathBuf::from("/etc/fancal/settings.json")
}

fn is_safe_name(s: &str) -> bool {
    if s.is_empty() || s.len() > 128 {
        return false;
    }
    !s.chars().any(|c| c.is_control())
}

pub fn validate_settings(cfg: &Settings) -> std::result::Result<(), String> {
    if !(50..=60_000).contains(&cfg.poll_interval_ms) {
        return Err("poll_interval_ms out of range (50..60000)".to_string());
    }
    if !(50..=60_000).contains(&cfg.test_interval_ms) {
        return Err("test_interval_ms out of range (50..60000)".to_string());
    }
    if cfg.pwm_step == 0 || cfg.pwm_step > 64 {
        return Err("pwm_step out of range (1..64)".to_string());
    }
    if cfg.stall_rpm < 0 {
        return Err("stall_rpm must not be negative".to_string());
    }
    if cfg.manual_mode == cfg.automatic_mode {
        return Err("manual_mode and automatic_mode must differ".to_string());
    }
    if cfg.names.len() > 1024 {
        return Err("too many names".to_string());
    }
    for (k, v) in &cfg.names {
        if SensorId::parse(k).is_none() {
            return Err(format!("invalid sensor key '{}'", k));
        }
        if !is_safe_name(v) {
            return Err(format!("invalid name for {}", k));
        }
    }
    Ok(())
}

/// Load from the user config path. Missing or invalid files yield `None`.
pub fn load_settings() -> Option<Settings> {
    load_settings_from(config_path()).ok()
}

pub fn load_settings_from<P: AsRef<Path>>(path: P) -> Result<Settings> {
    let path = path.as_ref();
    let data = fs::read_to_string(path).map_err(|e| SensorError::io(path, e))?;
    let cfg: Settings = serde_json::from_str(&data)?;
    validate_settings(&cfg).map_err(SensorError::Config)?;
    Ok(cfg)
}

pub fn save_settings_to<P: AsRef<Path>>(path: P, cfg: &Settings) -> Result<()> {
    validate_settings(cfg).map_err(SensorError::Config)?;
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| SensorError::io(parent, e))?;
    }
    let json = serde_json::to_string_pretty(cfg)?;
    fs::write(path, json).map_err(|e| SensorError::io(path, e))?;
    // Best-effort set permissions to 0644
    let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o644));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::SensorKind;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_defaults_are_valid() {
        let cfg = Settings::default();
        assert!(validate_settings(&cfg).is_ok());
        let pwm = cfg.pwm_config();
        assert_eq!(pwm, PwmConfig::default());
        assert_eq!(cfg.poll_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{ "pwm_step": 2, "names": {{ "pwm1": "CPU Fan" }} }}"#).unwrap();
        let cfg = load_settings_from(file.path()).unwrap();
        assert_eq!(cfg.pwm_step, 2);
        assert_eq!(cfg.test_interval_ms, 1000);
        assert_eq!(cfg.name_for(SensorId::new(SensorKind::PwmFan, 1)), Some("CPU Fan"));
        assert_eq!(cfg.name_for(SensorId::new(SensorKind::Fan, 1)), None);
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{ "pwm_stepp": 2 }}"#).unwrap();
        assert!(matches!(load_settings_from(file.path()), Err(SensorError::Json(_))));
    }

    #[test]
    fn test_validation() {
        let mut cfg = Settings { pwm_step: 0, ..Settings::default() };
        assert!(validate_settings(&cfg).is_err());
        cfg.pwm_step = 5;
        cfg.automatic_mode = cfg.manual_mode;
        assert!(validate_settings(&cfg).is_err());
        cfg.automatic_mode = 2;
        cfg.names.insert("volt1".to_string(), "x".to_string());
        assert!(validate_settings(&cfg).unwrap_err().contains("volt1"));
        cfg.names.clear();
        cfg.names.insert("temp1".to_string(), "bad\nname".to_string());
        assert!(validate_settings(&cfg).is_err());
        cfg.names.clear();
        cfg.test_interval_ms = 10;
        assert!(validate_settings(&cfg).is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/settings.json");
        let mut cfg = Settings::default();
        cfg.stall_rpm = 200;
        cfg.names.insert("temp2".to_string(), "Water".to_string());
        save_settings_to(&path, &cfg).unwrap();
        assert_eq!(load_settings_from(&path).unwrap(), cfg);
    }

    #[test]
    fn test_save_rejects_invalid() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        let cfg = Settings { stall_rpm: -1, ..Settings::default() };
        assert!(matches!(save_settings_to(&path, &cfg), Err(SensorError::Config(_))));
        assert!(!path.exists());
    }

    #[test]
    #[serial]
    fn test_config_path_prefers_xdg() {
        let old = env::var("XDG_CONFIG_HOME").ok();
        env::set_var("XDG_CONFIG_HOME", "/tmp/xdg-test");
        assert_eq!(config_path(), PathBuf::from("/tmp/xdg-test/fancal/settings.json"));
        match old {
            Some(v) => env::set_var("XDG_CONFIG_HOME", v),
            None => env::remove_var("XDG_CONFIG_HOME"),
        }
    }
}
