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

//! Raw hwmon attribute access.
//!
//! Every hwmon attribute is one small text file holding one value:
//! - `tempN_input`: millidegrees Celsius
//! - `fanN_input`: RPM
//! - `pwmN`: duty cycle 0-255
//! - `pwmN_enable`: control mode (driver defined, usually 1 = manual, 2 = automatic)

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::error::{Result, SensorError};

/// One readable/writable device attribute.
#[cfg_attr(test, mockall::automock)]
pub trait Attribute {
    /// Read and parse the attribute as an integer.
    fn read(&self) -> Result<i64>;
    /// Serialize and write an integer to the attribute.
    fn write(&self, value: i64) -> Result<()>;
    /// Read the raw trimmed text content.
    fn read_text(&self) -> Result<String>;
    /// Human readable location, used in logs.
    fn describe(&self) -> String;
}

/// A handle to a single sysfs file. Nothing is cached: every call opens,
/// touches and closes the file.
#[derive(Debug, Clone)]
pub struct ValueChannel {
    path: PathBuf,
}

impl ValueChannel {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }
}

impl Attribute for ValueChannel {
    fn read(&self) -> Result<i64> {
        let text = self.read_text()?;
        text.parse::<i64>().map_err(|_| SensorError::Parse {
            path: self.path.clone(),
            content: text,
        })
    }

    fn write(&self, value: i64) -> Result<()> {
        // sysfs attributes always exist; never create a regular file in their place
        let mut f = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&self.path)
            .map_err(|e| SensorError::io(&self.path, e))?;
        f.write_all(value.to_string().as_bytes())
            .map_err(|e| SensorError::io(&self.path, e))
    }

    fn read_text(&self) -> Result<String> {
        read_trimmed(&self.path).map_err(|e| SensorError::io(&self.path, e))
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

fn read_trimmed<P: AsRef<Path>>(p: P) -> std::io::Result<String> {
    let mut s = String::new();
    File::open(p)?.read_to_string(&mut s)?;
    Ok(s.trim().to_string())
}

/// A hwmon device directory, e.g. `/sys/class/hwmon/hwmon2`. Owns nothing but
/// its identity; sensors refer back to it weakly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    path: PathBuf,
    name: String,
}

impl Device {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let dir = fs::canonicalize(&path).unwrap_or_else(|_| path.clone());
        let name = read_trimmed(dir.join("name")).unwrap_or_else(|_| {
            dir.file_name()
                .and_then(|s| s.to_str())
                .unwrap_or("hwmon?")
                .to_string()
        });
        Self { path, name }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn channel(&self, file: &str) -> ValueChannel {
        ValueChannel::new(self.path.join(file))
    }

    /// Like `channel`, but only if the file is present.
    pub fn optional_channel(&self, file: &str) -> Option<ValueChannel> {
        let ch = self.channel(file);
        ch.exists().then_some(ch)
    }
}

pub fn temp_input(idx: u32) -> String {
    format!("temp{}_input", idx)
}

pub fn temp_label(idx: u32) -> String {
    format!("temp{}_label", idx)
}

pub fn fan_input(idx: u32) -> String {
    format!("fan{}_input", idx)
}

pub fn fan_label(idx: u32) -> String {
    format!("fan{}_label", idx)
}

pub fn pwm_value(idx: u32) -> String {
    format!("pwm{}", idx)
}

pub fn pwm_enable(idx: u32) -> String {
    format!("pwm{}_enable", idx)
}

pub fn extract_index(fname: &str, prefix: &str, suffix: &str) -> Option<u32> {
    fname
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_suffix(suffix))
        .and_then(|mid| mid.parse().ok())
}
