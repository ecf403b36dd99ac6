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

//! Error types shared by every sensor operation.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::sensors::SensorId;

/// Result type alias using SensorError
pub type Result<T> = std::result::Result<T, SensorError>;

#[derive(Error, Debug)]
pub enum SensorError {
    // ============================================================================
    // Device attribute errors
    // ============================================================================
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: io::Error,
    },

    #[error("Malformed value in {path}: '{content}'")]
    Parse {
        path: PathBuf,
        content: String,
    },

    #[error("Permission denied on {0} - need root")]
    PermissionDenied(PathBuf),

    // ============================================================================
    // Sensor state errors
    // ============================================================================
    #[error("{0} is being calibrated")]
    Busy(SensorId),

    #[error("Unknown sensor: {0}")]
    UnknownSensor(String),

    #[error(transparent)]
    Calibration(#[from] CalibrationError),

    // ============================================================================
    // Configuration errors
    // ============================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl SensorError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        let path = path.into();
        if source.kind() == io::ErrorKind::PermissionDenied {
            SensorError::PermissionDenied(path)
        } else {
            SensorError::Io { path, source }
        }
    }

    /// True for failures of the device attribute itself (missing file,
    /// unreadable, rejected write, garbage content).
    pub fn is_io(&self) -> bool {
        matches!(
            self,
            SensorError::Io { .. } | SensorError::Parse { .. } | SensorError::PermissionDenied(_)
        )
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CalibrationError {
    #[error("fan did not stop before pwm reached {pwm}")]
    NeverStops { pwm: u8 },

    #[error("fan did not start at pwm {pwm}")]
    NeverStarts { pwm: u8 },

    #[error("calibration aborted")]
    Aborted,

    #[error("calibration already running")]
    AlreadyRunning,
}
