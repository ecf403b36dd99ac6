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

//! fancal - hwmon sensor polling and PWM fan calibration
//!
//! Sensors wrap the sysfs attribute files of one hwmon device. A
//! [`controller::Controller`] owns them, polls them on a timer and
//! drives the stop/start calibration of controllable fans.

pub mod calibration;
pub mod config;
pub mod controller;
pub mod error;
pub mod hwmon;
pub mod logger;
pub mod sensors;
pub mod service;
pub mod timer;

pub use error::{CalibrationError, Result, SensorError};

#[cfg(test)]
pub mod test_utils;
