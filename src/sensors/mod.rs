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

//! Typed sensors on top of raw hwmon attributes.
//!
//! Three kinds exist: temperature inputs, fan tachometers and PWM
//! controlled fans. All of them are polled through [`Sensor::update`] and
//! report every attribute change to subscribed observers.

use std::fmt;
use std::rc::{Rc, Weak};

use crate::calibration::Thresholds;
use crate::error::{CalibrationError, Result};
use crate::hwmon::{Attribute, Device};

pub mod fan;
pub mod pwm_fan;
pub mod temp;

pub use fan::FanSensor;
pub use pwm_fan::{PwmConfig, PwmFanSensor, PwmModes, TestProgress};
pub use temp::TempSensor;

/// Duty cycle of a fan that cannot be throttled.
pub const FULL_SPEED: u8 = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SensorKind {
    Temp,
    Fan,
    PwmFan,
}

impl SensorKind {
    pub fn prefix(self) -> &'static str {
        match self {
            SensorKind::Temp => "temp",
            SensorKind::Fan => "fan",
            SensorKind::PwmFan => "pwm",
        }
    }
}

/// Identity of a sensor within its device. Displays as `temp1`, `fan2`, `pwm3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SensorId {
    pub kind: SensorKind,
    pub index: u32,
}

impl SensorId {
    pub fn new(kind: SensorKind, index: u32) -> Self {
        Self { kind, index }
    }

    /// Parse the display form back, e.g. `"pwm2"`.
    pub fn parse(s: &str) -> Option<Self> {
        [SensorKind::Temp, SensorKind::Fan, SensorKind::PwmFan]
            .into_iter()
            .find_map(|kind| {
                crate::hwmon::extract_index(s, kind.prefix(), "").map(|index| Self { kind, index })
            })
    }
}

impl fmt::Display for SensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind.prefix(), self.index)
    }
}

/// Every observable attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Name,
    Label,
    Value,
    Rpm,
    Pwm,
    PwmMode,
    Temp,
    HasTemp,
    MinTemp,
    MaxTemp,
    MinPwm,
    MaxPwm,
    MinStart,
    MinStop,
    Active,
    Testing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Changed(Field),
    CalibrationFinished(Thresholds),
    CalibrationFailed(CalibrationError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorEvent {
    pub sensor: SensorId,
    pub kind: EventKind,
}

pub type Observer = Box<dyn FnMut(&SensorEvent)>;

/// Observer list of one sensor.
#[derive(Default)]
pub struct Notifier {
    observers: Vec<Observer>,
}

impl Notifier {
    pub fn subscribe(&mut self, observer: Observer) {
        self.observers.push(observer);
    }

    pub fn emit(&mut self, event: SensorEvent) {
        for observer in self.observers.iter_mut() {
            observer(&event);
        }
    }
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier").field("observers", &self.observers.len()).finish()
    }
}

/// Identity, naming and notification state shared by all sensor kinds.
#[derive(Debug)]
pub(crate) struct SensorBase {
    parent: Weak<Device>,
    id: SensorId,
    label: String,
    name_override: Option<String>,
    notifier: Notifier,
}

impl SensorBase {
    pub(crate) fn new(parent: Weak<Device>, id: SensorId) -> Self {
        Self { parent, id, label: String::new(), name_override: None, notifier: Notifier::default() }
    }

    pub(crate) fn id(&self) -> SensorId {
        self.id
    }

    pub(crate) fn parent(&self) -> Option<Rc<Device>> {
        self.parent.upgrade()
    }

    pub(crate) fn label(&self) -> &str {
        &self.label
    }

    /// Override, else device label, else the sensor id.
    pub(crate) fn name(&self) -> String {
        match &self.name_override {
            Some(n) => n.clone(),
            None if !self.label.is_empty() => self.label.clone(),
            None => self.id.to_string(),
        }
    }

    /// An empty name drops the override.
    pub(crate) fn set_name(&mut self, name: &str) {
        let name = name.trim();
        let new = (!name.is_empty()).then(|| name.to_string());
        if new != self.name_override {
            self.name_override = new;
            self.changed(Field::Name);
        }
    }

    /// Re-read the optional label file. A missing or unreadable label is not a fault.
    pub(crate) fn refresh_label(&mut self, channel: Option<&dyn Attribute>) {
        let Some(ch) = channel else { return };
        let Ok(label) = ch.read_text() else { return };
        if label != self.label {
            let name_follows = self.name_override.is_none();
            self.label = label;
            self.changed(Field::Label);
            if name_follows {
                self.changed(Field::Name);
            }
        }
    }

    pub(crate) fn subscribe(&mut self, observer: Observer) {
        self.notifier.subscribe(observer);
    }

    pub(crate) fn changed(&mut self, field: Field) {
        self.emit(EventKind::Changed(field));
    }

    pub(crate) fn emit(&mut self, kind: EventKind) {
        let sensor = self.id;
        self.notifier.emit(SensorEvent { sensor, kind });
    }
}

/// Store `value` into `slot`. Returns whether it changed.
pub(crate) fn replace_if_changed<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        false
    } else {
        *slot = value;
        true
    }
}

/// Common contract of every sensor.
pub trait Sensor {
    fn id(&self) -> SensorId;

    fn index(&self) -> u32 {
        self.id().index
    }

    /// The owning device, if it is still alive.
    fn parent(&self) -> Option<Rc<Device>>;

    fn name(&self) -> String;

    fn set_name(&mut self, name: &str);

    /// Poll the device once.
    fn update(&mut self) -> Result<()>;

    fn subscribe(&mut self, observer: Observer);
}

/// A sensor that reports rotation speed.
pub trait Fan: Sensor {
    fn rpm(&self) -> i32;

    fn pwm(&self) -> u8 {
        FULL_SPEED
    }

    /// Ignored by fans without PWM control.
    fn set_pwm(&mut self, _value: i32, _write: bool) -> Result<()> {
        Ok(())
    }
}
