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

use std::rc::{Rc, Weak};

use crate::error::Result;
use crate::hwmon::{self, Attribute, Device};
use super::{replace_if_changed, Field, Observer, Sensor, SensorBase, SensorId, SensorKind};

/// hwmon reports millidegrees Celsius.
const MILLIDEGREES_PER_DEGREE: i64 = 1000;

/// Read-only temperature input (`tempN_input`, optional `tempN_label`).
pub struct TempSensor {
    base: SensorBase,
    /// `None` until the first successful read
    value: Option<i32>,
    value_ch: Box<dyn Attribute>,
    label_ch: Option<Box<dyn Attribute>>,
}

impl TempSensor {
    pub fn new(parent: &Rc<Device>, index: u32) -> Self {
        let value_ch = Box::new(parent.channel(&hwmon::temp_input(index)));
        let label_ch = parent
            .optional_channel(&hwmon::temp_label(index))
            .map(|c| Box::new(c) as Box<dyn Attribute>);
        Self::with_channels(Rc::downgrade(parent), index, value_ch, label_ch)
    }

    pub fn with_channels(
        parent: Weak<Device>,
        index: u32,
        value_ch: Box<dyn Attribute>,
        label_ch: Option<Box<dyn Attribute>>,
    ) -> Self {
        Self {
            base: SensorBase::new(parent, SensorId::new(SensorKind::Temp, index)),
            value: None,
            value_ch,
            label_ch,
        }
    }

    pub fn label(&self) -> &str {
        self.base.label()
    }

    /// Whole degrees Celsius, truncated toward zero.
    pub fn value(&self) -> i32 {
        self.value.unwrap_or(0)
    }
}

impl Sensor for TempSensor {
    fn id(&self) -> SensorId {
        self.base.id()
    }

    fn parent(&self) -> Option<Rc<Device>> {
        self.base.parent()
    }

    fn name(&self) -> String {
        self.base.name()
    }

    fn set_name(&mut self, name: &str) {
        self.base.set_name(name);
    }

    fn update(&mut self) -> Result<()> {
        self.base.refresh_label(self.label_ch.as_deref());
        let raw = self.value_ch.read()?;
        let value = (raw / MILLIDEGREES_PER_DEGREE) as i32;
        if replace_if_changed(&mut self.value, Some(value)) {
            self.base.changed(Field::Value);
        }
        Ok(())
    }

    fn subscribe(&mut self, observer: Observer) {
        self.base.subscribe(observer);
    }
}
