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
use super::{replace_if_changed, EventKind, Fan, Field, Observer, Sensor, SensorBase, SensorId, SensorKind};

/// Tachometer-only fan (`fanN_input`, optional `fanN_label`).
pub struct FanSensor {
    pub(crate) base: SensorBase,
    rpm: Option<i32>,
    rpm_ch: Box<dyn Attribute>,
    label_ch: Option<Box<dyn Attribute>>,
}

impl FanSensor {
    pub fn new(parent: &Rc<Device>, index: u32) -> Self {
        Self::with_kind(parent, index, SensorKind::Fan)
    }

    /// PWM fans share the tachometer of the same index.
    pub(crate) fn with_kind(parent: &Rc<Device>, index: u32, kind: SensorKind) -> Self {
        let rpm_ch = Box::new(parent.channel(&hwmon::fan_input(index)));
        let label_ch = parent
            .optional_channel(&hwmon::fan_label(index))
            .map(|c| Box::new(c) as Box<dyn Attribute>);
        Self::with_channels(Rc::downgrade(parent), SensorId::new(kind, index), rpm_ch, label_ch)
    }

    pub fn with_channels(
        parent: Weak<Device>,
        id: SensorId,
        rpm_ch: Box<dyn Attribute>,
        label_ch: Option<Box<dyn Attribute>>,
    ) -> Self {
        Self { base: SensorBase::new(parent, id), rpm: None, rpm_ch, label_ch }
    }

    pub fn label(&self) -> &str {
        self.base.label()
    }

    /// Read the tachometer once and publish the result. Returns the new RPM.
    pub(crate) fn refresh(&mut self) -> Result<i32> {
        self.base.refresh_label(self.label_ch.as_deref());
        let rpm = self.rpm_ch.read()?.clamp(0, i32::MAX as i64) as i32;
        if replace_if_changed(&mut self.rpm, Some(rpm)) {
            self.base.changed(Field::Rpm);
        }
        Ok(rpm)
    }

    pub(crate) fn emit(&mut self, kind: EventKind) {
        self.base.emit(kind);
    }
}

impl Sensor for FanSensor {
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
        self.refresh().map(|_| ())
    }

    fn subscribe(&mut self, observer: Observer) {
        self.base.subscribe(observer);
    }
}

impl Fan for FanSensor {
    fn rpm(&self) -> i32 {
        self.rpm.unwrap_or(0)
    }
}
