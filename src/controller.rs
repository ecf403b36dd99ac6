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

//! One hwmon device and the sensors it owns.
//!
//! Which indices exist is decided by the caller; the controller only
//! creates the sensors, polls them in index order and drives their
//! calibration timers.

use std::path::PathBuf;
use std::rc::Rc;
use std::time::{Duration, Instant};

use serde_json::json;

use crate::config::Settings;
use crate::error::{Result, SensorError};
use crate::hwmon::Device;
use crate::logger;
use crate::sensors::{
    FanSensor, PwmFanSensor, Sensor, SensorId, SensorKind, TempSensor, TestProgress,
};
use crate::timer::Timer;

/// A failed read of one sensor during a poll.
pub type Fault = (SensorId, SensorError);

#[derive(Debug, Default)]
pub struct TickReport {
    /// Whether the regular poll ran on this tick
    pub polled: bool,
    pub faults: Vec<Fault>,
    pub calibration: Vec<(SensorId, Result<TestProgress>)>,
}

pub struct Controller {
    device: Rc<Device>,
    temps: Vec<TempSensor>,
    fans: Vec<FanSensor>,
    pwm_fans: Vec<PwmFanSensor>,
    poll_timer: Timer,
}

fn sorted(indices: &[u32]) -> Vec<u32> {
    let mut v = indices.to_vec();
    v.sort_unstable();
    v.dedup();
    v
}

impl Controller {
    pub fn new(
        path: impl Into<PathBuf>,
        temps: &[u32],
        fans: &[u32],
        pwm_fans: &[u32],
        settings: &Settings,
    ) -> Self {
        let device = Rc::new(Device::new(path));
        let pwm_config = settings.pwm_config();
        let mut c = Self {
            temps: sorted(temps).into_iter().map(|i| TempSensor::new(&device, i)).collect(),
            fans: sorted(fans).into_iter().map(|i| FanSensor::new(&device, i)).collect(),
            pwm_fans: sorted(pwm_fans)
                .into_iter()
                .map(|i| PwmFanSensor::new(&device, i, pwm_config))
                .collect(),
            poll_timer: Timer::immediate(settings.poll_interval(), Instant::now()),
            device,
        };
        c.apply_names(settings);
        c
    }

    pub fn device(&self) -> &Rc<Device> {
        &self.device
    }

    pub fn temps(&self) -> &[TempSensor] {
        &self.temps
    }

    pub fn fans(&self) -> &[FanSensor] {
        &self.fans
    }

    pub fn pwm_fans(&self) -> &[PwmFanSensor] {
        &self.pwm_fans
    }

    pub fn temp(&self, index: u32) -> Option<&TempSensor> {
        self.temps.iter().find(|t| t.index() == index)
    }

    pub fn temp_mut(&mut self, index: u32) -> Option<&mut TempSensor> {
        self.temps.iter_mut().find(|t| t.index() == index)
    }

    pub fn fan(&self, index: u32) -> Option<&FanSensor> {
        self.fans.iter().find(|f| f.index() == index)
    }

    pub fn fan_mut(&mut self, index: u32) -> Option<&mut FanSensor> {
        self.fans.iter_mut().find(|f| f.index() == index)
    }

    pub fn pwm_fan(&self, index: u32) -> Option<&PwmFanSensor> {
        self.pwm_fans.iter().find(|p| p.index() == index)
    }

    pub fn pwm_fan_mut(&mut self, index: u32) -> Option<&mut PwmFanSensor> {
        self.pwm_fans.iter_mut().find(|p| p.index() == index)
    }

    fn pwm_fan_or_err(&mut self, index: u32) -> Result<&mut PwmFanSensor> {
        self.pwm_fan_mut(index)
            .ok_or_else(|| SensorError::UnknownSensor(SensorId::new(SensorKind::PwmFan, index).to_string()))
    }

    /// Every sensor, temps first, each kind in index order.
    pub fn sensors_mut(&mut self) -> impl Iterator<Item = &mut dyn Sensor> {
        self.temps
            .iter_mut()
            .map(|s| s as &mut dyn Sensor)
            .chain(self.fans.iter_mut().map(|s| s as &mut dyn Sensor))
            .chain(self.pwm_fans.iter_mut().map(|s| s as &mut dyn Sensor))
    }

    pub fn apply_names(&mut self, settings: &Settings) {
        for sensor in self.sensors_mut() {
            if let Some(name) = settings.name_for(sensor.id()) {
                sensor.set_name(name);
            }
        }
    }

    /// Associate a PWM fan with a temperature sensor of this device.
    pub fn set_fan_temp(&mut self, pwm_index: u32, temp_index: Option<u32>) -> Result<()> {
        if let Some(t) = temp_index {
            if self.temp(t).is_none() {
                return Err(SensorError::UnknownSensor(SensorId::new(SensorKind::Temp, t).to_string()));
            }
        }
        self.pwm_fan_or_err(pwm_index)?.set_temp(temp_index);
        Ok(())
    }

    pub fn temp_for(&self, pwm_index: u32) -> Option<&TempSensor> {
        self.pwm_fan(pwm_index)?.temp().and_then(|t| self.temp(t))
    }

    /// Drop associations that point at sensors this device does not have.
    fn reconcile_temps(&mut self) {
        let temps = &self.temps;
        for fan in self.pwm_fans.iter_mut() {
            if let Some(t) = fan.temp() {
                if !temps.iter().any(|s| s.index() == t) {
                    fan.set_temp(None);
                }
            }
        }
    }

    /// Poll every sensor once. A failing sensor keeps its last value and
    /// does not stop the others.
    pub fn update(&mut self) -> Vec<Fault> {
        self.reconcile_temps();
        let device = self.device.path().display().to_string();
        let mut faults = Vec::new();
        for sensor in self.sensors_mut() {
            if let Err(e) = sensor.update() {
                logger::log_event(
                    "sensor_read_failed",
                    json!({ "device": device, "sensor": sensor.id().to_string(), "error": e.to_string() }),
                );
                faults.push((sensor.id(), e));
            }
        }
        faults
    }

    pub fn start_calibration(&mut self, pwm_index: u32, now: Instant) -> Result<()> {
        self.pwm_fan_or_err(pwm_index)?.test(now)
    }

    pub fn abort_calibration(&mut self, pwm_index: u32) -> Result<()> {
        self.pwm_fan_or_err(pwm_index)?.abort_test();
        Ok(())
    }

    pub fn abort_all(&mut self) {
        for fan in self.pwm_fans.iter_mut() {
            fan.abort_test();
        }
    }

    pub fn is_calibrating(&self) -> bool {
        self.pwm_fans.iter().any(|p| p.testing())
    }

    /// Run whatever timers expired at `now`: calibration steps first, then
    /// the regular poll.
    pub fn tick(&mut self, now: Instant) -> TickReport {
        let mut report = TickReport::default();
        for fan in self.pwm_fans.iter_mut() {
            if let Some(res) = fan.poll_test(now) {
                report.calibration.push((fan.id(), res));
            }
        }
        if self.poll_timer.fire(now) {
            report.polled = true;
            report.faults = self.update();
        }
        report
    }

    /// Time until the next timer expires.
    pub fn next_deadline(&self, now: Instant) -> Duration {
        self.pwm_fans
            .iter()
            .filter_map(|p| p.next_test_step(now))
            .fold(self.poll_timer.remaining(now), Duration::min)
    }
}
