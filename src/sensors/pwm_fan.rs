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

//! PWM controlled fan and its calibration run.
//!
//! While a calibration is running the sensor owns `pwmN` and `pwmN_enable`
//! exclusively: the regular poll only refreshes the tachometer and every
//! public write is refused with [`SensorError::Busy`].

use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

use serde_json::json;

use crate::calibration::{Calibration, Params, Phase, Step, Thresholds};
use crate::error::{CalibrationError, Result, SensorError};
use crate::hwmon::{self, Attribute, Device};
use crate::logger;
use crate::timer::Timer;
use super::{
    replace_if_changed, EventKind, Fan, FanSensor, Field, Observer, Sensor, SensorId, SensorKind,
    FULL_SPEED,
};

/// Default delay between two calibration steps.
pub const DEFAULT_TEST_INTERVAL: Duration = Duration::from_millis(1000);

/// Values of `pwmN_enable` that matter here.
///
/// The kernel ABI uses 1 for manual control and 2+ for the chip's own
/// automatic modes, but some drivers differ. With these defaults `active`
/// means "not automatic", so mode 1 counts as active rather than the
/// literal `pwm_mode != 1`. Configure `automatic: 1` for that rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PwmModes {
    pub manual: i32,
    pub automatic: i32,
}

impl Default for PwmModes {
    fn default() -> Self {
        Self { manual: 1, automatic: 2 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PwmConfig {
    pub modes: PwmModes,
    pub calibration: Params,
    pub test_interval: Duration,
}

impl Default for PwmConfig {
    fn default() -> Self {
        Self {
            modes: PwmModes::default(),
            calibration: Params::default(),
            test_interval: DEFAULT_TEST_INTERVAL,
        }
    }
}

/// Result of one calibration tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestProgress {
    Running(Phase),
    Finished(Thresholds),
    Idle,
}

#[derive(Debug)]
struct TestRun {
    calibration: Calibration,
    timer: Timer,
    saved_pwm: u8,
    saved_mode: i32,
}

pub struct PwmFanSensor {
    fan: FanSensor,
    pwm: u8,
    pwm_mode: i32,
    temp: Option<u32>,
    has_temp: bool,
    min_temp: i32,
    max_temp: i32,
    min_pwm: u8,
    max_pwm: u8,
    min_start: u8,
    min_stop: u8,
    active: bool,
    testing: bool,
    pwm_ch: Box<dyn Attribute>,
    mode_ch: Option<Box<dyn Attribute>>,
    config: PwmConfig,
    test: Option<TestRun>,
}

impl PwmFanSensor {
    pub fn new(parent: &Rc<Device>, index: u32, config: PwmConfig) -> Self {
        let fan = FanSensor::with_kind(parent, index, SensorKind::PwmFan);
        let pwm_ch = Box::new(parent.channel(&hwmon::pwm_value(index)));
        let mode_ch = parent
            .optional_channel(&hwmon::pwm_enable(index))
            .map(|c| Box::new(c) as Box<dyn Attribute>);
        Self::from_parts(fan, pwm_ch, mode_ch, config)
    }

    pub fn with_channels(
        parent: Weak<Device>,
        index: u32,
        rpm_ch: Box<dyn Attribute>,
        pwm_ch: Box<dyn Attribute>,
        mode_ch: Option<Box<dyn Attribute>>,
        config: PwmConfig,
    ) -> Self {
        let fan = FanSensor::with_channels(parent, SensorId::new(SensorKind::PwmFan, index), rpm_ch, None);
        Self::from_parts(fan, pwm_ch, mode_ch, config)
    }

    fn from_parts(
        fan: FanSensor,
        pwm_ch: Box<dyn Attribute>,
        mode_ch: Option<Box<dyn Attribute>>,
        config: PwmConfig,
    ) -> Self {
        let pwm_mode = config.modes.manual;
        let mut s = Self {
            fan,
            pwm: 0,
            pwm_mode,
            temp: None,
            has_temp: false,
            min_temp: 0,
            max_temp: 100,
            min_pwm: FULL_SPEED,
            max_pwm: FULL_SPEED,
            min_start: FULL_SPEED,
            min_stop: FULL_SPEED,
            active: false,
            testing: false,
            pwm_ch,
            mode_ch,
            config,
            test: None,
        };
        s.active = s.compute_active();
        s
    }

    // ---------------------------------------------------------------------
    // Accessors
    // ---------------------------------------------------------------------

    pub fn pwm_mode(&self) -> i32 {
        self.pwm_mode
    }

    /// Index of the associated temperature sensor on the same device.
    pub fn temp(&self) -> Option<u32> {
        self.temp
    }

    pub fn has_temp(&self) -> bool {
        self.has_temp
    }

    pub fn min_temp(&self) -> i32 {
        self.min_temp
    }

    pub fn max_temp(&self) -> i32 {
        self.max_temp
    }

    pub fn min_pwm(&self) -> u8 {
        self.min_pwm
    }

    pub fn max_pwm(&self) -> u8 {
        self.max_pwm
    }

    pub fn min_start(&self) -> u8 {
        self.min_start
    }

    pub fn min_stop(&self) -> u8 {
        self.min_stop
    }

    pub fn testing(&self) -> bool {
        self.testing
    }

    pub fn config(&self) -> &PwmConfig {
        &self.config
    }

    /// True when software controls the fan: not in automatic mode and not calibrating.
    pub fn active(&self) -> bool {
        self.active
    }

    /// Current calibration phase, `Idle` when not testing.
    pub fn test_phase(&self) -> Phase {
        self.test.as_ref().map_or(Phase::Idle, |t| t.calibration.phase())
    }

    pub fn label(&self) -> &str {
        self.fan.label()
    }

    // ---------------------------------------------------------------------
    // Curve bounds
    // ---------------------------------------------------------------------

    pub fn set_min_temp(&mut self, v: i32) {
        self.set_field(Field::MinTemp, v)
    }

    pub fn set_max_temp(&mut self, v: i32) {
        self.set_field(Field::MaxTemp, v)
    }

    pub fn set_min_pwm(&mut self, v: u8) {
        self.set_field(Field::MinPwm, v as i32)
    }

    pub fn set_max_pwm(&mut self, v: u8) {
        self.set_field(Field::MaxPwm, v as i32)
    }

    pub fn set_min_start(&mut self, v: u8) {
        self.set_field(Field::MinStart, v as i32)
    }

    pub fn set_min_stop(&mut self, v: u8) {
        self.set_field(Field::MinStop, v as i32)
    }

    fn set_field(&mut self, field: Field, v: i32) {
        let pwm = v.clamp(0, FULL_SPEED as i32) as u8;
        let changed = match field {
            Field::MinTemp => replace_if_changed(&mut self.min_temp, v),
            Field::MaxTemp => replace_if_changed(&mut self.max_temp, v),
            Field::MinPwm => replace_if_changed(&mut self.min_pwm, pwm),
            Field::MaxPwm => replace_if_changed(&mut self.max_pwm, pwm),
            Field::MinStart => replace_if_changed(&mut self.min_start, pwm),
            Field::MinStop => replace_if_changed(&mut self.min_stop, pwm),
            _ => false,
        };
        if changed {
            self.fan.base.changed(field);
        }
    }

    /// Back to the defaults of an unconfigured fan.
    pub fn reset(&mut self) {
        self.set_temp(None);
        self.set_min_temp(0);
        self.set_max_temp(100);
        self.set_min_pwm(FULL_SPEED);
        self.set_max_pwm(FULL_SPEED);
        self.set_min_start(FULL_SPEED);
        self.set_min_stop(FULL_SPEED);
    }

    // ---------------------------------------------------------------------
    // Temperature association
    // ---------------------------------------------------------------------

    /// `has_temp` follows `temp`.
    pub fn set_temp(&mut self, temp: Option<u32>) {
        self.set_has_temp_flag(temp.is_some());
        if replace_if_changed(&mut self.temp, temp) {
            self.fan.base.changed(Field::Temp);
        }
    }

    /// Clearing the flag drops the association. Setting it without an
    /// associated sensor does nothing.
    pub fn set_has_temp(&mut self, has_temp: bool) {
        if !has_temp {
            self.set_temp(None);
        }
    }

    fn set_has_temp_flag(&mut self, has_temp: bool) {
        if replace_if_changed(&mut self.has_temp, has_temp) {
            self.fan.base.changed(Field::HasTemp);
        }
    }

    // ---------------------------------------------------------------------
    // PWM and mode
    // ---------------------------------------------------------------------

    /// Store `mode` and, if `write`, push it to `pwmN_enable`.
    pub fn set_pwm_mode(&mut self, mode: i32, write: bool) -> Result<()> {
        self.ensure_not_testing()?;
        self.store_mode(mode, write)
    }

    /// Inactive hands the fan to the chip's automatic mode, active takes
    /// manual control back.
    pub fn set_active(&mut self, active: bool) -> Result<()> {
        self.ensure_not_testing()?;
        if active == self.active {
            return Ok(());
        }
        let mode = if active { self.config.modes.manual } else { self.config.modes.automatic };
        self.store_mode(mode, true)
    }

    fn ensure_not_testing(&self) -> Result<()> {
        if self.testing {
            Err(SensorError::Busy(self.id()))
        } else {
            Ok(())
        }
    }

    fn compute_active(&self) -> bool {
        self.pwm_mode != self.config.modes.automatic && !self.testing
    }

    fn refresh_active(&mut self) {
        let active = self.compute_active();
        if replace_if_changed(&mut self.active, active) {
            self.fan.base.changed(Field::Active);
        }
    }

    fn set_testing(&mut self, testing: bool) {
        if replace_if_changed(&mut self.testing, testing) {
            self.fan.base.changed(Field::Testing);
        }
        self.refresh_active();
    }

    /// Record a duty cycle read from (or sent to) the device.
    fn note_pwm(&mut self, value: u8) {
        if replace_if_changed(&mut self.pwm, value) {
            self.fan.base.changed(Field::Pwm);
        }
    }

    fn note_mode(&mut self, mode: i32) {
        if replace_if_changed(&mut self.pwm_mode, mode) {
            self.fan.base.changed(Field::PwmMode);
        }
        self.refresh_active();
    }

    /// Current device state, without touching the stored values.
    fn read_device(&self) -> Result<(u8, Option<i32>)> {
        let pwm = self.pwm_ch.read()?.clamp(0, FULL_SPEED as i64) as u8;
        let mode = match self.mode_ch.as_ref() {
            Some(ch) => Some(ch.read()? as i32),
            None => None,
        };
        Ok((pwm, mode))
    }

    /// The stored value is what was sent, even if the device refused it.
    fn store_pwm(&mut self, value: u8, write: bool) -> Result<()> {
        self.note_pwm(value);
        if !write {
            return Ok(());
        }
        self.pwm_ch.write(value as i64).map_err(|e| {
            logger::log_event(
                "pwm_write_failed",
                json!({ "target": self.pwm_ch.describe(), "value": value, "error": e.to_string() }),
            );
            e
        })
    }

    fn store_mode(&mut self, mode: i32, write: bool) -> Result<()> {
        self.note_mode(mode);
        let Some(ch) = self.mode_ch.as_ref().filter(|_| write) else { return Ok(()) };
        ch.write(mode as i64).map_err(|e| {
            logger::log_event(
                "pwm_mode_write_failed",
                json!({ "target": ch.describe(), "mode": mode, "error": e.to_string() }),
            );
            e
        })
    }

    // ---------------------------------------------------------------------
    // Calibration
    // ---------------------------------------------------------------------

    /// Start a calibration run. The first step fires one test interval after `now`.
    pub fn test(&mut self, now: Instant) -> Result<()> {
        if self.test.is_some() {
            return Err(CalibrationError::AlreadyRunning.into());
        }
        // The restore point is taken from the device, never from defaults
        let (pwm, mode) = self.read_device()?;
        self.note_pwm(pwm);
        if let Some(mode) = mode {
            self.note_mode(mode);
        }

        let (calibration, first) = Calibration::start(self.max_pwm, self.config.calibration);
        self.test = Some(TestRun {
            calibration,
            timer: Timer::new(self.config.test_interval, now),
            saved_pwm: self.pwm,
            saved_mode: self.pwm_mode,
        });
        self.set_testing(true);
        logger::log_event(
            "calibration_start",
            json!({
                "sensor": self.id().to_string(),
                "max_pwm": first,
                "saved_pwm": self.pwm,
                "saved_mode": self.pwm_mode,
            }),
        );

        let manual = self.config.modes.manual;
        let taken = self.store_mode(manual, true).and_then(|_| self.store_pwm(first, true));
        if let Err(e) = taken {
            self.finish_test();
            return Err(e);
        }
        Ok(())
    }

    /// Run one calibration step if the test timer expired.
    pub fn poll_test(&mut self, now: Instant) -> Option<Result<TestProgress>> {
        let due = self.test.as_mut().map_or(false, |t| t.timer.fire(now));
        due.then(|| self.continue_test())
    }

    /// One calibration step: read the tachometer, feed the state machine and
    /// apply its answer.
    pub fn continue_test(&mut self) -> Result<TestProgress> {
        if self.test.is_none() {
            return Ok(TestProgress::Idle);
        }
        let rpm = match self.fan.refresh() {
            Ok(rpm) => rpm,
            Err(e) => {
                self.log_test_failure(&e.to_string());
                self.finish_test();
                return Err(e);
            }
        };

        let (step, before, after) = match self.test.as_mut() {
            Some(run) => {
                let before = run.calibration.phase();
                let step = run.calibration.tick(rpm as i64);
                (step, before, run.calibration.phase())
            }
            None => return Ok(TestProgress::Idle),
        };
        if before != after && after != Phase::Idle {
            logger::log_event(
                "calibration_phase",
                json!({ "sensor": self.id().to_string(), "phase": format!("{:?}", after), "rpm": rpm }),
            );
        }

        match step {
            Step::Write(value) => {
                if let Err(e) = self.store_pwm(value, true) {
                    self.log_test_failure(&e.to_string());
                    self.finish_test();
                    return Err(e);
                }
                Ok(TestProgress::Running(after))
            }
            Step::Finished(thresholds) => {
                self.set_min_stop(thresholds.min_stop);
                self.set_min_start(thresholds.min_start);
                logger::log_event(
                    "calibration_done",
                    json!({
                        "sensor": self.id().to_string(),
                        "min_stop": thresholds.min_stop,
                        "min_start": thresholds.min_start,
                    }),
                );
                self.finish_test();
                self.fan.emit(EventKind::CalibrationFinished(thresholds));
                Ok(TestProgress::Finished(thresholds))
            }
            Step::Failed(err) => {
                self.log_test_failure(&err.to_string());
                self.finish_test();
                self.fan.emit(EventKind::CalibrationFailed(err.clone()));
                Err(err.into())
            }
            Step::Idle => {
                self.finish_test();
                Ok(TestProgress::Idle)
            }
        }
    }

    /// Cancel a running calibration. Thresholds are left untouched.
    pub fn abort_test(&mut self) {
        if self.test.is_none() {
            return;
        }
        logger::log_event("calibration_aborted", json!({ "sensor": self.id().to_string() }));
        self.finish_test();
        self.fan.emit(EventKind::CalibrationFailed(CalibrationError::Aborted));
    }

    /// Drop the run and put pwm and mode back as they were before `test`.
    fn finish_test(&mut self) {
        let Some(run) = self.test.take() else { return };
        // Write the value while still in manual mode, then restore the mode
        let restored = self
            .store_pwm(run.saved_pwm, true)
            .and_then(|_| self.store_mode(run.saved_mode, true));
        if let Err(e) = restored {
            logger::log_event(
                "calibration_restore_failed",
                json!({ "sensor": self.id().to_string(), "error": e.to_string() }),
            );
        }
        self.set_testing(false);
    }

    fn log_test_failure(&self, error: &str) {
        logger::log_event(
            "calibration_failed",
            json!({ "sensor": self.id().to_string(), "phase": format!("{:?}", self.test_phase()), "error": error }),
        );
    }

    /// Time until the next calibration step, if one is scheduled.
    pub fn next_test_step(&self, now: Instant) -> Option<Duration> {
        self.test.as_ref().map(|t| t.timer.remaining(now))
    }
}

impl Sensor for PwmFanSensor {
    fn id(&self) -> SensorId {
        self.fan.id()
    }

    fn parent(&self) -> Option<Rc<Device>> {
        self.fan.parent()
    }

    fn name(&self) -> String {
        self.fan.name()
    }

    fn set_name(&mut self, name: &str) {
        self.fan.set_name(name);
    }

    /// Refresh RPM, then pwm and mode unless a calibration owns them.
    fn update(&mut self) -> Result<()> {
        let mut first_err = self.fan.update().err();
        if self.testing {
            return first_err.map_or(Ok(()), Err);
        }

        match self.pwm_ch.read() {
            Ok(raw) => self.note_pwm(raw.clamp(0, FULL_SPEED as i64) as u8),
            Err(e) => {
                first_err.get_or_insert(e);
            }
        }
        let mode = self.mode_ch.as_ref().map(|ch| ch.read());
        match mode {
            Some(Ok(mode)) => self.note_mode(mode as i32),
            Some(Err(e)) => {
                first_err.get_or_insert(e);
            }
            None => {}
        }
        first_err.map_or(Ok(()), Err)
    }

    fn subscribe(&mut self, observer: Observer) {
        self.fan.subscribe(observer);
    }
}

impl Fan for PwmFanSensor {
    fn rpm(&self) -> i32 {
        self.fan.rpm()
    }

    fn pwm(&self) -> u8 {
        self.pwm
    }

    /// Clamp into 0..=255, store, and optionally push to the device.
    fn set_pwm(&mut self, value: i32, write: bool) -> Result<()> {
        self.ensure_not_testing()?;
        self.store_pwm(value.clamp(0, FULL_SPEED as i32) as u8, write)
    }
}
