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

//! Fan threshold discovery.
//!
//! The probe runs in three passes, one PWM step per tick:
//!
//! 1. `FindingStop1`: spin up at `max_pwm`, walk down until the fan stalls.
//! 2. `FindingStop2`: spin up again and repeat the walk down.
//! 3. `FindingStart`: drop to 0 and walk up until the fan turns.
//!
//! Fans stall and start at different duty cycles, so the stop threshold is
//! sampled twice and the higher candidate is kept as `min_stop`.
//!
//! This module never touches the device. `tick` takes the latest RPM
//! reading and answers with the PWM value to write next.

use crate::error::CalibrationError;

/// Duty cycle step applied per tick.
pub const DEFAULT_PWM_STEP: u8 = 5;
/// An RPM reading at or below this counts as stopped.
pub const DEFAULT_STALL_RPM: i64 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    FindingStop1,
    FindingStop2,
    FindingStart,
    Idle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Params {
    pub step: u8,
    pub stall_rpm: i64,
}

impl Default for Params {
    fn default() -> Self {
        Self { step: DEFAULT_PWM_STEP, stall_rpm: DEFAULT_STALL_RPM }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub min_stop: u8,
    pub min_start: u8,
}

/// What the owner must do after a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Write this duty cycle and wait for the next tick.
    Write(u8),
    Finished(Thresholds),
    Failed(CalibrationError),
    /// Already idle; nothing to do.
    Idle,
}

#[derive(Debug, Clone)]
pub struct Calibration {
    phase: Phase,
    pwm: u8,
    max_pwm: u8,
    params: Params,
    baseline_rpm: Option<i64>,
    stop_candidates: [Option<u8>; 2],
}

impl Calibration {
    /// Enter `FindingStop1`. The returned value must be written to the
    /// device before the first tick.
    pub fn start(max_pwm: u8, params: Params) -> (Self, u8) {
        let params = Params { step: params.step.max(1), ..params };
        let cal = Self {
            phase: Phase::FindingStop1,
            pwm: max_pwm,
            max_pwm,
            params,
            baseline_rpm: None,
            stop_candidates: [None, None],
        };
        (cal, max_pwm)
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Duty cycle currently applied by the probe.
    pub fn pwm(&self) -> u8 {
        self.pwm
    }

    pub fn max_pwm(&self) -> u8 {
        self.max_pwm
    }

    /// RPM observed at `max_pwm` at the start of the current stop pass.
    pub fn baseline_rpm(&self) -> Option<i64> {
        self.baseline_rpm
    }

    pub fn stop_candidates(&self) -> [Option<u8>; 2] {
        self.stop_candidates
    }

    /// Advance by one tick given the latest RPM reading.
    pub fn tick(&mut self, rpm: i64) -> Step {
        let stopped = rpm <= self.params.stall_rpm;
        match self.phase {
            Phase::FindingStop1 | Phase::FindingStop2 => self.probe_stop(rpm, stopped),
            Phase::FindingStart => self.probe_start(stopped),
            Phase::Idle => Step::Idle,
        }
    }

    fn probe_stop(&mut self, rpm: i64, stopped: bool) -> Step {
        if self.baseline_rpm.is_none() {
            // First reading of the pass is taken at max_pwm
            if stopped {
                return self.fail(CalibrationError::NeverStarts { pwm: self.pwm });
            }
            self.baseline_rpm = Some(rpm);
        } else if stopped {
            let candidate = self.pwm;
            return match self.phase {
                Phase::FindingStop1 => {
                    self.stop_candidates[0] = Some(candidate);
                    self.phase = Phase::FindingStop2;
                    self.baseline_rpm = None;
                    self.pwm = self.max_pwm;
                    Step::Write(self.pwm)
                }
                _ => {
                    self.stop_candidates[1] = Some(candidate);
                    self.phase = Phase::FindingStart;
                    self.pwm = 0;
                    Step::Write(0)
                }
            };
        }

        if self.pwm == 0 {
            return self.fail(CalibrationError::NeverStops { pwm: 0 });
        }
        self.pwm = self.pwm.saturating_sub(self.params.step);
        Step::Write(self.pwm)
    }

    fn probe_start(&mut self, stopped: bool) -> Step {
        if !stopped {
            self.phase = Phase::Idle;
            let [c1, c2] = self.stop_candidates;
            let min_stop = c1.unwrap_or(0).max(c2.unwrap_or(0));
            return Step::Finished(Thresholds { min_stop, min_start: self.pwm });
        }
        if self.pwm >= self.max_pwm {
            return self.fail(CalibrationError::NeverStarts { pwm: self.pwm });
        }
        self.pwm = self.pwm.saturating_add(self.params.step).min(self.max_pwm);
        Step::Write(self.pwm)
    }

    fn fail(&mut self, err: CalibrationError) -> Step {
        self.phase = Phase::Idle;
        Step::Failed(err)
    }
}
