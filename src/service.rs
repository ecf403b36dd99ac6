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

//! Single-threaded driver loop. All sensor I/O happens on the calling
//! thread between sleeps; nothing blocks longer than one file access.

use std::thread;
use std::time::{Duration, Instant};

use serde_json::json;

use crate::controller::{Controller, TickReport};
use crate::error::{CalibrationError, Result};
use crate::calibration::Thresholds;
use crate::logger;
use crate::sensors::TestProgress;

/// Upper bound for one sleep so stop requests are noticed quickly.
const MAX_SLEEP: Duration = Duration::from_millis(50);

/// Tick the controller until `keep_going` returns false.
pub fn run_until<F>(controller: &mut Controller, mut keep_going: F)
where
    F: FnMut(&Controller, TickReport) -> bool,
{
    loop {
        let report = controller.tick(Instant::now());
        if !keep_going(controller, report) {
            break;
        }
        let wait = controller.next_deadline(Instant::now()).min(MAX_SLEEP);
        if !wait.is_zero() {
            thread::sleep(wait);
        }
    }
}

/// Calibrate one PWM fan and block until the run ends. `cancelled` is
/// checked between steps; when it returns true the run is aborted.
pub fn calibrate_blocking<C>(controller: &mut Controller, pwm_index: u32, mut cancelled: C) -> Result<Thresholds>
where
    C: FnMut() -> bool,
{
    controller.start_calibration(pwm_index, Instant::now())?;
    let testing = |c: &Controller| c.pwm_fan(pwm_index).map_or(false, |p| p.testing());
    let mut outcome: Option<Result<Thresholds>> = None;
    run_until(controller, |c, report| {
        for (id, res) in report.calibration {
            if id.index != pwm_index {
                continue;
            }
            match res {
                Ok(TestProgress::Finished(t)) => outcome = Some(Ok(t)),
                Ok(_) => {}
                Err(e) => outcome = Some(Err(e)),
            }
        }
        outcome.is_none() && testing(c) && !cancelled()
    });

    if let Some(res) = outcome {
        return res;
    }
    controller.abort_calibration(pwm_index)?;
    logger::log_event("calibration_cancelled", json!({ "pwm": pwm_index }));
    Err(CalibrationError::Aborted.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::error::SensorError;
    use crate::sensors::Fan;
    use std::cell::Cell;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn fast_settings() -> Settings {
        Settings { poll_interval_ms: 5, test_interval_ms: 1, ..Settings::default() }
    }

    fn device(dir: &Path) {
        fs::write(dir.join("fan1_input"), "1000").unwrap();
        fs::write(dir.join("pwm1"), "100").unwrap();
        fs::write(dir.join("pwm1_enable"), "2").unwrap();
    }

    /// Fan model run between ticks: stalls at 30 and below, starts at 45.
    fn simulate(dir: &Path, spinning: &Cell<bool>) {
        let pwm: u8 = fs::read_to_string(dir.join("pwm1")).unwrap().trim().parse().unwrap();
        let spins = if spinning.get() { pwm > 30 } else { pwm >= 45 };
        spinning.set(spins);
        fs::write(dir.join("fan1_input"), if spins { "1000" } else { "0" }).unwrap();
    }

    #[test]
    fn test_calibrate_blocking_finishes() {
        let dir = TempDir::new().unwrap();
        device(dir.path());
        let mut c = Controller::new(dir.path(), &[], &[], &[1], &fast_settings());
        c.update();
        let spinning = Cell::new(true);
        let t = calibrate_blocking(&mut c, 1, || {
            simulate(dir.path(), &spinning);
            false
        })
        .unwrap();
        assert_eq!(t, Thresholds { min_stop: 30, min_start: 45 });
        let fan = c.pwm_fan(1).unwrap();
        assert_eq!((fan.min_stop(), fan.min_start()), (30, 45));
        assert!(!fan.testing());
        assert_eq!(fan.pwm(), 100);
        assert_eq!(fs::read_to_string(dir.path().join("pwm1_enable")).unwrap(), "2");
    }

    #[test]
    fn test_calibrate_blocking_cancel() {
        let dir = TempDir::new().unwrap();
        device(dir.path());
        let mut c = Controller::new(dir.path(), &[], &[], &[1], &fast_settings());
        c.update();
        let mut polls = 0;
        let err = calibrate_blocking(&mut c, 1, || {
            polls += 1;
            polls > 3
        })
        .unwrap_err();
        assert!(matches!(err, SensorError::Calibration(CalibrationError::Aborted)));
        assert!(!c.is_calibrating());
        assert_eq!(fs::read_to_string(dir.path().join("pwm1")).unwrap(), "100");
    }

    #[test]
    fn test_calibrate_unknown_fan() {
        let dir = TempDir::new().unwrap();
        device(dir.path());
        let mut c = Controller::new(dir.path(), &[], &[], &[1], &fast_settings());
        assert!(matches!(calibrate_blocking(&mut c, 2, || false), Err(SensorError::UnknownSensor(_))));
    }

    #[test]
    fn test_run_until_polls() {
        let dir = TempDir::new().unwrap();
        device(dir.path());
        let mut c = Controller::new(dir.path(), &[], &[], &[1], &fast_settings());
        let mut polls = 0;
        run_until(&mut c, |_, report| {
            if report.polled {
                polls += 1;
            }
            polls < 3
        });
        assert_eq!(polls, 3);
        assert_eq!(c.pwm_fan(1).unwrap().rpm(), 1000);
    }
}
