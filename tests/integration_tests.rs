/*
 * Integration tests for fancal
 *
 * These drive a Controller against a fake hwmon directory and check
 * polling, notifications and a complete fan calibration end to end.
 */

use std::cell::{Cell, RefCell};
use std::fs;
use std::path::Path;
use std::rc::Rc;
use std::time::{Duration, Instant};

use fancal::calibration::{Phase, Thresholds};
use fancal::config::{load_settings_from, save_settings_to, Settings};
use fancal::controller::Controller;
use fancal::hwmon::extract_index;
use fancal::logger;
use fancal::sensors::{EventKind, Fan, Field, Sensor, SensorEvent, TestProgress};
use fancal::{CalibrationError, SensorError};
use serial_test::serial;
use tempfile::TempDir;

fn write(dir: &Path, file: &str, value: impl ToString) {
    fs::write(dir.join(file), value.to_string()).unwrap();
}

fn read(dir: &Path, file: &str) -> String {
    fs::read_to_string(dir.join(file)).unwrap().trim().to_string()
}

/// nct6775-like chip: two temps, one plain fan, one controllable fan.
fn board() -> TempDir {
    let dir = TempDir::new().unwrap();
    let p = dir.path();
    write(p, "name", "nct6775");
    write(p, "temp1_input", 45231);
    write(p, "temp1_label", "SYSTIN");
    write(p, "temp2_input", 61000);
    write(p, "fan1_input", 1320);
    write(p, "fan2_input", 980);
    write(p, "pwm2", 153);
    write(p, "pwm2_enable", 2);
    dir
}

/// Spins above `stall` while running, needs `start` to spin up again.
fn step_fan(dir: &Path, spinning: &Cell<bool>, stall: u8, start: u8) {
    let pwm: u8 = read(dir, "pwm2").parse().unwrap();
    let spins = if spinning.get() { pwm > stall } else { pwm >= start };
    spinning.set(spins);
    write(dir, "fan2_input", if spins { 980 } else { 0 });
}

fn record<S: Sensor + ?Sized>(s: &mut S) -> Rc<RefCell<Vec<SensorEvent>>> {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    s.subscribe(Box::new(move |e| sink.borrow_mut().push(e.clone())));
    seen
}

#[test]
fn test_poll_reads_whole_board() {
    let dir = board();
    let mut c = Controller::new(dir.path(), &[1, 2], &[1], &[2], &Settings::default());
    assert!(c.update().is_empty());

    let t1 = c.temp(1).unwrap();
    assert_eq!(t1.value(), 45);
    assert_eq!(t1.name(), "SYSTIN");
    assert_eq!(c.temp(2).unwrap().name(), "temp2");
    assert_eq!(c.fan(1).unwrap().rpm(), 1320);
    assert_eq!(c.fan(1).unwrap().pwm(), 255);

    let p = c.pwm_fan(2).unwrap();
    assert_eq!((p.rpm(), p.pwm(), p.pwm_mode()), (980, 153, 2));
    assert!(!p.active());
    assert_eq!(c.device().name(), "nct6775");
}

#[test]
fn test_unreadable_sensor_is_isolated() {
    let dir = board();
    let mut c = Controller::new(dir.path(), &[1, 2], &[1], &[2], &Settings::default());
    c.update();
    fs::remove_file(dir.path().join("fan1_input")).unwrap();
    write(dir.path(), "temp1_input", 47000);

    let faults = c.update();
    assert_eq!(faults.len(), 1);
    assert_eq!(faults[0].0.to_string(), "fan1");
    assert!(faults[0].1.is_io());
    assert_eq!(c.fan(1).unwrap().rpm(), 1320);
    assert_eq!(c.temp(1).unwrap().value(), 47);
}

#[test]
fn test_change_notifications() {
    let dir = board();
    let mut c = Controller::new(dir.path(), &[1], &[], &[], &Settings::default());
    c.update();
    let seen = record(c.temp_mut(1).unwrap());

    c.update();
    assert!(seen.borrow().is_empty());

    write(dir.path(), "temp1_input", 52999);
    c.update();
    let events = seen.borrow();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, EventKind::Changed(Field::Value));
    assert_eq!(events[0].sensor.to_string(), "temp1");
}

#[test]
fn test_manual_control_and_limits() {
    let dir = board();
    let mut c = Controller::new(dir.path(), &[1], &[], &[2], &Settings::default());
    c.update();
    let p = c.pwm_fan_mut(2).unwrap();
    p.set_active(true).unwrap();
    assert!(p.active());
    assert_eq!(read(dir.path(), "pwm2_enable"), "1");

    p.set_pwm(300, true).unwrap();
    assert_eq!(p.pwm(), 255);
    p.set_pwm(-4, true).unwrap();
    assert_eq!(read(dir.path(), "pwm2"), "0");

    p.set_min_temp(30);
    p.set_max_temp(70);
    p.set_min_pwm(60);
    assert_eq!((p.min_temp(), p.max_temp(), p.min_pwm()), (30, 70, 60));
    p.reset();
    assert_eq!((p.min_temp(), p.max_temp(), p.min_pwm()), (0, 100, 255));

    p.set_active(false).unwrap();
    assert_eq!(read(dir.path(), "pwm2_enable"), "2");
}

#[test]
fn test_calibration_end_to_end() {
    let dir = board();
    let mut c = Controller::new(dir.path(), &[1], &[], &[2], &Settings::default());
    c.update();
    let seen = record(c.pwm_fan_mut(2).unwrap());

    let t0 = Instant::now();
    c.start_calibration(2, t0).unwrap();
    assert!(c.pwm_fan(2).unwrap().testing());
    assert_eq!(read(dir.path(), "pwm2_enable"), "1");
    assert_eq!(read(dir.path(), "pwm2"), "255");
    assert!(matches!(
        c.pwm_fan_mut(2).unwrap().set_pwm(90, true),
        Err(SensorError::Busy(_))
    ));
    assert!(matches!(
        c.start_calibration(2, t0),
        Err(SensorError::Calibration(CalibrationError::AlreadyRunning))
    ));

    let spinning = Cell::new(true);
    let mut now = t0;
    let mut outcome = None;
    let mut phases = Vec::new();
    for _ in 0..500 {
        now += Duration::from_secs(1);
        let report = c.tick(now);
        for (_, res) in report.calibration {
            match res {
                Ok(TestProgress::Running(phase)) => {
                    if phases.last() != Some(&phase) {
                        phases.push(phase);
                    }
                }
                other => outcome = Some(other),
            }
        }
        if outcome.is_some() {
            break;
        }
        step_fan(dir.path(), &spinning, 40, 55);
    }

    let expected = Thresholds { min_stop: 40, min_start: 55 };
    assert!(matches!(outcome, Some(Ok(TestProgress::Finished(t))) if t == expected));
    assert_eq!(phases.first(), Some(&Phase::FindingStop1));
    assert!(phases.contains(&Phase::FindingStart));

    let p = c.pwm_fan(2).unwrap();
    assert!(!p.testing());
    assert_eq!((p.min_stop(), p.min_start()), (40, 55));
    assert_eq!(read(dir.path(), "pwm2"), "153");
    assert_eq!(read(dir.path(), "pwm2_enable"), "2");
    assert!(seen
        .borrow()
        .iter()
        .any(|e| e.kind == EventKind::CalibrationFinished(expected)));
}

#[test]
fn test_calibration_of_fan_that_never_starts() {
    let dir = board();
    write(dir.path(), "fan2_input", 0);
    let mut c = Controller::new(dir.path(), &[], &[], &[2], &Settings::default());
    c.update();
    let t0 = Instant::now();
    c.start_calibration(2, t0).unwrap();

    let report = c.tick(t0 + Duration::from_secs(1));
    let (id, res) = &report.calibration[0];
    assert_eq!(id.to_string(), "pwm2");
    assert!(matches!(
        res,
        Err(SensorError::Calibration(CalibrationError::NeverStarts { .. }))
    ));
    assert!(!c.is_calibrating());
    assert_eq!(read(dir.path(), "pwm2"), "153");
}

#[test]
fn test_settings_drive_controller() {
    let dir = board();
    let cfg_dir = TempDir::new().unwrap();
    let path = cfg_dir.path().join("settings.json");
    let mut settings = Settings::default();
    settings.names.insert("pwm2".to_string(), "Rear".to_string());
    settings.test_interval_ms = 500;
    save_settings_to(&path, &settings).unwrap();

    let loaded = load_settings_from(&path).unwrap();
    let mut c = Controller::new(dir.path(), &[], &[], &[2], &loaded);
    c.update();
    assert_eq!(c.pwm_fan(2).unwrap().name(), "Rear");
    assert_eq!(c.pwm_fan(2).unwrap().config().test_interval, Duration::from_millis(500));
}

#[test]
fn test_sensor_file_names() {
    assert_eq!(extract_index("temp12_input", "temp", "_input"), Some(12));
    assert_eq!(extract_index("pwm3", "pwm", ""), Some(3));
    assert_eq!(extract_index("pwm3_enable", "pwm", ""), None);
    assert_eq!(extract_index("fan_input", "fan", "_input"), None);
}

#[test]
#[serial]
fn test_calibration_is_logged() {
    let log_dir = TempDir::new().unwrap();
    let log = log_dir.path().join("events.json");
    logger::init_logging_at(&log).unwrap();

    let dir = board();
    write(dir.path(), "fan2_input", 0);
    let mut c = Controller::new(dir.path(), &[], &[], &[2], &Settings::default());
    c.update();
    let t0 = Instant::now();
    c.start_calibration(2, t0).unwrap();
    c.tick(t0 + Duration::from_secs(1));
    logger::shutdown_logging();

    let content = fs::read_to_string(&log).unwrap();
    let events: Vec<serde_json::Value> = content
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert!(events.iter().any(|e| e["event"] == "calibration_start"));
    assert!(events.iter().any(|e| e["event"] == "calibration_failed"));
}
