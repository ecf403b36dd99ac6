/*
 * Test helpers shared by the unit test modules.
 *
 * FakeHwmon lays out an hwmon-style directory in a temp dir so sensors
 * can be exercised against real files.
 */

use std::fs;
use std::path::Path;

use tempfile::TempDir;

pub struct FakeHwmon {
    dir: TempDir,
}

impl FakeHwmon {
    pub fn new() -> Self {
        Self { dir: TempDir::new().expect("temp dir") }
    }

    pub fn named(name: &str) -> Self {
        let hw = Self::new();
        hw.set("name", name);
        hw
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write (or overwrite) one attribute file.
    pub fn set(&self, file: &str, value: impl ToString) -> &Self {
        fs::write(self.dir.path().join(file), value.to_string()).expect("write attribute");
        self
    }

    pub fn get(&self, file: &str) -> String {
        fs::read_to_string(self.dir.path().join(file))
            .expect("read attribute")
            .trim()
            .to_string()
    }

    pub fn remove(&self, file: &str) {
        fs::remove_file(self.dir.path().join(file)).expect("remove attribute");
    }

    pub fn temp(&self, idx: u32, millidegrees: i64, label: Option<&str>) -> &Self {
        self.set(&format!("temp{}_input", idx), millidegrees);
        if let Some(l) = label {
            self.set(&format!("temp{}_label", idx), l);
        }
        self
    }

    pub fn fan(&self, idx: u32, rpm: i64) -> &Self {
        self.set(&format!("fan{}_input", idx), rpm)
    }

    /// A controllable fan: tachometer, duty cycle and mode file.
    pub fn pwm_fan(&self, idx: u32, rpm: i64, pwm: u8, mode: i32) -> &Self {
        self.fan(idx, rpm);
        self.set(&format!("pwm{}", idx), pwm);
        self.set(&format!("pwm{}_enable", idx), mode)
    }

    pub fn pwm(&self, idx: u32) -> u8 {
        self.get(&format!("pwm{}", idx)).parse().expect("pwm value")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fake_layout() {
        let hw = FakeHwmon::named("nct6775");
        hw.temp(1, 45231, Some("CPU")).pwm_fan(2, 900, 128, 1);
        assert_eq!(hw.get("name"), "nct6775");
        assert_eq!(hw.get("temp1_label"), "CPU");
        assert_eq!(hw.pwm(2), 128);
        assert_eq!(hw.get("pwm2_enable"), "1");
        hw.remove("fan2_input");
        assert!(!hw.path().join("fan2_input").exists());
    }
}
