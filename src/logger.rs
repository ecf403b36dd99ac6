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

//! JSON-lines event log. One object per line: `{"ts_ms", "event", "data"}`.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use lazy_static::lazy_static;
use serde_json::{json, Value};

pub const DEFAULT_LOG_PATH: &str = "/etc/fancal/logs.json";
const FALLBACK_LOG_PATH: &str = "/tmp/fancal_logs.json";

lazy_static! {
    static ref LOG_FILE: Mutex<Option<(PathBuf, File)>> = Mutex::new(None);
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

fn open_append(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Open the default log file, falling back to /tmp if /etc is not writable.
pub fn init_logging() {
    if init_logging_at(DEFAULT_LOG_PATH).is_err() {
        let _ = init_logging_at(FALLBACK_LOG_PATH);
    }
}

pub fn init_logging_at<P: AsRef<Path>>(path: P) -> io::Result<()> {
    let path = path.as_ref();
    let f = open_append(path)?;
    let mut guard = match LOG_FILE.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    };
    *guard = Some((path.to_path_buf(), f));
    Ok(())
}

/// Close the log file. Later events are dropped.
pub fn shutdown_logging() {
    if let Ok(mut guard) = LOG_FILE.lock() {
        *guard = None;
    }
}

/// Path of the active log file, if logging was initialized.
pub fn log_path() -> Option<PathBuf> {
    LOG_FILE.lock().ok()?.as_ref().map(|(p, _)| p.clone())
}

/// Append one event to the log file. A no-op until logging is initialized.
pub fn log_event(event: &str, data: Value) {
    let line = json!({
        "ts_ms": now_millis(),
        "event": event,
        "data": data,
    })
    .to_string();

    // Logging is opt-in: without init_logging events are discarded
    if let Ok(mut guard) = LOG_FILE.lock() {
        if let Some((_, f)) = guard.as_mut() {
            let _ = writeln!(f, "{}", line);
        }
    }
}
