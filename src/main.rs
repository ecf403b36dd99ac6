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

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};

use fancal::config::{load_settings, load_settings_from, Settings};
use fancal::controller::Controller;
use fancal::hwmon::extract_index;
use fancal::logger;
use fancal::sensors::{Fan, Sensor};
use fancal::service;

const USAGE: &str = "usage:
  fancal monitor <hwmon-dir> [--temps 1,2] [--fans 1] [--pwms 1] [--count N]
  fancal calibrate <hwmon-dir> <pwmN>
options:
  --config <file>   settings file (default: ~/.config/fancal/settings.json)
  --logging         write JSON event log to /etc/fancal/logs.json";

struct Args {
    command: String,
    dir: PathBuf,
    pwm: Option<u32>,
    temps: Vec<u32>,
    fans: Vec<u32>,
    pwms: Vec<u32>,
    count: Option<u64>,
    config: Option<PathBuf>,
    logging: bool,
}

fn parse_list(s: &str) -> Result<Vec<u32>> {
    s.split(',')
        .filter(|p| !p.is_empty())
        .map(|p| p.trim().parse::<u32>().with_context(|| format!("bad index '{}'", p)))
        .collect()
}

fn parse_args(raw: &[String]) -> Result<Args> {
    let mut it = raw.iter().skip(1);
    let command = it.next().ok_or_else(|| anyhow!(USAGE))?.clone();
    let dir = PathBuf::from(it.next().ok_or_else(|| anyhow!(USAGE))?);
    let mut args = Args {
        command,
        dir,
        pwm: None,
        temps: Vec::new(),
        fans: Vec::new(),
        pwms: Vec::new(),
        count: None,
        config: None,
        logging: false,
    };
    while let Some(a) = it.next() {
        let mut value = || it.next().ok_or_else(|| anyhow!("missing value for {}", a));
        match a.as_str() {
            "--temps" => args.temps = parse_list(value()?)?,
            "--fans" => args.fans = parse_list(value()?)?,
            "--pwms" => args.pwms = parse_list(value()?)?,
            "--count" => args.count = Some(value()?.parse().context("bad --count")?),
            "--config" => args.config = Some(PathBuf::from(value()?)),
            "--logging" => args.logging = true,
            other => match extract_index(other, "pwm", "") {
                Some(idx) if args.pwm.is_none() => args.pwm = Some(idx),
                _ => bail!("unexpected argument '{}'\n{}", other, USAGE),
            },
        }
    }
    Ok(args)
}

fn main() -> Result<()> {
    let raw: Vec<String> = std::env::args().collect();
    let args = parse_args(&raw)?;

    if args.logging {
        logger::init_logging();
        logger::log_event("startup", serde_json::json!({ "args": raw }));
    }

    let settings = match &args.config {
        Some(p) => load_settings_from(p).with_context(|| format!("loading {}", p.display()))?,
        None => load_settings().unwrap_or_default(),
    };

    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = stop.clone();
    if let Err(e) = ctrlc::set_handler(move || stop_flag.store(true, Ordering::SeqCst)) {
        eprintln!("fancal: failed to set signal handler: {}", e);
    }

    match args.command.as_str() {
        "monitor" => monitor(&args, &settings, &stop),
        "calibrate" => calibrate(&args, &settings, &stop),
        _ => bail!(USAGE),
    }
}

fn monitor(args: &Args, settings: &Settings, stop: &AtomicBool) -> Result<()> {
    let mut c = Controller::new(&args.dir, &args.temps, &args.fans, &args.pwms, settings);
    let mut polls = 0u64;
    service::run_until(&mut c, |c, report| {
        if !report.polled {
            return !stop.load(Ordering::SeqCst);
        }
        polls += 1;
        for (id, e) in &report.faults {
            eprintln!("{}: {}", id, e);
        }
        let mut line = Vec::new();
        line.extend(c.temps().iter().map(|t| format!("{}={}°C", t.name(), t.value())));
        line.extend(c.fans().iter().map(|f| format!("{}={}rpm", f.name(), f.rpm())));
        line.extend(
            c.pwm_fans()
                .iter()
                .map(|p| format!("{}={}rpm pwm={} mode={}", p.name(), p.rpm(), p.pwm(), p.pwm_mode())),
        );
        println!("{}", line.join("  "));
        !stop.load(Ordering::SeqCst) && args.count.map_or(true, |n| polls < n)
    });
    Ok(())
}

fn calibrate(args: &Args, settings: &Settings, stop: &AtomicBool) -> Result<()> {
    // SAFETY: geteuid has no preconditions
    if unsafe { libc::geteuid() } != 0 {
        bail!("calibration writes pwm files and requires root");
    }
    let pwm = args.pwm.ok_or_else(|| anyhow!("no pwmN given\n{}", USAGE))?;
    let mut c = Controller::new(&args.dir, &args.temps, &args.fans, &[pwm], settings);
    let faults = c.update();
    if let Some((id, e)) = faults.into_iter().next() {
        bail!("cannot read {}: {}", id, e);
    }

    let name = c.pwm_fan(pwm).map(|p| p.name()).unwrap_or_default();
    println!("calibrating {} on {} (Ctrl-C aborts)", name, c.device().name());
    let thresholds = service::calibrate_blocking(&mut c, pwm, || stop.load(Ordering::SeqCst))
        .with_context(|| format!("calibrating pwm{}", pwm))?;
    println!("minStop={} minStart={}", thresholds.min_stop, thresholds.min_start);
    Ok(())
}
