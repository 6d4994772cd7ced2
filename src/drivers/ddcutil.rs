//! External monitors over DDC/CI, driven through the `ddcutil` tool.
//!
//! VCP feature 0x10 is luminance. Values are reported on the monitor's own
//! scale, which is 0..=100 for nearly every display.

use std::{
    path::PathBuf,
    process::Stdio,
    sync::{
        LazyLock,
        atomic::{AtomicBool, Ordering},
    },
};

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use log::debug;
use regex::Regex;
use tokio::process::Command;

use crate::device::{DeviceEnumerator, MonitorDevice};

const BRIGHTNESS_VCP: &str = "10";

type Pattern = LazyLock<Result<Regex, regex::Error>>;

static DISPLAY_RE: Pattern = LazyLock::new(|| Regex::new(r"^Display\s+(\d+)"));
static BUS_RE: Pattern = LazyLock::new(|| Regex::new(r"I2C bus:\s*/dev/i2c-(\d+)"));
static MONITOR_RE: Pattern = LazyLock::new(|| Regex::new(r"^\s*Monitor:\s*(.+?)\s*$"));
static VCP_RE: Pattern =
    LazyLock::new(|| Regex::new(r"current value\s*=\s*(\d+),\s*max value\s*=\s*(\d+)"));

/// Compiled on first use, shared by every later parse.
fn compiled(pattern: &'static Pattern) -> Result<&'static Regex> {
    pattern.as_ref().map_err(|e| anyhow!("invalid ddcutil pattern: {e}"))
}

/// A display reported by `ddcutil detect`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedDisplay {
    pub number: u32,
    pub bus: Option<u32>,
    pub monitor: Option<String>,
}

impl DetectedDisplay {
    /// Identity used in the registry: the `MFG:Model:Serial` triple when the
    /// monitor reports one, otherwise the I2C bus.
    pub fn identity(&self) -> String {
        match (&self.monitor, self.bus) {
            (Some(monitor), _) => monitor.clone(),
            (None, Some(bus)) => format!("i2c-{bus}"),
            (None, None) => format!("display-{}", self.number),
        }
    }
}

/// Parses `ddcutil detect --terse` output. Invalid displays are skipped.
pub fn parse_detect(output: &str) -> Result<Vec<DetectedDisplay>> {
    let display_re = compiled(&DISPLAY_RE)?;
    let bus_re = compiled(&BUS_RE)?;
    let monitor_re = compiled(&MONITOR_RE)?;

    let mut displays = Vec::new();
    let mut current: Option<DetectedDisplay> = None;
    for line in output.lines() {
        if let Some(caps) = display_re.captures(line) {
            displays.extend(current.take());
            current = Some(DetectedDisplay {
                number: caps[1].parse()?,
                bus: None,
                monitor: None,
            });
            continue;
        }
        if !line.starts_with(char::is_whitespace) && !line.trim().is_empty() {
            // "Invalid display", "Phantom display" and friends end the block
            displays.extend(current.take());
            continue;
        }
        let Some(display) = current.as_mut() else {
            continue;
        };
        if let Some(caps) = bus_re.captures(line) {
            display.bus = Some(caps[1].parse()?);
        } else if let Some(caps) = monitor_re.captures(line) {
            let monitor = caps[1].to_string();
            if monitor.trim_matches(':').is_empty() {
                continue;
            }
            display.monitor = Some(monitor);
        }
    }
    displays.extend(current);
    Ok(displays)
}

/// Parses `ddcutil getvcp 10` output into `(current, max)`.
pub fn parse_getvcp(output: &str) -> Result<(i32, i32)> {
    let caps = compiled(&VCP_RE)?
        .captures(output)
        .ok_or_else(|| anyhow!("failed to parse ddcutil output: {}", output.trim()))?;
    Ok((caps[1].parse()?, caps[2].parse()?))
}

pub struct DdcutilEnumerator {
    binary: PathBuf,
}

impl DdcutilEnumerator {
    pub fn new(binary: PathBuf) -> Self {
        Self { binary }
    }
}

async fn run(binary: &PathBuf, args: &[String]) -> Result<String> {
    let out = Command::new(binary)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .with_context(|| format!("failed to run {}", binary.display()))?;
    if !out.status.success() {
        bail!(
            "{} {} failed: status {:?}: {}",
            binary.display(),
            args.join(" "),
            out.status.code(),
            String::from_utf8_lossy(&out.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&out.stdout).into_owned())
}

#[async_trait]
impl DeviceEnumerator for DdcutilEnumerator {
    async fn enumerate(&self) -> Result<Vec<Box<dyn MonitorDevice>>> {
        let output = run(&self.binary, &["detect".into(), "--terse".into()]).await?;
        Ok(parse_detect(&output)?
            .into_iter()
            .inspect(|d| debug!("ddcutil display {}: {}", d.number, d.identity()))
            .map(|display| {
                Box::new(DdcDisplay {
                    id: display.identity(),
                    binary: self.binary.clone(),
                    display,
                    closed: AtomicBool::new(false),
                }) as Box<dyn MonitorDevice>
            })
            .collect())
    }

    fn name(&self) -> &'static str {
        "ddcutil"
    }
}

#[derive(Debug)]
pub struct DdcDisplay {
    id: String,
    binary: PathBuf,
    display: DetectedDisplay,
    closed: AtomicBool,
}

impl DdcDisplay {
    fn selector(&self) -> [String; 2] {
        match self.display.bus {
            Some(bus) => ["--bus".into(), bus.to_string()],
            None => ["--display".into(), self.display.number.to_string()],
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            bail!("{} is disposed", self.id);
        }
        Ok(())
    }
}

#[async_trait]
impl MonitorDevice for DdcDisplay {
    fn id(&self) -> &str {
        &self.id
    }

    async fn brightness(&self) -> Result<i32> {
        self.ensure_open()?;
        let mut args = vec!["getvcp".to_string(), BRIGHTNESS_VCP.to_string()];
        args.extend(self.selector());
        let output = run(&self.binary, &args).await?;
        parse_getvcp(&output).map(|(current, _max)| current)
    }

    async fn set_brightness(&self, value: i32) -> Result<()> {
        self.ensure_open()?;
        if value < 0 {
            bail!("brightness {value} is out of range");
        }
        let mut args = vec![
            "setvcp".to_string(),
            BRIGHTNESS_VCP.to_string(),
            value.to_string(),
        ];
        args.extend(self.selector());
        run(&self.binary, &args).await.map(|_| ())
    }

    async fn dispose(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
