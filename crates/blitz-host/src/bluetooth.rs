//! Connected Bluetooth devices via `bluetoothctl`.

use std::sync::Arc;

use async_trait::async_trait;
use blitz_core::{BluetoothDevice, Snapshot, SnapshotKind, SnapshotSource, SourceError};
use regex::Regex;
use tracing::debug;

use crate::process::ProcessRunner;

const PROGRAM: &str = "bluetoothctl";

/// Parses `bluetoothctl info <mac>` output.
///
/// Per-earbud batteries come only from this output. Vendor earbud protocols
/// and D-Bus battery providers are not queried.
pub struct DeviceInfoParser {
    battery: Regex,
}

impl DeviceInfoParser {
    /// Compile the battery pattern.
    pub fn new() -> Result<Self, regex::Error> {
        // "Battery Percentage: 0x55 (85)"
        Ok(Self {
            battery: Regex::new(r"Battery Percentage: (?:0x[0-9a-fA-F]+ )?\((\d+)\)")?,
        })
    }

    fn reading(&self, text: &str) -> Option<i32> {
        self.battery
            .captures(text)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse().ok())
    }

    /// Fill battery, icon, and connection state from an info dump.
    ///
    /// The first battery reading becomes `battery`. Lines labelled left, right,
    /// or case fill the matching field. Unlabelled multi-reading devices map
    /// two readings to left/right and three to left/right/case.
    pub fn apply(&self, device: &mut BluetoothDevice, info: &str) {
        if let Some(battery) = self.reading(info) {
            device.battery = battery;
        }

        let mut readings = Vec::new();
        for line in info.lines() {
            let line = line.trim();
            if let Some(icon) = line.strip_prefix("Icon:") {
                let icon = icon.trim();
                if !icon.is_empty() {
                    device.icon = icon.to_owned();
                }
            } else if let Some(connected) = line.strip_prefix("Connected:") {
                device.connected = connected.trim() == "yes";
            } else if let Some(value) = self.reading(line) {
                let lower = line.to_lowercase();
                if lower.contains("left") {
                    device.battery_left = value;
                } else if lower.contains("right") {
                    device.battery_right = value;
                } else if lower.contains("case") {
                    device.battery_case = value;
                } else {
                    readings.push(value);
                }
            }
        }

        match readings.as_slice() {
            [left, right, case, ..] => {
                device.battery_left = *left;
                device.battery_right = *right;
                device.battery_case = *case;
            }
            [left, right] => {
                device.battery_left = *left;
                device.battery_right = *right;
            }
            _ => {}
        }
    }
}

/// Parse `bluetoothctl devices Connected` output into devices with default fields.
///
/// Lines look like `Device AA:BB:CC:DD:EE:FF Galaxy Buds2 Pro`; anything else is skipped.
pub fn parse_device_list(stdout: &str) -> Vec<BluetoothDevice> {
    stdout
        .lines()
        .filter_map(|line| {
            let rest = line.trim().strip_prefix("Device ")?;
            let (mac, name) = match rest.split_once(char::is_whitespace) {
                Some((mac, name)) => (mac, name.trim()),
                None => (rest, ""),
            };
            if mac.is_empty() || name.is_empty() {
                return None;
            }
            Some(BluetoothDevice::new(name, mac))
        })
        .collect()
}

/// Lists connected devices and their battery levels.
pub struct BluetoothctlSource {
    runner: Arc<dyn ProcessRunner>,
    parser: DeviceInfoParser,
}

impl BluetoothctlSource {
    /// Create the source.
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Result<Self, regex::Error> {
        Ok(Self {
            runner,
            parser: DeviceInfoParser::new()?,
        })
    }
}

#[async_trait]
impl SnapshotSource for BluetoothctlSource {
    fn kind(&self) -> SnapshotKind {
        SnapshotKind::Bluetooth
    }

    async fn poll(&self) -> Result<Snapshot, SourceError> {
        let output = self.runner.run(PROGRAM, &["devices", "Connected"]).await?;
        if !output.success() {
            return Err(SourceError::CommandFailed {
                program: PROGRAM.into(),
                message: output.stderr.trim().to_owned(),
            });
        }

        let mut devices = parse_device_list(&output.stdout);
        for device in &mut devices {
            let mac = device.mac.clone();
            let info = self.runner.run(PROGRAM, &["info", mac.as_str()]).await;
            match info {
                Ok(info) if info.success() => self.parser.apply(device, &info.stdout),
                Ok(info) => {
                    debug!(mac = %device.mac, exit_code = info.exit_code, "device info unavailable");
                }
                Err(e) => debug!(mac = %device.mac, error = %e, "device info unavailable"),
            }
        }
        Ok(Snapshot::Bluetooth(devices))
    }
}
