//! Wi-Fi link state via `nmcli`, `iw`, and sysfs interface counters.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use blitz_core::{Snapshot, SnapshotKind, SnapshotSource, SourceError, WifiSnapshot};
use parking_lot::Mutex;
use tracing::debug;

use crate::process::ProcessRunner;

const NMCLI: &str = "nmcli";
const IW: &str = "iw";
const DEFAULT_SYSFS_ROOT: &str = "/sys/class/net";
const UNIT_OF_SPEED: &str = "Mbps";

/// Split one line of `nmcli -t` output on unescaped colons.
pub fn split_terse(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            ':' => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}

/// Band label for an nmcli frequency such as `"5180 MHz"`.
///
/// Unparseable input is returned unchanged.
pub fn frequency_band(freq: &str) -> String {
    let mhz = freq
        .split_whitespace()
        .next()
        .and_then(|n| n.parse::<u32>().ok());
    match mhz {
        Some(mhz) if mhz < 2_500 => "2.4 GHz".into(),
        Some(mhz) if mhz < 5_925 => "5 GHz".into(),
        Some(_) => "6 GHz".into(),
        None => freq.trim().to_owned(),
    }
}

/// Build a snapshot from `nmcli -t -f ACTIVE,SSID,SIGNAL,FREQ,DEVICE dev wifi`.
///
/// Returns a disconnected snapshot when no line is marked active.
pub fn parse_active_network(stdout: &str) -> WifiSnapshot {
    let mut snapshot = WifiSnapshot {
        unit_of_speed: UNIT_OF_SPEED.into(),
        ..WifiSnapshot::default()
    };
    for line in stdout.lines() {
        if !line.starts_with("yes:") {
            continue;
        }
        let fields = split_terse(line);
        if fields.len() < 5 {
            continue;
        }
        snapshot.connected = true;
        snapshot.ssid.clone_from(&fields[1]);
        snapshot.signal_strength = fields[2].trim().parse::<u8>().map_or(0, |s| s.min(100));
        snapshot.frequency = frequency_band(&fields[3]);
        snapshot.interface.clone_from(&fields[4]);
        break;
    }
    snapshot
}

/// Name of the active connection bound to `interface` from
/// `nmcli -t -f NAME,DEVICE connection show --active`.
pub fn parse_connection_name(stdout: &str, interface: &str) -> Option<String> {
    stdout.lines().find_map(|line| {
        let mut fields = split_terse(line);
        if fields.len() >= 2 && fields[1] == interface {
            Some(fields.swap_remove(0))
        } else {
            None
        }
    })
}

/// Fill security and IP address from `nmcli -t -f ... connection show <name>`.
pub fn apply_connection_details(snapshot: &mut WifiSnapshot, stdout: &str) {
    for line in stdout.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        let present = !value.is_empty() && value != "--";
        if key == "802-11-wireless-security.key-mgmt" {
            snapshot.security = if present {
                value.to_uppercase()
            } else {
                "Open".into()
            };
        } else if key.starts_with("IP4.ADDRESS") && present {
            let address = value.split('/').next().unwrap_or(value);
            snapshot.ip_address = address.to_owned();
        }
    }
}

/// Transmit bitrate in whole Mbps from `iw dev <if> link`.
pub fn parse_tx_bitrate(stdout: &str) -> Option<u32> {
    stdout.lines().find_map(|line| {
        let rest = line.trim().strip_prefix("tx bitrate:")?;
        let value = rest.split_whitespace().next()?;
        value.split('.').next()?.parse().ok()
    })
}

struct CounterSample {
    interface: String,
    rx_bytes: u64,
    tx_bytes: u64,
    at: Instant,
}

/// Turns successive interface byte counters into Mbps estimates.
///
/// The first sample (or the first after an interface change) yields zero.
#[derive(Default)]
pub struct ThroughputMeter {
    last: Option<CounterSample>,
}

impl ThroughputMeter {
    /// Record counters and return `(download, upload)` in Mbps since the previous sample.
    #[allow(clippy::cast_precision_loss)]
    pub fn sample(
        &mut self,
        interface: &str,
        rx_bytes: u64,
        tx_bytes: u64,
        at: Instant,
    ) -> (f64, f64) {
        let previous = self.last.replace(CounterSample {
            interface: interface.to_owned(),
            rx_bytes,
            tx_bytes,
            at,
        });
        let Some(previous) = previous else {
            return (0.0, 0.0);
        };
        if previous.interface != interface {
            return (0.0, 0.0);
        }
        let secs = at.saturating_duration_since(previous.at).as_secs_f64();
        if secs <= 0.0 {
            return (0.0, 0.0);
        }
        let mbps = |now: u64, before: u64| {
            let bits = now.saturating_sub(before) as f64 * 8.0;
            (bits / secs / 1_000_000.0 * 100.0).round() / 100.0
        };
        (
            mbps(rx_bytes, previous.rx_bytes),
            mbps(tx_bytes, previous.tx_bytes),
        )
    }
}

/// Reads the active Wi-Fi link. Keeps throughput state per source instance.
pub struct NmcliWifiSource {
    runner: Arc<dyn ProcessRunner>,
    sysfs_root: PathBuf,
    meter: Mutex<ThroughputMeter>,
}

impl NmcliWifiSource {
    /// Source reading counters from `/sys/class/net`.
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self::with_sysfs_root(runner, DEFAULT_SYSFS_ROOT)
    }

    /// Source reading counters below `root` instead of `/sys/class/net`.
    pub fn with_sysfs_root(runner: Arc<dyn ProcessRunner>, root: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            sysfs_root: root.into(),
            meter: Mutex::new(ThroughputMeter::default()),
        }
    }

    async fn read_counter(&self, interface: &str, name: &str) -> Result<u64, SourceError> {
        let path = self
            .sysfs_root
            .join(interface)
            .join("statistics")
            .join(name);
        let raw = tokio::fs::read_to_string(&path).await?;
        raw.trim()
            .parse()
            .map_err(|e: std::num::ParseIntError| SourceError::UnexpectedOutput {
                program: path.display().to_string(),
                message: e.to_string(),
            })
    }

    async fn fill_connection_details(&self, snapshot: &mut WifiSnapshot) {
        let active = self
            .runner
            .run(NMCLI, &["-t", "-f", "NAME,DEVICE", "connection", "show", "--active"])
            .await;
        let name = match active {
            Ok(out) if out.success() => parse_connection_name(&out.stdout, &snapshot.interface),
            _ => None,
        };
        let Some(name) = name else {
            debug!(interface = %snapshot.interface, "no active connection profile");
            return;
        };

        let details = self
            .runner
            .run(
                NMCLI,
                &[
                    "-t",
                    "-f",
                    "802-11-wireless-security.key-mgmt,IP4.ADDRESS",
                    "connection",
                    "show",
                    name.as_str(),
                ],
            )
            .await;
        if let Ok(out) = details {
            if out.success() {
                apply_connection_details(snapshot, &out.stdout);
            }
        }
    }

    async fn fill_link_speed(&self, snapshot: &mut WifiSnapshot) {
        let interface = snapshot.interface.clone();
        match self.runner.run(IW, &["dev", interface.as_str(), "link"]).await {
            Ok(out) if out.success() => {
                if let Some(speed) = parse_tx_bitrate(&out.stdout) {
                    snapshot.link_speed = speed;
                }
            }
            Ok(out) => debug!(interface = %interface, exit_code = out.exit_code, "iw link failed"),
            Err(e) => debug!(interface = %interface, error = %e, "iw unavailable"),
        }
    }

    async fn fill_throughput(&self, snapshot: &mut WifiSnapshot) {
        let interface = snapshot.interface.as_str();
        let counters = async {
            let rx = self.read_counter(interface, "rx_bytes").await?;
            let tx = self.read_counter(interface, "tx_bytes").await?;
            Ok::<_, SourceError>((rx, tx))
        };
        match counters.await {
            Ok((rx, tx)) => {
                let (down, up) = self.meter.lock().sample(interface, rx, tx, Instant::now());
                snapshot.download_speed = down;
                snapshot.upload_speed = up;
            }
            Err(e) => debug!(interface, error = %e, "interface counters unavailable"),
        }
    }
}

#[async_trait]
impl SnapshotSource for NmcliWifiSource {
    fn kind(&self) -> SnapshotKind {
        SnapshotKind::Wifi
    }

    async fn poll(&self) -> Result<Snapshot, SourceError> {
        let output = self
            .runner
            .run(NMCLI, &["-t", "-f", "ACTIVE,SSID,SIGNAL,FREQ,DEVICE", "dev", "wifi"])
            .await?;
        if !output.success() {
            return Err(SourceError::CommandFailed {
                program: NMCLI.into(),
                message: output.stderr.trim().to_owned(),
            });
        }

        let mut snapshot = parse_active_network(&output.stdout);
        if !snapshot.connected {
            return Ok(Snapshot::Wifi(snapshot));
        }

        self.fill_connection_details(&mut snapshot).await;
        self.fill_link_speed(&mut snapshot).await;
        self.fill_throughput(&mut snapshot).await;
        Ok(Snapshot::Wifi(snapshot))
    }
}
