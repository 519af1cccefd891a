//! Host state snapshots broadcast by the pollers.

use serde::{Deserialize, Serialize};

use crate::protocol::{ServerMessage, Status};

/// Battery value for "no reading available".
pub const BATTERY_UNAVAILABLE: i32 = -1;

/// Which source produced a snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SnapshotKind {
    /// Media player via MPRIS.
    Media,
    /// Connected Bluetooth devices.
    Bluetooth,
    /// Active Wi-Fi link.
    Wifi,
}

impl SnapshotKind {
    /// Stable name for logs and metric labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Media => "media",
            Self::Bluetooth => "bluetooth",
            Self::Wifi => "wifi",
        }
    }

    /// Envelope status used when broadcasting this kind.
    pub fn status(self) -> Status {
        match self {
            Self::Media => Status::Player,
            Self::Bluetooth => Status::Bluetooth,
            Self::Wifi => Status::Wifi,
        }
    }
}

/// Player playback state as reported by MPRIS.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackStatus {
    /// Currently playing.
    Playing,
    /// Paused mid-track.
    Paused,
    /// Stopped.
    Stopped,
    /// Anything else the player reported.
    #[default]
    #[serde(other)]
    Unknown,
}

impl PlaybackStatus {
    /// Parse the MPRIS `PlaybackStatus` string.
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "Playing" => Self::Playing,
            "Paused" => Self::Paused,
            "Stopped" => Self::Stopped,
            _ => Self::Unknown,
        }
    }
}

/// Current track of the active media player.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaSnapshot {
    /// Track title.
    pub title: String,
    /// Track artist.
    pub artist: String,
    /// Album name.
    pub album: String,
    /// Cover art, either a `data:` URI or a remote URL. Empty when unknown.
    pub artwork_uri: String,
    /// Playback position in microseconds.
    pub position: Option<u64>,
    /// Track length in microseconds.
    pub length: Option<u64>,
    /// Playback state.
    pub status: PlaybackStatus,
    /// MPRIS player name.
    pub player: String,
}

/// A connected Bluetooth device.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BluetoothDevice {
    /// Display name.
    pub name: String,
    /// MAC address.
    pub mac: String,
    /// Battery percentage, [`BATTERY_UNAVAILABLE`] when not reported.
    pub battery: i32,
    /// Left earbud battery.
    pub battery_left: i32,
    /// Right earbud battery.
    pub battery_right: i32,
    /// Charging case battery.
    pub battery_case: i32,
    /// Freedesktop icon hint (`audio-headset`, `input-mouse`, ...).
    pub icon: String,
    /// Whether the device is connected.
    pub connected: bool,
}

impl BluetoothDevice {
    /// Device with no battery readings and the generic icon.
    pub fn new(name: impl Into<String>, mac: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mac: mac.into(),
            battery: BATTERY_UNAVAILABLE,
            battery_left: BATTERY_UNAVAILABLE,
            battery_right: BATTERY_UNAVAILABLE,
            battery_case: BATTERY_UNAVAILABLE,
            icon: "bluetooth".into(),
            connected: true,
        }
    }
}

/// Active Wi-Fi link state.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WifiSnapshot {
    /// Network name.
    pub ssid: String,
    /// Signal quality 0-100.
    pub signal_strength: u8,
    /// Negotiated transmit bitrate in Mbps.
    pub link_speed: u32,
    /// Band label such as `"5 GHz"`.
    pub frequency: String,
    /// Key management, or `"Open"`.
    pub security: String,
    /// IPv4 address without prefix length.
    pub ip_address: String,
    /// Whether an association exists.
    pub connected: bool,
    /// Receive throughput estimate.
    pub download_speed: f64,
    /// Transmit throughput estimate.
    pub upload_speed: f64,
    /// Wireless interface name.
    pub interface: String,
    /// Unit of the throughput estimates.
    pub unit_of_speed: String,
}

/// One poll result.
#[derive(Clone, Debug, PartialEq)]
pub enum Snapshot {
    /// Active player state.
    Media(MediaSnapshot),
    /// All connected Bluetooth devices.
    Bluetooth(Vec<BluetoothDevice>),
    /// Active Wi-Fi link.
    Wifi(WifiSnapshot),
}

impl Snapshot {
    /// Source kind that produced this snapshot.
    pub fn kind(&self) -> SnapshotKind {
        match self {
            Self::Media(_) => SnapshotKind::Media,
            Self::Bluetooth(_) => SnapshotKind::Bluetooth,
            Self::Wifi(_) => SnapshotKind::Wifi,
        }
    }

    /// Wrap in the broadcast envelope.
    pub fn to_message(&self) -> ServerMessage {
        let data = match self {
            Self::Media(media) => serde_json::to_value(media),
            Self::Bluetooth(devices) => serde_json::to_value(devices),
            Self::Wifi(wifi) => serde_json::to_value(wifi),
        };
        match data {
            Ok(data) => ServerMessage::new(self.kind().status()).with_data(data),
            Err(e) => {
                tracing::error!(kind = self.kind().as_str(), error = %e, "failed to serialize snapshot");
                ServerMessage::new(self.kind().status())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn media_snapshot_message() {
        let snapshot = Snapshot::Media(MediaSnapshot {
            title: "X".into(),
            artist: "Y".into(),
            status: PlaybackStatus::Playing,
            ..MediaSnapshot::default()
        });
        let msg = snapshot.to_message();
        assert_eq!(msg.status, Status::Player);
        let data = msg.data.unwrap();
        assert_eq!(data["title"], "X");
        assert_eq!(data["artist"], "Y");
        assert_eq!(data["status"], "Playing");
        assert_eq!(data["artworkUri"], "");
    }

    #[test]
    fn bluetooth_device_defaults() {
        let device = BluetoothDevice::new("Buds", "AA:BB:CC:DD:EE:FF");
        assert_eq!(device.battery, BATTERY_UNAVAILABLE);
        assert_eq!(device.icon, "bluetooth");
        assert!(device.connected);

        let json = serde_json::to_value(&device).unwrap();
        assert_eq!(json["batteryLeft"], -1);
        assert_eq!(json["mac"], "AA:BB:CC:DD:EE:FF");
    }

    #[test]
    fn bluetooth_list_message() {
        let msg = Snapshot::Bluetooth(vec![]).to_message();
        assert_eq!(msg.status, Status::Bluetooth);
        assert_eq!(msg.data, Some(json!([])));
    }

    #[test]
    fn wifi_field_names() {
        let msg = Snapshot::Wifi(WifiSnapshot {
            ssid: "home".into(),
            signal_strength: 70,
            unit_of_speed: "Mbps".into(),
            ..WifiSnapshot::default()
        })
        .to_message();
        assert_eq!(msg.status, Status::Wifi);
        let data = msg.data.unwrap();
        assert_eq!(data["signalStrength"], 70);
        assert_eq!(data["unitOfSpeed"], "Mbps");
        assert!(data.get("ipAddress").is_some());
    }

    #[test]
    fn playback_status_parse() {
        assert_eq!(PlaybackStatus::parse("Playing\n"), PlaybackStatus::Playing);
        assert_eq!(PlaybackStatus::parse("Paused"), PlaybackStatus::Paused);
        assert_eq!(PlaybackStatus::parse("Stopped"), PlaybackStatus::Stopped);
        assert_eq!(PlaybackStatus::parse("weird"), PlaybackStatus::Unknown);
    }

    #[test]
    fn kind_status_mapping() {
        assert_eq!(SnapshotKind::Media.status(), Status::Player);
        assert_eq!(SnapshotKind::Wifi.as_str(), "wifi");
    }
}
