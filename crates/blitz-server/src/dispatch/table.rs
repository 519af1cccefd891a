//! The command allowlist.

use std::collections::BTreeMap;

use blitz_core::{ClientCommand, Invocation};
use tracing::warn;

use super::DispatchError;

const PLAYERCTL: &str = "playerctl";

/// Volume step for `volume_up` / `volume_down`, as a playerctl fraction.
const VOLUME_STEP: &str = "0.05";

/// Media transport control.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlayerAction {
    /// Resume playback.
    Play,
    /// Pause playback.
    Pause,
    /// Toggle play/pause.
    Toggle,
    /// Next track.
    Next,
    /// Previous track.
    Previous,
    /// Raise volume by one step.
    VolumeUp,
    /// Lower volume by one step.
    VolumeDown,
    /// Stop playback.
    Stop,
    /// Absolute volume, 0 to 100 percent.
    SetVolume(u8),
    /// Move the playback position.
    Seek {
        /// Target position, or offset when `relative`.
        seconds: i64,
        /// Whether `seconds` is an offset from the current position.
        relative: bool,
    },
}

impl PlayerAction {
    /// The playerctl invocation for this action.
    pub fn invocation(self) -> Invocation {
        let args: Vec<String> = match self {
            Self::Play => vec!["play".into()],
            Self::Pause => vec!["pause".into()],
            Self::Toggle => vec!["play-pause".into()],
            Self::Next => vec!["next".into()],
            Self::Previous => vec!["previous".into()],
            Self::VolumeUp => vec!["volume".into(), format!("{VOLUME_STEP}+")],
            Self::VolumeDown => vec!["volume".into(), format!("{VOLUME_STEP}-")],
            Self::Stop => vec!["stop".into()],
            Self::SetVolume(percent) => {
                vec!["volume".into(), format!("{}.{:02}", percent / 100, percent % 100)]
            }
            Self::Seek { seconds, relative } => {
                let position = match (relative, seconds < 0) {
                    (false, _) => seconds.to_string(),
                    (true, false) => format!("{seconds}+"),
                    (true, true) => format!("{}-", seconds.unsigned_abs()),
                };
                vec!["position".into(), position]
            }
        };
        Invocation::wait(PLAYERCTL, args)
    }

    fn from_name(name: &str) -> Option<Self> {
        let action = match name {
            "play" | "player_play" => Self::Play,
            "pause" | "player_pause" => Self::Pause,
            "player_toggle" | "play-pause" => Self::Toggle,
            "next" | "player_next" => Self::Next,
            "prev" | "player_prev" | "previous" => Self::Previous,
            "volume_up" | "player_volume_up" => Self::VolumeUp,
            "volume_down" | "player_volume_down" => Self::VolumeDown,
            "stop" => Self::Stop,
            _ => return None,
        };
        Some(action)
    }
}

/// Fixed player command names, including aliases.
const PLAYER_COMMANDS: &[&str] = &[
    "play",
    "player_play",
    "pause",
    "player_pause",
    "player_toggle",
    "play-pause",
    "next",
    "player_next",
    "prev",
    "player_prev",
    "previous",
    "volume_up",
    "player_volume_up",
    "volume_down",
    "player_volume_down",
    "stop",
    "volume",
    "seek",
];

/// Commands handled inside the server.
const BUILTIN_COMMANDS: &[&str] = &["ping", "player_info", "launch"];

/// What a resolved command does.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    /// Media transport control.
    Player(PlayerAction),
    /// Launch a configured desktop application.
    Launch {
        /// Configured app name.
        app: String,
        /// Argument vector from configuration.
        invocation: Invocation,
    },
    /// Liveness check answered by the server.
    Ping,
    /// Poll the media source once and reply with the snapshot.
    PlayerInfo,
}

/// Allowlist mapping command names to actions.
///
/// Lookup is an exact, case-sensitive match.
#[derive(Clone, Debug, Default)]
pub struct CommandTable {
    apps: BTreeMap<String, Invocation>,
}

impl CommandTable {
    /// Build the table from the configured app map (name to argv).
    ///
    /// Empty argv entries and names that shadow a fixed command are skipped.
    pub fn new(apps: &BTreeMap<String, Vec<String>>) -> Self {
        let mut table = BTreeMap::new();
        for (name, argv) in apps {
            if is_reserved(name) {
                warn!(app = %name, "app name shadows a built-in command, skipped");
                continue;
            }
            let Some((program, args)) = argv.split_first() else {
                warn!(app = %name, "app has an empty command line, skipped");
                continue;
            };
            let invocation = Invocation::detach(program.clone(), args.iter().cloned());
            let _ = table.insert(name.clone(), invocation);
        }
        Self { apps: table }
    }

    /// Resolve a parsed command into an action.
    pub fn resolve(&self, command: &ClientCommand) -> Result<Action, DispatchError> {
        let name = command.name.as_str();
        if let Some(action) = PlayerAction::from_name(name) {
            return Ok(Action::Player(action));
        }
        match name {
            "ping" => Ok(Action::Ping),
            "player_info" => Ok(Action::PlayerInfo),
            "volume" => resolve_volume(command),
            "seek" => resolve_seek(command),
            "launch" => {
                let app: String = required(command, "app")?;
                self.launch(&app).ok_or(DispatchError::UnknownApp(app))
            }
            _ => self
                .launch(name)
                .ok_or_else(|| DispatchError::UnknownCommand(name.to_owned())),
        }
    }

    fn launch(&self, app: &str) -> Option<Action> {
        self.apps.get(app).map(|invocation| Action::Launch {
            app: app.to_owned(),
            invocation: invocation.clone(),
        })
    }

    /// Every accepted command name, sorted.
    pub fn command_names(&self) -> Vec<String> {
        let mut names: Vec<String> = PLAYER_COMMANDS
            .iter()
            .chain(BUILTIN_COMMANDS)
            .map(|name| (*name).to_owned())
            .chain(self.apps.keys().cloned())
            .collect();
        names.sort();
        names
    }

    /// Configured app names, sorted.
    pub fn app_names(&self) -> Vec<&str> {
        self.apps.keys().map(String::as_str).collect()
    }
}

fn is_reserved(name: &str) -> bool {
    PLAYER_COMMANDS.contains(&name) || BUILTIN_COMMANDS.contains(&name)
}

fn required<T: serde::de::DeserializeOwned>(
    command: &ClientCommand,
    key: &str,
) -> Result<T, DispatchError> {
    command
        .param(key)
        .map_err(|e| DispatchError::invalid_params(&command.name, format!("{key}: {e}")))?
        .ok_or_else(|| DispatchError::invalid_params(&command.name, format!("missing \"{key}\"")))
}

fn resolve_volume(command: &ClientCommand) -> Result<Action, DispatchError> {
    let percent: i64 = required(command, "percent")?;
    let percent = u8::try_from(percent)
        .ok()
        .filter(|p| *p <= 100)
        .ok_or_else(|| DispatchError::invalid_params(&command.name, "percent must be 0-100"))?;
    Ok(Action::Player(PlayerAction::SetVolume(percent)))
}

fn resolve_seek(command: &ClientCommand) -> Result<Action, DispatchError> {
    let seconds: i64 = required(command, "seconds")?;
    let relative = command
        .param::<bool>("relative")
        .map_err(|e| DispatchError::invalid_params(&command.name, format!("relative: {e}")))?
        .unwrap_or(false);
    if !relative && seconds < 0 {
        return Err(DispatchError::invalid_params(
            &command.name,
            "absolute position must not be negative",
        ));
    }
    Ok(Action::Player(PlayerAction::Seek { seconds, relative }))
}
