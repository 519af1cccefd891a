//! Media player snapshots via `playerctl`.

use std::sync::Arc;

use async_trait::async_trait;
use blitz_core::{
    MediaSnapshot, PlaybackStatus, Snapshot, SnapshotKind, SnapshotSource, SourceError,
};

use crate::artwork::ArtworkResolver;
use crate::process::ProcessRunner;

/// `playerctl metadata --format` template; fields are separated by `|||`.
pub const METADATA_FORMAT: &str = "{{title}}|||{{mpris:artUrl}}|||{{artist}}|||{{album}}|||{{position}}|||{{mpris:length}}|||{{status}}|||{{playerName}}";

const FIELD_SEPARATOR: &str = "|||";
const FIELD_COUNT: usize = 8;
const PROGRAM: &str = "playerctl";

/// Reads the active MPRIS player.
pub struct PlayerctlSource {
    runner: Arc<dyn ProcessRunner>,
    artwork: ArtworkResolver,
}

impl PlayerctlSource {
    /// Source that resolves cover art with `artwork`.
    pub fn new(runner: Arc<dyn ProcessRunner>, artwork: ArtworkResolver) -> Self {
        Self { runner, artwork }
    }
}

#[async_trait]
impl SnapshotSource for PlayerctlSource {
    fn kind(&self) -> SnapshotKind {
        SnapshotKind::Media
    }

    async fn poll(&self) -> Result<Snapshot, SourceError> {
        let output = self
            .runner
            .run(PROGRAM, &["metadata", "--format", METADATA_FORMAT])
            .await?;

        if output.timed_out {
            return Err(SourceError::CommandFailed {
                program: PROGRAM.into(),
                message: "timed out".into(),
            });
        }
        if output.exit_code != 0 {
            // playerctl exits 1 with "No players found" when nothing is running.
            if output.stderr.contains("No player") {
                return Err(SourceError::NoPlayer);
            }
            return Err(SourceError::CommandFailed {
                program: PROGRAM.into(),
                message: output.stderr.trim().to_owned(),
            });
        }

        let mut media = parse_metadata(&output.stdout)?;
        media.artwork_uri = self.artwork.resolve(&media.artwork_uri).await;
        Ok(Snapshot::Media(media))
    }
}

/// Parse one line of [`METADATA_FORMAT`] output.
///
/// `artwork_uri` is left as reported by the player.
pub fn parse_metadata(stdout: &str) -> Result<MediaSnapshot, SourceError> {
    let line = stdout.lines().next().unwrap_or_default();
    if line.trim().is_empty() {
        return Err(SourceError::NoPlayer);
    }

    let parts: Vec<&str> = line
        .splitn(FIELD_COUNT, FIELD_SEPARATOR)
        .map(str::trim)
        .collect();
    if parts.len() < FIELD_COUNT {
        return Err(SourceError::UnexpectedOutput {
            program: PROGRAM.into(),
            message: format!("expected {FIELD_COUNT} fields, got {}", parts.len()),
        });
    }

    Ok(MediaSnapshot {
        title: parts[0].to_owned(),
        artwork_uri: parts[1].to_owned(),
        artist: parts[2].to_owned(),
        album: parts[3].to_owned(),
        position: parts[4].parse().ok(),
        length: parts[5].parse().ok(),
        status: PlaybackStatus::parse(parts[6]),
        player: parts[7].to_owned(),
    })
}
