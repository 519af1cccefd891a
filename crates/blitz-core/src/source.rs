//! Snapshot source capability.

use async_trait::async_trait;

use crate::errors::SourceError;
use crate::snapshot::{Snapshot, SnapshotKind};

/// Reads one kind of host state on demand.
///
/// Implementations must not cache failures: every call re-reads the host.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Kind of snapshot this source produces.
    fn kind(&self) -> SnapshotKind;

    /// Read the current state.
    async fn poll(&self) -> Result<Snapshot, SourceError>;
}
