//! Cover art resolution.
//!
//! MPRIS players report artwork as `file://` paths that a browser on another
//! machine cannot open, so local files are inlined as base64 `data:` URIs.
//! Remote `http(s)` URLs are passed through for the browser to fetch.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use parking_lot::RwLock;
use tracing::debug;

/// Entries kept before the cache is cleared.
const CACHE_CAPACITY: usize = 64;

/// Turns player artwork references into URIs a remote browser can display.
pub struct ArtworkResolver {
    fallback: Option<PathBuf>,
    cache: RwLock<HashMap<PathBuf, String>>,
}

impl Default for ArtworkResolver {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ArtworkResolver {
    /// Resolver that uses `fallback` when a track has no artwork.
    pub fn new(fallback: Option<PathBuf>) -> Self {
        Self {
            fallback,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve an artwork reference. Returns an empty string when nothing usable exists.
    pub async fn resolve(&self, art_url: &str) -> String {
        let art_url = art_url.trim();
        if art_url.starts_with("http://") || art_url.starts_with("https://") {
            return art_url.to_owned();
        }

        let path = match art_url.strip_prefix("file://") {
            Some(path) => PathBuf::from(path),
            None if art_url.starts_with('/') => PathBuf::from(art_url),
            None => match &self.fallback {
                Some(fallback) => fallback.clone(),
                None => return String::new(),
            },
        };

        let cached = self.cache.read().get(&path).cloned();
        if let Some(hit) = cached {
            return hit;
        }

        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let uri = data_uri(&path, &bytes);
                self.remember(path, uri.clone());
                uri
            }
            Err(e) => {
                debug!(path = %path.display(), error = %e, "artwork unreadable");
                String::new()
            }
        }
    }

    fn remember(&self, path: PathBuf, uri: String) {
        let mut cache = self.cache.write();
        if cache.len() >= CACHE_CAPACITY {
            cache.clear();
        }
        let _ = cache.insert(path, uri);
    }

    /// Number of cached entries.
    pub fn cached(&self) -> usize {
        self.cache.read().len()
    }
}

/// MIME subtype for an image path, `jpeg` when unknown.
pub fn image_subtype(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("png") => "png",
        Some("gif") => "gif",
        Some("webp") => "webp",
        Some("bmp") => "bmp",
        Some("svg") => "svg+xml",
        _ => "jpeg",
    }
}

fn data_uri(path: &Path, bytes: &[u8]) -> String {
    format!(
        "data:image/{};base64,{}",
        image_subtype(path),
        STANDARD.encode(bytes)
    )
}
