//! Asset loaders
//!
//! An [`AssetLoader`] turns a URI into decoded audio. The cache owns retry,
//! dedup and failure tracking; loaders only do one fetch-and-decode per call.

use std::path::PathBuf;

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::debug;

use crate::audio::decoder::SimpleDecoder;
use crate::audio::types::AudioBuffer;
use crate::error::{Error, LoadError};

/// Fetches and decodes one asset
pub trait AssetLoader: Send + Sync + 'static {
    /// One fetch-and-decode attempt
    fn load(&self, uri: &str) -> BoxFuture<'static, Result<AudioBuffer, LoadError>>;

    /// Whether decoding is possible at all on this platform/build
    fn is_available(&self) -> bool {
        true
    }
}

/// Loads local files (`file://` URIs or plain paths) with symphonia
#[derive(Debug, Default, Clone)]
pub struct FileLoader;

impl FileLoader {
    pub fn new() -> Self {
        Self
    }

    /// Maps a URI to a local path; other schemes are not fetchable here.
    pub fn uri_to_path(uri: &str) -> Option<PathBuf> {
        if let Some(rest) = uri.strip_prefix("file://") {
            return Some(PathBuf::from(rest));
        }
        if uri.contains("://") {
            return None;
        }
        Some(PathBuf::from(uri))
    }
}

impl AssetLoader for FileLoader {
    fn load(&self, uri: &str) -> BoxFuture<'static, Result<AudioBuffer, LoadError>> {
        let uri = uri.to_string();
        async move {
            let path = FileLoader::uri_to_path(&uri).ok_or_else(|| LoadError::Fetch {
                uri: uri.clone(),
                reason: "unsupported URI scheme".to_string(),
            })?;

            debug!("Loading asset from {}", path.display());
            let decoded = tokio::task::spawn_blocking(move || SimpleDecoder::decode_file(&path))
                .await
                .map_err(|e| LoadError::Decode {
                    uri: uri.clone(),
                    reason: format!("decode task failed: {}", e),
                })?;

            decoded.map_err(|e| match e {
                Error::Io(io) => LoadError::Fetch {
                    uri: uri.clone(),
                    reason: io.to_string(),
                },
                other => LoadError::Decode {
                    uri: uri.clone(),
                    reason: other.to_string(),
                },
            })
        }
        .boxed()
    }

    fn is_available(&self) -> bool {
        SimpleDecoder::codecs_available()
    }
}
