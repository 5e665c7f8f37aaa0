//! Asset catalog access

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::AssetId;

/// Where an asset's media can be loaded from
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetLocation {
    pub uri: String,
    /// Lightweight proxy rendition, preferred for playback when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_uri: Option<String>,
}

impl AssetLocation {
    pub fn new(uri: &str) -> Self {
        Self {
            uri: uri.to_string(),
            proxy_uri: None,
        }
    }

    pub fn with_proxy(mut self, proxy_uri: &str) -> Self {
        self.proxy_uri = Some(proxy_uri.to_string());
        self
    }

    pub fn preferred_uri(&self) -> &str {
        self.proxy_uri.as_deref().unwrap_or(&self.uri)
    }
}

/// Resolves asset ids to loadable locations
pub trait AssetCatalog: Send + Sync {
    fn resolve(&self, asset_id: &str) -> Option<AssetLocation>;
}

impl AssetCatalog for HashMap<AssetId, AssetLocation> {
    fn resolve(&self, asset_id: &str) -> Option<AssetLocation> {
        self.get(asset_id).cloned()
    }
}

impl<T: AssetCatalog + ?Sized> AssetCatalog for Arc<T> {
    fn resolve(&self, asset_id: &str) -> Option<AssetLocation> {
        (**self).resolve(asset_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preferred_uri() {
        let loc = AssetLocation::new("file:///media/full.wav");
        assert_eq!(loc.preferred_uri(), "file:///media/full.wav");

        let loc = loc.with_proxy("file:///cache/proxy.wav");
        assert_eq!(loc.preferred_uri(), "file:///cache/proxy.wav");
    }
}
