//! In-memory project store
//!
//! A self-contained implementation of the three read-side collaborator
//! traits, backed by a JSON project document. Hosts with their own store
//! implement the traits directly; this type serves the CLI and tests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::assets::{AssetCatalog, AssetLocation};
use crate::effects::{EffectDescriptor, EffectLookup};
use crate::timeline::{Sequence, TimelineSource};
use crate::{AssetId, Result};

/// On-disk project document
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDocument {
    pub sequence: Sequence,
    #[serde(default)]
    pub effects: Vec<EffectDescriptor>,
    #[serde(default)]
    pub assets: HashMap<AssetId, AssetLocation>,
}

/// Shared, swappable project state
#[derive(Default)]
pub struct ProjectSnapshot {
    sequence: RwLock<Option<Arc<Sequence>>>,
    effects: RwLock<HashMap<String, EffectDescriptor>>,
    assets: RwLock<HashMap<AssetId, AssetLocation>>,
}

impl ProjectSnapshot {
    pub fn new(document: ProjectDocument) -> Self {
        let effects = document
            .effects
            .into_iter()
            .map(|e| (e.id.clone(), e))
            .collect();
        Self {
            sequence: RwLock::new(Some(Arc::new(document.sequence))),
            effects: RwLock::new(effects),
            assets: RwLock::new(document.assets),
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let document: ProjectDocument = serde_json::from_str(json)?;
        Ok(Self::new(document))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Replaces the active sequence (None closes it)
    pub fn set_sequence(&self, sequence: Option<Sequence>) {
        *write(&self.sequence) = sequence.map(Arc::new);
    }

    pub fn upsert_effect(&self, effect: EffectDescriptor) {
        write(&self.effects).insert(effect.id.clone(), effect);
    }

    pub fn set_asset(&self, asset_id: &str, location: AssetLocation) {
        write(&self.assets).insert(asset_id.to_string(), location);
    }

    pub fn remove_asset(&self, asset_id: &str) {
        write(&self.assets).remove(asset_id);
    }
}

// A poisoned lock only means another reader panicked; the data is still
// a complete snapshot.
fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

impl TimelineSource for ProjectSnapshot {
    fn sequence(&self) -> Option<Arc<Sequence>> {
        read(&self.sequence).clone()
    }
}

impl EffectLookup for ProjectSnapshot {
    fn effect(&self, id: &str) -> Option<EffectDescriptor> {
        read(&self.effects).get(id).cloned()
    }
}

impl AssetCatalog for ProjectSnapshot {
    fn resolve(&self, asset_id: &str) -> Option<AssetLocation> {
        read(&self.assets).get(asset_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::EffectType;

    const DOC: &str = r#"{
        "sequence": {
            "id": "main",
            "tracks": [{
                "id": "a1",
                "kind": "audio",
                "volume": 0.8,
                "clips": [{
                    "id": "c1",
                    "assetId": "music",
                    "range": { "sourceInSec": 0.0, "sourceOutSec": 10.0 },
                    "place": { "timelineInSec": 5.0 },
                    "speed": 2.0,
                    "effects": ["fx1"]
                }]
            }]
        },
        "effects": [{ "id": "fx1", "effectType": "volume", "params": { "level": 0.5 } }],
        "assets": { "music": { "uri": "file:///music.wav", "proxyUri": "file:///music.proxy.wav" } }
    }"#;

    #[test]
    fn test_load_document() {
        let project = ProjectSnapshot::from_json(DOC).unwrap();

        let seq = project.sequence().unwrap();
        let (track, clip) = seq.find_clip("c1").unwrap();
        assert_eq!(track.volume, 0.8);
        assert_eq!(clip.duration(), 5.0);

        let fx = project.effect("fx1").unwrap();
        assert_eq!(fx.effect_type, EffectType::Volume);

        let loc = project.resolve("music").unwrap();
        assert_eq!(loc.preferred_uri(), "file:///music.proxy.wav");
    }

    #[test]
    fn test_close_sequence() {
        let project = ProjectSnapshot::from_json(DOC).unwrap();
        project.set_sequence(None);
        assert!(project.sequence().is_none());
    }

    #[test]
    fn test_malformed_document() {
        let err = ProjectSnapshot::from_json("{ not json").err().unwrap();
        assert!(matches!(err, crate::Error::Parse(_)));
    }
}
