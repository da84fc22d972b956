use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_with::{base64::Base64, serde_as};
use thiserror::Error;
use tracing::{error, info};

use crate::models::{MediaPayload, Settings, StyleReference};

#[derive(Debug, Error)]
pub enum PresetError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

#[serde_as]
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PresetStyle {
    #[serde_as(as = "Base64")]
    #[serde(rename = "base64")]
    pub data: Vec<u8>,
    pub mime_type: String,
    pub weight: f32,
}

impl PresetStyle {
    /// Stores the resolved weight, so an unset weight is saved as 1.0.
    pub fn from_reference(reference: &StyleReference) -> Self {
        Self {
            data: reference.image.data.to_vec(),
            mime_type: reference.image.mime_type.clone(),
            weight: reference.weight(),
        }
    }

    pub fn to_reference(&self) -> StyleReference {
        StyleReference::new(MediaPayload::new(self.mime_type.clone(), self.data.clone())).with_weight(self.weight)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Preset {
    pub name: String,
    pub settings: Settings,
    pub styles: Vec<PresetStyle>,
}

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PresetSummary {
    pub name: String,
    pub settings: Settings,
    pub style_count: usize,
}

/// Named presets kept as a JSON array on disk.
pub struct PresetStore {
    path: Option<PathBuf>,
    presets: RwLock<Vec<Preset>>,
}

impl PresetStore {
    pub fn in_memory() -> Self {
        Self { path: None, presets: RwLock::default() }
    }

    /// Opens the store. A missing or unreadable file yields an empty store.
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let presets = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                error!("❌ Error reading presets from {}: {}", path.display(), e);
                Vec::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                error!("❌ Error reading presets from {}: {}", path.display(), e);
                Vec::new()
            }
        };
        info!("🎛️ Loaded {} preset(s) from {}", presets.len(), path.display());
        Self { path: Some(path), presets: RwLock::new(presets) }
    }

    pub fn list(&self) -> Vec<PresetSummary> {
        self.presets
            .read()
            .iter()
            .map(|p| PresetSummary { name: p.name.clone(), settings: p.settings, style_count: p.styles.len() })
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<Preset> {
        self.presets.read().iter().find(|p| p.name == name).cloned()
    }

    /// Saves a preset, replacing one whose name matches case-insensitively.
    pub fn save(&self, name: &str, settings: Settings, styles: &[StyleReference]) -> Result<(), PresetError> {
        let preset = Preset {
            name: name.to_string(),
            settings,
            styles: styles.iter().map(PresetStyle::from_reference).collect(),
        };
        let mut guard = self.presets.write();
        match guard.iter().position(|p| p.name.to_lowercase() == name.to_lowercase()) {
            Some(i) => guard[i] = preset,
            None => guard.push(preset),
        }
        self.persist(&guard)
    }

    pub fn delete(&self, name: &str) -> Result<bool, PresetError> {
        let mut guard = self.presets.write();
        let before = guard.len();
        guard.retain(|p| p.name != name);
        let removed = guard.len() != before;
        if removed {
            self.persist(&guard)?;
        }
        Ok(removed)
    }

    fn persist(&self, presets: &[Preset]) -> Result<(), PresetError> {
        if let Some(path) = &self.path {
            std::fs::write(path, serde_json::to_vec_pretty(presets)?)?;
        }
        Ok(())
    }
}
