//! Quality presets and resolution.
//!
//! A [`QualitySetting`] is the `{quality_tag, fps, height}` triple handed
//! to backends. Presets live in a [`QualityRegistry`] keyed by a symbolic
//! name; [`QualityRegistry::resolve`] accepts either a name (lookup) or a
//! literal setting (validated passthrough). The registry ships with the
//! `low` / `medium` / `high` presets and accepts runtime registrations.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// A render quality triple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualitySetting {
    /// Tag the backend uses to select its own quality profile.
    pub quality_tag: String,
    pub fps: u32,
    pub height: u32,
}

impl QualitySetting {
    /// Builds a validated setting; fps and height must be positive.
    pub fn new(
        quality_tag: impl Into<String>,
        fps: u32,
        height: u32,
    ) -> Result<Self, EngineError> {
        if fps == 0 {
            return Err(EngineError::InvalidQuality("fps must be positive".into()));
        }
        if height == 0 {
            return Err(EngineError::InvalidQuality("height must be positive".into()));
        }
        Ok(QualitySetting {
            quality_tag: quality_tag.into(),
            fps,
            height,
        })
    }

    pub fn low() -> Self {
        QualitySetting {
            quality_tag: "low_quality".into(),
            fps: 15,
            height: 480,
        }
    }

    pub fn medium() -> Self {
        QualitySetting {
            quality_tag: "medium_quality".into(),
            fps: 30,
            height: 720,
        }
    }

    pub fn high() -> Self {
        QualitySetting {
            quality_tag: "high_quality".into(),
            fps: 60,
            height: 1080,
        }
    }
}

/// Input to quality resolution: a preset name or a literal setting.
#[derive(Debug, Clone)]
pub enum QualityInput {
    Preset(String),
    Literal(QualitySetting),
}

impl From<&str> for QualityInput {
    fn from(name: &str) -> Self {
        QualityInput::Preset(name.to_string())
    }
}

impl From<String> for QualityInput {
    fn from(name: String) -> Self {
        QualityInput::Preset(name)
    }
}

impl From<QualitySetting> for QualityInput {
    fn from(setting: QualitySetting) -> Self {
        QualityInput::Literal(setting)
    }
}

/// Named quality presets, safe for concurrent readers.
#[derive(Debug)]
pub struct QualityRegistry {
    presets: DashMap<String, QualitySetting>,
}

impl QualityRegistry {
    /// Registry pre-seeded with the `low` / `medium` / `high` presets.
    pub fn with_defaults() -> Self {
        let presets = DashMap::new();
        presets.insert("low".to_string(), QualitySetting::low());
        presets.insert("medium".to_string(), QualitySetting::medium());
        presets.insert("high".to_string(), QualitySetting::high());
        QualityRegistry { presets }
    }

    /// Registers (or replaces) a preset under `name`.
    pub fn register(
        &self,
        name: impl Into<String>,
        setting: QualitySetting,
    ) -> Result<(), EngineError> {
        // Re-validate literals that arrive through struct syntax.
        let setting = QualitySetting::new(setting.quality_tag, setting.fps, setting.height)?;
        self.presets.insert(name.into(), setting);
        Ok(())
    }

    /// Resolves a name to its preset, or validates a literal setting.
    pub fn resolve(&self, input: impl Into<QualityInput>) -> Result<QualitySetting, EngineError> {
        match input.into() {
            QualityInput::Preset(name) => self
                .presets
                .get(&name)
                .map(|entry| entry.value().clone())
                .ok_or(EngineError::UnknownPreset(name)),
            QualityInput::Literal(setting) => {
                QualitySetting::new(setting.quality_tag, setting.fps, setting.height)
            }
        }
    }

    /// Registered preset names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.presets.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

impl Default for QualityRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
