use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

pub const MIN_SCALE: f32 = 0.25;
pub const MAX_SCALE: f32 = 8.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HighlightStyle {
    pub color: [u8; 3],
    pub opacity: f32,
}

impl Default for HighlightStyle {
    fn default() -> Self {
        Self {
            color: [255, 255, 0],
            opacity: 0.4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    pub scale: f32,
    pub highlight: HighlightStyle,
    pub log_filter: String,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            scale: 1.5,
            highlight: HighlightStyle::default(),
            log_filter: "info".to_string(),
        }
    }
}

impl ViewerConfig {
    pub fn default_path(dirs: &ProjectDirs) -> PathBuf {
        dirs.config_dir().join("config.toml")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {:?}", path))?;
        let config: ViewerConfig = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {:?}", path))?;
        Ok(config.sanitized())
    }

    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn with_scale(mut self, scale: Option<f32>) -> Self {
        if let Some(scale) = scale {
            self.scale = scale;
        }
        self.sanitized()
    }

    fn sanitized(mut self) -> Self {
        self.scale = if self.scale.is_finite() {
            self.scale.clamp(MIN_SCALE, MAX_SCALE)
        } else {
            ViewerConfig::default().scale
        };
        self.highlight.opacity = if self.highlight.opacity.is_finite() {
            self.highlight.opacity.clamp(0.0, 1.0)
        } else {
            HighlightStyle::default().opacity
        };
        self
    }
}
