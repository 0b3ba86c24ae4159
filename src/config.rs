use std::cell::Cell;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::color::{hex_color_to_rgb, Rgb};
use crate::error::{KeyerError, Result};

pub const DEFAULT_KEY_COLOR: &str = "#11ff05";
pub const DEFAULT_SIMILARITY: f32 = 0.4;
pub const DEFAULT_SMOOTHNESS: f32 = 0.08;
pub const DEFAULT_SPILL: f32 = 0.1;

/// Validated keying parameters read once per tick.
///
/// `smoothness` and `spill` divide the mask, so both are strictly positive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyConfig {
    key_color: Rgb,
    similarity: f32,
    smoothness: f32,
    spill: f32,
}

impl KeyConfig {
    pub fn new(key_color: Rgb, similarity: f32, smoothness: f32, spill: f32) -> Result<Self> {
        if !similarity.is_finite() {
            return Err(KeyerError::config(format!(
                "similarity must be finite, got {similarity}"
            )));
        }
        if !(smoothness.is_finite() && smoothness > 0.0) {
            return Err(KeyerError::config(format!(
                "smoothness must be > 0, got {smoothness}"
            )));
        }
        if !(spill.is_finite() && spill > 0.0) {
            return Err(KeyerError::config(format!("spill must be > 0, got {spill}")));
        }
        Ok(Self {
            key_color,
            similarity,
            smoothness,
            spill,
        })
    }

    pub fn key_color(&self) -> Rgb {
        self.key_color
    }

    pub fn similarity(&self) -> f32 {
        self.similarity
    }

    pub fn smoothness(&self) -> f32 {
        self.smoothness
    }

    pub fn spill(&self) -> f32 {
        self.spill
    }
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            key_color: hex_color_to_rgb(DEFAULT_KEY_COLOR),
            similarity: DEFAULT_SIMILARITY,
            smoothness: DEFAULT_SMOOTHNESS,
            spill: DEFAULT_SPILL,
        }
    }
}

/// Key settings as written by users: `keycolor` is a `#RRGGBB` string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeySettings {
    pub keycolor: String,
    pub similarity: f32,
    pub smoothness: f32,
    pub spill: f32,
}

impl Default for KeySettings {
    fn default() -> Self {
        Self {
            keycolor: DEFAULT_KEY_COLOR.to_string(),
            similarity: DEFAULT_SIMILARITY,
            smoothness: DEFAULT_SMOOTHNESS,
            spill: DEFAULT_SPILL,
        }
    }
}

impl KeySettings {
    /// Load settings from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| {
            KeyerError::config(format!("failed to parse {}: {e}", path.display()))
        })
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| KeyerError::config(format!("failed to serialize settings: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Resolve into a [`KeyConfig`]. A malformed key color falls back to
    /// black instead of failing.
    pub fn resolve(&self) -> Result<KeyConfig> {
        let key_color = match Rgb::parse_hex(&self.keycolor) {
            Some(rgb) => rgb,
            None => {
                tracing::warn!(
                    "Key color {:?} is not #RRGGBB, using black",
                    self.keycolor
                );
                Rgb::BLACK
            }
        };
        KeyConfig::new(key_color, self.similarity, self.smoothness, self.spill)
    }
}

/// Accessor the render loop calls once per tick. Implementations return the
/// live value, never a snapshot taken at construction.
pub trait ConfigSource {
    fn current(&mut self) -> KeyConfig;
}

impl<F> ConfigSource for F
where
    F: FnMut() -> KeyConfig,
{
    fn current(&mut self) -> KeyConfig {
        self()
    }
}

/// Config cell shared between the caller and the render loop on one thread.
#[derive(Debug, Clone, Default)]
pub struct SharedKeyConfig(Rc<Cell<KeyConfig>>);

impl SharedKeyConfig {
    pub fn new(config: KeyConfig) -> Self {
        Self(Rc::new(Cell::new(config)))
    }

    pub fn get(&self) -> KeyConfig {
        self.0.get()
    }

    pub fn set(&self, config: KeyConfig) {
        self.0.set(config);
    }
}

impl ConfigSource for SharedKeyConfig {
    fn current(&mut self) -> KeyConfig {
        self.get()
    }
}

/// Re-reads a TOML settings file whenever its modification time changes.
pub struct FileConfigSource {
    path: PathBuf,
    modified: Option<SystemTime>,
    config: KeyConfig,
}

impl FileConfigSource {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let modified = modified_time(&path);
        let config = KeySettings::from_file(&path)?.resolve()?;
        tracing::info!("Loaded key settings from {}", path.display());
        Ok(Self {
            path,
            modified,
            config,
        })
    }

    fn reload_if_changed(&mut self) {
        let modified = modified_time(&self.path);
        if modified == self.modified {
            return;
        }
        self.modified = modified;

        match KeySettings::from_file(&self.path).and_then(|s| s.resolve()) {
            Ok(config) => {
                tracing::info!("Reloaded key settings from {}", self.path.display());
                self.config = config;
            }
            Err(e) => {
                tracing::warn!(
                    "Ignoring key settings change in {}: {}",
                    self.path.display(),
                    e
                );
            }
        }
    }
}

impl ConfigSource for FileConfigSource {
    fn current(&mut self) -> KeyConfig {
        self.reload_if_changed();
        self.config
    }
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}
