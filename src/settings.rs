use crate::config::AppConfig;
use crate::constants::{
    DEFAULT_BG_COLOR, DEFAULT_FONT_COLOR, DEFAULT_PADDING, DEFAULT_SCALE, IMAGE_SETTINGS_KEY,
    STORAGE_FILE_NAME,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Visual settings shared by the live preview and the PNG export.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ImageSettings {
    pub padding: u32,
    pub scale: f64,
    pub font_color: String,
    pub bg_color: String,
    pub transparent: bool,
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self {
            padding: DEFAULT_PADDING,
            scale: DEFAULT_SCALE,
            font_color: DEFAULT_FONT_COLOR.to_string(),
            bg_color: DEFAULT_BG_COLOR.to_string(),
            transparent: false,
        }
    }
}

impl ImageSettings {
    /// Replaces out-of-range values the way the settings form does:
    /// a non-positive or non-finite scale becomes `1.0`, unparsable colors
    /// fall back to the defaults.
    pub fn sanitized(mut self) -> Self {
        if !(self.scale.is_finite() && self.scale > 0.0) {
            self.scale = 1.0;
        }
        if Rgba::parse(&self.font_color).is_none() {
            self.font_color = DEFAULT_FONT_COLOR.to_string();
        }
        if Rgba::parse(&self.bg_color).is_none() {
            self.bg_color = DEFAULT_BG_COLOR.to_string();
        }
        self
    }

    pub fn font_rgba(&self) -> Rgba {
        Rgba::parse(&self.font_color).unwrap_or(Rgba::BLACK)
    }

    pub fn bg_rgba(&self) -> Rgba {
        Rgba::parse(&self.bg_color).unwrap_or(Rgba::WHITE)
    }

    /// Builds settings from the raw text of the settings form. An
    /// unparsable padding reads as `0`, an unparsable scale as `1.0`.
    pub fn from_form(
        padding: &str,
        scale: &str,
        font_color: &str,
        bg_color: &str,
        transparent: bool,
    ) -> Self {
        Self {
            padding: leading_number(padding).unwrap_or(0),
            scale: leading_number(scale).unwrap_or(1.0),
            font_color: font_color.trim().to_string(),
            bg_color: bg_color.trim().to_string(),
            transparent,
        }
        .sanitized()
    }
}

/// Parses the longest numeric prefix, so `"12px"` reads as `12`.
fn leading_number<T: std::str::FromStr>(text: &str) -> Option<T> {
    let text = text.trim();
    (1..=text.len())
        .rev()
        .filter(|&end| text.is_char_boundary(end))
        .find_map(|end| text[..end].parse().ok())
}

/// 8-bit straight-alpha color.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const BLACK: Rgba = Rgba::opaque(0, 0, 0);
    pub const WHITE: Rgba = Rgba::opaque(255, 255, 255);

    pub const fn opaque(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    /// Parses `#rgb`, `#rrggbb`, `#rrggbbaa` and the names `black`, `white`.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        match s.to_ascii_lowercase().as_str() {
            "black" => return Some(Self::BLACK),
            "white" => return Some(Self::WHITE),
            _ => {}
        }
        let hex = s.strip_prefix('#')?;
        if !hex.is_ascii() {
            return None;
        }
        let byte = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
        let nibble = |i: usize| u8::from_str_radix(&hex[i..i + 1], 16).ok().map(|v| v * 17);
        match hex.len() {
            3 => Some(Self::opaque(nibble(0)?, nibble(1)?, nibble(2)?)),
            6 => Some(Self::opaque(byte(0)?, byte(2)?, byte(4)?)),
            8 => Some(Self {
                r: byte(0)?,
                g: byte(2)?,
                b: byte(4)?,
                a: byte(6)?,
            }),
            _ => None,
        }
    }

    pub fn to_hex(&self) -> String {
        if self.a == 255 {
            format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
        } else {
            format!("#{:02x}{:02x}{:02x}{:02x}", self.r, self.g, self.b, self.a)
        }
    }
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to access settings file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("settings file is not valid TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),
}

pub type SettingsResult<T> = std::result::Result<T, SettingsError>;

/// Key-value persistence for the image settings record.
pub trait SettingsStore {
    /// Returns the stored record merged over the defaults, or the defaults
    /// when nothing was stored yet.
    fn load_image_settings(&self) -> SettingsResult<ImageSettings>;
    fn save_image_settings(&mut self, settings: &ImageSettings) -> SettingsResult<()>;
}

/// TOML file with one table per key.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn default_location() -> Self {
        Self::new(AppConfig::config_dir().join(STORAGE_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_table(&self) -> SettingsResult<toml::Table> {
        if !self.path.exists() {
            return Ok(toml::Table::new());
        }
        let content = fs::read_to_string(&self.path).map_err(|source| SettingsError::Io {
            path: self.path.clone(),
            source,
        })?;
        Ok(toml::from_str(&content)?)
    }

    fn write_table(&self, table: &toml::Table) -> SettingsResult<()> {
        let io_err = |source| SettingsError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).map_err(io_err)?;
        }
        let content = toml::to_string_pretty(table)?;
        let temp_path = self.path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path).map_err(io_err)?;
        file.write_all(content.as_bytes()).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        fs::rename(&temp_path, &self.path).map_err(io_err)?;
        Ok(())
    }
}

impl SettingsStore for FileStore {
    fn load_image_settings(&self) -> SettingsResult<ImageSettings> {
        let table = self.read_table()?;
        match table.get(IMAGE_SETTINGS_KEY) {
            Some(value) => Ok(value.clone().try_into::<ImageSettings>()?),
            None => Ok(ImageSettings::default()),
        }
    }

    fn save_image_settings(&mut self, settings: &ImageSettings) -> SettingsResult<()> {
        let mut table = self.read_table()?;
        table.insert(
            IMAGE_SETTINGS_KEY.to_string(),
            toml::Value::try_from(settings)?,
        );
        self.write_table(&table)?;
        tracing::info!(path = %self.path.display(), "Image settings saved");
        Ok(())
    }
}

/// In-memory store used when no settings file is wanted.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    saved: Option<ImageSettings>,
}

impl SettingsStore for MemoryStore {
    fn load_image_settings(&self) -> SettingsResult<ImageSettings> {
        Ok(self.saved.clone().unwrap_or_default())
    }

    fn save_image_settings(&mut self, settings: &ImageSettings) -> SettingsResult<()> {
        self.saved = Some(settings.clone());
        Ok(())
    }
}
