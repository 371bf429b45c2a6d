//! Reader presentation settings: font, size, line height, content width.
//!
//! Settings are a plain value handed to the renderers; persistence goes through
//! [`SettingsStore`] so the CLI, server and browser can each keep them where
//! they like.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Key the settings are persisted under.
pub const SETTINGS_KEY: &str = "reader-settings";

pub const FONT_SIZE_MIN: u8 = 12;
pub const FONT_SIZE_MAX: u8 = 28;
pub const FONT_SIZE_STEP: u8 = 2;
pub const LINE_HEIGHT_MIN: f32 = 1.25;
pub const LINE_HEIGHT_MAX: f32 = 3.0;
pub const LINE_HEIGHT_STEP: f32 = 0.25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FontFamily {
    #[default]
    Lxgw,
    Serif,
    Sans,
    Kai,
    Song,
    Hei,
    Fangsong,
    System,
}

impl FontFamily {
    pub const ALL: [FontFamily; 8] = [
        Self::Lxgw,
        Self::Serif,
        Self::Sans,
        Self::Kai,
        Self::Song,
        Self::Hei,
        Self::Fangsong,
        Self::System,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lxgw => "lxgw",
            Self::Serif => "serif",
            Self::Sans => "sans",
            Self::Kai => "kai",
            Self::Song => "song",
            Self::Hei => "hei",
            Self::Fangsong => "fangsong",
            Self::System => "system",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.as_str() == value)
    }

    /// Display name.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Lxgw => "LXGW WenKai",
            Self::Serif => "Serif",
            Self::Sans => "Sans-serif",
            Self::Kai => "KaiTi",
            Self::Song => "SongTi",
            Self::Hei => "HeiTi",
            Self::Fangsong => "FangSong",
            Self::System => "System default",
        }
    }

    /// CSS `font-family` stack.
    pub fn css_stack(&self) -> &'static str {
        match self {
            Self::Lxgw => "'LXGW WenKai Screen', 'KaiTi', serif",
            Self::Serif => "Georgia, 'Noto Serif SC', 'Source Han Serif SC', serif",
            Self::Sans => "'PingFang SC', 'Microsoft YaHei', 'Noto Sans SC', sans-serif",
            Self::Kai => "'KaiTi', 'STKaiti', 'AR PL UKai CN', serif",
            Self::Song => "'SimSun', 'STSong', 'AR PL UMing CN', serif",
            Self::Hei => "'SimHei', 'STHeiti', 'Noto Sans SC', sans-serif",
            Self::Fangsong => "'FangSong', 'STFangsong', serif",
            Self::System => "system-ui, -apple-system, sans-serif",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentWidth {
    Narrow,
    #[default]
    Normal,
    Wide,
}

impl ContentWidth {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Narrow => "narrow",
            Self::Normal => "normal",
            Self::Wide => "wide",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "narrow" => Some(Self::Narrow),
            "normal" => Some(Self::Normal),
            "wide" => Some(Self::Wide),
            _ => None,
        }
    }

    pub fn max_width_rem(&self) -> u8 {
        match self {
            Self::Narrow => 42,
            Self::Normal => 48,
            Self::Wide => 56,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReaderSettings {
    pub font_size: u8,
    pub font_family: FontFamily,
    pub line_height: f32,
    pub content_width: ContentWidth,
    pub sidebar_open: bool,
}

impl Default for ReaderSettings {
    fn default() -> Self {
        Self {
            font_size: 16,
            font_family: FontFamily::default(),
            line_height: 1.75,
            content_width: ContentWidth::default(),
            sidebar_open: true,
        }
    }
}

impl ReaderSettings {
    pub fn set_font_size(&mut self, size: u8) {
        self.font_size = size.clamp(FONT_SIZE_MIN, FONT_SIZE_MAX);
    }

    pub fn increase_font_size(&mut self) {
        self.set_font_size(self.font_size.saturating_add(FONT_SIZE_STEP));
    }

    pub fn decrease_font_size(&mut self) {
        self.set_font_size(self.font_size.saturating_sub(FONT_SIZE_STEP));
    }

    pub fn set_line_height(&mut self, height: f32) {
        self.line_height = if height.is_finite() {
            height.clamp(LINE_HEIGHT_MIN, LINE_HEIGHT_MAX)
        } else {
            Self::default().line_height
        };
    }

    pub fn increase_line_height(&mut self) {
        self.set_line_height(self.line_height + LINE_HEIGHT_STEP);
    }

    pub fn decrease_line_height(&mut self) {
        self.set_line_height(self.line_height - LINE_HEIGHT_STEP);
    }

    pub fn toggle_sidebar(&mut self) {
        self.sidebar_open = !self.sidebar_open;
    }

    /// Restore typography defaults. Width and sidebar state are kept.
    pub fn reset_typography(&mut self) {
        let defaults = Self::default();
        self.font_size = defaults.font_size;
        self.line_height = defaults.line_height;
        self.font_family = defaults.font_family;
    }

    /// Pull hand-edited values back into range.
    pub fn clamped(mut self) -> Self {
        self.set_font_size(self.font_size);
        self.set_line_height(self.line_height);
        self
    }

    /// Inline CSS for the article element of rendered Markdown/TXT content.
    pub fn inline_style(&self) -> String {
        format!(
            "font-size: {}px; line-height: {}; font-family: {}; max-width: {}rem;",
            self.font_size,
            self.line_height,
            self.font_family.css_stack(),
            self.content_width.max_width_rem()
        )
    }
}

/// Key-value persistence for [`ReaderSettings`].
pub trait SettingsStore {
    /// `Ok(None)` when nothing has been saved yet.
    fn load(&self) -> Result<Option<ReaderSettings>, ConfigError>;
    fn save(&self, settings: &ReaderSettings) -> Result<(), ConfigError>;

    /// Saved settings, or defaults when none are saved or they are unreadable.
    fn load_or_default(&self) -> ReaderSettings {
        match self.load() {
            Ok(Some(settings)) => settings,
            Ok(None) => ReaderSettings::default(),
            Err(e) => {
                tracing::warn!("Ignoring unreadable reader settings: {}", e);
                ReaderSettings::default()
            }
        }
    }
}

/// Settings kept as `<dir>/reader-settings.json`.
#[derive(Debug, Clone)]
pub struct JsonSettingsStore {
    path: PathBuf,
}

impl JsonSettingsStore {
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(format!("{SETTINGS_KEY}.json")),
        }
    }

    /// Store next to the application config file.
    pub fn default_location() -> Result<Self, ConfigError> {
        crate::config::config_dir()
            .map(Self::in_dir)
            .ok_or(ConfigError::NoConfigDir)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for JsonSettingsStore {
    fn load(&self) -> Result<Option<ReaderSettings>, ConfigError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let settings: ReaderSettings = serde_json::from_str(&content)?;
        Ok(Some(settings.clamped()))
    }

    fn save(&self, settings: &ReaderSettings) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(settings)?;
        std::fs::write(&self.path, json)?;
        tracing::debug!(path = %self.path.display(), "Saved reader settings");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_font_size_steps_and_clamps() {
        let mut s = ReaderSettings::default();
        s.increase_font_size();
        assert_eq!(s.font_size, 18);
        for _ in 0..10 {
            s.increase_font_size();
        }
        assert_eq!(s.font_size, FONT_SIZE_MAX);
        for _ in 0..20 {
            s.decrease_font_size();
        }
        assert_eq!(s.font_size, FONT_SIZE_MIN);
    }

    #[test]
    fn test_line_height_steps_and_clamps() {
        let mut s = ReaderSettings::default();
        s.increase_line_height();
        assert_eq!(s.line_height, 2.0);
        for _ in 0..10 {
            s.increase_line_height();
        }
        assert_eq!(s.line_height, LINE_HEIGHT_MAX);
        for _ in 0..20 {
            s.decrease_line_height();
        }
        assert_eq!(s.line_height, LINE_HEIGHT_MIN);
        s.set_line_height(f32::NAN);
        assert_eq!(s.line_height, 1.75);
    }

    #[test]
    fn test_reset_keeps_width_and_sidebar() {
        let mut s = ReaderSettings {
            font_size: 24,
            font_family: FontFamily::Song,
            line_height: 2.5,
            content_width: ContentWidth::Wide,
            sidebar_open: false,
        };
        s.reset_typography();
        assert_eq!(s.font_size, 16);
        assert_eq!(s.line_height, 1.75);
        assert_eq!(s.font_family, FontFamily::Lxgw);
        assert_eq!(s.content_width, ContentWidth::Wide);
        assert!(!s.sidebar_open);
    }

    #[test]
    fn test_wire_format_is_camel_case() {
        let json = serde_json::to_value(ReaderSettings::default()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "fontSize": 16,
                "fontFamily": "lxgw",
                "lineHeight": 1.75,
                "contentWidth": "normal",
                "sidebarOpen": true
            })
        );
    }

    #[test]
    fn test_inline_style() {
        let s = ReaderSettings {
            font_family: FontFamily::System,
            content_width: ContentWidth::Narrow,
            ..ReaderSettings::default()
        };
        assert_eq!(
            s.inline_style(),
            "font-size: 16px; line-height: 1.75; font-family: system-ui, -apple-system, sans-serif; max-width: 42rem;"
        );
    }

    #[test]
    fn test_json_store_round_trip_and_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonSettingsStore::in_dir(dir.path().join("nested"));
        assert_eq!(store.load().unwrap(), None);
        assert_eq!(store.load_or_default(), ReaderSettings::default());

        let mut s = ReaderSettings::default();
        s.font_family = FontFamily::Hei;
        s.toggle_sidebar();
        store.save(&s).unwrap();
        assert_eq!(store.load().unwrap(), Some(s));
        assert!(store.path().ends_with("reader-settings.json"));
    }

    #[test]
    fn test_json_store_clamps_and_fills_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonSettingsStore::in_dir(dir.path());
        std::fs::write(store.path(), r#"{"fontSize": 99, "contentWidth": "wide"}"#).unwrap();
        let s = store.load().unwrap().unwrap();
        assert_eq!(s.font_size, FONT_SIZE_MAX);
        assert_eq!(s.content_width, ContentWidth::Wide);
        assert_eq!(s.line_height, 1.75);
    }

    #[test]
    fn test_unreadable_settings_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonSettingsStore::in_dir(dir.path());
        std::fs::write(store.path(), "{ not json").unwrap();
        assert!(store.load().is_err());
        assert_eq!(store.load_or_default(), ReaderSettings::default());
    }
}
