use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

/// Colours of the panel. Every field is optional in the file; missing fields
/// keep the built-in value.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct StyleConfig {
    pub background: Option<[u8; 3]>,
    pub frame: Option<[u8; 3]>,
    pub title_text: Option<[u8; 3]>,
    pub text_primary: Option<[u8; 3]>,
    pub text_value: Option<[u8; 3]>,
    pub row_focused: Option<[u8; 3]>,
    pub item_focused: Option<[u8; 3]>,
    pub button_bg: Option<[u8; 3]>,
    pub button_text: Option<[u8; 3]>,
    pub confirm_bg: Option<[u8; 3]>,
    pub toggle_on: Option<[u8; 3]>,
    pub toggle_off: Option<[u8; 3]>,
    pub progress_bg: Option<[u8; 3]>,
    pub progress_fill: Option<[u8; 3]>,
    pub separator: Option<[u8; 3]>,
    pub tab_active: Option<[u8; 3]>,
    pub dialog_box: Option<[u8; 3]>,
    pub overlay_alpha: Option<u8>,
}

impl StyleConfig {
    pub fn defaults() -> Self {
        StyleConfig {
            background: Some([24, 24, 28]),
            frame: Some([70, 70, 80]),
            title_text: Some([250, 200, 60]),
            text_primary: Some([235, 235, 235]),
            text_value: Some([190, 210, 255]),
            row_focused: Some([52, 52, 64]),
            item_focused: Some([250, 200, 60]),
            button_bg: Some([64, 64, 76]),
            button_text: Some([240, 240, 240]),
            confirm_bg: Some([120, 50, 50]),
            toggle_on: Some([60, 150, 80]),
            toggle_off: Some([90, 90, 90]),
            progress_bg: Some([50, 50, 58]),
            progress_fill: Some([80, 160, 230]),
            separator: Some([90, 90, 100]),
            tab_active: Some([80, 80, 100]),
            dialog_box: Some([40, 40, 48]),
            overlay_alpha: Some(190),
        }
    }

    pub fn merge(&mut self, parsed: StyleConfig) {
        macro_rules! take {
            ($($field:ident),*) => {
                $(if parsed.$field.is_some() {
                    self.$field = parsed.$field;
                })*
            };
        }
        take!(
            background,
            frame,
            title_text,
            text_primary,
            text_value,
            row_focused,
            item_focused,
            button_bg,
            button_text,
            confirm_bg,
            toggle_on,
            toggle_off,
            progress_bg,
            progress_fill,
            separator,
            tab_active,
            dialog_box,
            overlay_alpha
        );
    }
}

pub fn read_style(path: &Path) -> Result<StyleConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    Ok(toml::from_str::<StyleConfig>(&contents)?)
}

/// Built-in colours overlaid with the style file, when there is a readable one.
pub fn load_style(path: Option<&Path>) -> StyleConfig {
    let mut s = StyleConfig::defaults();
    let Some(p) = path else {
        return s;
    };
    if !p.exists() {
        warn!(
            "style file not found: {}, running without custom styles",
            p.display()
        );
        return s;
    }
    match read_style(p) {
        Ok(parsed) => {
            info!("loaded style from {}", p.display());
            s.merge(parsed);
        }
        Err(e) => warn!("failed to parse style at {}: {}", p.display(), e),
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn sample_style_parses() {
        let parsed: StyleConfig = toml::from_str(include_str!("../style.sample.toml")).unwrap();
        assert_eq!(parsed.background, Some([24, 24, 28]));
        assert_eq!(parsed.overlay_alpha, Some(190));
    }

    #[test]
    fn partial_style_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("style.toml");
        std::fs::write(&path, "item_focused = [1, 2, 3]\n").unwrap();
        let s = load_style(Some(&path));
        assert_eq!(s.item_focused, Some([1, 2, 3]));
        assert_eq!(s.background, StyleConfig::defaults().background);
    }

    #[test]
    fn missing_or_broken_style_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            load_style(Some(&dir.path().join("nope.toml"))),
            StyleConfig::defaults()
        );
        let broken = dir.path().join("broken.toml");
        std::fs::write(&broken, "background = \"red\"").unwrap();
        assert_eq!(load_style(Some(&broken)), StyleConfig::defaults());
    }
}
