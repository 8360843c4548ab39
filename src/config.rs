use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Directories searched, in order, for the layout and style files when none is
/// given on the command line. The executable's directory is tried last.
pub const DEFAULT_SEARCH_DIRS: [&str; 2] = [
    "/userdata/system/configs/controlcenter",
    "/usr/share/batocera/controlcenter",
];

const FONT_CANDIDATES: [&str; 4] = [
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/freefont/FreeSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
];

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ConfigFile {
    pub font_path: Option<String>,
    pub font_size: Option<u16>,
    pub shell_timeout_ms: Option<u64>,
    pub action_debounce_ms: Option<u64>,
    pub gamepad_debounce_ms: Option<u64>,
    pub width_fraction: Option<f32>,
    pub height_fraction: Option<f32>,
    pub search_dirs: Option<Vec<String>>,
}

impl ConfigFile {
    pub fn defaults() -> Self {
        ConfigFile {
            font_path: None,
            font_size: Some(18),
            shell_timeout_ms: Some(3000),
            action_debounce_ms: Some(100),
            gamepad_debounce_ms: Some(150),
            width_fraction: Some(0.64),
            height_fraction: Some(0.70),
            search_dirs: None,
        }
    }

    /// Overlay every field `parsed` sets on top of `self`.
    pub fn merge(&mut self, parsed: ConfigFile) {
        macro_rules! take {
            ($($field:ident),*) => {
                $(if parsed.$field.is_some() {
                    self.$field = parsed.$field;
                })*
            };
        }
        take!(
            font_path,
            font_size,
            shell_timeout_ms,
            action_debounce_ms,
            gamepad_debounce_ms,
            width_fraction,
            height_fraction,
            search_dirs
        );
    }

    pub fn shell_timeout(&self) -> Duration {
        self.shell_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(crate::shell::DEFAULT_TIMEOUT)
            .max(Duration::from_millis(100))
    }

    pub fn action_debounce(&self) -> Duration {
        Duration::from_millis(self.action_debounce_ms.unwrap_or(100).max(1))
    }

    pub fn gamepad_debounce(&self) -> Duration {
        Duration::from_millis(self.gamepad_debounce_ms.unwrap_or(150).max(1))
    }

    pub fn font_size(&self) -> u16 {
        self.font_size.unwrap_or(18).clamp(8, 72)
    }

    /// Fractions of the primary display used for the window (width, max height).
    pub fn window_fractions(&self) -> (f32, f32) {
        let w = self.width_fraction.unwrap_or(0.64).clamp(0.2, 1.0);
        let h = self.height_fraction.unwrap_or(0.70).clamp(0.2, 1.0);
        (w, h)
    }

    pub fn search_dirs(&self) -> Vec<PathBuf> {
        match self.search_dirs.as_ref() {
            Some(dirs) => dirs.iter().map(PathBuf::from).collect(),
            None => DEFAULT_SEARCH_DIRS.iter().map(PathBuf::from).collect(),
        }
    }

    /// font preference order: config.font_path -> FONT_PATH env -> common system fonts
    pub fn resolve_font(&self) -> Option<PathBuf> {
        self.font_path
            .clone()
            .or_else(|| std::env::var("FONT_PATH").ok())
            .map(PathBuf::from)
            .filter(|p| p.exists())
            .or_else(|| {
                FONT_CANDIDATES
                    .iter()
                    .map(PathBuf::from)
                    .find(|p| p.exists())
            })
    }
}

pub fn user_config_path() -> Option<PathBuf> {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        let mut p = PathBuf::from(xdg);
        p.push("controlcenter");
        p.push("config.toml");
        Some(p)
    } else if let Some(home) = dirs::home_dir() {
        let mut p = home;
        p.push(".config/controlcenter/config.toml");
        Some(p)
    } else {
        None
    }
}

fn write_default_config(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let sample = include_str!("../config.sample.toml");
    let tmp = path.with_extension("toml.tmp");
    std::fs::write(&tmp, sample.as_bytes())?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

pub fn read_config(path: &Path) -> Result<ConfigFile, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    Ok(toml::from_str::<ConfigFile>(&contents)?)
}

/// Load settings from `explicit` or the user config path, merged over the
/// built-in defaults. A sample file is written to the user path on first run.
pub fn load_config(explicit: Option<&Path>) -> ConfigFile {
    let mut cfg = ConfigFile::defaults();
    let path = match explicit {
        Some(p) => Some(p.to_path_buf()),
        None => {
            let p = user_config_path();
            if let Some(p) = p.as_ref() {
                if !p.exists() {
                    if let Err(e) = write_default_config(p) {
                        debug!("failed to write default config {}: {}", p.display(), e);
                    }
                }
            }
            p
        }
    };
    if let Some(p) = path {
        match read_config(&p) {
            Ok(parsed) => cfg.merge(parsed),
            Err(e) => warn!("ignoring config at {}: {}", p.display(), e),
        }
    }
    cfg
}

/// First existing `dir/filename` in `dirs`, else `fallback` (which may not
/// exist, so callers can report it).
pub fn find_file(filename: &str, dirs: &[PathBuf], fallback: PathBuf) -> PathBuf {
    dirs.iter()
        .map(|d| d.join(filename))
        .find(|p| p.exists())
        .unwrap_or(fallback)
}

/// Directory holding the running executable, symlinks resolved.
pub fn exe_dir() -> PathBuf {
    std::env::current_exe()
        .and_then(|p| p.canonicalize())
        .ok()
        .and_then(|p| p.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}
