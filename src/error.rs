use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("failed to read layout '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[line {line}] malformed XML: {message}")]
    Xml { line: usize, message: String },

    #[error("layout contains no element")]
    Empty,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse TOML config: {0}")]
    Toml(#[from] toml::de::Error),
}

#[derive(Debug, Error)]
pub enum DocError {
    #[error("download of {url} failed: {reason}")]
    Download { url: String, reason: String },

    #[error("cannot read '{}': {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot render page {page}: {reason}")]
    Render { page: usize, reason: String },

    #[error("broken archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("no pictures in '{}'", .0.display())]
    EmptyArchive(PathBuf),

    #[error("unknown document type: {}", .0.display())]
    Unknown(PathBuf),
}

/// Errors that stop the application. Each maps to a process exit code.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("no GUI display detected, set DISPLAY or WAYLAND_DISPLAY")]
    NoDisplay,

    #[error("XML file not found: {}", .0.display())]
    LayoutMissing(PathBuf),

    #[error(transparent)]
    Layout(#[from] LayoutError),

    #[error("layout has {0} validation error(s)")]
    Invalid(usize),

    #[error("SDL error: {0}")]
    Sdl(String),

    #[error("no TTF font found, set font_path in config.toml or FONT_PATH")]
    NoFont,
}

impl AppError {
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::Invalid(_) => 2,
            _ => 1,
        }
    }
}
