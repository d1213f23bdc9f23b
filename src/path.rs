//! Output path templating
//!
//! Turns a configured template such as `~/Videos/Replay_%F_%H-%M-%S.mp4`
//! into a concrete file path. `strftime` specifiers are expanded with the
//! local time of the save, and a leading `~` becomes the home directory.
//! Uniqueness across saves relies entirely on the template.

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Local, TimeZone};
use std::fmt::Display;
use std::fs;
use std::path::PathBuf;
use thiserror::Error;

/// Path resolution errors
#[derive(Error, Debug)]
pub enum PathError {
    #[error("Output template is empty")]
    EmptyTemplate,

    #[error("Invalid strftime pattern in output template: {0}")]
    InvalidPattern(String),

    #[error("Home directory could not be determined")]
    NoHomeDir,

    #[error("Output path is a directory: {0:?}")]
    IsDirectory(PathBuf),

    #[error("Output directory does not exist: {0:?}")]
    MissingDirectory(PathBuf),

    #[error("Failed to create output directory {path:?}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Produces the path for the next saved replay
pub trait OutputPathResolver: Send + Sync {
    fn resolve_output_path(&self) -> Result<PathBuf, PathError>;
}

impl<F> OutputPathResolver for F
where
    F: Fn() -> Result<PathBuf, PathError> + Send + Sync,
{
    fn resolve_output_path(&self) -> Result<PathBuf, PathError> {
        self()
    }
}

/// A `strftime`-style output path template
#[derive(Debug, Clone)]
pub struct PathTemplate {
    template: String,
    create_dirs: bool,
}

impl PathTemplate {
    /// Create a template; parent directories are created on resolve
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            create_dirs: true,
        }
    }

    /// Whether missing parent directories are created on resolve
    pub fn create_dirs(mut self, create_dirs: bool) -> Self {
        self.create_dirs = create_dirs;
        self
    }

    /// The raw template string
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Expand the template for the given instant, without touching the filesystem
    pub fn expand<Tz>(&self, now: &DateTime<Tz>) -> Result<PathBuf, PathError>
    where
        Tz: TimeZone,
        Tz::Offset: Display,
    {
        if self.template.trim().is_empty() {
            return Err(PathError::EmptyTemplate);
        }

        let items: Vec<Item<'_>> = StrftimeItems::new(&self.template).collect();
        if items.iter().any(|item| matches!(item, Item::Error)) {
            return Err(PathError::InvalidPattern(self.template.clone()));
        }
        let formatted = now.format_with_items(items.into_iter()).to_string();

        expand_home(&formatted)
    }

    /// Expand the template for the current local time and prepare its directory
    pub fn resolve(&self) -> Result<PathBuf, PathError> {
        let path = self.expand(&Local::now())?;

        if path.is_dir() {
            return Err(PathError::IsDirectory(path));
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !parent.exists() {
                if !self.create_dirs {
                    return Err(PathError::MissingDirectory(parent.to_path_buf()));
                }
                fs::create_dir_all(parent).map_err(|source| PathError::CreateDir {
                    path: parent.to_path_buf(),
                    source,
                })?;
                tracing::debug!("Created output directory {:?}", parent);
            }
        }

        Ok(path)
    }
}

impl OutputPathResolver for PathTemplate {
    fn resolve_output_path(&self) -> Result<PathBuf, PathError> {
        self.resolve()
    }
}

/// Replace a leading `~` with the home directory
fn expand_home(path: &str) -> Result<PathBuf, PathError> {
    if path == "~" {
        return dirs::home_dir().ok_or(PathError::NoHomeDir);
    }
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs::home_dir().ok_or(PathError::NoHomeDir)?;
            Ok(home.join(rest))
        }
        None => Ok(PathBuf::from(path)),
    }
}
