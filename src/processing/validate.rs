//! File admission checks.

use std::fs;
use std::path::Path;
use thiserror::Error;

use super::FileValidator;
use crate::config::Settings;

/// A file was refused at admission.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{reason}")]
pub struct InvalidFile {
    pub reason: String,
}

impl InvalidFile {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Cheap path-only filter: extension and excluded directories.
///
/// Shared by the debouncer, the scanner and the folder watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupportedFiles {
    extensions: Vec<String>,
    excluded_dirs: Vec<String>,
}

impl SupportedFiles {
    pub fn new(
        extensions: impl IntoIterator<Item = impl AsRef<str>>,
        excluded_dirs: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            extensions: extensions
                .into_iter()
                .map(|e| e.as_ref().trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            excluded_dirs: excluded_dirs.into_iter().map(Into::into).collect(),
        }
    }

    /// Configured extensions, excluding the pipeline's own output and backup folders.
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            &settings.watch.extensions,
            [
                settings.output.output_folder.clone(),
                settings.output.backup_folder.clone(),
            ],
        )
    }

    /// Extension match, case-insensitive.
    pub fn has_supported_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| {
                let e = e.to_ascii_lowercase();
                self.extensions.iter().any(|s| *s == e)
            })
            .unwrap_or(false)
    }

    /// True when any parent directory is one of the excluded names.
    pub fn is_excluded(&self, path: &Path) -> bool {
        let Some(parent) = path.parent() else {
            return false;
        };
        parent.components().any(|c| {
            c.as_os_str()
                .to_str()
                .is_some_and(|name| self.excluded_dirs.iter().any(|d| d == name))
        })
    }

    pub fn check(&self, path: &Path) -> Result<(), InvalidFile> {
        if !self.has_supported_extension(path) {
            return Err(InvalidFile::new(format!(
                "unsupported format, expected one of: {}",
                self.extensions.join(", ")
            )));
        }
        if self.is_excluded(path) {
            return Err(InvalidFile::new("inside an output or backup folder"));
        }
        Ok(())
    }

    pub fn matches(&self, path: &Path) -> bool {
        self.check(path).is_ok()
    }

    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }
}

/// Default validator: the file exists, is a non-empty regular file and its
/// header is not recognizably something other than audio.
#[derive(Debug, Default, Clone, Copy)]
pub struct BasicValidator;

impl FileValidator for BasicValidator {
    fn validate(&self, path: &Path) -> Result<(), InvalidFile> {
        let metadata = fs::metadata(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => InvalidFile::new("file does not exist"),
            _ => InvalidFile::new(format!("cannot stat file: {e}")),
        })?;

        if !metadata.is_file() {
            return Err(InvalidFile::new("not a regular file"));
        }
        if metadata.len() == 0 {
            return Err(InvalidFile::new("file is empty"));
        }

        match infer::get_from_path(path) {
            Ok(Some(kind)) => match kind.matcher_type() {
                // Containers like mp4/m4a are classified as video by some brands
                infer::MatcherType::Audio | infer::MatcherType::Video => Ok(()),
                _ => Err(InvalidFile::new(format!(
                    "content is {}, not audio",
                    kind.mime_type()
                ))),
            },
            Ok(None) => Ok(()),
            Err(e) => Err(InvalidFile::new(format!("cannot read file: {e}"))),
        }
    }
}
