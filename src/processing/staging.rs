//! File-management half of the pipeline: backup, output placement, cleanup.
//!
//! The audio transforms themselves live outside this crate. This processor
//! stages the input the way the full pipeline does, so the watch loop can be
//! run end to end and the output layout stays the same.

use chrono::Local;
use std::fs;
use std::path::{Path, PathBuf};

use super::{FileProcessor, ProcessedFile, ProcessingError, ProcessingSettings};

#[derive(Debug, Default, Clone, Copy)]
pub struct StagingProcessor;

impl StagingProcessor {
    /// `<parent>/<output_folder>/processed_<stem>_<YYYYmmdd_HHMMSS>.<ext>`
    pub fn output_path_for(path: &Path, settings: &ProcessingSettings) -> Option<PathBuf> {
        let parent = path.parent()?;
        let stem = path.file_stem()?.to_string_lossy();
        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        let name = match path.extension() {
            Some(ext) => format!("processed_{stem}_{stamp}.{}", ext.to_string_lossy()),
            None => format!("processed_{stem}_{stamp}"),
        };
        Some(parent.join(&settings.output.output_folder).join(name))
    }

    /// `<parent>/<backup_folder>/original_<name>`
    pub fn backup_path_for(path: &Path, settings: &ProcessingSettings) -> Option<PathBuf> {
        let parent = path.parent()?;
        let name = path.file_name()?.to_string_lossy();
        Some(
            parent
                .join(&settings.output.backup_folder)
                .join(format!("original_{name}")),
        )
    }
}

impl FileProcessor for StagingProcessor {
    fn process(
        &self,
        path: &Path,
        settings: &ProcessingSettings,
    ) -> Result<ProcessedFile, ProcessingError> {
        let metadata = fs::metadata(path)?;
        if !metadata.is_file() {
            return Err(ProcessingError::validation("not a regular file"));
        }

        let output_path = Self::output_path_for(path, settings)
            .ok_or_else(|| ProcessingError::validation("path has no file name"))?;

        let backup_path = if settings.output.backup_original {
            let backup = Self::backup_path_for(path, settings)
                .ok_or_else(|| ProcessingError::validation("path has no file name"))?;
            if let Some(dir) = backup.parent() {
                fs::create_dir_all(dir)?;
            }
            fs::copy(path, &backup)?;
            Some(backup)
        } else {
            None
        };

        if let Some(dir) = output_path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::copy(path, &output_path)?;

        tracing::debug!(
            target: "processing",
            "staged {} with preset {:?}",
            path.display(),
            settings.pipeline.preset
        );

        if settings.output.auto_delete_original {
            fs::remove_file(path)?;
        }

        Ok(ProcessedFile {
            output_path: Some(output_path),
            backup_path,
        })
    }
}
