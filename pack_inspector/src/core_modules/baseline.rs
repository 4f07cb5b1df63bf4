// THEORY:
// The baseline is one image file at a fixed path. It is read once at startup and
// replaced wholesale whenever the operator asks for a new one. There is no
// history; the previous baseline is simply overwritten.

use std::path::{Path, PathBuf};

use image::RgbImage;
use tracing::info;

use crate::error::{ClassificationError, PersistenceError};

#[derive(Debug, Clone)]
pub struct BaselineStore {
    path: PathBuf,
}

impl BaselineStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the stored baseline, or `None` on a first run.
    pub fn load(&self) -> Result<Option<RgbImage>, ClassificationError> {
        if !self.path.exists() {
            info!(path = %self.path.display(), "no baseline yet");
            return Ok(None);
        }
        let image = image::open(&self.path).map_err(|source| ClassificationError::Baseline {
            path: self.path.clone(),
            source,
        })?;
        info!(path = %self.path.display(), width = image.width(), height = image.height(), "baseline loaded");
        Ok(Some(image.to_rgb8()))
    }

    /// Overwrites the stored baseline. The format follows the file extension.
    pub fn save(&self, baseline: &RgbImage) -> Result<(), PersistenceError> {
        baseline.save(&self.path).map_err(|source| PersistenceError::BaselineSave {
            path: self.path.clone(),
            source,
        })?;
        info!(path = %self.path.display(), "baseline saved");
        Ok(())
    }
}
