use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::geometry::ViewRect;

/// The persisted ROI record: four view-space floats.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PersistedRoi {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl PersistedRoi {
    pub fn rect(&self) -> ViewRect {
        ViewRect::new(self.left, self.top, self.right, self.bottom)
    }
}

impl From<ViewRect> for PersistedRoi {
    fn from(rect: ViewRect) -> Self {
        Self {
            left: rect.left,
            top: rect.top,
            right: rect.right,
            bottom: rect.bottom,
        }
    }
}

/// Key-value persistence for the last good ROI.
pub trait RoiStore: Send + Sync {
    /// Load the stored record, `None` when nothing was saved yet.
    fn load(&self) -> Result<Option<PersistedRoi>>;

    fn save(&self, roi: &PersistedRoi) -> Result<()>;
}

/// Stores the record as a small JSON document.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RoiStore for JsonFileStore {
    fn load(&self) -> Result<Option<PersistedRoi>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read ROI record {}", self.path.display()))?;
        let roi = serde_json::from_str(&text)
            .with_context(|| format!("Malformed ROI record {}", self.path.display()))?;
        Ok(Some(roi))
    }

    fn save(&self, roi: &PersistedRoi) -> Result<()> {
        let text = serde_json::to_string(roi)?;
        // Write-then-rename so a crash mid-write leaves the previous record intact.
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, text)
            .with_context(|| format!("Failed to write ROI record {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace ROI record {}", self.path.display()))?;
        Ok(())
    }
}

/// In-process store, used when no path is configured.
#[derive(Default)]
pub struct MemoryStore {
    value: Mutex<Option<PersistedRoi>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(roi: PersistedRoi) -> Self {
        Self {
            value: Mutex::new(Some(roi)),
        }
    }
}

impl RoiStore for MemoryStore {
    fn load(&self) -> Result<Option<PersistedRoi>> {
        Ok(*self.value.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn save(&self, roi: &PersistedRoi) -> Result<()> {
        *self.value.lock().unwrap_or_else(PoisonError::into_inner) = Some(*roi);
        Ok(())
    }
}
