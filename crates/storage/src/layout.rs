#![forbid(unsafe_code)]

//! On-disk layout of a project's `.specweave` directory.

use sw_core::duplicates::StorageArea;
use sw_core::ids::IncrementId;
use std::path::{Path, PathBuf};

pub const SPECWEAVE_DIR: &str = ".specweave";
pub const METADATA_FILE: &str = "metadata.json";
pub const SPEC_FILE: &str = "spec.md";
pub const TASKS_FILE: &str = "tasks.md";
pub const REPORTS_DIR: &str = "reports";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProjectLayout {
    root: PathBuf,
}

impl ProjectLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Walks up from `start` to the first directory holding `.specweave`.
    pub fn discover(start: &Path) -> Option<Self> {
        let mut current = start.to_path_buf();
        loop {
            if current.join(SPECWEAVE_DIR).is_dir() {
                return Some(Self::new(current));
            }
            if !current.pop() {
                return None;
            }
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn specweave_dir(&self) -> PathBuf {
        self.root.join(SPECWEAVE_DIR)
    }

    pub fn increments_dir(&self) -> PathBuf {
        self.specweave_dir().join("increments")
    }

    pub fn area_dir(&self, area: StorageArea) -> PathBuf {
        match area.dir_name() {
            Some(name) => self.increments_dir().join(name),
            None => self.increments_dir(),
        }
    }

    pub fn increment_dir(&self, area: StorageArea, id: &IncrementId) -> PathBuf {
        self.area_dir(area).join(id.as_str())
    }

    /// First area (active, archive, abandoned) holding a directory for `id`.
    pub fn locate(&self, id: &IncrementId) -> Option<(StorageArea, PathBuf)> {
        StorageArea::ALL.into_iter().find_map(|area| {
            let dir = self.increment_dir(area, id);
            dir.is_dir().then_some((area, dir))
        })
    }

    pub fn state_dir(&self) -> PathBuf {
        self.specweave_dir().join("state")
    }

    pub fn active_state_path(&self) -> PathBuf {
        self.state_dir().join("active-increment.json")
    }

    pub fn batch_state_path(&self) -> PathBuf {
        self.state_dir().join("sync-batch.json")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.specweave_dir().join("logs")
    }

    pub fn sync_events_path(&self) -> PathBuf {
        self.logs_dir().join("sync-events.json")
    }

    pub fn conflicts_log_path(&self) -> PathBuf {
        self.logs_dir().join("conflicts.log")
    }

    pub fn config_path(&self) -> PathBuf {
        self.specweave_dir().join("config.json")
    }
}
