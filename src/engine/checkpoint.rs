// Checkpoints - saving and restoring the run-time state of an assembly

//! # Checkpoints
//!
//! An [`AssemblyCheckpoint`] is a full dump of an assembly: every component
//! (type tag and constructor arguments for re-instantiation, active sets by
//! name, behaviors, group counters, port states) and every connection by
//! the names of its two ports.
//!
//! [`CheckpointStore`] keeps one JSON file per assembly name. The presence
//! of that file is what makes [`Assembly::open`] resume instead of cold
//! starting. Files are written to a temporary sibling and renamed into
//! place, so a crash mid-write leaves the previous checkpoint intact.
//!
//! [`Assembly::open`]: crate::engine::assembly::Assembly::open

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use super::config::AssemblyConfig;
use super::dependency::PortState;
use crate::models::{DockDirection, ErrorReport};
use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockCheckpoint {
    pub transition: String,
    pub direction: DockDirection,
}

/// An active transition; `outcome` is `None` when the action was still
/// running and has to be started again on restore
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionCheckpoint {
    pub name: String,
    pub outcome: Option<std::result::Result<(), String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentCheckpoint {
    pub name: String,
    pub type_tag: String,
    pub args: Value,
    pub behavior: Option<String>,
    pub queued_behaviors: Vec<String>,
    pub active_places: Vec<String>,
    pub visited_places: Vec<String>,
    pub active_transitions: Vec<TransitionCheckpoint>,
    pub active_input_docks: Vec<DockCheckpoint>,
    pub active_output_docks: Vec<DockCheckpoint>,
    pub groups: BTreeMap<String, i64>,
    pub ports: BTreeMap<String, PortState>,
    #[serde(default)]
    pub error_reports: Vec<ErrorReport>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionCheckpoint {
    pub use_component: String,
    pub use_dependency: String,
    pub provide_component: String,
    pub provide_dependency: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssemblyCheckpoint {
    pub name: String,
    pub saved_at: DateTime<Utc>,
    pub components: Vec<ComponentCheckpoint>,
    pub connections: Vec<ConnectionCheckpoint>,
    /// Remote component -> id of the assembly that owns it
    pub remote_components: BTreeMap<String, String>,
    pub active_components: Vec<String>,
    /// Instructions completed so far, skipped when the program is replayed
    pub instructions_done: u64,
    pub barriers_reached: u64,
    /// `barriers_reached` was published by a `wait_all` that has not
    /// completed yet
    #[serde(default)]
    pub barrier_open: bool,
}

impl AssemblyCheckpoint {
    pub fn component(&self, name: &str) -> Option<&ComponentCheckpoint> {
        self.components.iter().find(|c| c.name == name)
    }
}

/// Directory of checkpoint files, one per assembly name
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    pub fn from_config(config: &AssemblyConfig) -> Self {
        Self::new(config.checkpoint_path())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", name))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.path(name).is_file()
    }

    pub fn save(&self, checkpoint: &AssemblyCheckpoint) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path(&checkpoint.name);
        let tmp = self.dir.join(format!(".{}.json.tmp", checkpoint.name));
        fs::write(&tmp, serde_json::to_vec_pretty(checkpoint)?)?;
        fs::rename(&tmp, &path)?;
        info!(
            "Checkpointed assembly {} ({} components) to {}",
            checkpoint.name,
            checkpoint.components.len(),
            path.display()
        );
        Ok(path)
    }

    pub fn load(&self, name: &str) -> Result<Option<AssemblyCheckpoint>> {
        let path = self.path(name);
        if !path.is_file() {
            debug!("No checkpoint at {}", path.display());
            return Ok(None);
        }
        let raw = fs::read(&path)?;
        Ok(Some(serde_json::from_slice(&raw)?))
    }

    /// Removes the checkpoint, returning whether there was one
    pub fn clear(&self, name: &str) -> Result<bool> {
        let path = self.path(name);
        if !path.is_file() {
            return Ok(false);
        }
        fs::remove_file(&path)?;
        info!("Removed checkpoint {}", path.display());
        Ok(true)
    }
}
