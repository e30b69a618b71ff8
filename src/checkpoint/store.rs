// src/checkpoint/store.rs

//! Durable checkpoint artifacts.
//!
//! [`FsCheckpointStore`] writes one JSON artifact per checkpoint, named
//! `{session}_{timestamp}.checkpoint.json`, plus a `.meta.toml` summary with
//! the same stem. Artifacts are write-once; a name clash gets a numeric
//! suffix instead of overwriting.

use std::fmt::Debug;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::{debug, warn};

use crate::checkpoint::model::Checkpoint;
use crate::errors::{Result, SheetflowError};

const ARTIFACT_SUFFIX: &str = ".checkpoint.json";
const META_SUFFIX: &str = ".meta.toml";
const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S%.6fZ";

/// One artifact as seen by a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointEntry {
    pub path: PathBuf,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
}

pub trait CheckpointStore: Send + Sync + Debug {
    /// Persist a checkpoint and return where it landed.
    fn write(&self, checkpoint: &Checkpoint) -> Result<PathBuf>;

    /// Load and verify a checkpoint.
    fn read(&self, path: &Path) -> Result<Checkpoint>;

    /// Artifacts, newest first, optionally restricted to one session.
    fn list(&self, session_id: Option<&str>) -> Result<Vec<CheckpointEntry>>;

    fn delete(&self, path: &Path) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct FsCheckpointStore {
    dir: PathBuf,
}

impl FsCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn meta_path(artifact: &Path) -> Option<PathBuf> {
        let name = artifact.file_name()?.to_str()?;
        let stem = name.strip_suffix(ARTIFACT_SUFFIX)?;
        Some(artifact.with_file_name(format!("{stem}{META_SUFFIX}")))
    }

    fn create_unique(&self, stem: &str) -> Result<(PathBuf, fs::File)> {
        let mut attempt = 0u32;
        loop {
            let name = if attempt == 0 {
                format!("{stem}{ARTIFACT_SUFFIX}")
            } else {
                format!("{stem}-{attempt}{ARTIFACT_SUFFIX}")
            };
            let path = self.dir.join(name);
            match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => return Ok((path, file)),
                Err(err) if err.kind() == ErrorKind::AlreadyExists => attempt += 1,
                Err(err) => return Err(err.into()),
            }
        }
    }
}

impl CheckpointStore for FsCheckpointStore {
    fn write(&self, checkpoint: &Checkpoint) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;

        let stamp = checkpoint.created_at().format(TIMESTAMP_FORMAT);
        let stem = format!("{}_{}", checkpoint.session_id(), stamp);
        let (path, mut file) = self.create_unique(&stem)?;

        let bytes = serde_json::to_vec_pretty(checkpoint)?;
        file.write_all(&bytes)?;
        file.sync_all()?;

        if let Some(meta) = Self::meta_path(&path) {
            let summary = toml::to_string(&checkpoint.summary()).map_err(|e| {
                SheetflowError::Checkpoint(format!("encoding checkpoint summary: {e}"))
            })?;
            fs::write(&meta, summary)?;
        }

        debug!(path = %path.display(), bytes = bytes.len(), "checkpoint written");
        Ok(path)
    }

    fn read(&self, path: &Path) -> Result<Checkpoint> {
        let bytes = fs::read(path).map_err(|e| {
            SheetflowError::Checkpoint(format!("reading {}: {e}", path.display()))
        })?;
        let checkpoint: Checkpoint = serde_json::from_slice(&bytes)?;
        checkpoint.verify()?;
        Ok(checkpoint)
    }

    fn list(&self, session_id: Option<&str>) -> Result<Vec<CheckpointEntry>> {
        let read_dir = match fs::read_dir(&self.dir) {
            Ok(rd) => rd,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut entries = Vec::new();
        for dir_entry in read_dir {
            let path = dir_entry?.path();
            let Some(entry) = parse_entry(&path) else {
                continue;
            };
            if session_id.is_some_and(|id| id != entry.session_id) {
                continue;
            }
            entries.push(entry);
        }

        entries.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.path.cmp(&a.path))
        });
        Ok(entries)
    }

    fn delete(&self, path: &Path) -> Result<()> {
        fs::remove_file(path)?;
        if let Some(meta) = Self::meta_path(path) {
            if let Err(err) = fs::remove_file(&meta) {
                if err.kind() != ErrorKind::NotFound {
                    warn!(path = %meta.display(), error = %err, "could not remove checkpoint summary");
                }
            }
        }
        Ok(())
    }
}

/// `{session}_{timestamp}[-n].checkpoint.json` → entry.
fn parse_entry(path: &Path) -> Option<CheckpointEntry> {
    let name = path.file_name()?.to_str()?;
    let stem = name.strip_suffix(ARTIFACT_SUFFIX)?;
    let (session_id, stamp) = stem.rsplit_once('_')?;
    let stamp = stamp.split_once('-').map_or(stamp, |(s, _)| s);
    let created_at = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT)
        .ok()?
        .and_utc();
    Some(CheckpointEntry {
        path: path.to_path_buf(),
        session_id: session_id.to_string(),
        created_at,
    })
}
