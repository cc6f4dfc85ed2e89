#![forbid(unsafe_code)]

//! The durable transfer log: a mapping from source video id to the outcome of
//! the transfer attempt, persisted as one human-auditable JSON document.
//!
//! The log is the single source of truth for "has this video already been
//! moved". It is loaded fully into memory at the start of a run and rewritten
//! in full after every mutation, so a crash after item N leaves the file
//! consistent through item N. The whole-file rewrite goes through a `.tmp`
//! sibling plus rename, so a concurrent reader sees either the old or the new
//! document. Concurrent *writers* (two runs sharing one log file) are not
//! supported and may lose updates.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::TransferError;

/// Outcome of one transfer attempt. Success and failure share the file-level
/// record (see [`TransferRecord`]); serde's untagged representation keeps the
/// on-disk JSON flat, with the field set distinguishing the two shapes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TransferOutcome {
    Success {
        new_video_id: String,
        new_url: String,
        local_file: String,
        timestamp: String,
        /// Absent until a deletion decision has been made for the original.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        deleted_old: Option<bool>,
    },
    Failure {
        error: String,
        timestamp: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub old_title: String,
    #[serde(flatten)]
    pub outcome: TransferOutcome,
}

impl TransferRecord {
    pub fn success(
        old_title: impl Into<String>,
        new_video_id: impl Into<String>,
        new_url: impl Into<String>,
        local_file: impl Into<String>,
    ) -> Self {
        Self {
            old_title: old_title.into(),
            outcome: TransferOutcome::Success {
                new_video_id: new_video_id.into(),
                new_url: new_url.into(),
                local_file: local_file.into(),
                timestamp: utc_timestamp(),
                deleted_old: None,
            },
        }
    }

    pub fn failure(old_title: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            old_title: old_title.into(),
            outcome: TransferOutcome::Failure {
                error: error.into(),
                timestamp: utc_timestamp(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, TransferOutcome::Success { .. })
    }
}

/// The persisted document. `processed` is the only field today; keeping the
/// wrapper object leaves room for run metadata without a format break.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferLog {
    #[serde(default)]
    pub processed: BTreeMap<String, TransferRecord>,
}

impl TransferLog {
    /// Loads the log, returning an empty one when no file exists yet. Safe to
    /// call repeatedly.
    pub fn load(path: &Path) -> Result<Self, TransferError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path).map_err(|err| {
            TransferError::Persistence(format!("reading {}: {err}", path.display()))
        })?;
        serde_json::from_str(&raw).map_err(|err| {
            TransferError::Persistence(format!("parsing {}: {err}", path.display()))
        })
    }

    /// Serializes the full log and renames it into place. On failure the
    /// in-memory log is untouched, so the caller may retry or abort.
    pub fn save(&self, path: &Path) -> Result<(), TransferError> {
        let payload = serde_json::to_string_pretty(self).map_err(|err| {
            TransferError::Persistence(format!("serializing transfer log: {err}"))
        })?;

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|err| {
                TransferError::Persistence(format!("creating {}: {err}", parent.display()))
            })?;
        }

        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, payload).map_err(|err| {
            TransferError::Persistence(format!("writing {}: {err}", tmp_path.display()))
        })?;
        fs::rename(&tmp_path, path).map_err(|err| {
            TransferError::Persistence(format!("finalizing {}: {err}", path.display()))
        })
    }

    /// True when the id has a *successful* transfer on record. Failures do not
    /// count: the item stays eligible for a retry.
    pub fn is_transferred(&self, video_id: &str) -> bool {
        self.processed
            .get(video_id)
            .is_some_and(TransferRecord::is_success)
    }

    pub fn record(&self, video_id: &str) -> Option<&TransferRecord> {
        self.processed.get(video_id)
    }

    pub fn insert(&mut self, video_id: impl Into<String>, record: TransferRecord) {
        self.processed.insert(video_id.into(), record);
    }

    /// Stores the deletion decision on an existing Success record. Returns
    /// false (and changes nothing) when the id has no Success record to
    /// annotate.
    pub fn set_deletion_decision(&mut self, video_id: &str, deleted: bool) -> bool {
        match self.processed.get_mut(video_id) {
            Some(TransferRecord {
                outcome: TransferOutcome::Success { deleted_old, .. },
                ..
            }) => {
                *deleted_old = Some(deleted);
                true
            }
            _ => false,
        }
    }
}

/// RFC 3339 UTC timestamp used for every record written in this process.
pub fn utc_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}
