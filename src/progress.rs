#![forbid(unsafe_code)]

//! Progress reporting through an atomically rewritten JSON file.
//!
//! The transfer pipeline is a long-running foreground process; anything that
//! wants to observe it (a wrapper script, a UI polling loop) reads this file.
//! Progress is best-effort: write failures are warned about and never fail
//! the transfer itself.

use serde::Serialize;
use std::fs;
use std::path::PathBuf;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProgressReport {
    progress: u8,
    message: String,
}

#[derive(Clone)]
pub struct ProgressWriter {
    path: PathBuf,
}

impl ProgressWriter {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Writes `{"progress": .., "message": ..}`, clamped to 100. A reader
    /// polling the path sees either the previous report or the new one, never
    /// a torn write.
    pub fn write(&self, progress: u8, message: &str) {
        let report = ProgressReport {
            progress: progress.min(100),
            message: message.to_string(),
        };

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
            && let Err(err) = fs::create_dir_all(parent)
        {
            eprintln!("  Warning: could not create progress dir: {err}");
            return;
        }

        let tmp_path = self.path.with_extension("tmp");
        match serde_json::to_vec(&report) {
            Ok(payload) => {
                if let Err(err) = fs::write(&tmp_path, payload) {
                    eprintln!("  Warning: could not write progress file: {err}");
                    return;
                }
                if let Err(err) = fs::rename(&tmp_path, &self.path) {
                    eprintln!("  Warning: could not finalize progress file: {err}");
                }
            }
            Err(err) => {
                eprintln!("  Warning: could not serialize progress report: {err}");
            }
        }
    }
}
