#![forbid(unsafe_code)]

//! Standalone deletion pass over the transfer log.
//!
//! Uploading never deletes anything; this binary is the explicit step that
//! removes source copies after a human decided the transfer worked. Run it
//! bare to see which successfully transferred videos still await a decision,
//! with `--all-pending` to delete all of them, or with explicit video ids.

use anyhow::{Result, anyhow, bail};
use movetube_tools::config::{ConfigOverrides, resolve_config};
use movetube_tools::credentials::{AccountSlot, load_credential};
use movetube_tools::pipeline::delete_original;
use movetube_tools::platform::PlatformClient;
use movetube_tools::security::ensure_not_root;
use movetube_tools::transfer_log::{TransferLog, TransferOutcome};
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
struct DeleteArgs {
    video_ids: Vec<String>,
    all_pending: bool,
    log_file: Option<PathBuf>,
    env_path: Option<PathBuf>,
}

impl DeleteArgs {
    fn parse() -> Result<Self> {
        Self::from_iter(env::args().skip(1))
    }

    #[cfg(test)]
    fn from_slice(values: &[&str]) -> Result<Self> {
        Self::from_iter(values.iter().map(|value| value.to_string()))
    }

    fn from_iter<I>(iter: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut video_ids = Vec::new();
        let mut all_pending = false;
        let mut log_file: Option<PathBuf> = None;
        let mut env_path: Option<PathBuf> = None;
        let mut args = iter.into_iter();

        while let Some(arg) = args.next() {
            if let Some(value) = arg.strip_prefix("--log-file=") {
                log_file = Some(PathBuf::from(value));
                continue;
            }
            if let Some(value) = arg.strip_prefix("--env=") {
                env_path = Some(PathBuf::from(value));
                continue;
            }

            match arg.as_str() {
                "--log-file" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--log-file requires a value"))?;
                    log_file = Some(PathBuf::from(value));
                }
                "--env" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--env requires a value"))?;
                    env_path = Some(PathBuf::from(value));
                }
                "--all-pending" => {
                    all_pending = true;
                }
                _ if arg.starts_with('-') => {
                    bail!("unknown argument: {arg}");
                }
                _ => {
                    video_ids.push(arg);
                }
            }
        }

        if all_pending && !video_ids.is_empty() {
            bail!("pass either --all-pending or explicit video ids, not both");
        }

        Ok(Self {
            video_ids,
            all_pending,
            log_file,
            env_path,
        })
    }
}

/// Ids with a successful transfer on record and no deletion decision yet.
fn pending_deletions(log: &TransferLog) -> Vec<String> {
    log.processed
        .iter()
        .filter(|(_, record)| {
            matches!(
                record.outcome,
                TransferOutcome::Success {
                    deleted_old: None,
                    ..
                }
            )
        })
        .map(|(video_id, _)| video_id.clone())
        .collect()
}

fn record_title<'a>(log: &'a TransferLog, video_id: &str) -> &'a str {
    log.record(video_id)
        .map(|record| record.old_title.as_str())
        .unwrap_or("<unknown>")
}

fn main() -> Result<()> {
    ensure_not_root("delete_originals")?;

    let DeleteArgs {
        video_ids,
        all_pending,
        log_file,
        env_path,
    } = DeleteArgs::parse()?;

    let config = resolve_config(ConfigOverrides {
        log_file,
        env_path,
        ..ConfigOverrides::default()
    })?;

    let mut log = TransferLog::load(&config.log_file)?;
    let pending = pending_deletions(&log);

    if !all_pending && video_ids.is_empty() {
        if pending.is_empty() {
            println!("No transferred videos are awaiting a deletion decision.");
        } else {
            println!("Videos with a successful transfer and no deletion decision:");
            for video_id in &pending {
                println!("  - {} ({})", video_id, record_title(&log, video_id));
            }
            println!();
            println!("Re-run with --all-pending to delete all of them, or pass video ids.");
        }
        return Ok(());
    }

    let targets = if all_pending { pending } else { video_ids };
    if targets.is_empty() {
        println!("Nothing to delete.");
        return Ok(());
    }

    let agent = ureq::agent();
    let source_credential =
        load_credential(&agent, &config.source_token_file, AccountSlot::Source)?;
    let source = PlatformClient::new(&source_credential);

    let total = targets.len();
    let mut deleted = 0usize;
    for (index, video_id) in targets.iter().enumerate() {
        let title = record_title(&log, video_id).to_owned();
        println!("[{}/{}] Deleting original: {} ({})", index + 1, total, title, video_id);
        match delete_original(&mut log, &config.log_file, &source, video_id) {
            Ok(()) => {
                println!("  Deleted from source channel");
                deleted += 1;
            }
            Err(err) => {
                eprintln!("  Warning: {err}");
            }
        }
    }

    println!();
    println!("Deleted {deleted} of {total} video(s).");

    Ok(())
}
