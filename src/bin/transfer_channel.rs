#![forbid(unsafe_code)]

//! Command-line driver that moves selected videos from the source channel to
//! the destination channel.
//!
//! The flow mirrors how a human works through a migration: authenticate both
//! accounts, list what the source channel has, pick videos (explicit indices
//! or an instruction for the ranking assistant), then let the pipeline move
//! them one at a time. Everything already transferred according to the log is
//! skipped, so re-running after a partial batch is safe.

use anyhow::{Context, Result, anyhow, bail};
use movetube_tools::config::{ConfigOverrides, TransferConfig, resolve_config};
use movetube_tools::credentials::{AccountSlot, load_credential};
use movetube_tools::downloader::{YtDlpFetcher, ensure_downloader_available};
use movetube_tools::pipeline::{self, ItemOutcome, TransferPipeline};
use movetube_tools::platform::{PlatformClient, VideoItem};
use movetube_tools::progress::ProgressWriter;
use movetube_tools::security::ensure_not_root;
use movetube_tools::selector::{self, HttpRanker};
use movetube_tools::transfer_log::TransferLog;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
enum SelectionMode {
    Manual(Vec<usize>),
    Assisted(String),
}

#[derive(Debug, Clone)]
struct TransferArgs {
    selection: Option<SelectionMode>,
    list_only: bool,
    delete_originals: bool,
    progress_file: Option<PathBuf>,
    config: TransferConfig,
}

impl TransferArgs {
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
        let mut selection: Option<SelectionMode> = None;
        let mut list_only = false;
        let mut delete_originals = false;
        let mut progress_file: Option<PathBuf> = None;
        let mut download_dir: Option<PathBuf> = None;
        let mut log_file: Option<PathBuf> = None;
        let mut visibility: Option<String> = None;
        let mut max_results: Option<usize> = None;
        let mut env_path: Option<PathBuf> = None;
        let mut args = iter.into_iter();

        while let Some(arg) = args.next() {
            if let Some(value) = arg.strip_prefix("--select=") {
                Self::set_selection(&mut selection, SelectionMode::Manual(parse_index_list(value)?))?;
                continue;
            }
            if let Some(value) = arg.strip_prefix("--instruction=") {
                Self::set_selection(&mut selection, SelectionMode::Assisted(value.to_string()))?;
                continue;
            }
            if let Some(value) = arg.strip_prefix("--progress-file=") {
                progress_file = Some(PathBuf::from(value));
                continue;
            }
            if let Some(value) = arg.strip_prefix("--download-dir=") {
                download_dir = Some(PathBuf::from(value));
                continue;
            }
            if let Some(value) = arg.strip_prefix("--log-file=") {
                log_file = Some(PathBuf::from(value));
                continue;
            }
            if let Some(value) = arg.strip_prefix("--visibility=") {
                visibility = Some(value.to_string());
                continue;
            }
            if let Some(value) = arg.strip_prefix("--max-results=") {
                max_results = Some(parse_max_results(value)?);
                continue;
            }
            if let Some(value) = arg.strip_prefix("--env=") {
                env_path = Some(PathBuf::from(value));
                continue;
            }

            match arg.as_str() {
                "--select" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--select requires a value"))?;
                    Self::set_selection(&mut selection, SelectionMode::Manual(parse_index_list(&value)?))?;
                }
                "--instruction" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--instruction requires a value"))?;
                    Self::set_selection(&mut selection, SelectionMode::Assisted(value))?;
                }
                "--progress-file" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--progress-file requires a value"))?;
                    progress_file = Some(PathBuf::from(value));
                }
                "--download-dir" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--download-dir requires a value"))?;
                    download_dir = Some(PathBuf::from(value));
                }
                "--log-file" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--log-file requires a value"))?;
                    log_file = Some(PathBuf::from(value));
                }
                "--visibility" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--visibility requires a value"))?;
                    visibility = Some(value);
                }
                "--max-results" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--max-results requires a value"))?;
                    max_results = Some(parse_max_results(&value)?);
                }
                "--env" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--env requires a value"))?;
                    env_path = Some(PathBuf::from(value));
                }
                "--list" => {
                    list_only = true;
                }
                "--delete-originals" => {
                    delete_originals = true;
                }
                _ => {
                    bail!("unknown argument: {arg}");
                }
            }
        }

        if selection.is_none() && !list_only {
            bail!(
                "Usage: transfer_channel --select <i,j,..> | --instruction <text> [--delete-originals] [--list]\n       [--download-dir <path>] [--log-file <path>] [--visibility <policy>] [--max-results <n>]\n       [--progress-file <path>] [--env <path>]"
            );
        }

        let config = resolve_config(ConfigOverrides {
            download_dir,
            log_file,
            upload_visibility: visibility,
            max_list_results: max_results,
            env_path,
        })?;

        Ok(Self {
            selection,
            list_only,
            delete_originals,
            progress_file,
            config,
        })
    }

    fn set_selection(target: &mut Option<SelectionMode>, value: SelectionMode) -> Result<()> {
        if target.is_some() {
            bail!("only one of --select and --instruction may be given");
        }
        *target = Some(value);
        Ok(())
    }
}

fn parse_index_list(value: &str) -> Result<Vec<usize>> {
    let mut indices = Vec::new();
    for token in value.split(',') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        let index = token
            .parse::<usize>()
            .map_err(|_| anyhow!("invalid selection index: {token}"))?;
        indices.push(index);
    }
    if indices.is_empty() {
        bail!("--select needs at least one index");
    }
    Ok(indices)
}

fn parse_max_results(value: &str) -> Result<usize> {
    value
        .parse::<usize>()
        .map_err(|_| anyhow!("invalid --max-results value: {value}"))
}

fn main() -> Result<()> {
    ensure_not_root("transfer_channel")?;

    let TransferArgs {
        selection,
        list_only,
        delete_originals,
        progress_file,
        config,
    } = TransferArgs::parse()?;

    println!("===================================");
    println!("Channel Transfer");
    println!("===================================");
    println!("Transfer log: {}", config.log_file.display());
    println!("Download dir: {}", config.download_dir.display());
    println!();

    let agent = ureq::agent();

    let source_credential =
        load_credential(&agent, &config.source_token_file, AccountSlot::Source)?;
    let source = PlatformClient::new(&source_credential);
    let (playlist_id, channel_title) = source
        .uploads_playlist()
        .context("resolving source channel")?;

    let videos = source
        .list_uploads(&playlist_id, config.max_list_results)
        .context("listing source channel uploads")?;
    println!(
        "Found {} video(s) in source channel: {}",
        videos.len(),
        channel_title
    );

    let mut log = TransferLog::load(&config.log_file)?;
    print_inventory(&videos, &log);

    if list_only {
        return Ok(());
    }

    // Parsing guarantees a selection whenever --list was not given.
    let Some(selection) = selection else {
        return Ok(());
    };

    let indices = match selection {
        SelectionMode::Manual(picks) => manual_indices(&picks, videos.len())?,
        SelectionMode::Assisted(instruction) => {
            let api_key = config.ranking_api_key.clone().ok_or_else(|| {
                anyhow!("RANKING_API_KEY not set; assisted selection needs a ranking credential")
            })?;
            let ranker = HttpRanker::new(
                config.ranking_api_url.as_str(),
                api_key,
                config.ranking_model.as_str(),
            );
            let suggested = selector::assisted_indices(&videos, &instruction, &ranker);
            println!("Suggested indices: {suggested:?}");
            suggested
        }
    };

    if indices.is_empty() {
        println!("No videos selected.");
        return Ok(());
    }

    ensure_downloader_available()?;

    let dest_credential =
        load_credential(&agent, &config.dest_token_file, AccountSlot::Destination)?;
    let destination = PlatformClient::new(&dest_credential);
    let fetcher = YtDlpFetcher::new(&config.download_dir);
    let progress = progress_file.map(ProgressWriter::new);

    println!();
    println!("Processing {} selected video(s)...", indices.len());
    println!();

    let results = TransferPipeline::new(
        &mut log,
        &config.log_file,
        &fetcher,
        &destination,
        config.upload_visibility.as_str(),
    )
    .with_progress(progress.as_ref())
    .process_batch(&videos, &indices)?;

    if delete_originals {
        println!();
        println!("Deleting originals for newly transferred videos...");
        for entry in &results {
            if matches!(entry.outcome, ItemOutcome::Transferred { .. }) {
                let video = &videos[entry.index];
                match pipeline::delete_original(
                    &mut log,
                    &config.log_file,
                    &source,
                    &video.video_id,
                ) {
                    Ok(()) => println!("  Deleted original: {}", video.title),
                    Err(err) => {
                        eprintln!("  Warning: could not delete {}: {err}", video.title);
                    }
                }
            }
        }
    }

    println!();
    println!("===================================");
    println!("Transfer complete!");
    println!("===================================");
    let (transferred, skipped, failed) = summarize(&results);
    println!("Transferred: {transferred}");
    println!("Skipped (already transferred): {skipped}");
    println!("Failed: {failed}");

    Ok(())
}

fn print_inventory(videos: &[VideoItem], log: &TransferLog) {
    for (index, video) in videos.iter().enumerate() {
        let marker = if log.is_transferred(&video.video_id) {
            " (transferred)"
        } else {
            ""
        };
        println!(
            "[{index}] {} ({} views){marker}",
            video.title, video.views
        );
    }
}

/// Converts explicit picks into the selector's checkbox form, rejecting picks
/// outside the inventory up front rather than mid-batch.
fn manual_indices(picks: &[usize], inventory_len: usize) -> Result<Vec<usize>> {
    let mut checkboxes = vec![false; inventory_len];
    for &pick in picks {
        if pick >= inventory_len {
            bail!("selection index {pick} is out of range for {inventory_len} item(s)");
        }
        checkboxes[pick] = true;
    }
    Ok(selector::checked_indices(&checkboxes))
}

fn summarize(results: &[pipeline::BatchEntry]) -> (usize, usize, usize) {
    let mut transferred = 0;
    let mut skipped = 0;
    let mut failed = 0;
    for entry in results {
        match entry.outcome {
            ItemOutcome::Transferred { .. } => transferred += 1,
            ItemOutcome::Skipped => skipped += 1,
            ItemOutcome::Failed { .. } | ItemOutcome::OutOfRange => failed += 1,
        }
    }
    (transferred, skipped, failed)
}
