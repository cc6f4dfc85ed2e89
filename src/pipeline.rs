#![forbid(unsafe_code)]

//! The transfer pipeline: drives each selected video from "listed" to
//! "transferred" (or "failed") and keeps the transfer log consistent at every
//! step.
//!
//! Per item the flow is: entry guard against the log, fetch to local storage,
//! push to the destination, record the outcome. The entry guard is what makes
//! re-runs safe: a video with a Success record is skipped without touching
//! the collaborators or the log. A download or upload failure is recorded and
//! the batch moves on; only a log-persistence failure aborts the batch, since
//! continuing without a trustworthy log risks transferring videos twice.
//!
//! Deleting the original is never part of the item flow. It is a separate
//! action ([`delete_original`]) the caller invokes explicitly once a Success
//! record exists.

use std::path::Path;

use crate::downloader::FetchSource;
use crate::error::TransferError;
use crate::platform::{DeleteSource, PushDestination, UploadRequest, VideoItem, playback_url};
use crate::progress::ProgressWriter;
use crate::transfer_log::{TransferLog, TransferRecord};

/// Terminal state of one batch entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    /// Entry guard hit: a Success record already exists.
    Skipped,
    Transferred {
        new_video_id: String,
        new_url: String,
    },
    Failed {
        error: String,
    },
    /// Selection index outside the inventory snapshot; nothing to record.
    OutOfRange,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchEntry {
    pub index: usize,
    pub outcome: ItemOutcome,
}

pub struct TransferPipeline<'a, F, P> {
    log: &'a mut TransferLog,
    log_path: &'a Path,
    fetcher: &'a F,
    destination: &'a P,
    visibility: String,
    tags: Vec<String>,
    progress: Option<&'a ProgressWriter>,
}

impl<'a, F, P> TransferPipeline<'a, F, P>
where
    F: FetchSource,
    P: PushDestination,
{
    pub fn new(
        log: &'a mut TransferLog,
        log_path: &'a Path,
        fetcher: &'a F,
        destination: &'a P,
        visibility: impl Into<String>,
    ) -> Self {
        Self {
            log,
            log_path,
            fetcher,
            destination,
            visibility: visibility.into(),
            tags: Vec::new(),
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: Option<&'a ProgressWriter>) -> Self {
        self.progress = progress;
        self
    }

    /// Processes the selection strictly in order, one item at a time.
    /// Duplicated indices simply re-run the entry guard; a failed item never
    /// stops the items after it. The only error that escapes is a log
    /// persistence failure.
    pub fn process_batch(
        &mut self,
        inventory: &[VideoItem],
        indices: &[usize],
    ) -> Result<Vec<BatchEntry>, TransferError> {
        let total = indices.len();
        let mut results = Vec::with_capacity(total);

        for (position, &index) in indices.iter().enumerate() {
            let Some(video) = inventory.get(index) else {
                eprintln!(
                    "  Warning: selection index {index} is out of range for {} item(s)",
                    inventory.len()
                );
                results.push(BatchEntry {
                    index,
                    outcome: ItemOutcome::OutOfRange,
                });
                continue;
            };

            println!("[{}/{}] {}", position + 1, total, video.title);
            let outcome = self.process_item(video, position, total)?;
            results.push(BatchEntry { index, outcome });
        }

        self.report(100, "Batch complete");
        Ok(results)
    }

    fn process_item(
        &mut self,
        video: &VideoItem,
        position: usize,
        total: usize,
    ) -> Result<ItemOutcome, TransferError> {
        // Entry guard: a prior Success means the video is already migrated.
        // No download, no upload, no log write.
        if self.log.is_transferred(&video.video_id) {
            println!("  Skipping {} (already transferred)", video.title);
            return Ok(ItemOutcome::Skipped);
        }

        self.report(
            batch_percent(position, 0.0, total),
            &format!("Downloading {}", video.title),
        );
        println!("  Downloading {}", video.title);

        let local_file = match self.fetcher.fetch(&video.video_id) {
            Ok(path) => path,
            Err(err) => return self.record_failure(video, err),
        };

        self.report(
            batch_percent(position, 0.5, total),
            &format!("Uploading {}", video.title),
        );
        println!("  Uploading...");

        let request = UploadRequest {
            file: &local_file,
            title: &video.title,
            description: &video.description,
            tags: &self.tags,
            visibility: &self.visibility,
        };

        let progress = self.progress;
        let mut on_progress = |fraction: f64| {
            let percent = (fraction * 100.0).round() as u8;
            println!("  Upload progress: {percent}%");
            if let Some(writer) = progress {
                writer.write(
                    batch_percent(position, 0.5 + fraction / 2.0, total),
                    &format!("Uploading {}", video.title),
                );
            }
        };

        match self.destination.push(&request, &mut on_progress) {
            Ok(new_video_id) => {
                let new_url = playback_url(&new_video_id);
                self.commit_success(video, &new_video_id, &new_url, &local_file)?;
                println!("  Uploaded: {new_url}");
                Ok(ItemOutcome::Transferred {
                    new_video_id,
                    new_url,
                })
            }
            Err(err) => self.record_failure(video, err),
        }
    }

    fn commit_success(
        &mut self,
        video: &VideoItem,
        new_video_id: &str,
        new_url: &str,
        local_file: &Path,
    ) -> Result<(), TransferError> {
        self.log.insert(
            video.video_id.clone(),
            TransferRecord::success(
                video.title.clone(),
                new_video_id,
                new_url,
                local_file.to_string_lossy().into_owned(),
            ),
        );
        self.log.save(self.log_path)
    }

    /// Writes and persists a Failure record, then reports the item as failed.
    /// The stored message is the collaborator's own diagnostic so a later
    /// inspection of the log reads the way the failure actually happened.
    fn record_failure(
        &mut self,
        video: &VideoItem,
        err: TransferError,
    ) -> Result<ItemOutcome, TransferError> {
        let message = err.diagnostic();
        eprintln!("  Error with {}: {message}", video.title);
        self.log.insert(
            video.video_id.clone(),
            TransferRecord::failure(video.title.clone(), message.clone()),
        );
        self.log.save(self.log_path)?;
        Ok(ItemOutcome::Failed { error: message })
    }

    fn report(&self, percent: u8, message: &str) {
        if let Some(writer) = self.progress {
            writer.write(percent, message);
        }
    }
}

/// Maps (item position, within-item fraction) onto the batch-wide 0..100
/// scale. Download occupies the first half of an item's span, upload the
/// second.
fn batch_percent(position: usize, fraction: f64, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    let overall = (position as f64 + fraction) / total as f64;
    (overall * 100.0).round() as u8
}

/// Explicitly invoked deletion of the source copy. Requires an existing
/// Success record; the decision (`deleted_old`) is persisted whichever way
/// the delete goes, and a failed delete leaves the Success outcome intact
/// while still surfacing the error to the caller.
pub fn delete_original(
    log: &mut TransferLog,
    log_path: &Path,
    source: &dyn DeleteSource,
    video_id: &str,
) -> Result<(), TransferError> {
    if !log.is_transferred(video_id) {
        return Err(TransferError::Delete(format!(
            "no successful transfer recorded for {video_id}"
        )));
    }

    match source.delete(video_id) {
        Ok(()) => {
            log.set_deletion_decision(video_id, true);
            log.save(log_path)?;
            Ok(())
        }
        Err(err) => {
            log.set_deletion_decision(video_id, false);
            log.save(log_path)?;
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer_log::TransferOutcome;
    use std::cell::{Cell, RefCell};
    use std::fs;
    use std::path::PathBuf;
    use tempfile::{TempDir, tempdir};

    struct FakeFetcher {
        dir: PathBuf,
        calls: Cell<usize>,
        fail_ids: Vec<&'static str>,
    }

    impl FakeFetcher {
        fn new(dir: &Path) -> Self {
            Self {
                dir: dir.to_path_buf(),
                calls: Cell::new(0),
                fail_ids: Vec::new(),
            }
        }

        fn failing_for(dir: &Path, ids: &[&'static str]) -> Self {
            Self {
                dir: dir.to_path_buf(),
                calls: Cell::new(0),
                fail_ids: ids.to_vec(),
            }
        }
    }

    impl FetchSource for FakeFetcher {
        fn fetch(&self, video_id: &str) -> Result<PathBuf, TransferError> {
            self.calls.set(self.calls.get() + 1);
            if self.fail_ids.iter().any(|id| *id == video_id) {
                return Err(TransferError::Download("network timeout".into()));
            }
            let path = self.dir.join(format!("{video_id}.mp4"));
            fs::write(&path, "video").unwrap();
            Ok(path)
        }
    }

    struct FakeDestination {
        calls: Cell<usize>,
        uploaded: RefCell<Vec<String>>,
        fail_titles: Vec<&'static str>,
    }

    impl FakeDestination {
        fn new() -> Self {
            Self {
                calls: Cell::new(0),
                uploaded: RefCell::new(Vec::new()),
                fail_titles: Vec::new(),
            }
        }

        fn failing_for(titles: &[&'static str]) -> Self {
            Self {
                calls: Cell::new(0),
                uploaded: RefCell::new(Vec::new()),
                fail_titles: titles.to_vec(),
            }
        }
    }

    impl PushDestination for FakeDestination {
        fn push(
            &self,
            request: &UploadRequest<'_>,
            progress: &mut dyn FnMut(f64),
        ) -> Result<String, TransferError> {
            self.calls.set(self.calls.get() + 1);
            if self.fail_titles.iter().any(|title| *title == request.title) {
                return Err(TransferError::Upload("quota exceeded".into()));
            }
            progress(0.5);
            progress(1.0);
            self.uploaded.borrow_mut().push(request.title.to_string());
            // Deterministic destination id: source stem + "2".
            let stem = request
                .file
                .file_stem()
                .and_then(|stem| stem.to_str())
                .unwrap_or("new");
            Ok(format!("{stem}2"))
        }
    }

    struct FakeDeleter {
        calls: Cell<usize>,
        fail: bool,
    }

    impl FakeDeleter {
        fn new(fail: bool) -> Self {
            Self {
                calls: Cell::new(0),
                fail,
            }
        }
    }

    impl DeleteSource for FakeDeleter {
        fn delete(&self, video_id: &str) -> Result<(), TransferError> {
            self.calls.set(self.calls.get() + 1);
            if self.fail {
                return Err(TransferError::Delete(format!(
                    "insufficient permissions for {video_id}"
                )));
            }
            Ok(())
        }
    }

    fn sample_inventory() -> Vec<VideoItem> {
        vec![
            VideoItem {
                video_id: "a".into(),
                title: "X".into(),
                description: "first".into(),
                published_at: None,
                views: 10,
                duration: "PT1M".into(),
            },
            VideoItem {
                video_id: "b".into(),
                title: "Y".into(),
                description: "second".into(),
                published_at: None,
                views: 20,
                duration: "PT2M".into(),
            },
        ]
    }

    struct Harness {
        _dir: TempDir,
        download_dir: PathBuf,
        log_path: PathBuf,
    }

    fn harness() -> Harness {
        let dir = tempdir().unwrap();
        let download_dir = dir.path().join("downloads");
        fs::create_dir_all(&download_dir).unwrap();
        let log_path = dir.path().join("transfer_log.json");
        Harness {
            download_dir,
            log_path,
            _dir: dir,
        }
    }

    #[test]
    fn successful_transfer_writes_expected_record() {
        let h = harness();
        let inventory = sample_inventory();
        let fetcher = FakeFetcher::new(&h.download_dir);
        let destination = FakeDestination::new();
        let mut log = TransferLog::default();

        let results = TransferPipeline::new(&mut log, &h.log_path, &fetcher, &destination, "public")
            .process_batch(&inventory, &[1])
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(
            results[0].outcome,
            ItemOutcome::Transferred {
                new_video_id: "b2".into(),
                new_url: "https://youtu.be/b2".into(),
            }
        );

        let record = log.record("b").expect("record for b");
        assert_eq!(record.old_title, "Y");
        let TransferOutcome::Success {
            new_video_id,
            new_url,
            local_file,
            deleted_old,
            ..
        } = &record.outcome
        else {
            panic!("success outcome expected");
        };
        assert_eq!(new_video_id, "b2");
        assert_eq!(new_url, "https://youtu.be/b2");
        assert!(local_file.ends_with("b.mp4"));
        assert!(deleted_old.is_none());

        // Item "a" was not selected and has no record.
        assert!(log.record("a").is_none());

        // The log was persisted, not just mutated in memory.
        let reloaded = TransferLog::load(&h.log_path).unwrap();
        assert_eq!(reloaded, log);
    }

    #[test]
    fn download_failure_writes_failure_record_with_collaborator_message() {
        let h = harness();
        let inventory = sample_inventory();
        let fetcher = FakeFetcher::failing_for(&h.download_dir, &["a"]);
        let destination = FakeDestination::new();
        let mut log = TransferLog::default();

        let results = TransferPipeline::new(&mut log, &h.log_path, &fetcher, &destination, "public")
            .process_batch(&inventory, &[0])
            .unwrap();

        assert_eq!(
            results[0].outcome,
            ItemOutcome::Failed {
                error: "network timeout".into()
            }
        );
        // Upload must not be attempted after a failed download.
        assert_eq!(destination.calls.get(), 0);

        let record = log.record("a").expect("record for a");
        assert_eq!(record.old_title, "X");
        let TransferOutcome::Failure { error, .. } = &record.outcome else {
            panic!("failure outcome expected");
        };
        assert_eq!(error, "network timeout");
    }

    #[test]
    fn entry_guard_skips_transferred_items_without_collaborator_calls() {
        let h = harness();
        let inventory = sample_inventory();
        let fetcher = FakeFetcher::new(&h.download_dir);
        let destination = FakeDestination::new();

        let mut log = TransferLog::default();
        log.insert("b", TransferRecord::success("Y", "b2", "https://youtu.be/b2", "/dl/b.mp4"));
        log.save(&h.log_path).unwrap();
        let persisted_before = fs::read(&h.log_path).unwrap();

        let results = TransferPipeline::new(&mut log, &h.log_path, &fetcher, &destination, "public")
            .process_batch(&inventory, &[1, 1])
            .unwrap();

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|entry| entry.outcome == ItemOutcome::Skipped));
        assert_eq!(fetcher.calls.get(), 0);
        assert_eq!(destination.calls.get(), 0);
        // The log file is byte-for-byte unchanged.
        assert_eq!(fs::read(&h.log_path).unwrap(), persisted_before);
    }

    #[test]
    fn failed_items_stay_eligible_for_retry() {
        let h = harness();
        let inventory = sample_inventory();
        let destination = FakeDestination::new();

        let mut log = TransferLog::default();
        log.insert("a", TransferRecord::failure("X", "network timeout"));

        let fetcher = FakeFetcher::new(&h.download_dir);
        let results = TransferPipeline::new(&mut log, &h.log_path, &fetcher, &destination, "public")
            .process_batch(&inventory, &[0])
            .unwrap();

        assert_eq!(fetcher.calls.get(), 1);
        assert!(matches!(
            results[0].outcome,
            ItemOutcome::Transferred { .. }
        ));
        assert!(log.is_transferred("a"));
    }

    #[test]
    fn batch_continues_after_mid_batch_failure() {
        let h = harness();
        let inventory = sample_inventory();
        let fetcher = FakeFetcher::failing_for(&h.download_dir, &["a"]);
        let destination = FakeDestination::new();
        let mut log = TransferLog::default();

        let results = TransferPipeline::new(&mut log, &h.log_path, &fetcher, &destination, "public")
            .process_batch(&inventory, &[0, 1])
            .unwrap();

        assert_eq!(results.len(), 2);
        assert!(matches!(results[0].outcome, ItemOutcome::Failed { .. }));
        assert!(matches!(
            results[1].outcome,
            ItemOutcome::Transferred { .. }
        ));
        assert!(log.record("a").is_some());
        assert!(log.is_transferred("b"));
    }

    #[test]
    fn upload_failure_records_and_continues() {
        let h = harness();
        let inventory = sample_inventory();
        let fetcher = FakeFetcher::new(&h.download_dir);
        let destination = FakeDestination::failing_for(&["X"]);
        let mut log = TransferLog::default();

        let results = TransferPipeline::new(&mut log, &h.log_path, &fetcher, &destination, "public")
            .process_batch(&inventory, &[0, 1])
            .unwrap();

        assert_eq!(
            results[0].outcome,
            ItemOutcome::Failed {
                error: "quota exceeded".into()
            }
        );
        assert!(matches!(
            results[1].outcome,
            ItemOutcome::Transferred { .. }
        ));
        assert_eq!(destination.uploaded.borrow().as_slice(), ["Y"]);
    }

    #[test]
    fn out_of_range_index_is_reported_and_skipped() {
        let h = harness();
        let inventory = sample_inventory();
        let fetcher = FakeFetcher::new(&h.download_dir);
        let destination = FakeDestination::new();
        let mut log = TransferLog::default();

        let results = TransferPipeline::new(&mut log, &h.log_path, &fetcher, &destination, "public")
            .process_batch(&inventory, &[5, 0])
            .unwrap();

        assert_eq!(results[0].outcome, ItemOutcome::OutOfRange);
        assert!(matches!(
            results[1].outcome,
            ItemOutcome::Transferred { .. }
        ));
        assert!(log.processed.len() == 1);
    }

    #[test]
    fn delete_original_success_sets_deleted_old_true() {
        let h = harness();
        let mut log = TransferLog::default();
        log.insert("b", TransferRecord::success("Y", "b2", "https://youtu.be/b2", "/dl/b.mp4"));

        let deleter = FakeDeleter::new(false);
        delete_original(&mut log, &h.log_path, &deleter, "b").unwrap();

        assert_eq!(deleter.calls.get(), 1);
        let TransferOutcome::Success { deleted_old, .. } = &log.record("b").unwrap().outcome
        else {
            panic!("success outcome expected");
        };
        assert_eq!(*deleted_old, Some(true));
        // Decision persisted immediately.
        let reloaded = TransferLog::load(&h.log_path).unwrap();
        assert_eq!(reloaded, log);
    }

    #[test]
    fn delete_original_failure_keeps_success_and_records_false() {
        let h = harness();
        let mut log = TransferLog::default();
        log.insert("b", TransferRecord::success("Y", "b2", "https://youtu.be/b2", "/dl/b.mp4"));

        let deleter = FakeDeleter::new(true);
        let err = delete_original(&mut log, &h.log_path, &deleter, "b").unwrap_err();
        assert!(matches!(err, TransferError::Delete(_)));

        let TransferOutcome::Success {
            deleted_old,
            new_video_id,
            new_url,
            ..
        } = &log.record("b").unwrap().outcome
        else {
            panic!("success outcome expected");
        };
        assert_eq!(*deleted_old, Some(false));
        assert_eq!(new_video_id, "b2");
        assert_eq!(new_url, "https://youtu.be/b2");
    }

    #[test]
    fn delete_original_requires_a_success_record() {
        let h = harness();
        let mut log = TransferLog::default();
        log.insert("a", TransferRecord::failure("X", "network timeout"));

        let deleter = FakeDeleter::new(false);
        let err = delete_original(&mut log, &h.log_path, &deleter, "a").unwrap_err();
        assert!(err.to_string().contains("no successful transfer"));
        assert_eq!(deleter.calls.get(), 0);

        let err = delete_original(&mut log, &h.log_path, &deleter, "unknown").unwrap_err();
        assert!(matches!(err, TransferError::Delete(_)));
    }

    #[test]
    fn batch_percent_spans_items_evenly() {
        assert_eq!(batch_percent(0, 0.0, 2), 0);
        assert_eq!(batch_percent(0, 0.5, 2), 25);
        assert_eq!(batch_percent(1, 0.5, 2), 75);
        assert_eq!(batch_percent(1, 1.0, 2), 100);
        assert_eq!(batch_percent(0, 0.0, 0), 100);
    }
}
