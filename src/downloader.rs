#![forbid(unsafe_code)]

//! Download collaborator backed by `yt-dlp`.
//!
//! The pipeline only cares about the [`FetchSource`] contract: hand over a
//! video id, get back the local path of the fetched media. Which tool does
//! the fetching is an implementation detail behind that trait.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
#[cfg(test)]
use std::sync::{Mutex, MutexGuard};

use anyhow::{Result, bail};

use crate::error::TransferError;

/// Fetches one video from the source platform into local storage.
pub trait FetchSource {
    fn fetch(&self, video_id: &str) -> Result<PathBuf, TransferError>;
}

#[cfg(test)]
static YT_DLP_STUB: Mutex<Option<PathBuf>> = Mutex::new(None);
#[cfg(test)]
static STUB_USE_LOCK: Mutex<()> = Mutex::new(());

fn yt_dlp_command() -> Command {
    #[cfg(test)]
    {
        if let Some(path) = YT_DLP_STUB.lock().unwrap().clone() {
            return Command::new(path);
        }
    }
    Command::new("yt-dlp")
}

#[cfg(test)]
fn set_ytdlp_stub_path(path: PathBuf) -> YtDlpStubGuard {
    let guard = STUB_USE_LOCK.lock().unwrap();
    {
        let mut lock = YT_DLP_STUB.lock().unwrap();
        *lock = Some(path);
    }
    YtDlpStubGuard { lock: Some(guard) }
}

#[cfg(test)]
struct YtDlpStubGuard {
    lock: Option<MutexGuard<'static, ()>>,
}

#[cfg(test)]
impl Drop for YtDlpStubGuard {
    fn drop(&mut self) {
        *YT_DLP_STUB.lock().unwrap() = None;
        self.lock.take();
    }
}

/// Runs `yt-dlp --version` to fail loudly before the first item rather than
/// halfway through a batch.
pub fn ensure_downloader_available() -> Result<()> {
    let status = yt_dlp_command()
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();

    match status {
        Ok(status) if status.success() => Ok(()),
        Ok(_) => bail!("yt-dlp is installed but returned a failure status"),
        Err(err) => bail!("yt-dlp is not installed or not in PATH: {}", err),
    }
}

pub struct YtDlpFetcher {
    download_dir: PathBuf,
}

impl YtDlpFetcher {
    pub fn new(download_dir: impl Into<PathBuf>) -> Self {
        Self {
            download_dir: download_dir.into(),
        }
    }
}

impl FetchSource for YtDlpFetcher {
    fn fetch(&self, video_id: &str) -> Result<PathBuf, TransferError> {
        fs::create_dir_all(&self.download_dir).map_err(|err| {
            TransferError::Download(format!(
                "creating {}: {err}",
                self.download_dir.display()
            ))
        })?;

        let output_template = self.download_dir.join(format!("{video_id}.%(ext)s"));
        let video_url = format!("https://www.youtube.com/watch?v={video_id}");

        let status = yt_dlp_command()
            .arg("--no-mtime")
            .arg("-f")
            .arg("bestvideo+bestaudio/best")
            .arg("-o")
            .arg(output_template.to_string_lossy().to_string())
            .arg(&video_url)
            .status()
            .map_err(|err| TransferError::Download(format!("running yt-dlp: {err}")))?;

        if !status.success() {
            return Err(TransferError::Download(format!(
                "yt-dlp exited with status {status} for {video_id}"
            )));
        }

        find_downloaded_file(&self.download_dir, video_id)?.ok_or_else(|| {
            TransferError::Download(format!(
                "downloaded file for {video_id} not found in {}",
                self.download_dir.display()
            ))
        })
    }
}

/// yt-dlp picks the extension itself, so locate the result by the `<id>.`
/// prefix, ignoring `.part` leftovers from interrupted runs.
fn find_downloaded_file(dir: &Path, video_id: &str) -> Result<Option<PathBuf>, TransferError> {
    let prefix = format!("{video_id}.");
    let entries = fs::read_dir(dir)
        .map_err(|err| TransferError::Download(format!("reading {}: {err}", dir.display())))?;

    for entry in entries.flatten() {
        if !entry.path().is_file() {
            continue;
        }
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with(&prefix) && !name.ends_with(".part") {
            return Ok(Some(entry.path()));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    #[cfg(unix)]
    use std::os::unix::fs::PermissionsExt;
    use tempfile::tempdir;

    fn install_ytdlp_stub(dir: &Path, script: &str) -> Result<PathBuf> {
        let script_path = dir.join("yt-dlp");
        fs::write(&script_path, script)?;
        #[cfg(unix)]
        {
            let mut perms = fs::metadata(&script_path)?.permissions();
            perms.set_mode(0o755);
            fs::set_permissions(&script_path, perms)?;
        }
        Ok(script_path)
    }

    const SUCCESS_STUB: &str = r#"#!/usr/bin/env bash
set -eu
output=""
while [[ $# -gt 0 ]]; do
  case "$1" in
    -o)
      shift
      output="$1"
      ;;
  esac
  shift
done
target="${output//%(ext)s/mp4}"
mkdir -p "$(dirname "$target")"
echo "video" > "$target"
"#;

    const FAILING_STUB: &str = "#!/usr/bin/env bash\nexit 1\n";

    const SILENT_STUB: &str = "#!/usr/bin/env bash\nexit 0\n";

    #[test]
    fn fetch_returns_path_of_downloaded_file() -> Result<()> {
        let stub_dir = tempdir()?;
        let _guard = set_ytdlp_stub_path(install_ytdlp_stub(stub_dir.path(), SUCCESS_STUB)?);

        let download_dir = tempdir()?;
        let fetcher = YtDlpFetcher::new(download_dir.path());
        let path = fetcher.fetch("alpha").unwrap();

        assert_eq!(path, download_dir.path().join("alpha.mp4"));
        assert!(path.exists());
        Ok(())
    }

    #[test]
    fn fetch_maps_nonzero_exit_to_download_error() -> Result<()> {
        let stub_dir = tempdir()?;
        let _guard = set_ytdlp_stub_path(install_ytdlp_stub(stub_dir.path(), FAILING_STUB)?);

        let download_dir = tempdir()?;
        let fetcher = YtDlpFetcher::new(download_dir.path());
        let err = fetcher.fetch("alpha").unwrap_err();

        assert!(matches!(err, TransferError::Download(_)));
        Ok(())
    }

    #[test]
    fn fetch_errors_when_no_file_appears() -> Result<()> {
        let stub_dir = tempdir()?;
        let _guard = set_ytdlp_stub_path(install_ytdlp_stub(stub_dir.path(), SILENT_STUB)?);

        let download_dir = tempdir()?;
        let fetcher = YtDlpFetcher::new(download_dir.path());
        let err = fetcher.fetch("alpha").unwrap_err();

        assert!(err.to_string().contains("not found"));
        Ok(())
    }

    #[test]
    fn find_downloaded_file_skips_part_files() -> Result<()> {
        let dir = tempdir()?;
        fs::write(dir.path().join("alpha.mp4.part"), "partial")?;
        assert!(find_downloaded_file(dir.path(), "alpha")?.is_none());

        fs::write(dir.path().join("alpha.webm"), "done")?;
        let found = find_downloaded_file(dir.path(), "alpha")?.expect("file found");
        assert_eq!(found, dir.path().join("alpha.webm"));
        Ok(())
    }

    #[test]
    fn find_downloaded_file_ignores_other_ids() -> Result<()> {
        let dir = tempdir()?;
        fs::write(dir.path().join("beta.mp4"), "other")?;
        assert!(find_downloaded_file(dir.path(), "alpha")?.is_none());
        Ok(())
    }
}
