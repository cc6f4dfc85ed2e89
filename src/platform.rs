#![forbid(unsafe_code)]

//! Blocking client for the video platform's read/write API.
//!
//! One client instance wraps one account credential. The same type serves
//! both slots: with the source credential it lists the channel's uploads and
//! deletes originals, with the destination credential it pushes new uploads.
//!
//! Uploads use the platform's two-step resumable protocol: an initiation
//! request that returns a session URI in the `Location` header, then the file
//! body in fixed-size chunks with `Content-Range`. The server answers 308 for
//! every chunk but the last, which is also where per-chunk progress falls out
//! for free.

use std::cmp;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use mime_guess::MimeGuess;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::credentials::Credential;
use crate::error::TransferError;

pub const DEFAULT_API_BASE: &str = "https://www.googleapis.com/youtube/v3";
pub const DEFAULT_UPLOAD_BASE: &str = "https://www.googleapis.com/upload/youtube/v3";

// Page and batch sizes are the API's documented per-request maximum.
const PAGE_SIZE: usize = 50;
const STATS_BATCH: usize = 50;
// Resumable chunks must be a multiple of 256 KiB.
const UPLOAD_CHUNK_SIZE: usize = 8 * 1024 * 1024;

/// One transferable video as listed from the source channel. Field names
/// follow the platform's wire casing so the compact ranking payload and any
/// saved snapshots read the same as the API itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoItem {
    pub video_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<String>,
    #[serde(default)]
    pub views: i64,
    #[serde(default)]
    pub duration: String,
}

/// What the destination needs to publish one video.
pub struct UploadRequest<'a> {
    pub file: &'a Path,
    pub title: &'a str,
    pub description: &'a str,
    pub tags: &'a [String],
    pub visibility: &'a str,
}

/// Upload collaborator contract consumed by the pipeline. Progress is a
/// fraction in `0.0..=1.0`; implementations may report it zero or more times
/// before returning the new video id.
pub trait PushDestination {
    fn push(
        &self,
        request: &UploadRequest<'_>,
        progress: &mut dyn FnMut(f64),
    ) -> Result<String, TransferError>;
}

/// Delete collaborator contract: removes one video from the source account.
pub trait DeleteSource {
    fn delete(&self, video_id: &str) -> Result<(), TransferError>;
}

pub struct PlatformClient {
    agent: ureq::Agent,
    access_token: String,
    api_base: String,
    upload_base: String,
}

impl PlatformClient {
    pub fn new(credential: &Credential) -> Self {
        Self::with_bases(credential, DEFAULT_API_BASE, DEFAULT_UPLOAD_BASE)
    }

    pub fn with_bases(credential: &Credential, api_base: &str, upload_base: &str) -> Self {
        Self {
            agent: ureq::agent(),
            access_token: credential.access_token.clone(),
            api_base: api_base.trim_end_matches('/').to_string(),
            upload_base: upload_base.trim_end_matches('/').to_string(),
        }
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token)
    }

    /// Resolves the channel behind this credential to its uploads playlist id
    /// and display title.
    pub fn uploads_playlist(&self) -> Result<(String, String)> {
        let response: ChannelListResponse = self
            .agent
            .get(&format!("{}/channels", self.api_base))
            .query("part", "contentDetails,snippet")
            .query("mine", "true")
            .set("Authorization", &self.bearer())
            .call()
            .context("requesting channel details")?
            .into_json()
            .context("parsing channel list response")?;

        let channel = response
            .items
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("no channel found for this credential"))?;
        Ok((
            channel.content_details.related_playlists.uploads,
            channel.snippet.title,
        ))
    }

    /// Lists the uploads playlist, walking `nextPageToken` transparently and
    /// capping the total at `max_results`. View counts and durations come
    /// from a second, batched statistics call.
    pub fn list_uploads(&self, playlist_id: &str, max_results: usize) -> Result<Vec<VideoItem>> {
        let mut videos = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .agent
                .get(&format!("{}/playlistItems", self.api_base))
                .query("part", "snippet,contentDetails")
                .query("playlistId", playlist_id)
                .query("maxResults", &PAGE_SIZE.to_string())
                .set("Authorization", &self.bearer());
            if let Some(token) = &page_token {
                request = request.query("pageToken", token);
            }

            let response: PlaylistItemsResponse = request
                .call()
                .with_context(|| format!("listing playlist {playlist_id}"))?
                .into_json()
                .context("parsing playlist items response")?;

            for item in response.items {
                videos.push(playlist_item_to_video(item));
            }

            page_token = response.next_page_token;
            if page_token.is_none() || videos.len() >= max_results {
                break;
            }
        }

        videos.truncate(max_results);
        self.fill_statistics(&mut videos)?;
        Ok(videos)
    }

    fn fill_statistics(&self, videos: &mut [VideoItem]) -> Result<()> {
        let mut start = 0;
        while start < videos.len() {
            let end = cmp::min(start + STATS_BATCH, videos.len());
            let chunk = &mut videos[start..end];
            let ids = chunk
                .iter()
                .map(|video| video.video_id.as_str())
                .collect::<Vec<_>>()
                .join(",");

            let response: VideoListResponse = self
                .agent
                .get(&format!("{}/videos", self.api_base))
                .query("part", "statistics,contentDetails")
                .query("id", &ids)
                .set("Authorization", &self.bearer())
                .call()
                .context("requesting video statistics")?
                .into_json()
                .context("parsing video statistics response")?;

            let by_id: HashMap<String, VideoResource> = response
                .items
                .into_iter()
                .map(|resource| (resource.id.clone(), resource))
                .collect();
            apply_statistics(chunk, &by_id);

            start = end;
        }
        Ok(())
    }

    pub fn delete_video(&self, video_id: &str) -> Result<(), TransferError> {
        self.agent
            .delete(&format!("{}/videos", self.api_base))
            .query("id", video_id)
            .set("Authorization", &self.bearer())
            .call()
            .map(|_| ())
            .map_err(|err| TransferError::Delete(format!("deleting {video_id}: {err}")))
    }

    fn upload_video(
        &self,
        request: &UploadRequest<'_>,
        progress: &mut dyn FnMut(f64),
    ) -> Result<String, TransferError> {
        let file_size = fs::metadata(request.file)
            .map_err(|err| {
                TransferError::Upload(format!("stat {}: {err}", request.file.display()))
            })?
            .len();
        if file_size == 0 {
            return Err(TransferError::Upload(format!(
                "{} is empty",
                request.file.display()
            )));
        }

        let mime = MimeGuess::from_path(request.file)
            .first_or_octet_stream()
            .to_string();
        let session_uri = self.initiate_resumable_session(request, &mime, file_size)?;
        self.send_chunks(&session_uri, request.file, &mime, file_size, progress)
    }

    fn initiate_resumable_session(
        &self,
        request: &UploadRequest<'_>,
        mime: &str,
        file_size: u64,
    ) -> Result<String, TransferError> {
        let response = self
            .agent
            .post(&format!(
                "{}/videos?uploadType=resumable&part=snippet,status",
                self.upload_base
            ))
            .set("Authorization", &self.bearer())
            .set("X-Upload-Content-Type", mime)
            .set("X-Upload-Content-Length", &file_size.to_string())
            .send_json(upload_metadata(request))
            .map_err(|err| {
                TransferError::Upload(format!("initiating resumable session: {err}"))
            })?;

        response
            .header("Location")
            .map(str::to_owned)
            .ok_or_else(|| {
                TransferError::Upload(
                    "no Location header in resumable session response".to_string(),
                )
            })
    }

    fn send_chunks(
        &self,
        session_uri: &str,
        path: &Path,
        mime: &str,
        file_size: u64,
        progress: &mut dyn FnMut(f64),
    ) -> Result<String, TransferError> {
        let mut file = File::open(path)
            .map_err(|err| TransferError::Upload(format!("opening {}: {err}", path.display())))?;
        let mut buffer = vec![0u8; UPLOAD_CHUNK_SIZE];
        let mut sent: u64 = 0;

        loop {
            let want = cmp::min(UPLOAD_CHUNK_SIZE as u64, file_size - sent) as usize;
            file.read_exact(&mut buffer[..want]).map_err(|err| {
                TransferError::Upload(format!("reading {}: {err}", path.display()))
            })?;
            let end = sent + want as u64;

            let response = self
                .agent
                .put(session_uri)
                .set("Authorization", &self.bearer())
                .set("Content-Type", mime)
                .set(
                    "Content-Range",
                    &format!("bytes {}-{}/{}", sent, end - 1, file_size),
                )
                .send_bytes(&buffer[..want]);
            sent = end;

            match response {
                Ok(response) => {
                    progress(1.0);
                    let uploaded: UploadedResource = response.into_json().map_err(|err| {
                        TransferError::Upload(format!("parsing upload response: {err}"))
                    })?;
                    return Ok(uploaded.id);
                }
                // 308 Resume Incomplete: the server took the chunk and wants
                // the next byte range.
                Err(ureq::Error::Status(308, _)) => {
                    if sent >= file_size {
                        return Err(TransferError::Upload(
                            "server did not acknowledge the final chunk".to_string(),
                        ));
                    }
                    progress(sent as f64 / file_size as f64);
                }
                Err(err) => {
                    return Err(TransferError::Upload(format!(
                        "uploading bytes {}..{} of {}: {err}",
                        end - want as u64,
                        end,
                        file_size
                    )));
                }
            }
        }
    }
}

impl PushDestination for PlatformClient {
    fn push(
        &self,
        request: &UploadRequest<'_>,
        progress: &mut dyn FnMut(f64),
    ) -> Result<String, TransferError> {
        self.upload_video(request, progress)
    }
}

impl DeleteSource for PlatformClient {
    fn delete(&self, video_id: &str) -> Result<(), TransferError> {
        self.delete_video(video_id)
    }
}

/// Canonical short-form playback URL for a video id.
pub fn playback_url(video_id: &str) -> String {
    format!("https://youtu.be/{video_id}")
}

fn upload_metadata(request: &UploadRequest<'_>) -> serde_json::Value {
    json!({
        "snippet": {
            "title": request.title,
            "description": request.description,
            "tags": request.tags,
        },
        "status": {
            "privacyStatus": request.visibility,
        },
    })
}

fn playlist_item_to_video(item: PlaylistItem) -> VideoItem {
    VideoItem {
        video_id: item.content_details.video_id,
        title: item.snippet.title.unwrap_or_default(),
        description: item.snippet.description.unwrap_or_default(),
        published_at: item.snippet.published_at,
        views: 0,
        duration: String::new(),
    }
}

/// Merges the statistics batch into the listed items. Videos the statistics
/// call did not return (deleted mid-listing, stats hidden) keep zero views
/// and an empty duration, mirroring how the listing treats missing metadata.
fn apply_statistics(videos: &mut [VideoItem], by_id: &HashMap<String, VideoResource>) {
    for video in videos {
        let Some(resource) = by_id.get(&video.video_id) else {
            continue;
        };
        video.views = resource
            .statistics
            .as_ref()
            .and_then(|stats| stats.view_count.as_deref())
            .and_then(|count| count.parse::<i64>().ok())
            .unwrap_or(0);
        video.duration = resource
            .content_details
            .as_ref()
            .and_then(|details| details.duration.clone())
            .unwrap_or_default();
    }
}

// Wire shapes. Only the fields the tool reads are modeled; everything else in
// the responses is ignored.

#[derive(Deserialize)]
struct ChannelListResponse {
    #[serde(default)]
    items: Vec<ChannelResource>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelResource {
    content_details: ChannelContentDetails,
    snippet: ChannelSnippet,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelContentDetails {
    related_playlists: RelatedPlaylists,
}

#[derive(Deserialize)]
struct RelatedPlaylists {
    uploads: String,
}

#[derive(Deserialize)]
struct ChannelSnippet {
    #[serde(default)]
    title: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItemsResponse {
    #[serde(default)]
    items: Vec<PlaylistItem>,
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItem {
    snippet: PlaylistItemSnippet,
    content_details: PlaylistItemContentDetails,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItemSnippet {
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    published_at: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItemContentDetails {
    video_id: String,
}

#[derive(Deserialize)]
struct VideoListResponse {
    #[serde(default)]
    items: Vec<VideoResource>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoResource {
    id: String,
    statistics: Option<VideoStatistics>,
    content_details: Option<VideoContentDetails>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoStatistics {
    view_count: Option<String>,
}

#[derive(Deserialize)]
struct VideoContentDetails {
    duration: Option<String>,
}

#[derive(Deserialize)]
struct UploadedResource {
    id: String,
}
