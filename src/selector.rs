#![forbid(unsafe_code)]

//! Selection strategies: which inventory indices to transfer.
//!
//! Both strategies produce the same thing, an ordered list of indices into
//! the current inventory snapshot. Manual selection converts checkbox-style
//! booleans; assisted selection asks a text-completion collaborator to rank
//! a compact view of the inventory against a free-text instruction.
//!
//! The assisted path is deliberately forgiving. Completion replies wrap the
//! answer in prose more often than not, so the parser takes the span from the
//! first `[` to the last `]`, and any failure at all degrades to "no
//! suggestions" rather than an error: a flaky ranking collaborator must never
//! break a transfer run.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::TransferError;
use crate::platform::VideoItem;

/// Ranking collaborator contract: free text in, free text out. The selector
/// owns all parsing of the reply.
pub trait Ranker {
    fn rank(&self, inventory_json: &str, instruction: &str) -> Result<String, TransferError>;
}

/// Manual strategy: checkbox booleans to indices.
pub fn checked_indices(selected: &[bool]) -> Vec<usize> {
    selected
        .iter()
        .enumerate()
        .filter_map(|(index, checked)| checked.then_some(index))
        .collect()
}

/// The per-item digest sent to the ranking collaborator. Keeping it small
/// matters: inventories run to hundreds of items and descriptions can be
/// kilobytes each.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CompactEntry<'a> {
    index: usize,
    video_id: &'a str,
    title: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    published_at: Option<&'a str>,
    views: i64,
}

/// Assisted strategy. Returns the suggested indices, or an empty list with a
/// warning on any failure along the way.
pub fn assisted_indices(
    videos: &[VideoItem],
    instruction: &str,
    ranker: &dyn Ranker,
) -> Vec<usize> {
    let compact: Vec<CompactEntry<'_>> = videos
        .iter()
        .enumerate()
        .map(|(index, video)| CompactEntry {
            index,
            video_id: &video.video_id,
            title: &video.title,
            published_at: video.published_at.as_deref(),
            views: video.views,
        })
        .collect();

    let inventory_json = match serde_json::to_string_pretty(&compact) {
        Ok(payload) => payload,
        Err(err) => {
            eprintln!("  Warning: could not serialize inventory for ranking: {err}");
            return Vec::new();
        }
    };

    match ranker.rank(&inventory_json, instruction) {
        Ok(reply) => {
            let indices = parse_index_reply(&reply, videos.len());
            if indices.is_empty() {
                eprintln!("  Warning: ranking reply contained no usable indices");
            }
            indices
        }
        Err(err) => {
            eprintln!("  Warning: ranking unavailable: {err}");
            Vec::new()
        }
    }
}

/// Extracts a JSON array of in-range integers from a free-text reply.
/// Non-integer elements and out-of-range indices are dropped individually;
/// a reply with no bracketed span, or one that is not valid JSON, yields an
/// empty list.
pub fn parse_index_reply(reply: &str, inventory_len: usize) -> Vec<usize> {
    let Some(start) = reply.find('[') else {
        return Vec::new();
    };
    let Some(end) = reply.rfind(']') else {
        return Vec::new();
    };
    if end < start {
        return Vec::new();
    }

    let Ok(value) = serde_json::from_str::<Value>(&reply[start..=end]) else {
        return Vec::new();
    };
    let Some(entries) = value.as_array() else {
        return Vec::new();
    };

    entries
        .iter()
        .filter_map(Value::as_u64)
        .map(|index| index as usize)
        .filter(|index| *index < inventory_len)
        .collect()
}

const SYSTEM_PROMPT: &str =
    "You are a helpful assistant that returns a JSON array of indices to select.";

/// Ranking collaborator backed by an OpenAI-style chat-completions endpoint.
pub struct HttpRanker {
    agent: ureq::Agent,
    api_url: String,
    api_key: String,
    model: String,
}

impl HttpRanker {
    pub fn new(api_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            agent: ureq::agent(),
            api_url: api_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: String,
}

impl Ranker for HttpRanker {
    fn rank(&self, inventory_json: &str, instruction: &str) -> Result<String, TransferError> {
        let user_message = format!(
            "Videos:\n{inventory_json}\n\nInstruction:\n{instruction}\n\nReturn only a JSON array of integers."
        );
        let body = json!({
            "model": self.model,
            "temperature": 0,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": user_message},
            ],
        });

        let response = self
            .agent
            .post(&self.api_url)
            .set("Authorization", &format!("Bearer {}", self.api_key))
            .send_json(body)
            .map_err(|err| TransferError::Ranking(format!("completion request: {err}")))?;

        let completion: CompletionResponse = response.into_json().map_err(|err| {
            TransferError::Ranking(format!("parsing completion response: {err}"))
        })?;

        completion
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.trim().to_string())
            .ok_or_else(|| {
                TransferError::Ranking("completion response contained no choices".to_string())
            })
    }
}
