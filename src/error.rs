#![forbid(unsafe_code)]

//! Error taxonomy shared by the transfer library.
//!
//! Item-level failures (`Download`, `Upload`) are caught at the item boundary
//! and recorded in the transfer log; `Persistence` is the one kind the batch
//! loop lets escape, because losing the log risks duplicate transfers.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("download failed: {0}")]
    Download(String),

    #[error("upload failed: {0}")]
    Upload(String),

    #[error("delete failed: {0}")]
    Delete(String),

    #[error("ranking failed: {0}")]
    Ranking(String),

    #[error("transfer log failure: {0}")]
    Persistence(String),

    #[error("authentication failed: {0}")]
    Authentication(String),
}

impl TransferError {
    /// The collaborator's own diagnostic, without the taxonomy prefix. This is
    /// what gets stored in failure records so a re-run shows the original
    /// message rather than a doubly wrapped one.
    pub fn diagnostic(self) -> String {
        match self {
            TransferError::Download(msg)
            | TransferError::Upload(msg)
            | TransferError::Delete(msg)
            | TransferError::Ranking(msg)
            | TransferError::Persistence(msg)
            | TransferError::Authentication(msg) => msg,
        }
    }
}
