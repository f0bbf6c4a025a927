use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::info;

use crate::error::GeminiRelayError;
use crate::history::Message;
use crate::Result;

/// The persisted shape: one record per user id, overwritten wholesale on
/// every save. `message_count` always equals `history.len()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptRecord {
    pub user_id: String,
    pub history: Vec<Message>,
    pub last_updated: DateTime<Utc>,
    pub message_count: usize,
}

/// File-per-user transcript storage. No locking: concurrent saves for the
/// same user id are last-writer-wins, which is accepted for the
/// one-browser-tab usage this backend serves.
pub struct TranscriptStore {
    dir: PathBuf,
}

impl TranscriptStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| {
            GeminiRelayError::Storage(format!("could not create transcript dir: {e}"))
        })?;
        Ok(Self { dir })
    }

    fn path_for(&self, user_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", encode_user_id(user_id)))
    }

    /// Overwrite the full record for `user_id`, stamping `lastUpdated` and
    /// `messageCount`.
    pub fn save(&self, user_id: &str, history: Vec<Message>) -> Result<TranscriptRecord> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(GeminiRelayError::Validation("userId is required".to_string()));
        }

        let record = TranscriptRecord {
            user_id: user_id.to_string(),
            message_count: history.len(),
            history,
            last_updated: Utc::now(),
        };
        let rendered = serde_json::to_string_pretty(&record)
            .map_err(|e| GeminiRelayError::Storage(e.to_string()))?;
        fs::write(self.path_for(user_id), rendered)
            .map_err(|e| GeminiRelayError::Storage(format!("could not write transcript: {e}")))?;

        info!(
            user_id = %record.user_id,
            message_count = record.message_count,
            "transcript saved"
        );
        Ok(record)
    }

    /// Load the record for `user_id`. A missing file is the normal state for
    /// a first-time user and yields `Ok(None)`; an unreadable or corrupt
    /// file is a storage error.
    pub fn load(&self, user_id: &str) -> Result<Option<TranscriptRecord>> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(GeminiRelayError::Validation("userId is required".to_string()));
        }

        let path = self.path_for(user_id);
        if !path.exists() {
            return Ok(None);
        }

        let raw = fs::read_to_string(&path)
            .map_err(|e| GeminiRelayError::Storage(format!("could not read transcript: {e}")))?;
        let record: TranscriptRecord = serde_json::from_str(&raw).map_err(|e| {
            GeminiRelayError::Storage(format!("corrupt transcript for {user_id}: {e}"))
        })?;
        if record.message_count != record.history.len() {
            return Err(GeminiRelayError::Storage(format!(
                "corrupt transcript for {user_id}: messageCount {} does not match history length {}",
                record.message_count,
                record.history.len()
            )));
        }
        Ok(Some(record))
    }
}

/// Encode a user id into a safe file-name stem. Alphanumerics and `-_.`
/// pass through; every other byte is hex-escaped so arbitrary ids cannot
/// escape the transcript directory.
fn encode_user_id(user_id: &str) -> String {
    let mut out = String::with_capacity(user_id.len());
    for byte in user_id.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' | b'.' => {
                out.push(byte as char)
            }
            other => out.push_str(&format!("%{other:02x}")),
        }
    }
    out
}
