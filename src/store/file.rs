use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use super::{SessionBackend, StoreError};
use crate::session::ActorId;

/// On-disk wrapper around an encoded session.
#[derive(Debug, Serialize, Deserialize)]
struct SessionFile {
    actor_id: ActorId,
    hostname: String,
    written_at: DateTime<Utc>,
    session: Value,
}

/// One JSON file per actor, replaced atomically through a temp file.
#[derive(Debug, Clone)]
pub struct FileBackend {
    directory: PathBuf,
}

impl FileBackend {
    pub async fn open(directory: impl AsRef<Path>) -> Result<Self, StoreError> {
        let directory = directory.as_ref().to_path_buf();
        fs::create_dir_all(&directory).await?;
        Ok(Self { directory })
    }

    fn path_for(&self, actor: &ActorId) -> PathBuf {
        self.directory.join(format!("{}.json", file_stem(actor)))
    }

    async fn read_file(&self, actor: &ActorId, path: &Path) -> Result<Option<Value>, StoreError> {
        let contents = match fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let file: SessionFile =
            serde_json::from_str(&contents).map_err(|e| StoreError::Corrupt {
                actor: actor.clone(),
                reason: e.to_string(),
            })?;
        Ok(Some(file.session))
    }
}

/// Filesystem-safe stem: ASCII alphanumerics, '-' and '_' pass through,
/// every other byte is written as `%XX`.
fn file_stem(actor: &ActorId) -> String {
    let mut stem = String::with_capacity(actor.as_str().len());
    for byte in actor.as_str().bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            stem.push(byte as char);
        } else {
            stem.push_str(&format!("%{byte:02X}"));
        }
    }
    stem
}

#[async_trait]
impl SessionBackend for FileBackend {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn load(&self, actor: &ActorId) -> Result<Option<Value>, StoreError> {
        self.read_file(actor, &self.path_for(actor)).await
    }

    async fn save(&self, actor: &ActorId, record: &Value) -> Result<(), StoreError> {
        let file = SessionFile {
            actor_id: actor.clone(),
            hostname: hostname::get()
                .unwrap_or_default()
                .to_string_lossy()
                .to_string(),
            written_at: Utc::now(),
            session: record.clone(),
        };

        let path = self.path_for(actor);
        let serialized = serde_json::to_string_pretty(&file)?;

        // Write to a temporary file first, then rename over the target
        let temp_file = format!("{}.{}.tmp", path.display(), rand::rng().random::<u32>());
        fs::write(&temp_file, serialized).await?;
        fs::rename(&temp_file, &path).await?;

        debug!(actor_id = %actor, file = ?path, "session written");
        Ok(())
    }

    async fn remove(&self, actor: &ActorId) -> Result<(), StoreError> {
        match fs::remove_file(self.path_for(actor)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Vec<(ActorId, Value)>, StoreError> {
        let mut records = Vec::new();
        let mut entries = fs::read_dir(&self.directory).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Ok(contents) = fs::read_to_string(&path).await else {
                continue;
            };
            match serde_json::from_str::<SessionFile>(&contents) {
                Ok(file) => records.push((file.actor_id, file.session)),
                Err(e) => debug!(file = ?path, error = %e, "skipping unreadable session file"),
            }
        }

        Ok(records)
    }
}
