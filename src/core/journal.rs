//! Append-only attempt journal with file-based persistence.
//!
//! Each attempt gets one newline-delimited JSON (JSONL) file named after its
//! id. The journal is write-only from the orchestrator's point of view; it
//! exists for inspection (`berth history`).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use uuid::Uuid;

use crate::domain::{Attempt, ProvisionEvent};

const JOURNAL_EXTENSION: &str = "jsonl";

/// JSONL journal for one provisioning attempt
#[derive(Debug, Clone)]
pub struct AttemptJournal {
    attempt_id: Uuid,
    path: PathBuf,
}

impl AttemptJournal {
    /// Locate an attempt's journal under the configured attempts directory,
    /// for reading. Nothing is created on disk.
    pub fn locate(attempt_id: Uuid) -> Result<Self> {
        Ok(Self::at(&Self::base_directory()?, attempt_id))
    }

    /// Journal handle for an attempt under `base_dir`, without touching disk
    pub fn at(base_dir: &Path, attempt_id: Uuid) -> Self {
        Self {
            attempt_id,
            path: base_dir.join(format!("{}.{}", attempt_id, JOURNAL_EXTENSION)),
        }
    }

    /// Open the journal for an attempt under `base_dir`, creating the
    /// directory for writing
    pub async fn open_in(base_dir: &Path, attempt_id: Uuid) -> Result<Self> {
        fs::create_dir_all(base_dir)
            .await
            .with_context(|| format!("Failed to create journal directory: {}", base_dir.display()))?;

        Ok(Self::at(base_dir, attempt_id))
    }

    /// Base directory for all journals (~/.berth/attempts or $BERTH_HOME/attempts)
    pub fn base_directory() -> Result<PathBuf> {
        crate::config::attempts_dir()
    }

    pub fn attempt_id(&self) -> Uuid {
        self.attempt_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append an event to the journal
    pub async fn append(&self, event: &ProvisionEvent) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open journal: {}", self.path.display()))?;

        let json = serde_json::to_string(event).context("Failed to serialize event")?;
        file.write_all(format!("{}\n", json).as_bytes())
            .await
            .context("Failed to write event")?;
        file.flush().await.context("Failed to flush event")?;

        Ok(())
    }

    /// Replay all events in order
    pub async fn replay(&self) -> Result<Vec<ProvisionEvent>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.path)
            .await
            .with_context(|| format!("Failed to open journal: {}", self.path.display()))?;

        let mut lines = BufReader::new(file).lines();
        let mut events = Vec::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let event: ProvisionEvent = serde_json::from_str(&line)
                .with_context(|| format!("Failed to parse event: {}", line))?;
            events.push(event);
        }

        Ok(events)
    }

    /// Reconstruct the attempt recorded in this journal
    pub async fn load_attempt(&self) -> Result<Option<Attempt>> {
        let events = self.replay().await?;
        Ok(Attempt::from_events(&events))
    }

    /// List every attempt id journaled under `base_dir`
    pub async fn list_attempts(base_dir: &Path) -> Result<Vec<Uuid>> {
        if !base_dir.exists() {
            return Ok(Vec::new());
        }

        let mut attempts = Vec::new();
        let mut entries = fs::read_dir(base_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(JOURNAL_EXTENSION) {
                continue;
            }
            if let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| Uuid::parse_str(s).ok())
            {
                attempts.push(id);
            }
        }

        Ok(attempts)
    }
}
