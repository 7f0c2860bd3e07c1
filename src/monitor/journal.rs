//! Append-only dedup journal
//!
//! One JSON-encoded [`EventKey`] per line. Loaded at startup so events
//! delivered by a previous run are not delivered again.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

use crate::types::EventKey;

pub struct DedupJournal {
    path: PathBuf,
    file: Mutex<File>,
}

impl DedupJournal {
    /// Opens (creating if needed) the journal and returns the keys it holds.
    ///
    /// Lines that do not parse, such as a line cut short by a crash, are
    /// skipped.
    pub async fn open(path: impl AsRef<Path>) -> Result<(Self, HashSet<EventKey>)> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create journal directory {}", parent.display()))?;
        }

        let mut keys = HashSet::new();
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                for (line_no, line) in content.lines().enumerate() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<EventKey>(line) {
                        Ok(key) => {
                            keys.insert(key);
                        }
                        Err(e) => warn!(
                            "Skipping unreadable journal line {} in {}: {}",
                            line_no + 1,
                            path.display(),
                            e
                        ),
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read journal {}", path.display()));
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("Failed to open journal {}", path.display()))?;

        Ok((
            Self {
                path,
                file: Mutex::new(file),
            },
            keys,
        ))
    }

    /// Appends one key and flushes it to disk.
    pub async fn append(&self, key: &EventKey) -> Result<()> {
        let mut line = serde_json::to_string(key).context("Failed to encode journal entry")?;
        line.push('\n');
        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes())
            .await
            .with_context(|| format!("Failed to append to journal {}", self.path.display()))?;
        file.flush().await?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
