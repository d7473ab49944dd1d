//! Append-only ledger journal.
//!
//! Records are framed as a little-endian `u32` length followed by the
//! bincode bytes. On open the whole file is replayed to rebuild state; a
//! torn trailing record from an interrupted append is skipped.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::warn;

#[derive(Error, Debug)]
pub enum JournalError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("encoding error: {0}")]
    Encoding(#[from] bincode::Error),
}

/// Append handle over the journal file.
pub struct Journal {
    file: File,
    path: PathBuf,
}

impl Journal {
    pub async fn open(path: &Path) -> Result<Self, JournalError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path).await?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record and flush it to the OS.
    pub async fn append<T: Serialize>(&mut self, record: &T) -> Result<(), JournalError> {
        let bytes = bincode::serialize(record)?;
        self.file.write_u32_le(bytes.len() as u32).await?;
        self.file.write_all(&bytes).await?;
        self.file.flush().await?;
        Ok(())
    }

    /// Flush and fsync; called on shutdown.
    pub async fn sync(&mut self) -> Result<(), JournalError> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        Ok(())
    }

    /// Read every record in the file, in append order. A missing file is
    /// an empty journal.
    pub async fn replay<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, JournalError> {
        let mut file = match File::open(path).await {
            Ok(file) => file,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(error.into()),
        };
        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer).await?;

        let mut records = Vec::new();
        let mut cursor = 0usize;
        while cursor + 4 <= buffer.len() {
            let mut len_bytes = [0u8; 4];
            len_bytes.copy_from_slice(&buffer[cursor..cursor + 4]);
            let len = u32::from_le_bytes(len_bytes) as usize;
            cursor += 4;
            if cursor + len > buffer.len() {
                warn!(path = %path.display(), "journal ends in a torn record, skipping it");
                break;
            }
            records.push(bincode::deserialize(&buffer[cursor..cursor + len])?);
            cursor += len;
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Record {
        n: u64,
        tag: String,
    }

    fn record(n: u64) -> Record {
        Record {
            n,
            tag: format!("record-{n}"),
        }
    }

    #[tokio::test]
    async fn append_then_replay_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.journal");

        let mut journal = Journal::open(&path).await.unwrap();
        for n in 0..10 {
            journal.append(&record(n)).await.unwrap();
        }
        journal.sync().await.unwrap();

        let records: Vec<Record> = Journal::replay(&path).await.unwrap();
        assert_eq!(records.len(), 10);
        assert_eq!(records[0], record(0));
        assert_eq!(records[9], record(9));
    }

    #[tokio::test]
    async fn missing_file_is_an_empty_journal() {
        let dir = tempfile::tempdir().unwrap();
        let records: Vec<Record> = Journal::replay(&dir.path().join("absent")).await.unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn torn_trailing_record_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.journal");

        let mut journal = Journal::open(&path).await.unwrap();
        journal.append(&record(1)).await.unwrap();
        journal.sync().await.unwrap();

        // simulate a crash mid-append: a length prefix with half a body
        let mut raw = std::fs::read(&path).unwrap();
        raw.extend_from_slice(&100u32.to_le_bytes());
        raw.extend_from_slice(&[1, 2, 3]);
        std::fs::write(&path, raw).unwrap();

        let records: Vec<Record> = Journal::replay(&path).await.unwrap();
        assert_eq!(records, vec![record(1)]);
    }

    #[tokio::test]
    async fn reopening_appends_after_existing_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.journal");

        let mut journal = Journal::open(&path).await.unwrap();
        journal.append(&record(1)).await.unwrap();
        journal.sync().await.unwrap();
        drop(journal);

        let mut journal = Journal::open(&path).await.unwrap();
        journal.append(&record(2)).await.unwrap();
        journal.sync().await.unwrap();

        let records: Vec<Record> = Journal::replay(&path).await.unwrap();
        assert_eq!(records, vec![record(1), record(2)]);
    }
}
