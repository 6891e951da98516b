//! JSON-lines file backend for [`EventLedger`].
//!
//! Layout: one JSON object per line in `<data_dir>/<file_name>`. Offsets are
//! byte positions; a read only consumes complete newline-terminated lines, so
//! a record that is still being written is picked up by the next read.

use std::future::Future;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::LedgerError;
use crate::event::Event;
use crate::storage_traits::{EventLedger, LedgerOffset, LedgerResult, ReadBatch};

/// Default ledger file name inside the data directory.
pub const DEFAULT_LEDGER_FILE: &str = "ledger.jsonl";

/// Default bound for a single ledger I/O operation.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(5);

/// File-backed append-only ledger.
///
/// Appends within one process are serialized through an async mutex, so a
/// single `JsonlLedger` (shared via `Arc`) is the single governed writer.
#[derive(Debug)]
pub struct JsonlLedger {
    path: PathBuf,
    io_timeout: Duration,
    writer: Mutex<()>,
}

impl JsonlLedger {
    /// Open (or prepare to create) the ledger at `data_dir/file_name`.
    ///
    /// Creates `data_dir` if needed. The file itself is created on first
    /// append.
    pub async fn open(
        data_dir: impl AsRef<Path>,
        file_name: &str,
        io_timeout: Duration,
    ) -> LedgerResult<Self> {
        let data_dir = data_dir.as_ref();
        fs::create_dir_all(data_dir)
            .await
            .map_err(|e| LedgerError::Unavailable {
                path: data_dir.to_path_buf(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            path: data_dir.join(file_name),
            io_timeout,
            writer: Mutex::new(()),
        })
    }

    /// Open with the default file name and timeout.
    pub async fn open_default(data_dir: impl AsRef<Path>) -> LedgerResult<Self> {
        Self::open(data_dir, DEFAULT_LEDGER_FILE, DEFAULT_IO_TIMEOUT).await
    }

    /// Path of the ledger file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy the ledger to `dest` for archival. The ledger itself is untouched.
    ///
    /// Returns the number of bytes copied.
    pub async fn export_to(&self, dest: impl AsRef<Path>) -> LedgerResult<u64> {
        let dest = dest.as_ref().to_path_buf();
        // Hold the writer lock so the copy never contains a torn record.
        let _guard = self.writer.lock().await;
        self.bounded("export", async {
            match fs::metadata(&self.path).await {
                Ok(_) => Ok(fs::copy(&self.path, &dest).await?),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    fs::write(&dest, b"").await?;
                    Ok(0)
                }
                Err(e) => Err(self.unavailable(e)),
            }
        })
        .await
    }

    fn unavailable(&self, err: std::io::Error) -> LedgerError {
        LedgerError::Unavailable {
            path: self.path.clone(),
            reason: err.to_string(),
        }
    }

    async fn bounded<T, F>(&self, operation: &'static str, fut: F) -> LedgerResult<T>
    where
        F: Future<Output = LedgerResult<T>>,
    {
        tokio::time::timeout(self.io_timeout, fut)
            .await
            .map_err(|_| LedgerError::Timeout {
                operation,
                elapsed: self.io_timeout,
            })?
    }

    /// Terminate a torn trailing record left behind by an interrupted write,
    /// so the next record starts on its own line.
    async fn repair_tail(&self) -> LedgerResult<()> {
        let mut file = match File::open(&self.path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(self.unavailable(e)),
        };
        let len = file.metadata().await.map_err(|e| self.unavailable(e))?.len();
        if len == 0 {
            return Ok(());
        }
        file.seek(SeekFrom::Start(len - 1))
            .await
            .map_err(|e| self.unavailable(e))?;
        let mut last = [0u8; 1];
        file.read_exact(&mut last)
            .await
            .map_err(|e| self.unavailable(e))?;
        if last[0] != b'\n' {
            warn!(path = %self.path.display(), "terminating torn trailing ledger record");
            let mut out = OpenOptions::new()
                .append(true)
                .open(&self.path)
                .await
                .map_err(|e| self.unavailable(e))?;
            out.write_all(b"\n").await.map_err(|e| self.unavailable(e))?;
        }
        Ok(())
    }
}

#[async_trait]
impl EventLedger for JsonlLedger {
    async fn append(&self, event: &Event) -> LedgerResult<()> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');

        // Only the wait for the writer and the open are bounded. Once bytes
        // start going out the write runs to completion, so a timeout always
        // means nothing was written and the caller may retry.
        let (_guard, mut file) = self
            .bounded("append", async {
                let guard = self.writer.lock().await;
                self.repair_tail().await?;
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&self.path)
                    .await
                    .map_err(|e| self.unavailable(e))?;
                Ok((guard, file))
            })
            .await?;
        file.write_all(&line).await.map_err(|e| self.unavailable(e))?;
        file.sync_data().await.map_err(|e| self.unavailable(e))?;

        debug!(event_type = %event.event_type, bytes = line.len(), "ledger append");
        Ok(())
    }

    async fn read_from(&self, offset: LedgerOffset) -> LedgerResult<ReadBatch> {
        self.bounded("read", async {
            let mut file = match File::open(&self.path).await {
                Ok(f) => f,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    if offset.0 > 0 {
                        return Err(LedgerError::OffsetOutOfRange {
                            offset: offset.0,
                            len: 0,
                        });
                    }
                    return Ok(ReadBatch {
                        events: Vec::new(),
                        next_offset: offset,
                    });
                }
                Err(e) => return Err(self.unavailable(e)),
            };

            let len = file.metadata().await?.len();
            if offset.0 > len {
                return Err(LedgerError::OffsetOutOfRange {
                    offset: offset.0,
                    len,
                });
            }

            file.seek(SeekFrom::Start(offset.0)).await?;
            let mut buf = Vec::new();
            file.read_to_end(&mut buf).await?;

            let consumed = buf
                .iter()
                .rposition(|b| *b == b'\n')
                .map(|i| i + 1)
                .unwrap_or(0);

            let mut events = Vec::new();
            let mut line_offset = offset.0;
            for raw in buf[..consumed].split_inclusive(|b| *b == b'\n') {
                let line = raw[..raw.len() - 1].trim_ascii();
                if !line.is_empty() {
                    match serde_json::from_slice::<Event>(line) {
                        Ok(event) => events.push(event),
                        Err(e) => warn!(
                            path = %self.path.display(),
                            offset = line_offset,
                            error = %e,
                            "skipping malformed ledger line"
                        ),
                    }
                }
                line_offset += raw.len() as u64;
            }

            Ok(ReadBatch {
                events,
                next_offset: LedgerOffset(offset.0 + consumed as u64),
            })
        })
        .await
    }
}
