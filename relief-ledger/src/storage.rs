//! Backing stores for the payment event log
//!
//! The event log keeps its working set in memory and writes every entry to a
//! [`PaymentStore`] before publishing it. Stores only ever append; `load` is
//! used once at open to replay history.
//!
//! # Backends
//!
//! - [`MemoryStore`] - process memory, shareable across reopen in tests
//! - [`JsonLinesStore`] - one JSON document per line, human-auditable
//! - `RocksStore` - RocksDB, key = sequence (big-endian), value = bincode
//!   (behind the `rocksdb` feature)

use crate::{
    config::{StorageBackend, StorageConfig},
    error::{Error, Result},
    types::Payment,
};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Append-only persistence for payments
pub trait PaymentStore: Send + Sync + std::fmt::Debug {
    /// Persist one entry. Must not return before the entry is written, and
    /// must leave nothing of it behind when it returns an error.
    fn append(&self, payment: &Payment) -> Result<()>;

    /// All persisted entries in sequence order
    fn load(&self) -> Result<Vec<Payment>>;

    /// Flush buffered state (called on shutdown)
    fn flush(&self) -> Result<()>;
}

/// Open the store selected by configuration
pub fn open_store(config: &StorageConfig) -> Result<Arc<dyn PaymentStore>> {
    match config.backend {
        StorageBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        StorageBackend::JsonLines => Ok(Arc::new(JsonLinesStore::open(
            &config.path,
            config.sync_writes,
        )?)),
        #[cfg(feature = "rocksdb")]
        StorageBackend::Rocksdb => Ok(Arc::new(RocksStore::open(&config.path)?)),
        #[cfg(not(feature = "rocksdb"))]
        StorageBackend::Rocksdb => Err(Error::Config(
            "rocksdb backend requires the `rocksdb` feature".to_string(),
        )),
    }
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryStore {
    payments: Mutex<Vec<Payment>>,
}

impl MemoryStore {
    /// Create empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.payments.lock().len()
    }

    /// Whether nothing has been stored
    pub fn is_empty(&self) -> bool {
        self.payments.lock().is_empty()
    }
}

impl PaymentStore for MemoryStore {
    fn append(&self, payment: &Payment) -> Result<()> {
        self.payments.lock().push(payment.clone());
        Ok(())
    }

    fn load(&self) -> Result<Vec<Payment>> {
        Ok(self.payments.lock().clone())
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// JSON-lines file store
#[derive(Debug)]
pub struct JsonLinesStore {
    path: PathBuf,
    file: Mutex<File>,
    sync_writes: bool,
}

impl JsonLinesStore {
    /// Open or create the file at `path`
    pub fn open(path: impl AsRef<Path>, sync_writes: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        drop_partial_tail(&path, &file)?;

        tracing::info!(path = %path.display(), sync_writes, "Opened JSON-lines payment store");

        Ok(Self {
            path,
            file: Mutex::new(file),
            sync_writes,
        })
    }
}

/// Cut an unterminated last line left behind by an interrupted append
fn drop_partial_tail(path: &Path, file: &File) -> Result<()> {
    let contents = std::fs::read(path)?;
    if contents.last().map_or(true, |byte| *byte == b'\n') {
        return Ok(());
    }

    let keep = contents
        .iter()
        .rposition(|byte| *byte == b'\n')
        .map_or(0, |newline| newline + 1);
    file.set_len(keep as u64)?;

    tracing::warn!(
        path = %path.display(),
        dropped_bytes = contents.len() - keep,
        "Dropped partial entry at end of payment store"
    );
    Ok(())
}

fn write_line(file: &mut File, line: &[u8], sync: bool) -> std::io::Result<()> {
    file.write_all(line)?;
    file.flush()?;
    if sync {
        file.sync_data()?;
    }
    Ok(())
}

impl PaymentStore for JsonLinesStore {
    fn append(&self, payment: &Payment) -> Result<()> {
        let mut line = serde_json::to_vec(payment)?;
        line.push(b'\n');

        let mut file = self.file.lock();
        let start = file.metadata()?.len();

        // A failed write must not leave bytes the next append would follow
        if let Err(err) = write_line(&mut file, &line, self.sync_writes) {
            if let Err(truncate_err) = file.set_len(start) {
                tracing::error!(
                    path = %self.path.display(),
                    error = %truncate_err,
                    "Failed to truncate partial payment entry"
                );
            }
            return Err(err.into());
        }

        tracing::debug!(
            sequence = payment.sequence,
            payment_id = %payment.payment_id,
            "Payment persisted"
        );

        Ok(())
    }

    fn load(&self) -> Result<Vec<Payment>> {
        let reader = BufReader::new(File::open(&self.path)?);
        let mut payments = Vec::new();

        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let payment: Payment = serde_json::from_str(&line).map_err(|e| {
                Error::Storage(format!(
                    "{}:{}: corrupt entry: {}",
                    self.path.display(),
                    index + 1,
                    e
                ))
            })?;
            payments.push(payment);
        }

        Ok(payments)
    }

    fn flush(&self) -> Result<()> {
        self.file.lock().sync_all()?;
        Ok(())
    }
}

/// RocksDB store
#[cfg(feature = "rocksdb")]
pub struct RocksStore {
    db: rocksdb::DB,
}

#[cfg(feature = "rocksdb")]
impl std::fmt::Debug for RocksStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RocksStore")
            .field("path", &self.db.path())
            .finish()
    }
}

#[cfg(feature = "rocksdb")]
impl RocksStore {
    /// Open or create database
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;

        let mut opts = rocksdb::Options::default();
        opts.create_if_missing(true);
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);

        let db = rocksdb::DB::open(&opts, path)?;
        tracing::info!("Opened RocksDB payment store at {:?}", path);

        Ok(Self { db })
    }
}

#[cfg(feature = "rocksdb")]
impl PaymentStore for RocksStore {
    fn append(&self, payment: &Payment) -> Result<()> {
        let key = payment.sequence.to_be_bytes();
        let value = bincode::serialize(payment)?;
        self.db.put(key, value)?;
        Ok(())
    }

    fn load(&self) -> Result<Vec<Payment>> {
        let mut payments = Vec::new();
        for item in self.db.iterator(rocksdb::IteratorMode::Start) {
            let (_, value) = item?;
            payments.push(bincode::deserialize(&value)?);
        }
        Ok(payments)
    }

    fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}
