use std::path::Path;

use rocksdb::{DB, IteratorMode, Options};

use crate::error::TarKvError;

/// Ordered, durable byte-key/byte-value store.
///
/// `put` and `get` must be safe to call concurrently from multiple worker
/// threads sharing one handle; the ingest and extract engines rely on that.
pub trait KeyValueStore: Send + Sync {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), TarKvError>;

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, TarKvError>;

    /// All keys in byte order.
    fn keys(&self) -> Result<Vec<Vec<u8>>, TarKvError>;
}

/// RocksDB-backed store.
///
/// RocksDB supports concurrent reads and writes against a shared `DB`
/// handle (`put`/`get` take `&self` and `DB` is `Sync`), so one instance is
/// shared across a worker pool without extra locking. Dropping the store
/// releases it.
pub struct RocksStore {
    db: DB,
}

impl RocksStore {
    /// Creates the store at `path` if absent, otherwise opens it for
    /// writing. A path holding anything other than a RocksDB fails.
    pub fn open_for_write(path: impl AsRef<Path>) -> Result<Self, TarKvError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, path).map_err(|err| TarKvError::StorageOpen(err.to_string()))?;
        Ok(Self { db })
    }

    /// Opens an existing store read-only; fails if none exists at `path`.
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self, TarKvError> {
        let opts = Options::default();
        let db = DB::open_for_read_only(&opts, path, false)
            .map_err(|err| TarKvError::StorageOpen(err.to_string()))?;
        Ok(Self { db })
    }
}

impl KeyValueStore for RocksStore {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), TarKvError> {
        self.db
            .put(key, value)
            .map_err(|err| TarKvError::StorageWrite(err.to_string()))
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, TarKvError> {
        self.db
            .get(key)
            .map_err(|err| TarKvError::StorageRead(err.to_string()))
    }

    fn keys(&self) -> Result<Vec<Vec<u8>>, TarKvError> {
        let mut keys = Vec::new();
        for item in self.db.iterator(IteratorMode::Start) {
            let (key, _) = item.map_err(|err| TarKvError::StorageRead(err.to_string()))?;
            keys.push(key.into_vec());
        }
        Ok(keys)
    }
}
