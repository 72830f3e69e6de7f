//! Ordered byte-key/byte-value map backing one time-series store.
//!
//! One redb database with a single table holds the entire key schema
//! (metadata singletons, metric mappings, tag bitmaps, fragment blobs).
//! Regular `put`s commit without fsync; `sync` issues a durable commit
//! that carries everything committed before it onto disk.

use std::path::Path;

use redb::{Database, Durability, ReadableDatabase, TableDefinition};
use tracing::warn;

use crate::model::{OpenMode, StoreError};

const TABLE: TableDefinition<'static, &'static [u8], &'static [u8]> = TableDefinition::new("strata");

const DEFAULT_CACHE_SIZE_MB: usize = 50;

pub struct KvMap {
    db: Database,
    writable: bool,
}

impl KvMap {
    pub fn open(path: impl AsRef<Path>, mode: OpenMode) -> Result<Self, StoreError> {
        let builder = {
            let mut b = Database::builder();
            b.set_repair_callback(|x| {
                warn!(progress = x.progress() * 100f64, "kv store is repairing")
            });
            b.set_cache_size(1024 * 1024 * DEFAULT_CACHE_SIZE_MB);
            b
        };

        let db = match mode {
            OpenMode::Create => builder.create(path)?,
            OpenMode::Append | OpenMode::ReadOnly => builder.open(path)?,
        };

        let out = Self {
            db,
            writable: mode.is_writable(),
        };

        if out.writable {
            out.initialize()?;
        }

        Ok(out)
    }

    /// Volatile store for tests.
    pub fn memory() -> Result<Self, StoreError> {
        let db = Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;

        let out = Self { db, writable: true };
        out.initialize()?;

        Ok(out)
    }

    fn initialize(&self) -> Result<(), StoreError> {
        let wx = self.db.begin_write()?;
        let _ = wx.open_table(TABLE)?;
        wx.commit()?;

        Ok(())
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let rx = self.db.begin_read()?;

        let table = match rx.open_table(TABLE) {
            Ok(table) => table,
            // a store opened read-only before any writer initialized it
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let value = table.get(key)?.map(|v| v.value().to_vec());

        Ok(value)
    }

    pub fn exists(&self, key: &[u8]) -> Result<bool, StoreError> {
        Ok(self.get(key)?.is_some())
    }

    /// Buffered write: the record is committed but not fsynced until the
    /// next [`KvMap::sync`].
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        if !self.writable {
            return Err(StoreError::ReadOnly);
        }

        let mut wx = self.db.begin_write()?;
        wx.set_durability(Durability::None).map_err(StoreError::io)?;

        {
            let mut table = wx.open_table(TABLE)?;
            table.insert(key, value)?;
        }

        wx.commit()?;

        Ok(())
    }

    /// Force disk durability of everything committed so far.
    pub fn sync(&self) -> Result<(), StoreError> {
        if !self.writable {
            return Ok(());
        }

        let mut wx = self.db.begin_write()?;
        wx.set_durability(Durability::Immediate)
            .map_err(StoreError::io)?;
        wx.commit()?;

        Ok(())
    }
}
