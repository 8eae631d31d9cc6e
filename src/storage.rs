use std::convert::TryInto;
use std::path::Path;
use std::sync::Arc;

use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, IteratorMode, MultiThreaded,
    Options,
};

use crate::errors::{ChainError, ChainResult};
use crate::state::StateLayer;
use crate::types::{Block, Receipt};

pub const STORAGE_SCHEMA_VERSION: u32 = 1;

const CF_BLOCKS: &str = "blocks";
const CF_HEADERS: &str = "headers";
const CF_RECEIPTS: &str = "receipts";
const CF_STATE: &str = "state";
const CF_METADATA: &str = "metadata";
const TIP_HEIGHT_KEY: &[u8] = b"tip_height";
const TIP_HASH_KEY: &[u8] = b"tip_hash";
const SCHEMA_VERSION_KEY: &[u8] = b"schema_version";

/// Disk persistence for blocks, receipts and state snapshots. Values are
/// bincode; block keys are big-endian heights so iteration follows chain
/// order.
pub struct Storage {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
}

impl Storage {
    pub fn open(path: &Path) -> ChainResult<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_BLOCKS, Options::default()),
            ColumnFamilyDescriptor::new(CF_HEADERS, Options::default()),
            ColumnFamilyDescriptor::new(CF_RECEIPTS, Options::default()),
            ColumnFamilyDescriptor::new(CF_STATE, Options::default()),
            ColumnFamilyDescriptor::new(CF_METADATA, Options::default()),
        ];
        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)?;
        let storage = Self { db: Arc::new(db) };
        storage.ensure_schema_supported()?;
        Ok(storage)
    }

    fn cf(&self, name: &str) -> ChainResult<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| ChainError::Config(format!("missing {name} column family")))
    }

    fn ensure_schema_supported(&self) -> ChainResult<()> {
        let metadata = self.cf(CF_METADATA)?;
        match self.db.get_cf(&metadata, SCHEMA_VERSION_KEY)? {
            Some(bytes) => {
                let bytes: [u8; 4] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| ChainError::Config("invalid schema version encoding".into()))?;
                let version = u32::from_be_bytes(bytes);
                if version != STORAGE_SCHEMA_VERSION {
                    return Err(ChainError::Config(format!(
                        "database schema version {version} is not supported"
                    )));
                }
                Ok(())
            }
            None => {
                self.db.put_cf(
                    &metadata,
                    SCHEMA_VERSION_KEY,
                    STORAGE_SCHEMA_VERSION.to_be_bytes(),
                )?;
                Ok(())
            }
        }
    }

    pub fn store_block(&self, block: &Block) -> ChainResult<()> {
        let blocks = self.cf(CF_BLOCKS)?;
        let key = block.height().to_be_bytes();
        self.db.put_cf(&blocks, key, bincode::serialize(block)?)?;

        let headers = self.cf(CF_HEADERS)?;
        self.db
            .put_cf(&headers, block.hash(), bincode::serialize(&block.header)?)?;

        let metadata = self.cf(CF_METADATA)?;
        self.db.put_cf(&metadata, TIP_HEIGHT_KEY, key)?;
        self.db.put_cf(&metadata, TIP_HASH_KEY, block.hash())?;
        Ok(())
    }

    pub fn read_block(&self, height: u64) -> ChainResult<Option<Block>> {
        let blocks = self.cf(CF_BLOCKS)?;
        match self.db.get_cf(&blocks, height.to_be_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    pub fn store_receipts(&self, height: u64, receipts: &[Receipt]) -> ChainResult<()> {
        let cf = self.cf(CF_RECEIPTS)?;
        self.db
            .put_cf(&cf, height.to_be_bytes(), bincode::serialize(receipts)?)?;
        Ok(())
    }

    pub fn read_receipts(&self, height: u64) -> ChainResult<Vec<Receipt>> {
        let cf = self.cf(CF_RECEIPTS)?;
        match self.db.get_cf(&cf, height.to_be_bytes())? {
            Some(value) => Ok(bincode::deserialize(&value)?),
            None => Ok(Vec::new()),
        }
    }

    pub fn store_state_snapshot(&self, height: u64, layer: &StateLayer) -> ChainResult<()> {
        let cf = self.cf(CF_STATE)?;
        self.db
            .put_cf(&cf, height.to_be_bytes(), bincode::serialize(layer)?)?;
        Ok(())
    }

    pub fn read_state_snapshot(&self, height: u64) -> ChainResult<Option<StateLayer>> {
        let cf = self.cf(CF_STATE)?;
        match self.db.get_cf(&cf, height.to_be_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    pub fn tip(&self) -> ChainResult<Option<(u64, Vec<u8>)>> {
        let metadata = self.cf(CF_METADATA)?;
        let height = match self.db.get_cf(&metadata, TIP_HEIGHT_KEY)? {
            Some(bytes) => u64::from_be_bytes(
                bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| ChainError::Config("invalid tip height encoding".into()))?,
            ),
            None => return Ok(None),
        };
        let hash = self
            .db
            .get_cf(&metadata, TIP_HASH_KEY)?
            .ok_or_else(|| ChainError::Config("missing tip hash".into()))?;
        Ok(Some((height, hash.to_vec())))
    }

    /// Loads the whole chain in height order.
    pub fn load_blockchain(&self) -> ChainResult<Vec<Block>> {
        let blocks = self.cf(CF_BLOCKS)?;
        let mut result = Vec::new();
        let mut iterator = self.db.iterator_cf(&blocks, IteratorMode::Start);
        while let Some(entry) = iterator.next() {
            let (_key, value) = entry?;
            result.push(bincode::deserialize::<Block>(&value)?);
        }
        result.sort_by_key(Block::height);
        Ok(result)
    }
}

impl Clone for Storage {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
        }
    }
}
