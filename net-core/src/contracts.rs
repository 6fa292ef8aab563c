//! External collaborator contracts (spec §6): the chain store, the block
//! validator, and block/header serialization. This crate only defines and
//! calls these traits; implementing them is the host binary's job.

use async_trait::async_trait;

/// Outcome of asynchronously validating one downloaded block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    Valid,
    Invalid { reason: String },
}

impl ValidationOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationOutcome::Valid)
    }
}

/// Chain-height and best-hash bookkeeping.
#[async_trait]
pub trait ChainMetadataStore: Send + Sync {
    async fn get_chain_height(&self) -> Option<i64>;
    async fn set_chain_height(&self, height: i64) -> anyhow::Result<()>;
    async fn get_best_block_hash(&self) -> Option<[u8; 32]>;
    async fn set_best_block_hash(&self, hash: [u8; 32]) -> anyhow::Result<()>;
}

/// Block/header/body persistence and lookup.
#[async_trait]
pub trait ChainBlockStore: Send + Sync {
    async fn store_block(&self, height: i64, block: &[u8]) -> anyhow::Result<()>;
    async fn store_header(&self, height: i64, header: &[u8]) -> anyhow::Result<()>;
    async fn store_body(&self, hash: [u8; 32], body: &[u8]) -> anyhow::Result<()>;
    async fn get_block_by_hash(&self, hash: [u8; 32]) -> Option<Vec<u8>>;
    async fn get_block_by_height(&self, height: i64) -> Option<Vec<u8>>;
    async fn get_header_by_height(&self, height: i64) -> Option<Vec<u8>>;
    async fn exists(&self, hash: [u8; 32]) -> bool;
}

/// Transaction index lookups, consumed by `TxPoolRequest` handling.
#[async_trait]
pub trait ChainTransactionIndex: Send + Sync {
    async fn index_transaction(
        &self,
        tx_hash: [u8; 32],
        block_hash: [u8; 32],
        height: i64,
        tx_index: u32,
    ) -> anyhow::Result<()>;
    async fn get_transaction_location(&self, tx_hash: [u8; 32]) -> Option<(i64, u32)>;
    async fn get_transaction(&self, tx_hash: [u8; 32]) -> Option<Vec<u8>>;
}

/// Account-state persistence, addressed by a 33-byte compressed key.
#[async_trait]
pub trait ChainAccountStore: Send + Sync {
    async fn store_account(&self, address: [u8; 33], state: &[u8]) -> anyhow::Result<()>;
    async fn get_account(&self, address: [u8; 33]) -> Option<Vec<u8>>;
    async fn exists(&self, address: [u8; 33]) -> bool;
    async fn delete_account(&self, address: [u8; 33]) -> anyhow::Result<()>;
}

/// An atomic batch of writes, committed together by the storage layer.
pub trait WriteBatch: Send {
    fn put(&mut self, key: &[u8], value: &[u8]);
}

/// The storage-level commit/maintenance surface the chain store is built
/// on top of.
#[async_trait]
pub trait Storage: Send + Sync {
    type Batch: WriteBatch;

    fn new_batch(&self) -> Self::Batch;
    async fn commit(&self, batch: Self::Batch) -> anyhow::Result<()>;
    async fn compact(&self) -> anyhow::Result<()>;
    async fn check_integrity(&self) -> anyhow::Result<bool>;
}

/// Asynchronous block validation, consumed during `DownloadingBlocks`.
#[async_trait]
pub trait BlockValidator: Send + Sync {
    async fn validate_block(&self, block: &[u8]) -> ValidationOutcome;
}

/// Header (de)serialization and hashing, consumed by the synchronizer.
pub trait HeaderCodec: Send + Sync {
    fn deserialize(&self, bytes: &[u8]) -> anyhow::Result<DecodedHeader>;
}

/// A decoded header: just enough for the synchronizer to advance its
/// cursor without understanding the rest of the consensus data model.
#[derive(Debug, Clone)]
pub struct DecodedHeader {
    pub height: i64,
    pub hash: [u8; 32],
    pub raw: Vec<u8>,
}

/// Block (de)serialization and hashing, consumed by the synchronizer.
pub trait BlockCodec: Send + Sync {
    fn compute_hash(&self, block: &[u8]) -> anyhow::Result<[u8; 32]>;
}
