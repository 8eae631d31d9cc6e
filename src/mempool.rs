//! Transaction pool with a narrow contract: validate on admission, queue in
//! arrival order, hand batches to the block builder. Ordering policy beyond
//! arrival order is a mempool concern outside the consensus core.

use std::collections::HashSet;

use parking_lot::RwLock;

use crate::config::ConsensusConf;
use crate::errors::TxError;
use crate::state::AppState;
use crate::types::{Block, SignedTransaction};
use crate::validation::{validate_tx, TxValidationMode};

#[derive(Default)]
struct Inner {
    pending: Vec<SignedTransaction>,
    known: HashSet<[u8; 32]>,
}

pub struct TxPool {
    limit: usize,
    inner: RwLock<Inner>,
}

impl TxPool {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Validates against the given state view and queues the transaction.
    pub fn add(
        &self,
        app: &AppState,
        conf: &ConsensusConf,
        tx: SignedTransaction,
    ) -> Result<(), TxError> {
        let hash = tx.hash();
        {
            let inner = self.inner.read();
            if inner.known.contains(&hash) {
                return Err(TxError::DuplicatedTx);
            }
            if inner.pending.len() >= self.limit {
                return Err(TxError::QuotaExceeded);
            }
        }
        validate_tx(app, &tx, conf, TxValidationMode::MempoolTx)?;
        let mut inner = self.inner.write();
        if !inner.known.insert(hash) {
            return Err(TxError::DuplicatedTx);
        }
        inner.pending.push(tx);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.inner.read().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Transactions for the next block, in arrival order.
    pub fn drain_for_block(&self, max: usize) -> Vec<SignedTransaction> {
        let inner = self.inner.read();
        inner.pending.iter().take(max).cloned().collect()
    }

    /// Drops every transaction the applied block included.
    pub fn reset_to(&self, block: &Block) {
        let included: HashSet<[u8; 32]> =
            block.transactions.iter().map(SignedTransaction::hash).collect();
        let mut inner = self.inner.write();
        inner.pending.retain(|tx| !included.contains(&tx.hash()));
        for hash in included {
            inner.known.remove(&hash);
        }
    }
}
