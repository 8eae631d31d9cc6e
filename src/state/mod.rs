mod identity_state;
mod statedb;
mod validators;

pub use identity_state::{ApprovedIdentity, IdentityStateDb};
pub use statedb::{Globals, StateDb, StateLayer, ValidationPeriod, EMPTY_BLOCK_WINDOW};
pub use validators::ValidatorsCache;

use crate::errors::{ChainError, ChainResult};

/// The full application state: canonical records, the approval index, and the
/// validator cache derived from them. The applicator owns exactly one mutable
/// `AppState`; check-time clones from [`AppState::for_check`] are read-only by
/// contract and never written back.
#[derive(Clone, Debug, Default)]
pub struct AppState {
    pub state: StateDb,
    pub identity_state: IdentityStateDb,
    pub validators_cache: ValidatorsCache,
    last_committed_height: u64,
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Independent snapshot for validator pre-checks.
    pub fn for_check(&self) -> AppState {
        self.clone()
    }

    /// Drops all uncommitted mutation in both namespaces.
    pub fn reset(&mut self) {
        self.state.reset();
        self.identity_state.reset();
    }

    /// Computes the root the pending layer would commit to.
    pub fn precommit(&mut self) -> [u8; 32] {
        let state_root = self.state.precommit();
        let identity_root = self.identity_state.root();
        Self::combined_root(state_root, identity_root)
    }

    /// Promotes the working layer at `height` and rebuilds the validator
    /// cache. Heights must be strictly increasing.
    pub fn commit_at(&mut self, height: u64) -> ChainResult<[u8; 32]> {
        if height <= self.last_committed_height && self.last_committed_height != 0 {
            return Err(ChainError::Block(format!(
                "commit height {height} is not above {}",
                self.last_committed_height
            )));
        }
        let state_root = self.state.commit();
        let identity_root = self.identity_state.commit();
        self.last_committed_height = height;
        self.load_validators();
        Ok(Self::combined_root(state_root, identity_root))
    }

    pub fn last_committed_height(&self) -> u64 {
        self.last_committed_height
    }

    /// Rebuilds the derived validator cache from the current state.
    pub fn load_validators(&mut self) {
        let mut cache = std::mem::take(&mut self.validators_cache);
        cache.load(&self.state, &self.identity_state);
        self.validators_cache = cache;
    }

    fn combined_root(state_root: [u8; 32], identity_root: [u8; 32]) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&state_root);
        hasher.update(&identity_root);
        *hasher.finalize().as_bytes()
    }
}
