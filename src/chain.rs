//! The deterministic block-application engine.
//!
//! [`Blockchain::apply_block`] re-executes a candidate block against the
//! parent state: transactions in body order, proposer and final-committee
//! rewards, the fee and proposer-threshold curves, and, on `IdentityUpdate`
//! blocks, the delegation switch, the status switch, delayed offline
//! penalties and the epoch transition, in exactly that order. Any failure
//! discards the working layer; a root mismatch rejects the block with no
//! partial commit.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info, warn};

use crate::collector::{RewardKind, StatsCollector};
use crate::config::NodeConfig;
use crate::crypto::{address_from_public_key, public_key_from_hex};
use crate::errors::{ChainError, ChainResult, TxError};
use crate::fee;
use crate::num::{
    block_weight, calculate_penalty, mul_div_f64, percent, split_reward, Coin,
};
use crate::rewards;
use crate::state::{AppState, StateDb, ValidationPeriod};
use crate::storage::Storage;
use crate::types::{
    Address, Block, BlockFlags, BlockHeader, ChangeProfileAttachment, DeleteFlipAttachment,
    EmptyBlockHeader, FlipMeta, IdentityState, OnlineStatusAttachment, ProposedHeader, Receipt,
    ShardId, SignedTransaction, SubmitFlipAttachment, Transaction, TxAddr, TxType,
    ValidationResults,
};
use crate::validation::{validate_tx, TxValidationMode};

/// Contract executor collaborator. The core hands it the transaction and the
/// working state; it returns the call output or a typed trap.
pub trait VmExecutor: Send {
    fn execute(&self, tx: &SignedTransaction, state: &mut StateDb) -> Result<Vec<u8>, TxError>;
}

/// Default executor for nodes without a contract VM attached.
pub struct NoopVm;

impl VmExecutor for NoopVm {
    fn execute(&self, _tx: &SignedTransaction, _state: &mut StateDb) -> Result<Vec<u8>, TxError> {
        Err(TxError::Vm("no contract vm attached".into()))
    }
}

/// Proposer and committee weights for one block's rewards.
#[derive(Clone, Debug)]
pub struct BlockRewardCtx {
    pub proposer: Address,
    pub proposer_stake_weight: f64,
    pub total_stake_weight: f64,
    pub committee: Option<Vec<(Address, f64)>>,
}

struct AppliedTx {
    receipt: Receipt,
    fee: Coin,
    tips: Coin,
    gas: u64,
}

pub struct Blockchain {
    config: NodeConfig,
    pub app_state: AppState,
    head: Option<BlockHeader>,
    epoch_start_height: u64,
    epoch_durations: Vec<u32>,
    validation_results: BTreeMap<ShardId, ValidationResults>,
    vm: Box<dyn VmExecutor>,
    storage: Option<Storage>,
}

impl Blockchain {
    pub fn new(config: NodeConfig) -> ChainResult<Self> {
        let mut chain = Self {
            config,
            app_state: AppState::new(),
            head: None,
            epoch_start_height: 1,
            epoch_durations: Vec::new(),
            validation_results: BTreeMap::new(),
            vm: Box::new(NoopVm),
            storage: None,
        };
        chain.init_genesis()?;
        Ok(chain)
    }

    pub fn with_storage(mut self, storage: Storage) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_vm(mut self, vm: Box<dyn VmExecutor>) -> Self {
        self.vm = vm;
        self
    }

    fn init_genesis(&mut self) -> ChainResult<()> {
        let god = self.config.genesis.god_address_value()?;
        self.app_state.state.set_god_address(god);
        self.app_state
            .state
            .set_next_validation_time(self.config.genesis.first_ceremony_time);
        self.app_state.state.set_fee_per_gas(fee::min_fee_per_gas(0));

        for account in &self.config.genesis.accounts {
            let addr = account.address_value()?;
            let balance = account.balance_value()?;
            let stake = account.stake_value()?;
            if !balance.is_zero() {
                self.app_state.state.add_balance(addr, &balance);
            }
            if let Some(state) = account.state {
                self.app_state.state.set_identity_state(addr, state);
                if state.newbie_or_better() {
                    self.app_state.identity_state.set_validated(addr, true);
                }
            }
            if !stake.is_zero() {
                self.app_state.state.add_stake(addr, &stake);
            }
        }

        let root = self.app_state.commit_at(1)?;
        let header = BlockHeader::Empty(EmptyBlockHeader {
            height: 1,
            parent_hash: String::new(),
            time: 0,
            state_root: hex::encode(root),
            flags: BlockFlags::default(),
        });
        info!(root = %hex::encode(root), "genesis state committed");
        self.head = Some(header);
        Ok(())
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn head(&self) -> Option<&BlockHeader> {
        self.head.as_ref()
    }

    /// Ceremony outcome injected by the validation collaborator, consumed at
    /// the next epoch close.
    pub fn set_validation_results(&mut self, results: BTreeMap<ShardId, ValidationResults>) {
        self.validation_results = results;
    }

    /// Commits out-of-band state mutations (genesis tooling, tests) and
    /// advances the head with a synthetic empty block binding the new root.
    pub fn commit_state(&mut self) -> ChainResult<[u8; 32]> {
        let head = self
            .head
            .clone()
            .ok_or_else(|| ChainError::Block("chain has no head".into()))?;
        let height = head.height() + 1;
        let root = self.app_state.commit_at(height)?;
        self.head = Some(BlockHeader::Empty(EmptyBlockHeader {
            height,
            parent_hash: head.hash_hex(),
            time: head.time(),
            state_root: hex::encode(root),
            flags: BlockFlags::default(),
        }));
        Ok(root)
    }

    /// Flags the next block must carry given the pending switch sets.
    pub fn compose_block_flags(&self, height: u64) -> BlockFlags {
        let mut flags = BlockFlags::default();
        let range = self.config.consensus.status_switch_range;
        let has_pending = !self.app_state.state.status_switch_addresses().is_empty()
            || !self.app_state.state.delayed_offline_penalties().is_empty();
        if range != 0 && height % range == 0 && has_pending {
            flags = flags.with(BlockFlags::IDENTITY_UPDATE);
        }
        flags
    }

    /// Convenience constructor for the next proposed block on top of the
    /// current head. The state root is left open; `apply_block` fills and
    /// checks it only when present.
    pub fn build_block(
        &self,
        time: i64,
        proposer_pubkey: String,
        transactions: Vec<SignedTransaction>,
    ) -> Block {
        let head = self.head.as_ref().expect("chain has a head");
        let height = head.height() + 1;
        let header = ProposedHeader {
            height,
            parent_hash: head.hash_hex(),
            time,
            proposer_pubkey,
            tx_root: Block::tx_root(&transactions),
            state_root: String::new(),
            flags: self.compose_block_flags(height),
            seed: String::new(),
            offline_addr: None,
        };
        Block::new(BlockHeader::Proposed(header), transactions)
    }

    fn validate_header(&self, block: &Block) -> ChainResult<()> {
        let head = match &self.head {
            Some(head) => head,
            None => return Err(ChainError::Block("chain has no head".into())),
        };
        if block.height() != head.height() + 1 {
            return Err(ChainError::Block(format!(
                "height {} does not follow head {}",
                block.height(),
                head.height()
            )));
        }
        if block.header.parent_hash() != head.hash_hex() {
            return Err(ChainError::Block("parent hash mismatch".into()));
        }
        if block.header.time() < head.time() {
            return Err(ChainError::Block("block time is not monotonic".into()));
        }
        if let BlockHeader::Proposed(header) = &block.header {
            if header.proposer_pubkey.is_empty() {
                return Err(ChainError::Block("missing proposer public key".into()));
            }
            public_key_from_hex(&header.proposer_pubkey)
                .map_err(|_| ChainError::Block("malformed proposer public key".into()))?;
        }
        Ok(())
    }

    /// Applies a candidate block and commits the resulting state. Returns the
    /// transaction receipts. All-or-nothing: on any error the working layer
    /// is discarded.
    pub fn apply_block(
        &mut self,
        block: &Block,
        collector: &mut dyn StatsCollector,
    ) -> ChainResult<Vec<Receipt>> {
        self.validate_header(block)?;
        match self.apply_block_on_state(block, collector) {
            Ok(receipts) => Ok(receipts),
            Err(err) => {
                self.app_state.reset();
                Err(err)
            }
        }
    }

    fn apply_block_on_state(
        &mut self,
        block: &Block,
        collector: &mut dyn StatsCollector,
    ) -> ChainResult<Vec<Receipt>> {
        let mut receipts = Vec::with_capacity(block.transactions.len());
        let mut fee_pot = Coin::zero();
        let mut tips_pot = Coin::zero();
        let mut used_gas = 0u64;

        if !block.header.is_empty() {
            let mut seen = BTreeSet::new();
            for signed in &block.transactions {
                if !seen.insert(signed.hash()) {
                    return Err(TxError::DuplicatedTx.into());
                }
                validate_tx(
                    &self.app_state,
                    signed,
                    &self.config.consensus,
                    TxValidationMode::InBlockTx,
                )?;
                let applied = self.apply_tx_on_state(signed, block, collector)?;
                fee_pot.add_assign(&applied.fee);
                tips_pot.add_assign(&applied.tips);
                used_gas += applied.gas;
                receipts.push(applied.receipt);
            }

            let proposer = self.block_proposer(block)?;
            let committee = self.app_state.validators_cache.online_validators();
            let committee = if committee.is_empty() {
                None
            } else {
                Some(committee)
            };
            let ctx = self.prepare_block_reward_ctx(proposer, committee.as_deref());
            self.apply_block_rewards(&fee_pot, &tips_pot, block, &ctx, collector);
            self.apply_next_block_fee(used_gas);
        }

        self.update_vrf_proposer_threshold(block);
        self.apply_session_flags(block);

        if block.header.flags().has(BlockFlags::OFFLINE_COMMIT) {
            if let BlockHeader::Proposed(header) = &block.header {
                if let Some(offline) = header.offline_addr {
                    self.apply_offline_penalty(offline);
                }
            }
        }

        if block.header.flags().has(BlockFlags::IDENTITY_UPDATE) {
            let undelegations = self.apply_delegation_switch(block);
            if !undelegations.is_empty() {
                debug!(count = undelegations.len(), "identities undelegated");
            }
            let switched = self.apply_status_switch(block, collector);
            self.apply_delayed_offline_penalties(block, &switched, collector);
        }

        if block.header.flags().has(BlockFlags::VALIDATION_FINISHED) {
            self.apply_new_epoch(block, collector);
        }

        let root = self.app_state.precommit();
        let expected = block.header.state_root();
        if !expected.is_empty() && expected != hex::encode(root) {
            warn!(height = block.height(), "state root mismatch");
            return Err(ChainError::Block(format!(
                "state root mismatch at height {}",
                block.height()
            )));
        }

        self.app_state.commit_at(block.height())?;
        if let Some(storage) = &self.storage {
            storage.store_block(block)?;
            storage.store_receipts(block.height(), &receipts)?;
        }
        self.head = Some(block.header.clone());
        debug!(
            height = block.height(),
            txs = block.transactions.len(),
            "block applied"
        );
        Ok(receipts)
    }

    fn block_proposer(&self, block: &Block) -> ChainResult<Address> {
        let pubkey = block
            .header
            .proposer_pubkey()
            .ok_or_else(|| ChainError::Block("empty block has no proposer".into()))?;
        Ok(address_from_public_key(&public_key_from_hex(pubkey)?))
    }

    // --- transaction application -------------------------------------------

    fn apply_tx_on_state(
        &mut self,
        signed: &SignedTransaction,
        block: &Block,
        collector: &mut dyn StatsCollector,
    ) -> ChainResult<AppliedTx> {
        let sender = signed.from()?;
        let tx = &signed.payload;
        let gas = fee::calculate_gas(tx);
        let full_fee = fee::calculate_fee(&self.app_state.state.fee_per_gas(), tx);
        let charged_fee = full_fee.min(tx.max_fee.clone());
        let state = &mut self.app_state.state;

        let upfront = charged_fee.add(&tx.tips);
        if !state.sub_balance(sender, &upfront) {
            return Err(TxError::InsufficientFunds.into());
        }
        state.set_nonce(sender, tx.nonce);
        let epoch = state.global_epoch();
        state.set_account_epoch(sender, epoch);

        let receipt = if tx.tx_type.is_contract() {
            // Fees stay deducted when the effect traps; only the effect's own
            // writes are rolled back.
            let checkpoint = self.app_state.state.snapshot();
            match self.vm.execute(signed, &mut self.app_state.state) {
                Ok(output) => {
                    let mut receipt =
                        Receipt::success(signed.hash_hex(), gas, charged_fee.clone());
                    receipt.output = output;
                    receipt
                }
                Err(err) => {
                    self.app_state.state.restore(checkpoint);
                    Receipt::failure(
                        signed.hash_hex(),
                        gas,
                        charged_fee.clone(),
                        err.kind().to_string(),
                    )
                }
            }
        } else {
            self.apply_plain_effect(&sender, signed, block, collector)?;
            Receipt::success(signed.hash_hex(), gas, charged_fee.clone())
        };

        Ok(AppliedTx {
            receipt,
            fee: charged_fee,
            tips: tx.tips.clone(),
            gas,
        })
    }

    fn apply_plain_effect(
        &mut self,
        sender: &Address,
        signed: &SignedTransaction,
        block: &Block,
        collector: &mut dyn StatsCollector,
    ) -> ChainResult<()> {
        let tx = &signed.payload;
        let epoch_height = self.epoch_height(block.height());
        let state = &mut self.app_state.state;
        match tx.tx_type {
            TxType::Send => {
                let to = recipient(tx)?;
                if !state.sub_balance(*sender, &tx.amount) {
                    return Err(TxError::InsufficientFunds.into());
                }
                state.add_balance(to, &tx.amount);
            }
            TxType::Invite => {
                let to = recipient(tx)?;
                if *sender == state.god_address() {
                    state.inc_god_invites_used();
                } else {
                    let identity = state.get_or_new_identity_mut(*sender);
                    identity.invites = identity.invites.saturating_sub(1);
                }
                if !state.sub_balance(*sender, &tx.amount) {
                    return Err(TxError::InsufficientFunds.into());
                }
                state.add_balance(to, &tx.amount);
                let shard = state
                    .identity(sender)
                    .map(|identity| identity.shard_id)
                    .unwrap_or(0);
                let invite_link = TxAddr {
                    address: *sender,
                    tx_hash: signed.hash_hex(),
                    epoch_height,
                };
                {
                    let invitee = state.get_or_new_identity_mut(to);
                    invitee.state = IdentityState::Invite;
                    invitee.shard_id = shard;
                    invitee.inviter = Some(invite_link);
                }
                state.get_or_new_identity_mut(*sender).invitees.push(TxAddr {
                    address: to,
                    tx_hash: signed.hash_hex(),
                    epoch_height,
                });
            }
            TxType::Activation => {
                let to = recipient(tx)?;
                let balance = state.balance(sender);
                let stake = state.stake(sender);
                let moved = balance.add(&stake);
                state.set_balance(*sender, Coin::zero());
                state.add_balance(to, &moved);
                let shard = state
                    .identity(sender)
                    .map(|identity| identity.shard_id)
                    .unwrap_or(0);
                let inherited = {
                    let identity = state.get_or_new_identity_mut(*sender);
                    identity.stake = Coin::zero();
                    identity.replenished_stake = Coin::zero();
                    identity.state = IdentityState::Killed;
                    identity.inviter.take()
                };
                if let Some(link) = &inherited {
                    // The invitee record follows the activated address.
                    if let Some(inviter) = state.identity_mut(&link.address) {
                        for entry in &mut inviter.invitees {
                            if entry.address == *sender {
                                entry.address = to;
                            }
                        }
                    }
                }
                let candidate = state.get_or_new_identity_mut(to);
                candidate.state = IdentityState::Candidate;
                candidate.shard_id = shard;
                candidate.inviter = inherited;
                self.app_state.identity_state.remove(sender);
            }
            TxType::Kill => {
                let stake = state.stake(sender);
                state.add_balance(*sender, &stake);
                let identity = state.get_or_new_identity_mut(*sender);
                identity.stake = Coin::zero();
                identity.replenished_stake = Coin::zero();
                identity.state = IdentityState::Killed;
                self.app_state.identity_state.remove(sender);
                collector.add_killed_identity(sender);
            }
            TxType::KillInvitee => {
                let to = recipient(tx)?;
                let returned_stake = state.stake(&to);
                state.add_balance(*sender, &returned_stake);
                {
                    let inviter = state.get_or_new_identity_mut(*sender);
                    inviter.invitees.retain(|entry| entry.address != to);
                    inviter.invites = inviter.invites.saturating_add(1);
                }
                let invitee = state.get_or_new_identity_mut(to);
                invitee.stake = Coin::zero();
                invitee.replenished_stake = Coin::zero();
                invitee.inviter = None;
                invitee.state = IdentityState::Killed;
                self.app_state.identity_state.remove(&to);
                collector.add_killed_identity(&to);
            }
            TxType::KillDelegator => {
                let to = recipient(tx)?;
                let stake = state.stake(&to);
                state.add_balance(to, &stake);
                let delegator = state.get_or_new_identity_mut(to);
                delegator.stake = Coin::zero();
                delegator.replenished_stake = Coin::zero();
                delegator.delegatee = None;
                delegator.state = IdentityState::Killed;
                self.app_state.identity_state.remove(&to);
                collector.add_killed_identity(&to);
                crate::epoch::prune_transitive_delegations(&mut self.app_state, collector);
            }
            TxType::OnlineStatus => {
                let attachment = OnlineStatusAttachment::parse(&tx.payload)
                    .map_err(ChainError::Transaction)?;
                if attachment.online && state.has_delayed_penalty(sender) {
                    state.remove_delayed_penalty(sender);
                } else {
                    state.toggle_status_switch_address(*sender);
                }
            }
            TxType::Delegate => {
                let to = recipient(tx)?;
                state.toggle_delegation_address(*sender, to);
                let identity = state.get_or_new_identity_mut(*sender);
                identity.delegation_nonce += 1;
            }
            TxType::Undelegate => {
                state.toggle_delegation_address(*sender, Address::EMPTY);
            }
            TxType::ReplenishStake => {
                let to = recipient(tx)?;
                if !state.sub_balance(*sender, &tx.amount) {
                    return Err(TxError::InsufficientFunds.into());
                }
                state.add_stake(to, &tx.amount);
                state.add_replenished_stake(to, &tx.amount);
            }
            TxType::Burn => {
                if !state.sub_balance(*sender, &tx.amount) {
                    return Err(TxError::InsufficientFunds.into());
                }
                collector.add_burnt_coins(&tx.amount);
            }
            TxType::DeleteFlip => {
                let attachment =
                    DeleteFlipAttachment::parse(&tx.payload).map_err(ChainError::Transaction)?;
                let identity = state.get_or_new_identity_mut(*sender);
                identity.flips.retain(|flip| flip.cid != attachment.cid);
            }
            TxType::SubmitFlip => {
                let attachment =
                    SubmitFlipAttachment::parse(&tx.payload).map_err(ChainError::Transaction)?;
                let identity = state.get_or_new_identity_mut(*sender);
                identity.flips.push(FlipMeta {
                    cid: attachment.cid,
                    pair: attachment.pair,
                });
            }
            TxType::SubmitAnswersHash
            | TxType::SubmitShortAnswers
            | TxType::SubmitLongAnswers
            | TxType::Evidence => {
                let bit = tx.tx_type.validation_bit().expect("ceremony tx");
                state
                    .get_or_new_identity_mut(*sender)
                    .validation_txs
                    .insert(bit);
            }
            TxType::ChangeProfile => {
                let attachment =
                    ChangeProfileAttachment::parse(&tx.payload).map_err(ChainError::Transaction)?;
                state.get_or_new_identity_mut(*sender).profile_hash = attachment.hash;
            }
            TxType::ChangeGodAddress => {
                let to = recipient(tx)?;
                state.set_god_address(to);
            }
            TxType::StoreToIpfs => {
                return Err(TxError::Validation(
                    "ipfs transactions are not accepted by the core".into(),
                )
                .into());
            }
            TxType::DeployContract | TxType::CallContract | TxType::TerminateContract => {
                unreachable!("contract transactions take the vm path")
            }
        }
        Ok(())
    }

    fn epoch_height(&self, height: u64) -> u32 {
        height.saturating_sub(self.epoch_start_height) as u32
    }

    // --- per-block rewards --------------------------------------------------

    /// Weighs the proposer and the final committee. Each participant with a
    /// positive stake weighs `max(1, stake^0.9)`; zero stake weighs nothing.
    /// A proposer sitting in the committee carries a weight on each side.
    pub fn prepare_block_reward_ctx(
        &self,
        proposer: Address,
        committee: Option<&[Address]>,
    ) -> BlockRewardCtx {
        let proposer_stake_weight = block_weight(&self.app_state.state.stake(&proposer));
        let mut total_stake_weight = proposer_stake_weight;
        let committee = committee.map(|members| {
            members
                .iter()
                .map(|member| {
                    let weight = block_weight(&self.app_state.state.stake(member));
                    total_stake_weight += weight;
                    (*member, weight)
                })
                .collect::<Vec<_>>()
        });
        BlockRewardCtx {
            proposer,
            proposer_stake_weight,
            total_stake_weight,
            committee,
        }
    }

    /// Pays the proposer and the final committee. 90% of collected fees burn;
    /// the remainder plus tips goes to the proposer on top of its pot share.
    /// A zero-stake proposer forfeits the pot share but keeps fees and tips.
    pub fn apply_block_rewards(
        &mut self,
        fee: &Coin,
        tips: &Coin,
        block: &Block,
        ctx: &BlockRewardCtx,
        collector: &mut dyn StatsCollector,
    ) {
        let conf = &self.config.consensus;
        let burnt = percent(fee, conf.fee_burn_rate_percent);
        let fee_reward = fee.saturating_sub(&burnt);
        // Collected fees and tips leave circulation here; the proposer's cut
        // returns through the payout below and counts as minted again.
        collector.add_burnt_coins(fee);
        collector.add_burnt_coins(tips);

        let pot = conf.block_reward.add(&conf.final_committee_reward);
        let proposer_pot = match &ctx.committee {
            Some(_) => mul_div_f64(&pot, ctx.proposer_stake_weight, ctx.total_stake_weight),
            None if ctx.proposer_stake_weight > 0.0 => pot.clone(),
            None => Coin::zero(),
        };

        let proposer_total = proposer_pot.add(&fee_reward).add(tips);
        self.pay_block_reward(
            ctx.proposer,
            &proposer_total,
            block.header.time(),
            RewardKind::Proposer,
            collector,
        );

        if let Some(members) = &ctx.committee {
            for (member, weight) in members {
                let share = mul_div_f64(&pot, *weight, ctx.total_stake_weight);
                if share.is_zero() {
                    continue;
                }
                self.pay_block_reward(
                    *member,
                    &share,
                    block.header.time(),
                    RewardKind::FinalCommittee,
                    collector,
                );
            }
        }
    }

    /// Credits a reward, filtered through the identity's running penalty.
    /// The balance part follows the delegation; the stake part always sticks
    /// to the identity itself.
    fn pay_block_reward(
        &mut self,
        addr: Address,
        total: &Coin,
        block_time: i64,
        kind: RewardKind,
        collector: &mut dyn StatsCollector,
    ) {
        if total.is_zero() {
            return;
        }
        let state = &mut self.app_state.state;
        let (is_newbie, delegatee, seconds, timestamp) = match state.identity(&addr) {
            Some(identity) => (
                identity.state == IdentityState::Newbie,
                identity.delegatee,
                identity.penalty_seconds,
                identity.penalty_timestamp,
            ),
            None => (false, None, 0, 0),
        };
        let (balance_part, stake_part) = split_reward(total, is_newbie, &self.config.consensus);
        let charge = calculate_penalty(balance_part, stake_part, None, seconds, timestamp, block_time);
        if charge.charged_seconds > 0 {
            let remaining = seconds - charge.charged_seconds;
            state.set_penalty_seconds(addr, remaining);
            state.set_penalty_timestamp(addr, if remaining == 0 { 0 } else { block_time });
            collector.add_penalty_seconds_charge(&addr, charge.charged_seconds);
        }
        let dest = delegatee.unwrap_or(addr);
        state.add_balance(dest, &charge.payable_balance);
        state.add_stake(addr, &charge.payable_stake);
        collector.add_minted_coins(&charge.payable_balance);
        collector.add_minted_coins(&charge.payable_stake);
        collector.add_reward(
            &dest,
            &addr,
            &charge.payable_balance,
            &charge.payable_stake,
            kind,
        );
    }

    // --- fee and proposer-threshold curves ---------------------------------

    pub fn apply_next_block_fee(&mut self, used_gas: u64) {
        let network_size = self.app_state.validators_cache.network_size();
        let next = fee::next_fee_per_gas(
            &self.app_state.state.fee_per_gas(),
            used_gas,
            network_size,
        );
        self.app_state.state.set_fee_per_gas(next);
    }

    /// Empty blocks loosen proposer selection; full blocks tighten it back
    /// toward the 0.5 resting threshold.
    pub fn update_vrf_proposer_threshold(&mut self, block: &Block) {
        let empty = block.header.is_empty();
        self.app_state.state.register_block_kind(empty);
        let current = self.app_state.state.vrf_proposer_threshold();
        let next = if empty {
            (current + 0.01).min(0.66)
        } else {
            (current - 0.01).max(0.5)
        };
        self.app_state.state.set_vrf_proposer_threshold(next);
    }

    // --- status switches and penalties -------------------------------------

    /// Queues a delayed offline penalty reported by the offline detector.
    pub fn apply_offline_penalty(&mut self, addr: Address) {
        self.app_state.state.add_delayed_penalty(addr);
    }

    /// Applies every pending online/offline switch in ascending address
    /// order. Toggling online restarts a paused penalty clock; toggling
    /// offline charges the elapsed seconds and stops it.
    pub fn apply_status_switch(
        &mut self,
        block: &Block,
        collector: &mut dyn StatsCollector,
    ) -> BTreeSet<Address> {
        let addresses = self.app_state.state.status_switch_addresses();
        let mut switched = BTreeSet::new();
        for addr in addresses {
            let online = !self.app_state.identity_state.is_online(&addr);
            self.app_state.identity_state.set_online(addr, online);
            switched.insert(addr);

            let seconds = self.app_state.state.penalty_seconds(&addr);
            if seconds == 0 {
                continue;
            }
            if online {
                self.app_state
                    .state
                    .set_penalty_timestamp(addr, block.header.time());
                continue;
            }
            let timestamp = self.app_state.state.penalty_timestamp(&addr);
            let charge = calculate_penalty(
                Coin::zero(),
                Coin::zero(),
                None,
                seconds,
                timestamp,
                block.header.time(),
            );
            if charge.charged_seconds > 0 {
                collector.add_penalty_seconds_charge(&addr, charge.charged_seconds);
            }
            self.app_state
                .state
                .set_penalty_seconds(addr, seconds - charge.charged_seconds);
            self.app_state.state.set_penalty_timestamp(addr, 0);
        }
        self.app_state.state.clear_status_switch_addresses();
        switched
    }

    /// Forces queued identities offline with a fresh penalty. Addresses the
    /// status switch just processed are skipped.
    pub fn apply_delayed_offline_penalties(
        &mut self,
        _block: &Block,
        switched: &BTreeSet<Address>,
        collector: &mut dyn StatsCollector,
    ) {
        let pending = self.app_state.state.delayed_offline_penalties();
        for addr in pending {
            if switched.contains(&addr) {
                continue;
            }
            self.app_state.identity_state.set_online(addr, false);
            let seconds = self.config.consensus.offline_penalty_duration_secs as u16;
            self.app_state.state.set_penalty_seconds(addr, seconds);
            self.app_state.state.set_penalty_timestamp(addr, 0);
            collector.add_penalty_seconds_charge(&addr, 0);
            debug!(%addr, seconds, "delayed offline penalty applied");
        }
        self.app_state.state.clear_delayed_penalties();
    }

    // --- delegation switch --------------------------------------------------

    /// Applies pending delegations and undelegations at the epoch boundary.
    /// Returns the identities that left their pool.
    pub fn apply_delegation_switch(&mut self, block: &Block) -> Vec<Address> {
        if !block.header.flags().has(BlockFlags::IDENTITY_UPDATE) {
            return Vec::new();
        }
        let epoch = self.app_state.state.global_epoch();
        let pending: Vec<(Address, Address)> = self
            .app_state
            .state
            .delegations()
            .iter()
            .map(|(addr, target)| (*addr, *target))
            .collect();
        let mut undelegations = Vec::new();

        for (addr, target) in &pending {
            if target.is_empty() {
                let Some(delegatee) = self.app_state.state.delegatee(addr) else {
                    continue;
                };
                {
                    let identity = self.app_state.state.get_or_new_identity_mut(*addr);
                    identity.pending_undelegation = Some(delegatee);
                    identity.delegatee = None;
                    identity.delegation_epoch = epoch;
                }
                self.app_state.identity_state.set_delegatee(*addr, None);
                self.app_state.identity_state.set_online(*addr, false);
                undelegations.push(*addr);
                continue;
            }

            // No transitive delegation: a target that delegates, recently
            // undelegated, or already heads a pool is rejected silently.
            let target_identity = self.app_state.state.identity(target);
            let target_busy = target_identity
                .map(|identity| {
                    identity.delegatee.is_some() || identity.pending_undelegation.is_some()
                })
                .unwrap_or(false);
            let sender_is_pool = self.app_state.identity_state.has_delegators(addr)
                || pending
                    .iter()
                    .any(|(other, other_target)| other_target == addr && other != addr);
            if target_busy || sender_is_pool {
                continue;
            }

            {
                let identity = self.app_state.state.get_or_new_identity_mut(*addr);
                identity.delegatee = Some(*target);
                identity.delegation_epoch = epoch;
                identity.pending_undelegation = None;
            }
            if self.app_state.identity_state.is_validated(addr) {
                self.app_state
                    .identity_state
                    .set_delegatee(*addr, Some(*target));
            }
            self.app_state.identity_state.set_online(*addr, false);
        }

        self.app_state.state.clear_delegations();
        undelegations
    }

    // --- epoch transition ---------------------------------------------------

    fn apply_new_epoch(&mut self, block: &Block, collector: &mut dyn StatsCollector) {
        let duration = block.height().saturating_sub(self.epoch_start_height) as u32;
        self.epoch_durations.push(duration.max(1));
        if self.epoch_durations.len() > 10 {
            self.epoch_durations.remove(0);
        }
        let results = std::mem::take(&mut self.validation_results);
        info!(
            epoch = self.app_state.state.epoch(),
            duration, "applying epoch transition"
        );

        rewards::reward_valid_identities(
            &mut self.app_state,
            &self.config.consensus,
            &results,
            &self.epoch_durations,
            collector,
        );

        let network_size = self.app_state.validators_cache.network_size();
        let invites_budget =
            (network_size as f32 * self.config.consensus.invites_percent) as u32;
        let bad_authors: BTreeSet<Address> = results
            .values()
            .flat_map(|shard| shard.bad_authors.iter().copied())
            .collect();
        crate::epoch::set_new_identities_attributes(
            &mut self.app_state,
            invites_budget,
            network_size,
            &bad_authors,
            collector,
        );
        crate::epoch::prune_transitive_delegations(&mut self.app_state, collector);
        crate::epoch::balance_shards(&mut self.app_state, &self.config.consensus);
        crate::epoch::clear_dust_accounts(&mut self.app_state, network_size, collector);

        self.app_state.state.inc_epoch();
        let next_global = self.app_state.state.global_epoch() + 1;
        self.app_state.state.set_global_epoch(next_global);
        self.app_state.state.reset_god_invites_used();
        self.app_state
            .state
            .set_validation_period(ValidationPeriod::None);
        self.epoch_start_height = block.height();
    }

    fn apply_session_flags(&mut self, block: &Block) {
        let flags = block.header.flags();
        if flags.has(BlockFlags::FLIP_LOTTERY_STARTED) {
            self.app_state
                .state
                .set_validation_period(ValidationPeriod::FlipLottery);
        }
        if flags.has(BlockFlags::SHORT_SESSION_STARTED) {
            self.app_state
                .state
                .set_validation_period(ValidationPeriod::ShortSession);
        }
        if flags.has(BlockFlags::LONG_SESSION_STARTED) {
            self.app_state
                .state
                .set_validation_period(ValidationPeriod::LongSession);
        }
        if flags.has(BlockFlags::AFTER_LONG_SESSION_STARTED) {
            self.app_state
                .state
                .set_validation_period(ValidationPeriod::AfterLong);
        }
    }
}

fn recipient(tx: &Transaction) -> ChainResult<Address> {
    tx.to
        .ok_or_else(|| TxError::InvalidRecipient("recipient is required".into()).into())
}
