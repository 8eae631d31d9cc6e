//! Pure transaction validation: `(state, tx, mode) -> Ok | TxError`.
//!
//! Mempool admission and in-block re-validation run the same checks; the only
//! mode difference is the fee-cap rule, which the mempool enforces eagerly so
//! that underpriced transactions never queue.

use crate::config::ConsensusConf;
use crate::errors::TxError;
use crate::fee;
use crate::state::{AppState, ValidationPeriod};
use crate::types::{
    ChangeProfileAttachment, DeleteFlipAttachment, IdentityState, OnlineStatusAttachment,
    SignedTransaction, SubmitFlipAttachment, Transaction, TxType,
};

/// Upper bound of flips a single identity may keep published.
pub const MAX_FLIPS: usize = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxValidationMode {
    InBlockTx,
    MempoolTx,
}

pub fn validate_tx(
    app: &AppState,
    signed: &SignedTransaction,
    conf: &ConsensusConf,
    mode: TxValidationMode,
) -> Result<(), TxError> {
    signed.verify()?;
    let sender = signed.from().map_err(|_| TxError::InvalidSignature)?;
    let tx = &signed.payload;

    let epoch = app.state.global_epoch();
    if tx.epoch != epoch {
        return Err(TxError::InvalidEpoch {
            expected: epoch,
            got: tx.epoch,
        });
    }

    let expected_nonce = if app.state.account_epoch(&sender) < epoch {
        1
    } else {
        app.state.nonce(&sender) + 1
    };
    if tx.nonce != expected_nonce {
        return Err(TxError::InvalidNonce {
            expected: expected_nonce,
            got: tx.nonce,
        });
    }

    let fee = fee::calculate_fee(&app.state.fee_per_gas(), tx);
    if mode == TxValidationMode::MempoolTx && !fee.is_zero() && tx.max_fee < fee {
        return Err(TxError::TxFeeTooLow);
    }
    let charged_fee = fee.min(tx.max_fee.clone());
    let cost = tx.amount.add(&tx.tips).add(&charged_fee);
    if app.state.balance(&sender) < cost {
        return Err(TxError::InsufficientFunds);
    }

    match tx.tx_type {
        TxType::Send => validate_send(tx),
        TxType::Invite => validate_invite(app, conf, &sender, tx),
        TxType::Activation => validate_activation(app, &sender, tx),
        TxType::Kill => validate_kill(app, &sender, tx),
        TxType::KillInvitee => validate_kill_invitee(app, &sender, tx),
        TxType::KillDelegator => validate_kill_delegator(app, &sender, tx),
        TxType::OnlineStatus => validate_online_status(app, &sender, tx),
        TxType::Delegate => validate_delegate(app, &sender, tx),
        TxType::Undelegate => validate_undelegate(app, &sender),
        TxType::ReplenishStake => validate_replenish_stake(tx),
        TxType::Burn => validate_burn(tx),
        TxType::DeleteFlip => validate_delete_flip(app, &sender, tx),
        TxType::SubmitFlip => validate_submit_flip(app, &sender, tx),
        TxType::SubmitAnswersHash
        | TxType::SubmitShortAnswers
        | TxType::SubmitLongAnswers
        | TxType::Evidence => validate_ceremony_tx(app, &sender, tx),
        TxType::ChangeProfile => ChangeProfileAttachment::parse(&tx.payload).map(|_| ()),
        TxType::ChangeGodAddress => validate_change_god_address(app, &sender, tx),
        TxType::DeployContract => match tx.to {
            Some(_) => Err(TxError::InvalidRecipient(
                "deployment must not name a recipient".into(),
            )),
            None => Ok(()),
        },
        TxType::CallContract | TxType::TerminateContract => require_recipient(tx).map(|_| ()),
        TxType::StoreToIpfs => Err(TxError::Validation(
            "ipfs transactions are not accepted by the core".into(),
        )),
    }
}

fn require_recipient(tx: &Transaction) -> Result<crate::types::Address, TxError> {
    tx.to
        .ok_or_else(|| TxError::InvalidRecipient("recipient is required".into()))
}

fn require_zero_amount(tx: &Transaction) -> Result<(), TxError> {
    if tx.amount.is_zero() {
        Ok(())
    } else {
        Err(TxError::Validation("amount must be zero".into()))
    }
}

fn validate_send(tx: &Transaction) -> Result<(), TxError> {
    require_recipient(tx).map(|_| ())
}

fn validate_invite(
    app: &AppState,
    conf: &ConsensusConf,
    sender: &crate::types::Address,
    tx: &Transaction,
) -> Result<(), TxError> {
    let to = require_recipient(tx)?;
    if app.state.identity_state(&to) != IdentityState::Undefined {
        return Err(TxError::InvalidRecipient(
            "recipient is already an identity".into(),
        ));
    }
    if *sender == app.state.god_address() {
        let quota = conf.god_address_invites_count(app.validators_cache.network_size());
        if app.state.god_invites_used() >= quota {
            return Err(TxError::InsufficientInvites);
        }
        return Ok(());
    }
    let invites = app
        .state
        .identity(sender)
        .map(|identity| identity.invites)
        .unwrap_or(0);
    if invites == 0 {
        return Err(TxError::InsufficientInvites);
    }
    Ok(())
}

fn validate_activation(
    app: &AppState,
    sender: &crate::types::Address,
    tx: &Transaction,
) -> Result<(), TxError> {
    let to = require_recipient(tx)?;
    require_zero_amount(tx)?;
    if app.state.identity_state(sender) != IdentityState::Invite {
        return Err(TxError::InvalidSender("sender holds no invite".into()));
    }
    if app.state.identity_state(&to) != IdentityState::Undefined {
        return Err(TxError::InvalidRecipient(
            "recipient is already an identity".into(),
        ));
    }
    Ok(())
}

fn validate_kill(
    app: &AppState,
    sender: &crate::types::Address,
    tx: &Transaction,
) -> Result<(), TxError> {
    if tx.to.is_some() {
        return Err(TxError::Validation("recipient must be empty".into()));
    }
    require_zero_amount(tx)?;
    if !app.state.identity_state(sender).killable() {
        return Err(TxError::InvalidSender("identity cannot be killed".into()));
    }
    Ok(())
}

fn validate_kill_invitee(
    app: &AppState,
    sender: &crate::types::Address,
    tx: &Transaction,
) -> Result<(), TxError> {
    let to = require_recipient(tx)?;
    require_zero_amount(tx)?;
    let is_invitee = app
        .state
        .identity(sender)
        .map(|identity| identity.invitees.iter().any(|entry| entry.address == to))
        .unwrap_or(false);
    if !is_invitee {
        return Err(TxError::InvalidRecipient(
            "recipient is not an invitee of the sender".into(),
        ));
    }
    if app.state.identity_state(&to) != IdentityState::Candidate {
        return Err(TxError::InvalidRecipient(
            "only candidate invitees can be killed".into(),
        ));
    }
    Ok(())
}

fn validate_kill_delegator(
    app: &AppState,
    sender: &crate::types::Address,
    tx: &Transaction,
) -> Result<(), TxError> {
    let to = require_recipient(tx)?;
    require_zero_amount(tx)?;
    if app.identity_state.delegatee(&to) != Some(*sender) {
        return Err(TxError::InvalidRecipient(
            "recipient does not delegate to the sender".into(),
        ));
    }
    Ok(())
}

fn validate_online_status(
    app: &AppState,
    sender: &crate::types::Address,
    tx: &Transaction,
) -> Result<(), TxError> {
    let attachment = OnlineStatusAttachment::parse(&tx.payload)?;
    if app.state.has_delayed_penalty(sender) {
        if attachment.online {
            // Requesting online cancels the queued penalty.
            return Ok(());
        }
        return Err(TxError::Validation(
            "offline penalty is already queued".into(),
        ));
    }
    if app.state.has_status_switch(sender) {
        return Err(TxError::Validation(
            "status switch is already pending".into(),
        ));
    }
    if app.identity_state.is_online(sender) == attachment.online {
        return Err(TxError::Validation(
            "identity already has the requested status".into(),
        ));
    }
    Ok(())
}

fn validate_delegate(
    app: &AppState,
    sender: &crate::types::Address,
    tx: &Transaction,
) -> Result<(), TxError> {
    let to = require_recipient(tx)?;
    if to == *sender {
        return Err(TxError::InvalidRecipient(
            "identity cannot delegate to itself".into(),
        ));
    }
    if app.state.delegatee(&to).is_some() {
        return Err(TxError::InvalidRecipient(
            "target is itself a delegator".into(),
        ));
    }
    if app.state.has_pending_delegation(sender) {
        return Err(TxError::Validation("delegation is already pending".into()));
    }
    let identity = app.state.identity(sender);
    let has_delegatee = identity
        .map(|identity| identity.delegatee.is_some())
        .unwrap_or(false);
    let pending_undelegation = identity
        .map(|identity| identity.pending_undelegation.is_some())
        .unwrap_or(false);
    if has_delegatee && !pending_undelegation {
        return Err(TxError::Validation("identity is already delegated".into()));
    }
    Ok(())
}

fn validate_undelegate(app: &AppState, sender: &crate::types::Address) -> Result<(), TxError> {
    if app.state.delegatee(sender).is_none() {
        return Err(TxError::Validation("identity is not delegated".into()));
    }
    if app.state.has_pending_delegation(sender) {
        return Err(TxError::Validation("delegation is already pending".into()));
    }
    Ok(())
}

fn validate_replenish_stake(tx: &Transaction) -> Result<(), TxError> {
    require_recipient(tx)?;
    if tx.amount.is_zero() {
        return Err(TxError::Validation("amount must be positive".into()));
    }
    Ok(())
}

fn validate_burn(tx: &Transaction) -> Result<(), TxError> {
    if tx.amount.is_zero() {
        return Err(TxError::Validation("amount must be positive".into()));
    }
    Ok(())
}

fn validate_delete_flip(
    app: &AppState,
    sender: &crate::types::Address,
    tx: &Transaction,
) -> Result<(), TxError> {
    let attachment = DeleteFlipAttachment::parse(&tx.payload)?;
    let owns_flip = app
        .state
        .identity(sender)
        .map(|identity| identity.has_flip(&attachment.cid))
        .unwrap_or(false);
    if !owns_flip {
        return Err(TxError::Validation("unknown flip".into()));
    }
    Ok(())
}

fn validate_submit_flip(
    app: &AppState,
    sender: &crate::types::Address,
    tx: &Transaction,
) -> Result<(), TxError> {
    let attachment = SubmitFlipAttachment::parse(&tx.payload)?;
    let identity = app.state.identity(sender);
    let flips = identity.map(|identity| identity.flips.len()).unwrap_or(0);
    if flips >= MAX_FLIPS {
        return Err(TxError::QuotaExceeded);
    }
    let duplicate = identity
        .map(|identity| identity.has_flip(&attachment.cid))
        .unwrap_or(false);
    if duplicate {
        return Err(TxError::DuplicatedTx);
    }
    Ok(())
}

fn validate_ceremony_tx(
    app: &AppState,
    sender: &crate::types::Address,
    tx: &Transaction,
) -> Result<(), TxError> {
    let period = app.state.validation_period();
    let allowed = match tx.tx_type {
        TxType::SubmitAnswersHash => matches!(
            period,
            ValidationPeriod::ShortSession | ValidationPeriod::LongSession
        ),
        TxType::SubmitShortAnswers | TxType::SubmitLongAnswers => matches!(
            period,
            ValidationPeriod::LongSession | ValidationPeriod::AfterLong
        ),
        TxType::Evidence => matches!(
            period,
            ValidationPeriod::ShortSession
                | ValidationPeriod::LongSession
                | ValidationPeriod::AfterLong
        ),
        _ => false,
    };
    if !allowed {
        return Err(TxError::Validation("wrong validation period".into()));
    }
    let bit = tx.tx_type.validation_bit().expect("ceremony tx");
    let already = app
        .state
        .identity(sender)
        .map(|identity| identity.validation_txs.contains(bit))
        .unwrap_or(false);
    if already {
        return Err(TxError::DuplicatedTx);
    }
    Ok(())
}

fn validate_change_god_address(
    app: &AppState,
    sender: &crate::types::Address,
    tx: &Transaction,
) -> Result<(), TxError> {
    require_recipient(tx)?;
    if *sender != app.state.god_address() {
        return Err(TxError::InvalidSender(
            "only the god address may be rotated".into(),
        ));
    }
    Ok(())
}
