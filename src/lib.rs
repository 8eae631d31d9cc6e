//! Deterministic core of an identity-based proof-of-person chain.
//!
//! The crate re-exports the block-application engine and its supporting
//! modules through a single entry point. `chain` drives block application and
//! orchestrates the penalty, delegation and epoch machinery; `state`
//! encapsulates the versioned application state and the derived validator
//! cache; `rewards` and `epoch` implement the epoch-close economics.
//! `validation` and `mempool` cover transaction admission, and `storage` the
//! persistent layout. Everything that can fork the chain lives behind typed
//! setters and fixed iteration orders; collaborators such as the BFT engine,
//! the flip blob store and the contract VM stay outside this crate and are
//! reached through narrow traits.
//!
//! Applications typically depend on [`config::NodeConfig`] to bootstrap,
//! [`chain::Blockchain`] to apply blocks, and [`mempool::TxPool`] to admit
//! transactions.

pub mod chain;
pub mod collector;
pub mod config;
pub mod crypto;
pub mod epoch;
pub mod errors;
pub mod fee;
pub mod mempool;
pub mod num;
pub mod rewards;
pub mod state;
pub mod storage;
pub mod types;
pub mod validation;
