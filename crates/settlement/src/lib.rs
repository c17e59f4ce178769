//! Dropwell Settlement
//!
//! Client side of the chain boundary: the [`SettlementTool`] and
//! [`BalanceQuery`] traits the workflow engine drives, deposit and batching
//! arithmetic, and concrete backends.
//!
//! This crate does NOT construct or sign transactions itself; it delegates to
//! an external tool ([`CardanoCli`]) or records calls ([`DryRunTool`]).

pub mod balance;
pub mod cli;
pub mod dryrun;
pub mod error;
pub mod payout;
pub mod tool;

pub use balance::{BalanceError, BalanceQuery, BlockfrostBalance, BLOCKFROST_MAINNET};
pub use cli::{CardanoCli, CardanoCliConfig, Network};
pub use dryrun::{DryRunSubmission, DryRunTool};
pub use error::{SettlementError, SettlementStep};
pub use payout::*;
pub use tool::{settle, SettlementTool, SubmitReceipt, TxArtifact, TxOutput};
