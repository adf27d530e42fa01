//! Native-token faucet for EVM test networks
//!
//! This service dispenses a fixed drip with:
//! - Address and IP cooldowns reserved atomically in a durable store
//! - Serialized, nonce-tracked transfers from one funding account
//! - Per-IP request rate limiting
//! - Prometheus metrics

pub mod address;
pub mod api;
pub mod chain;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod gate;
pub mod logging;
pub mod metrics;
pub mod rate_limit;
pub mod service;
pub mod store;
pub mod wallet;

#[cfg(test)]
mod test_utils;

pub use address::Address;
pub use chain::{ChainClient, ChainError, JsonRpcChainClient};
pub use config::{DripSettings, FaucetConfig, Wei};
pub use dispatcher::{DispatchFailure, FailureKind, TransactionDispatcher, TransferOutcome};
pub use error::{FaucetError, FaucetResult};
pub use gate::{Admission, CooldownScope, EligibilityGate, Reservation};
pub use metrics::FaucetMetrics;
pub use service::{DripReceipt, DripRequest, FaucetService, FaucetStatus};
pub use store::{CooldownKey, CooldownStore, SledCooldownStore};
pub use wallet::FundingWallet;
