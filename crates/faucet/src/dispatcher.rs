//! Transaction dispatcher
//!
//! Sends one native-token transfer per call from the funding account. All
//! submissions go through a single async mutex guarding the next nonce, held
//! from nonce assignment until the node acknowledges (or rejects) the
//! transaction. A rejected submission invalidates the cached nonce so the
//! next one re-reads the account's pending count from the node.

use crate::address::Address;
use crate::chain::{BlockTag, ChainClient, ChainError};
use crate::config::{DripSettings, Wei};
use crate::wallet::{FundingWallet, TransferRequest};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureKind {
    InsufficientFunds,
    NetworkError,
    RejectedByChain,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchFailure {
    pub kind: FailureKind,
    pub detail: String,
}

impl DispatchFailure {
    pub fn new(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for DispatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.detail)
    }
}

impl From<ChainError> for DispatchFailure {
    fn from(error: ChainError) -> Self {
        match error {
            ChainError::InsufficientFunds(msg) => Self::new(FailureKind::InsufficientFunds, msg),
            ChainError::Network(msg) => Self::new(FailureKind::NetworkError, msg),
            ChainError::Rejected(msg) => Self::new(FailureKind::RejectedByChain, msg),
        }
    }
}

/// A transfer the node accepted into its pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmittedTransfer {
    pub tx_hash: String,
    pub nonce: u64,
}

pub type TransferOutcome = Result<SubmittedTransfer, DispatchFailure>;

#[derive(Debug, Clone, Copy)]
pub struct GasSettings {
    pub gas_price: u128,
    pub gas_limit: u64,
}

impl GasSettings {
    pub fn max_fee(&self) -> u128 {
        self.gas_price.saturating_mul(u128::from(self.gas_limit))
    }
}

pub struct TransactionDispatcher {
    chain: Arc<dyn ChainClient>,
    wallet: FundingWallet,
    chain_id: u64,
    gas: GasSettings,
    min_balance: Wei,
    /// next nonce to use; `None` means "ask the node"
    next_nonce: Mutex<Option<u64>>,
}

impl TransactionDispatcher {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        wallet: FundingWallet,
        chain_id: u64,
        settings: &DripSettings,
    ) -> Self {
        Self {
            chain,
            wallet,
            chain_id,
            gas: GasSettings {
                gas_price: settings.gas_price,
                gas_limit: settings.gas_limit,
            },
            min_balance: settings.min_balance,
            next_nonce: Mutex::new(None),
        }
    }

    /// Read the chain id from the node and build the dispatcher.
    pub async fn connect(
        chain: Arc<dyn ChainClient>,
        wallet: FundingWallet,
        settings: &DripSettings,
    ) -> Result<Self, ChainError> {
        let chain_id = chain.chain_id().await?;
        info!("Connected to chain {}", chain_id);
        Ok(Self::new(chain, wallet, chain_id, settings))
    }

    pub fn funding_address(&self) -> Address {
        self.wallet.address()
    }

    pub fn chain(&self) -> &Arc<dyn ChainClient> {
        &self.chain
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub async fn submit(&self, to: &Address, amount: Wei) -> TransferOutcome {
        if amount.is_zero() {
            return Err(DispatchFailure::new(
                FailureKind::RejectedByChain,
                "transfer amount must be positive",
            ));
        }

        self.check_balance(amount).await?;

        let mut next_nonce = self.next_nonce.lock().await;

        let nonce = match *next_nonce {
            Some(nonce) => nonce,
            None => {
                let nonce = self
                    .chain
                    .transaction_count(&self.wallet.address(), BlockTag::Pending)
                    .await?;
                debug!("Synced funding nonce from node: {}", nonce);
                nonce
            }
        };

        let request = TransferRequest {
            nonce,
            gas_price: self.gas.gas_price,
            gas_limit: self.gas.gas_limit,
            to: *to,
            value: amount.as_u128(),
            chain_id: self.chain_id,
        };

        let signed = match self.wallet.sign_transfer(&request) {
            Ok(signed) => signed,
            Err(e) => {
                *next_nonce = None;
                return Err(DispatchFailure::new(FailureKind::RejectedByChain, e.to_string()));
            }
        };

        match self.chain.send_raw_transaction(&signed.raw).await {
            Ok(tx_hash) => {
                *next_nonce = Some(nonce + 1);
                if !tx_hash.eq_ignore_ascii_case(&signed.hash_hex()) {
                    warn!(
                        "Node returned hash {} for transaction {}",
                        tx_hash,
                        signed.hash_hex()
                    );
                }
                info!("Transaction sent: {} (nonce {})", tx_hash, nonce);
                Ok(SubmittedTransfer { tx_hash, nonce })
            }
            Err(e) => {
                // the nonce may or may not have been consumed; let the node decide next time
                *next_nonce = None;
                warn!("Transaction with nonce {} failed: {}", nonce, e);
                Err(e.into())
            }
        }
    }

    /// Best-effort pre-check; the node has the final word.
    async fn check_balance(&self, amount: Wei) -> Result<(), DispatchFailure> {
        let balance = self.chain.balance(&self.wallet.address()).await?;
        let required = amount
            .as_u128()
            .saturating_add(self.gas.max_fee())
            .saturating_add(self.min_balance.as_u128());

        if balance < required {
            warn!("Faucet balance low: {} wei, need {} wei", balance, required);
            return Err(DispatchFailure::new(
                FailureKind::InsufficientFunds,
                format!("balance {} below required {}", balance, required),
            ));
        }

        debug!("Faucet balance: {} wei", balance);
        Ok(())
    }
}
