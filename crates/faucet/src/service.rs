//! Faucet service core logic
//!
//! [`FaucetService::drip`] runs one request through the pipeline:
//! validate the address, reserve the address and origin cooldowns, submit the
//! transfer, then either keep the reservation (success) or release it
//! (dispatch failure) so the caller is not penalized for a faucet fault.

use crate::address::Address;
use crate::config::DripSettings;
use crate::dispatcher::{SubmittedTransfer, TransactionDispatcher};
use crate::error::{FaucetError, FaucetResult};
use crate::gate::{Admission, CooldownScope, EligibilityGate};
use crate::metrics::{outcome, FaucetMetrics};
use crate::store::{CooldownKey, CooldownStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// One drip request as received
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DripRequest {
    pub address: String,
    pub origin: String,
}

impl DripRequest {
    pub fn new(address: impl Into<String>, origin: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            origin: origin.into(),
        }
    }
}

/// Successful drip
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DripReceipt {
    pub tx_hash: String,
    pub nonce: u64,
}

/// Faucet status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaucetStatus {
    pub address: String,
    pub chain_id: u64,
    pub balance: String,
    pub drip_amount: String,
    pub cooldown_hours: u64,
}

/// Faucet service
pub struct FaucetService {
    settings: DripSettings,
    gate: EligibilityGate,
    dispatcher: TransactionDispatcher,
    metrics: Arc<FaucetMetrics>,
}

impl FaucetService {
    pub fn new(
        settings: DripSettings,
        store: Arc<dyn CooldownStore>,
        dispatcher: TransactionDispatcher,
        metrics: Arc<FaucetMetrics>,
    ) -> Self {
        info!("Faucet address: {}", dispatcher.funding_address());
        Self {
            settings,
            gate: EligibilityGate::new(store),
            dispatcher,
            metrics,
        }
    }

    pub fn settings(&self) -> &DripSettings {
        &self.settings
    }

    pub fn metrics(&self) -> &Arc<FaucetMetrics> {
        &self.metrics
    }

    pub fn store(&self) -> &Arc<dyn CooldownStore> {
        self.gate.store()
    }

    /// Dispense tokens for one request
    pub async fn drip(&self, request: DripRequest) -> FaucetResult<DripReceipt> {
        let result = self.run(&request).await;
        self.metrics.record_outcome(outcome_label(&result));
        result
    }

    async fn run(&self, request: &DripRequest) -> FaucetResult<DripReceipt> {
        // Received -> Validated
        let recipient = self.validate_address(&request.address)?;
        info!("Drip request for {} from {}", recipient, request.origin);

        // Validated -> Reserved
        let admission = self
            .gate
            .try_reserve(
                CooldownKey::address(&recipient),
                CooldownKey::origin(request.origin.clone()),
                self.settings.cooldown,
            )
            .await?;

        let reservation = match admission {
            Admission::Admitted(reservation) => reservation,
            Admission::Denied(denial) => {
                warn!(
                    "{} in cooldown for {} / {}, retry in {:?}",
                    denial.scope.label(),
                    recipient,
                    request.origin,
                    denial.retry_after
                );
                return Err(FaucetError::CooldownActive {
                    scope: denial.scope,
                    retry_after: denial.retry_after,
                    cooldown_hours: self.settings.cooldown_hours,
                });
            }
        };

        // Reserved -> Dispatched
        let started = Instant::now();
        let outcome = self.dispatcher.submit(&recipient, self.settings.amount).await;
        self.metrics.observe_dispatch(started.elapsed().as_secs_f64());

        match outcome {
            // Dispatched -> Committed
            Ok(SubmittedTransfer { tx_hash, nonce }) => {
                reservation.commit();
                info!("Successfully dispensed to {}, tx: {}", recipient, tx_hash);
                Ok(DripReceipt { tx_hash, nonce })
            }
            // Dispatched -> Released
            Err(failure) => {
                warn!("Dispatch to {} failed: {}", recipient, failure);
                if let Err(e) = self.gate.release(reservation).await {
                    error!("Failed to release cooldown for {}: {}", recipient, e);
                }
                Err(FaucetError::Dispatch(failure))
            }
        }
    }

    /// Validate address format
    fn validate_address(&self, input: &str) -> FaucetResult<Address> {
        let address = Address::parse(input)?;
        if address.is_zero() {
            return Err(FaucetError::InvalidAddress("Zero address not allowed".to_string()));
        }
        if address == self.dispatcher.funding_address() {
            return Err(FaucetError::InvalidAddress(
                "Cannot send to faucet address".to_string(),
            ));
        }
        Ok(address)
    }

    /// Get faucet status
    pub async fn get_status(&self) -> FaucetResult<FaucetStatus> {
        let address = self.dispatcher.funding_address();
        let balance = self
            .dispatcher
            .chain()
            .balance(&address)
            .await
            .map_err(|e| FaucetError::Dispatch(e.into()))?;

        Ok(FaucetStatus {
            address: address.to_checksum(),
            chain_id: self.dispatcher.chain_id(),
            balance: balance.to_string(),
            drip_amount: self.settings.amount.as_u128().to_string(),
            cooldown_hours: self.settings.cooldown_hours,
        })
    }

    /// Remove expired cooldown records
    pub async fn cleanup_expired(&self) -> FaucetResult<usize> {
        self.gate.store().purge_expired().await
    }
}

fn outcome_label(result: &FaucetResult<DripReceipt>) -> &'static str {
    match result {
        Ok(_) => outcome::SUCCESS,
        Err(FaucetError::InvalidAddress(_)) => outcome::INVALID_ADDRESS,
        Err(FaucetError::CooldownActive { scope, .. }) => match scope {
            CooldownScope::Address => outcome::ADDRESS_COOLDOWN,
            CooldownScope::Origin => outcome::IP_COOLDOWN,
        },
        Err(FaucetError::Dispatch(_)) => outcome::DISPATCH_FAILED,
        Err(FaucetError::RateLimitExceeded(_)) => outcome::RATE_LIMITED,
        Err(_) => outcome::INTERNAL_ERROR,
    }
}
