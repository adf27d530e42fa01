//! Eligibility gate
//!
//! Admits a request only if neither its address nor its origin is cooling
//! down, and reserves both keys in the same step. Atomicity comes from the
//! store's conditional set; the gate itself keeps no lock.

use crate::error::FaucetResult;
use crate::store::{CooldownKey, CooldownStore};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Which cooldown blocked a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CooldownScope {
    Address,
    Origin,
}

impl CooldownScope {
    pub fn label(&self) -> &'static str {
        match self {
            CooldownScope::Address => "Address",
            CooldownScope::Origin => "IP",
        }
    }
}

/// Both keys held for one in-flight request.
///
/// Must be finalized with [`Reservation::commit`] or
/// [`EligibilityGate::release`].
#[derive(Debug)]
#[must_use = "a reservation must be committed or released"]
pub struct Reservation {
    address: CooldownKey,
    origin: CooldownKey,
}

impl Reservation {
    pub fn origin_key(&self) -> &CooldownKey {
        &self.origin
    }

    /// Keep both records; they expire on their own.
    pub fn commit(self) {
        debug!("Committed reservation for {} / {}", self.address, self.origin);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denial {
    pub scope: CooldownScope,
    pub retry_after: Option<Duration>,
}

#[derive(Debug)]
pub enum Admission {
    Admitted(Reservation),
    Denied(Denial),
}

pub struct EligibilityGate {
    store: Arc<dyn CooldownStore>,
}

impl EligibilityGate {
    pub fn new(store: Arc<dyn CooldownStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn CooldownStore> {
        &self.store
    }

    /// Reserve both keys for `ttl` or report which one is cooling down.
    ///
    /// The address key is tried first, so it wins when both are blocked.
    /// A store error after the address key was taken rolls it back before
    /// the error is returned.
    pub async fn try_reserve(
        &self,
        address: CooldownKey,
        origin: CooldownKey,
        ttl: Duration,
    ) -> FaucetResult<Admission> {
        if !self.store.set_if_absent(&address, ttl).await? {
            return Ok(Admission::Denied(self.denial(CooldownScope::Address, &address).await));
        }

        let origin_taken = match self.store.set_if_absent(&origin, ttl).await {
            Ok(taken) => taken,
            Err(e) => {
                self.rollback(&address).await;
                return Err(e);
            }
        };

        if !origin_taken {
            self.rollback(&address).await;
            return Ok(Admission::Denied(self.denial(CooldownScope::Origin, &origin).await));
        }

        Ok(Admission::Admitted(Reservation { address, origin }))
    }

    /// Drop both keys of a reservation whose transfer did not go out.
    pub async fn release(&self, reservation: Reservation) -> FaucetResult<()> {
        let address = self.store.remove(&reservation.address).await;
        let origin = self.store.remove(&reservation.origin).await;
        debug!("Released reservation for {} / {}", reservation.address, reservation.origin);
        address.and(origin)
    }

    async fn rollback(&self, key: &CooldownKey) {
        if let Err(e) = self.store.remove(key).await {
            error!("Failed to roll back reservation {}: {}", key, e);
        }
    }

    async fn denial(&self, scope: CooldownScope, key: &CooldownKey) -> Denial {
        let retry_after = match self.store.time_remaining(key).await {
            Ok(remaining) => remaining,
            Err(e) => {
                warn!("Could not read remaining cooldown for {}: {}", key, e);
                None
            }
        };
        Denial { scope, retry_after }
    }
}
