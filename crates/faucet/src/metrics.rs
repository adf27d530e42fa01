//! Prometheus metrics for the faucet

use prometheus::{Encoder, Histogram, HistogramOpts, IntCounterVec, Opts, Registry, TextEncoder};

/// Label values for `faucet_drip_requests_total`
pub mod outcome {
    pub const SUCCESS: &str = "success";
    pub const INVALID_ADDRESS: &str = "invalid_address";
    pub const ADDRESS_COOLDOWN: &str = "address_cooldown";
    pub const IP_COOLDOWN: &str = "ip_cooldown";
    pub const DISPATCH_FAILED: &str = "dispatch_failed";
    pub const INTERNAL_ERROR: &str = "internal_error";
    pub const RATE_LIMITED: &str = "rate_limited";
}

pub struct FaucetMetrics {
    registry: Registry,
    drip_requests: IntCounterVec,
    dispatch_duration: Histogram,
}

impl FaucetMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let drip_requests = IntCounterVec::new(
            Opts::new("faucet_drip_requests_total", "Drip requests by outcome"),
            &["outcome"],
        )?;
        let dispatch_duration = Histogram::with_opts(
            HistogramOpts::new(
                "faucet_dispatch_duration_seconds",
                "Time from nonce assignment request to node acknowledgement",
            )
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        )?;

        registry.register(Box::new(drip_requests.clone()))?;
        registry.register(Box::new(dispatch_duration.clone()))?;

        Ok(Self {
            registry,
            drip_requests,
            dispatch_duration,
        })
    }

    pub fn record_outcome(&self, outcome: &str) {
        self.drip_requests.with_label_values(&[outcome]).inc();
    }

    pub fn outcome_count(&self, outcome: &str) -> u64 {
        self.drip_requests.with_label_values(&[outcome]).get()
    }

    pub fn observe_dispatch(&self, seconds: f64) {
        self.dispatch_duration.observe(seconds);
    }

    /// Text exposition format
    pub fn render(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
