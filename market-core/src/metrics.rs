use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use std::sync::Arc;

#[derive(Clone)]
pub struct Metrics {
    pub tx_submitted: IntCounterVec,
    pub tx_confirmed: IntCounterVec,
    pub tx_failed: IntCounterVec,
    pub tx_rejected: IntCounter,
    pub inflight_tx: IntGauge,
    pub index_polls: IntCounter,
    pub index_poll_failures: IntCounter,
    pub metadata_failures: IntCounter,
}

impl Metrics {
    pub fn new(registry: &Registry) -> Arc<Self> {
        let tx_submitted = IntCounterVec::new(
            Opts::new("tx_submitted_total", "Transactions submitted"),
            &["kind"],
        )
        .unwrap();
        let tx_confirmed = IntCounterVec::new(
            Opts::new("tx_confirmed_total", "Transactions confirmed"),
            &["kind"],
        )
        .unwrap();
        let tx_failed = IntCounterVec::new(
            Opts::new("tx_failed_total", "Transactions failed"),
            &["kind"],
        )
        .unwrap();
        let tx_rejected =
            IntCounter::with_opts(Opts::new("tx_rejected_total", "Wallet rejections")).unwrap();
        let inflight_tx =
            IntGauge::with_opts(Opts::new("inflight_tx", "Transactions in flight")).unwrap();
        let index_polls =
            IntCounter::with_opts(Opts::new("index_polls_total", "Indexer polls")).unwrap();
        let index_poll_failures = IntCounter::with_opts(Opts::new(
            "index_poll_failures_total",
            "Indexer polls that failed",
        ))
        .unwrap();
        let metadata_failures = IntCounter::with_opts(Opts::new(
            "metadata_failures_total",
            "Metadata lookups that fell back to placeholders",
        ))
        .unwrap();
        registry.register(Box::new(tx_submitted.clone())).ok();
        registry.register(Box::new(tx_confirmed.clone())).ok();
        registry.register(Box::new(tx_failed.clone())).ok();
        registry.register(Box::new(tx_rejected.clone())).ok();
        registry.register(Box::new(inflight_tx.clone())).ok();
        registry.register(Box::new(index_polls.clone())).ok();
        registry.register(Box::new(index_poll_failures.clone())).ok();
        registry.register(Box::new(metadata_failures.clone())).ok();
        Arc::new(Self {
            tx_submitted,
            tx_confirmed,
            tx_failed,
            tx_rejected,
            inflight_tx,
            index_polls,
            index_poll_failures,
            metadata_failures,
        })
    }

    /// Metrics bound to a private registry, for components built without one.
    pub fn unregistered() -> Arc<Self> {
        Self::new(&Registry::new())
    }
}
