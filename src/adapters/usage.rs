//! Usage tracker adapter (spec.md §4.6 "Usage tracker")
//!
//! Write-only counter sink. Values are capped per request before being
//! recorded so a single misbehaving session cannot inflate aggregate usage.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

#[async_trait]
pub trait UsageSink: Send + Sync {
    async fn record_chars(&self, n: u64);
}

pub struct CappedUsageSink {
    max_per_request: u64,
    total: Arc<AtomicU64>,
}

impl CappedUsageSink {
    pub fn new(max_per_request: u64) -> Self {
        Self {
            max_per_request,
            total: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl UsageSink for CappedUsageSink {
    async fn record_chars(&self, n: u64) {
        let capped = n.min(self.max_per_request);
        self.total.fetch_add(capped, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn caps_individual_contributions() {
        let sink = CappedUsageSink::new(1000);
        sink.record_chars(5000).await;
        sink.record_chars(10).await;
        assert_eq!(sink.total(), 1010);
    }
}
