use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::blob::BlobStore;
use crate::config::Args;
use crate::ledger::TagLedger;
use crate::rate_limit::SlidingWindowLimiter;
use crate::store::{DocumentStore, RetryPolicy};

// app's shared state
pub struct AppState {
    pub config: Args,
    pub products: HashSet<String>,
    pub store: Arc<dyn DocumentStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub ledger: TagLedger,
    pub tx_policy: RetryPolicy,
    pub limiter: SlidingWindowLimiter, // one map for every client, lives as long as the process
    pub request_timeout: Duration,
}

impl AppState {
    pub fn new(config: Args, store: Arc<dyn DocumentStore>, blobs: Arc<dyn BlobStore>) -> Arc<Self> {
        let policy = RetryPolicy {
            max_attempts: config.tx_max_attempts.max(1),
            ..RetryPolicy::default()
        };

        Arc::new(Self {
            products: config.product_list().into_iter().collect(),
            ledger: TagLedger::new(Arc::clone(&store), policy),
            tx_policy: policy,
            limiter: SlidingWindowLimiter::new(config.rate_limit, config.rate_window()),
            request_timeout: config.request_timeout(),
            store,
            blobs,
            config,
        })
    }

    /// Deadline for work started now on behalf of the current request.
    pub fn deadline(&self) -> tokio::time::Instant {
        tokio::time::Instant::now() + self.request_timeout
    }
}
