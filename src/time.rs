use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{
    fmt::Debug,
    sync::atomic::{AtomicI64, Ordering},
    time::Duration,
};

#[async_trait]
pub trait TimeProvider: Send + Sync + Debug {
    /// Current time as a Unix UTC timestamp.
    fn now(&self) -> i64;
    async fn sleep(&self, duration: Duration);
}

pub fn utc_from_ts(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_else(Utc::now)
}

#[derive(Debug)]
pub struct RealTimeProvider;

#[async_trait]
impl TimeProvider for RealTimeProvider {
    fn now(&self) -> i64 {
        Utc::now().timestamp()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Fixed, manually advanced clock for tests.
#[derive(Debug)]
pub struct MockTimeProvider {
    current_time: AtomicI64,
}

impl MockTimeProvider {
    pub fn new(start_time: i64) -> Self {
        Self { current_time: AtomicI64::new(start_time) }
    }

    pub fn set(&self, new_time: i64) {
        self.current_time.store(new_time, Ordering::SeqCst);
    }

    pub fn advance(&self, seconds: i64) {
        self.current_time.fetch_add(seconds, Ordering::SeqCst);
    }
}

#[async_trait]
impl TimeProvider for MockTimeProvider {
    fn now(&self) -> i64 {
        self.current_time.load(Ordering::SeqCst)
    }

    async fn sleep(&self, _duration: Duration) {}
}
