//! Pacing of engine calls.
//!
//! Hosted engines enforce per-store rate limits. Callers pick a policy;
//! the components only ask it for permission before each call.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Engine operation about to be issued
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineCall {
    Write,
    Delete,
    Check,
    ListObjects,
    ListUsers,
    Read,
}

/// Asked for permission before every engine call
///
/// The wait is raced against the operation's cancel token, and for checks
/// it counts against the check deadline.
#[async_trait]
pub trait ThrottlePolicy: Send + Sync {
    /// Waits until `call` may be issued
    async fn acquire(&self, call: EngineCall);
}

/// Issues every call immediately
#[derive(Debug, Default, Clone, Copy)]
pub struct NoThrottle;

#[async_trait]
impl ThrottlePolicy for NoThrottle {
    async fn acquire(&self, _call: EngineCall) {}
}

/// Sleeps a fixed time before selected call kinds
#[derive(Debug, Clone, Default)]
pub struct FixedDelay {
    delays: HashMap<EngineCall, Duration>,
}

impl FixedDelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, call: EngineCall, delay: Duration) -> Self {
        self.delays.insert(call, delay);
        self
    }

    /// Delays tuned for the hosted free tier
    pub fn courtesy() -> Self {
        Self::new()
            .with_delay(EngineCall::ListObjects, Duration::from_millis(250))
            .with_delay(EngineCall::Read, Duration::from_millis(200))
            .with_delay(EngineCall::Check, Duration::from_millis(100))
    }
}

#[async_trait]
impl ThrottlePolicy for FixedDelay {
    async fn acquire(&self, call: EngineCall) {
        if let Some(delay) = self.delays.get(&call) {
            tokio::time::sleep(*delay).await;
        }
    }
}

/// Spaces calls at least `interval` apart, across all in-flight operations
#[derive(Debug)]
pub struct MinInterval {
    interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl MinInterval {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_slot: Mutex::new(None),
        }
    }

    /// Limit expressed as calls per second
    pub fn per_second(calls: u32) -> Self {
        Self::new(Duration::from_secs(1) / calls.max(1))
    }
}

#[async_trait]
impl ThrottlePolicy for MinInterval {
    async fn acquire(&self, _call: EngineCall) {
        let slot = {
            let mut next_slot = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = next_slot.map_or(now, |next| next.max(now));
            *next_slot = Some(slot + self.interval);
            slot
        };
        tokio::time::sleep_until(slot).await;
    }
}
