use crate::models::{AccessDecision, TupleKey};
use parking_lot::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Notable things that happen while talking to the engine
#[derive(Debug, Clone, PartialEq)]
pub enum AuthzEvent {
    GrantWritten { key: TupleKey, expires_in: Option<String> },
    GrantRevoked { key: TupleKey },
    DuplicateGrant { key: TupleKey },
    ParentLinked { key: TupleKey },
    ParentUnlinked { key: TupleKey },
    CheckCompleted { key: TupleKey, decision: AccessDecision },
    CheckTimedOut { key: TupleKey, deadline: Duration },
    CheckFailed { key: TupleKey, error: String },
    AccessClassified { key: TupleKey, is_direct: bool },
}

/// Receives [`AuthzEvent`]s from the components
pub trait AuthzEventSink: Send + Sync {
    fn record(&self, event: AuthzEvent);
}

/// Forwards events to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl AuthzEventSink for TracingEventSink {
    fn record(&self, event: AuthzEvent) {
        match event {
            AuthzEvent::GrantWritten { key, expires_in } => {
                info!(tuple = %key, expires_in = ?expires_in, "Grant written");
            }
            AuthzEvent::GrantRevoked { key } => info!(tuple = %key, "Grant revoked"),
            AuthzEvent::DuplicateGrant { key } => {
                warn!(tuple = %key, "Grant already exists; revoke before granting again");
            }
            AuthzEvent::ParentLinked { key } => info!(tuple = %key, "Parent linked"),
            AuthzEvent::ParentUnlinked { key } => info!(tuple = %key, "Parent unlinked"),
            AuthzEvent::CheckCompleted { key, decision } => {
                debug!(tuple = %key, %decision, "Access check completed");
            }
            AuthzEvent::CheckTimedOut { key, deadline } => {
                let deadline_ms = deadline.as_millis() as u64;
                warn!(tuple = %key, deadline_ms, "Access check timed out");
            }
            AuthzEvent::CheckFailed { key, error } => {
                warn!(tuple = %key, error = %error, "Access check failed");
            }
            AuthzEvent::AccessClassified { key, is_direct } => {
                debug!(tuple = %key, is_direct, "Access classified");
            }
        }
    }
}

/// Keeps every event in memory
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<AuthzEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuthzEvent> {
        self.events.lock().clone()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl AuthzEventSink for RecordingEventSink {
    fn record(&self, event: AuthzEvent) {
        self.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Principal, Resource, Role};

    #[test]
    fn test_recording_sink_keeps_order() {
        let sink = RecordingEventSink::new();
        let key = TupleKey::grant(&Principal::new("Bob"), Role::Editor, &Resource::account("2"));

        sink.record(AuthzEvent::GrantWritten {
            key: key.clone(),
            expires_in: Some("2s".to_string()),
        });
        sink.record(AuthzEvent::GrantRevoked { key: key.clone() });

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1], AuthzEvent::GrantRevoked { key });

        sink.clear();
        assert!(sink.events().is_empty());
    }
}
