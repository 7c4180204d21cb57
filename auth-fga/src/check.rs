use crate::{
    cancel::CancellationToken,
    engine::EngineContext,
    events::AuthzEvent,
    models::*,
    throttle::EngineCall,
};
use std::time::Duration;
use tracing::debug;

/// Deadline applied when none is configured
pub const DEFAULT_CHECK_DEADLINE: Duration = Duration::from_secs(10);

/// Bounded access checks against the engine
///
/// A check never fails: timeouts, engine errors and cancellation all
/// collapse into [`AccessDecision::Unknown`] and are reported through the
/// event sink. `Unknown` means no decision could be made, not a denial;
/// whether to fail open or closed on it is the caller's policy.
pub struct AccessChecker {
    ctx: EngineContext,
    deadline: Duration,
}

impl AccessChecker {
    pub fn new(ctx: EngineContext) -> Self {
        Self {
            ctx,
            deadline: DEFAULT_CHECK_DEADLINE,
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Does `principal` hold `role` on `resource` right now
    pub async fn check(
        &self,
        principal: &Principal,
        role: Role,
        resource: &Resource,
        cancel: &dyn CancellationToken,
    ) -> AccessDecision {
        self.check_with_deadline(principal, role, resource, self.deadline, cancel)
            .await
    }

    pub async fn check_with_deadline(
        &self,
        principal: &Principal,
        role: Role,
        resource: &Resource,
        deadline: Duration,
        cancel: &dyn CancellationToken,
    ) -> AccessDecision {
        let key = TupleKey::grant(principal, role, resource);
        debug!("Checking: {}", key);

        if cancel.is_cancelled() {
            return self.failed(key, "cancelled");
        }

        // the deadline covers the throttle wait as well as the round trip
        let checked = key.clone();
        let request = async move {
            self.ctx.throttle.acquire(EngineCall::Check).await;
            // current_time drives expiry of time-boxed grants
            let context = self.ctx.evaluation_context();
            self.ctx.backend.check(checked, Some(context)).await
        };

        tokio::select! {
            biased;
            () = cancel.cancelled() => self.failed(key, "cancelled"),
            outcome = tokio::time::timeout(deadline, request) => match outcome {
                Ok(Ok(allowed)) => {
                    let decision = AccessDecision::from(allowed);
                    self.ctx.events.record(AuthzEvent::CheckCompleted { key, decision });
                    decision
                }
                Ok(Err(e)) => self.failed(key, &e.to_string()),
                Err(_) => {
                    self.ctx.events.record(AuthzEvent::CheckTimedOut { key, deadline });
                    AccessDecision::Unknown
                }
            },
        }
    }

    fn failed(&self, key: TupleKey, error: &str) -> AccessDecision {
        self.ctx.events.record(AuthzEvent::CheckFailed {
            key,
            error: error.to_string(),
        });
        AccessDecision::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockAuthorizationBackend;
    use crate::cancel::{CancellationSource, NeverCancel};
    use crate::clock::ManualClock;
    use crate::error::FgaError;
    use crate::events::RecordingEventSink;
    use crate::throttle::ThrottlePolicy;
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    fn checker(mock: MockAuthorizationBackend) -> (AccessChecker, Arc<RecordingEventSink>) {
        let events = Arc::new(RecordingEventSink::new());
        let mut ctx = EngineContext::new(Arc::new(mock));
        ctx.events = events.clone();
        ctx.clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 5).unwrap()));
        (AccessChecker::new(ctx), events)
    }

    fn bob() -> Principal {
        Principal::new("Bob")
    }

    #[tokio::test]
    async fn test_check_sends_current_time() {
        let mut mock = MockAuthorizationBackend::new();
        mock.expect_check()
            .withf(|key, context| {
                key.to_string() == "User:Bob reader Workspace:1"
                    && context.as_ref().map(|c| c[CURRENT_TIME_KEY] == "2024-05-01T10:00:05.000Z")
                        == Some(true)
            })
            .times(1)
            .returning(|_, _| Ok(true));

        let (checker, events) = checker(mock);
        let decision = checker
            .check(&bob(), Role::Reader, &Resource::workspace("1"), &NeverCancel)
            .await;

        assert_eq!(decision, AccessDecision::Granted);
        assert!(matches!(
            events.events().as_slice(),
            [AuthzEvent::CheckCompleted { decision: AccessDecision::Granted, .. }]
        ));
    }

    #[tokio::test]
    async fn test_denied() {
        let mut mock = MockAuthorizationBackend::new();
        mock.expect_check().returning(|_, _| Ok(false));

        let (checker, _) = checker(mock);
        let decision = checker
            .check(&bob(), Role::Admin, &Resource::account("2"), &NeverCancel)
            .await;
        assert_eq!(decision, AccessDecision::Denied);
    }

    #[tokio::test]
    async fn test_engine_error_is_unknown() {
        let mut mock = MockAuthorizationBackend::new();
        mock.expect_check()
            .returning(|_, _| Err(FgaError::EngineUnavailable("connection refused".to_string())));

        let (checker, events) = checker(mock);
        let decision = checker
            .check(&bob(), Role::Editor, &Resource::account("1"), &NeverCancel)
            .await;

        assert_eq!(decision, AccessDecision::Unknown);
        assert!(matches!(
            events.events().as_slice(),
            [AuthzEvent::CheckFailed { error, .. }] if error.contains("connection refused")
        ));
    }

    #[tokio::test]
    async fn test_cancelled_check_is_unknown() {
        let (checker, events) = checker(MockAuthorizationBackend::new());
        let cancel = CancellationSource::new();
        cancel.cancel();

        let decision = checker
            .check(&bob(), Role::Reader, &Resource::account("1"), &cancel)
            .await;
        assert_eq!(decision, AccessDecision::Unknown);
        assert_eq!(events.events().len(), 1);
    }

    /// Holds every call back until the test ends
    struct Saturated;

    #[async_trait::async_trait]
    impl ThrottlePolicy for Saturated {
        async fn acquire(&self, _call: EngineCall) {
            futures::future::pending::<()>().await;
        }
    }

    fn saturated_checker() -> (AccessChecker, Arc<RecordingEventSink>) {
        // no expectations: the engine must never be reached
        let (checker, events) = checker(MockAuthorizationBackend::new());
        let mut ctx = checker.ctx;
        ctx.throttle = Arc::new(Saturated);
        (AccessChecker::new(ctx), events)
    }

    #[tokio::test]
    async fn test_throttle_wait_counts_against_deadline() {
        let (checker, events) = saturated_checker();
        let decision = checker
            .check_with_deadline(
                &bob(),
                Role::Reader,
                &Resource::account("1"),
                Duration::from_millis(20),
                &NeverCancel,
            )
            .await;

        assert_eq!(decision, AccessDecision::Unknown);
        assert!(matches!(events.events().as_slice(), [AuthzEvent::CheckTimedOut { .. }]));
    }

    #[tokio::test]
    async fn test_cancel_interrupts_throttle_wait() {
        let (checker, events) = saturated_checker();
        let cancel = CancellationSource::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let decision = checker
            .check_with_deadline(
                &bob(),
                Role::Reader,
                &Resource::account("1"),
                Duration::from_secs(30),
                &cancel,
            )
            .await;

        assert_eq!(decision, AccessDecision::Unknown);
        assert!(matches!(
            events.events().as_slice(),
            [AuthzEvent::CheckFailed { error, .. }] if error == "cancelled"
        ));
    }

    #[test]
    fn test_default_deadline() {
        let (checker, _) = checker(MockAuthorizationBackend::new());
        assert_eq!(checker.deadline(), Duration::from_secs(10));
        assert_eq!(
            checker.with_deadline(Duration::from_millis(500)).deadline(),
            Duration::from_millis(500)
        );
    }
}
