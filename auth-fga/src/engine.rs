use crate::{
    backend::AuthorizationBackend,
    cancel::{run_cancellable, CancellationToken},
    check::{AccessChecker, DEFAULT_CHECK_DEADLINE},
    clock::{Clock, SystemClock},
    config::FgaClientConfig,
    error::Result,
    events::{AuthzEvent, AuthzEventSink, TracingEventSink},
    grant::GrantWriter,
    models::*,
    resources::{EnumerationMode, ResourceEnumerator},
    throttle::{EngineCall, NoThrottle, ThrottlePolicy},
    users::UserEnumerator,
};
use std::sync::Arc;
use std::time::Duration;

/// Collaborators shared by every component
#[derive(Clone)]
pub struct EngineContext {
    pub backend: Arc<dyn AuthorizationBackend>,
    pub events: Arc<dyn AuthzEventSink>,
    pub throttle: Arc<dyn ThrottlePolicy>,
    pub clock: Arc<dyn Clock>,
}

impl EngineContext {
    pub fn new(backend: Arc<dyn AuthorizationBackend>) -> Self {
        Self {
            backend,
            events: Arc::new(TracingEventSink),
            throttle: Arc::new(NoThrottle),
            clock: Arc::new(SystemClock),
        }
    }

    /// Evaluation context stamped with the current time
    pub fn evaluation_context(&self) -> Context {
        current_time_context(self.clock.now())
    }

    /// Whether the engine stores exactly `key`, i.e. the access is direct
    pub(crate) async fn has_exact_tuple(
        &self,
        key: TupleKey,
        cancel: &dyn CancellationToken,
    ) -> Result<bool> {
        let tuples = run_cancellable(cancel, async {
            self.throttle.acquire(EngineCall::Read).await;
            self.backend.read(ReadFilter::exact(&key)).await
        })
        .await?;

        let is_direct = tuples.iter().any(|tuple| tuple.key == key);
        self.events.record(AuthzEvent::AccessClassified { key, is_direct });
        Ok(is_direct)
    }
}

/// Client-side authorization service over a relationship-tuple engine
pub struct AuthorizationService {
    context: EngineContext,

    /// Deadline for access checks
    check_deadline: Duration,

    /// Role search strategy for resource enumeration
    enumeration_mode: EnumerationMode,
}

impl AuthorizationService {
    pub fn new(backend: Arc<dyn AuthorizationBackend>) -> Self {
        Self {
            context: EngineContext::new(backend),
            check_deadline: DEFAULT_CHECK_DEADLINE,
            enumeration_mode: EnumerationMode::default(),
        }
    }

    /// Service talking to the engine described by `config`
    pub fn from_config(config: &FgaClientConfig) -> Result<Self> {
        let backend = crate::backend::HttpBackend::new(config)?;
        Ok(Self::new(Arc::new(backend)).with_check_deadline(config.check_deadline()))
    }

    pub fn with_events(mut self, events: Arc<dyn AuthzEventSink>) -> Self {
        self.context.events = events;
        self
    }

    pub fn with_throttle(mut self, throttle: Arc<dyn ThrottlePolicy>) -> Self {
        self.context.throttle = throttle;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.context.clock = clock;
        self
    }

    pub fn with_check_deadline(mut self, deadline: Duration) -> Self {
        self.check_deadline = deadline;
        self
    }

    pub fn with_enumeration_mode(mut self, mode: EnumerationMode) -> Self {
        self.enumeration_mode = mode;
        self
    }

    pub fn context(&self) -> &EngineContext {
        &self.context
    }

    pub fn grants(&self) -> GrantWriter {
        GrantWriter::new(self.context.clone())
    }

    pub fn checker(&self) -> AccessChecker {
        AccessChecker::new(self.context.clone()).with_deadline(self.check_deadline)
    }

    pub fn resources(&self) -> ResourceEnumerator {
        ResourceEnumerator::new(self.context.clone()).with_mode(self.enumeration_mode)
    }

    pub fn users(&self) -> UserEnumerator {
        UserEnumerator::new(self.context.clone())
    }

    // =============================================================================
    // Grants
    // =============================================================================

    /// Grant `role` on `resource`, optionally for a limited time
    pub async fn add_user_to(
        &self,
        resource: &Resource,
        principal: &Principal,
        role: Role,
        duration: Option<Duration>,
        cancel: &dyn CancellationToken,
    ) -> Result<()> {
        self.grants().grant(principal, role, resource, duration, cancel).await
    }

    pub async fn remove_user_from(
        &self,
        resource: &Resource,
        principal: &Principal,
        role: Role,
        cancel: &dyn CancellationToken,
    ) -> Result<()> {
        self.grants().revoke(principal, role, resource, cancel).await
    }

    pub async fn add_account_owner(
        &self,
        account: &Resource,
        owner: &Principal,
        cancel: &dyn CancellationToken,
    ) -> Result<()> {
        self.grants().add_account_owner(account, owner, cancel).await
    }

    pub async fn remove_account_owner(
        &self,
        account: &Resource,
        owner: &Principal,
        cancel: &dyn CancellationToken,
    ) -> Result<()> {
        self.grants().remove_account_owner(account, owner, cancel).await
    }

    pub async fn link_parent(
        &self,
        child: &Resource,
        parent: &Resource,
        cancel: &dyn CancellationToken,
    ) -> Result<()> {
        self.grants().link_parent(child, parent, cancel).await
    }

    pub async fn unlink_parent(
        &self,
        child: &Resource,
        parent: &Resource,
        cancel: &dyn CancellationToken,
    ) -> Result<()> {
        self.grants().unlink_parent(child, parent, cancel).await
    }

    // =============================================================================
    // Checks and enumeration
    // =============================================================================

    pub async fn check_access(
        &self,
        principal: &Principal,
        role: Role,
        resource: &Resource,
        cancel: &dyn CancellationToken,
    ) -> AccessDecision {
        self.checker().check(principal, role, resource, cancel).await
    }

    pub async fn list_resources_for_user(
        &self,
        principal: &Principal,
        cancel: &dyn CancellationToken,
    ) -> Result<Vec<ResourceAccess>> {
        self.resources().for_principal(principal, cancel).await
    }

    pub async fn list_resources_for_user_by_type(
        &self,
        principal: &Principal,
        object_type: ObjectType,
        cancel: &dyn CancellationToken,
    ) -> Result<Vec<ResourceAccess>> {
        self.resources()
            .for_principal_by_type(principal, object_type, cancel)
            .await
    }

    pub async fn list_users_with_access(
        &self,
        resource: &Resource,
        cancel: &dyn CancellationToken,
    ) -> Result<Vec<UserAccess>> {
        self.users().for_resource(resource, cancel).await
    }

    pub async fn tuples_for_resource(
        &self,
        resource: &Resource,
        cancel: &dyn CancellationToken,
    ) -> Result<Vec<StoredTuple>> {
        self.users().tuples_for_resource(resource, cancel).await
    }
}
