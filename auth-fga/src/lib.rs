//! Fine-grained authorization client for the account hierarchy
//!
//! This crate translates domain operations into relationship tuples for an
//! OpenFGA-style engine, providing:
//! - Role grants on accounts, workspaces, policies and configurations
//! - Time-boxed grants that lapse without being deleted
//! - Bounded access checks with a tri-state outcome
//! - Enumeration of reachable resources and of users with access,
//!   classified as direct or inherited
//!
//! # Core Concepts
//!
//! - **Principal**: the actor being authorized (`User:<id>`)
//! - **Resource**: Account → Workspace → {Policy, Configuration}
//! - **Role**: admin, editor, reader or reviewer, each mapped to one relation
//! - **Tuple**: "user has relation on object", optionally conditioned
//!
//! # Example
//!
//! ```rust
//! use auth_fga::{AuthorizationService, InMemoryBackend, NeverCancel, Principal, Resource, Role};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = AuthorizationService::new(Arc::new(InMemoryBackend::new()));
//!     let bob = Principal::new("Bob");
//!     let account = Resource::account("2");
//!
//!     // Editor for two seconds
//!     service
//!         .add_user_to(&account, &bob, Role::Editor, Some(Duration::from_secs(2)), &NeverCancel)
//!         .await?;
//!
//!     let decision = service.check_access(&bob, Role::Editor, &account, &NeverCancel).await;
//!     assert!(decision.is_granted());
//!
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod cancel;
pub mod check;
pub mod clock;
pub mod config;
pub mod duration;
pub mod engine;
pub mod error;
pub mod events;
pub mod grant;
pub mod models;
pub mod resources;
pub mod scenario;
pub mod schema;
pub mod throttle;
pub mod users;

pub use backend::{AuthorizationBackend, HttpBackend, InMemoryBackend};
pub use cancel::{CancellationSource, CancellationToken, NeverCancel};
pub use check::AccessChecker;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Credentials, FgaClientConfig};
pub use engine::*;
pub use error::*;
pub use events::{AuthzEvent, AuthzEventSink, RecordingEventSink, TracingEventSink};
pub use grant::GrantWriter;
pub use models::*;
pub use resources::{EnumerationMode, ResourceEnumerator};
pub use scenario::Scenario;
pub use schema::Schema;
pub use throttle::{EngineCall, FixedDelay, MinInterval, NoThrottle, ThrottlePolicy};
pub use users::UserEnumerator;
