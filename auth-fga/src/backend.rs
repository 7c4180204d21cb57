use crate::{
    error::{FgaError, Result},
    models::*,
    schema::{evaluate_condition, Schema},
};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub mod http;

pub use http::HttpBackend;

/// The relationship-tuple engine, reduced to the operations this layer uses
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuthorizationBackend: Send + Sync {
    /// Write tuples; fails with `DuplicateGrant` if any key is already stored
    async fn write(&self, writes: Vec<TupleWrite>) -> Result<()>;

    /// Delete tuples; fails with `NotFound` if any key is missing
    async fn delete(&self, deletes: Vec<TupleKey>) -> Result<()>;

    /// Evaluate whether `key.user` has `key.relation` on `key.object`
    async fn check(&self, key: TupleKey, context: Option<Context>) -> Result<bool>;

    /// Objects of `object_type` on which `user` has `relation`
    async fn list_objects(
        &self,
        user: ObjectRef,
        relation: String,
        object_type: ObjectType,
        context: Option<Context>,
    ) -> Result<Vec<ObjectRef>>;

    /// Users of type `user_type` holding `relation` on `object`
    async fn list_users(
        &self,
        object: ObjectRef,
        relation: String,
        user_type: ObjectType,
        context: Option<Context>,
    ) -> Result<Vec<ObjectRef>>;

    /// Stored tuples matching the filter, regardless of condition state
    async fn read(&self, filter: ReadFilter) -> Result<Vec<StoredTuple>>;
}

const MAX_DEPTH: u32 = 10;

/// In-memory engine for tests and local development
pub struct InMemoryBackend {
    tuples: Arc<DashMap<TupleKey, StoredTuple>>,
    schema: Arc<Schema>,
    latency: Option<Duration>,
    unavailable: AtomicBool,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            tuples: Arc::new(DashMap::new()),
            schema: Arc::new(Schema::default()),
            latency: None,
            unavailable: AtomicBool::new(false),
        }
    }

    pub fn with_schema(mut self, schema: Schema) -> Self {
        self.schema = Arc::new(schema);
        self
    }

    /// Delay every response by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make every call fail as if the engine were down
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.tuples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }

    async fn round_trip(&self) -> Result<()> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(FgaError::EngineUnavailable("in-memory engine is offline".to_string()));
        }
        Ok(())
    }

    fn holds(
        &self,
        user: &str,
        relation: &str,
        object: &ObjectRef,
        context: &Context,
        visited: &mut HashSet<(String, String)>,
        depth: u32,
    ) -> Result<bool> {
        if depth > MAX_DEPTH {
            return Ok(false);
        }
        if !visited.insert((relation.to_string(), object.to_string())) {
            return Ok(false);
        }
        let Some(definition) = self.schema.relation(object.object_type, relation) else {
            return Ok(false);
        };

        // 1. Direct tuple, honoring its condition
        let key = TupleKey {
            user: user.to_string(),
            relation: relation.to_string(),
            object: object.to_string(),
        };
        let condition = self.tuples.get(&key).map(|stored| stored.condition.clone());
        match condition {
            Some(None) => return Ok(true),
            Some(Some(condition)) => {
                if evaluate_condition(&condition, context)? {
                    return Ok(true);
                }
            }
            None => {}
        }

        // 2. Stronger relations on the same object
        for implied in &definition.implied_by {
            if self.holds(user, implied, object, context, visited, depth + 1)? {
                return Ok(true);
            }
        }

        // 3. Same relation on the parent
        if definition.from_parent {
            for parent in self.parents_of(object) {
                if self.holds(user, relation, &parent, context, visited, depth + 1)? {
                    return Ok(true);
                }
            }
        }

        Ok(false)
    }

    fn evaluate(
        &self,
        user: &str,
        relation: &str,
        object: &ObjectRef,
        context: &Context,
    ) -> Result<bool> {
        let mut visited = HashSet::new();
        self.holds(user, relation, object, context, &mut visited, 0)
    }

    /// Listing queries reject relations the model lacks, as the hosted engine does
    fn ensure_relation(&self, object_type: ObjectType, relation: &str) -> Result<()> {
        match self.schema.relation(object_type, relation) {
            Some(_) => Ok(()),
            None => Err(FgaError::UndefinedRelation {
                message: format!("relation '{}#{}' not found", object_type, relation),
            }),
        }
    }

    fn parents_of(&self, object: &ObjectRef) -> Vec<ObjectRef> {
        let object = object.to_string();
        self.tuples
            .iter()
            .filter(|entry| entry.key().relation == PARENT_RELATION && entry.key().object == object)
            .filter_map(|entry| entry.key().user.parse().ok())
            .collect()
    }

    /// Every object of `object_type` the store knows about
    fn known_objects(&self, object_type: ObjectType) -> BTreeSet<String> {
        let mut known = BTreeSet::new();
        for entry in self.tuples.iter() {
            for candidate in [&entry.key().user, &entry.key().object] {
                if let Ok(object) = candidate.parse::<ObjectRef>() {
                    if object.object_type == object_type {
                        known.insert(object.id);
                    }
                }
            }
        }
        known
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuthorizationBackend for InMemoryBackend {
    async fn write(&self, writes: Vec<TupleWrite>) -> Result<()> {
        self.round_trip().await?;

        let mut batch = HashSet::new();
        for write in &writes {
            self.schema.validate_write(write)?;
            if self.tuples.contains_key(&write.key) || !batch.insert(&write.key) {
                return Err(FgaError::DuplicateGrant {
                    key: write.key.to_string(),
                });
            }
        }

        let timestamp = Utc::now();
        for write in writes {
            debug!("Storing tuple: {}", write.key);
            self.tuples.insert(write.key.clone(), StoredTuple {
                key: write.key,
                condition: write.condition,
                timestamp: Some(timestamp),
            });
        }
        Ok(())
    }

    async fn delete(&self, deletes: Vec<TupleKey>) -> Result<()> {
        self.round_trip().await?;

        if let Some(missing) = deletes.iter().find(|key| !self.tuples.contains_key(*key)) {
            return Err(FgaError::NotFound {
                key: missing.to_string(),
            });
        }
        for key in deletes {
            self.tuples.remove(&key);
        }
        Ok(())
    }

    async fn check(&self, key: TupleKey, context: Option<Context>) -> Result<bool> {
        self.round_trip().await?;

        let object: ObjectRef = key.object.parse()?;
        self.evaluate(&key.user, &key.relation, &object, &context.unwrap_or_default())
    }

    async fn list_objects(
        &self,
        user: ObjectRef,
        relation: String,
        object_type: ObjectType,
        context: Option<Context>,
    ) -> Result<Vec<ObjectRef>> {
        self.round_trip().await?;
        self.ensure_relation(object_type, &relation)?;

        let user = user.to_string();
        let context = context.unwrap_or_default();
        let mut objects = Vec::new();
        for id in self.known_objects(object_type) {
            let object = ObjectRef { object_type, id };
            if self.evaluate(&user, &relation, &object, &context)? {
                objects.push(object);
            }
        }
        Ok(objects)
    }

    async fn list_users(
        &self,
        object: ObjectRef,
        relation: String,
        user_type: ObjectType,
        context: Option<Context>,
    ) -> Result<Vec<ObjectRef>> {
        self.round_trip().await?;
        self.ensure_relation(object.object_type, &relation)?;

        let context = context.unwrap_or_default();
        let mut users = Vec::new();
        for id in self.known_objects(user_type) {
            let user = ObjectRef { object_type: user_type, id };
            if self.evaluate(&user.to_string(), &relation, &object, &context)? {
                users.push(user);
            }
        }
        Ok(users)
    }

    async fn read(&self, filter: ReadFilter) -> Result<Vec<StoredTuple>> {
        self.round_trip().await?;

        let mut tuples: Vec<StoredTuple> = self
            .tuples
            .iter()
            .filter(|entry| filter.matches(entry.key()))
            .map(|entry| entry.value().clone())
            .collect();
        tuples.sort_by(|a, b| {
            (&a.key.object, &a.key.relation, &a.key.user)
                .cmp(&(&b.key.object, &b.key.relation, &b.key.user))
        });
        Ok(tuples)
    }
}
