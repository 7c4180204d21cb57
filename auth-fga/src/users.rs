use crate::{
    cancel::{run_cancellable, CancellationToken},
    engine::EngineContext,
    error::{FgaError, Result},
    models::*,
    throttle::EngineCall,
};
use futures::future::try_join_all;
use tracing::debug;

/// Relations probed when listing who can reach a resource
pub const DEFAULT_USER_RELATIONS: [&str; 4] = ["admin", "writer", "reader", "reviewer"];

/// Lists the principals that can reach a resource
pub struct UserEnumerator {
    ctx: EngineContext,
    relations: Vec<String>,
}

impl UserEnumerator {
    pub fn new(ctx: EngineContext) -> Self {
        Self {
            ctx,
            relations: DEFAULT_USER_RELATIONS.iter().map(|r| r.to_string()).collect(),
        }
    }

    /// Replace the probed relation set, e.g. to include `editor`
    pub fn with_relations<I, S>(mut self, relations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.relations = relations.into_iter().map(Into::into).collect();
        self
    }

    pub fn relations(&self) -> &[String] {
        &self.relations
    }

    /// Every user holding one of the probed relations on `resource`
    ///
    /// A user appears once per relation they hold. Relations the resource
    /// type does not define contribute nothing, whether the engine answers
    /// with an empty list or rejects the relation.
    pub async fn for_resource(
        &self,
        resource: &Resource,
        cancel: &dyn CancellationToken,
    ) -> Result<Vec<UserAccess>> {
        let object = resource.object_ref();
        let mut found = Vec::new();

        for relation in &self.relations {
            let context = self.ctx.evaluation_context();
            let listed = run_cancellable(cancel, async {
                self.ctx.throttle.acquire(EngineCall::ListUsers).await;
                self.ctx
                    .backend
                    .list_users(object.clone(), relation.clone(), ObjectType::User, Some(context))
                    .await
            })
            .await;
            let users = match listed {
                Ok(users) => users,
                Err(e) if e.is_undefined_relation() => {
                    debug!("{} is not a relation of {}", relation, object.object_type);
                    continue;
                }
                Err(e) => return Err(e),
            };

            debug!("{} user(s) hold {} on {}", users.len(), relation, object);

            let object = &object;
            let classified = try_join_all(users.into_iter().map(|user| async move {
                let key = TupleKey::new(&user, relation, object);
                let is_direct = self.ctx.has_exact_tuple(key, cancel).await?;
                Ok::<_, FgaError>(UserAccess {
                    principal: Principal::new(&user.id),
                    relation: relation.clone(),
                    is_direct,
                })
            }))
            .await?;
            found.extend(classified);
        }

        Ok(found)
    }

    /// Raw tuples stored with `resource` as the object, conditions included
    pub async fn tuples_for_resource(
        &self,
        resource: &Resource,
        cancel: &dyn CancellationToken,
    ) -> Result<Vec<StoredTuple>> {
        let filter = ReadFilter::object(&resource.object_ref());
        run_cancellable(cancel, async {
            self.ctx.throttle.acquire(EngineCall::Read).await;
            self.ctx.backend.read(filter).await
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockAuthorizationBackend;
    use crate::cancel::NeverCancel;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_probes_default_relations() {
        let mut mock = MockAuthorizationBackend::new();
        mock.expect_list_users()
            .withf(|object, _, user_type, context| {
                object.to_string() == "Workspace:1"
                    && *user_type == ObjectType::User
                    && context.is_some()
            })
            .times(4)
            .returning(|_, relation, _, _| {
                Ok(match relation.as_str() {
                    "admin" | "reader" => vec![ObjectRef::new(ObjectType::User, "Bob")],
                    _ => Vec::new(),
                })
            });
        mock.expect_read().returning(|filter| {
            Ok(if filter.relation.as_deref() == Some("reader") {
                vec![StoredTuple {
                    key: TupleKey {
                        user: "User:Bob".to_string(),
                        relation: "reader".to_string(),
                        object: "Workspace:1".to_string(),
                    },
                    condition: None,
                    timestamp: None,
                }]
            } else {
                Vec::new()
            })
        });

        let enumerator = UserEnumerator::new(EngineContext::new(Arc::new(mock)));
        let found = enumerator
            .for_resource(&Resource::workspace("1"), &NeverCancel)
            .await
            .unwrap();

        assert_eq!(found, vec![
            UserAccess {
                principal: Principal::new("Bob"),
                relation: "admin".to_string(),
                is_direct: false,
            },
            UserAccess {
                principal: Principal::new("Bob"),
                relation: "reader".to_string(),
                is_direct: true,
            },
        ]);
    }

    #[tokio::test]
    async fn test_custom_relations() {
        let mut mock = MockAuthorizationBackend::new();
        mock.expect_list_users()
            .withf(|_, relation, _, _| relation == "editor")
            .times(1)
            .returning(|_, _, _, _| Ok(Vec::new()));

        let enumerator =
            UserEnumerator::new(EngineContext::new(Arc::new(mock))).with_relations(["editor"]);
        assert_eq!(enumerator.relations(), ["editor".to_string()]);
        let found = enumerator
            .for_resource(&Resource::account("1"), &NeverCancel)
            .await
            .unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn test_undefined_relations_are_skipped() {
        let mut mock = MockAuthorizationBackend::new();
        mock.expect_list_users()
            .times(4)
            .returning(|object, relation, _, _| match relation.as_str() {
                "writer" | "reviewer" => Err(FgaError::UndefinedRelation {
                    message: format!("relation '{}#{}' not found", object.object_type, relation),
                }),
                "admin" => Ok(vec![ObjectRef::new(ObjectType::User, "Sara")]),
                _ => Ok(Vec::new()),
            });
        mock.expect_read().returning(|_| Ok(Vec::new()));

        let enumerator = UserEnumerator::new(EngineContext::new(Arc::new(mock)));
        let found = enumerator
            .for_resource(&Resource::account("1"), &NeverCancel)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].principal, Principal::new("Sara"));
    }

    #[tokio::test]
    async fn test_other_rejections_abort() {
        let mut mock = MockAuthorizationBackend::new();
        mock.expect_list_users().times(1).returning(|_, _, _, _| {
            Err(FgaError::Validation {
                code: "validation_error".to_string(),
                message: "invalid object".to_string(),
            })
        });

        let enumerator = UserEnumerator::new(EngineContext::new(Arc::new(mock)));
        let result = enumerator.for_resource(&Resource::account("1"), &NeverCancel).await;
        assert!(matches!(result, Err(FgaError::Validation { .. })));
    }

    #[tokio::test]
    async fn test_tuples_for_resource_filters_by_object() {
        let mut mock = MockAuthorizationBackend::new();
        mock.expect_read()
            .withf(|filter| {
                filter.object.as_deref() == Some("CmpConfiguration:2a")
                    && filter.user.is_none()
                    && filter.relation.is_none()
            })
            .times(1)
            .returning(|_| Ok(Vec::new()));

        let enumerator = UserEnumerator::new(EngineContext::new(Arc::new(mock)));
        let tuples = enumerator
            .tuples_for_resource(&Resource::configuration("2a"), &NeverCancel)
            .await
            .unwrap();
        assert!(tuples.is_empty());
    }
}
