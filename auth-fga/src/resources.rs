use crate::{
    cancel::{run_cancellable, CancellationToken},
    engine::EngineContext,
    error::{FgaError, Result},
    models::*,
    throttle::EngineCall,
};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// How many roles to probe per resource type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnumerationMode {
    /// Stop at the strongest role that yields anything
    #[default]
    FirstMatchingRole,
    /// Probe every role of every type
    AllRoles,
}

/// Roles probed per resource type, strongest first
pub fn default_role_table() -> Vec<(ObjectType, Vec<Role>)> {
    ObjectType::RESOURCES
        .into_iter()
        .map(|object_type| {
            let roles = match object_type {
                ObjectType::CmpConfiguration => Role::ALL.to_vec(),
                _ => vec![Role::Admin, Role::Editor, Role::Reader],
            };
            (object_type, roles)
        })
        .collect()
}

/// Lists the resources a principal can reach
pub struct ResourceEnumerator {
    ctx: EngineContext,
    mode: EnumerationMode,
    roles: Vec<(ObjectType, Vec<Role>)>,
}

impl ResourceEnumerator {
    pub fn new(ctx: EngineContext) -> Self {
        Self {
            ctx,
            mode: EnumerationMode::default(),
            roles: default_role_table(),
        }
    }

    pub fn with_mode(mut self, mode: EnumerationMode) -> Self {
        self.mode = mode;
        self
    }

    /// Every resource `principal` can reach, tagged with role and directness
    ///
    /// Types are visited in hierarchy order. In
    /// [`EnumerationMode::FirstMatchingRole`] each type reports only the
    /// strongest role that produced any objects.
    pub async fn for_principal(
        &self,
        principal: &Principal,
        cancel: &dyn CancellationToken,
    ) -> Result<Vec<ResourceAccess>> {
        let mut found = Vec::new();
        for (object_type, roles) in &self.roles {
            for role in roles {
                let accessible = self.accessible(principal, *role, *object_type, cancel).await?;
                let matched = !accessible.is_empty();
                found.extend(accessible);
                if matched && self.mode == EnumerationMode::FirstMatchingRole {
                    break;
                }
            }
        }
        Ok(found)
    }

    /// Every role `principal` holds on resources of one type
    pub async fn for_principal_by_type(
        &self,
        principal: &Principal,
        object_type: ObjectType,
        cancel: &dyn CancellationToken,
    ) -> Result<Vec<ResourceAccess>> {
        let mut found = Vec::new();
        for role in Role::ALL {
            found.extend(self.accessible(principal, role, object_type, cancel).await?);
        }
        Ok(found)
    }

    async fn accessible(
        &self,
        principal: &Principal,
        role: Role,
        object_type: ObjectType,
        cancel: &dyn CancellationToken,
    ) -> Result<Vec<ResourceAccess>> {
        let user = principal.object_ref();
        let context = self.ctx.evaluation_context();
        let listed = run_cancellable(cancel, async {
            self.ctx.throttle.acquire(EngineCall::ListObjects).await;
            self.ctx
                .backend
                .list_objects(user.clone(), role.relation().to_string(), object_type, Some(context))
                .await
        })
        .await;
        // e.g. reviewer, which only configurations define
        let objects = match listed {
            Ok(objects) => objects,
            Err(e) if e.is_undefined_relation() => {
                debug!("{} is not a relation of {}", role, object_type);
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        debug!(
            "{} has {} on {} {} object(s)",
            principal,
            role,
            objects.len(),
            object_type
        );

        let user = &user;
        try_join_all(objects.into_iter().map(|resource| async move {
            let key = TupleKey::new(user, role.relation(), &resource);
            let is_direct = self.ctx.has_exact_tuple(key, cancel).await?;
            Ok::<_, FgaError>(ResourceAccess {
                resource,
                role,
                is_direct,
            })
        }))
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockAuthorizationBackend;
    use crate::cancel::NeverCancel;
    use std::sync::Arc;

    fn stored(key: &TupleKey) -> StoredTuple {
        StoredTuple {
            key: key.clone(),
            condition: None,
            timestamp: None,
        }
    }

    #[test]
    fn test_role_table() {
        let table = default_role_table();
        let types: Vec<_> = table.iter().map(|(t, _)| *t).collect();
        assert_eq!(types, ObjectType::RESOURCES.to_vec());
        assert_eq!(table[0].1, vec![Role::Admin, Role::Editor, Role::Reader]);
        assert_eq!(table[3].1, Role::ALL.to_vec());
    }

    #[tokio::test]
    async fn test_stops_at_first_matching_role() {
        let mut mock = MockAuthorizationBackend::new();
        mock.expect_list_objects().returning(|_, relation, object_type, _| {
            Ok(match (relation.as_str(), object_type) {
                ("admin", ObjectType::Account) => vec![ObjectRef::new(ObjectType::Account, "1")],
                ("reader", ObjectType::Account) => vec![ObjectRef::new(ObjectType::Account, "2")],
                _ => Vec::new(),
            })
        });
        mock.expect_read().returning(|filter| {
            let key = TupleKey {
                user: filter.user.unwrap(),
                relation: filter.relation.unwrap(),
                object: filter.object.unwrap(),
            };
            Ok(vec![stored(&key)])
        });
        let backend = Arc::new(mock);

        let enumerator = ResourceEnumerator::new(EngineContext::new(backend.clone()));
        let found = enumerator.for_principal(&Principal::new("Bob"), &NeverCancel).await.unwrap();
        assert_eq!(found, vec![ResourceAccess {
            resource: ObjectRef::new(ObjectType::Account, "1"),
            role: Role::Admin,
            is_direct: true,
        }]);

        let enumerator = ResourceEnumerator::new(EngineContext::new(backend))
            .with_mode(EnumerationMode::AllRoles);
        let found = enumerator.for_principal(&Principal::new("Bob"), &NeverCancel).await.unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[1].role, Role::Reader);
    }

    #[tokio::test]
    async fn test_inherited_access_is_not_direct() {
        let mut mock = MockAuthorizationBackend::new();
        mock.expect_list_objects().returning(|_, relation, object_type, _| {
            Ok(match (relation.as_str(), object_type) {
                ("editor", ObjectType::PpgPolicy) => vec![
                    ObjectRef::new(ObjectType::PpgPolicy, "1a"),
                    ObjectRef::new(ObjectType::PpgPolicy, "1b"),
                ],
                _ => Vec::new(),
            })
        });
        mock.expect_read()
            .withf(|filter| filter.relation.as_deref() == Some("editor"))
            .times(2)
            .returning(|_| Ok(Vec::new()));

        let enumerator = ResourceEnumerator::new(EngineContext::new(Arc::new(mock)));
        let found = enumerator
            .for_principal_by_type(&Principal::new("Bob"), ObjectType::PpgPolicy, &NeverCancel)
            .await
            .unwrap();

        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|access| !access.is_direct && access.role == Role::Editor));
    }

    #[tokio::test]
    async fn test_undefined_relation_yields_nothing() {
        let mut mock = MockAuthorizationBackend::new();
        mock.expect_list_objects().returning(|_, relation, object_type, _| {
            if relation == "reviewer" {
                return Err(FgaError::UndefinedRelation {
                    message: format!("relation '{}#reviewer' not found", object_type),
                });
            }
            Ok(match relation.as_str() {
                "reader" => vec![ObjectRef::new(object_type, "1")],
                _ => Vec::new(),
            })
        });
        mock.expect_read().returning(|_| Ok(Vec::new()));

        let enumerator = ResourceEnumerator::new(EngineContext::new(Arc::new(mock)));
        let found = enumerator
            .for_principal_by_type(&Principal::new("Bob"), ObjectType::Workspace, &NeverCancel)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].role, Role::Reader);
    }

    #[tokio::test]
    async fn test_engine_error_aborts_enumeration() {
        let mut mock = MockAuthorizationBackend::new();
        mock.expect_list_objects()
            .times(1)
            .returning(|_, _, _, _| Err(FgaError::EngineUnavailable("503".to_string())));

        let enumerator = ResourceEnumerator::new(EngineContext::new(Arc::new(mock)));
        let result = enumerator.for_principal(&Principal::new("Bob"), &NeverCancel).await;
        assert!(matches!(result, Err(FgaError::EngineUnavailable(_))));
    }
}
