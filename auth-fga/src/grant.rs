use crate::{
    cancel::{run_cancellable, CancellationToken},
    duration::encode,
    engine::EngineContext,
    error::{FgaError, Result},
    events::AuthzEvent,
    models::*,
    throttle::EngineCall,
};
use std::time::Duration;
use tracing::debug;

/// Writes and revokes role grants and parent links
pub struct GrantWriter {
    ctx: EngineContext,
}

impl GrantWriter {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    /// Grant `role` on `resource` to `principal`
    ///
    /// With a non-zero `duration` the tuple carries the time-boxed grant
    /// condition anchored at the current clock time. A zero duration is a
    /// permanent grant. Windows too long for the engine to evaluate are
    /// rejected with [`FgaError::InvalidDuration`]. Granting a key that
    /// already exists fails with [`FgaError::DuplicateGrant`]; revoke first
    /// to change its duration.
    pub async fn grant(
        &self,
        principal: &Principal,
        role: Role,
        resource: &Resource,
        duration: Option<Duration>,
        cancel: &dyn CancellationToken,
    ) -> Result<()> {
        let key = TupleKey::grant(principal, role, resource);
        let window = duration.filter(|window| !window.is_zero());
        let write = match window {
            Some(window) => {
                ensure_representable(window)?;
                let condition = Condition::temporary_grant(self.ctx.clock.now(), window);
                TupleWrite::conditioned(key.clone(), condition)
            }
            None => TupleWrite::permanent(key.clone()),
        };

        match self.write(write, cancel).await {
            Ok(()) => {
                self.ctx.events.record(AuthzEvent::GrantWritten {
                    key,
                    expires_in: window.map(encode),
                });
                Ok(())
            }
            Err(e) if e.is_duplicate() => {
                self.ctx.events.record(AuthzEvent::DuplicateGrant { key });
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Remove the exact grant; fails with [`FgaError::NotFound`] if absent
    pub async fn revoke(
        &self,
        principal: &Principal,
        role: Role,
        resource: &Resource,
        cancel: &dyn CancellationToken,
    ) -> Result<()> {
        let key = TupleKey::grant(principal, role, resource);
        self.delete(key.clone(), cancel).await?;
        self.ctx.events.record(AuthzEvent::GrantRevoked { key });
        Ok(())
    }

    /// Make `parent` the owner of `child` so grants on the parent flow down
    pub async fn link_parent(
        &self,
        child: &Resource,
        parent: &Resource,
        cancel: &dyn CancellationToken,
    ) -> Result<()> {
        ensure_hierarchy(child, parent)?;

        let key = TupleKey::parent(child, parent);
        self.write(TupleWrite::permanent(key.clone()), cancel).await?;
        self.ctx.events.record(AuthzEvent::ParentLinked { key });
        Ok(())
    }

    pub async fn unlink_parent(
        &self,
        child: &Resource,
        parent: &Resource,
        cancel: &dyn CancellationToken,
    ) -> Result<()> {
        ensure_hierarchy(child, parent)?;

        let key = TupleKey::parent(child, parent);
        self.delete(key.clone(), cancel).await?;
        self.ctx.events.record(AuthzEvent::ParentUnlinked { key });
        Ok(())
    }

    /// Owners are permanent admins of an account
    pub async fn add_account_owner(
        &self,
        account: &Resource,
        owner: &Principal,
        cancel: &dyn CancellationToken,
    ) -> Result<()> {
        ensure_account(account)?;
        self.grant(owner, Role::Admin, account, None, cancel).await
    }

    pub async fn remove_account_owner(
        &self,
        account: &Resource,
        owner: &Principal,
        cancel: &dyn CancellationToken,
    ) -> Result<()> {
        ensure_account(account)?;
        self.revoke(owner, Role::Admin, account, cancel).await
    }

    async fn write(&self, write: TupleWrite, cancel: &dyn CancellationToken) -> Result<()> {
        debug!("Writing tuple: {}", write.key);
        run_cancellable(cancel, async {
            self.ctx.throttle.acquire(EngineCall::Write).await;
            self.ctx.backend.write(vec![write]).await
        })
        .await
    }

    async fn delete(&self, key: TupleKey, cancel: &dyn CancellationToken) -> Result<()> {
        debug!("Deleting tuple: {}", key);
        run_cancellable(cancel, async {
            self.ctx.throttle.acquire(EngineCall::Delete).await;
            self.ctx.backend.delete(vec![key]).await
        })
        .await
    }
}

fn ensure_hierarchy(child: &Resource, parent: &Resource) -> Result<()> {
    if child.object_type().parent_type() == Some(parent.object_type()) {
        Ok(())
    } else {
        Err(FgaError::InvalidHierarchy {
            child: child.object_ref().to_string(),
            parent: parent.object_ref().to_string(),
        })
    }
}

fn ensure_representable(window: Duration) -> Result<()> {
    chrono::Duration::from_std(window).map(|_| ()).map_err(|_| {
        FgaError::InvalidDuration(format!("{} is longer than any grant window", encode(window)))
    })
}

fn ensure_account(account: &Resource) -> Result<()> {
    match account {
        Resource::Account(_) => Ok(()),
        other => Err(FgaError::InvalidObjectRef(format!(
            "account owner target must be an Account, got {}",
            other.object_ref()
        ))),
    }
}
