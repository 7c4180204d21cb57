//! Two-account fixture graph for exercising the service end to end.
//!
//! ```text
//! Bob  ─admin─ Account:1 ── Workspace:1 ─┬─ PpgPolicy:1a, PpgPolicy:1b
//!                                        └─ CmpConfiguration:1a, CmpConfiguration:1b
//! Sara ─admin─ Account:2 ── Workspace:2 ─┬─ PpgPolicy:2a, PpgPolicy:2b
//!                                        └─ CmpConfiguration:2a, CmpConfiguration:2b
//! ```

use crate::{
    cancel::CancellationToken,
    engine::AuthorizationService,
    error::Result,
    models::*,
};
use tracing::info;

#[derive(Debug, Clone)]
pub struct Scenario {
    pub bob: Principal,
    pub sara: Principal,
    pub account_1: Resource,
    pub account_2: Resource,
    pub workspace_1: Resource,
    pub workspace_2: Resource,
    pub policy_1a: Resource,
    pub policy_1b: Resource,
    pub policy_2a: Resource,
    pub policy_2b: Resource,
    pub configuration_1a: Resource,
    pub configuration_1b: Resource,
    pub configuration_2a: Resource,
    pub configuration_2b: Resource,
}

impl Default for Scenario {
    fn default() -> Self {
        Self::new()
    }
}

impl Scenario {
    pub fn new() -> Self {
        Self {
            bob: Principal::new("Bob"),
            sara: Principal::new("Sara"),
            account_1: Resource::account("1"),
            account_2: Resource::account("2"),
            workspace_1: Resource::workspace("1"),
            workspace_2: Resource::workspace("2"),
            policy_1a: Resource::policy("1a"),
            policy_1b: Resource::policy("1b"),
            policy_2a: Resource::policy("2a"),
            policy_2b: Resource::policy("2b"),
            configuration_1a: Resource::configuration("1a"),
            configuration_1b: Resource::configuration("1b"),
            configuration_2a: Resource::configuration("2a"),
            configuration_2b: Resource::configuration("2b"),
        }
    }

    /// Build the fixture and write it through `service`
    pub async fn setup(
        service: &AuthorizationService,
        cancel: &dyn CancellationToken,
    ) -> Result<Self> {
        let scenario = Self::new();
        scenario.write(service, cancel).await?;
        Ok(scenario)
    }

    /// Write owners first, then parent links from the top of the hierarchy down
    pub async fn write(
        &self,
        service: &AuthorizationService,
        cancel: &dyn CancellationToken,
    ) -> Result<()> {
        for (account, owner) in self.owners() {
            service.add_account_owner(account, owner, cancel).await?;
        }
        for (child, parent) in self.parent_links() {
            service.link_parent(child, parent, cancel).await?;
        }
        info!("Scenario written");
        Ok(())
    }

    /// Remove everything [`Scenario::write`] created, in reverse order
    pub async fn teardown(
        &self,
        service: &AuthorizationService,
        cancel: &dyn CancellationToken,
    ) -> Result<()> {
        for (child, parent) in self.parent_links().into_iter().rev() {
            service.unlink_parent(child, parent, cancel).await?;
        }
        for (account, owner) in self.owners().into_iter().rev() {
            service.remove_account_owner(account, owner, cancel).await?;
        }
        info!("Scenario torn down");
        Ok(())
    }

    pub fn principals(&self) -> Vec<&Principal> {
        vec![&self.bob, &self.sara]
    }

    pub fn resources(&self) -> Vec<&Resource> {
        vec![
            &self.account_1,
            &self.account_2,
            &self.workspace_1,
            &self.workspace_2,
            &self.policy_1a,
            &self.policy_1b,
            &self.policy_2a,
            &self.policy_2b,
            &self.configuration_1a,
            &self.configuration_1b,
            &self.configuration_2a,
            &self.configuration_2b,
        ]
    }

    pub fn resources_of_type(&self, object_type: ObjectType) -> Vec<&Resource> {
        self.resources()
            .into_iter()
            .filter(|resource| resource.object_type() == object_type)
            .collect()
    }

    fn owners(&self) -> Vec<(&Resource, &Principal)> {
        vec![(&self.account_1, &self.bob), (&self.account_2, &self.sara)]
    }

    fn parent_links(&self) -> Vec<(&Resource, &Resource)> {
        vec![
            (&self.workspace_1, &self.account_1),
            (&self.workspace_2, &self.account_2),
            (&self.policy_1a, &self.workspace_1),
            (&self.policy_1b, &self.workspace_1),
            (&self.policy_2a, &self.workspace_2),
            (&self.policy_2b, &self.workspace_2),
            (&self.configuration_1a, &self.workspace_1),
            (&self.configuration_1b, &self.workspace_1),
            (&self.configuration_2a, &self.workspace_2),
            (&self.configuration_2b, &self.workspace_2),
        ]
    }
}
