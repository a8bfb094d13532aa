//! Mocks of the inventory and account services.

use async_trait::async_trait;
use convoy_core::domain::instance::{InfraMapping, Instance, SelectionParams};
use convoy_core::domain::repository::{AccountService, InventoryService};
use convoy_core::scheduling::{select, LicenseTier};
use convoy_core::CoreError;
use mockall::mock;

mock! {
    pub InventoryService {}

    #[async_trait]
    impl InventoryService for InventoryService {
        async fn select_instances(
            &self,
            app_id: &str,
            env_id: &str,
            infra_mapping_id: &str,
            params: &SelectionParams,
        ) -> Result<Vec<Instance>, CoreError>;
        async fn list_host_display_names(
            &self,
            app_id: &str,
            env_id: &str,
            infra_mapping_id: &str,
        ) -> Result<Vec<String>, CoreError>;
        async fn infra_mapping(
            &self,
            app_id: &str,
            infra_mapping_id: &str,
        ) -> Result<Option<InfraMapping>, CoreError>;
        async fn instances_running_artifact(
            &self,
            app_id: &str,
            infra_mapping_id: &str,
            artifact_id: &str,
        ) -> Result<Vec<String>, CoreError>;
    }
}

/// Creates an inventory serving one infrastructure backed by `pool`.
///
/// Selection runs the real scheduler over the pool; no instance runs any
/// artifact.
pub fn create_mock_inventory(mapping: InfraMapping, pool: Vec<Instance>) -> MockInventoryService {
    let mut mock = MockInventoryService::new();

    let hosts: Vec<String> = pool.iter().map(|i| i.host_name.clone()).collect();
    mock.expect_list_host_display_names()
        .returning(move |_, _, _| Ok(hosts.clone()));

    mock.expect_infra_mapping()
        .returning(move |_, id| Ok(Some(mapping.clone()).filter(|m| m.id == id)));

    mock.expect_select_instances()
        .returning(move |_, _, _, params| Ok(select(&pool, params)?));

    mock.expect_instances_running_artifact()
        .returning(|_, _, _| Ok(Vec::new()));

    mock
}

mock! {
    pub AccountService {}

    #[async_trait]
    impl AccountService for AccountService {
        async fn license_tier(&self, account_id: &str) -> Result<LicenseTier, CoreError>;
    }
}

/// Creates an account service reporting `tier` for every account.
pub fn create_mock_account_service(tier: LicenseTier) -> MockAccountService {
    let mut mock = MockAccountService::new();

    mock.expect_license_tier().returning(move |_| Ok(tier));

    mock
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::{instance_pool, physical_infra};
    use convoy_core::domain::instance::SelectionParams;

    #[tokio::test]
    async fn test_mock_inventory_selects_from_pool() {
        let inventory = create_mock_inventory(physical_infra("infra-1"), instance_pool(5));

        let hosts = inventory
            .list_host_display_names("app", "env", "infra-1")
            .await
            .unwrap();
        assert_eq!(hosts.len(), 5);

        let selected = inventory
            .select_instances("app", "env", "infra-1", &SelectionParams::count(2))
            .await
            .unwrap();
        assert_eq!(selected.len(), 2);

        assert!(inventory.infra_mapping("app", "other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mock_inventory_reports_unknown_hosts() {
        let inventory = create_mock_inventory(physical_infra("infra-1"), instance_pool(2));
        let result = inventory
            .select_instances("app", "env", "infra-1", &SelectionParams::specific_hosts(["nope"]))
            .await;
        assert_eq!(
            result,
            Err(CoreError::InvalidInput("Hosts not found in the pool: nope".into()))
        );
    }

    #[tokio::test]
    async fn test_mock_account_service() {
        let accounts = create_mock_account_service(LicenseTier::Essentials);
        assert_eq!(accounts.license_tier("any").await.unwrap(), LicenseTier::Essentials);
    }
}
