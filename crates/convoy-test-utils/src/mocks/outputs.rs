//! Mock of the run-scoped output store.

use async_trait::async_trait;
use convoy_core::domain::repository::{OutputId, OutputScope, OutputStore, StoredOutput};
use convoy_core::{CoreError, WorkflowExecutionId};
use mockall::mock;
use serde_json::Value;

mock! {
    pub OutputStore {}

    #[async_trait]
    impl OutputStore for OutputStore {
        async fn save(
            &self,
            run: &WorkflowExecutionId,
            name: &str,
            value: Value,
            scope: OutputScope,
        ) -> Result<OutputId, CoreError>;
        async fn find(
            &self,
            run: &WorkflowExecutionId,
            name: &str,
        ) -> Result<Option<StoredOutput>, CoreError>;
        async fn delete_by_id(&self, id: &OutputId) -> Result<(), CoreError>;
    }
}

/// Creates an empty store that accepts every write.
pub fn create_mock_output_store() -> MockOutputStore {
    let mut mock = MockOutputStore::new();

    mock.expect_save()
        .returning(|_, name, _, _| Ok(OutputId(format!("{}-{}", name, uuid::Uuid::new_v4()))));

    mock.expect_find().returning(|_, _| Ok(None));

    mock.expect_delete_by_id().returning(|_| Ok(()));

    mock
}
