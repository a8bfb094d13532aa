//! Mocks of the ticket backend and the poll registrar.

use async_trait::async_trait;
use convoy_core::domain::approval::TicketSnapshot;
use convoy_core::domain::repository::{PollRegistrar, TicketBackend};
use convoy_core::{CoreError, CorrelationId};
use mockall::mock;

mock! {
    pub TicketBackend {}

    #[async_trait]
    impl TicketBackend for TicketBackend {
        fn ticket_type(&self) -> &str;
        async fn fetch_ticket_snapshot(&self, ticket_ref: &str) -> Result<TicketSnapshot, CoreError>;
    }
}

/// Creates a backend of the given type that serves `snapshot` for every ticket.
pub fn create_mock_ticket_backend(ticket_type: &'static str, snapshot: TicketSnapshot) -> MockTicketBackend {
    let mut mock = MockTicketBackend::new();

    mock.expect_ticket_type().return_const(ticket_type.to_string());

    mock.expect_fetch_ticket_snapshot()
        .returning(move |_| Ok(snapshot.clone()));

    mock
}

mock! {
    pub PollRegistrar {}

    #[async_trait]
    impl PollRegistrar for PollRegistrar {
        async fn register_for_future_poll(
            &self,
            approval_id: &str,
            ticket_ref: &str,
            correlation_id: &CorrelationId,
        ) -> Result<(), CoreError>;
    }
}

/// Creates a registrar that accepts every registration.
pub fn create_mock_poll_registrar() -> MockPollRegistrar {
    let mut mock = MockPollRegistrar::new();

    mock.expect_register_for_future_poll()
        .returning(|_, _, _| Ok(()));

    mock
}
