//! Polling client for the Minol eMonitoring tenant portal.
//!
//! The portal is driven in three steps per tenant: list the tenants of the account, discover
//! the available views with `getLayerInfo`, read the dashboard with `readData`. The dashboard
//! is mapped into a flat set of named readings (heating, hot and cold water) the host publishes
//! however it likes.

pub mod api;
pub mod coordinator;
pub mod diagnostics;
pub mod mapper;
pub mod model;

pub use api::{Error, ErrorKind, PollError, PortalClient};
pub use coordinator::{Coordinator, Settings, Snapshot};

/// Log in with `credentials` and return a coordinator ready to poll.
///
/// Fails with `Error::AuthError` for rejected credentials and `Error::ConnectError` if the
/// portal cannot be reached.
pub async fn configure(
    portal: model::Portal,
    credentials: model::Credentials,
    settings: Settings,
) -> Result<Coordinator, Error> {
    let client = PortalClient::new(portal, credentials);
    client.session().ensure_authenticated().await?;
    Ok(Coordinator::new(client, settings))
}

/// Run one poll cycle on `handle`.
pub async fn poll(handle: &Coordinator) -> Result<Snapshot, PollError> {
    handle.poll().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::endpoint;
    use crate::api::session::test::{credentials, mock_login, mock_logon_page, portal};
    use crate::model::{Credentials, Portal};

    #[tokio::test]
    async fn configure_logs_in() {
        let mut server = mockito::Server::new_async().await;
        let login_mock = mock_login(&mut server, 1).await;

        let handle = configure(portal(&server), credentials(), Settings::default())
            .await
            .unwrap();
        assert!(handle.client().session().is_authenticated().await);
        login_mock.assert_async().await;
    }

    #[tokio::test]
    async fn configure_tells_bad_credentials_from_unreachable_portal() {
        let mut server = mockito::Server::new_async().await;
        mock_logon_page(&mut server).await;
        server
            .mock("POST", endpoint::SECURITY_CHECK)
            .with_status(200)
            .create_async()
            .await;

        let rejected = configure(
            portal(&server),
            Credentials::new("tenant@example.com", "wrong"),
            Settings::default(),
        )
        .await;
        assert_eq!(ErrorKind::Auth, rejected.err().unwrap().kind());

        let unreachable = configure(
            Portal::new("http://127.0.0.1:1"),
            credentials(),
            Settings::default(),
        )
        .await;
        assert_eq!(ErrorKind::Connect, unreachable.err().unwrap().kind());
    }
}
