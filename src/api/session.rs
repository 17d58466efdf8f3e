use super::{endpoint, Error};
use crate::model::{Credentials, Portal};
use reqwest::cookie::{CookieStore, Jar};
use reqwest::Url;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

const USERNAME_FIELD: &str = "j_username";
const PASSWORD_FIELD: &str = "j_password";

/// An HTTP client holding the portal's session cookies.
#[derive(Debug)]
pub struct Session {
    client: reqwest::Client,
    authenticated: bool,
    last_auth: Instant,
    generation: u64,
}

impl Session {
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn last_auth(&self) -> Instant {
        self.last_auth
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            client: self.client.clone(),
            generation: self.generation,
        }
    }
}

/// What a single request needs from the session. `generation` identifies the login the client
/// belongs to, so a stale handle can never invalidate a newer session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub client: reqwest::Client,
    pub generation: u64,
}

/// Map transport level failures. Anything that kept us from getting a complete answer is a
/// connection problem, never an authentication one.
pub(crate) fn map_transport_err(error: reqwest::Error) -> Error {
    if error.is_decode() {
        Error::ParseError(error.to_string())
    } else if error.is_builder() {
        Error::InternalError(error.to_string())
    } else {
        Error::ConnectError(error.to_string())
    }
}

fn has_cookie(jar: &Jar, url: &Url, name: &str) -> bool {
    jar.cookies(url)
        .and_then(|header| header.to_str().map(str::to_owned).ok())
        .map(|header| {
            header
                .split(';')
                .filter_map(|pair| pair.trim().split_once('='))
                .any(|(cookie, _)| cookie == name)
        })
        .unwrap_or(false)
}

/// Log in with `credentials`.
///
/// The logon page is requested first so the portal can seed its own cookies, then the
/// credentials are posted form encoded to the security check. The login counts as successful
/// only if the portal handed out `portal.sso_cookie`.
pub async fn login(portal: &Portal, credentials: &Credentials) -> Result<Session, Error> {
    let jar = Arc::new(Jar::default());
    let client = reqwest::ClientBuilder::new()
        .cookie_provider(Arc::clone(&jar))
        .user_agent(USER_AGENT)
        .connect_timeout(portal.connect_timeout)
        .timeout(portal.request_timeout)
        .build()
        .map_err(|e| Error::InternalError(e.to_string()))?;

    client
        .get(portal.url(endpoint::LOGON_PAGE))
        .send()
        .await
        .map_err(map_transport_err)?;

    let security_check = portal.url(endpoint::SECURITY_CHECK);
    let form = [
        (USERNAME_FIELD, credentials.email()),
        (PASSWORD_FIELD, credentials.password()),
    ];
    let response = client
        .post(&security_check)
        .form(&form)
        .send()
        .await
        .map_err(map_transport_err)?;

    let status = response.status();
    if status.is_server_error() {
        return Err(Error::ApiError(format!("login answered {}", status)));
    }

    let url = Url::parse(&security_check).map_err(|e| Error::InternalError(e.to_string()))?;
    if !has_cookie(&jar, &url, &portal.sso_cookie) {
        return Err(Error::AuthError(format!(
            "no {} cookie received (server responded {})",
            portal.sso_cookie, status
        )));
    }

    if response.url().path().contains(endpoint::LOGIN_MARKERS[0]) {
        return Err(Error::AuthError(String::from(
            "redirected back to the logon page",
        )));
    }

    log::debug!("logged in to {} as {}", portal.base_url, credentials.email());

    Ok(Session {
        client,
        authenticated: true,
        last_auth: Instant::now(),
        generation: 0,
    })
}

struct State {
    credentials: Credentials,
    session: Option<Session>,
    generation: u64,
}

/// Owns the one live session of an account. All logins go through the internal lock, so
/// concurrent callers needing a fresh session trigger a single login.
pub struct SessionManager {
    portal: Portal,
    state: Mutex<State>,
}

impl SessionManager {
    pub fn new(portal: Portal, credentials: Credentials) -> Self {
        SessionManager {
            portal,
            state: Mutex::new(State {
                credentials,
                session: None,
                generation: 0,
            }),
        }
    }

    pub fn portal(&self) -> &Portal {
        &self.portal
    }

    /// Return the current session, logging in first if there is none or it was invalidated.
    pub async fn ensure_authenticated(&self) -> Result<SessionHandle, Error> {
        let mut state = self.state.lock().await;

        if let Some(session) = state.session.as_ref().filter(|s| s.authenticated) {
            return Ok(session.handle());
        }

        let mut session = login(&self.portal, &state.credentials).await?;
        state.generation += 1;
        session.generation = state.generation;

        let handle = session.handle();
        state.session = Some(session);
        Ok(handle)
    }

    /// Mark the session `handle` came from as expired. The next `ensure_authenticated` logs in
    /// again. A no-op if the session was already replaced.
    pub async fn invalidate(&self, handle: &SessionHandle) {
        let mut state = self.state.lock().await;

        if let Some(session) = state.session.as_mut() {
            if session.generation == handle.generation && session.authenticated {
                log::debug!("session {} invalidated", session.generation);
                session.authenticated = false;
            }
        }
    }

    /// Swap credentials and drop the current session.
    pub async fn replace_credentials(&self, credentials: Credentials) {
        let mut state = self.state.lock().await;
        state.credentials = credentials;
        state.session = None;
    }

    pub async fn is_authenticated(&self) -> bool {
        self.state
            .lock()
            .await
            .session
            .as_ref()
            .map_or(false, Session::is_authenticated)
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use mockito::{Matcher, Mock, ServerGuard};
    use std::time::Duration;

    pub const EMAIL: &str = "tenant@example.com";
    pub const PASSWORD: &str = "correct horse";

    pub fn credentials() -> Credentials {
        Credentials::new(EMAIL, PASSWORD)
    }

    pub fn portal(server: &ServerGuard) -> Portal {
        Portal::new(server.url())
    }

    pub async fn mock_logon_page(server: &mut ServerGuard) -> Mock {
        server
            .mock("GET", endpoint::LOGON_PAGE)
            .with_status(200)
            .with_body("<html>logon</html>")
            .create_async()
            .await
    }

    /// Portal accepting `credentials()` exactly `hits` times.
    pub async fn mock_login(server: &mut ServerGuard, hits: usize) -> Mock {
        mock_logon_page(server).await;
        server
            .mock("POST", endpoint::SECURITY_CHECK)
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded(USERNAME_FIELD.into(), EMAIL.into()),
                Matcher::UrlEncoded(PASSWORD_FIELD.into(), PASSWORD.into()),
            ]))
            .with_status(200)
            .with_header("set-cookie", "MYSAPSSO2=sso-token; Path=/")
            .expect(hits)
            .create_async()
            .await
    }

    #[tokio::test]
    async fn login_yields_session_with_cookie() {
        let mut server = mockito::Server::new_async().await;
        let login_mock = mock_login(&mut server, 1).await;

        let session = login(&portal(&server), &credentials()).await.unwrap();
        assert!(session.is_authenticated());
        login_mock.assert_async().await;
    }

    #[tokio::test]
    async fn login_without_cookie_is_auth_error() {
        let mut server = mockito::Server::new_async().await;
        mock_logon_page(&mut server).await;
        server
            .mock("POST", endpoint::SECURITY_CHECK)
            .with_status(200)
            .with_header("set-cookie", "JSESSIONID=abc; Path=/")
            .with_body("<html>Benutzer-ID oder Kennwort falsch</html>")
            .create_async()
            .await;

        let result = login(&portal(&server), &Credentials::new(EMAIL, "wrong")).await;
        assert!(matches!(result, Err(Error::AuthError(_))));
    }

    #[tokio::test]
    async fn cookie_name_must_match_exactly() {
        let mut server = mockito::Server::new_async().await;
        mock_logon_page(&mut server).await;
        server
            .mock("POST", endpoint::SECURITY_CHECK)
            .with_status(200)
            .with_header("set-cookie", "MYSAPSSO2_OLD=x; Path=/")
            .create_async()
            .await;

        let result = login(&portal(&server), &credentials()).await;
        assert!(matches!(result, Err(Error::AuthError(_))));
    }

    #[tokio::test]
    async fn login_bounced_to_logon_page_is_auth_error() {
        let mut server = mockito::Server::new_async().await;
        mock_logon_page(&mut server).await;
        server
            .mock("POST", endpoint::SECURITY_CHECK)
            .with_status(302)
            .with_header("location", endpoint::LOGON_PAGE)
            .with_header("set-cookie", "MYSAPSSO2=sso-token; Path=/")
            .create_async()
            .await;

        let result = login(&portal(&server), &credentials()).await;
        assert!(matches!(result, Err(Error::AuthError(_))));
    }

    #[tokio::test]
    async fn refused_connection_is_connect_error() {
        let portal = Portal::new("http://127.0.0.1:1");
        let result = login(&portal, &credentials()).await;
        assert!(matches!(result, Err(Error::ConnectError(_))));
    }

    #[tokio::test]
    async fn timeout_is_connect_error() {
        /* accepts connections through the backlog but never answers */
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let portal = Portal {
            request_timeout: Duration::from_millis(200),
            ..Portal::new(format!("http://{}", listener.local_addr().unwrap()))
        };

        let result = login(&portal, &credentials()).await;
        assert!(matches!(result, Err(Error::ConnectError(_))));
    }

    #[tokio::test]
    async fn server_error_during_login_is_not_auth_error() {
        let mut server = mockito::Server::new_async().await;
        mock_logon_page(&mut server).await;
        server
            .mock("POST", endpoint::SECURITY_CHECK)
            .with_status(503)
            .create_async()
            .await;

        let result = login(&portal(&server), &credentials()).await;
        assert!(matches!(result, Err(Error::ApiError(_))));
    }

    #[tokio::test]
    async fn session_is_reused_until_invalidated() {
        let mut server = mockito::Server::new_async().await;
        let login_mock = mock_login(&mut server, 2).await;
        let manager = SessionManager::new(portal(&server), credentials());

        let first = manager.ensure_authenticated().await.unwrap();
        let again = manager.ensure_authenticated().await.unwrap();
        assert_eq!(first.generation, again.generation);

        manager.invalidate(&first).await;
        assert!(!manager.is_authenticated().await);

        let second = manager.ensure_authenticated().await.unwrap();
        assert_eq!(first.generation + 1, second.generation);

        /* a stale handle does not touch the new session */
        manager.invalidate(&first).await;
        assert!(manager.is_authenticated().await);

        login_mock.assert_async().await;
    }

    #[tokio::test]
    async fn concurrent_logins_collapse() {
        let mut server = mockito::Server::new_async().await;
        let login_mock = mock_login(&mut server, 1).await;
        let manager = SessionManager::new(portal(&server), credentials());

        let (a, b) = tokio::join!(manager.ensure_authenticated(), manager.ensure_authenticated());
        assert_eq!(a.unwrap().generation, b.unwrap().generation);
        login_mock.assert_async().await;
    }

    #[tokio::test]
    async fn replaced_credentials_force_login() {
        let mut server = mockito::Server::new_async().await;
        let login_mock = mock_login(&mut server, 2).await;
        let manager = SessionManager::new(portal(&server), credentials());

        manager.ensure_authenticated().await.unwrap();
        manager.replace_credentials(credentials()).await;
        assert!(!manager.is_authenticated().await);

        manager.ensure_authenticated().await.unwrap();
        login_mock.assert_async().await;
    }
}
