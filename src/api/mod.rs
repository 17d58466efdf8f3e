pub mod endpoint;
pub mod error;
pub mod response;
pub mod session;

use crate::model::{ConsumptionType, Credentials, LayerInfo, Portal, Tenant};
pub use error::{Error, ErrorKind, PollError};
use reqwest::{Method, Response};
use response::feature_state::FeatureState;
use response::get_layer_info::{self, GetLayerInfo};
use response::get_user_tenants::{self, GetUserTenants};
use response::read_data::ReadData;
use serde::Serialize;
use serde_json::Value;
pub use session::{login, Session, SessionHandle, SessionManager};

pub const DEFAULT_LAYER: &str = "NE";
pub const DEFAULT_SCALE: &str = "CALMONTH";

/// Dialog keys of overview views. These compare against the DIN average, detailed views against
/// the building.
const OVERVIEW_KEYS: [&str; 4] = ["100EH", "100KWH", "200", LayerInfo::DASHBOARD];

/// Request body shared by `getLayerInfo` and `readData`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Selection<'a> {
    user_num: &'a str,
    layer: &'a str,
    scale: &'a str,
    chart_ref_unit: &'static str,
    ref_object: &'static str,
    cons_type: &'static str,
    dash_board_key: &'static str,
    #[serde(rename = "valuesInKWH")]
    values_in_kwh: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    dlg_key: Option<&'a str>,
}

impl<'a> Selection<'a> {
    fn new(
        user_num: &'a str,
        layer: &'a str,
        scale: &'a str,
        consumption_type: ConsumptionType,
        ref_object: &'static str,
    ) -> Self {
        Selection {
            user_num,
            layer,
            scale,
            chart_ref_unit: "ABS",
            ref_object,
            cons_type: consumption_type.code(),
            dash_board_key: "PE",
            values_in_kwh: true,
            dlg_key: None,
        }
    }
}

/// Map non-2xx responses to errors. Authentication-required answers, whether a 401/403 or a
/// redirect onto a login page, become `SessionExpired`.
fn map_response_status(response: Response) -> Result<Response, Error> {
    let status = response.status();
    let path = response.url().path();

    if status == http::StatusCode::UNAUTHORIZED
        || status == http::StatusCode::FORBIDDEN
        || endpoint::LOGIN_MARKERS.iter().any(|m| path.contains(m))
    {
        Err(Error::SessionExpired)
    } else if !status.is_success() {
        Err(Error::ApiError(format!("{} answered {}", path, status)))
    } else {
        Ok(response)
    }
}

fn parse_body(text: String) -> Result<Value, Error> {
    if text.trim().is_empty() {
        return Err(Error::ParseError(String::from("empty response body")));
    }
    serde_json::from_str::<Value>(&text)
        .map_err(|e| Error::ParseError(format!("malformed JSON ({} bytes): {}", text.len(), e)))
}

/// Shape errors quote offending values, which may be personal data. Those stay in the log.
fn shape_error(operation: &str, e: serde_json::Error) -> Error {
    log::debug!("{} answered with an unexpected shape: {}", operation, e);
    Error::ParseError(format!("{} answered with an unexpected shape", operation))
}

fn tenant_from(data: get_user_tenants::Data) -> Tenant {
    Tenant {
        user_number: data.user_number,
        name: data.name,
        email: data.email,
        street: data.addr_street,
        house_number: data.addr_house_num,
        postal_code: data.addr_postal_code,
        city: data.addr_city,
        property_number: data.lgnr.map(|s| s.trim().to_owned()),
        unit_number: data.nenr,
        floor: data.geschoss_text,
        position: data.lage_text,
        move_in_date: data.einzug_mieter,
    }
}

/// Client for the portal's REST API. Every call runs on an authenticated session and is retried
/// once after a fresh login if the portal reports the session as expired.
pub struct PortalClient {
    session: SessionManager,
}

impl PortalClient {
    pub fn new(portal: Portal, credentials: Credentials) -> Self {
        PortalClient {
            session: SessionManager::new(portal, credentials),
        }
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    async fn send(
        &self,
        handle: &SessionHandle,
        method: Method,
        endpoint: &endpoint::Endpoint,
        body: Option<&Selection<'_>>,
    ) -> Result<Value, Error> {
        let url = self.session.portal().url(endpoint);

        let request = match body {
            Some(body) => handle.client.request(method, url).json(body),
            None => handle.client.request(method, url),
        };

        let response_text = request
            .send()
            .await
            .map_err(session::map_transport_err)
            .and_then(map_response_status)?
            .text()
            .await
            .map_err(session::map_transport_err)?;

        log::trace!(
            "endpoint: {}, body: {:?}, response_text: {}",
            endpoint,
            body,
            response_text
        );

        parse_body(response_text)
    }

    async fn request(
        &self,
        method: Method,
        endpoint: &endpoint::Endpoint,
        body: Option<&Selection<'_>>,
    ) -> Result<Value, Error> {
        let handle = self.session.ensure_authenticated().await?;

        match self.send(&handle, method.clone(), endpoint, body).await {
            Err(Error::SessionExpired) => {
                log::debug!("session expired on {}, logging in again", endpoint);
                self.session.invalidate(&handle).await;
                let handle = self.session.ensure_authenticated().await?;
                self.send(&handle, method, endpoint, body).await
            }
            result => result,
        }
    }

    /// List the tenants of the logged in account. No tenants is a valid answer.
    pub async fn get_user_tenants(&self) -> Result<Vec<Tenant>, Error> {
        self.request(Method::GET, endpoint::USER_TENANTS, None)
            .await
            .map(serde_json::from_value::<GetUserTenants>)?
            .map_err(|e| shape_error("getUserTenants", e))
            .map(|tenants| tenants.into_iter().map(tenant_from).collect())
    }

    /// Discover which views and periods can be read for `tenant`.
    pub async fn get_layer_info(
        &self,
        tenant: &Tenant,
        layer: &str,
        scale: &str,
        consumption_type: ConsumptionType,
    ) -> Result<LayerInfo, Error> {
        let selection = Selection::new(
            &tenant.user_number,
            layer,
            scale,
            consumption_type,
            "PREV_YEAR",
        );

        self.request(Method::POST, endpoint::LAYER_INFO, Some(&selection))
            .await
            .map(serde_json::from_value::<GetLayerInfo>)?
            .map_err(|e| shape_error("getLayerInfo", e))
            .map(|response| LayerInfo {
                user_number: tenant.user_number.to_owned(),
                layer: layer.to_owned(),
                scale: scale.to_owned(),
                consumption_type,
                views: get_layer_info::keys(&response.views),
                periods: get_layer_info::keys(&response.periods),
                scales: get_layer_info::keys(&response.scales),
            })
    }

    /// Read the view `dialog_key` of the tenant, layer and consumption type `layer_info` was
    /// discovered for. Keys `layer_info` does not offer are rejected without a request.
    pub async fn read_data(
        &self,
        layer_info: &LayerInfo,
        dialog_key: &str,
    ) -> Result<ReadData, Error> {
        if !layer_info.offers(dialog_key) {
            return Err(Error::ParseError(format!(
                "dialog key {} is not offered for tenant {}",
                dialog_key, layer_info.user_number
            )));
        }

        let ref_object = if OVERVIEW_KEYS.contains(&dialog_key) {
            "DIN_AVG"
        } else {
            "UPPER_LEVEL"
        };
        let selection = Selection {
            dlg_key: Some(dialog_key),
            ..Selection::new(
                &layer_info.user_number,
                &layer_info.layer,
                &layer_info.scale,
                layer_info.consumption_type,
                ref_object,
            )
        };

        let data = self
            .request(Method::POST, endpoint::READ_DATA, Some(&selection))
            .await
            .map(serde_json::from_value::<ReadData>)?
            .map_err(|e| shape_error("readData", e))?;

        if data.is_empty() {
            Err(Error::ParseError(format!(
                "readData returned nothing for dialog key {}",
                dialog_key
            )))
        } else {
            Ok(data)
        }
    }

    async fn feature_state(&self, endpoint: &endpoint::Endpoint) -> Result<bool, Error> {
        self.request(Method::GET, endpoint, None)
            .await
            .map(serde_json::from_value::<FeatureState>)?
            .map_err(|e| shape_error(endpoint, e))
            .map(|state| state.result)
    }

    pub async fn show_info_state(&self) -> Result<bool, Error> {
        self.feature_state(endpoint::SHOW_INFO_STATE).await
    }

    pub async fn push_service_state(&self) -> Result<bool, Error> {
        self.feature_state(endpoint::PUSH_SERVICE_STATE).await
    }
}

#[cfg(test)]
mod tests {
    use super::response::test::read_resource;
    use super::session::test::{credentials, mock_login, portal};
    use super::*;
    use mockito::{Matcher, ServerGuard};
    use serde_json::json;

    fn client(server: &ServerGuard) -> PortalClient {
        PortalClient::new(portal(server), credentials())
    }

    fn tenant() -> Tenant {
        Tenant {
            user_number: "0012345678".into(),
            ..Tenant::default()
        }
    }

    fn layer_info(views: &[&str]) -> LayerInfo {
        LayerInfo {
            user_number: "0012345678".into(),
            layer: DEFAULT_LAYER.into(),
            scale: DEFAULT_SCALE.into(),
            consumption_type: ConsumptionType::Heating,
            views: views.iter().map(|v| v.to_string()).collect(),
            periods: vec![],
            scales: vec![],
        }
    }

    #[tokio::test]
    async fn user_tenants() {
        let mut server = mockito::Server::new_async().await;
        mock_login(&mut server, 1).await;
        server
            .mock("GET", endpoint::USER_TENANTS)
            .match_header("cookie", Matcher::Regex("MYSAPSSO2=sso-token".into()))
            .with_body(read_resource("getUserTenants.json"))
            .create_async()
            .await;

        let tenants = client(&server).get_user_tenants().await.unwrap();
        assert_eq!(2, tenants.len());
        assert_eq!(Some("4711"), tenants[0].property_number.as_deref());
        assert_eq!(Some("2. OG"), tenants[0].floor.as_deref());
        assert_eq!("87654321", tenants[1].user_number);
    }

    #[tokio::test]
    async fn no_tenants_is_not_an_error() {
        let mut server = mockito::Server::new_async().await;
        mock_login(&mut server, 1).await;
        server
            .mock("GET", endpoint::USER_TENANTS)
            .with_body("[]")
            .create_async()
            .await;

        assert_eq!(Ok(vec![]), client(&server).get_user_tenants().await);
    }

    #[tokio::test]
    async fn malformed_tenants_is_parse_error() {
        let mut server = mockito::Server::new_async().await;
        mock_login(&mut server, 1).await;
        server
            .mock("GET", endpoint::USER_TENANTS)
            .with_body("{\"tenants\": 1}")
            .create_async()
            .await;

        let result = client(&server).get_user_tenants().await;
        assert!(matches!(result, Err(Error::ParseError(_))));
    }

    #[tokio::test]
    async fn parse_errors_do_not_quote_tenant_data() {
        let mut server = mockito::Server::new_async().await;
        mock_login(&mut server, 1).await;
        server
            .mock("GET", endpoint::USER_TENANTS)
            .with_body("[{\"userNumber\": \"0012345678\", \"name\": \"Erika Mustermann\"")
            .expect(1)
            .create_async()
            .await;
        let client = client(&server);

        let truncated = client.get_user_tenants().await.unwrap_err().to_string();
        assert!(!truncated.contains("Mustermann"), "{}", truncated);

        server
            .mock("GET", endpoint::USER_TENANTS)
            .with_body("[{\"userNumber\": \"0012345678\", \"name\": [\"Erika Mustermann\"]}]")
            .create_async()
            .await;

        let wrong_shape = client.get_user_tenants().await.unwrap_err().to_string();
        assert!(!wrong_shape.contains("Mustermann"), "{}", wrong_shape);
    }

    #[tokio::test]
    async fn expired_session_is_renewed_once() {
        let mut server = mockito::Server::new_async().await;
        let login_mock = mock_login(&mut server, 2).await;
        let expired = server
            .mock("GET", endpoint::USER_TENANTS)
            .with_status(401)
            .expect(1)
            .create_async()
            .await;
        let ok = server
            .mock("GET", endpoint::USER_TENANTS)
            .with_body("[]")
            .expect(1)
            .create_async()
            .await;

        assert_eq!(Ok(vec![]), client(&server).get_user_tenants().await);
        login_mock.assert_async().await;
        expired.assert_async().await;
        ok.assert_async().await;
    }

    #[tokio::test]
    async fn redirect_to_logon_page_counts_as_expiry() {
        let mut server = mockito::Server::new_async().await;
        let login_mock = mock_login(&mut server, 2).await;
        server
            .mock("GET", endpoint::USER_TENANTS)
            .with_status(302)
            .with_header("location", endpoint::LOGON_PAGE)
            .expect(1)
            .create_async()
            .await;
        server
            .mock("GET", endpoint::USER_TENANTS)
            .with_body("[]")
            .expect(1)
            .create_async()
            .await;

        assert_eq!(Ok(vec![]), client(&server).get_user_tenants().await);
        login_mock.assert_async().await;
    }

    #[tokio::test]
    async fn second_expiry_is_fatal() {
        let mut server = mockito::Server::new_async().await;
        let login_mock = mock_login(&mut server, 2).await;
        let tenants = server
            .mock("GET", endpoint::USER_TENANTS)
            .with_status(403)
            .expect(2)
            .create_async()
            .await;

        let result = client(&server).get_user_tenants().await;
        assert_eq!(Err(Error::SessionExpired), result);
        login_mock.assert_async().await;
        tenants.assert_async().await;
    }

    #[tokio::test]
    async fn server_errors_are_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let login_mock = mock_login(&mut server, 1).await;
        let tenants = server
            .mock("GET", endpoint::USER_TENANTS)
            .with_status(500)
            .expect(1)
            .create_async()
            .await;

        let result = client(&server).get_user_tenants().await;
        assert!(matches!(result, Err(Error::ApiError(_))));
        login_mock.assert_async().await;
        tenants.assert_async().await;
    }

    #[tokio::test]
    async fn layer_info_request() {
        let mut server = mockito::Server::new_async().await;
        mock_login(&mut server, 1).await;
        server
            .mock("POST", endpoint::LAYER_INFO)
            .match_body(Matcher::PartialJson(json!({
                "userNum": "0012345678",
                "layer": "NE",
                "scale": "CALMONTH",
                "consType": "WARMWASSER",
                "refObject": "PREV_YEAR",
                "dashBoardKey": "PE",
                "valuesInKWH": true,
            })))
            .with_body(read_resource("getLayerInfo.json"))
            .create_async()
            .await;

        let info = client(&server)
            .get_layer_info(&tenant(), DEFAULT_LAYER, DEFAULT_SCALE, ConsumptionType::HotWater)
            .await
            .unwrap();
        assert_eq!(ConsumptionType::HotWater, info.consumption_type);
        assert_eq!(vec!["100EH", "200", "RAUM"], info.views);
        assert!(info.offers("RAUM"));
    }

    #[tokio::test]
    async fn layer_info_of_wrong_shape_is_parse_error() {
        let mut server = mockito::Server::new_async().await;
        mock_login(&mut server, 1).await;
        server
            .mock("POST", endpoint::LAYER_INFO)
            .with_body("[1, 2, 3]")
            .create_async()
            .await;

        let result = client(&server)
            .get_layer_info(&tenant(), DEFAULT_LAYER, DEFAULT_SCALE, ConsumptionType::Heating)
            .await;
        assert!(matches!(result, Err(Error::ParseError(_))));
    }

    #[tokio::test]
    async fn read_dashboard() {
        let mut server = mockito::Server::new_async().await;
        mock_login(&mut server, 1).await;
        server
            .mock("POST", endpoint::READ_DATA)
            .match_body(Matcher::PartialJson(json!({
                "userNum": "0012345678",
                "consType": "HEIZUNG",
                "refObject": "DIN_AVG",
                "dlgKey": "dashboard",
            })))
            .with_body(read_resource("readData_dashboard.json"))
            .create_async()
            .await;

        let data = client(&server)
            .read_data(&layer_info(&[]), LayerInfo::DASHBOARD)
            .await
            .unwrap();
        assert_eq!(3, data.dashboard.len());
    }

    #[tokio::test]
    async fn detailed_views_compare_against_building() {
        let mut server = mockito::Server::new_async().await;
        mock_login(&mut server, 1).await;
        let view = server
            .mock("POST", endpoint::READ_DATA)
            .match_body(Matcher::PartialJson(json!({
                "refObject": "UPPER_LEVEL",
                "dlgKey": "RAUM",
            })))
            .with_body("{\"table\": [{\"raum\": \"Bad\"}]}")
            .create_async()
            .await;

        let data = client(&server)
            .read_data(&layer_info(&["RAUM"]), "RAUM")
            .await
            .unwrap();
        assert!(data.table.is_array());
        view.assert_async().await;
    }

    #[tokio::test]
    async fn stale_dialog_key_is_parse_error() {
        let mut server = mockito::Server::new_async().await;
        let read = server
            .mock("POST", endpoint::READ_DATA)
            .expect(0)
            .create_async()
            .await;

        let result = client(&server).read_data(&layer_info(&["100EH"]), "200KWH").await;
        assert!(matches!(result, Err(Error::ParseError(_))));
        read.assert_async().await;
    }

    #[tokio::test]
    async fn empty_read_data_is_parse_error() {
        let mut server = mockito::Server::new_async().await;
        mock_login(&mut server, 1).await;
        server
            .mock("POST", endpoint::READ_DATA)
            .with_body("{}")
            .create_async()
            .await;

        let result = client(&server)
            .read_data(&layer_info(&[]), LayerInfo::DASHBOARD)
            .await;
        assert!(matches!(result, Err(Error::ParseError(_))));
    }

    #[tokio::test]
    async fn feature_flags() {
        let mut server = mockito::Server::new_async().await;
        mock_login(&mut server, 1).await;
        server
            .mock("GET", endpoint::SHOW_INFO_STATE)
            .with_body("{\"result\": true}")
            .create_async()
            .await;
        server
            .mock("GET", endpoint::PUSH_SERVICE_STATE)
            .with_body("{\"result\": false}")
            .create_async()
            .await;

        let client = client(&server);
        assert_eq!(Ok(true), client.show_info_state().await);
        assert_eq!(Ok(false), client.push_service_state().await);
    }
}
