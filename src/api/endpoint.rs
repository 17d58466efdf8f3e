pub type Endpoint = str;

pub const LOGON_PAGE: &Endpoint = "/irj/servlet/prt/portal/prttarget/uidpwlogon/prtroot/com.sap.portal.navigation.portallauncher.default";
pub const SECURITY_CHECK: &Endpoint = "/irj/servlet/prt/portal/prtroot/j_security_check";

pub const USER_TENANTS: &Endpoint = "/minol.com~kundenportal~em~web/rest/EMData/getUserTenants";
pub const LAYER_INFO: &Endpoint = "/minol.com~kundenportal~em~web/rest/EMData/getLayerInfo";
pub const READ_DATA: &Endpoint = "/minol.com~kundenportal~em~web/rest/EMData/readData";

pub const SHOW_INFO_STATE: &Endpoint = "/minol.com~kundenportal~em~web/rest/NuData/getShowInfoState";
pub const PUSH_SERVICE_STATE: &Endpoint =
    "/minol.com~kundenportal~em~web/rest/NuData/getPushServiceState";

/// Path fragments which identify the login pages. Landing on one of them after redirects means
/// the portal dropped the session.
pub const LOGIN_MARKERS: [&str; 2] = ["uidpwlogon", "j_security_check"];
