use serde::Deserialize;

use super::lenient;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Data {
    #[serde(deserialize_with = "lenient::string")]
    pub user_number: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub addr_street: Option<String>,
    pub addr_house_num: Option<String>,
    pub addr_postal_code: Option<String>,
    pub addr_city: Option<String>,
    pub lgnr: Option<String>,
    pub nenr: Option<String>,
    pub geschoss_text: Option<String>,
    pub lage_text: Option<String>,
    pub einzug_mieter: Option<String>,
}

/// `getUserTenants` answers with a bare array.
pub type GetUserTenants = Vec<Data>;
