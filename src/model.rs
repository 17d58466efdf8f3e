use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://webservices.minol.com";
pub const DEFAULT_SSO_COOKIE: &str = "MYSAPSSO2";

type Euro = f64;

/// Login credentials for one portal account. Never mutated once built.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    email: String,
    password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Credentials {
            email: email.into(),
            password: password.into(),
        }
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"***")
            .finish()
    }
}

/// Where and how to talk to the portal.
#[derive(Debug, Clone)]
pub struct Portal {
    pub base_url: String,
    /// Name of the cookie whose presence proves a successful login.
    pub sso_cookie: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Portal {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Portal {
            base_url: base_url.trim_end_matches('/').to_owned(),
            ..Portal::default()
        }
    }

    pub fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }
}

impl Default for Portal {
    fn default() -> Self {
        Portal {
            base_url: DEFAULT_BASE_URL.to_owned(),
            sso_cookie: DEFAULT_SSO_COOKIE.to_owned(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// One dwelling unit the logged in account may read consumption data for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Tenant {
    pub user_number: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub street: Option<String>,
    pub house_number: Option<String>,
    pub postal_code: Option<String>,
    pub city: Option<String>,
    pub property_number: Option<String>,
    pub unit_number: Option<String>,
    pub floor: Option<String>,
    pub position: Option<String>,
    pub move_in_date: Option<String>,
}

impl Tenant {
    /// `"<street> <no>, <postal> <city>"`, or the tenant name when no street is known.
    pub fn address(&self) -> Option<String> {
        match self.street.as_deref().filter(|s| !s.is_empty()) {
            Some(street) => {
                let line = format!(
                    "{} {}, {} {}",
                    street,
                    self.house_number.as_deref().unwrap_or_default(),
                    self.postal_code.as_deref().unwrap_or_default(),
                    self.city.as_deref().unwrap_or_default(),
                );
                Some(line.trim().to_owned())
            }
            None => self.name.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumptionType {
    Heating,
    HotWater,
    ColdWater,
}

impl ConsumptionType {
    pub const ALL: [ConsumptionType; 3] = [
        ConsumptionType::Heating,
        ConsumptionType::HotWater,
        ConsumptionType::ColdWater,
    ];

    /// Portal code, used as `consType` in requests and `keyFigure` in responses.
    pub fn code(self) -> &'static str {
        match self {
            ConsumptionType::Heating => "HEIZUNG",
            ConsumptionType::HotWater => "WARMWASSER",
            ConsumptionType::ColdWater => "KALTWASSER",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        ConsumptionType::ALL.into_iter().find(|t| t.code() == code)
    }

    pub fn slug(self) -> &'static str {
        match self {
            ConsumptionType::Heating => "heating",
            ConsumptionType::HotWater => "hot_water",
            ConsumptionType::ColdWater => "cold_water",
        }
    }

    /// Unit of absolute consumption. Hot water is reported as energy since requests ask for
    /// values in kWh.
    pub fn unit(self) -> Unit {
        match self {
            ConsumptionType::Heating | ConsumptionType::HotWater => Unit::KilowattHour,
            ConsumptionType::ColdWater => Unit::CubicMeter,
        }
    }

    pub fn area_unit(self) -> Unit {
        match self.unit() {
            Unit::CubicMeter => Unit::CubicMeterPerSquareMeter,
            _ => Unit::KilowattHourPerSquareMeter,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    CurrentYear,
    PreviousYear,
    PerAreaCurrent,
    PerAreaPrevious,
    DinAverage,
    BuildingShare,
    CostCurrentYear,
    CostPreviousYear,
}

impl Metric {
    /// Metrics derived from every dashboard block.
    pub const DASHBOARD: [Metric; 6] = [
        Metric::CurrentYear,
        Metric::PreviousYear,
        Metric::PerAreaCurrent,
        Metric::PerAreaPrevious,
        Metric::DinAverage,
        Metric::BuildingShare,
    ];

    pub fn slug(self) -> &'static str {
        match self {
            Metric::CurrentYear => "current_year",
            Metric::PreviousYear => "previous_year",
            Metric::PerAreaCurrent => "per_m2_current",
            Metric::PerAreaPrevious => "per_m2_previous",
            Metric::DinAverage => "din_avg",
            Metric::BuildingShare => "building_share",
            Metric::CostCurrentYear => "cost_current_year",
            Metric::CostPreviousYear => "cost_previous_year",
        }
    }

    pub fn unit(self, consumption_type: ConsumptionType) -> Unit {
        match self {
            Metric::CurrentYear | Metric::PreviousYear => consumption_type.unit(),
            Metric::PerAreaCurrent | Metric::PerAreaPrevious | Metric::DinAverage => {
                consumption_type.area_unit()
            }
            Metric::BuildingShare => Unit::Percent,
            Metric::CostCurrentYear | Metric::CostPreviousYear => Unit::Euro,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Unit {
    #[serde(rename = "kWh")]
    KilowattHour,
    #[serde(rename = "kWh/m²")]
    KilowattHourPerSquareMeter,
    #[serde(rename = "m³")]
    CubicMeter,
    #[serde(rename = "m³/m²")]
    CubicMeterPerSquareMeter,
    #[serde(rename = "%")]
    Percent,
    #[serde(rename = "EUR")]
    Euro,
}

impl Unit {
    pub fn symbol(self) -> &'static str {
        match self {
            Unit::KilowattHour => "kWh",
            Unit::KilowattHourPerSquareMeter => "kWh/m²",
            Unit::CubicMeter => "m³",
            Unit::CubicMeterPerSquareMeter => "m³/m²",
            Unit::Percent => "%",
            Unit::Euro => "EUR",
        }
    }
}

/// What the portal offers for one tenant, layer and consumption type, as returned by
/// `PortalClient::get_layer_info`. `read_data` takes one, so every read follows a discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerInfo {
    pub user_number: String,
    pub layer: String,
    pub scale: String,
    pub consumption_type: ConsumptionType,
    /// Dialog keys of the views the portal offers.
    pub views: Vec<String>,
    pub periods: Vec<String>,
    pub scales: Vec<String>,
}

impl LayerInfo {
    /// Dialog key of the overview, offered for every tenant.
    pub const DASHBOARD: &'static str = "dashboard";

    pub fn offers(&self, dialog_key: &str) -> bool {
        dialog_key == Self::DASHBOARD || self.views.iter().any(|v| v == dialog_key)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ReadingValue {
    Number(f64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    pub key: String,
    pub consumption_type: Option<ConsumptionType>,
    pub metric: Option<Metric>,
    pub value: ReadingValue,
    pub unit: Option<Unit>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl Reading {
    pub fn measured(consumption_type: ConsumptionType, metric: Metric, value: f64) -> Self {
        Reading {
            key: format!("{}_{}", consumption_type.slug(), metric.slug()),
            consumption_type: Some(consumption_type),
            metric: Some(metric),
            value: ReadingValue::Number(value),
            unit: Some(metric.unit(consumption_type)),
            attributes: BTreeMap::new(),
        }
    }

    pub fn number(&self) -> Option<f64> {
        match self.value {
            ReadingValue::Number(n) => Some(n),
            ReadingValue::Text(_) => None,
        }
    }
}

/// Every reading produced for one tenant in one poll, keyed by reading key.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ReadingSet(BTreeMap<String, Reading>);

impl ReadingSet {
    pub fn insert(&mut self, reading: Reading) -> Option<Reading> {
        self.0.insert(reading.key.clone(), reading)
    }

    pub fn get(&self, key: &str) -> Option<&Reading> {
        self.0.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Reading> {
        self.0.values()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Price per consumption unit, used for the optional cost readings.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Prices {
    pub heating: Option<Euro>,
    pub hot_water: Option<Euro>,
    pub cold_water: Option<Euro>,
}

impl Prices {
    pub fn get(&self, consumption_type: ConsumptionType) -> Option<Euro> {
        match consumption_type {
            ConsumptionType::Heating => self.heating,
            ConsumptionType::HotWater => self.hot_water,
            ConsumptionType::ColdWater => self.cold_water,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consumption_type_codes() {
        assert_eq!(Some(ConsumptionType::HotWater), ConsumptionType::from_code("WARMWASSER"));
        assert_eq!(None, ConsumptionType::from_code("STROM"));
        assert_eq!(Unit::CubicMeterPerSquareMeter, ConsumptionType::ColdWater.area_unit());
    }

    #[test]
    fn reading_key_and_unit() {
        let reading = Reading::measured(ConsumptionType::ColdWater, Metric::DinAverage, 0.4);
        assert_eq!("cold_water_din_avg", reading.key);
        assert_eq!(Some(Unit::CubicMeterPerSquareMeter), reading.unit);
        assert_eq!(
            Unit::Percent,
            Metric::BuildingShare.unit(ConsumptionType::Heating)
        );
    }

    #[test]
    fn address_falls_back_to_name() {
        let mut tenant = Tenant {
            user_number: "1".into(),
            name: Some("Erika Mustermann".into()),
            ..Tenant::default()
        };
        assert_eq!(Some("Erika Mustermann".to_owned()), tenant.address());

        tenant.street = Some("Hauptstr.".into());
        tenant.house_number = Some("5".into());
        tenant.postal_code = Some("70173".into());
        tenant.city = Some("Stuttgart".into());
        assert_eq!(Some("Hauptstr. 5, 70173 Stuttgart".to_owned()), tenant.address());
    }

    #[test]
    fn credentials_debug_hides_password() {
        let credentials = Credentials::new("a@example.com", "hunter2");
        assert!(!format!("{:?}", credentials).contains("hunter2"));
    }

    #[test]
    fn layer_info_always_offers_dashboard() {
        let info = LayerInfo {
            user_number: "1".into(),
            layer: "NE".into(),
            scale: "CALMONTH".into(),
            consumption_type: ConsumptionType::Heating,
            views: vec!["100EH".into()],
            periods: vec![],
            scales: vec![],
        };
        assert!(info.offers("dashboard"));
        assert!(info.offers("100EH"));
        assert!(!info.offers("RAUM"));
    }
}
