use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::lenient;

/// Raw `readData` payload. Only `dashboard` is interpreted, `table` and `chart` are passed
/// through untouched.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ReadData {
    #[serde(default)]
    pub table: Value,
    #[serde(default)]
    pub chart: Value,
    #[serde(default, deserialize_with = "lenient::list")]
    pub dashboard: Vec<Value>,
}

impl ReadData {
    pub fn is_empty(&self) -> bool {
        self.table.is_null() && self.chart.is_null() && self.dashboard.is_empty()
    }
}

/* One dashboard block: one consumption type */
#[derive(Debug, Deserialize)]
pub struct DashboardBlock {
    #[serde(rename = "keyFigure")]
    pub key_figure: String,
    /* yearly totals */
    #[serde(default, deserialize_with = "lenient::list")]
    pub data1: Vec<DataPoint>,
    /* share of building, previous and current year */
    #[serde(default, deserialize_with = "lenient::list")]
    pub data2_1: Vec<DataPoint>,
    #[serde(default, deserialize_with = "lenient::list")]
    pub data2_2: Vec<DataPoint>,
    /* per m² values and DIN reference */
    #[serde(default, deserialize_with = "lenient::list")]
    pub data3: Vec<DataPoint>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataPoint {
    pub category_int: Option<String>,
    pub key_figure: Option<String>,
    #[serde(default, deserialize_with = "lenient::number")]
    pub value: Option<f64>,
}
