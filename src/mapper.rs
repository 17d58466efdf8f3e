//! Turns `readData` dashboards into flat reading sets.
//!
//! Each dashboard block carries one consumption type: `data1` holds the yearly totals, `data2_*`
//! the distribution over the building, `data3` the per m² values next to the DIN reference.
//! Values are only ever taken from numeric fields. Labels are localized display text.

use crate::api::response::read_data::{DashboardBlock, DataPoint, ReadData};
use crate::model::{
    ConsumptionType, Metric, Prices, Reading, ReadingSet, ReadingValue, Tenant,
};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

pub const TENANT_INFO: &str = "tenant_info";

const CURRENT: &str = "CURR";
const PREVIOUS: &str = "1PREV";
const REFERENCE: &str = "REF";
const OWN_UNIT: &str = "NE";

enum Block {
    Consumption(ConsumptionType, DashboardBlock),
    UnknownType(String),
    Unrecognized(String),
}

fn classify(value: &Value) -> Block {
    match serde_json::from_value::<DashboardBlock>(value.clone()) {
        Ok(block) => match ConsumptionType::from_code(&block.key_figure) {
            Some(consumption_type) => Block::Consumption(consumption_type, block),
            None => Block::UnknownType(block.key_figure),
        },
        Err(e) => Block::Unrecognized(e.to_string()),
    }
}

/// Value of the first item in `category`, optionally restricted to `key_figure`.
fn find_value(items: &[DataPoint], category: &str, key_figure: Option<&str>) -> Option<f64> {
    items
        .iter()
        .filter(|item| item.category_int.as_deref() == Some(category))
        .find(|item| key_figure.map_or(true, |kf| item.key_figure.as_deref() == Some(kf)))
        .and_then(|item| item.value)
}

/// Share of the tenant's unit in the building's consumption, in percent. Current year if the
/// portal has it, the previous year otherwise.
fn building_share(block: &DashboardBlock) -> Option<f64> {
    let items = if block.data2_2.is_empty() {
        &block.data2_1
    } else {
        &block.data2_2
    };

    let own = find_value(items, OWN_UNIT, None)?;
    let total: f64 = items.iter().filter_map(|item| item.value).sum();

    if total > 0.0 {
        Some(own * 100.0 / total)
    } else {
        None
    }
}

fn extract(block: &DashboardBlock, metric: Metric) -> Option<f64> {
    let own = block.key_figure.as_str();

    match metric {
        Metric::CurrentYear => find_value(&block.data1, CURRENT, None),
        Metric::PreviousYear => find_value(&block.data1, PREVIOUS, None),
        Metric::PerAreaCurrent => find_value(&block.data3, CURRENT, Some(own)),
        Metric::PerAreaPrevious => find_value(&block.data3, PREVIOUS, Some(own)),
        Metric::DinAverage => find_value(&block.data3, CURRENT, Some(REFERENCE)),
        Metric::BuildingShare => building_share(block),
        Metric::CostCurrentYear | Metric::CostPreviousYear => None,
    }
}

/// Reading describing the tenant itself: the address as value, everything known as attributes.
pub fn tenant_info(tenant: &Tenant) -> Reading {
    let fields = [
        ("name", &tenant.name),
        ("email", &tenant.email),
        ("street", &tenant.street),
        ("house_number", &tenant.house_number),
        ("postal_code", &tenant.postal_code),
        ("city", &tenant.city),
        ("property_number", &tenant.property_number),
        ("unit_number", &tenant.unit_number),
        ("floor", &tenant.floor),
        ("position", &tenant.position),
        ("move_in_date", &tenant.move_in_date),
    ];

    let mut attributes: BTreeMap<String, String> = fields
        .into_iter()
        .filter_map(|(name, value)| value.as_ref().map(|v| (name.to_string(), v.to_owned())))
        .collect();
    attributes.insert("user_number".into(), tenant.user_number.to_owned());

    Reading {
        key: TENANT_INFO.to_owned(),
        consumption_type: None,
        metric: None,
        value: ReadingValue::Text(
            tenant
                .address()
                .unwrap_or_else(|| tenant.user_number.to_owned()),
        ),
        unit: None,
        attributes,
    }
}

/// Map one dashboard payload of `tenant` into readings.
///
/// Consumption types come from the payload, so accounts without e.g. a cold water meter get
/// no cold water readings. Metrics the payload has no value for are left out rather than
/// reported as zero. Blocks of unknown shape or type are skipped with a warning.
pub fn map(tenant: &Tenant, payload: &ReadData) -> ReadingSet {
    let mut readings = ReadingSet::default();
    readings.insert(tenant_info(tenant));

    let mut seen = BTreeSet::new();

    for value in &payload.dashboard {
        match classify(value) {
            Block::Consumption(consumption_type, block) => {
                if !seen.insert(consumption_type) {
                    log::warn!(
                        "duplicate {} dashboard block for tenant {}, keeping the first",
                        block.key_figure,
                        tenant.user_number
                    );
                    continue;
                }
                for metric in Metric::DASHBOARD {
                    if let Some(value) = extract(&block, metric) {
                        readings.insert(Reading::measured(consumption_type, metric, value));
                    }
                }
            }
            Block::UnknownType(key_figure) => log::warn!(
                "skipping dashboard block of unknown consumption type {}",
                key_figure
            ),
            Block::Unrecognized(e) => {
                log::warn!("skipping unrecognized dashboard block: {}", e)
            }
        }
    }

    readings
}

/// Add cost readings for every consumption type with a configured price.
pub fn price(readings: &mut ReadingSet, prices: &Prices) {
    let mut costs = Vec::new();

    for consumption_type in ConsumptionType::ALL {
        let price = match prices.get(consumption_type) {
            Some(price) => price,
            None => continue,
        };

        for (source, cost) in [
            (Metric::CurrentYear, Metric::CostCurrentYear),
            (Metric::PreviousYear, Metric::CostPreviousYear),
        ] {
            let key = format!("{}_{}", consumption_type.slug(), source.slug());
            if let Some(amount) = readings.get(&key).and_then(Reading::number) {
                costs.push(Reading::measured(consumption_type, cost, amount * price));
            }
        }
    }

    for cost in costs {
        readings.insert(cost);
    }
}
