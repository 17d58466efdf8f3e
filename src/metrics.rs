use minol_rs::api::Error;
use minol_rs::coordinator::{Snapshot, Status};
use minol_rs::model::Unit;
use prometheus::{Encoder, GaugeVec, IntGauge, IntGaugeVec, TextEncoder};

lazy_static! {
    static ref READING_GAUGE: GaugeVec = register_gauge_vec!(
        opts!("minol_reading", "latest value of every numeric reading"),
        &["tenant", "key", "unit"],
    )
    .unwrap();
    static ref UP_GAUGE: IntGauge = register_int_gauge!(opts!(
        "minol_up",
        "1 while readings are available, 0 after repeated failures or rejected credentials",
    ))
    .unwrap();
    static ref TENANT_UP_GAUGE: IntGaugeVec = register_int_gauge_vec!(
        opts!("minol_tenant_up", "1 while the readings of a tenant are available",),
        &["tenant"],
    )
    .unwrap();
    static ref FAILURES_GAUGE: IntGauge = register_int_gauge!(opts!(
        "minol_consecutive_failures",
        "poll cycles failed in a row",
    ))
    .unwrap();
}

/// Replace all reading gauges with the content of `snapshot`. Readings missing from it, or
/// belonging to a tenant `status` reports unavailable, disappear from the exporter instead of
/// keeping their last value.
pub fn update(snapshot: &Snapshot, status: &Status) {
    READING_GAUGE.reset();
    TENANT_UP_GAUGE.reset();

    for tenant in &status.tenants {
        TENANT_UP_GAUGE
            .with_label_values(&[tenant.user_number.as_str()])
            .set(i64::from(tenant.available));
    }

    for (user_number, tenant) in snapshot {
        let available = status
            .tenants
            .iter()
            .any(|t| &t.user_number == user_number && t.available);
        if !available {
            continue;
        }

        for reading in tenant.readings.iter() {
            if let Some(value) = reading.number() {
                READING_GAUGE
                    .with_label_values(&[
                        user_number.as_str(),
                        reading.key.as_str(),
                        reading.unit.map(Unit::symbol).unwrap_or_default(),
                    ])
                    .set(value);
            }
        }
    }

    UP_GAUGE.set(i64::from(status.available));
    FAILURES_GAUGE.set(i64::from(status.consecutive_failures));
}

/// Read metrics from Prometheus exporter registry.
pub fn read() -> Result<String, Error> {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| Error::InternalError(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| Error::InternalError(e.to_string()))
}
