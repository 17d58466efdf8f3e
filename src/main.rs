#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate prometheus;
#[macro_use]
extern crate rocket;

use config::Config;
use minol_rs::api;
use minol_rs::coordinator::{Coordinator, Settings};
use minol_rs::model::{Credentials, Portal, Prices, DEFAULT_BASE_URL, DEFAULT_SSO_COOKIE};
use rocket::http::ContentType;
use rocket::State;
use serde::Serialize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

mod metrics;

const MIN_INTERVAL: u64 = 15;
const MAX_INTERVAL: u64 = 1440;

#[derive(Clone, serde::Deserialize)]
pub struct MinolConfig {
    base_url: String,
    email: String,
    password: String,
    /// Minutes between two polls of the portal.
    interval: u64,
    max_failures: u32,
    /// Seconds.
    timeout: u64,
    sso_cookie: String,
    heating_price: Option<f64>,
    hot_water_price: Option<f64>,
    cold_water_price: Option<f64>,
}

/// Shared by all routes: the coordinator and when it last polled.
pub struct StateData {
    coordinator: Coordinator,
    interval: Duration,
    /// Set when a poll completed, successful or not.
    last_poll: Mutex<Option<Instant>>,
}

impl StateData {
    fn mark_polled(&self) {
        match self.last_poll.lock() {
            Ok(mut last_poll) => *last_poll = Some(Instant::now()),
            Err(_) => log::trace!("last poll time is poisoned, next scrape polls again"),
        }
    }

    /// A poll is due when none completed yet or the last one is older than `interval`.
    fn poll_due(&self) -> bool {
        self.last_poll
            .lock()
            .ok()
            .and_then(|last_poll| *last_poll)
            .map_or(true, |at| at.elapsed() > self.interval)
    }
}

pub fn read_settings() -> Result<MinolConfig, config::ConfigError> {
    let mut settings = Config::default();
    settings
        .set_default("base_url", DEFAULT_BASE_URL)?
        .set_default("interval", 60i64)?
        .set_default("max_failures", 3i64)?
        .set_default("timeout", 30i64)?
        .set_default("sso_cookie", DEFAULT_SSO_COOKIE)?
        .merge(config::Environment::with_prefix("MINOL"))?;

    let settings: MinolConfig = settings.try_into()?;
    if !(MIN_INTERVAL..=MAX_INTERVAL).contains(&settings.interval) {
        return Err(config::ConfigError::Message(format!(
            "interval must be between {} and {} minutes, got {}",
            MIN_INTERVAL, MAX_INTERVAL, settings.interval
        )));
    }
    Ok(settings)
}

fn json<T: Serialize>(value: &T) -> Result<(ContentType, String), api::Error> {
    serde_json::to_string_pretty(value)
        .map(|body| (ContentType::JSON, body))
        .map_err(|e| api::Error::InternalError(e.to_string()))
}

/// Poll the portal if `interval` elapsed since the last poll. Failures are recorded by the
/// coordinator and retried at the next interval, scrapes keep serving the last readings.
async fn refresh(state: &StateData) {
    if !state.poll_due() {
        log::debug!("last poll is recent, serving the published readings");
        return;
    }

    match minol_rs::poll(&state.coordinator).await {
        Ok(snapshot) => {
            log::info!("polled readings of {} tenants", snapshot.len());
            state.mark_polled();
        }
        Err(e) if e.cause == api::Error::Busy => {
            log::debug!("a poll is already running, serving the published readings")
        }
        Err(e) => {
            log::warn!("{}", e);
            state.mark_polled();
        }
    }
}

#[get("/metrics")]
async fn metrics_route(state: &State<StateData>) -> Result<String, api::Error> {
    refresh(state).await;
    metrics::update(&state.coordinator.snapshot(), &state.coordinator.status());
    metrics::read()
}

#[get("/readings")]
async fn readings_route(state: &State<StateData>) -> Result<(ContentType, String), api::Error> {
    refresh(state).await;
    json(&state.coordinator.snapshot())
}

#[get("/status")]
fn status_route(state: &State<StateData>) -> Result<(ContentType, String), api::Error> {
    json(&state.coordinator.status())
}

#[get("/diagnostics")]
fn diagnostics_route(state: &State<StateData>) -> Result<(ContentType, String), api::Error> {
    json(&minol_rs::diagnostics::diagnostics(&state.coordinator))
}

#[rocket::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let settings = read_settings()?;
    let portal = Portal {
        sso_cookie: settings.sso_cookie.clone(),
        request_timeout: Duration::from_secs(settings.timeout),
        ..Portal::new(settings.base_url.clone())
    };
    let credentials = Credentials::new(settings.email.clone(), settings.password.clone());
    let poll_settings = Settings {
        max_failures: settings.max_failures,
        prices: Prices {
            heating: settings.heating_price,
            hot_water: settings.hot_water_price,
            cold_water: settings.cold_water_price,
        },
        ..Settings::default()
    };

    let coordinator = minol_rs::configure(portal, credentials, poll_settings)
        .await?
        .with_registration(|tenant, keys| {
            log::info!(
                "tenant {} provides readings: {}",
                tenant.user_number,
                keys.join(", ")
            )
        });

    let state = StateData {
        coordinator,
        interval: Duration::from_secs(settings.interval * 60),
        last_poll: Mutex::new(None),
    };

    rocket::build()
        .manage(state)
        .mount(
            "/",
            routes![metrics_route, readings_route, status_route, diagnostics_route],
        )
        .launch()
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use minol_rs::PortalClient;

    #[test]
    fn poll_is_due_until_one_completes() {
        let state = StateData {
            coordinator: Coordinator::new(
                PortalClient::new(Portal::default(), Credentials::new("a@example.com", "x")),
                Settings::default(),
            ),
            interval: Duration::from_secs(60),
            last_poll: Mutex::new(None),
        };

        assert!(state.poll_due());
        state.mark_polled();
        assert!(!state.poll_due());
    }
}
