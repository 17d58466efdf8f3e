use crate::api::{Error, ErrorKind, PollError, PortalClient, DEFAULT_LAYER, DEFAULT_SCALE};
use crate::mapper;
use crate::model::{ConsumptionType, Credentials, LayerInfo, Prices, ReadingSet, Tenant};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;

/// Where a poll cycle currently is. Every cycle ends back in `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Authenticating,
    FetchingTenants,
    FetchingLayers,
    ReadingData,
    Mapping,
    Published,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TenantReadings {
    pub tenant: Tenant,
    pub readings: ReadingSet,
}

/// Latest published readings of every tenant, keyed by user number.
pub type Snapshot = BTreeMap<String, TenantReadings>;

#[derive(Debug, Clone)]
pub struct Settings {
    pub layer: String,
    pub scale: String,
    pub consumption_type: ConsumptionType,
    pub dialog_key: String,
    /// Consecutive failed polls after which readings are reported unavailable.
    pub max_failures: u32,
    pub prices: Prices,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            layer: DEFAULT_LAYER.to_owned(),
            scale: DEFAULT_SCALE.to_owned(),
            consumption_type: ConsumptionType::Heating,
            dialog_key: LayerInfo::DASHBOARD.to_owned(),
            max_failures: 3,
            prices: Prices::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Status {
    pub phase: Phase,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub last_error_kind: Option<ErrorKind>,
    /// False once `max_failures` polls in a row failed, or credentials were rejected.
    pub available: bool,
    pub tenants: Vec<TenantStatus>,
}

/// Availability of one tenant. A tenant can fail while the others keep polling fine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TenantStatus {
    pub user_number: String,
    pub available: bool,
    pub consecutive_failures: u32,
}

type Registration = Box<dyn Fn(&Tenant, &[String]) + Send + Sync>;

struct State {
    phase: Phase,
    snapshot: Snapshot,
    consecutive_failures: u32,
    tenant_failures: BTreeMap<String, u32>,
    last_error: Option<Error>,
    /// Set when the portal rejected the credentials. Cleared by `reconfigure`.
    auth_failed: bool,
    registered: BTreeMap<String, BTreeSet<String>>,
}

/// Outcome of the network part of one cycle, before anything is published.
struct Cycle {
    tenants: Vec<Tenant>,
    staged: BTreeMap<String, ReadingSet>,
    failures: Vec<PollError>,
}

/// Drives poll cycles and holds the published snapshot.
///
/// The coordinator keeps no timer: the host calls `poll` on its own schedule. Cycles never
/// overlap, a poll arriving while one runs fails with `Error::Busy`.
pub struct Coordinator {
    client: PortalClient,
    settings: Settings,
    cycle: tokio::sync::Mutex<()>,
    state: Mutex<State>,
    registration: Option<Registration>,
}

impl Coordinator {
    pub fn new(client: PortalClient, settings: Settings) -> Self {
        Coordinator {
            client,
            settings,
            cycle: tokio::sync::Mutex::new(()),
            state: Mutex::new(State {
                phase: Phase::Idle,
                snapshot: Snapshot::new(),
                consecutive_failures: 0,
                tenant_failures: BTreeMap::new(),
                last_error: None,
                auth_failed: false,
                registered: BTreeMap::new(),
            }),
            registration: None,
        }
    }

    /// Call `registration` with the reading keys of a tenant the first time they are published.
    pub fn with_registration<F>(mut self, registration: F) -> Self
    where
        F: Fn(&Tenant, &[String]) + Send + Sync + 'static,
    {
        self.registration = Some(Box::new(registration));
        self
    }

    pub fn client(&self) -> &PortalClient {
        &self.client
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn phase(&self) -> Phase {
        self.state().phase
    }

    pub fn snapshot(&self) -> Snapshot {
        self.state().snapshot.clone()
    }

    pub fn readings(&self, user_number: &str) -> Option<ReadingSet> {
        self.state()
            .snapshot
            .get(user_number)
            .map(|t| t.readings.clone())
    }

    fn available(&self, state: &State) -> bool {
        !state.auth_failed && state.consecutive_failures < self.settings.max_failures
    }

    fn tenant_available(&self, state: &State, user_number: &str) -> bool {
        self.available(state)
            && state.snapshot.contains_key(user_number)
            && state
                .tenant_failures
                .get(user_number)
                .map_or(true, |n| *n < self.settings.max_failures)
    }

    /// Whether readings of `user_number` should be shown. A single failed poll keeps them
    /// available, `max_failures` in a row do not.
    pub fn is_available(&self, user_number: &str) -> bool {
        let state = self.state();
        self.tenant_available(&state, user_number)
    }

    pub fn status(&self) -> Status {
        let state = self.state();

        let known: BTreeSet<&String> = state
            .snapshot
            .keys()
            .chain(state.tenant_failures.keys())
            .collect();
        let tenants = known
            .into_iter()
            .map(|user_number| TenantStatus {
                user_number: user_number.to_owned(),
                available: self.tenant_available(&state, user_number),
                consecutive_failures: state.tenant_failures.get(user_number).copied().unwrap_or(0),
            })
            .collect();

        Status {
            phase: state.phase,
            consecutive_failures: state.consecutive_failures,
            last_error: state.last_error.as_ref().map(Error::to_string),
            last_error_kind: state.last_error.as_ref().map(Error::kind),
            available: self.available(&state),
            tenants,
        }
    }

    /// Install new credentials after an authentication failure. They are verified with a login
    /// before polling resumes.
    pub async fn reconfigure(&self, credentials: Credentials) -> Result<(), Error> {
        let _cycle = self.cycle.lock().await;

        self.client.session().replace_credentials(credentials).await;
        self.client.session().ensure_authenticated().await?;

        let mut state = self.state();
        state.auth_failed = false;
        state.consecutive_failures = 0;
        state.last_error = None;
        Ok(())
    }

    /// Run one poll cycle to completion.
    pub async fn poll(&self) -> Result<Snapshot, PollError> {
        self.poll_until(&CancellationToken::new()).await
    }

    /// Run one poll cycle, giving up between two requests once `cancel` fires. A cancelled
    /// cycle publishes nothing.
    pub async fn poll_until(&self, cancel: &CancellationToken) -> Result<Snapshot, PollError> {
        let _cycle = self
            .cycle
            .try_lock()
            .map_err(|_| PollError::from(Error::Busy))?;

        {
            let state = self.state();
            if state.auth_failed {
                let cause = state.last_error.clone().unwrap_or_else(|| {
                    Error::AuthError(String::from("credentials were rejected"))
                });
                return Err(PollError::from(cause));
            }
        }

        let result = self.run_cycle(cancel).await;
        let outcome = self.publish(result);
        self.state().phase = Phase::Idle;
        outcome
    }

    fn step(&self, phase: Phase, cancel: &CancellationToken) -> Result<(), Error> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        log::debug!("poll phase: {:?}", phase);
        self.state().phase = phase;
        Ok(())
    }

    async fn run_cycle(&self, cancel: &CancellationToken) -> Result<Cycle, PollError> {
        self.step(Phase::Authenticating, cancel)?;
        self.client.session().ensure_authenticated().await?;

        self.step(Phase::FetchingTenants, cancel)?;
        let tenants = self.client.get_user_tenants().await?;
        if tenants.is_empty() {
            log::info!("the portal lists no tenants for this account");
        }

        let mut staged = BTreeMap::new();
        let mut failures = Vec::new();

        for tenant in &tenants {
            match self.poll_tenant(tenant, cancel).await {
                Ok(readings) => {
                    staged.insert(tenant.user_number.to_owned(), readings);
                }
                Err(e @ Error::Cancelled) | Err(e @ Error::AuthError(_)) => {
                    return Err(PollError::new(Some(tenant.user_number.to_owned()), e));
                }
                Err(e) => {
                    let failure = PollError::new(Some(tenant.user_number.to_owned()), e);
                    log::warn!("{}", failure);
                    failures.push(failure);
                }
            }
        }

        Ok(Cycle {
            tenants,
            staged,
            failures,
        })
    }

    async fn poll_tenant(
        &self,
        tenant: &Tenant,
        cancel: &CancellationToken,
    ) -> Result<ReadingSet, Error> {
        self.step(Phase::FetchingLayers, cancel)?;
        let layer_info = self
            .client
            .get_layer_info(
                tenant,
                &self.settings.layer,
                &self.settings.scale,
                self.settings.consumption_type,
            )
            .await?;

        self.step(Phase::ReadingData, cancel)?;
        let payload = self
            .client
            .read_data(&layer_info, &self.settings.dialog_key)
            .await?;

        self.step(Phase::Mapping, cancel)?;
        let mut readings = mapper::map(tenant, &payload);
        mapper::price(&mut readings, &self.settings.prices);
        Ok(readings)
    }

    fn fail(&self, state: &mut State, error: PollError) -> Result<Snapshot, PollError> {
        state.phase = Phase::Failed;

        match error.cause {
            Error::Cancelled => log::info!("{}", error),
            Error::AuthError(_) => {
                log::error!("{}; polling stops until credentials are reconfigured", error);
                state.auth_failed = true;
                state.consecutive_failures += 1;
            }
            _ => {
                log::error!("{}", error);
                state.consecutive_failures += 1;
            }
        }

        state.last_error = Some(error.cause.clone());
        Err(error)
    }

    /// Swap the snapshot for the cycle's readings. Tenants that failed keep their previous
    /// readings, tenants no longer listed are dropped. A cycle in which no tenant succeeded
    /// publishes nothing.
    fn publish(&self, result: Result<Cycle, PollError>) -> Result<Snapshot, PollError> {
        let mut announcements = Vec::new();

        let outcome = {
            let mut state = self.state();

            match result {
                Err(error) => self.fail(&mut state, error),
                Ok(mut cycle) => {
                    for failure in &cycle.failures {
                        if let Some(user_number) = &failure.tenant {
                            *state.tenant_failures.entry(user_number.to_owned()).or_insert(0) += 1;
                        }
                    }

                    if cycle.staged.is_empty() && !cycle.failures.is_empty() {
                        let error = cycle.failures.swap_remove(0);
                        self.fail(&mut state, error)
                    } else {
                        let previous = std::mem::take(&mut state.snapshot);
                        let mut snapshot = Snapshot::new();
                        let listed: BTreeSet<String> = cycle
                            .tenants
                            .iter()
                            .map(|tenant| tenant.user_number.to_owned())
                            .collect();

                        for tenant in cycle.tenants {
                            let user_number = tenant.user_number.to_owned();

                            match cycle.staged.remove(&user_number) {
                                Some(readings) => {
                                    state.tenant_failures.remove(&user_number);

                                    let registered =
                                        state.registered.entry(user_number.to_owned()).or_default();
                                    let new_keys: Vec<String> = readings
                                        .keys()
                                        .filter(|key| registered.insert(key.to_string()))
                                        .map(str::to_owned)
                                        .collect();
                                    if !new_keys.is_empty() {
                                        announcements.push((tenant.clone(), new_keys));
                                    }

                                    snapshot.insert(user_number, TenantReadings { tenant, readings });
                                }
                                None => {
                                    if let Some(kept) = previous.get(&user_number) {
                                        snapshot.insert(user_number, kept.clone());
                                    }
                                }
                            }
                        }

                        state
                            .tenant_failures
                            .retain(|user_number, _| listed.contains(user_number));
                        state.snapshot = snapshot;
                        state.phase = Phase::Published;
                        state.consecutive_failures = 0;
                        state.last_error = cycle.failures.pop().map(|failure| failure.cause);

                        log::debug!("published readings of {} tenants", state.snapshot.len());
                        Ok(state.snapshot.clone())
                    }
                }
            }
        };

        if let Some(registration) = &self.registration {
            for (tenant, keys) in &announcements {
                registration(tenant, keys);
            }
        }

        outcome
    }
}
