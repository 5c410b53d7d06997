//! Location acquisition that runs beside capture and never blocks it.

use async_trait::async_trait;
use facegate_core::{GeoError, GeoFix};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// A source of location fixes (GPS receiver, platform location service, ...).
#[async_trait]
pub trait GeoProvider: Send + Sync {
    async fn locate(&self) -> Result<GeoFix, GeoError>;
}

/// Provider that always reports the same coordinates, e.g. a fixed kiosk.
pub struct StaticGeo(pub GeoFix);

#[async_trait]
impl GeoProvider for StaticGeo {
    async fn locate(&self) -> Result<GeoFix, GeoError> {
        Ok(self.0)
    }
}

/// Wraps a provider with a request timeout and a freshness window.
///
/// [`refresh`](Self::refresh) starts a background lookup and returns
/// immediately; [`current`](Self::current) yields the latest fix only while
/// it is younger than `max_age`.
#[derive(Clone)]
pub struct GeoTracker {
    provider: Arc<dyn GeoProvider>,
    timeout: Duration,
    max_age: Duration,
    latest: Arc<Mutex<Option<(GeoFix, Instant)>>>,
    in_flight: Arc<AtomicBool>,
}

impl GeoTracker {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);
    pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(30);

    pub fn new(provider: Arc<dyn GeoProvider>) -> Self {
        Self::with_limits(provider, Self::DEFAULT_TIMEOUT, Self::DEFAULT_MAX_AGE)
    }

    pub fn with_limits(provider: Arc<dyn GeoProvider>, timeout: Duration, max_age: Duration) -> Self {
        Self {
            provider,
            timeout,
            max_age,
            latest: Arc::new(Mutex::new(None)),
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Latest fix, if one was obtained within the freshness window.
    pub fn current(&self) -> Option<GeoFix> {
        let latest = self.latest.lock().unwrap_or_else(PoisonError::into_inner);
        (*latest)
            .filter(|(_, at)| at.elapsed() <= self.max_age)
            .map(|(fix, _)| fix)
    }

    /// Start a background lookup unless a fresh fix exists or one is already running.
    pub fn refresh(&self) {
        if self.current().is_some() {
            tracing::debug!("cached location still fresh");
            return;
        }
        if self.in_flight.swap(true, Ordering::AcqRel) {
            return;
        }
        let tracker = self.clone();
        tokio::spawn(async move {
            if let Err(e) = tracker.locate().await {
                tracing::warn!(error = %e, "location unavailable; submissions proceed without it");
            }
            tracker.in_flight.store(false, Ordering::Release);
        });
    }

    /// Query the provider, bounded by the tracker timeout, and cache the result.
    pub async fn locate(&self) -> Result<GeoFix, GeoError> {
        let fix = tokio::time::timeout(self.timeout, self.provider.locate())
            .await
            .map_err(|_| GeoError::Timeout)??;
        tracing::debug!(lat = fix.latitude, lon = fix.longitude, "location fix");
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = Some((fix, Instant::now()));
        Ok(fix)
    }
}
