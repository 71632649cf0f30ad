use crate::error::Result;
use crate::session::Session;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

/// A started elapsed-time measurement.
#[derive(Clone, Copy, Debug)]
pub struct Stopwatch {
    started_at: Instant,
}

impl Stopwatch {
    pub fn start_new() -> Self {
        Self::started_at(Instant::now())
    }

    /// A stopwatch that has been running since `instant`.
    pub fn started_at(instant: Instant) -> Self {
        Self {
            started_at: instant,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// Produces running stopwatches for a session. Injectable so tests can
/// substitute a deterministic clock.
pub type StopwatchFactory = Arc<dyn Fn() -> Stopwatch + Send + Sync>;

pub(crate) fn default_stopwatch_factory() -> StopwatchFactory {
    Arc::new(Stopwatch::start_new)
}

/// Records a duration histogram when dropped (or explicitly via
/// [`Timer::record`]).
pub struct Timer {
    name: String,
    tags: Vec<(String, String)>,
    session: Session,
    stopwatch: Stopwatch,
}

impl Drop for Timer {
    fn drop(&mut self) {
        if let Err(e) = self.record() {
            tracing::error!("metrics session error: {}", e);
        }
    }
}

impl Timer {
    pub(crate) fn new(
        name: &str,
        tags: &[(&str, &str)],
        session: &Session,
        stopwatch: Stopwatch,
    ) -> Self {
        Self {
            name: name.to_string(),
            tags: tags
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            session: session.clone(),
            stopwatch,
        }
    }

    pub fn record(&self) -> Result<()> {
        let tags = self
            .tags
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect::<Vec<_>>();
        self.session
            .record_duration(&self.name, self.stopwatch.elapsed(), &tags)
    }
}
