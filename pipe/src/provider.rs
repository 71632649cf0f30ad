use crate::config::ConfigSource;
use crate::config::EnvConfigSource;
use crate::config::MetricsConfig;
use crate::error::Result;
use crate::session::Session;
use crate::timer::StopwatchFactory;
use crate::timer::default_stopwatch_factory;
use std::sync::Arc;
use std::sync::Mutex;
use tracing::warn;

/// Owns at most one [`Session`] at a time and mediates its lifecycle.
///
/// The provider is an explicit handle meant to be passed to the code that
/// needs it; self-hosted processes that want global convenience can use
/// [`crate::global`] instead. Access to the held session is serialized, so
/// `start`/`stop`/`current` are safe to call from concurrent threads.
pub struct SessionProvider {
    source: Arc<dyn ConfigSource>,
    stopwatch: StopwatchFactory,
    current: Mutex<Option<Session>>,
}

impl Default for SessionProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionProvider {
    /// Provider backed by the environment configuration source.
    pub fn new() -> Self {
        Self::with_source(EnvConfigSource)
    }

    pub fn with_source(source: impl ConfigSource + 'static) -> Self {
        Self {
            source: Arc::new(source),
            stopwatch: default_stopwatch_factory(),
            current: Mutex::new(None),
        }
    }

    /// Substitute the stopwatch factory handed to new sessions.
    pub fn with_stopwatch_factory(mut self, stopwatch: StopwatchFactory) -> Self {
        self.stopwatch = stopwatch;
        self
    }

    /// The currently held session, if any.
    pub fn current(&self) -> Option<Session> {
        self.current
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Fetch configuration from the provider's source and start a session.
    pub fn start(&self) -> Result<Session> {
        let config = self.source.fetch()?;
        self.start_with(config)
    }

    /// Start a session from an explicit configuration.
    ///
    /// Any previously held session is stopped and released, best effort,
    /// before being replaced; teardown failures of the old session are
    /// logged rather than returned.
    pub fn start_with(&self, config: MetricsConfig) -> Result<Session> {
        config.validate()?;
        let session = Session::new(config, self.stopwatch.clone())?;

        let previous = self
            .current
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .replace(session.clone());
        if let Some(previous) = previous {
            if let Err(error) = teardown(&previous) {
                warn!("failed to stop replaced metrics session: {error}");
            }
        }

        Ok(session)
    }

    /// Stop and release the current session, clearing the holder.
    ///
    /// Returns `Ok(None)` when no session is held; a second `stop` after a
    /// successful one is therefore a no-op rather than a double teardown.
    pub fn stop(&self) -> Result<Option<Session>> {
        let session = self
            .current
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        let Some(session) = session else {
            return Ok(None);
        };
        teardown(&session)?;
        Ok(Some(session))
    }
}

// Stop, then release. The release runs even when the stop signal fails;
// the first error wins.
fn teardown(session: &Session) -> Result<()> {
    let stopped = session.stop();
    let released = session.release();
    stopped?;
    released?;
    Ok(())
}
