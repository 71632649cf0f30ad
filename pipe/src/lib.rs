mod config;
mod error;
mod provider;
mod session;
mod timer;
pub(crate) mod validation;

pub use crate::config::ConfigSource;
pub use crate::config::EnvConfigSource;
pub use crate::config::ExporterConfig;
pub use crate::config::HttpProtocol;
pub use crate::config::MetricsConfig;
pub use crate::error::PipeError;
pub use crate::error::Result;
pub use crate::provider::SessionProvider;
pub use crate::session::Session;
pub use crate::timer::Stopwatch;
pub use crate::timer::StopwatchFactory;
pub use crate::timer::Timer;

use std::sync::OnceLock;

static GLOBAL_PROVIDER: OnceLock<SessionProvider> = OnceLock::new();

/// Process-wide [`SessionProvider`], created on first access.
///
/// Intended for self-hosted processes (console binaries) that want the
/// global-convenience lifecycle; everything else should construct and pass
/// an explicit provider.
pub fn global() -> &'static SessionProvider {
    GLOBAL_PROVIDER.get_or_init(SessionProvider::new)
}
