use std::sync::Arc;

use crate::core::clock::{Clock, SystemClock};
use crate::core::config::TrackerConfig;
use crate::features::notify::Notifier;
use crate::features::solver::SolverClient;

/// Process-wide collaborators, constructed once in `main` and passed by
/// reference into the scheduler — no ambient singletons.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<TrackerConfig>,
    pub clock: Arc<dyn Clock>,
    /// Automatic captcha solving; `None` = manual-wait fallback only.
    pub solver: Option<Arc<SolverClient>>,
    /// Best-effort chat notifications; `None` = disabled.
    pub notifier: Option<Arc<Notifier>>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("solver_enabled", &self.solver.is_some())
            .field("notifier_enabled", &self.notifier.is_some())
            .finish()
    }
}

impl AppState {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config: Arc::new(config),
            clock: Arc::new(SystemClock),
            solver: None,
            notifier: None,
        }
    }

    pub fn with_solver(mut self, solver: Arc<SolverClient>) -> Self {
        self.solver = Some(solver);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}
