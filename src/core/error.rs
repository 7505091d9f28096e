/// Failures surfaced by the browser capability layer.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("navigation timeout: {0}")]
    Timeout(String),
    #[error("tab or session unexpectedly closed: {0}")]
    TabClosed(String),
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("script evaluation failed: {0}")]
    Eval(String),
    #[error("browser launch failed: {0}")]
    Launch(String),
}

impl DriverError {
    /// Fatal errors need a fresh tab (and possibly a session restart)
    /// before the task can be retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DriverError::TabClosed(_) | DriverError::Launch(_))
    }
}

/// Per-task error taxonomy. All of these are caught at the worker boundary;
/// none abort the pool.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("challenge not cleared within bound")]
    ChallengeUnresolved,
    #[error("page load failed: {0}")]
    PageLoad(String),
    #[error("driver fatal: {0}")]
    DriverFatal(String),
    #[error("retry budget exhausted after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },
}

impl From<DriverError> for TaskError {
    fn from(e: DriverError) -> Self {
        match e {
            DriverError::TabClosed(m) | DriverError::Launch(m) => TaskError::DriverFatal(m),
            DriverError::Timeout(m) | DriverError::Navigation(m) => TaskError::PageLoad(m),
            DriverError::Eval(m) => TaskError::PageLoad(m),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_driver_errors_need_a_new_tab() {
        assert!(DriverError::TabClosed("gone".into()).is_fatal());
        assert!(DriverError::Launch("no browser".into()).is_fatal());
        assert!(!DriverError::Timeout("slow".into()).is_fatal());
        assert!(!DriverError::Navigation("dns".into()).is_fatal());
    }

    #[test]
    fn driver_errors_map_onto_the_task_taxonomy() {
        assert!(matches!(
            TaskError::from(DriverError::TabClosed("gone".into())),
            TaskError::DriverFatal(_)
        ));
        assert!(matches!(
            TaskError::from(DriverError::Launch("no browser".into())),
            TaskError::DriverFatal(_)
        ));
        assert!(matches!(
            TaskError::from(DriverError::Navigation("dns".into())),
            TaskError::PageLoad(_)
        ));
        assert!(matches!(
            TaskError::from(DriverError::Eval("bad script".into())),
            TaskError::PageLoad(_)
        ));
    }
}
