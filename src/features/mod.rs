pub mod notify;
pub mod solver;

pub use notify::Notifier;
pub use solver::{SolverClient, SolverError};
