// Mend - orchestration core for bounded single-edit program repair
// Library exports

pub mod config;
pub mod error;
pub mod instance;
pub mod patch;
pub mod process;
pub mod repair;
pub mod search;
pub mod testrun;
pub mod workspace;

pub use error::{RepairError, Result};
pub use instance::BugInstance;
