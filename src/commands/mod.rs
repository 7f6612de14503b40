pub mod admin;
pub mod run;

// Re-export command functions for convenience
pub use admin::{add, list, remove, restart, schedule, status, update};
pub use run::run;
