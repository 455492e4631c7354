//! CLI command handlers, one file per command.

mod add;
mod check;
mod export;
mod import;
mod run;
mod status;

pub use add::run_add;
pub use check::run_check;
pub use export::run_export;
pub use import::run_import;
pub use run::run_jobs;
pub use status::run_status;
