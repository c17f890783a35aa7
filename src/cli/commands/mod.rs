//! CLI command implementations.

mod check;
mod config;
mod consult;
mod serve;
mod viva;

pub use check::run_check;
pub use config::run_config;
pub use consult::run_consult;
pub use serve::{router, run_serve, AppState};
pub use viva::{run_viva, VivaOptions};
