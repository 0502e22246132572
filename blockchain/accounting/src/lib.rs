pub mod config;
pub mod math;
pub mod models;
pub mod oracle;
pub mod refresh;
pub mod report;
pub mod sources;
pub mod utils;

pub use config::EngineConfig;
pub use math::Decimal;
pub use refresh::{refresh_cycle, RefreshContext, RefreshCycle};
