pub mod cli;
pub mod config;
pub mod engine;
mod logging;

pub use engine::{plan, provision, Host, SystemHost};
pub use logging::{background_log::BackgroundLog, metrics::MetricsLayer, multilog::MultiLogger};

/// diskprov version as provided by environment variables at build time
pub const DISKPROV_VERSION: &str = match option_env!("DISKPROV_VERSION") {
    Some(v) => v,
    None => env!("CARGO_PKG_VERSION"),
};
