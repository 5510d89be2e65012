pub mod config;
pub mod context;
pub mod error;
pub mod lifecycle;
pub mod metrics;
pub mod rate_limit;
pub mod recorder;
pub mod route;
