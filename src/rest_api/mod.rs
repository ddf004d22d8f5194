//! HTTP endpoints for probes and metrics scraping

mod server;

pub use server::run_server;
