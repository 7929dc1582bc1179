pub mod api;
pub mod cli;
pub mod config;
pub mod error;
pub mod http;
pub mod metrics;
pub mod model;
pub mod poller;
pub mod resolve;
