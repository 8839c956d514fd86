// Library for tests to access modules

pub mod aggregator;
pub mod clock;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod history_cache;
pub mod log_throttle;
pub mod models;
pub mod pipeline;
pub mod routes;
pub mod scrap_repo;
pub mod simulator;
pub mod version;
pub mod view;
pub mod worker;
