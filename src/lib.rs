//! Monthly AI visibility scan for car dealerships.
//!
//! Asks every configured AI answer platform a set of car-shopping questions
//! about every dealer in the roster, scores how prominently each dealer is
//! mentioned, ranks the dealers and writes the leaderboard, customer and
//! public dashboard reports.
//!
//! The entry point is [`scan::ScanService::run_monthly_scan`].

pub mod aggregator;
pub mod circuit_breaker;
pub mod config;
pub mod corpus;
pub mod error;
pub mod executor;
pub mod mention_analyzer;
pub mod metrics;
pub mod models;
pub mod platforms;
pub mod rate_limiter;
pub mod ranking;
pub mod reports;
pub mod roster;
pub mod scan;

pub use error::{PlatformError, RunFatalError, StoreError};
pub use models::{Dealer, ScanRun, ScanResult};
pub use scan::ScanService;
