//! Core business logic abstractions

pub mod balances;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod locks;
pub mod log;
pub mod models;
pub mod portfolio;
pub mod price;
pub mod rates;
pub mod rebalance;
pub mod registers;
pub mod stats;
pub mod store;
pub mod sync;
pub mod transactions;

// Re-export main types for cleaner imports
pub use error::{ServiceError, ServiceResult};
pub use price::{CandleSource, SpotPriceProvider};
