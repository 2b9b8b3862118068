pub mod assets;
pub mod balances;
pub mod convert;
pub mod setup;
pub mod sync;
pub mod transactions;
pub mod ui;
