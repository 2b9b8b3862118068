pub mod binance;
pub mod caching;
pub mod synthetic;
pub mod util;
pub mod yahoo_finance;
