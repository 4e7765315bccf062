pub mod config;
pub mod errors;
pub mod fulfillment;
pub mod logging;
