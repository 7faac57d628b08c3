pub mod config;
pub mod liveness;
pub mod logging;
pub mod market;
pub mod notify;
pub mod scanner;
pub mod signals;
