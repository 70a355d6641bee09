pub mod config;
pub mod keys;
pub mod logger;
pub mod rpc;
