//! Ledger node client over the nonblocking Solana `RpcClient`

mod client;
mod error;
mod types;

pub use client::*;
pub use error::*;
pub use types::*;
