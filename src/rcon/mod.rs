//! Remote console client.

mod client;
pub mod packet;

pub use client::RconClient;
