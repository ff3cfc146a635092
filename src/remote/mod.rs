//! Network side of the engine: transport, credentials and fetcher.

mod client;
mod fetcher;

pub use client::{HttpTransport, NetworkWrite, Transport, WriteMethod};
pub use fetcher::{Credentials, Fetcher};
