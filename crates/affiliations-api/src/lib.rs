//! HTTP facade over the affiliations kernel: authenticated read endpoints
//! for wallets and relations, the casino spend entry point, and tree
//! layouts for the external renderer.

mod server;

pub use server::{serve, ServerError};
