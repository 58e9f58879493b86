//! Batched SOL and SPL token payouts to the repliers of a V2EX post, with an
//! optional seeded lottery draw to pick who gets paid.

pub mod batch;
pub mod cancel;
pub mod config;
pub mod coordinator;
pub mod draw;
pub mod error;
pub mod events;
pub mod recipient;
pub mod rpc;
pub mod submit;
pub mod transfer;
pub mod wallet;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{DropError, Result};
