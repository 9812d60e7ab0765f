//! Transaction confirmation.
//!
//! A confirmation races a push notification from the live connection
//! against a bounded polling loop; a one-way latch lets only the first
//! result through to the state store.

mod confirmer;
mod pending;

pub use confirmer::*;
pub use pending::*;
