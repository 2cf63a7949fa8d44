//! Wire message types
//!
//! Venue-neutral shapes for orders and account state. Adapters translate
//! these to and from a specific exchange's format.

pub mod account;
pub mod order;
