//! Exchange adapters
//!
//! Each adapter implements [`crate::ExchangeGateway`] for one venue. Live
//! venue adapters translate the wire types in [`crate::messages`] to the
//! exchange's own format; the paper venue fills orders in memory.

pub mod paper;

pub use paper::{MakerFillMode, PaperExchange};
