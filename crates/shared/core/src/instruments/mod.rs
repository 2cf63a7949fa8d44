//! Exchange-side instrument metadata
//!
//! Symbol rules are published by the venue and used to round and clamp
//! prices and quantities before orders are sent.

mod rules;

pub use rules::SymbolRules;
