//! Shared data structures for the tightening monitor
//!
//! - Cycle vocabulary: Label, Verdict, RegistryKey
//! - Wire contracts of the prediction and data services

mod cycle;
mod requests;

pub use cycle::*;
pub use requests::*;
