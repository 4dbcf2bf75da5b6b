//! Elementary stream parsing.

pub mod adts;
pub mod annexb;

pub use adts::{AdtsHeader, AdtsReader};
pub use annexb::{AccessUnitSplitter, NalType};
