//! Ready-made implementations of the crate's trait contracts

mod json;

pub mod memory;

pub use json::*;
