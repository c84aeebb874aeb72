//! The compiler driver: reads textual MIR, runs the lowering pipeline over it and emits the
//! requested representations.

pub mod operations;
pub mod pipeline;
pub mod query;
