//! Typed façade over the Iris project-health tools
//!
//! Every operation here is a client-side shape transformation around
//! `tools/call`; no extra protocol behavior lives in this layer.

pub mod ops;
pub mod types;

pub use ops::IrisTools;
