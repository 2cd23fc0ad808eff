//! Payload codecs: [`raw_data`] extracts bit-packed primitives out of a
//! byte buffer, [`engine`] drives those primitives from canboat PGN
//! definitions to produce typed messages.
pub mod engine;
pub mod raw_data;
