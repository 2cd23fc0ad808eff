//! Infrastructure shared by the protocol layers: bit-level payload access
//! and the schema-driven decoding engine.
pub mod codec;
