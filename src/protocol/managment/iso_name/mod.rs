//! ISO 11783 NAME field (64 bits), the immutable identity a device
//! announces in PGN 60928 (ISO Address Claim) and the tie breaker of the
//! J1939 address-claim procedure: the numerically lower NAME wins.
//!
//! # Bit layout (little-endian order over the wire)
//!
//! ```text
//! Bits  0-20  (21 bits) : Unique number
//! Bits 21-31  (11 bits) : Manufacturer code
//! Bits 32-34  ( 3 bits) : Device instance (lower part)
//! Bits 35-39  ( 5 bits) : Device instance (upper part)
//! Bits 40-47  ( 8 bits) : Device function
//! Bit  48     ( 1 bit ) : Reserved
//! Bits 49-55  ( 7 bits) : Device class
//! Bits 56-59  ( 4 bits) : System instance
//! Bits 60-62  ( 3 bits) : Industry group
//! Bit  63     ( 1 bit ) : Arbitrary Address Capable
//! ```

use std::fmt;

/// Typed wrapper around the raw 64-bit NAME.
///
/// The wrapped value is the little-endian interpretation of the eight
/// payload bytes, which puts the Arbitrary Address Capable bit at the top:
/// comparing two wrapped values directly implements claim priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeName(u64);

impl NodeName {
    /// Wrap a raw (little-endian) NAME value.
    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Build from the eight payload bytes of PGN 60928.
    #[inline]
    pub const fn from_wire_bytes(bytes: [u8; 8]) -> Self {
        Self(u64::from_le_bytes(bytes))
    }

    /// The raw value; lower means higher claim priority.
    #[inline]
    pub const fn raw(&self) -> u64 {
        self.0
    }

    /// The payload bytes as they travel in PGN 60928.
    #[inline]
    pub const fn wire_bytes(&self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    /// Big-endian reading of the wire bytes, the form NAMEs are usually
    /// printed in by diagnostic tools.
    #[inline]
    pub const fn display_value(&self) -> u64 {
        self.0.swap_bytes()
    }

    /// Unique number (bits 0-20): the product serial within the
    /// manufacturer's lineup.
    #[inline]
    pub const fn unique_number(&self) -> u32 {
        (self.0 & 0x1F_FFFF) as u32
    }

    /// Manufacturer code (bits 21-31).
    #[inline]
    pub const fn manufacturer(&self) -> u16 {
        ((self.0 >> 21) & 0x7FF) as u16
    }

    /// Lower part of the device instance (bits 32-34).
    #[inline]
    pub const fn device_instance_lower(&self) -> u8 {
        ((self.0 >> 32) & 0x07) as u8
    }

    /// Upper part of the device instance (bits 35-39).
    #[inline]
    pub const fn device_instance_upper(&self) -> u8 {
        ((self.0 >> 35) & 0x1F) as u8
    }

    /// Full 8-bit device instance.
    #[inline]
    pub const fn device_instance(&self) -> u8 {
        self.device_instance_lower() | (self.device_instance_upper() << 3)
    }

    /// Device function (bits 40-47); meaning depends on the device class.
    #[inline]
    pub const fn device_function(&self) -> u8 {
        ((self.0 >> 40) & 0xFF) as u8
    }

    /// Device class (bits 49-55), above the reserved bit 48.
    #[inline]
    pub const fn device_class(&self) -> u8 {
        ((self.0 >> 49) & 0x7F) as u8
    }

    /// System instance (bits 56-59).
    #[inline]
    pub const fn system_instance(&self) -> u8 {
        ((self.0 >> 56) & 0x0F) as u8
    }

    /// Industry group (bits 60-62); 4 is marine.
    #[inline]
    pub const fn industry_group(&self) -> u8 {
        ((self.0 >> 60) & 0x07) as u8
    }

    /// Whether the node may move to another address (128-247) when it
    /// loses an address conflict.
    #[inline]
    pub const fn arbitrary_address_capable(&self) -> bool {
        (self.0 >> 63) != 0
    }

    #[inline]
    pub const fn is_marine(&self) -> bool {
        self.industry_group() == 4
    }
}

impl From<u64> for NodeName {
    fn from(raw: u64) -> Self {
        Self::from_raw(raw)
    }
}

impl From<NodeName> for u64 {
    fn from(name: NodeName) -> Self {
        name.raw()
    }
}

impl fmt::Display for NodeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016X}", self.display_value())
    }
}

#[cfg(test)]
#[path = "tests.rs"]
mod tests;
