use super::*;
use pretty_assertions::assert_eq;

/// Captured Simrad autopilot address claim payload.
const SIMRAD_CLAIM: [u8; 8] = [0x1E, 0x7D, 0x3E, 0xE8, 0x00, 0x87, 0x32, 0xC0];

#[test]
fn parses_wire_bytes() {
    let name = NodeName::from_wire_bytes(SIMRAD_CLAIM);
    assert_eq!(name.unique_number(), 1_998_110);
    assert_eq!(name.manufacturer(), 1_857); // Simrad
    assert_eq!(name.device_instance_lower(), 0);
    assert_eq!(name.device_instance_upper(), 0);
    assert_eq!(name.device_function(), 135);
    assert_eq!(name.device_class(), 25);
    assert_eq!(name.system_instance(), 0);
    assert_eq!(name.industry_group(), 4);
    assert!(name.is_marine());
    assert!(name.arbitrary_address_capable());
}

#[test]
fn display_value_is_big_endian_reading() {
    let name = NodeName::from_wire_bytes(SIMRAD_CLAIM);
    assert_eq!(name.display_value(), 0x1E7D3EE8008732C0);
    assert_eq!(name.to_string(), "1E7D3EE8008732C0");
}

#[test]
fn wire_bytes_round_trip() {
    let name = NodeName::from_wire_bytes(SIMRAD_CLAIM);
    assert_eq!(name.wire_bytes(), SIMRAD_CLAIM);
    assert_eq!(NodeName::from_raw(name.raw()), name);
}

#[test]
fn raw_ordering_implements_claim_priority() {
    // The arbitrary-address bit is the most significant: a node without it
    // outranks one with it, everything else equal.
    let with_arbitrary = NodeName::from_wire_bytes(SIMRAD_CLAIM);
    let mut fixed = SIMRAD_CLAIM;
    fixed[7] &= 0x7F;
    let without_arbitrary = NodeName::from_wire_bytes(fixed);
    assert!(without_arbitrary < with_arbitrary);
}

#[test]
fn device_instance_merges_parts() {
    // lower 0b101, upper 0b01001 -> 0b01001101.
    let raw = (0b101u64 << 32) | (0b01001u64 << 35);
    let name = NodeName::from_raw(raw);
    assert_eq!(name.device_instance(), 0b0100_1101);
}
