//! NMEA 2000 protocol logic: CAN identifier and Fast Packet transport,
//! plus network management (NAME handling, bus address mapping).
pub mod managment;
pub mod transport;
