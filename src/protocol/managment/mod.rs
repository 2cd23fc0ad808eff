//! Network management: NAME field handling and the bus address mapper that
//! tracks which physical node currently owns each source address.
pub mod address_mapper;
pub mod iso_name;
