//! Named lookup tables from the canboat document: plain enumerations,
//! bit enumerations (one flag per bit) and indirect enumerations (keyed by
//! the value of another field).

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LookupError {
    /// The named table does not exist in the schema.
    #[error("unknown enum type given")]
    UnknownEnum,
    /// The table exists but has no entry for the value.
    #[error("unknown enum value given")]
    UnknownValue,
}

//==================================================================================Plain enumerations

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LookupEnumeration {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "EnumValues", default)]
    pub values: Vec<LookupValue>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LookupValue {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Value")]
    pub value: u32,
}

//==================================================================================Bit enumerations

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LookupBitEnumeration {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "EnumBitValues", default)]
    pub values: Vec<LookupBitValue>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LookupBitValue {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Bit")]
    pub bit: u32,
}

//==================================================================================Indirect enumerations

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LookupIndirectEnumeration {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "EnumValues", default)]
    pub values: Vec<LookupIndirectValue>,
}

/// `Value1` is the value of the referenced (indirect) field, `Value2` the
/// value of the field carrying the lookup.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LookupIndirectValue {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Value1")]
    pub indirect_value: u32,
    #[serde(rename = "Value2")]
    pub value: u32,
}

//==================================================================================Tables

/// The three lookup families of a loaded schema, with find helpers used at
/// enum-inflation time.
#[derive(Debug, Clone, Default)]
pub struct LookupTables {
    pub enums: Vec<LookupEnumeration>,
    pub bit_enums: Vec<LookupBitEnumeration>,
    pub indirect_enums: Vec<LookupIndirectEnumeration>,
}

impl LookupTables {
    pub fn find_value(&self, enum_name: &str, value: u32) -> Result<&LookupValue, LookupError> {
        let e = self
            .enums
            .iter()
            .find(|e| e.name == enum_name)
            .ok_or(LookupError::UnknownEnum)?;
        e.values
            .iter()
            .find(|v| v.value == value)
            .ok_or(LookupError::UnknownValue)
    }

    /// Every named bit set in `value`. A zero value resolves to an empty
    /// list; a non-zero value matching no named bit is an unknown value.
    pub fn find_bit_values(
        &self,
        enum_name: &str,
        value: u32,
    ) -> Result<Vec<&LookupBitValue>, LookupError> {
        let e = self
            .bit_enums
            .iter()
            .find(|e| e.name == enum_name)
            .ok_or(LookupError::UnknownEnum)?;
        if value == 0 {
            return Ok(Vec::new());
        }
        let hits: Vec<&LookupBitValue> = e
            .values
            .iter()
            .filter(|v| v.bit < 32 && value & (1 << v.bit) != 0)
            .collect();
        if hits.is_empty() {
            return Err(LookupError::UnknownValue);
        }
        Ok(hits)
    }

    pub fn find_indirect_value(
        &self,
        enum_name: &str,
        value: u32,
        indirect_value: u32,
    ) -> Result<&LookupIndirectValue, LookupError> {
        let e = self
            .indirect_enums
            .iter()
            .find(|e| e.name == enum_name)
            .ok_or(LookupError::UnknownEnum)?;
        e.values
            .iter()
            .find(|v| v.value == value && v.indirect_value == indirect_value)
            .ok_or(LookupError::UnknownValue)
    }

    pub fn enum_exists(&self, name: &str) -> bool {
        self.enums.iter().any(|e| e.name == name)
    }

    pub fn bit_enum_exists(&self, name: &str) -> bool {
        self.bit_enums.iter().any(|e| e.name == name)
    }

    pub fn indirect_enum_exists(&self, name: &str) -> bool {
        self.indirect_enums.iter().any(|e| e.name == name)
    }
}
