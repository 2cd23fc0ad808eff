//! Runtime model of the canboat PGN document: field and PGN definitions as
//! deserialized from JSON, load-time validation, and the read-only store
//! indexing definitions by numeric PGN.
//!
//! The document is produced by a schema-loading collaborator; this module
//! only consumes the already-read JSON text or value.

use crate::error::SchemaError;
use crate::infra::codec::raw_data::RawData;
use serde::Deserialize;
use std::collections::HashMap;

pub mod lookups;

pub use lookups::{LookupError, LookupTables};

//==================================================================================Field model

/// Semantic type of a PGN field, mirroring the canboat `FieldType` strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
pub enum FieldType {
    /// Little-endian integer, signed or unsigned per [`Field::signed`].
    #[serde(rename = "NUMBER")]
    #[default]
    Number,
    /// 32-bit IEEE-754 float.
    #[serde(rename = "FLOAT")]
    Float,
    /// Two BCD digits per byte.
    #[serde(rename = "DECIMAL")]
    Decimal,
    /// Index into a named [`lookups::LookupEnumeration`].
    #[serde(rename = "LOOKUP")]
    Lookup,
    /// Lookup whose meaning also depends on another field's value.
    #[serde(rename = "INDIRECT_LOOKUP")]
    IndirectLookup,
    /// Bitmask where each bit is a named flag.
    #[serde(rename = "BITLOOKUP")]
    BitLookup,
    /// Elapsed time scaled by the field resolution.
    #[serde(rename = "TIME")]
    Time,
    /// Days since the Unix epoch, 16 bits.
    #[serde(rename = "DATE")]
    Date,
    /// Fixed-length single-byte-codepoint string.
    #[serde(rename = "STRING_FIX")]
    StringFix,
    /// Start/stop-byte delimited string (legacy, not decoded).
    #[serde(rename = "STRING_VAR")]
    StringVar,
    /// Length-prefixed string.
    #[serde(rename = "STRING_LZ")]
    StringLz,
    /// Length- and encoding-prefixed string (UTF-16 or ASCII).
    #[serde(rename = "STRING_LAU")]
    StringLau,
    /// Opaque bits.
    #[serde(rename = "BINARY")]
    Binary,
    /// Reserved bits, transmitted as all ones.
    #[serde(rename = "RESERVED")]
    Reserved,
    /// Spare bits, transmitted as zeroes.
    #[serde(rename = "SPARE")]
    Spare,
    /// Maritime Mobile Service Identity, 32 bits.
    #[serde(rename = "MMSI")]
    Mmsi,
    /// Layout defined by a referenced PGN/field pair (not decoded).
    #[serde(rename = "VARIABLE")]
    Variable,
}

fn default_resolution() -> f64 {
    1.0
}

/// One field of a PGN definition.
#[derive(Debug, Clone, Deserialize)]
pub struct Field {
    #[serde(rename = "Id")]
    pub id: String,
    /// 1-based declaration order; referenced by INDIRECT_LOOKUP fields.
    #[serde(rename = "Order", default)]
    pub order: u8,
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "Description", default)]
    pub description: String,

    /// Non-zero literal the extracted value must equal for this PGN
    /// definition to match an ambiguous numeric PGN.
    #[serde(rename = "Match", default)]
    pub match_value: Option<u32>,
    #[serde(rename = "Unit", default)]
    pub unit: String,
    #[serde(rename = "PhysicalQuantity", default)]
    pub physical_quantity: String,

    #[serde(rename = "BitLength", default)]
    pub bit_length: u16,
    #[serde(rename = "BitOffset", default)]
    pub bit_offset: u16,
    #[serde(rename = "BitLengthVariable", default)]
    pub bit_length_variable: bool,
    #[serde(rename = "Signed", default)]
    pub signed: bool,
    #[serde(rename = "Offset", default)]
    pub offset: i32,
    /// Scale factor: decoded value is `offset + raw * resolution`.
    #[serde(rename = "Resolution", default = "default_resolution")]
    pub resolution: f64,
    #[serde(rename = "RangeMin", default)]
    pub range_min: f64,
    #[serde(rename = "RangeMax", default)]
    pub range_max: f64,

    #[serde(rename = "FieldType", default)]
    pub field_type: FieldType,
    #[serde(rename = "LookupEnumeration", default)]
    pub lookup_enumeration: String,
    #[serde(rename = "LookupBitEnumeration", default)]
    pub lookup_bit_enumeration: String,
    #[serde(rename = "LookupIndirectEnumeration", default)]
    pub lookup_indirect_enumeration: String,
    /// Declaration order of the field supplying the indirect key.
    #[serde(rename = "LookupIndirectEnumerationFieldOrder", default)]
    pub lookup_indirect_enumeration_field_order: u8,
}

impl Field {
    /// Whether the payload carries this field's match literal. Extraction
    /// failures deliberately count as "no match"; a zero literal declares
    /// nothing.
    pub fn is_match(&self, data: &[u8]) -> bool {
        let Some(expected) = self.match_value.filter(|v| *v != 0) else {
            return true;
        };
        RawData::new(data)
            .decode_variable_uint(self.bit_offset, self.bit_length)
            .map(|v| v == u64::from(expected))
            .unwrap_or(false)
    }

    fn validate(&self, pgn: u32, tables: &LookupTables) -> Result<(), SchemaError> {
        let fail = |reason: &'static str| {
            Err(SchemaError::InvalidField {
                pgn,
                field: self.id.clone(),
                reason,
            })
        };
        match self.field_type {
            FieldType::StringLau => {
                if !self.bit_length_variable {
                    return fail("STRING_LAU must be variable length");
                }
                if self.bit_length != 0 || self.bit_offset != 0 {
                    return fail("STRING_LAU must have zero bit length and offset");
                }
            }
            FieldType::Mmsi => {
                if self.bit_length != 32 {
                    return fail("MMSI bit length is not 32");
                }
            }
            FieldType::Date => {
                if self.bit_length != 16 {
                    return fail("DATE bit length is not 16");
                }
            }
            FieldType::Lookup => {
                if !tables.enum_exists(&self.lookup_enumeration) {
                    return Err(self.unknown_lookup(pgn, &self.lookup_enumeration));
                }
            }
            FieldType::IndirectLookup => {
                if !tables.indirect_enum_exists(&self.lookup_indirect_enumeration) {
                    return Err(self.unknown_lookup(pgn, &self.lookup_indirect_enumeration));
                }
            }
            FieldType::BitLookup => {
                if !tables.bit_enum_exists(&self.lookup_bit_enumeration) {
                    return Err(self.unknown_lookup(pgn, &self.lookup_bit_enumeration));
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn unknown_lookup(&self, pgn: u32, lookup: &str) -> SchemaError {
        SchemaError::UnknownLookup {
            pgn,
            field: self.id.clone(),
            lookup: lookup.to_owned(),
        }
    }
}

//==================================================================================PGN model

/// Single-frame, Fast Packet or ISO-TP framing, as declared per PGN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
pub enum PacketType {
    #[serde(rename = "Single")]
    #[default]
    Single,
    #[serde(rename = "Fast")]
    Fast,
    #[serde(rename = "ISO")]
    Iso,
}

/// One repeating field group of a PGN: `size` consecutive fields starting
/// at 1-based `start_field`, repeated as many times as the 1-based
/// `count_field` says (or until the payload runs out when zero).
#[derive(Debug, Clone, Copy, Default)]
pub struct RepeatingGroup {
    pub size: u8,
    pub start_field: u8,
    pub count_field: u8,
}

impl RepeatingGroup {
    pub fn is_declared(&self) -> bool {
        self.start_field > 0 && self.size > 0
    }

    /// 0-based index of the first member field.
    pub fn start_index(&self) -> usize {
        usize::from(self.start_field.saturating_sub(1))
    }

    /// 0-based index of the count field, when one is declared.
    pub fn count_index(&self) -> Option<usize> {
        (self.count_field > 0).then(|| usize::from(self.count_field - 1))
    }
}

/// One PGN definition. The numeric PGN is not unique: some PGNs appear
/// multiple times with different field sets and are told apart by their
/// match fields.
#[derive(Debug, Clone, Deserialize)]
pub struct PgnDefinition {
    #[serde(rename = "PGN")]
    pub pgn: u32,
    #[serde(rename = "Id", default)]
    pub id: String,
    #[serde(rename = "Description", default)]
    pub description: String,
    #[serde(rename = "Type", default)]
    pub packet_type: PacketType,
    /// `false` when the canboat project marks its knowledge incomplete.
    #[serde(rename = "Complete", default)]
    pub complete: bool,
    #[serde(rename = "FieldCount", default)]
    pub field_count: u16,
    #[serde(rename = "MinLength", default)]
    pub min_length: u16,
    #[serde(rename = "Length", default)]
    pub length: u16,
    #[serde(rename = "TransmissionInterval", default)]
    pub transmission_interval: u16,
    #[serde(rename = "TransmissionIrregular", default)]
    pub transmission_irregular: bool,

    #[serde(rename = "RepeatingFieldSet1Size", default)]
    repeating_field_set1_size: u8,
    #[serde(rename = "RepeatingFieldSet1StartField", default)]
    repeating_field_set1_start_field: u8,
    #[serde(rename = "RepeatingFieldSet1CountField", default)]
    repeating_field_set1_count_field: u8,
    #[serde(rename = "RepeatingFieldSet2Size", default)]
    repeating_field_set2_size: u8,
    #[serde(rename = "RepeatingFieldSet2StartField", default)]
    repeating_field_set2_start_field: u8,
    #[serde(rename = "RepeatingFieldSet2CountField", default)]
    repeating_field_set2_count_field: u8,

    #[serde(rename = "Fields", default)]
    pub fields: Vec<Field>,
}

impl PgnDefinition {
    /// The up to two repeating groups, declared ones only.
    pub fn repeating_groups(&self) -> impl Iterator<Item = RepeatingGroup> + '_ {
        [
            RepeatingGroup {
                size: self.repeating_field_set1_size,
                start_field: self.repeating_field_set1_start_field,
                count_field: self.repeating_field_set1_count_field,
            },
            RepeatingGroup {
                size: self.repeating_field_set2_size,
                start_field: self.repeating_field_set2_start_field,
                count_field: self.repeating_field_set2_count_field,
            },
        ]
        .into_iter()
        .filter(RepeatingGroup::is_declared)
    }

    pub fn has_repeating_groups(&self) -> bool {
        self.repeating_groups().next().is_some()
    }

    /// Whether any field declares a non-zero match literal.
    pub fn is_matchable(&self) -> bool {
        self.fields
            .iter()
            .any(|f| f.match_value.is_some_and(|v| v != 0))
    }

    /// A candidate matches when every declared match literal extracts
    /// exactly from the payload.
    pub fn is_match(&self, data: &[u8]) -> bool {
        self.is_matchable() && self.fields.iter().all(|f| f.is_match(data))
    }

    fn validate(&self, tables: &LookupTables) -> Result<(), SchemaError> {
        let mut seen = std::collections::HashSet::new();
        for (i, f) in self.fields.iter().enumerate() {
            if !seen.insert(f.id.as_str()) {
                return Err(SchemaError::DuplicateFieldId {
                    pgn: self.pgn,
                    field: f.id.clone(),
                });
            }
            let field_order = i + 1;
            let is_count_field = usize::from(self.repeating_field_set1_count_field) == field_order
                || usize::from(self.repeating_field_set2_count_field) == field_order;
            if is_count_field && f.field_type != FieldType::Number {
                return Err(SchemaError::CountFieldNotNumber {
                    pgn: self.pgn,
                    field: f.id.clone(),
                });
            }
            f.validate(self.pgn, tables)?;
        }

        for g in self.repeating_groups() {
            if g.count_field > 0 && g.start_field <= g.count_field {
                return Err(SchemaError::GroupBeforeCountField { pgn: self.pgn });
            }
            if g.start_index() + usize::from(g.size) > self.fields.len() {
                return Err(SchemaError::InvalidField {
                    pgn: self.pgn,
                    field: format!("repeating group at field {}", g.start_field),
                    reason: "group extends past the field list",
                });
            }
        }
        Ok(())
    }
}

//==================================================================================Document

/// Root element of the canboat JSON document.
#[derive(Debug, Clone, Deserialize)]
pub struct CanboatSchema {
    #[serde(rename = "Comment", default)]
    pub comment: String,
    #[serde(rename = "CreatorCode", default)]
    pub creator_code: String,
    #[serde(rename = "License", default)]
    pub license: String,
    #[serde(rename = "Version", default)]
    pub version: String,
    #[serde(rename = "PGNs", default)]
    pub pgns: Vec<PgnDefinition>,
    #[serde(rename = "LookupEnumerations", default)]
    pub lookup_enumerations: Vec<lookups::LookupEnumeration>,
    #[serde(rename = "LookupIndirectEnumerations", default)]
    pub lookup_indirect_enumerations: Vec<lookups::LookupIndirectEnumeration>,
    #[serde(rename = "LookupBitEnumerations", default)]
    pub lookup_bit_enumerations: Vec<lookups::LookupBitEnumeration>,
}

//==================================================================================Store

/// Read-only index of a validated schema, shared by the decoder and the
/// Fast Packet assembler configuration.
#[derive(Debug, Clone)]
pub struct SchemaStore {
    unique: HashMap<u32, PgnDefinition>,
    non_unique: HashMap<u32, Vec<PgnDefinition>>,
    tables: LookupTables,
}

impl SchemaStore {
    /// Parse and validate a canboat JSON document.
    pub fn from_json_str(text: &str) -> Result<Self, SchemaError> {
        let schema: CanboatSchema = serde_json::from_str(text)?;
        Self::from_schema(schema)
    }

    /// Build the store from an already-deserialized document, validating
    /// every definition. Any violation fails initialization.
    pub fn from_schema(schema: CanboatSchema) -> Result<Self, SchemaError> {
        let tables = LookupTables {
            enums: schema.lookup_enumerations,
            bit_enums: schema.lookup_bit_enumerations,
            indirect_enums: schema.lookup_indirect_enumerations,
        };

        let mut unique: HashMap<u32, PgnDefinition> = HashMap::new();
        let mut non_unique: HashMap<u32, Vec<PgnDefinition>> = HashMap::new();
        for pgn in schema.pgns {
            pgn.validate(&tables)?;
            if let Some(group) = non_unique.get_mut(&pgn.pgn) {
                group.push(pgn);
                continue;
            }
            match unique.remove(&pgn.pgn) {
                Some(existing) => {
                    non_unique.insert(pgn.pgn, vec![existing, pgn]);
                }
                None => {
                    unique.insert(pgn.pgn, pgn);
                }
            }
        }

        Ok(Self {
            unique,
            non_unique,
            tables,
        })
    }

    /// Resolve a PGN definition for a payload. Unique PGNs resolve by
    /// number; ambiguous ones by the first definition whose match fields
    /// extract their literals from the data.
    pub fn find(&self, pgn: u32, data: &[u8]) -> Option<&PgnDefinition> {
        if let Some(def) = self.unique.get(&pgn) {
            return Some(def);
        }
        self.non_unique
            .get(&pgn)?
            .iter()
            .find(|def| def.is_match(data))
    }

    /// All numeric PGNs whose declared packet type is Fast; feeds the
    /// assembler configuration.
    pub fn fast_packet_pgns(&self) -> Vec<u32> {
        let mut pgns: Vec<u32> = self
            .unique
            .values()
            .chain(self.non_unique.values().flatten())
            .filter(|def| def.packet_type == PacketType::Fast)
            .map(|def| def.pgn)
            .collect();
        pgns.sort_unstable();
        pgns.dedup();
        pgns
    }

    pub fn lookups(&self) -> &LookupTables {
        &self.tables
    }

    /// Number of distinct numeric PGNs known to the store.
    pub fn len(&self) -> usize {
        self.unique.len() + self.non_unique.len()
    }

    pub fn is_empty(&self) -> bool {
        self.unique.is_empty() && self.non_unique.is_empty()
    }
}
