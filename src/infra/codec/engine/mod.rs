//! Schema-driven decoding engine: walks the field list of a matched PGN
//! definition, dispatches each field to the bit codec by type, and shapes
//! the results into a typed [`Message`].
//!
//! The reserved sentinel codepoints are not faults: a field decoding to
//! *no data*, *out of range* or *reserved* is omitted from the output and
//! the walk continues. Any other field failure aborts the whole message.

use crate::core::{EnumValue, FieldValue, Message, RawMessage, Value};
use crate::error::DecodeError;
use crate::infra::codec::raw_data::RawData;
use crate::schema::{Field, FieldType, PgnDefinition, RepeatingGroup, SchemaStore};

/// Output shaping switches. All off by default: reserved/spare fields are
/// dropped and lookups stay raw integers.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecoderConfig {
    /// Include RESERVED fields in the output as byte values.
    pub decode_reserved_fields: bool,
    /// Include SPARE fields in the output as byte values.
    pub decode_spare_fields: bool,
    /// Replace LOOKUP/INDIRECT_LOOKUP/BITLOOKUP integers with resolved
    /// enum entries (or a synthetic "unknown" entry).
    pub decode_lookups_to_enum_type: bool,
}

/// PGN decoder over a shared read-only [`SchemaStore`].
pub struct Decoder<'s> {
    store: &'s SchemaStore,
    config: DecoderConfig,
}

/// One decoded field still carrying its definition, so enum inflation can
/// reference fields by declaration order afterwards.
struct DecodedField<'a> {
    field: &'a Field,
    value: Value,
}

/// Synthetic field ids under which group instances surface in the output.
const FIELDSET_IDS: [&str; 2] = ["FIELDSET_1", "FIELDSET_2"];

impl<'s> Decoder<'s> {
    pub fn new(store: &'s SchemaStore) -> Self {
        Self::with_config(store, DecoderConfig::default())
    }

    pub fn with_config(store: &'s SchemaStore, config: DecoderConfig) -> Self {
        Self { store, config }
    }

    /// Decode one reassembled message into typed field values.
    pub fn decode(&self, raw: &RawMessage) -> Result<Message, DecodeError> {
        let definition = self
            .store
            .find(raw.header.pgn, &raw.data)
            .ok_or(DecodeError::UnknownPgn {
                pgn: raw.header.pgn,
            })?;

        let data = RawData::new(&raw.data);
        let (plain, groups) = self.walk_fields(definition, data)?;

        let mut fields = self.inflate(&plain)?;
        for (slot, instances) in groups.into_iter().enumerate() {
            if instances.is_empty() {
                continue;
            }
            let mut sets = Vec::with_capacity(instances.len());
            for instance in &instances {
                sets.push(self.inflate(instance)?);
            }
            fields.push(FieldValue::new(FIELDSET_IDS[slot], Value::FieldSet(sets)));
        }

        Ok(Message {
            time: raw.time,
            header: raw.header,
            fields,
        })
    }

    //==================================================================================Field walk

    /// Sequentially decode the definition's fields, entering group mode at
    /// each declared repeating-group start. Returns the plain fields and up
    /// to two lists of group instances.
    #[allow(clippy::type_complexity)]
    fn walk_fields<'a>(
        &self,
        definition: &'a PgnDefinition,
        data: RawData<'_>,
    ) -> Result<(Vec<DecodedField<'a>>, [Vec<Vec<DecodedField<'a>>>; 2]), DecodeError> {
        let groups: Vec<RepeatingGroup> = definition.repeating_groups().collect();
        let bit_count = data.bit_len();

        let mut plain: Vec<DecodedField<'a>> = Vec::with_capacity(definition.fields.len());
        let mut group_values: [Vec<Vec<DecodedField<'a>>>; 2] = [Vec::new(), Vec::new()];

        let mut bit_offset: u16 = 0;
        let mut index = 0usize;
        // Decoding stops cleanly at the payload's bit budget even when the
        // definition declares more (optional trailing) fields.
        while index < definition.fields.len() && bit_offset < bit_count {
            if let Some((slot, group)) = groups
                .iter()
                .enumerate()
                .find(|(_, g)| g.start_index() == index)
            {
                let count = group
                    .count_index()
                    .map(|ci| Self::count_from(&plain, definition, ci));
                group_values[slot] =
                    self.walk_group(definition, group, count, data, &mut bit_offset)?;
                index = group.start_index() + usize::from(group.size);
            } else {
                let field = &definition.fields[index];
                if let Some(value) = self.decode_field(field, data, &mut bit_offset)? {
                    plain.push(DecodedField { field, value });
                }
                index += 1;
            }
        }
        Ok((plain, group_values))
    }

    /// Repetition count for a group, taken from its already-decoded count
    /// field. A dropped (sentinel) count field yields zero instances.
    fn count_from(plain: &[DecodedField<'_>], definition: &PgnDefinition, ci: usize) -> usize {
        let Some(count_field) = definition.fields.get(ci) else {
            return 0;
        };
        plain
            .iter()
            .find(|d| std::ptr::eq(d.field, count_field))
            .and_then(|d| d.value.as_u64())
            .map(|v| v as usize)
            .unwrap_or(0)
    }

    /// Decode `count` instances of the group's member fields (or, without a
    /// count field, whole instances until the bit budget runs out).
    fn walk_group<'a>(
        &self,
        definition: &'a PgnDefinition,
        group: &RepeatingGroup,
        count: Option<usize>,
        data: RawData<'_>,
        bit_offset: &mut u16,
    ) -> Result<Vec<Vec<DecodedField<'a>>>, DecodeError> {
        let members =
            &definition.fields[group.start_index()..group.start_index() + usize::from(group.size)];
        let bit_count = data.bit_len();

        let mut instances = Vec::new();
        loop {
            if let Some(n) = count {
                if instances.len() >= n {
                    break;
                }
            }
            if *bit_offset >= bit_count {
                break;
            }
            let instance_start = *bit_offset;
            let mut instance = Vec::with_capacity(members.len());
            for field in members {
                if *bit_offset >= bit_count {
                    break;
                }
                if let Some(value) = self.decode_field(field, data, bit_offset)? {
                    instance.push(DecodedField { field, value });
                }
            }
            // Zero-width instances cannot make progress against the bit
            // budget; stop rather than spin.
            if *bit_offset == instance_start {
                break;
            }
            instances.push(instance);
        }
        Ok(instances)
    }

    //==================================================================================Single field

    /// Decode one field at the running offset. Advances the offset by the
    /// bits consumed and returns `None` for skipped or sentinel fields.
    fn decode_field(
        &self,
        field: &Field,
        data: RawData<'_>,
        bit_offset: &mut u16,
    ) -> Result<Option<Value>, DecodeError> {
        let skip_entirely = (field.field_type == FieldType::Reserved
            && !self.config.decode_reserved_fields)
            || (field.field_type == FieldType::Spare && !self.config.decode_spare_fields);
        if skip_entirely {
            *bit_offset += field.bit_length;
            return Ok(None);
        }

        match self.extract(field, data, *bit_offset) {
            Ok((value, read_bits)) => {
                *bit_offset += read_bits;
                Ok(Some(value))
            }
            Err(e) if e.is_sentinel() => {
                // Absent value: skip the field's declared width.
                *bit_offset += field.bit_length;
                Ok(None)
            }
            Err(e) => Err(DecodeError::Field {
                field: field.id.clone(),
                source: e,
            }),
        }
    }

    /// Type dispatch into the bit codec. Returns the value and the number
    /// of bits consumed (the declared length for fixed-width types).
    fn extract(
        &self,
        field: &Field,
        data: RawData<'_>,
        bit_offset: u16,
    ) -> Result<(Value, u16), crate::error::FieldError> {
        use crate::error::FieldError;

        let fixed = field.bit_length;
        match field.field_type {
            FieldType::Number
            | FieldType::Lookup
            | FieldType::IndirectLookup
            | FieldType::BitLookup => {
                let value = if field.signed {
                    let raw = data.decode_variable_int(bit_offset, fixed)?;
                    self.scale_signed(field, raw)
                } else {
                    let raw = data.decode_variable_uint(bit_offset, fixed)?;
                    self.scale_unsigned(field, raw)
                };
                Ok((value, fixed))
            }
            FieldType::Float => Ok((Value::Float(data.decode_float(bit_offset, fixed)?), fixed)),
            FieldType::Decimal => Ok((
                Value::Uint(data.decode_decimal(bit_offset, fixed)?),
                fixed,
            )),
            FieldType::Mmsi => Ok((
                Value::Uint(data.decode_variable_uint(bit_offset, fixed)?),
                fixed,
            )),
            FieldType::Time => Ok((
                Value::Duration(data.decode_time(bit_offset, fixed, field.resolution)?),
                fixed,
            )),
            FieldType::Date => Ok((Value::Date(data.decode_date(bit_offset, fixed)?), fixed)),
            FieldType::StringFix => Ok((
                Value::String(data.decode_string_fix(bit_offset, fixed)?),
                fixed,
            )),
            FieldType::StringLz => {
                let (s, read) = data.decode_string_lz(bit_offset, fixed)?;
                Ok((Value::String(s), read))
            }
            FieldType::StringLau => {
                let (s, read) = data.decode_string_lau(bit_offset)?;
                Ok((Value::String(s), read))
            }
            FieldType::Binary | FieldType::Reserved | FieldType::Spare => {
                let (bytes, read) =
                    data.decode_bytes(bit_offset, fixed, field.bit_length_variable)?;
                Ok((Value::Bytes(bytes), read))
            }
            FieldType::StringVar | FieldType::Variable => Err(FieldError::InvalidFormat {
                reason: "unsupported field type",
            }),
        }
    }

    /// `value = offset + raw * resolution`; integral output when the
    /// resolution is exactly 1.
    fn scale_unsigned(&self, field: &Field, raw: u64) -> Value {
        if field.resolution == 1.0 {
            if field.offset != 0 {
                return Value::Int(i64::from(field.offset) + raw as i64);
            }
            return Value::Uint(raw);
        }
        Value::Float(f64::from(field.offset) + raw as f64 * field.resolution)
    }

    fn scale_signed(&self, field: &Field, raw: i64) -> Value {
        if field.resolution == 1.0 {
            return Value::Int(i64::from(field.offset) + raw);
        }
        Value::Float(f64::from(field.offset) + raw as f64 * field.resolution)
    }

    //==================================================================================Enum inflation

    /// Turn one level of decoded fields into output values, resolving
    /// lookups against the schema tables when configured.
    fn inflate(&self, decoded: &[DecodedField<'_>]) -> Result<Vec<FieldValue>, DecodeError> {
        let mut out = Vec::with_capacity(decoded.len());
        for d in decoded {
            let is_lookup = matches!(
                d.field.field_type,
                FieldType::Lookup | FieldType::IndirectLookup | FieldType::BitLookup
            );
            let value = if self.config.decode_lookups_to_enum_type && is_lookup {
                self.resolve_enum(d, decoded)?
            } else {
                d.value.clone()
            };
            out.push(FieldValue {
                id: d.field.id.clone(),
                value,
            });
        }
        Ok(out)
    }

    fn resolve_enum(
        &self,
        d: &DecodedField<'_>,
        siblings: &[DecodedField<'_>],
    ) -> Result<Value, DecodeError> {
        use crate::schema::LookupError;

        let raw = d
            .value
            .as_u64()
            .ok_or_else(|| DecodeError::EnumValueNotInteger {
                field: d.field.id.clone(),
            })? as u32;
        let tables = self.store.lookups();

        match d.field.field_type {
            FieldType::Lookup => match tables.find_value(&d.field.lookup_enumeration, raw) {
                Ok(v) => Ok(Value::Enum(EnumValue {
                    value: v.value,
                    code: v.name.clone(),
                })),
                Err(LookupError::UnknownValue) => Ok(Value::Enum(EnumValue {
                    value: raw,
                    code: "UNKNOWN ENUM VALUE".to_owned(),
                })),
                Err(LookupError::UnknownEnum) => Err(DecodeError::EnumValueNotInteger {
                    field: d.field.id.clone(),
                }),
            },
            FieldType::BitLookup => {
                match tables.find_bit_values(&d.field.lookup_bit_enumeration, raw) {
                    Ok(bits) => Ok(Value::EnumSet(
                        bits.iter()
                            .map(|b| EnumValue {
                                value: b.bit,
                                code: b.name.clone(),
                            })
                            .collect(),
                    )),
                    Err(LookupError::UnknownValue) => Ok(Value::EnumSet(vec![EnumValue {
                        value: raw,
                        code: "UNKNOWN BIT ENUM VALUE".to_owned(),
                    }])),
                    Err(LookupError::UnknownEnum) => Err(DecodeError::EnumValueNotInteger {
                        field: d.field.id.clone(),
                    }),
                }
            }
            FieldType::IndirectLookup => {
                let order = d.field.lookup_indirect_enumeration_field_order;
                // The indirect key is the already-decoded field with the
                // declared order, looked up per message rather than via any
                // back-link in the schema.
                let indirect = siblings
                    .iter()
                    .find(|s| s.field.order == order)
                    .ok_or(DecodeError::IndirectFieldMissing {
                        field: d.field.id.clone(),
                        order,
                    })?;
                let indirect_raw =
                    indirect
                        .value
                        .as_u64()
                        .ok_or_else(|| DecodeError::EnumValueNotInteger {
                            field: indirect.field.id.clone(),
                        })? as u32;
                match tables.find_indirect_value(
                    &d.field.lookup_indirect_enumeration,
                    raw,
                    indirect_raw,
                ) {
                    Ok(v) => Ok(Value::Enum(EnumValue {
                        value: raw,
                        code: v.name.clone(),
                    })),
                    Err(LookupError::UnknownValue) => Ok(Value::Enum(EnumValue {
                        value: raw,
                        code: "UNKNOWN INDIRECT ENUM VALUE".to_owned(),
                    })),
                    Err(LookupError::UnknownEnum) => Err(DecodeError::EnumValueNotInteger {
                        field: d.field.id.clone(),
                    }),
                }
            }
            _ => Ok(d.value.clone()),
        }
    }
}

#[cfg(test)]
#[path = "tests.rs"]
mod tests;
