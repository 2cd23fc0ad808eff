//! Decoder scenarios over hand-written schema fixtures: sentinel dropping,
//! resolution scaling, lookup inflation, repeating groups and PGN matching.
use super::*;
use crate::core::{CanBusHeader, ADDRESS_GLOBAL};
use pretty_assertions::assert_eq;

fn store(doc: &str) -> SchemaStore {
    SchemaStore::from_json_str(doc).expect("valid test schema")
}

fn raw(pgn: u32, data: &[u8]) -> RawMessage {
    RawMessage {
        time: chrono::DateTime::UNIX_EPOCH,
        header: CanBusHeader {
            pgn,
            priority: 2,
            source: 17,
            destination: ADDRESS_GLOBAL,
        },
        data: data.to_vec(),
    }
}

fn approx(value: &Value, expected: f64) -> bool {
    matches!(value, Value::Float(v) if (v - expected).abs() < 1e-9)
}

const ATTITUDE_DOC: &str = r#"{
    "PGNs": [
        {"PGN":127257,"Id":"attitude","Type":"Single","Complete":true,
         "Fields":[
            {"Id":"sid","Order":1,"BitOffset":0,"BitLength":8,
             "FieldType":"NUMBER","Resolution":1},
            {"Id":"yaw","Order":2,"BitOffset":8,"BitLength":16,"Signed":true,
             "FieldType":"NUMBER","Resolution":0.0001,"Unit":"rad"},
            {"Id":"pitch","Order":3,"BitOffset":24,"BitLength":16,"Signed":true,
             "FieldType":"NUMBER","Resolution":0.0001,"Unit":"rad"},
            {"Id":"roll","Order":4,"BitOffset":40,"BitLength":16,"Signed":true,
             "FieldType":"NUMBER","Resolution":0.0001,"Unit":"rad"},
            {"Id":"reserved","Order":5,"BitOffset":56,"BitLength":8,
             "FieldType":"RESERVED"}
         ]}
    ],
    "LookupEnumerations": [],
    "LookupIndirectEnumerations": [],
    "LookupBitEnumerations": []
}"#;

#[test]
fn attitude_drops_no_data_yaw() {
    let store = store(ATTITUDE_DOC);
    let decoder = Decoder::new(&store);

    // Yaw raw 0x7FFF is the signed 16-bit no-data sentinel.
    let message = decoder
        .decode(&raw(127_257, &[0x00, 0xFF, 0x7F, 0x77, 0xFC, 0xEC, 0xF9, 0xFF]))
        .expect("decodes");

    assert_eq!(message.fields.len(), 3);
    assert_eq!(message.fields[0].id, "sid");
    assert_eq!(message.fields[0].value, Value::Uint(0));
    assert_eq!(message.fields[1].id, "pitch");
    assert!(approx(&message.fields[1].value, -0.0905), "{:?}", message.fields[1]);
    assert_eq!(message.fields[2].id, "roll");
    assert!(approx(&message.fields[2].value, -0.1556), "{:?}", message.fields[2]);
    assert!(message.field("yaw").is_none());
    assert!(message.field("reserved").is_none());
}

#[test]
fn reserved_fields_surface_when_opted_in() {
    let store = store(ATTITUDE_DOC);
    let decoder = Decoder::with_config(
        &store,
        DecoderConfig {
            decode_reserved_fields: true,
            ..Default::default()
        },
    );
    let message = decoder
        .decode(&raw(127_257, &[0x00, 0xFF, 0x7F, 0x77, 0xFC, 0xEC, 0xF9, 0xFF]))
        .expect("decodes");
    assert_eq!(
        message.field("reserved").unwrap().value,
        Value::Bytes(vec![0xFF])
    );
}

#[test]
fn unknown_pgn_is_reported() {
    let store = store(ATTITUDE_DOC);
    let decoder = Decoder::new(&store);
    let err = decoder.decode(&raw(60_928, &[0; 8])).expect_err("unknown");
    assert!(matches!(err, DecodeError::UnknownPgn { pgn: 60_928 }));
}

#[test]
fn trailing_fields_are_optional() {
    let store = store(ATTITUDE_DOC);
    let decoder = Decoder::new(&store);
    // Payload ends after pitch; roll and reserved are simply absent.
    let message = decoder
        .decode(&raw(127_257, &[0x00, 0xFF, 0x7F, 0x77, 0xFC]))
        .expect("decodes");
    assert_eq!(message.fields.len(), 2);
    assert!(message.field("roll").is_none());
}

#[test]
fn integral_resolution_keeps_integer_types() {
    let doc = r#"{
        "PGNs": [
            {"PGN":127488,"Id":"engine_params","Type":"Single","Complete":true,
             "Fields":[
                {"Id":"instance","Order":1,"BitOffset":0,"BitLength":8,
                 "FieldType":"NUMBER","Resolution":1},
                {"Id":"speed","Order":2,"BitOffset":8,"BitLength":16,
                 "FieldType":"NUMBER","Resolution":0.25,"Unit":"rpm"},
                {"Id":"tilt","Order":3,"BitOffset":24,"BitLength":8,"Signed":true,
                 "FieldType":"NUMBER","Resolution":1,"Offset":-10}
             ]}
        ],
        "LookupEnumerations": [],
        "LookupIndirectEnumerations": [],
        "LookupBitEnumerations": []
    }"#;
    let store = store(doc);
    let decoder = Decoder::new(&store);
    let message = decoder
        .decode(&raw(127_488, &[0x01, 0x10, 0x27, 0x05]))
        .expect("decodes");

    assert_eq!(message.field("instance").unwrap().value, Value::Uint(1));
    // 10000 * 0.25 rpm
    assert!(approx(&message.field("speed").unwrap().value, 2500.0));
    // value = offset + raw: -10 + 5
    assert_eq!(message.field("tilt").unwrap().value, Value::Int(-5));
}

const LOOKUP_DOC: &str = r#"{
    "PGNs": [
        {"PGN":130306,"Id":"wind_data","Type":"Single","Complete":true,
         "Fields":[
            {"Id":"sid","Order":1,"BitOffset":0,"BitLength":8,
             "FieldType":"NUMBER","Resolution":1},
            {"Id":"reference","Order":2,"BitOffset":8,"BitLength":3,
             "FieldType":"LOOKUP","LookupEnumeration":"WIND_REFERENCE"},
            {"Id":"status","Order":3,"BitOffset":11,"BitLength":2,
             "FieldType":"BITLOOKUP","LookupBitEnumeration":"WIND_STATUS"},
            {"Id":"function","Order":4,"BitOffset":13,"BitLength":8,
             "FieldType":"INDIRECT_LOOKUP",
             "LookupIndirectEnumeration":"DEVICE_FUNCTION",
             "LookupIndirectEnumerationFieldOrder":1}
         ]}
    ],
    "LookupEnumerations": [
        {"Name":"WIND_REFERENCE","EnumValues":[
            {"Name":"True (ground referenced to North)","Value":0},
            {"Name":"Apparent","Value":2}
        ]}
    ],
    "LookupIndirectEnumerations": [
        {"Name":"DEVICE_FUNCTION","EnumValues":[
            {"Name":"Diagnostic","Value1":10,"Value2":130}
        ]}
    ],
    "LookupBitEnumerations": [
        {"Name":"WIND_STATUS","EnumBitValues":[
            {"Name":"Gusting","Bit":0},
            {"Name":"Sensor Fault","Bit":1}
        ]}
    ]
}"#;

#[test]
fn lookups_stay_raw_without_inflation() {
    let store = store(LOOKUP_DOC);
    let decoder = Decoder::new(&store);
    // sid=10, reference=2, status=0b01, function=130.
    // Byte 1: reference(3)=0b010, status(2)=0b01 -> 0b0000_1010 with
    // function low bits above; assemble explicitly below.
    let mut data = [0u8; 4];
    data[0] = 10;
    crate::infra::codec::raw_data::put_variable_uint(&mut data, 8, 3, 2).unwrap();
    crate::infra::codec::raw_data::put_variable_uint(&mut data, 11, 2, 1).unwrap();
    crate::infra::codec::raw_data::put_variable_uint(&mut data, 13, 8, 130).unwrap();

    let message = decoder.decode(&raw(130_306, &data)).expect("decodes");
    assert_eq!(message.field("reference").unwrap().value, Value::Uint(2));
    assert_eq!(message.field("status").unwrap().value, Value::Uint(1));
    assert_eq!(message.field("function").unwrap().value, Value::Uint(130));
}

#[test]
fn lookups_inflate_to_enum_values() {
    let store = store(LOOKUP_DOC);
    let decoder = Decoder::with_config(
        &store,
        DecoderConfig {
            decode_lookups_to_enum_type: true,
            ..Default::default()
        },
    );
    let mut data = [0u8; 4];
    data[0] = 10; // sid doubles as the indirect key (order 1)
    crate::infra::codec::raw_data::put_variable_uint(&mut data, 8, 3, 2).unwrap();
    crate::infra::codec::raw_data::put_variable_uint(&mut data, 11, 2, 0b11).unwrap();
    crate::infra::codec::raw_data::put_variable_uint(&mut data, 13, 8, 130).unwrap();

    let message = decoder.decode(&raw(130_306, &data)).expect("decodes");
    assert_eq!(
        message.field("reference").unwrap().value,
        Value::Enum(EnumValue {
            value: 2,
            code: "Apparent".to_owned()
        })
    );
    assert_eq!(
        message.field("status").unwrap().value,
        Value::EnumSet(vec![
            EnumValue {
                value: 0,
                code: "Gusting".to_owned()
            },
            EnumValue {
                value: 1,
                code: "Sensor Fault".to_owned()
            }
        ])
    );
    // Indirect key: field order 1 (sid) carries 10 -> (10, 130) resolves.
    assert_eq!(
        message.field("function").unwrap().value,
        Value::Enum(EnumValue {
            value: 130,
            code: "Diagnostic".to_owned()
        })
    );
}

#[test]
fn unknown_enum_values_get_synthetic_entries() {
    let store = store(LOOKUP_DOC);
    let decoder = Decoder::with_config(
        &store,
        DecoderConfig {
            decode_lookups_to_enum_type: true,
            ..Default::default()
        },
    );
    let mut data = [0u8; 4];
    data[0] = 99; // no (99, x) pair in DEVICE_FUNCTION
    crate::infra::codec::raw_data::put_variable_uint(&mut data, 8, 3, 5).unwrap();
    crate::infra::codec::raw_data::put_variable_uint(&mut data, 11, 2, 0).unwrap();
    crate::infra::codec::raw_data::put_variable_uint(&mut data, 13, 8, 130).unwrap();

    let message = decoder.decode(&raw(130_306, &data)).expect("decodes");
    assert_eq!(
        message.field("reference").unwrap().value,
        Value::Enum(EnumValue {
            value: 5,
            code: "UNKNOWN ENUM VALUE".to_owned()
        })
    );
    assert_eq!(message.field("status").unwrap().value, Value::EnumSet(vec![]));
    assert_eq!(
        message.field("function").unwrap().value,
        Value::Enum(EnumValue {
            value: 130,
            code: "UNKNOWN INDIRECT ENUM VALUE".to_owned()
        })
    );
}

const REPEATING_DOC: &str = r#"{
    "PGNs": [
        {"PGN":129540,"Id":"gnss_sats_in_view","Type":"Fast","Complete":true,
         "RepeatingFieldSet1Size":3,
         "RepeatingFieldSet1StartField":3,
         "RepeatingFieldSet1CountField":2,
         "Fields":[
            {"Id":"sid","Order":1,"BitOffset":0,"BitLength":8,
             "FieldType":"NUMBER","Resolution":1},
            {"Id":"sats_in_view","Order":2,"BitOffset":8,"BitLength":8,
             "FieldType":"NUMBER","Resolution":1},
            {"Id":"prn","Order":3,"BitOffset":16,"BitLength":8,
             "FieldType":"NUMBER","Resolution":1},
            {"Id":"elevation","Order":4,"BitOffset":24,"BitLength":16,"Signed":true,
             "FieldType":"NUMBER","Resolution":0.0001},
            {"Id":"snr","Order":5,"BitOffset":40,"BitLength":16,
             "FieldType":"NUMBER","Resolution":0.01}
         ]}
    ],
    "LookupEnumerations": [],
    "LookupIndirectEnumerations": [],
    "LookupBitEnumerations": []
}"#;

#[test]
fn repeating_group_produces_fieldset_instances() {
    let store = store(REPEATING_DOC);
    let decoder = Decoder::new(&store);

    let mut data = vec![0x05u8, 0x02]; // sid 5, two satellites
    for (prn, elevation, snr) in [(7u8, 100i16, 4000u16), (9, -200, 1200)] {
        data.push(prn);
        data.extend_from_slice(&elevation.to_le_bytes());
        data.extend_from_slice(&snr.to_le_bytes());
    }

    let message = decoder.decode(&raw(129_540, &data)).expect("decodes");
    assert_eq!(message.field("sats_in_view").unwrap().value, Value::Uint(2));

    let Value::FieldSet(instances) = &message.field("FIELDSET_1").unwrap().value else {
        panic!("expected fieldset, got {:?}", message.fields);
    };
    assert_eq!(instances.len(), 2);
    assert_eq!(instances[0][0].id, "prn");
    assert_eq!(instances[0][0].value, Value::Uint(7));
    assert!(approx(&instances[0][1].value, 0.01));
    assert!(approx(&instances[0][2].value, 40.0));
    assert_eq!(instances[1][0].value, Value::Uint(9));
    assert!(approx(&instances[1][1].value, -0.02));
    assert!(approx(&instances[1][2].value, 12.0));
}

#[test]
fn repeating_group_without_count_runs_to_payload_end() {
    let doc = r#"{
        "PGNs": [
            {"PGN":126464,"Id":"pgn_list","Type":"Fast","Complete":true,
             "RepeatingFieldSet1Size":1,
             "RepeatingFieldSet1StartField":2,
             "Fields":[
                {"Id":"function_code","Order":1,"BitOffset":0,"BitLength":8,
                 "FieldType":"NUMBER","Resolution":1},
                {"Id":"pgn","Order":2,"BitOffset":8,"BitLength":24,
                 "FieldType":"NUMBER","Resolution":1}
             ]}
        ],
        "LookupEnumerations": [],
        "LookupIndirectEnumerations": [],
        "LookupBitEnumerations": []
    }"#;
    let store = store(doc);
    let decoder = Decoder::new(&store);

    let mut data = vec![0x00u8]; // transmit list
    for pgn in [60_928u32, 126_996, 130_323] {
        data.extend_from_slice(&pgn.to_le_bytes()[..3]);
    }

    let message = decoder.decode(&raw(126_464, &data)).expect("decodes");
    let Value::FieldSet(instances) = &message.field("FIELDSET_1").unwrap().value else {
        panic!("expected fieldset");
    };
    assert_eq!(instances.len(), 3);
    assert_eq!(instances[0][0].value, Value::Uint(60_928));
    assert_eq!(instances[1][0].value, Value::Uint(126_996));
    assert_eq!(instances[2][0].value, Value::Uint(130_323));
}

#[test]
fn match_fields_select_among_ambiguous_definitions() {
    let doc = r#"{
        "PGNs": [
            {"PGN":130824,"Id":"b_and_g_key_value","Type":"Fast","Complete":true,
             "Fields":[
                {"Id":"manufacturer_code","Order":1,"BitOffset":0,"BitLength":11,
                 "FieldType":"NUMBER","Resolution":1,"Match":381},
                {"Id":"industry_code","Order":2,"BitOffset":11,"BitLength":5,
                 "FieldType":"NUMBER","Resolution":1}
             ]},
            {"PGN":130824,"Id":"maretron_annunciator","Type":"Fast","Complete":true,
             "Fields":[
                {"Id":"manufacturer_code","Order":1,"BitOffset":0,"BitLength":11,
                 "FieldType":"NUMBER","Resolution":1,"Match":137},
                {"Id":"alarm","Order":2,"BitOffset":11,"BitLength":5,
                 "FieldType":"NUMBER","Resolution":1}
             ]}
        ],
        "LookupEnumerations": [],
        "LookupIndirectEnumerations": [],
        "LookupBitEnumerations": []
    }"#;
    let store = store(doc);
    let decoder = Decoder::new(&store);

    let mut data = [0u8; 2];
    crate::infra::codec::raw_data::put_variable_uint(&mut data, 0, 11, 137).unwrap();
    crate::infra::codec::raw_data::put_variable_uint(&mut data, 11, 5, 3).unwrap();
    let message = decoder.decode(&raw(130_824, &data)).expect("decodes");
    assert!(message.field("alarm").is_some());
    assert!(message.field("industry_code").is_none());
}

#[test]
fn string_fields_decode() {
    let doc = r#"{
        "PGNs": [
            {"PGN":126998,"Id":"configuration_information","Type":"Fast","Complete":true,
             "Fields":[
                {"Id":"installation_description_1","Order":1,"BitLengthVariable":true,
                 "FieldType":"STRING_LAU"},
                {"Id":"installation_description_2","Order":2,"BitLengthVariable":true,
                 "FieldType":"STRING_LAU"}
             ]}
        ],
        "LookupEnumerations": [],
        "LookupIndirectEnumerations": [],
        "LookupBitEnumerations": []
    }"#;
    let store = store(doc);
    let decoder = Decoder::new(&store);

    let mut data = vec![0x06, 0x01];
    data.extend_from_slice(b"dock");
    data.extend_from_slice(&[0x05, 0x01]);
    data.extend_from_slice(b"aft");
    let message = decoder.decode(&raw(126_998, &data)).expect("decodes");
    assert_eq!(
        message.field("installation_description_1").unwrap().value,
        Value::String("dock".to_owned())
    );
    assert_eq!(
        message.field("installation_description_2").unwrap().value,
        Value::String("aft".to_owned())
    );
}
