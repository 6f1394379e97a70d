//! Protobuf wire-format codec for dynamic messages.
//!
//! Encoding is deterministic: fields are written in ascending field-number
//! order, repeated scalars are packed, and map entries follow insertion
//! order. The decoder accepts both packed and unpacked repeated scalars
//! and skips unknown fields.

use indexmap::IndexMap;

use crate::descriptor::{FieldDescriptor, FieldType, MessageRef, ScalarType};
use crate::error::{Result, SchemaError};
use crate::message::{DynamicMessage, FieldValue, MapKey};
use crate::registry::TypeRegistry;

const WIRE_VARINT: u64 = 0;
const WIRE_FIXED64: u64 = 1;
const WIRE_LEN: u64 = 2;
const WIRE_FIXED32: u64 = 5;

/// Encode a message to wire bytes.
pub fn encode(msg: &DynamicMessage) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    encode_into(msg, &mut out)?;
    Ok(out)
}

fn encode_into(msg: &DynamicMessage, out: &mut Vec<u8>) -> Result<()> {
    for (number, value) in msg.set_fields() {
        let field = msg
            .descriptor()
            .field_by_number(number)
            .ok_or_else(|| SchemaError::Marshal(format!("field #{number} vanished")))?;
        encode_field(field, value, out)?;
    }
    Ok(())
}

fn encode_field(field: &FieldDescriptor, value: &FieldValue, out: &mut Vec<u8>) -> Result<()> {
    if let FieldType::Map { key, value: value_type } = &field.field_type {
        let FieldValue::Map(entries) = value else {
            return Err(SchemaError::Marshal(format!(
                "map field `{}` holds a non-map value",
                field.name
            )));
        };
        for (map_key, map_value) in entries {
            let mut entry = Vec::new();
            encode_map_key(*key, map_key, &mut entry)?;
            encode_element(value_type, map_value, 2, &mut entry)?;
            put_tag(field.number, WIRE_LEN, out);
            put_len_prefixed(&entry, out);
        }
        return Ok(());
    }

    if field.is_repeated() {
        let FieldValue::List(items) = value else {
            return Err(SchemaError::Marshal(format!(
                "repeated field `{}` holds a non-list value",
                field.name
            )));
        };
        if items.is_empty() {
            return Ok(());
        }
        if is_packable(&field.field_type) {
            let mut payload = Vec::new();
            for item in items {
                encode_packed_element(&field.field_type, item, &mut payload)?;
            }
            put_tag(field.number, WIRE_LEN, out);
            put_len_prefixed(&payload, out);
        } else {
            for item in items {
                encode_element(&field.field_type, item, field.number, out)?;
            }
        }
        return Ok(());
    }

    encode_element(&field.field_type, value, field.number, out)
}

/// Tag + value for one singular element.
fn encode_element(
    field_type: &FieldType,
    value: &FieldValue,
    number: u32,
    out: &mut Vec<u8>,
) -> Result<()> {
    match (field_type, value) {
        (FieldType::Scalar(ScalarType::String), FieldValue::String(s)) => {
            put_tag(number, WIRE_LEN, out);
            put_len_prefixed(s.as_bytes(), out);
        }
        (FieldType::Scalar(ScalarType::Bytes), FieldValue::Bytes(b)) => {
            put_tag(number, WIRE_LEN, out);
            put_len_prefixed(b, out);
        }
        (FieldType::Message(_), FieldValue::Message(m)) => {
            let mut payload = Vec::new();
            encode_into(m, &mut payload)?;
            put_tag(number, WIRE_LEN, out);
            put_len_prefixed(&payload, out);
        }
        _ => {
            let wire = scalar_wire_type(field_type)?;
            put_tag(number, wire, out);
            encode_packed_element(field_type, value, out)?;
        }
    }
    Ok(())
}

/// Value bytes without a tag (used by packed encoding and after a tag for
/// the numeric kinds).
fn encode_packed_element(
    field_type: &FieldType,
    value: &FieldValue,
    out: &mut Vec<u8>,
) -> Result<()> {
    match (field_type, value) {
        (FieldType::Scalar(ScalarType::Bool), FieldValue::Bool(b)) => {
            put_varint(*b as u64, out);
        }
        (FieldType::Scalar(ScalarType::Int32), FieldValue::I32(n)) => {
            put_varint(*n as i64 as u64, out);
        }
        (FieldType::Scalar(ScalarType::Int64), FieldValue::I64(n)) => {
            put_varint(*n as u64, out);
        }
        (FieldType::Scalar(ScalarType::UInt32), FieldValue::U32(n)) => {
            put_varint(*n as u64, out);
        }
        (FieldType::Scalar(ScalarType::UInt64), FieldValue::U64(n)) => {
            put_varint(*n, out);
        }
        (FieldType::Scalar(ScalarType::SInt32), FieldValue::I32(n)) => {
            put_varint(zigzag32(*n), out);
        }
        (FieldType::Scalar(ScalarType::SInt64), FieldValue::I64(n)) => {
            put_varint(zigzag64(*n), out);
        }
        (FieldType::Scalar(ScalarType::Fixed32), FieldValue::U32(n)) => {
            out.extend_from_slice(&n.to_le_bytes());
        }
        (FieldType::Scalar(ScalarType::SFixed32), FieldValue::I32(n)) => {
            out.extend_from_slice(&n.to_le_bytes());
        }
        (FieldType::Scalar(ScalarType::Fixed64), FieldValue::U64(n)) => {
            out.extend_from_slice(&n.to_le_bytes());
        }
        (FieldType::Scalar(ScalarType::SFixed64), FieldValue::I64(n)) => {
            out.extend_from_slice(&n.to_le_bytes());
        }
        (FieldType::Scalar(ScalarType::Float), FieldValue::F32(x)) => {
            out.extend_from_slice(&x.to_le_bytes());
        }
        (FieldType::Scalar(ScalarType::Double), FieldValue::F64(x)) => {
            out.extend_from_slice(&x.to_le_bytes());
        }
        (FieldType::Enum(_), FieldValue::Enum(n)) => {
            put_varint(*n as i64 as u64, out);
        }
        (ft, v) => {
            return Err(SchemaError::Marshal(format!(
                "cannot encode {v:?} as {}",
                ft.describe()
            )));
        }
    }
    Ok(())
}

fn encode_map_key(key_type: ScalarType, key: &MapKey, out: &mut Vec<u8>) -> Result<()> {
    match (key_type, key) {
        (ScalarType::String, MapKey::String(s)) => {
            put_tag(1, WIRE_LEN, out);
            put_len_prefixed(s.as_bytes(), out);
        }
        (ScalarType::Bool, MapKey::Bool(b)) => {
            put_tag(1, WIRE_VARINT, out);
            put_varint(*b as u64, out);
        }
        (ScalarType::Int32 | ScalarType::Int64, MapKey::Int(n)) => {
            put_tag(1, WIRE_VARINT, out);
            put_varint(*n as u64, out);
        }
        (ScalarType::SInt32, MapKey::Int(n)) => {
            put_tag(1, WIRE_VARINT, out);
            put_varint(zigzag32(*n as i32), out);
        }
        (ScalarType::SInt64, MapKey::Int(n)) => {
            put_tag(1, WIRE_VARINT, out);
            put_varint(zigzag64(*n), out);
        }
        (ScalarType::SFixed32, MapKey::Int(n)) => {
            put_tag(1, WIRE_FIXED32, out);
            out.extend_from_slice(&(*n as i32).to_le_bytes());
        }
        (ScalarType::SFixed64, MapKey::Int(n)) => {
            put_tag(1, WIRE_FIXED64, out);
            out.extend_from_slice(&n.to_le_bytes());
        }
        (ScalarType::UInt32 | ScalarType::UInt64, MapKey::Uint(n)) => {
            put_tag(1, WIRE_VARINT, out);
            put_varint(*n, out);
        }
        (ScalarType::Fixed32, MapKey::Uint(n)) => {
            put_tag(1, WIRE_FIXED32, out);
            out.extend_from_slice(&(*n as u32).to_le_bytes());
        }
        (ScalarType::Fixed64, MapKey::Uint(n)) => {
            put_tag(1, WIRE_FIXED64, out);
            out.extend_from_slice(&n.to_le_bytes());
        }
        _ => {
            return Err(SchemaError::Marshal(format!(
                "map key {key:?} does not match {}",
                key_type.name()
            )));
        }
    }
    Ok(())
}

fn is_packable(field_type: &FieldType) -> bool {
    match field_type {
        FieldType::Scalar(s) => !matches!(s, ScalarType::String | ScalarType::Bytes),
        FieldType::Enum(_) => true,
        FieldType::Message(_) | FieldType::Map { .. } => false,
    }
}

fn scalar_wire_type(field_type: &FieldType) -> Result<u64> {
    Ok(match field_type {
        FieldType::Enum(_) => WIRE_VARINT,
        FieldType::Scalar(s) => match s {
            ScalarType::Bool
            | ScalarType::Int32
            | ScalarType::Int64
            | ScalarType::UInt32
            | ScalarType::UInt64
            | ScalarType::SInt32
            | ScalarType::SInt64 => WIRE_VARINT,
            ScalarType::Fixed32 | ScalarType::SFixed32 | ScalarType::Float => WIRE_FIXED32,
            ScalarType::Fixed64 | ScalarType::SFixed64 | ScalarType::Double => WIRE_FIXED64,
            ScalarType::String | ScalarType::Bytes => WIRE_LEN,
        },
        other => {
            return Err(SchemaError::Marshal(format!(
                "{} has no scalar wire type",
                other.describe()
            )));
        }
    })
}

fn put_tag(number: u32, wire: u64, out: &mut Vec<u8>) {
    put_varint(((number as u64) << 3) | wire, out);
}

fn put_varint(mut value: u64, out: &mut Vec<u8>) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

fn put_len_prefixed(bytes: &[u8], out: &mut Vec<u8>) {
    put_varint(bytes.len() as u64, out);
    out.extend_from_slice(bytes);
}

fn zigzag32(n: i32) -> u64 {
    (((n << 1) ^ (n >> 31)) as u32) as u64
}

fn zigzag64(n: i64) -> u64 {
    ((n << 1) ^ (n >> 63)) as u64
}

fn unzigzag32(n: u64) -> i32 {
    let n = n as u32;
    ((n >> 1) as i32) ^ -((n & 1) as i32)
}

fn unzigzag64(n: u64) -> i64 {
    ((n >> 1) as i64) ^ -((n & 1) as i64)
}

/// Decode wire bytes into a message of the given descriptor. The registry
/// resolves message-typed fields.
pub fn decode(
    descriptor: MessageRef,
    registry: &TypeRegistry,
    bytes: &[u8],
) -> Result<DynamicMessage> {
    let mut reader = Reader {
        bytes,
        pos: 0,
        message_type: descriptor.full_name.clone(),
    };
    decode_message(&descriptor, registry, &mut reader)
}

struct Reader<'b> {
    bytes: &'b [u8],
    pos: usize,
    message_type: String,
}

impl<'b> Reader<'b> {
    fn error(&self, detail: impl Into<String>) -> SchemaError {
        SchemaError::Decode {
            message_type: self.message_type.clone(),
            detail: detail.into(),
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn varint(&mut self) -> Result<u64> {
        let mut value = 0u64;
        let mut shift = 0u32;
        loop {
            let byte = *self
                .bytes
                .get(self.pos)
                .ok_or_else(|| self.error("truncated varint"))?;
            self.pos += 1;
            if shift >= 64 {
                return Err(self.error("varint too long"));
            }
            value |= ((byte & 0x7f) as u64) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
    }

    fn take(&mut self, n: usize) -> Result<&'b [u8]> {
        if self.pos + n > self.bytes.len() {
            return Err(self.error("truncated field"));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn fixed32(&mut self) -> Result<[u8; 4]> {
        Ok(self.take(4)?.try_into().expect("slice length checked"))
    }

    fn fixed64(&mut self) -> Result<[u8; 8]> {
        Ok(self.take(8)?.try_into().expect("slice length checked"))
    }

    fn len_prefixed(&mut self) -> Result<&'b [u8]> {
        let len = self.varint()? as usize;
        self.take(len)
    }

    fn skip(&mut self, wire: u64) -> Result<()> {
        match wire {
            WIRE_VARINT => {
                self.varint()?;
            }
            WIRE_FIXED64 => {
                self.take(8)?;
            }
            WIRE_LEN => {
                self.len_prefixed()?;
            }
            WIRE_FIXED32 => {
                self.take(4)?;
            }
            other => return Err(self.error(format!("unsupported wire type {other}"))),
        }
        Ok(())
    }
}

fn decode_message(
    descriptor: &MessageRef,
    registry: &TypeRegistry,
    reader: &mut Reader<'_>,
) -> Result<DynamicMessage> {
    let mut msg = DynamicMessage::new(descriptor.clone());
    let mut lists: IndexMap<u32, Vec<FieldValue>> = IndexMap::new();
    let mut maps: IndexMap<u32, IndexMap<MapKey, FieldValue>> = IndexMap::new();

    while !reader.at_end() {
        let tag = reader.varint()?;
        let number = (tag >> 3) as u32;
        let wire = tag & 7;
        let Some(field) = descriptor.field_by_number(number) else {
            reader.skip(wire)?;
            continue;
        };

        if let FieldType::Map { key, value } = &field.field_type {
            if wire != WIRE_LEN {
                return Err(reader.error(format!(
                    "map field `{}` with wire type {wire}",
                    field.name
                )));
            }
            let payload = reader.len_prefixed()?;
            let (map_key, map_value) =
                decode_map_entry(*key, value, registry, payload, &reader.message_type)?;
            maps.entry(number).or_default().insert(map_key, map_value);
            continue;
        }

        if field.is_repeated() {
            let packed = wire == WIRE_LEN && is_packable(&field.field_type);
            let slot = lists.entry(number).or_default();
            if packed {
                let payload = reader.len_prefixed()?;
                let mut inner = Reader {
                    bytes: payload,
                    pos: 0,
                    message_type: reader.message_type.clone(),
                };
                let element_wire = scalar_wire_type(&field.field_type)?;
                while !inner.at_end() {
                    slot.push(decode_element(
                        &field.field_type,
                        element_wire,
                        registry,
                        &mut inner,
                    )?);
                }
            } else {
                slot.push(decode_element(&field.field_type, wire, registry, reader)?);
            }
            continue;
        }

        let value = decode_element(&field.field_type, wire, registry, reader)?;
        msg.set_field_by_number(number, value)?;
    }

    for (number, items) in lists {
        msg.set_field_by_number(number, FieldValue::List(items))?;
    }
    for (number, entries) in maps {
        msg.set_field_by_number(number, FieldValue::Map(entries))?;
    }
    Ok(msg)
}

fn decode_element(
    field_type: &FieldType,
    wire: u64,
    registry: &TypeRegistry,
    reader: &mut Reader<'_>,
) -> Result<FieldValue> {
    match field_type {
        FieldType::Message(name) => {
            if wire != WIRE_LEN {
                return Err(reader.error(format!("message field with wire type {wire}")));
            }
            let payload = reader.len_prefixed()?;
            let nested = registry.message(name)?;
            let mut inner = Reader {
                bytes: payload,
                pos: 0,
                message_type: name.clone(),
            };
            Ok(FieldValue::Message(decode_message(
                &nested, registry, &mut inner,
            )?))
        }
        FieldType::Enum(_) => {
            expect_wire(wire, WIRE_VARINT, reader)?;
            Ok(FieldValue::Enum(reader.varint()? as i64 as i32))
        }
        FieldType::Scalar(scalar) => decode_scalar(*scalar, wire, reader),
        FieldType::Map { .. } => Err(reader.error("map entry inside map entry")),
    }
}

fn expect_wire(found: u64, expected: u64, reader: &Reader<'_>) -> Result<()> {
    if found == expected {
        Ok(())
    } else {
        Err(reader.error(format!("wire type {found}, expected {expected}")))
    }
}

fn decode_scalar(scalar: ScalarType, wire: u64, reader: &mut Reader<'_>) -> Result<FieldValue> {
    Ok(match scalar {
        ScalarType::Bool => {
            expect_wire(wire, WIRE_VARINT, reader)?;
            FieldValue::Bool(reader.varint()? != 0)
        }
        ScalarType::Int32 => {
            expect_wire(wire, WIRE_VARINT, reader)?;
            FieldValue::I32(reader.varint()? as i64 as i32)
        }
        ScalarType::Int64 => {
            expect_wire(wire, WIRE_VARINT, reader)?;
            FieldValue::I64(reader.varint()? as i64)
        }
        ScalarType::UInt32 => {
            expect_wire(wire, WIRE_VARINT, reader)?;
            FieldValue::U32(reader.varint()? as u32)
        }
        ScalarType::UInt64 => {
            expect_wire(wire, WIRE_VARINT, reader)?;
            FieldValue::U64(reader.varint()?)
        }
        ScalarType::SInt32 => {
            expect_wire(wire, WIRE_VARINT, reader)?;
            FieldValue::I32(unzigzag32(reader.varint()?))
        }
        ScalarType::SInt64 => {
            expect_wire(wire, WIRE_VARINT, reader)?;
            FieldValue::I64(unzigzag64(reader.varint()?))
        }
        ScalarType::Fixed32 => {
            expect_wire(wire, WIRE_FIXED32, reader)?;
            FieldValue::U32(u32::from_le_bytes(reader.fixed32()?))
        }
        ScalarType::SFixed32 => {
            expect_wire(wire, WIRE_FIXED32, reader)?;
            FieldValue::I32(i32::from_le_bytes(reader.fixed32()?))
        }
        ScalarType::Float => {
            expect_wire(wire, WIRE_FIXED32, reader)?;
            FieldValue::F32(f32::from_le_bytes(reader.fixed32()?))
        }
        ScalarType::Fixed64 => {
            expect_wire(wire, WIRE_FIXED64, reader)?;
            FieldValue::U64(u64::from_le_bytes(reader.fixed64()?))
        }
        ScalarType::SFixed64 => {
            expect_wire(wire, WIRE_FIXED64, reader)?;
            FieldValue::I64(i64::from_le_bytes(reader.fixed64()?))
        }
        ScalarType::Double => {
            expect_wire(wire, WIRE_FIXED64, reader)?;
            FieldValue::F64(f64::from_le_bytes(reader.fixed64()?))
        }
        ScalarType::String => {
            expect_wire(wire, WIRE_LEN, reader)?;
            let bytes = reader.len_prefixed()?;
            FieldValue::String(
                String::from_utf8(bytes.to_vec())
                    .map_err(|_| reader.error("invalid UTF-8 in string field"))?,
            )
        }
        ScalarType::Bytes => {
            expect_wire(wire, WIRE_LEN, reader)?;
            FieldValue::Bytes(reader.len_prefixed()?.to_vec())
        }
    })
}

fn decode_map_entry(
    key_type: ScalarType,
    value_type: &FieldType,
    registry: &TypeRegistry,
    payload: &[u8],
    message_type: &str,
) -> Result<(MapKey, FieldValue)> {
    let mut reader = Reader {
        bytes: payload,
        pos: 0,
        message_type: message_type.to_string(),
    };
    let mut key = default_map_key(key_type);
    let mut value = None;
    while !reader.at_end() {
        let tag = reader.varint()?;
        let number = (tag >> 3) as u32;
        let wire = tag & 7;
        match number {
            1 => {
                let raw = decode_scalar(key_type, wire, &mut reader)?;
                key = field_value_to_map_key(raw)
                    .ok_or_else(|| reader.error("invalid map key"))?;
            }
            2 => {
                value = Some(decode_element(value_type, wire, registry, &mut reader)?);
            }
            _ => reader.skip(wire)?,
        }
    }
    let value = match value {
        Some(v) => v,
        None => default_for(value_type, registry)?,
    };
    Ok((key, value))
}

fn default_map_key(key_type: ScalarType) -> MapKey {
    match key_type {
        ScalarType::Bool => MapKey::Bool(false),
        ScalarType::String => MapKey::String(String::new()),
        ScalarType::UInt32 | ScalarType::UInt64 | ScalarType::Fixed32 | ScalarType::Fixed64 => {
            MapKey::Uint(0)
        }
        _ => MapKey::Int(0),
    }
}

fn field_value_to_map_key(value: FieldValue) -> Option<MapKey> {
    Some(match value {
        FieldValue::Bool(b) => MapKey::Bool(b),
        FieldValue::I32(n) => MapKey::Int(n as i64),
        FieldValue::I64(n) => MapKey::Int(n),
        FieldValue::U32(n) => MapKey::Uint(n as u64),
        FieldValue::U64(n) => MapKey::Uint(n),
        FieldValue::String(s) => MapKey::String(s),
        _ => return None,
    })
}

fn default_for(field_type: &FieldType, registry: &TypeRegistry) -> Result<FieldValue> {
    Ok(match field_type {
        FieldType::Message(name) => {
            FieldValue::Message(DynamicMessage::new(registry.message(name)?))
        }
        FieldType::Enum(_) => FieldValue::Enum(0),
        FieldType::Scalar(ScalarType::String) => FieldValue::String(String::new()),
        FieldType::Scalar(ScalarType::Bytes) => FieldValue::Bytes(Vec::new()),
        FieldType::Scalar(ScalarType::Bool) => FieldValue::Bool(false),
        FieldType::Scalar(ScalarType::Float) => FieldValue::F32(0.0),
        FieldType::Scalar(ScalarType::Double) => FieldValue::F64(0.0),
        FieldType::Scalar(
            ScalarType::Int32 | ScalarType::SInt32 | ScalarType::SFixed32,
        ) => FieldValue::I32(0),
        FieldType::Scalar(
            ScalarType::Int64 | ScalarType::SInt64 | ScalarType::SFixed64,
        ) => FieldValue::I64(0),
        FieldType::Scalar(ScalarType::UInt32 | ScalarType::Fixed32) => FieldValue::U32(0),
        FieldType::Scalar(ScalarType::UInt64 | ScalarType::Fixed64) => FieldValue::U64(0),
        FieldType::Map { .. } => {
            return Err(SchemaError::Marshal("map inside map entry".to_string()));
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_file;

    fn registry() -> TypeRegistry {
        let source = "\
syntax = \"proto3\";
message Sample {
    enum Mode { OFF = 0; ON = 1; }
    string name = 1;
    int32 count = 2;
    sint32 delta = 3;
    double ratio = 4;
    bool flag = 5;
    bytes blob = 6;
    repeated int64 numbers = 7;
    repeated string labels = 8;
    Sample nested = 9;
    map<string, int32> scores = 10;
    Mode mode = 11;
    fixed64 stamp = 12;
}
";
        let mut registry = TypeRegistry::new();
        let raw = parse_file(source, "sample.proto").unwrap();
        registry.ingest_file(&raw, "sample.proto").unwrap();
        registry
    }

    fn sample(registry: &TypeRegistry) -> DynamicMessage {
        let descriptor = registry.message("Sample").unwrap();
        let mut msg = DynamicMessage::new(descriptor.clone());
        msg.set_field("name", FieldValue::String("abc".into())).unwrap();
        msg.set_field("count", FieldValue::I32(-7)).unwrap();
        msg.set_field("delta", FieldValue::I32(-3)).unwrap();
        msg.set_field("ratio", FieldValue::F64(0.5)).unwrap();
        msg.set_field("flag", FieldValue::Bool(true)).unwrap();
        msg.set_field("blob", FieldValue::Bytes(vec![0, 255, 7])).unwrap();
        msg.set_field(
            "numbers",
            FieldValue::List(vec![FieldValue::I64(1), FieldValue::I64(-2)]),
        )
        .unwrap();
        msg.set_field(
            "labels",
            FieldValue::List(vec![
                FieldValue::String("x".into()),
                FieldValue::String("y".into()),
            ]),
        )
        .unwrap();
        let mut nested = DynamicMessage::new(descriptor);
        nested
            .set_field("name", FieldValue::String("inner".into()))
            .unwrap();
        msg.set_field("nested", FieldValue::Message(nested)).unwrap();
        let mut scores = IndexMap::new();
        scores.insert(MapKey::String("a".into()), FieldValue::I32(1));
        scores.insert(MapKey::String("b".into()), FieldValue::I32(2));
        msg.set_field("scores", FieldValue::Map(scores)).unwrap();
        msg.set_field("mode", FieldValue::Enum(1)).unwrap();
        msg.set_field("stamp", FieldValue::U64(1234567890)).unwrap();
        msg
    }

    #[test]
    fn test_round_trip() {
        let registry = registry();
        let msg = sample(&registry);
        let bytes = encode(&msg).unwrap();
        let decoded = decode(registry.message("Sample").unwrap(), &registry, &bytes).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let registry = registry();
        let a = encode(&sample(&registry)).unwrap();
        let b = encode(&sample(&registry)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_varint_boundaries() {
        let mut out = Vec::new();
        put_varint(300, &mut out);
        assert_eq!(out, vec![0xac, 0x02]);

        let mut reader = Reader {
            bytes: &out,
            pos: 0,
            message_type: "t".into(),
        };
        assert_eq!(reader.varint().unwrap(), 300);
    }

    #[test]
    fn test_zigzag() {
        assert_eq!(zigzag32(0), 0);
        assert_eq!(zigzag32(-1), 1);
        assert_eq!(zigzag32(1), 2);
        assert_eq!(unzigzag32(zigzag32(-123456)), -123456);
        assert_eq!(unzigzag64(zigzag64(i64::MIN)), i64::MIN);
    }

    #[test]
    fn test_unknown_fields_skipped() {
        let registry = registry();
        let descriptor = registry.message("Sample").unwrap();
        // field 99 (varint), then a real name field.
        let mut bytes = Vec::new();
        put_tag(99, WIRE_VARINT, &mut bytes);
        put_varint(5, &mut bytes);
        put_tag(1, WIRE_LEN, &mut bytes);
        put_len_prefixed(b"ok", &mut bytes);
        let decoded = decode(descriptor, &registry, &bytes).unwrap();
        assert_eq!(decoded.get("name"), Some(&FieldValue::String("ok".into())));
    }

    #[test]
    fn test_truncated_input() {
        let registry = registry();
        let descriptor = registry.message("Sample").unwrap();
        let mut bytes = Vec::new();
        put_tag(1, WIRE_LEN, &mut bytes);
        put_varint(10, &mut bytes); // claims 10 bytes, provides none
        let err = decode(descriptor, &registry, &bytes).unwrap_err();
        assert!(matches!(err, SchemaError::Decode { .. }));
    }

    #[test]
    fn test_unpacked_repeated_accepted() {
        let registry = registry();
        let descriptor = registry.message("Sample").unwrap();
        // numbers (field 7) written unpacked: two varint entries.
        let mut bytes = Vec::new();
        put_tag(7, WIRE_VARINT, &mut bytes);
        put_varint(4, &mut bytes);
        put_tag(7, WIRE_VARINT, &mut bytes);
        put_varint(9, &mut bytes);
        let decoded = decode(descriptor, &registry, &bytes).unwrap();
        assert_eq!(
            decoded.get("numbers"),
            Some(&FieldValue::List(vec![
                FieldValue::I64(4),
                FieldValue::I64(9)
            ]))
        );
    }
}
