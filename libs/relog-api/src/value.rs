use std::sync::Arc;

use crate::error::SchemaError;
use crate::schema::{NumericKind, TypeDef, TypeSchema};

/// Decoded (native) form of a recorded value.
///
/// Strategy by type:
/// - Numerics: widened to the largest representation of their kind
/// - Compounds: `(field name, value)` pairs in declaration order
/// - Arrays: elements decoded individually
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    SInt(i64),
    UInt(u64),
    Float(f64),
    Compound(Vec<(String, Value)>),
    Array(Vec<Value>),
}

impl Value {
    /// Look up a compound member by name.
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Compound(fields) => {
                fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
            }
            _ => None,
        }
    }
}

/// One recorded sample in its binary layout.
#[derive(Debug, Clone)]
pub struct TypedValue {
    ty: Arc<TypeSchema>,
    bytes: Vec<u8>,
}

impl TypedValue {
    /// A zero-initialized sample of `ty`.
    pub fn zeroed(ty: Arc<TypeSchema>) -> Self {
        let size = ty.size();
        Self { ty, bytes: vec![0; size] }
    }

    /// Wrap raw sample bytes. The buffer must be exactly the type's size.
    pub fn from_bytes(ty: Arc<TypeSchema>, bytes: Vec<u8>) -> Result<Self, SchemaError> {
        if bytes.len() != ty.size() {
            return Err(SchemaError::shape(format!(
                "buffer of {} bytes does not match type '{}' ({} bytes)",
                bytes.len(),
                ty.name(),
                ty.size()
            )));
        }
        Ok(Self { ty, bytes })
    }

    pub fn ty(&self) -> &Arc<TypeSchema> {
        &self.ty
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Decode the binary representation into a native value.
    pub fn decode(&self) -> Result<Value, SchemaError> {
        let (value, consumed) = decode_at(&self.ty, &self.bytes)?;
        debug_assert_eq!(consumed, self.bytes.len());
        Ok(value)
    }

    /// Encode `value` into this sample's binary representation.
    ///
    /// Fails with a shape error if the value does not fit the type: a
    /// missing or unknown compound member, a wrong array length, or a
    /// number outside the field's range.
    pub fn write(&mut self, value: &Value) -> Result<(), SchemaError> {
        let mut out = vec![0; self.bytes.len()];
        encode_at(&self.ty, value, &mut out)?;
        self.bytes = out;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Layout traversal: decode / encode against a schema
// ---------------------------------------------------------------------------

fn decode_at(ty: &TypeSchema, bytes: &[u8]) -> Result<(Value, usize), SchemaError> {
    match ty.def() {
        TypeDef::Numeric { kind, size } => {
            let raw = bytes.get(..*size).ok_or_else(|| {
                SchemaError::shape(format!("truncated value for type '{}'", ty.name()))
            })?;
            Ok((decode_numeric(*kind, raw, ty.name())?, *size))
        }
        TypeDef::Compound { fields } => {
            let mut offset = 0;
            let mut members = Vec::with_capacity(fields.len());
            for field in fields {
                let (value, consumed) = decode_at(&field.ty, &bytes[offset..])?;
                members.push((field.name.clone(), value));
                offset += consumed;
            }
            Ok((Value::Compound(members), offset))
        }
        TypeDef::Array { element, length } => {
            let mut offset = 0;
            let mut elements = Vec::with_capacity(*length);
            for _ in 0..*length {
                let (value, consumed) = decode_at(element, &bytes[offset..])?;
                elements.push(value);
                offset += consumed;
            }
            Ok((Value::Array(elements), offset))
        }
    }
}

fn decode_numeric(kind: NumericKind, raw: &[u8], name: &str) -> Result<Value, SchemaError> {
    let value = match (kind, raw.len()) {
        (NumericKind::SInt, 1) => Value::SInt(raw[0] as i8 as i64),
        (NumericKind::SInt, 2) => Value::SInt(i16::from_le_bytes(raw.try_into().unwrap()) as i64),
        (NumericKind::SInt, 4) => Value::SInt(i32::from_le_bytes(raw.try_into().unwrap()) as i64),
        (NumericKind::SInt, 8) => Value::SInt(i64::from_le_bytes(raw.try_into().unwrap())),
        (NumericKind::UInt, 1) => Value::UInt(raw[0] as u64),
        (NumericKind::UInt, 2) => Value::UInt(u16::from_le_bytes(raw.try_into().unwrap()) as u64),
        (NumericKind::UInt, 4) => Value::UInt(u32::from_le_bytes(raw.try_into().unwrap()) as u64),
        (NumericKind::UInt, 8) => Value::UInt(u64::from_le_bytes(raw.try_into().unwrap())),
        (NumericKind::Float, 4) => Value::Float(f32::from_le_bytes(raw.try_into().unwrap()) as f64),
        (NumericKind::Float, 8) => Value::Float(f64::from_le_bytes(raw.try_into().unwrap())),
        (kind, size) => {
            return Err(SchemaError::shape(format!(
                "type '{name}': unsupported {} size {size}",
                kind.as_str()
            )))
        }
    };
    Ok(value)
}

fn encode_at(ty: &TypeSchema, value: &Value, out: &mut [u8]) -> Result<(), SchemaError> {
    match ty.def() {
        TypeDef::Numeric { kind, size } => encode_numeric(*kind, *size, value, out, ty.name()),
        TypeDef::Compound { fields } => {
            let Value::Compound(members) = value else {
                return Err(SchemaError::shape(format!(
                    "type '{}' expects a compound value",
                    ty.name()
                )));
            };
            for (name, _) in members {
                if !fields.iter().any(|f| &f.name == name) {
                    return Err(SchemaError::shape(format!(
                        "type '{}' has no member '{name}'",
                        ty.name()
                    )));
                }
            }
            let mut offset = 0;
            for field in fields {
                let size = field.ty.size();
                let member = members
                    .iter()
                    .find(|(n, _)| n == &field.name)
                    .map(|(_, v)| v)
                    .ok_or_else(|| {
                        SchemaError::shape(format!(
                            "value for type '{}' is missing member '{}'",
                            ty.name(),
                            field.name
                        ))
                    })?;
                encode_at(&field.ty, member, &mut out[offset..offset + size])?;
                offset += size;
            }
            Ok(())
        }
        TypeDef::Array { element, length } => {
            let Value::Array(elements) = value else {
                return Err(SchemaError::shape(format!(
                    "type '{}' expects an array value",
                    ty.name()
                )));
            };
            if elements.len() != *length {
                return Err(SchemaError::shape(format!(
                    "type '{}' expects {length} elements, got {}",
                    ty.name(),
                    elements.len()
                )));
            }
            let size = element.size();
            for (i, elem) in elements.iter().enumerate() {
                encode_at(element, elem, &mut out[i * size..(i + 1) * size])?;
            }
            Ok(())
        }
    }
}

fn encode_numeric(
    kind: NumericKind,
    size: usize,
    value: &Value,
    out: &mut [u8],
    name: &str,
) -> Result<(), SchemaError> {
    let range_err = || {
        SchemaError::shape(format!(
            "value does not fit field of type '{name}' ({} of {size} bytes)",
            kind.as_str()
        ))
    };
    match kind {
        NumericKind::SInt => {
            let v = match value {
                Value::SInt(i) => *i,
                Value::UInt(u) => i64::try_from(*u).map_err(|_| range_err())?,
                Value::Float(f) => *f as i64,
                _ => {
                    return Err(SchemaError::shape(format!(
                        "type '{name}' expects a numeric value"
                    )))
                }
            };
            match size {
                1 => out.copy_from_slice(&i8::try_from(v).map_err(|_| range_err())?.to_le_bytes()),
                2 => out.copy_from_slice(&i16::try_from(v).map_err(|_| range_err())?.to_le_bytes()),
                4 => out.copy_from_slice(&i32::try_from(v).map_err(|_| range_err())?.to_le_bytes()),
                8 => out.copy_from_slice(&v.to_le_bytes()),
                _ => return Err(range_err()),
            }
        }
        NumericKind::UInt => {
            let v = match value {
                Value::UInt(u) => *u,
                Value::SInt(i) => u64::try_from(*i).map_err(|_| range_err())?,
                Value::Float(f) => *f as u64,
                _ => {
                    return Err(SchemaError::shape(format!(
                        "type '{name}' expects a numeric value"
                    )))
                }
            };
            match size {
                1 => out.copy_from_slice(&u8::try_from(v).map_err(|_| range_err())?.to_le_bytes()),
                2 => out.copy_from_slice(&u16::try_from(v).map_err(|_| range_err())?.to_le_bytes()),
                4 => out.copy_from_slice(&u32::try_from(v).map_err(|_| range_err())?.to_le_bytes()),
                8 => out.copy_from_slice(&v.to_le_bytes()),
                _ => return Err(range_err()),
            }
        }
        NumericKind::Float => {
            let v = match value {
                Value::Float(f) => *f,
                Value::SInt(i) => *i as f64,
                Value::UInt(u) => *u as f64,
                _ => {
                    return Err(SchemaError::shape(format!(
                        "type '{name}' expects a numeric value"
                    )))
                }
            };
            match size {
                4 => out.copy_from_slice(&(v as f32).to_le_bytes()),
                8 => out.copy_from_slice(&v.to_le_bytes()),
                _ => return Err(range_err()),
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::CompoundField;

    fn int32() -> Arc<TypeSchema> {
        Arc::new(TypeSchema::new(
            "/int32_t",
            TypeDef::Numeric { kind: NumericKind::SInt, size: 4 },
        ))
    }

    fn position() -> Arc<TypeSchema> {
        Arc::new(TypeSchema::new(
            "/Position",
            TypeDef::Compound {
                fields: vec![
                    CompoundField { name: "x".into(), ty: int32() },
                    CompoundField { name: "y".into(), ty: int32() },
                ],
            },
        ))
    }

    #[test]
    fn test_write_then_decode_compound() {
        let mut sample = TypedValue::zeroed(position());
        sample
            .write(&Value::Compound(vec![
                ("x".into(), Value::SInt(7)),
                ("y".into(), Value::SInt(-3)),
            ]))
            .unwrap();

        let decoded = sample.decode().unwrap();
        assert_eq!(decoded.field("x"), Some(&Value::SInt(7)));
        assert_eq!(decoded.field("y"), Some(&Value::SInt(-3)));
    }

    #[test]
    fn test_write_accepts_members_in_any_order() {
        let mut sample = TypedValue::zeroed(position());
        sample
            .write(&Value::Compound(vec![
                ("y".into(), Value::SInt(2)),
                ("x".into(), Value::SInt(1)),
            ]))
            .unwrap();
        assert_eq!(sample.bytes(), &[1, 0, 0, 0, 2, 0, 0, 0]);
    }

    #[test]
    fn test_write_rejects_unknown_member() {
        let mut sample = TypedValue::zeroed(position());
        let err = sample
            .write(&Value::Compound(vec![
                ("x".into(), Value::SInt(1)),
                ("y".into(), Value::SInt(2)),
                ("heading".into(), Value::SInt(3)),
            ]))
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Shape);
    }

    #[test]
    fn test_write_rejects_missing_member() {
        let mut sample = TypedValue::zeroed(position());
        let err = sample
            .write(&Value::Compound(vec![("x".into(), Value::SInt(1))]))
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Shape);
    }

    #[test]
    fn test_write_rejects_out_of_range_numeric() {
        let byte = Arc::new(TypeSchema::new(
            "/uint8_t",
            TypeDef::Numeric { kind: NumericKind::UInt, size: 1 },
        ));
        let mut sample = TypedValue::zeroed(byte);
        assert!(sample.write(&Value::SInt(300)).is_err());
        assert!(sample.write(&Value::SInt(-1)).is_err());
        sample.write(&Value::SInt(255)).unwrap();
        assert_eq!(sample.bytes(), &[255]);
    }

    #[test]
    fn test_array_round_trip() {
        let arr = Arc::new(TypeSchema::new(
            "/int32_t[3]",
            TypeDef::Array { element: int32(), length: 3 },
        ));
        let mut sample = TypedValue::zeroed(arr);
        sample
            .write(&Value::Array(vec![
                Value::SInt(1),
                Value::SInt(2),
                Value::SInt(3),
            ]))
            .unwrap();
        assert_eq!(
            sample.decode().unwrap(),
            Value::Array(vec![Value::SInt(1), Value::SInt(2), Value::SInt(3)])
        );

        let err = sample.write(&Value::Array(vec![Value::SInt(1)])).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Shape);
    }

    #[test]
    fn test_from_bytes_checks_size() {
        assert!(TypedValue::from_bytes(position(), vec![0; 8]).is_ok());
        assert!(TypedValue::from_bytes(position(), vec![0; 7]).is_err());
    }
}
