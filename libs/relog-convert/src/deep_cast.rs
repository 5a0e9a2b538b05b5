use std::sync::Arc;

use chrono::{DateTime, Utc};

use relog_api::error::SchemaError;
use relog_api::schema::{TypeDef, TypeSchema};
use relog_api::value::{TypedValue, Value};

use crate::converter::ConverterRegistry;
use crate::error::ConvertError;

/// Options forwarded to the deep-cast factory.
///
/// `relax` tolerates missing and extra fields between the source and target
/// layouts; strict mode requires the field sets to correspond exactly. Finer
/// matching rules belong to the factory implementation.
#[derive(Debug, Clone, Copy)]
pub struct CastOptions {
    pub relax: bool,
}

impl Default for CastOptions {
    fn default() -> Self {
        Self { relax: true }
    }
}

/// A reusable structural copier between two type layouts.
pub trait ValueCopier: std::fmt::Debug + Send + Sync {
    fn copy(&self, target: &mut TypedValue, source: &TypedValue) -> Result<(), ConvertError>;
}

/// Builds copiers for a (reference date, source type, target type) triple.
///
/// The registry is handed through so a factory may resolve intermediate
/// conversion steps against already-registered converters; the default
/// factory does not need it.
pub trait DeepCastFactory: Send + Sync {
    fn build(
        &self,
        reference_date: DateTime<Utc>,
        from: &Arc<TypeSchema>,
        to: &Arc<TypeSchema>,
        registry: &ConverterRegistry,
        options: CastOptions,
    ) -> Result<Arc<dyn ValueCopier>, ConvertError>;
}

/// Default factory: generic field-by-name structural copy between two
/// independently-evolved layouts, without knowing either ahead of time.
#[derive(Debug, Default)]
pub struct StructuralCast;

impl DeepCastFactory for StructuralCast {
    fn build(
        &self,
        _reference_date: DateTime<Utc>,
        from: &Arc<TypeSchema>,
        to: &Arc<TypeSchema>,
        _registry: &ConverterRegistry,
        options: CastOptions,
    ) -> Result<Arc<dyn ValueCopier>, ConvertError> {
        if !options.relax {
            check_strict(from, to)?;
        }
        Ok(Arc::new(StructuralCopier))
    }
}

/// Verify that two layouts have exactly corresponding field sets, so a
/// strict copy cannot drop or invent data.
fn check_strict(from: &TypeSchema, to: &TypeSchema) -> Result<(), SchemaError> {
    match (from.def(), to.def()) {
        (TypeDef::Numeric { .. }, TypeDef::Numeric { .. }) => Ok(()),
        (TypeDef::Compound { fields: from_fields }, TypeDef::Compound { fields: to_fields }) => {
            for field in from_fields {
                if !to_fields.iter().any(|f| f.name == field.name) {
                    return Err(field_mismatch(from, to, &field.name));
                }
            }
            for field in to_fields {
                let matching = from_fields
                    .iter()
                    .find(|f| f.name == field.name)
                    .ok_or_else(|| field_mismatch(from, to, &field.name))?;
                check_strict(&matching.ty, &field.ty)?;
            }
            Ok(())
        }
        (
            TypeDef::Array { element: from_elem, length: from_len },
            TypeDef::Array { element: to_elem, length: to_len },
        ) => {
            if from_len != to_len {
                return Err(SchemaError::shape(format!(
                    "field mismatch between '{}' and '{}': array lengths {from_len} and {to_len}",
                    from.name(),
                    to.name()
                )));
            }
            check_strict(from_elem, to_elem)
        }
        _ => Err(SchemaError::shape(format!(
            "field mismatch: '{}' and '{}' have different structure",
            from.name(),
            to.name()
        ))),
    }
}

fn field_mismatch(from: &TypeSchema, to: &TypeSchema, field: &str) -> SchemaError {
    SchemaError::shape(format!(
        "field mismatch between '{}' and '{}': member '{field}' is not present on both sides",
        from.name(),
        to.name()
    ))
}

/// Best-effort copy of everything that exists on both sides, by member
/// name for compounds and by position for arrays. Target members with no
/// source counterpart keep their current contents.
#[derive(Debug)]
struct StructuralCopier;

impl ValueCopier for StructuralCopier {
    fn copy(&self, target: &mut TypedValue, source: &TypedValue) -> Result<(), ConvertError> {
        let source_value = source.decode()?;
        let mut target_value = target.decode()?;
        merge(&mut target_value, &source_value);
        target.write(&target_value)?;
        Ok(())
    }
}

fn merge(target: &mut Value, source: &Value) {
    match (target, source) {
        (Value::SInt(t), source) => {
            if let Some(v) = as_sint(source) {
                *t = v;
            }
        }
        (Value::UInt(t), source) => {
            if let Some(v) = as_uint(source) {
                *t = v;
            }
        }
        (Value::Float(t), source) => {
            if let Some(v) = as_float(source) {
                *t = v;
            }
        }
        (Value::Compound(target_members), Value::Compound(source_members)) => {
            for (name, target_member) in target_members {
                if let Some((_, source_member)) =
                    source_members.iter().find(|(n, _)| n == name)
                {
                    merge(target_member, source_member);
                }
            }
        }
        (Value::Array(target_elems), Value::Array(source_elems)) => {
            for (target_elem, source_elem) in target_elems.iter_mut().zip(source_elems) {
                merge(target_elem, source_elem);
            }
        }
        // Mismatched structure: leave the target member untouched.
        _ => {}
    }
}

fn as_sint(value: &Value) -> Option<i64> {
    match value {
        Value::SInt(v) => Some(*v),
        Value::UInt(v) => i64::try_from(*v).ok(),
        Value::Float(v) => Some(*v as i64),
        _ => None,
    }
}

fn as_uint(value: &Value) -> Option<u64> {
    match value {
        Value::UInt(v) => Some(*v),
        Value::SInt(v) => u64::try_from(*v).ok(),
        Value::Float(v) => Some(*v as u64),
        _ => None,
    }
}

fn as_float(value: &Value) -> Option<f64> {
    match value {
        Value::Float(v) => Some(*v),
        Value::SInt(v) => Some(*v as f64),
        Value::UInt(v) => Some(*v as f64),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use relog_api::registry::TypeRegistry;
    use relog_api::schema::NumericKind;

    fn reference_date() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn old_position(registry: &mut TypeRegistry) -> Arc<TypeSchema> {
        let int32 = registry.create_numeric("/int32_t", 4, NumericKind::SInt).unwrap();
        registry
            .create_compound(
                "/Position",
                vec![
                    ("x".into(), int32.clone()),
                    ("y".into(), int32.clone()),
                    ("z".into(), int32),
                ],
            )
            .unwrap()
    }

    fn new_position(registry: &mut TypeRegistry) -> Arc<TypeSchema> {
        let double = registry.create_numeric("/double", 8, NumericKind::Float).unwrap();
        registry
            .create_compound(
                "/Position",
                vec![
                    ("x".into(), double.clone()),
                    ("y".into(), double.clone()),
                    ("heading".into(), double),
                ],
            )
            .unwrap()
    }

    #[test]
    fn test_relaxed_copies_the_field_intersection() {
        let mut source_reg = TypeRegistry::new();
        let mut target_reg = TypeRegistry::new();
        let from = old_position(&mut source_reg);
        let to = new_position(&mut target_reg);

        let copier = StructuralCast
            .build(
                reference_date(),
                &from,
                &to,
                &ConverterRegistry::new(),
                CastOptions { relax: true },
            )
            .unwrap();

        let mut source = TypedValue::zeroed(from);
        source
            .write(&Value::Compound(vec![
                ("x".into(), Value::SInt(1)),
                ("y".into(), Value::SInt(2)),
                ("z".into(), Value::SInt(3)),
            ]))
            .unwrap();
        let mut target = TypedValue::zeroed(to);
        copier.copy(&mut target, &source).unwrap();

        let decoded = target.decode().unwrap();
        assert_eq!(decoded.field("x"), Some(&Value::Float(1.0)));
        assert_eq!(decoded.field("y"), Some(&Value::Float(2.0)));
        // No source counterpart: keeps its zero initialization.
        assert_eq!(decoded.field("heading"), Some(&Value::Float(0.0)));
    }

    #[test]
    fn test_strict_rejects_differing_field_sets() {
        let mut source_reg = TypeRegistry::new();
        let mut target_reg = TypeRegistry::new();
        let from = old_position(&mut source_reg);
        let to = new_position(&mut target_reg);

        let err = StructuralCast
            .build(
                reference_date(),
                &from,
                &to,
                &ConverterRegistry::new(),
                CastOptions { relax: false },
            )
            .unwrap_err();
        assert!(err.to_string().contains("field mismatch"));
    }

    #[test]
    fn test_strict_accepts_numeric_representation_changes() {
        let mut source_reg = TypeRegistry::new();
        let mut target_reg = TypeRegistry::new();
        let int32 = source_reg.create_numeric("/int32_t", 4, NumericKind::SInt).unwrap();
        let from = source_reg
            .create_compound("/Reading", vec![("value".into(), int32)])
            .unwrap();
        let double = target_reg.create_numeric("/double", 8, NumericKind::Float).unwrap();
        let to = target_reg
            .create_compound("/Reading", vec![("value".into(), double)])
            .unwrap();

        let copier = StructuralCast
            .build(
                reference_date(),
                &from,
                &to,
                &ConverterRegistry::new(),
                CastOptions { relax: false },
            )
            .unwrap();

        let mut source = TypedValue::zeroed(from);
        source
            .write(&Value::Compound(vec![("value".into(), Value::SInt(-5))]))
            .unwrap();
        let mut target = TypedValue::zeroed(to);
        copier.copy(&mut target, &source).unwrap();
        assert_eq!(
            target.decode().unwrap().field("value"),
            Some(&Value::Float(-5.0))
        );
    }

    #[test]
    fn test_array_copy_is_positional_and_bounded() {
        let mut source_reg = TypeRegistry::new();
        let mut target_reg = TypeRegistry::new();
        let int32 = source_reg.create_numeric("/int32_t", 4, NumericKind::SInt).unwrap();
        let from = source_reg.create_array(int32, 4).unwrap();
        let int64 = target_reg.create_numeric("/int64_t", 8, NumericKind::SInt).unwrap();
        let to = target_reg.create_array(int64, 2).unwrap();

        let copier = StructuralCast
            .build(
                reference_date(),
                &from,
                &to,
                &ConverterRegistry::new(),
                CastOptions::default(),
            )
            .unwrap();

        let mut source = TypedValue::zeroed(from);
        source
            .write(&Value::Array(
                (1..=4).map(Value::SInt).collect(),
            ))
            .unwrap();
        let mut target = TypedValue::zeroed(to);
        copier.copy(&mut target, &source).unwrap();
        assert_eq!(
            target.decode().unwrap(),
            Value::Array(vec![Value::SInt(1), Value::SInt(2)])
        );
    }
}
