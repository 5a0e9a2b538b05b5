use std::fmt;
use std::sync::Arc;

/// Category of a numeric leaf type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericKind {
    SInt,
    UInt,
    Float,
}

impl NumericKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NumericKind::SInt => "sint",
            NumericKind::UInt => "uint",
            NumericKind::Float => "float",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sint" => Some(NumericKind::SInt),
            "uint" => Some(NumericKind::UInt),
            "float" => Some(NumericKind::Float),
            _ => None,
        }
    }
}

/// One named member of a compound layout, in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct CompoundField {
    pub name: String,
    pub ty: Arc<TypeSchema>,
}

/// Structural definition of a type's binary layout.
///
/// Layouts are packed little-endian; compound members follow each other
/// with no padding, in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeDef {
    Numeric { kind: NumericKind, size: usize },
    Compound { fields: Vec<CompoundField> },
    Array { element: Arc<TypeSchema>, length: usize },
}

/// An immutable, named structural type.
///
/// Two schemas are equal when their names and their full recursive
/// definitions match. Shared via `Arc` once registered; never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeSchema {
    name: String,
    def: TypeDef,
}

impl TypeSchema {
    pub fn new(name: impl Into<String>, def: TypeDef) -> Self {
        Self { name: name.into(), def }
    }

    /// Fully-qualified name, e.g. `/base/Position`.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn def(&self) -> &TypeDef {
        &self.def
    }

    /// Byte size of the packed layout.
    pub fn size(&self) -> usize {
        match &self.def {
            TypeDef::Numeric { size, .. } => *size,
            TypeDef::Compound { fields } => fields.iter().map(|f| f.ty.size()).sum(),
            TypeDef::Array { element, length } => element.size() * length,
        }
    }
}

impl fmt::Display for TypeSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int32() -> Arc<TypeSchema> {
        Arc::new(TypeSchema::new(
            "/int32_t",
            TypeDef::Numeric { kind: NumericKind::SInt, size: 4 },
        ))
    }

    #[test]
    fn test_compound_size_is_sum_of_fields() {
        let position = TypeSchema::new(
            "/Position",
            TypeDef::Compound {
                fields: vec![
                    CompoundField { name: "x".into(), ty: int32() },
                    CompoundField { name: "y".into(), ty: int32() },
                    CompoundField { name: "z".into(), ty: int32() },
                ],
            },
        );
        assert_eq!(position.size(), 12);
    }

    #[test]
    fn test_array_size() {
        let arr = TypeSchema::new(
            "/int32_t[4]",
            TypeDef::Array { element: int32(), length: 4 },
        );
        assert_eq!(arr.size(), 16);
    }

    #[test]
    fn test_structural_equality_is_independent_of_sharing() {
        let a = TypeSchema::new(
            "/Position",
            TypeDef::Compound {
                fields: vec![CompoundField { name: "x".into(), ty: int32() }],
            },
        );
        let b = TypeSchema::new(
            "/Position",
            TypeDef::Compound {
                fields: vec![CompoundField { name: "x".into(), ty: int32() }],
            },
        );
        assert_eq!(a, b);

        let c = TypeSchema::new(
            "/Position",
            TypeDef::Compound {
                fields: vec![CompoundField { name: "y".into(), ty: int32() }],
            },
        );
        assert_ne!(a, c);
    }
}
