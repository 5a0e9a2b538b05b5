use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::SchemaError;
use crate::schema::{CompoundField, NumericKind, TypeDef, TypeSchema};
use crate::tlb;

/// A named collection of type schemas, loadable from and serializable to
/// a `.tlb` snapshot.
///
/// Registries are value objects: each snapshot file deserializes into its
/// own independent registry, and looking up the same name in two registries
/// can yield two different layouts.
#[derive(Debug, Default, Clone)]
pub struct TypeRegistry {
    types: BTreeMap<String, Arc<TypeSchema>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry containing `root` and every type reachable from it.
    pub fn reachable_from(root: &Arc<TypeSchema>) -> Self {
        let mut registry = Self::new();
        registry.adopt(root);
        registry
    }

    /// Fallible lookup by fully-qualified name.
    pub fn get(&self, name: &str) -> Result<Arc<TypeSchema>, SchemaError> {
        self.types.get(name).cloned().ok_or_else(|| {
            SchemaError::not_found(format!("type '{name}' is not defined in this registry"))
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Iterate schemas in name order.
    pub fn each(&self) -> impl Iterator<Item = &Arc<TypeSchema>> {
        self.types.values()
    }

    /// Register a schema under its own name.
    ///
    /// Registering the same name twice is allowed only when both layouts are
    /// structurally equal; the already-registered schema is returned then.
    pub fn register(&mut self, schema: TypeSchema) -> Result<Arc<TypeSchema>, SchemaError> {
        if let Some(existing) = self.types.get(schema.name()) {
            if **existing == schema {
                return Ok(existing.clone());
            }
            return Err(SchemaError::conflict(format!(
                "type '{}' is already defined with a different layout",
                schema.name()
            )));
        }
        let schema = Arc::new(schema);
        self.types.insert(schema.name().to_string(), schema.clone());
        Ok(schema)
    }

    pub fn create_numeric(
        &mut self,
        name: &str,
        size: usize,
        kind: NumericKind,
    ) -> Result<Arc<TypeSchema>, SchemaError> {
        self.register(TypeSchema::new(name, TypeDef::Numeric { kind, size }))
    }

    pub fn create_compound(
        &mut self,
        name: &str,
        fields: Vec<(String, Arc<TypeSchema>)>,
    ) -> Result<Arc<TypeSchema>, SchemaError> {
        let fields = fields
            .into_iter()
            .map(|(name, ty)| CompoundField { name, ty })
            .collect();
        self.register(TypeSchema::new(name, TypeDef::Compound { fields }))
    }

    /// Register an array type named `<element>[<length>]`.
    pub fn create_array(
        &mut self,
        element: Arc<TypeSchema>,
        length: usize,
    ) -> Result<Arc<TypeSchema>, SchemaError> {
        let name = format!("{}[{length}]", element.name());
        self.register(TypeSchema::new(name, TypeDef::Array { element, length }))
    }

    /// Serialize the registry to its `.tlb` snapshot representation.
    pub fn to_tlb(&self) -> String {
        tlb::to_xml(self)
    }

    /// Deserialize a registry from a `.tlb` snapshot.
    pub fn from_tlb(text: &str) -> Result<Self, SchemaError> {
        tlb::from_xml(text)
    }

    /// Insert an already-shared schema and everything it references,
    /// preserving sharing. Silently keeps the first layout registered for a
    /// name.
    fn adopt(&mut self, schema: &Arc<TypeSchema>) {
        if self.contains(schema.name()) {
            return;
        }
        self.types.insert(schema.name().to_string(), schema.clone());
        match schema.def() {
            TypeDef::Numeric { .. } => {}
            TypeDef::Compound { fields } => {
                for field in fields {
                    self.adopt(&field.ty);
                }
            }
            TypeDef::Array { element, .. } => self.adopt(element),
        }
    }
}
