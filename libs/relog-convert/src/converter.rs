use std::fmt;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use relog_api::schema::TypeSchema;
use relog_api::value::TypedValue;

use crate::error::ConvertError;

/// Transformation routine applied to one recorded sample: fills `target`
/// from `source`.
pub type Transform =
    Box<dyn Fn(&mut TypedValue, &TypedValue) -> Result<(), ConvertError> + Send + Sync>;

/// A registered transformation from one type layout to another, valid as of
/// an effective date.
///
/// Created while a converter script is evaluated, handed to the registry,
/// never mutated afterwards. `name` is the path of the script that defined
/// it.
pub struct Converter {
    effective_date: DateTime<Utc>,
    source_type: Arc<TypeSchema>,
    target_type: Arc<TypeSchema>,
    name: String,
    transform: Transform,
}

impl fmt::Debug for Converter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Converter")
            .field("name", &self.name)
            .field("effective_date", &self.effective_date)
            .field("source_type", &self.source_type.name())
            .field("target_type", &self.target_type.name())
            .finish()
    }
}

impl Converter {
    pub fn new(
        effective_date: DateTime<Utc>,
        source_type: Arc<TypeSchema>,
        target_type: Arc<TypeSchema>,
        name: String,
        transform: Transform,
    ) -> Self {
        Self { effective_date, source_type, target_type, name, transform }
    }

    pub fn effective_date(&self) -> DateTime<Utc> {
        self.effective_date
    }

    pub fn source_type(&self) -> &Arc<TypeSchema> {
        &self.source_type
    }

    pub fn target_type(&self) -> &Arc<TypeSchema> {
        &self.target_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Apply the transformation, filling `target` from `source`.
    pub fn convert(
        &self,
        target: &mut TypedValue,
        source: &TypedValue,
    ) -> Result<(), ConvertError> {
        (self.transform)(target, source)
    }
}

/// Accumulating store of converters, consulted by log-reading code when it
/// decodes samples recorded under an older layout.
///
/// Uses interior mutability so converters can be added while readers hold
/// shared references.
#[derive(Default)]
pub struct ConverterRegistry {
    converters: RwLock<Vec<Arc<Converter>>>,
}

impl fmt::Debug for ConverterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConverterRegistry")
            .field("len", &self.len())
            .finish()
    }
}

impl ConverterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a converter and return the shared handle.
    pub fn add(
        &self,
        effective_date: DateTime<Utc>,
        source_type: Arc<TypeSchema>,
        target_type: Arc<TypeSchema>,
        name: String,
        transform: Transform,
    ) -> Arc<Converter> {
        let converter = Arc::new(Converter::new(
            effective_date,
            source_type,
            target_type,
            name,
            transform,
        ));
        let mut guard = match self.converters.write() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("converter registry write lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        guard.push(converter.clone());
        converter
    }

    /// Drop a specific converter again. Used to roll back a registration
    /// when the script that produced it fails later in its evaluation.
    pub(crate) fn remove(&self, converter: &Arc<Converter>) {
        let mut guard = match self.converters.write() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("converter registry write lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        guard.retain(|c| !Arc::ptr_eq(c, converter));
    }

    pub fn all(&self) -> Vec<Arc<Converter>> {
        let guard = match self.converters.read() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("converter registry read lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        guard.clone()
    }

    pub fn len(&self) -> usize {
        let guard = match self.converters.read() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("converter registry read lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        guard.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
