//! Evaluation of converter scripts.
//!
//! A converter script is a Rhai source file whose top level calls
//! `define(date, from_type, to_type, |target, source| ...)` exactly once.
//! Inside the body, the only domain operations are `deep_cast`, `copy` and
//! `to_native`; the body's final value becomes the produced target sample.
//!
//! Each script is evaluated against its own [`Context`]: a restricted
//! engine that exposes those operations and nothing else — no file access,
//! no `eval`, no view of the registry or of other scripts' converters.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rhai::{AST, Dynamic, Engine, EvalAltResult, FnPtr, Position};

use relog_api::error::SchemaError;
use relog_api::registry::TypeRegistry;
use relog_api::schema::TypeSchema;
use relog_api::value::{TypedValue, Value};

use crate::converter::{Converter, ConverterRegistry, Transform};
use crate::deep_cast::{CastOptions, DeepCastFactory, StructuralCast, ValueCopier};
use crate::error::ConvertError;

/// Shared state of one script evaluation.
///
/// Registered engine functions and the produced converter's transform both
/// hold a handle to this; the converter registry and the converter itself
/// are held weakly so the registry's ownership of converters stays acyclic.
struct ContextState {
    path: PathBuf,
    converter_registry: Weak<ConverterRegistry>,
    source_registry: Arc<TypeRegistry>,
    target_registry: Arc<TypeRegistry>,
    factory: Arc<dyn DeepCastFactory>,
    engine: Option<Weak<Engine>>,
    ast: Option<Arc<AST>>,
    reference_date: Option<DateTime<Utc>>,
    from_type: Option<Arc<TypeSchema>>,
    to_type: Option<Arc<TypeSchema>>,
    converter: Option<Weak<Converter>>,
    copier: Option<Arc<dyn ValueCopier>>,
    failure: Option<ConvertError>,
}

/// Evaluation context for one converter script.
pub struct Context {
    state: Arc<Mutex<ContextState>>,
    engine: Arc<Engine>,
    registry: Arc<ConverterRegistry>,
}

impl Context {
    pub fn new(
        path: impl Into<PathBuf>,
        converter_registry: &Arc<ConverterRegistry>,
        source_registry: Arc<TypeRegistry>,
        target_registry: Arc<TypeRegistry>,
    ) -> Self {
        Self::with_factory(
            path,
            converter_registry,
            source_registry,
            target_registry,
            Arc::new(StructuralCast),
        )
    }

    pub fn with_factory(
        path: impl Into<PathBuf>,
        converter_registry: &Arc<ConverterRegistry>,
        source_registry: Arc<TypeRegistry>,
        target_registry: Arc<TypeRegistry>,
        factory: Arc<dyn DeepCastFactory>,
    ) -> Self {
        let state = Arc::new(Mutex::new(ContextState {
            path: path.into(),
            converter_registry: Arc::downgrade(converter_registry),
            source_registry,
            target_registry,
            factory,
            engine: None,
            ast: None,
            reference_date: None,
            from_type: None,
            to_type: None,
            converter: None,
            copier: None,
            failure: None,
        }));
        let engine = Arc::new(build_engine(&state));
        lock(&state).engine = Some(Arc::downgrade(&engine));
        Self {
            state,
            engine,
            registry: converter_registry.clone(),
        }
    }

    /// Evaluate the full text of a converter script against this context.
    ///
    /// The evaluation is side-effect-only: a well-formed script registers
    /// one converter through `define`, retrievable via [`Context::converter`]
    /// afterwards. Parse errors, a duplicate `define`, an unresolvable type
    /// name and a malformed date all fail the evaluation.
    pub fn eval(&self, code: &str) -> Result<(), ConvertError> {
        let ast = Arc::new(self.engine.compile(code).map_err(|e| ConvertError::Script {
            path: lock(&self.state).path.display().to_string(),
            message: e.to_string(),
        })?);

        lock(&self.state).ast = Some(ast.clone());
        let result = self.engine.run_ast(&ast);

        let mut guard = lock(&self.state);
        // The transform captured its own handle on the AST in `define`.
        guard.ast = None;
        match result {
            Ok(()) => Ok(()),
            Err(e) => {
                // A failed evaluation must not leave its converter behind.
                if let Some(converter) = guard.converter.take().and_then(|w| w.upgrade()) {
                    self.registry.remove(&converter);
                }
                Err(guard.failure.take().unwrap_or_else(|| ConvertError::Script {
                    path: guard.path.display().to_string(),
                    message: e.to_string(),
                }))
            }
        }
    }

    pub fn path(&self) -> PathBuf {
        lock(&self.state).path.clone()
    }

    pub fn reference_date(&self) -> Option<DateTime<Utc>> {
        lock(&self.state).reference_date
    }

    pub fn from_type(&self) -> Option<Arc<TypeSchema>> {
        lock(&self.state).from_type.clone()
    }

    pub fn to_type(&self) -> Option<Arc<TypeSchema>> {
        lock(&self.state).to_type.clone()
    }

    pub fn source_registry(&self) -> Arc<TypeRegistry> {
        lock(&self.state).source_registry.clone()
    }

    pub fn target_registry(&self) -> Arc<TypeRegistry> {
        lock(&self.state).target_registry.clone()
    }

    pub fn converter_registry(&self) -> Arc<ConverterRegistry> {
        self.registry.clone()
    }

    /// The converter this script defined, if any.
    pub fn converter(&self) -> Option<Arc<Converter>> {
        lock(&self.state).converter.as_ref().and_then(Weak::upgrade)
    }
}

fn lock(state: &Mutex<ContextState>) -> MutexGuard<'_, ContextState> {
    match state.lock() {
        Ok(g) => g,
        Err(poisoned) => {
            tracing::warn!("evaluation context lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

// ---------------------------------------------------------------------------
// Engine assembly: the four script-visible operations
// ---------------------------------------------------------------------------

fn build_engine(state: &Arc<Mutex<ContextState>>) -> Engine {
    let mut engine = Engine::new();
    engine.disable_symbol("eval");
    engine.set_max_expr_depths(64, 64);
    engine.set_max_call_levels(32);
    engine.register_type_with_name::<TypedValue>("TypedValue");

    let st = state.clone();
    engine.register_fn(
        "define",
        move |date: &str, from: &str, to: &str, body: FnPtr| -> Result<(), Box<EvalAltResult>> {
            define_impl(&st, date, from, to, body).map_err(|e| raise(&st, e))
        },
    );

    let st = state.clone();
    engine.register_fn(
        "deep_cast",
        move |target: &mut TypedValue, source: TypedValue| -> Result<(), Box<EvalAltResult>> {
            deep_cast_impl(&st, target, &source, None).map_err(|e| raise(&st, e))
        },
    );

    let st = state.clone();
    engine.register_fn(
        "deep_cast",
        move |target: &mut TypedValue,
              source: TypedValue,
              relax: bool|
              -> Result<(), Box<EvalAltResult>> {
            deep_cast_impl(&st, target, &source, Some(relax)).map_err(|e| raise(&st, e))
        },
    );

    let st = state.clone();
    engine.register_fn(
        "copy",
        move |target: &mut TypedValue, value: Dynamic| -> Result<(), Box<EvalAltResult>> {
            let native = dynamic_to_value(value).map_err(|e| raise(&st, e.into()))?;
            target.write(&native).map_err(|e| raise(&st, e.into()))
        },
    );

    let st = state.clone();
    engine.register_fn(
        "to_native",
        move |value: TypedValue| -> Result<Dynamic, Box<EvalAltResult>> {
            let decoded = value.decode().map_err(|e| raise(&st, e.into()))?;
            Ok(value_to_dynamic(&decoded))
        },
    );

    engine
}

/// Record the structured error on the context, then surface it to the
/// script engine. The loader takes the structured form back out when the
/// evaluation fails.
fn raise(state: &Arc<Mutex<ContextState>>, err: ConvertError) -> Box<EvalAltResult> {
    let message = err.to_string();
    lock(state).failure = Some(err);
    Box::new(EvalAltResult::ErrorRuntime(Dynamic::from(message), Position::NONE))
}

fn define_impl(
    state: &Arc<Mutex<ContextState>>,
    date: &str,
    from: &str,
    to: &str,
    body: FnPtr,
) -> Result<(), ConvertError> {
    let mut guard = lock(state);
    let path = guard.path.display().to_string();

    if guard.reference_date.is_some() {
        return Err(ConvertError::DuplicateDefinition { path });
    }

    let reference_date = parse_date(date, &path)?;
    let from_type = guard.source_registry.get(from)?;
    let to_type = guard.target_registry.get(to)?;

    let registry = guard.converter_registry.upgrade().ok_or_else(|| {
        ConvertError::Script {
            path: path.clone(),
            message: "converter registry was dropped during evaluation".into(),
        }
    })?;
    let engine = guard
        .engine
        .as_ref()
        .and_then(Weak::upgrade)
        .ok_or_else(|| ConvertError::Script {
            path: path.clone(),
            message: "evaluation context is gone".into(),
        })?;
    let ast = guard.ast.clone().ok_or_else(|| ConvertError::Script {
        path: path.clone(),
        message: "define may only be called from a converter script".into(),
    })?;

    let transform = make_transform(engine, ast, body, state.clone(), path.clone());
    let converter = registry.add(
        reference_date,
        from_type.clone(),
        to_type.clone(),
        path,
        transform,
    );

    guard.reference_date = Some(reference_date);
    guard.from_type = Some(from_type);
    guard.to_type = Some(to_type);
    guard.converter = Some(Arc::downgrade(&converter));
    Ok(())
}

/// Wrap the script's body closure into a [`Transform`]: call it with a copy
/// of the target and source samples and take its final value as the
/// produced target.
fn make_transform(
    engine: Arc<Engine>,
    ast: Arc<AST>,
    body: FnPtr,
    state: Arc<Mutex<ContextState>>,
    path: String,
) -> Transform {
    Box::new(move |target, source| {
        let produced = body
            .call::<TypedValue>(&engine, &ast, (target.clone(), source.clone()))
            .map_err(|e| {
                lock(&state).failure.take().unwrap_or_else(|| ConvertError::Script {
                    path: path.clone(),
                    message: e.to_string(),
                })
            })?;
        *target = produced;
        Ok(())
    })
}

fn deep_cast_impl(
    state: &Arc<Mutex<ContextState>>,
    target: &mut TypedValue,
    source: &TypedValue,
    relax: Option<bool>,
) -> Result<(), ConvertError> {
    let copier = {
        let mut guard = lock(state);
        match &guard.copier {
            Some(copier) => copier.clone(),
            None => {
                let path = guard.path.display().to_string();
                let missing = || ConvertError::Script {
                    path: path.clone(),
                    message: "deep_cast is only available inside a converter body".into(),
                };
                let reference_date = guard.reference_date.ok_or_else(missing)?;
                let from = guard.from_type.clone().ok_or_else(missing)?;
                let to = guard.to_type.clone().ok_or_else(missing)?;
                let registry = guard.converter_registry.upgrade().ok_or_else(|| {
                    ConvertError::Script {
                        path: path.clone(),
                        message: "converter registry was dropped".into(),
                    }
                })?;
                let options = CastOptions { relax: relax.unwrap_or(true) };
                let copier =
                    guard.factory.build(reference_date, &from, &to, &registry, options)?;
                guard.copier = Some(copier.clone());
                copier
            }
        }
    };
    copier.copy(target, source)
}

// ---------------------------------------------------------------------------
// Script value ↔ native value conversion
// ---------------------------------------------------------------------------

fn dynamic_to_value(value: Dynamic) -> Result<Value, SchemaError> {
    if let Ok(i) = value.as_int() {
        return Ok(Value::SInt(i));
    }
    if let Ok(f) = value.as_float() {
        return Ok(Value::Float(f));
    }
    let type_name = value.type_name();
    if let Some(typed) = value.clone().try_cast::<TypedValue>() {
        return typed.decode();
    }
    if let Some(array) = value.clone().try_cast::<rhai::Array>() {
        let elements = array
            .into_iter()
            .map(dynamic_to_value)
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(Value::Array(elements));
    }
    if let Some(map) = value.try_cast::<rhai::Map>() {
        let members = map
            .into_iter()
            .map(|(name, member)| dynamic_to_value(member).map(|v| (name.to_string(), v)))
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(Value::Compound(members));
    }
    Err(SchemaError::shape(format!(
        "cannot interpret a script value of type '{type_name}'"
    )))
}

fn value_to_dynamic(value: &Value) -> Dynamic {
    match value {
        Value::SInt(v) => Dynamic::from(*v),
        Value::UInt(v) => Dynamic::from(i64::try_from(*v).unwrap_or(i64::MAX)),
        Value::Float(v) => Dynamic::from(*v),
        Value::Array(elements) => {
            Dynamic::from_array(elements.iter().map(value_to_dynamic).collect())
        }
        Value::Compound(members) => {
            let mut map = rhai::Map::new();
            for (name, member) in members {
                map.insert(name.as_str().into(), value_to_dynamic(member));
            }
            Dynamic::from_map(map)
        }
    }
}

fn parse_date(text: &str, path: &str) -> Result<DateTime<Utc>, ConvertError> {
    if let Ok(t) = DateTime::parse_from_rfc3339(text) {
        return Ok(t.with_timezone(&Utc));
    }
    if let Ok(t) = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S") {
        return Ok(t.and_utc());
    }
    if let Ok(d) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        if let Some(t) = d.and_hms_opt(0, 0, 0) {
            return Ok(t.and_utc());
        }
    }
    Err(ConvertError::UnparseableDate {
        path: path.to_string(),
        date: text.to_string(),
    })
}
