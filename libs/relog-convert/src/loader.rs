use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use relog_api::error::SchemaError;
use relog_api::registry::TypeRegistry;

use crate::converter::{Converter, ConverterRegistry};
use crate::deep_cast::{DeepCastFactory, StructuralCast};
use crate::error::ConvertError;
use crate::script::Context;

/// Load a directory of converter scripts into `converter_registry`.
///
/// A file `P` is a converter candidate only when both `P.source.tlb` and
/// `P.target.tlb` exist next to it; anything else is skipped silently. Each
/// candidate is evaluated against a fresh [`Context`] with its own pair of
/// snapshot registries, so one file's type resolution cannot leak into
/// another's. The scan is non-recursive and fail-fast: the first evaluation
/// failure aborts the whole load.
pub fn load_dir(
    load_path: impl AsRef<Path>,
    converter_registry: &Arc<ConverterRegistry>,
) -> Result<Vec<Arc<Converter>>, ConvertError> {
    load_dir_with_factory(load_path, converter_registry, Arc::new(StructuralCast))
}

/// [`load_dir`] with an explicit deep-cast factory.
pub fn load_dir_with_factory(
    load_path: impl AsRef<Path>,
    converter_registry: &Arc<ConverterRegistry>,
    factory: Arc<dyn DeepCastFactory>,
) -> Result<Vec<Arc<Converter>>, ConvertError> {
    let load_path = load_path.as_ref();
    let mut paths: Vec<PathBuf> = fs::read_dir(load_path)?
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .map(|entry| entry.path())
        .collect();
    paths.sort();

    let mut converters = Vec::new();
    for path in paths {
        if !path.is_file() {
            continue;
        }
        let source_tlb = companion(&path, "source");
        let target_tlb = companion(&path, "target");
        if !source_tlb.is_file() || !target_tlb.is_file() {
            tracing::debug!(file = %path.display(), "skipping, no snapshot pair");
            continue;
        }

        let script_ctx = format!("converter '{}'", path.display());
        let source_registry = TypeRegistry::from_tlb(&read(&source_tlb)?)
            .map_err(|e| ConvertError::from(e).with_context(&script_ctx))?;
        let target_registry = TypeRegistry::from_tlb(&read(&target_tlb)?)
            .map_err(|e| ConvertError::from(e).with_context(&script_ctx))?;

        let context = Context::with_factory(
            path.clone(),
            converter_registry,
            Arc::new(source_registry),
            Arc::new(target_registry),
            factory.clone(),
        );
        context.eval(&read(&path)?).map_err(|e| match e {
            // Type resolution and shape failures do not know which file
            // they came from; the other variants already carry the path.
            e @ ConvertError::Schema(_) => e.with_context(&script_ctx),
            other => other,
        })?;

        if let Some(converter) = context.converter() {
            tracing::info!(
                file = %path.display(),
                source = %converter.source_type().name(),
                target = %converter.target_type().name(),
                "loaded converter"
            );
            converters.push(converter);
        }
    }
    Ok(converters)
}

/// `<path>.<role>.tlb`, appended to the full file name.
fn companion(path: &Path, role: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".{role}.tlb"));
    PathBuf::from(name)
}

fn read(path: &Path) -> Result<String, ConvertError> {
    fs::read_to_string(path)
        .map_err(|e| SchemaError::io(format!("{}: {e}", path.display())).into())
}
