use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};

use relog_api::registry::TypeRegistry;
use relog_api::schema::TypeSchema;

use crate::error::ConvertError;

/// Scaffold a new converter: a skeleton script plus serialized snapshots of
/// the source and target schema, ready for an author to fill in the body.
///
/// The file stem is the reference time (ISO 8601) concatenated with the
/// source type's name, `/` replaced by `:`. A numeric suffix one above the
/// highest already present for that stem keeps repeated calls from
/// overwriting each other; the scan-then-write is not atomic, so concurrent
/// calls against one directory can still race.
///
/// Returns the script path and the two snapshot paths.
pub fn create(
    output_path: &Path,
    reference_time: DateTime<Utc>,
    source_type: &Arc<TypeSchema>,
    target_type: &Arc<TypeSchema>,
    description: &str,
) -> Result<(PathBuf, PathBuf, PathBuf), ConvertError> {
    let timestamp = reference_time.to_rfc3339_opts(SecondsFormat::Secs, true);
    let stem = format!("{timestamp}{}", source_type.name().replace('/', ":"));
    let id = next_id(output_path, &stem)?;

    let script = output_path.join(format!("{stem}.{id}"));
    let source_tlb = output_path.join(format!("{stem}.{id}.source.tlb"));
    let target_tlb = output_path.join(format!("{stem}.{id}.target.tlb"));

    let body = format!(
        "// {description}\n\
         define(\"{timestamp}\", \"{}\", \"{}\", |target, source| {{\n\
         \x20   // copies every field present in both the source and the target layout\n\
         \x20   // deep_cast(target, source);\n\
         \x20   target\n\
         }});\n",
        source_type.name(),
        target_type.name(),
    );

    fs::write(&script, body)?;
    fs::write(&source_tlb, TypeRegistry::reachable_from(source_type).to_tlb())?;
    fs::write(&target_tlb, TypeRegistry::reachable_from(target_type).to_tlb())?;

    tracing::info!(script = %script.display(), "created converter template");
    Ok((script, source_tlb, target_tlb))
}

/// One above the highest `<stem>.<id>` suffix already present in `dir`,
/// or 1 when the stem is unused.
fn next_id(dir: &Path, stem: &str) -> Result<u32, ConvertError> {
    let prefix = format!("{stem}.");
    let mut max_id = 0;
    for entry in fs::read_dir(dir)? {
        let name = entry?.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(suffix) = name.strip_prefix(&prefix) else { continue };
        if let Ok(id) = suffix.parse::<u32>() {
            max_id = max_id.max(id);
        }
    }
    Ok(max_id + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converter::ConverterRegistry;
    use crate::loader;
    use chrono::TimeZone;
    use relog_api::schema::NumericKind;

    fn position_type() -> Arc<TypeSchema> {
        let mut registry = TypeRegistry::new();
        let int32 = registry.create_numeric("/int32_t", 4, NumericKind::SInt).unwrap();
        registry
            .create_compound(
                "/Position",
                vec![("x".into(), int32.clone()), ("y".into(), int32)],
            )
            .unwrap()
    }

    fn reference_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_first_template_gets_suffix_one() {
        let dir = tempfile::tempdir().unwrap();
        let position = position_type();
        let (script, source_tlb, target_tlb) = create(
            dir.path(),
            reference_time(),
            &position,
            &position,
            "upgrade description",
        )
        .unwrap();

        assert_eq!(
            script,
            dir.path().join("2024-01-01T00:00:00Z:Position.1")
        );
        assert_eq!(
            source_tlb,
            dir.path().join("2024-01-01T00:00:00Z:Position.1.source.tlb")
        );
        assert_eq!(
            target_tlb,
            dir.path().join("2024-01-01T00:00:00Z:Position.1.target.tlb")
        );

        let text = fs::read_to_string(&script).unwrap();
        assert!(text.starts_with("// upgrade description\n"));
        assert!(text.contains(
            "define(\"2024-01-01T00:00:00Z\", \"/Position\", \"/Position\""
        ));
    }

    #[test]
    fn test_repeated_creation_increments_the_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let position = position_type();

        let (first, ..) =
            create(dir.path(), reference_time(), &position, &position, "first").unwrap();
        let (second, ..) =
            create(dir.path(), reference_time(), &position, &position, "second").unwrap();

        assert!(first.display().to_string().ends_with(".1"));
        assert!(second.display().to_string().ends_with(".2"));
        // The first set of files is untouched.
        assert!(fs::read_to_string(&first).unwrap().starts_with("// first\n"));
    }

    #[test]
    fn test_snapshot_round_trips_to_an_equal_type() {
        let dir = tempfile::tempdir().unwrap();
        let position = position_type();
        let (_, source_tlb, _) =
            create(dir.path(), reference_time(), &position, &position, "x").unwrap();

        let restored = TypeRegistry::from_tlb(&fs::read_to_string(source_tlb).unwrap()).unwrap();
        assert_eq!(*restored.get("/Position").unwrap(), *position);
    }

    #[test]
    fn test_generated_template_loads_as_a_converter() {
        let dir = tempfile::tempdir().unwrap();
        let position = position_type();
        let (script, ..) =
            create(dir.path(), reference_time(), &position, &position, "skeleton").unwrap();

        let registry = Arc::new(ConverterRegistry::new());
        let converters = loader::load_dir(dir.path(), &registry).unwrap();
        assert_eq!(converters.len(), 1);
        assert_eq!(converters[0].name(), script.display().to_string());
        assert_eq!(converters[0].effective_date(), reference_time());
    }
}
