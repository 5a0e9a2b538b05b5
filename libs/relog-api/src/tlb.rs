//! Snapshot codec for type registries.
//!
//! A `.tlb` snapshot is a small XML document with one element per type:
//!
//! ```xml
//! <?xml version="1.0"?>
//! <typelib>
//!   <numeric name="/int32_t" category="sint" size="4"/>
//!   <compound name="/Position" size="8">
//!     <field name="x" type="/int32_t"/>
//!     <field name="y" type="/int32_t"/>
//!   </compound>
//!   <array name="/int32_t[4]" of="/int32_t" length="4"/>
//! </typelib>
//! ```
//!
//! Types are written dependencies-first, so a snapshot can be resolved in a
//! single pass: every `type=`/`of=` reference points at an element that
//! appeared earlier in the document.

use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::Arc;

use crate::error::SchemaError;
use crate::registry::TypeRegistry;
use crate::schema::{NumericKind, TypeDef, TypeSchema};

// ---------------------------------------------------------------------------
// Emit
// ---------------------------------------------------------------------------

pub fn to_xml(registry: &TypeRegistry) -> String {
    let mut out = String::from("<?xml version=\"1.0\"?>\n<typelib>\n");
    let mut emitted = HashSet::new();
    for schema in registry.each() {
        emit_type(&mut out, &mut emitted, schema);
    }
    out.push_str("</typelib>\n");
    out
}

fn emit_type(out: &mut String, emitted: &mut HashSet<String>, schema: &Arc<TypeSchema>) {
    if emitted.contains(schema.name()) {
        return;
    }
    match schema.def() {
        TypeDef::Numeric { kind, size } => {
            let _ = writeln!(
                out,
                "  <numeric name=\"{}\" category=\"{}\" size=\"{size}\"/>",
                escape(schema.name()),
                kind.as_str()
            );
        }
        TypeDef::Compound { fields } => {
            for field in fields {
                emit_type(out, emitted, &field.ty);
            }
            let _ = writeln!(
                out,
                "  <compound name=\"{}\" size=\"{}\">",
                escape(schema.name()),
                schema.size()
            );
            for field in fields {
                let _ = writeln!(
                    out,
                    "    <field name=\"{}\" type=\"{}\"/>",
                    escape(&field.name),
                    escape(field.ty.name())
                );
            }
            out.push_str("  </compound>\n");
        }
        TypeDef::Array { element, length } => {
            emit_type(out, emitted, element);
            let _ = writeln!(
                out,
                "  <array name=\"{}\" of=\"{}\" length=\"{length}\"/>",
                escape(schema.name()),
                escape(element.name())
            );
        }
    }
    emitted.insert(schema.name().to_string());
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Parse
// ---------------------------------------------------------------------------

pub fn from_xml(text: &str) -> Result<TypeRegistry, SchemaError> {
    let mut registry = TypeRegistry::new();
    let mut saw_root = false;
    let mut compound: Option<PendingCompound> = None;

    for tag in TagScanner::new(text) {
        let tag = tag?;
        match (tag.name.as_str(), tag.closing) {
            ("typelib", false) => saw_root = true,
            ("typelib", true) => break,
            ("numeric", false) => {
                let name = tag.require("name")?;
                let category = tag.require("category")?;
                let kind = NumericKind::parse(&category).ok_or_else(|| {
                    SchemaError::parse(format!(
                        "type '{name}': unknown numeric category '{category}'"
                    ))
                })?;
                let size: usize = tag.require("size")?.parse()?;
                registry.register(TypeSchema::new(name, TypeDef::Numeric { kind, size }))?;
            }
            ("array", false) => {
                let name = tag.require("name")?;
                let element = registry
                    .get(&tag.require("of")?)
                    .map_err(|e| e.with_context(format!("array '{name}'")))?;
                let length: usize = tag.require("length")?.parse()?;
                registry.register(TypeSchema::new(name, TypeDef::Array { element, length }))?;
            }
            ("compound", false) => {
                if compound.is_some() {
                    return Err(SchemaError::parse("nested <compound> elements"));
                }
                compound = Some(PendingCompound {
                    name: tag.require("name")?,
                    fields: Vec::new(),
                });
            }
            ("field", false) => {
                let pending = compound.as_mut().ok_or_else(|| {
                    SchemaError::parse("<field> outside of a <compound> element")
                })?;
                let field_name = tag.require("name")?;
                let ty = registry.get(&tag.require("type")?).map_err(|e| {
                    e.with_context(format!("compound '{}' field '{field_name}'", pending.name))
                })?;
                pending.fields.push(crate::schema::CompoundField { name: field_name, ty });
            }
            ("compound", true) => {
                let pending = compound.take().ok_or_else(|| {
                    SchemaError::parse("unbalanced </compound> element")
                })?;
                registry.register(TypeSchema::new(
                    pending.name,
                    TypeDef::Compound { fields: pending.fields },
                ))?;
            }
            ("field", true) | ("numeric", true) | ("array", true) => {}
            (other, _) => {
                return Err(SchemaError::parse(format!("unexpected element <{other}>")));
            }
        }
    }

    if !saw_root {
        return Err(SchemaError::parse("missing <typelib> root element"));
    }
    if compound.is_some() {
        return Err(SchemaError::parse("unterminated <compound> element"));
    }
    Ok(registry)
}

struct PendingCompound {
    name: String,
    fields: Vec<crate::schema::CompoundField>,
}

struct Tag {
    name: String,
    closing: bool,
    attrs: Vec<(String, String)>,
}

impl Tag {
    fn require(&self, key: &str) -> Result<String, SchemaError> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
            .ok_or_else(|| {
                SchemaError::parse(format!("<{}> is missing attribute '{key}'", self.name))
            })
    }
}

/// Minimal tag-level scanner: enough for the snapshot format, nothing more.
/// Text content between tags is ignored; declarations and comments are
/// skipped.
struct TagScanner<'a> {
    rest: &'a str,
}

impl<'a> TagScanner<'a> {
    fn new(text: &'a str) -> Self {
        Self { rest: text }
    }
}

impl Iterator for TagScanner<'_> {
    type Item = Result<Tag, SchemaError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let start = self.rest.find('<')?;
            self.rest = &self.rest[start..];

            if let Some(rest) = self.rest.strip_prefix("<!--") {
                match rest.find("-->") {
                    Some(end) => {
                        self.rest = &rest[end + 3..];
                        continue;
                    }
                    None => return Some(Err(SchemaError::parse("unterminated comment"))),
                }
            }
            if let Some(rest) = self.rest.strip_prefix("<?") {
                match rest.find("?>") {
                    Some(end) => {
                        self.rest = &rest[end + 2..];
                        continue;
                    }
                    None => return Some(Err(SchemaError::parse("unterminated declaration"))),
                }
            }

            let Some(end) = self.rest.find('>') else {
                return Some(Err(SchemaError::parse("unterminated element")));
            };
            let body = &self.rest[1..end];
            self.rest = &self.rest[end + 1..];

            let (closing, body) = match body.strip_prefix('/') {
                Some(b) => (true, b),
                None => (false, body),
            };
            let body = body.strip_suffix('/').unwrap_or(body).trim();

            let name_end = body
                .find(|c: char| c.is_whitespace())
                .unwrap_or(body.len());
            let name = &body[..name_end];
            if name.is_empty() {
                return Some(Err(SchemaError::parse("element with empty name")));
            }

            return Some(parse_attrs(&body[name_end..]).map(|attrs| Tag {
                name: name.to_string(),
                closing,
                attrs,
            }));
        }
    }
}

fn parse_attrs(mut body: &str) -> Result<Vec<(String, String)>, SchemaError> {
    let mut attrs = Vec::new();
    loop {
        body = body.trim_start();
        if body.is_empty() {
            return Ok(attrs);
        }
        let eq = body
            .find('=')
            .ok_or_else(|| SchemaError::parse(format!("malformed attribute near '{body}'")))?;
        let key = body[..eq].trim();
        let rest = body[eq + 1..].trim_start();
        let rest = rest.strip_prefix('"').ok_or_else(|| {
            SchemaError::parse(format!("attribute '{key}' value is not quoted"))
        })?;
        let close = rest.find('"').ok_or_else(|| {
            SchemaError::parse(format!("attribute '{key}' value is not terminated"))
        })?;
        attrs.push((key.to_string(), unescape(&rest[..close])?));
        body = &rest[close + 1..];
    }
}

fn unescape(s: &str) -> Result<String, SchemaError> {
    if !s.contains('&') {
        return Ok(s.to_string());
    }
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos..];
        let end = rest
            .find(';')
            .ok_or_else(|| SchemaError::parse(format!("unterminated entity in '{s}'")))?;
        match &rest[..end + 1] {
            "&amp;" => out.push('&'),
            "&lt;" => out.push('<'),
            "&gt;" => out.push('>'),
            "&quot;" => out.push('"'),
            "&apos;" => out.push('\''),
            other => {
                return Err(SchemaError::parse(format!("unknown entity '{other}'")));
            }
        }
        rest = &rest[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn sample_registry() -> TypeRegistry {
        let mut registry = TypeRegistry::new();
        let int32 = registry.create_numeric("/int32_t", 4, NumericKind::SInt).unwrap();
        let double = registry.create_numeric("/double", 8, NumericKind::Float).unwrap();
        let arr = registry.create_array(int32.clone(), 4).unwrap();
        registry
            .create_compound(
                "/Pose",
                vec![
                    ("position".into(), arr),
                    ("heading".into(), double),
                    ("flags".into(), int32),
                ],
            )
            .unwrap();
        registry
    }

    #[test]
    fn test_snapshot_round_trip_preserves_structure() {
        let original = sample_registry();
        let restored = TypeRegistry::from_tlb(&original.to_tlb()).unwrap();

        assert_eq!(restored.len(), original.len());
        for schema in original.each() {
            let other = restored.get(schema.name()).unwrap();
            assert_eq!(*other, **schema);
        }
    }

    #[test]
    fn test_dependencies_are_written_before_users() {
        let text = sample_registry().to_tlb();
        let pose = text.find("<compound name=\"/Pose\"").unwrap();
        assert!(text.find("<numeric name=\"/int32_t\"").unwrap() < pose);
        assert!(text.find("<array name=\"/int32_t[4]\"").unwrap() < pose);
    }

    #[test]
    fn test_unknown_reference_is_reported() {
        let text = r#"<typelib>
            <compound name="/Broken">
                <field name="x" type="/missing_t"/>
            </compound>
        </typelib>"#;
        let err = TypeRegistry::from_tlb(text).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
        assert!(err.message.contains("/missing_t"));
    }

    #[test]
    fn test_malformed_document_is_a_parse_error() {
        assert_eq!(
            TypeRegistry::from_tlb("<numeric name=\"/x\"").unwrap_err().kind,
            ErrorKind::Parse
        );
        assert_eq!(
            TypeRegistry::from_tlb("<garbage/>").unwrap_err().kind,
            ErrorKind::Parse
        );
    }

    #[test]
    fn test_names_with_markup_characters_survive() {
        let mut registry = TypeRegistry::new();
        registry
            .create_numeric("/container<narrow>", 4, NumericKind::UInt)
            .unwrap();
        let restored = TypeRegistry::from_tlb(&registry.to_tlb()).unwrap();
        assert!(restored.contains("/container<narrow>"));
    }
}
