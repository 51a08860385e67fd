//! Extraction of `struct Name { field: Type, ... }` definitions from WGSL source.
//!
//! This is not a WGSL parser. It strips comments, finds `struct` items at module
//! scope and splits their bodies into ordered `(name, type text)` pairs.

use crate::error::{BindingError, BindingResult};

use super::types::is_ident;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldDef {
    pub name: String,
    pub ty: String,
    /// Explicit `@align(n)` attribute.
    pub align: Option<u32>,
    /// Explicit `@size(n)` attribute.
    pub size: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StructDef {
    pub name: String,
    pub fields: Vec<FieldDef>,
}

pub fn strip_comments(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();
    let mut block_depth = 0_u32;
    while let Some(ch) = chars.next() {
        if block_depth > 0 {
            if ch == '*' && chars.peek() == Some(&'/') {
                chars.next();
                block_depth -= 1;
            } else if ch == '/' && chars.peek() == Some(&'*') {
                chars.next();
                block_depth += 1;
            } else if ch == '\n' {
                out.push('\n');
            }
            continue;
        }
        match (ch, chars.peek()) {
            ('/', Some('/')) => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            ('/', Some('*')) => {
                chars.next();
                block_depth = 1;
            }
            _ => out.push(ch),
        }
    }
    out
}

pub fn parse_struct_defs(source: &str) -> BindingResult<Vec<StructDef>> {
    let text = strip_comments(source);
    let bytes = text.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;

    while let Some(pos) = text[i..].find("struct") {
        let start = i + pos;
        let end = start + "struct".len();
        i = end;

        let boundary_before = start == 0 || !is_ident_byte(bytes[start - 1]);
        let boundary_after = bytes.get(end).is_some_and(|b| b.is_ascii_whitespace());
        if !boundary_before || !boundary_after {
            continue;
        }

        let Some(open_rel) = text[end..].find('{') else {
            return Err(BindingError::config("struct without body"));
        };
        let name = text[end..end + open_rel].trim();
        if !is_ident(name) {
            return Err(BindingError::config(format!("invalid struct name `{name}`")));
        }
        let body_start = end + open_rel + 1;
        let Some(close_rel) = text[body_start..].find('}') else {
            return Err(BindingError::config(format!("unterminated struct `{name}`")));
        };
        let body = &text[body_start..body_start + close_rel];
        i = body_start + close_rel + 1;

        out.push(StructDef {
            name: name.to_string(),
            fields: parse_fields(name, body)?,
        });
    }

    Ok(out)
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn parse_fields(struct_name: &str, body: &str) -> BindingResult<Vec<FieldDef>> {
    let mut fields = Vec::new();
    for member in split_top_level(body) {
        let member = member.trim();
        if member.is_empty() {
            continue;
        }
        let (attrs, rest) = take_attributes(member);
        let Some((name, ty)) = rest.split_once(':') else {
            return Err(BindingError::config(format!(
                "struct `{struct_name}`: malformed member `{member}`"
            )));
        };
        let name = name.trim();
        if !is_ident(name) {
            return Err(BindingError::config(format!(
                "struct `{struct_name}`: invalid member name `{name}`"
            )));
        }

        let mut field = FieldDef {
            name: name.to_string(),
            ty: ty.trim().to_string(),
            align: None,
            size: None,
        };
        for (attr, arg) in attrs {
            let parse_arg = || -> BindingResult<u32> {
                arg.as_deref()
                    .and_then(|a| a.trim().trim_end_matches('u').parse().ok())
                    .ok_or_else(|| {
                        BindingError::config(format!(
                            "struct `{struct_name}`: @{attr} on `{name}` needs an integer literal"
                        ))
                    })
            };
            match attr.as_str() {
                "align" => field.align = Some(parse_arg()?),
                "size" => field.size = Some(parse_arg()?),
                _ => {}
            }
        }
        fields.push(field);
    }
    Ok(fields)
}

/// Split on commas that are not nested inside `<...>` or `(...)`.
fn split_top_level(body: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0_i32;
    let mut last = 0;
    for (idx, ch) in body.char_indices() {
        match ch {
            '<' | '(' => depth += 1,
            '>' | ')' => depth -= 1,
            ',' | ';' if depth == 0 => {
                parts.push(&body[last..idx]);
                last = idx + 1;
            }
            _ => {}
        }
    }
    parts.push(&body[last..]);
    parts
}

/// Strip leading `@name` / `@name(arg)` attributes.
fn take_attributes(member: &str) -> (Vec<(String, Option<String>)>, &str) {
    let mut attrs = Vec::new();
    let mut rest = member.trim_start();
    while let Some(after_at) = rest.strip_prefix('@') {
        let name_len = after_at
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(after_at.len());
        let name = after_at[..name_len].to_string();
        let mut tail = after_at[name_len..].trim_start();
        let mut arg = None;
        if let Some(inner) = tail.strip_prefix('(') {
            if let Some(close) = inner.find(')') {
                arg = Some(inner[..close].to_string());
                tail = inner[close + 1..].trim_start();
            }
        }
        attrs.push((name, arg));
        rest = tail;
    }
    (attrs, rest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_fields_in_declaration_order() {
        let src = r#"
// struct Ignored { x: f32 }
struct Particle {
    position: vec2f,
    velocity: vec2<f32>,
    tags: array<u32, 4>,
};

/* struct AlsoIgnored { y: f32 } */
fn main() {}
"#;
        let defs = parse_struct_defs(src).unwrap();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "Particle");
        let names: Vec<_> = defs[0].fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["position", "velocity", "tags"]);
        assert_eq!(defs[0].fields[2].ty, "array<u32, 4>");
    }

    #[test]
    fn attributes_are_recorded_or_skipped() {
        let src = "struct VSOut { @builtin(position) position: vec4f, @location(0) uv: vec2f, @align(32) @size(48) big: vec3f }";
        let defs = parse_struct_defs(src).unwrap();
        let fields = &defs[0].fields;
        assert_eq!(fields[0].name, "position");
        assert_eq!(fields[0].align, None);
        assert_eq!(fields[2].align, Some(32));
        assert_eq!(fields[2].size, Some(48));
    }

    #[test]
    fn identifiers_containing_struct_are_not_structs() {
        let src = "fn construct_it() {} struct A { a: f32 }";
        let defs = parse_struct_defs(src).unwrap();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "A");
    }

    #[test]
    fn malformed_member_is_a_configuration_error() {
        let err = parse_struct_defs("struct Bad { nope }").unwrap_err();
        assert!(matches!(err, BindingError::Configuration(_)));
    }
}
