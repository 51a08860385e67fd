//! WGSL type grammar understood by the layout resolver and its built-in size table.
//!
//! Only host-shareable types are modelled: scalars, vectors, matrices, atomics,
//! fixed/runtime arrays and named structs. Anything else is a struct reference and
//! fails later with `TypeNotDefined` if no such struct exists.

use std::fmt;

use crate::error::{BindingError, BindingResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    F32,
    I32,
    U32,
}

impl ScalarKind {
    pub fn wgsl(self) -> &'static str {
        match self {
            ScalarKind::F32 => "f32",
            ScalarKind::I32 => "i32",
            ScalarKind::U32 => "u32",
        }
    }

    fn from_suffix(s: &str) -> Option<Self> {
        match s {
            "f" => Some(ScalarKind::F32),
            "i" => Some(ScalarKind::I32),
            "u" => Some(ScalarKind::U32),
            _ => None,
        }
    }

    fn from_name(s: &str) -> Option<Self> {
        match s {
            "f32" => Some(ScalarKind::F32),
            "i32" => Some(ScalarKind::I32),
            "u32" => Some(ScalarKind::U32),
            _ => None,
        }
    }

    /// Encode one host number into this scalar's 4-byte word.
    pub fn encode(self, v: f64) -> [u8; 4] {
        match self {
            ScalarKind::F32 => (v as f32).to_le_bytes(),
            ScalarKind::I32 => (v as i32).to_le_bytes(),
            ScalarKind::U32 => (v as u32).to_le_bytes(),
        }
    }

    pub fn decode(self, word: [u8; 4]) -> f64 {
        match self {
            ScalarKind::F32 => f32::from_le_bytes(word) as f64,
            ScalarKind::I32 => i32::from_le_bytes(word) as f64,
            ScalarKind::U32 => u32::from_le_bytes(word) as f64,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum WgslType {
    Scalar(ScalarKind),
    Vector {
        scalar: ScalarKind,
        size: u32,
    },
    Matrix {
        scalar: ScalarKind,
        columns: u32,
        rows: u32,
    },
    Atomic(ScalarKind),
    Array {
        element: Box<WgslType>,
        /// `None` for runtime-sized arrays.
        length: Option<u32>,
    },
    Struct(String),
}

pub(crate) const fn round_up(align: u32, value: u32) -> u32 {
    value.div_ceil(align) * align
}

/// Rule table a layout is computed under.
///
/// `Uniform` is the 16-byte table: arrays stride and structs align to at least 16.
/// `Storage` follows the element and member alignments, so `array<f32, 4>` packs
/// into 16 bytes instead of 64.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum AddressSpace {
    #[default]
    Uniform,
    Storage,
}

impl AddressSpace {
    pub(crate) fn min_align(self) -> u32 {
        match self {
            AddressSpace::Uniform => 16,
            AddressSpace::Storage => 4,
        }
    }

    /// `(stride, align)` of an array whose element has `size` and `align`.
    pub(crate) fn array_stride_align(self, size: u32, align: u32) -> (u32, u32) {
        let align = align.max(self.min_align());
        (round_up(align, size), align)
    }

    /// Distance between matrix columns with `rows` components.
    pub(crate) fn column_stride(self, rows: u32) -> u32 {
        match (self, rows) {
            (AddressSpace::Storage, 2) => 8,
            _ => 16,
        }
    }

    pub(crate) fn struct_size(self, align: u32, end: u32) -> u32 {
        match self {
            AddressSpace::Uniform => round_up(16, end),
            AddressSpace::Storage => round_up(align, end),
        }
    }
}

impl WgslType {
    pub fn parse(text: &str) -> BindingResult<Self> {
        let text = text.trim();
        if text.is_empty() {
            return Err(BindingError::config("empty type name"));
        }

        if let Some(scalar) = ScalarKind::from_name(text) {
            return Ok(WgslType::Scalar(scalar));
        }
        if text == "bool" {
            return Err(BindingError::config(
                "`bool` is not host-shareable; declare the value as f32 or u32 (booleans become 0/1)",
            ));
        }

        if let Some((head, args)) = split_generic(text)? {
            return Self::parse_generic(text, head, &args);
        }

        // Shorthand aliases: vec3f, vec2u, mat4x4f, ...
        if let Some(rest) = text.strip_prefix("vec") {
            if let (Some(n), Some(scalar)) = (
                rest.get(..1).and_then(|d| d.parse::<u32>().ok()),
                rest.get(1..).and_then(ScalarKind::from_suffix),
            ) {
                return vector(n, scalar, text);
            }
        }
        if let Some(rest) = text.strip_prefix("mat") {
            if let Some((cols, rows, suffix)) = parse_mat_dims(rest) {
                if let Some(scalar) = ScalarKind::from_suffix(suffix) {
                    return matrix(cols, rows, scalar, text);
                }
            }
        }

        if !is_ident(text) {
            return Err(BindingError::config(format!("unsupported type expression `{text}`")));
        }
        Ok(WgslType::Struct(text.to_string()))
    }

    fn parse_generic(text: &str, head: &str, args: &[String]) -> BindingResult<Self> {
        let scalar_arg = |i: usize| -> BindingResult<ScalarKind> {
            args.get(i)
                .and_then(|a| ScalarKind::from_name(a.trim()))
                .ok_or_else(|| BindingError::config(format!("expected scalar component in `{text}`")))
        };

        match head {
            "vec2" | "vec3" | "vec4" => {
                let n = head[3..].parse::<u32>().unwrap_or(4);
                vector(n, scalar_arg(0)?, text)
            }
            "atomic" => match scalar_arg(0)? {
                s @ (ScalarKind::I32 | ScalarKind::U32) => Ok(WgslType::Atomic(s)),
                _ => Err(BindingError::config(format!("atomic requires i32 or u32: `{text}`"))),
            },
            "array" => {
                let element = args
                    .first()
                    .ok_or_else(|| BindingError::config(format!("array without element type: `{text}`")))?;
                let element = Box::new(WgslType::parse(element)?);
                let length = match args.get(1) {
                    None => None,
                    Some(n) => {
                        let n = n.trim().trim_end_matches('u');
                        let n: u32 = n.parse().map_err(|_| {
                            BindingError::config(format!("array length must be a literal in `{text}`"))
                        })?;
                        if n == 0 {
                            return Err(BindingError::config(format!("zero-length array `{text}`")));
                        }
                        Some(n)
                    }
                };
                Ok(WgslType::Array { element, length })
            }
            _ => {
                if let Some(rest) = head.strip_prefix("mat") {
                    if let Some((cols, rows, "")) = parse_mat_dims(rest) {
                        return matrix(cols, rows, scalar_arg(0)?, text);
                    }
                }
                Err(BindingError::config(format!("unsupported generic type `{text}`")))
            }
        }
    }

    /// Size in bytes, alignment in bytes. Runtime arrays report their element stride as size.
    pub fn builtin_size_align(&self) -> Option<(u32, u32)> {
        match self {
            WgslType::Scalar(_) | WgslType::Atomic(_) => Some((4, 4)),
            WgslType::Vector { size: 2, .. } => Some((8, 8)),
            WgslType::Vector { size: 3, .. } => Some((12, 16)),
            WgslType::Vector { .. } => Some((16, 16)),
            WgslType::Matrix { columns, .. } => Some((columns * 16, 16)),
            WgslType::Array { .. } | WgslType::Struct(_) => None,
        }
    }

    pub fn is_runtime_array(&self) -> bool {
        matches!(self, WgslType::Array { length: None, .. })
    }

    /// Names of structs this type references directly.
    pub fn struct_refs(&self) -> Vec<&str> {
        match self {
            WgslType::Struct(name) => vec![name.as_str()],
            WgslType::Array { element, .. } => element.struct_refs(),
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for WgslType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WgslType::Scalar(s) => f.write_str(s.wgsl()),
            WgslType::Vector { scalar, size } => write!(f, "vec{size}<{}>", scalar.wgsl()),
            WgslType::Matrix {
                scalar,
                columns,
                rows,
            } => write!(f, "mat{columns}x{rows}<{}>", scalar.wgsl()),
            WgslType::Atomic(s) => write!(f, "atomic<{}>", s.wgsl()),
            WgslType::Array {
                element,
                length: Some(n),
            } => write!(f, "array<{element}, {n}>"),
            WgslType::Array {
                element,
                length: None,
            } => write!(f, "array<{element}>"),
            WgslType::Struct(name) => f.write_str(name),
        }
    }
}

fn vector(n: u32, scalar: ScalarKind, text: &str) -> BindingResult<WgslType> {
    if !(2..=4).contains(&n) {
        return Err(BindingError::config(format!("invalid vector width in `{text}`")));
    }
    Ok(WgslType::Vector { scalar, size: n })
}

fn matrix(cols: u32, rows: u32, scalar: ScalarKind, text: &str) -> BindingResult<WgslType> {
    if !(2..=4).contains(&cols) || !(2..=4).contains(&rows) || scalar != ScalarKind::F32 {
        return Err(BindingError::config(format!("invalid matrix type `{text}`")));
    }
    Ok(WgslType::Matrix {
        scalar,
        columns: cols,
        rows,
    })
}

fn parse_mat_dims(rest: &str) -> Option<(u32, u32, &str)> {
    let bytes = rest.as_bytes();
    if bytes.len() < 3 || bytes[1] != b'x' {
        return None;
    }
    let cols = (bytes[0] as char).to_digit(10)?;
    let rows = (bytes[2] as char).to_digit(10)?;
    Some((cols, rows, &rest[3..]))
}

pub(crate) fn is_ident(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Split `head<a, b<c, d>>` into `head` and top-level arguments.
fn split_generic(text: &str) -> BindingResult<Option<(&str, Vec<String>)>> {
    let Some(open) = text.find('<') else {
        return Ok(None);
    };
    if !text.ends_with('>') {
        return Err(BindingError::config(format!("unbalanced `<` in `{text}`")));
    }
    let head = text[..open].trim();
    let inner = &text[open + 1..text.len() - 1];

    let mut args = Vec::new();
    let mut depth = 0_i32;
    let mut current = String::new();
    for ch in inner.chars() {
        match ch {
            '<' => {
                depth += 1;
                current.push(ch);
            }
            '>' => {
                depth -= 1;
                if depth < 0 {
                    return Err(BindingError::config(format!("unbalanced `>` in `{text}`")));
                }
                current.push(ch);
            }
            ',' if depth == 0 => {
                args.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    if depth != 0 {
        return Err(BindingError::config(format!("unbalanced generics in `{text}`")));
    }
    let last = current.trim();
    if !last.is_empty() {
        args.push(last.to_string());
    }
    Ok(Some((head, args)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_is_rejected_in_buffers() {
        for text in ["bool", "vec2<bool>", "array<bool, 4>"] {
            assert!(matches!(WgslType::parse(text), Err(BindingError::Configuration(_))), "{text}");
        }
    }

    #[test]
    fn shorthand_and_generic_forms_agree() {
        assert_eq!(WgslType::parse("vec3f").unwrap(), WgslType::parse("vec3<f32>").unwrap());
        assert_eq!(
            WgslType::parse("mat4x4f").unwrap(),
            WgslType::parse("mat4x4<f32>").unwrap()
        );
        assert_eq!(
            WgslType::parse("vec2u").unwrap(),
            WgslType::Vector {
                scalar: ScalarKind::U32,
                size: 2
            }
        );
    }

    #[test]
    fn nested_array_arguments() {
        let ty = WgslType::parse("array<array<vec4f, 16>, 3>").unwrap();
        let WgslType::Array { element, length } = ty else {
            panic!("expected array");
        };
        assert_eq!(length, Some(3));
        assert_eq!(
            *element,
            WgslType::Array {
                element: Box::new(WgslType::Vector {
                    scalar: ScalarKind::F32,
                    size: 4
                }),
                length: Some(16)
            }
        );
    }

    #[test]
    fn runtime_array_and_struct_reference() {
        let ty = WgslType::parse("array<Particle>").unwrap();
        assert!(ty.is_runtime_array());
        assert_eq!(ty.struct_refs(), vec!["Particle"]);
    }

    #[test]
    fn builtin_table() {
        let size = |t: &str| WgslType::parse(t).unwrap().builtin_size_align().unwrap();
        assert_eq!(size("f32"), (4, 4));
        assert_eq!(size("vec2f"), (8, 8));
        assert_eq!(size("vec3f"), (12, 16));
        assert_eq!(size("vec4<i32>"), (16, 16));
        assert_eq!(size("mat3x3f"), (48, 16));
        assert_eq!(size("mat2x4f"), (32, 16));
        assert_eq!(size("atomic<u32>"), (4, 4));
    }

    #[test]
    fn rejects_garbage() {
        assert!(WgslType::parse("array<f32, N>").is_err());
        assert!(WgslType::parse("vec5f").is_err());
        assert!(WgslType::parse("my-type").is_err());
        assert!(WgslType::parse("vec3<f32").is_err());
        assert!(WgslType::parse("array<f32, 0>").is_err());
    }
}
