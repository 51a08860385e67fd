//! Host-shareable layout computation for named struct types.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::error::{BindingError, BindingResult};

use super::flatten::{self, SlotWriter, WordSlot};
use super::parse::{StructDef, parse_struct_defs};
use super::types::{AddressSpace, WgslType, round_up};

#[derive(Clone, Debug, PartialEq)]
pub struct FieldLayout {
    pub name: String,
    pub ty: WgslType,
    pub offset: u32,
    pub size: u32,
    pub align: u32,
    /// Zero words between the end of this field and the next field (or the end of the struct).
    pub padding_after_words: u32,
    /// Padding map of the field value itself, relative to `offset`.
    pub slots: Vec<WordSlot>,
}

/// Trailing runtime-sized array of a storage type.
#[derive(Clone, Debug, PartialEq)]
pub struct RuntimeArrayTail {
    pub offset: u32,
    pub stride: u32,
    pub element_slots: Vec<WordSlot>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TypeLayout {
    pub name: String,
    /// Fixed part only.
    pub byte_size: u32,
    pub align: u32,
    pub fields: Vec<FieldLayout>,
    pub tail_padding_words: u32,
    pub padding_map: Vec<WordSlot>,
    pub runtime_tail: Option<RuntimeArrayTail>,
}

impl TypeLayout {
    pub fn leaf_count(&self) -> usize {
        flatten::leaf_count(&self.padding_map)
    }

    pub fn field(&self, name: &str) -> Option<&FieldLayout> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Byte size for `elements` entries of the runtime tail (ignored for fixed layouts).
    pub fn buffer_size(&self, elements: u32) -> u64 {
        match &self.runtime_tail {
            Some(tail) => tail.offset as u64 + tail.stride as u64 * elements as u64,
            None => self.byte_size as u64,
        }
        .max(16)
    }

    /// Flatten host values into bytes. For runtime-sized layouts the values after the
    /// fixed part must fill a whole number of elements.
    pub fn flatten(&self, values: &[f64]) -> BindingResult<Vec<u8>> {
        let Some(tail) = &self.runtime_tail else {
            return flatten::flatten_exact(&self.padding_map, values);
        };

        let mut out = Vec::new();
        let mut rest = flatten::write_words(&self.padding_map, values, &mut out)?;
        out.resize(tail.offset as usize, 0);
        let per_element = flatten::leaf_count(&tail.element_slots);
        if per_element == 0 || rest.len() % per_element != 0 {
            return Err(BindingError::config(format!(
                "`{}`: {} trailing scalars do not fill whole elements of {per_element}",
                self.name,
                rest.len()
            )));
        }
        while !rest.is_empty() {
            rest = flatten::write_words(&tail.element_slots, rest, &mut out)?;
        }
        Ok(out)
    }

    /// Decode every scalar, including runtime tail elements present in `bytes`.
    pub fn decode(&self, bytes: &[u8]) -> Vec<f64> {
        let mut out = flatten::decode_words(&self.padding_map, bytes);
        if let Some(tail) = &self.runtime_tail {
            let mut pos = tail.offset as usize;
            while pos + tail.stride as usize <= bytes.len() {
                out.extend(flatten::decode_words(
                    &tail.element_slots,
                    &bytes[pos..pos + tail.stride as usize],
                ));
                pos += tail.stride as usize;
            }
        }
        out
    }

    /// Read a single field back through its offset and size.
    pub fn read_field(&self, bytes: &[u8], index: usize) -> Option<Vec<f64>> {
        let field = self.fields.get(index)?;
        let start = field.offset as usize;
        let end = start + field.size as usize;
        Some(flatten::decode_words(&field.slots, bytes.get(start..end)?))
    }

    pub fn ensure_fixed_size(&self) -> BindingResult<()> {
        if self.runtime_tail.is_some() {
            return Err(BindingError::config(format!(
                "`{}` contains a runtime-sized array and cannot be used as a uniform",
                self.name
            )));
        }
        Ok(())
    }
}

struct Measure {
    size: u32,
    align: u32,
}

/// Resolves struct definitions collected from shader text into cached layouts.
#[derive(Debug, Default)]
pub struct TypeLayoutResolver {
    defs: HashMap<String, StructDef>,
    cache: HashMap<(AddressSpace, String), Arc<TypeLayout>>,
}

impl TypeLayoutResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every struct defined in `source`. Identical redefinitions are ignored.
    pub fn add_source(&mut self, source: &str) -> BindingResult<()> {
        for def in parse_struct_defs(source)? {
            self.define(def)?;
        }
        Ok(())
    }

    pub fn define(&mut self, def: StructDef) -> BindingResult<()> {
        if let Some(existing) = self.defs.get(&def.name) {
            if *existing != def {
                return Err(BindingError::config(format!(
                    "struct `{}` is defined twice with different members",
                    def.name
                )));
            }
            return Ok(());
        }
        self.defs.insert(def.name.clone(), def);
        Ok(())
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.defs.contains_key(name)
    }

    pub fn struct_def(&self, name: &str) -> Option<&StructDef> {
        self.defs.get(name)
    }

    /// Layout of an arbitrary type expression (`Particle`, `array<vec4f, 8>`, `f32`, ...)
    /// under the uniform rule table.
    pub fn resolve(&mut self, type_text: &str) -> BindingResult<Arc<TypeLayout>> {
        self.resolve_in(type_text, AddressSpace::Uniform)
    }

    /// Layout of a storage buffer binding type.
    pub fn resolve_storage(&mut self, type_text: &str) -> BindingResult<Arc<TypeLayout>> {
        self.resolve_in(type_text, AddressSpace::Storage)
    }

    pub fn resolve_in(&mut self, type_text: &str, space: AddressSpace) -> BindingResult<Arc<TypeLayout>> {
        let ty = WgslType::parse(type_text)?;
        let key = (space, ty.to_string());
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit.clone());
        }

        let layout = match &ty {
            WgslType::Struct(name) => self.struct_layout(name, space, &mut Vec::new())?,
            other => Arc::new(self.anonymous_layout(&key.1, other, space)?),
        };
        self.cache.insert(key, layout.clone());
        Ok(layout)
    }

    /// Layout of a uniform type: runtime arrays are rejected.
    pub fn resolve_uniform(&mut self, type_text: &str) -> BindingResult<Arc<TypeLayout>> {
        let layout = self.resolve(type_text)?;
        layout.ensure_fixed_size()?;
        Ok(layout)
    }

    /// Layout of a synthesized uniform struct built from `(member, type)` pairs.
    pub fn layout_for_members(&mut self, name: &str, members: &[(String, String)]) -> BindingResult<TypeLayout> {
        let mut fields = Vec::with_capacity(members.len());
        for (member, ty) in members {
            fields.push((member.clone(), WgslType::parse(ty)?, None, None));
        }
        let layout = self.build_struct(name, &fields, AddressSpace::Uniform, &mut Vec::new())?;
        layout.ensure_fixed_size()?;
        Ok(layout)
    }

    fn struct_layout(&mut self, name: &str, space: AddressSpace, visiting: &mut Vec<String>) -> BindingResult<Arc<TypeLayout>> {
        let key = (space, name.to_string());
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit.clone());
        }
        if visiting.iter().any(|v| v == name) {
            visiting.push(name.to_string());
            return Err(BindingError::TypeNotDefined(format!(
                "cyclic struct definition: {}",
                visiting.join(" -> ")
            )));
        }
        let def = self
            .defs
            .get(name)
            .cloned()
            .ok_or_else(|| BindingError::TypeNotDefined(format!("struct `{name}` is never declared")))?;

        visiting.push(name.to_string());
        let mut fields = Vec::with_capacity(def.fields.len());
        for f in &def.fields {
            fields.push((f.name.clone(), WgslType::parse(&f.ty)?, f.align, f.size));
        }
        let layout = Arc::new(self.build_struct(name, &fields, space, visiting)?);
        visiting.pop();

        debug!(
            target: "forge_bindings::layout",
            name,
            ?space,
            byte_size = layout.byte_size,
            fields = layout.fields.len(),
            "resolved struct layout"
        );
        self.cache.insert(key, layout.clone());
        Ok(layout)
    }

    fn build_struct(
        &mut self,
        name: &str,
        members: &[(String, WgslType, Option<u32>, Option<u32>)],
        space: AddressSpace,
        visiting: &mut Vec<String>,
    ) -> BindingResult<TypeLayout> {
        let mut placed: Vec<(String, WgslType, u32, u32, u32)> = Vec::with_capacity(members.len());
        let mut cursor = 0_u32;
        let mut max_align = space.min_align();
        let mut runtime_tail = None;

        for (i, (member, ty, align_attr, size_attr)) in members.iter().enumerate() {
            if let WgslType::Array { element, length: None } = ty {
                if i + 1 != members.len() {
                    return Err(BindingError::config(format!(
                        "`{name}.{member}`: runtime-sized array must be the last member"
                    )));
                }
                let elem = self.measure(element, space, visiting)?;
                let (stride, align) = space.array_stride_align(elem.size, elem.align);
                let offset = round_up(align, cursor);
                let mut w = SlotWriter::default();
                self.write_slots(element, space, 0, &mut w, visiting)?;
                runtime_tail = Some(RuntimeArrayTail {
                    offset,
                    stride,
                    element_slots: w.finish(stride),
                });
                max_align = max_align.max(align);
                cursor = offset;
                continue;
            }

            let m = self.measure(ty, space, visiting)?;
            let align = align_attr.unwrap_or(m.align);
            let size = size_attr.unwrap_or(m.size).max(m.size);
            if !align.is_power_of_two() {
                return Err(BindingError::config(format!("`{name}.{member}`: @align must be a power of two")));
            }
            let offset = round_up(align, cursor);
            cursor = offset + size;
            max_align = max_align.max(align);
            placed.push((member.clone(), ty.clone(), offset, size, align));
        }

        let byte_size = space.struct_size(max_align, cursor);

        let mut fields = Vec::with_capacity(placed.len());
        let mut writer = SlotWriter::default();
        for (idx, (member, ty, offset, size, align)) in placed.iter().enumerate() {
            let next = placed
                .get(idx + 1)
                .map(|p| p.2)
                .or(runtime_tail.as_ref().map(|t| t.offset))
                .unwrap_or(byte_size);

            let mut own = SlotWriter::default();
            self.write_slots(ty, space, 0, &mut own, visiting)?;
            let slots = own.finish(*size);
            writer.append(*offset, &slots);

            fields.push(FieldLayout {
                name: member.clone(),
                ty: ty.clone(),
                offset: *offset,
                size: *size,
                align: *align,
                padding_after_words: (next - offset - size) / 4,
                slots,
            });
        }
        let padding_map = writer.finish(runtime_tail.as_ref().map_or(byte_size, |t| t.offset));
        let tail_padding_words = fields.last().map_or(byte_size / 4, |f| f.padding_after_words);

        Ok(TypeLayout {
            name: name.to_string(),
            byte_size,
            align: max_align,
            fields,
            tail_padding_words,
            padding_map,
            runtime_tail,
        })
    }

    /// Layout for a non-struct type used directly as a binding type. A top-level
    /// runtime array ends up with an empty fixed part and a tail at offset 0.
    fn anonymous_layout(&mut self, key: &str, ty: &WgslType, space: AddressSpace) -> BindingResult<TypeLayout> {
        let members = [("value".to_string(), ty.clone(), None, None)];
        self.build_struct(key, &members, space, &mut Vec::new())
    }

    fn measure(&mut self, ty: &WgslType, space: AddressSpace, visiting: &mut Vec<String>) -> BindingResult<Measure> {
        match ty {
            WgslType::Matrix { columns, rows, .. } => {
                let stride = space.column_stride(*rows);
                Ok(Measure {
                    size: columns * stride,
                    align: stride,
                })
            }
            WgslType::Array {
                element,
                length: Some(n),
            } => {
                let elem = self.measure(element, space, visiting)?;
                let (stride, align) = space.array_stride_align(elem.size, elem.align);
                Ok(Measure { size: stride * n, align })
            }
            WgslType::Array { length: None, .. } => Err(BindingError::config(format!(
                "runtime-sized `{ty}` has no fixed size"
            ))),
            WgslType::Struct(name) => {
                let layout = self.struct_layout(name, space, visiting)?;
                if layout.runtime_tail.is_some() {
                    return Err(BindingError::config(format!(
                        "runtime-sized struct `{name}` cannot be nested"
                    )));
                }
                Ok(Measure {
                    size: layout.byte_size,
                    align: layout.align,
                })
            }
            WgslType::Scalar(_) | WgslType::Atomic(_) | WgslType::Vector { .. } => {
                let (size, align) = ty
                    .builtin_size_align()
                    .ok_or_else(|| BindingError::config(format!("`{ty}` has no built-in size")))?;
                Ok(Measure { size, align })
            }
        }
    }

    fn write_slots(
        &mut self,
        ty: &WgslType,
        space: AddressSpace,
        offset: u32,
        w: &mut SlotWriter,
        visiting: &mut Vec<String>,
    ) -> BindingResult<()> {
        match ty {
            WgslType::Scalar(s) | WgslType::Atomic(s) => w.push(offset, *s, 1),
            WgslType::Vector { scalar, size } => w.push(offset, *scalar, *size),
            WgslType::Matrix {
                scalar,
                columns,
                rows,
            } => {
                let stride = space.column_stride(*rows);
                for c in 0..*columns {
                    w.push(offset + c * stride, *scalar, *rows);
                }
            }
            WgslType::Array {
                element,
                length: Some(n),
            } => {
                let elem = self.measure(element, space, visiting)?;
                let (stride, _) = space.array_stride_align(elem.size, elem.align);
                for i in 0..*n {
                    self.write_slots(element, space, offset + i * stride, w, visiting)?;
                }
            }
            WgslType::Array { length: None, .. } => {
                return Err(BindingError::config(format!("runtime-sized `{ty}` has no fixed size")));
            }
            WgslType::Struct(name) => {
                let layout = self.struct_layout(name, space, visiting)?;
                w.append(offset, &layout.padding_map);
                w.pad_to(offset + layout.byte_size);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver(src: &str) -> TypeLayoutResolver {
        let mut r = TypeLayoutResolver::new();
        r.add_source(src).unwrap();
        r
    }

    fn offsets(layout: &TypeLayout) -> Vec<(String, u32, u32)> {
        layout
            .fields
            .iter()
            .map(|f| (f.name.clone(), f.offset, f.size))
            .collect()
    }

    #[test]
    fn vec3_between_scalars() {
        let mut r = resolver("struct S { a: f32, b: vec3f, c: f32 }");
        let layout = r.resolve("S").unwrap();
        assert_eq!(
            offsets(&layout),
            vec![("a".into(), 0, 4), ("b".into(), 16, 12), ("c".into(), 28, 4)]
        );
        assert_eq!(layout.byte_size, 32);
        assert_eq!(layout.fields[0].padding_after_words, 3);
        assert_eq!(layout.fields[1].padding_after_words, 0);
        assert_eq!(layout.tail_padding_words, 0);
    }

    #[test]
    fn byte_size_rounds_to_sixteen() {
        let mut r = resolver("struct T { a: f32, b: vec2f }");
        let layout = r.resolve("T").unwrap();
        assert_eq!(offsets(&layout), vec![("a".into(), 0, 4), ("b".into(), 8, 8)]);
        assert_eq!(layout.byte_size, 16);
        assert_eq!(layout.tail_padding_words, 0);

        let mut r = resolver("struct U { a: f32 }");
        let layout = r.resolve("U").unwrap();
        assert_eq!(layout.byte_size, 16);
        assert_eq!(layout.tail_padding_words, 3);
    }

    #[test]
    fn nested_structs_and_arrays() {
        let mut r = resolver(
            r#"
struct Light { color: vec3f, intensity: f32 }
struct Scene { count: u32, lights: array<Light, 2>, weights: array<f32, 3>, view: mat4x4f }
"#,
        );
        let scene = r.resolve("Scene").unwrap();
        assert_eq!(
            offsets(&scene),
            vec![
                ("count".into(), 0, 4),
                ("lights".into(), 16, 32),
                ("weights".into(), 48, 48),
                ("view".into(), 96, 64),
            ]
        );
        assert_eq!(scene.byte_size, 160);
        assert_eq!(scene.leaf_count(), 1 + 2 * 4 + 3 + 16);
        assert_eq!(flatten::byte_len(&scene.padding_map), 160);
    }

    #[test]
    fn undefined_struct_is_reported() {
        let mut r = resolver("struct A { b: Missing }");
        let err = r.resolve("A").unwrap_err();
        assert!(matches!(err, BindingError::TypeNotDefined(_)), "{err}");
    }

    #[test]
    fn cycles_are_reported_as_undefined() {
        let mut r = resolver("struct A { b: B } struct B { a: array<A, 2> }");
        let err = r.resolve("A").unwrap_err();
        assert!(matches!(err, BindingError::TypeNotDefined(ref m) if m.contains("A -> B -> A")), "{err}");
    }

    #[test]
    fn runtime_array_rules() {
        let mut r = resolver("struct Buf { count: u32, items: array<vec4f> } struct Bad { items: array<f32>, n: u32 }");
        let buf = r.resolve("Buf").unwrap();
        let tail = buf.runtime_tail.as_ref().unwrap();
        assert_eq!((tail.offset, tail.stride), (16, 16));
        assert_eq!(buf.buffer_size(4), 16 + 64);

        assert!(matches!(r.resolve_uniform("Buf"), Err(BindingError::Configuration(_))));
        assert!(matches!(r.resolve("Bad"), Err(BindingError::Configuration(_))));
        assert!(matches!(
            r.layout_for_members("Params", &[("x".into(), "array<f32>".into())]),
            Err(BindingError::Configuration(_))
        ));
    }

    #[test]
    fn anonymous_types_resolve_directly() {
        let mut r = TypeLayoutResolver::new();
        let arr = r.resolve("array<u32, 3>").unwrap();
        assert_eq!(arr.byte_size, 48);
        let runtime = r.resolve("array<f32>").unwrap();
        assert_eq!(runtime.buffer_size(10), 160);
    }

    #[test]
    fn flatten_then_read_fields() {
        let mut r = resolver("struct S { a: f32, b: vec3f, c: f32 }");
        let layout = r.resolve("S").unwrap();
        let bytes = layout.flatten(&[1.0, 2.0, 3.0, 4.0, 5.0]).unwrap();
        assert_eq!(bytes.len(), 32);
        assert_eq!(layout.read_field(&bytes, 0).unwrap(), vec![1.0]);
        assert_eq!(layout.read_field(&bytes, 1).unwrap(), vec![2.0, 3.0, 4.0]);
        assert_eq!(layout.read_field(&bytes, 2).unwrap(), vec![5.0]);
    }

    #[test]
    fn runtime_tail_flattens_whole_elements() {
        let mut r = resolver("struct P { pos: vec2f, alive: u32 }");
        let layout = r.resolve("array<P>").unwrap();
        let bytes = layout.flatten(&[1.0, 2.0, 1.0, 3.0, 4.0, 0.0]).unwrap();
        assert_eq!(bytes.len(), 32);
        assert_eq!(layout.decode(&bytes), vec![1.0, 2.0, 1.0, 3.0, 4.0, 0.0]);
        assert!(layout.flatten(&[1.0, 2.0]).is_err());
    }

    #[test]
    fn storage_rules_pack_by_alignment() {
        let mut r = resolver("struct P { pos: vec2f, alive: u32 } struct M { m: mat2x2f, v: vec3f, w: f32 }");
        let arr = r.resolve_storage("array<f32, 4>").unwrap();
        assert_eq!(arr.byte_size, 16);
        assert_eq!(arr.flatten(&[1.0, 2.0, 3.0, 4.0]).unwrap().len(), 16);

        let particles = r.resolve_storage("array<P>").unwrap();
        let tail = particles.runtime_tail.as_ref().unwrap();
        assert_eq!((tail.offset, tail.stride), (0, 16));

        let m = r.resolve_storage("M").unwrap();
        assert_eq!(offsets(&m), vec![("m".into(), 0, 16), ("v".into(), 16, 12), ("w".into(), 28, 4)]);
        assert_eq!(m.byte_size, 32);

        let events = r.resolve_storage("array<u32, 3>").unwrap();
        assert_eq!(events.byte_size, 12);
        assert_eq!(events.buffer_size(0), 16);
        // The uniform table is untouched by storage lookups.
        assert_eq!(r.resolve("array<u32, 3>").unwrap().byte_size, 48);
    }

    #[test]
    fn cache_returns_same_layout() {
        let mut r = resolver("struct S { a: f32 }");
        let a = r.resolve("S").unwrap();
        let b = r.resolve("S").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
