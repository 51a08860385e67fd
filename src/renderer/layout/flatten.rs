//! Padding maps: flattening host numbers into host-shareable bytes and back.
//!
//! A padding map is the ordered list of scalar runs in a type. Each run records how
//! many zero words follow it before the next run (or the end of the type). Writing a
//! uniform buffer is then a single pass over the map and the flattened host values.

use crate::error::{BindingError, BindingResult};

use super::types::ScalarKind;

/// One run of `components` scalars followed by `pad_after_words` zero words.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WordSlot {
    pub scalar: ScalarKind,
    pub components: u32,
    pub pad_after_words: u32,
}

pub fn leaf_count(slots: &[WordSlot]) -> usize {
    slots.iter().map(|s| s.components as usize).sum()
}

pub fn byte_len(slots: &[WordSlot]) -> usize {
    slots
        .iter()
        .map(|s| (s.components + s.pad_after_words) as usize * 4)
        .sum()
}

/// Builds a padding map while walking a layout in offset order.
#[derive(Default)]
pub(crate) struct SlotWriter {
    slots: Vec<WordSlot>,
    cursor: u32,
}

impl SlotWriter {
    pub(crate) fn pad_to(&mut self, offset: u32) {
        if offset <= self.cursor {
            return;
        }
        let gap = (offset - self.cursor) / 4;
        match self.slots.last_mut() {
            Some(last) => last.pad_after_words += gap,
            None => self.slots.push(WordSlot {
                scalar: ScalarKind::F32,
                components: 0,
                pad_after_words: gap,
            }),
        }
        self.cursor = offset;
    }

    pub(crate) fn push(&mut self, offset: u32, scalar: ScalarKind, components: u32) {
        self.pad_to(offset);
        self.slots.push(WordSlot {
            scalar,
            components,
            pad_after_words: 0,
        });
        self.cursor = offset + components * 4;
    }

    pub(crate) fn append(&mut self, offset: u32, slots: &[WordSlot]) {
        self.pad_to(offset);
        self.slots.extend_from_slice(slots);
        self.cursor = offset + byte_len(slots) as u32;
    }

    pub(crate) fn finish(mut self, end: u32) -> Vec<WordSlot> {
        self.pad_to(end);
        self.slots
    }
}

/// Write `values` through `slots`, appending to `out`. Consumes exactly
/// `leaf_count(slots)` values and returns the unconsumed remainder.
pub fn write_words<'a>(slots: &[WordSlot], values: &'a [f64], out: &mut Vec<u8>) -> BindingResult<&'a [f64]> {
    let mut rest = values;
    for slot in slots {
        let n = slot.components as usize;
        if rest.len() < n {
            return Err(BindingError::config(format!(
                "value has {} scalars, layout expects {}",
                values.len(),
                leaf_count(slots)
            )));
        }
        for v in &rest[..n] {
            out.extend_from_slice(&slot.scalar.encode(*v));
        }
        rest = &rest[n..];
        out.resize(out.len() + slot.pad_after_words as usize * 4, 0);
    }
    Ok(rest)
}

/// Flatten exactly one instance of a fixed-size layout.
pub fn flatten_exact(slots: &[WordSlot], values: &[f64]) -> BindingResult<Vec<u8>> {
    let mut out = Vec::with_capacity(byte_len(slots));
    let rest = write_words(slots, values, &mut out)?;
    if !rest.is_empty() {
        return Err(BindingError::config(format!(
            "value has {} scalars, layout expects {}",
            values.len(),
            leaf_count(slots)
        )));
    }
    Ok(out)
}

/// Read scalars back out of `bytes`, skipping padding words.
pub fn decode_words(slots: &[WordSlot], bytes: &[u8]) -> Vec<f64> {
    let mut out = Vec::with_capacity(leaf_count(slots));
    let mut pos = 0_usize;
    for slot in slots {
        for _ in 0..slot.components {
            let Some(word) = bytes.get(pos..pos + 4) else {
                return out;
            };
            out.push(slot.scalar.decode([word[0], word[1], word[2], word[3]]));
            pos += 4;
        }
        pos += slot.pad_after_words as usize * 4;
    }
    out
}
