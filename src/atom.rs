//! Minimal scanner for top-level ISO BMFF boxes ("atoms").
//!
//! Each box starts with a 4-byte big-endian length, inclusive of the 8-byte
//! header, followed by a 4-byte ASCII type tag. Scanning stops quietly at the
//! first header that does not fit, so truncated or corrupt fragments simply
//! yield fewer atoms.

use std::collections::HashMap;

pub type AtomTag = [u8; 4];

/// Segment index box, dropped before fragments are concatenated.
pub const SIDX: AtomTag = *b"sidx";

const HEADER_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Atom {
    pub offset: usize,
    pub length: usize,
}

/// Iterator over the top-level atoms of a buffer, in file order.
pub struct Atoms<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Atoms<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }
}

impl<'a> Iterator for Atoms<'a> {
    type Item = (AtomTag, Atom);

    fn next(&mut self) -> Option<Self::Item> {
        let rest = self.data.get(self.offset..)?;
        if rest.len() < HEADER_LEN {
            return None;
        }

        let length = u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
        if length < HEADER_LEN || length > rest.len() {
            // 64-bit sizes (length == 1) and "to end of file" (0) never show
            // up in live fragments; treat them like corruption.
            self.offset = self.data.len();
            return None;
        }

        let tag = [rest[4], rest[5], rest[6], rest[7]];
        let atom = Atom {
            offset: self.offset,
            length,
        };
        self.offset += length;

        Some((tag, atom))
    }
}

/// Maps each tag to its location. A repeated tag keeps its last occurrence.
pub fn get_atoms(data: &[u8]) -> HashMap<AtomTag, Atom> {
    Atoms::new(data).collect()
}

/// Cuts the first `tag` box out of `data`, leaving everything else in place.
///
/// Sibling boxes holding absolute offsets are not rewritten.
pub fn remove_atom(mut data: Vec<u8>, tag: AtomTag) -> Vec<u8> {
    let found = Atoms::new(&data).find(|(t, _)| *t == tag).map(|(_, a)| a);

    if let Some(atom) = found {
        data.drain(atom.offset..atom.offset + atom.length);
    }

    data
}

pub fn remove_sidx(data: Vec<u8>) -> Vec<u8> {
    remove_atom(data, SIDX)
}
