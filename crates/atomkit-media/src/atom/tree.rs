//! Raw box trees.

use super::{BoxHeader, BoxReader, BoxWriter, FourCc, WriteSeek, HEADER_SIZE, WIDE_HEADER_SIZE};
use crate::Result;
use bytes::Bytes;
use std::io::Write;

/// Box types whose payload is a plain sequence of child boxes.
const CONTAINERS: [FourCc; 9] = [
    FourCc::MOOV,
    FourCc::TRAK,
    FourCc::EDTS,
    FourCc::MDIA,
    FourCc::MINF,
    FourCc::DINF,
    FourCc::STBL,
    FourCc::UDTA,
    FourCc::MVEX,
];

/// Check if a box type contains only child boxes.
pub fn is_container(box_type: FourCc) -> bool {
    CONTAINERS.contains(&box_type)
}

/// Payload of a raw box.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AtomBody {
    Leaf(Bytes),
    Container(Vec<Atom>),
}

/// A box with its payload kept as raw bytes or raw children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Atom {
    pub box_type: FourCc,
    /// Encode with a 16-byte header.
    pub wide: bool,
    pub body: AtomBody,
}

impl Atom {
    pub fn leaf(box_type: FourCc, data: impl Into<Bytes>) -> Self {
        Self {
            box_type,
            wide: false,
            body: AtomBody::Leaf(data.into()),
        }
    }

    pub fn container(box_type: FourCc, children: Vec<Atom>) -> Self {
        Self {
            box_type,
            wide: false,
            body: AtomBody::Container(children),
        }
    }

    /// Switch this box to a 64-bit length header.
    pub fn into_wide(mut self) -> Self {
        self.wide = true;
        self
    }

    pub fn header_size(&self) -> u64 {
        if self.wide {
            WIDE_HEADER_SIZE as u64
        } else {
            HEADER_SIZE as u64
        }
    }

    /// Header-inclusive encoded size.
    pub fn encoded_len(&self) -> u64 {
        let payload = match &self.body {
            AtomBody::Leaf(data) => data.len() as u64,
            AtomBody::Container(children) => children.iter().map(Atom::encoded_len).sum(),
        };
        self.header_size() + payload
    }

    /// Child boxes; empty for leaves.
    pub fn children(&self) -> &[Atom] {
        match &self.body {
            AtomBody::Leaf(_) => &[],
            AtomBody::Container(children) => children,
        }
    }

    /// Find a descendant by type path, e.g. `[trak, mdia, hdlr]`.
    pub fn find(&self, path: &[FourCc]) -> Option<&Atom> {
        let Some((first, rest)) = path.split_first() else {
            return Some(self);
        };
        self.children()
            .iter()
            .find(|child| child.box_type == *first)
            .and_then(|child| child.find(rest))
    }

    /// Encode this box and its children; returns the bytes written.
    pub fn write_to(&self, w: &mut dyn WriteSeek) -> Result<u64> {
        let mut writer = if self.wide {
            BoxWriter::open_wide(w, self.box_type)?
        } else {
            BoxWriter::open(w, self.box_type)?
        };

        match &self.body {
            AtomBody::Leaf(data) => writer.write_all(data)?,
            AtomBody::Container(children) => {
                for child in children {
                    child.write_to(&mut writer)?;
                }
            }
        }

        writer.finish()
    }

    /// Decode the box described by `header` from its bounded payload reader.
    pub fn read(header: &BoxHeader, reader: &mut BoxReader<'_>) -> Result<Self> {
        let body = if is_container(header.box_type) {
            AtomBody::Container(Self::read_all(reader)?)
        } else {
            AtomBody::Leaf(reader.read_to_end()?)
        };

        Ok(Self {
            box_type: header.box_type,
            wide: header.is_wide(),
            body,
        })
    }

    /// Decode every box left in `reader`.
    pub fn read_all(reader: &mut BoxReader<'_>) -> Result<Vec<Self>> {
        let mut atoms = Vec::new();
        reader.for_each_child(|header, child| {
            atoms.push(Self::read(header, child)?);
            Ok(())
        })?;
        Ok(atoms)
    }

    /// Decode a sequence of boxes from a byte slice.
    pub fn parse(data: &[u8]) -> Result<Vec<Self>> {
        let mut src = data;
        let mut reader = BoxReader::new(&mut src, data.len() as u64, FourCc::ROOT);
        Self::read_all(&mut reader)
    }
}
