// Copyright (c) 2025-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    coding::{decode_slice, encode_slice, Decode, Encode},
    deadline::Deadline,
    key_range::{KeyRange, MaxKey},
    value::{Entry, Value},
    Slice,
};
use byteorder::{ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};
use varint_rs::{VarintReader, VarintWriter};

/// Scalar statistics a segment carries about itself
///
/// Collected while writing; later consulted without touching the blocks
/// (compaction routing, deadline-aware reads, function id checks).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SegmentMeta {
    pub key_value_count: usize,
    pub has_range: bool,
    pub has_put: bool,
    pub created_in_level: u32,
    pub min_key: Slice,
    pub max_key: MaxKey,

    /// The soonest deadline among puts, for expiration-driven compaction
    pub nearest_put_deadline: Option<Deadline>,

    /// Smallest and largest function id referenced anywhere in the segment
    pub min_max_function_id: Option<(Slice, Slice)>,
}

impl SegmentMeta {
    /// The segment's key range.
    #[must_use]
    pub fn key_range(&self) -> KeyRange {
        KeyRange::new(self.min_key.clone(), self.max_key.clone())
    }
}

/// Accumulates [`SegmentMeta`] over a stream of entries
pub struct MetaCollector {
    created_in_level: u32,
    key_value_count: usize,
    has_range: bool,
    has_put: bool,
    min_key: Option<Slice>,
    max_key: Option<MaxKey>,
    nearest_put_deadline: Option<Deadline>,
    min_function_id: Option<Slice>,
    max_function_id: Option<Slice>,
}

impl MetaCollector {
    #[must_use]
    pub fn new(created_in_level: u32) -> Self {
        Self {
            created_in_level,
            key_value_count: 0,
            has_range: false,
            has_put: false,
            min_key: None,
            max_key: None,
            nearest_put_deadline: None,
            min_function_id: None,
            max_function_id: None,
        }
    }

    pub fn add(&mut self, entry: &Entry) {
        self.key_value_count += 1;

        if self.min_key.is_none() {
            self.min_key = Some(entry.key().clone());
        }
        self.max_key = Some(entry.max_key());

        match entry {
            Entry::Fixed { value, .. } => self.add_value(value),
            Entry::Range(range) => {
                self.has_range = true;

                if let Some(from_value) = &range.from_value {
                    self.add_value(from_value);
                }
                self.add_value(&range.range_value.to_value());
            }
        }
    }

    fn add_value(&mut self, value: &Value) {
        match value {
            Value::Put(put) => {
                self.has_put = true;
                self.nearest_put_deadline =
                    Deadline::earlier_of(self.nearest_put_deadline, put.deadline);
            }
            Value::Function(function) => self.add_function_id(&function.function_id),
            Value::PendingApply(pending) => {
                for apply in &pending.applies {
                    self.add_value(&apply.to_value());
                }
            }
            Value::Remove(_) | Value::Update(_) => {}
        }
    }

    fn add_function_id(&mut self, id: &Slice) {
        match &self.min_function_id {
            Some(min) if min <= id => {}
            _ => self.min_function_id = Some(id.clone()),
        }
        match &self.max_function_id {
            Some(max) if max >= id => {}
            _ => self.max_function_id = Some(id.clone()),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.key_value_count
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.key_value_count == 0
    }

    /// Finalizes the statistics; `None` if no entries were added.
    #[must_use]
    pub fn finish(self) -> Option<SegmentMeta> {
        Some(SegmentMeta {
            key_value_count: self.key_value_count,
            has_range: self.has_range,
            has_put: self.has_put,
            created_in_level: self.created_in_level,
            min_key: self.min_key?,
            max_key: self.max_key?,
            nearest_put_deadline: self.nearest_put_deadline,
            min_max_function_id: match (self.min_function_id, self.max_function_id) {
                (Some(min), Some(max)) => Some((min, max)),
                _ => None,
            },
        })
    }
}

impl Encode for SegmentMeta {
    fn encode_into<W: Write>(&self, writer: &mut W) -> crate::Result<()> {
        #[allow(clippy::cast_possible_truncation)]
        writer.write_u32_varint(self.key_value_count as u32)?;

        writer.write_u8(u8::from(self.has_range))?;
        writer.write_u8(u8::from(self.has_put))?;
        writer.write_u32_varint(self.created_in_level)?;

        encode_slice(writer, &self.min_key)?;
        self.max_key.encode_into(writer)?;

        match self.nearest_put_deadline {
            Some(deadline) => {
                writer.write_u8(1)?;
                deadline.encode_into(writer)?;
            }
            None => writer.write_u8(0)?,
        }

        match &self.min_max_function_id {
            Some((min, max)) => {
                writer.write_u8(1)?;
                encode_slice(writer, min)?;
                encode_slice(writer, max)?;
            }
            None => writer.write_u8(0)?,
        }

        Ok(())
    }
}

impl Decode for SegmentMeta {
    fn decode_from<R: Read>(reader: &mut R) -> crate::Result<Self> {
        let key_value_count = reader.read_u32_varint()? as usize;
        let has_range = reader.read_u8()? == 1;
        let has_put = reader.read_u8()? == 1;
        let created_in_level = reader.read_u32_varint()?;

        let min_key = decode_slice(reader)?;
        let max_key = MaxKey::decode_from(reader)?;

        let nearest_put_deadline = if reader.read_u8()? == 1 {
            Some(Deadline::decode_from(reader)?)
        } else {
            None
        };

        let min_max_function_id = if reader.read_u8()? == 1 {
            Some((decode_slice(reader)?, decode_slice(reader)?))
        } else {
            None
        };

        Ok(Self {
            key_value_count,
            has_range,
            has_put,
            created_in_level,
            min_key,
            max_key,
            nearest_put_deadline,
            min_max_function_id,
        })
    }
}
