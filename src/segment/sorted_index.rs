// Copyright (c) 2025-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Sorted index block
//!
//! A sequence of key-value entries in key order, optionally prefix-compressed.
//! With prefix compression on, a full key is written at every restart interval
//! and the entries in between share a prefix with their predecessor; only
//! full-key entries can be addressed directly by the secondary indexes.
//!
//! Values of top-level puts and updates may live out-of-line in the values
//! block, in which case entries store `(offset, len)` references.

use crate::{
    coding::{decode_slice, encode_slice, Decode, Encode},
    deadline::Deadline,
    time::Time,
    value::{
        Entry, Function, PendingApply, Put, RangeEntry, RangeValue, Remove, Update, Value,
        TAG_FUNCTION, TAG_PENDING_APPLY, TAG_PUT, TAG_RANGE, TAG_REMOVE, TAG_UPDATE,
    },
    Slice,
};
use byteorder::{ReadBytesExt, WriteBytesExt};
use std::io::Read;
use varint_rs::{VarintReader, VarintWriter};

const FLAG_PREFIX_COMPRESSION: u8 = 1;
const FLAG_EXTERNAL_VALUES: u8 = 1 << 1;

const ENTRY_FLAG_VALUE: u8 = 1;
const ENTRY_FLAG_DEADLINE: u8 = 1 << 1;

/// Where a put/update value went during the write
#[derive(Clone, Debug)]
pub enum ValueSlot {
    None,
    Inline(Slice),
    External { offset: u32, len: u32 },
}

/// A decoded sorted-index entry plus its position
#[derive(Clone, Debug)]
pub struct IndexedEntry {
    pub entry: Entry,

    /// Byte offset of this entry, relative to the first entry
    pub offset: u32,

    /// Offset of the successor entry; `None` for the last entry
    pub next_offset: Option<u32>,
}

impl IndexedEntry {
    /// Returns `true` if this is the last entry of its segment.
    #[must_use]
    pub fn is_last(&self) -> bool {
        self.next_offset.is_none()
    }
}

/// Reference to an entry just written, fed into the secondary index builders
#[derive(Clone, Debug)]
pub struct WrittenEntry {
    pub key: Slice,
    pub offset: u32,

    /// Whether the entry stores its full key (directly addressable)
    pub full_key: bool,
}

/// Builds a sorted index payload
pub struct Writer {
    buf: Vec<u8>,
    prefix_compression: bool,
    restart_interval: usize,
    external_values: bool,
    prev_key: Option<Slice>,
    count: usize,
}

impl Writer {
    #[must_use]
    pub fn new(prefix_compression: bool, restart_interval: usize, external_values: bool) -> Self {
        Self {
            buf: vec![],
            prefix_compression,
            restart_interval: restart_interval.max(1),
            external_values,
            prev_key: None,
            count: 0,
        }
    }

    /// Appends an entry, returning its offset and addressability.
    pub fn add(&mut self, entry: &Entry, value_slot: &ValueSlot) -> crate::Result<WrittenEntry> {
        let key = entry.key().clone();

        debug_assert!(
            self.prev_key.as_ref().is_none_or(|prev| *prev < key),
            "sorted index entries must arrive in strictly ascending key order",
        );

        #[allow(clippy::cast_possible_truncation)]
        let offset = self.buf.len() as u32;

        let shared = if self.prefix_compression && self.count % self.restart_interval != 0 {
            self.prev_key
                .as_ref()
                .map_or(0, |prev| shared_prefix_len(prev, &key))
        } else {
            0
        };

        self.encode_entry(entry, &key, shared, value_slot)?;

        self.prev_key = Some(key.clone());
        self.count += 1;

        Ok(WrittenEntry {
            key,
            offset,
            full_key: shared == 0,
        })
    }

    fn encode_entry(
        &mut self,
        entry: &Entry,
        key: &Slice,
        shared: usize,
        value_slot: &ValueSlot,
    ) -> crate::Result<()> {
        let writer = &mut self.buf;

        match entry {
            Entry::Fixed { value, .. } => match value {
                Value::Put(put) => {
                    writer.write_u8(TAG_PUT)?;
                    encode_key(writer, key, shared)?;
                    encode_fixed_fields(writer, value_slot, put.deadline, &put.time)?;
                }
                Value::Update(update) => {
                    writer.write_u8(TAG_UPDATE)?;
                    encode_key(writer, key, shared)?;
                    encode_fixed_fields(writer, value_slot, update.deadline, &update.time)?;
                }
                Value::Remove(remove) => {
                    writer.write_u8(TAG_REMOVE)?;
                    encode_key(writer, key, shared)?;
                    encode_fixed_fields(writer, &ValueSlot::None, remove.deadline, &remove.time)?;
                }
                Value::Function(function) => {
                    writer.write_u8(TAG_FUNCTION)?;
                    encode_key(writer, key, shared)?;
                    encode_slice(writer, &function.function_id)?;
                    function.time.encode_into(writer)?;
                }
                Value::PendingApply(pending) => {
                    writer.write_u8(TAG_PENDING_APPLY)?;
                    encode_key(writer, key, shared)?;

                    #[allow(clippy::cast_possible_truncation)]
                    writer.write_u32_varint(pending.applies.len() as u32)?;

                    for apply in &pending.applies {
                        apply.to_value().encode_into(writer)?;
                    }
                }
            },

            Entry::Range(range) => {
                writer.write_u8(TAG_RANGE)?;
                encode_key(writer, key, shared)?;
                encode_slice(writer, &range.to_key)?;

                match &range.from_value {
                    Some(from_value) => {
                        writer.write_u8(1)?;
                        from_value.encode_into(writer)?;
                    }
                    None => writer.write_u8(0)?,
                }

                range.range_value.encode_into(writer)?;
            }
        }

        Ok(())
    }

    /// Number of entries added so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.count
    }

    /// Encoded size of the entries so far.
    #[must_use]
    pub fn byte_size(&self) -> usize {
        self.buf.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Finalizes the payload: descriptor header followed by the entries.
    pub fn finish(self) -> crate::Result<Vec<u8>> {
        let mut payload = vec![];

        let mut flags = 0u8;
        if self.prefix_compression {
            flags |= FLAG_PREFIX_COMPRESSION;
        }
        if self.external_values {
            flags |= FLAG_EXTERNAL_VALUES;
        }
        payload.write_u8(flags)?;

        #[allow(clippy::cast_possible_truncation)]
        payload.write_u32_varint(self.count as u32)?;

        payload.extend(self.buf);

        Ok(payload)
    }
}

fn shared_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

fn encode_key(writer: &mut Vec<u8>, key: &Slice, shared: usize) -> crate::Result<()> {
    #[allow(clippy::cast_possible_truncation)]
    writer.write_u32_varint(shared as u32)?;

    #[allow(clippy::indexing_slicing)]
    let rest = &key[shared..];

    encode_slice(writer, rest)
}

fn encode_fixed_fields(
    writer: &mut Vec<u8>,
    value_slot: &ValueSlot,
    deadline: Option<Deadline>,
    time: &Time,
) -> crate::Result<()> {
    let mut flags = 0u8;
    if !matches!(value_slot, ValueSlot::None) {
        flags |= ENTRY_FLAG_VALUE;
    }
    if deadline.is_some() {
        flags |= ENTRY_FLAG_DEADLINE;
    }
    writer.write_u8(flags)?;

    match value_slot {
        ValueSlot::None => {}
        ValueSlot::Inline(value) => encode_slice(writer, value)?,
        ValueSlot::External { offset, len } => {
            writer.write_u32_varint(*offset)?;
            writer.write_u32_varint(*len)?;
        }
    }

    if let Some(deadline) = deadline {
        deadline.encode_into(writer)?;
    }

    time.encode_into(writer)
}

/// Reads a sorted index payload
pub struct Reader {
    data: Slice,

    /// Offset of the first entry inside `data`
    entries_start: usize,

    /// Payload of the values block, when values are stored out-of-line
    values: Option<Slice>,

    prefix_compression: bool,
    entry_count: usize,
}

impl Reader {
    /// Parses the descriptor header of a sorted index payload.
    pub fn new(data: Slice, values: Option<Slice>) -> crate::Result<Self> {
        let mut reader = &data[..];

        let flags = reader.read_u8()?;
        let entry_count = reader.read_u32_varint()? as usize;

        let entries_start = data.len() - reader.len();

        let external_values = flags & FLAG_EXTERNAL_VALUES != 0;

        if external_values && values.is_none() {
            return Err(crate::Error::Corruption(
                "sorted index expects a values block",
            ));
        }

        Ok(Self {
            data,
            entries_start,
            values: if external_values { values } else { None },
            prefix_compression: flags & FLAG_PREFIX_COMPRESSION != 0,
            entry_count,
        })
    }

    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.entry_count
    }

    #[must_use]
    pub fn has_prefix_compression(&self) -> bool {
        self.prefix_compression
    }

    /// Iterates all entries from the start.
    #[must_use]
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            reader: self,
            pos: 0,
            prev_key: None,
        }
    }

    /// Iterates from `offset`; the entry there must be directly addressable
    /// unless the predecessor key is supplied.
    #[must_use]
    pub fn iter_from(&self, offset: u32, prev_key: Option<Slice>) -> Iter<'_> {
        Iter {
            reader: self,
            pos: offset as usize,
            prev_key,
        }
    }

    /// Walks forward from `start` and returns the entry for `key`: an exact
    /// match, or the range whose interval contains it. Stops as soon as the
    /// current key exceeds `key`.
    pub fn search(
        &self,
        key: &Slice,
        start: Option<&IndexedEntry>,
    ) -> crate::Result<Option<IndexedEntry>> {
        // The start entry is already decoded (and may be prefix-compressed),
        // so it is checked in place and iteration resumes behind it
        let iter = match start {
            Some(start) => {
                if start.entry.key() == key {
                    return Ok(Some(start.clone()));
                }

                if let Entry::Range(range) = &start.entry {
                    if range.contains_key(key) {
                        return Ok(Some(start.clone()));
                    }
                }

                if start.entry.key() > key {
                    return Ok(None);
                }

                let Some(next_offset) = start.next_offset else {
                    return Ok(None);
                };

                self.iter_from(next_offset, Some(start.entry.key().clone()))
            }
            None => self.iter(),
        };

        for entry in iter {
            let entry = entry?;

            if entry.entry.key() > key {
                return Ok(None);
            }

            if entry.entry.key() == key {
                return Ok(Some(entry));
            }

            if let Entry::Range(range) = &entry.entry {
                if range.contains_key(key) {
                    return Ok(Some(entry));
                }
            }
        }

        Ok(None)
    }

    /// Resolves exactly the entry at `offset`, verifying it matches `key`.
    ///
    /// Used after a prior index narrowed the position to a single entry.
    pub fn search_seek_one(
        &self,
        key: &Slice,
        offset: u32,
        known_key: Option<&Slice>,
    ) -> crate::Result<Option<IndexedEntry>> {
        let entry = self.entry_at(offset, known_key)?;

        if entry.entry.key() == key {
            return Ok(Some(entry));
        }

        if let Entry::Range(range) = &entry.entry {
            if range.contains_key(key) {
                return Ok(Some(entry));
            }
        }

        Ok(None)
    }

    /// Returns the first entry strictly above `key`, seeking forward from
    /// `start` (exclusive of the start entry itself).
    pub fn search_higher_seek_one(
        &self,
        key: &Slice,
        start: &IndexedEntry,
    ) -> crate::Result<Option<IndexedEntry>> {
        let Some(next_offset) = start.next_offset else {
            return Ok(None);
        };

        for entry in self.iter_from(next_offset, Some(start.entry.key().clone())) {
            let entry = entry?;

            if entry.entry.key() > key {
                return Ok(Some(entry));
            }

            if let Entry::Range(range) = &entry.entry {
                if range.to_key > *key {
                    return Ok(Some(entry));
                }
            }
        }

        Ok(None)
    }

    /// Decodes the single entry at `offset`.
    ///
    /// A prefix-compressed entry is only decodable when its full key is
    /// already known (copy-key hash index hits).
    pub fn entry_at(&self, offset: u32, known_key: Option<&Slice>) -> crate::Result<IndexedEntry> {
        let (entry, next_pos) = self.decode_entry(offset as usize, None, known_key)?;

        Ok(self.indexed(entry, offset as usize, next_pos))
    }

    fn indexed(&self, entry: Entry, pos: usize, next_pos: usize) -> IndexedEntry {
        let end = self.data.len() - self.entries_start;

        #[allow(clippy::cast_possible_truncation)]
        IndexedEntry {
            entry,
            offset: pos as u32,
            next_offset: (next_pos < end).then_some(next_pos as u32),
        }
    }

    /// Decodes the entry at `pos` (relative to the first entry).
    ///
    /// Exactly one of `prev_key` / `known_key` is needed when the stored key
    /// is prefix-compressed.
    fn decode_entry(
        &self,
        pos: usize,
        prev_key: Option<&Slice>,
        known_key: Option<&Slice>,
    ) -> crate::Result<(Entry, usize)> {
        let start = self.entries_start + pos;

        if start >= self.data.len() {
            return Err(crate::Error::Corruption("sorted index offset out of bounds"));
        }

        let mut reader = &self.data[start..];

        let kind = reader.read_u8()?;

        let shared = reader.read_u32_varint()? as usize;
        let rest = decode_slice(&mut reader)?;

        let key = if shared == 0 {
            rest
        } else if let Some(known) = known_key {
            known.clone()
        } else if let Some(prev) = prev_key {
            if shared > prev.len() {
                return Err(crate::Error::Corruption("shared prefix exceeds previous key"));
            }

            let mut key = Vec::with_capacity(shared + rest.len());

            #[allow(clippy::indexing_slicing)]
            key.extend_from_slice(&prev[..shared]);
            key.extend_from_slice(&rest);
            key.into()
        } else {
            return Err(crate::Error::Corruption(
                "prefix-compressed entry needs a preceding key",
            ));
        };

        let entry = match kind {
            TAG_PUT => {
                let (value, deadline, time) = self.decode_fixed_fields(&mut reader)?;
                Entry::Fixed {
                    key,
                    value: Value::Put(Put {
                        value,
                        deadline,
                        time,
                    }),
                }
            }
            TAG_UPDATE => {
                let (value, deadline, time) = self.decode_fixed_fields(&mut reader)?;
                Entry::Fixed {
                    key,
                    value: Value::Update(Update {
                        value,
                        deadline,
                        time,
                    }),
                }
            }
            TAG_REMOVE => {
                let (_, deadline, time) = self.decode_fixed_fields(&mut reader)?;
                Entry::Fixed {
                    key,
                    value: Value::Remove(Remove { deadline, time }),
                }
            }
            TAG_FUNCTION => {
                let function_id = decode_slice(&mut reader)?;
                let time = Time::decode_from(&mut reader)?;
                Entry::Fixed {
                    key,
                    value: Value::Function(Function { function_id, time }),
                }
            }
            TAG_PENDING_APPLY => {
                let count = reader.read_u32_varint()? as usize;

                if count == 0 {
                    return Err(crate::Error::Corruption("empty pending apply chain"));
                }

                let mut applies = Vec::with_capacity(count);

                for _ in 0..count {
                    let apply = Value::decode_from(&mut reader)?
                        .to_apply()
                        .ok_or(crate::Error::Corruption("pending chain held a put"))?;
                    applies.push(apply);
                }

                Entry::Fixed {
                    key,
                    value: Value::PendingApply(PendingApply { applies }),
                }
            }
            TAG_RANGE => {
                let to_key = decode_slice(&mut reader)?;

                let from_value = if reader.read_u8()? == 1 {
                    Some(Value::decode_from(&mut reader)?)
                } else {
                    None
                };

                let range_value = RangeValue::decode_from(&mut reader)?;

                Entry::Range(RangeEntry {
                    from_key: key,
                    to_key,
                    from_value,
                    range_value,
                })
            }
            tag => return Err(crate::Error::InvalidTag(("SortedIndexEntry", tag))),
        };

        let next_pos = self.data.len() - reader.len() - self.entries_start;

        Ok((entry, next_pos))
    }

    #[allow(clippy::type_complexity)]
    fn decode_fixed_fields(
        &self,
        reader: &mut &[u8],
    ) -> crate::Result<(Option<Slice>, Option<Deadline>, Time)> {
        let flags = reader.read_u8()?;

        let value = if flags & ENTRY_FLAG_VALUE != 0 {
            match &self.values {
                Some(values) => {
                    let offset = reader.read_u32_varint()? as usize;
                    let len = reader.read_u32_varint()? as usize;

                    if offset + len > values.len() {
                        return Err(crate::Error::Corruption("value reference out of bounds"));
                    }

                    Some(values.slice(offset..offset + len))
                }
                None => Some(decode_slice(reader)?),
            }
        } else {
            None
        };

        let deadline = if flags & ENTRY_FLAG_DEADLINE != 0 {
            Some(Deadline::decode_from(reader)?)
        } else {
            None
        };

        let time = Time::decode_from(reader)?;

        Ok((value, deadline, time))
    }
}

impl Reader {
    /// Like [`Reader::iter`], but shares ownership of the reader so the
    /// iterator can outlive the borrow (segment-level iteration).
    #[must_use]
    pub fn iter_owned(self: &std::sync::Arc<Self>) -> OwnedIter {
        OwnedIter {
            reader: self.clone(),
            pos: 0,
            prev_key: None,
        }
    }
}

/// Owning forward iterator over sorted-index entries
pub struct OwnedIter {
    reader: std::sync::Arc<Reader>,
    pos: usize,
    prev_key: Option<Slice>,
}

impl Iterator for OwnedIter {
    type Item = crate::Result<IndexedEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.reader.data.len() - self.reader.entries_start {
            return None;
        }

        let (entry, next_pos) =
            match self
                .reader
                .decode_entry(self.pos, self.prev_key.as_ref(), None)
            {
                Ok(v) => v,
                Err(e) => return Some(Err(e)),
            };

        let indexed = self.reader.indexed(entry, self.pos, next_pos);

        self.prev_key = Some(indexed.entry.key().clone());
        self.pos = next_pos;

        Some(Ok(indexed))
    }
}

/// Forward iterator over sorted-index entries
pub struct Iter<'a> {
    reader: &'a Reader,
    pos: usize,
    prev_key: Option<Slice>,
}

impl Iterator for Iter<'_> {
    type Item = crate::Result<IndexedEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.reader.data.len() - self.reader.entries_start {
            return None;
        }

        let (entry, next_pos) =
            match self
                .reader
                .decode_entry(self.pos, self.prev_key.as_ref(), None)
            {
                Ok(v) => v,
                Err(e) => return Some(Err(e)),
            };

        let indexed = self.reader.indexed(entry, self.pos, next_pos);

        self.prev_key = Some(indexed.entry.key().clone());
        self.pos = next_pos;

        Some(Ok(indexed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn build(
        entries: &[Entry],
        prefix_compression: bool,
        restart_interval: usize,
    ) -> crate::Result<Reader> {
        let mut writer = Writer::new(prefix_compression, restart_interval, false);

        for entry in entries {
            let slot = match entry {
                Entry::Fixed { value, .. } => match value {
                    Value::Put(put) => put
                        .value
                        .clone()
                        .map_or(ValueSlot::None, ValueSlot::Inline),
                    Value::Update(update) => update
                        .value
                        .clone()
                        .map_or(ValueSlot::None, ValueSlot::Inline),
                    _ => ValueSlot::None,
                },
                Entry::Range(_) => ValueSlot::None,
            };

            writer.add(entry, &slot)?;
        }

        Reader::new(writer.finish()?.into(), None)
    }

    fn entries() -> Vec<Entry> {
        vec![
            Entry::fixed(*b"apple", Value::put(*b"1", None, Time::from(1))),
            Entry::fixed(*b"apricot", Value::remove(None, Time::from(2))),
            Entry::Range(RangeEntry::new(
                Slice::from(*b"banana"),
                Slice::from(*b"cherry"),
                None,
                RangeValue::Update(Update {
                    value: Some(Slice::from(*b"u")),
                    deadline: None,
                    time: Time::from(3),
                }),
            )),
            Entry::fixed(*b"damson", Value::put(*b"2", None, Time::from(4))),
            Entry::fixed(*b"date", Value::function(*b"f", Time::from(5))),
        ]
    }

    #[test]
    fn sorted_index_iter_roundtrip() -> crate::Result<()> {
        let entries = entries();
        let reader = build(&entries, false, 1)?;

        assert_eq!(entries.len(), reader.entry_count());

        let decoded: Vec<_> = reader
            .iter()
            .collect::<crate::Result<Vec<_>>>()?
            .into_iter()
            .map(|e| e.entry)
            .collect();

        assert_eq!(entries, decoded);

        Ok(())
    }

    #[test]
    fn sorted_index_iter_roundtrip_prefix_compressed() -> crate::Result<()> {
        let entries = entries();
        let reader = build(&entries, true, 2)?;

        assert!(reader.has_prefix_compression());

        let decoded: Vec<_> = reader
            .iter()
            .collect::<crate::Result<Vec<_>>>()?
            .into_iter()
            .map(|e| e.entry)
            .collect();

        assert_eq!(entries, decoded);

        Ok(())
    }

    #[test]
    fn sorted_index_search_exact_and_missing() -> crate::Result<()> {
        let reader = build(&entries(), false, 1)?;

        let hit = reader
            .search(&Slice::from(*b"damson"), None)?
            .expect("should find key");
        assert_eq!(hit.entry.key(), &Slice::from(*b"damson"));

        assert!(reader.search(&Slice::from(*b"blueberry"), None)?.is_some());
        assert!(reader.search(&Slice::from(*b"cucumber"), None)?.is_none());
        assert!(reader.search(&Slice::from(*b"zucchini"), None)?.is_none());

        Ok(())
    }

    #[test]
    fn sorted_index_search_finds_covering_range() -> crate::Result<()> {
        let reader = build(&entries(), false, 1)?;

        let hit = reader
            .search(&Slice::from(*b"broccoli"), None)?
            .expect("range should cover key");

        assert!(matches!(hit.entry, Entry::Range(_)));

        Ok(())
    }

    #[test]
    fn sorted_index_search_seek_one() -> crate::Result<()> {
        let reader = build(&entries(), false, 1)?;

        let apple = reader
            .search(&Slice::from(*b"apple"), None)?
            .expect("should find key");

        assert!(reader
            .search_seek_one(&Slice::from(*b"apple"), apple.offset, None)?
            .is_some());

        assert!(reader
            .search_seek_one(&Slice::from(*b"apricot"), apple.offset, None)?
            .is_none());

        Ok(())
    }

    #[test]
    fn sorted_index_search_higher_seek_one() -> crate::Result<()> {
        let reader = build(&entries(), false, 1)?;

        let apple = reader
            .search(&Slice::from(*b"apple"), None)?
            .expect("should find key");

        let higher = reader
            .search_higher_seek_one(&Slice::from(*b"apple"), &apple)?
            .expect("should find higher entry");

        assert_eq!(higher.entry.key(), &Slice::from(*b"apricot"));

        Ok(())
    }

    #[test]
    fn sorted_index_last_entry_has_no_next() -> crate::Result<()> {
        let reader = build(&entries(), false, 1)?;

        let last = reader
            .search(&Slice::from(*b"date"), None)?
            .expect("should find key");

        assert!(last.is_last());

        Ok(())
    }

    #[test]
    fn sorted_index_compressed_entry_requires_context() -> crate::Result<()> {
        let entries = entries();
        let reader = build(&entries, true, 100)?;

        // Second entry shares a prefix with the first, so it cannot be
        // decoded standalone
        let first = reader.entry_at(0, None)?;
        let second_offset = first.next_offset.expect("should have successor");

        assert!(reader.entry_at(second_offset, None).is_err());

        // With the full key supplied (copy-key hash hit), it can
        let hit = reader.search_seek_one(
            &Slice::from(*b"apricot"),
            second_offset,
            Some(&Slice::from(*b"apricot")),
        )?;
        assert!(hit.is_some());

        Ok(())
    }
}
