// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    coding::{decode_slice, encode_slice, Decode, Encode},
    deadline::Deadline,
    key_range::MaxKey,
    time::Time,
    Slice,
};
use byteorder::{ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};
use varint_rs::{VarintReader, VarintWriter};

pub const TAG_PUT: u8 = 1;
pub const TAG_REMOVE: u8 = 2;
pub const TAG_UPDATE: u8 = 3;
pub const TAG_FUNCTION: u8 = 4;
pub const TAG_PENDING_APPLY: u8 = 5;
pub const TAG_RANGE: u8 = 6;

/// The key is present with `value` until `deadline`
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Put {
    pub value: Option<Slice>,
    pub deadline: Option<Deadline>,
    pub time: Time,
}

impl Put {
    /// Returns `true` if the deadline has not passed.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.deadline.is_none_or(|d| !d.is_overdue())
    }
}

/// Deletes the key; with a deadline, a tombstone that fires later
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Remove {
    pub deadline: Option<Deadline>,
    pub time: Time,
}

/// Overwrites the value if the key exists in a lower level
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Update {
    pub value: Option<Slice>,
    pub deadline: Option<Deadline>,
    pub time: Time,
}

/// Applies a registered function to the effective lower-level value
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Function {
    pub function_id: Slice,
    pub time: Time,
}

/// A deferred merge chain, stashed because the effective older value is not
/// locally known
///
/// `applies` is non-empty and ordered oldest first.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PendingApply {
    pub applies: Vec<Apply>,
}

impl PendingApply {
    /// Builds a pending chain; panics if `applies` is empty.
    #[must_use]
    pub fn new(applies: Vec<Apply>) -> Self {
        assert!(!applies.is_empty(), "pending apply chain may not be empty");
        Self { applies }
    }

    /// The chain's time is the newest apply's time.
    #[must_use]
    pub fn time(&self) -> &Time {
        #[allow(clippy::expect_used)]
        self.applies.last().expect("chain is non-empty").time()
    }
}

/// A mutation that can be deferred inside a [`PendingApply`] chain
///
/// Put is excluded: a Put resolves immediately and never needs deferring.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Apply {
    Remove(Remove),
    Update(Update),
    Function(Function),
}

impl Apply {
    #[must_use]
    pub fn time(&self) -> &Time {
        match self {
            Self::Remove(v) => &v.time,
            Self::Update(v) => &v.time,
            Self::Function(v) => &v.time,
        }
    }

    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Remove(v) => Value::Remove(v.clone()),
            Self::Update(v) => Value::Update(v.clone()),
            Self::Function(v) => Value::Function(v.clone()),
        }
    }
}

/// A stored versioned value at a fixed key
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Value {
    Put(Put),
    Remove(Remove),
    Update(Update),
    Function(Function),
    PendingApply(PendingApply),
}

impl Value {
    #[must_use]
    pub fn put<V: Into<Slice>>(value: V, deadline: Option<Deadline>, time: Time) -> Self {
        Self::Put(Put {
            value: Some(value.into()),
            deadline,
            time,
        })
    }

    #[must_use]
    pub fn remove(deadline: Option<Deadline>, time: Time) -> Self {
        Self::Remove(Remove { deadline, time })
    }

    #[must_use]
    pub fn update<V: Into<Slice>>(value: V, deadline: Option<Deadline>, time: Time) -> Self {
        Self::Update(Update {
            value: Some(value.into()),
            deadline,
            time,
        })
    }

    #[must_use]
    pub fn function<I: Into<Slice>>(function_id: I, time: Time) -> Self {
        Self::Function(Function {
            function_id: function_id.into(),
            time,
        })
    }

    /// The mutation's time, used as the merge tie-breaker.
    #[must_use]
    pub fn time(&self) -> &Time {
        match self {
            Self::Put(v) => &v.time,
            Self::Remove(v) => &v.time,
            Self::Update(v) => &v.time,
            Self::Function(v) => &v.time,
            Self::PendingApply(v) => v.time(),
        }
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Deadline> {
        match self {
            Self::Put(v) => v.deadline,
            Self::Remove(v) => v.deadline,
            Self::Update(v) => v.deadline,
            Self::Function(_) | Self::PendingApply(_) => None,
        }
    }

    /// Returns `true` for a Put whose deadline has not passed.
    #[must_use]
    pub fn is_live_put(&self) -> bool {
        matches!(self, Self::Put(put) if put.is_alive())
    }

    /// Converts into an [`Apply`]; `None` for Put and PendingApply.
    #[must_use]
    pub fn to_apply(&self) -> Option<Apply> {
        match self {
            Self::Remove(v) => Some(Apply::Remove(v.clone())),
            Self::Update(v) => Some(Apply::Update(v.clone())),
            Self::Function(v) => Some(Apply::Function(v.clone())),
            Self::Put(_) | Self::PendingApply(_) => None,
        }
    }

    /// Flattens into the applies it contributes to a pending chain.
    ///
    /// A PendingApply contributes its whole chain; Put contributes nothing.
    #[must_use]
    pub fn to_applies(&self) -> Vec<Apply> {
        match self {
            Self::PendingApply(pending) => pending.applies.clone(),
            other => other.to_apply().into_iter().collect(),
        }
    }
}

/// A value applied to every key of a range interval
///
/// Put is excluded: a range cannot assert presence for keys it does not know.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RangeValue {
    Remove(Remove),
    Update(Update),
    Function(Function),
    PendingApply(PendingApply),
}

impl RangeValue {
    #[must_use]
    pub fn time(&self) -> &Time {
        match self {
            Self::Remove(v) => &v.time,
            Self::Update(v) => &v.time,
            Self::Function(v) => &v.time,
            Self::PendingApply(v) => v.time(),
        }
    }

    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Remove(v) => Value::Remove(v.clone()),
            Self::Update(v) => Value::Update(v.clone()),
            Self::Function(v) => Value::Function(v.clone()),
            Self::PendingApply(v) => Value::PendingApply(v.clone()),
        }
    }

    /// Converts a fixed value into a range value; `None` for Put.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Remove(v) => Some(Self::Remove(v.clone())),
            Value::Update(v) => Some(Self::Update(v.clone())),
            Value::Function(v) => Some(Self::Function(v.clone())),
            Value::PendingApply(v) => Some(Self::PendingApply(v.clone())),
            Value::Put(_) => None,
        }
    }
}

/// A bulk mutation over the interval `[from_key, to_key)`
///
/// `from_value`, if present, is the already-merged fixed value sitting exactly
/// at `from_key`. Splitting carries it into the left piece only.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RangeEntry {
    pub from_key: Slice,
    pub to_key: Slice,
    pub from_value: Option<Value>,
    pub range_value: RangeValue,
}

impl RangeEntry {
    /// Builds a range entry; panics unless `from_key < to_key`.
    #[must_use]
    pub fn new(
        from_key: Slice,
        to_key: Slice,
        from_value: Option<Value>,
        range_value: RangeValue,
    ) -> Self {
        assert!(from_key < to_key, "range from_key must be below to_key");

        Self {
            from_key,
            to_key,
            from_value,
            range_value,
        }
    }

    /// Returns `true` if the key lies within `[from_key, to_key)`.
    #[must_use]
    pub fn contains_key(&self, key: &[u8]) -> bool {
        key >= &*self.from_key && key < &*self.to_key
    }

    /// Splits at `at`, carrying `from_value` into the left piece only.
    ///
    /// Panics unless `from_key < at < to_key`.
    #[must_use]
    pub fn split(self, at: &Slice) -> (Self, Self) {
        assert!(
            *at > self.from_key && *at < self.to_key,
            "split point must lie strictly inside the range",
        );

        let left = Self {
            from_key: self.from_key,
            to_key: at.clone(),
            from_value: self.from_value,
            range_value: self.range_value.clone(),
        };

        let right = Self {
            from_key: at.clone(),
            to_key: self.to_key,
            from_value: None,
            range_value: self.range_value,
        };

        (left, right)
    }

    /// The effective stored value for `key` inside this range.
    ///
    /// At `from_key` with a from value present, that value; everywhere else the
    /// range value, pending over whatever lives below.
    #[must_use]
    pub fn value_at(&self, key: &[u8]) -> Value {
        if key == &*self.from_key {
            if let Some(from_value) = &self.from_value {
                return from_value.clone();
            }
        }

        self.range_value.to_value()
    }
}

/// One stored entry of a level: a fixed key-value or a range
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Entry {
    Fixed { key: Slice, value: Value },
    Range(RangeEntry),
}

impl Entry {
    #[must_use]
    pub fn fixed<K: Into<Slice>>(key: K, value: Value) -> Self {
        Self::Fixed {
            key: key.into(),
            value,
        }
    }

    /// The entry's ordering key (`from_key` for ranges).
    #[must_use]
    pub fn key(&self) -> &Slice {
        match self {
            Self::Fixed { key, .. } => key,
            Self::Range(range) => &range.from_key,
        }
    }

    /// The entry's upper bound.
    #[must_use]
    pub fn max_key(&self) -> MaxKey {
        match self {
            Self::Fixed { key, .. } => MaxKey::Fixed(key.clone()),
            Self::Range(range) => MaxKey::Range(range.to_key.clone()),
        }
    }

    #[must_use]
    pub fn is_range(&self) -> bool {
        matches!(self, Self::Range(_))
    }

    /// Returns `true` if this entry can produce a live Put for user reads.
    #[must_use]
    pub fn has_put(&self) -> bool {
        match self {
            Self::Fixed { value, .. } => matches!(value, Value::Put(_)),
            Self::Range(range) => matches!(range.from_value, Some(Value::Put(_))),
        }
    }
}

impl Encode for Value {
    fn encode_into<W: Write>(&self, writer: &mut W) -> crate::Result<()> {
        match self {
            Self::Put(put) => {
                writer.write_u8(TAG_PUT)?;
                encode_fields(writer, put.value.as_ref(), put.deadline, &put.time)
            }
            Self::Remove(remove) => {
                writer.write_u8(TAG_REMOVE)?;
                encode_fields(writer, None, remove.deadline, &remove.time)
            }
            Self::Update(update) => {
                writer.write_u8(TAG_UPDATE)?;
                encode_fields(writer, update.value.as_ref(), update.deadline, &update.time)
            }
            Self::Function(function) => {
                writer.write_u8(TAG_FUNCTION)?;
                encode_slice(writer, &function.function_id)?;
                function.time.encode_into(writer)
            }
            Self::PendingApply(pending) => {
                writer.write_u8(TAG_PENDING_APPLY)?;

                #[allow(clippy::cast_possible_truncation)]
                writer.write_u32_varint(pending.applies.len() as u32)?;

                for apply in &pending.applies {
                    apply.to_value().encode_into(writer)?;
                }
                Ok(())
            }
        }
    }
}

impl Decode for Value {
    fn decode_from<R: Read>(reader: &mut R) -> crate::Result<Self> {
        let tag = reader.read_u8()?;

        match tag {
            TAG_PUT => {
                let (value, deadline, time) = decode_fields(reader)?;
                Ok(Self::Put(Put {
                    value,
                    deadline,
                    time,
                }))
            }
            TAG_REMOVE => {
                let (_, deadline, time) = decode_fields(reader)?;
                Ok(Self::Remove(Remove { deadline, time }))
            }
            TAG_UPDATE => {
                let (value, deadline, time) = decode_fields(reader)?;
                Ok(Self::Update(Update {
                    value,
                    deadline,
                    time,
                }))
            }
            TAG_FUNCTION => {
                let function_id = decode_slice(reader)?;
                let time = Time::decode_from(reader)?;
                Ok(Self::Function(Function { function_id, time }))
            }
            TAG_PENDING_APPLY => {
                let count = reader.read_u32_varint()? as usize;

                if count == 0 {
                    return Err(crate::Error::Corruption("empty pending apply chain"));
                }

                let mut applies = Vec::with_capacity(count);

                for _ in 0..count {
                    let apply = Self::decode_from(reader)?
                        .to_apply()
                        .ok_or(crate::Error::Corruption("pending chain held a put"))?;
                    applies.push(apply);
                }

                Ok(Self::PendingApply(PendingApply { applies }))
            }
            tag => Err(crate::Error::InvalidTag(("Value", tag))),
        }
    }
}

const FLAG_VALUE: u8 = 1;
const FLAG_DEADLINE: u8 = 1 << 1;

fn encode_fields<W: Write>(
    writer: &mut W,
    value: Option<&Slice>,
    deadline: Option<Deadline>,
    time: &Time,
) -> crate::Result<()> {
    let mut flags = 0;
    if value.is_some() {
        flags |= FLAG_VALUE;
    }
    if deadline.is_some() {
        flags |= FLAG_DEADLINE;
    }
    writer.write_u8(flags)?;

    if let Some(value) = value {
        encode_slice(writer, value)?;
    }
    if let Some(deadline) = deadline {
        deadline.encode_into(writer)?;
    }

    time.encode_into(writer)
}

#[allow(clippy::type_complexity)]
fn decode_fields<R: Read>(
    reader: &mut R,
) -> crate::Result<(Option<Slice>, Option<Deadline>, Time)> {
    let flags = reader.read_u8()?;

    let value = if flags & FLAG_VALUE != 0 {
        Some(decode_slice(reader)?)
    } else {
        None
    };

    let deadline = if flags & FLAG_DEADLINE != 0 {
        Some(Deadline::decode_from(reader)?)
    } else {
        None
    };

    let time = Time::decode_from(reader)?;

    Ok((value, deadline, time))
}

impl Encode for RangeValue {
    fn encode_into<W: Write>(&self, writer: &mut W) -> crate::Result<()> {
        self.to_value().encode_into(writer)
    }
}

impl Decode for RangeValue {
    fn decode_from<R: Read>(reader: &mut R) -> crate::Result<Self> {
        let value = Value::decode_from(reader)?;
        Self::from_value(&value).ok_or(crate::Error::Corruption("range value was a put"))
    }
}
