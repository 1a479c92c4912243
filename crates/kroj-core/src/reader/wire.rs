//! Low-level protobuf wire format reading.
//!
//! Descriptor containers are themselves protobuf messages, so the reader
//! walks them as a flat sequence of tag/value records per nesting level.
//!
//! ## Wire Format Overview
//!
//! Each protobuf field is encoded as:
//! - A varint "tag" containing the field number and wire type
//! - The field data (format depends on wire type)
//!
//! Wire types:
//! - 0: VARINT (int32, int64, uint32, uint64, sint32, sint64, bool, enum)
//! - 1: I64 (fixed64, sfixed64, double)
//! - 2: LEN (string, bytes, embedded messages, packed repeated fields)
//! - 3/4: SGROUP/EGROUP (deprecated groups)
//! - 5: I32 (fixed32, sfixed32, float)

use crate::error::{Error, Result};
use crate::MAX_FIELD_NUMBER;

/// Protobuf wire types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WireType {
    /// Variable-length integer
    Varint = 0,
    /// 64-bit fixed-width
    I64 = 1,
    /// Length-delimited (strings, bytes, embedded messages)
    Len = 2,
    /// Start group (deprecated)
    StartGroup = 3,
    /// End group (deprecated)
    EndGroup = 4,
    /// 32-bit fixed-width
    I32 = 5,
}

impl WireType {
    fn from_tag(tag: u64, offset: usize) -> Result<Self> {
        match tag & 0x07 {
            0 => Ok(WireType::Varint),
            1 => Ok(WireType::I64),
            2 => Ok(WireType::Len),
            3 => Ok(WireType::StartGroup),
            4 => Ok(WireType::EndGroup),
            5 => Ok(WireType::I32),
            other => Err(Error::malformed(
                offset,
                format!("unknown wire type: {}", other),
            )),
        }
    }
}

/// Decode a varint from the given bytes.
///
/// Returns the decoded value and the number of bytes consumed, or `None`
/// if the buffer ends mid-varint or the varint exceeds 10 bytes.
pub fn decode_varint(data: &[u8]) -> Option<(u64, usize)> {
    let mut result: u64 = 0;
    let mut shift = 0;

    for (i, &byte) in data.iter().enumerate() {
        if i >= 10 {
            // Varints are at most 10 bytes for a 64-bit value
            return None;
        }

        result |= ((byte & 0x7F) as u64) << shift;
        shift += 7;

        if byte & 0x80 == 0 {
            return Some((result, i + 1));
        }
    }

    None
}

/// A decoded field value.
///
/// Length-delimited payloads borrow from the container and remember their
/// absolute offset so nested readers can report precise positions. No
/// descriptor field uses a fixed-width encoding, so those are skipped.
#[derive(Debug, Clone, Copy)]
pub(crate) enum WireValue<'a> {
    Varint(u64),
    I64,
    Len { bytes: &'a [u8], offset: usize },
    I32,
    Group,
}

impl WireValue<'_> {
    pub(crate) fn wire_type(&self) -> WireType {
        match self {
            WireValue::Varint(_) => WireType::Varint,
            WireValue::I64 => WireType::I64,
            WireValue::Len { .. } => WireType::Len,
            WireValue::I32 => WireType::I32,
            WireValue::Group => WireType::StartGroup,
        }
    }
}

/// Sequential reader over the records of one message level
#[derive(Debug)]
pub(crate) struct WireReader<'a> {
    data: &'a [u8],
    position: usize,
    base: usize,
}

enum Record<'a> {
    Field(u32, WireValue<'a>),
    StartGroup(u32),
    EndGroup(u32),
}

impl<'a> WireReader<'a> {
    /// Reader over a top-level buffer
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self::at(data, 0)
    }

    /// Reader over a nested payload that starts at `base` in the container
    pub(crate) fn at(data: &'a [u8], base: usize) -> Self {
        Self {
            data,
            position: 0,
            base,
        }
    }

    /// Absolute offset of the next unread byte
    pub(crate) fn offset(&self) -> usize {
        self.base + self.position
    }

    fn read_varint(&mut self, what: &str) -> Result<u64> {
        let start = self.offset();
        let (value, len) = decode_varint(&self.data[self.position..])
            .ok_or_else(|| Error::malformed(start, format!("failed to decode {}", what)))?;
        self.position += len;
        Ok(value)
    }

    fn take(&mut self, len: usize, what: &str) -> Result<(&'a [u8], usize)> {
        let start = self.offset();
        let remaining = self.data.len() - self.position;
        if len > remaining {
            return Err(Error::malformed(
                start,
                format!(
                    "not enough bytes for {} (need {}, have {})",
                    what, len, remaining
                ),
            ));
        }
        let bytes = &self.data[self.position..self.position + len];
        self.position += len;
        Ok((bytes, start))
    }

    fn next_record(&mut self) -> Result<Option<Record<'a>>> {
        if self.position >= self.data.len() {
            return Ok(None);
        }

        let tag_offset = self.offset();
        let tag = self.read_varint("field tag")?;
        let wire_type = WireType::from_tag(tag, tag_offset)?;
        let number = tag >> 3;

        if number == 0 || number > MAX_FIELD_NUMBER as u64 {
            return Err(Error::malformed(
                tag_offset,
                format!("invalid field number {} in tag", number),
            ));
        }
        let number = number as u32;

        let value = match wire_type {
            WireType::Varint => WireValue::Varint(self.read_varint("varint value")?),
            WireType::I64 => {
                self.take(8, "I64")?;
                WireValue::I64
            }
            WireType::Len => {
                let length = self.read_varint("length prefix")?;
                let length = usize::try_from(length).map_err(|_| {
                    Error::malformed(tag_offset, "length prefix does not fit in memory")
                })?;
                let (bytes, offset) = self.take(length, "LEN field")?;
                WireValue::Len { bytes, offset }
            }
            WireType::I32 => {
                self.take(4, "I32")?;
                WireValue::I32
            }
            WireType::StartGroup => return Ok(Some(Record::StartGroup(number))),
            WireType::EndGroup => return Ok(Some(Record::EndGroup(number))),
        };

        Ok(Some(Record::Field(number, value)))
    }

    /// Consumes records up to the end tag of group `number`.
    ///
    /// Nested groups are tracked on an explicit stack, so nesting depth is
    /// bounded by the input size rather than the call stack.
    fn skip_group(&mut self, number: u32, start: usize) -> Result<()> {
        let mut open = vec![number];
        while let Some(&innermost) = open.last() {
            match self.next_record()? {
                None => {
                    return Err(Error::malformed(
                        start,
                        format!("group {} is never closed", innermost),
                    ))
                }
                Some(Record::StartGroup(nested)) => open.push(nested),
                Some(Record::EndGroup(end)) if end == innermost => {
                    open.pop();
                }
                Some(Record::EndGroup(end)) => {
                    return Err(Error::malformed(
                        self.offset(),
                        format!("group {} closed by end tag {}", innermost, end),
                    ))
                }
                Some(Record::Field(..)) => {}
            }
        }
        Ok(())
    }

    /// Reads the next field at this level.
    ///
    /// Returns `Ok(None)` once the level is exhausted. Groups are consumed
    /// whole and reported as [`WireValue::Group`].
    pub(crate) fn next_field(&mut self) -> Result<Option<(u32, WireValue<'a>)>> {
        let start = self.offset();
        match self.next_record()? {
            None => Ok(None),
            Some(Record::Field(number, value)) => Ok(Some((number, value))),
            Some(Record::StartGroup(number)) => {
                self.skip_group(number, start)?;
                Ok(Some((number, WireValue::Group)))
            }
            Some(Record::EndGroup(number)) => Err(Error::malformed(
                self.offset(),
                format!("unexpected end of group {}", number),
            )),
        }
    }
}

/// Decodes the varints of a packed repeated payload
pub(crate) fn packed_varints(bytes: &[u8], base: usize) -> Result<Vec<u64>> {
    let mut values = Vec::new();
    let mut position = 0;
    while position < bytes.len() {
        let (value, len) = decode_varint(&bytes[position..]).ok_or_else(|| {
            Error::malformed(base + position, "failed to decode packed varint")
        })?;
        values.push(value);
        position += len;
    }
    Ok(values)
}
