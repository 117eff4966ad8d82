// THEORY:
// TTV ("tag-type-value") is the compact binary encoding the preprocessing
// parameters end up in, so they can be appended to a model file and read back at
// inference time. A `TtvBox` is an ordered set of records keyed by a one-byte tag.
//
// Wire format (all multi-byte integers and floats are big-endian):
// 1.  **Markers**: the box opens with `tag 0, type 0` and closes with
//     `tag 255, type 255`. Markers carry no value.
// 2.  **Basic types** (`bool` up to `double`): `tag | type | value`, where the value
//     has the fixed width of its type.
// 3.  **Complex types** (string, bytes, nested box): `tag | type | u32 length | bytes`.
// 4.  **Storage**: on disk (or inside a model file) the packed body is preceded by its
//     own length as a big-endian `u32`.
//
// Records are always emitted in ascending tag order, which places the start marker
// first and the end marker last without any special casing.

use crate::core_modules::errors::TtvError;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use tracing::{debug, info};

pub mod type_code {
    pub const START: u8 = 0x00;
    pub const BOOL: u8 = 0x01;
    pub const UINT8: u8 = 0x02;
    pub const INT8: u8 = 0x03;
    pub const UINT16: u8 = 0x04;
    pub const INT16: u8 = 0x05;
    pub const UINT32: u8 = 0x06;
    pub const INT32: u8 = 0x07;
    pub const UINT64: u8 = 0x08;
    pub const INT64: u8 = 0x09;
    pub const FLOAT: u8 = 0x0A;
    pub const DOUBLE: u8 = 0x0B;
    pub const STRING: u8 = 0x20;
    pub const BYTES: u8 = 0x21;
    pub const TTV: u8 = 0x22;
    pub const END: u8 = 0xFF;

    pub const BASIC_MAX: u8 = DOUBLE;
    pub const COMPLEX_MAX: u8 = TTV;
}

pub const START_TAG: u8 = 0x00;
pub const END_TAG: u8 = 0xFF;

/// Width of the length prefix used by complex values and by the storage header.
const LENGTH_PREFIX: usize = std::mem::size_of::<u32>();

/// A single typed value stored under a tag.
#[derive(Debug, Clone, PartialEq)]
pub enum TtvValue {
    Start,
    End,
    Bool(bool),
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    U64(u64),
    I64(i64),
    F32(f32),
    F64(f64),
    String(String),
    Bytes(Vec<u8>),
    /// The packed body of a nested box.
    Box(Vec<u8>),
}

impl TtvValue {
    pub fn type_code(&self) -> u8 {
        use type_code::*;
        match self {
            TtvValue::Start => START,
            TtvValue::End => END,
            TtvValue::Bool(_) => BOOL,
            TtvValue::U8(_) => UINT8,
            TtvValue::I8(_) => INT8,
            TtvValue::U16(_) => UINT16,
            TtvValue::I16(_) => INT16,
            TtvValue::U32(_) => UINT32,
            TtvValue::I32(_) => INT32,
            TtvValue::U64(_) => UINT64,
            TtvValue::I64(_) => INT64,
            TtvValue::F32(_) => FLOAT,
            TtvValue::F64(_) => DOUBLE,
            TtvValue::String(_) => STRING,
            TtvValue::Bytes(_) => BYTES,
            TtvValue::Box(_) => TTV,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            TtvValue::Start => "start",
            TtvValue::End => "end",
            TtvValue::Bool(_) => "bool",
            TtvValue::U8(_) => "uint8",
            TtvValue::I8(_) => "int8",
            TtvValue::U16(_) => "uint16",
            TtvValue::I16(_) => "int16",
            TtvValue::U32(_) => "uint32",
            TtvValue::I32(_) => "int32",
            TtvValue::U64(_) => "uint64",
            TtvValue::I64(_) => "int64",
            TtvValue::F32(_) => "float",
            TtvValue::F64(_) => "double",
            TtvValue::String(_) => "string",
            TtvValue::Bytes(_) => "char*",
            TtvValue::Box(_) => "ttv",
        }
    }

    pub fn is_marker(&self) -> bool {
        matches!(self, TtvValue::Start | TtvValue::End)
    }

    /// Bytes this value occupies after the `tag | type` header.
    fn encoded_len(&self) -> usize {
        match self {
            TtvValue::Start | TtvValue::End => 0,
            TtvValue::Bool(_) | TtvValue::U8(_) | TtvValue::I8(_) => 1,
            TtvValue::U16(_) | TtvValue::I16(_) => 2,
            TtvValue::U32(_) | TtvValue::I32(_) | TtvValue::F32(_) => 4,
            TtvValue::U64(_) | TtvValue::I64(_) | TtvValue::F64(_) => 8,
            TtvValue::String(s) => LENGTH_PREFIX + s.len(),
            TtvValue::Bytes(b) | TtvValue::Box(b) => LENGTH_PREFIX + b.len(),
        }
    }

    fn complex_payload(&self) -> Option<&[u8]> {
        match self {
            TtvValue::String(s) => Some(s.as_bytes()),
            TtvValue::Bytes(b) | TtvValue::Box(b) => Some(b),
            _ => None,
        }
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            TtvValue::Start | TtvValue::End => {}
            TtvValue::Bool(v) => out.push(u8::from(*v)),
            TtvValue::U8(v) => out.push(*v),
            TtvValue::I8(v) => out.extend_from_slice(&v.to_be_bytes()),
            TtvValue::U16(v) => out.extend_from_slice(&v.to_be_bytes()),
            TtvValue::I16(v) => out.extend_from_slice(&v.to_be_bytes()),
            TtvValue::U32(v) => out.extend_from_slice(&v.to_be_bytes()),
            TtvValue::I32(v) => out.extend_from_slice(&v.to_be_bytes()),
            TtvValue::U64(v) => out.extend_from_slice(&v.to_be_bytes()),
            TtvValue::I64(v) => out.extend_from_slice(&v.to_be_bytes()),
            TtvValue::F32(v) => out.extend_from_slice(&v.to_be_bytes()),
            TtvValue::F64(v) => out.extend_from_slice(&v.to_be_bytes()),
            TtvValue::String(_) | TtvValue::Bytes(_) | TtvValue::Box(_) => {
                if let Some(payload) = self.complex_payload() {
                    // `put` guarantees the payload length fits in a u32.
                    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
                    out.extend_from_slice(payload);
                }
            }
        }
    }
}

impl fmt::Display for TtvValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TtvValue::Start => f.write_str("<start>"),
            TtvValue::End => f.write_str("<end>"),
            TtvValue::Bool(v) => write!(f, "{v}"),
            TtvValue::U8(v) => write!(f, "{v}"),
            TtvValue::I8(v) => write!(f, "{v}"),
            TtvValue::U16(v) => write!(f, "{v}"),
            TtvValue::I16(v) => write!(f, "{v}"),
            TtvValue::U32(v) => write!(f, "{v}"),
            TtvValue::I32(v) => write!(f, "{v}"),
            TtvValue::U64(v) => write!(f, "{v}"),
            TtvValue::I64(v) => write!(f, "{v}"),
            TtvValue::F32(v) => write!(f, "{v:?}"),
            TtvValue::F64(v) => write!(f, "{v:?}"),
            TtvValue::String(v) => f.write_str(v),
            TtvValue::Bytes(v) => write!(f, "{}", String::from_utf8_lossy(v)),
            TtvValue::Box(v) => write!(f, "<box of {} bytes>", v.len()),
        }
    }
}

/// Generates a typed getter for a fixed-width variant.
macro_rules! numeric_getter {
    ($name:ident, $variant:ident, $ty:ty, $expected:literal) => {
        pub fn $name(&self, tag: u8) -> Result<$ty, TtvError> {
            match self.lookup(tag)? {
                TtvValue::$variant(v) => Ok(*v),
                other => Err(TtvError::TypeMismatch {
                    tag,
                    expected: $expected,
                    found: other.type_name(),
                }),
            }
        }
    };
}

/// An ordered collection of tagged values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TtvBox {
    values: BTreeMap<u8, TtvValue>,
}

impl TtvBox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` under `tag`. Tags 0 and 255 are reserved for the markers.
    pub fn put(&mut self, tag: u8, value: TtvValue) -> Result<(), TtvError> {
        if value.is_marker() {
            return Err(TtvError::MisplacedMarker(tag));
        }
        if tag == START_TAG || tag == END_TAG {
            return Err(TtvError::TagOutOfRange(i64::from(tag)));
        }
        if let Some(payload) = value.complex_payload() {
            if u32::try_from(payload.len()).is_err() {
                return Err(TtvError::LengthMismatch {
                    declared: payload.len(),
                    actual: u32::MAX as usize,
                });
            }
        }
        self.insert(tag, value)
    }

    /// Adds the start and end markers that delimit a box.
    pub fn put_start_end_markers(&mut self) -> Result<(), TtvError> {
        self.insert(START_TAG, TtvValue::Start)?;
        self.insert(END_TAG, TtvValue::End)
    }

    /// Stores another box, packed, under `tag`.
    pub fn put_box(&mut self, tag: u8, nested: &TtvBox) -> Result<(), TtvError> {
        self.put(tag, TtvValue::Box(nested.pack()))
    }

    fn insert(&mut self, tag: u8, value: TtvValue) -> Result<(), TtvError> {
        if self.values.contains_key(&tag) {
            return Err(TtvError::DuplicateTag(tag));
        }
        self.values.insert(tag, value);
        Ok(())
    }

    pub fn get(&self, tag: u8) -> Option<&TtvValue> {
        self.values.get(&tag)
    }

    fn lookup(&self, tag: u8) -> Result<&TtvValue, TtvError> {
        self.values.get(&tag).ok_or(TtvError::TagNotFound(tag))
    }

    numeric_getter!(get_bool, Bool, bool, "bool");
    numeric_getter!(get_u8, U8, u8, "uint8");
    numeric_getter!(get_i8, I8, i8, "int8");
    numeric_getter!(get_u16, U16, u16, "uint16");
    numeric_getter!(get_i16, I16, i16, "int16");
    numeric_getter!(get_u32, U32, u32, "uint32");
    numeric_getter!(get_i32, I32, i32, "int32");
    numeric_getter!(get_u64, U64, u64, "uint64");
    numeric_getter!(get_i64, I64, i64, "int64");
    numeric_getter!(get_f32, F32, f32, "float");
    numeric_getter!(get_f64, F64, f64, "double");

    pub fn get_string(&self, tag: u8) -> Result<&str, TtvError> {
        match self.lookup(tag)? {
            TtvValue::String(v) => Ok(v),
            other => Err(TtvError::TypeMismatch {
                tag,
                expected: "string",
                found: other.type_name(),
            }),
        }
    }

    pub fn get_bytes(&self, tag: u8) -> Result<&[u8], TtvError> {
        match self.lookup(tag)? {
            TtvValue::Bytes(v) => Ok(v),
            other => Err(TtvError::TypeMismatch {
                tag,
                expected: "char*",
                found: other.type_name(),
            }),
        }
    }

    /// Unpacks the nested box stored under `tag`.
    pub fn get_box(&self, tag: u8) -> Result<TtvBox, TtvError> {
        match self.lookup(tag)? {
            TtvValue::Box(packed) => TtvBox::unpack(packed),
            other => Err(TtvError::TypeMismatch {
                tag,
                expected: "ttv",
                found: other.type_name(),
            }),
        }
    }

    /// All tags in ascending order, markers included.
    pub fn tags(&self) -> Vec<u8> {
        self.values.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u8, &TtvValue)> {
        self.values.iter().map(|(tag, value)| (*tag, value))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Size of the packed body, without the storage length prefix.
    pub fn packed_len(&self) -> usize {
        self.values.values().map(|v| 2 + v.encoded_len()).sum()
    }

    /// Size of the packed body plus the storage length prefix.
    pub fn storage_len(&self) -> usize {
        LENGTH_PREFIX + self.packed_len()
    }

    /// Encodes every record in tag order.
    pub fn pack(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.packed_len());
        for (tag, value) in &self.values {
            out.push(*tag);
            out.push(value.type_code());
            value.encode_into(&mut out);
        }
        out
    }

    /// Decodes a packed body produced by [`TtvBox::pack`].
    pub fn unpack(buffer: &[u8]) -> Result<Self, TtvError> {
        let mut reader = Reader::new(buffer);
        let mut ttv_box = TtvBox::new();

        while !reader.is_done() {
            let tag = reader.take(1)?[0];
            let code = reader.take(1)?[0];

            let value = match (tag, code) {
                (START_TAG, type_code::START) => TtvValue::Start,
                (END_TAG, type_code::END) => TtvValue::End,
                _ => decode_value(code, &mut reader)?,
            };
            ttv_box.insert(tag, value)?;
        }

        debug!(records = ttv_box.len(), bytes = buffer.len(), "unpacked ttv box");
        Ok(ttv_box)
    }

    /// Packs the box behind a big-endian `u32` length prefix.
    pub fn to_storage_bytes(&self) -> Vec<u8> {
        let body = self.pack();
        let mut out = Vec::with_capacity(LENGTH_PREFIX + body.len());
        out.extend_from_slice(&(body.len() as u32).to_be_bytes());
        out.extend_from_slice(&body);
        out
    }

    /// Decodes a length-prefixed box from the start of `buffer`. Bytes after the
    /// declared body are ignored, so a box can be read out of a larger model file.
    pub fn from_storage_bytes(buffer: &[u8]) -> Result<Self, TtvError> {
        let (declared, body) = split_storage(buffer)?;
        if body.len() < declared {
            return Err(TtvError::LengthMismatch {
                declared,
                actual: body.len(),
            });
        }
        Self::unpack(&body[..declared])
    }

    /// Writes the length-prefixed box to `path`.
    pub fn write_file(&self, path: impl AsRef<Path>) -> Result<usize, TtvError> {
        let path = path.as_ref();
        let bytes = self.to_storage_bytes();
        std::fs::write(path, &bytes).map_err(|source| TtvError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), bytes = self.packed_len(), "serialized ttv box");
        Ok(bytes.len())
    }

    /// Reads a box written by [`TtvBox::write_file`]. The file must hold exactly one box.
    pub fn read_file(path: impl AsRef<Path>) -> Result<Self, TtvError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| TtvError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let (declared, body) = split_storage(&bytes)?;
        if body.len() != declared {
            return Err(TtvError::LengthMismatch {
                declared,
                actual: body.len(),
            });
        }
        info!(path = %path.display(), bytes = declared, "read ttv box");
        Self::unpack(body)
    }

    /// Builds a box from `tag type value [name]` lines, adding the start and end markers.
    pub fn parse_str(text: &str) -> Result<Self, TtvError> {
        let mut ttv_box = TtvBox::new();
        ttv_box.put_start_end_markers()?;

        for (index, line) in text.lines().enumerate() {
            let line_no = index + 1;
            if line.trim().is_empty() {
                continue;
            }

            let mut words = line.split_whitespace();
            let (Some(tag), Some(type_name), Some(value)) = (words.next(), words.next(), words.next()) else {
                return Err(TtvError::MalformedLine {
                    line: line_no,
                    content: line.to_string(),
                });
            };

            let tag: i64 = tag.parse().map_err(|_| TtvError::InvalidValue {
                line: line_no,
                type_name: "tag".to_string(),
                value: tag.to_string(),
            })?;
            let tag = u8::try_from(tag)
                .ok()
                .filter(|t| *t != START_TAG && *t != END_TAG)
                .ok_or(TtvError::TagOutOfRange(tag))?;

            let value = parse_value(type_name, value, line_no)?;
            ttv_box.put(tag, value)?;
        }

        Ok(ttv_box)
    }

    /// Reads and parses a text configuration file.
    pub fn parse_file(path: impl AsRef<Path>) -> Result<Self, TtvError> {
        let path = path.as_ref();
        info!(path = %path.display(), "parsing ttv text file");
        let text = std::fs::read_to_string(path).map_err(|source| TtvError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse_str(&text)
    }

    /// Emits one log event per record.
    pub fn log_values(&self) {
        for (tag, value) in self.iter() {
            match value {
                TtvValue::Start => info!("Start parsing ttv box..."),
                TtvValue::End => info!("Finish parsing ttv box..."),
                _ => info!(tag = %format!("0x{tag:X}"), kind = value.type_name(), %value, "ttv value"),
            }
        }
    }
}

fn parse_value(type_name: &str, raw: &str, line: usize) -> Result<TtvValue, TtvError> {
    let invalid = || TtvError::InvalidValue {
        line,
        type_name: type_name.to_string(),
        value: raw.to_string(),
    };

    let value = match type_name {
        "bool" => match raw {
            "true" | "1" => TtvValue::Bool(true),
            "false" | "0" => TtvValue::Bool(false),
            _ => return Err(invalid()),
        },
        "uint8" => TtvValue::U8(raw.parse().map_err(|_| invalid())?),
        "int8" => TtvValue::I8(raw.parse().map_err(|_| invalid())?),
        "uint16" => TtvValue::U16(raw.parse().map_err(|_| invalid())?),
        "int16" => TtvValue::I16(raw.parse().map_err(|_| invalid())?),
        "uint32" => TtvValue::U32(raw.parse().map_err(|_| invalid())?),
        "int32" => TtvValue::I32(raw.parse().map_err(|_| invalid())?),
        "uint64" => TtvValue::U64(raw.parse().map_err(|_| invalid())?),
        "int64" => TtvValue::I64(raw.parse().map_err(|_| invalid())?),
        "float" => TtvValue::F32(raw.parse().map_err(|_| invalid())?),
        "double" => TtvValue::F64(raw.parse().map_err(|_| invalid())?),
        "string" => TtvValue::String(raw.to_string()),
        "char*" => TtvValue::Bytes(raw.as_bytes().to_vec()),
        other => return Err(TtvError::UnsupportedType(other.to_string())),
    };
    Ok(value)
}

fn decode_value(code: u8, reader: &mut Reader<'_>) -> Result<TtvValue, TtvError> {
    use type_code::*;

    let value = match code {
        BOOL => TtvValue::Bool(reader.take(1)?[0] != 0),
        UINT8 => TtvValue::U8(reader.take(1)?[0]),
        INT8 => TtvValue::I8(i8::from_be_bytes(reader.array()?)),
        UINT16 => TtvValue::U16(u16::from_be_bytes(reader.array()?)),
        INT16 => TtvValue::I16(i16::from_be_bytes(reader.array()?)),
        UINT32 => TtvValue::U32(u32::from_be_bytes(reader.array()?)),
        INT32 => TtvValue::I32(i32::from_be_bytes(reader.array()?)),
        UINT64 => TtvValue::U64(u64::from_be_bytes(reader.array()?)),
        INT64 => TtvValue::I64(i64::from_be_bytes(reader.array()?)),
        FLOAT => TtvValue::F32(f32::from_be_bytes(reader.array()?)),
        DOUBLE => TtvValue::F64(f64::from_be_bytes(reader.array()?)),
        STRING | BYTES | TTV => {
            let len = u32::from_be_bytes(reader.array()?) as usize;
            let payload = reader.take(len)?.to_vec();
            match code {
                STRING => TtvValue::String(
                    String::from_utf8(payload).map_err(|e| TtvError::UnsupportedType(format!("non UTF-8 string: {e}")))?,
                ),
                BYTES => TtvValue::Bytes(payload),
                _ => TtvValue::Box(payload),
            }
        }
        other => return Err(TtvError::UnsupportedType(format!("type code 0x{other:02X}"))),
    };
    Ok(value)
}

fn split_storage(buffer: &[u8]) -> Result<(usize, &[u8]), TtvError> {
    let mut reader = Reader::new(buffer);
    let declared = u32::from_be_bytes(reader.array()?) as usize;
    Ok((declared, reader.rest()))
}

/// Bounds-checked cursor over a byte slice.
struct Reader<'a> {
    buffer: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(buffer: &'a [u8]) -> Self {
        Self { buffer, offset: 0 }
    }

    fn is_done(&self) -> bool {
        self.offset >= self.buffer.len()
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], TtvError> {
        let remaining = self.buffer.len() - self.offset;
        if remaining < len {
            return Err(TtvError::Truncated {
                offset: self.offset,
                needed: len - remaining,
            });
        }
        let slice = &self.buffer[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], TtvError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn rest(&self) -> &'a [u8] {
        &self.buffer[self.offset..]
    }
}
