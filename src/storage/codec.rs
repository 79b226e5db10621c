//! Binary settings codec.
//!
//! # File Format
//! ```text
//! int32 (BE)        entry_count            must be > 0
//! repeated entry_count times:
//!   u16 (BE) + mutf8 key
//!   u8              type tag (0=bool 1=int 2=long 3=float 4=string 5=bytes)
//!   payload         1 / 4 / 8 / 4 bytes, u16 + mutf8, or int32 length + raw bytes
//! ```
//!
//! Strings use the modified UTF-8 of Java's `DataOutput.writeUTF`: NUL is
//! written as `C0 80` and characters outside the BMP as two 3-byte encoded
//! surrogates, so files stay readable by either implementation.
//!
//! The whole payload may be wrapped in a zlib stream. Compression is detected
//! on read from the two-byte zlib header, never flagged out-of-band.

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{self, Read, Write};

use crate::error::{Result, SettingsError};
use crate::types::{Store, Value, ValueType};

/// Second header bytes that may follow `0x78` in a zlib stream.
const ZLIB_LEVEL_BYTES: [u8; 4] = [0x01, 0x5E, 0x9C, 0xDA];

/// Longest string that fits the u16 length prefix.
const MAX_STRING_LEN: usize = u16::MAX as usize;

/// Returns true when `bytes` starts with one of the zlib magic pairs.
pub fn is_compressed(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] == 0x78 && ZLIB_LEVEL_BYTES.contains(&bytes[1])
}

// ================================================================================================
// ENCODE
// ================================================================================================

/// Encode a store into the on-disk byte layout.
///
/// Entries are written in key order so identical stores produce identical
/// files.
pub fn encode(store: &Store, compressed: bool) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(32 + store.len() * 16);

    let count = i32::try_from(store.len()).map_err(|_| {
        SettingsError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            "too many settings entries",
        ))
    })?;
    out.write_all(&count.to_be_bytes())?;

    let mut keys: Vec<&String> = store.keys().collect();
    keys.sort();

    for key in keys {
        let value = &store[key];
        write_utf(&mut out, key)?;
        out.write_all(&[value.value_type().tag()])?;

        match value {
            Value::Bool(v) => out.write_all(&[u8::from(*v)])?,
            Value::Int(v) => out.write_all(&v.to_be_bytes())?,
            Value::Long(v) => out.write_all(&v.to_be_bytes())?,
            Value::Float(v) => out.write_all(&v.to_bits().to_be_bytes())?,
            Value::String(v) => write_utf(&mut out, v)?,
            Value::Bytes(v) => {
                let len = i32::try_from(v.len()).map_err(|_| {
                    SettingsError::Io(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "binary value too large",
                    ))
                })?;
                out.write_all(&len.to_be_bytes())?;
                out.write_all(v)?;
            }
        }
    }

    if !compressed {
        return Ok(out);
    }

    let mut encoder = ZlibEncoder::new(Vec::with_capacity(out.len() / 2), Compression::default());
    encoder.write_all(&out)?;
    Ok(encoder.finish()?)
}

fn write_utf<W: Write>(out: &mut W, s: &str) -> Result<()> {
    let bytes = to_modified_utf8(s);
    if bytes.len() > MAX_STRING_LEN {
        return Err(SettingsError::StringTooLong { len: bytes.len() });
    }
    out.write_all(&(bytes.len() as u16).to_be_bytes())?;
    out.write_all(&bytes)?;
    Ok(())
}

fn to_modified_utf8(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len());
    for unit in s.encode_utf16() {
        match unit {
            0x0001..=0x007F => out.push(unit as u8),
            0x0000 | 0x0080..=0x07FF => {
                out.push(0xC0 | (unit >> 6) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
            _ => {
                out.push(0xE0 | (unit >> 12) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
        }
    }
    out
}

fn from_modified_utf8(bytes: &[u8]) -> Result<String> {
    let mut units = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b0 = bytes[i] as u16;
        let (unit, width) = match b0 >> 4 {
            0..=7 => (b0, 1),
            12 | 13 => {
                let b1 = continuation(bytes, i + 1)?;
                (((b0 & 0x1F) << 6) | b1, 2)
            }
            14 => {
                let b1 = continuation(bytes, i + 1)?;
                let b2 = continuation(bytes, i + 2)?;
                (((b0 & 0x0F) << 12) | (b1 << 6) | b2, 3)
            }
            _ => return Err(invalid_data(format!("malformed string byte {:#04x}", b0))),
        };
        units.push(unit);
        i += width;
    }
    String::from_utf16(&units).map_err(|e| invalid_data(format!("invalid string: {}", e)))
}

fn continuation(bytes: &[u8], at: usize) -> Result<u16> {
    match bytes.get(at) {
        Some(&b) if b & 0xC0 == 0x80 => Ok((b & 0x3F) as u16),
        _ => Err(invalid_data("truncated or malformed string".to_string())),
    }
}

// ================================================================================================
// DECODE
// ================================================================================================

/// Decode a settings buffer into a fresh store.
///
/// Corruption shows up as truncated or zeroed buffers, so a zero entry count
/// and any byte left over after the declared entries are both rejected.
pub fn decode(bytes: &[u8]) -> Result<Store> {
    if is_compressed(bytes) {
        decode_from(ZlibDecoder::new(bytes))
    } else {
        decode_from(bytes)
    }
}

fn decode_from<R: Read>(reader: R) -> Result<Store> {
    let mut input = PayloadReader { inner: reader };

    let count = input.read_i32()?;
    if count <= 0 {
        return Err(SettingsError::CorruptHeader { count });
    }

    let mut store = Store::with_capacity(count.min(1024) as usize);
    for _ in 0..count {
        let key = input.read_utf()?;
        let value = match ValueType::from_tag(input.read_u8()?)? {
            ValueType::Bool => Value::Bool(input.read_u8()? != 0),
            ValueType::Int => Value::Int(input.read_i32()?),
            ValueType::Long => Value::Long(input.read_i64()?),
            ValueType::Float => Value::Float(f32::from_bits(input.read_i32()? as u32)),
            ValueType::String => Value::String(input.read_utf()?),
            ValueType::Bytes => {
                let len = input.read_i32()?;
                if len < 0 {
                    return Err(invalid_data(format!("negative binary length {}", len)));
                }
                Value::Bytes(input.read_vec(len as usize)?)
            }
        };
        store.insert(key, value);
    }

    if let Some(byte) = input.next_byte()? {
        return Err(SettingsError::TrailingData { byte });
    }

    Ok(store)
}

fn invalid_data(msg: String) -> SettingsError {
    SettingsError::Io(io::Error::new(io::ErrorKind::InvalidData, msg))
}

/// Big-endian primitive reader over any byte source.
struct PayloadReader<R> {
    inner: R,
}

impl<R: Read> PayloadReader<R> {
    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        self.inner.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_be_bytes(self.read_array()?))
    }

    fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_be_bytes(self.read_array()?))
    }

    fn read_vec(&mut self, len: usize) -> Result<Vec<u8>> {
        // Read through `take` so a bogus length cannot force a huge allocation.
        let mut buf = Vec::new();
        let read = (&mut self.inner).take(len as u64).read_to_end(&mut buf)?;
        if read != len {
            return Err(SettingsError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("expected {} bytes, found {}", len, read),
            )));
        }
        Ok(buf)
    }

    fn read_utf(&mut self) -> Result<String> {
        let len = u16::from_be_bytes(self.read_array()?) as usize;
        let bytes = self.read_vec(len)?;
        from_modified_utf8(&bytes)
    }

    /// Next byte, or `None` at end of input.
    fn next_byte(&mut self) -> Result<Option<u8>> {
        let mut buf = [0u8; 1];
        loop {
            match self.inner.read(&mut buf) {
                Ok(0) => return Ok(None),
                Ok(_) => return Ok(Some(buf[0])),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}
