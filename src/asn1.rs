use std::io::Cursor;

use byteorder::ReadBytesExt;

use crate::error::CodecError;

pub const TAG_BOOLEAN: u8 = 0x01;
pub const TAG_INTEGER: u8 = 0x02;
pub const TAG_OCTET_STRING: u8 = 0x04;
pub const TAG_ENUMERATED: u8 = 0x0a;
pub const TAG_SEQUENCE: u8 = 0x30;
pub const TAG_SET: u8 = 0x31;

/// Long-form lengths wider than this are rejected.
const MAX_LENGTH_OCTETS: usize = 4;

pub fn read_tag(cursor: &mut Cursor<&[u8]>) -> Result<u8, CodecError> {
    Ok(cursor.read_u8()?)
}

pub fn read_size(cursor: &mut Cursor<&[u8]>) -> Result<usize, CodecError> {
    let b1 = cursor.read_u8()? as usize;
    if b1 & 0x80 == 0 {
        return Ok(b1);
    }
    let size = b1 & 0x7f;
    if size == 0 {
        return Err(CodecError::IndefiniteLength);
    }
    if size > MAX_LENGTH_OCTETS {
        return Err(CodecError::InvalidLength);
    }
    let mut out = 0;
    for _ in 0..size {
        let c = cursor.read_u8()? as usize;
        out = (out << 8) + c;
    }
    Ok(out)
}

/// Total length (header included) of the TLV at the start of `data`.
///
/// Returns `Ok(None)` until enough bytes have arrived to read the header.
pub fn pdu_len(data: &[u8]) -> Result<Option<usize>, CodecError> {
    let mut cursor = Cursor::new(data);
    if read_tag(&mut cursor).is_err() {
        return Ok(None);
    }
    match read_size(&mut cursor) {
        Ok(size) => {
            let header = cursor.position() as usize;
            header
                .checked_add(size)
                .map(Some)
                .ok_or(CodecError::InvalidLength)
        }
        Err(CodecError::Truncated) => Ok(None),
        Err(e) => Err(e),
    }
}

pub fn decode_int(value: &[u8]) -> Result<i64, CodecError> {
    if value.is_empty() {
        return Err(CodecError::Invalid("empty integer"));
    }
    if value.len() > 8 {
        return Err(CodecError::IntegerOverflow);
    }
    let mut out: i64 = if value[0] & 0x80 != 0 { -1 } else { 0 };
    for &b in value {
        out = (out << 8) | b as i64;
    }
    Ok(out)
}

pub fn encode_len(len: usize) -> Vec<u8> {
    if len < 0x80 {
        return vec![len as u8];
    }
    let bytes = (len as u64).to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    let mut out = Vec::with_capacity(1 + bytes.len() - skip);
    out.push(0x80 | (bytes.len() - skip) as u8);
    out.extend_from_slice(&bytes[skip..]);
    out
}

/// Minimal two's complement representation.
pub fn encode_int(val: i64) -> Vec<u8> {
    let bytes = val.to_be_bytes();
    let mut start = 0;
    while start < bytes.len() - 1 {
        let redundant = (bytes[start] == 0x00 && bytes[start + 1] & 0x80 == 0)
            || (bytes[start] == 0xff && bytes[start + 1] & 0x80 != 0);
        if !redundant {
            break;
        }
        start += 1;
    }
    bytes[start..].to_vec()
}

/// Reads TLVs out of a borrowed buffer.
pub struct Decoder<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> Decoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(data),
        }
    }

    fn data(&self) -> &'a [u8] {
        *self.cursor.get_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.cursor.position() as usize >= self.data().len()
    }

    pub fn peek_tag(&self) -> Option<u8> {
        self.data().get(self.cursor.position() as usize).copied()
    }

    pub fn read_tlv(&mut self) -> Result<(u8, &'a [u8]), CodecError> {
        let tag = read_tag(&mut self.cursor)?;
        let size = read_size(&mut self.cursor)?;
        let start = self.cursor.position() as usize;
        let end = start.checked_add(size).ok_or(CodecError::InvalidLength)?;
        let data = self.data();
        if end > data.len() {
            return Err(CodecError::Truncated);
        }
        self.cursor.set_position(end as u64);
        Ok((tag, &data[start..end]))
    }

    pub fn expect(&mut self, tag: u8) -> Result<&'a [u8], CodecError> {
        let (found, value) = self.read_tlv()?;
        if found != tag {
            return Err(CodecError::UnexpectedTag {
                expected: tag,
                found,
            });
        }
        Ok(value)
    }

    /// Consumes the next element only when it carries `tag`.
    pub fn optional(&mut self, tag: u8) -> Result<Option<&'a [u8]>, CodecError> {
        if self.peek_tag() == Some(tag) {
            self.expect(tag).map(Some)
        } else {
            Ok(None)
        }
    }

    pub fn sequence(&mut self, tag: u8) -> Result<Decoder<'a>, CodecError> {
        Ok(Decoder::new(self.expect(tag)?))
    }

    pub fn read_int(&mut self, tag: u8) -> Result<i64, CodecError> {
        decode_int(self.expect(tag)?)
    }

    pub fn read_u32(&mut self, tag: u8) -> Result<u32, CodecError> {
        u32::try_from(self.read_int(tag)?).map_err(|_| CodecError::IntegerOverflow)
    }

    pub fn read_bool(&mut self, tag: u8) -> Result<bool, CodecError> {
        match self.expect(tag)? {
            [b] => Ok(*b != 0),
            _ => Err(CodecError::Invalid("boolean length")),
        }
    }

    pub fn read_octets(&mut self, tag: u8) -> Result<Vec<u8>, CodecError> {
        Ok(self.expect(tag)?.to_vec())
    }

    pub fn read_string(&mut self, tag: u8, what: &'static str) -> Result<String, CodecError> {
        to_string(self.expect(tag)?, what)
    }
}

pub fn to_string(value: &[u8], what: &'static str) -> Result<String, CodecError> {
    std::str::from_utf8(value)
        .map(str::to_owned)
        .map_err(|_| CodecError::InvalidUtf8(what))
}

#[derive(Debug, Default)]
pub struct Encoder {
    buffer: Vec<u8>,
    // positions of the length placeholders of open sequences
    stack: Vec<usize>,
}

impl Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_seq(&mut self, tag: u8) {
        self.buffer.push(tag);
        self.stack.push(self.buffer.len());
        self.buffer.push(0);
    }

    pub fn end_seq(&mut self) {
        if let Some(pos) = self.stack.pop() {
            let content = self.buffer.len() - pos - 1;
            self.buffer.splice(pos..pos + 1, encode_len(content));
        }
    }

    pub fn fix(&mut self) {
        while !self.stack.is_empty() {
            self.end_seq()
        }
    }

    pub fn write_tlv(&mut self, tag: u8, value: &[u8]) {
        self.buffer.push(tag);
        self.buffer.extend(encode_len(value.len()));
        self.buffer.extend_from_slice(value);
    }

    pub fn write_int(&mut self, val: i64) {
        self.write_int_with_tag(TAG_INTEGER, val)
    }

    pub fn write_int_with_tag(&mut self, tag: u8, val: i64) {
        self.write_tlv(tag, &encode_int(val))
    }

    pub fn write_enum(&mut self, val: u32) {
        self.write_int_with_tag(TAG_ENUMERATED, val as i64)
    }

    pub fn write_bool(&mut self, val: bool) {
        self.write_bool_with_tag(TAG_BOOLEAN, val)
    }

    pub fn write_bool_with_tag(&mut self, tag: u8, val: bool) {
        self.write_tlv(tag, &[if val { 0xff } else { 0x00 }])
    }

    pub fn write_octet_string(&mut self, val: &[u8]) {
        self.write_tlv(TAG_OCTET_STRING, val)
    }

    pub fn write_octet_string_with_tag(&mut self, tag: u8, val: &[u8]) {
        self.write_tlv(tag, val)
    }

    pub fn encode(mut self) -> Vec<u8> {
        self.fix();
        self.buffer
    }
}

#[test]
fn a_test() {
    let size = |d: &[u8]| read_size(&mut Cursor::new(d));
    assert_eq!(size(&[0x82, 0x27, 0x32]).unwrap(), 10034);
    assert_eq!(size(&[0x08]).unwrap(), 8);
    assert_eq!(size(&[0x80]).unwrap_err(), CodecError::IndefiniteLength);
    assert_eq!(size(&[0x85, 1, 1, 1, 1, 1]).unwrap_err(), CodecError::InvalidLength);

    assert_eq!(encode_int(127), vec![0x7f]);
    assert_eq!(encode_int(128), vec![0x00, 0x80]);
    assert_eq!(encode_int(256), vec![0x01, 0x00]);
    assert_eq!(encode_int(0), vec![0x00]);
    assert_eq!(encode_int(-1), vec![0xff]);
    assert_eq!(encode_int(-129), vec![0xff, 0x7f]);
    assert_eq!(encode_int(i32::MAX as i64), vec![0x7f, 0xff, 0xff, 0xff]);

    for v in [0i64, 1, -1, 127, 128, -128, -129, 65535, i32::MAX as i64, i64::MIN] {
        assert_eq!(decode_int(&encode_int(v)).unwrap(), v);
    }
}

#[test]
fn long_form_length_test() {
    assert_eq!(encode_len(5), vec![0x05]);
    assert_eq!(encode_len(200), vec![0x81, 0xc8]);
    assert_eq!(encode_len(300), vec![0x82, 0x01, 0x2c]);

    let payload = vec![0x61; 300];
    let mut e = Encoder::new();
    e.start_seq(TAG_SEQUENCE);
    e.write_octet_string(&payload);
    e.end_seq();
    let out = e.encode();
    // 30 82 01 30 | 04 82 01 2c | payload
    assert_eq!(&out[..8], &[0x30, 0x82, 0x01, 0x30, 0x04, 0x82, 0x01, 0x2c]);
    assert_eq!(pdu_len(&out).unwrap(), Some(out.len()));

    let mut d = Decoder::new(&out);
    let mut inner = d.sequence(TAG_SEQUENCE).unwrap();
    assert_eq!(inner.read_octets(TAG_OCTET_STRING).unwrap(), payload);
    assert!(inner.is_empty());
    assert!(d.is_empty());
}

#[test]
fn pdu_len_test() {
    assert_eq!(pdu_len(&[]).unwrap(), None);
    assert_eq!(pdu_len(&[0x30]).unwrap(), None);
    assert_eq!(pdu_len(&[0x30, 0x82, 0x01]).unwrap(), None);
    assert_eq!(pdu_len(&[0x30, 0x82, 0x01, 0x00]).unwrap(), Some(260));
    assert_eq!(pdu_len(&[0x30, 0x03, 0x02]).unwrap(), Some(5));
    assert_eq!(pdu_len(&[0x30, 0x80]).unwrap_err(), CodecError::IndefiniteLength);
}

#[test]
fn decoder_errors_test() {
    let mut d = Decoder::new(&[0x04, 0x05, 0x61]);
    assert_eq!(d.read_tlv().unwrap_err(), CodecError::Truncated);

    let mut d = Decoder::new(&[0x02, 0x01, 0x05]);
    assert_eq!(
        d.read_bool(TAG_BOOLEAN).unwrap_err(),
        CodecError::UnexpectedTag { expected: 0x01, found: 0x02 }
    );

    let mut d = Decoder::new(&[0x80, 0x01, 0x61, 0x04, 0x00]);
    assert_eq!(d.optional(0x81).unwrap(), None);
    assert_eq!(d.optional(0x80).unwrap(), Some(&b"a"[..]));
    assert_eq!(d.read_octets(TAG_OCTET_STRING).unwrap(), Vec::<u8>::new());
}
