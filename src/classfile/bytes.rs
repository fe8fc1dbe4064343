use crate::error::{Error, Result};

/// Big-endian cursor over class file bytes.
pub(crate) struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub(crate) fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| {
                Error::malformed(format!(
                    "truncated at offset {} (wanted {} bytes, {} left)",
                    self.pos,
                    len,
                    self.data.len().saturating_sub(self.pos)
                ))
            })?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub(crate) fn u8(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }

    pub(crate) fn u16(&mut self) -> Result<u16> {
        let raw = self.bytes(2)?;
        Ok(u16::from_be_bytes([raw[0], raw[1]]))
    }

    pub(crate) fn u32(&mut self) -> Result<u32> {
        let raw = self.bytes(4)?;
        Ok(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    pub(crate) fn u64(&mut self) -> Result<u64> {
        let high = self.u32()? as u64;
        let low = self.u32()? as u64;
        Ok((high << 32) | low)
    }
}

pub(crate) fn put_u8(out: &mut Vec<u8>, value: u8) {
    out.push(value);
}

pub(crate) fn put_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_be_bytes());
}

pub(crate) fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_be_bytes());
}

pub(crate) fn put_u64(out: &mut Vec<u8>, value: u64) {
    out.extend_from_slice(&value.to_be_bytes());
}

/// Writes a table length, rejecting tables that no longer fit the u16 count field.
pub(crate) fn put_count(out: &mut Vec<u8>, len: usize, what: &str) -> Result<()> {
    let count = u16::try_from(len)
        .map_err(|_| Error::malformed(format!("{what} count {len} exceeds u16")))?;
    put_u16(out, count);
    Ok(())
}

/// Writes a u4 length prefix followed by the payload.
pub(crate) fn put_length_prefixed(out: &mut Vec<u8>, payload: &[u8]) -> Result<()> {
    let len = u32::try_from(payload.len())
        .map_err(|_| Error::malformed("attribute length exceeds u32"))?;
    put_u32(out, len);
    out.extend_from_slice(payload);
    Ok(())
}

/// Decodes the JVM's modified UTF-8. Invalid sequences decode to U+FFFD.
pub(crate) fn decode_modified_utf8(raw: &[u8]) -> String {
    let mut units: Vec<u16> = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        let b = raw[i];
        if b & 0x80 == 0 {
            units.push(b as u16);
            i += 1;
        } else if b & 0xe0 == 0xc0 && i + 1 < raw.len() {
            units.push((((b & 0x1f) as u16) << 6) | (raw[i + 1] & 0x3f) as u16);
            i += 2;
        } else if b & 0xf0 == 0xe0 && i + 2 < raw.len() {
            units.push(
                (((b & 0x0f) as u16) << 12)
                    | (((raw[i + 1] & 0x3f) as u16) << 6)
                    | (raw[i + 2] & 0x3f) as u16,
            );
            i += 3;
        } else {
            units.push(0xfffd);
            i += 1;
        }
    }
    String::from_utf16_lossy(&units)
}

pub(crate) fn encode_modified_utf8(value: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len());
    for unit in value.encode_utf16() {
        match unit {
            0x0001..=0x007f => out.push(unit as u8),
            0x0000 | 0x0080..=0x07ff => {
                out.push(0xc0 | ((unit >> 6) as u8 & 0x1f));
                out.push(0x80 | (unit as u8 & 0x3f));
            }
            _ => {
                out.push(0xe0 | ((unit >> 12) as u8 & 0x0f));
                out.push(0x80 | ((unit >> 6) as u8 & 0x3f));
                out.push(0x80 | (unit as u8 & 0x3f));
            }
        }
    }
    out
}
