//! BER-TLV encoding and decoding as used by ICAO Doc 9303 data groups.
//!
//! Tags are represented as `u32` values containing the raw tag bytes in big-endian order, e.g. the
//! two-byte tag `5F 1F` is `0x5F1F`. At most four tag bytes and three length bytes are supported,
//! limiting the value length to `0xFF_FFFF` bytes.


use std::fmt;


/// The maximum value length that can be encoded.
pub const MAX_LENGTH: usize = 0xFF_FFFF;


#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Error {
    /// A tag value to be encoded is not a well-formed tag.
    InvalidTag,

    /// An encoded tag is truncated or longer than four bytes.
    InvalidEncodedTag,

    /// A length to be encoded exceeds [`MAX_LENGTH`].
    InvalidLength,

    /// An encoded length is truncated, uses more than three bytes or exceeds the available input.
    InvalidEncodedLength,
}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidTag => write!(f, "invalid tag"),
            Self::InvalidEncodedTag => write!(f, "invalid encoded tag"),
            Self::InvalidLength => write!(f, "invalid length"),
            Self::InvalidEncodedLength => write!(f, "invalid encoded length"),
        }
    }
}
impl std::error::Error for Error {
}


/// A single tag-length-value structure.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Tlv {
    pub tag: u32,
    pub value: Vec<u8>,
}
impl Tlv {
    pub fn new(tag: u32, value: Vec<u8>) -> Self {
        Self {
            tag,
            value,
        }
    }

    /// Decodes a TLV structure from the beginning of the given slice.
    ///
    /// Trailing bytes after the structure are ignored.
    pub fn from_encoded(encoded: &[u8]) -> Result<Self, Error> {
        let (tag, value, _consumed) = decode(encoded)?;
        Ok(Self::new(tag, value.to_vec()))
    }

    pub fn len(&self) -> usize {
        self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    /// Returns the complete encoded form of this structure.
    pub fn encoded(&self) -> Result<Vec<u8>, Error> {
        encode(self.tag, &self.value)
    }
}


/// The number of significant bytes of a tag value.
fn tag_byte_count(tag: u32) -> usize {
    let leading_zero_bytes = usize::try_from(tag.leading_zeros() / 8).unwrap_or(4);
    4 - leading_zero_bytes
}

/// Checks whether the tag consists of a correctly chained sequence of tag bytes.
fn is_well_formed_tag(tag: u32) -> bool {
    let byte_count = tag_byte_count(tag);
    if byte_count == 0 {
        return false;
    }
    let bytes = tag.to_be_bytes();
    let tag_bytes = &bytes[4 - byte_count..];

    if tag_bytes[0] & 0x1F != 0x1F {
        // low-tag-number form is always exactly one byte
        return byte_count == 1;
    }
    if byte_count == 1 {
        // high-tag-number form requires subsequent bytes
        return false;
    }

    let (last, middle) = match tag_bytes[1..].split_last() {
        Some(lm) => lm,
        None => return false,
    };
    middle.iter().all(|b| b & 0x80 != 0) && last & 0x80 == 0
}


/// Decodes a tag from the beginning of the slice.
///
/// Returns the tag and the number of bytes it occupied.
pub fn decode_tag(encoded: &[u8]) -> Result<(u32, usize), Error> {
    let first = *encoded.first().ok_or(Error::InvalidEncodedTag)?;
    let mut tag = u32::from(first);
    let mut offset = 1;

    if first & 0x1F == 0x1F {
        loop {
            let b = *encoded.get(offset).ok_or(Error::InvalidEncodedTag)?;
            offset += 1;
            if offset > 4 {
                return Err(Error::InvalidEncodedTag);
            }
            tag = (tag << 8) | u32::from(b);
            if b & 0x80 == 0 {
                break;
            }
        }
    }

    Ok((tag, offset))
}

/// Decodes a length from the beginning of the slice.
///
/// Returns the length and the number of bytes it occupied.
pub fn decode_length(encoded: &[u8]) -> Result<(usize, usize), Error> {
    let first = *encoded.first().ok_or(Error::InvalidEncodedLength)?;
    if first & 0x80 == 0 {
        return Ok((usize::from(first), 1));
    }

    let byte_count = usize::from(first & 0x7F);
    if byte_count == 0 || byte_count > 3 {
        return Err(Error::InvalidEncodedLength);
    }
    if encoded.len() < 1 + byte_count {
        return Err(Error::InvalidEncodedLength);
    }

    let length = encoded[1..1 + byte_count].iter()
        .fold(0usize, |acc, b| (acc << 8) | usize::from(*b));
    Ok((length, 1 + byte_count))
}

/// Decodes a tag and a length from the beginning of the slice.
///
/// Returns the tag, the length of the value and the number of bytes occupied by tag and length.
pub fn decode_tag_and_length(encoded: &[u8]) -> Result<(u32, usize, usize), Error> {
    let (tag, tag_size) = decode_tag(encoded)?;
    let (length, length_size) = decode_length(&encoded[tag_size..])?;
    Ok((tag, length, tag_size + length_size))
}

/// Returns how many bytes must at least be appended to the slice before its tag and length can be
/// decoded.
///
/// Returns 0 if the slice already holds a complete tag and length, or if they are malformed in a way
/// that more input cannot fix.
pub fn missing_header_bytes(encoded: &[u8]) -> usize {
    let Some(&first) = encoded.first() else {
        return 2;
    };

    let mut tag_size = 1;
    if first & 0x1F == 0x1F {
        loop {
            if tag_size >= 4 {
                return 0;
            }
            let Some(&b) = encoded.get(tag_size) else {
                // another tag byte and at least one length byte
                return 2;
            };
            tag_size += 1;
            if b & 0x80 == 0 {
                break;
            }
        }
    }

    let Some(&length_first) = encoded.get(tag_size) else {
        return 1;
    };
    if length_first & 0x80 == 0 {
        return 0;
    }
    let byte_count = usize::from(length_first & 0x7F);
    if byte_count == 0 || byte_count > 3 {
        return 0;
    }
    (tag_size + 1 + byte_count).saturating_sub(encoded.len())
}

/// Decodes a complete TLV structure from the beginning of the slice.
///
/// Returns the tag, the value and the total number of bytes the structure occupied.
pub fn decode(encoded: &[u8]) -> Result<(u32, &[u8], usize), Error> {
    let (tag, length, header_size) = decode_tag_and_length(encoded)?;
    let end = header_size.checked_add(length).ok_or(Error::InvalidEncodedLength)?;
    if end > encoded.len() {
        return Err(Error::InvalidEncodedLength);
    }
    Ok((tag, &encoded[header_size..end], end))
}

/// Decodes a sequence of consecutive TLV structures filling the entire slice.
pub fn decode_all(mut encoded: &[u8]) -> Result<Vec<Tlv>, Error> {
    let mut ret = Vec::new();
    while !encoded.is_empty() {
        let (tag, value, consumed) = decode(encoded)?;
        ret.push(Tlv::new(tag, value.to_vec()));
        encoded = &encoded[consumed..];
    }
    Ok(ret)
}


/// Encodes a tag, marking it as application class.
pub fn encode_tag(tag: u32) -> Result<Vec<u8>, Error> {
    if !is_well_formed_tag(tag) {
        return Err(Error::InvalidTag);
    }
    let byte_count = tag_byte_count(tag);
    let mut encoded = tag.to_be_bytes()[4 - byte_count..].to_vec();
    encoded[0] |= 0x40;
    Ok(encoded)
}

/// Encodes a length using the shortest form.
pub fn encode_length(length: usize) -> Result<Vec<u8>, Error> {
    if length < 0x80 {
        return Ok(vec![length as u8]);
    }
    if length > MAX_LENGTH {
        return Err(Error::InvalidLength);
    }

    let bytes = length.to_be_bytes();
    let significant = bytes.iter()
        .position(|b| *b != 0x00)
        .unwrap_or(bytes.len() - 1);
    let length_bytes = &bytes[significant..];

    let mut encoded = Vec::with_capacity(1 + length_bytes.len());
    encoded.push(0x80 | length_bytes.len() as u8);
    encoded.extend_from_slice(length_bytes);
    Ok(encoded)
}

/// Encodes a complete TLV structure.
pub fn encode(tag: u32, value: &[u8]) -> Result<Vec<u8>, Error> {
    let mut encoded = encode_tag(tag)?;
    encoded.extend(encode_length(value.len())?);
    encoded.extend_from_slice(value);
    Ok(encoded)
}
