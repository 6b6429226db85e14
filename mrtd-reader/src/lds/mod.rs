//! The Logical Data Structure: the files stored on an MRTD chip.


pub mod com;
pub mod dg1;
pub mod dg15;


use std::fmt;
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Serialize, Serializer};

use crate::mrz;
use crate::tlv::{self, Tlv};

pub use self::com::EfCom;
pub use self::dg1::EfDg1;
pub use self::dg15::EfDg15;


#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Error {
    Tlv(tlv::Error),
    UnknownTag { tag: u32 },
    UnknownName { name: String },
    InvalidTag { expected: u32, obtained: u32 },
    WrongFile { expected: LdsFileTag, obtained: LdsFileTag },
    InvalidValue { tag: u32 },
    MissingValue { tag: u32 },
    Mrz(mrz::Error),
}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tlv(e)
                => write!(f, "TLV error: {}", e),
            Self::UnknownTag { tag }
                => write!(f, "unknown LDS tag 0x{:02X}", tag),
            Self::UnknownName { name }
                => write!(f, "unknown LDS file name {:?}", name),
            Self::InvalidTag { expected, obtained }
                => write!(f, "invalid tag 0x{:X}, expected 0x{:X}", obtained, expected),
            Self::WrongFile { expected, obtained }
                => write!(f, "file is {}, expected {}", obtained, expected),
            Self::InvalidValue { tag }
                => write!(f, "value of tag 0x{:X} is invalid", tag),
            Self::MissingValue { tag }
                => write!(f, "tag 0x{:X} is missing", tag),
            Self::Mrz(e)
                => write!(f, "MRZ error: {}", e),
        }
    }
}
impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Tlv(e) => Some(e),
            Self::Mrz(e) => Some(e),
            _ => None,
        }
    }
}
impl From<tlv::Error> for Error {
    fn from(value: tlv::Error) -> Self { Self::Tlv(value) }
}
impl From<mrz::Error> for Error {
    fn from(value: mrz::Error) -> Self { Self::Mrz(value) }
}


macro_rules! lds_file_tags {
    ($($variant:ident => ($tag:literal, $fid:literal, $name:literal, $key:literal)),+ $(,)?) => {
        /// The elementary files of the LDS.
        #[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
        pub enum LdsFileTag {
            $($variant,)+
        }
        impl LdsFileTag {
            pub const ALL: &'static [LdsFileTag] = &[$(Self::$variant,)+];

            /// The tag of the outermost TLV structure of the file.
            pub const fn tag(&self) -> u8 {
                match self {
                    $(Self::$variant => $tag,)+
                }
            }

            /// The file identifier used to select the file.
            pub const fn fid(&self) -> [u8; 2] {
                match self {
                    $(Self::$variant => $fid.to_be_bytes(),)+
                }
            }

            /// The display name, e.g. `EF.DG1`.
            pub const fn name(&self) -> &'static str {
                match self {
                    $(Self::$variant => $name,)+
                }
            }

            /// The lower-case name without the `EF.` prefix, e.g. `dg1`.
            pub const fn key(&self) -> &'static str {
                match self {
                    $(Self::$variant => $key,)+
                }
            }

            pub fn from_tag(tag: u32) -> Option<Self> {
                match tag {
                    $($tag => Some(Self::$variant),)+
                    _ => None,
                }
            }

            pub fn from_name(name: &str) -> Option<Self> {
                match name {
                    $($name => Some(Self::$variant),)+
                    _ => None,
                }
            }

            pub fn from_key(key: &str) -> Option<Self> {
                match key {
                    $($key => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

lds_file_tags! {
    Com => (0x60, 0x011Eu16, "EF.COM", "com"),
    Dg1 => (0x61, 0x0101u16, "EF.DG1", "dg1"),
    Dg2 => (0x75, 0x0102u16, "EF.DG2", "dg2"),
    Dg3 => (0x63, 0x0103u16, "EF.DG3", "dg3"),
    Dg4 => (0x76, 0x0104u16, "EF.DG4", "dg4"),
    Dg5 => (0x65, 0x0105u16, "EF.DG5", "dg5"),
    Dg6 => (0x66, 0x0106u16, "EF.DG6", "dg6"),
    Dg7 => (0x67, 0x0107u16, "EF.DG7", "dg7"),
    Dg8 => (0x68, 0x0108u16, "EF.DG8", "dg8"),
    Dg9 => (0x69, 0x0109u16, "EF.DG9", "dg9"),
    Dg10 => (0x6A, 0x010Au16, "EF.DG10", "dg10"),
    Dg11 => (0x6B, 0x010Bu16, "EF.DG11", "dg11"),
    Dg12 => (0x6C, 0x010Cu16, "EF.DG12", "dg12"),
    Dg13 => (0x6D, 0x010Du16, "EF.DG13", "dg13"),
    Dg14 => (0x6E, 0x010Eu16, "EF.DG14", "dg14"),
    Dg15 => (0x6F, 0x010Fu16, "EF.DG15", "dg15"),
    Dg16 => (0x70, 0x0110u16, "EF.DG16", "dg16"),
    Sod => (0x77, 0x011Du16, "EF.SOD", "sod"),
}
impl fmt::Display for LdsFileTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
impl FromStr for LdsFileTag {
    type Err = Error;

    /// Accepts both the display name (`EF.DG1`) and the short key (`dg1`), ignoring case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        let key = lower.strip_prefix("ef.").unwrap_or(&lower);
        Self::from_key(key)
            .ok_or_else(|| Error::UnknownName { name: s.to_owned() })
    }
}
impl Serialize for LdsFileTag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.key())
    }
}


/// A typed view of the contents of an LDS file.
pub trait ParseLdsFile: Sized {
    /// The file this view applies to.
    const FILE: LdsFileTag;

    /// Parses the value of the outermost TLV structure of the file.
    fn parse(value: &[u8]) -> Result<Self, Error>;
}


/// An LDS file as read from the chip.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct LdsFile {
    tag: LdsFileTag,
    tlv: Tlv,
    encoded: Vec<u8>,
}
impl LdsFile {
    /// Decodes a complete LDS file; its outer tag must be one of the LDS file tags.
    pub fn from_encoded(encoded: &[u8]) -> Result<Self, Error> {
        let (tag, value, consumed) = tlv::decode(encoded)?;
        let lds_tag = LdsFileTag::from_tag(tag)
            .ok_or(Error::UnknownTag { tag })?;
        Ok(Self {
            tag: lds_tag,
            tlv: Tlv::new(tag, value.to_vec()),
            encoded: encoded[..consumed].to_vec(),
        })
    }

    pub fn from_tlv(tlv: Tlv) -> Result<Self, Error> {
        let lds_tag = LdsFileTag::from_tag(tlv.tag)
            .ok_or(Error::UnknownTag { tag: tlv.tag })?;
        let encoded = tlv.encoded()?;
        Ok(Self {
            tag: lds_tag,
            tlv,
            encoded,
        })
    }

    pub fn tag(&self) -> LdsFileTag {
        self.tag
    }

    pub fn tlv(&self) -> &Tlv {
        &self.tlv
    }

    pub fn value(&self) -> &[u8] {
        &self.tlv.value
    }

    /// The complete encoded file, including the outer tag and length.
    pub fn encoded(&self) -> &[u8] {
        &self.encoded
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.encoded)
    }

    /// Parses the file into its typed view.
    pub fn as_file<T: ParseLdsFile>(&self) -> Result<T, Error> {
        if self.tag != T::FILE {
            return Err(Error::WrongFile { expected: T::FILE, obtained: self.tag });
        }
        T::parse(&self.tlv.value)
    }
}
impl Serialize for LdsFile {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64())
    }
}


/// Decodes the next TLV structure of a file's value and ensures it carries the expected tag.
pub(crate) fn expect_tlv(value: &[u8], expected: u32) -> Result<(&[u8], &[u8]), Error> {
    if value.is_empty() {
        return Err(Error::MissingValue { tag: expected });
    }
    let (tag, inner, consumed) = tlv::decode(value)?;
    if tag != expected {
        return Err(Error::InvalidTag { expected, obtained: tag });
    }
    Ok((inner, &value[consumed..]))
}
