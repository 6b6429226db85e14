//! Structures related to application protocol data units (APDUs).


use std::fmt;
use std::io::{self, Write};


#[derive(Debug)]
pub enum WriteError {
    Io(io::Error),
    EmptyData,
    DataTooLong { maximum: usize, obtained: usize },
}
impl fmt::Display for WriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {}", e),
            Self::EmptyData => write!(f, "data is, but must not be, empty"),
            Self::DataTooLong { maximum, obtained } => write!(f, "too much data: obtained {} bytes, expected maximum {} bytes", obtained, maximum),
        }
    }
}
impl std::error::Error for WriteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::EmptyData => None,
            Self::DataTooLong { .. } => None,
        }
    }
}
impl From<io::Error> for WriteError {
    fn from(value: io::Error) -> Self { Self::Io(value) }
}


#[derive(Clone, Copy, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct CommandHeader {
    pub cla: u8,
    pub ins: u8,
    pub p1: u8,
    pub p2: u8,
}
impl CommandHeader {
    pub const fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self { cla, ins, p1, p2 }
    }

    pub const fn to_bytes(&self) -> [u8; 4] {
        [self.cla, self.ins, self.p1, self.p2]
    }

    pub const fn to_be_u32(&self) -> u32 {
        u32::from_be_bytes(self.to_bytes())
    }

    pub fn write_bytes<W: Write>(&self, writer: &mut W) -> Result<(), WriteError> {
        writer.write_all(&self.to_bytes())?;
        Ok(())
    }
}
impl fmt::Debug for CommandHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CommandHeader {} cla: 0x{:02X}, ins: 0x{:02X}, p1: 0x{:02X}, p2: 0x{:02X} {}",
            '{', self.cla, self.ins, self.p1, self.p2, '}',
        )
    }
}

#[derive(Clone, Copy, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ResponseTrailer {
    pub sw1: u8,
    pub sw2: u8,
}
impl ResponseTrailer {
    pub const SUCCESS: Self = Self::new(0x90, 0x00);

    pub const fn new(sw1: u8, sw2: u8) -> Self {
        Self {
            sw1,
            sw2,
        }
    }

    pub const fn to_bytes(&self) -> [u8; 2] {
        [self.sw1, self.sw2]
    }

    pub const fn to_word(&self) -> u16 {
        u16::from_be_bytes([self.sw1, self.sw2])
    }

    pub const fn is_success(&self) -> bool {
        self.sw1 == 0x90 && self.sw2 == 0x00
    }
}
impl fmt::Debug for ResponseTrailer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResponseTrailer {} sw1: 0x{:02X}, sw2: 0x{:02X} {}", '{', self.sw1, self.sw2, '}')
    }
}
impl fmt::Display for ResponseTrailer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X}", self.to_word())
    }
}


/// The body of a command APDU.
///
/// An expected response length (Le) of 0 means the maximum: 256 bytes for short and 65536 bytes for
/// extended APDUs.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Data {
    NoData,
    RequestDataShort {
        request_data: Vec<u8>,
    },
    RequestDataExtended {
        request_data: Vec<u8>,
    },
    ResponseDataShort {
        response_data_length: u8,
    },
    ResponseDataExtended {
        response_data_length: u16,
    },
    BothDataShort {
        request_data: Vec<u8>,
        response_data_length: u8,
    },
    BothDataExtended {
        request_data: Vec<u8>,
        response_data_length: u16,
    },
}
impl Data {
    /// Creates the body from optional request data and an optional expected response length,
    /// choosing the extended form only if a length does not fit the short form.
    pub fn from_parts(request_data: Option<Vec<u8>>, response_data_length: Option<usize>) -> Self {
        let request_extended = request_data.as_ref().map(|d| d.len() > 255).unwrap_or(false);
        let response_extended = response_data_length.map(|l| l > 256).unwrap_or(false);
        let extended = request_extended || response_extended;

        match (request_data, response_data_length) {
            (None, None) => Self::NoData,
            (Some(request_data), None) => if extended {
                Self::RequestDataExtended { request_data }
            } else {
                Self::RequestDataShort { request_data }
            },
            (None, Some(le)) => if extended {
                Self::ResponseDataExtended { response_data_length: extended_le(le) }
            } else {
                Self::ResponseDataShort { response_data_length: short_le(le) }
            },
            (Some(request_data), Some(le)) => if extended {
                Self::BothDataExtended { request_data, response_data_length: extended_le(le) }
            } else {
                Self::BothDataShort { request_data, response_data_length: short_le(le) }
            },
        }
    }

    pub fn response_data_length(&self) -> Option<usize> {
        fn short(le: u8) -> usize {
            if le == 0 { 256 } else { usize::from(le) }
        }
        fn extended(le: u16) -> usize {
            if le == 0 { 65536 } else { usize::from(le) }
        }

        match self {
            Self::NoData => None,
            Self::RequestDataShort { .. } => None,
            Self::RequestDataExtended { .. } => None,
            Self::ResponseDataShort { response_data_length } => Some(short(*response_data_length)),
            Self::ResponseDataExtended { response_data_length } => Some(extended(*response_data_length)),
            Self::BothDataShort { response_data_length, .. } => Some(short(*response_data_length)),
            Self::BothDataExtended { response_data_length, .. } => Some(extended(*response_data_length)),
        }
    }

    pub fn request_data(&self) -> Option<&[u8]> {
        match self {
            Self::NoData => None,
            Self::RequestDataShort { request_data } => Some(request_data.as_slice()),
            Self::RequestDataExtended { request_data } => Some(request_data.as_slice()),
            Self::ResponseDataShort { .. } => None,
            Self::ResponseDataExtended { .. } => None,
            Self::BothDataShort { request_data, .. } => Some(request_data.as_slice()),
            Self::BothDataExtended { request_data, .. } => Some(request_data.as_slice()),
        }
    }

    pub fn is_extended(&self) -> bool {
        matches!(
            self,
            Self::RequestDataExtended { .. } | Self::ResponseDataExtended { .. } | Self::BothDataExtended { .. }
        )
    }

    pub fn write_bytes<W: Write>(&self, writer: &mut W) -> Result<(), WriteError> {
        fn ensure_length(request_data: &[u8], max_length: usize) -> Result<(), WriteError> {
            if request_data.is_empty() {
                Err(WriteError::EmptyData)
            } else if request_data.len() > max_length {
                Err(WriteError::DataTooLong { maximum: max_length, obtained: request_data.len() })
            } else {
                Ok(())
            }
        }

        match self {
            // "case" refers to the cases in ISO/IEC 7816-3:2006 § 12.1.3
            Data::NoData => {
                // case 1
                Ok(())
            },
            Data::RequestDataShort { request_data } => {
                // case 3S: [Lc] [Data]
                ensure_length(request_data, 255)?;
                writer.write_all(&[short_le(request_data.len())])?;
                writer.write_all(request_data)?;
                Ok(())
            },
            Data::RequestDataExtended { request_data } => {
                // case 3E: [0x00] [LcMSB] [LcLSB] [Data]
                ensure_length(request_data, 65535)?;
                let length_bytes = extended_le(request_data.len()).to_be_bytes();
                writer.write_all(&[0x00, length_bytes[0], length_bytes[1]])?;
                writer.write_all(request_data)?;
                Ok(())
            },
            Data::ResponseDataShort { response_data_length } => {
                // case 2S: [Le]
                writer.write_all(&[*response_data_length])?;
                Ok(())
            },
            Data::ResponseDataExtended { response_data_length } => {
                // case 2E: [0x00] [LeMSB] [LeLSB]
                let length_bytes = response_data_length.to_be_bytes();
                writer.write_all(&[0x00, length_bytes[0], length_bytes[1]])?;
                Ok(())
            },
            Data::BothDataShort { request_data, response_data_length } => {
                // case 4S: [Lc] [Data] [Le]
                ensure_length(request_data, 255)?;
                writer.write_all(&[short_le(request_data.len())])?;
                writer.write_all(request_data)?;
                writer.write_all(&[*response_data_length])?;
                Ok(())
            },
            Data::BothDataExtended { request_data, response_data_length } => {
                // case 4E: [0x00] [LcMSB] [LcLSB] [Data] [LeMSB] [LeLSB]
                ensure_length(request_data, 65535)?;
                let request_length_bytes = extended_le(request_data.len()).to_be_bytes();
                writer.write_all(&[0x00, request_length_bytes[0], request_length_bytes[1]])?;
                writer.write_all(request_data)?;
                writer.write_all(&response_data_length.to_be_bytes())?;
                Ok(())
            },
        }
    }
}

/// Encodes a length of 1 to 256 as a short length byte (256 becomes 0).
///
/// Lc never reaches 256 since the short form limits request data to 255 bytes.
fn short_le(length: usize) -> u8 {
    (length % 256) as u8
}

/// Encodes a length of 1 to 65536 as an extended length word (65536 becomes 0).
fn extended_le(length: usize) -> u16 {
    (length % 65536) as u16
}


#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Apdu {
    pub header: CommandHeader,
    pub data: Data,
}
impl Apdu {
    pub fn new(header: CommandHeader, data: Data) -> Self {
        Self { header, data }
    }

    pub fn write_bytes<W: Write>(&self, writer: &mut W) -> Result<(), WriteError> {
        self.header.write_bytes(writer)?;
        self.data.write_bytes(writer)?;
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, WriteError> {
        let mut buf = Vec::new();
        self.write_bytes(&mut buf)?;
        Ok(buf)
    }
}

#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Response {
    pub data: Vec<u8>,
    pub trailer: ResponseTrailer,
}
impl Response {
    pub fn new(data: Vec<u8>, trailer: ResponseTrailer) -> Self {
        Self { data, trailer }
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 2 {
            return None;
        }

        let (data, trailer) = bytes.split_at(bytes.len() - 2);
        Some(Self {
            data: data.to_vec(),
            trailer: ResponseTrailer::new(trailer[0], trailer[1]),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.data.len() + 2);
        buf.extend_from_slice(&self.data);
        buf.extend_from_slice(&self.trailer.to_bytes());
        buf
    }

    pub fn is_success(&self) -> bool {
        self.trailer.is_success()
    }
}
