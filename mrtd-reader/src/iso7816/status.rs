//! Interpretation of ISO/IEC 7816-4 status words.


use crate::iso7816::apdu::ResponseTrailer;


/// The classes of status words that influence how a reader proceeds.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum StatusCondition {
    Success,
    SecurityStatusNotSatisfied,
    FileNotFound,
    SmDataObjectsIncorrect,
    WrongLength { exact: Option<u8> },
    ClassNotSupported,
    Other,
}
impl StatusCondition {
    pub fn classify(trailer: ResponseTrailer) -> Self {
        match (trailer.sw1, trailer.sw2) {
            (0x90, 0x00) => Self::Success,
            (0x69, 0x82) => Self::SecurityStatusNotSatisfied,
            (0x6A, 0x82) => Self::FileNotFound,
            (0x69, 0x88) => Self::SmDataObjectsIncorrect,
            (0x67, 0x00) => Self::WrongLength { exact: None },
            (0x6C, exact) => Self::WrongLength { exact: Some(exact) },
            (0x6E, 0x00) => Self::ClassNotSupported,
            _ => Self::Other,
        }
    }
}


fn table_description(sw1: u8, sw2: u8) -> Option<&'static str> {
    let description = match (sw1, sw2) {
        (0x62, 0x00) => "No information given",
        (0x62, 0x81) => "Part of returned data may be corrupted",
        (0x62, 0x82) => "End of file/record reached before reading Le bytes",
        (0x62, 0x83) => "Selected file invalidated",
        (0x62, 0x84) => "FCI not formatted according to ISO7816-4 section 5.1.5",

        (0x63, 0x00) => "No information given",
        (0x63, 0x81) => "File filled up by the last write",
        (0x63, 0x82) => "Card Key not supported",
        (0x63, 0x83) => "Reader Key not supported",
        (0x63, 0x84) => "Plain transmission not supported",
        (0x63, 0x85) => "Secured Transmission not supported",
        (0x63, 0x86) => "Volatile memory not available",
        (0x63, 0x87) => "Non Volatile memory not available",
        (0x63, 0x88) => "Key number not valid",
        (0x63, 0x89) => "Key length is not correct",
        (0x63, 0x0C) => "Counter provided by X (valued from 0 to 15) (exact meaning depending on the command)",

        (0x65, 0x00) => "No information given",
        (0x65, 0x81) => "Memory failure",

        (0x67, 0x00) => "Wrong length",

        (0x68, 0x00) => "No information given",
        (0x68, 0x81) => "Logical channel not supported",
        (0x68, 0x82) => "Secure messaging not supported",

        (0x69, 0x00) => "No information given",
        (0x69, 0x81) => "Command incompatible with file structure",
        (0x69, 0x82) => "Security status not satisfied",
        (0x69, 0x83) => "Authentication method blocked",
        (0x69, 0x84) => "Referenced data invalidated",
        (0x69, 0x85) => "Conditions of use not satisfied",
        (0x69, 0x86) => "Command not allowed (no current EF)",
        (0x69, 0x87) => "Expected SM data objects missing",
        (0x69, 0x88) => "SM data objects incorrect",

        (0x6A, 0x00) => "No information given",
        (0x6A, 0x80) => "Incorrect parameters in the data field",
        (0x6A, 0x81) => "Function not supported",
        (0x6A, 0x82) => "File not found",
        (0x6A, 0x83) => "Record not found",
        (0x6A, 0x84) => "Not enough memory space in the file",
        (0x6A, 0x85) => "Lc inconsistent with TLV structure",
        (0x6A, 0x86) => "Incorrect parameters P1-P2",
        (0x6A, 0x87) => "Lc inconsistent with P1-P2",
        (0x6A, 0x88) => "Referenced data not found",

        (0x6B, 0x00) => "Wrong parameter(s) P1-P2",
        (0x6D, 0x00) => "Instruction code not supported or invalid",
        (0x6E, 0x00) => "Class not supported",
        (0x6F, 0x00) => "No precise diagnosis",

        (0x90, 0x00) => "Success",

        _ => return None,
    };
    Some(description)
}

/// Returns a human-readable description of a status word.
///
/// Never fails; unknown status words yield a generic message containing both bytes.
pub fn describe(trailer: ResponseTrailer) -> String {
    let ResponseTrailer { sw1, sw2 } = trailer;
    match sw1 {
        0x61 => format!("SW2 indicates the number of response bytes still available ({} bytes still available)", sw2),
        0x64 => "State of non-volatile memory unchanged (SW2=00, other values are RFU)".to_owned(),
        0x6C => format!("Wrong length Le: SW2 indicates the exact length (exact length: {})", sw2),
        _ => match table_description(sw1, sw2) {
            Some(description) => description.to_owned(),
            None => format!("Unknown error - sw1: 0x{:02X}, sw2: 0x{:02X}", sw1, sw2),
        },
    }
}
