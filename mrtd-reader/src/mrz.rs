//! Decoding of machine-readable zones.
//!
//! Three form factors are defined: TD1 (credit-card size), TD2 (old German ID card size, ISO 216
//! size A7) and TD3 (passport, ISO 216 size B7).
//!
//! The TD1 encoding is:
//! ```plain
//! TTSSSNNNNNNNNNCOOOOOOOOOOOOOOO
//! BBBBBBDXEEEEEEFAAAPPPPPPPPPPPG
//! IIIIIIIIIIIIIIIIIIIIIIIIIIIIII
//! ```
//! with
//! * `TT`: type of document (right-padded with `<`)
//! * `SSS`: issuing state or organization (right-padded with `<`)
//! * `NNNNNNNNN`: first 9 characters of document number (spaces replaced by `<`, right-padded with
//!   `<`)
//! * `C`: check digit of document number, or `<` if document number is longer than 9 digits
//! * `OOOOOOOOOOOOOOO`: optional data (right-padded with `<`); if document number is longer than 9
//!   digits, begins with remaining digits of document number followed by check digit followed by
//!   `<`
//! * `BBBBBB`: date of birth as YYMMDD
//! * `D`: check digit of date of birth
//! * `X`: sex (`F`, `M`, or `<` for unspecified)
//! * `EEEEEE`: date of expiry as YYMMDD
//! * `F`: check digit of date of expiry
//! * `AAA`: nationality
//! * `PPPPPPPPPPP`: optional data (right-padded with `<`)
//! * `G`: composite check digit of `NNNNNNNNNCOOOOOOOOOOOOOOOBBBBBBDEEEEEEFPPPPPPPPPPP`
//! * `IIIIIIIIIIIIIIIIIIIIIIIIIIIIII`: name (possibly truncated):
//!   1. primary identifier (components separated by `<`)
//!   2. if there is a secondary identifier: `<<`
//!   3. secondary identifier (components separated by `<`)
//!   4. padding with `<`
//!
//! The TD2 encoding is:
//! ```plain
//! TTSSSIIIIIIIIIIIIIIIIIIIIIIIIIIIIIII
//! NNNNNNNNNCAAABBBBBBDXEEEEEEFOOOOOOOG
//! ```
//! The fields are as with TD1, except the composite check digit `G` is calculated from
//! `NNNNNNNNNCBBBBBBDEEEEEEFOOOOOOO`.
//!
//! The TD3 encoding is:
//! ```plain
//! TTSSSIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIII
//! NNNNNNNNNCAAABBBBBBDXEEEEEEFOOOOOOOOOOOOOOQG
//! ```
//! The fields are as with TD1, except:
//! * `NNNNNNNNN` (passport number) cannot be longer than 9 characters
//! * `Q` is a check digit of `OOOOOOOOOOOOOO`
//! * `G` (composite check digit) is calculated from
//!   `NNNNNNNNNCBBBBBBDEEEEEEFOOOOOOOOOOOOOOQ`
//!
//! The encoded form handed to [`Mrz::from_encoded`] is the concatenation of all lines without line
//! breaks, as stored in EF.DG1.


use std::fmt;
use std::ops::Range;
use std::str::FromStr;

use smallstr::SmallString;


#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Variant {
    Td1,
    Td2,
    Td3,
}
impl Variant {
    /// The length of the encoded MRZ of this variant, without line breaks.
    pub const fn encoded_len(&self) -> usize {
        match self {
            Self::Td1 => 90,
            Self::Td2 => 72,
            Self::Td3 => 88,
        }
    }

    pub fn from_encoded_len(len: usize) -> Option<Self> {
        match len {
            90 => Some(Self::Td1),
            72 => Some(Self::Td2),
            88 => Some(Self::Td3),
            _ => None,
        }
    }

    /// Byte ranges of the encoded MRZ covered by the composite check digit.
    fn composite_ranges(&self) -> &'static [Range<usize>] {
        match self {
            Self::Td1 => &[5..30, 30..37, 38..45, 48..59],
            Self::Td2 => &[36..46, 49..56, 57..71],
            Self::Td3 => &[44..54, 57..64, 65..87],
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Sex {
    Female,
    Male,
    Unspecified,
}
impl Sex {
    pub const fn as_char(&self) -> char {
        match self {
            Self::Female => 'F',
            Self::Male => 'M',
            Self::Unspecified => '<',
        }
    }
}

/// A field protected by a check digit.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Field {
    DocumentNumber,
    DateOfBirth,
    DateOfExpiry,
    OptionalData,
    Composite,
}
impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DocumentNumber => write!(f, "document number"),
            Self::DateOfBirth => write!(f, "date of birth"),
            Self::DateOfExpiry => write!(f, "date of expiry"),
            Self::OptionalData => write!(f, "optional data"),
            Self::Composite => write!(f, "composite"),
        }
    }
}


#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Error {
    InvalidFormat { length: usize },
    InvalidCharacter { position: usize, character: u8 },
    InvalidCheckDigit { field: Field },
    CheckDigitMismatch { field: Field, expected: u8, obtained: u8 },
    InvalidDate { field: Field },
    InvalidSex { character: u8 },
}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidFormat { length }
                => write!(f, "MRZ has invalid length {} (expected 90, 72 or 88)", length),
            Self::InvalidCharacter { position, character }
                => write!(f, "invalid character 0x{:02X} at position {}", character, position),
            Self::InvalidCheckDigit { field }
                => write!(f, "check digit of {} is not a digit", field),
            Self::CheckDigitMismatch { field, expected, obtained }
                => write!(f, "{} check digit mismatch: calculated {}, MRZ contains {}", field, expected, obtained),
            Self::InvalidDate { field }
                => write!(f, "{} is not a valid date", field),
            Self::InvalidSex { character }
                => write!(f, "invalid sex marker 0x{:02X}", character),
        }
    }
}
impl std::error::Error for Error {
}


/// Parsed machine-readable zone of a travel document.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Mrz {
    variant: Variant,

    /// Document type.
    pub document_code: SmallString<[u8; 2]>,

    /// Issuer state or organization of the document.
    pub issuer: SmallString<[u8; 3]>,

    /// Number of the document.
    ///
    /// Can be alphanumeric. Only TD1 documents may have numbers longer than 9 characters.
    pub document_number: SmallString<[u8; 22]>,

    /// Check digit of the document number.
    pub document_number_check: u8,

    /// Nationality of holder.
    pub nationality: SmallString<[u8; 3]>,

    /// Date of birth as YYMMDD.
    pub date_of_birth: SmallString<[u8; 6]>,

    /// Check digit for date of birth.
    pub date_of_birth_check: u8,

    /// Sex.
    pub sex: Sex,

    /// Date of expiry as YYMMDD.
    pub date_of_expiry: SmallString<[u8; 6]>,

    /// Check digit for date of expiry.
    pub date_of_expiry_check: u8,

    /// Optional data 1.
    pub optional_data_1: SmallString<[u8; 15]>,

    /// Optional data 2 (TD1 only).
    pub optional_data_2: SmallString<[u8; 11]>,

    /// Primary identifier (usually the surname), components separated by spaces.
    pub primary_identifier: SmallString<[u8; 39]>,

    /// Secondary identifier (usually the given names), components separated by spaces.
    pub secondary_identifier: SmallString<[u8; 39]>,

    /// Composite check digit.
    pub composite_check: u8,

    encoded: SmallString<[u8; 90]>,
}
impl Mrz {
    /// Parses an MRZ from its encoded form without line breaks.
    pub fn from_encoded(encoded: &[u8]) -> Result<Self, Error> {
        let variant = Variant::from_encoded_len(encoded.len())
            .ok_or(Error::InvalidFormat { length: encoded.len() })?;
        for (position, &character) in encoded.iter().enumerate() {
            if !is_mrz_character(character) {
                return Err(Error::InvalidCharacter { position, character });
            }
        }

        let mut reader = FieldReader::new(encoded);
        match variant {
            Variant::Td1 => Self::parse_td1(&mut reader),
            Variant::Td2 => Self::parse_td2(&mut reader),
            Variant::Td3 => Self::parse_td3(&mut reader),
        }
    }

    fn parse_td1(reader: &mut FieldReader<'_>) -> Result<Self, Error> {
        let document_code = reader.field(2);
        let issuer = reader.field(3);
        let mut document_number: SmallString<[u8; 22]> = reader.field(9);
        let document_number_check_raw = reader.raw(1)[0];
        let mut optional_data_1: SmallString<[u8; 15]> = reader.field(15);
        let (date_of_birth, date_of_birth_check) = reader.date_with_check(Field::DateOfBirth)?;
        let sex = reader.sex()?;
        let (date_of_expiry, date_of_expiry_check) = reader.date_with_check(Field::DateOfExpiry)?;
        let nationality = reader.field(3);
        let mut optional_data_2: SmallString<[u8; 11]> = reader.field(11);
        let composite_check = reader.check_digit(Field::Composite)?;
        let (primary_identifier, secondary_identifier) = reader.names(30);

        let document_number_check = if document_number_check_raw == b'<' && !optional_data_1.is_empty() {
            // long document number continues in optional data 1, followed by its check digit
            let (rest, check) = optional_data_1.split_at(optional_data_1.len() - 1);
            document_number.push_str(rest);
            let check = parse_check_digit(check.as_bytes()[0], Field::DocumentNumber)?;
            optional_data_1 = SmallString::from_str(&optional_data_2);
            optional_data_2 = SmallString::new();
            check
        } else {
            parse_check_digit(document_number_check_raw, Field::DocumentNumber)?
        };
        verify_check_digit(&document_number, document_number_check, Field::DocumentNumber)?;

        Ok(Self {
            variant: Variant::Td1,
            document_code,
            issuer,
            document_number,
            document_number_check,
            nationality,
            date_of_birth,
            date_of_birth_check,
            sex,
            date_of_expiry,
            date_of_expiry_check,
            optional_data_1,
            optional_data_2,
            primary_identifier,
            secondary_identifier,
            composite_check,
            encoded: reader.encoded(),
        })
    }

    fn parse_td2(reader: &mut FieldReader<'_>) -> Result<Self, Error> {
        let document_code = reader.field(2);
        let issuer = reader.field(3);
        let (primary_identifier, secondary_identifier) = reader.names(31);
        let document_number: SmallString<[u8; 22]> = reader.field(9);
        let document_number_check = reader.check_digit(Field::DocumentNumber)?;
        verify_check_digit(&document_number, document_number_check, Field::DocumentNumber)?;
        let nationality = reader.field(3);
        let (date_of_birth, date_of_birth_check) = reader.date_with_check(Field::DateOfBirth)?;
        let sex = reader.sex()?;
        let (date_of_expiry, date_of_expiry_check) = reader.date_with_check(Field::DateOfExpiry)?;
        let optional_data_1 = reader.field(7);
        let composite_check = reader.check_digit(Field::Composite)?;

        Ok(Self {
            variant: Variant::Td2,
            document_code,
            issuer,
            document_number,
            document_number_check,
            nationality,
            date_of_birth,
            date_of_birth_check,
            sex,
            date_of_expiry,
            date_of_expiry_check,
            optional_data_1,
            optional_data_2: SmallString::new(),
            primary_identifier,
            secondary_identifier,
            composite_check,
            encoded: reader.encoded(),
        })
    }

    fn parse_td3(reader: &mut FieldReader<'_>) -> Result<Self, Error> {
        let document_code = reader.field(2);
        let issuer = reader.field(3);
        let (primary_identifier, secondary_identifier) = reader.names(39);
        let document_number: SmallString<[u8; 22]> = reader.field(9);
        let document_number_check = reader.check_digit(Field::DocumentNumber)?;
        verify_check_digit(&document_number, document_number_check, Field::DocumentNumber)?;
        let nationality = reader.field(3);
        let (date_of_birth, date_of_birth_check) = reader.date_with_check(Field::DateOfBirth)?;
        let sex = reader.sex()?;
        let (date_of_expiry, date_of_expiry_check) = reader.date_with_check(Field::DateOfExpiry)?;
        let optional_data_1: SmallString<[u8; 15]> = reader.field(14);
        let optional_data_check = reader.check_digit(Field::OptionalData)?;
        verify_check_digit(&optional_data_1, optional_data_check, Field::OptionalData)?;
        let composite_check = reader.check_digit(Field::Composite)?;

        Ok(Self {
            variant: Variant::Td3,
            document_code,
            issuer,
            document_number,
            document_number_check,
            nationality,
            date_of_birth,
            date_of_birth_check,
            sex,
            date_of_expiry,
            date_of_expiry_check,
            optional_data_1,
            optional_data_2: SmallString::new(),
            primary_identifier,
            secondary_identifier,
            composite_check,
            encoded: reader.encoded(),
        })
    }

    pub fn variant(&self) -> Variant {
        self.variant
    }

    /// The encoded MRZ without line breaks.
    pub fn as_str(&self) -> &str {
        &self.encoded
    }

    /// Whether the composite check digit matches the rest of the MRZ.
    ///
    /// Parsing does not fail on a composite check digit mismatch; some issuers are known to get it
    /// wrong.
    pub fn is_composite_valid(&self) -> bool {
        let bytes = self.encoded.as_bytes();
        let composite_data: Vec<u8> = self.variant.composite_ranges().iter()
            .flat_map(|range| bytes[range.clone()].iter().copied())
            .collect();
        check_digit(&composite_data) == Some(self.composite_check)
    }
}
impl FromStr for Mrz {
    type Err = Error;

    /// Parses an MRZ as printed, i.e. with or without line breaks between the lines.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let encoded: Vec<u8> = s.trim().bytes()
            .filter(|b| *b != b'\r' && *b != b'\n')
            .collect();
        Self::from_encoded(&encoded)
    }
}
impl fmt::Display for Mrz {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let line_length = match self.variant {
            Variant::Td1 => 30,
            Variant::Td2 => 36,
            Variant::Td3 => 44,
        };
        let bytes = self.encoded.as_bytes();
        for (i, line) in bytes.chunks(line_length).enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            // the encoded form has been validated to be ASCII
            write!(f, "{}", String::from_utf8_lossy(line))?;
        }
        Ok(())
    }
}


struct FieldReader<'a> {
    data: &'a [u8],
    offset: usize,
}
impl<'a> FieldReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn raw(&mut self, length: usize) -> &'a [u8] {
        let slice = &self.data[self.offset..self.offset + length];
        self.offset += length;
        slice
    }

    /// Reads a field of the given length, stripping the trailing `<` filler.
    fn field<A: smallvec::Array<Item = u8>>(&mut self, length: usize) -> SmallString<A> {
        let raw = self.raw(length);
        let end = raw.iter().rposition(|b| *b != b'<').map(|p| p + 1).unwrap_or(0);
        ascii_to_small_string(&raw[..end])
    }

    fn check_digit(&mut self, field: Field) -> Result<u8, Error> {
        parse_check_digit(self.raw(1)[0], field)
    }

    fn date_with_check(&mut self, field: Field) -> Result<(SmallString<[u8; 6]>, u8), Error> {
        let raw = self.raw(6);
        if !raw.iter().all(|b| b.is_ascii_digit()) {
            return Err(Error::InvalidDate { field });
        }
        let date: SmallString<[u8; 6]> = ascii_to_small_string(raw);
        let check = self.check_digit(field)?;
        verify_check_digit(&date, check, field)?;
        Ok((date, check))
    }

    fn sex(&mut self) -> Result<Sex, Error> {
        match self.raw(1)[0] {
            b'F' => Ok(Sex::Female),
            b'M' => Ok(Sex::Male),
            b'<'|b'X'|b' ' => Ok(Sex::Unspecified),
            other => Err(Error::InvalidSex { character: other }),
        }
    }

    fn names(&mut self, length: usize) -> (SmallString<[u8; 39]>, SmallString<[u8; 39]>) {
        let name_field: SmallString<[u8; 39]> = self.field(length);
        let mut identifiers = name_field.split("<<");
        let primary = identifiers.next()
            .map(|p| SmallString::from_str(&p.replace('<', " ")))
            .unwrap_or_else(SmallString::new);
        let secondary: Vec<String> = identifiers
            .map(|s| s.replace('<', " "))
            .collect();
        (primary, SmallString::from_str(&secondary.join(" ")))
    }

    fn encoded(&self) -> SmallString<[u8; 90]> {
        ascii_to_small_string(self.data)
    }
}


fn is_mrz_character(b: u8) -> bool {
    b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'<' || b == b' '
}

fn ascii_to_small_string<A: smallvec::Array<Item = u8>>(bytes: &[u8]) -> SmallString<A> {
    bytes.iter().map(|b| char::from(*b)).collect()
}

fn parse_check_digit(b: u8, field: Field) -> Result<u8, Error> {
    match b {
        b'0'..=b'9' => Ok(b - b'0'),
        // a filler in a check digit position counts as zero
        b'<' => Ok(0),
        _ => Err(Error::InvalidCheckDigit { field }),
    }
}

fn verify_check_digit(value: &str, obtained: u8, field: Field) -> Result<(), Error> {
    let expected = check_digit(value.as_bytes())
        .ok_or(Error::InvalidCheckDigit { field })?;
    if expected != obtained {
        return Err(Error::CheckDigitMismatch { field, expected, obtained });
    }
    Ok(())
}


/// Calculates the check digit of an MRZ field.
///
/// Characters are valued `0`-`9` as themselves, `A`-`Z` as 10-35 and `<` (as well as space) as 0,
/// weighted cyclically by 7, 3 and 1, summed up and reduced modulo 10. Returns `None` if the data
/// contains any other character.
pub fn check_digit(data: &[u8]) -> Option<u8> {
    const WEIGHTS: [u32; 3] = [7, 3, 1];

    let mut sum: u32 = 0;
    for (b, weight) in data.iter().copied().zip(WEIGHTS.iter().copied().cycle()) {
        let value = match b {
            b'0'..=b'9' => b - b'0',
            b'A'..=b'Z' => b + 10 - b'A',
            b'<'|b' ' => 0,
            _ => return None,
        };
        sum += u32::from(value) * weight;
    }

    Some((sum % 10) as u8)
}
