//! Access key derived from the machine-readable zone.
//!
//! The MRZ information used for Basic Access Control consists of the document number, the date of
//! birth and the date of expiry, each followed by its check digit. The key seed is the first 16
//! bytes of the SHA-1 hash of that string.


use std::fmt;

use digest::Digest;
use sha1::Sha1;
use smallstr::SmallString;
use zeroize::Zeroizing;

use crate::mrz::{check_digit, Mrz};


#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Error {
    InvalidDocumentNumber,
    InvalidDateOfBirth,
    InvalidDateOfExpiry,
}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidDocumentNumber => write!(f, "document number contains characters not allowed in an MRZ"),
            Self::InvalidDateOfBirth => write!(f, "date of birth is not in YYMMDD format"),
            Self::InvalidDateOfExpiry => write!(f, "date of expiry is not in YYMMDD format"),
        }
    }
}
impl std::error::Error for Error {
}


#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct MrzKey {
    document_number: SmallString<[u8; 22]>,
    date_of_birth: SmallString<[u8; 6]>,
    date_of_expiry: SmallString<[u8; 6]>,
}
impl MrzKey {
    /// Creates a new key from the document number and the dates of birth and expiry (YYMMDD).
    ///
    /// Document numbers shorter than nine characters are padded with `<` as they are in the MRZ.
    pub fn new(document_number: &str, date_of_birth: &str, date_of_expiry: &str) -> Result<Self, Error> {
        let document_number = document_number.trim().to_ascii_uppercase();
        if document_number.is_empty() || document_number.len() > 22 {
            return Err(Error::InvalidDocumentNumber);
        }
        let valid_document_number = document_number.bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'<');
        if !valid_document_number {
            return Err(Error::InvalidDocumentNumber);
        }
        if !is_mrz_date(date_of_birth) {
            return Err(Error::InvalidDateOfBirth);
        }
        if !is_mrz_date(date_of_expiry) {
            return Err(Error::InvalidDateOfExpiry);
        }

        Ok(Self {
            document_number: padded_document_number(&document_number),
            date_of_birth: SmallString::from_str(date_of_birth),
            date_of_expiry: SmallString::from_str(date_of_expiry),
        })
    }

    pub fn document_number(&self) -> &str {
        &self.document_number
    }

    pub fn date_of_birth(&self) -> &str {
        &self.date_of_birth
    }

    pub fn date_of_expiry(&self) -> &str {
        &self.date_of_expiry
    }

    /// The MRZ information string: each field followed by its check digit.
    pub fn mrz_information(&self) -> Zeroizing<String> {
        let mut ret = Zeroizing::new(String::with_capacity(22 + 1 + 6 + 1 + 6 + 1));
        for field in [self.document_number.as_str(), self.date_of_birth.as_str(), self.date_of_expiry.as_str()] {
            ret.push_str(field);
            // all fields have been validated to consist of MRZ characters
            let check = check_digit(field.as_bytes()).unwrap_or(0);
            ret.push(char::from(b'0' + check));
        }
        ret
    }

    /// The 16-byte key seed from which the BAC keys are derived.
    pub fn bac_key_seed(&self) -> Zeroizing<[u8; 16]> {
        let information = self.mrz_information();
        let mut sha1 = Sha1::new();
        Digest::update(&mut sha1, information.as_bytes());
        let hash = sha1.finalize();

        let mut seed = Zeroizing::new([0u8; 16]);
        seed.copy_from_slice(&hash[0..16]);
        seed
    }
}
impl From<&Mrz> for MrzKey {
    fn from(mrz: &Mrz) -> Self {
        // parsed MRZ fields are already padded and validated
        Self {
            document_number: padded_document_number(&mrz.document_number),
            date_of_birth: mrz.date_of_birth.clone(),
            date_of_expiry: mrz.date_of_expiry.clone(),
        }
    }
}


fn padded_document_number(document_number: &str) -> SmallString<[u8; 22]> {
    let mut padded = SmallString::from_str(document_number);
    while padded.len() < 9 {
        padded.push('<');
    }
    padded
}

fn is_mrz_date(value: &str) -> bool {
    value.len() == 6 && value.bytes().all(|b| b.is_ascii_digit())
}
