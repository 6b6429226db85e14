//! Cryptographic functionality.


pub mod cipher_mac;


use std::fmt;

use block_padding::{Iso7816, RawPadding};


#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Error {
    InvalidKeyLength { expected: usize, obtained: usize },
    InvalidDataLength { block_size: usize, obtained: usize },
    InvalidPadding,
}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidKeyLength { expected, obtained }
                => write!(f, "key has length {}, expected {}", obtained, expected),
            Self::InvalidDataLength { block_size, obtained }
                => write!(f, "data length {} is not a multiple of the block size {}", obtained, block_size),
            Self::InvalidPadding
                => write!(f, "data has invalid ISO/IEC 7816-4 padding"),
        }
    }
}
impl std::error::Error for Error {
}


/// Sets the least significant bit of a DES key byte so that the byte has odd parity.
pub const fn adjust_parity_bit(byte: u8) -> u8 {
    let upper = byte & 0xFE;
    if upper.count_ones() % 2 == 0 {
        upper | 0x01
    } else {
        upper
    }
}

/// Adjusts the parity bit of every byte of a DES key.
pub fn adjust_des_parity(key: &mut [u8]) {
    for b in key.iter_mut() {
        *b = adjust_parity_bit(*b);
    }
}


/// Pads the data according to ISO/IEC 7816-4 (ISO/IEC 9797-1 padding method 2).
///
/// A byte `0x80` is always appended, followed by as many `0x00` bytes as required to reach a
/// multiple of the block size.
pub fn pad(data: &mut Vec<u8>, block_size: usize) {
    let original_len = data.len();
    let padded_len = (original_len / block_size + 1) * block_size;
    data.resize(padded_len, 0x00);
    Iso7816::raw_pad(data.as_mut_slice(), original_len);
}

/// Returns the data with ISO/IEC 7816-4 padding removed.
pub fn unpad(data: &[u8]) -> Result<&[u8], Error> {
    Iso7816::raw_unpad(data)
        .map_err(|_| Error::InvalidPadding)
}
