//! Secure Messaging with 3DES session keys established by Basic Access Control.


use std::fmt;

use tracing::trace;
use zeroize_derive::ZeroizeOnDrop;

use crate::crypt::{self, pad, unpad};
use crate::crypt::cipher_mac::{Cam3Des, CipherAndMac};
use crate::iso7816::apdu::{Apdu, Data, Response, ResponseTrailer};
use crate::tlv;


const DO_ENCRYPTED_DATA: u32 = 0x87;
const DO_EXPECTED_LENGTH: u32 = 0x97;
const DO_STATUS: u32 = 0x99;
const DO_MAC: u32 = 0x8E;

/// Padding indicator of DO'87' announcing ISO/IEC 7816-4 padding.
const PADDING_ISO7816: u8 = 0x01;


#[derive(Debug)]
pub enum Error {
    Crypt(crypt::Error),
    Encoding(tlv::Error),
    ResponseTlvFormat,
    MissingResponseMac,
    ResponseMac,
    MissingResponseStatus,
    StatusLength { obtained: Vec<u8> },
    UnknownPadding { padding_mode: u8 },
    InvalidPadding,
}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Crypt(e)
                => write!(f, "cryptographic error: {}", e),
            Self::Encoding(e)
                => write!(f, "failed to encode data object: {}", e),
            Self::ResponseTlvFormat
                => write!(f, "response has an invalid TLV format"),
            Self::MissingResponseMac
                => write!(f, "response does not contain a MAC"),
            Self::ResponseMac
                => write!(f, "response MAC incorrect"),
            Self::MissingResponseStatus
                => write!(f, "response does not contain status"),
            Self::StatusLength { obtained }
                => write!(f, "status has unexpected length {}", obtained.len()),
            Self::UnknownPadding { padding_mode }
                => write!(f, "response payload has unknown padding mode {}", padding_mode),
            Self::InvalidPadding
                => write!(f, "response payload has invalid padding"),
        }
    }
}
impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Crypt(e) => Some(e),
            Self::Encoding(e) => Some(e),
            Self::ResponseTlvFormat => None,
            Self::MissingResponseMac => None,
            Self::ResponseMac => None,
            Self::MissingResponseStatus => None,
            Self::StatusLength { .. } => None,
            Self::UnknownPadding { .. } => None,
            Self::InvalidPadding => None,
        }
    }
}
impl From<crypt::Error> for Error {
    fn from(value: crypt::Error) -> Self { Self::Crypt(value) }
}
impl From<tlv::Error> for Error {
    fn from(value: tlv::Error) -> Self { Self::Encoding(value) }
}


/// A data object of a protected response, borrowed from the response body.
#[derive(Clone, Copy, Debug)]
struct ResponseObject<'d> {
    tag: u32,
    encoded: &'d [u8],
    value: &'d [u8],
}

fn split_response_objects(mut body: &[u8]) -> Result<Vec<ResponseObject<'_>>, Error> {
    let mut objects = Vec::new();
    while !body.is_empty() {
        let (tag, value, consumed) = tlv::decode(body)
            .map_err(|_| Error::ResponseTlvFormat)?;
        objects.push(ResponseObject {
            tag,
            encoded: &body[..consumed],
            value,
        });
        body = &body[consumed..];
    }
    Ok(objects)
}

fn data_object(tag: u8, value: &[u8]) -> Result<Vec<u8>, Error> {
    let length = tlv::encode_length(value.len())?;
    let mut object = Vec::with_capacity(1 + length.len() + value.len());
    object.push(tag);
    object.extend(length);
    object.extend_from_slice(value);
    Ok(object)
}


/// A Secure Messaging session using 3DES encryption and Retail MAC.
///
/// Holds the session keys and the send sequence counter (SSC). Both are wiped when the session is
/// dropped.
#[derive(ZeroizeOnDrop)]
pub struct Sm3Des {
    k_session_enc: [u8; 16],
    k_session_mac: [u8; 16],
    send_sequence_counter: [u8; 8],
}
impl Sm3Des {
    pub fn new(
        k_session_enc: [u8; 16],
        k_session_mac: [u8; 16],
        send_sequence_counter: [u8; 8],
    ) -> Self {
        Self {
            k_session_enc,
            k_session_mac,
            send_sequence_counter,
        }
    }

    pub fn send_sequence_counter(&self) -> &[u8; 8] {
        &self.send_sequence_counter
    }

    /// Increments the send sequence counter as a big-endian integer, wrapping around.
    pub fn increment_send_sequence_counter(&mut self) {
        for b in self.send_sequence_counter.iter_mut().rev() {
            let (incremented, carry) = b.overflowing_add(1);
            *b = incremented;
            if !carry {
                break;
            }
        }
    }

    fn mac(&self, data: &[u8]) -> Result<Vec<u8>, Error> {
        let mut mac_input = Vec::with_capacity(8 + data.len() + 8);
        mac_input.extend_from_slice(&self.send_sequence_counter);
        mac_input.extend_from_slice(data);
        pad(&mut mac_input, Cam3Des.mac_block_size());
        let mac = Cam3Des.mac_padded_data(&mac_input, &self.k_session_mac)?;
        Ok(mac.to_vec())
    }

    /// Wraps a plain command APDU into a protected one.
    pub fn protect(&mut self, request: &Apdu) -> Result<Apdu, Error> {
        self.increment_send_sequence_counter();

        let mut header = request.header;
        header.cla |= 0x0C;

        let mut padded_header = header.to_bytes().to_vec();
        pad(&mut padded_header, Cam3Des.mac_block_size());

        let mut body = Vec::new();
        if let Some(request_data) = request.data.request_data() {
            let mut padded_data = request_data.to_vec();
            pad(&mut padded_data, Cam3Des.cipher_block_size());
            Cam3Des.encrypt_padded_data(&mut padded_data, &self.k_session_enc, &[0u8; 8])?;

            let mut value = Vec::with_capacity(1 + padded_data.len());
            value.push(PADDING_ISO7816);
            value.extend(padded_data);
            body.extend(data_object(DO_ENCRYPTED_DATA as u8, &value)?);
        }

        match &request.data {
            Data::NoData|Data::RequestDataShort { .. }|Data::RequestDataExtended { .. } => {},
            Data::ResponseDataShort { response_data_length }|Data::BothDataShort { response_data_length, .. } => {
                body.extend(data_object(DO_EXPECTED_LENGTH as u8, &[*response_data_length])?);
            },
            Data::ResponseDataExtended { response_data_length }|Data::BothDataExtended { response_data_length, .. } => {
                body.extend(data_object(DO_EXPECTED_LENGTH as u8, &response_data_length.to_be_bytes())?);
            },
        }

        let mut mac_data = padded_header;
        mac_data.extend(&body);
        let mac = self.mac(&mac_data)?;
        body.extend(data_object(DO_MAC as u8, &mac)?);

        let data = if body.len() > 255 || request.data.is_extended() {
            Data::BothDataExtended { request_data: body, response_data_length: 0 }
        } else {
            Data::BothDataShort { request_data: body, response_data_length: 0 }
        };
        Ok(Apdu::new(header, data))
    }

    /// Verifies and decrypts a protected response APDU.
    ///
    /// The MAC is checked before anything is decrypted. A response without data carrying an
    /// error status is returned as-is, since chips report Secure Messaging failures in plain.
    pub fn unprotect(&mut self, response: &Response) -> Result<Response, Error> {
        self.increment_send_sequence_counter();

        if response.data.is_empty() && !response.trailer.is_success() {
            trace!("passing through plain error status {}", response.trailer);
            return Ok(response.clone());
        }

        let objects = split_response_objects(&response.data)?;
        let received_mac = objects.iter()
            .find(|o| o.tag == DO_MAC)
            .ok_or(Error::MissingResponseMac)?;

        let mut mac_data = Vec::with_capacity(response.data.len());
        for object in objects.iter().filter(|o| o.tag & 0x01 != 0) {
            mac_data.extend_from_slice(object.encoded);
        }
        let mut mac_input = Vec::with_capacity(8 + mac_data.len() + 8);
        mac_input.extend_from_slice(&self.send_sequence_counter);
        mac_input.extend(mac_data);
        pad(&mut mac_input, Cam3Des.mac_block_size());
        if !Cam3Des.verify_mac_padded_data(&mac_input, &self.k_session_mac, received_mac.value)? {
            return Err(Error::ResponseMac);
        }

        let data = match objects.iter().find(|o| o.tag == DO_ENCRYPTED_DATA) {
            None => Vec::new(),
            Some(object) => {
                let (&padding_mode, encrypted) = object.value.split_first()
                    .ok_or(Error::InvalidPadding)?;
                if padding_mode != PADDING_ISO7816 {
                    return Err(Error::UnknownPadding { padding_mode });
                }
                let mut decrypted = encrypted.to_vec();
                Cam3Des.decrypt_padded_data(&mut decrypted, &self.k_session_enc, &[0u8; 8])?;
                unpad(&decrypted)
                    .map_err(|_| Error::InvalidPadding)?
                    .to_vec()
            },
        };

        let status = objects.iter()
            .find(|o| o.tag == DO_STATUS)
            .ok_or(Error::MissingResponseStatus)?;
        if status.value.len() != 2 {
            return Err(Error::StatusLength { obtained: status.value.to_vec() });
        }

        Ok(Response::new(data, ResponseTrailer::new(status.value[0], status.value[1])))
    }
}
