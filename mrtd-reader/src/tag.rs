//! Command-level access to an MRTD chip.
//!
//! [`MrtdTag`] sends the ICAO 9303 commands needed for reading a passport. Once a Secure Messaging
//! session has been installed (usually by [`crate::bac::establish`]), every command is protected
//! and every response unprotected transparently.


use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, instrument, trace};

use crate::iso7816::apdu::{Apdu, CommandHeader, Data, ResponseTrailer};
use crate::iso7816::card::{CommunicationError, SmartCard};
use crate::iso7816::status::{describe, StatusCondition};
use crate::secure_messaging::{self, Sm3Des};


/// The maximum number of bytes requested by a single READ BINARY.
pub const DEFAULT_MAX_READ_LENGTH: usize = 224;

/// The largest offset expressible in P1-P2 of READ BINARY without a short EF identifier.
pub const MAX_READ_OFFSET: usize = 0x7FFF;

/// Application identifier of the eMRTD application.
pub const EMRTD_APPLICATION_ID: [u8; 7] = [0xA0, 0x00, 0x00, 0x02, 0x47, 0x10, 0x01];


#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Operation {
    GetChallenge,
    MutualAuthenticate,
    InternalAuthenticate,
    SelectApplication,
    SelectFile,
    ReadBinary,
}
impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GetChallenge => write!(f, "GET CHALLENGE"),
            Self::MutualAuthenticate => write!(f, "MUTUAL AUTHENTICATE"),
            Self::InternalAuthenticate => write!(f, "INTERNAL AUTHENTICATE"),
            Self::SelectApplication => write!(f, "SELECT APPLICATION"),
            Self::SelectFile => write!(f, "SELECT FILE"),
            Self::ReadBinary => write!(f, "READ BINARY"),
        }
    }
}


#[derive(Debug)]
pub enum TagError {
    Communication(CommunicationError),
    Protect(secure_messaging::Error),
    Unprotect(secure_messaging::Error),
    Status { operation: Operation, trailer: ResponseTrailer },
    UnexpectedLength { operation: Operation, expected: usize, obtained: usize },
    InvalidOffset { offset: usize },
}
impl TagError {
    /// The classification of the status word, if the chip answered with an error status.
    pub fn status_condition(&self) -> Option<StatusCondition> {
        match self {
            Self::Status { trailer, .. } => Some(StatusCondition::classify(*trailer)),
            _ => None,
        }
    }
}
impl fmt::Display for TagError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Communication(e)
                => write!(f, "communication error: {}", e),
            Self::Protect(e)
                => write!(f, "unable to protect APDU: {}", e),
            Self::Unprotect(e)
                => write!(f, "unable to unprotect APDU: {}", e),
            Self::Status { operation, trailer }
                => write!(f, "{} failed with status {}: {}", operation, trailer, describe(*trailer)),
            Self::UnexpectedLength { operation, expected, obtained }
                => write!(f, "{} response has length {}, expected {}", operation, obtained, expected),
            Self::InvalidOffset { offset }
                => write!(f, "offset {} exceeds the maximum READ BINARY offset {}", offset, MAX_READ_OFFSET),
        }
    }
}
impl std::error::Error for TagError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Communication(e) => Some(e),
            Self::Protect(e) => Some(e),
            Self::Unprotect(e) => Some(e),
            Self::Status { .. } => None,
            Self::UnexpectedLength { .. } => None,
            Self::InvalidOffset { .. } => None,
        }
    }
}
impl From<CommunicationError> for TagError {
    fn from(value: CommunicationError) -> Self { Self::Communication(value) }
}


/// A handle through which a session with a tag can be cancelled from elsewhere.
///
/// Once invalidated, the next command sent to the tag fails with
/// [`CommunicationError::SessionInvalidated`] and the Secure Messaging keys are dropped.
#[derive(Clone, Debug, Default)]
pub struct SessionHandle {
    invalidated: Arc<AtomicBool>,
}
impl SessionHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invalidate(&self) {
        self.invalidated.store(true, Ordering::SeqCst);
    }

    pub fn is_invalidated(&self) -> bool {
        self.invalidated.load(Ordering::SeqCst)
    }
}


/// An MRTD chip reachable through a smart card transport.
pub struct MrtdTag<SC: SmartCard> {
    card: SC,
    session: Option<Sm3Des>,
    max_read_length: usize,
    handle: SessionHandle,
}
impl<SC: SmartCard> MrtdTag<SC> {
    pub fn new(card: SC) -> Self {
        Self {
            card,
            session: None,
            max_read_length: DEFAULT_MAX_READ_LENGTH,
            handle: SessionHandle::new(),
        }
    }

    /// Returns a handle that can invalidate this tag's session.
    pub fn session_handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    pub fn is_invalidated(&self) -> bool {
        self.handle.is_invalidated()
    }

    pub fn has_secure_messaging(&self) -> bool {
        self.session.is_some()
    }

    /// Installs a Secure Messaging session; all subsequent commands are protected with it.
    pub fn set_session(&mut self, session: Sm3Des) {
        self.session = Some(session);
    }

    /// Drops the Secure Messaging session, wiping its keys.
    pub fn clear_session(&mut self) {
        self.session = None;
    }

    pub fn max_read_length(&self) -> usize {
        self.max_read_length
    }

    pub fn set_max_read_length(&mut self, max_read_length: usize) {
        self.max_read_length = max_read_length;
    }

    pub fn card(&self) -> &SC {
        &self.card
    }

    pub fn card_mut(&mut self) -> &mut SC {
        &mut self.card
    }

    pub fn into_card(self) -> SC {
        self.card
    }

    /// Sends a command and returns the response data of a successful response.
    ///
    /// Any status other than 0x9000 becomes [`TagError::Status`].
    #[instrument(skip(self, request))]
    pub fn send(&mut self, operation: Operation, request: Apdu) -> Result<Vec<u8>, TagError> {
        if self.handle.is_invalidated() {
            self.session = None;
            return Err(CommunicationError::SessionInvalidated.into());
        }

        trace!("plain request {:?}", request.header);
        let response = match self.session.as_mut() {
            Some(session) => {
                let protected = session.protect(&request)
                    .map_err(TagError::Protect)?;
                let protected_response = self.card.communicate(&protected)?;
                session.unprotect(&protected_response)
                    .map_err(TagError::Unprotect)?
            },
            None => self.card.communicate(&request)?,
        };

        if !response.trailer.is_success() {
            debug!("{} answered with {}: {}", operation, response.trailer, describe(response.trailer));
            return Err(TagError::Status { operation, trailer: response.trailer });
        }
        trace!("response data:\n{}", crate::hexdump(&response.data));
        Ok(response.data)
    }

    /// Obtains an 8-byte nonce from the chip.
    pub fn get_challenge(&mut self) -> Result<[u8; 8], TagError> {
        let request = Apdu::new(
            CommandHeader::new(0x00, 0x84, 0x00, 0x00),
            Data::from_parts(None, Some(8)),
        );
        let data = self.send(Operation::GetChallenge, request)?;
        data.as_slice().try_into()
            .map_err(|_| TagError::UnexpectedLength { operation: Operation::GetChallenge, expected: 8, obtained: data.len() })
    }

    /// Sends the terminal's cryptogram and returns the chip's 40-byte cryptogram.
    pub fn mutual_authenticate(&mut self, cryptogram: &[u8; 40]) -> Result<[u8; 40], TagError> {
        let request = Apdu::new(
            CommandHeader::new(0x00, 0x82, 0x00, 0x00),
            Data::from_parts(Some(cryptogram.to_vec()), Some(40)),
        );
        let data = self.send(Operation::MutualAuthenticate, request)?;
        data.as_slice().try_into()
            .map_err(|_| TagError::UnexpectedLength { operation: Operation::MutualAuthenticate, expected: 40, obtained: data.len() })
    }

    /// Asks the chip to sign the given challenge with its Active Authentication key.
    pub fn internal_authenticate(&mut self, challenge: &[u8]) -> Result<Vec<u8>, TagError> {
        let request = Apdu::new(
            CommandHeader::new(0x00, 0x88, 0x00, 0x00),
            Data::from_parts(Some(challenge.to_vec()), Some(256)),
        );
        self.send(Operation::InternalAuthenticate, request)
    }

    /// Selects the eMRTD application by its application identifier.
    ///
    /// Transports that do not select the application themselves need this before BAC.
    pub fn select_emrtd_application(&mut self) -> Result<(), TagError> {
        let request = Apdu::new(
            CommandHeader::new(0x00, 0xA4, 0x04, 0x0C),
            Data::from_parts(Some(EMRTD_APPLICATION_ID.to_vec()), None),
        );
        self.send(Operation::SelectApplication, request)?;
        Ok(())
    }

    /// Selects an elementary file by its file identifier.
    pub fn select_file(&mut self, fid: [u8; 2]) -> Result<(), TagError> {
        let request = Apdu::new(
            CommandHeader::new(0x00, 0xA4, 0x02, 0x0C),
            Data::from_parts(Some(fid.to_vec()), None),
        );
        self.send(Operation::SelectFile, request)?;
        Ok(())
    }

    /// Reads up to `length` bytes of the currently selected file, starting at `offset`.
    ///
    /// The chip may return fewer bytes than requested.
    pub fn read_binary(&mut self, offset: usize, length: usize) -> Result<Vec<u8>, TagError> {
        if offset > MAX_READ_OFFSET {
            return Err(TagError::InvalidOffset { offset });
        }
        let offset_bytes = (offset as u16).to_be_bytes();
        let request = Apdu::new(
            CommandHeader::new(0x00, 0xB0, offset_bytes[0], offset_bytes[1]),
            Data::from_parts(None, Some(length)),
        );
        self.send(Operation::ReadBinary, request)
    }
}
