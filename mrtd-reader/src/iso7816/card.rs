use std::fmt;

use crate::iso7816::apdu;


#[derive(Debug)]
pub enum CommunicationError {
    Write(apdu::WriteError),
    #[cfg(feature = "pcsc")]
    Pcsc(pcsc::Error),
    Transport(Box<dyn std::error::Error + Send + Sync>),
    ConnectionLost,
    SessionInvalidated,
    ShortResponse,
}
impl CommunicationError {
    /// Whether the link to the chip is gone, making any further command pointless.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Write(_) | Self::ConnectionLost | Self::SessionInvalidated)
    }
}
impl fmt::Display for CommunicationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Write(e) => write!(f, "APDU write error: {}", e),
            #[cfg(feature = "pcsc")]
            Self::Pcsc(e) => write!(f, "PCSC error: {}", e),
            Self::Transport(e) => write!(f, "transport error: {}", e),
            Self::ConnectionLost => write!(f, "tag connection lost"),
            Self::SessionInvalidated => write!(f, "session invalidated"),
            Self::ShortResponse => write!(f, "response too short"),
        }
    }
}
impl std::error::Error for CommunicationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Write(e) => Some(e),
            #[cfg(feature = "pcsc")]
            Self::Pcsc(e) => Some(e),
            Self::Transport(e) => Some(e.as_ref()),
            Self::ConnectionLost => None,
            Self::SessionInvalidated => None,
            Self::ShortResponse => None,
        }
    }
}
impl From<apdu::WriteError> for CommunicationError {
    fn from(value: apdu::WriteError) -> Self { Self::Write(value) }
}
#[cfg(feature = "pcsc")]
impl From<pcsc::Error> for CommunicationError {
    fn from(value: pcsc::Error) -> Self {
        match value {
            pcsc::Error::RemovedCard|pcsc::Error::ResetCard|pcsc::Error::NoSmartcard|pcsc::Error::ReaderUnavailable
                => Self::ConnectionLost,
            other => Self::Pcsc(other),
        }
    }
}


/// A smart card compatible with ISO/IEC 7816.
pub trait SmartCard {
    /// Send a request APDU to the smart card and receive a response APDU.
    fn communicate(&mut self, request: &apdu::Apdu) -> Result<apdu::Response, CommunicationError>;
}
impl<SC: SmartCard + ?Sized> SmartCard for Box<SC> {
    fn communicate(&mut self, request: &apdu::Apdu) -> Result<apdu::Response, CommunicationError> {
        (**self).communicate(request)
    }
}
#[cfg(feature = "pcsc")]
impl SmartCard for pcsc::Card {
    fn communicate(&mut self, request: &apdu::Apdu) -> Result<apdu::Response, CommunicationError> {
        let out_buf = request.to_bytes()?;
        tracing::trace!("sending to card:\n{}", crate::hexdump(&out_buf));
        let mut in_buf = vec![0u8; request.data.response_data_length().unwrap_or(0) + 2];
        let in_slice = self.transmit(&out_buf, &mut in_buf)?;
        tracing::trace!("received from card:\n{}", crate::hexdump(in_slice));
        apdu::Response::from_slice(in_slice)
            .ok_or(CommunicationError::ShortResponse)
    }
}
