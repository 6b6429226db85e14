//! ISO/IEC 7816 smart card communication.


pub mod apdu;
pub mod card;
pub mod status;
