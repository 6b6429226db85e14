//! Basic Access Control.


use std::fmt;

use block_padding::{Iso7816, RawPadding};
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::{debug, instrument};
use zeroize::Zeroizing;

use crate::crypt;
use crate::crypt::cipher_mac::{Cam3Des, CipherAndMac};
use crate::iso7816::card::SmartCard;
use crate::mrz_key::MrzKey;
use crate::secure_messaging::Sm3Des;
use crate::tag::{MrtdTag, TagError};


#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum MismatchedValue {
    RndIc,
    RndIfd,
}


#[derive(Debug)]
pub enum Error {
    Tag(TagError),
    Crypt(crypt::Error),
    ResponseMac,
    ValueMismatch { value: MismatchedValue },
}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tag(e)
                => write!(f, "tag error: {}", e),
            Self::Crypt(e)
                => write!(f, "cryptographic error: {}", e),
            Self::ResponseMac
                => write!(f, "MUTUAL AUTHENTICATE response MAC incorrect"),
            Self::ValueMismatch { value }
                => write!(f, "{:?} mismatched", value),
        }
    }
}
impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Tag(e) => Some(e),
            Self::Crypt(e) => Some(e),
            Self::ResponseMac => None,
            Self::ValueMismatch { .. } => None,
        }
    }
}
impl From<TagError> for Error {
    fn from(value: TagError) -> Self { Self::Tag(value) }
}
impl From<crypt::Error> for Error {
    fn from(value: crypt::Error) -> Self { Self::Crypt(value) }
}


/// Session keys and send sequence counter resulting from a successful handshake.
pub struct SessionKeys {
    pub k_session_enc: Zeroizing<[u8; 16]>,
    pub k_session_mac: Zeroizing<[u8; 16]>,
    pub send_sequence_counter: [u8; 8],
}
impl SessionKeys {
    pub fn into_session(self) -> Sm3Des {
        Sm3Des::new(*self.k_session_enc, *self.k_session_mac, self.send_sequence_counter)
    }
}


fn derive_key_pair(k_seed: &[u8]) -> (Zeroizing<[u8; 16]>, Zeroizing<[u8; 16]>) {
    let mut k_enc = Zeroizing::new([0u8; 16]);
    let mut k_mac = Zeroizing::new([0u8; 16]);
    k_enc.copy_from_slice(&Cam3Des.derive_encryption_key(k_seed));
    k_mac.copy_from_slice(&Cam3Des.derive_mac_key(k_seed));
    (k_enc, k_mac)
}

/// Derives the document basic access keys `(Kenc, Kmac)` from the MRZ key seed.
pub fn derive_document_keys(k_seed: &[u8; 16]) -> (Zeroizing<[u8; 16]>, Zeroizing<[u8; 16]>) {
    derive_key_pair(k_seed)
}

/// Derives the session keys from both key contributions and the SSC from both nonces.
pub fn derive_session_keys(k_ifd: &[u8; 16], k_ic: &[u8; 16], rnd_ic: &[u8; 8], rnd_ifd: &[u8; 8]) -> SessionKeys {
    let mut k_session_seed = Zeroizing::new([0u8; 16]);
    for ((kss, kifd), kic) in k_session_seed.iter_mut().zip(k_ifd.iter()).zip(k_ic.iter()) {
        *kss = *kifd ^ *kic;
    }
    let (k_session_enc, k_session_mac) = derive_key_pair(k_session_seed.as_slice());

    let mut send_sequence_counter = [0u8; 8];
    send_sequence_counter[0..4].copy_from_slice(&rnd_ic[4..8]);
    send_sequence_counter[4..8].copy_from_slice(&rnd_ifd[4..8]);

    SessionKeys {
        k_session_enc,
        k_session_mac,
        send_sequence_counter,
    }
}


/// Performs the BAC handshake with caller-supplied terminal randomness.
///
/// Any previously installed Secure Messaging session is dropped first. On success, the new
/// session is installed on the tag.
#[instrument(skip_all)]
pub fn establish_with_randomness<SC: SmartCard>(
    tag: &mut MrtdTag<SC>,
    k_seed: &[u8; 16],
    rnd_ifd: &[u8; 8],
    k_ifd: &[u8; 16],
) -> Result<(), Error> {
    tag.clear_session();

    let (k_enc, k_mac) = derive_document_keys(k_seed);

    let rnd_ic = tag.get_challenge()?;
    debug!("obtained challenge from chip");

    // S = RND.IFD || RND.IC || K.IFD
    let mut mut_auth_data = Zeroizing::new([0u8; 32+8]);
    mut_auth_data[0..8].copy_from_slice(rnd_ifd);
    mut_auth_data[8..16].copy_from_slice(&rnd_ic);
    mut_auth_data[16..32].copy_from_slice(k_ifd);

    Cam3Des.encrypt_padded_data(&mut mut_auth_data[0..32], k_enc.as_slice(), &[0u8; 8])?;

    // MAC over the padded cryptogram; it then takes the place of the padding
    Iso7816::raw_pad(mut_auth_data.as_mut_slice(), 32);
    let mac = Cam3Des.mac_padded_data(mut_auth_data.as_slice(), k_mac.as_slice())?;
    mut_auth_data[32..40].copy_from_slice(&mac);

    let mut response = Zeroizing::new(tag.mutual_authenticate(&mut_auth_data)?);

    let mut response_to_verify = [0u8; 32+8];
    response_to_verify[0..32].copy_from_slice(&response[0..32]);
    Iso7816::raw_pad(&mut response_to_verify, 32);
    if !Cam3Des.verify_mac_padded_data(&response_to_verify, k_mac.as_slice(), &response[32..40])? {
        return Err(Error::ResponseMac);
    }

    Cam3Des.decrypt_padded_data(&mut response[0..32], k_enc.as_slice(), &[0u8; 8])?;

    if response[0..8] != rnd_ic {
        return Err(Error::ValueMismatch { value: MismatchedValue::RndIc });
    }
    if response[8..16] != rnd_ifd[..] {
        return Err(Error::ValueMismatch { value: MismatchedValue::RndIfd });
    }
    let mut k_ic = Zeroizing::new([0u8; 16]);
    k_ic.copy_from_slice(&response[16..32]);

    let keys = derive_session_keys(k_ifd, &k_ic, &rnd_ic, rnd_ifd);
    tag.set_session(keys.into_session());
    debug!("secure messaging established");
    Ok(())
}

/// Performs the BAC handshake using the access key printed in the MRZ.
#[instrument(skip_all)]
pub fn establish<SC: SmartCard>(tag: &mut MrtdTag<SC>, mrz_key: &MrzKey) -> Result<(), Error> {
    let k_seed = mrz_key.bac_key_seed();

    let mut rnd_ifd = [0u8; 8];
    let mut k_ifd = Zeroizing::new([0u8; 16]);
    OsRng.fill_bytes(&mut rnd_ifd);
    OsRng.fill_bytes(k_ifd.as_mut_slice());

    establish_with_randomness(tag, &k_seed, &rnd_ifd, &k_ifd)
}
