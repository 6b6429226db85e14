//! Cipher and MAC (message authentication code) combinations.


use cipher::block_padding::NoPadding;
use cipher::{BlockModeDecrypt, BlockModeEncrypt, KeyIvInit};
use des::{Des, TdesEde2};
use digest::Digest;
use retail_mac::RetailMac;
use retail_mac::digest::{KeyInit, Mac};
use sha1::Sha1;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::crypt::{adjust_des_parity, Error};


/// Key derivation counter for encryption keys.
pub const KDF_ENC: u32 = 1;

/// Key derivation counter for MAC keys.
pub const KDF_MAC: u32 = 2;


/// A combination of cipher, MAC and KDF (key derivation function) usable during authentication and
/// Secure Messaging.
pub trait CipherAndMac {
    /// Size of the cipher key in bytes.
    fn cipher_key_size(&self) -> usize;

    /// Block size of the cipher in bytes.
    fn cipher_block_size(&self) -> usize;

    /// Block size of the MAC in bytes.
    fn mac_block_size(&self) -> usize;

    /// The key derivation function.
    fn derive_key(&self, key_seed: &[u8], counter: u32) -> Zeroizing<Vec<u8>>;

    /// The key derivation function for encryption purposes.
    fn derive_encryption_key(&self, key_seed: &[u8]) -> Zeroizing<Vec<u8>> {
        self.derive_key(key_seed, KDF_ENC)
    }

    /// The key derivation function for message authentication purposes.
    fn derive_mac_key(&self, key_seed: &[u8]) -> Zeroizing<Vec<u8>> {
        self.derive_key(key_seed, KDF_MAC)
    }

    /// Decrypts data in-place using the given key and CBC IV.
    ///
    /// Does not strip padding.
    fn decrypt_padded_data(&self, data: &mut [u8], key: &[u8], iv: &[u8]) -> Result<(), Error>;

    /// Encrypts pre-padded data in-place using the given key and CBC IV.
    fn encrypt_padded_data(&self, data: &mut [u8], key: &[u8], iv: &[u8]) -> Result<(), Error>;

    /// Generates a MAC (message authentication code) for the given pre-padded data and key.
    fn mac_padded_data(&self, data: &[u8], key: &[u8]) -> Result<Zeroizing<Vec<u8>>, Error>;

    /// Verifies whether the given data fits the given MAC (message authentication code).
    fn verify_mac_padded_data(&self, data: &[u8], key: &[u8], expected_mac: &[u8]) -> Result<bool, Error> {
        let computed_mac = self.mac_padded_data(data, key)?;
        Ok(computed_mac.ct_eq(expected_mac).into())
    }
}


/// 3DES-based cipher and MAC.
///
/// 3DES is used in EDE two-key mode:
/// ```plain
/// encrypt((K1, K2), D) = encrypt(K1, decrypt(K2, encrypt(K1, D)))
/// ```
/// The block mode of operation is Cipher Block Chaining (CBC).
///
/// The KDF is equivalent to:
/// ```plain
/// keydata = sha1(key || counter)[0..16]
/// ```
/// whereupon
/// ```plain
/// K1 = keydata[0..8]
/// K2 = keydata[8..16]
/// ```
/// with the least significant bit of each byte adjusted to odd parity.
///
/// The MAC is Retail MAC (ISO/IEC 9797-1 algorithm 3) with DES, zero IV and padding method 2 (bit 1
/// and then as many zero bits as necessary).
pub struct Cam3Des;
impl Cam3Des {
    fn check_data_length(&self, data: &[u8]) -> Result<(), Error> {
        if data.len() % self.cipher_block_size() != 0 {
            Err(Error::InvalidDataLength { block_size: self.cipher_block_size(), obtained: data.len() })
        } else {
            Ok(())
        }
    }

    fn check_key_length(&self, key: &[u8]) -> Result<(), Error> {
        if key.len() != self.cipher_key_size() {
            Err(Error::InvalidKeyLength { expected: self.cipher_key_size(), obtained: key.len() })
        } else {
            Ok(())
        }
    }

    /// Feeds pre-padded data into a Retail MAC keyed with `key`.
    fn retail_mac(&self, data: &[u8], key: &[u8]) -> Result<RetailMac<Des>, Error> {
        self.check_data_length(data)?;
        let mut retail_mac = <RetailMac<Des> as KeyInit>::new_from_slice(key)
            .map_err(|_| Error::InvalidKeyLength { expected: self.cipher_key_size(), obtained: key.len() })?;
        Mac::update(&mut retail_mac, data);
        Ok(retail_mac)
    }
}
impl CipherAndMac for Cam3Des {
    fn cipher_key_size(&self) -> usize { 16 }
    fn cipher_block_size(&self) -> usize { 8 }
    fn mac_block_size(&self) -> usize { 8 }

    fn derive_key(&self, key_seed: &[u8], counter: u32) -> Zeroizing<Vec<u8>> {
        let mut hasher = Sha1::new();
        Digest::update(&mut hasher, key_seed);
        Digest::update(&mut hasher, counter.to_be_bytes());
        let result = hasher.finalize();

        let mut key = Zeroizing::new(result[0..self.cipher_key_size()].to_vec());
        adjust_des_parity(key.as_mut_slice());
        key
    }

    fn decrypt_padded_data(&self, data: &mut [u8], key: &[u8], iv: &[u8]) -> Result<(), Error> {
        self.check_key_length(key)?;
        self.check_data_length(data)?;
        let decryptor = cbc::Decryptor::<TdesEde2>::new_from_slices(key, iv)
            .map_err(|_| Error::InvalidKeyLength { expected: self.cipher_key_size(), obtained: key.len() })?;
        let data_len = data.len();
        decryptor.decrypt_padded::<NoPadding>(data)
            .map_err(|_| Error::InvalidDataLength { block_size: self.cipher_block_size(), obtained: data_len })?;
        Ok(())
    }

    fn encrypt_padded_data(&self, data: &mut [u8], key: &[u8], iv: &[u8]) -> Result<(), Error> {
        self.check_key_length(key)?;
        self.check_data_length(data)?;
        let encryptor = cbc::Encryptor::<TdesEde2>::new_from_slices(key, iv)
            .map_err(|_| Error::InvalidKeyLength { expected: self.cipher_key_size(), obtained: key.len() })?;
        let data_len = data.len();
        encryptor.encrypt_padded::<NoPadding>(data, data_len)
            .map_err(|_| Error::InvalidDataLength { block_size: self.cipher_block_size(), obtained: data_len })?;
        Ok(())
    }

    fn mac_padded_data(&self, data: &[u8], key: &[u8]) -> Result<Zeroizing<Vec<u8>>, Error> {
        let retail_mac = self.retail_mac(data, key)?;
        Ok(Zeroizing::new(retail_mac.finalize().into_bytes().to_vec()))
    }

    fn verify_mac_padded_data(&self, data: &[u8], key: &[u8], expected_mac: &[u8]) -> Result<bool, Error> {
        let retail_mac = self.retail_mac(data, key)?;
        Ok(retail_mac.verify_slice(expected_mac).is_ok())
    }
}
