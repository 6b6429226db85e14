//! EF.DG15, the Active Authentication public key.


use crate::lds::{Error, LdsFileTag, ParseLdsFile};


#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct EfDg15 {
    /// DER-encoded `SubjectPublicKeyInfo` of the key used to answer INTERNAL AUTHENTICATE.
    pub subject_public_key_info: Vec<u8>,
}
impl ParseLdsFile for EfDg15 {
    const FILE: LdsFileTag = LdsFileTag::Dg15;

    fn parse(value: &[u8]) -> Result<Self, Error> {
        // SubjectPublicKeyInfo ::= SEQUENCE { ... }
        let (tag, _inner, consumed) = crate::tlv::decode(value)?;
        if tag != 0x30 {
            return Err(Error::InvalidTag { expected: 0x30, obtained: tag });
        }
        Ok(Self {
            subject_public_key_info: value[..consumed].to_vec(),
        })
    }
}
