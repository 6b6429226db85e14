//! EF.DG1, the data recorded in the MRZ.


use crate::lds::{expect_tlv, Error, LdsFileTag, ParseLdsFile};
use crate::mrz::Mrz;


const TAG_MRZ: u32 = 0x5F1F;


#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct EfDg1 {
    pub mrz: Mrz,
}
impl ParseLdsFile for EfDg1 {
    const FILE: LdsFileTag = LdsFileTag::Dg1;

    fn parse(value: &[u8]) -> Result<Self, Error> {
        let (mrz_bytes, _rest) = expect_tlv(value, TAG_MRZ)?;
        let mrz = Mrz::from_encoded(mrz_bytes)?;
        Ok(Self { mrz })
    }
}
