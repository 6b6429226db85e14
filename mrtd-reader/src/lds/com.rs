//! EF.COM, the common data elements of the LDS.


use crate::lds::{expect_tlv, Error, LdsFileTag, ParseLdsFile};


const TAG_LDS_VERSION: u32 = 0x5F01;
const TAG_UNICODE_VERSION: u32 = 0x5F36;
const TAG_TAG_LIST: u32 = 0x5C;


#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct EfCom {
    /// LDS version as four digits, e.g. `0107` for version 1.7.
    pub lds_version: String,

    /// Unicode version as six digits, e.g. `040000` for version 4.0.0.
    pub unicode_version: String,

    /// The files the chip claims to hold, in the order listed.
    pub tag_list: Vec<LdsFileTag>,
}
impl EfCom {
    /// The display names of the data groups present, e.g. `EF.DG1`.
    pub fn data_groups_present(&self) -> Vec<&'static str> {
        self.tag_list.iter()
            .map(|t| t.name())
            .collect()
    }

    pub fn contains(&self, tag: LdsFileTag) -> bool {
        self.tag_list.contains(&tag)
    }
}
impl ParseLdsFile for EfCom {
    const FILE: LdsFileTag = LdsFileTag::Com;

    fn parse(value: &[u8]) -> Result<Self, Error> {
        let (lds_version_bytes, rest) = expect_tlv(value, TAG_LDS_VERSION)?;
        if !lds_version_bytes.is_ascii() {
            return Err(Error::InvalidValue { tag: TAG_LDS_VERSION });
        }
        let lds_version = String::from_utf8(lds_version_bytes.to_vec())
            .map_err(|_| Error::InvalidValue { tag: TAG_LDS_VERSION })?;

        let (unicode_version_bytes, rest) = expect_tlv(rest, TAG_UNICODE_VERSION)?;
        let unicode_version = String::from_utf8(unicode_version_bytes.to_vec())
            .map_err(|_| Error::InvalidValue { tag: TAG_UNICODE_VERSION })?;

        let (tag_list_bytes, rest) = expect_tlv(rest, TAG_TAG_LIST)?;
        let tag_list = tag_list_bytes.iter()
            .map(|b| LdsFileTag::from_tag((*b).into()).ok_or(Error::UnknownTag { tag: (*b).into() }))
            .collect::<Result<Vec<_>, _>>()?;

        if !rest.is_empty() {
            let (tag, _length) = crate::tlv::decode_tag(rest)?;
            return Err(Error::InvalidTag { expected: TAG_TAG_LIST, obtained: tag });
        }

        Ok(Self {
            lds_version,
            unicode_version,
            tag_list,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::lds::LdsFile;
    use hex_literal::hex;

    #[test]
    fn test_parse() {
        let file = LdsFile::from_encoded(&hex!("60145F0104303130365F36063034303030305C026175")).unwrap();
        let com: EfCom = file.as_file().unwrap();
        assert_eq!(com.lds_version, "0106");
        assert_eq!(com.unicode_version, "040000");
        assert_eq!(com.tag_list, vec![LdsFileTag::Dg1, LdsFileTag::Dg2]);
        assert_eq!(com.data_groups_present(), vec!["EF.DG1", "EF.DG2"]);
    }

    #[test]
    fn test_wrong_order() {
        let value = hex!("5F36063034303030305F0104303130365C026175");
        assert_eq!(
            EfCom::parse(&value),
            Err(Error::InvalidTag { expected: TAG_LDS_VERSION, obtained: TAG_UNICODE_VERSION }),
        );
    }

    #[test]
    fn test_unknown_data_group() {
        let value = hex!("5F0104303130365F36063034303030305C026199");
        assert_eq!(EfCom::parse(&value), Err(Error::UnknownTag { tag: 0x99 }));
    }

    #[test]
    fn test_missing_tag_list() {
        let value = hex!("5F0104303130365F3606303430303030");
        assert_eq!(EfCom::parse(&value), Err(Error::MissingValue { tag: TAG_TAG_LIST }));
    }
}
