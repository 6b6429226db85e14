use hex_literal::hex;
use mrtd_reader::iso7816::apdu::{Apdu, Response, ResponseTrailer};
use mrtd_reader::iso7816::card::{CommunicationError, SmartCard};
use mrtd_reader::lds::{EfCom, LdsFileTag};
use mrtd_reader::mrz_key::MrzKey;
use mrtd_reader::reader::{MrtdReader, ReaderConfig};
use mrtd_reader::tag::MrtdTag;


/// A fake smart card that acts exactly like the card in ICAO Doc 9303 Part 11 Appendix D.
///
/// If any of its expectations are not met, it responds with 0x69 0x88.
struct AppendixDCard {
    state: u8,
}
impl AppendixDCard {
    const RND_IC: [u8; 8] = hex!("4608F91988702212");
    const EXPECTED_MUTUAL_AUTHENTICATE_PAYLOAD: [u8; 40] = hex!("72C29C2371CC9BDB65B779B8E8D37B29ECC154AA56A8799FAE2F498F76ED92F25F1448EEA8AD90A7");
    const MUTUAL_AUTHENTICATE_RESPONSE: [u8; 40] = hex!("46B9342A41396CD7386BF5803104D7CEDC122B9132139BAF2EEDC94EE178534F2F2D235D074D7449");
    const EXPECTED_SELECT_PAYLOAD: [u8; 21] = hex!("8709016375432908C044F68E08BF8B92D635FF24F8");
    const SELECT_RESPONSE: [u8; 14] = hex!("990290008E08FA855A5D4C50A8ED");
    const EXPECTED_READ_4_PAYLOAD: [u8; 13] = hex!("9701048E08ED6705417E96BA55");
    const READ_4_RESPONSE: [u8; 25] = hex!("8709019FF0EC34F9922651990290008E08AD55CC17140B2DED");
    const EXPECTED_READ_REST_PAYLOAD: [u8; 13] = hex!("9701128E082EA28A70F3C7B535");
    const READ_REST_RESPONSE: [u8; 41] = hex!("871901FB9235F4E4037F2327DCC8964F1F9B8C30F42C8E2FFF224A990290008E08C8B2787EAEA07D74");

    pub const fn new() -> Self {
        Self {
            state: 0,
        }
    }
}
impl SmartCard for AppendixDCard {
    fn communicate(&mut self, request: &Apdu) -> Result<Response, CommunicationError> {
        let ok = |data: &[u8]| Ok(Response::new(data.to_vec(), ResponseTrailer::SUCCESS));

        if request.header.to_be_u32() == 0x00_84_00_00
                && request.data.request_data().is_none()
                && request.data.response_data_length() == Some(8) {
            self.state = 1;
            ok(&Self::RND_IC)
        } else if self.state >= 1
                && request.header.to_be_u32() == 0x00_82_00_00
                && request.data.request_data() == Some(&Self::EXPECTED_MUTUAL_AUTHENTICATE_PAYLOAD[..])
                && request.data.response_data_length() == Some(0x28) {
            self.state = 2;
            ok(&Self::MUTUAL_AUTHENTICATE_RESPONSE)
        } else if self.state >= 2
                && request.header.to_be_u32() == 0x0C_A4_02_0C
                && request.data.request_data() == Some(&Self::EXPECTED_SELECT_PAYLOAD[..])
                && request.data.response_data_length() == Some(0x100) {
            self.state = 3;
            ok(&Self::SELECT_RESPONSE)
        } else if self.state >= 3
                && request.header.to_be_u32() == 0x0C_B0_00_00
                && request.data.request_data() == Some(&Self::EXPECTED_READ_4_PAYLOAD[..])
                && request.data.response_data_length() == Some(0x100) {
            self.state = 4;
            ok(&Self::READ_4_RESPONSE)
        } else if self.state >= 4
                && request.header.to_be_u32() == 0x0C_B0_00_04
                && request.data.request_data() == Some(&Self::EXPECTED_READ_REST_PAYLOAD[..])
                && request.data.response_data_length() == Some(0x100) {
            self.state = 5;
            ok(&Self::READ_REST_RESPONSE)
        } else {
            Ok(Response::new(Vec::new(), ResponseTrailer::new(0x69, 0x88)))
        }
    }
}


const K_SEED: [u8; 16] = hex!("239AB9CB282DAF66231DC5A4DF6BFBAE");
const RND_IFD: [u8; 8] = hex!("781723860C06C226");
const K_IFD: [u8; 16] = hex!("0B795240CB7049B01C19B33E32804F0B");


#[test]
fn test_key_seed_appd() {
    let key = MrzKey::new("L898902C", "690806", "940623").unwrap();
    assert_eq!(*key.bac_key_seed(), K_SEED);
}

#[test]
fn test_bac_setup_appd() {
    let mut tag = MrtdTag::new(AppendixDCard::new());
    mrtd_reader::bac::establish_with_randomness(&mut tag, &K_SEED, &RND_IFD, &K_IFD)
        .expect("failed to establish BAC");
    assert!(tag.has_secure_messaging());

    tag.select_file([0x01, 0x1E]).expect("failed to select EF.COM");

    let read_four = tag.read_binary(0, 4).expect("failed to read 4 bytes of EF.COM");
    assert_eq!(read_four, hex!("60145F01"));

    let read_rest = tag.read_binary(4, 0x12).expect("failed to read rest of EF.COM");
    assert_eq!(read_rest, hex!("04303130365F36063034303030305C026175"));
}

#[test]
fn test_read_ef_com_appd() {
    let mut tag = MrtdTag::new(AppendixDCard::new());
    mrtd_reader::bac::establish_with_randomness(&mut tag, &K_SEED, &RND_IFD, &K_IFD)
        .expect("failed to establish BAC");

    let mut reader = MrtdReader::new(tag, ReaderConfig::default());
    let outcome = reader.read_files(&[LdsFileTag::Com]);
    assert!(outcome.error.is_none(), "unexpected error: {:?}", outcome.error);
    assert_eq!(outcome.files.len(), 1);

    let com: EfCom = outcome.files[&LdsFileTag::Com].as_file().unwrap();
    assert_eq!(com.lds_version, "0106");
    assert_eq!(com.unicode_version, "040000");
    assert_eq!(com.tag_list, vec![LdsFileTag::Dg1, LdsFileTag::Dg2]);
}

#[test]
fn test_wrong_key_fails_appd() {
    let mut tag = MrtdTag::new(AppendixDCard::new());
    let wrong_seed = [0u8; 16];
    let result = mrtd_reader::bac::establish_with_randomness(&mut tag, &wrong_seed, &RND_IFD, &K_IFD);
    assert!(result.is_err());
    assert!(!tag.has_secure_messaging());
}
