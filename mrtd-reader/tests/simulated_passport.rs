use std::collections::HashMap;

use hex_literal::hex;
use mrtd_reader::bac;
use mrtd_reader::crypt::{pad, unpad};
use mrtd_reader::crypt::cipher_mac::{Cam3Des, CipherAndMac};
use mrtd_reader::iso7816::apdu::{Apdu, CommandHeader, Response, ResponseTrailer};
use mrtd_reader::iso7816::card::{CommunicationError, SmartCard};
use mrtd_reader::lds::{EfCom, EfDg1, EfDg15, LdsFileTag};
use mrtd_reader::mrz::Mrz;
use mrtd_reader::mrz_key::MrzKey;
use mrtd_reader::passport::PassportData;
use mrtd_reader::reader::{MrtdReader, ReadError, ReaderConfig};
use mrtd_reader::tag::{MrtdTag, TagError};
use mrtd_reader::tlv;


const TD3_SPECIMEN: &str = concat!(
    "P<UTOERIKSSON<<ANNA<MARIA<<<<<<<<<<<<<<<<<<<",
    "L898902C36UTO7408122F1204159ZE184226B<<<<<10",
);


fn increment(ssc: &mut [u8; 8]) {
    for b in ssc.iter_mut().rev() {
        let (incremented, carry) = b.overflowing_add(1);
        *b = incremented;
        if !carry {
            break;
        }
    }
}

fn data_object(tag: u8, value: &[u8]) -> Vec<u8> {
    let mut object = vec![tag];
    object.extend(tlv::encode_length(value.len()).unwrap());
    object.extend_from_slice(value);
    object
}

fn mac(key: &[u8; 16], data: &[u8]) -> Vec<u8> {
    let mut padded = data.to_vec();
    pad(&mut padded, 8);
    Cam3Des.mac_padded_data(&padded, key).unwrap().to_vec()
}

fn status(sw1: u8, sw2: u8) -> Response {
    Response::new(Vec::new(), ResponseTrailer::new(sw1, sw2))
}


struct ChipSession {
    k_enc: [u8; 16],
    k_mac: [u8; 16],
    ssc: [u8; 8],
}


/// The chip side of an ePassport: answers BAC and Secure Messaging like a real document would.
struct SimulatedPassport {
    k_enc: [u8; 16],
    k_mac: [u8; 16],
    rnd_ic: [u8; 8],
    k_ic: [u8; 16],
    session: Option<ChipSession>,
    files: HashMap<[u8; 2], Vec<u8>>,
    selected: Option<[u8; 2]>,
    corrupt_mac: bool,
}
impl SimulatedPassport {
    fn new(key: &MrzKey) -> Self {
        let (k_enc, k_mac) = bac::derive_document_keys(&key.bac_key_seed());

        let com = tlv::encode(0x60, &[
            tlv::encode(0x5F01, b"0107").unwrap(),
            tlv::encode(0x5F36, b"040000").unwrap(),
            tlv::encode(0x5C, &[0x61, 0x6F]).unwrap(),
        ].concat()).unwrap();
        let dg1 = tlv::encode(0x61, &tlv::encode(0x5F1F, TD3_SPECIMEN.as_bytes()).unwrap()).unwrap();
        let mut spki = vec![0x30, 0x81, 0x9F];
        spki.extend((0..0x9F).map(|i| i as u8));
        let dg15 = tlv::encode(0x6F, &spki).unwrap();
        let sod = tlv::encode(0x77, &[0x5A; 700]).unwrap();

        let mut files = HashMap::new();
        files.insert(LdsFileTag::Com.fid(), com);
        files.insert(LdsFileTag::Dg1.fid(), dg1);
        files.insert(LdsFileTag::Dg15.fid(), dg15);
        files.insert(LdsFileTag::Sod.fid(), sod);

        Self {
            k_enc: *k_enc,
            k_mac: *k_mac,
            rnd_ic: hex!("4608F91988702212"),
            k_ic: hex!("0B4F80323EB3191CB04970CB4052790B"),
            session: None,
            files,
            selected: None,
            corrupt_mac: false,
        }
    }

    fn mutual_authenticate(&mut self, data: &[u8]) -> Response {
        if data.len() != 40 {
            return status(0x67, 0x00);
        }
        if mac(&self.k_mac, &data[0..32]) != data[32..40] {
            return status(0x63, 0x00);
        }
        let mut s = data[0..32].to_vec();
        Cam3Des.decrypt_padded_data(&mut s, &self.k_enc, &[0u8; 8]).unwrap();
        if s[8..16] != self.rnd_ic {
            return status(0x63, 0x00);
        }
        let rnd_ifd: [u8; 8] = s[0..8].try_into().unwrap();
        let k_ifd: [u8; 16] = s[16..32].try_into().unwrap();

        let mut r = Vec::with_capacity(40);
        r.extend_from_slice(&self.rnd_ic);
        r.extend_from_slice(&rnd_ifd);
        r.extend_from_slice(&self.k_ic);
        Cam3Des.encrypt_padded_data(&mut r, &self.k_enc, &[0u8; 8]).unwrap();
        let m = mac(&self.k_mac, &r);
        r.extend(m);

        let keys = bac::derive_session_keys(&k_ifd, &self.k_ic, &self.rnd_ic, &rnd_ifd);
        self.session = Some(ChipSession {
            k_enc: *keys.k_session_enc,
            k_mac: *keys.k_session_mac,
            ssc: keys.send_sequence_counter,
        });
        Response::new(r, ResponseTrailer::SUCCESS)
    }

    fn plain_command(&mut self, header: CommandHeader, data: &[u8], le: usize) -> Response {
        match header.ins {
            0xA4 => {
                let Ok(fid) = <[u8; 2]>::try_from(data) else {
                    return status(0x67, 0x00);
                };
                if !self.files.contains_key(&fid) {
                    return status(0x6A, 0x82);
                }
                self.selected = Some(fid);
                status(0x90, 0x00)
            },
            0xB0 => {
                let Some(file) = self.selected.and_then(|fid| self.files.get(&fid)) else {
                    return status(0x69, 0x86);
                };
                let offset = usize::from(u16::from_be_bytes([header.p1, header.p2]));
                if offset >= file.len() {
                    return status(0x6B, 0x00);
                }
                let end = (offset + le).min(file.len());
                Response::new(file[offset..end].to_vec(), ResponseTrailer::SUCCESS)
            },
            0x88 => {
                let mut signature = data.to_vec();
                signature.reverse();
                signature.extend_from_slice(data);
                Response::new(signature, ResponseTrailer::SUCCESS)
            },
            _ => status(0x6D, 0x00),
        }
    }

    fn protected_command(&mut self, request: &Apdu) -> Response {
        let Some(mut session) = self.session.take() else {
            return status(0x69, 0x82);
        };
        increment(&mut session.ssc);

        let body = request.data.request_data().unwrap_or(&[]);
        let objects = tlv::decode_all(body).unwrap();
        let Some(received_mac) = objects.iter().find(|o| o.tag == 0x8E) else {
            return status(0x69, 0x87);
        };

        let mut mac_input = session.ssc.to_vec();
        let mut header_block = request.header.to_bytes().to_vec();
        pad(&mut header_block, 8);
        mac_input.extend(header_block);
        for object in objects.iter().filter(|o| o.tag == 0x87 || o.tag == 0x97) {
            mac_input.extend(data_object(object.tag as u8, &object.value));
        }
        if mac(&session.k_mac, &mac_input) != received_mac.value {
            // the session is dropped and the error reported in plain
            return status(0x69, 0x88);
        }

        let mut data = Vec::new();
        if let Some(encrypted) = objects.iter().find(|o| o.tag == 0x87) {
            let mut decrypted = encrypted.value[1..].to_vec();
            Cam3Des.decrypt_padded_data(&mut decrypted, &session.k_enc, &[0u8; 8]).unwrap();
            data = unpad(&decrypted).unwrap().to_vec();
        }
        let le = match objects.iter().find(|o| o.tag == 0x97) {
            Some(o) if o.value == [0x00] => 256,
            Some(o) => usize::from(o.value[0]),
            None => 0,
        };

        let plain = self.plain_command(request.header, &data, le);

        increment(&mut session.ssc);
        let mut response_body = Vec::new();
        if !plain.data.is_empty() {
            let mut encrypted = plain.data.clone();
            pad(&mut encrypted, 8);
            Cam3Des.encrypt_padded_data(&mut encrypted, &session.k_enc, &[0u8; 8]).unwrap();
            let mut value = vec![0x01];
            value.extend(encrypted);
            response_body.extend(data_object(0x87, &value));
        }
        response_body.extend(data_object(0x99, &plain.trailer.to_bytes()));
        let mut response_mac_input = session.ssc.to_vec();
        response_mac_input.extend(&response_body);
        let mut response_mac = mac(&session.k_mac, &response_mac_input);
        if self.corrupt_mac {
            response_mac[0] ^= 0xFF;
        }
        response_body.extend(data_object(0x8E, &response_mac));

        self.session = Some(session);
        Response::new(response_body, ResponseTrailer::SUCCESS)
    }
}
impl SmartCard for SimulatedPassport {
    fn communicate(&mut self, request: &Apdu) -> Result<Response, CommunicationError> {
        let response = match (request.header.cla, request.header.ins) {
            (0x00, 0x84) => {
                self.session = None;
                Response::new(self.rnd_ic.to_vec(), ResponseTrailer::SUCCESS)
            },
            (0x00, 0x82) => self.mutual_authenticate(request.data.request_data().unwrap_or(&[])),
            (0x0C, _) => self.protected_command(request),
            // plain access to files requires BAC
            _ => status(0x69, 0x82),
        };
        Ok(response)
    }
}


fn specimen_key() -> MrzKey {
    MrzKey::from(&Mrz::from_encoded(TD3_SPECIMEN.as_bytes()).unwrap())
}


#[test]
fn test_read_passport() {
    let key = specimen_key();
    let mut tag = MrtdTag::new(SimulatedPassport::new(&key));
    bac::establish(&mut tag, &key).expect("BAC failed");

    let mut reader = MrtdReader::new(tag, ReaderConfig::default());
    let outcome = reader.read_files(&[LdsFileTag::Com, LdsFileTag::Sod, LdsFileTag::Dg1, LdsFileTag::Dg15]);
    assert!(outcome.error.is_none(), "unexpected error: {:?}", outcome.error);
    assert_eq!(outcome.files.len(), 4);

    let com: EfCom = outcome.files[&LdsFileTag::Com].as_file().unwrap();
    assert_eq!(com.lds_version, "0107");
    assert!(com.contains(LdsFileTag::Dg15));

    let dg1: EfDg1 = outcome.files[&LdsFileTag::Dg1].as_file().unwrap();
    assert_eq!(dg1.mrz.primary_identifier.as_str(), "ERIKSSON");

    let dg15: EfDg15 = outcome.files[&LdsFileTag::Dg15].as_file().unwrap();
    assert_eq!(dg15.subject_public_key_info.len(), 3 + 0x9F);

    assert_eq!(outcome.files[&LdsFileTag::Sod].value(), &[0x5A; 700][..]);

    let sigs = reader.internal_authenticate(&hex!("0011223344556677 8899AABBCCDDEEFF")).unwrap();
    assert_eq!(sigs.len(), 2);
    assert_eq!(sigs.sigs()[0], hex!("77665544332211000011223344556677"));

    let data = PassportData::new(outcome.files, sigs);
    assert_eq!(data.require_files(&[LdsFileTag::Sod, LdsFileTag::Dg1, LdsFileTag::Dg15]), Ok(()));

    let json = serde_json::to_value(&data).unwrap();
    for key in ["com", "sod", "dg1", "dg15", "csigs"] {
        assert!(json.get(key).is_some(), "missing {}", key);
    }
}

#[test]
fn test_missing_file_skipped_over_secure_messaging() {
    let key = specimen_key();
    let mut tag = MrtdTag::new(SimulatedPassport::new(&key));
    bac::establish(&mut tag, &key).expect("BAC failed");

    let mut reader = MrtdReader::new(tag, ReaderConfig::default());
    let outcome = reader.read_files(&[LdsFileTag::Dg2, LdsFileTag::Dg1]);
    assert!(outcome.error.is_none());
    assert_eq!(outcome.files.keys().copied().collect::<Vec<_>>(), vec![LdsFileTag::Dg1]);
}

#[test]
fn test_wrong_mrz_key_rejected() {
    let key = specimen_key();
    let mut tag = MrtdTag::new(SimulatedPassport::new(&key));

    let wrong_key = MrzKey::new("L898902C3", "740812", "120416").unwrap();
    let result = bac::establish(&mut tag, &wrong_key);
    assert!(matches!(result, Err(bac::Error::Tag(TagError::Status { .. }))));
    assert!(!tag.has_secure_messaging());
}

#[test]
fn test_tampered_response_aborts() {
    let key = specimen_key();
    let mut tag = MrtdTag::new(SimulatedPassport::new(&key));
    bac::establish(&mut tag, &key).expect("BAC failed");
    tag.card_mut().corrupt_mac = true;

    let mut reader = MrtdReader::new(tag, ReaderConfig::default());
    let outcome = reader.read_files(&[LdsFileTag::Com, LdsFileTag::Dg1]);
    assert!(outcome.files.is_empty());
    assert!(matches!(
        outcome.error,
        Some(ReadError::Tag { file: LdsFileTag::Com, error: TagError::Unprotect(_) }),
    ));
}

#[test]
fn test_rerun_bac_replaces_session() {
    let key = specimen_key();
    let mut tag = MrtdTag::new(SimulatedPassport::new(&key));
    bac::establish(&mut tag, &key).expect("first BAC failed");
    bac::establish(&mut tag, &key).expect("second BAC failed");

    let mut reader = MrtdReader::new(tag, ReaderConfig::default());
    let outcome = reader.read_files(&[LdsFileTag::Dg1]);
    assert!(outcome.is_complete());
}
