use std::collections::{HashMap, HashSet};

use hex_literal::hex;
use mrtd_reader::iso7816::apdu::{Apdu, Response, ResponseTrailer};
use mrtd_reader::iso7816::card::{CommunicationError, SmartCard};
use mrtd_reader::lds::LdsFileTag;
use mrtd_reader::reader::{MrtdReader, ReadError, ReadState, ReaderConfig};
use mrtd_reader::tag::{MrtdTag, TagError};
use mrtd_reader::tlv;


/// A chip without access control serving a handful of files in plain.
#[derive(Default)]
struct PlainChip {
    files: HashMap<[u8; 2], Vec<u8>>,
    denied: HashSet<[u8; 2]>,
    max_le: Option<usize>,
    max_response: Option<usize>,
    failing_reads: HashMap<[u8; 2], usize>,
    transport_errors: usize,
    lost_on_select: Option<[u8; 2]>,
    selected: Option<[u8; 2]>,
    commands: Vec<Apdu>,
}
impl PlainChip {
    fn new() -> Self {
        let mut chip = Self::default();
        chip.files.insert(LdsFileTag::Com.fid(), hex!("60145F0104303130365F36063034303030305C026175").to_vec());
        chip.files.insert(LdsFileTag::Dg1.fid(), tlv::encode(0x61, &[0xAB; 296]).unwrap());
        chip.files.insert(LdsFileTag::Dg2.fid(), tlv::encode(0x75, &[0xCD; 40]).unwrap());
        chip
    }

    fn selects_of(&self, file: LdsFileTag) -> usize {
        self.commands.iter()
            .filter(|c| c.header.ins == 0xA4 && c.data.request_data() == Some(&file.fid()[..]))
            .count()
    }

    fn read_lengths(&self) -> Vec<usize> {
        self.commands.iter()
            .filter(|c| c.header.ins == 0xB0)
            .filter_map(|c| c.data.response_data_length())
            .collect()
    }
}
impl SmartCard for PlainChip {
    fn communicate(&mut self, request: &Apdu) -> Result<Response, CommunicationError> {
        self.commands.push(request.clone());
        let status = |sw1, sw2| Ok(Response::new(Vec::new(), ResponseTrailer::new(sw1, sw2)));

        match request.header.ins {
            0xA4 => {
                let Some(fid) = request.data.request_data().and_then(|d| <[u8; 2]>::try_from(d).ok()) else {
                    return status(0x67, 0x00);
                };
                if self.lost_on_select == Some(fid) {
                    return Err(CommunicationError::SessionInvalidated);
                }
                if self.denied.contains(&fid) {
                    return status(0x69, 0x82);
                }
                if !self.files.contains_key(&fid) {
                    return status(0x6A, 0x82);
                }
                self.selected = Some(fid);
                status(0x90, 0x00)
            },
            0xB0 => {
                let Some(fid) = self.selected else {
                    return status(0x69, 0x86);
                };
                if self.transport_errors > 0 {
                    self.transport_errors -= 1;
                    return Err(CommunicationError::Transport("antenna hiccup".into()));
                }
                if let Some(remaining_failures) = self.failing_reads.get_mut(&fid) {
                    if *remaining_failures > 0 {
                        *remaining_failures -= 1;
                        return status(0x6F, 0x00);
                    }
                }
                let le = request.data.response_data_length().unwrap_or(0);
                if self.max_le.map(|max| le > max).unwrap_or(false) {
                    return status(0x67, 0x00);
                }
                let offset = usize::from(u16::from_be_bytes([request.header.p1, request.header.p2]));
                let file = &self.files[&fid];
                if offset >= file.len() {
                    return status(0x6B, 0x00);
                }
                let mut end = (offset + le).min(file.len());
                if let Some(max_response) = self.max_response {
                    end = end.min(offset + max_response);
                }
                Ok(Response::new(file[offset..end].to_vec(), ResponseTrailer::SUCCESS))
            },
            0x88 => {
                let mut signature = request.data.request_data().unwrap_or(&[]).to_vec();
                signature.reverse();
                Ok(Response::new(signature, ResponseTrailer::SUCCESS))
            },
            _ => status(0x6D, 0x00),
        }
    }
}

fn reader_for(chip: PlainChip) -> MrtdReader<PlainChip> {
    MrtdReader::new(MrtdTag::new(chip), ReaderConfig::default())
}


#[test]
fn test_reads_all_files() {
    let mut reader = reader_for(PlainChip::new());
    let outcome = reader.read_files(&[LdsFileTag::Com, LdsFileTag::Dg1, LdsFileTag::Dg2]);
    assert!(outcome.is_complete());
    assert_eq!(outcome.files.len(), 3);
    assert_eq!(outcome.files[&LdsFileTag::Dg1].encoded().len(), 300);
    assert_eq!(outcome.files[&LdsFileTag::Dg2].value(), &[0xCD; 40][..]);
    assert_eq!(reader.state(), ReadState::AllDone);

    // DG1: header, then 224 + 72 bytes
    let lengths = reader.tag().card().read_lengths();
    assert_eq!(&lengths[2..5], &[4, 224, 72]);
}

#[test]
fn test_security_status_skips_file() {
    let mut chip = PlainChip::new();
    chip.denied.insert(LdsFileTag::Dg2.fid());
    let mut reader = reader_for(chip);

    let outcome = reader.read_files(&[LdsFileTag::Com, LdsFileTag::Dg2, LdsFileTag::Dg1]);
    assert!(outcome.error.is_none());
    assert_eq!(outcome.files.keys().copied().collect::<Vec<_>>(), vec![LdsFileTag::Com, LdsFileTag::Dg1]);
    assert_eq!(reader.tag().card().selects_of(LdsFileTag::Dg2), 1);
}

#[test]
fn test_missing_file_skipped() {
    let mut reader = reader_for(PlainChip::new());
    let outcome = reader.read_files(&[LdsFileTag::Dg15, LdsFileTag::Com]);
    assert!(outcome.error.is_none());
    assert_eq!(outcome.files.len(), 1);
    assert_eq!(reader.tag().card().selects_of(LdsFileTag::Dg15), 1);
}

#[test]
fn test_wrong_length_reduces_chunk() {
    let mut chip = PlainChip::new();
    chip.max_le = Some(0xA0);
    let mut reader = reader_for(chip);

    let outcome = reader.read_files(&[LdsFileTag::Dg1]);
    assert!(outcome.error.is_none());
    assert_eq!(outcome.files[&LdsFileTag::Dg1].encoded().len(), 300);
    assert_eq!(reader.tag().max_read_length(), 0xA0);
    assert_eq!(reader.tag().card().read_lengths(), vec![4, 224, 0xA0, 136]);
    assert_eq!(reader.tag().card().selects_of(LdsFileTag::Dg1), 1);
}

#[test]
fn test_reduced_chunk_persists() {
    let mut chip = PlainChip::new();
    chip.max_le = Some(0xA0);
    let mut reader = reader_for(chip);

    reader.read_files(&[LdsFileTag::Dg1]);
    let outcome = reader.read_files(&[LdsFileTag::Dg1]);
    assert!(outcome.error.is_none());
    assert_eq!(&reader.tag().card().read_lengths()[4..], &[4, 0xA0, 136]);
}

#[test]
fn test_session_invalidated_aborts() {
    let mut chip = PlainChip::new();
    chip.lost_on_select = Some(LdsFileTag::Dg1.fid());
    let mut reader = reader_for(chip);

    let outcome = reader.read_files(&[LdsFileTag::Com, LdsFileTag::Dg1, LdsFileTag::Dg2]);
    assert_eq!(outcome.files.keys().copied().collect::<Vec<_>>(), vec![LdsFileTag::Com]);
    assert!(matches!(
        outcome.error,
        Some(ReadError::Tag {
            file: LdsFileTag::Dg1,
            error: TagError::Communication(CommunicationError::SessionInvalidated),
        }),
    ));
    assert_eq!(reader.state(), ReadState::Aborted);
    assert_eq!(reader.tag().card().selects_of(LdsFileTag::Dg2), 0);
}

#[test]
fn test_session_handle_cancels() {
    let mut reader = reader_for(PlainChip::new());
    reader.tag().session_handle().invalidate();

    let outcome = reader.read_files(&[LdsFileTag::Com, LdsFileTag::Dg1]);
    assert!(outcome.files.is_empty());
    assert!(matches!(
        outcome.error,
        Some(ReadError::Tag { error: TagError::Communication(CommunicationError::SessionInvalidated), .. }),
    ));
    assert!(reader.tag().card().commands.is_empty());
}

#[test]
fn test_retries_are_bounded() {
    let mut chip = PlainChip::new();
    chip.failing_reads.insert(LdsFileTag::Dg2.fid(), usize::MAX);
    let mut reader = reader_for(chip);

    let outcome = reader.read_files(&[LdsFileTag::Dg2, LdsFileTag::Com]);
    assert!(outcome.error.is_none());
    assert_eq!(outcome.files.keys().copied().collect::<Vec<_>>(), vec![LdsFileTag::Com]);
    assert_eq!(reader.tag().card().selects_of(LdsFileTag::Dg2), 3);
}

#[test]
fn test_retry_recovers() {
    let mut chip = PlainChip::new();
    chip.failing_reads.insert(LdsFileTag::Dg2.fid(), 2);
    let mut reader = reader_for(chip);

    let outcome = reader.read_files(&[LdsFileTag::Dg2]);
    assert!(outcome.error.is_none());
    assert!(outcome.files.contains_key(&LdsFileTag::Dg2));
    assert_eq!(reader.tag().card().selects_of(LdsFileTag::Dg2), 3);
}

#[test]
fn test_transport_error_retried() {
    let mut chip = PlainChip::new();
    chip.transport_errors = 1;
    let mut reader = reader_for(chip);

    let outcome = reader.read_files(&[LdsFileTag::Com]);
    assert!(outcome.error.is_none());
    assert!(outcome.files.contains_key(&LdsFileTag::Com));
    assert_eq!(reader.tag().card().selects_of(LdsFileTag::Com), 2);
}

#[test]
fn test_undecodable_file_aborts() {
    let mut chip = PlainChip::new();
    chip.files.insert(LdsFileTag::Dg2.fid(), hex!("5A03010203").to_vec());
    let mut reader = reader_for(chip);

    let outcome = reader.read_files(&[LdsFileTag::Dg2, LdsFileTag::Com]);
    assert!(outcome.files.is_empty());
    assert!(matches!(outcome.error, Some(ReadError::Decode { file: LdsFileTag::Dg2, .. })));
}

#[test]
fn test_mismatched_file_aborts() {
    let mut chip = PlainChip::new();
    chip.files.insert(LdsFileTag::Dg2.fid(), hex!("6103010203").to_vec());
    let mut reader = reader_for(chip);

    let outcome = reader.read_files(&[LdsFileTag::Dg2]);
    assert!(matches!(outcome.error, Some(ReadError::Decode { file: LdsFileTag::Dg2, .. })));
}

#[test]
fn test_short_header_reads() {
    let mut chip = PlainChip::new();
    chip.max_response = Some(2);
    let mut reader = reader_for(chip);

    let outcome = reader.read_files(&[LdsFileTag::Dg1]);
    assert!(outcome.error.is_none(), "unexpected error: {:?}", outcome.error);
    assert_eq!(outcome.files[&LdsFileTag::Dg1].encoded().len(), 300);

    // 61 82 | 01 28 | value...
    let chip = reader.tag().card();
    let offsets: Vec<u16> = chip.commands.iter()
        .filter(|c| c.header.ins == 0xB0)
        .map(|c| u16::from_be_bytes([c.header.p1, c.header.p2]))
        .collect();
    assert_eq!(&offsets[..3], &[0, 2, 4]);
    assert_eq!(&chip.read_lengths()[..3], &[4, 4, 224]);
}

#[test]
fn test_five_byte_header() {
    let mut chip = PlainChip::new();
    chip.files.insert(LdsFileTag::Dg2.fid(), tlv::encode(0x75, &vec![0xCD; 0x1_0000]).unwrap());
    let mut reader = reader_for(chip);

    let outcome = reader.read_files(&[LdsFileTag::Dg2, LdsFileTag::Com]);

    // the header is understood; the file is then too large to address and gets skipped
    assert!(outcome.error.is_none(), "unexpected error: {:?}", outcome.error);
    assert_eq!(outcome.files.keys().copied().collect::<Vec<_>>(), vec![LdsFileTag::Com]);
    assert_eq!(&reader.tag().card().read_lengths()[..3], &[4, 4, 224]);
}

#[test]
fn test_internal_authenticate() {
    let mut reader = reader_for(PlainChip::new());
    let sigs = reader.internal_authenticate(&hex!("0001020304050607 08090A0B0C0D0E0F")).unwrap();
    assert_eq!(sigs.sigs(), &[hex!("0706050403020100").to_vec(), hex!("0F0E0D0C0B0A0908").to_vec()]);

    assert!(matches!(
        reader.internal_authenticate(&[0u8; 12]),
        Err(ReadError::InvalidChallengeLength { length: 12 }),
    ));
}
