//! Reading LDS files from an MRTD chip.
//!
//! Real chips fail in many small ways: they return fewer bytes than requested, reject READ BINARY
//! lengths they consider too long, or refuse access to files that need stronger authentication.
//! [`MrtdReader`] walks every requested file through an explicit state machine and decides per
//! failure whether to abort, skip the file, shrink the read length, or start the file over.


use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use tracing::{debug, error, instrument, warn};

use crate::iso7816::card::SmartCard;
use crate::iso7816::status::StatusCondition;
use crate::lds::{self, LdsFile, LdsFileTag};
use crate::passport::ChallengeSigs;
use crate::tag::{MrtdTag, TagError};
use crate::tlv;


/// Number of bytes requested per read while learning the size of a file.
const HEADER_LENGTH: usize = 4;

/// Size of each chunk of a challenge passed to INTERNAL AUTHENTICATE.
const CHALLENGE_CHUNK_LENGTH: usize = 8;


/// Tunables of the file reader.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ReaderConfig {
    /// Bytes requested per READ BINARY until the chip complains.
    pub max_read_chunk: usize,

    /// Bytes requested per READ BINARY after the chip first reported a wrong length.
    pub reduced_read_chunk: usize,

    /// Attempts at reading a single file before it is skipped.
    pub max_read_attempts: usize,
}
impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            max_read_chunk: crate::tag::DEFAULT_MAX_READ_LENGTH,
            reduced_read_chunk: 0xA0,
            max_read_attempts: 3,
        }
    }
}


#[derive(Debug)]
pub enum ReadError {
    Tag { file: LdsFileTag, error: TagError },
    EmptyRead { file: LdsFileTag, offset: usize },
    Decode { file: LdsFileTag, error: lds::Error },
    InvalidChallengeLength { length: usize },
    InternalAuthenticate(TagError),
}
impl ReadError {
    /// The file being read when the error occurred.
    pub fn file(&self) -> Option<LdsFileTag> {
        match self {
            Self::Tag { file, .. } => Some(*file),
            Self::EmptyRead { file, .. } => Some(*file),
            Self::Decode { file, .. } => Some(*file),
            Self::InvalidChallengeLength { .. } => None,
            Self::InternalAuthenticate(_) => None,
        }
    }
}
impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tag { file, error }
                => write!(f, "failed to read {}: {}", file, error),
            Self::EmptyRead { file, offset }
                => write!(f, "chip returned no data for {} at offset {}", file, offset),
            Self::Decode { file, error }
                => write!(f, "failed to decode {}: {}", file, error),
            Self::InvalidChallengeLength { length }
                => write!(f, "challenge length {} is not a multiple of {}", length, CHALLENGE_CHUNK_LENGTH),
            Self::InternalAuthenticate(e)
                => write!(f, "internal authentication failed: {}", e),
        }
    }
}
impl std::error::Error for ReadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Tag { error, .. } => Some(error),
            Self::EmptyRead { .. } => None,
            Self::Decode { error, .. } => Some(error),
            Self::InvalidChallengeLength { .. } => None,
            Self::InternalAuthenticate(e) => Some(e),
        }
    }
}


/// The progress of reading the requested files.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ReadState {
    Idle,
    SelectingFile { file: LdsFileTag },
    ReadingHeader { file: LdsFileTag },
    ReadingRemainder { file: LdsFileTag, offset: usize, remaining: usize },
    FileComplete { file: LdsFileTag },
    AllDone,
    Aborted,
}


/// How the reader reacts to a failed step.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum FailureAction {
    /// Give up on this and every remaining file.
    Abort,

    /// Give up on this file without counting an attempt and continue with the next one.
    Skip,

    /// Lower the read length and repeat the failed step.
    ReduceChunk,

    /// Start the file over if attempts remain, otherwise skip it.
    Retry,
}
impl FailureAction {
    /// Decides how to react to an error; `chunk_reduced` tells whether the read length has already
    /// been lowered during this session.
    pub fn for_error(error: &ReadError, chunk_reduced: bool) -> Self {
        let tag_error = match error {
            ReadError::Tag { error, .. } => error,
            ReadError::EmptyRead { .. } => return Self::Retry,
            ReadError::Decode { .. } => return Self::Abort,
            ReadError::InvalidChallengeLength { .. } => return Self::Abort,
            ReadError::InternalAuthenticate(_) => return Self::Abort,
        };

        match tag_error {
            TagError::Communication(e) => if e.is_fatal() {
                Self::Abort
            } else {
                Self::Retry
            },
            TagError::Protect(_)|TagError::Unprotect(_) => Self::Abort,
            TagError::Status { trailer, .. } => match StatusCondition::classify(*trailer) {
                StatusCondition::SecurityStatusNotSatisfied
                    |StatusCondition::FileNotFound
                    |StatusCondition::SmDataObjectsIncorrect => Self::Skip,
                StatusCondition::ClassNotSupported => Self::Abort,
                StatusCondition::WrongLength { .. } => if chunk_reduced {
                    Self::Retry
                } else {
                    Self::ReduceChunk
                },
                StatusCondition::Success|StatusCondition::Other => Self::Retry,
            },
            TagError::UnexpectedLength { .. } => Self::Retry,
            TagError::InvalidOffset { .. } => Self::Skip,
        }
    }
}


/// The result of reading a batch of files.
///
/// Files read before an abort are kept; `error` holds the reason for the abort.
#[derive(Debug)]
pub struct ReadOutcome {
    pub files: BTreeMap<LdsFileTag, LdsFile>,
    pub error: Option<ReadError>,
}
impl ReadOutcome {
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }
}


/// Reads LDS files from a chip, usually after Basic Access Control has been established.
pub struct MrtdReader<SC: SmartCard> {
    tag: MrtdTag<SC>,
    config: ReaderConfig,
    state: ReadState,
    pending: VecDeque<LdsFileTag>,
    files: BTreeMap<LdsFileTag, LdsFile>,
    buffer: Vec<u8>,
    attempts: usize,
    chunk_reduced: bool,
}
impl<SC: SmartCard> MrtdReader<SC> {
    pub fn new(mut tag: MrtdTag<SC>, config: ReaderConfig) -> Self {
        tag.set_max_read_length(config.max_read_chunk);
        Self {
            tag,
            config,
            state: ReadState::Idle,
            pending: VecDeque::new(),
            files: BTreeMap::new(),
            buffer: Vec::new(),
            attempts: 0,
            chunk_reduced: false,
        }
    }

    pub fn state(&self) -> ReadState {
        self.state
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    pub fn tag(&self) -> &MrtdTag<SC> {
        &self.tag
    }

    pub fn tag_mut(&mut self) -> &mut MrtdTag<SC> {
        &mut self.tag
    }

    pub fn into_tag(self) -> MrtdTag<SC> {
        self.tag
    }

    /// Reads the given files in order.
    ///
    /// Files the chip refuses to hand out, and files that keep failing, are left out of the
    /// result without an error.
    #[instrument(skip(self))]
    pub fn read_files(&mut self, tags: &[LdsFileTag]) -> ReadOutcome {
        self.pending = tags.iter().copied().collect();
        self.files = BTreeMap::new();
        self.buffer.clear();
        self.attempts = 0;
        self.state = ReadState::Idle;

        let mut abort_error = None;
        while !matches!(self.state, ReadState::AllDone|ReadState::Aborted) {
            let Err(e) = self.step() else { continue };

            match FailureAction::for_error(&e, self.chunk_reduced) {
                FailureAction::Abort => {
                    error!("aborting read: {}", e);
                    self.pending.clear();
                    self.buffer.clear();
                    self.state = ReadState::Aborted;
                    abort_error = Some(e);
                },
                FailureAction::Skip => {
                    warn!("skipping file: {}", e);
                    self.skip_current_file();
                },
                FailureAction::ReduceChunk => {
                    warn!("reducing read length to {} bytes: {}", self.config.reduced_read_chunk, e);
                    self.tag.set_max_read_length(self.config.reduced_read_chunk);
                    self.chunk_reduced = true;
                },
                FailureAction::Retry => {
                    if self.attempts >= self.config.max_read_attempts {
                        warn!("giving up after {} attempts: {}", self.attempts, e);
                        self.skip_current_file();
                    } else {
                        warn!("attempt {} failed, starting over: {}", self.attempts, e);
                        self.buffer.clear();
                        self.state = ReadState::Idle;
                    }
                },
            }
        }

        ReadOutcome {
            files: std::mem::take(&mut self.files),
            error: abort_error,
        }
    }

    fn skip_current_file(&mut self) {
        self.pending.pop_front();
        self.buffer.clear();
        self.attempts = 0;
        self.state = ReadState::Idle;
    }

    /// Performs the action of the current state and moves to the next one.
    fn step(&mut self) -> Result<(), ReadError> {
        debug!("read state: {:?}", self.state);
        match self.state {
            ReadState::Idle => {
                self.state = match self.pending.front() {
                    Some(file) => {
                        self.attempts += 1;
                        self.buffer.clear();
                        ReadState::SelectingFile { file: *file }
                    },
                    None => ReadState::AllDone,
                };
            },
            ReadState::SelectingFile { file } => {
                self.tag.select_file(file.fid())
                    .map_err(|error| ReadError::Tag { file, error })?;
                self.state = ReadState::ReadingHeader { file };
            },
            ReadState::ReadingHeader { file } => {
                let offset = self.buffer.len();
                let data = self.tag.read_binary(offset, HEADER_LENGTH)
                    .map_err(|error| ReadError::Tag { file, error })?;
                if data.is_empty() {
                    return Err(ReadError::EmptyRead { file, offset });
                }
                self.buffer.extend_from_slice(&data);

                // short reads and headers longer than HEADER_LENGTH need another round
                let missing = tlv::missing_header_bytes(&self.buffer);
                if missing > 0 {
                    debug!("header of {} needs at least {} more bytes", file, missing);
                    return Ok(());
                }

                let (_tag, length, header_size) = tlv::decode_tag_and_length(&self.buffer)
                    .map_err(|e| ReadError::Decode { file, error: e.into() })?;
                let total = header_size + length;
                debug!("{} holds {} bytes", file, total);

                self.state = if self.buffer.len() >= total {
                    self.buffer.truncate(total);
                    ReadState::FileComplete { file }
                } else {
                    ReadState::ReadingRemainder {
                        file,
                        offset: self.buffer.len(),
                        remaining: total - self.buffer.len(),
                    }
                };
            },
            ReadState::ReadingRemainder { file, offset, remaining } => {
                let length = remaining.min(self.tag.max_read_length());
                let data = self.tag.read_binary(offset, length)
                    .map_err(|error| ReadError::Tag { file, error })?;
                if data.is_empty() {
                    return Err(ReadError::EmptyRead { file, offset });
                }

                let taken = data.len().min(remaining);
                self.buffer.extend_from_slice(&data[..taken]);
                self.state = if taken == remaining {
                    ReadState::FileComplete { file }
                } else {
                    ReadState::ReadingRemainder {
                        file,
                        offset: offset + taken,
                        remaining: remaining - taken,
                    }
                };
            },
            ReadState::FileComplete { file } => {
                let lds_file = LdsFile::from_encoded(&self.buffer)
                    .map_err(|error| ReadError::Decode { file, error })?;
                if lds_file.tag() != file {
                    return Err(ReadError::Decode {
                        file,
                        error: lds::Error::WrongFile { expected: file, obtained: lds_file.tag() },
                    });
                }
                debug!("read {} ({} bytes)", file, self.buffer.len());

                self.files.insert(file, lds_file);
                self.pending.pop_front();
                self.buffer.clear();
                self.attempts = 0;
                self.state = ReadState::Idle;
            },
            ReadState::AllDone|ReadState::Aborted => {},
        }
        Ok(())
    }

    /// Has the chip sign the challenge, eight bytes at a time.
    #[instrument(skip(self, challenge))]
    pub fn internal_authenticate(&mut self, challenge: &[u8]) -> Result<ChallengeSigs, ReadError> {
        if challenge.len() % CHALLENGE_CHUNK_LENGTH != 0 {
            return Err(ReadError::InvalidChallengeLength { length: challenge.len() });
        }

        let mut sigs = ChallengeSigs::new();
        for chunk in challenge.chunks(CHALLENGE_CHUNK_LENGTH) {
            let sig = self.tag.internal_authenticate(chunk)
                .map_err(|e| {
                    error!("INTERNAL AUTHENTICATE failed: {}", e);
                    ReadError::InternalAuthenticate(e)
                })?;
            debug!("obtained signature {} of {}", sigs.len() + 1, challenge.len() / CHALLENGE_CHUNK_LENGTH);
            sigs.push(sig);
        }
        Ok(sigs)
    }
}
