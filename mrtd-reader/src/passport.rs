//! The data read from a passport, as handed to downstream consumers.


use std::collections::BTreeMap;
use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Serialize, Serializer};
use serde::ser::SerializeMap;

use crate::lds::{LdsFile, LdsFileTag};


#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Error {
    MissingRequiredLdsFile(LdsFileTag),
    MissingChallengeSigs,
}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingRequiredLdsFile(tag)
                => write!(f, "required file {} is missing", tag),
            Self::MissingChallengeSigs
                => write!(f, "no challenge signatures"),
        }
    }
}
impl std::error::Error for Error {
}


/// The signatures returned by INTERNAL AUTHENTICATE, one per 8-byte chunk of a challenge.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct ChallengeSigs {
    sigs: Vec<Vec<u8>>,
}
impl ChallengeSigs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sig: Vec<u8>) {
        self.sigs.push(sig);
    }

    pub fn len(&self) -> usize {
        self.sigs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sigs.is_empty()
    }

    pub fn sigs(&self) -> &[Vec<u8>] {
        &self.sigs
    }
}
impl From<Vec<Vec<u8>>> for ChallengeSigs {
    fn from(sigs: Vec<Vec<u8>>) -> Self { Self { sigs } }
}
impl Serialize for ChallengeSigs {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let encoded: Vec<String> = self.sigs.iter()
            .map(|s| BASE64.encode(s))
            .collect();
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry("csigs", &encoded)?;
        map.end()
    }
}


/// The files read from a passport together with the challenge signatures.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct PassportData {
    #[serde(flatten)]
    pub lds_files: BTreeMap<LdsFileTag, LdsFile>,

    #[serde(flatten)]
    pub csigs: ChallengeSigs,
}
impl PassportData {
    pub fn new(lds_files: BTreeMap<LdsFileTag, LdsFile>, csigs: ChallengeSigs) -> Self {
        Self {
            lds_files,
            csigs,
        }
    }

    /// Ensures the given files were read and that the challenge was signed.
    pub fn require_files(&self, required: &[LdsFileTag]) -> Result<(), Error> {
        for tag in required {
            if !self.lds_files.contains_key(tag) {
                return Err(Error::MissingRequiredLdsFile(*tag));
            }
        }
        if self.csigs.is_empty() {
            return Err(Error::MissingChallengeSigs);
        }
        Ok(())
    }
}
