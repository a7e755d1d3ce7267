// used to print out readable forms of an identifier
use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{FieldTrialError, Result};

pub const IDENTIFIER_LENGTH: usize = 12;

// ------------- Identifier -------------
/// Opaque document identifier, rendered as 24 hex characters.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Identifier([u8; IDENTIFIER_LENGTH]);

impl Identifier {
    pub fn from_bytes(bytes: [u8; IDENTIFIER_LENGTH]) -> Self {
        Self(bytes)
    }
    pub fn parse(s: &str) -> Result<Self> {
        if s.len() != IDENTIFIER_LENGTH * 2 {
            return Err(FieldTrialError::InvalidIdentifier(s.to_string()));
        }
        let mut bytes = [0u8; IDENTIFIER_LENGTH];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|_| FieldTrialError::InvalidIdentifier(s.to_string()))?;
        Ok(Self(bytes))
    }
    pub fn bytes(&self) -> &[u8; IDENTIFIER_LENGTH] {
        &self.0
    }
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
    /// Seconds since the epoch at which the identifier was minted.
    pub fn timestamp(&self) -> u32 {
        u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
    }
}
impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}
impl fmt::Debug for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Identifier({})", self.to_hex())
    }
}
impl FromStr for Identifier {
    type Err = FieldTrialError;
    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
impl Serialize for Identifier {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}
impl<'de> Deserialize<'de> for Identifier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Identifier::parse(&s).map_err(serde::de::Error::custom)
    }
}

// ------------- IdentifierGenerator -------------
// Identifiers are minted by the persistence layer on first save, or
// given as input when a document is loaded.
#[derive(Debug)]
pub struct IdentifierGenerator {
    process: [u8; 5],
    counter: u32,
}

impl IdentifierGenerator {
    pub fn new() -> Self {
        Self {
            process: rand::random(),
            counter: rand::random::<u32>() & 0x00ff_ffff,
        }
    }
    pub fn generate(&mut self) -> Identifier {
        self.counter = (self.counter + 1) & 0x00ff_ffff;
        let seconds = Utc::now().timestamp().clamp(0, u32::MAX as i64) as u32;
        let mut bytes = [0u8; IDENTIFIER_LENGTH];
        bytes[0..4].copy_from_slice(&seconds.to_be_bytes());
        bytes[4..9].copy_from_slice(&self.process);
        bytes[9..12].copy_from_slice(&self.counter.to_be_bytes()[1..4]);
        Identifier(bytes)
    }
}
impl Default for IdentifierGenerator {
    fn default() -> Self {
        Self::new()
    }
}
