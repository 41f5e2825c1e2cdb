use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// A content key pair, written as `hex(kid):hex(key)`.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentKey {
    pub kid: [u8; 16],
    pub key: [u8; 16],
}

impl ContentKey {
    pub fn new(kid: [u8; 16], key: [u8; 16]) -> Self {
        Self { kid, key }
    }

    pub fn from_slices(kid: &[u8], key: &[u8]) -> Result<Self> {
        let invalid = |message: &str| Error::InvalidKey {
            input: format!("{}:{}", hex::encode(kid), hex::encode(key)),
            message: message.to_owned(),
        };

        Ok(Self {
            kid: kid.try_into().map_err(|_| invalid("kid must be 16 bytes"))?,
            key: key.try_into().map_err(|_| invalid("key must be 16 bytes"))?,
        })
    }
}

impl FromStr for ContentKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |message: String| Error::InvalidKey {
            input: s.to_owned(),
            message,
        };

        let Some((kid, key)) = s.trim().split_once(':') else {
            return Err(invalid("expected 'KID:KEY'".to_owned()));
        };

        let kid = hex::decode(kid.replace('-', "")).map_err(|x| invalid(x.to_string()))?;
        let key = hex::decode(key).map_err(|x| invalid(x.to_string()))?;

        Ok(Self {
            kid: kid
                .try_into()
                .map_err(|_| invalid("kid must be 32 hex digits".to_owned()))?,
            key: key
                .try_into()
                .map_err(|_| invalid("key must be 32 hex digits".to_owned()))?,
        })
    }
}

impl TryFrom<String> for ContentKey {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ContentKey> for String {
    fn from(value: ContentKey) -> Self {
        value.to_string()
    }
}

impl std::fmt::Display for ContentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", hex::encode(self.kid), hex::encode(self.key))
    }
}

/// Ordered content keys resolved for one protection header.
///
/// An empty set is a valid outcome, it records that resolution was attempted
/// without yielding any key.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeySet(Vec<ContentKey>);

impl KeySet {
    /// Later duplicates of a key are dropped.
    pub fn new(keys: Vec<ContentKey>) -> Self {
        keys.into_iter().collect()
    }

    pub fn push(&mut self, key: ContentKey) {
        if !self.0.contains(&key) {
            self.0.push(key);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ContentKey> {
        self.0.iter()
    }

    /// Arguments for mp4decrypt, `--key kid:key` for every key.
    pub fn to_args(&self) -> Vec<String> {
        self.0
            .iter()
            .flat_map(|x| ["--key".to_owned(), x.to_string()])
            .collect()
    }
}

impl FromIterator<ContentKey> for KeySet {
    fn from_iter<T: IntoIterator<Item = ContentKey>>(iter: T) -> Self {
        let mut keys = Self::default();

        for key in iter {
            keys.push(key);
        }

        keys
    }
}

impl<'a> IntoIterator for &'a KeySet {
    type Item = &'a ContentKey;
    type IntoIter = std::slice::Iter<'a, ContentKey>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
