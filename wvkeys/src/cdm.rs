//! Content decryption module capability.
//!
//! Signing license requests and decrypting license responses is delegated to
//! an implementation of [`Cdm`]. [`RemoteCdm`](crate::remote::RemoteCdm) talks
//! to a CDM exposed over HTTP.

use crate::{ContentKey, Error, Result};
use std::str::FromStr;
use wvkeys_mp4::pssh::PsshBox;

/// Opaque CDM session handle.
pub type SessionId = Vec<u8>;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LicenseType {
    Streaming,
    Offline,
    Automatic,
}

impl std::fmt::Display for LicenseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::Streaming => "STREAMING",
                Self::Offline => "OFFLINE",
                Self::Automatic => "AUTOMATIC",
            }
        )
    }
}

/// Key container type from a license.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum KeyType {
    Signing,
    Content,
    KeyControl,
    OperatorSession,
    Entitlement,
    OemContent,
    Other(String),
}

impl KeyType {
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_uppercase().as_str() {
            "SIGNING" => Self::Signing,
            "CONTENT" => Self::Content,
            "KEY_CONTROL" => Self::KeyControl,
            "OPERATOR_SESSION" => Self::OperatorSession,
            "ENTITLEMENT" => Self::Entitlement,
            "OEM_CONTENT" => Self::OemContent,
            x => Self::Other(x.to_owned()),
        }
    }
}

impl FromStr for KeyType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self::from_name(s))
    }
}

/// A key yielded by a CDM session.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Key {
    pub kid: Vec<u8>,
    pub key: Vec<u8>,
    pub typ: KeyType,
}

impl TryFrom<&Key> for ContentKey {
    type Error = Error;

    fn try_from(value: &Key) -> Result<Self> {
        ContentKey::from_slices(&value.kid, &value.key)
    }
}

/// A Widevine CDM bound to one device identity.
pub trait Cdm: Send + Sync {
    fn open(&self) -> Result<SessionId>;

    fn license_challenge(
        &self,
        session: &SessionId,
        pssh: &PsshBox,
        license_type: LicenseType,
        privacy_mode: bool,
    ) -> Result<Vec<u8>>;

    fn parse_license(&self, session: &SessionId, license: &[u8]) -> Result<()>;

    fn keys(&self, session: &SessionId) -> Result<Vec<Key>>;

    fn close(&self, session: &SessionId) -> Result<()>;
}
