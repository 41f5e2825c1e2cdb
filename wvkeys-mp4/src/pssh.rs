//! Mp4 `PSSH` box model and init segment scanner.

/*
    REFERENCES
    ----------

    1. https://github.com/shaka-project/shaka-player/blob/4e933116984beb630d31ce7a0b8c9bc6f8b48c06/lib/util/pssh.js
    2. https://github.com/shaka-project/shaka-packager/blob/56e227267c9091a0f65b4d92d9064dda4557f3a7/packager/tools/pssh/pssh-box.py
    3. https://w3c.github.io/encrypted-media/format-registry/initdata/cenc.html

*/

use crate::{Error, Reader, Result, bail};
use base64::Engine;

const BOX_TYPE: &[u8; 4] = b"pssh";
/// size(4) + type(4) + version(1) + flags(3) + system id(16) + data size(4)
const MIN_BOX_SIZE: usize = 32;

/// DRM system identified by the `SystemID` field of a `PSSH` box.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum SystemId {
    Common,
    PlayReady,
    Widevine,
    Other([u8; 16]),
}

impl SystemId {
    pub const COMMON: [u8; 16] = hex_array("1077efecc0b24d02ace33c1e52e2fb4b");
    pub const PLAYREADY: [u8; 16] = hex_array("9a04f07998404286ab92e65be0885f95");
    pub const WIDEVINE: [u8; 16] = hex_array("edef8ba979d64acea3c827dcd51d21ed");

    /// `schemeIdUri` used by DASH `ContentProtection` elements for Widevine.
    pub const WIDEVINE_URN: &'static str = "urn:uuid:edef8ba9-79d6-4ace-a3c8-27dcd51d21ed";

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        match bytes {
            Self::COMMON => Self::Common,
            Self::PLAYREADY => Self::PlayReady,
            Self::WIDEVINE => Self::Widevine,
            x => Self::Other(x),
        }
    }

    pub fn to_bytes(&self) -> [u8; 16] {
        match self {
            Self::Common => Self::COMMON,
            Self::PlayReady => Self::PLAYREADY,
            Self::Widevine => Self::WIDEVINE,
            Self::Other(x) => *x,
        }
    }

    pub fn uuid(&self) -> String {
        let x = hex::encode(self.to_bytes());
        format!(
            "{}-{}-{}-{}-{}",
            &x[..8],
            &x[8..12],
            &x[12..16],
            &x[16..20],
            &x[20..]
        )
    }
}

impl std::fmt::Display for SystemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SystemId::Common => write!(f, "common"),
            SystemId::PlayReady => write!(f, "playready"),
            SystemId::Widevine => write!(f, "widevine"),
            SystemId::Other(x) => write!(f, "{}", hex::encode(x)),
        }
    }
}

/// A parsed `PSSH` box.
///
/// Boxes are immutable once parsed, [`PsshBox::to_bytes`] always produces the
/// canonical encoding regardless of how the input was laid out.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct PsshBox {
    pub version: u8,
    pub flags: u32,
    pub system_id: SystemId,
    /// Only present on version 1 boxes.
    pub key_ids: Vec<[u8; 16]>,
    pub data: Vec<u8>,
}

impl PsshBox {
    /// Build a version 0 Widevine box around raw `WidevinePsshData` bytes.
    pub fn widevine(data: Vec<u8>) -> Self {
        Self {
            version: 0,
            flags: 0,
            system_id: SystemId::Widevine,
            key_ids: Vec::new(),
            data,
        }
    }

    /// Parse a complete box, header included.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < MIN_BOX_SIZE {
            bail!(
                "pssh box ({} bytes is shorter than the minimum {} bytes)",
                bytes.len(),
                MIN_BOX_SIZE
            );
        }

        let mut reader = Reader::new(bytes);
        let size = reader.read_u32()? as usize;
        let box_type = reader.read_array::<4>()?;

        if &box_type != BOX_TYPE {
            bail!(
                "pssh box (expected 'pssh' box type but found '{}')",
                String::from_utf8_lossy(&box_type)
            );
        }

        if size != bytes.len() {
            bail!(
                "pssh box (declared size {} does not match {} available bytes)",
                size,
                bytes.len()
            );
        }

        let version = reader.read_u8()?;
        let flags = reader.read_u24()?;

        if version > 1 {
            bail!("pssh box (unrecognized version {})", version);
        }

        let system_id = SystemId::from_bytes(reader.read_array::<16>()?);
        let mut key_ids = Vec::new();

        if version > 0 {
            let num_key_ids = reader.read_u32()?;

            for _ in 0..num_key_ids {
                key_ids.push(reader.read_array::<16>()?);
            }
        }

        let data_size = reader.read_u32()?;
        let data = reader.read_bytes_u8(data_size as usize)?;

        if reader.has_more_data() {
            bail!(
                "pssh box ({} trailing bytes after data)",
                reader.get_length() - reader.get_position()
            );
        }

        Ok(Self {
            version,
            flags,
            system_id,
            key_ids,
            data,
        })
    }

    /// Parse a base64 encoded box, as found inside `<cenc:pssh>` elements.
    pub fn from_base64(input: &str) -> Result<Self> {
        let bytes = base64::engine::general_purpose::STANDARD.decode(input.trim())?;
        Self::from_bytes(&bytes)
    }

    /// Serialize into the canonical box layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut size = MIN_BOX_SIZE + self.data.len();

        if self.version > 0 {
            size += 4 + self.key_ids.len() * 16;
        }

        let mut bytes = Vec::with_capacity(size);
        bytes.extend_from_slice(&(size as u32).to_be_bytes());
        bytes.extend_from_slice(BOX_TYPE);
        bytes.extend_from_slice(&(((self.version as u32) << 24) | (self.flags & 0xff_ffff)).to_be_bytes());
        bytes.extend_from_slice(&self.system_id.to_bytes());

        if self.version > 0 {
            bytes.extend_from_slice(&(self.key_ids.len() as u32).to_be_bytes());

            for key_id in &self.key_ids {
                bytes.extend_from_slice(key_id);
            }
        }

        bytes.extend_from_slice(&(self.data.len() as u32).to_be_bytes());
        bytes.extend_from_slice(&self.data);
        bytes
    }

    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(self.to_bytes())
    }

    /// Key ids carried by this box, lowercase hex.
    ///
    /// Version 0 Widevine boxes keep their key ids inside the protobuf
    /// payload, which is opaque here.
    pub fn key_ids(&self) -> Vec<String> {
        self.key_ids.iter().map(hex::encode).collect()
    }
}

impl TryFrom<&[u8]> for PsshBox {
    type Error = Error;

    fn try_from(value: &[u8]) -> Result<Self> {
        Self::from_bytes(value)
    }
}

/// Find the first Widevine `PSSH` box in raw init segment bytes.
///
/// Every occurrence of the `pssh` fourcc is treated as a candidate box whose
/// size is the big endian `u32` right before it. Candidates belonging to other
/// DRM systems are skipped over. Candidates that do not fit in `data` or fail
/// to parse are not boxes, scanning resumes right after their marker.
pub fn scan(data: &[u8]) -> Option<PsshBox> {
    scan_all(data).find(|x| x.system_id == SystemId::Widevine)
}

/// Iterate over every well formed `PSSH` box found in `data`.
pub fn scan_all(data: &[u8]) -> impl Iterator<Item = PsshBox> + '_ {
    let mut offset = 0;

    std::iter::from_fn(move || {
        while let Some(marker) = find_marker(data, offset) {
            offset = marker + BOX_TYPE.len();

            if marker < 4 {
                continue;
            }

            let start = marker - 4;
            let size = u32::from_be_bytes([
                data[start],
                data[start + 1],
                data[start + 2],
                data[start + 3],
            ]) as usize;

            let Some(end) = start.checked_add(size).filter(|x| *x <= data.len()) else {
                continue;
            };

            if let Ok(pssh) = PsshBox::from_bytes(&data[start..end]) {
                offset = end;
                return Some(pssh);
            }
        }

        None
    })
}

fn find_marker(data: &[u8], from: usize) -> Option<usize> {
    data.get(from..)?
        .windows(BOX_TYPE.len())
        .position(|x| x == BOX_TYPE)
        .map(|x| x + from)
}

const fn hex_array(input: &str) -> [u8; 16] {
    const fn nibble(x: u8) -> u8 {
        match x {
            b'0'..=b'9' => x - b'0',
            b'a'..=b'f' => x - b'a' + 10,
            _ => panic!("invalid hex digit"),
        }
    }

    let input = input.as_bytes();
    let mut out = [0; 16];
    let mut i = 0;

    while i < 16 {
        out[i] = (nibble(input[i * 2]) << 4) | nibble(input[i * 2 + 1]);
        i += 1;
    }

    out
}
