use crate::{ContentKey, KeySet, license::Transport};
use reqwest::Url;
use std::{collections::HashMap, path::PathBuf, str::FromStr, sync::Arc};

/// Container kind reported by the manifest parser for a format.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Container {
    Mp4Dash,
    M4aDash,
    Other(String),
}

impl Container {
    /// Fragmented mp4 served through a DASH manifest.
    pub fn is_dash(&self) -> bool {
        matches!(self, Self::Mp4Dash | Self::M4aDash)
    }
}

impl FromStr for Container {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "mp4_dash" => Self::Mp4Dash,
            "m4a_dash" => Self::M4aDash,
            x => Self::Other(x.to_owned()),
        })
    }
}

impl std::fmt::Display for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::Mp4Dash => "mp4_dash",
                Self::M4aDash => "m4a_dash",
                Self::Other(x) => x,
            }
        )
    }
}

#[derive(Clone, Debug, Default)]
pub struct Fragment {
    /// Absolute fragment url, takes priority over `path`.
    pub url: Option<String>,
    /// Fragment path relative to [`TrackPart::fragment_base_url`].
    pub path: Option<String>,
}

/// One elementary stream of a requested format.
#[derive(Clone, Debug)]
pub struct TrackPart {
    pub format_id: String,
    pub container: Container,
    pub manifest_url: Option<String>,
    pub fragment_base_url: Option<String>,
    pub fragments: Vec<Fragment>,
    pub http_headers: HashMap<String, String>,
    /// Set by the downloader once the part is on disk.
    pub filepath: Option<PathBuf>,
    pub(crate) resolved: Option<KeySet>,
}

impl TrackPart {
    pub fn new(format_id: impl Into<String>, container: Container) -> Self {
        Self {
            format_id: format_id.into(),
            container,
            manifest_url: None,
            fragment_base_url: None,
            fragments: Vec::new(),
            http_headers: HashMap::new(),
            filepath: None,
            resolved: None,
        }
    }

    pub fn manifest_url(mut self, manifest_url: impl Into<String>) -> Self {
        self.manifest_url = Some(manifest_url.into());
        self
    }

    pub fn filepath(mut self, filepath: impl Into<PathBuf>) -> Self {
        self.filepath = Some(filepath.into());
        self
    }

    /// Keys attached by the pre-download pass, removed once consumed.
    ///
    /// An empty set marks an encrypted part no key could be found for.
    pub fn resolved_keys(&self) -> Option<&KeySet> {
        self.resolved.as_ref()
    }

    /// Url of the first fragment, which for DASH formats is the init segment.
    pub fn init_url(&self) -> Option<String> {
        let fragment = self.fragments.first()?;

        if let Some(url) = &fragment.url {
            return Some(url.to_owned());
        }

        Some(format!(
            "{}{}",
            self.fragment_base_url.as_deref().unwrap_or_default(),
            fragment.path.as_deref()?
        ))
    }
}

/// Challenge transport supplied by the extractor for a whole record.
pub type LicenseCallback = Arc<dyn Transport>;

/// Requested formats of a download record.
#[derive(Clone, Debug)]
pub enum Formats {
    Single(TrackPart),
    /// Separately downloaded parts, usually video and audio, that the
    /// downloader merges afterwards from `files_to_merge`.
    Merged {
        parts: Vec<TrackPart>,
        files_to_merge: Vec<PathBuf>,
    },
}

/// The download result record the pipeline reads and annotates.
#[derive(Clone)]
pub struct DownloadInfo {
    pub id: String,
    pub formats: Formats,
    /// Set by the downloader once media has been written.
    pub real_download: bool,
    /// Keys supplied out of band, bypassing license acquisition.
    pub cenc_key: Vec<ContentKey>,
    pub license_url: Option<Url>,
    pub license_callback: Option<LicenseCallback>,
    pub(crate) decrypt_scheduled: bool,
}

impl DownloadInfo {
    pub fn new(id: impl Into<String>, formats: Formats) -> Self {
        Self {
            id: id.into(),
            formats,
            real_download: false,
            cenc_key: Vec::new(),
            license_url: None,
            license_callback: None,
            decrypt_scheduled: false,
        }
    }

    pub fn single(id: impl Into<String>, part: TrackPart) -> Self {
        Self::new(id, Formats::Single(part))
    }

    pub fn merged(id: impl Into<String>, parts: Vec<TrackPart>) -> Self {
        let files_to_merge = parts.iter().filter_map(|x| x.filepath.clone()).collect();
        Self::new(
            id,
            Formats::Merged {
                parts,
                files_to_merge,
            },
        )
    }

    pub fn parts(&self) -> &[TrackPart] {
        match &self.formats {
            Formats::Single(part) => std::slice::from_ref(part),
            Formats::Merged { parts, .. } => parts,
        }
    }

    pub fn parts_mut(&mut self) -> &mut [TrackPart] {
        match &mut self.formats {
            Formats::Single(part) => std::slice::from_mut(part),
            Formats::Merged { parts, .. } => parts,
        }
    }

    pub fn files_to_merge(&self) -> &[PathBuf] {
        match &self.formats {
            Formats::Single(_) => &[],
            Formats::Merged { files_to_merge, .. } => files_to_merge,
        }
    }

    pub fn is_merged(&self) -> bool {
        matches!(self.formats, Formats::Merged { .. })
    }

    /// Whether the decrypt pass was scheduled by the pre-download pass.
    pub fn decrypt_scheduled(&self) -> bool {
        self.decrypt_scheduled
    }
}

impl std::fmt::Debug for DownloadInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadInfo")
            .field("id", &self.id)
            .field("formats", &self.formats)
            .field("real_download", &self.real_download)
            .field("cenc_key", &self.cenc_key)
            .field("license_url", &self.license_url)
            .field("license_callback", &self.license_callback.is_some())
            .finish_non_exhaustive()
    }
}

/// How the keys for a part were obtained.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum KeyResolution {
    Unresolved,
    DirectKey(KeySet),
    CacheHit(KeySet),
    NetworkResolved(KeySet),
}

impl KeyResolution {
    pub fn keys(&self) -> Option<&KeySet> {
        match self {
            Self::Unresolved => None,
            Self::DirectKey(x) | Self::CacheHit(x) | Self::NetworkResolved(x) => Some(x),
        }
    }

    /// True when there is at least one key to decrypt with.
    pub fn is_usable(&self) -> bool {
        self.keys().is_some_and(|x| !x.is_empty())
    }
}

/// Lifecycle of a part through both passes.
///
/// `Unencrypted`, `Decrypted`, `DecryptionFailed` and `KeyUnavailable` are
/// terminal.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TrackState {
    Unencrypted,
    EncryptedPendingKey,
    EncryptedDirectKey,
    KeyResolved,
    KeyUnavailable,
    Decrypted,
    DecryptionFailed,
}
