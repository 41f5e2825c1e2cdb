use crate::KeySet;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};
use wvkeys_mp4::pssh::PsshBox;

/// Persistent JSON store addressed by `(section, key)`.
pub trait Cache: Send + Sync {
    fn load(&self, section: &str, key: &str) -> Option<Value>;
    fn store(&self, section: &str, key: &str, value: &Value);
}

/// One JSON file per entry at `<root>/<section>/<key>.json`.
pub struct FsCache {
    root: PathBuf,
}

impl FsCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `wvkeys` under the platform cache directory.
    pub fn default_dir() -> Option<PathBuf> {
        dirs::cache_dir().map(|x| x.join("wvkeys"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, section: &str, key: &str) -> PathBuf {
        self.root.join(section).join(format!("{}.json", key))
    }

    fn write(&self, path: &Path, value: &Value) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp = path.with_extension("json.part");
        fs::write(&tmp, serde_json::to_vec(value)?)?;
        fs::rename(&tmp, path)
    }
}

impl Cache for FsCache {
    fn load(&self, section: &str, key: &str) -> Option<Value> {
        let path = self.path(section, key);
        let data = fs::read(&path).ok()?;

        match serde_json::from_slice(&data) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Ignoring corrupt cache entry {} ({})", path.display(), e);
                None
            }
        }
    }

    fn store(&self, section: &str, key: &str, value: &Value) {
        let path = self.path(section, key);

        match self.write(&path, value) {
            Ok(()) => debug!("Wrote cache entry {}", path.display()),
            Err(e) => warn!("Failed to write cache entry {} ({})", path.display(), e),
        }
    }
}

/// Cache which never remembers anything.
pub struct NoCache;

impl Cache for NoCache {
    fn load(&self, _: &str, _: &str) -> Option<Value> {
        None
    }

    fn store(&self, _: &str, _: &str, _: &Value) {}
}

/// A persisted key set, together with the header it was resolved for.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct CachedKeySet {
    /// Base64 of the canonical protection header.
    pub pssh: String,
    pub keys: KeySet,
}

/// Resolved keys addressed by protection header fingerprint.
#[derive(Clone)]
pub struct KeyCache {
    inner: Arc<dyn Cache>,
}

impl KeyCache {
    pub const SECTION: &'static str = "mp4decrypt-pssh";

    pub fn new(inner: Arc<dyn Cache>) -> Self {
        Self { inner }
    }

    pub fn disabled() -> Self {
        Self::new(Arc::new(NoCache))
    }

    /// First 128 bits of the BLAKE3 hash of the canonical header, lowercase hex.
    pub fn fingerprint(pssh: &PsshBox) -> String {
        let hash = blake3::hash(&pssh.to_bytes());
        hex::encode(&hash.as_bytes()[..16])
    }

    /// Raw entry stored under `fingerprint`, without integrity checks.
    pub fn load_entry(&self, fingerprint: &str) -> Option<CachedKeySet> {
        let value = self.inner.load(Self::SECTION, fingerprint)?;

        match serde_json::from_value(value) {
            Ok(entry) => Some(entry),
            Err(e) => {
                debug!("Ignoring malformed key cache entry {} ({})", fingerprint, e);
                None
            }
        }
    }

    /// Keys cached for `pssh`. Entries stored for a different header under the
    /// same fingerprint are treated as a miss.
    pub fn load(&self, pssh: &PsshBox) -> Option<KeySet> {
        let fingerprint = Self::fingerprint(pssh);
        let entry = self.load_entry(&fingerprint)?;

        if entry.pssh != pssh.to_base64() {
            debug!("Key cache entry {} belongs to another pssh", fingerprint);
            return None;
        }

        for key in &entry.keys {
            info!("Loaded key from cache: {}", key);
        }

        Some(entry.keys)
    }

    pub fn store_entry(&self, fingerprint: &str, entry: &CachedKeySet) {
        match serde_json::to_value(entry) {
            Ok(value) => self.inner.store(Self::SECTION, fingerprint, &value),
            Err(e) => warn!("Failed to serialize key cache entry ({})", e),
        }
    }

    pub fn store(&self, pssh: &PsshBox, keys: &KeySet) {
        self.store_entry(
            &Self::fingerprint(pssh),
            &CachedKeySet {
                pssh: pssh.to_base64(),
                keys: keys.clone(),
            },
        );
    }
}
