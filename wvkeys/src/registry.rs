use crate::{Result, utils::lock};
use log::debug;
use reqwest::Url;
use std::{collections::HashMap, sync::Mutex};
use wvkeys_mp4::pssh::PsshBox;

/// Protection metadata captured while a manifest was parsed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ManifestRegistration {
    pub pssh: Option<PsshBox>,
    pub license_url: Option<Url>,
}

/// Session scoped table of manifest url to protection metadata.
///
/// A registration is created the first time a Widevine protected manifest is
/// seen. Later elements of the same manifest may only fill fields which are
/// still empty, so a captured license url stays authoritative.
#[derive(Default)]
pub struct Registry {
    manifests: Mutex<HashMap<String, ManifestRegistration>>,
    scanned: Mutex<HashMap<String, Option<PsshBox>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, mpd_url: &str, pssh: Option<PsshBox>, license_url: Option<Url>) {
        let mut manifests = lock(&self.manifests);
        let registration = manifests.entry(mpd_url.to_owned()).or_default();

        if registration.pssh.is_none() {
            registration.pssh = pssh;
        }

        if registration.license_url.is_none() {
            registration.license_url = license_url;
        }

        debug!(
            "Registered {} (pssh: {}, license url: {})",
            mpd_url,
            registration.pssh.is_some(),
            registration
                .license_url
                .as_ref()
                .map(|x| x.as_str())
                .unwrap_or("none")
        );
    }

    pub fn contains(&self, mpd_url: &str) -> bool {
        lock(&self.manifests).contains_key(mpd_url)
    }

    pub fn get(&self, mpd_url: &str) -> Option<ManifestRegistration> {
        lock(&self.manifests).get(mpd_url).cloned()
    }

    pub fn license_url(&self, mpd_url: &str) -> Option<Url> {
        lock(&self.manifests)
            .get(mpd_url)
            .and_then(|x| x.license_url.clone())
    }

    pub fn len(&self) -> usize {
        lock(&self.manifests).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.manifests).is_empty()
    }

    /// Protection header for a manifest, running `scan` at most once per
    /// manifest when the manifest itself did not carry one.
    ///
    /// Successful scans are remembered even when nothing was found. Failed
    /// scans are not, so a later part may retry.
    pub fn pssh_or_scan<F>(&self, mpd_url: &str, scan: F) -> Result<Option<PsshBox>>
    where
        F: FnOnce() -> Result<Option<PsshBox>>,
    {
        if let Some(pssh) = self.get(mpd_url).and_then(|x| x.pssh) {
            return Ok(Some(pssh));
        }

        let mut scanned = lock(&self.scanned);

        if let Some(pssh) = scanned.get(mpd_url) {
            return Ok(pssh.clone());
        }

        let pssh = scan()?;
        scanned.insert(mpd_url.to_owned(), pssh.clone());
        Ok(pssh)
    }
}
