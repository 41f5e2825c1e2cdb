//! Hooks the host wires into its manifest parser and extractor registration.
//!
//! The host exposes two capabilities: an [`Extractor`], which turns manifests
//! into track parts, and an [`ExtractorRegistrar`], which collects the
//! extractors used during a download session. Wrapping them with
//! [`Intercepted`] and [`InterceptingRegistrar`] feeds Widevine metadata into
//! a [`Registry`] before the host sees the manifest.

use crate::{
    Result,
    manifest::{self, ContentProtections},
    registry::Registry,
    track::TrackPart,
};
use log::{debug, warn};
use reqwest::Url;
use serde_json::Value;
use std::{borrow::Cow, sync::Arc};
use wvkeys_mp4::pssh::PsshBox;

/// Manifest parsing capability of the host.
pub trait Extractor: Send + Sync {
    /// Parse the periods of an MPD document fetched from `mpd_url`.
    fn parse_mpd_periods(&self, mpd: &str, mpd_url: &str) -> Result<Vec<TrackPart>>;

    /// Parse Brightcove playback metadata.
    fn parse_brightcove_metadata(&self, metadata: Value) -> Result<Vec<TrackPart>>;

    fn is_intercepted(&self) -> bool {
        false
    }
}

impl<E: Extractor + ?Sized> Extractor for Box<E> {
    fn parse_mpd_periods(&self, mpd: &str, mpd_url: &str) -> Result<Vec<TrackPart>> {
        (**self).parse_mpd_periods(mpd, mpd_url)
    }

    fn parse_brightcove_metadata(&self, metadata: Value) -> Result<Vec<TrackPart>> {
        (**self).parse_brightcove_metadata(metadata)
    }

    fn is_intercepted(&self) -> bool {
        (**self).is_intercepted()
    }
}

/// Extractor registration capability of the host.
pub trait ExtractorRegistrar {
    fn add_info_extractor(&mut self, extractor: Box<dyn Extractor>);
}

/// An [`Extractor`] which records Widevine protection in a [`Registry`]
/// before delegating.
pub struct Intercepted<E> {
    inner: E,
    registry: Arc<Registry>,
}

impl<E: Extractor> Intercepted<E> {
    pub fn new(inner: E, registry: Arc<Registry>) -> Self {
        Self { inner, registry }
    }

    pub fn into_inner(self) -> E {
        self.inner
    }

    /// Register every Widevine element, returns whether any was found.
    fn observe(&self, protections: &ContentProtections, mpd_url: &str) -> bool {
        let mut found = false;

        for element in protections.widevine() {
            let pssh = element
                .pssh
                .as_deref()
                .and_then(|x| match PsshBox::from_base64(x) {
                    Ok(pssh) => Some(pssh),
                    Err(e) => {
                        warn!("Ignoring invalid pssh in {} ({})", mpd_url, e);
                        None
                    }
                });
            let license_url = element
                .license_url
                .as_deref()
                .and_then(|x| match Url::parse(x) {
                    Ok(url) => Some(url),
                    Err(e) => {
                        warn!("Ignoring invalid license url {} ({})", x, e);
                        None
                    }
                });

            self.registry.register(mpd_url, pssh, license_url);
            found = true;
        }

        found
    }
}

impl<E: Extractor> Extractor for Intercepted<E> {
    fn parse_mpd_periods(&self, mpd: &str, mpd_url: &str) -> Result<Vec<TrackPart>> {
        let mpd = match ContentProtections::parse(mpd) {
            Ok(protections) if self.observe(&protections, mpd_url) => {
                debug!("Treating formats of {} as unprotected", mpd_url);
                protections.strip(mpd)
            }
            Ok(_) => Cow::Borrowed(mpd),
            Err(e) => {
                debug!("Could not scan {} for content protection ({})", mpd_url, e);
                Cow::Borrowed(mpd)
            }
        };

        self.inner.parse_mpd_periods(&mpd, mpd_url)
    }

    fn parse_brightcove_metadata(&self, mut metadata: Value) -> Result<Vec<TrackPart>> {
        if manifest::strip_brightcove_key_systems(&mut metadata) {
            debug!("Treating widevine brightcove sources as unprotected");
        }

        self.inner.parse_brightcove_metadata(metadata)
    }

    fn is_intercepted(&self) -> bool {
        true
    }
}

/// An [`ExtractorRegistrar`] which intercepts every extractor added to it.
pub struct InterceptingRegistrar<R> {
    inner: R,
    registry: Arc<Registry>,
}

impl<R: ExtractorRegistrar> InterceptingRegistrar<R> {
    pub fn new(inner: R, registry: Arc<Registry>) -> Self {
        Self { inner, registry }
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: ExtractorRegistrar> ExtractorRegistrar for InterceptingRegistrar<R> {
    fn add_info_extractor(&mut self, extractor: Box<dyn Extractor>) {
        self.inner.add_info_extractor(intercept(extractor, &self.registry));
    }
}

/// Wrap `extractor` unless it is already intercepted.
pub fn intercept(extractor: Box<dyn Extractor>, registry: &Arc<Registry>) -> Box<dyn Extractor> {
    if extractor.is_intercepted() {
        extractor
    } else {
        Box::new(Intercepted::new(extractor, registry.clone()))
    }
}
