use crate::{
    ContentKey, Error, KeySet, Result,
    cache::KeyCache,
    cdm::{Cdm, Key, KeyType, LicenseType},
    track::KeyResolution,
    utils::lock,
};
use log::{debug, info};
use reqwest::{
    StatusCode, Url,
    blocking::Client,
    header::{self, HeaderMap},
};
use serde_json::Value;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};
use wvkeys_mp4::pssh::PsshBox;

/// Carries a license challenge to a license server and returns its response.
pub trait Transport: Send + Sync {
    fn exchange(&self, challenge: &[u8]) -> Result<Vec<u8>>;
}

impl<F> Transport for F
where
    F: Fn(&[u8]) -> Result<Vec<u8>> + Send + Sync,
{
    fn exchange(&self, challenge: &[u8]) -> Result<Vec<u8>> {
        self(challenge)
    }
}

/// POSTs the raw challenge to a license url.
pub struct HttpTransport {
    client: Client,
    url: Url,
    headers: HeaderMap,
}

impl HttpTransport {
    pub fn new(client: Client, url: Url) -> Self {
        Self {
            client,
            url,
            headers: HeaderMap::new(),
        }
    }

    /// Extra headers sent with every license request.
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }
}

impl Transport for HttpTransport {
    fn exchange(&self, challenge: &[u8]) -> Result<Vec<u8>> {
        info!("Fetching keys from {}", self.url);

        let response = self
            .client
            .post(self.url.clone())
            .headers(self.headers.clone())
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(challenge.to_vec())
            .send()?;
        let status = response.status();
        let body = response.bytes()?;

        if status == StatusCode::UNAVAILABLE_FOR_LEGAL_REASONS {
            return Err(Error::GeoRestricted);
        }

        if body.first() == Some(&b'{')
            && let Ok(value) = serde_json::from_slice::<Value>(&body)
        {
            check_geo_restriction(&value)?;
        }

        if status.is_client_error() || status.is_server_error() {
            return Err(Error::License(format!(
                "{} '{}'",
                status,
                String::from_utf8_lossy(&body).trim()
            )));
        }

        Ok(body.to_vec())
    }
}

/// Fails with [`Error::GeoRestricted`] when a JSON API response reports a
/// failed geo check.
pub fn check_geo_restriction(value: &Value) -> Result<()> {
    if value.get("responseCode").and_then(Value::as_str) == Some("GEO_CHECK_FAIL") {
        return Err(Error::GeoRestricted);
    }

    Ok(())
}

/// Outcome of the single resolution attempt made for a fingerprint.
#[derive(Clone)]
enum Attempt {
    Cached(KeySet),
    Fetched(KeySet),
    GeoRestricted,
    Failed(String),
}

/// Resolves protection headers to content keys through a CDM.
///
/// Resolution is attempted at most once per fingerprint for the lifetime of
/// the resolver. Concurrent callers asking for the same fingerprint wait on
/// the same slot instead of issuing their own license request.
pub struct LicenseResolver {
    cdm: Option<Arc<dyn Cdm>>,
    cache: KeyCache,
    slots: Mutex<HashMap<String, Arc<Mutex<Option<Attempt>>>>>,
}

impl LicenseResolver {
    pub fn new(cdm: Option<Arc<dyn Cdm>>, cache: KeyCache) -> Self {
        Self {
            cdm,
            cache,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn has_cdm(&self) -> bool {
        self.cdm.is_some()
    }

    fn slot(&self, fingerprint: &str) -> Arc<Mutex<Option<Attempt>>> {
        lock(&self.slots)
            .entry(fingerprint.to_owned())
            .or_default()
            .clone()
    }

    /// Keys for `pssh`, from memory, the key cache or a license exchange over
    /// `transport`, in that order.
    ///
    /// Without a transport nothing is attempted and [`KeyResolution::Unresolved`]
    /// is returned, a later caller with a transport may still resolve.
    pub fn resolve(&self, pssh: &PsshBox, transport: Option<&dyn Transport>) -> Result<KeyResolution> {
        let fingerprint = KeyCache::fingerprint(pssh);
        let slot = self.slot(&fingerprint);
        let mut attempt = lock(&slot);

        if let Some(attempt) = attempt.as_ref() {
            debug!("Reusing keys resolved for {}", fingerprint);
            return match attempt {
                Attempt::Cached(keys) => Ok(KeyResolution::CacheHit(keys.clone())),
                Attempt::Fetched(keys) => Ok(KeyResolution::NetworkResolved(keys.clone())),
                Attempt::GeoRestricted => Err(Error::GeoRestricted),
                Attempt::Failed(message) => Err(Error::License(message.to_owned())),
            };
        }

        if let Some(keys) = self.cache.load(pssh) {
            *attempt = Some(Attempt::Cached(keys.clone()));
            return Ok(KeyResolution::CacheHit(keys));
        }

        let Some(transport) = transport else {
            return Ok(KeyResolution::Unresolved);
        };

        let Some(cdm) = &self.cdm else {
            debug!("No CDM configured, skipping license request");
            let keys = KeySet::default();
            self.cache.store(pssh, &keys);
            *attempt = Some(Attempt::Fetched(keys.clone()));
            return Ok(KeyResolution::NetworkResolved(keys));
        };

        match fetch_keys(cdm.as_ref(), pssh, transport) {
            Ok(keys) => {
                self.cache.store(pssh, &keys);
                *attempt = Some(Attempt::Fetched(keys.clone()));
                Ok(KeyResolution::NetworkResolved(keys))
            }
            Err(Error::GeoRestricted) => {
                *attempt = Some(Attempt::GeoRestricted);
                Err(Error::GeoRestricted)
            }
            Err(e) => {
                *attempt = Some(Attempt::Failed(e.to_string()));
                Err(e)
            }
        }
    }
}

/// Run one challenge/response exchange and keep the content keys.
pub fn fetch_keys(cdm: &dyn Cdm, pssh: &PsshBox, transport: &dyn Transport) -> Result<KeySet> {
    let session = cdm.open()?;

    let result = (|| -> Result<Vec<Key>> {
        let challenge = cdm.license_challenge(&session, pssh, LicenseType::Streaming, true)?;
        let license = transport.exchange(&challenge)?;
        cdm.parse_license(&session, &license)?;
        cdm.keys(&session)
    })();

    if let Err(e) = cdm.close(&session) {
        debug!("Failed to close CDM session ({})", e);
    }

    let mut keys = KeySet::default();

    for key in result?.iter().filter(|x| x.typ == KeyType::Content) {
        let key = ContentKey::try_from(key)?;
        info!("Fetched key: {}", key);
        keys.push(key);
    }

    Ok(keys)
}
