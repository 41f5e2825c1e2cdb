use crate::{
    Config, Error, KeySet, Result,
    classify,
    decrypt::{self, DecryptReport, Mp4Decrypt},
    intercept::{Extractor, ExtractorRegistrar, Intercepted, InterceptingRegistrar},
    license::{HttpTransport, LicenseResolver, Transport},
    registry::Registry,
    track::{DownloadInfo, KeyResolution, TrackPart, TrackState},
};
use log::{debug, info, warn};
use reqwest::{
    StatusCode,
    blocking::Client,
    header::{HeaderMap, HeaderName, HeaderValue},
};
use std::{path::PathBuf, sync::Arc};
use wvkeys_mp4::pssh::{self, PsshBox};

/// Key acquisition state of one download session.
///
/// Owns the manifest registry and the per fingerprint resolution memory,
/// both live as long as the session.
pub struct Session {
    registry: Arc<Registry>,
    resolver: LicenseResolver,
    client: Client,
    license_headers: HeaderMap,
    mp4decrypt: Option<PathBuf>,
    sanitize_filenames: bool,
}

/// Outcome of the pre-download pass for one part.
#[derive(Debug)]
pub struct PreparedPart {
    pub format_id: String,
    pub state: TrackState,
    pub resolution: KeyResolution,
}

#[derive(Debug, Default)]
pub struct PrepareReport {
    pub parts: Vec<PreparedPart>,
    /// Per part failures, none of them stopped the other parts.
    pub errors: Vec<Error>,
}

impl Session {
    pub fn new(config: Config) -> Result<Self> {
        let client = match &config.client {
            Some(x) => x.clone(),
            None => Client::builder().build()?,
        };

        Ok(Self {
            registry: Arc::new(Registry::new()),
            resolver: LicenseResolver::new(config.cdm.clone(), config.key_cache()),
            client,
            license_headers: config.license_headers,
            mp4decrypt: config.mp4decrypt,
            sanitize_filenames: config.sanitize_filenames,
        })
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn resolver(&self) -> &LicenseResolver {
        &self.resolver
    }

    /// Intercept `extractor` so its manifests feed this session.
    pub fn wrap<E: Extractor>(&self, extractor: E) -> Intercepted<E> {
        Intercepted::new(extractor, self.registry.clone())
    }

    /// Intercept every extractor later added to `registrar`.
    pub fn intercept<R: ExtractorRegistrar>(&self, registrar: R) -> InterceptingRegistrar<R> {
        InterceptingRegistrar::new(registrar, self.registry.clone())
    }

    /// Pre-download pass: resolve keys for every encrypted part of `info` and
    /// attach them to the part.
    pub fn prepare(&self, info: &mut DownloadInfo) -> Result<PrepareReport> {
        let mut report = PrepareReport::default();
        let states = info
            .parts()
            .iter()
            .map(|x| classify::classify(info, x, &self.registry))
            .collect::<Vec<_>>();

        if states.iter().all(|x| *x == TrackState::Unencrypted) {
            for part in info.parts() {
                report.parts.push(PreparedPart {
                    format_id: part.format_id.clone(),
                    state: TrackState::Unencrypted,
                    resolution: KeyResolution::Unresolved,
                });
            }

            return Ok(report);
        }

        if info.real_download {
            return Err(Error::MustRunBeforeDownload);
        }

        let mut resolved = Vec::with_capacity(states.len());

        for (part, state) in info.parts().iter().zip(&states) {
            if *state == TrackState::Unencrypted {
                resolved.push((None, KeyResolution::Unresolved, *state));
                continue;
            }

            let resolution = match self.resolve(info, part) {
                Ok(x) => x,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!("{}: {}", part.format_id, e);
                    report.errors.push(e);
                    KeyResolution::Unresolved
                }
            };

            let state = classify::resolved(&resolution);

            if state == TrackState::KeyUnavailable {
                let e = Error::NoKeys {
                    format_id: part.format_id.clone(),
                };
                warn!("{}", e);
                report.errors.push(e);
            }

            let keys = resolution.keys().cloned().unwrap_or_default();
            resolved.push((Some(keys), resolution, state));
        }

        for (part, (keys, resolution, state)) in info.parts_mut().iter_mut().zip(resolved) {
            if keys.is_some() {
                part.resolved = keys;
            }

            report.parts.push(PreparedPart {
                format_id: part.format_id.clone(),
                state,
                resolution,
            });
        }

        if !info.decrypt_scheduled {
            debug!("Scheduled decryption of {}", info.id);
            info.decrypt_scheduled = true;
        }

        Ok(report)
    }

    /// Keys for one encrypted part.
    pub fn resolve(&self, info: &DownloadInfo, part: &TrackPart) -> Result<KeyResolution> {
        if !info.cenc_key.is_empty() {
            return Ok(KeyResolution::DirectKey(info.cenc_key.iter().cloned().collect()));
        }

        let mpd_url = part.manifest_url.as_deref();
        let pssh = match mpd_url {
            Some(x) => self.registry.pssh_or_scan(x, || self.scan_init(part)),
            None => self.scan_init(part),
        };

        let pssh = match pssh {
            Ok(Some(x)) => x,
            Ok(None) => {
                warn!("Could not find PSSH for {}", part.format_id);
                return Ok(KeyResolution::Unresolved);
            }
            Err(Error::GeoRestricted) => return Err(Error::GeoRestricted),
            Err(e) => {
                warn!("Could not fetch init segment of {} ({})", part.format_id, e);
                return Ok(KeyResolution::Unresolved);
            }
        };

        let http;
        let transport: Option<&dyn Transport> = if let Some(callback) = &info.license_callback {
            Some(callback.as_ref())
        } else if let Some(url) = info
            .license_url
            .clone()
            .or_else(|| mpd_url.and_then(|x| self.registry.license_url(x)))
        {
            http = HttpTransport::new(self.client.clone(), url).headers(self.license_headers.clone());
            Some(&http)
        } else {
            debug!("No license transport for {}", part.format_id);
            None
        };

        self.resolver.resolve(&pssh, transport)
    }

    fn scan_init(&self, part: &TrackPart) -> Result<Option<PsshBox>> {
        let Some(url) = part.init_url() else {
            return Ok(None);
        };

        debug!("Fetching init segment {}", url);
        let response = self
            .client
            .get(&url)
            .headers(headers(part))
            .send()?;

        if response.status() == StatusCode::UNAVAILABLE_FOR_LEGAL_REASONS {
            return Err(Error::GeoRestricted);
        }

        let data = response.error_for_status()?.bytes()?;
        let pssh = pssh::scan(&data);

        if pssh.is_some() {
            info!("Extracted PSSH from init segment");
        }

        Ok(pssh)
    }

    /// Post-download pass: decrypt every part keys were attached to.
    pub fn decrypt(&self, info: &mut DownloadInfo) -> Result<DecryptReport> {
        let pending = decrypt::was_downloaded(info)
            && info.parts().iter().any(|x| {
                x.resolved_keys().is_some_and(|keys| !keys.is_empty()) && x.filepath.is_some()
            });

        let tool = if pending {
            Mp4Decrypt::locate(self.mp4decrypt.as_deref())?
        } else {
            Mp4Decrypt::new(self.mp4decrypt.clone().unwrap_or_default())
        }
        .sanitize_filenames(self.sanitize_filenames);

        decrypt::decrypt_record(&tool, info)
    }

    /// Resolve keys for a bare header, as a command line lookup would.
    pub fn keys_for(&self, pssh: &PsshBox, transport: Option<&dyn Transport>) -> Result<KeySet> {
        Ok(self
            .resolver
            .resolve(pssh, transport)?
            .keys()
            .cloned()
            .unwrap_or_default())
    }
}

fn headers(part: &TrackPart) -> HeaderMap {
    let mut headers = HeaderMap::new();

    for (k, v) in &part.http_headers {
        match (HeaderName::from_bytes(k.as_bytes()), HeaderValue::from_str(v)) {
            (Ok(k), Ok(v)) => {
                headers.insert(k, v);
            }
            _ => debug!("Skipping invalid header {}", k),
        }
    }

    headers
}
