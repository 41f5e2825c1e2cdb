use crate::{
    Result,
    cache::{Cache, FsCache, KeyCache},
    cdm::Cdm,
    session::Session,
};
use log::warn;
use reqwest::{blocking::Client, header::HeaderMap};
use std::{path::PathBuf, sync::Arc};

/// Options for a download [`Session`].
#[derive(Clone)]
pub struct Config {
    pub(crate) cdm: Option<Arc<dyn Cdm>>,
    pub(crate) cache_dir: Option<PathBuf>,
    pub(crate) no_cache: bool,
    pub(crate) mp4decrypt: Option<PathBuf>,
    pub(crate) sanitize_filenames: bool,
    pub(crate) client: Option<Client>,
    pub(crate) license_headers: HeaderMap,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cdm: None,
            cache_dir: None,
            no_cache: false,
            mp4decrypt: None,
            sanitize_filenames: cfg!(windows),
            client: None,
            license_headers: HeaderMap::new(),
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Without a CDM every license resolution yields no keys.
    pub fn cdm(mut self, cdm: Arc<dyn Cdm>) -> Self {
        self.cdm = Some(cdm);
        self
    }

    /// Key cache root, defaults to [`FsCache::default_dir`].
    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    pub fn no_cache(mut self, no_cache: bool) -> Self {
        self.no_cache = no_cache;
        self
    }

    /// mp4decrypt binary, searched in `PATH` when not set.
    pub fn mp4decrypt(mut self, path: impl Into<PathBuf>) -> Self {
        self.mp4decrypt = Some(path.into());
        self
    }

    pub fn sanitize_filenames(mut self, sanitize: bool) -> Self {
        self.sanitize_filenames = sanitize;
        self
    }

    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Extra headers sent with license requests.
    pub fn license_headers(mut self, headers: HeaderMap) -> Self {
        self.license_headers = headers;
        self
    }

    pub(crate) fn key_cache(&self) -> KeyCache {
        if self.no_cache {
            return KeyCache::disabled();
        }

        match self.cache_dir.clone().or_else(FsCache::default_dir) {
            Some(dir) => KeyCache::new(Arc::new(FsCache::new(dir)) as Arc<dyn Cache>),
            None => {
                warn!("No cache directory available, keys will not be cached");
                KeyCache::disabled()
            }
        }
    }

    pub fn build(self) -> Result<Session> {
        Session::new(self)
    }
}
