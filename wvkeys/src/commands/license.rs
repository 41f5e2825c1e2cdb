use super::read_pssh;
use anyhow::{Result, bail};
use clap::Args;
use colored::Colorize;
use reqwest::{
    Url,
    blocking::Client,
    header::{HeaderMap, HeaderName, HeaderValue},
};
use std::{path::PathBuf, sync::Arc};
use wvkeys::{
    Config,
    license::{HttpTransport, Transport},
    remote::RemoteCdm,
};

#[derive(Args, Clone, Debug)]
/// Request content keys from a license server.
pub struct License {
    /// PSSH data input.
    /// Can be an init file path or base64 encoded PSSH box.
    #[arg(required = true, value_name = "PATH|BASE64")]
    input: String,

    /// Widevine license server URL.
    #[arg(long, value_name = "URL")]
    license_url: Option<Url>,

    /// Extra headers for license request in same format as curl.
    ///
    /// This option can be used multiple times.
    #[arg(short = 'H', long = "header", value_name = "KEY:VALUE", value_parser = Self::parse_header)]
    headers: Vec<(HeaderName, HeaderValue)>,

    /// Base URL of a remote CDM serving the pywidevine API.
    #[arg(long, value_name = "URL", requires_all = ["device", "secret"])]
    remote_cdm: Option<Url>,

    /// Device name on the remote CDM.
    #[arg(long, value_name = "NAME")]
    device: Option<String>,

    /// Secret key of the remote CDM.
    #[arg(long, value_name = "KEY")]
    secret: Option<String>,

    /// Directory for cached keys.
    #[arg(long, value_name = "DIR")]
    cache_dir: Option<PathBuf>,

    /// Neither read nor write cached keys.
    #[arg(long, conflicts_with = "cache_dir")]
    no_cache: bool,
}

impl License {
    fn parse_header(value: &str) -> Result<(HeaderName, HeaderValue)> {
        if let Some((k, v)) = value.split_once(':') {
            Ok((k.trim().parse()?, v.trim().parse()?))
        } else {
            bail!("Expected 'KEY:VALUE' but found '{}'.", value);
        }
    }

    pub fn execute(self) -> Result<()> {
        let pssh = read_pssh(&self.input)?;
        let client = Client::builder().build()?;
        let headers = HeaderMap::from_iter(self.headers);
        let mut config = Config::new().client(client.clone()).no_cache(self.no_cache);

        if let Some(dir) = self.cache_dir {
            config = config.cache_dir(dir);
        }

        let has_cdm = match (self.remote_cdm, self.device, self.secret) {
            (Some(host), Some(device), Some(secret)) => {
                config = config.cdm(Arc::new(RemoteCdm::new(client.clone(), host, device, secret)));
                true
            }
            _ => false,
        };

        if self.license_url.is_some() && !has_cdm {
            bail!("No CDM configured, use --remote-cdm to request keys.");
        }

        let session = config.build()?;
        let transport = self
            .license_url
            .map(|x| HttpTransport::new(client, x).headers(headers));
        let keys = session.keys_for(&pssh, transport.as_ref().map(|x| x as &dyn Transport))?;

        if keys.is_empty() {
            if transport.is_none() {
                bail!("No cached keys found, --license-url is required.");
            }

            bail!("License response did not contain any content key.");
        }

        for key in &keys {
            println!("[{}] {}", "CONTENT".green(), key);
        }

        Ok(())
    }
}
