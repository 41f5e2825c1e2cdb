/*
    REFERENCES
    ----------

    1. https://github.com/devine-dl/pywidevine/blob/master/pywidevine/remotecdm.py
    2. https://github.com/devine-dl/pywidevine/blob/master/pywidevine/serve.py

*/

use crate::{
    Error, Result,
    cdm::{Cdm, Key, KeyType, LicenseType, SessionId},
};
use base64::Engine;
use log::debug;
use reqwest::{Url, blocking::Client};
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::json;
use wvkeys_mp4::pssh::PsshBox;

/// A [`Cdm`] served by a remote pywidevine compatible API.
pub struct RemoteCdm {
    client: Client,
    host: Url,
    device: String,
    secret: String,
}

#[derive(Deserialize)]
struct Envelope<T> {
    status: u16,
    message: String,
    data: Option<T>,
}

#[derive(Deserialize)]
struct OpenData {
    session_id: String,
}

#[derive(Deserialize)]
struct ChallengeData {
    challenge_b64: String,
}

#[derive(Deserialize)]
struct KeysData {
    keys: Vec<RemoteKey>,
}

#[derive(Deserialize)]
struct RemoteKey {
    key_id: String,
    key: String,
    #[serde(rename = "type")]
    typ: String,
}

impl RemoteCdm {
    pub fn new(client: Client, host: Url, device: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            client,
            host,
            device: device.into(),
            secret: secret.into(),
        }
    }

    fn url(&self, path: &str) -> Result<Url> {
        let base = self.host.as_str().trim_end_matches('/');
        Url::parse(&format!("{}/{}/{}", base, self.device, path))
            .map_err(|x| Error::Cdm(format!("invalid remote cdm url ({})", x)))
    }

    fn open_envelope<T: DeserializeOwned>(response: reqwest::blocking::Response) -> Result<Option<T>> {
        let envelope = response.json::<Envelope<T>>()?;

        if envelope.status != 200 {
            return Err(Error::Cdm(format!(
                "remote cdm returned {} ({})",
                envelope.status, envelope.message
            )));
        }

        Ok(envelope.data)
    }

    fn get<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let url = self.url(path)?;
        debug!("GET {}", url);
        Self::open_envelope(
            self.client
                .get(url)
                .header("X-Secret-Key", &self.secret)
                .send()?,
        )
    }

    fn post<T: DeserializeOwned>(&self, path: &str, body: serde_json::Value) -> Result<Option<T>> {
        let url = self.url(path)?;
        debug!("POST {}", url);
        Self::open_envelope(
            self.client
                .post(url)
                .header("X-Secret-Key", &self.secret)
                .json(&body)
                .send()?,
        )
    }

    fn missing(what: &str) -> Error {
        Error::Cdm(format!("remote cdm response is missing {}", what))
    }
}

impl Cdm for RemoteCdm {
    fn open(&self) -> Result<SessionId> {
        let data = self
            .get::<OpenData>("open")?
            .ok_or_else(|| Self::missing("session_id"))?;

        hex::decode(&data.session_id)
            .map_err(|x| Error::Cdm(format!("invalid session id ({})", x)))
    }

    fn license_challenge(
        &self,
        session: &SessionId,
        pssh: &PsshBox,
        license_type: LicenseType,
        privacy_mode: bool,
    ) -> Result<Vec<u8>> {
        let data = self
            .post::<ChallengeData>(
                &format!("get_license_challenge/{}", license_type),
                json!({
                    "session_id": hex::encode(session),
                    "init_data": pssh.to_base64(),
                    "privacy_mode": privacy_mode,
                }),
            )?
            .ok_or_else(|| Self::missing("challenge_b64"))?;

        Ok(base64::engine::general_purpose::STANDARD.decode(data.challenge_b64)?)
    }

    fn parse_license(&self, session: &SessionId, license: &[u8]) -> Result<()> {
        self.post::<serde_json::Value>(
            "parse_license",
            json!({
                "session_id": hex::encode(session),
                "license_message": base64::engine::general_purpose::STANDARD.encode(license),
            }),
        )?;
        Ok(())
    }

    fn keys(&self, session: &SessionId) -> Result<Vec<Key>> {
        let data = self
            .post::<KeysData>(
                "get_keys/ALL",
                json!({ "session_id": hex::encode(session) }),
            )?
            .ok_or_else(|| Self::missing("keys"))?;

        data.keys
            .into_iter()
            .map(|x| {
                Ok(Key {
                    kid: hex::decode(x.key_id.replace('-', ""))
                        .map_err(|e| Error::Cdm(format!("invalid key id ({})", e)))?,
                    key: hex::decode(&x.key)
                        .map_err(|e| Error::Cdm(format!("invalid key ({})", e)))?,
                    typ: KeyType::from_name(&x.typ),
                })
            })
            .collect()
    }

    fn close(&self, session: &SessionId) -> Result<()> {
        self.get::<serde_json::Value>(&format!("close/{}", hex::encode(session)))?;
        Ok(())
    }
}
