use thiserror::Error;

/// A `Result` alias where the `Err` case is `wvkeys::Error`.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type returned by key acquisition and decryption.
#[derive(Debug, Error)]
pub enum Error {
    #[error("This content is not available from your location")]
    GeoRestricted,

    #[error("No keys found for {format_id}")]
    NoKeys { format_id: String },

    #[error("Key acquisition must run before the download starts")]
    MustRunBeforeDownload,

    #[error("mp4decrypt couldn't be found, it is required to continue further")]
    Mp4DecryptNotFound,

    #[error("mp4decrypt failed: {0}")]
    Mp4Decrypt(String),

    #[error("License request failed: {0}")]
    License(String),

    #[error("CDM error: {0}")]
    Cdm(String),

    #[error("Invalid content key '{input}': {message}")]
    InvalidKey { input: String, message: String },

    #[error("Invalid pssh: {0}")]
    Pssh(#[from] wvkeys_mp4::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Xml(#[from] quick_xml::Error),

    #[error(transparent)]
    Base64(#[from] base64::DecodeError),
}

impl Error {
    /// Errors which abort the whole job instead of a single track.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::MustRunBeforeDownload | Self::Mp4DecryptNotFound | Self::Mp4Decrypt(_)
        )
    }
}
