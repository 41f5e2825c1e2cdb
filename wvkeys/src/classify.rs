use crate::{
    registry::Registry,
    track::{DownloadInfo, KeyResolution, TrackPart, TrackState},
};

/// A part needs decryption when it is DASH packaged and either carries a
/// direct key or has a license path, through the record or its manifest.
pub fn is_encrypted(info: &DownloadInfo, part: &TrackPart, registry: &Registry) -> bool {
    if !part.container.is_dash() {
        return false;
    }

    !info.cenc_key.is_empty()
        || info.license_callback.is_some()
        || info.license_url.is_some()
        || part
            .manifest_url
            .as_deref()
            .is_some_and(|x| registry.contains(x))
}

/// State of a part before any key resolution.
pub fn classify(info: &DownloadInfo, part: &TrackPart, registry: &Registry) -> TrackState {
    if !is_encrypted(info, part, registry) {
        TrackState::Unencrypted
    } else if !info.cenc_key.is_empty() {
        TrackState::EncryptedDirectKey
    } else {
        TrackState::EncryptedPendingKey
    }
}

/// State of an encrypted part once resolution is done.
pub fn resolved(resolution: &KeyResolution) -> TrackState {
    if resolution.is_usable() {
        TrackState::KeyResolved
    } else {
        TrackState::KeyUnavailable
    }
}
