mod common;

use common::{Request, Server};
use reqwest::Url;
use std::{
    error::Error,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};
use wvkeys::{
    Config, ContentKey, DownloadInfo, KeySet, PsshBox, Session, TrackPart,
    cache::{FsCache, KeyCache},
    cdm::{Cdm, Key, KeyType, LicenseType, SessionId},
    intercept::Extractor,
    track::{Container, Fragment, KeyResolution, TrackState},
};

const VIDEO_KEY: &str = "eb676abbcb345e96bbcf616630f1a3da:100b6c20940f779a4589152b57d2dacb";

fn license_server(request: &Request) -> (u16, Vec<u8>) {
    match request.path.as_str() {
        "/acquire" | "/record" => (200, b"license".to_vec()),
        "/init.mp4" => (200, init_segment()),
        "/geo" => (451, b"{\"responseCode\":\"GEO_CHECK_FAIL\"}".to_vec()),
        _ => (404, vec![]),
    }
}

/// Answers challenges with `license`, yielding one signing and one content key.
struct FakeCdm;

impl Cdm for FakeCdm {
    fn open(&self) -> wvkeys::Result<SessionId> {
        Ok(b"session".to_vec())
    }

    fn license_challenge(
        &self,
        _: &SessionId,
        pssh: &PsshBox,
        _: LicenseType,
        _: bool,
    ) -> wvkeys::Result<Vec<u8>> {
        Ok(pssh.data.clone())
    }

    fn parse_license(&self, _: &SessionId, license: &[u8]) -> wvkeys::Result<()> {
        if license != b"license" {
            return Err(wvkeys::Error::Cdm("unexpected license".to_owned()));
        }

        Ok(())
    }

    fn keys(&self, _: &SessionId) -> wvkeys::Result<Vec<Key>> {
        let key = VIDEO_KEY.parse::<ContentKey>()?;

        Ok(vec![
            Key {
                kid: vec![0; 16],
                key: vec![0; 16],
                typ: KeyType::Signing,
            },
            Key {
                kid: key.kid.to_vec(),
                key: key.key.to_vec(),
                typ: KeyType::Content,
            },
        ])
    }

    fn close(&self, _: &SessionId) -> wvkeys::Result<()> {
        Ok(())
    }
}

/// Hands out one video and one audio part per manifest.
struct HostExtractor;

impl Extractor for HostExtractor {
    fn parse_mpd_periods(&self, mpd: &str, mpd_url: &str) -> wvkeys::Result<Vec<TrackPart>> {
        assert!(!mpd.contains("ContentProtection"));

        Ok(["video", "audio"]
            .into_iter()
            .map(|x| {
                let container = if x == "video" {
                    Container::Mp4Dash
                } else {
                    Container::M4aDash
                };
                TrackPart::new(x, container).manifest_url(mpd_url)
            })
            .collect())
    }

    fn parse_brightcove_metadata(&self, _: serde_json::Value) -> wvkeys::Result<Vec<TrackPart>> {
        Ok(vec![])
    }
}

fn content_pssh() -> PsshBox {
    PsshBox::widevine(b"\x12\x10content-id-1234567".to_vec())
}

fn init_segment() -> Vec<u8> {
    let mut playready = Vec::new();
    playready.extend_from_slice(&40_u32.to_be_bytes());
    playready.extend_from_slice(b"pssh\0\0\0\0");
    playready.extend_from_slice(&wvkeys_mp4::pssh::SystemId::PLAYREADY);
    playready.extend_from_slice(&8_u32.to_be_bytes());
    playready.extend_from_slice(b"playread");

    let mut moov = playready;
    moov.extend_from_slice(&content_pssh().to_bytes());

    let mut data = Vec::new();
    data.extend_from_slice(&((moov.len() + 8) as u32).to_be_bytes());
    data.extend_from_slice(b"moov");
    data.extend_from_slice(&moov);
    data
}

fn mpd(pssh: Option<&PsshBox>, license_url: &str) -> String {
    format!(
        r#"<?xml version="1.0"?>
<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" xmlns:cenc="urn:mpeg:cenc:2013" xmlns:bc="urn:brightcove:2015">
  <Period>
    <AdaptationSet>
      <ContentProtection schemeIdUri="urn:mpeg:dash:mp4protection:2011" value="cenc"/>
      <ContentProtection schemeIdUri="urn:uuid:edef8ba9-79d6-4ace-a3c8-27dcd51d21ed" bc:licenseAcquisitionUrl="{}">{}</ContentProtection>
      <Representation id="video"/>
    </AdaptationSet>
  </Period>
</MPD>"#,
        license_url,
        pssh.map(|x| format!("<cenc:pssh>{}</cenc:pssh>", x.to_base64()))
            .unwrap_or_default()
    )
}

fn session(cache: &tempfile::TempDir) -> Session {
    Config::new()
        .cdm(Arc::new(FakeCdm))
        .cache_dir(cache.path())
        .build()
        .unwrap()
}

fn parse(session: &Session, mpd: &str, mpd_url: &str) -> Vec<TrackPart> {
    session
        .wrap(HostExtractor)
        .parse_mpd_periods(mpd, mpd_url)
        .unwrap()
}

fn merged(id: &str, parts: Vec<TrackPart>, dir: &std::path::Path) -> DownloadInfo {
    let parts = parts
        .into_iter()
        .map(|x| {
            let path = dir.join(format!("{}.{}.mp4", id, x.format_id));
            x.filepath(path)
        })
        .collect();

    DownloadInfo::merged(id, parts)
}

#[test]
fn manifest_license_url_triggers_one_post() -> Result<(), Box<dyn Error>> {
    let server = Server::start(license_server);
    let cache = tempfile::tempdir()?;
    let session = session(&cache);
    let mpd_url = server.url("/ep1.mpd");

    let parts = parse(
        &session,
        &mpd(Some(&content_pssh()), &server.url("/acquire")),
        &mpd_url,
    );

    let registration = session.registry().get(&mpd_url).unwrap();
    assert_eq!(registration.pssh, Some(content_pssh()));
    assert_eq!(registration.license_url.unwrap().as_str(), server.url("/acquire"));

    let mut info = DownloadInfo::single("ep1", parts[0].clone());
    let report = session.prepare(&mut info)?;

    let posts = server.requests("POST", "/acquire");
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].body, content_pssh().data);
    assert_eq!(posts[0].header("content-type"), Some("application/octet-stream"));

    let expected = KeySet::new(vec![VIDEO_KEY.parse()?]);
    assert_eq!(report.parts[0].state, TrackState::KeyResolved);
    assert_eq!(
        report.parts[0].resolution,
        KeyResolution::NetworkResolved(expected.clone())
    );
    assert_eq!(info.parts()[0].resolved_keys(), Some(&expected));
    assert!(info.decrypt_scheduled());
    Ok(())
}

#[test]
fn shared_manifest_resolves_once() -> Result<(), Box<dyn Error>> {
    let server = Server::start(license_server);
    let cache = tempfile::tempdir()?;
    let session = session(&cache);
    let mpd_url = server.url("/ep1.mpd");
    let parts = parse(
        &session,
        &mpd(Some(&content_pssh()), &server.url("/acquire")),
        &mpd_url,
    );

    let mut first = merged("ep1", parts.clone(), cache.path());
    let mut second = merged("ep1-again", parts, cache.path());
    session.prepare(&mut first)?;
    session.prepare(&mut second)?;

    assert_eq!(server.requests("POST", "/acquire").len(), 1);
    assert!(
        first
            .parts()
            .iter()
            .chain(second.parts())
            .all(|x| x.resolved_keys().is_some_and(|x| x.len() == 1))
    );
    Ok(())
}

#[test]
fn direct_key_skips_license_server() -> Result<(), Box<dyn Error>> {
    let server = Server::start(license_server);
    let cache = tempfile::tempdir()?;
    let session = session(&cache);
    let mpd_url = server.url("/ep1.mpd");
    let parts = parse(&session, &mpd(None, &server.url("/acquire")), &mpd_url);

    let mut info = DownloadInfo::single("ep1", parts[0].clone());
    info.cenc_key.push(VIDEO_KEY.parse()?);
    let report = session.prepare(&mut info)?;

    assert_eq!(server.total(), 0);
    assert!(matches!(report.parts[0].resolution, KeyResolution::DirectKey(_)));
    Ok(())
}

#[test]
fn callback_then_record_url_then_manifest_url() -> Result<(), Box<dyn Error>> {
    let server = Server::start(license_server);
    let mpd = mpd(Some(&content_pssh()), &server.url("/acquire"));
    let mpd_url = server.url("/ep1.mpd");
    let calls = Arc::new(AtomicUsize::new(0));

    let resolve = |callback: bool, record_url: bool| -> Result<KeySet, Box<dyn Error>> {
        let cache = tempfile::tempdir()?;
        let session = session(&cache);
        let mut info = DownloadInfo::single("ep1", parse(&session, &mpd, &mpd_url).remove(0));

        if callback {
            let calls = calls.clone();
            info.license_callback = Some(Arc::new(move |_: &[u8]| -> wvkeys::Result<Vec<u8>> {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(b"license".to_vec())
            }));
        }

        if record_url {
            info.license_url = Some(Url::parse(&server.url("/record"))?);
        }

        session.prepare(&mut info)?;
        Ok(info.parts()[0].resolved_keys().cloned().unwrap_or_default())
    };

    let expected = KeySet::new(vec![VIDEO_KEY.parse()?]);

    assert_eq!(resolve(true, true)?, expected);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(server.total(), 0);

    assert_eq!(resolve(false, true)?, expected);
    assert_eq!(server.requests("POST", "/record").len(), 1);
    assert!(server.requests("POST", "/acquire").is_empty());

    assert_eq!(resolve(false, false)?, expected);
    assert_eq!(server.requests("POST", "/record").len(), 1);
    assert_eq!(server.requests("POST", "/acquire").len(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn init_segment_is_scanned_once_per_manifest() -> Result<(), Box<dyn Error>> {
    let server = Server::start(license_server);
    let cache = tempfile::tempdir()?;
    let session = session(&cache);
    let mpd_url = server.url("/ep1.mpd");
    let parts = parse(&session, &mpd(None, &server.url("/acquire")), &mpd_url)
        .into_iter()
        .map(|mut x| {
            x.fragment_base_url = Some(server.url("/"));
            x.fragments.push(Fragment {
                url: None,
                path: Some("init.mp4".to_owned()),
            });
            x
        })
        .collect();

    let mut info = merged("ep1", parts, cache.path());
    let report = session.prepare(&mut info)?;

    assert!(report.errors.is_empty());
    assert_eq!(server.requests("GET", "/init.mp4").len(), 1);

    let posts = server.requests("POST", "/acquire");
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].body, content_pssh().data);
    Ok(())
}

#[test]
fn keys_persist_across_sessions() -> Result<(), Box<dyn Error>> {
    let server = Server::start(license_server);
    let cache = tempfile::tempdir()?;
    let mpd = mpd(Some(&content_pssh()), &server.url("/acquire"));
    let mpd_url = server.url("/ep1.mpd");

    for _ in 0..2 {
        let session = session(&cache);
        let mut info = DownloadInfo::single("ep1", parse(&session, &mpd, &mpd_url).remove(0));
        session.prepare(&mut info)?;
        assert!(info.parts()[0].resolved_keys().is_some_and(|x| !x.is_empty()));
    }

    assert_eq!(server.requests("POST", "/acquire").len(), 1);
    Ok(())
}

#[test]
fn cached_empty_keys_are_undecryptable() -> Result<(), Box<dyn Error>> {
    let server = Server::start(license_server);
    let cache = tempfile::tempdir()?;
    KeyCache::new(Arc::new(FsCache::new(cache.path()))).store(&content_pssh(), &KeySet::default());

    let session = session(&cache);
    let mpd_url = server.url("/ep1.mpd");
    let parts = parse(
        &session,
        &mpd(Some(&content_pssh()), &server.url("/acquire")),
        &mpd_url,
    );

    let mut info = merged("ep1", parts, cache.path());
    let report = session.prepare(&mut info)?;

    assert_eq!(server.total(), 0);
    assert_eq!(
        report.parts[0].resolution,
        KeyResolution::CacheHit(KeySet::default())
    );
    assert!(report.parts.iter().all(|x| x.state == TrackState::KeyUnavailable));
    assert!(matches!(
        &report.errors[..],
        [wvkeys::Error::NoKeys { .. }, wvkeys::Error::NoKeys { .. }]
    ));

    info.real_download = true;
    let files = info.files_to_merge().to_vec();
    let decrypted = session.decrypt(&mut info)?;

    assert!(decrypted.merge_skipped);
    assert!(info.files_to_merge().is_empty());
    assert_eq!(files.len(), 2);
    Ok(())
}

#[test]
fn geo_restriction_is_reported_once() -> Result<(), Box<dyn Error>> {
    let server = Server::start(license_server);
    let cache = tempfile::tempdir()?;
    let session = session(&cache);
    let mpd_url = server.url("/ep1.mpd");
    let parts = parse(
        &session,
        &mpd(Some(&content_pssh()), &server.url("/geo")),
        &mpd_url,
    );

    let mut info = merged("ep1", parts, cache.path());
    let report = session.prepare(&mut info)?;

    assert_eq!(server.requests("POST", "/geo").len(), 1);
    assert!(
        report
            .errors
            .iter()
            .any(|x| matches!(x, wvkeys::Error::GeoRestricted))
    );
    assert!(
        KeyCache::new(Arc::new(FsCache::new(cache.path())))
            .load(&content_pssh())
            .is_none()
    );
    Ok(())
}

#[test]
fn file_already_on_disk_is_not_decrypted() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let session = Config::new()
        .no_cache(true)
        .mp4decrypt(dir.path().join("missing-mp4decrypt"))
        .build()?;
    let path = dir.path().join("ep1.mp4");
    std::fs::write(&path, b"plain")?;

    let mut info = DownloadInfo::single(
        "ep1",
        TrackPart::new("video", Container::Mp4Dash).filepath(&path),
    );
    info.cenc_key.push(VIDEO_KEY.parse()?);
    session.prepare(&mut info)?;

    let report = session.decrypt(&mut info)?;

    assert!(report.parts.is_empty());
    assert_eq!(std::fs::read(&path)?, b"plain");
    assert!(!dir.path().join("ep1.decrypted.mp4").exists());
    Ok(())
}

#[cfg(unix)]
mod tool {
    use super::*;
    use std::{fs, os::unix::fs::PermissionsExt};

    fn script(dir: &std::path::Path, body: &str) -> PathBuf {
        let path = dir.join("mp4decrypt");
        fs::write(&path, format!("#!/bin/sh\n{}", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn record(dir: &std::path::Path) -> DownloadInfo {
        let mut info = merged(
            "ep1",
            vec![
                TrackPart::new("video", Container::Mp4Dash),
                TrackPart::new("audio", Container::M4aDash),
            ],
            dir,
        );

        for part in info.parts() {
            fs::write(part.filepath.as_ref().unwrap(), b"cipher").unwrap();
        }

        info.cenc_key = vec![
            "00000000000000000000000000000001:000102030405060708090a0b0c0d0e0f".parse().unwrap(),
            "00000000000000000000000000000002:0f0e0d0c0b0a09080706050403020100".parse().unwrap(),
        ];
        info
    }

    #[test]
    fn tool_failure_is_fatal() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let session = Config::new()
            .no_cache(true)
            .mp4decrypt(script(dir.path(), "echo \"$@\" > args.txt\necho 'bad key' >&2\nexit 1\n"))
            .build()?;
        let mut info = record(dir.path());

        session.prepare(&mut info)?;
        info.real_download = true;
        let e = session.decrypt(&mut info).unwrap_err();

        assert!(e.is_fatal());
        assert!(e.to_string().contains("bad key"));

        let args = fs::read_to_string(dir.path().join("args.txt"))?;
        assert!(args.starts_with(
            "--key 00000000000000000000000000000001:000102030405060708090a0b0c0d0e0f \
             --key 00000000000000000000000000000002:0f0e0d0c0b0a09080706050403020100 "
        ));
        Ok(())
    }

    #[test]
    fn decrypted_files_replace_merge_inputs() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let session = Config::new()
            .no_cache(true)
            .mp4decrypt(script(
                dir.path(),
                "eval out=\\${$#}\nprintf plain > \"$out\"\n",
            ))
            .build()?;
        let mut info = record(dir.path());
        let originals = info.files_to_merge().to_vec();

        session.prepare(&mut info)?;
        info.real_download = true;
        let report = session.decrypt(&mut info)?;

        assert_eq!(report.to_delete, originals);
        assert!(!report.merge_skipped);

        for path in info.files_to_merge() {
            assert!(path.to_string_lossy().contains(".decrypted."));
            assert_eq!(fs::read(path)?, b"plain");
        }

        assert!(info.parts().iter().all(|x| x.resolved_keys().is_none()));
        Ok(())
    }
}
