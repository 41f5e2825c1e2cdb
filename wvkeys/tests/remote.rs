mod common;

use base64::Engine;
use common::{Request, Server};
use reqwest::{Url, blocking::Client};
use serde_json::{Value, json};
use std::error::Error;
use wvkeys::{
    ContentKey, KeySet, PsshBox,
    cdm::{Cdm, LicenseType},
    license::fetch_keys,
    remote::RemoteCdm,
};

fn envelope(data: Value) -> (u16, Vec<u8>) {
    let body = json!({ "status": 200, "message": "Success", "data": data });
    (200, serde_json::to_vec(&body).unwrap())
}

fn pywidevine(request: &Request) -> (u16, Vec<u8>) {
    if request.header("x-secret-key") != Some("s3cret") {
        let body = json!({ "status": 401, "message": "Secret Key is Invalid" });
        return (401, serde_json::to_vec(&body).unwrap());
    }

    match request.path.as_str() {
        "/android/open" => envelope(json!({ "session_id": "0a0b0c0d" })),
        "/android/get_license_challenge/STREAMING" => envelope(json!({
            "challenge_b64": base64::engine::general_purpose::STANDARD.encode(b"challenge")
        })),
        "/android/parse_license" => envelope(Value::Null),
        "/android/get_keys/ALL" => envelope(json!({
            "keys": [
                { "key_id": "00000000-0000-0000-0000-000000000000", "key": "ff".repeat(16), "type": "SIGNING" },
                { "key_id": "91ba752a-4461-48c6-8400-d78374b178b4", "key": "a01d7dc4edf582496b7e73d67e9e6899", "type": "CONTENT" },
            ]
        })),
        "/android/close/0a0b0c0d" => envelope(Value::Null),
        _ => (404, b"{\"status\":404,\"message\":\"Not Found\"}".to_vec()),
    }
}

fn cdm(server: &Server, secret: &str) -> RemoteCdm {
    RemoteCdm::new(
        Client::new(),
        Url::parse(&server.url("/")).unwrap(),
        "android",
        secret,
    )
}

#[test]
fn fetches_content_keys() -> Result<(), Box<dyn Error>> {
    let server = Server::start(pywidevine);
    let pssh = PsshBox::widevine(b"\x12\x10episode".to_vec());
    let transport = |challenge: &[u8]| -> wvkeys::Result<Vec<u8>> {
        assert_eq!(challenge, b"challenge");
        Ok(b"license".to_vec())
    };

    let keys = fetch_keys(&cdm(&server, "s3cret"), &pssh, &transport)?;

    assert_eq!(
        keys,
        KeySet::new(vec![
            "91ba752a446148c68400d78374b178b4:a01d7dc4edf582496b7e73d67e9e6899".parse::<ContentKey>()?
        ])
    );

    let challenge = &server.requests("POST", "/android/get_license_challenge/STREAMING")[0];
    let body = serde_json::from_slice::<Value>(&challenge.body)?;
    assert_eq!(body["session_id"], "0a0b0c0d");
    assert_eq!(body["init_data"], pssh.to_base64());
    assert_eq!(body["privacy_mode"], true);

    let parse = &server.requests("POST", "/android/parse_license")[0];
    let body = serde_json::from_slice::<Value>(&parse.body)?;
    assert_eq!(
        body["license_message"],
        base64::engine::general_purpose::STANDARD.encode(b"license")
    );

    assert_eq!(server.requests("GET", "/android/close/0a0b0c0d").len(), 1);
    Ok(())
}

#[test]
fn rejected_requests_are_cdm_errors() {
    let server = Server::start(pywidevine);
    let cdm = cdm(&server, "wrong");

    assert!(matches!(cdm.open(), Err(wvkeys::Error::Cdm(x)) if x.contains("401")));
}

#[test]
fn license_type_is_part_of_the_path() {
    let server = Server::start(pywidevine);
    let cdm = cdm(&server, "s3cret");
    let session = cdm.open().unwrap();

    assert!(
        cdm.license_challenge(&session, &PsshBox::widevine(vec![]), LicenseType::Offline, false)
            .is_err()
    );
    assert_eq!(
        server
            .requests("POST", "/android/get_license_challenge/OFFLINE")
            .len(),
        1
    );
}
