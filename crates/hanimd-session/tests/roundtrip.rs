//! End-to-end tests for moving a session directory through its string form.

use std::fs;

use hanimd_session::{MARKER, SessionBundle, SessionError, encode_dir};

#[test]
fn two_file_directory_restores_byte_for_byte() {
    let src = tempfile::tempdir().unwrap();
    fs::write(src.path().join("creds.json"), br#"{"noiseKey":{"private":"abc"}}"#).unwrap();
    fs::write(src.path().join("app-state-sync-key-AAA.json"), [0u8, 1, 2, 254, 255]).unwrap();

    let encoded = encode_dir(src.path()).unwrap();
    assert!(encoded.starts_with(MARKER));

    let dst = tempfile::tempdir().unwrap();
    let restore_to = dst.path().join("session");
    SessionBundle::decode(&encoded)
        .unwrap()
        .write_dir(&restore_to)
        .unwrap();

    for name in ["creds.json", "app-state-sync-key-AAA.json"] {
        assert_eq!(
            fs::read(src.path().join(name)).unwrap(),
            fs::read(restore_to.join(name)).unwrap(),
            "{name} differs after restore"
        );
    }
    assert_eq!(fs::read_dir(&restore_to).unwrap().count(), 2);
}

#[test]
fn session_string_survives_a_text_file() {
    let src = tempfile::tempdir().unwrap();
    fs::write(src.path().join("creds.json"), b"{}").unwrap();
    let encoded = encode_dir(src.path()).unwrap();

    let holder = tempfile::tempdir().unwrap();
    let txt = holder.path().join("session_id.txt");
    fs::write(&txt, format!("{encoded}\n")).unwrap();

    let read_back = fs::read_to_string(&txt).unwrap();
    let bundle = SessionBundle::decode(&read_back).unwrap();
    assert_eq!(bundle.get("creds.json"), Some(&b"{}"[..]));
}

#[test]
fn empty_directory_encodes_to_empty_bundle() {
    let src = tempfile::tempdir().unwrap();
    let encoded = encode_dir(src.path()).unwrap();
    assert!(SessionBundle::decode(&encoded).unwrap().is_empty());
}

#[test]
fn invalid_inputs_never_yield_a_bundle() {
    let inputs = [
        "",
        "   ",
        "HANI-MD~",
        "HANI-MD~%%%",
        "SESSION~e30=",
        "HANI-MD~bnVsbA==",
    ];
    for input in inputs {
        assert!(SessionBundle::decode(input).is_err(), "{input:?} decoded");
    }
}

#[test]
fn one_escaping_name_rejects_the_whole_payload() {
    let payload = serde_json::json!({"good.json": "aGk=", "../escape": "aGk="});
    let err = SessionBundle::from_value(&payload).unwrap_err();
    assert!(matches!(err, SessionError::InvalidFileName { .. }));
}
