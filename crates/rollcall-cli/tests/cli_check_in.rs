use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tempfile::TempDir;

fn rollcall(home: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_rollcall"))
        .args(args)
        .env_clear()
        .env("HOME", home)
        .env("ROLLCALL_CONFIG", home.join("absent.toml"))
        .env("ROLLCALL_DATA_DIR", home.join("data"))
        .output()
        .expect("failed to run rollcall")
}

fn photo_with_encoding(dir: &Path, name: &str, encoding: Option<&[f32]>) -> PathBuf {
    let photo = dir.join(format!("{name}.jpg"));
    std::fs::write(&photo, b"jpeg").unwrap();
    let faces = match encoding {
        Some(values) => serde_json::json!([{ "encoding": values }]),
        None => serde_json::json!([]),
    };
    std::fs::write(
        dir.join(format!("{name}.json")),
        serde_json::json!({ "faces": faces }).to_string(),
    )
    .unwrap();
    photo
}

fn stdout_json(output: &Output) -> serde_json::Value {
    assert!(
        output.status.success(),
        "rollcall failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("stdout is JSON")
}

#[test]
fn register_approve_and_check_in() {
    let tmp = TempDir::new().unwrap();
    let home = tmp.path();
    let reg_1 = photo_with_encoding(home, "reg_1", Some(&[0.0, 0.0, 0.0]));
    let reg_2 = photo_with_encoding(home, "reg_2", Some(&[0.0, 0.02, 0.0]));
    let blank = photo_with_encoding(home, "blank", None);
    let near = photo_with_encoding(home, "near", Some(&[0.1, 0.0, 0.0]));
    let far = photo_with_encoding(home, "far", Some(&[0.5, 0.0, 0.0]));

    let out = rollcall(
        home,
        &[
            "register",
            "--name",
            "Ashmita",
            "--email",
            "ashmita@example.com",
            "--photo",
            reg_1.to_str().unwrap(),
            "--photo",
            reg_2.to_str().unwrap(),
        ],
    );
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));

    let pending = stdout_json(&rollcall(home, &["list", "--status", "pending", "--json"]));
    assert_eq!(pending[0]["id"], 1);
    assert_eq!(pending[0]["status"], "pending");

    let out = rollcall(home, &["approve", "1"]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));

    let shown = stdout_json(&rollcall(home, &["show", "1", "--json"]));
    assert_eq!(shown["status"], "approved");
    assert_eq!(shown["encodings"].as_array().unwrap().len(), 2);

    let report = stdout_json(&rollcall(
        home,
        &[
            "session",
            far.to_str().unwrap(),
            blank.to_str().unwrap(),
            near.to_str().unwrap(),
            "--max-attempts",
            "3",
        ],
    ));
    assert_eq!(report["status"], "success");
    assert_eq!(report["found"], true);
    assert_eq!(report["person_id"], 1);
    assert_eq!(report["attempts"], 3);
}

#[test]
fn approve_without_face_fails_and_stays_pending() {
    let tmp = TempDir::new().unwrap();
    let home = tmp.path();
    let blank = photo_with_encoding(home, "blank", None);

    let out = rollcall(
        home,
        &["register", "--name", "Ravi", "--photo", blank.to_str().unwrap()],
    );
    assert!(out.status.success());

    let out = rollcall(home, &["approve", "1"]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("no usable face"));

    let shown = stdout_json(&rollcall(home, &["show", "1", "--json"]));
    assert_eq!(shown["status"], "pending");
}

#[test]
fn session_against_empty_registry_is_not_found() {
    let tmp = TempDir::new().unwrap();
    let home = tmp.path();
    let near = photo_with_encoding(home, "near", Some(&[0.1, 0.0]));

    let report = stdout_json(&rollcall(home, &["session", near.to_str().unwrap()]));
    assert_eq!(report["status"], "not_found");
    assert_eq!(report["found"], false);
}
