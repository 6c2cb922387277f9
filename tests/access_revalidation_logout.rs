use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_tuitiond");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn tuitiond");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

#[test]
fn deactivated_key_loses_access_on_next_bootstrap() {
    let workspace = temp_dir("tuitiond-revalidate");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "keys.create",
        json!({ "key": "ADMIN-1", "role": "admin" }),
    );
    let granted = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "access.bootstrap",
        json!({ "url": "https://center.example/app?access=ADMIN-1" }),
    );
    assert_eq!(
        granted.get("state").and_then(|v| v.as_str()),
        Some("granted")
    );
    assert_eq!(granted.get("isAdmin").and_then(|v| v.as_bool()), Some(true));

    let keys = request_ok(&mut stdin, &mut reader, "4", "keys.list", json!({}));
    let key_id = keys
        .get("keys")
        .and_then(|v| v.as_array())
        .and_then(|arr| arr.first())
        .and_then(|k| k.get("id"))
        .and_then(|v| v.as_str())
        .expect("key id")
        .to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "keys.deactivate",
        json!({ "id": key_id }),
    );

    // A fresh process re-validates the stored session, denies, and clears it.
    let (_child2, mut stdin2, mut reader2) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin2,
        &mut reader2,
        "6",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let denied = request_ok(
        &mut stdin2,
        &mut reader2,
        "7",
        "access.bootstrap",
        json!({}),
    );
    assert_eq!(denied.get("state").and_then(|v| v.as_str()), Some("denied"));
    assert!(
        !workspace.join("session.json").exists(),
        "stale session must be cleared from storage"
    );
}

#[test]
fn logout_is_idempotent_over_ipc() {
    let workspace = temp_dir("tuitiond-logout-ipc");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "keys.create",
        json!({ "key": "T-1", "role": "teacher" }),
    );
    let granted = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "access.bootstrap",
        json!({ "url": "https://center.example/app?access=T-1" }),
    );
    assert_eq!(
        granted.get("state").and_then(|v| v.as_str()),
        Some("granted")
    );

    for id in ["4", "5"] {
        let out = request_ok(&mut stdin, &mut reader, id, "access.logout", json!({}));
        assert_eq!(out.get("state").and_then(|v| v.as_str()), Some("denied"));
        assert!(!workspace.join("session.json").exists());
    }

    let status = request_ok(&mut stdin, &mut reader, "6", "access.status", json!({}));
    assert_eq!(status.get("state").and_then(|v| v.as_str()), Some("denied"));
    assert_eq!(status.get("role"), Some(&serde_json::Value::Null));
}
