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

fn grant_admin(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, workspace: &PathBuf) {
    let _ = request_ok(
        stdin,
        reader,
        "setup-1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        stdin,
        reader,
        "setup-2",
        "keys.create",
        json!({ "key": "ADMIN", "role": "admin" }),
    );
    let granted = request_ok(
        stdin,
        reader,
        "setup-3",
        "access.bootstrap",
        json!({ "url": "https://center.example/app?access=ADMIN" }),
    );
    assert_eq!(
        granted.get("state").and_then(|v| v.as_str()),
        Some("granted")
    );
}

#[test]
fn delete_restore_round_trip_with_audit_trail() {
    let workspace = temp_dir("tuitiond-roundtrip");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    grant_admin(&mut stdin, &mut reader, &workspace);

    let batch = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "batches.create",
        json!({ "name": "Evening Physics", "subject": "Physics" }),
    );
    let batch_id = batch.get("id").and_then(|v| v.as_str()).expect("batch id");

    let student = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.create",
        json!({ "name": "Asha Verma", "batchId": batch_id, "monthlyFee": 1500 }),
    );
    let student_id = student
        .get("id")
        .and_then(|v| v.as_str())
        .expect("student id")
        .to_string();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.delete",
        json!({ "id": student_id }),
    );

    // Gone from every live listing.
    let live = request_ok(&mut stdin, &mut reader, "4", "students.list", json!({}));
    assert_eq!(
        live.get("students").and_then(|v| v.as_array()).map(Vec::len),
        Some(0)
    );

    // Visible in the admin deleted-records view.
    let deleted = request_ok(&mut stdin, &mut reader, "5", "deleted.list", json!({}));
    let records = deleted
        .get("records")
        .and_then(|v| v.as_array())
        .expect("records");
    assert_eq!(records.len(), 1);
    assert_eq!(
        records[0].get("table").and_then(|v| v.as_str()),
        Some("students")
    );
    assert_eq!(
        records[0].get("label").and_then(|v| v.as_str()),
        Some("Asha Verma")
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "records.restore",
        json!({
            "table": "students",
            "id": student_id,
            "description": "Restored student: Asha Verma"
        }),
    );

    let live_after = request_ok(&mut stdin, &mut reader, "7", "students.list", json!({}));
    assert_eq!(
        live_after
            .get("students")
            .and_then(|v| v.as_array())
            .map(Vec::len),
        Some(1)
    );
    let deleted_after = request_ok(&mut stdin, &mut reader, "8", "deleted.list", json!({}));
    assert_eq!(
        deleted_after
            .get("records")
            .and_then(|v| v.as_array())
            .map(Vec::len),
        Some(0)
    );

    // Exactly two entries, newest first: restore then delete.
    let audit = request_ok(&mut stdin, &mut reader, "9", "audit.list", json!({}));
    let entries = audit
        .get("entries")
        .and_then(|v| v.as_array())
        .expect("entries");
    assert_eq!(entries.len(), 2);
    assert_eq!(
        entries[0].get("action").and_then(|v| v.as_str()),
        Some("restore")
    );
    assert_eq!(
        entries[1].get("action").and_then(|v| v.as_str()),
        Some("delete")
    );
    for entry in entries {
        assert_eq!(
            entry.get("tableName").and_then(|v| v.as_str()),
            Some("students")
        );
        assert_eq!(
            entry.get("recordId").and_then(|v| v.as_str()),
            Some(student_id.as_str())
        );
        assert_eq!(
            entry.get("actorRole").and_then(|v| v.as_str()),
            Some("admin")
        );
    }
}

#[test]
fn noop_restore_can_be_kept_quiet() {
    let workspace = temp_dir("tuitiond-noop-restore");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    grant_admin(&mut stdin, &mut reader, &workspace);

    let batch = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "batches.create",
        json!({ "name": "Morning Maths" }),
    );
    let batch_id = batch
        .get("id")
        .and_then(|v| v.as_str())
        .expect("batch id")
        .to_string();

    // Restoring a live row with auditNoopRestore=false leaves no trace.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "records.restore",
        json!({
            "table": "batches",
            "id": batch_id,
            "description": "restore attempt",
            "auditNoopRestore": false
        }),
    );
    let audit = request_ok(&mut stdin, &mut reader, "3", "audit.list", json!({}));
    assert_eq!(
        audit.get("entries").and_then(|v| v.as_array()).map(Vec::len),
        Some(0)
    );

    // Default behavior still records the attempted action.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "records.restore",
        json!({
            "table": "batches",
            "id": batch_id,
            "description": "restore attempt"
        }),
    );
    let audit = request_ok(&mut stdin, &mut reader, "5", "audit.list", json!({}));
    let entries = audit
        .get("entries")
        .and_then(|v| v.as_array())
        .expect("entries");
    assert_eq!(entries.len(), 1);
    assert_eq!(
        entries[0].get("action").and_then(|v| v.as_str()),
        Some("restore")
    );
}
