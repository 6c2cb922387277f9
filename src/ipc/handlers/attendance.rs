use crate::audit::{self, AuditAction};
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_err, opt_str_param, require_db, require_role, str_param};
use crate::ipc::types::{AppState, Request};
use crate::soft_delete::LIVE;
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_mark(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let actor = match require_role(state, req) {
        Ok(r) => r,
        Err(e) => return e,
    };
    let batch_id = match str_param(req, "batchId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let date = match str_param(req, "date") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(entries) = req.params.get("entries").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing params.entries", None);
    };

    let batch_name: Option<String> = match conn
        .query_row("SELECT name FROM batches WHERE id = ?1", [batch_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return db_err(req, e),
    };
    let Some(batch_name) = batch_name else {
        return err(&req.id, "bad_params", "batch not found", None);
    };

    let tx = match conn.unchecked_transaction() {
        Ok(tx) => tx,
        Err(e) => return db_err(req, e),
    };
    let mut inserted = 0usize;
    for entry in entries {
        let Some(student_id) = entry.get("studentId").and_then(|v| v.as_str()) else {
            return err(&req.id, "bad_params", "entry missing studentId", None);
        };
        let Some(status) = entry.get("status").and_then(|v| v.as_str()) else {
            return err(&req.id, "bad_params", "entry missing status", None);
        };
        let res = tx.execute(
            "INSERT INTO attendance(id, student_id, date, status, created_at)
             VALUES(?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                Uuid::new_v4().to_string(),
                student_id,
                date,
                status,
                db::now_iso()
            ],
        );
        if let Err(e) = res {
            return db_err(req, e);
        }
        inserted += 1;
    }

    // One audit entry for the whole marking pass, keyed by the batch.
    let res = audit::record_audit(
        &tx,
        Some(actor),
        AuditAction::Create,
        "attendance",
        batch_id,
        &format!(
            "Marked attendance for {} on {} ({} students)",
            batch_name, date, inserted
        ),
        None,
    );
    if let Err(e) = res {
        return db_err(req, e);
    }
    if let Err(e) = tx.commit() {
        return db_err(req, e);
    }
    ok(&req.id, json!({ "inserted": inserted }))
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    if let Err(e) = require_role(state, req) {
        return e;
    }

    let (filter, value) = if let Some(date) = opt_str_param(req, "date") {
        ("date", date)
    } else if let Some(student_id) = opt_str_param(req, "studentId") {
        ("student_id", student_id)
    } else {
        return err(
            &req.id,
            "bad_params",
            "provide params.date or params.studentId",
            None,
        );
    };

    let sql = format!(
        "SELECT id, student_id, date, status, created_at FROM attendance
         WHERE {} = ?1 AND {} ORDER BY date DESC, created_at DESC",
        filter, LIVE
    );
    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return db_err(req, e),
    };
    let rows = stmt.query_map([value], |row| {
        Ok(json!({
            "id": row.get::<_, String>(0)?,
            "studentId": row.get::<_, String>(1)?,
            "date": row.get::<_, String>(2)?,
            "status": row.get::<_, String>(3)?,
            "createdAt": row.get::<_, String>(4)?,
        }))
    });
    match rows.and_then(|r| r.collect::<Result<Vec<_>, _>>()) {
        Ok(attendance) => ok(&req.id, json!({ "attendance": attendance })),
        Err(e) => db_err(req, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.mark" => Some(handle_mark(state, req)),
        "attendance.list" => Some(handle_list(state, req)),
        _ => None,
    }
}
