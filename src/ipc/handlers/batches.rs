use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_err, opt_str_param, require_db, require_role, str_param};
use crate::ipc::types::{AppState, Request};
use crate::soft_delete::{self, TombstoneTable, LIVE};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    if let Err(e) = require_role(state, req) {
        return e;
    }

    // Correlated subquery for the count so a join cannot duplicate batches.
    let sql = format!(
        "SELECT b.id, b.name, b.subject,
                (SELECT COUNT(*) FROM students s
                 WHERE s.batch_id = b.id AND s.{} AND s.status = 'active') AS student_count
         FROM batches b
         WHERE b.{}
         ORDER BY b.name",
        LIVE, LIVE
    );
    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return db_err(req, e),
    };
    let rows = stmt.query_map([], |row| {
        Ok(json!({
            "id": row.get::<_, String>(0)?,
            "name": row.get::<_, String>(1)?,
            "subject": row.get::<_, Option<String>>(2)?,
            "studentCount": row.get::<_, i64>(3)?,
        }))
    });
    match rows.and_then(|r| r.collect::<Result<Vec<_>, _>>()) {
        Ok(batches) => ok(&req.id, json!({ "batches": batches })),
        Err(e) => db_err(req, e),
    }
}

fn handle_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    if let Err(e) = require_role(state, req) {
        return e;
    }
    let name = match str_param(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let id = Uuid::new_v4().to_string();
    let res = conn.execute(
        "INSERT INTO batches(id, name, subject) VALUES(?1, ?2, ?3)",
        rusqlite::params![id, name, opt_str_param(req, "subject")],
    );
    match res {
        Ok(_) => ok(&req.id, json!({ "id": id })),
        Err(e) => db_err(req, e),
    }
}

fn handle_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let actor = match require_role(state, req) {
        Ok(r) => r,
        Err(e) => return e,
    };
    let id = match str_param(req, "id") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let name: Option<String> = match conn
        .query_row("SELECT name FROM batches WHERE id = ?1", [id], |r| r.get(0))
        .optional()
    {
        Ok(v) => v,
        Err(e) => return db_err(req, e),
    };
    let Some(name) = name else {
        return err(&req.id, "bad_params", "batch not found", None);
    };

    let res = soft_delete::soft_delete(
        conn,
        Some(actor),
        TombstoneTable::Batches,
        id,
        &format!("Deleted batch: {}", name),
    );
    match res {
        Ok(()) => ok(&req.id, json!({ "deleted": true })),
        Err(e) => db_err(req, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "batches.list" => Some(handle_list(state, req)),
        "batches.create" => Some(handle_create(state, req)),
        "batches.delete" => Some(handle_delete(state, req)),
        _ => None,
    }
}
