use crate::db;
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

    let mut sql = format!(
        "SELECT h.id, h.batch_id, b.name, h.date, h.topic, h.homework, h.teacher_notes
         FROM class_history h
         JOIN batches b ON b.id = h.batch_id
         WHERE h.{}",
        LIVE
    );
    let mut params: Vec<String> = Vec::new();
    if let Some(batch_id) = opt_str_param(req, "batchId") {
        sql.push_str(" AND h.batch_id = ?1");
        params.push(batch_id);
    }
    sql.push_str(" ORDER BY h.date DESC");

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return db_err(req, e),
    };
    let rows = stmt.query_map(rusqlite::params_from_iter(params), |row| {
        Ok(json!({
            "id": row.get::<_, String>(0)?,
            "batchId": row.get::<_, String>(1)?,
            "batchName": row.get::<_, String>(2)?,
            "date": row.get::<_, String>(3)?,
            "topic": row.get::<_, Option<String>>(4)?,
            "homework": row.get::<_, Option<String>>(5)?,
            "teacherNotes": row.get::<_, Option<String>>(6)?,
        }))
    });
    match rows.and_then(|r| r.collect::<Result<Vec<_>, _>>()) {
        Ok(entries) => ok(&req.id, json!({ "entries": entries })),
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
    let batch_id = match str_param(req, "batchId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let date = match str_param(req, "date") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let id = Uuid::new_v4().to_string();
    let res = conn.execute(
        "INSERT INTO class_history(id, batch_id, date, topic, homework, teacher_notes, created_at)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![
            id,
            batch_id,
            date,
            opt_str_param(req, "topic"),
            opt_str_param(req, "homework"),
            opt_str_param(req, "teacherNotes"),
            db::now_iso(),
        ],
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

    let date: Option<String> = match conn
        .query_row("SELECT date FROM class_history WHERE id = ?1", [id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return db_err(req, e),
    };
    let Some(date) = date else {
        return err(&req.id, "bad_params", "class log not found", None);
    };

    let res = soft_delete::soft_delete(
        conn,
        Some(actor),
        TombstoneTable::ClassHistory,
        id,
        &format!("Deleted class log for {}", date),
    );
    match res {
        Ok(()) => ok(&req.id, json!({ "deleted": true })),
        Err(e) => db_err(req, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classHistory.list" => Some(handle_list(state, req)),
        "classHistory.create" => Some(handle_create(state, req)),
        "classHistory.delete" => Some(handle_delete(state, req)),
        _ => None,
    }
}
