use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_err, opt_f64_param, opt_str_param, require_db, require_role, str_param,
};
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
        "SELECT t.id, t.student_id, s.name, t.subject, t.test_date, t.marks, t.remarks
         FROM tests t
         JOIN students s ON s.id = t.student_id
         WHERE t.{}",
        LIVE
    );
    let mut params: Vec<String> = Vec::new();
    if let Some(student_id) = opt_str_param(req, "studentId") {
        sql.push_str(" AND t.student_id = ?1");
        params.push(student_id);
    }
    sql.push_str(" ORDER BY t.test_date DESC");

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return db_err(req, e),
    };
    let rows = stmt.query_map(rusqlite::params_from_iter(params), |row| {
        Ok(json!({
            "id": row.get::<_, String>(0)?,
            "studentId": row.get::<_, String>(1)?,
            "studentName": row.get::<_, String>(2)?,
            "subject": row.get::<_, String>(3)?,
            "testDate": row.get::<_, String>(4)?,
            "marks": row.get::<_, Option<f64>>(5)?,
            "remarks": row.get::<_, Option<String>>(6)?,
        }))
    });
    match rows.and_then(|r| r.collect::<Result<Vec<_>, _>>()) {
        Ok(tests) => ok(&req.id, json!({ "tests": tests })),
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
    let student_id = match str_param(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let subject = match str_param(req, "subject") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let test_date = match str_param(req, "testDate") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let id = Uuid::new_v4().to_string();
    let res = conn.execute(
        "INSERT INTO tests(id, student_id, subject, test_date, marks, remarks, created_at)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![
            id,
            student_id,
            subject,
            test_date,
            opt_f64_param(req, "marks"),
            opt_str_param(req, "remarks"),
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

    let subject: Option<String> = match conn
        .query_row("SELECT subject FROM tests WHERE id = ?1", [id], |r| r.get(0))
        .optional()
    {
        Ok(v) => v,
        Err(e) => return db_err(req, e),
    };
    let Some(subject) = subject else {
        return err(&req.id, "bad_params", "test not found", None);
    };

    let res = soft_delete::soft_delete(
        conn,
        Some(actor),
        TombstoneTable::Tests,
        id,
        &format!("Deleted test score: {}", subject),
    );
    match res {
        Ok(()) => ok(&req.id, json!({ "deleted": true })),
        Err(e) => db_err(req, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "tests.list" => Some(handle_list(state, req)),
        "tests.create" => Some(handle_create(state, req)),
        "tests.delete" => Some(handle_delete(state, req)),
        _ => None,
    }
}
