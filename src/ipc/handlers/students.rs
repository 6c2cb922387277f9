use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_err, opt_f64_param, opt_str_param, require_db, require_role, str_param,
};
use crate::ipc::types::{AppState, Request};
use crate::soft_delete::{self, TombstoneTable, LIVE};
use rusqlite::{params_from_iter, types::Value as SqlValue, OptionalExtension};
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

    let search = opt_str_param(req, "search").unwrap_or_default();
    let mut sql = format!(
        "SELECT s.id, s.name, s.class, s.batch_id, b.name, s.parent_name, s.parent_phone,
                s.monthly_fee, s.priority_tag, s.notes, s.status, s.joined_on, s.created_at
         FROM students s
         LEFT JOIN batches b ON b.id = s.batch_id
         WHERE s.{} AND s.status = 'active'",
        LIVE
    );
    let mut params: Vec<SqlValue> = Vec::new();
    if !search.is_empty() {
        sql.push_str(" AND (s.name LIKE ?1 OR s.parent_phone LIKE ?1 OR s.priority_tag LIKE ?1)");
        params.push(SqlValue::Text(format!("%{}%", search)));
    }
    sql.push_str(" ORDER BY s.name");

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return db_err(req, e),
    };
    let rows = stmt.query_map(params_from_iter(params), |row| {
        Ok(json!({
            "id": row.get::<_, String>(0)?,
            "name": row.get::<_, String>(1)?,
            "class": row.get::<_, Option<String>>(2)?,
            "batchId": row.get::<_, Option<String>>(3)?,
            "batchName": row.get::<_, Option<String>>(4)?,
            "parentName": row.get::<_, Option<String>>(5)?,
            "parentPhone": row.get::<_, Option<String>>(6)?,
            "monthlyFee": row.get::<_, f64>(7)?,
            "priorityTag": row.get::<_, Option<String>>(8)?,
            "notes": row.get::<_, Option<String>>(9)?,
            "status": row.get::<_, String>(10)?,
            "joinedOn": row.get::<_, Option<String>>(11)?,
            "createdAt": row.get::<_, String>(12)?,
        }))
    });
    match rows.and_then(|r| r.collect::<Result<Vec<_>, _>>()) {
        Ok(students) => ok(&req.id, json!({ "students": students })),
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
        "INSERT INTO students(id, name, class, batch_id, parent_name, parent_phone,
                              monthly_fee, priority_tag, notes, joined_on, created_at)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        rusqlite::params![
            id,
            name,
            opt_str_param(req, "class"),
            opt_str_param(req, "batchId"),
            opt_str_param(req, "parentName"),
            opt_str_param(req, "parentPhone"),
            opt_f64_param(req, "monthlyFee").unwrap_or(0.0),
            opt_str_param(req, "priorityTag"),
            opt_str_param(req, "notes"),
            opt_str_param(req, "joinedOn"),
            db::now_iso(),
        ],
    );
    match res {
        Ok(_) => ok(&req.id, json!({ "id": id })),
        Err(e) => db_err(req, e),
    }
}

fn handle_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    if let Err(e) = require_role(state, req) {
        return e;
    }
    let id = match str_param(req, "id") {
        Ok(v) => v,
        Err(e) => return e,
    };

    // Only the fields present in params change.
    let mut sets: Vec<String> = Vec::new();
    let mut params: Vec<SqlValue> = Vec::new();
    let text_fields = [
        ("name", "name"),
        ("class", "class"),
        ("batchId", "batch_id"),
        ("parentName", "parent_name"),
        ("parentPhone", "parent_phone"),
        ("priorityTag", "priority_tag"),
        ("notes", "notes"),
        ("status", "status"),
        ("joinedOn", "joined_on"),
    ];
    for (param, column) in text_fields {
        if let Some(v) = opt_str_param(req, param) {
            params.push(SqlValue::Text(v));
            sets.push(format!("{} = ?{}", column, params.len()));
        }
    }
    if let Some(fee) = opt_f64_param(req, "monthlyFee") {
        params.push(SqlValue::Real(fee));
        sets.push(format!("monthly_fee = ?{}", params.len()));
    }
    if sets.is_empty() {
        return err(&req.id, "bad_params", "no fields to update", None);
    }

    params.push(SqlValue::Text(id.to_string()));
    let sql = format!(
        "UPDATE students SET {} WHERE id = ?{}",
        sets.join(", "),
        params.len()
    );
    match conn.execute(&sql, params_from_iter(params)) {
        Ok(n) => ok(&req.id, json!({ "updated": n })),
        Err(e) => db_err(req, e),
    }
}

fn handle_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    if let Err(e) = require_role(state, req) {
        return e;
    }
    let id = match str_param(req, "id") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let student = conn
        .query_row(
            &format!(
                "SELECT s.id, s.name, s.class, s.batch_id, b.name, s.parent_name, s.parent_phone,
                        s.monthly_fee, s.priority_tag, s.notes, s.status, s.joined_on, s.created_at
                 FROM students s
                 LEFT JOIN batches b ON b.id = s.batch_id
                 WHERE s.id = ?1 AND s.{}",
                LIVE
            ),
            [id],
            |row| {
                Ok(json!({
                    "id": row.get::<_, String>(0)?,
                    "name": row.get::<_, String>(1)?,
                    "class": row.get::<_, Option<String>>(2)?,
                    "batchId": row.get::<_, Option<String>>(3)?,
                    "batchName": row.get::<_, Option<String>>(4)?,
                    "parentName": row.get::<_, Option<String>>(5)?,
                    "parentPhone": row.get::<_, Option<String>>(6)?,
                    "monthlyFee": row.get::<_, f64>(7)?,
                    "priorityTag": row.get::<_, Option<String>>(8)?,
                    "notes": row.get::<_, Option<String>>(9)?,
                    "status": row.get::<_, String>(10)?,
                    "joinedOn": row.get::<_, Option<String>>(11)?,
                    "createdAt": row.get::<_, String>(12)?,
                }))
            },
        )
        .optional();
    let student = match student {
        Ok(Some(s)) => s,
        Ok(None) => return err(&req.id, "bad_params", "student not found", None),
        Err(e) => return db_err(req, e),
    };

    let fees = collect_child_rows(
        conn,
        &format!(
            "SELECT id, month, amount, status, paid_on, payment_mode FROM fees
             WHERE student_id = ?1 AND {} ORDER BY month DESC",
            LIVE
        ),
        id,
        |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "month": row.get::<_, String>(1)?,
                "amount": row.get::<_, f64>(2)?,
                "status": row.get::<_, String>(3)?,
                "paidOn": row.get::<_, Option<String>>(4)?,
                "paymentMode": row.get::<_, Option<String>>(5)?,
            }))
        },
    );
    let fees = match fees {
        Ok(v) => v,
        Err(e) => return db_err(req, e),
    };

    let attendance = collect_child_rows(
        conn,
        &format!(
            "SELECT id, date, status FROM attendance
             WHERE student_id = ?1 AND {} ORDER BY date DESC",
            LIVE
        ),
        id,
        |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "date": row.get::<_, String>(1)?,
                "status": row.get::<_, String>(2)?,
            }))
        },
    );
    let attendance = match attendance {
        Ok(v) => v,
        Err(e) => return db_err(req, e),
    };

    let tests = collect_child_rows(
        conn,
        &format!(
            "SELECT id, subject, test_date, marks, remarks FROM tests
             WHERE student_id = ?1 AND {} ORDER BY test_date DESC",
            LIVE
        ),
        id,
        |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "subject": row.get::<_, String>(1)?,
                "testDate": row.get::<_, String>(2)?,
                "marks": row.get::<_, Option<f64>>(3)?,
                "remarks": row.get::<_, Option<String>>(4)?,
            }))
        },
    );
    let tests = match tests {
        Ok(v) => v,
        Err(e) => return db_err(req, e),
    };

    ok(
        &req.id,
        json!({
            "student": student,
            "fees": fees,
            "attendance": attendance,
            "tests": tests,
        }),
    )
}

fn collect_child_rows(
    conn: &rusqlite::Connection,
    sql: &str,
    student_id: &str,
    map: impl Fn(&rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value>,
) -> rusqlite::Result<Vec<serde_json::Value>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map([student_id], map)?;
    rows.collect()
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
        .query_row("SELECT name FROM students WHERE id = ?1", [id], |r| r.get(0))
        .optional()
    {
        Ok(v) => v,
        Err(e) => return db_err(req, e),
    };
    let Some(name) = name else {
        return err(&req.id, "bad_params", "student not found", None);
    };

    let res = soft_delete::soft_delete(
        conn,
        Some(actor),
        TombstoneTable::Students,
        id,
        &format!("Deleted student: {}", name),
    );
    match res {
        Ok(()) => ok(&req.id, json!({ "deleted": true })),
        Err(e) => db_err(req, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_list(state, req)),
        "students.create" => Some(handle_create(state, req)),
        "students.update" => Some(handle_update(state, req)),
        "students.get" => Some(handle_get(state, req)),
        "students.delete" => Some(handle_delete(state, req)),
        _ => None,
    }
}
