use crate::audit::{self, AuditAction};
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
        "SELECT f.id, f.student_id, s.name, f.month, f.amount, f.status, f.paid_on,
                f.payment_mode, f.created_at
         FROM fees f
         JOIN students s ON s.id = f.student_id
         WHERE f.{}",
        LIVE
    );
    let mut params: Vec<String> = Vec::new();
    if let Some(month) = opt_str_param(req, "month") {
        sql.push_str(" AND f.month = ?1");
        params.push(month);
    } else if let Some(student_id) = opt_str_param(req, "studentId") {
        sql.push_str(" AND f.student_id = ?1");
        params.push(student_id);
    }
    sql.push_str(" ORDER BY f.month DESC, s.name");

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return db_err(req, e),
    };
    let rows = stmt.query_map(rusqlite::params_from_iter(params), |row| {
        Ok(json!({
            "id": row.get::<_, String>(0)?,
            "studentId": row.get::<_, String>(1)?,
            "studentName": row.get::<_, String>(2)?,
            "month": row.get::<_, String>(3)?,
            "amount": row.get::<_, f64>(4)?,
            "status": row.get::<_, String>(5)?,
            "paidOn": row.get::<_, Option<String>>(6)?,
            "paymentMode": row.get::<_, Option<String>>(7)?,
            "createdAt": row.get::<_, String>(8)?,
        }))
    });
    match rows.and_then(|r| r.collect::<Result<Vec<_>, _>>()) {
        Ok(fees) => ok(&req.id, json!({ "fees": fees })),
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
    let month = match str_param(req, "month") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(amount) = opt_f64_param(req, "amount") else {
        return err(&req.id, "bad_params", "missing params.amount", None);
    };

    let id = Uuid::new_v4().to_string();
    let res = conn.execute(
        "INSERT INTO fees(id, student_id, month, amount, status, created_at)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            id,
            student_id,
            month,
            amount,
            opt_str_param(req, "status").unwrap_or_else(|| "due".to_string()),
            db::now_iso(),
        ],
    );
    match res {
        Ok(_) => ok(&req.id, json!({ "id": id })),
        Err(e) => db_err(req, e),
    }
}

fn handle_mark_paid(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    let prior: Option<(String, String)> = match conn
        .query_row(
            "SELECT status, month FROM fees WHERE id = ?1",
            [id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return db_err(req, e),
    };
    let Some((prior_status, month)) = prior else {
        return err(&req.id, "bad_params", "fee not found", None);
    };

    let paid_on = opt_str_param(req, "paidOn").unwrap_or_else(db::now_iso);
    let payment_mode = opt_str_param(req, "paymentMode");

    let tx = match conn.unchecked_transaction() {
        Ok(tx) => tx,
        Err(e) => return db_err(req, e),
    };
    let res = tx.execute(
        "UPDATE fees SET status = 'paid', paid_on = ?1, payment_mode = ?2 WHERE id = ?3",
        rusqlite::params![paid_on, payment_mode, id],
    );
    if let Err(e) = res {
        return db_err(req, e);
    }
    let changes = json!({ "status": { "from": prior_status, "to": "paid" } });
    let res = audit::record_audit(
        &tx,
        Some(actor),
        AuditAction::Update,
        "fees",
        id,
        &format!("Marked fee paid for {}", month),
        Some(&changes),
    );
    if let Err(e) = res {
        return db_err(req, e);
    }
    if let Err(e) = tx.commit() {
        return db_err(req, e);
    }
    ok(&req.id, json!({ "updated": true }))
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

    let month: Option<String> = match conn
        .query_row("SELECT month FROM fees WHERE id = ?1", [id], |r| r.get(0))
        .optional()
    {
        Ok(v) => v,
        Err(e) => return db_err(req, e),
    };
    let Some(month) = month else {
        return err(&req.id, "bad_params", "fee not found", None);
    };

    let res = soft_delete::soft_delete(
        conn,
        Some(actor),
        TombstoneTable::Fees,
        id,
        &format!("Deleted fee entry for {}", month),
    );
    match res {
        Ok(()) => ok(&req.id, json!({ "deleted": true })),
        Err(e) => db_err(req, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "fees.list" => Some(handle_list(state, req)),
        "fees.create" => Some(handle_create(state, req)),
        "fees.markPaid" => Some(handle_mark_paid(state, req)),
        "fees.delete" => Some(handle_delete(state, req)),
        _ => None,
    }
}
