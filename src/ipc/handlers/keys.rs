use crate::access::Role;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_err, require_admin, require_db, str_param};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use uuid::Uuid;

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    if let Err(e) = require_admin(state, req) {
        return e;
    }

    let mut stmt = match conn.prepare(
        "SELECT id, key, role, is_active, created_at FROM access_keys ORDER BY created_at DESC",
    ) {
        Ok(s) => s,
        Err(e) => return db_err(req, e),
    };
    let rows = stmt.query_map([], |row| {
        Ok(json!({
            "id": row.get::<_, String>(0)?,
            "key": row.get::<_, String>(1)?,
            "role": row.get::<_, String>(2)?,
            "isActive": row.get::<_, i64>(3)? != 0,
            "createdAt": row.get::<_, String>(4)?,
        }))
    });
    match rows.and_then(|r| r.collect::<Result<Vec<_>, _>>()) {
        Ok(keys) => ok(&req.id, json!({ "keys": keys })),
        Err(e) => db_err(req, e),
    }
}

fn handle_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let key = match str_param(req, "key") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let role_raw = match str_param(req, "role") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(role) = Role::parse(role_raw) else {
        return err(&req.id, "bad_params", "role must be admin or teacher", None);
    };

    // First-run provisioning: an empty key table means nobody can hold an
    // admin session yet, so the very first key skips the role gate.
    let count: i64 = match conn.query_row("SELECT COUNT(*) FROM access_keys", [], |r| r.get(0)) {
        Ok(n) => n,
        Err(e) => return db_err(req, e),
    };
    if count > 0 {
        if let Err(e) = require_admin(state, req) {
            return e;
        }
    }

    let id = Uuid::new_v4().to_string();
    let res = conn.execute(
        "INSERT INTO access_keys(id, key, role, is_active, created_at) VALUES(?1, ?2, ?3, 1, ?4)",
        rusqlite::params![id, key, role.as_str(), db::now_iso()],
    );
    match res {
        Ok(_) => ok(&req.id, json!({ "id": id })),
        Err(e) => db_err(req, e),
    }
}

fn handle_deactivate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    if let Err(e) = require_admin(state, req) {
        return e;
    }
    let id = match str_param(req, "id") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match conn.execute("UPDATE access_keys SET is_active = 0 WHERE id = ?1", [id]) {
        Ok(n) => ok(&req.id, json!({ "updated": n })),
        Err(e) => db_err(req, e),
    }
}

fn handle_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    if let Err(e) = require_admin(state, req) {
        return e;
    }
    let id = match str_param(req, "id") {
        Ok(v) => v,
        Err(e) => return e,
    };
    // Keys are removed outright; only domain rows get tombstones.
    match conn.execute("DELETE FROM access_keys WHERE id = ?1", [id]) {
        Ok(n) => ok(&req.id, json!({ "deleted": n })),
        Err(e) => db_err(req, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "keys.list" => Some(handle_list(state, req)),
        "keys.create" => Some(handle_create(state, req)),
        "keys.deactivate" => Some(handle_deactivate(state, req)),
        "keys.delete" => Some(handle_delete(state, req)),
        _ => None,
    }
}
