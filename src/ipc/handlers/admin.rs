use crate::audit;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_err, opt_bool_param, opt_i64_param, require_admin, require_db, str_param,
};
use crate::ipc::types::{AppState, Request};
use crate::soft_delete::{self, RestorePolicy, TombstoneTable};
use serde_json::json;

fn handle_audit_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    if let Err(e) = require_admin(state, req) {
        return e;
    }
    let limit = opt_i64_param(req, "limit").unwrap_or(50);

    match audit::recent(conn, limit) {
        Ok(entries) => {
            let entries: Vec<_> = entries
                .into_iter()
                .map(|e| {
                    json!({
                        "id": e.id,
                        "action": e.action,
                        "tableName": e.table_name,
                        "recordId": e.record_id,
                        "actorRole": e.actor_role,
                        "description": e.description,
                        "changes": e.changes,
                        "createdAt": e.created_at,
                    })
                })
                .collect();
            ok(&req.id, json!({ "entries": entries }))
        }
        Err(e) => db_err(req, e),
    }
}

fn handle_deleted_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    if let Err(e) = require_admin(state, req) {
        return e;
    }

    let mut records = Vec::new();
    for table in TombstoneTable::ALL {
        let rows = match soft_delete::deleted_rows(conn, table) {
            Ok(r) => r,
            Err(e) => return db_err(req, e),
        };
        for row in rows {
            records.push(json!({
                "table": row.table,
                "id": row.id,
                "label": row.label,
                "deletedAt": row.deleted_at,
            }));
        }
    }
    ok(&req.id, json!({ "records": records }))
}

fn handle_restore(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let actor = match require_admin(state, req) {
        Ok(r) => r,
        Err(e) => return e,
    };
    let table_raw = match str_param(req, "table") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let record_id = match str_param(req, "id") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let description = match str_param(req, "description") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(table) = TombstoneTable::parse(table_raw) else {
        return err(
            &req.id,
            "bad_params",
            format!("unknown table: {}", table_raw),
            None,
        );
    };

    let mut policy = RestorePolicy::default();
    if let Some(flag) = opt_bool_param(req, "auditNoopRestore") {
        policy.audit_noop_restore = flag;
    }

    let res = soft_delete::restore(conn, Some(actor), table, record_id, description, policy);
    match res {
        Ok(()) => ok(&req.id, json!({ "restored": true })),
        Err(e) => db_err(req, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "audit.list" => Some(handle_audit_list(state, req)),
        "deleted.list" => Some(handle_deleted_list(state, req)),
        "records.restore" => Some(handle_restore(state, req)),
        _ => None,
    }
}
