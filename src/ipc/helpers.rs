use super::error::err;
use super::types::{AppState, Request};
use crate::access::{AccessState, Role};
use rusqlite::Connection;
use serde_json::Value;

pub fn require_db<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

fn forbidden(req: &Request) -> Value {
    err(&req.id, "forbidden", "access denied", None)
}

/// Role of the current granted session. Handlers pass this on to the audit
/// recorder so the actor is always explicit.
pub fn require_role(state: &AppState, req: &Request) -> Result<Role, Value> {
    match state.access.as_ref() {
        Some(ctl) if ctl.state() == AccessState::Granted => {
            ctl.role().ok_or_else(|| forbidden(req))
        }
        _ => Err(forbidden(req)),
    }
}

pub fn require_admin(state: &AppState, req: &Request) -> Result<Role, Value> {
    let role = require_role(state, req)?;
    if role != Role::Admin {
        return Err(forbidden(req));
    }
    Ok(role)
}

pub fn str_param<'a>(req: &'a Request, name: &str) -> Result<&'a str, Value> {
    req.params
        .get(name)
        .and_then(|v| v.as_str())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing params.{}", name), None))
}

pub fn opt_str_param(req: &Request, name: &str) -> Option<String> {
    req.params
        .get(name)
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

pub fn opt_f64_param(req: &Request, name: &str) -> Option<f64> {
    req.params.get(name).and_then(|v| v.as_f64())
}

pub fn opt_i64_param(req: &Request, name: &str) -> Option<i64> {
    req.params.get(name).and_then(|v| v.as_i64())
}

pub fn opt_bool_param(req: &Request, name: &str) -> Option<bool> {
    req.params.get(name).and_then(|v| v.as_bool())
}

pub fn db_err(req: &Request, e: impl std::fmt::Debug) -> Value {
    err(&req.id, "db_error", format!("{e:?}"), None)
}
