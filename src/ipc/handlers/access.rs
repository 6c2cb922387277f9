use crate::access::{RequestUrl, Role};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::opt_str_param;
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_bootstrap(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(ctl) = state.access.as_mut() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut url = opt_str_param(req, "url").map(|raw| RequestUrl::parse(&raw));
    ctl.bootstrap(conn, url.as_mut());

    let mut result = json!({
        "state": ctl.state().as_str(),
        "role": ctl.role().map(Role::as_str),
        "isAdmin": ctl.is_admin(),
    });
    if let Some(url) = url {
        // Cleaned when the credential was consumed, otherwise unchanged.
        result["url"] = json!(url.to_string());
    }
    ok(&req.id, result)
}

fn handle_status(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(ctl) = state.access.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    ok(
        &req.id,
        json!({
            "state": ctl.state().as_str(),
            "role": ctl.role().map(Role::as_str),
            "isAdmin": ctl.is_admin(),
        }),
    )
}

fn handle_logout(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(ctl) = state.access.as_mut() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    ctl.logout();
    ok(&req.id, json!({ "state": ctl.state().as_str() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "access.bootstrap" => Some(handle_bootstrap(state, req)),
        "access.status" => Some(handle_status(state, req)),
        "access.logout" => Some(handle_logout(state, req)),
        _ => None,
    }
}
