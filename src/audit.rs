use crate::access::Role;
use crate::db;
use rusqlite::Connection;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    Restore,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Restore => "restore",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub id: String,
    pub action: String,
    pub table_name: String,
    pub record_id: String,
    pub actor_role: String,
    pub description: String,
    pub changes: Option<serde_json::Value>,
    pub created_at: String,
}

/// Appends one immutable audit entry. The actor is passed explicitly by the
/// caller from its active session; a caller with no resolvable session still
/// gets an entry, stamped "unknown", because auditing must never be the thing
/// that fails an operation for session reasons.
pub fn record_audit(
    conn: &Connection,
    actor: Option<Role>,
    action: AuditAction,
    table_name: &str,
    record_id: &str,
    description: &str,
    changes: Option<&serde_json::Value>,
) -> anyhow::Result<()> {
    let actor_role = actor.map(Role::as_str).unwrap_or("unknown");
    let changes_raw = changes.map(serde_json::Value::to_string);
    conn.execute(
        "INSERT INTO audit_log(id, action, table_name, record_id, actor_role, description, changes, created_at)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        rusqlite::params![
            Uuid::new_v4().to_string(),
            action.as_str(),
            table_name,
            record_id,
            actor_role,
            description,
            changes_raw,
            db::now_iso(),
        ],
    )?;
    Ok(())
}

/// Newest first. `rowid` breaks ties so entries written within the same
/// timestamp tick keep insertion order.
pub fn recent(conn: &Connection, limit: i64) -> anyhow::Result<Vec<AuditEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, action, table_name, record_id, actor_role, description, changes, created_at
         FROM audit_log
         ORDER BY created_at DESC, rowid DESC
         LIMIT ?1",
    )?;
    let rows = stmt.query_map([limit], |row| {
        let changes_raw: Option<String> = row.get(6)?;
        Ok(AuditEntry {
            id: row.get(0)?,
            action: row.get(1)?,
            table_name: row.get(2)?,
            record_id: row.get(3)?,
            actor_role: row.get(4)?,
            description: row.get(5)?,
            changes: changes_raw.and_then(|raw| serde_json::from_str(&raw).ok()),
            created_at: row.get(7)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use serde_json::json;

    #[test]
    fn records_unknown_actor_without_failing() {
        let conn = db::open_in_memory().expect("db");
        record_audit(
            &conn,
            None,
            AuditAction::Update,
            "students",
            "s1",
            "Edited with no session",
            None,
        )
        .expect("audit write");

        let entries = recent(&conn, 10).expect("list");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].actor_role, "unknown");
        assert_eq!(entries[0].action, "update");
    }

    #[test]
    fn recent_orders_newest_first_and_keeps_changes() {
        let conn = db::open_in_memory().expect("db");
        record_audit(
            &conn,
            Some(Role::Teacher),
            AuditAction::Create,
            "fees",
            "f1",
            "Recorded fee",
            None,
        )
        .expect("first");
        record_audit(
            &conn,
            Some(Role::Admin),
            AuditAction::Update,
            "fees",
            "f1",
            "Marked paid",
            Some(&json!({"status": {"from": "due", "to": "paid"}})),
        )
        .expect("second");

        let entries = recent(&conn, 10).expect("list");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action, "update");
        assert_eq!(entries[0].actor_role, "admin");
        assert_eq!(
            entries[0].changes,
            Some(json!({"status": {"from": "due", "to": "paid"}}))
        );
        assert_eq!(entries[1].action, "create");

        let capped = recent(&conn, 1).expect("capped");
        assert_eq!(capped.len(), 1);
        assert_eq!(capped[0].action, "update");
    }
}
