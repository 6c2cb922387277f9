use crate::access::Role;
use crate::audit::{self, AuditAction};
use crate::db;
use rusqlite::{Connection, OptionalExtension};

/// Every listing of live rows shares this predicate so a new call site cannot
/// forget the tombstone check.
pub const LIVE: &str = "deleted_at IS NULL";

/// Closed set of tables that carry a tombstone column. Wire names go through
/// `parse`, so arbitrary table strings never reach SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TombstoneTable {
    Batches,
    Students,
    Attendance,
    Fees,
    Tests,
    ClassHistory,
}

impl TombstoneTable {
    pub const ALL: [TombstoneTable; 6] = [
        Self::Batches,
        Self::Students,
        Self::Attendance,
        Self::Fees,
        Self::Tests,
        Self::ClassHistory,
    ];

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "batches" => Some(Self::Batches),
            "students" => Some(Self::Students),
            "attendance" => Some(Self::Attendance),
            "fees" => Some(Self::Fees),
            "tests" => Some(Self::Tests),
            "class_history" => Some(Self::ClassHistory),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Batches => "batches",
            Self::Students => "students",
            Self::Attendance => "attendance",
            Self::Fees => "fees",
            Self::Tests => "tests",
            Self::ClassHistory => "class_history",
        }
    }

    /// Column shown as the human label in the deleted-records view.
    fn label_column(self) -> &'static str {
        match self {
            Self::Batches | Self::Students => "name",
            Self::Attendance | Self::ClassHistory => "date",
            Self::Fees => "month",
            Self::Tests => "subject",
        }
    }
}

/// Whether restoring an already-live row still writes a `restore` audit
/// entry. The default keeps the entry (an audit trail of attempted actions);
/// flip it off where that reads as log pollution.
#[derive(Debug, Clone, Copy)]
pub struct RestorePolicy {
    pub audit_noop_restore: bool,
}

impl Default for RestorePolicy {
    fn default() -> Self {
        Self {
            audit_noop_restore: true,
        }
    }
}

/// Stamps the tombstone and writes the `delete` audit entry in one
/// transaction: a failed stamp writes no audit entry, and a failed audit
/// insert rolls the stamp back. Re-deleting a tombstoned row just re-stamps.
pub fn soft_delete(
    conn: &Connection,
    actor: Option<Role>,
    table: TombstoneTable,
    record_id: &str,
    description: &str,
) -> anyhow::Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        &format!("UPDATE {} SET deleted_at = ?1 WHERE id = ?2", table.name()),
        rusqlite::params![db::now_iso(), record_id],
    )?;
    audit::record_audit(
        &tx,
        actor,
        AuditAction::Delete,
        table.name(),
        record_id,
        description,
        None,
    )?;
    tx.commit()?;
    Ok(())
}

/// Clears the tombstone; same transactional rule as `soft_delete`. Restoring
/// a row that was never tombstoned is a data-level no-op whose audit entry is
/// governed by `policy`.
pub fn restore(
    conn: &Connection,
    actor: Option<Role>,
    table: TombstoneTable,
    record_id: &str,
    description: &str,
    policy: RestorePolicy,
) -> anyhow::Result<()> {
    let tx = conn.unchecked_transaction()?;
    let prior: Option<Option<String>> = tx
        .query_row(
            &format!("SELECT deleted_at FROM {} WHERE id = ?1", table.name()),
            [record_id],
            |row| row.get(0),
        )
        .optional()?;
    let was_tombstoned = matches!(prior, Some(Some(_)));

    tx.execute(
        &format!("UPDATE {} SET deleted_at = NULL WHERE id = ?1", table.name()),
        [record_id],
    )?;
    if was_tombstoned || policy.audit_noop_restore {
        audit::record_audit(
            &tx,
            actor,
            AuditAction::Restore,
            table.name(),
            record_id,
            description,
            None,
        )?;
    }
    tx.commit()?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct DeletedRow {
    pub table: &'static str,
    pub id: String,
    pub label: String,
    pub deleted_at: String,
}

/// Tombstoned rows of one table, most recently deleted first.
pub fn deleted_rows(conn: &Connection, table: TombstoneTable) -> anyhow::Result<Vec<DeletedRow>> {
    let sql = format!(
        "SELECT id, {}, deleted_at FROM {} WHERE deleted_at IS NOT NULL ORDER BY deleted_at DESC",
        table.label_column(),
        table.name()
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], |row| {
        Ok(DeletedRow {
            table: table.name(),
            id: row.get(0)?,
            label: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
            deleted_at: row.get(2)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}
