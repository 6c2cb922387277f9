use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

const SESSION_FILE: &str = "session.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Teacher,
}

impl Role {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(Self::Admin),
            "teacher" => Some(Self::Teacher),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Teacher => "teacher",
        }
    }
}

/// Client-held proof of a validated access key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub role: Role,
    pub key: String,
}

/// Durable single-slot session storage, one JSON file per workspace.
/// A missing or unreadable file is the same as no session.
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(workspace: &Path) -> Self {
        Self {
            path: workspace.join(SESSION_FILE),
        }
    }

    pub fn get(&self) -> Option<Session> {
        let raw = std::fs::read_to_string(&self.path).ok()?;
        serde_json::from_str(&raw).ok()
    }

    pub fn save(&self, session: &Session) -> anyhow::Result<()> {
        let raw = serde_json::to_string(session)?;
        std::fs::write(&self.path, raw)?;
        Ok(())
    }

    pub fn clear(&self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Looks up an active access key. Any failure mode (no match, inactive key,
/// unknown role value, store error) comes back as None so callers cannot
/// distinguish a revoked key from one that never existed.
pub fn validate_key(conn: &Connection, candidate: &str) -> Option<Session> {
    let row: (String, String) = conn
        .query_row(
            "SELECT key, role FROM access_keys WHERE key = ?1 AND is_active = 1 LIMIT 1",
            [candidate],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .ok()??;
    let role = Role::parse(&row.1)?;
    Some(Session { role, key: row.0 })
}

/// Minimal request-URL model: enough to read the `access` query parameter
/// and hand a cleaned URL back to the shell once the credential is consumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestUrl {
    base: String,
    query: Vec<(String, String)>,
    fragment: Option<String>,
}

impl RequestUrl {
    pub fn parse(raw: &str) -> Self {
        let (rest, fragment) = match raw.split_once('#') {
            Some((r, f)) => (r, Some(f.to_string())),
            None => (raw, None),
        };
        let (base, query_str) = match rest.split_once('?') {
            Some((b, q)) => (b.to_string(), q),
            None => (rest.to_string(), ""),
        };
        let query = query_str
            .split('&')
            .filter(|p| !p.is_empty())
            .map(|pair| match pair.split_once('=') {
                Some((k, v)) => (k.to_string(), v.to_string()),
                None => (pair.to_string(), String::new()),
            })
            .collect();
        Self {
            base,
            query,
            fragment,
        }
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn remove_query_param(&mut self, name: &str) {
        self.query.retain(|(k, _)| k != name);
    }
}

impl fmt::Display for RequestUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.base)?;
        for (i, (k, v)) in self.query.iter().enumerate() {
            let sep = if i == 0 { '?' } else { '&' };
            if v.is_empty() {
                write!(f, "{}{}", sep, k)?;
            } else {
                write!(f, "{}{}={}", sep, k, v)?;
            }
        }
        if let Some(frag) = &self.fragment {
            write!(f, "#{}", frag)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessState {
    Loading,
    Granted,
    Denied,
}

impl AccessState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Loading => "loading",
            Self::Granted => "granted",
            Self::Denied => "denied",
        }
    }
}

/// Session bootstrap: stored session first, then a URL-supplied key, then
/// denied. Every path that cannot produce a valid session lands on Denied;
/// there is no separate error state.
pub struct AccessController {
    store: SessionStore,
    state: AccessState,
    role: Option<Role>,
}

impl AccessController {
    pub fn new(store: SessionStore) -> Self {
        Self {
            store,
            state: AccessState::Loading,
            role: None,
        }
    }

    pub fn state(&self) -> AccessState {
        self.state
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    pub fn is_admin(&self) -> bool {
        self.role == Some(Role::Admin)
    }

    /// Runs once per shell start. The URL is mutated in place: the `access`
    /// parameter is stripped only after it validated successfully, so a bad
    /// link stays visible for the user to correct.
    pub fn bootstrap(&mut self, conn: &Connection, url: Option<&mut RequestUrl>) {
        if let Some(existing) = self.store.get() {
            // Re-validate on every load so a key deactivated after issuance
            // loses access on the next start, not never.
            if let Some(valid) = validate_key(conn, &existing.key) {
                self.role = Some(valid.role);
                self.state = AccessState::Granted;
                return;
            }
            self.store.clear();
        }

        if let Some(url) = url {
            if let Some(candidate) = url.query_param("access").map(str::to_string) {
                if let Some(session) = validate_key(conn, &candidate) {
                    // Persist before reporting granted; a save failure means
                    // the grant would not survive a reload, so deny instead.
                    if self.store.save(&session).is_ok() {
                        self.role = Some(session.role);
                        self.state = AccessState::Granted;
                        url.remove_query_param("access");
                        return;
                    }
                }
            }
        }

        self.state = AccessState::Denied;
    }

    /// Idempotent; safe to call in any state.
    pub fn logout(&mut self) {
        self.store.clear();
        self.role = None;
        self.state = AccessState::Denied;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_workspace(prefix: &str) -> PathBuf {
        let p = std::env::temp_dir().join(format!(
            "{}-{}",
            prefix,
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        std::fs::create_dir_all(&p).expect("create temp dir");
        p
    }

    fn insert_key(conn: &Connection, key: &str, role: &str, active: bool) {
        conn.execute(
            "INSERT INTO access_keys(id, key, role, is_active, created_at)
             VALUES(?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                uuid::Uuid::new_v4().to_string(),
                key,
                role,
                active as i64,
                db::now_iso()
            ],
        )
        .expect("insert key");
    }

    #[test]
    fn session_store_roundtrip_and_corrupt_content() {
        let ws = temp_workspace("tuitiond-session");
        let store = SessionStore::new(&ws);
        assert_eq!(store.get(), None);

        let session = Session {
            role: Role::Teacher,
            key: "k1".into(),
        };
        store.save(&session).expect("save");
        assert_eq!(store.get(), Some(session));

        std::fs::write(ws.join(SESSION_FILE), "{not json").expect("corrupt");
        assert_eq!(store.get(), None);

        store.clear();
        store.clear();
        assert_eq!(store.get(), None);
    }

    #[test]
    fn validate_key_is_fail_closed() {
        let conn = db::open_in_memory().expect("db");
        insert_key(&conn, "LIVE", "teacher", true);
        insert_key(&conn, "DEAD", "teacher", false);
        insert_key(&conn, "WEIRD", "superuser", true);

        let s = validate_key(&conn, "LIVE").expect("live key validates");
        assert_eq!(s.role, Role::Teacher);
        assert_eq!(s.key, "LIVE");

        assert_eq!(validate_key(&conn, "DEAD"), None);
        assert_eq!(validate_key(&conn, "NEVER-EXISTED"), None);
        // Unknown role value stored by hand is treated the same as no match.
        assert_eq!(validate_key(&conn, "WEIRD"), None);
    }

    #[test]
    fn request_url_parse_and_strip() {
        let mut url = RequestUrl::parse("https://host/app?x=1&access=SECRET&y=2#top");
        assert_eq!(url.query_param("access"), Some("SECRET"));
        assert_eq!(url.query_param("x"), Some("1"));

        url.remove_query_param("access");
        assert_eq!(url.query_param("access"), None);
        assert_eq!(url.to_string(), "https://host/app?x=1&y=2#top");

        let bare = RequestUrl::parse("https://host/app");
        assert_eq!(bare.to_string(), "https://host/app");
        assert_eq!(bare.query_param("access"), None);
    }

    #[test]
    fn bootstrap_denies_without_credentials() {
        let ws = temp_workspace("tuitiond-deny");
        let conn = db::open_in_memory().expect("db");
        let mut ctl = AccessController::new(SessionStore::new(&ws));
        assert_eq!(ctl.state(), AccessState::Loading);

        ctl.bootstrap(&conn, None);
        assert_eq!(ctl.state(), AccessState::Denied);
        assert_eq!(ctl.role(), None);
    }

    #[test]
    fn bootstrap_consumes_url_key_and_strips_it() {
        let ws = temp_workspace("tuitiond-url");
        let conn = db::open_in_memory().expect("db");
        insert_key(&conn, "INVITE", "teacher", true);

        let mut ctl = AccessController::new(SessionStore::new(&ws));
        let mut url = RequestUrl::parse("https://host/app?access=INVITE");
        ctl.bootstrap(&conn, Some(&mut url));

        assert_eq!(ctl.state(), AccessState::Granted);
        assert_eq!(ctl.role(), Some(Role::Teacher));
        assert!(!ctl.is_admin());
        assert_eq!(url.to_string(), "https://host/app");

        // Session persisted: a fresh controller grants without any URL.
        let mut again = AccessController::new(SessionStore::new(&ws));
        again.bootstrap(&conn, None);
        assert_eq!(again.state(), AccessState::Granted);
        assert_eq!(again.role(), Some(Role::Teacher));
    }

    #[test]
    fn bootstrap_keeps_url_param_when_key_is_invalid() {
        let ws = temp_workspace("tuitiond-badurl");
        let conn = db::open_in_memory().expect("db");

        let mut ctl = AccessController::new(SessionStore::new(&ws));
        let mut url = RequestUrl::parse("https://host/app?access=WRONG");
        ctl.bootstrap(&conn, Some(&mut url));

        assert_eq!(ctl.state(), AccessState::Denied);
        // Strip happens only on successful validation.
        assert_eq!(url.query_param("access"), Some("WRONG"));
    }

    #[test]
    fn stale_stored_session_is_cleared_on_revalidation() {
        let ws = temp_workspace("tuitiond-stale");
        let conn = db::open_in_memory().expect("db");
        insert_key(&conn, "TEMP", "admin", true);

        let store = SessionStore::new(&ws);
        let mut ctl = AccessController::new(store);
        let mut url = RequestUrl::parse("https://host/app?access=TEMP");
        ctl.bootstrap(&conn, Some(&mut url));
        assert_eq!(ctl.state(), AccessState::Granted);
        assert!(ctl.is_admin());

        // Deactivate after issuance; the next bootstrap must deny and must
        // not leave the stale session behind.
        conn.execute("UPDATE access_keys SET is_active = 0 WHERE key = 'TEMP'", [])
            .expect("deactivate");

        let mut next = AccessController::new(SessionStore::new(&ws));
        next.bootstrap(&conn, None);
        assert_eq!(next.state(), AccessState::Denied);
        assert_eq!(SessionStore::new(&ws).get(), None);
    }

    #[test]
    fn logout_is_idempotent() {
        let ws = temp_workspace("tuitiond-logout");
        let conn = db::open_in_memory().expect("db");
        insert_key(&conn, "K", "teacher", true);

        let mut ctl = AccessController::new(SessionStore::new(&ws));
        let mut url = RequestUrl::parse("https://host/app?access=K");
        ctl.bootstrap(&conn, Some(&mut url));
        assert_eq!(ctl.state(), AccessState::Granted);

        ctl.logout();
        assert_eq!(ctl.state(), AccessState::Denied);
        assert_eq!(ctl.role(), None);
        assert_eq!(SessionStore::new(&ws).get(), None);

        ctl.logout();
        assert_eq!(ctl.state(), AccessState::Denied);
        assert_eq!(SessionStore::new(&ws).get(), None);
    }
}
