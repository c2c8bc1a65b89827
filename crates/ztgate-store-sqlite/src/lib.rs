//! SQLite backend for ztgate: implements both the [`Store`] and [`AuditLog`]
//! traits on a single pool, so domain rows and their audit trail live in one
//! database file.

use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use uuid::Uuid;
use ztgate_audit::{
    AuditEvent, AuditEventType, AuditLog, AuditLogError, AuditLogFilter, AuditLogId,
};
use ztgate_storage::{
    AdminKey, AdminKeyId, CreateAdminKeyParams, CreateInviteParams, CreateInviteTokenParams,
    CreateLeakTrackParams, CreateSessionParams, Invite, InviteId, InviteToken, IpBinding,
    LeakTrack, LeakTrackId, Session, SessionId, Store, StoreError,
};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// `~/.ztgate/store.db` (creates dir with 0700 perms on unix)
    pub async fn open_default() -> Result<Self, StoreError> {
        let dir = dirs::home_dir()
            .ok_or_else(|| StoreError::Backend("no home dir".into()))?
            .join(".ztgate");
        std::fs::create_dir_all(&dir).map_err(|e| StoreError::Backend(e.to_string()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700))
                .map_err(|e| StoreError::Backend(e.to_string()))?;
        }
        let path = dir.join("store.db");
        let url = format!("sqlite://{}?mode=rwc", path.to_string_lossy());
        Self::open(&url).await
    }

    pub async fn open_in_memory() -> Result<Self, StoreError> {
        Self::open("sqlite::memory:").await
    }

    pub async fn open(url: &str) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(url)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        MIGRATOR
            .run(&pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(Self { pool })
    }
}

fn unique_or_backend(e: sqlx::Error) -> StoreError {
    let s = e.to_string();
    if s.contains("UNIQUE") {
        StoreError::AlreadyExists
    } else {
        StoreError::Backend(s)
    }
}

fn dt_secs(v: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(v, 0).unwrap_or_default()
}

fn dt_millis(v: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(v).unwrap_or_default()
}

fn parse_uuid(s: &str) -> Result<Uuid, StoreError> {
    Uuid::try_parse(s).map_err(|e| StoreError::Backend(e.to_string()))
}

// (id, email, invite_hash, signature, nonce, created_at, expires_at, is_active, used, used_at)
type InviteRow = (
    String,
    String,
    String,
    String,
    String,
    i64,
    Option<i64>,
    i64,
    i64,
    Option<i64>,
);

const INVITE_COLS: &str =
    "id,email,invite_hash,signature,nonce,created_at,expires_at,is_active,used,used_at";

fn invite_from_row(row: InviteRow) -> Result<Invite, StoreError> {
    let (id, email, invite_hash, signature, nonce, created_at, expires_at, is_active, used, used_at) =
        row;
    Ok(Invite {
        id: InviteId(parse_uuid(&id)?),
        email,
        invite_hash,
        signature,
        nonce,
        created_at: dt_secs(created_at),
        expires_at: expires_at.map(dt_secs),
        is_active: is_active != 0,
        used: used != 0,
        used_at: used_at.map(dt_secs),
    })
}

// (id, invite_hash, fingerprint, ip_address, user_agent, first_seen, last_seen, is_active)
type SessionRow = (String, String, String, String, String, i64, i64, i64);

const SESSION_COLS: &str =
    "id,invite_hash,fingerprint,ip_address,user_agent,first_seen,last_seen,is_active";

fn session_from_row(row: SessionRow) -> Result<Session, StoreError> {
    let (id, invite_hash, fingerprint, ip_address, user_agent, first_seen, last_seen, is_active) =
        row;
    Ok(Session {
        id: SessionId(parse_uuid(&id)?),
        invite_hash,
        fingerprint,
        ip_address,
        user_agent,
        first_seen: dt_secs(first_seen),
        last_seen: dt_secs(last_seen),
        is_active: is_active != 0,
    })
}

#[async_trait::async_trait]
impl Store for SqliteStore {
    // ───────────────────────────────── Invites ─────────────────────────────────

    async fn create_invite(&self, params: &CreateInviteParams) -> Result<Invite, StoreError> {
        let id = Uuid::now_v7();
        let created_at = Utc::now();
        sqlx::query(
            "INSERT INTO invites(id,email,invite_hash,signature,nonce,created_at,expires_at)
             VALUES(?,?,?,?,?,?,?)",
        )
        .bind(id.to_string())
        .bind(&params.email)
        .bind(&params.invite_hash)
        .bind(&params.signature)
        .bind(&params.nonce)
        .bind(created_at.timestamp())
        .bind(params.expires_at.map(|t| t.timestamp()))
        .execute(&self.pool)
        .await
        .map_err(unique_or_backend)?;

        Ok(Invite {
            id: InviteId(id),
            email: params.email.clone(),
            invite_hash: params.invite_hash.clone(),
            signature: params.signature.clone(),
            nonce: params.nonce.clone(),
            created_at: dt_secs(created_at.timestamp()),
            expires_at: params.expires_at.map(|t| dt_secs(t.timestamp())),
            is_active: true,
            used: false,
            used_at: None,
        })
    }

    async fn get_invite_by_hash(&self, invite_hash: &str) -> Result<Invite, StoreError> {
        let row = sqlx::query_as::<_, InviteRow>(&format!(
            "SELECT {} FROM invites WHERE invite_hash=?",
            INVITE_COLS
        ))
        .bind(invite_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        match row {
            None => Err(StoreError::NotFound),
            Some(row) => invite_from_row(row),
        }
    }

    async fn list_invites(&self) -> Result<Vec<Invite>, StoreError> {
        let rows = sqlx::query_as::<_, InviteRow>(&format!(
            "SELECT {} FROM invites ORDER BY created_at DESC, id DESC",
            INVITE_COLS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        rows.into_iter().map(invite_from_row).collect()
    }

    async fn mark_invite_used(&self, invite_hash: &str) -> Result<bool, StoreError> {
        // CAS: only the caller that flips used wins.
        let res = sqlx::query("UPDATE invites SET used=1, used_at=? WHERE invite_hash=? AND used=0")
            .bind(Utc::now().timestamp())
            .bind(invite_hash)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        if res.rows_affected() == 1 {
            return Ok(true);
        }

        // distinguish "already used" from "no such invite"
        let exists = sqlx::query_as::<_, (i64,)>("SELECT 1 FROM invites WHERE invite_hash=?")
            .bind(invite_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        match exists {
            Some(_) => Ok(false),
            None => Err(StoreError::NotFound),
        }
    }

    async fn set_invite_active(&self, invite_hash: &str, active: bool) -> Result<(), StoreError> {
        let res = sqlx::query("UPDATE invites SET is_active=? WHERE invite_hash=?")
            .bind(active as i64)
            .bind(invite_hash)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    // ───────────────────────────── One-time tokens ─────────────────────────────

    async fn create_invite_token(
        &self,
        params: &CreateInviteTokenParams,
    ) -> Result<InviteToken, StoreError> {
        let created_at = Utc::now();
        sqlx::query(
            "INSERT INTO invite_tokens(token,invite_hash,created_at,expires_at) VALUES(?,?,?,?)",
        )
        .bind(&params.token)
        .bind(&params.invite_hash)
        .bind(created_at.timestamp())
        .bind(params.expires_at.timestamp())
        .execute(&self.pool)
        .await
        .map_err(unique_or_backend)?;

        Ok(InviteToken {
            token: params.token.clone(),
            invite_hash: params.invite_hash.clone(),
            created_at: dt_secs(created_at.timestamp()),
            expires_at: dt_secs(params.expires_at.timestamp()),
            used: false,
        })
    }

    async fn get_invite_token(&self, token: &str) -> Result<InviteToken, StoreError> {
        let row = sqlx::query_as::<_, (String, String, i64, i64, i64)>(
            "SELECT token,invite_hash,created_at,expires_at,used FROM invite_tokens WHERE token=?",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        match row {
            None => Err(StoreError::NotFound),
            Some((token, invite_hash, created_at, expires_at, used)) => Ok(InviteToken {
                token,
                invite_hash,
                created_at: dt_secs(created_at),
                expires_at: dt_secs(expires_at),
                used: used != 0,
            }),
        }
    }

    async fn consume_invite_token(&self, token: &str) -> Result<bool, StoreError> {
        let res = sqlx::query("UPDATE invite_tokens SET used=1 WHERE token=? AND used=0")
            .bind(token)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        if res.rows_affected() == 1 {
            return Ok(true);
        }

        let exists = sqlx::query_as::<_, (i64,)>("SELECT 1 FROM invite_tokens WHERE token=?")
            .bind(token)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        match exists {
            Some(_) => Ok(false),
            None => Err(StoreError::NotFound),
        }
    }

    // ───────────────────────────────── Sessions ────────────────────────────────

    async fn create_session(&self, params: &CreateSessionParams) -> Result<Session, StoreError> {
        let id = Uuid::now_v7();
        let now = Utc::now().timestamp();
        sqlx::query(
            "INSERT INTO sessions(id,invite_hash,fingerprint,ip_address,user_agent,first_seen,last_seen)
             VALUES(?,?,?,?,?,?,?)",
        )
        .bind(id.to_string())
        .bind(&params.invite_hash)
        .bind(&params.fingerprint)
        .bind(&params.ip_address)
        .bind(&params.user_agent)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(unique_or_backend)?;

        Ok(Session {
            id: SessionId(id),
            invite_hash: params.invite_hash.clone(),
            fingerprint: params.fingerprint.clone(),
            ip_address: params.ip_address.clone(),
            user_agent: params.user_agent.clone(),
            first_seen: dt_secs(now),
            last_seen: dt_secs(now),
            is_active: true,
        })
    }

    async fn get_session_by_fingerprint(&self, fingerprint: &str) -> Result<Session, StoreError> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {} FROM sessions WHERE fingerprint=?",
            SESSION_COLS
        ))
        .bind(fingerprint)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        match row {
            None => Err(StoreError::NotFound),
            Some(row) => session_from_row(row),
        }
    }

    async fn touch_session(&self, fingerprint: &str) -> Result<(), StoreError> {
        let res = sqlx::query("UPDATE sessions SET last_seen=? WHERE fingerprint=?")
            .bind(Utc::now().timestamp())
            .bind(fingerprint)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn end_session(&self, fingerprint: &str) -> Result<(), StoreError> {
        let res = sqlx::query("UPDATE sessions SET is_active=0 WHERE fingerprint=?")
            .bind(fingerprint)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn list_sessions(&self, invite_hash: Option<&str>) -> Result<Vec<Session>, StoreError> {
        let rows = match invite_hash {
            Some(hash) => {
                sqlx::query_as::<_, SessionRow>(&format!(
                    "SELECT {} FROM sessions WHERE invite_hash=? ORDER BY first_seen DESC, id DESC",
                    SESSION_COLS
                ))
                .bind(hash)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query_as::<_, SessionRow>(&format!(
                    "SELECT {} FROM sessions ORDER BY first_seen DESC, id DESC",
                    SESSION_COLS
                ))
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        rows.into_iter().map(session_from_row).collect()
    }

    // ──────────────────────────────── IP bindings ──────────────────────────────

    async fn bind_ip(&self, invite_hash: &str, ip: &str) -> Result<IpBinding, StoreError> {
        // First writer wins; losers fall through to the read below.
        sqlx::query(
            "INSERT INTO ip_bindings(invite_hash,bound_ip,bound_at) VALUES(?,?,?)
             ON CONFLICT(invite_hash) DO NOTHING",
        )
        .bind(invite_hash)
        .bind(ip)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        self.get_ip_binding(invite_hash).await
    }

    async fn get_ip_binding(&self, invite_hash: &str) -> Result<IpBinding, StoreError> {
        let row = sqlx::query_as::<_, (String, String, i64)>(
            "SELECT invite_hash,bound_ip,bound_at FROM ip_bindings WHERE invite_hash=?",
        )
        .bind(invite_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        match row {
            None => Err(StoreError::NotFound),
            Some((invite_hash, bound_ip, bound_at)) => Ok(IpBinding {
                invite_hash,
                bound_ip,
                bound_at: dt_secs(bound_at),
            }),
        }
    }

    async fn clear_ip_binding(&self, invite_hash: &str) -> Result<(), StoreError> {
        let res = sqlx::query("DELETE FROM ip_bindings WHERE invite_hash=?")
            .bind(invite_hash)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    // ──────────────────────────────── Admin keys ───────────────────────────────

    async fn add_admin_key(&self, params: &CreateAdminKeyParams) -> Result<AdminKey, StoreError> {
        let id = Uuid::now_v7();
        let created_at = Utc::now().timestamp();
        sqlx::query("INSERT INTO admin_keys(id,public_key,name,created_at) VALUES(?,?,?,?)")
            .bind(id.to_string())
            .bind(&params.public_key)
            .bind(&params.name)
            .bind(created_at)
            .execute(&self.pool)
            .await
            .map_err(unique_or_backend)?;

        Ok(AdminKey {
            id: AdminKeyId(id),
            public_key: params.public_key.clone(),
            name: params.name.clone(),
            is_active: true,
            created_at: dt_secs(created_at),
        })
    }

    async fn get_admin_key(&self, public_key: &str) -> Result<AdminKey, StoreError> {
        let row = sqlx::query_as::<_, (String, String, Option<String>, i64, i64)>(
            "SELECT id,public_key,name,is_active,created_at FROM admin_keys WHERE public_key=?",
        )
        .bind(public_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        match row {
            None => Err(StoreError::NotFound),
            Some((id, public_key, name, is_active, created_at)) => Ok(AdminKey {
                id: AdminKeyId(parse_uuid(&id)?),
                public_key,
                name,
                is_active: is_active != 0,
                created_at: dt_secs(created_at),
            }),
        }
    }

    async fn list_admin_keys(&self) -> Result<Vec<AdminKey>, StoreError> {
        let rows = sqlx::query_as::<_, (String, String, Option<String>, i64, i64)>(
            "SELECT id,public_key,name,is_active,created_at FROM admin_keys
             ORDER BY created_at DESC, id DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        let mut out = Vec::with_capacity(rows.len());
        for (id, public_key, name, is_active, created_at) in rows {
            out.push(AdminKey {
                id: AdminKeyId(parse_uuid(&id)?),
                public_key,
                name,
                is_active: is_active != 0,
                created_at: dt_secs(created_at),
            });
        }
        Ok(out)
    }

    async fn set_admin_key_active(
        &self,
        public_key: &str,
        active: bool,
    ) -> Result<(), StoreError> {
        let res = sqlx::query("UPDATE admin_keys SET is_active=? WHERE public_key=?")
            .bind(active as i64)
            .bind(public_key)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    // ─────────────────────────────── Leak tracking ─────────────────────────────

    async fn record_leak_track(
        &self,
        params: &CreateLeakTrackParams,
    ) -> Result<LeakTrack, StoreError> {
        let id = Uuid::now_v7();
        let accessed_at = Utc::now().timestamp();
        sqlx::query(
            "INSERT INTO leak_tracks(id,fingerprint,resource,signature,ip_address,user_agent,accessed_at)
             VALUES(?,?,?,?,?,?,?)",
        )
        .bind(id.to_string())
        .bind(&params.fingerprint)
        .bind(&params.resource)
        .bind(&params.signature)
        .bind(&params.ip_address)
        .bind(&params.user_agent)
        .bind(accessed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(LeakTrack {
            id: LeakTrackId(id),
            fingerprint: params.fingerprint.clone(),
            resource: params.resource.clone(),
            signature: params.signature.clone(),
            ip_address: params.ip_address.clone(),
            user_agent: params.user_agent.clone(),
            accessed_at: dt_secs(accessed_at),
        })
    }

    async fn list_leak_tracks_by_signature(
        &self,
        signature: &str,
    ) -> Result<Vec<LeakTrack>, StoreError> {
        let rows = sqlx::query_as::<_, (String, String, String, String, String, String, i64)>(
            "SELECT id,fingerprint,resource,signature,ip_address,user_agent,accessed_at
             FROM leak_tracks WHERE signature=? ORDER BY accessed_at DESC, id DESC",
        )
        .bind(signature)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        leak_tracks_from_rows(rows)
    }

    async fn list_leak_tracks(&self, limit: u32) -> Result<Vec<LeakTrack>, StoreError> {
        let rows = sqlx::query_as::<_, (String, String, String, String, String, String, i64)>(
            "SELECT id,fingerprint,resource,signature,ip_address,user_agent,accessed_at
             FROM leak_tracks ORDER BY accessed_at DESC, id DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        leak_tracks_from_rows(rows)
    }
}

fn leak_tracks_from_rows(
    rows: Vec<(String, String, String, String, String, String, i64)>,
) -> Result<Vec<LeakTrack>, StoreError> {
    let mut out = Vec::with_capacity(rows.len());
    for (id, fingerprint, resource, signature, ip_address, user_agent, accessed_at) in rows {
        out.push(LeakTrack {
            id: LeakTrackId(parse_uuid(&id)?),
            fingerprint,
            resource,
            signature,
            ip_address,
            user_agent,
            accessed_at: dt_secs(accessed_at),
        });
    }
    Ok(out)
}

// ─────────────────────────────────── AuditLog ──────────────────────────────────

// (id, timestamp, event_type, invite_hash, session_fingerprint, ip_address, user_agent, details)
type AuditRow = (
    String,
    i64,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
);

const AUDIT_COLS: &str =
    "id,timestamp,event_type,invite_hash,session_fingerprint,ip_address,user_agent,details";

fn audit_event_from_row(row: AuditRow) -> Result<AuditEvent, AuditLogError> {
    let (id, timestamp, event_type, invite_hash, session_fingerprint, ip_address, user_agent, details) =
        row;
    let id: AuditLogId = id
        .parse()
        .map_err(|e: uuid::Error| AuditLogError::Database(e.to_string()))?;
    let event_type: AuditEventType = event_type.parse().map_err(AuditLogError::Database)?;
    let details = match details {
        None => Default::default(),
        Some(json) => serde_json::from_str(&json).map_err(|e| AuditLogError::Database(e.to_string()))?,
    };
    Ok(AuditEvent {
        id,
        timestamp: dt_millis(timestamp),
        event_type,
        invite_hash,
        session_fingerprint,
        ip_address,
        user_agent,
        details,
    })
}

/// Append WHERE clauses for the filter; bind order must match [`bind_filter`].
fn filter_sql(filter: &AuditLogFilter, sql: &mut String) {
    if filter.event_type.is_some() {
        sql.push_str(" AND event_type=?");
    }
    if filter.invite_hash.is_some() {
        sql.push_str(" AND invite_hash=?");
    }
    if filter.session_fingerprint.is_some() {
        sql.push_str(" AND session_fingerprint=?");
    }
    if filter.from.is_some() {
        sql.push_str(" AND timestamp>=?");
    }
    if filter.to.is_some() {
        sql.push_str(" AND timestamp<?");
    }
}

fn bind_filter<'q, O>(
    mut q: sqlx::query::QueryAs<'q, sqlx::Sqlite, O, sqlx::sqlite::SqliteArguments<'q>>,
    filter: &'q AuditLogFilter,
) -> sqlx::query::QueryAs<'q, sqlx::Sqlite, O, sqlx::sqlite::SqliteArguments<'q>> {
    if let Some(t) = &filter.event_type {
        q = q.bind(t.to_string());
    }
    if let Some(h) = &filter.invite_hash {
        q = q.bind(h.as_str());
    }
    if let Some(f) = &filter.session_fingerprint {
        q = q.bind(f.as_str());
    }
    if let Some(from) = &filter.from {
        q = q.bind(from.timestamp_millis());
    }
    if let Some(to) = &filter.to {
        q = q.bind(to.timestamp_millis());
    }
    q
}

#[async_trait::async_trait]
impl AuditLog for SqliteStore {
    async fn record(&self, event: AuditEvent) -> Result<(), AuditLogError> {
        let details = if event.details.is_empty() {
            None
        } else {
            Some(
                serde_json::to_string(&event.details)
                    .map_err(|e| AuditLogError::Database(e.to_string()))?,
            )
        };

        sqlx::query(&format!(
            "INSERT INTO audit_logs({}) VALUES(?,?,?,?,?,?,?,?)",
            AUDIT_COLS
        ))
        .bind(event.id.to_string())
        .bind(event.timestamp.timestamp_millis())
        .bind(event.event_type.to_string())
        .bind(&event.invite_hash)
        .bind(&event.session_fingerprint)
        .bind(&event.ip_address)
        .bind(&event.user_agent)
        .bind(details)
        .execute(&self.pool)
        .await
        .map_err(|e| AuditLogError::Database(e.to_string()))?;

        Ok(())
    }

    async fn query(&self, filter: AuditLogFilter) -> Result<Vec<AuditEvent>, AuditLogError> {
        let mut sql = format!("SELECT {} FROM audit_logs WHERE 1=1", AUDIT_COLS);
        filter_sql(&filter, &mut sql);
        sql.push_str(" ORDER BY timestamp DESC, id DESC");
        sql.push_str(&format!(" LIMIT {}", filter.limit.unwrap_or(100)));
        if let Some(offset) = filter.offset {
            sql.push_str(&format!(" OFFSET {}", offset));
        }

        let q = sqlx::query_as::<_, AuditRow>(&sql);
        let rows = bind_filter(q, &filter)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AuditLogError::Database(e.to_string()))?;

        rows.into_iter().map(audit_event_from_row).collect()
    }

    async fn get(&self, id: AuditLogId) -> Result<AuditEvent, AuditLogError> {
        let row = sqlx::query_as::<_, AuditRow>(&format!(
            "SELECT {} FROM audit_logs WHERE id=?",
            AUDIT_COLS
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AuditLogError::Database(e.to_string()))?;

        match row {
            None => Err(AuditLogError::NotFound(id)),
            Some(row) => audit_event_from_row(row),
        }
    }

    async fn count(&self, filter: AuditLogFilter) -> Result<u64, AuditLogError> {
        let mut sql = String::from("SELECT COUNT(*) FROM audit_logs WHERE 1=1");
        filter_sql(&filter, &mut sql);

        let q = sqlx::query_as::<_, (i64,)>(&sql);
        let (count,) = bind_filter(q, &filter)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AuditLogError::Database(e.to_string()))?;

        Ok(count as u64)
    }
}
