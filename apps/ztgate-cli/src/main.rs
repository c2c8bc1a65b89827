use std::sync::Arc;

use chrono::Duration;
use clap::{Parser, Subcommand};

use ztgate_audit::{AuditEventType, AuditLog, AuditLogFilter};
use ztgate_core::{DeliveryTokens, InviteRegistry, LeakTracker, TokenRedemption};
use ztgate_crypto::Keypair;
use ztgate_storage::{CreateAdminKeyParams, Store, StoreError};
use ztgate_store_sqlite::SqliteStore;

// ────────────────────────────────────── CLI Types ──────────────────────────────────────

#[derive(Parser)]
#[command(name = "ztgate")]
#[command(about = "Zero-trust invite gate administration CLI")]
struct Cli {
    /// SQLite database URL (defaults to ~/.ztgate/store.db)
    #[arg(long, env = "ZTGATE_DATABASE_URL")]
    database_url: Option<String>,

    /// Issuer signing key, hex-encoded (required for invite creation)
    #[arg(long, env = "ZTGATE_SIGNING_KEY")]
    signing_key: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a new issuer or operator keypair
    Keygen {
        /// Print only the secret key, for piping into config
        #[arg(long)]
        plain: bool,
    },
    /// Invite commands
    Invite {
        #[command(subcommand)]
        invite_cmd: InviteCommand,
    },
    /// IP binding commands
    Binding {
        #[command(subcommand)]
        binding_cmd: BindingCommand,
    },
    /// Session commands
    Session {
        #[command(subcommand)]
        session_cmd: SessionCommand,
    },
    /// Operator key commands
    Admin {
        #[command(subcommand)]
        admin_cmd: AdminCommand,
    },
    /// Audit log commands
    Audit {
        #[command(subcommand)]
        audit_cmd: AuditCommand,
    },
    /// Leak tracking commands
    Leaks {
        #[command(subcommand)]
        leaks_cmd: LeaksCommand,
    },
}

#[derive(Subcommand)]
enum InviteCommand {
    /// Create a signed invite for an email address
    Create {
        /// Recipient email
        email: String,
        /// Hours until the invite expires (omit for no expiry)
        #[arg(long)]
        expires_hours: Option<i64>,
        /// Print only the invite hash and signature
        #[arg(long)]
        plain: bool,
    },
    /// List all invites
    List,
    /// Revoke an invite (deactivates, keeps the row)
    Revoke {
        /// Invite hash
        invite_hash: String,
    },
    /// Mint a one-time delivery token for an invite
    Token {
        /// Invite hash
        invite_hash: String,
        /// Minutes until the token expires
        #[arg(long, default_value_t = ztgate_core::invites::DEFAULT_TOKEN_TTL_MINUTES)]
        ttl_minutes: i64,
    },
    /// Redeem a one-time delivery token
    Redeem {
        /// Token
        token: String,
    },
}

#[derive(Subcommand)]
enum BindingCommand {
    /// Show the IP binding for an invite
    Show {
        /// Invite hash
        invite_hash: String,
    },
    /// Clear the IP binding (recipient legitimately moved)
    Clear {
        /// Invite hash
        invite_hash: String,
    },
}

#[derive(Subcommand)]
enum SessionCommand {
    /// List sessions
    List {
        /// Only sessions for this invite
        #[arg(long)]
        invite_hash: Option<String>,
    },
    /// End a session
    End {
        /// Session fingerprint
        fingerprint: String,
    },
}

#[derive(Subcommand)]
enum AdminCommand {
    /// Register an operator public key
    AddKey {
        /// Hex-encoded Ed25519 public key
        public_key: String,
        /// Human-readable label
        #[arg(long)]
        name: Option<String>,
    },
    /// List operator keys
    ListKeys,
    /// Revoke an operator key
    RevokeKey {
        /// Hex-encoded Ed25519 public key
        public_key: String,
    },
}

#[derive(Subcommand)]
enum AuditCommand {
    /// List audit log entries, newest first
    List {
        /// Filter by event type (e.g. ip_mismatch, session_created)
        #[arg(long)]
        event_type: Option<String>,
        /// Filter by invite hash
        #[arg(long)]
        invite_hash: Option<String>,
        /// Maximum entries to show
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },
}

#[derive(Subcommand)]
enum LeaksCommand {
    /// List canary hits
    List {
        /// Only hits carrying this canary signature
        #[arg(long)]
        signature: Option<String>,
        /// Maximum entries to show
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },
}

// ────────────────────────────────────── Helpers ──────────────────────────────────────

async fn open_store(database_url: Option<&str>) -> Result<Arc<SqliteStore>, StoreError> {
    let store = match database_url {
        Some(url) => SqliteStore::open(url).await?,
        None => SqliteStore::open_default().await?,
    };
    Ok(Arc::new(store))
}

fn issuer_keypair(signing_key: Option<&str>) -> Result<Keypair, Box<dyn std::error::Error>> {
    let hex = signing_key.ok_or("signing key required: set --signing-key or ZTGATE_SIGNING_KEY")?;
    Ok(Keypair::from_secret_hex(hex)?)
}

fn registry(store: Arc<SqliteStore>, keypair: Keypair) -> InviteRegistry {
    InviteRegistry::new(store.clone(), store, keypair)
}

// ────────────────────────────────────── Commands ──────────────────────────────────────

fn cmd_keygen(plain: bool) {
    let keypair = Keypair::generate();
    if plain {
        println!("{}", keypair.secret_key_hex());
    } else {
        println!("✓ Keypair generated\n");
        println!("Secret key: {}", keypair.secret_key_hex());
        println!("Public key: {}", keypair.public_key_hex());
        println!("\nKeep the secret key private; register only the public key.");
    }
}

async fn cmd_invite_create(
    store: Arc<SqliteStore>,
    keypair: Keypair,
    email: &str,
    expires_hours: Option<i64>,
    plain: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let registry = registry(store, keypair);
    let ttl = expires_hours.map(Duration::hours);
    let invite = registry.create(email, ttl).await?;

    if plain {
        println!("{} {}", invite.invite_hash, invite.signature);
    } else {
        println!("✓ Invite created\n");
        println!("Email:     {}", invite.email);
        println!("Hash:      {}", invite.invite_hash);
        println!("Signature: {}", invite.signature);
        match invite.expires_at {
            Some(expires_at) => println!("Expires:   {}", expires_at),
            None => println!("Expires:   never"),
        }
    }
    Ok(())
}

async fn cmd_invite_list(store: Arc<SqliteStore>) -> Result<(), Box<dyn std::error::Error>> {
    let invites = store.list_invites().await?;
    if invites.is_empty() {
        println!("No invites found.");
        return Ok(());
    }
    for invite in invites {
        let status = if !invite.is_active {
            "revoked"
        } else if invite.used {
            "used"
        } else {
            "pending"
        };
        println!("Hash:    {}", invite.invite_hash);
        println!("Email:   {}", invite.email);
        println!("Status:  {}", status);
        println!("Created: {}", invite.created_at);
        if let Some(used_at) = invite.used_at {
            println!("Used at: {}", used_at);
        }
        println!();
    }
    Ok(())
}

async fn cmd_invite_revoke(
    store: Arc<SqliteStore>,
    invite_hash: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    store.set_invite_active(invite_hash, false).await?;
    println!("✓ Invite revoked");
    Ok(())
}

async fn cmd_invite_token(
    store: Arc<SqliteStore>,
    invite_hash: &str,
    ttl_minutes: i64,
) -> Result<(), Box<dyn std::error::Error>> {
    let tokens = DeliveryTokens::new(store);
    let token = tokens
        .issue(invite_hash, Duration::minutes(ttl_minutes))
        .await?;
    println!("✓ One-time token created\n");
    println!("Token:   {}", token.token);
    println!("Expires: {}", token.expires_at);
    println!("\n⚠️  The token is consumed on first redemption");
    Ok(())
}

async fn cmd_invite_redeem(
    store: Arc<SqliteStore>,
    token: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let tokens = DeliveryTokens::new(store);
    match tokens.redeem(token).await? {
        TokenRedemption::Redeemed(invite) => {
            println!("✓ Token redeemed\n");
            println!("Hash:      {}", invite.invite_hash);
            println!("Signature: {}", invite.signature);
        }
        TokenRedemption::Gone => println!("Token already used or expired."),
        TokenRedemption::NotFound => println!("No such token."),
    }
    Ok(())
}

async fn cmd_binding_show(
    store: Arc<SqliteStore>,
    invite_hash: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    match store.get_ip_binding(invite_hash).await {
        Ok(binding) => {
            println!("Bound IP: {}", binding.bound_ip);
            println!("Bound at: {}", binding.bound_at);
        }
        Err(StoreError::NotFound) => println!("No binding; the invite has not been used yet."),
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

async fn cmd_binding_clear(
    store: Arc<SqliteStore>,
    invite_hash: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    store.clear_ip_binding(invite_hash).await?;
    println!("✓ Binding cleared; next use re-binds to its origin IP");
    Ok(())
}

async fn cmd_session_list(
    store: Arc<SqliteStore>,
    invite_hash: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let sessions = store.list_sessions(invite_hash).await?;
    if sessions.is_empty() {
        println!("No sessions found.");
        return Ok(());
    }
    for session in sessions {
        println!("Fingerprint: {}", session.fingerprint);
        println!("Invite:      {}", session.invite_hash);
        println!("IP:          {}", session.ip_address);
        println!("User agent:  {}", session.user_agent);
        println!("First seen:  {}", session.first_seen);
        println!("Last seen:   {}", session.last_seen);
        println!("Active:      {}", session.is_active);
        println!();
    }
    Ok(())
}

async fn cmd_session_end(
    store: Arc<SqliteStore>,
    fingerprint: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    store.end_session(fingerprint).await?;
    println!("✓ Session ended");
    Ok(())
}

async fn cmd_admin_add_key(
    store: Arc<SqliteStore>,
    public_key: &str,
    name: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let key = store
        .add_admin_key(&CreateAdminKeyParams {
            public_key: public_key.to_string(),
            name: name.map(|s| s.to_string()),
        })
        .await?;
    println!("✓ Operator key registered ({})", key.name.as_deref().unwrap_or("unnamed"));
    Ok(())
}

async fn cmd_admin_list_keys(store: Arc<SqliteStore>) -> Result<(), Box<dyn std::error::Error>> {
    let keys = store.list_admin_keys().await?;
    if keys.is_empty() {
        println!("No operator keys registered.");
        return Ok(());
    }
    for key in keys {
        println!("Public key: {}", key.public_key);
        println!("Name:       {}", key.name.as_deref().unwrap_or("-"));
        println!("Active:     {}", key.is_active);
        println!("Added:      {}", key.created_at);
        println!();
    }
    Ok(())
}

async fn cmd_admin_revoke_key(
    store: Arc<SqliteStore>,
    public_key: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    store.set_admin_key_active(public_key, false).await?;
    println!("✓ Operator key revoked");
    Ok(())
}

async fn cmd_audit_list(
    store: Arc<SqliteStore>,
    event_type: Option<&str>,
    invite_hash: Option<&str>,
    limit: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut filter = AuditLogFilter::new().limit(limit);
    if let Some(s) = event_type {
        filter = filter.event_type(s.parse::<AuditEventType>()?);
    }
    if let Some(h) = invite_hash {
        filter = filter.invite_hash(h);
    }

    let total = store.count(filter.clone()).await?;
    let events = store.query(filter).await?;
    if events.is_empty() {
        println!("No audit log entries found.");
        return Ok(());
    }

    println!("Audit logs ({} of {} total):\n", events.len(), total);
    for event in events {
        println!("ID:        {}", event.id);
        println!("Timestamp: {}", event.timestamp);
        println!("Event:     {}", event.event_type);
        if let Some(hash) = &event.invite_hash {
            println!("Invite:    {}", hash);
        }
        if let Some(fp) = &event.session_fingerprint {
            println!("Session:   {}", fp);
        }
        if let Some(ip) = &event.ip_address {
            println!("IP:        {}", ip);
        }
        for (key, value) in &event.details {
            println!("  {}: {}", key, value);
        }
        println!();
    }
    Ok(())
}

async fn cmd_leaks_list(
    store: Arc<SqliteStore>,
    signature: Option<&str>,
    limit: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    let tracker = LeakTracker::new(store.clone(), store);
    let hits = match signature {
        Some(sig) => tracker.hits_for_signature(sig).await?,
        None => tracker.recent(limit).await?,
    };
    if hits.is_empty() {
        println!("No canary hits recorded.");
        return Ok(());
    }
    for hit in hits {
        println!("Signature:   {}", hit.signature);
        println!("Resource:    {}", hit.resource);
        println!("Fingerprint: {}", hit.fingerprint);
        println!("IP:          {}", hit.ip_address);
        println!("User agent:  {}", hit.user_agent);
        println!("Accessed:    {}", hit.accessed_at);
        println!();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    // keygen needs no database
    if let Command::Keygen { plain } = &cli.command {
        cmd_keygen(*plain);
        return Ok(());
    }

    let store = open_store(cli.database_url.as_deref()).await?;

    match cli.command {
        Command::Keygen { .. } => unreachable!("handled above"),
        Command::Invite { invite_cmd } => match invite_cmd {
            InviteCommand::Create {
                email,
                expires_hours,
                plain,
            } => {
                let keypair = issuer_keypair(cli.signing_key.as_deref())?;
                cmd_invite_create(store, keypair, &email, expires_hours, plain).await?;
            }
            InviteCommand::List => {
                cmd_invite_list(store).await?;
            }
            InviteCommand::Revoke { invite_hash } => {
                cmd_invite_revoke(store, &invite_hash).await?;
            }
            InviteCommand::Token {
                invite_hash,
                ttl_minutes,
            } => {
                cmd_invite_token(store, &invite_hash, ttl_minutes).await?;
            }
            InviteCommand::Redeem { token } => {
                cmd_invite_redeem(store, &token).await?;
            }
        },
        Command::Binding { binding_cmd } => match binding_cmd {
            BindingCommand::Show { invite_hash } => {
                cmd_binding_show(store, &invite_hash).await?;
            }
            BindingCommand::Clear { invite_hash } => {
                cmd_binding_clear(store, &invite_hash).await?;
            }
        },
        Command::Session { session_cmd } => match session_cmd {
            SessionCommand::List { invite_hash } => {
                cmd_session_list(store, invite_hash.as_deref()).await?;
            }
            SessionCommand::End { fingerprint } => {
                cmd_session_end(store, &fingerprint).await?;
            }
        },
        Command::Admin { admin_cmd } => match admin_cmd {
            AdminCommand::AddKey { public_key, name } => {
                cmd_admin_add_key(store, &public_key, name.as_deref()).await?;
            }
            AdminCommand::ListKeys => {
                cmd_admin_list_keys(store).await?;
            }
            AdminCommand::RevokeKey { public_key } => {
                cmd_admin_revoke_key(store, &public_key).await?;
            }
        },
        Command::Audit { audit_cmd } => match audit_cmd {
            AuditCommand::List {
                event_type,
                invite_hash,
                limit,
            } => {
                cmd_audit_list(store, event_type.as_deref(), invite_hash.as_deref(), limit).await?;
            }
        },
        Command::Leaks { leaks_cmd } => match leaks_cmd {
            LeaksCommand::List { signature, limit } => {
                cmd_leaks_list(store, signature.as_deref(), limit).await?;
            }
        },
    }

    Ok(())
}
