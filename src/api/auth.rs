//! Authentication middleware and helpers
//!
//! Callers are profiles holding a bearer token `<profile_id>.<secret>`. Only
//! an Argon2 hash of the secret is stored. The admin surface requires one of
//! `ADMIN_ROLES`; cron endpoints authenticate with `CRON_SECRET` instead.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::FromRow;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use ts_rs::TS;

use super::AppState;
use crate::config::AppConfig;
use crate::constants::{is_admin_role, is_valid_role};
use crate::db::audit::{self, AuditEntry};
use crate::db::Database;
use crate::error::{AppError, AppResult};

/// Role given to the profile created by `/api/auth/setup`
const SETUP_ROLE: &str = "super_admin";

/// Callers of this path may use the cron secret instead of a profile token
const EVENTS_PATH: &str = "/api/agents/events";

#[derive(Debug, Clone, FromRow, Serialize, TS)]
#[ts(export, export_to = "auth/")]
pub struct Profile {
    pub id: String,
    pub display_name: String,
    pub role: String,
    #[serde(skip)]
    pub token_hash: String,
    pub created_at: DateTime<Utc>,
}

impl Profile {
    pub fn is_admin(&self) -> bool {
        is_admin_role(&self.role)
    }
}

/// Who made the request, inserted by the middleware
#[derive(Debug, Clone)]
pub enum Caller {
    Profile(Profile),
    CronSecret,
}

impl Caller {
    /// Profile id for audit rows
    pub fn profile_id(&self) -> Option<&str> {
        match self {
            Caller::Profile(profile) => Some(&profile.id),
            Caller::CronSecret => None,
        }
    }

    /// Reviewer name recorded on proposals
    pub fn reviewer(&self) -> String {
        match self {
            Caller::Profile(profile) => profile.id.clone(),
            Caller::CronSecret => "cron".to_string(),
        }
    }
}

/// Generate a random token secret
pub fn generate_secret() -> String {
    let secret: [u8; 32] = rand::thread_rng().gen();
    hex::encode(secret)
}

fn hash_secret(secret: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(secret.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::unknown(format!("Failed to hash token: {}", e)))
}

fn verify_secret(secret: &str, stored_hash: &str) -> bool {
    match PasswordHash::new(stored_hash) {
        Ok(parsed) => Argon2::default().verify_password(secret.as_bytes(), &parsed).is_ok(),
        Err(e) => {
            tracing::warn!(error = %e, "Invalid stored token hash");
            false
        }
    }
}

pub async fn count_profiles(db: &Database) -> AppResult<i64> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM profiles")
        .fetch_one(db.pool())
        .await?;
    Ok(count)
}

/// Create a profile and return it with its (only ever shown once) token
pub async fn create_profile(
    db: &Database,
    display_name: &str,
    role: &str,
    now: DateTime<Utc>,
) -> AppResult<(Profile, String)> {
    insert_profile(db, display_name, role, false, now)
        .await?
        .ok_or_else(|| AppError::unknown("Profile insert affected no rows"))
}

/// Create the first profile; `None` when any profile already exists
pub async fn create_first_profile(
    db: &Database,
    display_name: &str,
    now: DateTime<Utc>,
) -> AppResult<Option<(Profile, String)>> {
    insert_profile(db, display_name, SETUP_ROLE, true, now).await
}

async fn insert_profile(
    db: &Database,
    display_name: &str,
    role: &str,
    first_only: bool,
    now: DateTime<Utc>,
) -> AppResult<Option<(Profile, String)>> {
    let display_name = display_name.trim();
    if display_name.is_empty() {
        return Err(AppError::invalid_params("display_name is required"));
    }
    if !is_valid_role(role) {
        return Err(AppError::invalid_params(format!("Unknown role \"{}\"", role)));
    }

    let id = uuid::Uuid::new_v4().to_string();
    let secret = generate_secret();
    let token_hash = hash_secret(&secret)?;

    // Single statement so concurrent setups cannot both see an empty table
    let sql = if first_only {
        "INSERT INTO profiles (id, display_name, role, token_hash, created_at) \
         SELECT ?, ?, ?, ?, ? WHERE NOT EXISTS (SELECT 1 FROM profiles)"
    } else {
        "INSERT INTO profiles (id, display_name, role, token_hash, created_at) VALUES (?, ?, ?, ?, ?)"
    };
    let result = sqlx::query(sql)
        .bind(&id)
        .bind(display_name)
        .bind(role)
        .bind(&token_hash)
        .bind(now)
        .execute(db.pool())
        .await?;
    if result.rows_affected() == 0 {
        return Ok(None);
    }

    tracing::info!(profile_id = %id, role, "Profile created");
    let profile = Profile {
        id: id.clone(),
        display_name: display_name.to_string(),
        role: role.to_string(),
        token_hash,
        created_at: now,
    };
    Ok(Some((profile, format!("{}.{}", id, secret))))
}

/// Resolve a bearer token to its profile
pub async fn authenticate(db: &Database, token: &str) -> AppResult<Option<Profile>> {
    let Some((profile_id, secret)) = token.split_once('.') else {
        return Ok(None);
    };

    let profile = sqlx::query_as::<_, Profile>("SELECT * FROM profiles WHERE id = ?")
        .bind(profile_id)
        .fetch_optional(db.pool())
        .await?;

    Ok(profile.filter(|p| verify_secret(secret, &p.token_hash)))
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Cron callers: unset secret is a server misconfiguration, a wrong one is 401
pub fn require_cron_secret(config: &AppConfig, headers: &HeaderMap) -> AppResult<()> {
    let Some(secret) = config.cron_secret.as_deref() else {
        tracing::error!("CRON_SECRET not configured");
        return Err(AppError::config("Server configuration error"));
    };
    if !bearer_token(headers).is_some_and(|token| secrets_match(token, secret)) {
        tracing::warn!("Unauthorized cron attempt");
        return Err(AppError::unauthorized("Unauthorized"));
    }
    Ok(())
}

/// Constant-time comparison for shared secrets
fn secrets_match(given: &str, expected: &str) -> bool {
    given.as_bytes().ct_eq(expected.as_bytes()).into()
}

fn is_public(path: &str) -> bool {
    path == "/api/health" || path.starts_with("/api/auth/") || path.starts_with("/api/cron/")
}

/// Authentication middleware
///
/// Requires an admin profile token on every route except the health check,
/// `/api/auth/*` and `/api/cron/*`. The events endpoint also accepts the cron
/// secret.
pub async fn auth_middleware(State(state): State<Arc<AppState>>, mut request: Request<Body>, next: Next) -> Response {
    let path = request.uri().path().to_string();
    if is_public(&path) {
        return next.run(request).await;
    }

    let services = &state.services;
    let token = bearer_token(request.headers()).map(str::to_string);
    let caller = match token.as_deref() {
        None => return AppError::unauthorized("Authentication required").into_response(),
        Some(token)
            if path == EVENTS_PATH
                && services
                    .config
                    .cron_secret
                    .as_deref()
                    .is_some_and(|secret| secrets_match(token, secret)) =>
        {
            Caller::CronSecret
        }
        Some(token) => match authenticate(&services.db, token).await {
            Ok(Some(profile)) if profile.is_admin() => Caller::Profile(profile),
            Ok(Some(profile)) => {
                tracing::warn!(profile_id = %profile.id, role = %profile.role, path = %path, "Forbidden");
                return AppError::forbidden("Admin role required").into_response();
            }
            Ok(None) => return AppError::unauthorized("Invalid token").into_response(),
            Err(e) => return e.into_response(),
        },
    };

    request.extensions_mut().insert(caller);
    next.run(request).await
}

// Auth route handlers

#[derive(Deserialize)]
pub struct SetupRequest {
    display_name: String,
}

#[derive(Serialize)]
pub struct ProfileWithToken {
    profile: Profile,
    token: String,
}

/// Create the first administrator. Refused once any profile exists.
pub async fn setup(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SetupRequest>,
) -> AppResult<(StatusCode, Json<serde_json::Value>)> {
    let db = &state.services.db;
    let Some((profile, token)) = create_first_profile(db, &req.display_name, Utc::now()).await? else {
        return Err(AppError::conflict("Setup already completed"));
    };
    audit::record(
        db,
        AuditEntry {
            action: "profile.created",
            entity_type: "profiles",
            entity_id: Some(&profile.id),
            actor_profile_id: None,
            metadata: json!({"role": profile.role, "via": "setup"}),
        },
        Utc::now(),
    )
    .await;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "data": ProfileWithToken { profile, token } })),
    ))
}

/// Current profile; authenticates itself since `/api/auth/*` skips the middleware
pub async fn me(State(state): State<Arc<AppState>>, headers: HeaderMap) -> AppResult<Json<Profile>> {
    let token = bearer_token(&headers).ok_or_else(|| AppError::unauthorized("Authentication required"))?;
    authenticate(&state.services.db, token)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::unauthorized("Invalid token"))
}

#[derive(Deserialize)]
pub struct CreateProfileRequest {
    display_name: String,
    role: String,
}

/// Admin-only: create another profile
pub async fn create_profile_handler(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Json(req): Json<CreateProfileRequest>,
) -> AppResult<(StatusCode, Json<serde_json::Value>)> {
    let db = &state.services.db;
    let (profile, token) = create_profile(db, &req.display_name, &req.role, Utc::now()).await?;
    audit::record(
        db,
        AuditEntry {
            action: "profile.created",
            entity_type: "profiles",
            entity_id: Some(&profile.id),
            actor_profile_id: caller.profile_id(),
            metadata: json!({"role": profile.role}),
        },
        Utc::now(),
    )
    .await;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "data": ProfileWithToken { profile, token } })),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_profile_tokens() {
        let db = Database::in_memory().await.unwrap();
        let (profile, token) = create_profile(&db, "Dr. Reyes", "admin", Utc::now()).await.unwrap();
        assert!(token.starts_with(&format!("{}.", profile.id)));

        let found = authenticate(&db, &token).await.unwrap().unwrap();
        assert_eq!(found.id, profile.id);
        assert!(found.is_admin());

        let forged = format!("{}.{}", profile.id, generate_secret());
        assert!(authenticate(&db, &forged).await.unwrap().is_none());
        assert!(authenticate(&db, "no-dot-here").await.unwrap().is_none());
        assert!(authenticate(&db, "missing.secret").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_profile_validates_input() {
        let db = Database::in_memory().await.unwrap();
        assert!(create_profile(&db, "x", "root", Utc::now()).await.is_err());
        assert!(create_profile(&db, "  ", "user", Utc::now()).await.is_err());
        assert_eq!(count_profiles(&db).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_first_profile_only_once() {
        let db = Database::in_memory().await.unwrap();
        let (profile, _) = create_first_profile(&db, "Dr. Reyes", Utc::now()).await.unwrap().unwrap();
        assert_eq!(profile.role, SETUP_ROLE);

        assert!(create_first_profile(&db, "Dr. Okafor", Utc::now()).await.unwrap().is_none());
        assert_eq!(count_profiles(&db).await.unwrap(), 1);

        create_profile(&db, "Front desk", "user", Utc::now()).await.unwrap();
        assert_eq!(count_profiles(&db).await.unwrap(), 2);
    }

    #[test]
    fn test_secrets_match() {
        assert!(secrets_match("s3cret", "s3cret"));
        assert!(!secrets_match("s3cre", "s3cret"));
        assert!(!secrets_match("s3cret!", "s3cret"));
        assert!(!secrets_match("", "s3cret"));
    }

    #[test]
    fn test_cron_secret() {
        let mut headers = HeaderMap::new();
        let unset = AppConfig::default();
        assert_eq!(
            require_cron_secret(&unset, &headers).unwrap_err().code.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );

        let config = AppConfig {
            cron_secret: Some("s3cret".to_string()),
            ..AppConfig::default()
        };
        assert_eq!(
            require_cron_secret(&config, &headers).unwrap_err().code.status(),
            StatusCode::UNAUTHORIZED
        );
        headers.insert("authorization", "Bearer s3cret".parse().unwrap());
        assert!(require_cron_secret(&config, &headers).is_ok());
    }

    #[test]
    fn test_public_paths() {
        assert!(is_public("/api/health"));
        assert!(is_public("/api/auth/setup"));
        assert!(is_public("/api/cron/agent-dispatcher"));
        assert!(!is_public("/api/agents"));
        assert!(!is_public(EVENTS_PATH));
    }
}
