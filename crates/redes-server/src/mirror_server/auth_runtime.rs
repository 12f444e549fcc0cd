//! Password digests and bearer-session bookkeeping for the mirror server.

use super::*;

/// Mutable auth state shared across request handlers.
#[derive(Debug, Default)]
pub(super) struct AuthRuntimeState {
    pub(super) sessions: BTreeMap<String, SessionState>,
    pub(super) total_sessions_issued: u64,
    pub(super) auth_failures: u64,
}

#[derive(Debug, Clone)]
pub(super) struct SessionState {
    pub(super) email: String,
    pub(super) role: String,
    pub(super) expires_unix_ms: u64,
    pub(super) last_seen_unix_ms: u64,
    pub(super) request_count: u64,
}

/// Identity attached to a request that presented a valid session token.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub email: String,
    pub role: String,
}

/// Counters surfaced on the health endpoint.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub(super) struct AuthStatusReport {
    pub(super) session_ttl_seconds: u64,
    pub(super) active_sessions: usize,
    pub(super) total_sessions_issued: u64,
    pub(super) auth_failures: u64,
    pub(super) last_activity_unix_ms: u64,
}

pub(super) fn collect_auth_status_report(state: &ServerState) -> AuthStatusReport {
    if let Ok(runtime) = state.auth_runtime.lock() {
        return AuthStatusReport {
            session_ttl_seconds: state.config.session_ttl_seconds,
            active_sessions: runtime.sessions.len(),
            total_sessions_issued: runtime.total_sessions_issued,
            auth_failures: runtime.auth_failures,
            last_activity_unix_ms: runtime
                .sessions
                .values()
                .map(|session| session.last_seen_unix_ms)
                .max()
                .unwrap_or(0),
        };
    }

    AuthStatusReport {
        session_ttl_seconds: state.config.session_ttl_seconds,
        ..AuthStatusReport::default()
    }
}

pub(super) fn bearer_token_from_headers(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        return None;
    }
    Some(token.to_string())
}

pub(super) fn note_auth_failure(state: &ServerState) {
    if let Ok(mut runtime) = state.auth_runtime.lock() {
        runtime.auth_failures = runtime.auth_failures.saturating_add(1);
    }
}

/// Resolves the bearer token in `headers` to a live session.
///
/// Expired sessions are pruned on every call so the session map never grows
/// past the set of tokens that could still authenticate.
pub(super) fn authorize_request(
    state: &ServerState,
    headers: &HeaderMap,
) -> Result<AuthSession, MirrorApiError> {
    let Some(token) = bearer_token_from_headers(headers) else {
        note_auth_failure(state);
        return Err(MirrorApiError::unauthorized());
    };
    let now_unix_ms = current_unix_timestamp_ms();
    let mut runtime = state
        .auth_runtime
        .lock()
        .map_err(|_| MirrorApiError::internal("auth state lock poisoned"))?;
    runtime
        .sessions
        .retain(|_, session| session.expires_unix_ms > now_unix_ms);
    let Some(session) = runtime.sessions.get_mut(&token) else {
        runtime.auth_failures = runtime.auth_failures.saturating_add(1);
        return Err(MirrorApiError::unauthorized());
    };
    session.last_seen_unix_ms = now_unix_ms;
    session.request_count = session.request_count.saturating_add(1);
    Ok(AuthSession {
        email: session.email.clone(),
        role: session.role.clone(),
    })
}

pub(super) fn issue_session_token(
    state: &ServerState,
    user: &User,
) -> Result<SessionTokenResponse, MirrorApiError> {
    let now_unix_ms = current_unix_timestamp_ms();
    let ttl_ms = state
        .config
        .session_ttl_seconds
        .saturating_mul(1_000)
        .max(1_000);
    let expires_unix_ms = now_unix_ms.saturating_add(ttl_ms);
    let token = derive_session_token(&user.email, now_unix_ms, state.next_sequence());
    let mut runtime = state
        .auth_runtime
        .lock()
        .map_err(|_| MirrorApiError::internal("auth state lock poisoned"))?;
    runtime
        .sessions
        .retain(|_, session| session.expires_unix_ms > now_unix_ms);
    runtime.sessions.insert(
        token.clone(),
        SessionState {
            email: user.email.clone(),
            role: user.role.clone(),
            expires_unix_ms,
            last_seen_unix_ms: now_unix_ms,
            request_count: 0,
        },
    );
    runtime.total_sessions_issued = runtime.total_sessions_issued.saturating_add(1);
    Ok(SessionTokenResponse {
        access_token: token,
        token_type: "bearer",
        expires_unix_ms,
        expires_in_seconds: ttl_ms / 1_000,
    })
}

fn derive_session_token(email: &str, now_unix_ms: u64, sequence: u64) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let seed = format!(
        "{email}:{now_unix_ms}:{sequence}:{}:{nanos}",
        std::process::id()
    );
    let digest_hex = format!("{:x}", Sha256::digest(seed.as_bytes()));
    format!("redes_sess_{}", &digest_hex[..32])
}

/// Produces a `salt$digest` credential string for storage.
pub(super) fn hash_password(password: &str) -> String {
    let salt = derive_salt();
    let digest = password_digest(&salt, password);
    format!("{salt}${digest}")
}

pub(super) fn verify_password(password: &str, stored: &str) -> bool {
    let Some((salt, digest)) = stored.split_once('$') else {
        return false;
    };
    timing_safe_equal(password_digest(salt, password).as_bytes(), digest.as_bytes())
}

fn password_digest(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b"$");
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn derive_salt() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let seed = format!("redes-password-salt:{}:{nanos}", std::process::id());
    let digest_hex = format!("{:x}", Sha256::digest(seed.as_bytes()));
    digest_hex[..16].to_string()
}

fn timing_safe_equal(left: &[u8], right: &[u8]) -> bool {
    if left.len() != right.len() {
        return false;
    }
    let mut diff = 0u8;
    for (a, b) in left.iter().zip(right.iter()) {
        diff |= a ^ b;
    }
    diff == 0
}
