//! Admin authentication middleware.
//!
//! This middleware guards the `/jarvis` inspection routes with HTTP Basic auth:
//! 1. Extract the credentials from the Authorization header
//! 2. Compare them with the configured admin credentials
//! 3. Inject the admin identity into the request
//! 4. Reject everything else with HTTP 401 and a Basic challenge

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use base64::{Engine, engine::general_purpose::STANDARD};
use sha2::{Digest, Sha256};

use crate::{config::AdminCredentials, error::AppError, state::AppState};

/// Identity attached to authenticated admin requests.
#[derive(Debug, Clone)]
pub struct AdminContext {
    pub user: String,
}

/// Basic auth middleware function.
///
/// # Headers
///
/// Expected header format:
/// ```text
/// Authorization: Basic base64(user:password)
/// ```
///
/// # Returns
///
/// - `Ok(Response)` if the credentials match (calls next handler)
/// - `Err(AppError::AdminUnauthorized)` otherwise, including when no admin is configured
pub async fn admin_auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let expected = state.admin.as_ref().ok_or(AppError::AdminUnauthorized)?;

    let (user, password) = request
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(parse_basic)
        .ok_or(AppError::AdminUnauthorized)?;

    if !credentials_match(expected, &user, &password) {
        tracing::warn!(user = %user, "Rejected admin login");
        return Err(AppError::AdminUnauthorized);
    }

    request.extensions_mut().insert(AdminContext { user });

    Ok(next.run(request).await)
}

/// Decode `Basic <base64(user:password)>`.
fn parse_basic(header: &str) -> Option<(String, String)> {
    let encoded = header.strip_prefix("Basic ")?;
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, password) = decoded.split_once(':')?;

    Some((user.to_string(), password.to_string()))
}

/// Compare SHA-256 digests so the comparison time does not depend on where the inputs differ.
fn credentials_match(expected: &AdminCredentials, user: &str, password: &str) -> bool {
    let digest = |value: &str| Sha256::digest(value.as_bytes());

    let user_ok = digest(&expected.user) == digest(user);
    let password_ok = digest(&expected.password) == digest(password);
    user_ok & password_ok
}

#[cfg(test)]
mod tests {
    use super::*;

    fn admin() -> AdminCredentials {
        AdminCredentials {
            user: "root".to_string(),
            password: "s3cret:with-colon".to_string(),
        }
    }

    #[test]
    fn parses_basic_header() {
        let header = format!("Basic {}", STANDARD.encode("root:s3cret:with-colon"));

        assert_eq!(
            parse_basic(&header),
            Some(("root".to_string(), "s3cret:with-colon".to_string()))
        );
        assert_eq!(parse_basic("Bearer abc"), None);
        assert_eq!(parse_basic("Basic !!!"), None);
        assert_eq!(parse_basic(&format!("Basic {}", STANDARD.encode("nocolon"))), None);
    }

    #[test]
    fn matches_only_exact_credentials() {
        let admin = admin();

        assert!(credentials_match(&admin, "root", "s3cret:with-colon"));
        assert!(!credentials_match(&admin, "root", "s3cret"));
        assert!(!credentials_match(&admin, "Root", "s3cret:with-colon"));
    }
}
