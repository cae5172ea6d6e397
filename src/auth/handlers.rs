use axum::{
    extract::{FromRef, State},
    http::StatusCode,
    routing::{get, patch, post},
    Json, Router,
};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{error, info, instrument, warn};

use crate::{
    auth::{
        dto::{
            ChangePasswordRequest, LoginRequest, LoginResponse, MessageResponse, ProfileResponse,
            PublicUser, SignupRequest, SignupResponse,
        },
        extractors::AuthUser,
        jwt::JwtKeys,
        password::{hash_password, verify_password},
        repo_types::User,
    },
    error::ApiError,
    state::AppState,
};

const MIN_PASSWORD_LEN: usize = 8;

pub fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/signup", post(signup))
        .route("/login", post(login))
}

pub fn protected_routes() -> Router<AppState> {
    Router::new()
        .route("/profile", get(profile))
        .route("/change-password", patch(change_password))
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

#[instrument(skip(state, payload))]
pub async fn signup(
    State(state): State<AppState>,
    Json(mut payload): Json<SignupRequest>,
) -> Result<(StatusCode, Json<SignupResponse>), ApiError> {
    payload.email = normalize_email(&payload.email);

    if !is_valid_email(&payload.email) {
        warn!(email = %payload.email, "invalid email");
        return Err(ApiError::Validation("Invalid email".into()));
    }
    if payload.password.len() < MIN_PASSWORD_LEN {
        warn!("password too short");
        return Err(ApiError::Validation("Password too short".into()));
    }

    // Best-effort pre-check; the unique constraint settles genuine races
    match User::find_by_email(&state.db, &payload.email).await {
        Ok(Some(_)) => {
            warn!(email = %payload.email, "email already registered");
            return Err(ApiError::Conflict);
        }
        Ok(None) => {}
        Err(e) => {
            error!(error = %e, "find_by_email failed");
            return Err(e.into());
        }
    }

    let hash = hash_password(&payload.password)?;
    let user = User::create(&state.db, &payload.email, &hash).await?;

    info!(user_id = %user.id, email = %user.email, "user signed up");
    Ok((
        StatusCode::CREATED,
        Json(SignupResponse {
            message: "Signup successful".into(),
            user: PublicUser {
                id: user.id,
                email: user.email,
            },
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(mut payload): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    payload.email = normalize_email(&payload.email);

    if !is_valid_email(&payload.email) {
        warn!(email = %payload.email, "invalid email");
        return Err(ApiError::Validation("Invalid email".into()));
    }

    // Unknown email and wrong password share one response: no hint which
    // part was wrong. Status stays 200 to match the public contract.
    let no_match = || {
        Json(LoginResponse {
            message: "Invalid email or password".into(),
            access_token: None,
        })
    };

    let user = match User::find_by_email(&state.db, &payload.email).await {
        Ok(Some(u)) => u,
        Ok(None) => {
            warn!(email = %payload.email, "login unknown email");
            return Ok(no_match());
        }
        Err(e) => {
            error!(error = %e, "find_by_email failed");
            return Err(e.into());
        }
    };

    if !verify_password(&payload.password, &user.password_hash)? {
        warn!(user_id = %user.id, "login invalid password");
        return Ok(no_match());
    }

    let keys = JwtKeys::from_ref(&state);
    let token = keys.sign(user.id, &user.email)?;

    info!(user_id = %user.id, email = %user.email, "user logged in");
    Ok(Json(LoginResponse {
        message: "Login successful".into(),
        access_token: Some(token),
    }))
}

#[instrument(skip(state))]
pub async fn profile(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<ProfileResponse>, ApiError> {
    let user = User::find_by_id(&state.db, user_id)
        .await?
        .ok_or_else(|| {
            warn!(user_id = %user_id, "profile user gone");
            ApiError::NotFound
        })?;

    Ok(Json(ProfileResponse {
        message: "Authenticated".into(),
        user: PublicUser {
            id: user.id,
            email: user.email,
        },
    }))
}

/// Gate for a password change against the stored hash: wrong current
/// password, new == current, and too-short new password all refuse.
fn check_password_change(
    stored_hash: &str,
    current_password: &str,
    new_password: &str,
) -> Result<(), ApiError> {
    if !verify_password(current_password, stored_hash)? {
        return Err(ApiError::InvalidCredential);
    }
    if new_password == current_password {
        return Err(ApiError::SameValue);
    }
    if new_password.len() < MIN_PASSWORD_LEN {
        return Err(ApiError::Validation("Password too short".into()));
    }
    Ok(())
}

#[instrument(skip(state, payload))]
pub async fn change_password(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<ChangePasswordRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let user = User::find_by_id(&state.db, user_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    check_password_change(
        &user.password_hash,
        &payload.current_password,
        &payload.new_password,
    )
    .map_err(|e| {
        warn!(user_id = %user.id, error = %e, "change password refused");
        e
    })?;

    let new_hash = hash_password(&payload.new_password)?;
    User::update_password_hash(&state.db, user.id, &new_hash).await?;

    info!(user_id = %user.id, "password changed");
    Ok(Json(MessageResponse {
        message: "Password changed successfully".into(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_email_trims_and_lowercases() {
        assert_eq!(normalize_email(" Alice@Example.COM "), "alice@example.com");
    }

    #[test]
    fn valid_email_accepts_basic_format() {
        assert!(is_valid_email("a@example.com"));
        assert!(is_valid_email("name.surname@example.co"));
    }

    #[test]
    fn valid_email_rejects_garbage() {
        assert!(!is_valid_email("not-an-email"));
        assert!(!is_valid_email("a@b"));
        assert!(!is_valid_email("two words@example.com"));
        assert!(!is_valid_email(""));
    }

    #[test]
    fn password_change_accepts_correct_current_and_fresh_new() {
        let hash = hash_password("old-password").unwrap();
        assert!(check_password_change(&hash, "old-password", "new-password").is_ok());
    }

    #[test]
    fn password_change_rejects_wrong_current_password() {
        let hash = hash_password("old-password").unwrap();
        let err = check_password_change(&hash, "guessed-wrong", "new-password").unwrap_err();
        assert!(matches!(err, ApiError::InvalidCredential));
    }

    #[test]
    fn password_change_same_value_always_fails() {
        let hash = hash_password("old-password").unwrap();
        // Correct current password: the no-op is refused as such
        let err = check_password_change(&hash, "old-password", "old-password").unwrap_err();
        assert!(matches!(err, ApiError::SameValue));
        // Wrong current password with the same value still fails
        let err = check_password_change(&hash, "guessed-wrong", "guessed-wrong").unwrap_err();
        assert!(matches!(err, ApiError::InvalidCredential));
    }

    #[test]
    fn password_change_rejects_short_new_password() {
        let hash = hash_password("old-password").unwrap();
        let err = check_password_change(&hash, "old-password", "tiny").unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }
}
