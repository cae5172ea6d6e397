use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Request body for user registration.
#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
}

/// Request body for login.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Request body for password change.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

/// Public part of the user returned to the client.
#[derive(Debug, Serialize)]
pub struct PublicUser {
    pub id: Uuid,
    pub email: String,
}

/// Response returned after a successful signup.
#[derive(Debug, Serialize)]
pub struct SignupResponse {
    pub message: String,
    pub user: PublicUser,
}

/// Response returned by login. `access_token` is absent on a
/// non-matching-credentials result.
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

/// Response returned by the profile endpoint.
#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub message: String,
    pub user: PublicUser,
}

/// Bare message response (password change).
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_failure_body_has_no_token_field() {
        let res = LoginResponse {
            message: "Invalid email or password".into(),
            access_token: None,
        };
        let json = serde_json::to_string(&res).unwrap();
        assert!(!json.contains("access_token"));
    }

    #[test]
    fn change_password_body_is_camel_case() {
        let body: ChangePasswordRequest = serde_json::from_str(
            r#"{"currentPassword":"old-pass","newPassword":"new-pass"}"#,
        )
        .unwrap();
        assert_eq!(body.current_password, "old-pass");
        assert_eq!(body.new_password, "new-pass");
    }

    #[test]
    fn public_user_serialization() {
        let user = PublicUser {
            id: Uuid::new_v4(),
            email: "test@example.com".to_string(),
        };
        let json = serde_json::to_string(&user).unwrap();
        assert!(json.contains("test@example.com"));
        assert!(json.contains("id"));
    }
}
