use std::fmt;

use serde::{Deserialize, Serialize};

use super::User;

/// Login request body.
#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Registration request body.
#[derive(Clone, Serialize, Deserialize)]
pub struct Registration {
    pub name: String,
    pub email: String,
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("name", &self.name)
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("phone", &self.phone)
            .finish()
    }
}

/// Response of login and registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResponse {
    pub token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Access token lifetime in seconds.
    #[serde(default)]
    pub expires_in: Option<u64>,
    pub user: User,
}

impl AuthResponse {
    pub fn grant(&self) -> TokenGrant {
        TokenGrant {
            token: self.token.clone(),
            refresh_token: self.refresh_token.clone(),
            expires_in: self.expires_in,
        }
    }
}

/// Response of a token refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenGrant {
    pub token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_passwords() {
        let creds = Credentials::new("a@b.c", "hunter2");
        let out = format!("{creds:?}");
        assert!(!out.contains("hunter2"));
        assert!(out.contains("a@b.c"));
    }

    #[test]
    fn test_auth_response_optional_fields() {
        let resp: AuthResponse = serde_json::from_str(
            r#"{"token": "t", "user": {"id": 1, "name": "A", "email": "a@b.c"}}"#,
        )
        .unwrap();
        assert_eq!(resp.refresh_token, None);
        assert_eq!(resp.expires_in, None);
        assert_eq!(resp.grant().token, "t");
    }
}
