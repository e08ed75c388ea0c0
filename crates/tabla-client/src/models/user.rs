use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::Id;

/// Profile of the signed-in user.
///
/// Fields the client does not read are preserved in `extra` so a stored
/// copy round-trips without loss.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Id,
    #[serde(default)]
    pub name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl User {
    /// Name to greet the user with; falls back to the email's local part.
    pub fn display_name(&self) -> &str {
        if !self.name.trim().is_empty() {
            &self.name
        } else {
            self.email.split('@').next().unwrap_or(&self.email)
        }
    }
}
