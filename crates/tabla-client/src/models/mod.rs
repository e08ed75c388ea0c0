//! Wire types of the remote API.

mod auth;
mod restaurant;
mod slots;
mod user;

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

pub use auth::{AuthResponse, Credentials, Registration, TokenGrant};
pub use restaurant::{Restaurant, RestaurantFilters, Review};
pub use slots::{TimeSlot, TimeSlotPeriods, flatten_time_slots};
pub use user::User;

/// Resource identifier. The API sends either strings or integers; both
/// are kept as their string form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Id(String);

impl Id {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Id {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Id {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl<'de> Deserialize<'de> for Id {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Text(String),
            Int(i64),
        }

        Ok(match RawId::deserialize(deserializer)? {
            RawId::Text(s) => Id(s),
            RawId::Int(n) => Id(n.to_string()),
        })
    }
}

/// The one list envelope the API uses: `{"results": [...], "count": n}`.
///
/// Bare arrays or other wrappers are decode errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListEnvelope<T> {
    pub results: Vec<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_accepts_strings_and_integers() {
        let a: Id = serde_json::from_str("\"abc\"").unwrap();
        let b: Id = serde_json::from_str("42").unwrap();
        assert_eq!(a.as_str(), "abc");
        assert_eq!(b.as_str(), "42");
        assert_eq!(serde_json::to_string(&b).unwrap(), "\"42\"");
    }

    #[test]
    fn test_envelope_rejects_other_shapes() {
        let ok: ListEnvelope<u32> =
            serde_json::from_str(r#"{"results": [1, 2], "count": 2}"#).unwrap();
        assert_eq!(ok.results, vec![1, 2]);
        assert_eq!(ok.count, Some(2));

        assert!(serde_json::from_str::<ListEnvelope<u32>>("[1, 2]").is_err());
        assert!(serde_json::from_str::<ListEnvelope<u32>>(r#"{"data": [1, 2]}"#).is_err());
    }
}
