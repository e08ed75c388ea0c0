//! Query Cache: keyed request/response caching with staleness and GC
//! windows, request coalescing, retries, prefix invalidation and
//! auto-refresh of mounted queries.

mod cache;
mod refresh;
mod retry;

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::ApiError;

pub use cache::{Loader, QueryCache, QueryHandle, typed_loader};
pub use refresh::AutoRefresh;
pub use retry::{RetryDecision, RetryPolicy};

/// Cache key: a resource path followed by sorted query parameters.
///
/// Keys compare segment by segment, so `restaurants/list` is a prefix of
/// `restaurants/list/city=Lisbon` but not of `restaurants/listing`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey {
    segments: Vec<String>,
}

impl QueryKey {
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            segments: vec![resource.into()],
        }
    }

    pub fn segment(mut self, segment: impl fmt::Display) -> Self {
        self.segments.push(segment.to_string());
        self
    }

    /// Append `key=value` parameters in sorted order.
    pub fn params<K, V>(mut self, params: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: fmt::Display,
    {
        let mut pairs: Vec<(String, String)> = params
            .into_iter()
            .map(|(k, v)| (k.into(), v.to_string()))
            .collect();
        pairs.sort();
        self.segments
            .extend(pairs.into_iter().map(|(k, v)| format!("{k}={v}")));
        self
    }

    pub fn starts_with(&self, prefix: &QueryKey) -> bool {
        self.segments.starts_with(&prefix.segments)
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}

/// State of a mounted query as seen by its observers.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum QueryState {
    #[default]
    Idle,
    Loading,
    Success(Arc<Value>),
    Error(ApiError),
}

impl QueryState {
    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }

    pub fn value(&self) -> Option<&Arc<Value>> {
        match self {
            Self::Success(v) => Some(v),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&ApiError> {
        match self {
            Self::Error(e) => Some(e),
            _ => None,
        }
    }

    /// Typed view of the loaded data.
    pub fn data<T: DeserializeOwned>(&self) -> Option<Result<T, ApiError>> {
        self.value().map(|v| decode(v))
    }
}

/// Application lifecycle signals that trigger re-validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// The window regained focus.
    Focus,
    /// Network connectivity came back.
    Reconnect,
}

impl std::str::FromStr for LifecycleEvent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "focus" => Ok(Self::Focus),
            "reconnect" | "online" => Ok(Self::Reconnect),
            other => Err(format!("unknown lifecycle event '{other}'")),
        }
    }
}

pub(crate) fn decode<T: DeserializeOwned>(value: &Value) -> Result<T, ApiError> {
    T::deserialize(value).map_err(|e| ApiError::decode(e.to_string()))
}
