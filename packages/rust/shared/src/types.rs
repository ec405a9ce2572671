//! Core domain types for node enrichment.
//!
//! The backend owns every record here; the pipeline only holds a transient
//! copy for one run. Wire names follow the backend's camelCase JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use url::Url;
use uuid::Uuid;

use crate::error::{EnricherError, Result};

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Backend identifier of a node.
    NodeId
);
string_id!(
    /// Identifier of the user that owns a set of nodes.
    UserId
);
string_id!(
    /// Backend identifier of a webpage record.
    WebpageId
);

/// A UUID v7 tagging one pipeline invocation in logs (time-sortable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// WebpageUrl
// ---------------------------------------------------------------------------

/// A company or profile URL in canonical form.
///
/// Canonical means: http(s) scheme, lowercase host, no query, no fragment,
/// no trailing slash. Two spellings of the same page normalize equal, which
/// is what keeps webpage records unique per URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct WebpageUrl(String);

impl WebpageUrl {
    /// Normalize a raw URL. A missing scheme is treated as `https`.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(EnricherError::validation("empty URL"));
        }
        let with_scheme = if raw.contains("://") {
            raw.to_string()
        } else {
            format!("https://{raw}")
        };

        let mut url = Url::parse(&with_scheme)
            .map_err(|e| EnricherError::validation(format!("invalid URL '{raw}': {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(EnricherError::validation(format!(
                "unsupported URL scheme '{}'",
                url.scheme()
            )));
        }
        if url.host_str().is_none() {
            return Err(EnricherError::validation(format!("URL '{raw}' has no host")));
        }
        url.set_query(None);
        url.set_fragment(None);

        let mut s = url.to_string();
        while s.ends_with('/') {
            s.pop();
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Identity of the profile this URL points at, lowercased.
    ///
    /// LinkedIn member URLs reduce to their `/in/<handle>` handle, so they
    /// compare equal to a stored username. Any other URL keeps its host
    /// (without `www.`) and full path. A bare host has no identity.
    pub fn profile_identity(&self) -> Option<String> {
        let url = Url::parse(&self.0).ok()?;
        let host = url.host_str()?;
        let host = host.strip_prefix("www.").unwrap_or(host);
        let segments: Vec<String> = url
            .path_segments()
            .map(|segs| segs.filter(|s| !s.is_empty()).map(str::to_lowercase).collect())
            .unwrap_or_default();

        let linkedin = host == "linkedin.com" || host.ends_with(".linkedin.com");
        if let (true, [first, handle, ..]) = (linkedin, segments.as_slice()) {
            if first == "in" {
                return Some(handle.clone());
            }
        }
        if segments.is_empty() {
            return None;
        }
        Some(format!("{host}/{}", segments.join("/")))
    }
}

impl std::fmt::Display for WebpageUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// Lifecycle status of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    #[default]
    Pending,
    Processing,
    Complete,
    Error,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Complete => "complete",
            Self::Error => "error",
        }
    }
}

/// A skill as stored on a node.
///
/// Older records store bare strings; those deserialize with no description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Skill {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl<'de> Deserialize<'de> for Skill {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Name(String),
            Full {
                name: String,
                #[serde(default)]
                description: Option<String>,
            },
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Name(name) => Skill {
                name,
                description: None,
            },
            Raw::Full { name, description } => Skill { name, description },
        })
    }
}

/// An organization mentioned in a generated description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub name: String,
    #[serde(default)]
    pub synonyms: Vec<String>,
}

/// One position in a node's work history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkExperience {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_logo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Set once the company's webpage record is resolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webpage_id: Option<WebpageId>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One entry in a node's education history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Education {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub school: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub school_logo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degree: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// A scraped profile record as the backend serves it.
///
/// Fields the pipeline does not interpret are kept in `extra` so a node can
/// be merged or re-sent without losing data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    #[serde(rename = "_id", alias = "id", alias = "nodeId")]
    pub id: NodeId,
    #[serde(default)]
    pub user_id: UserId,
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: NodeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linkedin_username: Option<String>,
    #[serde(
        default,
        alias = "linkedinUrl",
        skip_serializing_if = "Option::is_none"
    )]
    pub profile_url: Option<String>,
    /// Inline HTML, when the record already carries it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    /// Object storage key of the raw HTML.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_path: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub api_scraped: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub about: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linkedin_headline: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub work_experience: Vec<WorkExperience>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub education: Vec<Education>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_location: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub skills: Vec<Skill>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub organizations: Vec<Organization>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description_generated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Node {
    /// Inline HTML if present and non-blank.
    pub fn inline_html(&self) -> Option<&str> {
        self.html.as_deref().filter(|h| !h.trim().is_empty())
    }

    /// Storage key of the raw HTML if present and non-blank.
    pub fn storage_key(&self) -> Option<&str> {
        self.html_path.as_deref().map(str::trim).filter(|k| !k.is_empty())
    }
}

// ---------------------------------------------------------------------------
// Webpage
// ---------------------------------------------------------------------------

/// Canonical record for one company or page URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Webpage {
    #[serde(rename = "_id", alias = "id")]
    pub id: WebpageId,
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ---------------------------------------------------------------------------
// Mutations
// ---------------------------------------------------------------------------

/// A partial node update: fields to set and fields to remove.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodePatch {
    #[serde(default)]
    pub set: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unset: Vec<String>,
}

impl NodePatch {
    /// A patch that only moves the node to `status`.
    pub fn status(status: NodeStatus) -> Self {
        let mut patch = Self::default();
        patch.set_field("status", Value::String(status.as_str().into()));
        patch
    }

    pub fn set_field(&mut self, key: impl Into<String>, value: Value) -> &mut Self {
        self.set.insert(key.into(), value);
        self
    }

    pub fn unset_field(&mut self, key: impl Into<String>) -> &mut Self {
        self.unset.push(key.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.unset.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Generation output
// ---------------------------------------------------------------------------

/// Structured output of the description generator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeneratedDescription {
    pub description: String,
    #[serde(default)]
    pub skills: Vec<Skill>,
    #[serde(default)]
    pub organizations: Vec<Organization>,
}

/// A skills vector as written to the index.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingRecord {
    pub node_id: NodeId,
    pub vector: Vec<f32>,
    /// Normalized, sorted, deduplicated skill names.
    pub skills: Vec<String>,
    /// Cache key derived from `skills`.
    pub cache_key: String,
}

// ---------------------------------------------------------------------------
// Invocation
// ---------------------------------------------------------------------------

/// Message returned when an event lacks its identifiers.
pub const MISSING_IDS_MESSAGE: &str = "nodeId and userId required";

/// The ids an invocation event carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationEvent {
    pub node_id: NodeId,
    pub user_id: UserId,
}

impl InvocationEvent {
    /// Extract ids from a raw event.
    ///
    /// Accepts ids at the top level or under `body`, where `body` may be an
    /// object or a JSON-encoded string. Body keys win.
    pub fn from_value(event: &Value) -> Result<Self> {
        let body = match event.get("body") {
            Some(Value::String(s)) => serde_json::from_str::<Value>(s).ok(),
            Some(v @ Value::Object(_)) => Some(v.clone()),
            _ => None,
        };

        let pick = |key: &str| -> Option<String> {
            body.as_ref()
                .and_then(|b| b.get(key))
                .or_else(|| event.get(key))
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
        };

        match (pick("nodeId"), pick("userId")) {
            (Some(node_id), Some(user_id)) => Ok(Self {
                node_id: NodeId::new(node_id),
                user_id: UserId::new(user_id),
            }),
            _ => Err(EnricherError::Payload(MISSING_IDS_MESSAGE.into())),
        }
    }
}

/// Extra detail attached to a response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunDetails {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changed_fields: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged_from_node_id: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl RunDetails {
    pub fn is_empty(&self) -> bool {
        self.changed_fields.is_empty() && self.merged_from_node_id.is_none() && self.note.is_none()
    }
}

/// Body of an invocation response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseBody {
    pub node_id: String,
    pub user_id: String,
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_node_id: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deduplicated: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skipped: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub webpage_ids: Vec<WebpageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<RunDetails>,
}

/// What an invocation returns to its caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationResponse {
    pub status_code: u16,
    pub body: ResponseBody,
}

impl InvocationResponse {
    /// A coherent pipeline result, successful or not.
    pub fn completed(body: ResponseBody) -> Self {
        Self {
            status_code: 200,
            body,
        }
    }

    /// A failure before a pipeline result could be built.
    pub fn malformed(event: &Value, message: impl Into<String>) -> Self {
        let raw = |key: &str| {
            event
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        Self {
            status_code: 500,
            body: ResponseBody {
                node_id: raw("nodeId"),
                user_id: raw("userId"),
                success: false,
                message: message.into(),
                ..Default::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn node_parses_backend_shape() {
        let raw = json!({
            "_id": "n1",
            "userId": "u1",
            "status": "pending",
            "name": "Ada Lovelace",
            "htmlPath": "profiles/n1.html",
            "createdAt": "2024-03-01T10:00:00Z",
            "workExperience": [{"companyName": "Analytical Engines", "companyUrl": "https://ae.example"}],
            "skills": ["Mathematics", {"name": "Programming", "description": "first program"}],
            "education": null,
            "connections": 500
        });
        let node: Node = serde_json::from_value(raw).expect("deserialize node");
        assert_eq!(node.id.as_str(), "n1");
        assert_eq!(node.storage_key(), Some("profiles/n1.html"));
        assert_eq!(node.skills.len(), 2);
        assert_eq!(node.skills[0].description, None);
        assert!(node.education.is_empty());
        assert_eq!(node.extra.get("connections"), Some(&json!(500)));

        let back = serde_json::to_value(&node).expect("serialize node");
        assert_eq!(back["_id"], "n1");
        assert_eq!(back["connections"], 500);
    }

    #[test]
    fn webpage_url_normalization() {
        let a = WebpageUrl::parse("https://Example.COM/about/?utm=x#team").expect("parse");
        let b = WebpageUrl::parse("example.com/about").expect("parse");
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "https://example.com/about");
        assert_eq!(a.profile_identity().as_deref(), Some("example.com/about"));

        assert!(WebpageUrl::parse("").is_err());
        assert!(WebpageUrl::parse("ftp://example.com/file").is_err());
    }

    #[test]
    fn bare_host_has_no_identity() {
        let url = WebpageUrl::parse("https://example.com/").expect("parse");
        assert_eq!(url.as_str(), "https://example.com");
        assert_eq!(url.profile_identity(), None);
    }

    #[test]
    fn profile_identity_keeps_host_and_path() {
        let identity = |raw: &str| {
            WebpageUrl::parse(raw)
                .expect("parse")
                .profile_identity()
                .expect("identity")
        };

        assert_eq!(identity("https://www.linkedin.com/in/Jane-Doe/"), "jane-doe");
        assert_eq!(identity("uk.linkedin.com/in/jane-doe/recent-activity/all/"), "jane-doe");
        assert_ne!(
            identity("linkedin.com/in/jane-doe/recent-activity/all/"),
            identity("linkedin.com/in/john-smith/recent-activity/all/")
        );
        assert_eq!(identity("https://www.github.com/John"), "github.com/john");
        assert_ne!(identity("github.com/john"), identity("example.org/team/john"));
        assert_eq!(identity("linkedin.com/company/acme"), "linkedin.com/company/acme");
    }

    #[test]
    fn event_ids_from_top_level_and_body() {
        let top = json!({"nodeId": "n1", "userId": "u1"});
        let ev = InvocationEvent::from_value(&top).expect("top-level");
        assert_eq!(ev.node_id, NodeId::from("n1"));

        let string_body = json!({"body": "{\"nodeId\":\"n2\",\"userId\":\"u2\"}"});
        let ev = InvocationEvent::from_value(&string_body).expect("string body");
        assert_eq!(ev.node_id.as_str(), "n2");
        assert_eq!(ev.user_id.as_str(), "u2");

        let mixed = json!({"nodeId": "top", "userId": "u1", "body": {"nodeId": "inner"}});
        let ev = InvocationEvent::from_value(&mixed).expect("mixed");
        assert_eq!(ev.node_id.as_str(), "inner");
        assert_eq!(ev.user_id.as_str(), "u1");
    }

    #[test]
    fn event_without_ids_is_rejected() {
        let err = InvocationEvent::from_value(&json!({"nodeId": "  "})).unwrap_err();
        assert_eq!(err.to_string(), format!("invalid payload: {MISSING_IDS_MESSAGE}"));
    }

    #[test]
    fn status_patch_shape() {
        let patch = NodePatch::status(NodeStatus::Processing);
        let v = serde_json::to_value(&patch).expect("serialize");
        assert_eq!(v, json!({"set": {"status": "processing"}}));
    }

    #[test]
    fn response_omits_unknown_passthrough_fields() {
        let resp = InvocationResponse::completed(ResponseBody {
            node_id: "n1".into(),
            user_id: "u1".into(),
            success: true,
            message: "ok".into(),
            ..Default::default()
        });
        let v = serde_json::to_value(&resp).expect("serialize");
        assert_eq!(v["statusCode"], 200);
        assert!(v["body"].get("skipped").is_none());
        assert!(v["body"].get("webpageIds").is_none());
    }
}
