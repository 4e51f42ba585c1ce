//! Predefined entity schemas and their typed payloads.
//!
//! Each schema is built once, on first use, and shared for the life of the
//! process.

use std::sync::LazyLock;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::schema::{Field, FieldKind, Format, Schema};
use crate::sanitize::{CAPTION_MAX_CHARS, FILENAME_MAX_CHARS};

/// Largest page a caller may request.
pub const MAX_PAGE_LIMIT: u32 = 100;
/// Page size when the caller does not ask for one.
pub const DEFAULT_PAGE_LIMIT: u32 = 20;

/// Supported publishing platforms.
pub const PLATFORMS: &[&str] = &[
    "instagram",
    "facebook",
    "twitter",
    "linkedin",
    "tiktok",
    "pinterest",
];

/// Supported proxy protocols.
pub const PROXY_PROTOCOLS: &[&str] = &["http", "https", "socks5"];

/// Accepted upload media types.
pub const MEDIA_TYPES: &[&str] = &["image/jpeg", "image/png", "image/gif", "image/webp", "video/mp4"];

/// Largest accepted upload, in bytes.
pub const MAX_UPLOAD_BYTES: u64 = 100 * 1024 * 1024;

static ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,128}$").expect("id pattern is valid"));

static TIMEZONE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_]+(?:/[A-Za-z0-9_+-]+)*$").expect("timezone pattern is valid")
});

static COLOR_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#[0-9a-fA-F]{6}$").expect("color pattern is valid"));

static HOST_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9](?:[A-Za-z0-9.-]{0,251}[A-Za-z0-9])?$").expect("host pattern is valid")
});

fn identifier() -> FieldKind {
    FieldKind::string().pattern(ID_PATTERN.clone()).into()
}

/// A typed payload bound to its schema.
pub trait Payload: DeserializeOwned + Send + 'static {
    /// The schema the raw payload is validated against.
    fn schema() -> &'static Schema;
}

/// A single resource identifier.
pub static IDENTIFIER_SCHEMA: LazyLock<Schema> =
    LazyLock::new(|| Schema::new("identifier").field(Field::required("id", identifier())));

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identifier {
    pub id: String,
}

impl Payload for Identifier {
    fn schema() -> &'static Schema {
        &IDENTIFIER_SCHEMA
    }
}

/// A post's content: optional caption, required image URL.
pub static CONTENT_SCHEMA: LazyLock<Schema> = LazyLock::new(|| {
    Schema::new("content")
        .field(Field::optional(
            "caption",
            FieldKind::string().format(Format::Caption),
        ))
        .field(Field::required(
            "imageUrl",
            FieldKind::string().format(Format::Url).max_len(2048),
        ))
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    pub image_url: String,
}

impl Payload for ContentPayload {
    fn schema() -> &'static Schema {
        &CONTENT_SCHEMA
    }
}

/// List pagination.
pub static PAGINATION_SCHEMA: LazyLock<Schema> = LazyLock::new(|| {
    Schema::new("pagination")
        .field(
            Field::optional(
                "limit",
                FieldKind::integer().range(1.0, f64::from(MAX_PAGE_LIMIT)),
            )
            .with_default(json!(DEFAULT_PAGE_LIMIT)),
        )
        .field(Field::optional("cursor", FieldKind::string().max_len(256)))
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub limit: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

impl Payload for Pagination {
    fn schema() -> &'static Schema {
        &PAGINATION_SCHEMA
    }
}

/// A post scheduled for publication.
pub static SCHEDULE_SCHEMA: LazyLock<Schema> = LazyLock::new(|| {
    Schema::new("schedule")
        .field(Field::required("accountId", identifier()))
        .field(Field::optional(
            "caption",
            FieldKind::string().format(Format::Caption),
        ))
        .field(Field::optional(
            "mediaUrls",
            FieldKind::array_of(FieldKind::string().format(Format::Url).max_len(2048)).max_items(10),
        ))
        .field(Field::required(
            "platforms",
            FieldKind::array_of(FieldKind::Enum(PLATFORMS))
                .min_items(1)
                .max_items(PLATFORMS.len()),
        ))
        .field(Field::required(
            "scheduledAt",
            FieldKind::string().format(Format::DateTime),
        ))
        .field(Field::optional(
            "timezone",
            FieldKind::string().max_len(64).pattern(TIMEZONE_PATTERN.clone()),
        ))
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulePost {
    pub account_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default)]
    pub media_urls: Vec<String>,
    pub platforms: Vec<String>,
    pub scheduled_at: chrono::DateTime<chrono::Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

impl Payload for SchedulePost {
    fn schema() -> &'static Schema {
        &SCHEDULE_SCHEMA
    }
}

/// A named group of social accounts.
pub static GROUP_SCHEMA: LazyLock<Schema> = LazyLock::new(|| {
    Schema::new("group")
        .field(Field::required("name", FieldKind::string().min_len(1).max_len(100)))
        .field(Field::optional("description", FieldKind::string().max_len(500)))
        .field(Field::required(
            "accountIds",
            FieldKind::array_of(identifier()).max_items(50),
        ))
        .field(Field::optional(
            "color",
            FieldKind::string().pattern(COLOR_PATTERN.clone()),
        ))
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountGroup {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub account_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl Payload for AccountGroup {
    fn schema() -> &'static Schema {
        &GROUP_SCHEMA
    }
}

/// Outbound proxy settings for an account.
pub static PROXY_SCHEMA: LazyLock<Schema> = LazyLock::new(|| {
    Schema::new("proxy")
        .field(Field::required(
            "host",
            FieldKind::string().max_len(253).pattern(HOST_PATTERN.clone()),
        ))
        .field(Field::required("port", FieldKind::integer().range(1.0, 65535.0)))
        .field(Field::optional("protocol", FieldKind::Enum(PROXY_PROTOCOLS)).with_default(json!("http")))
        .field(Field::optional("username", FieldKind::string().max_len(128)))
        .field(Field::optional("password", FieldKind::string().max_len(128)))
        .field(Field::optional("label", FieldKind::string().max_len(100)))
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxySettings {
    pub host: String,
    pub port: u16,
    pub protocol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Payload for ProxySettings {
    fn schema() -> &'static Schema {
        &PROXY_SCHEMA
    }
}

/// Metadata for a media upload.
pub static MEDIA_UPLOAD_SCHEMA: LazyLock<Schema> = LazyLock::new(|| {
    Schema::new("media_upload")
        .field(Field::required(
            "fileName",
            FieldKind::string()
                .format(Format::FileName)
                .min_len(1)
                .max_len(FILENAME_MAX_CHARS),
        ))
        .field(Field::required("contentType", FieldKind::Enum(MEDIA_TYPES)))
        .field(Field::required(
            "sizeBytes",
            FieldKind::integer().range(1.0, MAX_UPLOAD_BYTES as f64),
        ))
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaUpload {
    pub file_name: String,
    pub content_type: String,
    pub size_bytes: u64,
}

impl Payload for MediaUpload {
    fn schema() -> &'static Schema {
        &MEDIA_UPLOAD_SCHEMA
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sanitize::sanitize;
    use crate::validate::{validate, validate_as};
    use serde_json::json;

    #[test]
    fn test_pagination_defaults_and_bounds() {
        let page: Pagination = validate_as(&PAGINATION_SCHEMA, &json!({})).unwrap();
        assert_eq!(page.limit, 20);

        let errors = validate(&PAGINATION_SCHEMA, &json!({ "limit": 101 })).unwrap_err();
        assert!(errors.has_field("limit"));

        let errors = validate(&PAGINATION_SCHEMA, &json!({ "limit": 0 })).unwrap_err();
        assert!(errors.has_field("limit"));

        let page: Pagination = validate_as(&PAGINATION_SCHEMA, &json!({ "limit": "100" })).unwrap();
        assert_eq!(page.limit, 100);
    }

    #[test]
    fn test_content_end_to_end() {
        let raw = json!({
            "caption": "<script>alert(1)</script>Hello",
            "imageUrl": "https://example.com/i.jpg"
        });

        let content: ContentPayload = validate_as(&CONTENT_SCHEMA, &sanitize(raw)).unwrap();

        assert_eq!(
            content,
            ContentPayload {
                caption: Some("alert(1)Hello".to_string()),
                image_url: "https://example.com/i.jpg".to_string(),
            }
        );
    }

    #[test]
    fn test_content_requires_http_url() {
        let errors = validate(&CONTENT_SCHEMA, &json!({ "imageUrl": "ftp://example.com/i.jpg" }))
            .unwrap_err();
        assert!(errors.has_field("imageUrl"));

        let errors = validate(&CONTENT_SCHEMA, &json!({ "caption": "hi" })).unwrap_err();
        assert_eq!(errors.violations()[0].message, "is required");
    }

    #[test]
    fn test_content_caption_truncated() {
        let long = "x".repeat(CAPTION_MAX_CHARS * 2);
        let content: ContentPayload = validate_as(
            &CONTENT_SCHEMA,
            &json!({ "caption": long, "imageUrl": "https://example.com/a.png" }),
        )
        .unwrap();
        assert_eq!(content.caption.unwrap().chars().count(), CAPTION_MAX_CHARS);
    }

    #[test]
    fn test_schedule_reports_all_fields() {
        let errors = validate(
            &SCHEDULE_SCHEMA,
            &json!({
                "accountId": "has spaces",
                "mediaUrls": ["https://ok.example/a.jpg", "javascript:alert(1)"],
                "platforms": [],
                "scheduledAt": "tomorrow"
            }),
        )
        .unwrap_err();

        for field in ["accountId", "mediaUrls[1]", "platforms", "scheduledAt"] {
            assert!(errors.has_field(field), "missing violation for {}", field);
        }
    }

    #[test]
    fn test_schedule_valid() {
        let post: SchedulePost = validate_as(
            &SCHEDULE_SCHEMA,
            &json!({
                "accountId": "acct_42",
                "platforms": ["instagram", "linkedin"],
                "scheduledAt": "2030-01-01T09:30:00Z",
                "timezone": "Europe/Berlin"
            }),
        )
        .unwrap();

        assert_eq!(post.platforms, vec!["instagram", "linkedin"]);
        assert!(post.media_urls.is_empty());
        assert_eq!(post.timezone.as_deref(), Some("Europe/Berlin"));
    }

    #[test]
    fn test_group_limits() {
        let ids: Vec<String> = (0..51).map(|i| format!("acct{}", i)).collect();
        let errors = validate(
            &GROUP_SCHEMA,
            &json!({ "name": "", "accountIds": ids, "color": "red" }),
        )
        .unwrap_err();

        assert!(errors.has_field("name"));
        assert!(errors.has_field("accountIds"));
        assert!(errors.has_field("color"));
    }

    #[test]
    fn test_proxy_defaults_protocol() {
        let proxy: ProxySettings =
            validate_as(&PROXY_SCHEMA, &json!({ "host": "proxy.example.com", "port": 8080 })).unwrap();
        assert_eq!(proxy.protocol, "http");
        assert_eq!(proxy.port, 8080);

        let errors = validate(
            &PROXY_SCHEMA,
            &json!({ "host": "-bad-", "port": 70000, "protocol": "ftp" }),
        )
        .unwrap_err();
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn test_media_upload_file_name_made_safe() {
        let upload: MediaUpload = validate_as(
            &MEDIA_UPLOAD_SCHEMA,
            &json!({ "fileName": "../../etc/passwd", "contentType": "image/png", "sizeBytes": 10 }),
        )
        .unwrap();
        assert_eq!(upload.file_name, "___etc_passwd");
    }

    #[test]
    fn test_rejected_url_reports_its_path() {
        let errors = validate(
            &SCHEDULE_SCHEMA,
            &json!({
                "accountId": "acct-1",
                "platforms": ["instagram"],
                "scheduledAt": "2024-05-01T10:00:00Z",
                "mediaUrls": ["https://cdn.example.com/a.png", "javascript:alert(1)"],
            }),
        )
        .unwrap_err();

        assert_eq!(errors.len(), 1);
        let violation = &errors.violations()[0];
        assert_eq!(violation.field, "mediaUrls[1]");
        assert!(violation.message.contains("javascript"), "{}", violation.message);
    }

    #[test]
    fn test_identifier() {
        let id: Identifier = validate_as(&IDENTIFIER_SCHEMA, &json!({ "id": "abc-123" })).unwrap();
        assert_eq!(id.id, "abc-123");
        assert!(validate(&IDENTIFIER_SCHEMA, &json!({ "id": "a/b" })).is_err());
    }
}
