//! Form, JSON and multipart codecs
//!
//! Request bodies are built here and response bodies decoded here. Encoding is
//! pure; nothing in this module performs I/O.
//!
//! The remote API has two dialect quirks handled by serde helpers:
//! - booleans may arrive as the strings `"1"`, `"0"`, `"true"` or `"false"`
//!   ([`kbc_bool`])
//! - timestamps use `YYYY-MM-DDThh:mm:ss±hhmm` and `"null"` means "no time"
//!   ([`kbc_time`])

use super::error::{ApiError, ApiResult};
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Fixed multipart boundary; the upload endpoint is called with this exact value
pub const MULTIPART_BOUNDARY: &str = "----KbcProviderFormBoundary7MA4YWxkTrZu0gW";

/// Timestamp layout used by the storage API
pub const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%z";

pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
pub const JSON_CONTENT_TYPE: &str = "application/json";
pub const TEXT_CONTENT_TYPE: &str = "text/plain";

/// Errors from the dialect-specific scalar decoders
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("invalid boolean token '{0}': expected one of \"1\", \"0\", \"true\", \"false\"")]
    InvalidBool(String),

    #[error("invalid timestamp '{value}': {reason}")]
    InvalidTimestamp { value: String, reason: String },
}

// =============================================================================
// Form encoding
// =============================================================================

/// Value of a single form field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormValue {
    /// `key=value`
    Scalar(String),
    /// `key[0]=a&key[1]=b`, parsed positionally by the API
    List(Vec<String>),
    /// `key[name]=value`
    Keyed(Vec<(String, String)>),
}

/// Ordered form body
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormBody {
    fields: Vec<(String, FormValue)>,
}

impl FormBody {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, key: &str, value: impl Into<String>) -> Self {
        self.fields
            .push((key.to_string(), FormValue::Scalar(value.into())));
        self
    }

    /// Add the field only when a value is present
    pub fn opt_field(self, key: &str, value: Option<impl Into<String>>) -> Self {
        match value {
            Some(v) => self.field(key, v),
            None => self,
        }
    }

    /// Booleans travel as `1` / `0`
    pub fn flag(self, key: &str, value: bool) -> Self {
        self.field(key, if value { "1" } else { "0" })
    }

    pub fn list<I, S>(mut self, key: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let values: Vec<String> = values.into_iter().map(Into::into).collect();
        self.fields.push((key.to_string(), FormValue::List(values)));
        self
    }

    pub fn keyed<I, K, V>(mut self, key: &str, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let pairs = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.fields.push((key.to_string(), FormValue::Keyed(pairs)));
        self
    }

    /// Look up a scalar field
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.iter().find_map(|(k, v)| match v {
            FormValue::Scalar(s) if k == key => Some(s.as_str()),
            _ => None,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Render as `application/x-www-form-urlencoded`
    pub fn encode(&self) -> String {
        let mut parts: Vec<String> = Vec::new();

        for (key, value) in &self.fields {
            let key = urlencoding::encode(key);
            match value {
                FormValue::Scalar(v) => {
                    parts.push(format!("{}={}", key, urlencoding::encode(v)));
                },
                FormValue::List(values) => {
                    for (i, v) in values.iter().enumerate() {
                        parts.push(format!("{}[{}]={}", key, i, urlencoding::encode(v)));
                    }
                },
                FormValue::Keyed(pairs) => {
                    for (name, v) in pairs {
                        parts.push(format!(
                            "{}[{}]={}",
                            key,
                            urlencoding::encode(name),
                            urlencoding::encode(v)
                        ));
                    }
                },
            }
        }

        parts.join("&")
    }
}

pub fn encode_form(body: &FormBody) -> Vec<u8> {
    body.encode().into_bytes()
}

// =============================================================================
// JSON
// =============================================================================

pub fn encode_json<T: Serialize>(value: &T) -> ApiResult<Vec<u8>> {
    serde_json::to_vec(value)
        .map_err(|e| ApiError::validation(format!("failed to encode JSON body: {}", e)))
}

/// Decode a JSON body, attributing failures to `endpoint`
pub fn decode_json<T: DeserializeOwned>(endpoint: &str, body: &[u8]) -> ApiResult<T> {
    serde_json::from_slice(body).map_err(|e| ApiError::decode(endpoint, e))
}

// =============================================================================
// Multipart
// =============================================================================

/// One part of a multipart body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartPart {
    pub name: String,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

impl MultipartPart {
    pub fn text(name: &str, value: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            filename: None,
            content_type: None,
            data: value.into().into_bytes(),
        }
    }

    pub fn file(name: &str, filename: &str, content_type: &str, data: Vec<u8>) -> Self {
        Self {
            name: name.to_string(),
            filename: Some(filename.to_string()),
            content_type: Some(content_type.to_string()),
            data,
        }
    }
}

pub fn multipart_content_type() -> String {
    format!("multipart/form-data; boundary={}", MULTIPART_BOUNDARY)
}

pub fn encode_multipart(parts: &[MultipartPart]) -> Vec<u8> {
    let mut out = Vec::new();

    for part in parts {
        out.extend_from_slice(format!("--{}\r\n", MULTIPART_BOUNDARY).as_bytes());
        let disposition = match &part.filename {
            Some(filename) => format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                part.name, filename
            ),
            None => format!("Content-Disposition: form-data; name=\"{}\"\r\n", part.name),
        };
        out.extend_from_slice(disposition.as_bytes());
        if let Some(ct) = &part.content_type {
            out.extend_from_slice(format!("Content-Type: {}\r\n", ct).as_bytes());
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&part.data);
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(format!("--{}--\r\n", MULTIPART_BOUNDARY).as_bytes());

    out
}

// =============================================================================
// Request payload
// =============================================================================

/// Request body together with its content type
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Form(FormBody),
    Json(serde_json::Value),
    Multipart(Vec<MultipartPart>),
    Text(String),
}

impl Payload {
    pub fn content_type(&self) -> String {
        match self {
            Self::Form(_) => FORM_CONTENT_TYPE.to_string(),
            Self::Json(_) => JSON_CONTENT_TYPE.to_string(),
            Self::Multipart(_) => multipart_content_type(),
            Self::Text(_) => TEXT_CONTENT_TYPE.to_string(),
        }
    }

    pub fn encode(&self) -> ApiResult<Vec<u8>> {
        match self {
            Self::Form(form) => Ok(encode_form(form)),
            Self::Json(value) => encode_json(value),
            Self::Multipart(parts) => Ok(encode_multipart(parts)),
            Self::Text(text) => Ok(text.clone().into_bytes()),
        }
    }
}

// =============================================================================
// Dialect scalars
// =============================================================================

/// Parse the API's boolean tokens. Case-sensitive.
pub fn parse_kbc_bool(token: &str) -> Result<bool, CodecError> {
    match token {
        "1" | "true" => Ok(true),
        "0" | "false" => Ok(false),
        other => Err(CodecError::InvalidBool(other.to_string())),
    }
}

/// `0001-01-01T00:00:00+0000`, the value of an absent timestamp
pub fn zero_time() -> DateTime<FixedOffset> {
    NaiveDate::from_ymd_opt(1, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc().fixed_offset())
        .unwrap_or_else(|| DateTime::<Utc>::MIN_UTC.fixed_offset())
}

pub fn is_zero_time(value: &DateTime<FixedOffset>) -> bool {
    *value == zero_time()
}

/// Parse `YYYY-MM-DDThh:mm:ss±hhmm`; the literal `null` yields [`zero_time`]
pub fn parse_kbc_time(value: &str) -> Result<DateTime<FixedOffset>, CodecError> {
    if value == "null" {
        return Ok(zero_time());
    }
    DateTime::parse_from_str(value, TIME_FORMAT).map_err(|e| CodecError::InvalidTimestamp {
        value: value.to_string(),
        reason: e.to_string(),
    })
}

pub fn format_kbc_time(value: &DateTime<FixedOffset>) -> String {
    if is_zero_time(value) {
        "null".to_string()
    } else {
        value.format(TIME_FORMAT).to_string()
    }
}

/// Serde adapter for the API's boolean dialect
pub mod kbc_bool {
    use super::parse_kbc_bool;
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bool(*value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        deserializer.deserialize_any(KbcBoolVisitor)
    }

    struct KbcBoolVisitor;

    impl<'de> Visitor<'de> for KbcBoolVisitor {
        type Value = bool;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a boolean or one of \"1\", \"0\", \"true\", \"false\"")
        }

        fn visit_bool<E: de::Error>(self, v: bool) -> Result<bool, E> {
            Ok(v)
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<bool, E> {
            parse_kbc_bool(v).map_err(E::custom)
        }
    }
}

/// Serde adapter for the API's timestamp dialect
pub mod kbc_time {
    use super::{format_kbc_time, parse_kbc_time, zero_time};
    use chrono::{DateTime, FixedOffset};
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S: Serializer>(
        value: &DateTime<FixedOffset>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_kbc_time(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<FixedOffset>, D::Error> {
        deserializer.deserialize_any(KbcTimeVisitor)
    }

    struct KbcTimeVisitor;

    impl<'de> Visitor<'de> for KbcTimeVisitor {
        type Value = DateTime<FixedOffset>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a timestamp formatted as YYYY-MM-DDThh:mm:ss+hhmm or \"null\"")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            parse_kbc_time(v).map_err(E::custom)
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(zero_time())
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(zero_time())
        }
    }
}

/// Ids arrive as JSON strings from some endpoints and as integers from others
pub mod kbc_id {
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S: Serializer>(value: &str, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
        deserializer.deserialize_any(IdVisitor)
    }

    struct IdVisitor;

    impl<'de> Visitor<'de> for IdVisitor {
        type Value = String;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a string or integer id")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<String, E> {
            Ok(v.to_string())
        }
    }
}

/// String form of an id-like JSON value
pub fn id_from_value(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde::Deserialize;

    #[test]
    fn test_repeated_field_is_bracket_indexed() {
        let form = FormBody::new().list("k", ["a", "b"]);
        assert_eq!(form.encode(), "k[0]=a&k[1]=b");
    }

    #[test]
    fn test_form_preserves_order_and_escapes_values() {
        let form = FormBody::new()
            .field("name", "my bucket")
            .flag("canManageBuckets", true)
            .keyed("bucketPermissions", [("in.c-main", "read")])
            .opt_field("description", None::<String>);
        assert_eq!(
            form.encode(),
            "name=my%20bucket&canManageBuckets=1&bucketPermissions[in.c-main]=read"
        );
        assert_eq!(form.get("name"), Some("my bucket"));
        assert_eq!(form.get("missing"), None);
    }

    #[test]
    fn test_multipart_uses_fixed_boundary() {
        let body = encode_multipart(&[
            MultipartPart::text("name", "users"),
            MultipartPart::file("data", "users.csv", "text/csv", b"\"id\"\n".to_vec()),
        ]);
        let text = String::from_utf8(body).unwrap();
        assert!(text.starts_with(&format!("--{}\r\n", MULTIPART_BOUNDARY)));
        assert!(text.contains("name=\"data\"; filename=\"users.csv\""));
        assert!(text.ends_with(&format!("--{}--\r\n", MULTIPART_BOUNDARY)));
        assert_eq!(
            Payload::Multipart(vec![]).content_type(),
            format!("multipart/form-data; boundary={}", MULTIPART_BOUNDARY)
        );
    }

    #[test]
    fn test_bool_tokens() {
        assert_eq!(parse_kbc_bool("1"), Ok(true));
        assert_eq!(parse_kbc_bool("true"), Ok(true));
        assert_eq!(parse_kbc_bool("0"), Ok(false));
        assert_eq!(parse_kbc_bool("false"), Ok(false));
        assert!(parse_kbc_bool("TRUE").is_err());
        assert!(parse_kbc_bool("yes").is_err());
        assert!(parse_kbc_bool("").is_err());
    }

    #[derive(Debug, Deserialize)]
    struct Flags {
        #[serde(with = "kbc_bool")]
        disabled: bool,
    }

    #[test]
    fn test_bool_in_json() {
        let f: Flags = serde_json::from_str(r#"{"disabled":"1"}"#).unwrap();
        assert!(f.disabled);
        let f: Flags = serde_json::from_str(r#"{"disabled":false}"#).unwrap();
        assert!(!f.disabled);
        let err = serde_json::from_str::<Flags>(r#"{"disabled":"no"}"#).unwrap_err();
        assert!(err.to_string().contains("invalid boolean token 'no'"));
        assert!(serde_json::from_str::<Flags>(r#"{"disabled":1}"#).is_err());
    }

    #[test]
    fn test_time_parse() {
        let t = parse_kbc_time("2019-03-14T10:15:00+0100").unwrap();
        let expected = FixedOffset::east_opt(3600)
            .unwrap()
            .with_ymd_and_hms(2019, 3, 14, 10, 15, 0)
            .unwrap();
        assert_eq!(t, expected);
        assert_eq!(format_kbc_time(&t), "2019-03-14T10:15:00+0100");
    }

    #[test]
    fn test_time_null_is_zero() {
        let t = parse_kbc_time("null").unwrap();
        assert!(is_zero_time(&t));
        assert_eq!(format_kbc_time(&t), "null");
        assert!(parse_kbc_time("2019-03-14 10:15:00").is_err());
    }

    #[derive(Debug, Deserialize)]
    struct Stamped {
        #[serde(with = "kbc_time")]
        expires: DateTime<FixedOffset>,
    }

    #[test]
    fn test_time_in_json_accepts_null_literal_and_json_null() {
        let s: Stamped = serde_json::from_str(r#"{"expires":"null"}"#).unwrap();
        assert!(is_zero_time(&s.expires));
        let s: Stamped = serde_json::from_str(r#"{"expires":null}"#).unwrap();
        assert!(is_zero_time(&s.expires));
    }

    #[test]
    fn test_decode_json_reports_endpoint() {
        let err = decode_json::<serde_json::Value>("GET buckets/in.c-x", b"{not json").unwrap_err();
        assert!(matches!(err, ApiError::Decode { .. }));
        assert!(err.to_string().contains("GET buckets/in.c-x"));
    }
}
