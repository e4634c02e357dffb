//! Request payload validation.
//!
//! A render request is a JSON object with exactly one property, `url`, holding
//! an absolute `http` or `https` URL. Anything else is rejected with
//! [`Error::Validation`] before a browser is touched.

use serde_json::Value;
use url::Url;

use crate::{Error, Result};

/// Schemes a page may be loaded from
pub const ALLOWED_SCHEMES: [&str; 2] = ["http", "https"];

/// A validated render request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderRequest {
    pub url: Url,
}

impl RenderRequest {
    /// Validate a decoded JSON body.
    ///
    /// ```
    /// use pagepress::RenderRequest;
    ///
    /// let body = serde_json::json!({ "url": "https://example.com/docs" });
    /// let request = RenderRequest::from_json(&body).unwrap();
    /// assert_eq!(request.url.host_str(), Some("example.com"));
    ///
    /// let err = RenderRequest::from_json(&serde_json::json!({ "other": "x" })).unwrap_err();
    /// assert!(err.to_string().contains("other"));
    /// ```
    pub fn from_json(payload: &Value) -> Result<Self> {
        let object = payload
            .as_object()
            .ok_or_else(|| {
                Error::Validation(
                    "Request body must be a JSON object with a single `url` property".into(),
                )
            })?;

        let unexpected: Vec<&str> = object
            .keys()
            .map(String::as_str)
            .filter(|key| *key != "url")
            .collect();
        if !unexpected.is_empty() {
            return Err(Error::Validation(format!(
                "Unexpected property: {}",
                unexpected.join(", ")
            )));
        }

        let raw = match object.get("url") {
            None => return Err(Error::Validation("Missing required property: url".into())),
            Some(Value::String(s)) if !s.is_empty() => s.as_str(),
            Some(_) => {
                return Err(Error::Validation(
                    "Property `url` must be a non-empty string".into(),
                ))
            }
        };

        Ok(Self { url: validate_url(raw)? })
    }

    /// Validate a raw request body
    pub fn from_slice(body: &[u8]) -> Result<Self> {
        let payload: Value = serde_json::from_slice(body)
            .map_err(|e| Error::Validation(format!("Request body is not valid JSON: {}", e)))?;
        Self::from_json(&payload)
    }
}

/// Parse `raw` as an absolute URL and check its scheme.
pub fn validate_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw).map_err(|_| {
        Error::Validation(format!(
            "Invalid URL format: {}. Please provide a valid URL with protocol (e.g., https://example.com).",
            raw
        ))
    })?;

    if !ALLOWED_SCHEMES.contains(&url.scheme()) {
        return Err(Error::Validation(format!(
            "Invalid URL protocol: {}:. URL must use http or https.",
            url.scheme()
        )));
    }

    Ok(url)
}

/// Prefix `https://` onto input that does not already name `http://` or
/// `https://`, the way a user typing `example.com` means it.
pub fn normalize_url(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    }
}
