//! services/api/src/web/urls.rs
//!
//! Building and reading image proxy URLs, and deciding which stored objects the
//! proxy may serve.

use axum::http::{header::HOST, HeaderMap};
use reqwest::Url;

use crate::config::Config;

/// Object-name prefixes the image proxy serves, paired with the download prefix for each.
const SERVABLE_PREFIXES: [(&str, &str); 3] = [
    ("uploads/", "original"),
    ("enhanced/", "annotated"),
    ("clean_enhanced/", "enhanced"),
];

/// The externally visible origin of this service, without a trailing slash.
/// Empty when neither configuration nor the request says where we live.
pub fn resolve_base_url(config: &Config, headers: &HeaderMap) -> String {
    if let Some(base) = &config.public_base_url {
        return base.clone();
    }
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };
    let Some(host) = headers
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    else {
        return String::new();
    };
    let proto = header("x-forwarded-proto").unwrap_or("http");
    format!("{}://{}", proto, host)
}

/// `{base}/photo/image?object=<escaped>`; relative when `base_url` is empty.
pub fn image_proxy_url(base_url: &str, object_name: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let absolute = Url::parse(&format!("{}/photo/image", base)).map(|mut url| {
        url.query_pairs_mut().append_pair("object", object_name);
        url.to_string()
    });
    match absolute {
        Ok(url) => url,
        Err(_) => {
            // Relative bases cannot be parsed on their own; borrow a dummy origin for the query.
            let mut url = match Url::parse("http://localhost/photo/image") {
                Ok(url) => url,
                Err(_) => return format!("{}/photo/image?object={}", base, object_name),
            };
            url.query_pairs_mut().append_pair("object", object_name);
            format!("{}/photo/image?{}", base, url.query().unwrap_or_default())
        }
    }
}

/// Pulls the object name back out of an image proxy URL.
pub fn object_name_from_url(uri: &str) -> Option<String> {
    let url = Url::parse(uri)
        .or_else(|_| Url::parse(&format!("http://localhost{}", uri)))
        .ok()?;
    if !url.path().ends_with("/photo/image") {
        return None;
    }
    url.query_pairs()
        .find(|(key, _)| key == "object")
        .map(|(_, value)| value.into_owned())
}

/// Renders a stored state value as a URL: bare object names become proxy URLs.
pub fn display_image_url(base_url: &str, value: &str) -> String {
    if value.starts_with("http://") || value.starts_with("https://") || value.starts_with('/') {
        value.to_string()
    } else {
        image_proxy_url(base_url, value)
    }
}

pub fn is_safe_object_name(object_name: &str) -> bool {
    if object_name.starts_with('/') || object_name.contains("..") || object_name.contains('\\') {
        return false;
    }
    SERVABLE_PREFIXES
        .iter()
        .any(|(prefix, _)| object_name.starts_with(prefix))
}

/// The filename prefix used when an object is downloaded as an attachment.
pub fn download_prefix(object_name: &str) -> &'static str {
    SERVABLE_PREFIXES
        .iter()
        .find(|(prefix, _)| object_name.starts_with(prefix))
        .map(|(_, download)| *download)
        .unwrap_or("photo")
}
