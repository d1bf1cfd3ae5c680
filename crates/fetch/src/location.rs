//! Composing fetch URLs from a source's base URL and a cached file's locator.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use serde_json::{Map, Value};
use url::Url;

const S3_SCHEME: &str = "s3://";

/// Characters that generic URL parsing would treat as delimiters inside an S3
/// object key. `%` is absent so existing escapes survive.
const S3_KEY: &AsciiSet = &CONTROLS.add(b' ').add(b'#').add(b'&').add(b'?').add(b'"').add(b'<').add(b'>');

/// Join `base_url` and `locator` with exactly one `/`.
///
/// An empty base yields the locator unchanged.
pub fn join(base_url: &str, locator: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if base.is_empty() {
        return locator.to_string();
    }
    format!("{base}/{}", locator.trim_start_matches('/'))
}

/// Percent-encode the object key of an `s3://bucket/key` URL.
///
/// Literal `#`, `&` and `?` in the key are escaped; sequences that are already
/// percent-encoded are left alone. Other URLs are returned unchanged.
pub fn escape_s3_url(url: &str) -> String {
    let Some(rest) = url.strip_prefix(S3_SCHEME) else {
        return url.to_string();
    };
    match rest.split_once('/') {
        Some((bucket, key)) => format!("{S3_SCHEME}{bucket}/{}", utf8_percent_encode(key, S3_KEY)),
        None => url.to_string(),
    }
}

/// Build the URL a cached file is fetched from: `base_url/locator`, with
/// `params` appended as query pairs.
pub fn build_url(base_url: &str, locator: &str, params: Option<&Map<String, Value>>) -> Result<Url> {
    let joined = join(base_url, locator);
    let joined = if joined.starts_with(S3_SCHEME) { escape_s3_url(&joined) } else { joined };
    let mut url = Url::parse(&joined).or_raise(|| ErrorKind::InvalidUrl(joined.clone()))?;
    if let Some(params) = params.filter(|params| !params.is_empty()) {
        let mut query = url.query_pairs_mut();
        for (key, value) in params {
            match value {
                Value::Null => {},
                Value::Array(items) => {
                    for item in items {
                        query.append_pair(key, &query_value(item));
                    }
                },
                other => {
                    query.append_pair(key, &query_value(other));
                },
            }
        }
    }
    Ok(url)
}

fn query_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case("https://example.test", "data.csv", "https://example.test/data.csv")]
    #[case("https://example.test/", "/data.csv", "https://example.test/data.csv")]
    #[case("ftp://ftp.example.test/pub", "dir/file.gz", "ftp://ftp.example.test/pub/dir/file.gz")]
    #[case("", "https://elsewhere.test/x", "https://elsewhere.test/x")]
    fn test_join(#[case] base: &str, #[case] locator: &str, #[case] expected: &str) {
        assert_eq!(join(base, locator), expected);
    }

    #[rstest]
    #[case("s3://some-bucket/badly#formed-file", "s3://some-bucket/badly%23formed-file")]
    #[case("s3://some-bucket/badly&formed-file", "s3://some-bucket/badly%26formed-file")]
    #[case("s3://bucket/key#with&specials", "s3://bucket/key%23with%26specials")]
    #[case("s3://some-bucket/badly%23formed-file", "s3://some-bucket/badly%23formed-file")]
    #[case("s3://bucket/a?b.csv", "s3://bucket/a%3Fb.csv")]
    #[case("s3://bucket/dir/plain.csv", "s3://bucket/dir/plain.csv")]
    #[case("https://example.test/a#b", "https://example.test/a#b")]
    fn test_escape_s3_url(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(escape_s3_url(input), expected);
    }

    #[test]
    fn test_build_url_with_params() {
        let params = json!({"query": "item", "page": 2, "tag": ["a", "b"], "skip": null});
        let url = build_url("https://example.test/api", "file", params.as_object()).unwrap();
        assert_eq!(url.path(), "/api/file");
        let pairs: Vec<(String, String)> = url.query_pairs().map(|(k, v)| (k.into_owned(), v.into_owned())).collect();
        assert!(pairs.contains(&("query".to_string(), "item".to_string())));
        assert!(pairs.contains(&("page".to_string(), "2".to_string())));
        assert!(pairs.contains(&("tag".to_string(), "a".to_string())));
        assert!(pairs.contains(&("tag".to_string(), "b".to_string())));
        assert!(!pairs.iter().any(|(k, _)| k == "skip"));
    }

    #[test]
    fn test_build_url_escapes_s3_keys() {
        let url = build_url("s3://bucket", "key#with&specials", None).unwrap();
        assert_eq!(url.host_str(), Some("bucket"));
        assert_eq!(url.path(), "/key%23with%26specials");
        assert!(url.fragment().is_none());
    }

    #[test]
    fn test_build_url_keeps_question_mark_in_s3_key() {
        let url = build_url("s3://bucket", "a?b.csv", None).unwrap();
        assert_eq!(url.path(), "/a%3Fb.csv");
        assert!(url.query().is_none());
    }

    #[test]
    fn test_build_url_rejects_garbage() {
        let err = build_url("", "not a url", None).unwrap_err();
        assert!(matches!(*err, ErrorKind::InvalidUrl(_)));
    }
}
