use ferry_cache::models::CredsDetails;

/// Request decorations derived from an API's stored credentials.
///
/// Attached to every fetch except FTP, which always logs in anonymously.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Credentials {
    /// Extra headers in insertion order (`Cookie` first, then the token header).
    pub headers: Vec<(String, String)>,
    pub basic_auth: Option<(String, Option<String>)>,
}

impl Credentials {
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty() && self.basic_auth.is_none()
    }
}

impl From<&CredsDetails> for Credentials {
    fn from(details: &CredsDetails) -> Self {
        let mut headers = Vec::new();
        if let Some(cookie) = &details.cookie {
            headers.push(("Cookie".to_string(), format!("{}={}", cookie.name, cookie.value)));
        }
        if let Some(token) = &details.auth_token {
            headers.push((token.header.clone(), token.token.clone()));
        }
        let basic_auth = details.auth.as_ref().map(|auth| (auth.username.clone(), auth.password.clone()));
        Self { headers, basic_auth }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_cache::models::{AuthToken, BasicAuth, Cookie};

    #[test]
    fn test_from_full_details() {
        let details = CredsDetails {
            cookie: Some(Cookie { name: "my-cookie".into(), value: "my-value".into() }),
            auth: Some(BasicAuth { username: "my-username".into(), password: Some("my-password".into()) }),
            auth_token: Some(AuthToken { header: "Token".into(), token: "my-token".into() }),
        };
        let credentials = Credentials::from(&details);
        assert_eq!(
            credentials.headers,
            vec![
                ("Cookie".to_string(), "my-cookie=my-value".to_string()),
                ("Token".to_string(), "my-token".to_string()),
            ]
        );
        assert_eq!(credentials.basic_auth, Some(("my-username".to_string(), Some("my-password".to_string()))));
    }

    #[test]
    fn test_from_empty_details() {
        assert!(Credentials::from(&CredsDetails::default()).is_empty());
    }
}
