use crate::error::{Error, ErrorKind};
use exn::ResultExt;
use serde::{Deserialize, Serialize};

/// Root configuration entity for one external data provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Api {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    /// Reserved column; never written. See [`crate::chain`] for the computed hash.
    pub hash: Option<String>,
}

#[derive(sqlx::FromRow)]
pub(crate) struct ApiRow {
    id: i64,
    name: String,
    description: Option<String>,
    hash: Option<String>,
}
impl From<ApiRow> for Api {
    fn from(row: ApiRow) -> Self {
        Self { id: row.id, name: row.name, description: row.description, hash: row.hash }
    }
}

/// Credentials attached to an [`Api`], stored as plain (unencrypted) JSON.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Creds {
    pub id: i64,
    pub api_id: i64,
    pub details: CredsDetails,
}

/// The JSON shape of stored credentials. Every part is optional.
///
/// ```json
/// {"cookie": {"name": "session", "value": "abc"},
///  "auth": {"username": "user", "password": "pass"},
///  "auth_token": {"header": "X-Api-Key", "token": "secret"}}
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredsDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookie: Option<Cookie>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<BasicAuth>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<AuthToken>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicAuth {
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
}

/// A token sent verbatim in a custom header.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthToken {
    pub header: String,
    pub token: String,
}

#[derive(sqlx::FromRow)]
pub(crate) struct CredsRow {
    id: i64,
    api_config_id: i64,
    creds_details: String,
}
impl TryFrom<CredsRow> for Creds {
    type Error = Error;
    fn try_from(row: CredsRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            api_id: row.api_config_id,
            details: serde_json::from_str(&row.creds_details).or_raise(|| ErrorKind::InvalidData("creds details"))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_creds_from_row() {
        let row = CredsRow {
            id: 1,
            api_config_id: 7,
            creds_details: r#"{"cookie": {"name": "my-cookie", "value": "my-value"},
                "auth": {"username": "my-username", "password": "my-password"},
                "auth_token": {"header": "Token", "token": "my-token"}}"#
                .to_string(),
        };
        let creds = Creds::try_from(row).unwrap();
        assert_eq!(creds.api_id, 7);
        assert_eq!(creds.details.cookie, Some(Cookie { name: "my-cookie".into(), value: "my-value".into() }));
        assert_eq!(creds.details.auth.unwrap().password.as_deref(), Some("my-password"));
        assert_eq!(creds.details.auth_token.unwrap().header, "Token");
    }

    #[test]
    fn test_partial_creds() {
        let details: CredsDetails = serde_json::from_str(r#"{"auth_token": {"header": "X", "token": "y"}}"#).unwrap();
        assert!(details.cookie.is_none());
        assert!(details.auth.is_none());
        assert_eq!(serde_json::to_string(&details).unwrap(), r#"{"auth_token":{"header":"X","token":"y"}}"#);
    }

    #[test]
    fn test_invalid_creds_json() {
        let row = CredsRow { id: 1, api_config_id: 1, creds_details: "not json".to_string() };
        let err = Creds::try_from(row).unwrap_err();
        assert_eq!(*err, ErrorKind::InvalidData("creds details"));
    }
}
