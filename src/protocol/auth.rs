//! Auth token construction for `HELLO`/`LOGON` (§4.3, §6).

use crate::packstream::Value;
use crate::protocol::message::Fields;

/// An authentication scheme this core can encode into the `LOGON` auth token map.
///
/// `Custom` covers schemes the server supports that this core has no dedicated
/// constructor for (e.g. a site-specific SSO bridge): the caller supplies the full map.
#[derive(Debug, Clone)]
pub enum AuthToken {
    None,
    Basic {
        principal: String,
        credentials: String,
        realm: Option<String>,
    },
    Bearer {
        token: String,
    },
    Kerberos {
        ticket: String,
    },
    Custom(Fields),
}

impl AuthToken {
    pub fn basic(principal: impl Into<String>, credentials: impl Into<String>) -> Self {
        AuthToken::Basic {
            principal: principal.into(),
            credentials: credentials.into(),
            realm: None,
        }
    }

    pub fn bearer(token: impl Into<String>) -> Self {
        AuthToken::Bearer { token: token.into() }
    }

    /// Render as the field map `LOGON` (or `HELLO`'s embedded auth, on Bolt < 5.1) sends.
    pub fn to_fields(&self) -> Fields {
        match self {
            AuthToken::None => vec![("scheme".to_string(), Value::String("none".into()))],
            AuthToken::Basic {
                principal,
                credentials,
                realm,
            } => {
                let mut fields = vec![
                    ("scheme".to_string(), Value::String("basic".into())),
                    ("principal".to_string(), Value::String(principal.clone())),
                    ("credentials".to_string(), Value::String(credentials.clone())),
                ];
                if let Some(realm) = realm {
                    fields.push(("realm".to_string(), Value::String(realm.clone())));
                }
                fields
            }
            AuthToken::Bearer { token } => vec![
                ("scheme".to_string(), Value::String("bearer".into())),
                ("credentials".to_string(), Value::String(token.clone())),
            ],
            AuthToken::Kerberos { ticket } => vec![
                ("scheme".to_string(), Value::String("kerberos".into())),
                ("credentials".to_string(), Value::String(ticket.clone())),
            ],
            AuthToken::Custom(fields) => fields.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_without_realm_omits_the_field() {
        let fields = AuthToken::basic("neo4j", "password").to_fields();
        assert!(fields.iter().all(|(k, _)| k != "realm"));
    }

    #[test]
    fn basic_with_realm_includes_it() {
        let token = AuthToken::Basic {
            principal: "neo4j".into(),
            credentials: "password".into(),
            realm: Some("corp".into()),
        };
        let fields = token.to_fields();
        assert!(fields.iter().any(|(k, v)| k == "realm" && v.as_str() == Some("corp")));
    }

    #[test]
    fn none_scheme_carries_no_credentials() {
        let fields = AuthToken::None.to_fields();
        assert_eq!(fields.len(), 1);
    }
}
