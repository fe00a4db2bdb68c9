use anyhow::Result;
use axum::{extract::Query, http::Uri};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

/// Claims carried by tokens the auth service issues. `sub` is the user id.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub exp: usize,
}

impl Claims {
    pub fn user_id(&self) -> Result<Uuid> {
        Ok(Uuid::parse_str(&self.sub)?)
    }
}

/// Issue a JWT for a given user valid for the provided duration.
pub fn issue_jwt(secret: &[u8], user_id: &Uuid, email: &str, valid_for: Duration) -> Result<String> {
    let exp = (OffsetDateTime::now_utc() + valid_for).unix_timestamp() as usize;
    let claims = Claims {
        sub: user_id.to_string(),
        email: email.into(),
        exp,
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret),
    )?;
    Ok(token)
}

/// Verify a JWT and return its claims if valid.
pub fn verify_jwt(secret: &[u8], token: &str) -> Result<Claims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    validation.leeway = 0;
    let data = decode::<Claims>(token, &DecodingKey::from_secret(secret), &validation)?;
    if data.claims.exp < OffsetDateTime::now_utc().unix_timestamp() as usize {
        anyhow::bail!("expired");
    }
    data.claims.user_id()?;
    Ok(data.claims)
}

#[derive(Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Pull a bearer token from an `Authorization` header value or, for socket
/// upgrades where browsers cannot set headers, a percent-encoded `token`
/// query parameter.
pub fn extract_token(header: Option<&str>, uri: &Uri) -> Option<String> {
    if let Some(token) = header.and_then(|h| h.strip_prefix("Bearer ")) {
        return Some(token.trim().to_string());
    }
    Query::<TokenQuery>::try_from_uri(uri)
        .ok()?
        .0
        .token
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jwt_issue_and_verify() {
        let secret = b"secret";
        let id = Uuid::new_v4();
        let token = issue_jwt(secret, &id, "a@x.io", Duration::seconds(60)).unwrap();
        let claims = verify_jwt(secret, &token).unwrap();
        assert_eq!(claims.user_id().unwrap(), id);
        assert_eq!(claims.email, "a@x.io");
        assert!(verify_jwt(b"other", &token).is_err());
    }

    #[test]
    fn jwt_expiry() {
        let secret = b"secret";
        let token = issue_jwt(secret, &Uuid::new_v4(), "a@x.io", Duration::seconds(-10)).unwrap();
        // Validation should fail because exp is in the past
        assert!(verify_jwt(secret, &token).is_err());
    }

    #[test]
    fn subject_must_be_a_user_id() {
        let secret = b"secret";
        let claims = Claims {
            sub: "alice".into(),
            email: "a@x.io".into(),
            exp: (OffsetDateTime::now_utc() + Duration::minutes(5)).unix_timestamp() as usize,
        };
        let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(secret)).unwrap();
        assert!(verify_jwt(secret, &token).is_err());
    }

    #[test]
    fn token_sources() {
        let uri = |s: &str| s.parse::<Uri>().unwrap();
        assert_eq!(extract_token(Some("Bearer abc"), &uri("/ws")), Some("abc".into()));
        assert_eq!(extract_token(None, &uri("/ws?x=1&token=def")), Some("def".into()));
        assert_eq!(extract_token(Some("Basic zzz"), &uri("/ws?token=")), None);
        assert_eq!(extract_token(None, &uri("/ws")), None);
    }

    #[test]
    fn query_token_is_percent_decoded() {
        let id = Uuid::new_v4();
        let token = issue_jwt(b"secret", &id, "a@x.io", Duration::seconds(60)).unwrap();
        // a client that encodes the whole value, separators included
        let encoded: String = token
            .chars()
            .map(|c| if c == '.' { "%2E".to_string() } else { c.to_string() })
            .collect();
        let uri: Uri = format!("/ws?token={}&v=2", encoded).parse().unwrap();
        let found = extract_token(None, &uri).unwrap();
        assert_eq!(found, token);
        assert_eq!(verify_jwt(b"secret", &found).unwrap().user_id().unwrap(), id);

        let plus: Uri = "/ws?x=1&token=a%2Bb".parse().unwrap();
        assert_eq!(extract_token(None, &plus).as_deref(), Some("a+b"));
    }
}
