//! Bearer token verification for routes with `require_auth = true`.
//!
//! Token format, signing algorithm family (HMAC), and the mandatory
//! expiration claim are externally fixed by the user service this gateway
//! fronts; this module only verifies what it's handed.

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::settings::JwtSettings;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
    #[serde(default)]
    pub iat: Option<usize>,
    #[serde(default)]
    pub iss: Option<String>,
    #[serde(default)]
    pub aud: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

#[derive(Debug, Error, Clone)]
pub enum AuthError {
    #[error("Authorization header missing")]
    Missing,
    #[error("Authorization header is not a bearer token")]
    Malformed,
    #[error("token expired")]
    Expired,
    #[error("token signature invalid")]
    BadSignature,
    #[error("token missing required claim: {0}")]
    MissingClaim(String),
}

pub struct JwtVerifier {
    settings: JwtSettings,
}

impl JwtVerifier {
    pub fn new(settings: JwtSettings) -> Self {
        Self { settings }
    }

    /// Splits an `Authorization` header value into its bearer token, or
    /// reports why it couldn't.
    pub fn extract_token<'a>(header: Option<&'a str>) -> Result<&'a str, AuthError> {
        let header = header.ok_or(AuthError::Missing)?;
        header.strip_prefix("Bearer ").ok_or(AuthError::Malformed)
    }

    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        if let Some(ref issuer) = self.settings.issuer {
            validation.set_issuer(&[issuer]);
        }
        if let Some(ref audience) = self.settings.audience {
            validation.set_audience(&[audience]);
        }

        let key = DecodingKey::from_secret(self.settings.secret.as_bytes());
        let data = decode::<Claims>(token, &key, &validation).map_err(|e| {
            use jsonwebtoken::errors::ErrorKind;
            match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                ErrorKind::InvalidSignature => AuthError::BadSignature,
                _ => AuthError::BadSignature,
            }
        })?;

        for required in &self.settings.required_claims {
            let present = match required.as_str() {
                "sub" => true,
                "exp" => true,
                "iat" => data.claims.iat.is_some(),
                "iss" => data.claims.iss.is_some(),
                "aud" => data.claims.aud.is_some(),
                other => data.claims.roles.iter().any(|r| r == other),
            };
            if !present {
                return Err(AuthError::MissingClaim(required.clone()));
            }
        }

        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use std::time::{SystemTime, UNIX_EPOCH};

    fn settings() -> JwtSettings {
        JwtSettings {
            secret: "test-secret-at-least-32-bytes-long!".to_string(),
            token_lifetime_s: 3600,
            issuer: None,
            audience: None,
            required_claims: vec!["sub".to_string(), "exp".to_string()],
        }
    }

    fn token(exp_offset: i64, secret: &str) -> String {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() as i64;
        let claims = Claims {
            sub: "user-1".to_string(),
            exp: (now + exp_offset) as usize,
            iat: Some(now as usize),
            iss: None,
            aud: None,
            roles: vec![],
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn missing_header_is_reported() {
        assert!(matches!(
            JwtVerifier::extract_token(None),
            Err(AuthError::Missing)
        ));
    }

    #[test]
    fn non_bearer_scheme_is_malformed() {
        assert!(matches!(
            JwtVerifier::extract_token(Some("Token xyz")),
            Err(AuthError::Malformed)
        ));
    }

    #[test]
    fn valid_token_is_accepted() {
        let verifier = JwtVerifier::new(settings());
        let t = token(3600, &settings().secret);
        let claims = verifier.verify(&t).unwrap();
        assert_eq!(claims.sub, "user-1");
    }

    #[test]
    fn expired_token_is_rejected() {
        let verifier = JwtVerifier::new(settings());
        let t = token(-3600, &settings().secret);
        assert!(matches!(verifier.verify(&t), Err(AuthError::Expired)));
    }

    #[test]
    fn wrong_secret_is_bad_signature() {
        let verifier = JwtVerifier::new(settings());
        let t = token(3600, "a-totally-different-secret-value!!");
        assert!(matches!(verifier.verify(&t), Err(AuthError::BadSignature)));
    }
}
