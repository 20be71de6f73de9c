//! Bearer token authentication of HTTP callers.
//!
//! Callers present `Authorization: Bearer <jwt>`, an HS256 token whose claims
//! name the subject, the organization it acts for and its role:
//!
//! ```json
//! { "sub": "user-1", "org": "org-1", "role": "admin",
//!   "iat": 1700000000, "exp": 1700003600, "iss": "tollgate", "aud": "tollgate-api" }
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! async fn handler(caller: Caller) -> impl IntoResponse {
//!     format!("{} acting for {}", caller.subject, caller.organization_id)
//! }
//! ```
//!
//! # Configuration
//!
//! - `TOLLGATE_JWT_SECRET` - Required secret key for HS256 signing
//! - `TOLLGATE_JWT_ISSUER` - Expected issuer claim (default: "tollgate")
//! - `TOLLGATE_JWT_AUDIENCE` - Expected audience claim (default: "tollgate-api")

use std::sync::Arc;

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
    response::{IntoResponse, Response},
};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, TokenData, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::AuthConfig;
use crate::errors::{LicenseError, LicenseResult};
use crate::server::api_error::{ApiError, ErrorCode};

/// Role claim value granting administrative endpoints.
pub const ADMIN_ROLE: &str = "admin";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,
    /// Organization the caller acts for.
    #[serde(default)]
    pub org: String,
    #[serde(default)]
    pub role: String,
    pub iat: u64,
    pub exp: u64,
    pub iss: String,
    pub aud: String,
}

/// An authenticated caller, extracted from the bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub subject: String,
    pub organization_id: String,
    pub role: String,
}

impl Caller {
    pub fn is_admin(&self) -> bool {
        self.role == ADMIN_ROLE
    }

    pub fn require_admin(&self) -> Result<(), ApiError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(ApiError::new(ErrorCode::AdminRequired))
        }
    }
}

impl From<Claims> for Caller {
    fn from(claims: Claims) -> Self {
        Self {
            subject: claims.sub,
            organization_id: claims.org,
            role: claims.role,
        }
    }
}

/// Why a token was rejected. Every variant answers 401 with the same body;
/// the detail is only logged.
#[derive(Debug, Clone)]
pub enum AuthError {
    MissingToken,
    InvalidHeader,
    InvalidToken(String),
    TokenExpired,
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::MissingToken => write!(f, "missing authorization token"),
            AuthError::InvalidHeader => write!(f, "invalid authorization header format"),
            AuthError::InvalidToken(msg) => write!(f, "invalid token: {msg}"),
            AuthError::TokenExpired => write!(f, "token has expired"),
        }
    }
}

impl std::error::Error for AuthError {}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        debug!("Authentication failed: {self}");
        ApiError::new(ErrorCode::AuthenticationFailed).into_response()
    }
}

#[derive(Clone)]
pub struct JwtValidator {
    decoding_key: DecodingKey,
    encoding_key: EncodingKey,
    validation: Validation,
    issuer: String,
    audience: String,
    expiration_secs: u64,
}

impl JwtValidator {
    /// Build a validator from configuration.
    ///
    /// The secret may be given as `env:VAR_NAME` to read it from the
    /// environment.
    pub fn from_config(config: &AuthConfig) -> LicenseResult<Self> {
        if config.jwt_secret.is_empty() {
            return Err(LicenseError::ConfigError(
                "auth.jwt_secret is required to serve HTTP requests".to_string(),
            ));
        }

        let secret = if let Some(env_var) = config.jwt_secret.strip_prefix("env:") {
            std::env::var(env_var).map_err(|_| {
                LicenseError::ConfigError(format!(
                    "environment variable '{env_var}' not found for jwt_secret"
                ))
            })?
        } else {
            config.jwt_secret.clone()
        };

        let mut validation = Validation::new(jsonwebtoken::Algorithm::HS256);
        validation.set_issuer(&[&config.jwt_issuer]);
        validation.set_audience(&[&config.jwt_audience]);
        validation.validate_exp = true;

        Ok(Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            validation,
            issuer: config.jwt_issuer.clone(),
            audience: config.jwt_audience.clone(),
            expiration_secs: config.token_expiration_secs,
        })
    }

    pub fn validate_token(&self, token: &str) -> Result<TokenData<Claims>, AuthError> {
        decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            _ => AuthError::InvalidToken(e.to_string()),
        })
    }

    /// Mint a token for `subject` acting for `organization_id`.
    pub fn create_token(
        &self,
        subject: &str,
        organization_id: &str,
        role: &str,
    ) -> LicenseResult<String> {
        let now = u64::try_from(chrono::Utc::now().timestamp())
            .map_err(|e| LicenseError::ConfigError(format!("system time error: {e}")))?;

        let claims = Claims {
            sub: subject.to_string(),
            org: organization_id.to_string(),
            role: role.to_string(),
            iat: now,
            exp: now + self.expiration_secs,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| LicenseError::ConfigError(format!("failed to create token: {e}")))
    }
}

impl std::fmt::Debug for JwtValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtValidator")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("expiration_secs", &self.expiration_secs)
            .finish()
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
    Arc<JwtValidator>: FromRef<S>,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let validator = Arc::<JwtValidator>::from_ref(state);

        let auth_header = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or(AuthError::MissingToken)?
            .to_str()
            .map_err(|_| AuthError::InvalidHeader)?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or(AuthError::InvalidHeader)?;

        let token_data = validator.validate_token(token)?;
        Ok(Caller::from(token_data.claims))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> AuthConfig {
        AuthConfig {
            jwt_secret: "test-secret-key-for-testing-only".to_string(),
            ..AuthConfig::default()
        }
    }

    #[test]
    fn create_and_validate_token() {
        let validator = JwtValidator::from_config(&test_config()).unwrap();
        let token = validator.create_token("user-1", "org-1", "admin").unwrap();

        let claims = validator.validate_token(&token).unwrap().claims;
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.org, "org-1");
        assert_eq!(claims.iss, "tollgate");
        assert_eq!(claims.aud, "tollgate-api");

        let caller = Caller::from(claims);
        assert!(caller.is_admin());
        assert!(caller.require_admin().is_ok());
    }

    #[test]
    fn non_admin_is_refused_admin_access() {
        let caller = Caller {
            subject: "u".into(),
            organization_id: "o".into(),
            role: "member".into(),
        };
        let err = caller.require_admin().unwrap_err();
        assert_eq!(err.code, ErrorCode::AdminRequired);
    }

    #[test]
    fn token_from_other_secret_is_rejected() {
        let validator = JwtValidator::from_config(&test_config()).unwrap();
        let other = JwtValidator::from_config(&AuthConfig {
            jwt_secret: "another-secret".to_string(),
            ..AuthConfig::default()
        })
        .unwrap();

        let token = other.create_token("user-1", "org-1", "").unwrap();
        assert!(matches!(
            validator.validate_token(&token),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn wrong_audience_is_rejected() {
        let validator = JwtValidator::from_config(&test_config()).unwrap();
        let other = JwtValidator::from_config(&AuthConfig {
            jwt_audience: "someone-else".to_string(),
            ..test_config()
        })
        .unwrap();

        let token = other.create_token("user-1", "org-1", "").unwrap();
        assert!(validator.validate_token(&token).is_err());
    }

    #[test]
    fn empty_secret_is_a_config_error() {
        assert!(matches!(
            JwtValidator::from_config(&AuthConfig::default()),
            Err(LicenseError::ConfigError(_))
        ));
    }
}
