//! # Authentication and Authorization
//!
//! Bearer-token authentication for the API. `/api/login` exchanges
//! credentials for a signed token carrying the user and organization;
//! the middleware resolves that token into an [`AuthContext`] request
//! extension for every protected route.

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{HeaderMap, header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use hmac::{Hmac, Mac};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::{ApiError, unauthorized};
use crate::models::profile::Model as ProfileModel;
use crate::server::AppState;

type HmacSha256 = Hmac<Sha256>;

/// Authenticated caller resolved from a bearer token.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub organization_id: Uuid,
    pub role: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    org: String,
    role: String,
    exp: i64,
}

/// Salted password hash: HMAC-SHA256 keyed by the per-user salt.
pub fn hash_password(salt: &str, password: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(salt.as_bytes()).expect("hmac accepts any key length");
    mac.update(password.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time password verification against the stored hash.
pub fn verify_password(profile: &ProfileModel, password: &str) -> bool {
    let computed = hash_password(&profile.password_salt, password);
    ConstantTimeEq::ct_eq(computed.as_bytes(), profile.password_hash.as_bytes()).into()
}

/// Issue a bearer token for an authenticated profile.
pub fn issue_token(config: &AppConfig, profile: &ProfileModel) -> Result<String, ApiError> {
    let claims = Claims {
        sub: profile.id.to_string(),
        org: profile.organization_id.to_string(),
        role: profile.role.clone(),
        exp: Utc::now().timestamp() + config.token_ttl_seconds as i64,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.auth_secret.as_bytes()),
    )
    .map_err(|err| {
        tracing::error!(error = %err, "Token signing failed");
        unauthorized(Some("Could not issue token"))
    })
}

fn decode_token(config: &AppConfig, token: &str) -> Result<AuthContext, ApiError> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.auth_secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| unauthorized(Some("Invalid bearer token")))?;

    let user_id = data
        .claims
        .sub
        .parse::<Uuid>()
        .map_err(|_| unauthorized(Some("Invalid bearer token")))?;
    let organization_id = data
        .claims
        .org
        .parse::<Uuid>()
        .map_err(|_| unauthorized(Some("Invalid bearer token")))?;

    Ok(AuthContext {
        user_id,
        organization_id,
        role: data.claims.role,
    })
}

fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    headers
        .get(AUTHORIZATION)
        .ok_or_else(|| unauthorized(Some("Missing Authorization header")))
        .and_then(|value| {
            value
                .to_str()
                .map_err(|_| unauthorized(Some("Invalid Authorization header")))
        })
        .and_then(|header| {
            header
                .strip_prefix("Bearer ")
                .ok_or_else(|| unauthorized(Some("Authorization header must use Bearer scheme")))
        })
}

/// Middleware validating bearer tokens on protected routes.
pub async fn auth_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_bearer_token(request.headers())?;
    let context = decode_token(&state.config, token)?;

    tracing::debug!(
        user_id = %context.user_id,
        organization_id = %context.organization_id,
        "Authenticated request"
    );

    let mut request = request;
    request.extensions_mut().insert(context);

    Ok(next.run(request).await)
}

impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .ok_or_else(|| unauthorized(Some("Authentication required")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::prelude::DateTimeWithTimeZone;

    fn test_profile() -> ProfileModel {
        let salt = "salt-123";
        ProfileModel {
            id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            email: "user@example.com".to_string(),
            password_hash: hash_password(salt, "correct horse"),
            password_salt: salt.to_string(),
            role: "member".to_string(),
            created_at: DateTimeWithTimeZone::from(Utc::now()),
            updated_at: DateTimeWithTimeZone::from(Utc::now()),
        }
    }

    #[test]
    fn password_verification_round_trip() {
        let profile = test_profile();
        assert!(verify_password(&profile, "correct horse"));
        assert!(!verify_password(&profile, "battery staple"));
    }

    #[test]
    fn token_round_trip_carries_identity() {
        let config = AppConfig::default();
        let profile = test_profile();

        let token = issue_token(&config, &profile).expect("issue token");
        let context = decode_token(&config, &token).expect("decode token");

        assert_eq!(context.user_id, profile.id);
        assert_eq!(context.organization_id, profile.organization_id);
        assert_eq!(context.role, "member");
    }

    #[test]
    fn tampered_tokens_are_rejected() {
        let config = AppConfig::default();
        let profile = test_profile();

        let mut token = issue_token(&config, &profile).expect("issue token");
        token.push('x');
        assert!(decode_token(&config, &token).is_err());

        let other_config = AppConfig {
            auth_secret: "another secret".to_string(),
            ..Default::default()
        };
        let foreign = issue_token(&other_config, &profile).expect("issue token");
        assert!(decode_token(&config, &foreign).is_err());
    }
}
