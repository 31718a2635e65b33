/*!
 * # Authentication
 *
 * Bearer JWT verification and the typed identities handed to services.
 *
 * Handlers extract an [`AuthUser`] and narrow it to the capability an
 * operation needs ([`Buyer`], [`Vendor`], [`Platform`] or [`Viewer`]).
 * Services take those values as explicit arguments and do their own
 * ownership checks against them.
 */

use async_trait::async_trait;
use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::errors::ServiceError;

pub const ADMIN_ROLE: &str = "admin";

/// Claim structure for JWT tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,              // Subject (user ID)
    #[serde(default)]
    pub store_id: Option<String>, // Store the user operates, if a vendor
    #[serde(default)]
    pub roles: Vec<String>,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
}

/// Verifies bearer tokens issued by the identity service
#[derive(Clone)]
pub struct AuthService {
    secret: String,
    issuer: Option<String>,
}

impl std::fmt::Debug for AuthService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthService")
            .field("issuer", &self.issuer)
            .finish_non_exhaustive()
    }
}

impl AuthService {
    pub fn new(secret: impl Into<String>, issuer: Option<String>) -> Self {
        Self {
            secret: secret.into(),
            issuer,
        }
    }

    /// Validate a JWT token and extract the authenticated user
    pub fn validate_token(&self, token: &str) -> Result<AuthUser, ServiceError> {
        let mut validation = Validation::new(Algorithm::HS256);
        if let Some(issuer) = &self.issuer {
            validation.set_issuer(&[issuer.as_str()]);
        }

        let claims = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                ServiceError::AuthError("Token expired".to_string())
            }
            _ => ServiceError::AuthError("Invalid token".to_string()),
        })?
        .claims;

        AuthUser::try_from(claims)
    }

    /// Issue a token for `user`. Used by tooling and tests; production tokens
    /// come from the identity service.
    pub fn issue_token(&self, user: &AuthUser, ttl: Duration) -> Result<String, ServiceError> {
        let claims = Claims {
            sub: user.user_id.to_string(),
            store_id: user.store_id.map(|id| id.to_string()),
            roles: user.roles.clone(),
            exp: (Utc::now() + ttl).timestamp(),
            iss: self.issuer.clone(),
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| ServiceError::InternalError(format!("token creation failed: {}", e)))
    }
}

/// Authenticated user data extracted from the JWT token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub store_id: Option<Uuid>,
    pub roles: Vec<String>,
}

impl TryFrom<Claims> for AuthUser {
    type Error = ServiceError;

    fn try_from(claims: Claims) -> Result<Self, Self::Error> {
        let user_id = Uuid::parse_str(&claims.sub)
            .map_err(|_| ServiceError::AuthError("Invalid subject claim".to_string()))?;
        let store_id = claims
            .store_id
            .as_deref()
            .map(Uuid::parse_str)
            .transpose()
            .map_err(|_| ServiceError::AuthError("Invalid store claim".to_string()))?;
        Ok(Self {
            user_id,
            store_id,
            roles: claims.roles,
        })
    }
}

impl AuthUser {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn buyer(&self) -> Buyer {
        Buyer {
            user_id: self.user_id,
        }
    }

    /// Narrows to a vendor identity; fails when the user operates no store.
    pub fn vendor(&self) -> Result<Vendor, ServiceError> {
        self.store_id
            .map(|store_id| Vendor {
                user_id: self.user_id,
                store_id,
            })
            .ok_or_else(|| ServiceError::Unauthorized("User does not operate a store".to_string()))
    }

    pub fn platform(&self) -> Result<Platform, ServiceError> {
        if self.has_role(ADMIN_ROLE) {
            Ok(Platform {
                user_id: self.user_id,
            })
        } else {
            Err(ServiceError::Unauthorized(
                "Platform capability required".to_string(),
            ))
        }
    }

    pub fn viewer(&self) -> Viewer {
        Viewer {
            user_id: self.user_id,
            store_id: self.store_id,
        }
    }
}

/// A buyer acting on their own cart and orders
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Buyer {
    pub user_id: Uuid,
}

/// A vendor acting on behalf of the store they operate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vendor {
    pub user_id: Uuid,
    pub store_id: Uuid,
}

/// The platform operator, allowed to move money
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Platform {
    pub user_id: Uuid,
}

/// Anyone reading an order: its buyer, or a vendor with items on it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewer {
    pub user_id: Uuid,
    pub store_id: Option<Uuid>,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    Arc<AuthService>: FromRef<S>,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth_service = Arc::<AuthService>::from_ref(state);

        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| ServiceError::AuthError("Missing bearer token".to_string()))?;

        let user = auth_service.validate_token(token)?;
        debug!(user_id = %user.user_id, "authenticated request");
        Ok(user)
    }
}
