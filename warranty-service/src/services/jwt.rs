use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::JwtConfig;
use crate::error::AppError;

/// JWT service for token generation and validation.
///
/// Access and refresh credentials are signed with distinct secrets so that
/// compromise of one does not compromise the other.
#[derive(Clone)]
pub struct JwtService {
    access_encoding_key: EncodingKey,
    access_decoding_key: DecodingKey,
    refresh_encoding_key: EncodingKey,
    refresh_decoding_key: DecodingKey,
    access_token_expiry_minutes: i64,
    refresh_token_expiry_days: i64,
}

/// Claims for access tokens (short-lived)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// Subject (user ID)
    pub sub: String,
    /// Email
    pub email: String,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// JWT ID (for blacklisting)
    pub jti: String,
}

impl AccessTokenClaims {
    /// Seconds until this token's natural expiry, floored at zero.
    pub fn remaining_seconds(&self) -> i64 {
        (self.exp - Utc::now().timestamp()).max(0)
    }
}

/// Claims for refresh tokens (long-lived)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshTokenClaims {
    /// Subject (user ID)
    pub sub: String,
    /// Token ID (matches database record)
    pub jti: String,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
}

/// Token response returned to client
#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

impl JwtService {
    pub fn new(config: &JwtConfig) -> Self {
        Self {
            access_encoding_key: EncodingKey::from_secret(config.access_secret.as_bytes()),
            access_decoding_key: DecodingKey::from_secret(config.access_secret.as_bytes()),
            refresh_encoding_key: EncodingKey::from_secret(config.refresh_secret.as_bytes()),
            refresh_decoding_key: DecodingKey::from_secret(config.refresh_secret.as_bytes()),
            access_token_expiry_minutes: config.access_token_expiry_minutes,
            refresh_token_expiry_days: config.refresh_token_expiry_days,
        }
    }

    /// Generate an access token for a user
    pub fn generate_access_token(&self, user_id: &str, email: &str) -> Result<String, AppError> {
        let now = Utc::now();
        let exp = now + Duration::minutes(self.access_token_expiry_minutes);

        let claims = AccessTokenClaims {
            sub: user_id.to_string(),
            email: email.to_string(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.access_encoding_key)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to encode access token: {}", e)))
    }

    /// Generate a refresh token for a user
    pub fn generate_refresh_token(&self, user_id: &str, token_id: &str) -> Result<String, AppError> {
        let now = Utc::now();
        let exp = now + Duration::days(self.refresh_token_expiry_days);

        let claims = RefreshTokenClaims {
            sub: user_id.to_string(),
            jti: token_id.to_string(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.refresh_encoding_key)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to encode refresh token: {}", e)))
    }

    /// Generate both access and refresh tokens. The refresh token id is
    /// returned so the caller can persist the matching database row.
    pub fn generate_token_pair(
        &self,
        user_id: &str,
        email: &str,
    ) -> Result<(String, String, Uuid), AppError> {
        let access_token = self.generate_access_token(user_id, email)?;
        let refresh_token_id = Uuid::new_v4();
        let refresh_token =
            self.generate_refresh_token(user_id, &refresh_token_id.to_string())?;

        Ok((access_token, refresh_token, refresh_token_id))
    }

    /// Validate and decode an access token
    pub fn validate_access_token(&self, token: &str) -> Result<AccessTokenClaims, AppError> {
        let validation = Validation::new(Algorithm::HS256);

        let token_data = decode::<AccessTokenClaims>(token, &self.access_decoding_key, &validation)
            .map_err(|_| AppError::InvalidCredential)?;

        Ok(token_data.claims)
    }

    /// Validate and decode a refresh token
    pub fn validate_refresh_token(&self, token: &str) -> Result<RefreshTokenClaims, AppError> {
        let validation = Validation::new(Algorithm::HS256);

        let token_data =
            decode::<RefreshTokenClaims>(token, &self.refresh_decoding_key, &validation)
                .map_err(|_| AppError::InvalidCredential)?;

        Ok(token_data.claims)
    }

    /// Get access token expiry in seconds (for client info)
    pub fn access_token_expiry_seconds(&self) -> i64 {
        self.access_token_expiry_minutes * 60
    }

    pub fn refresh_token_expiry_days(&self) -> i64 {
        self.refresh_token_expiry_days
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> JwtConfig {
        JwtConfig {
            access_secret: "test-access-secret".to_string(),
            refresh_secret: "test-refresh-secret".to_string(),
            access_token_expiry_minutes: 60,
            refresh_token_expiry_days: 7,
        }
    }

    #[test]
    fn test_access_token_generation_and_validation() {
        let service = JwtService::new(&test_config());

        let token = service
            .generate_access_token("user_123", "test@example.com")
            .unwrap();
        assert!(!token.is_empty());

        let claims = service.validate_access_token(&token).unwrap();
        assert_eq!(claims.sub, "user_123");
        assert_eq!(claims.email, "test@example.com");
        assert!(claims.remaining_seconds() > 0);
    }

    #[test]
    fn test_refresh_token_generation_and_validation() {
        let service = JwtService::new(&test_config());

        let token = service.generate_refresh_token("user_123", "token_abc").unwrap();
        let claims = service.validate_refresh_token(&token).unwrap();
        assert_eq!(claims.sub, "user_123");
        assert_eq!(claims.jti, "token_abc");
    }

    #[test]
    fn test_token_pair_generation() {
        let service = JwtService::new(&test_config());

        let (access_token, refresh_token, refresh_token_id) = service
            .generate_token_pair("user_123", "test@example.com")
            .unwrap();

        let access_claims = service.validate_access_token(&access_token).unwrap();
        assert_eq!(access_claims.sub, "user_123");

        let refresh_claims = service.validate_refresh_token(&refresh_token).unwrap();
        assert_eq!(refresh_claims.jti, refresh_token_id.to_string());
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let service = JwtService::new(&test_config());
        let other = JwtService::new(&JwtConfig {
            access_secret: "some-other-secret".to_string(),
            refresh_secret: "yet-another-secret".to_string(),
            access_token_expiry_minutes: 60,
            refresh_token_expiry_days: 7,
        });

        let token = service
            .generate_access_token("user_123", "test@example.com")
            .unwrap();

        assert!(matches!(
            other.validate_access_token(&token),
            Err(AppError::InvalidCredential)
        ));
    }

    #[test]
    fn test_token_kinds_do_not_cross_validate() {
        let service = JwtService::new(&test_config());

        let refresh = service.generate_refresh_token("user_123", "token_abc").unwrap();
        assert!(matches!(
            service.validate_access_token(&refresh),
            Err(AppError::InvalidCredential)
        ));

        let access = service
            .generate_access_token("user_123", "test@example.com")
            .unwrap();
        assert!(matches!(
            service.validate_refresh_token(&access),
            Err(AppError::InvalidCredential)
        ));
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let config = test_config();
        let service = JwtService::new(&config);

        // Sign an already-expired claim set with the real key. The expiry is
        // far enough in the past to clear jsonwebtoken's default leeway.
        let now = Utc::now();
        let claims = AccessTokenClaims {
            sub: "user_123".to_string(),
            email: "test@example.com".to_string(),
            exp: (now - Duration::hours(2)).timestamp(),
            iat: (now - Duration::hours(3)).timestamp(),
            jti: Uuid::new_v4().to_string(),
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(config.access_secret.as_bytes()),
        )
        .unwrap();

        assert!(matches!(
            service.validate_access_token(&token),
            Err(AppError::InvalidCredential)
        ));
    }
}
