// 🔐 Auth Gateway - password registration, login and bearer tokens
//
// Passwords are stored as Argon2 PHC strings. Tokens are HS256 JWTs signed
// with the secret from AuthConfig; there is no process-wide key.

use crate::config::AuthConfig;
use crate::error::LedgerError;
use crate::store::UserRepository;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("invalid username or password")]
    InvalidCredentials,

    #[error("username {0} already exists")]
    UsernameTaken(String),

    #[error("missing bearer token")]
    MissingToken,

    #[error("invalid or expired token")]
    InvalidToken,

    #[error("auth configuration error: {0}")]
    Config(String),

    #[error("password hashing failed: {0}")]
    Hashing(String),

    #[error(transparent)]
    Store(#[from] LedgerError),
}

/// Registered user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,

    #[serde(skip_serializing)]
    pub password_hash: String,

    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(username: &str, password_hash: &str) -> Self {
        User {
            id: uuid::Uuid::new_v4().to_string(),
            username: username.to_string(),
            password_hash: password_hash.to_string(),
            created_at: Utc::now(),
        }
    }
}

/// Verified caller, attached to every authenticated request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Claims {
    sub: String,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

pub struct AuthGateway {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    token_ttl: Duration,
}

impl AuthGateway {
    pub fn new(config: &AuthConfig) -> Result<Self, AuthError> {
        let secret = config.jwt_secret.as_deref().unwrap_or("");
        if secret.is_empty() {
            return Err(AuthError::Config("jwt_secret is not set".to_string()));
        }
        if config.token_ttl_hours == 0 {
            return Err(AuthError::Config("token_ttl_hours must be > 0".to_string()));
        }

        Ok(AuthGateway {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            token_ttl: Duration::hours(config.token_ttl_hours as i64),
        })
    }

    /// Create a user with an Argon2-hashed password
    pub fn register<R>(&self, users: &R, username: &str, password: &str) -> Result<User, AuthError>
    where
        R: UserRepository + ?Sized,
    {
        let username = username.trim();
        if username.is_empty() || password.is_empty() {
            return Err(AuthError::InvalidCredentials);
        }

        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| AuthError::Hashing(e.to_string()))?
            .to_string();

        let user = User::new(username, &hash);
        if !users.insert_user(&user)? {
            return Err(AuthError::UsernameTaken(username.to_string()));
        }

        tracing::info!(username = %user.username, "user registered");
        Ok(user)
    }

    /// Check credentials and issue a token
    pub fn login<R>(&self, users: &R, username: &str, password: &str) -> Result<IssuedToken, AuthError>
    where
        R: UserRepository + ?Sized,
    {
        let user = users
            .find_user(username.trim())?
            .ok_or(AuthError::InvalidCredentials)?;

        let parsed = PasswordHash::new(&user.password_hash)
            .map_err(|e| AuthError::Hashing(e.to_string()))?;

        if Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_err()
        {
            tracing::warn!(username = %user.username, "login rejected");
            return Err(AuthError::InvalidCredentials);
        }

        self.issue(&user.username, Utc::now())
    }

    fn issue(&self, username: &str, issued_at: DateTime<Utc>) -> Result<IssuedToken, AuthError> {
        let expires_at = issued_at + self.token_ttl;
        let claims = Claims {
            sub: username.to_string(),
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AuthError::Config(e.to_string()))?;

        Ok(IssuedToken { token, expires_at })
    }

    /// Validate signature and expiry of a bearer token
    pub fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        let validation = Validation::new(Algorithm::HS256);

        match decode::<Claims>(token, &self.decoding_key, &validation) {
            Ok(data) => Ok(Identity {
                username: data.claims.sub,
            }),
            Err(err) => {
                tracing::debug!("token validation failed: {:?}", err);
                Err(AuthError::InvalidToken)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;

    fn gateway(secret: &str) -> AuthGateway {
        AuthGateway::new(&AuthConfig {
            jwt_secret: Some(secret.to_string()),
            token_ttl_hours: 24,
        })
        .unwrap()
    }

    #[test]
    fn test_secret_is_required() {
        let missing = AuthGateway::new(&AuthConfig {
            jwt_secret: None,
            token_ttl_hours: 24,
        });
        assert!(matches!(missing, Err(AuthError::Config(_))));
    }

    #[test]
    fn test_register_and_login() {
        let store = SqliteStore::open_in_memory().unwrap();
        let auth = gateway("test-secret");

        let user = auth.register(&store, "an", "hunter2").unwrap();
        assert!(user.password_hash.starts_with("$argon2"));

        let issued = auth.login(&store, "an", "hunter2").unwrap();
        let identity = auth.verify(&issued.token).unwrap();
        assert_eq!(identity.username, "an");

        assert!(matches!(
            auth.login(&store, "an", "wrong"),
            Err(AuthError::InvalidCredentials)
        ));
        assert!(matches!(
            auth.login(&store, "nobody", "hunter2"),
            Err(AuthError::InvalidCredentials)
        ));
        assert!(matches!(
            auth.register(&store, "an", "again"),
            Err(AuthError::UsernameTaken(_))
        ));
    }

    #[test]
    fn test_foreign_and_tampered_tokens_rejected() {
        let auth = gateway("secret-one");
        let other = gateway("secret-two");

        let issued = other.issue("an", Utc::now()).unwrap();
        assert!(matches!(auth.verify(&issued.token), Err(AuthError::InvalidToken)));

        let mine = auth.issue("an", Utc::now()).unwrap();
        let tampered = format!("{}x", mine.token);
        assert!(matches!(auth.verify(&tampered), Err(AuthError::InvalidToken)));
    }

    #[test]
    fn test_expired_token_rejected() {
        let auth = gateway("secret");
        let stale = auth.issue("an", Utc::now() - Duration::hours(48)).unwrap();

        assert!(matches!(auth.verify(&stale.token), Err(AuthError::InvalidToken)));
    }
}
