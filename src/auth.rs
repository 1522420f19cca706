//! Email/password and Google sign-in with HMAC-signed session tokens.
//!
//! Token format: `{user_id}.{expiry_unix}.{hex(hmac_sha256(secret, payload))}`.
//! Sign-out revokes the token for the rest of the process lifetime.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use constant_time_eq::constant_time_eq;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::env;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

type HmacSha256 = Hmac<Sha256>;

const SESSION_TTL_DAYS: i64 = 7;
const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("SESSION_SECRET is not set")]
    MissingSecret,
    #[error("an account with this email already exists")]
    EmailTaken,
    #[error("password must be at least {MIN_PASSWORD_LEN} characters")]
    WeakPassword,
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("invalid or expired session")]
    InvalidSession,
    #[error("Google sign-in rejected: {0}")]
    GoogleRejected(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub user_id: String,
    pub email: String,
}

/// External verification of a Google ID token; returns the verified email.
#[async_trait]
pub trait GoogleTokenVerifier: Send + Sync {
    async fn verify(&self, id_token: &str) -> Result<String, AuthError>;
}

/// Production verifier backed by Google's tokeninfo endpoint.
pub struct GoogleTokenInfo {
    client: reqwest::Client,
}

impl GoogleTokenInfo {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for GoogleTokenInfo {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GoogleTokenVerifier for GoogleTokenInfo {
    async fn verify(&self, id_token: &str) -> Result<String, AuthError> {
        #[derive(serde::Deserialize)]
        struct TokenInfo {
            email: Option<String>,
            email_verified: Option<String>,
        }

        let res = self
            .client
            .get("https://oauth2.googleapis.com/tokeninfo")
            .query(&[("id_token", id_token)])
            .send()
            .await
            .map_err(|e| AuthError::GoogleRejected(e.to_string()))?;
        if !res.status().is_success() {
            return Err(AuthError::GoogleRejected(format!(
                "tokeninfo returned {}",
                res.status()
            )));
        }
        let info: TokenInfo = res
            .json()
            .await
            .map_err(|e| AuthError::GoogleRejected(e.to_string()))?;
        match info.email {
            Some(email) if info.email_verified.as_deref() == Some("true") => Ok(email),
            Some(_) => Err(AuthError::GoogleRejected("email not verified".to_string())),
            None => Err(AuthError::GoogleRejected("token has no email".to_string())),
        }
    }
}

struct UserRecord {
    email: String,
    salt: [u8; 16],
    // None for accounts provisioned through Google sign-in.
    password_hash: Option<[u8; 32]>,
}

pub struct AuthService {
    secret: Vec<u8>,
    verifier: Arc<dyn GoogleTokenVerifier>,
    users: Mutex<HashMap<String, UserRecord>>,
    revoked: Mutex<HashSet<String>>,
}

impl AuthService {
    pub fn new(secret: impl Into<Vec<u8>>, verifier: Arc<dyn GoogleTokenVerifier>) -> Self {
        Self {
            secret: secret.into(),
            verifier,
            users: Mutex::new(HashMap::new()),
            revoked: Mutex::new(HashSet::new()),
        }
    }

    pub fn from_env(verifier: Arc<dyn GoogleTokenVerifier>) -> Result<Self, AuthError> {
        let secret = env::var("SESSION_SECRET").map_err(|_| AuthError::MissingSecret)?;
        if secret.is_empty() {
            return Err(AuthError::MissingSecret);
        }
        Ok(Self::new(secret.into_bytes(), verifier))
    }

    pub async fn register_with_email(
        &self,
        email: &str,
        password: &str,
    ) -> Result<(String, Session), AuthError> {
        let email = normalize_email(email);
        if password.len() < MIN_PASSWORD_LEN {
            return Err(AuthError::WeakPassword);
        }
        let uid = user_id_for(&email);

        let mut users = self.users.lock().await;
        if users.contains_key(&uid) {
            return Err(AuthError::EmailTaken);
        }
        let salt: [u8; 16] = rand::random();
        users.insert(
            uid.clone(),
            UserRecord {
                email: email.clone(),
                salt,
                password_hash: Some(hash_password(&salt, password)),
            },
        );
        drop(users);

        info!("Registered account for {}", email);
        let token = self.issue_token(&uid);
        Ok((token, Session { user_id: uid, email }))
    }

    pub async fn sign_in_with_email(
        &self,
        email: &str,
        password: &str,
    ) -> Result<(String, Session), AuthError> {
        let email = normalize_email(email);
        let uid = user_id_for(&email);

        let users = self.users.lock().await;
        let record = users.get(&uid).ok_or(AuthError::InvalidCredentials)?;
        let stored = record.password_hash.ok_or(AuthError::InvalidCredentials)?;
        let presented = hash_password(&record.salt, password);
        if !constant_time_eq(&stored, &presented) {
            return Err(AuthError::InvalidCredentials);
        }
        drop(users);

        let token = self.issue_token(&uid);
        Ok((token, Session { user_id: uid, email }))
    }

    /// First Google sign-in provisions the account.
    pub async fn sign_in_with_google(
        &self,
        id_token: &str,
    ) -> Result<(String, Session), AuthError> {
        let email = normalize_email(&self.verifier.verify(id_token).await?);
        let uid = user_id_for(&email);

        let mut users = self.users.lock().await;
        users.entry(uid.clone()).or_insert_with(|| {
            info!("Provisioned Google account for {}", email);
            UserRecord {
                email: email.clone(),
                salt: rand::random(),
                password_hash: None,
            }
        });
        drop(users);

        let token = self.issue_token(&uid);
        Ok((token, Session { user_id: uid, email }))
    }

    /// Revokes the token; later calls with it fail with `InvalidSession`.
    pub async fn sign_out(&self, token: &str) -> Result<(), AuthError> {
        self.authenticate(token).await?;
        self.revoked.lock().await.insert(token.to_string());
        Ok(())
    }

    pub async fn authenticate(&self, token: &str) -> Result<Session, AuthError> {
        if self.revoked.lock().await.contains(token) {
            return Err(AuthError::InvalidSession);
        }
        let Some((payload, tag_hex)) = token.rsplit_once('.') else {
            return Err(AuthError::InvalidSession);
        };
        let Some((uid, expiry)) = payload.rsplit_once('.') else {
            return Err(AuthError::InvalidSession);
        };
        let Ok(tag) = hex::decode(tag_hex) else {
            return Err(AuthError::InvalidSession);
        };
        let expected = self.sign(payload);
        if tag.len() != expected.len() || !constant_time_eq(&tag, &expected) {
            return Err(AuthError::InvalidSession);
        }
        let expiry: i64 = expiry.parse().map_err(|_| AuthError::InvalidSession)?;
        if expiry <= Utc::now().timestamp() {
            return Err(AuthError::InvalidSession);
        }

        let users = self.users.lock().await;
        let record = users.get(uid).ok_or(AuthError::InvalidSession)?;
        Ok(Session {
            user_id: uid.to_string(),
            email: record.email.clone(),
        })
    }

    fn issue_token(&self, uid: &str) -> String {
        let expiry = (Utc::now() + Duration::days(SESSION_TTL_DAYS)).timestamp();
        let payload = format!("{uid}.{expiry}");
        let tag = self.sign(&payload);
        format!("{payload}.{}", hex::encode(tag))
    }

    fn sign(&self, payload: &str) -> Vec<u8> {
        // HMAC accepts keys of any length.
        let mut mac = HmacSha256::new_from_slice(&self.secret).expect("hmac key length");
        mac.update(payload.as_bytes());
        mac.finalize().into_bytes().to_vec()
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn user_id_for(email: &str) -> String {
    let digest = Sha256::digest(email.as_bytes());
    hex::encode(&digest[..16])
}

fn hash_password(salt: &[u8; 16], password: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    hasher.finalize().into()
}
