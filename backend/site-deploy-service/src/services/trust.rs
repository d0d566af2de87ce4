//! Deploy identity trust.
//!
//! CI jobs authenticate with an OIDC token whose `sub` claim names the
//! repository and ref (`repo:acme/site:ref:refs/heads/main`). A job may mint
//! deploy credentials when the token audience equals the trusted audience and
//! the subject matches one of the trusted patterns.
//!
//! Pattern rules:
//! - a pattern without `*` must equal the subject;
//! - `*` may only appear once, as the last character, directly after a `:` or
//!   `/` delimiter, and matches any remainder of the subject.
//!
//! Anything else never matches. Requiring the delimiter keeps
//! `repo:acme/site*` from authorizing `repo:acme/site-other:...`.

use crate::error::TrustError;
use async_trait::async_trait;
use aws_sdk_sts::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_sts::Client as StsClient;
use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, DecodingKey, Validation};
use resilience::{with_retry_if, with_timeout_result, ServiceConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{info, warn};

/// Hard cap on deploy credential lifetime
pub const MAX_SESSION_DURATION: Duration = Duration::from_secs(3600);

/// Shortest lifetime the identity federation backend accepts
pub const MIN_SESSION_DURATION: Duration = Duration::from_secs(900);

/// Requested lifetime clamped into `MIN_SESSION_DURATION..=MAX_SESSION_DURATION`
pub fn session_duration(requested: Option<Duration>) -> Duration {
    requested
        .unwrap_or(MAX_SESSION_DURATION)
        .clamp(MIN_SESSION_DURATION, MAX_SESSION_DURATION)
}

/// A repository allowed to deploy, optionally restricted to a ref filter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryBinding {
    pub owner: String,
    pub repo: String,
    /// e.g. `ref:refs/heads/main`; `None` allows every ref
    pub filter: Option<String>,
}

impl RepositoryBinding {
    pub fn subject_pattern(&self) -> String {
        format!(
            "repo:{}/{}:{}",
            self.owner,
            self.repo,
            self.filter.as_deref().unwrap_or("*")
        )
    }
}

/// Audience plus subject patterns a deploy identity must satisfy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustClaim {
    pub audience: String,
    pub subject_patterns: BTreeSet<String>,
}

impl TrustClaim {
    pub fn new<I, S>(audience: impl Into<String>, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            audience: audience.into(),
            subject_patterns: patterns.into_iter().map(Into::into).collect(),
        }
    }

    pub fn for_repositories(audience: impl Into<String>, repos: &[RepositoryBinding]) -> Self {
        Self::new(audience, repos.iter().map(RepositoryBinding::subject_pattern))
    }

    /// Patterns that can never match anything
    pub fn invalid_patterns(&self) -> Vec<&str> {
        self.subject_patterns
            .iter()
            .map(String::as_str)
            .filter(|p| p.contains('*') && wildcard_prefix(p).is_none())
            .collect()
    }
}

/// Literal prefix of a well-formed trailing-wildcard pattern
fn wildcard_prefix(pattern: &str) -> Option<&str> {
    let prefix = pattern.strip_suffix('*')?;
    if prefix.contains('*') || !(prefix.ends_with(':') || prefix.ends_with('/')) {
        return None;
    }
    Some(prefix)
}

/// Whether `subject` matches a single trust pattern
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == subject;
    }
    match wildcard_prefix(pattern) {
        Some(prefix) => subject.starts_with(prefix),
        None => false,
    }
}

/// Exact audience match and at least one matching subject pattern
pub fn authorize(subject: &str, audience: &str, claim: &TrustClaim) -> bool {
    audience == claim.audience
        && claim
            .subject_patterns
            .iter()
            .any(|pattern| subject_matches(pattern, subject))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Audience {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Deserialize)]
struct OidcClaims {
    sub: String,
    aud: Audience,
}

/// Web identity token with the claims trust decisions need
#[derive(Clone)]
pub struct IdentityToken {
    pub subject: String,
    pub audiences: Vec<String>,
    raw: String,
}

impl IdentityToken {
    pub fn new(subject: impl Into<String>, audience: impl Into<String>, raw: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            audiences: vec![audience.into()],
            raw: raw.into(),
        }
    }

    /// Read `sub` and `aud` from a JWT without verifying its signature
    ///
    /// Expiry is still checked. The signature is verified by the identity
    /// provider the token is exchanged with; this only lets the trust policy
    /// reject a token before the exchange.
    pub fn from_jwt(raw: &str) -> Result<Self, TrustError> {
        let mut validation = Validation::default();
        validation.insecure_disable_signature_validation();
        validation.validate_aud = false;

        let data = decode::<OidcClaims>(raw, &DecodingKey::from_secret(&[]), &validation)
            .map_err(|e| TrustError::InvalidToken(e.to_string()))?;

        let audiences = match data.claims.aud {
            Audience::One(aud) => vec![aud],
            Audience::Many(auds) => auds,
        };

        Ok(Self {
            subject: data.claims.sub,
            audiences,
            raw: raw.to_string(),
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn is_authorized(&self, claim: &TrustClaim) -> bool {
        self.audiences
            .iter()
            .any(|aud| authorize(&self.subject, aud, claim))
    }
}

impl std::fmt::Debug for IdentityToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityToken")
            .field("subject", &self.subject)
            .field("audiences", &self.audiences)
            .field("raw", &"<redacted>")
            .finish()
    }
}

/// Short-lived deploy credentials
#[derive(Clone, Serialize)]
pub struct DeployCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for DeployCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeployCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Identity federation backend that turns a trusted token into credentials
#[async_trait]
pub trait CredentialIssuer: Send + Sync {
    async fn issue(
        &self,
        token: &IdentityToken,
        session_name: &str,
        duration: Duration,
    ) -> Result<DeployCredentials, TrustError>;
}

/// Authorizes deploy identities, then mints capped credentials for them
pub struct TrustBroker<I> {
    claim: TrustClaim,
    issuer: I,
    policy: ServiceConfig,
}

impl<I: CredentialIssuer> TrustBroker<I> {
    pub fn new(claim: TrustClaim, issuer: I, policy: ServiceConfig) -> Self {
        for pattern in claim.invalid_patterns() {
            warn!(pattern = %pattern, "Trust pattern can never match");
        }
        Self {
            claim,
            issuer,
            policy,
        }
    }

    pub fn claim(&self) -> &TrustClaim {
        &self.claim
    }

    /// Mint credentials for `token`; the lifetime is clamped to 15 min..1 h
    pub async fn mint_credentials(
        &self,
        token: &IdentityToken,
        requested: Option<Duration>,
    ) -> Result<DeployCredentials, TrustError> {
        if !token.is_authorized(&self.claim) {
            warn!(subject = %token.subject, "Deploy identity not trusted");
            return Err(TrustError::AuthorizationDenied {
                subject: token.subject.clone(),
                audience: token.audiences.join(","),
            });
        }

        let duration = session_duration(requested);
        let session_name = session_name_for(&token.subject);

        let credentials = with_retry_if(&self.policy.retry, TrustError::is_retryable, || {
            with_timeout_result(
                self.policy.timeout.duration,
                self.issuer.issue(token, &session_name, duration),
            )
        })
        .await
        .map_err(|e| e.into_inner())?;

        info!(
            subject = %token.subject,
            expires_at = %credentials.expires_at,
            "Deploy credentials issued"
        );

        Ok(credentials)
    }
}

/// Role session name derived from the subject: `[\w+=,.@-]`, at most 64 chars
fn session_name_for(subject: &str) -> String {
    let mut name: String = subject
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || "+=,.@-_".contains(c) {
                c
            } else {
                '-'
            }
        })
        .collect();
    name.truncate(64);
    if name.len() < 2 {
        name = "site-deploy".to_string();
    }
    name
}

/// AWS STS `AssumeRoleWithWebIdentity`
pub struct StsCredentialIssuer {
    client: StsClient,
    role_arn: String,
}

impl StsCredentialIssuer {
    pub fn new(client: StsClient, role_arn: impl Into<String>) -> Self {
        Self {
            client,
            role_arn: role_arn.into(),
        }
    }
}

#[async_trait]
impl CredentialIssuer for StsCredentialIssuer {
    async fn issue(
        &self,
        token: &IdentityToken,
        session_name: &str,
        duration: Duration,
    ) -> Result<DeployCredentials, TrustError> {
        let response = self
            .client
            .assume_role_with_web_identity()
            .role_arn(&self.role_arn)
            .role_session_name(session_name)
            .web_identity_token(token.raw())
            .duration_seconds(session_duration(Some(duration)).as_secs() as i32)
            .send()
            .await
            .map_err(|err| {
                let code = err.as_service_error().and_then(|e| e.code()).map(str::to_string);
                let message = DisplayErrorContext(&err).to_string();
                match code.as_deref() {
                    Some("AccessDenied") | Some("InvalidIdentityToken") | Some("ExpiredTokenException") => {
                        TrustError::AuthorizationDenied {
                            subject: token.subject.clone(),
                            audience: token.audiences.join(","),
                        }
                    }
                    Some(code) => TrustError::Issuer {
                        retryable: code == "IDPCommunicationError" || code == "Throttling",
                        message,
                    },
                    None => TrustError::Issuer {
                        retryable: matches!(
                            err,
                            SdkError::TimeoutError(_)
                                | SdkError::DispatchFailure(_)
                                | SdkError::ResponseError(_)
                        ),
                        message,
                    },
                }
            })?;

        let creds = response.credentials().ok_or_else(|| TrustError::Issuer {
            message: "response carried no credentials".into(),
            retryable: false,
        })?;

        let expires_at = DateTime::<Utc>::from_timestamp(creds.expiration().secs(), 0)
            .unwrap_or_else(Utc::now);

        Ok(DeployCredentials {
            access_key_id: creds.access_key_id().to_string(),
            secret_access_key: creds.secret_access_key().to_string(),
            session_token: creds.session_token().to_string(),
            expires_at,
        })
    }
}
