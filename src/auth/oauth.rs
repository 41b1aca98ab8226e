//! External identity providers for the social-login redirect flow.
//!
//! Each verifier builds the consent URL and trades an authorization code for
//! the provider's view of the user. Provider-specific field names stay inside
//! the implementations; callers only see [`SocialProfile`].

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{OAuthClient, OAuthConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    Google,
    Facebook,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Google => "google",
            Provider::Facebook => "facebook",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "google" => Some(Provider::Google),
            "facebook" => Some(Provider::Facebook),
            _ => None,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the rest of the system knows about an externally authenticated user.
#[derive(Debug, Clone, PartialEq)]
pub struct SocialProfile {
    pub provider: Provider,
    pub provider_id: String,
    pub email: String,
    pub display_name: String,
    pub age: Option<i32>,
    pub gender: Option<String>,
    pub language: Option<String>,
}

#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("{0} login is not configured")]
    NotConfigured(Provider),
    #[error("{provider} code exchange failed: {message}")]
    Exchange { provider: Provider, message: String },
    #[error("{0} did not share an email address")]
    MissingEmail(Provider),
}

#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    fn provider(&self) -> Provider;
    fn authorize_url(&self, state: &str) -> Result<String, OAuthError>;
    async fn exchange(&self, code: &str) -> Result<SocialProfile, OAuthError>;
}

fn callback_url(base: &str, provider: Provider) -> String {
    format!("{}/auth/{}/callback", base.trim_end_matches('/'), provider)
}

fn exchange_err(provider: Provider, message: impl fmt::Display) -> OAuthError {
    OAuthError::Exchange {
        provider,
        message: message.to_string(),
    }
}

pub struct GoogleVerifier {
    client: OAuthClient,
    redirect_uri: String,
    http: Client,
}

impl GoogleVerifier {
    pub fn new(client: OAuthClient, redirect_base_url: &str) -> Self {
        Self {
            client,
            redirect_uri: callback_url(redirect_base_url, Provider::Google),
            http: Client::new(),
        }
    }
}

#[async_trait]
impl IdentityVerifier for GoogleVerifier {
    fn provider(&self) -> Provider {
        Provider::Google
    }

    fn authorize_url(&self, state: &str) -> Result<String, OAuthError> {
        let mut url = Url::parse("https://accounts.google.com/o/oauth2/v2/auth")
            .map_err(|e| exchange_err(Provider::Google, e))?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.client.client_id)
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", "profile email")
            .append_pair("state", state);
        Ok(url.to_string())
    }

    async fn exchange(&self, code: &str) -> Result<SocialProfile, OAuthError> {
        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
        }

        #[derive(Deserialize)]
        struct GoogleUserInfo {
            sub: String,
            email: Option<String>,
            name: Option<String>,
            gender: Option<String>,
            locale: Option<String>,
        }

        let params = [
            ("code", code),
            ("client_id", self.client.client_id.as_str()),
            ("client_secret", self.client.client_secret.as_str()),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("grant_type", "authorization_code"),
        ];
        let token_resp = self
            .http
            .post("https://oauth2.googleapis.com/token")
            .form(&params)
            .send()
            .await
            .map_err(|e| exchange_err(Provider::Google, e))?;
        if !token_resp.status().is_success() {
            return Err(exchange_err(
                Provider::Google,
                format!("token endpoint returned {}", token_resp.status()),
            ));
        }
        let token: TokenResponse = token_resp
            .json()
            .await
            .map_err(|e| exchange_err(Provider::Google, e))?;

        let info: GoogleUserInfo = self
            .http
            .get("https://openidconnect.googleapis.com/v1/userinfo")
            .bearer_auth(&token.access_token)
            .send()
            .await
            .map_err(|e| exchange_err(Provider::Google, e))?
            .error_for_status()
            .map_err(|e| exchange_err(Provider::Google, e))?
            .json()
            .await
            .map_err(|e| exchange_err(Provider::Google, e))?;

        let email = info.email.ok_or(OAuthError::MissingEmail(Provider::Google))?;
        debug!(provider = "google", "exchanged authorization code");
        Ok(SocialProfile {
            provider: Provider::Google,
            display_name: info.name.unwrap_or_else(|| email.clone()),
            email,
            provider_id: info.sub,
            age: None,
            gender: info.gender,
            language: info.locale,
        })
    }
}

pub struct FacebookVerifier {
    client: OAuthClient,
    redirect_uri: String,
    http: Client,
}

impl FacebookVerifier {
    pub fn new(client: OAuthClient, redirect_base_url: &str) -> Self {
        Self {
            client,
            redirect_uri: callback_url(redirect_base_url, Provider::Facebook),
            http: Client::new(),
        }
    }
}

/// Facebook reports an age range rather than an age; the lower bound is used.
fn age_from_range(range: Option<&AgeRange>) -> Option<i32> {
    range.and_then(|r| r.min)
}

#[derive(Debug, Deserialize)]
struct AgeRange {
    min: Option<i32>,
}

#[async_trait]
impl IdentityVerifier for FacebookVerifier {
    fn provider(&self) -> Provider {
        Provider::Facebook
    }

    fn authorize_url(&self, state: &str) -> Result<String, OAuthError> {
        let mut url = Url::parse("https://www.facebook.com/v17.0/dialog/oauth")
            .map_err(|e| exchange_err(Provider::Facebook, e))?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.client.client_id)
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("state", state)
            .append_pair("response_type", "code")
            .append_pair("scope", "public_profile,email");
        Ok(url.to_string())
    }

    async fn exchange(&self, code: &str) -> Result<SocialProfile, OAuthError> {
        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
        }

        #[derive(Deserialize)]
        struct FacebookUser {
            id: String,
            name: Option<String>,
            email: Option<String>,
            gender: Option<String>,
            age_range: Option<AgeRange>,
            locale: Option<String>,
        }

        let params = [
            ("client_id", self.client.client_id.as_str()),
            ("client_secret", self.client.client_secret.as_str()),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("code", code),
        ];
        let token_resp = self
            .http
            .get("https://graph.facebook.com/v17.0/oauth/access_token")
            .query(&params)
            .send()
            .await
            .map_err(|e| exchange_err(Provider::Facebook, e))?;
        if !token_resp.status().is_success() {
            return Err(exchange_err(
                Provider::Facebook,
                format!("token endpoint returned {}", token_resp.status()),
            ));
        }
        let token: TokenResponse = token_resp
            .json()
            .await
            .map_err(|e| exchange_err(Provider::Facebook, e))?;

        let user: FacebookUser = self
            .http
            .get("https://graph.facebook.com/me")
            .query(&[
                ("fields", "id,name,email,gender,age_range,locale"),
                ("access_token", token.access_token.as_str()),
            ])
            .send()
            .await
            .map_err(|e| exchange_err(Provider::Facebook, e))?
            .error_for_status()
            .map_err(|e| exchange_err(Provider::Facebook, e))?
            .json()
            .await
            .map_err(|e| exchange_err(Provider::Facebook, e))?;

        let email = user
            .email
            .ok_or(OAuthError::MissingEmail(Provider::Facebook))?;
        debug!(provider = "facebook", "exchanged authorization code");
        Ok(SocialProfile {
            provider: Provider::Facebook,
            display_name: user.name.unwrap_or_else(|| email.clone()),
            email,
            provider_id: user.id,
            age: age_from_range(user.age_range.as_ref()),
            gender: user.gender,
            language: user.locale,
        })
    }
}

/// The registered verifiers, looked up by provider.
#[derive(Clone, Default)]
pub struct IdentityProviders {
    verifiers: Vec<Arc<dyn IdentityVerifier>>,
}

impl IdentityProviders {
    pub fn from_config(config: &OAuthConfig) -> Self {
        let mut providers = Self::default();
        match &config.google {
            Some(client) => providers.register(Arc::new(GoogleVerifier::new(
                client.clone(),
                &config.redirect_base_url,
            ))),
            None => warn!("GOOGLE_CLIENT_ID/SECRET not set; Google login disabled"),
        }
        match &config.facebook {
            Some(client) => providers.register(Arc::new(FacebookVerifier::new(
                client.clone(),
                &config.redirect_base_url,
            ))),
            None => warn!("FACEBOOK_CLIENT_ID/SECRET not set; Facebook login disabled"),
        }
        providers
    }

    pub fn register(&mut self, verifier: Arc<dyn IdentityVerifier>) {
        let provider = verifier.provider();
        self.verifiers.retain(|v| v.provider() != provider);
        self.verifiers.push(verifier);
    }

    pub fn get(&self, provider: Provider) -> Result<&dyn IdentityVerifier, OAuthError> {
        self.verifiers
            .iter()
            .find(|v| v.provider() == provider)
            .map(|v| v.as_ref())
            .ok_or(OAuthError::NotConfigured(provider))
    }
}
