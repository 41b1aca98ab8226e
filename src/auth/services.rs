use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::claims::TokenKind;
use super::jwt::{TokenIssuer, TokenPair};
use super::oauth::{IdentityProviders, Provider, SocialProfile};
use super::password::{hash_password, verify_dummy, verify_password};
use super::secrets::SecretGenerator;
use crate::cache::{keys, ttl, KvCache};
use crate::config::SocialDefaults;
use crate::email::{EmailJob, EmailQueue};
use crate::error::{AppError, AppResult};
use crate::users::repo::UserStore;
use crate::users::repo_types::{DuplicateKey, NewUser, User};

pub(crate) const MIN_PASSWORD_LEN: usize = 8;

/// Wrong guesses allowed against one emailed code before it is discarded.
pub const MAX_CODE_ATTEMPTS: i64 = 5;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex =
            Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("static email regex compiles");
    }
    EMAIL_RE.is_match(email)
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn check_new_password(password: &str) -> AppResult<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::Validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

fn hash(plain: &str) -> AppResult<String> {
    hash_password(plain).map_err(|e| AppError::Internal(e.to_string()))
}

fn matches_hash(plain: &str, hash: &str) -> AppResult<bool> {
    verify_password(plain, hash).map_err(|e| AppError::Internal(e.to_string()))
}

/// Account credentials collected by the first signup step.
#[derive(Debug, Clone, Default)]
pub struct Registration {
    pub email: String,
    pub password: String,
    pub fullname: String,
    pub username: String,
}

/// Profile values collected when the account is created.
#[derive(Debug, Clone)]
pub struct ProfileFields {
    pub age: i32,
    pub gender: String,
    pub country: String,
    pub preferred_language: String,
    pub height: f64,
    pub weight: f64,
}

/// Cached between `verify_email` and `signup`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PendingVerification {
    verification_code: String,
    fullname: String,
    password: String,
    username: String,
}

/// Orchestrates signup, login, token lifecycle, password reset and social
/// login across the user store, the cache, the token issuer and the mail queue.
#[derive(Clone)]
pub struct AuthService {
    users: Arc<dyn UserStore>,
    cache: Arc<dyn KvCache>,
    tokens: TokenIssuer,
    mail: Arc<dyn EmailQueue>,
    secrets: Arc<dyn SecretGenerator>,
    providers: IdentityProviders,
    social_defaults: SocialDefaults,
    reset_link_base_url: Option<String>,
}

pub struct AuthDeps {
    pub users: Arc<dyn UserStore>,
    pub cache: Arc<dyn KvCache>,
    pub tokens: TokenIssuer,
    pub mail: Arc<dyn EmailQueue>,
    pub secrets: Arc<dyn SecretGenerator>,
    pub providers: IdentityProviders,
    pub social_defaults: SocialDefaults,
    pub reset_link_base_url: Option<String>,
}

impl AuthService {
    pub fn new(deps: AuthDeps) -> Self {
        Self {
            users: deps.users,
            cache: deps.cache,
            tokens: deps.tokens,
            mail: deps.mail,
            secrets: deps.secrets,
            providers: deps.providers,
            social_defaults: deps.social_defaults,
            reset_link_base_url: deps.reset_link_base_url,
        }
    }

    async fn conflicts(&self, email: &str, username: &str) -> AppResult<Option<String>> {
        let existing = self
            .users
            .find_conflicts(email, username)
            .await
            .map_err(AppError::db)?;
        let mut messages = Vec::new();
        if existing.iter().any(|u| u.email == email) {
            messages.push("Email is already in use.");
        }
        if existing.iter().any(|u| u.username == username) {
            messages.push("Username is already in use.");
        }
        Ok((!messages.is_empty()).then(|| messages.join(" ")))
    }

    async fn create_user(&self, user: NewUser) -> AppResult<User> {
        self.users.create(user).await.map_err(|e| match DuplicateKey::find(&e) {
            Some(DuplicateKey("username")) => AppError::Conflict("Username is already in use.".into()),
            Some(_) => AppError::Conflict("Email is already in use.".into()),
            None => AppError::db(e),
        })
    }

    fn validate_registration(reg: &mut Registration) -> AppResult<()> {
        reg.email = normalize_email(&reg.email);
        reg.username = reg.username.trim().to_string();
        reg.fullname = reg.fullname.trim().to_string();
        if reg.email.is_empty() {
            return Err(AppError::Validation("Email is required.".into()));
        }
        if !is_valid_email(&reg.email) {
            return Err(AppError::Validation("Invalid email format.".into()));
        }
        if reg.fullname.is_empty() {
            return Err(AppError::Validation("Fullname is required.".into()));
        }
        if reg.username.is_empty() {
            return Err(AppError::Validation("Username is required.".into()));
        }
        if reg.password.is_empty() {
            return Err(AppError::Validation("Password is required.".into()));
        }
        check_new_password(&reg.password)
    }

    fn validate_profile(profile: &ProfileFields) -> AppResult<()> {
        if profile.age <= 0 {
            return Err(AppError::Validation(
                "Invalid age provided. Age must be a positive number".into(),
            ));
        }
        if profile.height < 0.0 || profile.weight < 0.0 {
            return Err(AppError::Validation(
                "Height and weight cannot be negative".into(),
            ));
        }
        Ok(())
    }

    /// First signup step: checks uniqueness, mails a code and parks the
    /// registration in the cache until the code comes back.
    pub async fn verify_email(&self, mut reg: Registration) -> AppResult<()> {
        Self::validate_registration(&mut reg)?;
        if let Some(message) = self.conflicts(&reg.email, &reg.username).await? {
            warn!(email = %reg.email, "signup conflict");
            return Err(AppError::Conflict(message));
        }

        let code = self.secrets.verification_code();
        let pending = PendingVerification {
            verification_code: code.clone(),
            fullname: reg.fullname.clone(),
            password: reg.password,
            username: reg.username,
        };
        let bundle =
            serde_json::to_string(&pending).map_err(|e| AppError::Internal(e.to_string()))?;
        self.cache
            .set(&keys::verify(&reg.email), &bundle, ttl::VERIFICATION)
            .await?;
        self.cache.del(&keys::verify_attempts(&reg.email)).await?;
        self.mail
            .enqueue(EmailJob::verification(&reg.email, &reg.fullname, &code))
            .await?;
        info!(email = %reg.email, "verification code issued");
        Ok(())
    }

    /// Second signup step: trades a matching code for a user row.
    pub async fn signup(&self, email: &str, code: &str, profile: ProfileFields) -> AppResult<User> {
        let email = normalize_email(email);
        if email.is_empty() || code.trim().is_empty() {
            return Err(AppError::Validation(
                "Email and verification code are required.".into(),
            ));
        }
        Self::validate_profile(&profile)?;

        let key = keys::verify(&email);
        let raw = self
            .cache
            .get(&key)
            .await?
            .ok_or(AppError::VerificationMissing)?;
        let pending: PendingVerification = serde_json::from_str(&raw).map_err(|e| {
            warn!(error = %e, email = %email, "corrupt verification bundle");
            AppError::VerificationMissing
        })?;
        if pending.verification_code != code.trim() {
            let attempts = self
                .record_code_miss(&keys::verify_attempts(&email), &key, ttl::VERIFICATION)
                .await?;
            warn!(email = %email, attempts, "verification code mismatch");
            return Err(AppError::CodeMismatch);
        }

        let user = self
            .create_user(NewUser {
                email: email.clone(),
                username: pending.username,
                password_hash: hash(&pending.password)?,
                fullname: pending.fullname,
                age: profile.age,
                gender: profile.gender,
                country: profile.country,
                preferred_language: profile.preferred_language,
                height: profile.height,
                weight: profile.weight,
                social_login: false,
            })
            .await?;
        self.cache.del(&key).await?;
        self.cache.del(&keys::verify_attempts(&email)).await?;
        info!(user_id = %user.id, email = %user.email, "user verified and created");
        Ok(user)
    }

    /// Single-step signup used when email verification is switched off.
    pub async fn signup_direct(
        &self,
        mut reg: Registration,
        profile: ProfileFields,
    ) -> AppResult<User> {
        Self::validate_registration(&mut reg)?;
        Self::validate_profile(&profile)?;
        if let Some(message) = self.conflicts(&reg.email, &reg.username).await? {
            return Err(AppError::Conflict(message));
        }
        let user = self
            .create_user(NewUser {
                email: reg.email,
                username: reg.username,
                password_hash: hash(&reg.password)?,
                fullname: reg.fullname,
                age: profile.age,
                gender: profile.gender,
                country: profile.country,
                preferred_language: profile.preferred_language,
                height: profile.height,
                weight: profile.weight,
                social_login: false,
            })
            .await?;
        info!(user_id = %user.id, email = %user.email, "user registered");
        Ok(user)
    }

    /// Signs a fresh pair and makes it the live pair for the user.
    async fn start_session(&self, user_id: Uuid) -> AppResult<TokenPair> {
        let pair = self.tokens.issue(user_id)?;
        self.cache
            .set(
                &keys::session_token(user_id),
                &pair.session_token,
                self.tokens.session_ttl().as_secs(),
            )
            .await?;
        self.cache
            .set(
                &keys::refresh_token(user_id),
                &pair.refresh_token,
                self.tokens.refresh_ttl().as_secs(),
            )
            .await?;
        Ok(pair)
    }

    pub async fn login(&self, email: &str, password: &str) -> AppResult<TokenPair> {
        let email = normalize_email(email);
        let user = self.users.find_by_email(&email).await.map_err(AppError::db)?;
        let Some(user) = user else {
            verify_dummy(password);
            warn!(email = %email, "login unknown email");
            return Err(AppError::InvalidCredentials);
        };
        if !matches_hash(password, &user.password_hash)? {
            warn!(user_id = %user.id, "login invalid password");
            return Err(AppError::InvalidCredentials);
        }
        let pair = self.start_session(user.id).await?;
        info!(user_id = %user.id, "user logged in");
        Ok(pair)
    }

    /// New session token for a live refresh token. The refresh token itself
    /// is not rotated.
    pub async fn refresh(&self, refresh_token: Option<&str>) -> AppResult<String> {
        let token = refresh_token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AppError::RefreshTokenRequired)?;
        let claims = self
            .tokens
            .verify(token, TokenKind::Refresh)
            .map_err(|e| {
                debug!(error = %e, "refresh token rejected");
                AppError::InvalidRefreshToken
            })?;

        self.cache.reconnect().await?;
        let stored = self.cache.get(&keys::refresh_token(claims.sub)).await?;
        if stored.as_deref() != Some(token) {
            warn!(user_id = %claims.sub, "refresh token not live");
            return Err(AppError::InvalidRefreshToken);
        }

        let session_token = self.tokens.sign(claims.sub, TokenKind::Session)?;
        self.cache
            .set(
                &keys::session_token(claims.sub),
                &session_token,
                self.tokens.session_ttl().as_secs(),
            )
            .await?;
        info!(user_id = %claims.sub, "session token refreshed");
        Ok(session_token)
    }

    pub async fn logout(
        &self,
        session_token: Option<&str>,
        refresh_token: Option<&str>,
    ) -> AppResult<()> {
        let (Some(session_token), Some(refresh_token)) = (
            session_token.filter(|t| !t.is_empty()),
            refresh_token.filter(|t| !t.is_empty()),
        ) else {
            return Err(AppError::Validation(
                "Session token and refresh token are required".into(),
            ));
        };
        let session = self
            .tokens
            .verify(session_token, TokenKind::Session)
            .map_err(|_| AppError::LogoutError)?;
        let refresh = self
            .tokens
            .verify(refresh_token, TokenKind::Refresh)
            .map_err(|_| AppError::LogoutError)?;

        let session_key = keys::session_token(session.sub);
        let refresh_key = keys::refresh_token(refresh.sub);
        let live_session = self.cache.get(&session_key).await?;
        let live_refresh = self.cache.get(&refresh_key).await?;
        if live_session.as_deref() != Some(session_token)
            || live_refresh.as_deref() != Some(refresh_token)
        {
            warn!(user_id = %session.sub, "logout with tokens that are no longer live");
            return Err(AppError::LogoutError);
        }

        self.cache.del(&session_key).await?;
        self.cache.del(&refresh_key).await?;
        info!(user_id = %session.sub, "user logged out");
        Ok(())
    }

    /// Resolves a bearer session token to its user, requiring it to be the
    /// user's live session.
    pub async fn authenticate(&self, token: &str) -> AppResult<Uuid> {
        let claims = self.tokens.verify(token, TokenKind::Session)?;
        let live = self.cache.get(&keys::session_token(claims.sub)).await?;
        if live.as_deref() != Some(token) {
            debug!(user_id = %claims.sub, "session superseded");
            return Err(AppError::SessionSuperseded);
        }
        Ok(claims.sub)
    }

    /// Drops both live tokens of a user.
    pub async fn revoke_sessions(&self, user_id: Uuid) -> AppResult<()> {
        self.cache.del(&keys::session_token(user_id)).await?;
        self.cache.del(&keys::refresh_token(user_id)).await?;
        Ok(())
    }

    /// Counts a wrong guess against an emailed code; at the limit the code
    /// itself is discarded so the user has to request a new one.
    async fn record_code_miss(
        &self,
        counter_key: &str,
        code_key: &str,
        ttl_secs: u64,
    ) -> AppResult<i64> {
        let attempts = self.cache.incr(counter_key, ttl_secs).await?;
        if attempts >= MAX_CODE_ATTEMPTS {
            warn!(key = %code_key, attempts, "too many wrong codes; discarding");
            self.cache.del(code_key).await?;
            self.cache.del(counter_key).await?;
        }
        Ok(attempts)
    }

    /// Signs a reset-link token and records its `jti` as the only live one
    /// for the user.
    async fn reset_link(&self, user_id: Uuid) -> AppResult<Option<String>> {
        let Some(base) = &self.reset_link_base_url else {
            return Ok(None);
        };
        let (token, claims) = self
            .tokens
            .sign_with_claims(user_id, TokenKind::PasswordReset)?;
        self.cache
            .set(
                &keys::reset_link(user_id),
                &claims.jti.to_string(),
                self.tokens.reset_ttl().as_secs(),
            )
            .await?;
        Ok(Some(format!(
            "{}/reset-password?token={}",
            base.trim_end_matches('/'),
            urlencoding::encode(&token)
        )))
    }

    pub async fn request_reset(&self, email: &str) -> AppResult<()> {
        let email = normalize_email(email);
        if !is_valid_email(&email) {
            return Err(AppError::Validation(
                "A valid email address is required".into(),
            ));
        }
        let user = self
            .users
            .find_by_email(&email)
            .await
            .map_err(AppError::db)?
            .ok_or_else(|| AppError::NotFound("Invalid email, user not found".into()))?;

        let code = self.secrets.reset_code();
        self.cache
            .set(&keys::reset(&email), &code, ttl::RESET_CODE)
            .await?;
        self.cache.del(&keys::reset_attempts(&email)).await?;
        let link = self.reset_link(user.id).await?;
        self.mail
            .enqueue(EmailJob::password_reset(&email, &user.fullname, &code, link))
            .await?;
        info!(user_id = %user.id, "password reset code issued");
        Ok(())
    }

    async fn replace_password(&self, user: &User, new_password: &str) -> AppResult<()> {
        check_new_password(new_password)?;
        if matches_hash(new_password, &user.password_hash)? {
            return Err(AppError::SamePassword);
        }
        self.users
            .update_password(user.id, &hash(new_password)?, user.social_login)
            .await
            .map_err(AppError::db)
    }

    pub async fn perform_reset(&self, email: &str, code: &str, new_password: &str) -> AppResult<()> {
        let email = normalize_email(email);
        if email.is_empty() || code.trim().is_empty() || new_password.is_empty() {
            return Err(AppError::Validation(
                "Email, reset code, and new password are required".into(),
            ));
        }
        let key = keys::reset(&email);
        let Some(stored) = self.cache.get(&key).await? else {
            warn!(email = %email, "reset code missing or expired");
            return Err(AppError::InvalidOrExpiredCode);
        };
        if stored != code.trim() {
            let attempts = self
                .record_code_miss(&keys::reset_attempts(&email), &key, ttl::RESET_CODE)
                .await?;
            warn!(email = %email, attempts, "invalid reset code");
            return Err(AppError::InvalidOrExpiredCode);
        }
        let user = self
            .users
            .find_by_email(&email)
            .await
            .map_err(AppError::db)?
            .ok_or_else(|| AppError::NotFound("User not found".into()))?;

        self.replace_password(&user, new_password).await?;
        self.clear_reset_state(&user).await?;
        info!(user_id = %user.id, "password reset");
        Ok(())
    }

    pub async fn perform_reset_with_token(&self, token: &str, new_password: &str) -> AppResult<()> {
        if token.trim().is_empty() {
            return Err(AppError::Validation("Token is missing".into()));
        }
        let claims = self.tokens.verify(token.trim(), TokenKind::PasswordReset)?;
        let live = self.cache.get(&keys::reset_link(claims.sub)).await?;
        if live.as_deref() != Some(claims.jti.to_string().as_str()) {
            warn!(user_id = %claims.sub, "reset link already used or superseded");
            return Err(AppError::TokenInvalid);
        }
        let user = self
            .users
            .find_by_id(claims.sub)
            .await
            .map_err(AppError::db)?
            .ok_or_else(|| AppError::NotFound("User not found".into()))?;
        self.replace_password(&user, new_password).await?;
        self.clear_reset_state(&user).await?;
        info!(user_id = %user.id, "password reset via link");
        Ok(())
    }

    /// A completed reset spends both the code and the link of the request.
    async fn clear_reset_state(&self, user: &User) -> AppResult<()> {
        self.cache.del(&keys::reset(&user.email)).await?;
        self.cache.del(&keys::reset_attempts(&user.email)).await?;
        self.cache.del(&keys::reset_link(user.id)).await?;
        Ok(())
    }

    async fn deliver_temp_password(&self, email: &str, fullname: &str, temp: &str) -> AppResult<()> {
        self.cache
            .set(&keys::temp_password(email), temp, ttl::TEMP_PASSWORD)
            .await?;
        self.mail
            .enqueue(EmailJob::temp_password(email, fullname, temp))
            .await?;
        Ok(())
    }

    /// Creates an account for a first-time social login and opens a session.
    pub async fn social_bootstrap(&self, profile: SocialProfile) -> AppResult<TokenPair> {
        let email = normalize_email(&profile.email);
        if self
            .users
            .find_by_email(&email)
            .await
            .map_err(AppError::db)?
            .is_some()
        {
            warn!(email = %email, provider = %profile.provider, "social login for existing account");
            return Err(AppError::SocialAccountExists);
        }

        let defaults = &self.social_defaults;
        let temp = self.secrets.temp_password();
        let user = self
            .create_user(NewUser {
                email,
                username: format!("{}_{}", profile.provider, profile.provider_id),
                password_hash: hash(&temp)?,
                fullname: profile.display_name,
                age: profile.age.filter(|a| *a > 0).unwrap_or(defaults.age),
                gender: profile.gender.unwrap_or_else(|| defaults.gender.clone()),
                country: defaults.country.clone(),
                preferred_language: profile
                    .language
                    .unwrap_or_else(|| defaults.preferred_language.clone()),
                height: defaults.height,
                weight: defaults.weight,
                social_login: true,
            })
            .await?;
        self.deliver_temp_password(&user.email, &user.fullname, &temp)
            .await?;
        let pair = self.start_session(user.id).await?;
        info!(user_id = %user.id, provider = %profile.provider, "social account created");
        Ok(pair)
    }

    /// Replaces the temporary password of a social account with a real one.
    pub async fn set_password(
        &self,
        email: &str,
        temp_password: &str,
        new_password: &str,
    ) -> AppResult<()> {
        let email = normalize_email(email);
        let key = keys::temp_password(&email);
        let stored = self.cache.get(&key).await?;
        let user = self
            .users
            .find_by_email(&email)
            .await
            .map_err(AppError::db)?;

        let Some(stored) = stored else {
            let user = user.ok_or_else(|| AppError::NotFound("User not found".into()))?;
            if !user.social_login {
                return Err(AppError::PasswordAlreadySet);
            }
            let temp = self.secrets.temp_password();
            self.users
                .update_password(user.id, &hash(&temp)?, true)
                .await
                .map_err(AppError::db)?;
            self.deliver_temp_password(&user.email, &user.fullname, &temp)
                .await?;
            info!(user_id = %user.id, "temporary password reissued");
            return Err(AppError::TempPasswordReissued);
        };

        if stored != temp_password {
            return Err(AppError::InvalidTempPassword);
        }
        let user = user.ok_or_else(|| AppError::NotFound("User not found".into()))?;
        if !user.social_login {
            return Err(AppError::PasswordAlreadySet);
        }
        if new_password == stored {
            return Err(AppError::TempPasswordReuse);
        }
        check_new_password(new_password)?;

        self.users
            .update_password(user.id, &hash(new_password)?, false)
            .await
            .map_err(AppError::db)?;
        self.cache.del(&key).await?;
        info!(user_id = %user.id, "password set after social login");
        Ok(())
    }

    /// Stores a fresh OAuth state and returns the provider consent URL.
    pub async fn begin_oauth(&self, provider: Provider) -> AppResult<String> {
        let verifier = self
            .providers
            .get(provider)
            .map_err(|e| AppError::NotFound(e.to_string()))?;
        let state = self.secrets.oauth_state();
        self.cache
            .set(&keys::oauth_state(&state), provider.as_str(), ttl::OAUTH_STATE)
            .await?;
        verifier
            .authorize_url(&state)
            .map_err(|e| AppError::Internal(e.to_string()))
    }

    /// Consumes the state, exchanges the code and bootstraps the account.
    pub async fn complete_oauth(
        &self,
        provider: Provider,
        code: &str,
        state: &str,
    ) -> AppResult<TokenPair> {
        let key = keys::oauth_state(state);
        let stored = self.cache.get(&key).await?;
        if stored.as_deref() != Some(provider.as_str()) {
            warn!(provider = %provider, "oauth state missing or mismatched");
            return Err(AppError::Validation("Invalid OAuth state".into()));
        }
        self.cache.del(&key).await?;

        let verifier = self
            .providers
            .get(provider)
            .map_err(|e| AppError::NotFound(e.to_string()))?;
        let profile = verifier.exchange(code).await.map_err(|e| {
            warn!(error = %e, "oauth code exchange failed");
            AppError::Validation("Social login failed".into())
        })?;
        self.social_bootstrap(profile).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::oauth::{IdentityVerifier, OAuthError};
    use crate::auth::secrets::FixedSecrets;
    use crate::cache::MemoryCache;
    use crate::config::JwtConfig;
    use crate::email::{EmailPayload, MemoryEmailQueue};
    use crate::users::memory::MemoryStore;
    use async_trait::async_trait;

    struct Harness {
        auth: AuthService,
        store: Arc<MemoryStore>,
        cache: Arc<MemoryCache>,
        queue: Arc<MemoryEmailQueue>,
    }

    struct StubVerifier;

    #[async_trait]
    impl IdentityVerifier for StubVerifier {
        fn provider(&self) -> Provider {
            Provider::Google
        }
        fn authorize_url(&self, state: &str) -> Result<String, OAuthError> {
            Ok(format!("https://consent.example/?state={state}"))
        }
        async fn exchange(&self, code: &str) -> Result<SocialProfile, OAuthError> {
            Ok(SocialProfile {
                provider: Provider::Google,
                provider_id: code.to_string(),
                email: "social@x.com".into(),
                display_name: "Social User".into(),
                age: None,
                gender: None,
                language: None,
            })
        }
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(MemoryCache::new());
        let queue = Arc::new(MemoryEmailQueue::new());
        let tokens = TokenIssuer::new(&JwtConfig {
            secret: "unit-test-secret".into(),
            issuer: "bmitrack".into(),
            audience: "bmitrack-users".into(),
            session_ttl_secs: 3600,
            refresh_ttl_secs: 604_800,
            reset_ttl_secs: 1800,
        })
        .unwrap();
        let mut providers = IdentityProviders::default();
        providers.register(Arc::new(StubVerifier));
        let auth = AuthService::new(AuthDeps {
            users: store.clone(),
            cache: cache.clone(),
            tokens,
            mail: queue.clone(),
            secrets: Arc::new(FixedSecrets {
                code: "4821".into(),
                temp_password: "a1b2c3d4e5f6".into(),
            }),
            providers,
            social_defaults: SocialDefaults::default(),
            reset_link_base_url: Some("https://app.example".into()),
        });
        Harness {
            auth,
            store,
            cache,
            queue,
        }
    }

    fn registration() -> Registration {
        Registration {
            email: "Ada@Example.com ".into(),
            password: "Secret123".into(),
            fullname: "Ada Lovelace".into(),
            username: "ada".into(),
        }
    }

    fn profile() -> ProfileFields {
        ProfileFields {
            age: 36,
            gender: "female".into(),
            country: "UK".into(),
            preferred_language: "English".into(),
            height: 165.0,
            weight: 60.0,
        }
    }

    async fn registered(h: &Harness) -> User {
        h.auth.verify_email(registration()).await.unwrap();
        h.auth
            .signup("ada@example.com", "4821", profile())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn verified_signup_consumes_the_code() {
        let h = harness();
        h.auth.verify_email(registration()).await.unwrap();
        let jobs = h.queue.pending_jobs().await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(
            jobs[0].payload,
            EmailPayload::VerificationCode {
                code: "4821".into()
            }
        );

        let user = h
            .auth
            .signup("ada@example.com", "4821", profile())
            .await
            .unwrap();
        assert_eq!(user.email, "ada@example.com");
        assert_ne!(user.password_hash, "Secret123");
        assert!(h.cache.get("verify:ada@example.com").await.unwrap().is_none());

        let replay = h.auth.signup("ada@example.com", "4821", profile()).await;
        assert!(matches!(replay, Err(AppError::VerificationMissing)));
    }

    #[tokio::test]
    async fn wrong_code_keeps_pending_registration() {
        let h = harness();
        h.auth.verify_email(registration()).await.unwrap();
        let res = h.auth.signup("ada@example.com", "0000", profile()).await;
        assert!(matches!(res, Err(AppError::CodeMismatch)));
        assert!(h.cache.get("verify:ada@example.com").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn duplicate_email_and_username_are_enumerated() {
        let h = harness();
        registered(&h).await;
        let err = h.auth.verify_email(registration()).await.unwrap_err();
        match err {
            AppError::Conflict(msg) => {
                assert_eq!(msg, "Email is already in use. Username is already in use.")
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_email_is_a_validation_error() {
        let h = harness();
        let mut reg = registration();
        reg.email = "not-an-email".into();
        assert!(matches!(
            h.auth.verify_email(reg).await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn login_failures_are_indistinguishable() {
        let h = harness();
        registered(&h).await;
        let wrong = h.auth.login("ada@example.com", "nope-nope").await.unwrap_err();
        let unknown = h.auth.login("ghost@example.com", "Secret123").await.unwrap_err();
        assert_eq!(wrong.to_string(), unknown.to_string());
        assert_eq!(wrong.status(), unknown.status());
    }

    #[tokio::test]
    async fn refresh_supersedes_session_but_keeps_refresh_token() {
        let h = harness();
        let user = registered(&h).await;
        let pair = h.auth.login("ada@example.com", "Secret123").await.unwrap();
        assert_eq!(h.auth.authenticate(&pair.session_token).await.unwrap(), user.id);

        let new_session = h.auth.refresh(Some(&pair.refresh_token)).await.unwrap();
        assert!(matches!(
            h.auth.authenticate(&pair.session_token).await,
            Err(AppError::SessionSuperseded)
        ));
        assert_eq!(h.auth.authenticate(&new_session).await.unwrap(), user.id);
        assert_eq!(
            h.cache.get(&keys::refresh_token(user.id)).await.unwrap(),
            Some(pair.refresh_token)
        );
    }

    #[tokio::test]
    async fn refresh_rejections() {
        let h = harness();
        registered(&h).await;
        let pair = h.auth.login("ada@example.com", "Secret123").await.unwrap();
        assert!(matches!(
            h.auth.refresh(None).await,
            Err(AppError::RefreshTokenRequired)
        ));
        // a session token is the wrong kind
        assert!(matches!(
            h.auth.refresh(Some(&pair.session_token)).await,
            Err(AppError::InvalidRefreshToken)
        ));
        // superseded by a second login
        h.auth.login("ada@example.com", "Secret123").await.unwrap();
        assert!(matches!(
            h.auth.refresh(Some(&pair.refresh_token)).await,
            Err(AppError::InvalidRefreshToken)
        ));
    }

    #[tokio::test]
    async fn logout_twice_fails_the_second_time() {
        let h = harness();
        registered(&h).await;
        let pair = h.auth.login("ada@example.com", "Secret123").await.unwrap();
        h.auth
            .logout(Some(&pair.session_token), Some(&pair.refresh_token))
            .await
            .unwrap();
        assert!(matches!(
            h.auth
                .logout(Some(&pair.session_token), Some(&pair.refresh_token))
                .await,
            Err(AppError::LogoutError)
        ));
        assert!(matches!(
            h.auth.logout(None, Some(&pair.refresh_token)).await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn reset_code_is_single_use_and_rejects_same_password() {
        let h = harness();
        registered(&h).await;
        h.auth.request_reset("ada@example.com").await.unwrap();

        assert!(matches!(
            h.auth
                .perform_reset("ada@example.com", "4821", "Secret123")
                .await,
            Err(AppError::SamePassword)
        ));
        h.auth
            .perform_reset("ada@example.com", "4821", "NewSecret456")
            .await
            .unwrap();
        assert!(matches!(
            h.auth
                .perform_reset("ada@example.com", "4821", "Another789x")
                .await,
            Err(AppError::InvalidOrExpiredCode)
        ));
        h.auth.login("ada@example.com", "NewSecret456").await.unwrap();
    }

    #[tokio::test]
    async fn reset_email_carries_a_working_link() {
        let h = harness();
        registered(&h).await;
        h.auth.request_reset("ada@example.com").await.unwrap();
        let jobs = h.queue.pending_jobs().await;
        let link = jobs
            .iter()
            .find_map(|j| match &j.payload {
                EmailPayload::PasswordResetCode { link, .. } => link.clone(),
                _ => None,
            })
            .expect("reset link");
        let token = link
            .split("token=")
            .nth(1)
            .map(|t| urlencoding::decode(t).unwrap().into_owned())
            .unwrap();
        h.auth
            .perform_reset_with_token(&token, "LinkReset123")
            .await
            .unwrap();
        h.auth.login("ada@example.com", "LinkReset123").await.unwrap();
        assert!(matches!(
            h.auth.perform_reset_with_token("garbage", "LinkReset123").await,
            Err(AppError::TokenInvalid)
        ));
    }

    async fn mailed_reset_token(h: &Harness) -> String {
        let jobs = h.queue.pending_jobs().await;
        let link = jobs
            .iter()
            .rev()
            .find_map(|j| match &j.payload {
                EmailPayload::PasswordResetCode { link, .. } => link.clone(),
                _ => None,
            })
            .expect("reset link");
        let token = link.split("token=").nth(1).unwrap();
        urlencoding::decode(token).unwrap().into_owned()
    }

    #[tokio::test]
    async fn reset_link_cannot_be_replayed() {
        let h = harness();
        registered(&h).await;
        h.auth.request_reset("ada@example.com").await.unwrap();
        let token = mailed_reset_token(&h).await;
        h.auth
            .perform_reset_with_token(&token, "LinkReset123")
            .await
            .unwrap();
        assert!(matches!(
            h.auth.perform_reset_with_token(&token, "Hijacked999").await,
            Err(AppError::TokenInvalid)
        ));
        h.auth.login("ada@example.com", "LinkReset123").await.unwrap();
    }

    #[tokio::test]
    async fn code_reset_spends_the_mailed_link() {
        let h = harness();
        let user = registered(&h).await;
        h.auth.request_reset("ada@example.com").await.unwrap();
        let token = mailed_reset_token(&h).await;
        h.auth
            .perform_reset("ada@example.com", "4821", "CodeReset123")
            .await
            .unwrap();
        assert!(h.cache.get(&keys::reset_link(user.id)).await.unwrap().is_none());
        assert!(matches!(
            h.auth.perform_reset_with_token(&token, "Hijacked999").await,
            Err(AppError::TokenInvalid)
        ));
    }

    #[tokio::test]
    async fn newer_reset_request_supersedes_the_older_link() {
        let h = harness();
        registered(&h).await;
        h.auth.request_reset("ada@example.com").await.unwrap();
        let first = mailed_reset_token(&h).await;
        h.auth.request_reset("ada@example.com").await.unwrap();
        let second = mailed_reset_token(&h).await;
        assert_ne!(first, second);
        assert!(matches!(
            h.auth.perform_reset_with_token(&first, "LinkReset123").await,
            Err(AppError::TokenInvalid)
        ));
        h.auth
            .perform_reset_with_token(&second, "LinkReset123")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn verification_code_is_discarded_after_too_many_misses() {
        let h = harness();
        h.auth.verify_email(registration()).await.unwrap();
        for _ in 0..MAX_CODE_ATTEMPTS {
            assert!(matches!(
                h.auth.signup("ada@example.com", "0000", profile()).await,
                Err(AppError::CodeMismatch)
            ));
        }
        assert!(matches!(
            h.auth.signup("ada@example.com", "4821", profile()).await,
            Err(AppError::VerificationMissing)
        ));

        // a fresh code starts a fresh count
        h.auth.verify_email(registration()).await.unwrap();
        h.auth
            .signup("ada@example.com", "0000", profile())
            .await
            .unwrap_err();
        h.auth
            .signup("ada@example.com", "4821", profile())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn reset_code_is_discarded_after_too_many_misses() {
        let h = harness();
        registered(&h).await;
        h.auth.request_reset("ada@example.com").await.unwrap();
        for _ in 0..MAX_CODE_ATTEMPTS {
            assert!(matches!(
                h.auth
                    .perform_reset("ada@example.com", "0000", "NewSecret456")
                    .await,
                Err(AppError::InvalidOrExpiredCode)
            ));
        }
        assert!(h.cache.get("reset:ada@example.com").await.unwrap().is_none());
        assert!(matches!(
            h.auth
                .perform_reset("ada@example.com", "4821", "NewSecret456")
                .await,
            Err(AppError::InvalidOrExpiredCode)
        ));
        h.auth.login("ada@example.com", "Secret123").await.unwrap();
    }

    #[tokio::test]
    async fn request_reset_for_unknown_email_is_not_found() {
        let h = harness();
        assert!(matches!(
            h.auth.request_reset("ghost@example.com").await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            h.auth.request_reset("ghost").await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn social_bootstrap_then_set_password() {
        let h = harness();
        let url = h.auth.begin_oauth(Provider::Google).await.unwrap();
        assert!(url.contains("state=fixed-state"));
        let pair = h
            .auth
            .complete_oauth(Provider::Google, "g-123", "fixed-state")
            .await
            .unwrap();

        let user = h.store.find_by_email("social@x.com").await.unwrap().unwrap();
        assert!(user.social_login && user.is_social_login);
        assert_eq!(user.username, "google_g-123");
        assert_ne!(user.password_hash, "a1b2c3d4e5f6");
        assert_eq!(h.auth.authenticate(&pair.session_token).await.unwrap(), user.id);

        // state is single use
        assert!(h
            .auth
            .complete_oauth(Provider::Google, "g-123", "fixed-state")
            .await
            .is_err());

        assert!(matches!(
            h.auth.set_password("social@x.com", "wrong", "MyPassword1").await,
            Err(AppError::InvalidTempPassword)
        ));
        assert!(matches!(
            h.auth
                .set_password("social@x.com", "a1b2c3d4e5f6", "a1b2c3d4e5f6")
                .await,
            Err(AppError::TempPasswordReuse)
        ));
        h.auth
            .set_password("social@x.com", "a1b2c3d4e5f6", "MyPassword1")
            .await
            .unwrap();
        assert!(matches!(
            h.auth
                .set_password("social@x.com", "a1b2c3d4e5f6", "MyPassword2")
                .await,
            Err(AppError::PasswordAlreadySet)
        ));
        h.auth.login("social@x.com", "MyPassword1").await.unwrap();
    }

    #[tokio::test]
    async fn social_login_for_existing_email_is_rejected() {
        let h = harness();
        registered(&h).await;
        let res = h
            .auth
            .social_bootstrap(SocialProfile {
                provider: Provider::Facebook,
                provider_id: "fb-1".into(),
                email: "ada@example.com".into(),
                display_name: "Ada".into(),
                age: None,
                gender: None,
                language: None,
            })
            .await;
        assert!(matches!(res, Err(AppError::SocialAccountExists)));
    }

    #[tokio::test]
    async fn expired_temp_password_is_reissued() {
        let h = harness();
        h.auth
            .complete_oauth(Provider::Google, "g-9", "fixed-state")
            .await
            .unwrap_err();
        h.auth.begin_oauth(Provider::Google).await.unwrap();
        h.auth
            .complete_oauth(Provider::Google, "g-9", "fixed-state")
            .await
            .unwrap();
        h.cache.del("tempPassword:social@x.com").await.unwrap();

        let res = h
            .auth
            .set_password("social@x.com", "a1b2c3d4e5f6", "MyPassword1")
            .await;
        assert!(matches!(res, Err(AppError::TempPasswordReissued)));
        assert_eq!(
            h.cache
                .get("tempPassword:social@x.com")
                .await
                .unwrap()
                .as_deref(),
            Some("a1b2c3d4e5f6")
        );
        let temp_mails = h
            .queue
            .pending_jobs()
            .await
            .into_iter()
            .filter(|j| j.kind() == "temp-password")
            .count();
        assert_eq!(temp_mails, 2);
    }
}
