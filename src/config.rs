use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub session_ttl_secs: u64,
    pub refresh_ttl_secs: u64,
    pub reset_ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    pub command_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    /// Empty host means log-only delivery.
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    pub smtp: SmtpConfig,
    pub worker_enabled: bool,
    pub max_attempts: u32,
    pub retry_base_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OAuthClient {
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OAuthConfig {
    pub google: Option<OAuthClient>,
    pub facebook: Option<OAuthClient>,
    /// Base URL the providers redirect back to, e.g. `https://api.example.com`.
    pub redirect_base_url: String,
    pub failure_redirect: String,
}

/// Profile values used when a social provider does not share them.
#[derive(Debug, Clone, Deserialize)]
pub struct SocialDefaults {
    pub age: i32,
    pub gender: String,
    pub country: String,
    pub preferred_language: String,
    pub height: f64,
    pub weight: f64,
}

impl Default for SocialDefaults {
    fn default() -> Self {
        Self {
            age: 18,
            gender: "unspecified".into(),
            country: "unspecified".into(),
            preferred_language: "English".into(),
            height: 170.0,
            weight: 70.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt: JwtConfig,
    pub redis: RedisConfig,
    pub email: EmailConfig,
    pub oauth: OAuthConfig,
    pub social_defaults: SocialDefaults,
    pub require_email_verification: bool,
    pub reset_link_base_url: Option<String>,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn oauth_client(prefix: &str) -> Option<OAuthClient> {
    let client_id = env_opt(&format!("{prefix}_CLIENT_ID"))?;
    let client_secret = env_opt(&format!("{prefix}_CLIENT_SECRET"))?;
    Some(OAuthClient {
        client_id,
        client_secret,
    })
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")?;
        let secret = std::env::var("JWT_SECRET")?;
        if secret.trim().is_empty() {
            anyhow::bail!("JWT_SECRET is empty");
        }
        let jwt = JwtConfig {
            secret,
            issuer: env_or("JWT_ISSUER", "bmitrack"),
            audience: env_or("JWT_AUDIENCE", "bmitrack-users"),
            session_ttl_secs: env_parse("JWT_SESSION_TTL_SECS", 3600),
            refresh_ttl_secs: env_parse("JWT_REFRESH_TTL_SECS", 604_800),
            reset_ttl_secs: env_parse("JWT_RESET_TTL_SECS", 1800),
        };
        let redis = RedisConfig {
            url: env_or("REDIS_URL", "redis://127.0.0.1:6379"),
            command_timeout_ms: env_parse("REDIS_COMMAND_TIMEOUT_MS", 2000),
        };
        let email = EmailConfig {
            smtp: SmtpConfig {
                host: env_or("SMTP_HOST", ""),
                port: env_parse("SMTP_PORT", 587),
                username: env_opt("SMTP_USERNAME"),
                password: env_opt("SMTP_PASSWORD"),
                from: env_or("SMTP_FROM", "BMI Tracker <no-reply@bmitrack.local>"),
            },
            worker_enabled: env_parse("EMAIL_WORKER_ENABLED", true),
            max_attempts: env_parse("EMAIL_MAX_ATTEMPTS", 5),
            retry_base_ms: env_parse("EMAIL_RETRY_BASE_MS", 1000),
        };
        let oauth = OAuthConfig {
            google: oauth_client("GOOGLE"),
            facebook: oauth_client("FACEBOOK"),
            redirect_base_url: env_or("OAUTH_REDIRECT_BASE_URL", "http://localhost:8080"),
            failure_redirect: env_or("OAUTH_FAILURE_REDIRECT", "/login"),
        };
        let fallback = SocialDefaults::default();
        let social_defaults = SocialDefaults {
            age: env_parse("SOCIAL_DEFAULT_AGE", fallback.age),
            gender: env_or("SOCIAL_DEFAULT_GENDER", &fallback.gender),
            country: env_or("SOCIAL_DEFAULT_COUNTRY", &fallback.country),
            preferred_language: env_or("SOCIAL_DEFAULT_LANGUAGE", &fallback.preferred_language),
            height: env_parse("SOCIAL_DEFAULT_HEIGHT", fallback.height),
            weight: env_parse("SOCIAL_DEFAULT_WEIGHT", fallback.weight),
        };
        Ok(Self {
            database_url,
            jwt,
            redis,
            email,
            oauth,
            social_defaults,
            require_email_verification: env_parse("REQUIRE_EMAIL_VERIFICATION", true),
            reset_link_base_url: env_opt("RESET_LINK_BASE_URL"),
        })
    }
}
