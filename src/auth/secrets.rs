use rand::{rngs::OsRng, Rng, RngCore};

/// Source of the one-time values mailed to users.
pub trait SecretGenerator: Send + Sync {
    /// 4-digit email verification code.
    fn verification_code(&self) -> String;
    /// 4-digit password reset code.
    fn reset_code(&self) -> String;
    /// Temporary password for accounts bootstrapped from a social login.
    fn temp_password(&self) -> String;
    /// Opaque value for the OAuth `state` parameter.
    fn oauth_state(&self) -> String;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RandomSecrets;

fn four_digits() -> String {
    OsRng.gen_range(1000..10000).to_string()
}

impl SecretGenerator for RandomSecrets {
    fn verification_code(&self) -> String {
        four_digits()
    }

    fn reset_code(&self) -> String {
        four_digits()
    }

    fn temp_password(&self) -> String {
        let mut buf = [0u8; 6];
        OsRng.fill_bytes(&mut buf);
        hex::encode(buf)
    }

    fn oauth_state(&self) -> String {
        let mut buf = [0u8; 16];
        OsRng.fill_bytes(&mut buf);
        hex::encode(buf)
    }
}

/// Deterministic values for tests and local demos.
#[derive(Debug, Clone)]
pub struct FixedSecrets {
    pub code: String,
    pub temp_password: String,
}

impl SecretGenerator for FixedSecrets {
    fn verification_code(&self) -> String {
        self.code.clone()
    }

    fn reset_code(&self) -> String {
        self.code.clone()
    }

    fn temp_password(&self) -> String {
        self.temp_password.clone()
    }

    fn oauth_state(&self) -> String {
        "fixed-state".into()
    }
}
