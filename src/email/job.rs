use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What the mail says, tagged by job kind on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum EmailPayload {
    VerificationCode {
        code: String,
    },
    PasswordResetCode {
        code: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        link: Option<String>,
    },
    TempPassword {
        temp_password: String,
    },
}

/// Unit of work on the email queue. `attempts` counts failed deliveries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailJob {
    pub id: Uuid,
    pub email: String,
    pub fullname: String,
    pub payload: EmailPayload,
    #[serde(default)]
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

impl EmailJob {
    fn new(email: &str, fullname: &str, payload: EmailPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: email.to_string(),
            fullname: fullname.to_string(),
            payload,
            attempts: 0,
        }
    }

    pub fn verification(email: &str, fullname: &str, code: &str) -> Self {
        Self::new(
            email,
            fullname,
            EmailPayload::VerificationCode {
                code: code.to_string(),
            },
        )
    }

    pub fn password_reset(email: &str, fullname: &str, code: &str, link: Option<String>) -> Self {
        Self::new(
            email,
            fullname,
            EmailPayload::PasswordResetCode {
                code: code.to_string(),
                link,
            },
        )
    }

    pub fn temp_password(email: &str, fullname: &str, temp_password: &str) -> Self {
        Self::new(
            email,
            fullname,
            EmailPayload::TempPassword {
                temp_password: temp_password.to_string(),
            },
        )
    }

    pub fn kind(&self) -> &'static str {
        match self.payload {
            EmailPayload::VerificationCode { .. } => "verification-code",
            EmailPayload::PasswordResetCode { .. } => "password-reset-code",
            EmailPayload::TempPassword { .. } => "temp-password",
        }
    }

    pub fn render(&self) -> RenderedEmail {
        let name = &self.fullname;
        let (subject, body) = match &self.payload {
            EmailPayload::VerificationCode { code } => (
                format!("Email Verification for {name}"),
                format!(
                    "Hello {name},\n\nYour email verification code is: {code}.\n\
                     Please enter this code to verify your email.\n\n\
                     This code expires in 10 minutes."
                ),
            ),
            EmailPayload::PasswordResetCode { code, link } => {
                let link_line = link
                    .as_ref()
                    .map(|l| format!("\nYou can also reset it here: {l}\n"))
                    .unwrap_or_default();
                (
                    format!("Password Reset Request for {name}"),
                    format!(
                        "Hello {name},\n\nYou requested a password reset.\n\n\
                         Your password reset code is: {code}.\n\
                         This code expires in 10 minutes.\n{link_line}\n\
                         If you did not request this, please ignore this email."
                    ),
                )
            }
            EmailPayload::TempPassword { temp_password } => (
                format!("Temporary Password for {name}"),
                format!(
                    "Hello {name},\n\nYou recently signed in using a social login provider. \
                     Here is your temporary password: {temp_password}.\n\
                     Use this password when prompted and then set a new password. \
                     It will expire in 30 minutes.\nCheers!"
                ),
            ),
        };
        RenderedEmail {
            to: self.email.clone(),
            subject,
            body,
        }
    }
}
