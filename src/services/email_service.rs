// ============================================================================
// EMAIL SERVICE - OTP code delivery
// ============================================================================
// Transport cascade: Resend API, then SMTP, then a logging simulator when
// nothing is configured.
// ============================================================================

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use shared::config::EmailConfig;
use std::sync::Arc;
use tracing::{error, info, warn};

pub const OTP_EMAIL_SUBJECT: &str = "Votre code de connexion DazNode";

#[derive(Debug, thiserror::Error)]
pub enum MailerError {
    #[error("invalid email message: {0}")]
    Build(String),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("provider rejected the message ({status}): {body}")]
    Rejected { status: u16, body: String },
}

#[async_trait]
pub trait OtpMailer: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send_code(&self, email: &str, code: &str, expires_in_minutes: i64) -> Result<(), MailerError>;
}

/// Rendered subject, HTML and plain-text bodies for one code.
pub struct OtpEmail {
    pub subject: &'static str,
    pub html: String,
    pub text: String,
}

impl OtpEmail {
    pub fn render(code: &str, expires_in_minutes: i64) -> Self {
        let template = include_str!("../templates/otp_code.html");
        let html = template
            .replace("{{OTP_CODE}}", code)
            .replace("{{EXPIRY_MINUTES}}", &expires_in_minutes.to_string());

        let text = format!(
            "Bonjour,\n\nVotre code de connexion DazNode : {}\n\nCe code expire dans {} minutes et ne peut être utilisé qu'une seule fois.\nSi vous n'avez pas demandé ce code, ignorez simplement cet email.\n\nDazNode",
            code, expires_in_minutes
        );

        Self {
            subject: OTP_EMAIL_SUBJECT,
            html,
            text,
        }
    }
}

fn sender(config: &EmailConfig) -> String {
    format!("{} <{}>", config.from_name, config.from_address)
}

/// Pick the first configured transport.
pub fn mailer_from_config(config: &EmailConfig, reveal_codes: bool) -> Arc<dyn OtpMailer> {
    if let Some(api_key) = &config.resend_api_key {
        info!("📧 OTP emails sent through Resend");
        return Arc::new(ResendMailer::new(
            config.resend_api_url.clone(),
            api_key.clone(),
            sender(config),
        ));
    }

    if let (Some(server), Some(username), Some(password)) = (
        &config.smtp_server,
        &config.smtp_username,
        &config.smtp_password,
    ) {
        info!("📧 OTP emails sent through SMTP relay {}", server);
        return Arc::new(SmtpMailer {
            server: server.clone(),
            username: username.clone(),
            password: password.clone(),
            from: sender(config),
        });
    }

    warn!("⚠️ No email service configured (RESEND_API_KEY or SMTP_* variables), using simulation");
    Arc::new(LogMailer { reveal_codes })
}

// ============================================================================
// RESEND
// ============================================================================

pub struct ResendMailer {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    from: String,
}

impl ResendMailer {
    pub fn new(api_url: String, api_key: String, from: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key,
            from,
        }
    }
}

#[async_trait]
impl OtpMailer for ResendMailer {
    fn name(&self) -> &'static str {
        "resend"
    }

    async fn send_code(&self, email: &str, code: &str, expires_in_minutes: i64) -> Result<(), MailerError> {
        let message = OtpEmail::render(code, expires_in_minutes);
        let payload = serde_json::json!({
            "from": self.from,
            "to": [email],
            "subject": message.subject,
            "html": message.html,
            "text": message.text,
        });

        let response = self
            .client
            .post(format!("{}/emails", self.api_url))
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| MailerError::Transport(e.to_string()))?;

        if response.status().is_success() {
            info!("✅ OTP email sent via Resend to: {}", email);
            Ok(())
        } else {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            error!("❌ Resend API error {}: {}", status, body);
            Err(MailerError::Rejected { status, body })
        }
    }
}

// ============================================================================
// SMTP
// ============================================================================

pub struct SmtpMailer {
    server: String,
    username: String,
    password: String,
    from: String,
}

#[async_trait]
impl OtpMailer for SmtpMailer {
    fn name(&self) -> &'static str {
        "smtp"
    }

    async fn send_code(&self, email: &str, code: &str, expires_in_minutes: i64) -> Result<(), MailerError> {
        let rendered = OtpEmail::render(code, expires_in_minutes);

        let from: Mailbox = self
            .from
            .parse()
            .map_err(|e| MailerError::Build(format!("invalid from address: {}", e)))?;
        let to: Mailbox = email
            .parse()
            .map_err(|e| MailerError::Build(format!("invalid to address: {}", e)))?;

        let message = Message::builder()
            .from(from)
            .to(to)
            .subject(rendered.subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(rendered.text),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(rendered.html),
                    ),
            )
            .map_err(|e| MailerError::Build(e.to_string()))?;

        let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay(&self.server)
            .map_err(|e| MailerError::Transport(format!("SMTP relay error: {}", e)))?
            .credentials(Credentials::new(self.username.clone(), self.password.clone()))
            .build();

        mailer.send(message).await.map_err(|e| {
            error!("❌ SMTP send failed: {}", e);
            MailerError::Transport(e.to_string())
        })?;

        info!("✅ OTP email sent via SMTP to: {}", email);
        Ok(())
    }
}

// ============================================================================
// SIMULATION
// ============================================================================

/// Logs instead of sending. The code itself is only logged when
/// `reveal_codes` is set (development).
pub struct LogMailer {
    pub reveal_codes: bool,
}

#[async_trait]
impl OtpMailer for LogMailer {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn send_code(&self, email: &str, code: &str, expires_in_minutes: i64) -> Result<(), MailerError> {
        if self.reveal_codes {
            info!(
                "🚀 SIMULATING EMAIL SEND to {}: code {} (expires in {} min)",
                email, code, expires_in_minutes
            );
        } else {
            info!("🚀 SIMULATING EMAIL SEND to {} (expires in {} min)", email, expires_in_minutes);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn email_config() -> EmailConfig {
        shared::Config::in_memory("secret").email
    }

    #[test]
    fn template_is_filled_in() {
        let email = OtpEmail::render("482913", 15);
        assert!(email.html.contains("482913"));
        assert!(email.html.contains("15 minutes"));
        assert!(!email.html.contains("{{"));
        assert!(email.text.contains("482913"));
    }

    #[test]
    fn cascade_prefers_resend_then_smtp() {
        let mut config = email_config();
        assert_eq!(mailer_from_config(&config, false).name(), "log");

        config.smtp_server = Some("smtp.example.com".into());
        config.smtp_username = Some("user".into());
        config.smtp_password = Some("pass".into());
        assert_eq!(mailer_from_config(&config, false).name(), "smtp");

        config.resend_api_key = Some("re_test".into());
        assert_eq!(mailer_from_config(&config, false).name(), "resend");
    }

    #[tokio::test]
    async fn resend_posts_the_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/emails"))
            .and(header("authorization", "Bearer re_test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": "msg_1" })))
            .expect(1)
            .mount(&server)
            .await;

        let mailer = ResendMailer::new(server.uri(), "re_test".into(), "DazNode <noreply@daznode.com>".into());
        mailer.send_code("alice@example.com", "123456", 15).await.unwrap();
    }

    #[tokio::test]
    async fn resend_rejection_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/emails"))
            .respond_with(ResponseTemplate::new(422).set_body_string("invalid recipient"))
            .mount(&server)
            .await;

        let mailer = ResendMailer::new(server.uri(), "re_test".into(), "DazNode <noreply@daznode.com>".into());
        let err = mailer.send_code("alice@example.com", "123456", 15).await.unwrap_err();
        assert!(matches!(err, MailerError::Rejected { status: 422, .. }));
    }
}
