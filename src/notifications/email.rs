//! System email service for account verification and password resets.
//!
//! Mail goes out over SMTP using the `[email]` section of the config. When
//! SMTP is not configured the service runs in development mode and logs the
//! code or link instead of sending it.

use anyhow::Result;
use lettre::{
    message::{header::ContentType, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

use crate::config::EmailConfig;

pub struct SystemEmailService {
    config: EmailConfig,
}

impl SystemEmailService {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    /// Check if email sending is configured and enabled
    pub fn is_enabled(&self) -> bool {
        self.config.is_configured()
    }

    /// Send the six-digit email verification code
    pub async fn send_verification_otp(
        &self,
        to_email: &str,
        name: &str,
        otp: &str,
        expires_in_minutes: i64,
    ) -> Result<()> {
        if !self.is_enabled() {
            tracing::info!(
                to = %to_email,
                otp = %otp,
                "Email not configured, verification code logged for development"
            );
            return Ok(());
        }

        let html_body = render_otp_html(name, otp, expires_in_minutes);
        let text_body = render_otp_text(name, otp, expires_in_minutes);

        self.send_email(to_email, "Email Verification", &html_body, &text_body)
            .await
    }

    /// Send a password reset link
    pub async fn send_password_reset(
        &self,
        to_email: &str,
        name: &str,
        reset_url: &str,
        expires_in_minutes: i64,
    ) -> Result<()> {
        if !self.is_enabled() {
            tracing::info!(
                to = %to_email,
                reset_url = %reset_url,
                "Email not configured, password reset link logged for development"
            );
            return Ok(());
        }

        let html_body = render_reset_html(name, reset_url, expires_in_minutes);
        let text_body = render_reset_text(name, reset_url, expires_in_minutes);

        self.send_email(to_email, "Password Reset Request", &html_body, &text_body)
            .await
    }

    /// Send an email with HTML and plain text versions
    async fn send_email(
        &self,
        to_email: &str,
        subject: &str,
        html_body: &str,
        text_body: &str,
    ) -> Result<()> {
        let smtp_host = self
            .config
            .smtp_host
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("SMTP host not configured"))?;
        let from_address = self
            .config
            .from_address
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("From address not configured"))?;

        let from: Mailbox = format!("{} <{}>", self.config.from_name, from_address).parse()?;
        let to: Mailbox = to_email.parse()?;

        let email = Message::builder()
            .from(from)
            .to(to)
            .subject(subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(text_body.to_string()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(html_body.to_string()),
                    ),
            )?;

        let mailer = if self.config.smtp_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(smtp_host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(smtp_host)
        }
        .port(self.config.smtp_port);

        let mailer = if let (Some(username), Some(password)) =
            (&self.config.smtp_username, &self.config.smtp_password)
        {
            mailer.credentials(Credentials::new(username.clone(), password.clone()))
        } else {
            mailer
        };

        mailer.build().send(email).await?;

        tracing::info!(to = %to_email, subject = %subject, "Email sent");

        Ok(())
    }
}

const STYLE: &str = r#"
        body { font-family: Arial, sans-serif; margin: 0; padding: 0; background-color: #f5f5f5; }
        .container { max-width: 600px; margin: 0 auto; padding: 32px 20px; }
        .card { background-color: #ffffff; border-radius: 8px; padding: 32px 24px; }
        h2 { color: #333333; margin-top: 0; }
        p { color: #374151; line-height: 1.6; }
        .code { color: #007bff; font-size: 48px; text-align: center; letter-spacing: 8px; margin: 24px 0; }
        .button { display: inline-block; background-color: #007bff; color: #ffffff !important;
                  text-decoration: none; padding: 12px 28px; border-radius: 6px; }
        .note { color: #6b7280; font-size: 13px; }
"#;

fn render_otp_html(name: &str, otp: &str, expires_in_minutes: i64) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>Email Verification</title>
    <style>{style}</style>
</head>
<body>
    <div class="container">
        <div class="card">
            <h2>Media Gallery Verification</h2>
            <p>Hi {name},</p>
            <p>Your verification code is:</p>
            <div class="code">{otp}</div>
            <p>This code will expire in {expires_in_minutes} minutes.</p>
            <p class="note">If you didn't request this, please ignore this email.</p>
        </div>
    </div>
</body>
</html>"#,
        style = STYLE,
        name = html_escape(name),
        otp = otp,
        expires_in_minutes = expires_in_minutes,
    )
}

fn render_otp_text(name: &str, otp: &str, expires_in_minutes: i64) -> String {
    format!(
        "Media Gallery Verification\n\nHi {name},\n\nYour verification code is: {otp}\n\n\
         This code will expire in {expires_in_minutes} minutes.\n\n\
         If you didn't request this, please ignore this email.",
    )
}

fn render_reset_html(name: &str, reset_url: &str, expires_in_minutes: i64) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>Password Reset</title>
    <style>{style}</style>
</head>
<body>
    <div class="container">
        <div class="card">
            <h2>Password Reset Request</h2>
            <p>Hi {name},</p>
            <p>You requested a password reset. Use the button below to choose a new password.</p>
            <p style="text-align: center;"><a href="{reset_url}" class="button">Reset Password</a></p>
            <p>This link will expire in {expires_in_minutes} minutes.</p>
            <p class="note">If you didn't request this, please ignore this email.</p>
        </div>
    </div>
</body>
</html>"#,
        style = STYLE,
        name = html_escape(name),
        reset_url = html_escape(reset_url),
        expires_in_minutes = expires_in_minutes,
    )
}

fn render_reset_text(name: &str, reset_url: &str, expires_in_minutes: i64) -> String {
    format!(
        "Password Reset Request\n\nHi {name},\n\nYou requested a password reset. Visit the link below \
         to choose a new password:\n{reset_url}\n\nThis link will expire in {expires_in_minutes} minutes.\n\n\
         If you didn't request this, please ignore this email.",
    )
}

/// Escape HTML special characters
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_escape() {
        assert_eq!(html_escape("<script>"), "&lt;script&gt;");
        assert_eq!(html_escape("Tom & Jerry"), "Tom &amp; Jerry");
    }

    #[test]
    fn test_render_otp() {
        let html = render_otp_html("<Jane>", "123456", 10);
        assert!(html.contains("123456"));
        assert!(html.contains("&lt;Jane&gt;"));
        assert!(html.contains("10 minutes"));

        let text = render_otp_text("Jane", "123456", 10);
        assert!(text.contains("Your verification code is: 123456"));
    }

    #[test]
    fn test_render_reset() {
        let url = "http://localhost:3000/reset-password/abc";
        assert!(render_reset_html("Jane", url, 60).contains(url));
        assert!(render_reset_text("Jane", url, 60).contains("60 minutes"));
    }

    #[tokio::test]
    async fn test_unconfigured_service_succeeds_without_sending() {
        let service = SystemEmailService::new(EmailConfig::default());
        assert!(!service.is_enabled());
        service
            .send_verification_otp("jane@example.com", "Jane", "123456", 10)
            .await
            .unwrap();
        service
            .send_password_reset("jane@example.com", "Jane", "http://x/reset-password/t", 60)
            .await
            .unwrap();
    }
}
