use std::{net::IpAddr, time::Duration};

use serde::Deserialize;

use crate::config::AccessConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    Verified,
    NotVerified,
}

#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("verification request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("verification service answered {0}")]
    Status(reqwest::StatusCode),
    #[error("verification service answered without a `success` field")]
    MissingSuccess,
}

#[derive(Deserialize)]
struct SiteVerifyResponse {
    success: Option<bool>,
    #[serde(default, rename = "error-codes")]
    error_codes: Vec<String>,
}

/// Client for a reCAPTCHA style `siteverify` endpoint.
///
/// Any failure to get a clear `success: true` is treated as not verified.
#[derive(Clone)]
pub struct CaptchaVerifier {
    http: reqwest::Client,
    verify_url: String,
    secret: String,
}

impl CaptchaVerifier {
    pub fn new(cfg: &AccessConfig) -> reqwest::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.verify_timeout_secs))
            .build()?;

        Ok(Self {
            http,
            verify_url: cfg.verify_url.clone(),
            secret: cfg.captcha_secret.clone(),
        })
    }

    pub async fn verify(&self, token: Option<&str>, remote_ip: Option<IpAddr>) -> Verification {
        let Some(token) = token.filter(|t| !t.is_empty()) else {
            return Verification::NotVerified;
        };

        match self.check(token, remote_ip).await {
            Ok(true) => Verification::Verified,
            Ok(false) => Verification::NotVerified,
            Err(why) => {
                tracing::warn!("human verification failed closed: {why}");
                Verification::NotVerified
            }
        }
    }

    async fn check(&self, token: &str, remote_ip: Option<IpAddr>) -> Result<bool, VerifyError> {
        let mut form = vec![("secret", self.secret.clone()), ("response", token.to_string())];
        if let Some(ip) = remote_ip {
            form.push(("remoteip", ip.to_string()));
        }

        let res = self.http.post(&self.verify_url).form(&form).send().await?;
        if !res.status().is_success() {
            return Err(VerifyError::Status(res.status()));
        }

        let body: SiteVerifyResponse = res.json().await?;
        let success = body.success.ok_or(VerifyError::MissingSuccess)?;
        if !success {
            tracing::debug!(codes = ?body.error_codes, "verification token rejected");
        }
        Ok(success)
    }
}
