//! HTTP client for a Monobank-style personal API.
//!
//! * `GET /personal/client-info` for accounts
//! * `GET /personal/statement/{account}/{from}/{to}` for statement lines
//!
//! Authenticated with the `X-Token` header. HTTP 429 is surfaced as
//! [`GatewayError::RateLimited`] so the orchestrator can back off.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use crate::entities::Account;
use crate::error::GatewayError;
use crate::gateway::{max_statement_window, BankGateway, ClientInfo, StatementItem};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_ERROR_BODY_CHARS: usize = 256;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    error_description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BankApiClient {
    client: Client,
    base_url: String,
    token: String,
    bank_name: String,
}

impl BankApiClient {
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        bank_name: impl Into<String>,
    ) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            bank_name: bank_name.into(),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, GatewayError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {}", url);

        let resp = self
            .client
            .get(&url)
            .header("X-Token", &self.token)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(classify_error(status.as_u16(), &body));
        }

        Ok(serde_json::from_str(&body)?)
    }
}

/// Map a non-success response onto the gateway error taxonomy.
fn classify_error(status: u16, body: &str) -> GatewayError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.error_description)
        .unwrap_or_else(|| body.chars().take(MAX_ERROR_BODY_CHARS).collect());

    match status {
        429 => GatewayError::RateLimited(message),
        401 | 403 => GatewayError::Auth(message),
        404 => GatewayError::NotFound(message),
        _ => GatewayError::api(status, message),
    }
}

fn check_window(from: DateTime<Utc>, to: DateTime<Utc>) -> Result<(), GatewayError> {
    if to < from {
        return Err(GatewayError::InvalidWindow(format!(
            "end {} is before start {}",
            to, from
        )));
    }
    if to - from > max_statement_window() {
        return Err(GatewayError::InvalidWindow(format!(
            "{} .. {} exceeds 31 days + 1 hour",
            from, to
        )));
    }
    Ok(())
}

#[async_trait]
impl BankGateway for BankApiClient {
    async fn get_accounts(&self) -> Result<Vec<Account>, GatewayError> {
        let info: ClientInfo = self.get_json("/personal/client-info").await?;
        debug!("Bank returned {} accounts for {}", info.accounts.len(), info.name);

        Ok(info
            .accounts
            .into_iter()
            .map(|a| a.into_account(&self.bank_name))
            .collect())
    }

    async fn get_transactions(
        &self,
        account_external_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<StatementItem>, GatewayError> {
        check_window(from, to)?;

        let path = format!(
            "/personal/statement/{}/{}/{}",
            account_external_id,
            from.timestamp(),
            to.timestamp()
        );
        self.get_json(&path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn test_classify_rate_limit() {
        let err = classify_error(429, r#"{"errorDescription":"Too many requests"}"#);
        assert!(err.is_rate_limit());
        assert_eq!(err.to_string(), "Rate limit exceeded: Too many requests");
    }

    #[test]
    fn test_classify_other_statuses() {
        assert!(matches!(
            classify_error(403, r#"{"errorDescription":"Unknown 'X-Token'"}"#),
            GatewayError::Auth(ref m) if m == "Unknown 'X-Token'"
        ));
        assert!(matches!(classify_error(404, "nope"), GatewayError::NotFound(_)));
        assert!(matches!(
            classify_error(500, "<html>oops</html>"),
            GatewayError::Api { status: 500, ref message } if message == "<html>oops</html>"
        ));
    }

    #[test]
    fn test_window_limits() {
        let from = Utc::now();
        assert!(check_window(from, from + max_statement_window()).is_ok());
        assert!(check_window(from, from + max_statement_window() + ChronoDuration::seconds(1)).is_err());
        assert!(check_window(from, from - ChronoDuration::seconds(1)).is_err());
    }

    #[tokio::test]
    async fn test_oversized_window_fails_before_any_request() {
        // Unroutable base URL: the window check must short-circuit first
        let client = BankApiClient::new("http://127.0.0.1:9", "token", "monobank");
        let from = Utc::now() - ChronoDuration::days(40);

        let err = client.get_transactions("acc", from, Utc::now()).await.unwrap_err();
        assert!(matches!(err, GatewayError::InvalidWindow(_)));
    }
}
