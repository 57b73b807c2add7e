//! Provider types and configuration.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Enumeration of supported backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderType {
    /// AWS SQS and SNS over their query APIs
    Aws,
    /// Process-local queues and topics
    InMemory,
}

/// Connection settings for the AWS query-API clients
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AwsConfig {
    pub region: String,
    /// Override for the SQS endpoint (LocalStack, test servers)
    pub sqs_endpoint: Option<String>,
    /// Override for the SNS endpoint
    pub sns_endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    /// Timeout for a single HTTP request, on top of any long-poll wait
    pub request_timeout_seconds: u64,
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            sqs_endpoint: None,
            sns_endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            session_token: None,
            request_timeout_seconds: 30,
        }
    }
}

impl AwsConfig {
    /// Endpoint for the given service, honouring overrides
    pub fn endpoint_for(&self, service: &str) -> String {
        let configured = match service {
            "sqs" => self.sqs_endpoint.as_ref(),
            "sns" => self.sns_endpoint.as_ref(),
            _ => None,
        };

        configured
            .cloned()
            .unwrap_or_else(|| format!("https://{}.{}.amazonaws.com", service, self.region))
    }

    /// Fill missing credentials from the standard AWS environment variables
    pub fn with_env_credentials(mut self) -> Self {
        if self.access_key_id.is_none() {
            self.access_key_id = std::env::var("AWS_ACCESS_KEY_ID").ok();
        }
        if self.secret_access_key.is_none() {
            self.secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY").ok();
        }
        if self.session_token.is_none() {
            self.session_token = std::env::var("AWS_SESSION_TOKEN").ok();
        }
        self
    }
}

impl fmt::Debug for AwsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsConfig")
            .field("region", &self.region)
            .field("sqs_endpoint", &self.sqs_endpoint)
            .field("sns_endpoint", &self.sns_endpoint)
            .field("access_key_id", &self.access_key_id)
            .field(
                "secret_access_key",
                &self.secret_access_key.as_ref().map(|_| "<redacted>"),
            )
            .field(
                "session_token",
                &self.session_token.as_ref().map(|_| "<redacted>"),
            )
            .field("request_timeout_seconds", &self.request_timeout_seconds)
            .finish()
    }
}

#[cfg(test)]
#[path = "provider_tests.rs"]
mod tests;
