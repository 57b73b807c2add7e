//! AWS SQS and SNS clients using the HTTP query API.
//!
//! This module talks to the managed services with direct HTTP calls instead of
//! the AWS SDK, which keeps the request/response handling transparent and lets
//! unit tests run against mocked HTTP servers.
//!
//! ## Key Features
//!
//! - **Query API**: `POST /` with form-encoded `Action`/`Version` parameters, XML responses
//! - **AWS Signature V4**: Manual request signing, optional session token
//! - **Endpoint overrides**: LocalStack or a test server instead of AWS
//! - **Batch operations**: Up to 10 messages per batch, failures reported per entry
//! - **Long polling**: Request timeout is stretched by the receive wait time
//!
//! ## Example
//!
//! ```no_run
//! use queue_relay_runtime::providers::SqsQueueClient;
//! use queue_relay_runtime::{AwsConfig, QueueAttributes, QueueClient, QueueName};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AwsConfig::default().with_env_credentials();
//! let client = SqsQueueClient::new(&config)?;
//!
//! let queue = client
//!     .create_queue(&QueueName::new("backspace-lab")?, &QueueAttributes::default())
//!     .await?;
//! client.send_message(&queue, "hello").await?;
//! # Ok(())
//! # }
//! ```

use crate::client::{QueueClient, TopicPublisher};
use crate::error::{ConfigurationError, QueueError};
use crate::message::{
    screen_batch, validate_message_body, validate_subject, BatchEntry, BatchEntryId,
    BatchFailure, BatchSuccess, MessageId, QueueAttributes, QueueName, QueueUrl, ReceiptHandle,
    ReceiveOptions, ReceivedMessage, SendBatchOutcome, TopicArn, MAX_BATCH_SIZE,
};
use crate::provider::AwsConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client as HttpClient;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;
use url::Url;

#[cfg(test)]
#[path = "aws_tests.rs"]
mod tests;

const SQS_API_VERSION: &str = "2012-11-05";
const SNS_API_VERSION: &str = "2010-03-31";
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=utf-8";

// ============================================================================
// Error Types
// ============================================================================

/// AWS query API specific errors
#[derive(Debug, thiserror::Error)]
pub enum AwsError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("{service} service error: {code} - {message}")]
    ServiceError {
        service: String,
        code: String,
        message: String,
        sender_fault: bool,
    },

    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    #[error("Queue already exists: {0}")]
    QueueAlreadyExists(String),

    #[error("Topic not found: {0}")]
    TopicNotFound(String),

    #[error("Invalid receipt handle: {0}")]
    InvalidReceipt(String),

    #[error("Invalid configuration: {0}")]
    ConfigurationError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl AwsError {
    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::NetworkError(_) | Self::Timeout(_) => true,
            Self::ServiceError { sender_fault, .. } => !sender_fault,
            _ => false,
        }
    }
}

impl From<AwsError> for QueueError {
    fn from(error: AwsError) -> Self {
        match error {
            AwsError::Authentication(message) => QueueError::AuthenticationFailed { message },
            AwsError::NetworkError(message) => QueueError::ConnectionFailed { message },
            AwsError::Timeout(duration) => QueueError::Timeout { duration },
            AwsError::ServiceError {
                service,
                code,
                message,
                sender_fault,
            } => QueueError::ServiceError {
                service,
                code,
                message,
                sender_fault,
            },
            AwsError::QueueNotFound(queue) => QueueError::QueueNotFound { queue },
            AwsError::QueueAlreadyExists(queue_name) => {
                QueueError::QueueAlreadyExists { queue_name }
            }
            AwsError::TopicNotFound(topic) => QueueError::TopicNotFound { topic },
            AwsError::InvalidReceipt(receipt) => QueueError::ReceiptHandleInvalid { receipt },
            AwsError::ConfigurationError(message) => {
                QueueError::Configuration(ConfigurationError::Invalid { message })
            }
            AwsError::SerializationError(message) => QueueError::Serialization { message },
        }
    }
}

// ============================================================================
// AWS Signature V4 Signing
// ============================================================================

type HmacSha256 = Hmac<Sha256>;

/// AWS Signature Version 4 signer for request authentication
///
/// Implements the AWS Signature V4 signing process:
/// 1. Create canonical request (method, URI, query, headers, payload)
/// 2. Create string to sign (algorithm, timestamp, scope, request hash)
/// 3. Derive signing key (4-level HMAC chain)
/// 4. Calculate signature and build Authorization header
#[derive(Clone)]
struct AwsV4Signer {
    access_key: String,
    secret_key: String,
    session_token: Option<String>,
    region: String,
    service: String,
}

impl AwsV4Signer {
    fn new(
        access_key: String,
        secret_key: String,
        session_token: Option<String>,
        region: String,
        service: &str,
    ) -> Self {
        Self {
            access_key,
            secret_key,
            session_token,
            region,
            service: service.to_string(),
        }
    }

    /// Sign a request and return the headers to attach to it.
    ///
    /// `canonical_query` must already be sorted and percent-encoded.
    fn sign_request(
        &self,
        method: &str,
        host: &str,
        path: &str,
        canonical_query: &str,
        body: &str,
        timestamp: &DateTime<Utc>,
    ) -> Vec<(String, String)> {
        let date_stamp = timestamp.format("%Y%m%d").to_string();
        let amz_date = timestamp.format("%Y%m%dT%H%M%SZ").to_string();

        // Canonical headers (must be sorted)
        let mut canonical_headers = format!("host:{}\nx-amz-date:{}\n", host, amz_date);
        let mut signed_headers = "host;x-amz-date".to_string();
        if let Some(ref token) = self.session_token {
            canonical_headers.push_str(&format!("x-amz-security-token:{}\n", token));
            signed_headers.push_str(";x-amz-security-token");
        }

        let payload_hash = format!("{:x}", Sha256::digest(body.as_bytes()));

        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            method, path, canonical_query, canonical_headers, signed_headers, payload_hash
        );

        let algorithm = "AWS4-HMAC-SHA256";
        let credential_scope = format!(
            "{}/{}/{}/aws4_request",
            date_stamp, self.region, self.service
        );
        let string_to_sign = format!(
            "{}\n{}\n{}\n{:x}",
            algorithm,
            amz_date,
            credential_scope,
            Sha256::digest(canonical_request.as_bytes())
        );

        let signature = hex::encode(hmac_sha256(
            &self.signing_key(&date_stamp),
            string_to_sign.as_bytes(),
        ));

        let authorization = format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            algorithm, self.access_key, credential_scope, signed_headers, signature
        );

        let mut headers = vec![
            ("Authorization".to_string(), authorization),
            ("x-amz-date".to_string(), amz_date),
            ("host".to_string(), host.to_string()),
        ];
        if let Some(ref token) = self.session_token {
            headers.push(("x-amz-security-token".to_string(), token.clone()));
        }
        headers
    }

    /// Derive the signing key:
    /// HMAC("AWS4" + secret, date) -> region -> service -> "aws4_request"
    fn signing_key(&self, date_stamp: &str) -> Vec<u8> {
        let k_secret = format!("AWS4{}", self.secret_key);
        let k_date = hmac_sha256(k_secret.as_bytes(), date_stamp.as_bytes());
        let k_region = hmac_sha256(&k_date, self.region.as_bytes());
        let k_service = hmac_sha256(&k_region, self.service.as_bytes());
        hmac_sha256(&k_service, b"aws4_request")
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length, so this never fails.
    let mut mac = match HmacSha256::new_from_slice(key) {
        Ok(mac) => mac,
        Err(_) => unreachable!("HMAC can take key of any size"),
    };
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Sorted, RFC 3986 encoded parameter string, sent as the form body
fn canonical_query_string(params: &BTreeMap<String, String>) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

// ============================================================================
// Query API Transport
// ============================================================================

/// Signed `POST /` transport shared by the SQS and SNS clients
struct QueryApi {
    http_client: HttpClient,
    signer: Option<AwsV4Signer>,
    endpoint: Url,
    host: String,
    service: &'static str,
    version: &'static str,
    request_timeout: Duration,
}

impl QueryApi {
    fn new(config: &AwsConfig, service: &'static str, version: &'static str) -> Result<Self, AwsError> {
        if config.region.is_empty() {
            return Err(AwsError::ConfigurationError(
                "Region cannot be empty".to_string(),
            ));
        }

        let endpoint_str = config.endpoint_for(service);
        let endpoint = Url::parse(&endpoint_str).map_err(|e| {
            AwsError::ConfigurationError(format!("Invalid endpoint '{}': {}", endpoint_str, e))
        })?;
        let host = match (endpoint.host_str(), endpoint.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return Err(AwsError::ConfigurationError(format!(
                    "Endpoint '{}' has no host",
                    endpoint_str
                )))
            }
        };

        let signer = match (&config.access_key_id, &config.secret_access_key) {
            (Some(access_key), Some(secret_key)) => Some(AwsV4Signer::new(
                access_key.clone(),
                secret_key.clone(),
                config.session_token.clone(),
                config.region.clone(),
                service,
            )),
            _ => None,
        };

        let http_client = HttpClient::builder()
            .build()
            .map_err(|e| AwsError::NetworkError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            signer,
            endpoint,
            host,
            service,
            version,
            request_timeout: Duration::from_secs(config.request_timeout_seconds),
        })
    }

    /// Invoke one API action and return the raw XML response body
    async fn call(
        &self,
        action: &str,
        mut params: BTreeMap<String, String>,
        long_poll: Duration,
    ) -> Result<String, AwsError> {
        let signer = self
            .signer
            .as_ref()
            .ok_or_else(|| AwsError::Authentication("No credentials configured".to_string()))?;

        params.insert("Action".to_string(), action.to_string());
        params.insert("Version".to_string(), self.version.to_string());

        // Parameters travel form-encoded in the body; message bodies can be
        // far longer than a URL may be.
        let form = canonical_query_string(&params);
        let headers = signer.sign_request("POST", &self.host, "/", "", &form, &Utc::now());

        let mut url = self.endpoint.clone();
        url.set_path("/");
        url.set_query(None);

        let timeout = self.request_timeout + long_poll;
        let mut request = self
            .http_client
            .post(url)
            .timeout(timeout)
            .header(CONTENT_TYPE, FORM_CONTENT_TYPE)
            .body(form);
        for (key, value) in headers {
            request = request.header(key, value);
        }

        debug!(service = self.service, action = action, "Calling AWS query API");

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                AwsError::Timeout(timeout)
            } else if e.is_connect() {
                AwsError::NetworkError(format!("Connection failed: {}", e))
            } else {
                AwsError::NetworkError(format!("HTTP request failed: {}", e))
            }
        })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AwsError::NetworkError(format!("Failed to read response body: {}", e)))?;

        if !status.is_success() {
            return Err(parse_error_response(self.service, &body, status.as_u16()));
        }

        Ok(body)
    }
}

// ============================================================================
// XML Response Parsing
// ============================================================================

/// Flattened XML event with owned names
enum XmlNode {
    Start(String),
    Text { element: String, text: String },
    End(String),
}

/// An element still open while walking a document
struct OpenElement {
    name: String,
    text: String,
    has_children: bool,
}

/// Walk a document, reporting the text of leaf elements exactly as sent.
///
/// Text is only reported for elements without child elements, once the
/// element closes, so whitespace between structural elements is dropped
/// while a `<Body>` keeps its leading, trailing and whitespace-only content.
fn walk_xml<F>(xml: &str, mut visit: F) -> Result<(), AwsError>
where
    F: FnMut(XmlNode) -> Result<(), AwsError>,
{
    let mut reader = Reader::from_str(xml);

    let mut stack: Vec<OpenElement> = Vec::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if let Some(parent) = stack.last_mut() {
                    parent.has_children = true;
                }
                stack.push(OpenElement {
                    name: name.clone(),
                    text: String::new(),
                    has_children: false,
                });
                visit(XmlNode::Start(name))?;
            }
            Ok(Event::Empty(ref e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if let Some(parent) = stack.last_mut() {
                    parent.has_children = true;
                }
                visit(XmlNode::Start(name.clone()))?;
                visit(XmlNode::End(name))?;
            }
            Ok(Event::End(ref e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if let Some(element) = stack.pop() {
                    if !element.has_children && !element.text.is_empty() {
                        visit(XmlNode::Text {
                            element: element.name,
                            text: element.text,
                        })?;
                    }
                }
                visit(XmlNode::End(name))?;
            }
            Ok(Event::Text(e)) => {
                let text = e
                    .unescape()
                    .map_err(|e| AwsError::SerializationError(format!("Failed to parse XML: {}", e)))?;
                if let Some(element) = stack.last_mut() {
                    element.text.push_str(&text);
                }
            }
            Ok(Event::CData(e)) => {
                let text = String::from_utf8_lossy(&e.into_inner()).into_owned();
                if let Some(element) = stack.last_mut() {
                    element.text.push_str(&text);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(AwsError::SerializationError(format!(
                    "XML parsing error: {}",
                    e
                )))
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(())
}

/// Text of the first element with the given name
fn first_text(xml: &str, element_name: &str) -> Result<Option<String>, AwsError> {
    let mut found = None;
    walk_xml(xml, |node| {
        if let XmlNode::Text { element, text } = node {
            if found.is_none() && element == element_name {
                found = Some(text);
            }
        }
        Ok(())
    })?;
    Ok(found)
}

fn required_text(xml: &str, element_name: &str) -> Result<String, AwsError> {
    first_text(xml, element_name)?.ok_or_else(|| {
        AwsError::SerializationError(format!("{} not found in response", element_name))
    })
}

fn parse_message_id(raw: &str) -> Result<MessageId, AwsError> {
    MessageId::from_str(raw).map_err(|e| AwsError::SerializationError(e.to_string()))
}

/// Parse an `<ErrorResponse>` document into an [`AwsError`]
fn parse_error_response(service: &str, xml: &str, status_code: u16) -> AwsError {
    let mut error_type = None;
    let mut error_code = None;
    let mut error_message = None;
    let mut in_error = false;

    // A malformed error body still yields an error built from the status code.
    let _ = walk_xml(xml, |node| {
        match node {
            XmlNode::Start(name) if name == "Error" => in_error = true,
            XmlNode::End(name) if name == "Error" => in_error = false,
            XmlNode::Text { element, text } if in_error => match element.as_str() {
                "Type" => error_type = Some(text),
                "Code" => error_code = Some(text),
                "Message" => error_message = Some(text),
                _ => {}
            },
            _ => {}
        }
        Ok(())
    });

    let code = error_code.unwrap_or_else(|| "Unknown".to_string());
    let message = error_message.unwrap_or_else(|| "Unknown error".to_string());

    match code.as_str() {
        "AWS.SimpleQueueService.NonExistentQueue" | "QueueDoesNotExist" => {
            AwsError::QueueNotFound(message)
        }
        "QueueAlreadyExists" | "QueueNameExists" => AwsError::QueueAlreadyExists(message),
        "NotFound" => AwsError::TopicNotFound(message),
        "ReceiptHandleIsInvalid" | "InvalidReceiptHandle" => AwsError::InvalidReceipt(message),
        "InvalidClientTokenId"
        | "UnrecognizedClientException"
        | "SignatureDoesNotMatch"
        | "InvalidSecurity"
        | "ExpiredToken" => AwsError::Authentication(format!("{}: {}", code, message)),
        "Throttling" | "ThrottlingException" | "RequestThrottled" => AwsError::ServiceError {
            service: service.to_string(),
            code,
            message,
            sender_fault: false,
        },
        _ if status_code == 401 || status_code == 403 => {
            AwsError::Authentication(format!("{}: {}", code, message))
        }
        _ => {
            let sender_fault = match error_type.as_deref() {
                Some(kind) => kind == "Sender",
                None => (400..500).contains(&status_code),
            };
            AwsError::ServiceError {
                service: service.to_string(),
                code,
                message,
                sender_fault,
            }
        }
    }
}

/// Message fields collected while walking a `<Message>` element
#[derive(Default)]
struct PartialMessage {
    message_id: Option<String>,
    receipt_handle: Option<String>,
    body: Option<String>,
    receive_count: Option<u32>,
}

impl PartialMessage {
    fn build(self) -> Result<ReceivedMessage, AwsError> {
        let message_id = self.message_id.ok_or_else(|| {
            AwsError::SerializationError("MessageId missing from received message".to_string())
        })?;
        let receipt_handle = self.receipt_handle.ok_or_else(|| {
            AwsError::SerializationError("ReceiptHandle missing from received message".to_string())
        })?;

        Ok(ReceivedMessage {
            message_id: parse_message_id(&message_id)?,
            body: self.body.unwrap_or_default(),
            receipt_handle: ReceiptHandle::new(receipt_handle),
            receive_count: self.receive_count.unwrap_or(1),
        })
    }
}

/// Parse ReceiveMessage XML response
fn parse_receive_message_response(xml: &str) -> Result<Vec<ReceivedMessage>, AwsError> {
    let mut messages = Vec::new();
    let mut current: Option<PartialMessage> = None;
    let mut attribute_name: Option<String> = None;

    walk_xml(xml, |node| {
        match node {
            XmlNode::Start(name) if name == "Message" => {
                current = Some(PartialMessage::default());
            }
            XmlNode::Text { element, text } => {
                if let Some(message) = current.as_mut() {
                    match element.as_str() {
                        "MessageId" => message.message_id = Some(text),
                        "ReceiptHandle" => message.receipt_handle = Some(text),
                        "Body" => message.body = Some(text),
                        "Name" => attribute_name = Some(text),
                        "Value" => {
                            if attribute_name.as_deref() == Some("ApproximateReceiveCount") {
                                message.receive_count = text.parse().ok();
                            }
                            attribute_name = None;
                        }
                        _ => {}
                    }
                }
            }
            XmlNode::End(name) if name == "Message" => {
                if let Some(message) = current.take() {
                    messages.push(message.build()?);
                }
            }
            _ => {}
        }
        Ok(())
    })?;

    Ok(messages)
}

/// Fields of one `SendMessageBatchResultEntry` or `BatchResultErrorEntry`
#[derive(Default)]
struct PartialBatchEntry {
    id: Option<String>,
    message_id: Option<String>,
    code: Option<String>,
    message: Option<String>,
    sender_fault: bool,
}

impl PartialBatchEntry {
    fn entry_id(&self) -> Result<BatchEntryId, AwsError> {
        let id = self.id.as_deref().ok_or_else(|| {
            AwsError::SerializationError("Id missing from batch result entry".to_string())
        })?;
        BatchEntryId::new(id).map_err(|e| AwsError::SerializationError(e.to_string()))
    }
}

/// Parse SendMessageBatch XML response
fn parse_send_message_batch_response(xml: &str) -> Result<SendBatchOutcome, AwsError> {
    let mut outcome = SendBatchOutcome::default();
    let mut current: Option<PartialBatchEntry> = None;

    walk_xml(xml, |node| {
        match node {
            XmlNode::Start(name)
                if name == "SendMessageBatchResultEntry" || name == "BatchResultErrorEntry" =>
            {
                current = Some(PartialBatchEntry::default());
            }
            XmlNode::Text { element, text } => {
                if let Some(entry) = current.as_mut() {
                    match element.as_str() {
                        "Id" => entry.id = Some(text),
                        "MessageId" => entry.message_id = Some(text),
                        "Code" => entry.code = Some(text),
                        "Message" => entry.message = Some(text),
                        "SenderFault" => entry.sender_fault = text == "true",
                        _ => {}
                    }
                }
            }
            XmlNode::End(name) if name == "SendMessageBatchResultEntry" => {
                if let Some(entry) = current.take() {
                    let message_id = entry.message_id.as_deref().ok_or_else(|| {
                        AwsError::SerializationError(
                            "MessageId missing from batch result entry".to_string(),
                        )
                    })?;
                    outcome.successful.push(BatchSuccess {
                        id: entry.entry_id()?,
                        message_id: parse_message_id(message_id)?,
                    });
                }
            }
            XmlNode::End(name) if name == "BatchResultErrorEntry" => {
                if let Some(entry) = current.take() {
                    outcome.failed.push(BatchFailure {
                        id: entry.entry_id()?,
                        code: entry.code.unwrap_or_else(|| "Unknown".to_string()),
                        message: entry.message.unwrap_or_default(),
                        sender_fault: entry.sender_fault,
                    });
                }
            }
            _ => {}
        }
        Ok(())
    })?;

    Ok(outcome)
}

// ============================================================================
// SQS Queue Client
// ============================================================================

/// AWS SQS implementation of [`QueueClient`]
///
/// The client is thread-safe and can be shared across async tasks using `Arc`.
pub struct SqsQueueClient {
    api: QueryApi,
}

impl SqsQueueClient {
    /// Create new SQS client
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the region is empty or the endpoint
    /// cannot be parsed. Missing credentials are reported on the first call.
    pub fn new(config: &AwsConfig) -> Result<Self, QueueError> {
        Ok(Self {
            api: QueryApi::new(config, "sqs", SQS_API_VERSION)?,
        })
    }
}

impl fmt::Debug for SqsQueueClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqsQueueClient")
            .field("endpoint", &self.api.endpoint.as_str())
            .field("credentials", &self.api.signer.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[async_trait]
impl QueueClient for SqsQueueClient {
    async fn create_queue(
        &self,
        name: &QueueName,
        attributes: &QueueAttributes,
    ) -> Result<QueueUrl, QueueError> {
        attributes.validate()?;

        let mut params = BTreeMap::new();
        params.insert("QueueName".to_string(), name.as_str().to_string());
        params.insert(
            "Attribute.1.Name".to_string(),
            "ReceiveMessageWaitTimeSeconds".to_string(),
        );
        params.insert(
            "Attribute.1.Value".to_string(),
            attributes.receive_wait_time_seconds.to_string(),
        );
        params.insert("Attribute.2.Name".to_string(), "VisibilityTimeout".to_string());
        params.insert(
            "Attribute.2.Value".to_string(),
            attributes.visibility_timeout_seconds.to_string(),
        );

        let response = self
            .api
            .call("CreateQueue", params, Duration::ZERO)
            .await?;

        Ok(QueueUrl::new(required_text(&response, "QueueUrl")?)?)
    }

    async fn send_message(&self, queue: &QueueUrl, body: &str) -> Result<MessageId, QueueError> {
        validate_message_body(body)?;

        let mut params = BTreeMap::new();
        params.insert("QueueUrl".to_string(), queue.as_str().to_string());
        params.insert("MessageBody".to_string(), body.to_string());

        let response = self
            .api
            .call("SendMessage", params, Duration::ZERO)
            .await?;

        Ok(parse_message_id(&required_text(&response, "MessageId")?)?)
    }

    async fn send_message_batch(
        &self,
        queue: &QueueUrl,
        entries: &[BatchEntry],
    ) -> Result<SendBatchOutcome, QueueError> {
        let screened = screen_batch(entries, MAX_BATCH_SIZE)?;

        let mut outcome = SendBatchOutcome {
            successful: Vec::new(),
            failed: screened.rejected,
        };

        if screened.accepted.is_empty() {
            return Ok(outcome);
        }

        let mut params = BTreeMap::new();
        params.insert("QueueUrl".to_string(), queue.as_str().to_string());
        for (idx, entry) in screened.accepted.iter().enumerate() {
            params.insert(
                format!("SendMessageBatchRequestEntry.{}.Id", idx + 1),
                entry.id.as_str().to_string(),
            );
            params.insert(
                format!("SendMessageBatchRequestEntry.{}.MessageBody", idx + 1),
                entry.body.clone(),
            );
        }

        let response = self
            .api
            .call("SendMessageBatch", params, Duration::ZERO)
            .await?;

        outcome.merge(parse_send_message_batch_response(&response)?);
        Ok(outcome)
    }

    async fn receive_messages(
        &self,
        queue: &QueueUrl,
        options: &ReceiveOptions,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        options.validate()?;

        let mut params = BTreeMap::new();
        params.insert("QueueUrl".to_string(), queue.as_str().to_string());
        params.insert(
            "MaxNumberOfMessages".to_string(),
            options.max_messages.to_string(),
        );
        params.insert(
            "WaitTimeSeconds".to_string(),
            options.wait_time_seconds.to_string(),
        );
        params.insert(
            "VisibilityTimeout".to_string(),
            options.visibility_timeout_seconds.to_string(),
        );
        params.insert(
            "AttributeName.1".to_string(),
            "ApproximateReceiveCount".to_string(),
        );

        let long_poll = Duration::from_secs(u64::from(options.wait_time_seconds));
        let response = self.api.call("ReceiveMessage", params, long_poll).await?;

        Ok(parse_receive_message_response(&response)?)
    }

    async fn delete_message(
        &self,
        queue: &QueueUrl,
        receipt: &ReceiptHandle,
    ) -> Result<(), QueueError> {
        let mut params = BTreeMap::new();
        params.insert("QueueUrl".to_string(), queue.as_str().to_string());
        params.insert("ReceiptHandle".to_string(), receipt.as_str().to_string());

        // DeleteMessage returns an empty result on success
        self.api
            .call("DeleteMessage", params, Duration::ZERO)
            .await?;
        Ok(())
    }
}

// ============================================================================
// SNS Topic Publisher
// ============================================================================

/// AWS SNS implementation of [`TopicPublisher`]
pub struct SnsTopicPublisher {
    api: QueryApi,
}

impl SnsTopicPublisher {
    /// Create new SNS publisher
    pub fn new(config: &AwsConfig) -> Result<Self, QueueError> {
        Ok(Self {
            api: QueryApi::new(config, "sns", SNS_API_VERSION)?,
        })
    }
}

impl fmt::Debug for SnsTopicPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnsTopicPublisher")
            .field("endpoint", &self.api.endpoint.as_str())
            .field("credentials", &self.api.signer.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[async_trait]
impl TopicPublisher for SnsTopicPublisher {
    async fn publish(
        &self,
        topic: &TopicArn,
        subject: &str,
        body: &str,
    ) -> Result<MessageId, QueueError> {
        validate_subject(subject)?;
        validate_message_body(body)?;

        let mut params = BTreeMap::new();
        params.insert("TopicArn".to_string(), topic.as_str().to_string());
        params.insert("Message".to_string(), body.to_string());
        if !subject.is_empty() {
            params.insert("Subject".to_string(), subject.to_string());
        }

        let response = self.api.call("Publish", params, Duration::ZERO).await?;

        Ok(parse_message_id(&required_text(&response, "MessageId")?)?)
    }
}
