//! AWS credentials and Signature Version 4 request signing.
//!
//! Kendra, Bedrock and SageMaker runtime are plain HTTPS JSON APIs; every
//! request carries an `Authorization` header derived from the request
//! itself with HMAC-SHA256.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Client, Response, Url};
use sha2::{Digest, Sha256};
use std::fmt;
use tracing::debug;

use crate::config::AwsConfig;
use crate::utils::error::ChatError;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

#[derive(Clone)]
pub struct AwsCredentials {
    pub access_key_id: String,
    secret_access_key: String,
    pub session_token: Option<String>,
}

impl AwsCredentials {
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: Option<String>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token,
        }
    }

    pub fn from_settings(aws: &AwsConfig) -> Result<Self, ChatError> {
        let access_key_id = non_empty(aws.access_key_id.as_deref()).ok_or_else(|| {
            ChatError::Configuration("AWS_ACCESS_KEY_ID is not set".to_string())
        })?;
        let secret_access_key = non_empty(aws.secret_access_key.as_deref()).ok_or_else(|| {
            ChatError::Configuration("AWS_SECRET_ACCESS_KEY is not set".to_string())
        })?;

        Ok(Self::new(
            access_key_id,
            secret_access_key,
            non_empty(aws.session_token.as_deref()).map(str::to_string),
        ))
    }
}

impl fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Signs requests for one service in one region.
#[derive(Debug, Clone)]
pub struct SigV4Signer {
    credentials: AwsCredentials,
    region: String,
    service: String,
}

impl SigV4Signer {
    pub fn new(
        credentials: AwsCredentials,
        region: impl Into<String>,
        service: impl Into<String>,
    ) -> Self {
        Self {
            credentials,
            region: region.into(),
            service: service.into(),
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Headers (`x-amz-date`, optional `x-amz-security-token`,
    /// `authorization`) to add to the request. `headers` are the extra
    /// headers that will be sent and must be covered by the signature.
    pub fn sign(
        &self,
        method: &str,
        url: &Url,
        headers: &[(&str, &str)],
        body: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Vec<(String, String)>, ChatError> {
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date_stamp = now.format("%Y%m%d").to_string();

        let mut canonical: Vec<(String, String)> = headers
            .iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value.trim().to_string()))
            .collect();
        canonical.push(("host".to_string(), host_header(url)));
        canonical.push(("x-amz-date".to_string(), amz_date.clone()));
        if let Some(token) = &self.credentials.session_token {
            canonical.push(("x-amz-security-token".to_string(), token.clone()));
        }
        canonical.sort_by(|a, b| a.0.cmp(&b.0));

        let signed_headers = canonical
            .iter()
            .map(|(name, _)| name.as_str())
            .collect::<Vec<_>>()
            .join(";");

        let canonical_headers: String = canonical
            .iter()
            .map(|(name, value)| format!("{}:{}\n", name, value))
            .collect();

        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            method,
            canonical_uri(url),
            canonical_query(url),
            canonical_headers,
            signed_headers,
            hex::encode(Sha256::digest(body)),
        );

        let scope = format!(
            "{}/{}/{}/aws4_request",
            date_stamp, self.region, self.service
        );

        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            ALGORITHM,
            amz_date,
            scope,
            hex::encode(Sha256::digest(canonical_request.as_bytes())),
        );

        let key = signing_key(
            &self.credentials.secret_access_key,
            &date_stamp,
            &self.region,
            &self.service,
        )?;
        let signature = hex::encode(hmac(&key, string_to_sign.as_bytes())?);

        let mut out = vec![("x-amz-date".to_string(), amz_date)];
        if let Some(token) = &self.credentials.session_token {
            out.push(("x-amz-security-token".to_string(), token.clone()));
        }
        out.push((
            "authorization".to_string(),
            format!(
                "{} Credential={}/{}, SignedHeaders={}, Signature={}",
                ALGORITHM, self.credentials.access_key_id, scope, signed_headers, signature
            ),
        ));
        Ok(out)
    }

    /// Sign and POST `body`, returning the response when the status is 2xx.
    pub async fn post(
        &self,
        client: &Client,
        url: Url,
        headers: &[(&str, &str)],
        body: Vec<u8>,
    ) -> Result<Response, ChatError> {
        let signed = self.sign("POST", &url, headers, &body, Utc::now())?;

        let mut request = client.post(url.clone());
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        for (name, value) in signed {
            request = request.header(name, value);
        }

        debug!("POST {} ({} bytes, service={})", url, body.len(), self.service);

        let response = request.body(body).send().await.map_err(|e| {
            ChatError::Provider(format!("Failed to call {}: {}", self.service, e))
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::Provider(format!(
                "{} API error: {} - {}",
                self.service, status, body
            )));
        }

        Ok(response)
    }
}

fn hmac(key: &[u8], data: &[u8]) -> Result<Vec<u8>, ChatError> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| ChatError::Configuration(format!("HMAC error: {}", e)))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

pub(crate) fn signing_key(
    secret: &str,
    date_stamp: &str,
    region: &str,
    service: &str,
) -> Result<Vec<u8>, ChatError> {
    let k_date = hmac(format!("AWS4{}", secret).as_bytes(), date_stamp.as_bytes())?;
    let k_region = hmac(&k_date, region.as_bytes())?;
    let k_service = hmac(&k_region, service.as_bytes())?;
    hmac(&k_service, b"aws4_request")
}

fn host_header(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    }
}

/// Each path segment is encoded again on top of the URL's own encoding.
fn canonical_uri(url: &Url) -> String {
    let path = url.path();
    if path.is_empty() {
        return "/".to_string();
    }
    path.split('/').map(uri_encode).collect::<Vec<_>>().join("/")
}

fn canonical_query(url: &Url) -> String {
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (uri_encode(&k), uri_encode(&v)))
        .collect();
    pairs.sort();
    pairs
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// RFC 3986 encoding with the unreserved set left alone.
pub fn uri_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}
