use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use reqwest::multipart;
use reqwest::Client;
use serde_json::Value;
use thiserror::Error;

/// Largest response body read into memory from any provider.
pub const MAX_RESPONSE_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub enum MultipartField {
    Text {
        name: String,
        value: String,
    },
    File {
        name: String,
        file_name: String,
        mime: String,
        bytes: Vec<u8>,
    },
}

impl MultipartField {
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Text {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn png(name: impl Into<String>, file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self::File {
            name: name.into(),
            file_name: file_name.into(),
            mime: String::from("image/png"),
            bytes,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Text { name, .. } | Self::File { name, .. } => name.as_str(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum HttpBody {
    Json(Value),
    Multipart(Vec<MultipartField>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: HttpBody,
}

impl HttpRequest {
    pub fn json(url: impl Into<String>, body: Value) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
            body: HttpBody::Json(body),
        }
    }

    pub fn multipart(url: impl Into<String>, fields: Vec<MultipartField>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
            body: HttpBody::Multipart(fields),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_slice(self.body.as_slice())
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(self.body.as_slice()).to_string()
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("http client init failed: {0}")]
    ClientInit(String),
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("request failed: {0}")]
    Request(String),
    #[error("response body read failed: {0}")]
    Body(String),
    #[error("response body exceeds {limit} bytes")]
    TooLarge { limit: usize },
}

pub type TransportFuture<'a> =
    Pin<Box<dyn Future<Output = Result<HttpResponse, TransportError>> + Send + 'a>>;

/// Outbound HTTP seam shared by the vision and generation providers.
pub trait HttpTransport: Send + Sync + 'static {
    fn send(&self, request: HttpRequest) -> TransportFuture<'_>;
    /// GET `url`; `headers` carry provider auth for hosted file pointers.
    fn fetch(&self, url: String, headers: Vec<(String, String)>) -> TransportFuture<'_>;
}

pub type SharedHttpTransport = Arc<dyn HttpTransport>;

#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
    max_body_bytes: usize,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::ClientInit(e.to_string()))?;
        Ok(Self {
            client,
            max_body_bytes: MAX_RESPONSE_BYTES,
        })
    }

    pub fn with_body_limit(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    async fn send_inner(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut builder = self.client.post(request.url.as_str());
        for (name, value) in request.headers.iter() {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = match request.body {
            HttpBody::Json(value) => builder.json(&value),
            HttpBody::Multipart(fields) => builder.multipart(build_form(fields)?),
        };
        let resp = builder.send().await.map_err(map_reqwest_error)?;
        read_response(resp, self.max_body_bytes).await
    }

    async fn fetch_inner(
        &self,
        url: String,
        headers: Vec<(String, String)>,
    ) -> Result<HttpResponse, TransportError> {
        let mut builder = self.client.get(url.as_str());
        for (name, value) in headers.iter() {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let resp = builder.send().await.map_err(map_reqwest_error)?;
        read_response(resp, self.max_body_bytes).await
    }
}

impl HttpTransport for ReqwestTransport {
    fn send(&self, request: HttpRequest) -> TransportFuture<'_> {
        Box::pin(self.send_inner(request))
    }

    fn fetch(&self, url: String, headers: Vec<(String, String)>) -> TransportFuture<'_> {
        Box::pin(self.fetch_inner(url, headers))
    }
}

fn build_form(fields: Vec<MultipartField>) -> Result<multipart::Form, TransportError> {
    let mut form = multipart::Form::new();
    for field in fields {
        form = match field {
            MultipartField::Text { name, value } => form.text(name, value),
            MultipartField::File {
                name,
                file_name,
                mime,
                bytes,
            } => {
                let part = multipart::Part::bytes(bytes)
                    .file_name(file_name)
                    .mime_str(mime.as_str())
                    .map_err(|e| TransportError::Request(format!("invalid mime '{mime}': {e}")))?;
                form.part(name, part)
            }
        };
    }
    Ok(form)
}

async fn read_response(
    mut resp: reqwest::Response,
    limit: usize,
) -> Result<HttpResponse, TransportError> {
    let status = resp.status().as_u16();
    if resp
        .content_length()
        .is_some_and(|declared| declared > limit as u64)
    {
        return Err(TransportError::TooLarge { limit });
    }
    let mut body = Vec::new();
    while let Some(chunk) = resp
        .chunk()
        .await
        .map_err(|e| TransportError::Body(e.to_string()))?
    {
        if body.len() + chunk.len() > limit {
            return Err(TransportError::TooLarge { limit });
        }
        body.extend_from_slice(chunk.as_ref());
    }
    Ok(HttpResponse { status, body })
}

fn map_reqwest_error(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout(error.to_string())
    } else {
        TransportError::Request(error.to_string())
    }
}
