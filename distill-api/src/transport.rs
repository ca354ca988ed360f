use std::time::Duration;

use async_trait::async_trait;
use distill_core::FetchError;
use serde_json::Value;
use tracing::debug;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Patch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

impl HttpReply {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Error for a non-success reply. Uses the `detail` field of a JSON
    /// error body when there is one.
    pub fn to_error(&self) -> FetchError {
        let detail = serde_json::from_str::<Value>(&self.body)
            .ok()
            .and_then(|value| value.get("detail").and_then(Value::as_str).map(str::to_string));
        FetchError::Network {
            status: self.status,
            message: detail.unwrap_or_else(|| self.body.trim().to_string()),
        }
    }
}

/// One HTTP exchange. Only failures to reach the server are errors here;
/// every status code comes back as a reply.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        method: Method,
        path_and_query: &str,
        body: Option<Value>,
    ) -> Result<HttpReply, FetchError>;
}

pub struct ReqwestTransport {
    client: reqwest::Client,
    base: Url,
    token: Option<String>,
}

impl ReqwestTransport {
    /// Request paths resolve below `base`, keeping any path prefix it has.
    pub fn new(mut base: Url, token: Option<String>, timeout: Duration) -> Result<Self, FetchError> {
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| FetchError::Transport(format!("failed to build HTTP client: {}", err)))?;
        Ok(Self {
            client,
            base,
            token,
        })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path_and_query: &str) -> Result<Url, FetchError> {
        self.base
            .join(path_and_query.trim_start_matches('/'))
            .map_err(|err| FetchError::Transport(format!("invalid request path {}: {}", path_and_query, err)))
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(
        &self,
        method: Method,
        path_and_query: &str,
        body: Option<Value>,
    ) -> Result<HttpReply, FetchError> {
        let url = self.endpoint(path_and_query)?;
        let mut request = match method {
            Method::Get => self.client.get(url),
            Method::Post => self.client.post(url),
            Method::Patch => self.client.patch(url),
        };
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = &body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|err| FetchError::Transport(err.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|err| FetchError::Transport(err.to_string()))?;
        debug!(?method, path = path_and_query, status, "api reply");
        Ok(HttpReply { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_prefers_json_detail() {
        let reply = HttpReply::new(404, r#"{"detail":"Book not found"}"#);
        assert_eq!(
            reply.to_error(),
            FetchError::Network {
                status: 404,
                message: "Book not found".into()
            }
        );
        let plain = HttpReply::new(500, "Internal Server Error\n");
        assert_eq!(plain.to_error().to_string(), "request failed with status 500: Internal Server Error");
        assert!(HttpReply::new(202, "Processing started").is_success());
    }

    #[test]
    fn endpoints_resolve_against_base() {
        let base = Url::parse("http://localhost:8000/").unwrap();
        let transport = ReqwestTransport::new(base, None, Duration::from_secs(5)).unwrap();
        let url = transport.endpoint("/get_content_section?book_id=b1&page_num=3").unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:8000/get_content_section?book_id=b1&page_num=3"
        );
    }

    #[test]
    fn base_path_prefix_is_kept() {
        for base in ["https://reader.example.com/api/", "https://reader.example.com/api"] {
            let transport =
                ReqwestTransport::new(Url::parse(base).unwrap(), None, Duration::from_secs(5)).unwrap();
            assert_eq!(
                transport.endpoint("/book/b1").unwrap().as_str(),
                "https://reader.example.com/api/book/b1"
            );
            assert_eq!(
                transport.endpoint("/get_last_n_check_in?n=7").unwrap().as_str(),
                "https://reader.example.com/api/get_last_n_check_in?n=7"
            );
        }
    }
}
