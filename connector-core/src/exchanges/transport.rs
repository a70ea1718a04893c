//! Authenticated REST execution
//!
//! `RestTransport` builds (and signs) requests, hands them to an [`HttpExecutor`] and turns
//! whatever comes back into JSON or a typed [`ExchangeError`].

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::errors::{ExchangeError, ExchangeResult};
use super::signing::{RequestParams, Signer};

/// Header carrying the public API key
pub const API_KEY_HEADER: &str = "X-MBX-APIKEY";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Delete,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Delete => "DELETE",
        })
    }
}

/// Fully built request; every parameter travels in the query string of `url`
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub api_key: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// Executes one HTTP exchange. Failing to obtain any response is a `Transport` error.
#[async_trait]
pub trait HttpExecutor: Send + Sync {
    async fn execute(&self, request: HttpRequest) -> ExchangeResult<HttpResponse>;
}

/// reqwest backed executor
pub struct ReqwestExecutor {
    client: reqwest::Client,
}

impl ReqwestExecutor {
    pub fn new(timeout: Duration) -> ExchangeResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ExchangeError::Config(format!("cannot build http client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpExecutor for ReqwestExecutor {
    async fn execute(&self, request: HttpRequest) -> ExchangeResult<HttpResponse> {
        let builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
            HttpMethod::Delete => self.client.delete(&request.url),
        };

        let response = builder
            .header(API_KEY_HEADER, &request.api_key)
            .send()
            .await?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        Ok(HttpResponse { status, body })
    }
}

/// Signing and transport for one REST base URL
pub struct RestTransport {
    base_url: String,
    api_key: String,
    signer: Signer,
    executor: Arc<dyn HttpExecutor>,
}

impl RestTransport {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        secret_key: &str,
        executor: Arc<dyn HttpExecutor>,
    ) -> ExchangeResult<Self> {
        let base_url = base_url.into();
        url::Url::parse(&base_url)?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            signer: Signer::new(secret_key)?,
            executor,
        })
    }

    /// Unauthenticated call
    pub async fn public(
        &self,
        method: HttpMethod,
        path: &str,
        params: RequestParams,
    ) -> ExchangeResult<Value> {
        self.execute(method, path, params.encode()).await
    }

    /// Authenticated call; the timestamp and signature are added last
    pub async fn signed(
        &self,
        method: HttpMethod,
        path: &str,
        params: RequestParams,
    ) -> ExchangeResult<Value> {
        let query = self
            .signer
            .sign(params, chrono::Utc::now().timestamp_millis());
        self.execute(method, path, query).await
    }

    async fn execute(&self, method: HttpMethod, path: &str, query: String) -> ExchangeResult<Value> {
        let url = if query.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, query)
        };

        debug!("{} {}", method, path);

        let response = self
            .executor
            .execute(HttpRequest {
                method,
                url,
                api_key: self.api_key.clone(),
            })
            .await?;

        decode_response(response)
    }
}

fn decode_response(response: HttpResponse) -> ExchangeResult<Value> {
    if response.status != 200 {
        let body = serde_json::from_str(&response.body)
            .unwrap_or_else(|_| Value::String(response.body.clone()));
        return Err(ExchangeError::Api {
            status: response.status,
            body,
        });
    }

    Ok(serde_json::from_str(&response.body)?)
}

/// Scripted executor for exercising REST code paths without a network
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;

    struct Route {
        method: HttpMethod,
        path: String,
        reply: ExchangeResult<HttpResponse>,
    }

    #[derive(Default)]
    pub struct ScriptedExecutor {
        routes: Mutex<Vec<Route>>,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl ScriptedExecutor {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Answer `method path` with `status` and a JSON body
        pub fn on(&self, method: HttpMethod, path: &str, status: u16, body: Value) {
            self.routes.lock().push(Route {
                method,
                path: path.to_string(),
                reply: Ok(HttpResponse { status, body: body.to_string() }),
            });
        }

        /// Fail `method path` without a response
        pub fn fail(&self, method: HttpMethod, path: &str, message: &str) {
            self.routes.lock().push(Route {
                method,
                path: path.to_string(),
                reply: Err(ExchangeError::Transport { message: message.to_string() }),
            });
        }

        pub fn requests(&self) -> Vec<HttpRequest> {
            self.requests.lock().clone()
        }

        pub fn requests_to(&self, path: &str) -> Vec<HttpRequest> {
            self.requests()
                .into_iter()
                .filter(|r| path_of(&r.url) == path)
                .collect()
        }
    }

    pub fn path_of(url: &str) -> String {
        url::Url::parse(url)
            .map(|u| u.path().to_string())
            .unwrap_or_default()
    }

    #[async_trait]
    impl HttpExecutor for ScriptedExecutor {
        async fn execute(&self, request: HttpRequest) -> ExchangeResult<HttpResponse> {
            let path = path_of(&request.url);
            self.requests.lock().push(request.clone());

            self.routes
                .lock()
                .iter()
                .find(|r| r.method == request.method && r.path == path)
                .map(|r| r.reply.clone())
                .unwrap_or_else(|| {
                    Err(ExchangeError::Transport {
                        message: format!("no route for {} {}", request.method, path),
                    })
                })
        }
    }
}
