use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{tls, Method};

use crate::{ClientConfig, FabricError, Result, TransportError};

/// Fully-formed request handed to a [`Transport`].
#[derive(Clone, Debug)]
pub struct TransportRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
    pub timeout: Duration,
}

/// Response with the body already read.
#[derive(Clone, Debug)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

/// Sends one HTTP exchange. Retries are the caller's business.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        request: TransportRequest,
    ) -> std::result::Result<TransportResponse, TransportError>;
}

/// [`Transport`] backed by `reqwest`.
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    http: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// Applies TLS verification and proxy settings from `config`.
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .min_tls_version(tls::Version::TLS_1_2)
            .danger_accept_invalid_certs(config.insecure_tls);

        if let Some(proxy) = &config.proxy {
            let mut upstream = reqwest::Proxy::all(&proxy.url).map_err(|err| {
                FabricError::Configuration(format!("invalid proxy URL '{}': {err}", proxy.url))
            })?;
            if let Some(username) = &proxy.username {
                upstream =
                    upstream.basic_auth(username, proxy.password.as_deref().unwrap_or_default());
            }
            builder = builder.proxy(upstream);
        }

        let http = builder.build().map_err(|err| {
            FabricError::Configuration(format!("could not build HTTP client: {err}"))
        })?;
        Ok(Self { http })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(
        &self,
        request: TransportRequest,
    ) -> std::result::Result<TransportResponse, TransportError> {
        let mut builder = self
            .http
            .request(request.method, &request.url)
            .headers(request.headers)
            .timeout(request.timeout);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.bytes().await?.to_vec();

        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }
}
