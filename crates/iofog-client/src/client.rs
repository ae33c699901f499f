//! Controller 客户端模块
//!
//! 负责与集群内 ioFog Controller 的 `/api/v3` 接口通信。
//! Controller 在首次部署时往往使用自签名证书，因此客户端默认不校验证书。

use std::time::Duration;

use iofog_common::{ControllerStatus, DefaultRouter, Error, Result};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;
use url::Url;

use crate::network_error;

/// 客户端选项
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// 单次请求超时
    pub timeout: Duration,
    /// 是否接受无效证书
    pub accept_invalid_certs: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(1),
            accept_invalid_certs: true,
        }
    }
}

/// ioFog Controller 客户端
#[derive(Debug, Clone)]
pub struct ControllerClient {
    /// API 根地址，形如 `http://controller.ns.svc.cluster.local:51121/api/v3`
    base_url: Url,
    /// HTTP 客户端
    http: reqwest::Client,
    /// 访问令牌
    access_token: Option<String>,
}

impl ControllerClient {
    /// 根据 scheme、主机和端口创建客户端
    pub fn new(scheme: &str, host: &str, port: u16) -> Result<Self> {
        Self::with_options(scheme, host, port, ClientOptions::default())
    }

    /// 使用自定义选项创建客户端
    pub fn with_options(scheme: &str, host: &str, port: u16, options: ClientOptions) -> Result<Self> {
        let raw = format!("{scheme}://{host}:{port}/api/v3");
        let base_url = Url::parse(&raw).map_err(|e| Error::InvalidUrl {
            url: raw.clone(),
            reason: e.to_string(),
        })?;

        let http = reqwest::Client::builder()
            .timeout(options.timeout)
            .danger_accept_invalid_certs(options.accept_invalid_certs)
            .build()
            .map_err(network_error)?;

        Ok(Self {
            base_url,
            http,
            access_token: None,
        })
    }

    /// API 根地址
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// 设置访问令牌，后续请求携带 Bearer 头
    pub fn set_access_token(&mut self, token: impl Into<String>) {
        self.access_token = Some(token.into());
    }

    /// 当前访问令牌
    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    /// 查询 Controller 状态
    pub async fn status(&self) -> Result<ControllerStatus> {
        let response = self.request(Method::GET, "/status").send().await.map_err(network_error)?;
        Self::decode(response).await
    }

    /// 注册（或覆盖）默认 Router
    pub async fn put_default_router(&self, router: &DefaultRouter) -> Result<()> {
        debug!("向 {} 注册默认 Router {}", self.base_url, router.host);
        self.send_json(Method::PUT, "/router", router).await
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url.as_str().trim_end_matches('/'), path)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.http.request(method, self.endpoint(path));
        match &self.access_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send_json<B: Serialize>(&self, method: Method, path: &str, body: &B) -> Result<()> {
        let response = self
            .request(method, path)
            .json(body)
            .send()
            .await
            .map_err(network_error)?;

        Self::check(response).await.map(|_| ())
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(Error::UnexpectedStatus {
            code: status.as_u16(),
            body,
        })
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let response = Self::check(response).await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Err(Error::Serialization("响应正文为空".to_string()));
        }

        let bytes = response.bytes().await.map_err(network_error)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}
