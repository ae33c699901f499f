//! OIDC 认证模块
//!
//! 通过 client-credentials 流程向身份服务获取 Controller 访问令牌。

use std::time::Duration;

use iofog_common::error::IntoError;
use iofog_common::{Error, Result, TokenResponse};
use reqwest::header::CACHE_CONTROL;
use reqwest::StatusCode;
use tracing::debug;

use crate::network_error;

/// 令牌请求超时
const TOKEN_TIMEOUT: Duration = Duration::from_secs(10);

/// client-credentials 凭据
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OidcCredentials {
    /// 身份服务根地址
    pub auth_url: String,
    /// Realm 名称
    pub realm: String,
    /// 客户端 ID
    pub client_id: String,
    /// 客户端密钥
    pub client_secret: String,
}

impl OidcCredentials {
    /// 令牌端点地址
    pub fn token_endpoint(&self) -> String {
        format!(
            "{}/realms/{}/protocol/openid-connect/token",
            self.auth_url.trim_end_matches('/'),
            self.realm
        )
    }
}

/// 获取访问令牌
pub async fn fetch_client_token(credentials: &OidcCredentials) -> Result<String> {
    let endpoint = credentials.token_endpoint();
    debug!("请求访问令牌: {}", endpoint);

    let http = reqwest::Client::builder()
        .timeout(TOKEN_TIMEOUT)
        .danger_accept_invalid_certs(true)
        .build()
        .map_err(network_error)?;

    let form = [
        ("grant_type", "client_credentials"),
        ("client_id", credentials.client_id.as_str()),
        ("client_secret", credentials.client_secret.as_str()),
    ];

    let response = http
        .post(&endpoint)
        .header(CACHE_CONTROL, "no-cache")
        .form(&form)
        .send()
        .await
        .map_err(network_error)?;

    let status = response.status();
    if status != StatusCode::OK {
        let body = response.text().await.unwrap_or_default();
        return Err(Error::UnexpectedStatus {
            code: status.as_u16(),
            body,
        });
    }

    let bytes = response.bytes().await.map_err(network_error)?;
    let token: TokenResponse = serde_json::from_slice(&bytes)?;
    if token.access_token.is_empty() {
        return "令牌端点返回了空的 access_token".into_error(Error::Authentication);
    }

    Ok(token.access_token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server};
    use std::convert::Infallible;
    use std::net::SocketAddr;

    /// 模拟身份服务：仅接受 client_id=controller / client_secret=s3cr%2Ft
    async fn mock_identity() -> SocketAddr {
        let make_svc = make_service_fn(|_| async {
            Ok::<_, Infallible>(service_fn(|req: Request<Body>| async move {
                let path = req.uri().path().to_string();
                let no_cache = req
                    .headers()
                    .get("cache-control")
                    .map(|v| v == "no-cache")
                    .unwrap_or(false);
                let body = hyper::body::to_bytes(req.into_body()).await.unwrap_or_default();
                let body = String::from_utf8_lossy(&body).to_string();

                let authorized = path == "/realms/pot/protocol/openid-connect/token"
                    && no_cache
                    && body.contains("grant_type=client_credentials")
                    && body.contains("client_id=controller")
                    && body.contains("client_secret=s3cr%2Ft");

                let response = if authorized {
                    Response::new(Body::from(
                        r#"{"access_token":"token-123","expires_in":300,"token_type":"Bearer"}"#,
                    ))
                } else {
                    Response::builder()
                        .status(401)
                        .body(Body::from(r#"{"error":"invalid_client"}"#))
                        .unwrap()
                };
                Ok::<_, Infallible>(response)
            }))
        });

        let server = Server::bind(&SocketAddr::from(([127, 0, 0, 1], 0))).serve(make_svc);
        let addr = server.local_addr();
        tokio::spawn(server);
        addr
    }

    fn credentials(addr: SocketAddr, secret: &str) -> OidcCredentials {
        OidcCredentials {
            auth_url: format!("http://{addr}/"),
            realm: "pot".to_string(),
            client_id: "controller".to_string(),
            client_secret: secret.to_string(),
        }
    }

    #[test]
    fn test_token_endpoint() {
        let creds = OidcCredentials {
            auth_url: "https://auth.example.com/".to_string(),
            realm: "iofog".to_string(),
            client_id: "c".to_string(),
            client_secret: "s".to_string(),
        };
        assert_eq!(
            creds.token_endpoint(),
            "https://auth.example.com/realms/iofog/protocol/openid-connect/token"
        );
    }

    #[tokio::test]
    async fn test_fetch_client_token() {
        let addr = mock_identity().await;
        // 密钥中的特殊字符需要经过表单编码
        let token = tokio_test::assert_ok!(fetch_client_token(&credentials(addr, "s3cr/t")).await);
        assert_eq!(token, "token-123");
    }

    #[tokio::test]
    async fn test_fetch_client_token_rejected() {
        let addr = mock_identity().await;
        let err = fetch_client_token(&credentials(addr, "wrong")).await.unwrap_err();
        assert!(err.to_string().starts_with("unexpected status code: 401"));
    }
}
