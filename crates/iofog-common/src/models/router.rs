//! Router 配置模型
//!
//! 定义 Router 的固定端口以及 `skrouterd.json` 配置模板，
//! 模板中的占位符在渲染时按命名空间和 SSL/SASL 设置替换。

/// AMQPS 消息端口
pub const MESSAGE_PORT: u16 = 5671;
/// HTTP 健康检查与指标端口
pub const HTTP_PORT: u16 = 9090;
/// Router 间互联端口
pub const INTERIOR_PORT: u16 = 55671;
/// 边缘 Router 接入端口
pub const EDGE_PORT: u16 = 45671;

/// Router 证书挂载根目录
pub const ROUTER_CERTS_DIR: &str = "/etc/skupper-router-certs";

/// 默认 SASL 机制
pub const DEFAULT_SASL_MECHANISMS: &str = "EXTERNAL";

/// 渲染 Router 配置所需的参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterConfigParams {
    /// 所在命名空间
    pub namespace: String,
    /// TLS 监听器使用的 SASL 机制
    pub sasl_mechanisms: String,
    /// TLS 监听器是否验证对端
    pub authenticate_peer: bool,
    /// 证书 Secret 是否包含 `ca.crt`
    pub secret_with_ca: bool,
    /// 内部（site）证书目录
    pub internal_cert_dir: String,
    /// AMQPS（local）证书目录
    pub amqps_cert_dir: String,
}

impl RouterConfigParams {
    /// 使用默认 SSL/SASL 设置创建参数
    pub fn new(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            sasl_mechanisms: DEFAULT_SASL_MECHANISMS.to_string(),
            authenticate_peer: true,
            secret_with_ca: true,
            internal_cert_dir: format!("{ROUTER_CERTS_DIR}/router-internal"),
            amqps_cert_dir: format!("{ROUTER_CERTS_DIR}/router-amqps"),
        }
    }

    /// 设置 SASL 机制，空字符串保持默认值
    pub fn with_sasl_mechanisms(mut self, mechanisms: &str) -> Self {
        if !mechanisms.trim().is_empty() {
            self.sasl_mechanisms = mechanisms.trim().to_string();
        }
        self
    }

    /// 按字符串设置对端验证，仅 "false"/"no" 关闭
    pub fn with_authenticate_peer(mut self, value: &str) -> Self {
        self.authenticate_peer = parse_flag(value, true);
        self
    }

    /// 设置证书是否带 CA
    pub fn with_ca(mut self, secret_with_ca: bool) -> Self {
        self.secret_with_ca = secret_with_ca;
        self
    }

    /// 设置证书挂载目录
    pub fn with_cert_dirs(mut self, internal: &str, amqps: &str) -> Self {
        self.internal_cert_dir = internal.trim_end_matches('/').to_string();
        self.amqps_cert_dir = amqps.trim_end_matches('/').to_string();
        self
    }

    /// 渲染 `skrouterd.json`
    pub fn render(&self) -> String {
        let ca_file = if self.secret_with_ca { "ca.crt" } else { "tls.crt" };

        RAW_ROUTER_CONFIG
            .replace("<MESSAGE_PORT>", &MESSAGE_PORT.to_string())
            .replace("<HTTP_PORT>", &HTTP_PORT.to_string())
            .replace("<INTERIOR_PORT>", &INTERIOR_PORT.to_string())
            .replace("<EDGE_PORT>", &EDGE_PORT.to_string())
            .replace("<NAMESPACE>", &json_escape(&self.namespace))
            .replace("<SASL_MECHANISMS>", &json_escape(&self.sasl_mechanisms))
            .replace("<AUTHENTICATE_PEER>", &self.authenticate_peer.to_string())
            .replace("<SITE_CERT_DIR>", &json_escape(&self.internal_cert_dir))
            .replace("<LOCAL_CERT_DIR>", &json_escape(&self.amqps_cert_dir))
            .replace("<CA_FILE>", ca_file)
    }
}

/// 转义后可直接放入模板中的 JSON 字符串（不含两侧引号）
fn json_escape(value: &str) -> String {
    let quoted = serde_json::Value::String(value.to_string()).to_string();
    quoted[1..quoted.len() - 1].to_string()
}

fn parse_flag(value: &str, default: bool) -> bool {
    match value.trim().to_lowercase().as_str() {
        "" => default,
        "false" | "no" | "0" => false,
        _ => true,
    }
}

const RAW_ROUTER_CONFIG: &str = r#"
[
    [
        "router",
        {
            "id": "default-router",
            "mode": "interior",
            "helloMaxAgeSeconds": "3",
            "metadata": "{\"id\":\"default-router\",\"version\":\"pot\",\"platform\":\"kubernetes\",\"pot-config\":\"1.0.0\"}"
        }
    ],
    [
        "site",
        {
            "name": "default-router",
            "platform": "kubernetes",
            "namespace": "<NAMESPACE>",
            "version": "pot"
        }
    ],
    [
        "sslProfile",
        {
            "name": "pot-router-site-server",
            "certFile": "<SITE_CERT_DIR>/tls.crt",
            "privateKeyFile": "<SITE_CERT_DIR>/tls.key",
            "caCertFile": "<SITE_CERT_DIR>/<CA_FILE>"
        }
    ],
    [
        "sslProfile",
        {
            "name": "pot-router-local-server",
            "certFile": "<LOCAL_CERT_DIR>/tls.crt",
            "privateKeyFile": "<LOCAL_CERT_DIR>/tls.key",
            "caCertFile": "<LOCAL_CERT_DIR>/<CA_FILE>"
        }
    ],
    [
        "listener",
        {
            "name": "pot-router-edge",
            "role": "edge",
            "port": <EDGE_PORT>,
            "sslProfile": "pot-router-site-server",
            "saslMechanisms": "<SASL_MECHANISMS>",
            "authenticatePeer": <AUTHENTICATE_PEER>
        }
    ],
    [
        "listener",
        {
            "name": "amqp",
            "host": "localhost",
            "port": 5672
        }
    ],
    [
        "listener",
        {
            "name": "amqps",
            "port": <MESSAGE_PORT>,
            "sslProfile": "pot-router-local-server",
            "saslMechanisms": "<SASL_MECHANISMS>",
            "authenticatePeer": <AUTHENTICATE_PEER>
        }
    ],
    [
        "listener",
        {
            "name": "@9090",
            "role": "normal",
            "port": <HTTP_PORT>,
            "http": true,
            "httpRootDir": "disabled",
            "healthz": true,
            "metrics": true
        }
    ],
    [
        "listener",
        {
            "name": "pot-router-inter-router",
            "role": "inter-router",
            "port": <INTERIOR_PORT>,
            "sslProfile": "pot-router-site-server",
            "saslMechanisms": "<SASL_MECHANISMS>",
            "authenticatePeer": <AUTHENTICATE_PEER>
        }
    ],
    [
        "address",
        {
            "prefix": "mc",
            "distribution": "multicast"
        }
    ],
    [
        "log",
        {
            "module": "ROUTER_CORE",
            "enable": "error+"
        }
    ]
]
"#;
