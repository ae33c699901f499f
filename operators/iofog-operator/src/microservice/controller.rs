//! Controller 组件描述

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    HTTPGetAction, PersistentVolumeClaimVolumeSource, Probe, SecretVolumeSource, Volume,
    VolumeMount,
};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use super::{
    auth_keys, db_keys, labels, opaque_secret, scheme, secret_env, service_type_or_default,
    tcp_port, traffic_policy, value_env, Container, Microservice, MicroserviceService,
    CONTROLLER_AUTH_SECRET, CONTROLLER_DB_SECRET, CONTROLLER_NAME,
};
use crate::crd::{Auth, Database};
use crate::error::{Error, Result};

/// Controller API 端口
pub const CONTROLLER_API_PORT: i32 = 51121;
/// ECN Viewer 服务端口
const ECN_VIEWER_SERVICE_PORT: i32 = 80;
const DEFAULT_ECN_VIEWER_PORT: u16 = 8008;
const DEFAULT_PID_BASE_DIR: &str = "/home/runner";

const SQLITE_VOLUME: &str = "controller-sqlite";
const SQLITE_MOUNT_PATH: &str =
    "/home/runner/.npm-global/lib/node_modules/@datasance/iofogcontroller/src/data/sqlite_files/";
const SQLITE_SUB_PATH: &str = "prod_database.sqlite";

const CERT_VOLUME: &str = "controller-cert";
const CERT_MOUNT_PATH: &str = "/etc/pot/controller-cert/";

/// 安装证书、关闭开发模式后启动 Controller
const HTTPS_ENTRYPOINT: &str = r#"if [ -f /etc/pot/controller-cert/ca.crt ]; then
  iofog-controller config add -c /etc/pot/controller-cert/tls.crt && \
  iofog-controller config add -i /etc/pot/controller-cert/ca.crt && \
  iofog-controller config add -k /etc/pot/controller-cert/tls.key && \
  iofog-controller config dev-mode --off;
else
  iofog-controller config add -c /etc/pot/controller-cert/tls.crt && \
  iofog-controller config add -i /etc/pot/controller-cert/tls.crt && \
  iofog-controller config add -k /etc/pot/controller-cert/tls.key && \
  iofog-controller config dev-mode --off;
fi && \
node /home/runner/.npm-global/lib/node_modules/@datasance/iofogcontroller/src/server.js"#;

/// Controller 配置
#[derive(Debug, Clone, Default)]
pub struct ControllerMicroserviceConfig {
    pub replicas: i32,
    pub image: String,
    pub image_pull_secret: String,
    pub service_type: String,
    pub service_annotations: BTreeMap<String, String>,
    pub load_balancer_addr: String,
    pub https: Option<bool>,
    /// HTTPS 证书 Secret
    pub secret_name: String,
    pub auth: Auth,
    pub db: Database,
    pub proxy_image: String,
    pub router_image: String,
    pub ecn: String,
    pub pid_base_dir: String,
    pub ecn_viewer_port: u16,
    pub ecn_viewer_url: String,
}

impl ControllerMicroserviceConfig {
    /// 填充默认值，`default_image` 在镜像为空时调用
    pub fn with_defaults(mut self, default_image: impl FnOnce() -> String) -> Self {
        if self.replicas == 0 {
            self.replicas = 1;
        }
        if self.image.is_empty() {
            self.image = default_image();
        }
        self.service_type = service_type_or_default(&self.service_type);
        if self.ecn_viewer_port == 0 {
            self.ecn_viewer_port = DEFAULT_ECN_VIEWER_PORT;
        }
        if self.pid_base_dir.is_empty() {
            self.pid_base_dir = DEFAULT_PID_BASE_DIR.to_string();
        }
        self
    }

    pub fn scheme(&self) -> &'static str {
        scheme(self.https)
    }
}

/// 构建 Controller 组件描述，调用前应先执行 `with_defaults`
pub fn new_controller_microservice(namespace: &str, cfg: &ControllerMicroserviceConfig) -> Microservice {
    let scheme = cfg.scheme();

    let mut container = Container {
        name: CONTROLLER_NAME.to_string(),
        image: cfg.image.clone(),
        image_pull_policy: "Always".to_string(),
        readiness_probe: Some(Probe {
            http_get: Some(HTTPGetAction {
                path: Some("/api/v3/status".to_string()),
                port: IntOrString::Int(CONTROLLER_API_PORT),
                scheme: Some(scheme.to_uppercase()),
                ..Default::default()
            }),
            initial_delay_seconds: Some(10),
            timeout_seconds: Some(10),
            period_seconds: Some(5),
            failure_threshold: Some(2),
            ..Default::default()
        }),
        env: controller_env(cfg),
        ..Default::default()
    };

    let mut msvc = Microservice {
        name: CONTROLLER_NAME.to_string(),
        labels: labels(&[("name", CONTROLLER_NAME)]),
        image_pull_secret: cfg.image_pull_secret.clone(),
        replicas: cfg.replicas,
        min_ready_seconds: 5,
        services: vec![MicroserviceService {
            name: CONTROLLER_NAME.to_string(),
            type_: cfg.service_type.clone(),
            annotations: cfg.service_annotations.clone(),
            traffic_policy: traffic_policy(&cfg.service_type),
            load_balancer_ip: (!cfg.load_balancer_addr.is_empty()).then(|| cfg.load_balancer_addr.clone()),
            ports: vec![
                tcp_port("controller-api", CONTROLLER_API_PORT, CONTROLLER_API_PORT),
                tcp_port("ecn-viewer", ECN_VIEWER_SERVICE_PORT, i32::from(cfg.ecn_viewer_port)),
            ],
        }],
        secrets: vec![
            opaque_secret(
                namespace,
                CONTROLLER_DB_SECRET,
                labels(&[
                    (db_keys::NAME, &cfg.db.database_name),
                    (db_keys::HOST, &cfg.db.host),
                    (db_keys::PORT, &cfg.db.port.to_string()),
                    (db_keys::USER, &cfg.db.user),
                    (db_keys::PASSWORD, &cfg.db.password),
                ]),
            ),
            opaque_secret(
                namespace,
                CONTROLLER_AUTH_SECRET,
                labels(&[
                    (auth_keys::URL, &cfg.auth.url),
                    (auth_keys::REALM, &cfg.auth.realm),
                    (auth_keys::REALM_KEY, &cfg.auth.realm_key),
                    (auth_keys::SSL, &cfg.auth.ssl),
                    (auth_keys::CONTROLLER_CLIENT, &cfg.auth.controller_client),
                    (auth_keys::CONTROLLER_CLIENT_SECRET, &cfg.auth.controller_secret),
                    (auth_keys::VIEWER_CLIENT, &cfg.auth.viewer_client),
                ]),
            ),
        ],
        ..Default::default()
    };

    // 未配置外部数据库时使用 PVC 上的 sqlite
    if cfg.db.host.is_empty() {
        msvc.recreate_on_rollout = true;
        msvc.volumes.push(Volume {
            name: SQLITE_VOLUME.to_string(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: SQLITE_VOLUME.to_string(),
                read_only: Some(false),
            }),
            ..Default::default()
        });
        container.volume_mounts.push(VolumeMount {
            name: SQLITE_VOLUME.to_string(),
            mount_path: SQLITE_MOUNT_PATH.to_string(),
            sub_path: Some(SQLITE_SUB_PATH.to_string()),
            ..Default::default()
        });
    }

    if cfg.https == Some(true) {
        msvc.volumes.push(Volume {
            name: CERT_VOLUME.to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(cfg.secret_name.clone()),
                ..Default::default()
            }),
            ..Default::default()
        });
        container.volume_mounts.push(VolumeMount {
            name: CERT_VOLUME.to_string(),
            mount_path: CERT_MOUNT_PATH.to_string(),
            ..Default::default()
        });
        container.command = vec!["/bin/sh".to_string(), "-c".to_string()];
        container.args = vec![HTTPS_ENTRYPOINT.to_string()];
    }

    msvc.containers.push(container);
    msvc
}

fn controller_env(cfg: &ControllerMicroserviceConfig) -> Vec<k8s_openapi::api::core::v1::EnvVar> {
    vec![
        secret_env("KC_URL", CONTROLLER_AUTH_SECRET, auth_keys::URL),
        secret_env("KC_REALM", CONTROLLER_AUTH_SECRET, auth_keys::REALM),
        secret_env("KC_REALM_KEY", CONTROLLER_AUTH_SECRET, auth_keys::REALM_KEY),
        secret_env("KC_SSL_REQ", CONTROLLER_AUTH_SECRET, auth_keys::SSL),
        secret_env("KC_CLIENT", CONTROLLER_AUTH_SECRET, auth_keys::CONTROLLER_CLIENT),
        secret_env("KC_CLIENT_SECRET", CONTROLLER_AUTH_SECRET, auth_keys::CONTROLLER_CLIENT_SECRET),
        secret_env("KC_VIEWER_CLIENT", CONTROLLER_AUTH_SECRET, auth_keys::VIEWER_CLIENT),
        value_env("DB_PROVIDER", cfg.db.provider.as_str()),
        secret_env("DB_NAME", CONTROLLER_DB_SECRET, db_keys::NAME),
        secret_env("DB_USERNAME", CONTROLLER_DB_SECRET, db_keys::USER),
        secret_env("DB_PASSWORD", CONTROLLER_DB_SECRET, db_keys::PASSWORD),
        secret_env("DB_HOST", CONTROLLER_DB_SECRET, db_keys::HOST),
        secret_env("DB_PORT", CONTROLLER_DB_SECRET, db_keys::PORT),
        value_env("SystemImages_Proxy_1", cfg.proxy_image.as_str()),
        value_env("SystemImages_Proxy_2", cfg.proxy_image.as_str()),
        value_env("SystemImages_Router_1", cfg.router_image.as_str()),
        value_env("SystemImages_Router_2", cfg.router_image.as_str()),
        value_env("ECN_NAME", cfg.ecn.as_str()),
        value_env("PID_BASE", cfg.pid_base_dir.as_str()),
        value_env("VIEWER_PORT", cfg.ecn_viewer_port.to_string()),
        value_env("VIEWER_URL", cfg.ecn_viewer_url.as_str()),
    ]
}

/// Controller API 端口：第一个服务的第一个端口
pub fn controller_port(msvc: &Microservice) -> Result<u16> {
    let port = msvc
        .services
        .first()
        .and_then(|svc| svc.ports.first())
        .map(|p| p.port)
        .ok_or_else(|| Error::reconcile("Controller", "controller microservice does not have requisite ports"))?;

    u16::try_from(port).map_err(|_| Error::reconcile("Controller", format!("invalid controller port {port}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ControllerMicroserviceConfig {
        ControllerMicroserviceConfig {
            auth: Auth {
                url: "https://auth.example.com/".to_string(),
                realm: "pot".to_string(),
                controller_client: "pot-controller".to_string(),
                controller_secret: "secret".to_string(),
                ..Default::default()
            },
            proxy_image: "ghcr.io/datasance/proxy:latest".to_string(),
            router_image: "ghcr.io/datasance/router:latest".to_string(),
            ..Default::default()
        }
        .with_defaults(|| "ghcr.io/datasance/controller:latest".to_string())
    }

    fn env_value<'a>(msvc: &'a Microservice, name: &str) -> Option<&'a str> {
        msvc.containers[0]
            .env
            .iter()
            .find(|e| e.name == name)
            .and_then(|e| e.value.as_deref())
    }

    #[test]
    fn test_defaults() {
        let cfg = config();
        assert_eq!(cfg.replicas, 1);
        assert_eq!(cfg.image, "ghcr.io/datasance/controller:latest");
        assert_eq!(cfg.service_type, "LoadBalancer");
        assert_eq!(cfg.ecn_viewer_port, 8008);
        assert_eq!(cfg.pid_base_dir, "/home/runner");
        assert_eq!(cfg.scheme(), "http");
    }

    #[test]
    fn test_sqlite_controller() {
        let msvc = new_controller_microservice("iofog", &config());

        assert_eq!(msvc.name, "controller");
        assert!(msvc.recreate_on_rollout);
        assert_eq!(msvc.min_ready_seconds, 5);
        assert_eq!(msvc.pvc_volumes().count(), 1);

        let service = &msvc.services[0];
        assert_eq!(service.traffic_policy.as_deref(), Some("Local"));
        assert_eq!(service.ports[0].port, 51121);
        assert_eq!(service.ports[1].port, 80);
        assert_eq!(service.ports[1].target_port, Some(IntOrString::Int(8008)));
        assert_eq!(controller_port(&msvc).unwrap(), 51121);

        let mount = &msvc.containers[0].volume_mounts[0];
        assert!(mount.mount_path.starts_with('/'));
        assert_eq!(mount.sub_path.as_deref(), Some("prod_database.sqlite"));

        let probe = msvc.containers[0].readiness_probe.as_ref().unwrap();
        assert_eq!(probe.http_get.as_ref().unwrap().scheme.as_deref(), Some("HTTP"));

        assert_eq!(env_value(&msvc, "VIEWER_PORT"), Some("8008"));
        assert_eq!(env_value(&msvc, "SystemImages_Router_2"), Some("ghcr.io/datasance/router:latest"));
    }

    #[test]
    fn test_external_db_and_https() {
        let mut cfg = config();
        cfg.db = Database {
            provider: "mysql".to_string(),
            host: "mysql.db".to_string(),
            port: 3306,
            user: "root".to_string(),
            password: "pw".to_string(),
            database_name: "iofog".to_string(),
        };
        cfg.https = Some(true);
        cfg.secret_name = "controller-tls".to_string();

        let msvc = new_controller_microservice("iofog", &cfg);
        assert!(!msvc.recreate_on_rollout);
        assert_eq!(msvc.pvc_volumes().count(), 0);

        let container = &msvc.containers[0];
        assert_eq!(container.command, vec!["/bin/sh", "-c"]);
        assert!(container.args[0].contains("dev-mode --off"));
        assert_eq!(container.volume_mounts[0].mount_path, "/etc/pot/controller-cert/");
        assert_eq!(
            container.readiness_probe.as_ref().unwrap().http_get.as_ref().unwrap().scheme.as_deref(),
            Some("HTTPS")
        );

        let db_secret = msvc.secret(CONTROLLER_DB_SECRET).unwrap();
        let data = db_secret.string_data.as_ref().unwrap();
        assert_eq!(data["port"], "3306");
        assert_eq!(data["host"], "mysql.db");
        assert_eq!(env_value(&msvc, "DB_PROVIDER"), Some("mysql"));
    }

    #[test]
    fn test_missing_ports() {
        let msvc = Microservice::default();
        assert!(controller_port(&msvc).is_err());
    }
}
