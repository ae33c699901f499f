//! Router TLS 证书模块
//!
//! 未提供用户证书时，为 Router 生成自签名 CA（`router-ca`）以及由其签发的
//! `router-amqps`、`router-internal` 证书，以 `kubernetes.io/tls` Secret 的形式保存。

use std::collections::BTreeMap;
use std::net::IpAddr;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use rcgen::{
    string::Ia5String, BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue,
    ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair, KeyUsagePurpose, SanType,
};
use tracing::debug;

use crate::error::{Error, Result};

/// CA Secret 名称
pub const ROUTER_CA_SECRET: &str = "router-ca";
/// AMQPS 证书 Secret 名称
pub const ROUTER_AMQPS_SECRET: &str = "router-amqps";
/// 内部证书 Secret 名称
pub const ROUTER_INTERNAL_SECRET: &str = "router-internal";

/// Router 需要的全部证书 Secret
pub const ROUTER_SECRETS: [&str; 3] = [ROUTER_CA_SECRET, ROUTER_AMQPS_SECRET, ROUTER_INTERNAL_SECRET];

pub const TLS_CERT_KEY: &str = "tls.crt";
pub const TLS_KEY_KEY: &str = "tls.key";
pub const CA_CERT_KEY: &str = "ca.crt";

const SECRET_TYPE_TLS: &str = "kubernetes.io/tls";
const VALIDITY_DAYS: i64 = 5 * 365;

/// 证书与私钥（PEM）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsMaterial {
    pub cert_pem: String,
    pub key_pem: String,
}

fn validity() -> (::time::OffsetDateTime, ::time::OffsetDateTime) {
    let now = ::time::OffsetDateTime::now_utc();
    (now, now + ::time::Duration::days(VALIDITY_DAYS))
}

fn distinguished_name(common_name: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, DnValue::Utf8String(common_name.to_string()));
    dn
}

fn cert_error(what: &str) -> impl Fn(rcgen::Error) -> Error + '_ {
    move |e| Error::Certificate(format!("{what}: {e}"))
}

/// 生成自签名 CA
pub fn generate_ca(common_name: &str) -> Result<TlsMaterial> {
    let mut params = CertificateParams::default();
    params.distinguished_name = distinguished_name(common_name);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    (params.not_before, params.not_after) = validity();

    let key = KeyPair::generate().map_err(cert_error("failed to generate CA key"))?;
    let cert = params.self_signed(&key).map_err(cert_error("failed to create CA cert"))?;

    Ok(TlsMaterial {
        cert_pem: cert.pem(),
        key_pem: key.serialize_pem(),
    })
}

/// 主机地址对应的 SAN：可解析为 IP 时使用 IP，否则使用 DNS 名称
fn subject_alt_name(host: &str) -> Result<SanType> {
    match host.parse::<IpAddr>() {
        Ok(ip) => Ok(SanType::IpAddress(ip)),
        Err(_) => Ia5String::try_from(host.to_string())
            .map(SanType::DnsName)
            .map_err(|e| Error::Certificate(format!("invalid DNS name '{host}': {e}"))),
    }
}

/// 使用 CA 为 `host` 签发服务端/客户端证书
pub fn generate_signed(ca: &TlsMaterial, subject: &str, host: &str) -> Result<TlsMaterial> {
    let mut params = CertificateParams::default();
    params.distinguished_name = distinguished_name(subject);
    params.is_ca = IsCa::NoCa;
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    // Router 间互联时同一证书既作服务端也作客户端
    params.extended_key_usages = vec![
        ExtendedKeyUsagePurpose::ServerAuth,
        ExtendedKeyUsagePurpose::ClientAuth,
    ];
    (params.not_before, params.not_after) = validity();
    params.subject_alt_names = vec![subject_alt_name(host)?];

    let key = KeyPair::generate().map_err(cert_error("failed to generate key"))?;
    let ca_key = KeyPair::from_pem(&ca.key_pem).map_err(cert_error("failed to load CA key"))?;
    let issuer =
        Issuer::from_ca_cert_pem(&ca.cert_pem, &ca_key).map_err(cert_error("failed to create issuer"))?;
    let cert = params.signed_by(&key, &issuer).map_err(cert_error("failed to sign cert"))?;

    Ok(TlsMaterial {
        cert_pem: cert.pem(),
        key_pem: key.serialize_pem(),
    })
}

/// 构造 `kubernetes.io/tls` Secret
pub fn tls_secret(namespace: &str, name: &str, material: &TlsMaterial, ca_pem: &str) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        type_: Some(SECRET_TYPE_TLS.to_string()),
        string_data: Some(BTreeMap::from([
            (TLS_CERT_KEY.to_string(), material.cert_pem.clone()),
            (TLS_KEY_KEY.to_string(), material.key_pem.clone()),
            (CA_CERT_KEY.to_string(), ca_pem.to_string()),
        ])),
        ..Default::default()
    }
}

/// 生成 Router 的 CA、AMQPS 与内部证书 Secret
///
/// 三者总是一起生成，保证证书链一致。
pub fn router_secrets(namespace: &str, address: &str) -> Result<Vec<Secret>> {
    debug!("为 Router 地址 {} 生成证书", address);

    let ca = generate_ca(ROUTER_CA_SECRET)?;
    let mut secrets = vec![tls_secret(namespace, ROUTER_CA_SECRET, &ca, &ca.cert_pem)];

    for name in [ROUTER_AMQPS_SECRET, ROUTER_INTERNAL_SECRET] {
        let leaf = generate_signed(&ca, address, address)?;
        secrets.push(tls_secret(namespace, name, &leaf, &ca.cert_pem));
    }

    Ok(secrets)
}
