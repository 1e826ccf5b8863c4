//! Self-signed TLS material for the admin HTTPS listener. Grounded on
//! the admission-webhook certificate generator
//! (`generate_self_signed_certs`): a self-signed CA plus a
//! server certificate signed by it, generalized from a Kubernetes
//! service's `<name>.<namespace>.svc` SANs to an arbitrary admin hostname
//! plus optional IP SANs.

use anyhow::{Context, Result};
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, SanType};
use std::net::IpAddr;
use std::path::Path;

/// Generates a CA certificate and a server certificate/key signed by it,
/// returned as PEM strings `(ca_pem, cert_pem, key_pem)`.
pub fn generate_self_signed_certs(hostname: &str, ip_sans: &[String]) -> Result<(String, String, String)> {
    let mut ca_params = CertificateParams::default();
    ca_params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
    let mut ca_dn = DistinguishedName::new();
    ca_dn.push(DnType::CommonName, "ai-gatewayd-admin-ca");
    ca_dn.push(DnType::OrganizationName, "ai-gatewayd");
    ca_params.distinguished_name = ca_dn;

    let ca_key = KeyPair::generate().context("failed to generate CA key pair")?;
    let ca_cert = ca_params.self_signed(&ca_key).context("failed to self-sign CA certificate")?;

    let mut server_params = CertificateParams::default();
    let mut server_dn = DistinguishedName::new();
    server_dn.push(DnType::CommonName, hostname);
    server_params.distinguished_name = server_dn;

    let mut sans = vec![SanType::DnsName(hostname.to_string().try_into().context("invalid DNS name for SAN")?)];
    for ip_str in ip_sans {
        let ip: IpAddr = ip_str.parse().with_context(|| format!("invalid IP address for SAN: {ip_str}"))?;
        sans.push(SanType::IpAddress(ip));
    }
    server_params.subject_alt_names = sans;

    let server_key = KeyPair::generate().context("failed to generate server key pair")?;
    let server_cert = server_params.signed_by(&server_key, &ca_cert, &ca_key).context("failed to sign server certificate")?;

    Ok((ca_cert.pem(), server_cert.pem(), server_key.serialize_pem()))
}

/// Writes `ca.crt`, `tls.crt`, `tls.key` into `output_dir`, creating it if
/// necessary.
pub fn write_certs(hostname: &str, ip_sans: &[String], output_dir: &Path) -> Result<(String, String)> {
    let (ca_pem, cert_pem, key_pem) = generate_self_signed_certs(hostname, ip_sans)?;
    std::fs::create_dir_all(output_dir).context("failed to create TLS output directory")?;
    let ca_path = output_dir.join("ca.crt");
    let cert_path = output_dir.join("tls.crt");
    let key_path = output_dir.join("tls.key");
    std::fs::write(&ca_path, ca_pem).context("failed to write ca.crt")?;
    std::fs::write(&cert_path, &cert_pem).context("failed to write tls.crt")?;
    std::fs::write(&key_path, &key_pem).context("failed to write tls.key")?;
    Ok((cert_path.to_string_lossy().to_string(), key_path.to_string_lossy().to_string()))
}
