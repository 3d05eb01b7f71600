//! Mirroring mounted files into native secrets.

use crate::errors::{Error, Result};
use crate::platform::{NativeSecret, SecretObject, MANAGED_LABEL, SECRET_TYPE_TLS};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rustls_pemfile::Item;
use std::collections::BTreeMap;
use std::path::PathBuf;

pub const TLS_PRIVATE_KEY_KEY: &str = "tls.key";
pub const TLS_CERT_KEY: &str = "tls.crt";

/// A mirrored secret needs a name, a type and at least one complete data entry.
pub fn validate_secret_object(object: &SecretObject) -> Result<()> {
    if object.secret_name.is_empty() {
        return Err(Error::invalid_field("secret name is empty", "secretName"));
    }
    if object.secret_type.is_empty() {
        return Err(Error::invalid_field(
            format!("secret type is empty for secret {}", object.secret_name),
            "type",
        ));
    }
    if object.data.is_empty() {
        return Err(Error::invalid_field(
            format!("data is empty for secret {}", object.secret_name),
            "data",
        ));
    }
    for entry in &object.data {
        if entry.object_name.is_empty() || entry.key.is_empty() {
            return Err(Error::invalid_field(
                format!("objectName and key are required in secret {}", object.secret_name),
                "data",
            ));
        }
    }
    Ok(())
}

/// Read each entry's mounted file; TLS secrets keep only the key or
/// certificate part of the PEM bundle.
pub fn build_secret_data(
    object: &SecretObject,
    mounted_files: &BTreeMap<String, PathBuf>,
) -> Result<BTreeMap<String, Vec<u8>>> {
    let mut data = BTreeMap::new();
    for entry in &object.data {
        let path = mounted_files
            .get(&entry.object_name)
            .ok_or_else(|| Error::not_found("mounted_file", entry.object_name.clone()))?;
        let content = std::fs::read(path)
            .map_err(|e| Error::io(format!("failed to read {}", entry.object_name), e))?;

        let value = if object.secret_type == SECRET_TYPE_TLS {
            get_cert_part(&content, &entry.key)?
        } else {
            content
        };
        data.insert(entry.key.clone(), value);
    }
    Ok(data)
}

/// The native secret to patch for `object`, labelled as driver-managed
pub fn build_native_secret(
    object: &SecretObject,
    namespace: &str,
    mounted_files: &BTreeMap<String, PathBuf>,
) -> Result<NativeSecret> {
    let data = build_secret_data(object, mounted_files)?;
    let mut labels = object.labels.clone();
    labels.insert(MANAGED_LABEL.to_string(), "true".to_string());

    Ok(NativeSecret {
        name: object.secret_name.clone(),
        namespace: namespace.to_string(),
        secret_type: object.secret_type.clone(),
        labels,
        annotations: object.annotations.clone(),
        data,
    })
}

/// Extract the private key (`tls.key`) or certificate chain (`tls.crt`) from PEM data.
pub fn get_cert_part(content: &[u8], key: &str) -> Result<Vec<u8>> {
    let items = rustls_pemfile::read_all(&mut &content[..])
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::io("failed to parse PEM content", e))?;

    match key {
        TLS_PRIVATE_KEY_KEY => items
            .iter()
            .find_map(|item| match item {
                Item::Pkcs1Key(k) => Some(encode_pem("RSA PRIVATE KEY", k.secret_pkcs1_der())),
                Item::Pkcs8Key(k) => Some(encode_pem("PRIVATE KEY", k.secret_pkcs8_der())),
                Item::Sec1Key(k) => Some(encode_pem("EC PRIVATE KEY", k.secret_sec1_der())),
                _ => None,
            })
            .map(String::into_bytes)
            .ok_or_else(|| Error::invalid_argument("no private key found in PEM content")),
        TLS_CERT_KEY => {
            let chain: String = items
                .iter()
                .filter_map(|item| match item {
                    Item::X509Certificate(cert) => Some(encode_pem("CERTIFICATE", cert.as_ref())),
                    _ => None,
                })
                .collect();
            if chain.is_empty() {
                return Err(Error::invalid_argument("no certificate found in PEM content"));
            }
            Ok(chain.into_bytes())
        }
        other => Err(Error::invalid_field(
            format!("tls key {} is not supported, only tls.key and tls.crt are", other),
            "key",
        )),
    }
}

fn encode_pem(label: &str, der: &[u8]) -> String {
    let encoded = STANDARD.encode(der);
    let mut pem = format!("-----BEGIN {}-----\n", label);
    for line in encoded.as_bytes().chunks(64) {
        pem.push_str(&String::from_utf8_lossy(line));
        pem.push('\n');
    }
    pem.push_str(&format!("-----END {}-----\n", label));
    pem
}
