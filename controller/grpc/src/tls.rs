//! Client certificate material for the mutually authenticated agent channel.

use std::path::{Path, PathBuf};
use tonic::transport::{Certificate, ClientTlsConfig, Identity};

#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} does not contain PEM data", .0.display())]
    NotPem(PathBuf),

    #[error("invalid agent endpoint: {0}")]
    Endpoint(#[from] tonic::transport::Error),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientMtlsConfig {
    pub cert: PathBuf,
    pub key: PathBuf,
    pub ca: PathBuf,

    /// The name the agent's certificate must be valid for.
    pub server_name: String,
}

// === impl ClientMtlsConfig ===

impl ClientMtlsConfig {
    /// Reads the PEM files and builds the client TLS configuration.
    ///
    /// The files are read once; a restart is needed to pick up rotated
    /// material.
    pub fn load(&self) -> Result<ClientTlsConfig, TlsError> {
        let cert = read_pem(&self.cert)?;
        let key = read_pem(&self.key)?;
        let ca = read_pem(&self.ca)?;

        Ok(ClientTlsConfig::new()
            .identity(Identity::from_pem(cert, key))
            .ca_certificate(Certificate::from_pem(ca))
            .domain_name(self.server_name.clone()))
    }
}

fn read_pem(path: &Path) -> Result<Vec<u8>, TlsError> {
    let pem = std::fs::read(path).map_err(|source| TlsError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    if !pem.windows(11).any(|w| w == b"-----BEGIN ") {
        return Err(TlsError::NotPem(path.to_path_buf()));
    }
    Ok(pem)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PEM: &[u8] = b"-----BEGIN CERTIFICATE-----\nMIIB\n-----END CERTIFICATE-----\n";

    fn scratch(name: &str, contents: &[u8]) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("aegis-tls-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn missing_file_names_the_path() {
        let config = ClientMtlsConfig {
            cert: PathBuf::from("/nonexistent/controller.pem"),
            key: PathBuf::from("/nonexistent/controller.key"),
            ca: PathBuf::from("/nonexistent/ca.pem"),
            server_name: "aegis-agent".to_string(),
        };
        let err = config.load().unwrap_err();
        assert!(matches!(err, TlsError::Read { ref path, .. } if path == &config.cert));
        assert!(err.to_string().contains("/nonexistent/controller.pem"));
    }

    #[test]
    fn rejects_non_pem_material() {
        let config = ClientMtlsConfig {
            cert: scratch("cert.pem", PEM),
            key: scratch("key.pem", b"not a key"),
            ca: scratch("ca.pem", PEM),
            server_name: "aegis-agent".to_string(),
        };
        assert!(matches!(config.load(), Err(TlsError::NotPem(path)) if path == config.key));
    }

    #[test]
    fn loads_pem_material() {
        let config = ClientMtlsConfig {
            cert: scratch("ok-cert.pem", PEM),
            key: scratch("ok-key.pem", PEM),
            ca: scratch("ok-ca.pem", PEM),
            server_name: "aegis-agent".to_string(),
        };
        assert!(config.load().is_ok());
    }
}
