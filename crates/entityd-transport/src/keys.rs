//! Curve certificate handling.
//!
//! The sender authenticates with CURVE: the agent holds a client key pair
//! in `entityd.key_secret` (its public half is distributed as
//! `entityd.key`), and the model builder's public key lives in
//! `modeld.key`. Certificates are the standard ZeroMQ text format — a
//! `curve` section with Z85-encoded `public-key` / `secret-key` entries:
//!
//! ```text
//! metadata
//! curve
//!     public-key = "Yne@$w-vo<fVvi]a<NY6T1ed:M$fCG*[IaLV{hID"
//!     secret-key = "D:)Q[IlAW!ahhC2ac:9*A}h:p?([4%wOTJ%JR%cs"
//! ```

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors loading or parsing key material.
#[derive(Debug, Error)]
pub enum KeyError {
    /// The certificate file could not be read.
    #[error("cannot read key file {path}: {source}")]
    Read {
        /// The certificate path.
        path: PathBuf,
        /// The underlying I/O failure.
        source: std::io::Error,
    },

    /// The certificate lacks a required key entry.
    #[error("no {field} in key file {path}")]
    Missing {
        /// `public-key` or `secret-key`.
        field: &'static str,
        /// The certificate path.
        path: PathBuf,
    },

    /// A key entry is not valid Z85.
    #[error("malformed {field} in key file {path}")]
    Malformed {
        /// `public-key` or `secret-key`.
        field: &'static str,
        /// The certificate path.
        path: PathBuf,
    },
}

/// One parsed certificate.
#[derive(Debug, Clone)]
pub struct Certificate {
    /// The 32-byte public key.
    pub public: Vec<u8>,
    /// The 32-byte secret key, for `*.key_secret` certificates.
    pub secret: Option<Vec<u8>>,
}

/// The full key material the sender needs.
#[derive(Debug, Clone)]
pub struct CurveKeys {
    /// The agent's public key.
    pub client_public: Vec<u8>,
    /// The agent's secret key.
    pub client_secret: Vec<u8>,
    /// The model builder's public key.
    pub server_public: Vec<u8>,
}

/// Loads the client pair and server public key from a key directory.
pub fn load_keys(keydir: &Path) -> Result<CurveKeys, KeyError> {
    let server = load_certificate(&keydir.join("modeld.key"))?;
    let client_path = keydir.join("entityd.key_secret");
    let client = load_certificate(&client_path)?;
    let client_secret = client.secret.ok_or(KeyError::Missing {
        field: "secret-key",
        path: client_path,
    })?;
    Ok(CurveKeys {
        client_public: client.public,
        client_secret,
        server_public: server.public,
    })
}

/// Parses one certificate file.
pub fn load_certificate(path: &Path) -> Result<Certificate, KeyError> {
    let text = fs::read_to_string(path).map_err(|source| KeyError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let public = match extract(&text, "public-key") {
        Some(encoded) => decode_z85(&encoded, "public-key", path)?,
        None => {
            return Err(KeyError::Missing {
                field: "public-key",
                path: path.to_path_buf(),
            });
        }
    };
    let secret = match extract(&text, "secret-key") {
        Some(encoded) => Some(decode_z85(&encoded, "secret-key", path)?),
        None => None,
    };
    Ok(Certificate { public, secret })
}

/// Writes a certificate in the standard format.
///
/// Pass the secret key only for the `*.key_secret` variant.
pub fn write_certificate(
    path: &Path,
    public: &[u8],
    secret: Option<&[u8]>,
) -> std::io::Result<()> {
    let mut file = fs::File::create(path)?;
    writeln!(file, "metadata")?;
    writeln!(file, "curve")?;
    writeln!(file, "    public-key = \"{}\"", zmq::z85_encode(public).map_err(invalid)?)?;
    if let Some(secret) = secret {
        writeln!(file, "    secret-key = \"{}\"", zmq::z85_encode(secret).map_err(invalid)?)?;
    }
    Ok(())
}

fn invalid(err: zmq::EncodeError) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidInput, err.to_string())
}

/// Pulls the quoted value of `name = "…"` out of a certificate body.
fn extract(text: &str, name: &str) -> Option<String> {
    for line in text.lines() {
        let line = line.trim();
        if line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        if key.trim() == name {
            return Some(value.trim().trim_matches('"').to_string());
        }
    }
    None
}

fn decode_z85(encoded: &str, field: &'static str, path: &Path) -> Result<Vec<u8>, KeyError> {
    zmq::z85_decode(encoded).map_err(|_| KeyError::Malformed {
        field,
        path: path.to_path_buf(),
    })
}

/// Writes a disposable key directory with a client pair and server key.
#[cfg(test)]
pub(crate) fn write_test_keydir(dir: &Path) -> (zmq::CurveKeyPair, zmq::CurveKeyPair) {
    let client = zmq::CurveKeyPair::new().unwrap();
    let server = zmq::CurveKeyPair::new().unwrap();
    write_certificate(&dir.join("entityd.key"), &client.public_key, None).unwrap();
    write_certificate(
        &dir.join("entityd.key_secret"),
        &client.public_key,
        Some(&client.secret_key),
    )
    .unwrap();
    write_certificate(&dir.join("modeld.key"), &server.public_key, None).unwrap();
    (client, server)
}
