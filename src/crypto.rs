use std::borrow::Cow;
use std::path::Path;

use russh::Preferred;
use russh::keys::{Algorithm, HashAlg, PrivateKey};
use tracing::info;

use crate::error::{HoneypotError, HoneypotResult};

/// Algorithm preferences for the honeypot listener.
///
/// Modern algorithms come first, but the SHA-1 key exchanges, `ssh-rsa` and CBC
/// ciphers stay on the list so old scanners and bots still reach authentication.
pub fn honeypot_preferred() -> Preferred {
    Preferred {
        kex: Cow::Owned(vec![
            russh::kex::CURVE25519,
            russh::kex::DH_G14_SHA256,
            russh::kex::DH_G14_SHA1,
            russh::kex::DH_G1_SHA1,
        ]),
        key: Cow::Owned(vec![
            Algorithm::Ed25519,
            Algorithm::Rsa {
                hash: Some(HashAlg::Sha512),
            },
            Algorithm::Rsa {
                hash: Some(HashAlg::Sha256),
            },
            Algorithm::Rsa { hash: None },
        ]),
        cipher: Cow::Owned(vec![
            russh::cipher::CHACHA20_POLY1305,
            russh::cipher::AES_256_GCM,
            russh::cipher::AES_256_CTR,
            russh::cipher::AES_128_CTR,
            russh::cipher::AES_128_CBC,
        ]),
        mac: Cow::Owned(vec![
            russh::mac::HMAC_SHA256,
            russh::mac::HMAC_SHA512,
            russh::mac::HMAC_SHA1,
        ]),
        compression: Preferred::DEFAULT.compression,
    }
}

/// Load the server host key; any failure here is fatal for startup.
pub fn load_host_key(path: &Path) -> HoneypotResult<PrivateKey> {
    let key = russh::keys::load_secret_key(path, None).map_err(|source| HoneypotError::HostKey {
        path: path.to_path_buf(),
        source,
    })?;
    info!(path = %path.display(), algorithm = %key.algorithm(), "loaded host key");
    Ok(key)
}
