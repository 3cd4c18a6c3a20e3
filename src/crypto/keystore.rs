//! Keypair persistence on disk

use std::fs;
use std::path::Path;

use tracing::info;

use super::error::{CryptoError, CryptoResult};
use super::keys::Keypair;

/// Load a PKCS#1 PEM private key from `path`
pub fn load(path: &Path) -> CryptoResult<Keypair> {
    let pem = zeroize::Zeroizing::new(
        fs::read_to_string(path)
            .map_err(|e| CryptoError::KeyFile(format!("{}: {}", path.display(), e)))?,
    );
    Keypair::from_pem(&pem)
}

/// Write `keypair` to `path`, creating parent directories
///
/// On Unix the file is created with mode 0600.
pub fn save(keypair: &Keypair, path: &Path) -> CryptoResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .map_err(|e| CryptoError::KeyFile(format!("{}: {}", parent.display(), e)))?;
        }
    }

    let pem = keypair.to_pem()?;
    write_private(path, pem.as_bytes())
        .map_err(|e| CryptoError::KeyFile(format!("{}: {}", path.display(), e)))
}

#[cfg(unix)]
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(contents)
}

#[cfg(not(unix))]
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    fs::write(path, contents)
}

/// Load the keypair at `path`, or generate a `bits`-bit one and save it there
///
/// An existing file that fails to parse is an error; it is never overwritten.
pub fn load_or_generate(path: &Path, bits: usize) -> CryptoResult<Keypair> {
    if path.exists() {
        let keypair = load(path)?;
        info!(
            "Loaded {}-bit key {} from {}",
            keypair.block_size() * 8,
            keypair.public_key().fingerprint(),
            path.display()
        );
        return Ok(keypair);
    }

    let keypair = Keypair::generate(bits)?;
    save(&keypair, path)?;
    info!(
        "Generated {}-bit key {} and saved it to {}",
        bits,
        keypair.public_key().fingerprint(),
        path.display()
    );
    Ok(keypair)
}
