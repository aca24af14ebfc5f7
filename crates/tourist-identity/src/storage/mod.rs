//! Local persistence: the encrypted signer keystore and atomic file writes
//! used by the local ledger snapshot.
//!
//! - [`keystore`]: `.tkey` save/load with passphrase encryption.

pub mod keystore;

pub use keystore::{load_signer, read_signer_address, save_signer, KeystoreFile};

use std::path::Path;

use crate::error::Result;

/// Write `data` to `path` atomically using a sibling temporary file.
///
/// Creates the parent directory if it does not exist. A crash during the
/// write cannot leave a partially-written file visible to readers.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = std::path::PathBuf::from(tmp_name);
    std::fs::write(&tmp_path, data)?;
    std::fs::rename(&tmp_path, path)?;

    Ok(())
}
