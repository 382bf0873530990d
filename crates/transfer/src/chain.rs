//! Package integrity and hash-chain validation.

use otaclient_protocol::{sha256, FileTransferPackage, HASH_LEN, MIN_PACKAGE_LEN};

/// Why a package was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageFault {
    /// Total length below 65 bytes (empty data is never valid).
    TooShort,
    /// `SHA256(data)` does not equal the package's own `current_hash`.
    DataHashMismatch,
    /// `previous_hash` does not equal the last accepted package's
    /// `current_hash` (loss or reordering).
    ChainMismatch,
}

/// Verifies a package's integrity and its position in the hash chain.
///
/// `last_hash` is the `current_hash` of the last accepted package, or 32
/// zero bytes at the start of a transfer.
pub fn verify_package(
    package: &FileTransferPackage,
    last_hash: &[u8; HASH_LEN],
) -> Result<(), PackageFault> {
    if 2 * HASH_LEN + package.data.len() < MIN_PACKAGE_LEN {
        return Err(PackageFault::TooShort);
    }
    if sha256(&package.data) != package.current_hash {
        return Err(PackageFault::DataHashMismatch);
    }
    if &package.previous_hash != last_hash {
        return Err(PackageFault::ChainMismatch);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ZERO_HASH: [u8; HASH_LEN] = [0u8; HASH_LEN];

    #[test]
    fn accepts_first_package_with_zero_previous_hash() {
        let package = FileTransferPackage::from_data(ZERO_HASH, b"chunk".to_vec());
        assert_eq!(verify_package(&package, &ZERO_HASH), Ok(()));
    }

    #[test]
    fn accepts_chained_package() {
        let first = FileTransferPackage::from_data(ZERO_HASH, b"first".to_vec());
        let second = FileTransferPackage::from_data(first.current_hash, b"second".to_vec());
        assert_eq!(verify_package(&second, &first.current_hash), Ok(()));
    }

    #[test]
    fn rejects_empty_data() {
        let package = FileTransferPackage::from_data(ZERO_HASH, Vec::new());
        assert_eq!(
            verify_package(&package, &ZERO_HASH),
            Err(PackageFault::TooShort)
        );
    }

    #[test]
    fn rejects_corrupted_data() {
        let mut package = FileTransferPackage::from_data(ZERO_HASH, b"chunk".to_vec());
        package.data[0] ^= 0xFF;
        assert_eq!(
            verify_package(&package, &ZERO_HASH),
            Err(PackageFault::DataHashMismatch)
        );
    }

    #[test]
    fn rejects_out_of_order_package() {
        let first = FileTransferPackage::from_data(ZERO_HASH, b"first".to_vec());
        let third = FileTransferPackage::from_data([9u8; HASH_LEN], b"third".to_vec());
        // Chain expects `first.current_hash` as the previous hash.
        assert_eq!(
            verify_package(&third, &first.current_hash),
            Err(PackageFault::ChainMismatch)
        );
    }
}
