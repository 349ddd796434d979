//! HCF file signature (magic bytes).

use crate::error::FormatError;

/// The 8-byte HCF magic signature.
///
/// Same shape as the PNG/HDF5 signatures: a high-bit byte, the format
/// name, and a CR LF / ^Z / LF sequence to catch text-mode transfers.
pub const HCF_SIGNATURE: [u8; 8] = [0x89, b'H', b'C', b'F', b'\r', b'\n', 0x1A, b'\n'];

/// Check that `data` starts with the HCF signature.
pub fn check_signature(data: &[u8]) -> Result<(), FormatError> {
    if data.len() >= 8 && data[..8] == HCF_SIGNATURE {
        Ok(())
    } else {
        Err(FormatError::SignatureNotFound)
    }
}
