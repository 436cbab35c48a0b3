use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Compute HMAC-SHA256 over `body` with `secret`. Returns the hex-encoded MAC.
pub fn compute_hmac(secret: &[u8], body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a hex HMAC-SHA256 signature against `body`.
///
/// Uses constant-time comparison. Signatures that are not valid hex are
/// compared against zeros so they follow the same code path.
pub fn verify_hmac(secret: &[u8], body: &[u8], signature: &str) -> bool {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(body);

    let expected = hex::decode(signature.trim()).unwrap_or_else(|_| vec![0u8; 32]);

    mac.verify_slice(&expected).is_ok()
}

/// Derive a purpose-bound key from a root secret, so one configured secret
/// can sign several unrelated payload kinds without cross-protocol reuse.
pub fn derive_key(root: &[u8], purpose: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(root).expect("HMAC accepts any key length");
    mac.update(purpose);
    mac.finalize().into_bytes().to_vec()
}
