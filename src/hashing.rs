use sha2::{Digest, Sha256};

/// Length of the stored IP hash in hex characters (128 bits).
pub const IP_HASH_LEN: usize = 32;

/// Salted SHA-256 of a client IP.
///
/// Only the hash is ever stored or used as a rate-limit key, so audit
/// records and abuse buckets work without holding the raw address.
#[derive(Debug, Clone)]
pub struct IpHasher {
    salt: String,
}

impl IpHasher {
    pub fn new(salt: impl Into<String>) -> Self {
        Self { salt: salt.into() }
    }

    pub fn hash(&self, ip: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.salt.as_bytes());
        hasher.update(ip.as_bytes());
        let mut digest = hex::encode(hasher.finalize());
        digest.truncate(IP_HASH_LEN);
        digest
    }
}

/// Prefix of a hash that is safe to print in logs.
pub fn log_prefix(hash: &str) -> &str {
    &hash[..8.min(hash.len())]
}
