//! Admission key resolution and store key generation.

use std::net::IpAddr;

/// Sentinel used when neither a principal nor a network origin is known.
pub const ANONYMOUS: &str = "anonymous";

/// The identity a limiter partitions its counters by. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AdmissionKey(String);

impl AdmissionKey {
    /// Resolve the key for a caller.
    ///
    /// Prefers the authenticated principal, then the caller's network origin,
    /// and falls back to the anonymous sentinel.
    pub fn resolve(principal: Option<&str>, client_ip: Option<IpAddr>) -> Self {
        if let Some(principal) = principal.map(str::trim).filter(|p| !p.is_empty()) {
            return Self(format!("user:{}", principal));
        }
        if let Some(ip) = client_ip {
            return Self(format!("ip:{}", ip));
        }
        Self(ANONYMOUS.to_string())
    }

    /// Get the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is the anonymous sentinel.
    pub fn is_anonymous(&self) -> bool {
        self.0 == ANONYMOUS
    }
}

impl std::fmt::Display for AdmissionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A key that uniquely identifies a window record in the store.
///
/// Format: `{limiter}:{admission key}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoreKey(String);

impl StoreKey {
    /// Create a new store key from a limiter name and admission key.
    pub fn new(limiter: &str, key: &AdmissionKey) -> Self {
        Self(format!("{}:{}", limiter, key.as_str()))
    }

    /// Get the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The limiter name portion of the key.
    pub fn limiter(&self) -> &str {
        self.0.split_once(':').map(|(limiter, _)| limiter).unwrap_or(&self.0)
    }
}

impl std::fmt::Display for StoreKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_principal_takes_precedence() {
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        let key = AdmissionKey::resolve(Some("u-123"), Some(ip));
        assert_eq!(key.as_str(), "user:u-123");
    }

    #[test]
    fn test_falls_back_to_ip() {
        let ip: IpAddr = "192.168.1.7".parse().unwrap();
        assert_eq!(AdmissionKey::resolve(None, Some(ip)).as_str(), "ip:192.168.1.7");
        // A blank principal is no principal
        assert_eq!(AdmissionKey::resolve(Some("  "), Some(ip)).as_str(), "ip:192.168.1.7");
    }

    #[test]
    fn test_anonymous_sentinel() {
        let key = AdmissionKey::resolve(None, None);
        assert!(key.is_anonymous());
        assert_eq!(key.to_string(), "anonymous");
    }

    #[test]
    fn test_store_key_format() {
        let key = AdmissionKey::resolve(Some("abc"), None);
        let store_key = StoreKey::new("auth", &key);
        assert_eq!(store_key.as_str(), "auth:user:abc");
        assert_eq!(store_key.limiter(), "auth");
    }

    #[test]
    fn test_store_keys_differ_per_limiter() {
        let key = AdmissionKey::resolve(None, None);
        assert_ne!(StoreKey::new("api", &key), StoreKey::new("auth", &key));
    }
}
