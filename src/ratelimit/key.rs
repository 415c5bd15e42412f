//! Bucket identity.

/// Identifies one bucket in the store: who is calling and what they call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BucketKey {
    /// Best-effort client identifier (usually an IP address)
    pub client: String,
    /// The resource being accessed (usually the request path)
    pub resource: String,
}

impl BucketKey {
    /// Create a new bucket key.
    pub fn new(client: &str, resource: &str) -> Self {
        Self {
            client: client.to_string(),
            resource: resource.to_string(),
        }
    }
}

impl std::fmt::Display for BucketKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.client, self.resource)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_key_display() {
        let key = BucketKey::new("1.2.3.4", "/api/chat/support");
        assert_eq!(key.to_string(), "1.2.3.4 /api/chat/support");
    }

    #[test]
    fn test_bucket_key_equality() {
        assert_eq!(BucketKey::new("a", "/x"), BucketKey::new("a", "/x"));
        assert_ne!(BucketKey::new("a", "/x"), BucketKey::new("b", "/x"));
    }
}
