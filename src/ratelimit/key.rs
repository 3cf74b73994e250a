//! Bucket key generation and handling.

/// Group used when the caller does not name one.
pub const DEFAULT_GROUP: &str = "global";

/// A key that uniquely identifies a rate limit bucket.
///
/// Two requests share a counter iff they hit the same resource path, in the
/// same group, during the same discrete window.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BucketKey {
    /// Index of the fixed window (`now_ms / unit_ms`)
    pub window_index: u64,
    /// The resource path being limited
    pub path: String,
    /// The caller-supplied grouping key
    pub group: String,
}

impl BucketKey {
    /// Create a new bucket key.
    pub fn new(window_index: u64, path: &str, group: &str) -> Self {
        Self {
            window_index,
            path: path.to_string(),
            group: group.to_string(),
        }
    }

    /// Convert the bucket key to its wire representation, `<window>##<path>##<group>`.
    pub fn to_string_key(&self) -> String {
        format!("{}##{}##{}", self.window_index, self.path, self.group)
    }
}

impl std::fmt::Display for BucketKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_string_key())
    }
}
