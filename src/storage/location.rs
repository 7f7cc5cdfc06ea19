use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::storage::path::normalize;

/// Characters left as-is when encoding object names into URL path segments.
const OBJECT_NAME: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

pub(crate) fn encode_component(value: &str) -> String {
    utf8_percent_encode(value, OBJECT_NAME).to_string()
}

/// A bucket plus a normalized object path; the empty path is the bucket root.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Location {
    bucket: String,
    path: String,
}

impl Location {
    pub fn new(bucket: impl Into<String>, path: &str) -> Self {
        Self {
            bucket: bucket.into(),
            path: normalize(path),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_root(&self) -> bool {
        self.path.is_empty()
    }

    /// `/b/{bucket}/o/{path}` with the object path encoded as one segment.
    pub fn full_server_url(&self) -> String {
        format!(
            "/b/{}/o/{}",
            encode_component(&self.bucket),
            encode_component(&self.path)
        )
    }

    pub fn bucket_only_server_url(&self) -> String {
        format!("/b/{}/o", encode_component(&self.bucket))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_path_is_encoded_as_a_single_segment() {
        let location = Location::new("demo.appspot.com", "/images/my cat (1).jpg");
        assert_eq!(location.path(), "images/my cat (1).jpg");
        assert_eq!(
            location.full_server_url(),
            "/b/demo.appspot.com/o/images%2Fmy%20cat%20(1).jpg"
        );
        assert_eq!(location.bucket_only_server_url(), "/b/demo.appspot.com/o");
    }

    #[test]
    fn empty_path_is_root() {
        assert!(Location::new("bucket", "/").is_root());
        assert!(!Location::new("bucket", "a").is_root());
    }
}
