use crate::firestore::error::{invalid_argument, FirestoreResult};

const DOCUMENT_ID_FIELD: &str = "__name__";

/// Dotted path to a field inside a document, e.g. `address.city`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldPath {
    segments: Vec<String>,
}

impl FieldPath {
    pub fn new<S, I>(segments: I) -> FirestoreResult<Self>
    where
        S: Into<String>,
        I: IntoIterator<Item = S>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        if segments.is_empty() || segments.iter().any(String::is_empty) {
            return Err(invalid_argument(
                "Field paths must not be empty and must not contain empty segments",
            ));
        }
        Ok(Self { segments })
    }

    pub fn from_dot_separated(path: &str) -> FirestoreResult<Self> {
        if path.trim().is_empty() {
            return Err(invalid_argument("Field path string cannot be empty"));
        }
        FieldPath::new(path.split('.')).map_err(|_| {
            invalid_argument(format!(
                "Invalid field path ({path}). Paths must not start or end with '.', or contain '..'"
            ))
        })
    }

    /// Single segment path taken verbatim from a map key.
    pub(crate) fn from_single(segment: String) -> Self {
        Self {
            segments: vec![segment],
        }
    }

    /// The pseudo-field ordering and filtering by document identifier.
    pub fn document_id() -> Self {
        Self {
            segments: vec![DOCUMENT_ID_FIELD.to_string()],
        }
    }

    pub fn is_document_id(&self) -> bool {
        self.segments.len() == 1 && self.segments[0] == DOCUMENT_ID_FIELD
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn first_segment(&self) -> &str {
        &self.segments[0]
    }

    pub fn canonical_string(&self) -> String {
        self.segments.join(".")
    }

    /// Server form: segments that are not plain identifiers are wrapped in backticks.
    pub fn server_format(&self) -> String {
        self.segments
            .iter()
            .map(|segment| {
                if is_simple_identifier(segment) {
                    segment.clone()
                } else {
                    format!("`{}`", segment.replace('\\', "\\\\").replace('`', "\\`"))
                }
            })
            .collect::<Vec<_>>()
            .join(".")
    }

    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        Self { segments }
    }
}

fn is_simple_identifier(segment: &str) -> bool {
    let mut chars = segment.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

/// Converts common user inputs into a validated [`FieldPath`].
pub trait IntoFieldPath {
    fn into_field_path(self) -> FirestoreResult<FieldPath>;
}

impl IntoFieldPath for FieldPath {
    fn into_field_path(self) -> FirestoreResult<FieldPath> {
        Ok(self)
    }
}

impl IntoFieldPath for &FieldPath {
    fn into_field_path(self) -> FirestoreResult<FieldPath> {
        Ok(self.clone())
    }
}

impl IntoFieldPath for String {
    fn into_field_path(self) -> FirestoreResult<FieldPath> {
        FieldPath::from_dot_separated(&self)
    }
}

impl IntoFieldPath for &str {
    fn into_field_path(self) -> FirestoreResult<FieldPath> {
        FieldPath::from_dot_separated(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dotted_paths() {
        let field = FieldPath::from_dot_separated("address.city").unwrap();
        assert_eq!(field.segments(), &["address", "city"]);
        assert!(FieldPath::from_dot_separated("address..city").is_err());
        assert!(FieldPath::from_dot_separated("").is_err());
    }

    #[test]
    fn quotes_non_identifier_segments() {
        let field = FieldPath::new(["tags", "favourite-toy"]).unwrap();
        assert_eq!(field.server_format(), "tags.`favourite-toy`");
    }

    #[test]
    fn recognises_document_id() {
        assert!(FieldPath::document_id().is_document_id());
        assert!("__name__".into_field_path().unwrap().is_document_id());
    }
}
