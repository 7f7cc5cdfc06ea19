//! Helpers for forward-slash delimited object paths.

/// Collapses repeated, leading and trailing slashes: `"/a//b/"` becomes `"a/b"`.
pub fn normalize(path: &str) -> String {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Parent of a normalized path; `None` for the root.
pub fn parent(path: &str) -> Option<String> {
    if path.is_empty() {
        return None;
    }
    Some(match path.rsplit_once('/') {
        Some((head, _)) => head.to_string(),
        None => String::new(),
    })
}

pub fn child(path: &str, child_path: &str) -> String {
    let child_path = normalize(child_path);
    match (path.is_empty(), child_path.is_empty()) {
        (true, _) => child_path,
        (false, true) => path.to_string(),
        (false, false) => format!("{path}/{child_path}"),
    }
}

pub fn last_component(path: &str) -> &str {
    path.rsplit_once('/').map_or(path, |(_, tail)| tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_slashes() {
        assert_eq!(normalize("/images//cats/"), "images/cats");
        assert_eq!(normalize("///"), "");
    }

    #[test]
    fn parent_walks_towards_root() {
        assert_eq!(parent(""), None);
        assert_eq!(parent("cats"), Some(String::new()));
        assert_eq!(parent("images/cats/tom.jpg"), Some("images/cats".to_string()));
    }

    #[test]
    fn child_joins_normalized_segments() {
        assert_eq!(child("", "a/b"), "a/b");
        assert_eq!(child("images", "/cats//tom.jpg"), "images/cats/tom.jpg");
        assert_eq!(child("images", "/"), "images");
    }

    #[test]
    fn last_component_is_the_object_name() {
        assert_eq!(last_component("images/cats/tom.jpg"), "tom.jpg");
        assert_eq!(last_component("single"), "single");
        assert_eq!(last_component(""), "");
    }
}
