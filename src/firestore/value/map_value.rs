use std::collections::BTreeMap;

use crate::firestore::model::FieldPath;
use crate::firestore::value::{FirestoreValue, ValueKind};

/// Untyped field map as it crosses the wire; the input and output of every converter.
pub type FieldMap = BTreeMap<String, FirestoreValue>;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MapValue {
    fields: FieldMap,
}

impl MapValue {
    pub fn new(fields: FieldMap) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &FieldMap {
        &self.fields
    }

    pub fn into_fields(self) -> FieldMap {
        self.fields
    }

    pub fn get(&self, field: &str) -> Option<&FirestoreValue> {
        self.fields.get(field)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Looks up a possibly nested field.
    pub fn get_path(&self, path: &FieldPath) -> Option<&FirestoreValue> {
        let (first, rest) = path.segments().split_first()?;
        let mut current = self.fields.get(first)?;
        for segment in rest {
            current = current.as_map()?.fields.get(segment)?;
        }
        Some(current)
    }

    /// Writes `value` at `path`, replacing non-map intermediates with maps.
    pub fn set_path(&mut self, path: &FieldPath, value: FirestoreValue) {
        let Some((last, parents)) = path.segments().split_last() else {
            return;
        };
        let mut current = &mut self.fields;
        for segment in parents {
            let entry = current
                .entry(segment.clone())
                .or_insert_with(|| FirestoreValue::from(MapValue::default()));
            if entry.as_map().is_none() {
                *entry = FirestoreValue::from(MapValue::default());
            }
            current = match entry_map_mut(entry) {
                Some(map) => map,
                None => return,
            };
        }
        current.insert(last.clone(), value);
    }

    /// Removes the field at `path`; missing intermediates are ignored.
    pub fn remove_path(&mut self, path: &FieldPath) {
        let Some((last, parents)) = path.segments().split_last() else {
            return;
        };
        let mut current = &mut self.fields;
        for segment in parents {
            current = match current.get_mut(segment).and_then(entry_map_mut) {
                Some(map) => map,
                None => return,
            };
        }
        current.remove(last);
    }

    /// Paths of every leaf field; non-empty nested maps are descended into.
    pub fn leaf_paths(&self) -> Vec<FieldPath> {
        let mut paths = Vec::new();
        collect_leaf_paths(&self.fields, None, &mut paths);
        paths
    }
}

fn entry_map_mut(value: &mut FirestoreValue) -> Option<&mut FieldMap> {
    match value.kind_mut() {
        ValueKind::Map(map) => Some(&mut map.fields),
        _ => None,
    }
}

fn collect_leaf_paths(fields: &FieldMap, prefix: Option<&FieldPath>, out: &mut Vec<FieldPath>) {
    for (name, value) in fields {
        let path = match prefix {
            Some(prefix) => prefix.child(name.clone()),
            None => FieldPath::from_single(name.clone()),
        };
        match value.as_map() {
            Some(map) if !map.is_empty() => collect_leaf_paths(&map.fields, Some(&path), out),
            _ => out.push(path),
        }
    }
}

impl From<FieldMap> for MapValue {
    fn from(fields: FieldMap) -> Self {
        Self::new(fields)
    }
}

impl FromIterator<(String, FirestoreValue)> for MapValue {
    fn from_iter<T: IntoIterator<Item = (String, FirestoreValue)>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(value: &str) -> FieldPath {
        FieldPath::from_dot_separated(value).unwrap()
    }

    #[test]
    fn nested_set_get_remove() {
        let mut map = MapValue::default();
        map.set_path(&path("address.city"), FirestoreValue::from("Paris"));
        map.set_path(&path("address.zip"), FirestoreValue::from("75001"));
        assert_eq!(
            map.get_path(&path("address.city")).and_then(FirestoreValue::as_str),
            Some("Paris")
        );

        map.remove_path(&path("address.city"));
        assert!(map.get_path(&path("address.city")).is_none());
        assert!(map.get_path(&path("address.zip")).is_some());
    }

    #[test]
    fn set_path_replaces_scalars_with_maps() {
        let mut map = MapValue::default();
        map.set_path(&path("owner"), FirestoreValue::from("ann"));
        map.set_path(&path("owner.name"), FirestoreValue::from("ann"));
        assert!(map.get("owner").and_then(FirestoreValue::as_map).is_some());
    }

    #[test]
    fn leaf_paths_descend_into_maps() {
        let mut map = MapValue::default();
        map.set_path(&path("name"), FirestoreValue::from("tom"));
        map.set_path(&path("address.city"), FirestoreValue::from("Paris"));
        let leaves: Vec<String> = map.leaf_paths().iter().map(FieldPath::canonical_string).collect();
        assert_eq!(leaves, vec!["address.city", "name"]);
    }
}
