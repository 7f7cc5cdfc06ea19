mod json_bridge;
mod map_value;
mod value;

pub use json_bridge::{map_from_json, map_to_json, value_from_json, value_to_json};
pub use map_value::{FieldMap, MapValue};
pub use value::{FirestoreValue, ValueKind};
