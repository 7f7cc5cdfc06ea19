use crate::firestore::error::FirestoreResult;
use crate::firestore::remote::datastore::WriteOperation;
use crate::firestore::value::FieldMap;

use super::converter::FirestoreDataConverter;
use super::reference::DocumentReference;

/// Options for `set` style writes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SetOptions {
    /// Overwrite only the fields present in the written value, keeping the rest.
    pub merge: bool,
}

impl SetOptions {
    pub fn merge() -> Self {
        Self { merge: true }
    }

    pub fn overwrite() -> Self {
        Self { merge: false }
    }
}

pub(crate) fn set_write<C>(
    reference: &DocumentReference<C>,
    value: &C::Model,
    options: SetOptions,
) -> FirestoreResult<WriteOperation>
where
    C: FirestoreDataConverter,
{
    let data = reference.converter().to_map(value)?;
    WriteOperation::set(reference.key().clone(), data, options.merge)
}

pub(crate) fn update_write<C>(reference: &DocumentReference<C>, fields: FieldMap) -> FirestoreResult<WriteOperation> {
    WriteOperation::update(reference.key().clone(), fields)
}

pub(crate) fn delete_write<C>(reference: &DocumentReference<C>) -> WriteOperation {
    WriteOperation::Delete {
        key: reference.key().clone(),
    }
}
