use std::collections::BTreeMap;

use cairn_types::ObjectId;

use crate::error::{StoreError, StoreResult};

/// Content-addressed blob store.
///
/// Objects are immutable once written: the same bytes always produce the
/// same id, so writing an existing object is a no-op.
pub trait ObjectStore: Send + Sync {
    /// Read an object by id. Returns `Ok(None)` if it does not exist.
    fn read(&self, id: &ObjectId) -> StoreResult<Option<Vec<u8>>>;

    /// Write an object and return its id.
    fn write(&self, data: &[u8]) -> StoreResult<ObjectId>;

    /// Check whether an object exists in the store.
    fn exists(&self, id: &ObjectId) -> StoreResult<bool>;

    /// Delete an object by id. Returns `true` if the object existed.
    fn delete(&self, id: &ObjectId) -> StoreResult<bool>;

    /// Ids of every stored object, sorted.
    fn enumerate(&self) -> StoreResult<Vec<ObjectId>>;

    /// Read an object that must exist.
    fn read_required(&self, id: &ObjectId) -> StoreResult<Vec<u8>> {
        self.read(id)?.ok_or(StoreError::NotFound(*id))
    }
}

/// Read-only view of a URL to [`ObjectId`] mapping.
pub trait ContentIndex: Send + Sync {
    /// Look up the object a URL points at.
    fn try_get(&self, url: &str) -> Option<ObjectId>;

    /// Full, stable copy of the mapping.
    fn snapshot(&self) -> BTreeMap<String, ObjectId>;
}
