//! Opaque handles and the registries that own the objects behind them
//!
//! Every object the application can name is stored in a [`Registry`] keyed
//! by a slotmap key. Keys carry a generation, so a handle that outlives its
//! object (or belongs to another runtime) is rejected instead of aliasing a
//! newer object.

use slotmap::{Key, KeyData, SlotMap};

use crate::core::error::{XrError, XrResult};

slotmap::new_key_type! {
    /// Handle to a runtime instance
    pub struct InstanceHandle;
    /// Handle to a session
    pub struct SessionHandle;
    /// Handle to a proxy swapchain
    pub struct SwapchainHandle;
    /// Handle to a reference or action space
    pub struct SpaceHandle;
    /// Handle to an action set
    pub struct ActionSetHandle;
    /// Handle to an action
    pub struct ActionHandle;
}

/// Conversion between typed handles and the raw `u64` an FFI layer hands out
pub trait RawHandle: Key {
    /// Raw value of this handle
    fn to_raw(self) -> u64 {
        self.data().as_ffi()
    }

    /// Rebuild a handle from a raw value
    ///
    /// Any `u64` is accepted; unknown values simply fail registry lookups.
    fn from_raw(raw: u64) -> Self {
        KeyData::from_ffi(raw).into()
    }
}

impl<K: Key> RawHandle for K {}

/// Generation-checked object table
pub struct Registry<K: Key, V> {
    items: SlotMap<K, V>,
    kind: &'static str,
}

impl<K: Key, V> Registry<K, V> {
    /// Create an empty registry; `kind` names the object type in logs
    pub fn new(kind: &'static str) -> Self {
        Self { items: SlotMap::with_key(), kind }
    }

    /// Store an object and return its handle
    pub fn insert(&mut self, value: V) -> K {
        self.items.insert(value)
    }

    /// Store an object whose contents need its own handle
    pub fn insert_with_key(&mut self, f: impl FnOnce(K) -> V) -> K {
        self.items.insert_with_key(f)
    }

    /// Look up an object
    pub fn get(&self, key: K) -> XrResult<&V> {
        self.items.get(key).ok_or_else(|| self.invalid(key))
    }

    /// Look up an object mutably
    pub fn get_mut(&mut self, key: K) -> XrResult<&mut V> {
        let kind = self.kind;
        self.items.get_mut(key).ok_or_else(|| {
            log::warn!("Invalid {kind} handle {:#x}", key.to_raw());
            XrError::HandleInvalid
        })
    }

    /// Remove an object, returning it
    pub fn remove(&mut self, key: K) -> XrResult<V> {
        let kind = self.kind;
        self.items.remove(key).ok_or_else(|| {
            log::warn!("Invalid {kind} handle {:#x}", key.to_raw());
            XrError::HandleInvalid
        })
    }

    /// Whether `key` names a live object
    pub fn contains(&self, key: K) -> bool {
        self.items.contains_key(key)
    }

    /// Handles of all objects matching `pred`
    pub fn keys_where(&self, mut pred: impl FnMut(&V) -> bool) -> Vec<K> {
        self.items.iter().filter(|(_, v)| pred(v)).map(|(k, _)| k).collect()
    }

    /// Iterate over all live objects
    pub fn iter(&self) -> impl Iterator<Item = (K, &V)> {
        self.items.iter()
    }

    /// Number of live objects
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn invalid(&self, key: K) -> XrError {
        log::warn!("Invalid {} handle {:#x}", self.kind, key.to_raw());
        XrError::HandleInvalid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_round_trip_keeps_identity() {
        let mut registry: Registry<SessionHandle, &str> = Registry::new("session");
        let handle = registry.insert("a");
        let raw = handle.to_raw();
        assert_ne!(raw, 0);
        assert_eq!(*registry.get(SessionHandle::from_raw(raw)).unwrap(), "a");
    }

    #[test]
    fn test_stale_handle_is_rejected() {
        let mut registry: Registry<SwapchainHandle, u32> = Registry::new("swapchain");
        let first = registry.insert(1);
        registry.remove(first).unwrap();
        let second = registry.insert(2);

        assert_ne!(first, second);
        assert!(matches!(registry.get(first), Err(XrError::HandleInvalid)));
        assert!(matches!(registry.remove(first), Err(XrError::HandleInvalid)));
        assert_eq!(*registry.get(second).unwrap(), 2);
    }

    #[test]
    fn test_null_handle_is_invalid() {
        let registry: Registry<SpaceHandle, ()> = Registry::new("space");
        assert!(registry.get(SpaceHandle::null()).is_err());
        assert!(registry.get(SpaceHandle::from_raw(0xdead_beef)).is_err());
    }

    #[test]
    fn test_keys_where() {
        let mut registry: Registry<ActionHandle, u32> = Registry::new("action");
        registry.insert(1);
        let even = registry.insert(2);
        registry.insert(3);
        assert_eq!(registry.keys_where(|v| v % 2 == 0), vec![even]);
        assert_eq!(registry.len(), 3);
    }
}
