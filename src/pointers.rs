//! Advisory Locks
//!
//! Single-writer/multi-reader handles for user data that simulation callbacks
//! publish to peer PEs. The core never takes a lock; these exist only for
//! user-level state shared across the in-process transport.
//!

use crate::parking_lot::lock_api::{RwLockReadGuard, RwLockWriteGuard};
use crate::parking_lot::{RawRwLock, RwLock};
use std::sync::{Arc, Weak};

pub struct SharedValue<T> {
    ptr: Arc<RwLock<T>>,
}

pub struct SharedValueWeak<T> {
    ptr: Weak<RwLock<T>>,
}

impl<T> SharedValue<T> {
    pub fn new_value(obj: T) -> Self {
        Self {
            ptr: Arc::new(RwLock::new(obj)),
        }
    }

    #[inline(always)]
    pub fn read_recursive(&self) -> RwLockReadGuard<RawRwLock, T> {
        self.ptr.read_recursive()
    }

    #[inline(always)]
    pub fn write(&self) -> RwLockWriteGuard<RawRwLock, T> {
        self.ptr.write()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.ptr, &other.ptr)
    }

    pub fn downgrade(&self) -> SharedValueWeak<T> {
        SharedValueWeak {
            ptr: Arc::downgrade(&self.ptr),
        }
    }
}

impl<T> SharedValueWeak<T> {
    pub fn upgrade(&self) -> Option<SharedValue<T>> {
        self.ptr.upgrade().map(|ptr| SharedValue { ptr })
    }

    pub fn upgrade_force(&self) -> SharedValue<T> {
        SharedValue {
            ptr: self.ptr.upgrade().expect("upgrading a dropped shared value"),
        }
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Weak::ptr_eq(&self.ptr, &other.ptr)
    }
}

impl<T> Clone for SharedValue<T> {
    fn clone(&self) -> Self {
        Self {
            ptr: Arc::clone(&self.ptr),
        }
    }
}

impl<T> Clone for SharedValueWeak<T> {
    fn clone(&self) -> Self {
        Self { ptr: self.ptr.clone() }
    }
}

impl<T> PartialEq for SharedValue<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl<T> Eq for SharedValue<T> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pointers_shared_value_1() {
        // cargo test pointers_shared_value_1 -- --nocapture
        let value = SharedValue::new_value(vec![1u64, 2, 3]);
        let weak = value.downgrade();
        value.write().push(4);
        assert_eq!(weak.upgrade_force().read_recursive().len(), 4);
        let clone = value.clone();
        assert!(clone.ptr_eq(&value));
        drop(value);
        drop(clone);
        assert!(weak.upgrade().is_none());
    }
}
