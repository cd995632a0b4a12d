// SPDX-License-Identifier: MIT
// Copyright(c) 2024 Darek Stojaczyk

use std::sync::RwLock;

/// Convenience wrapper over RwLock<Vec<T>>
pub struct LockedVec<T> {
    inner: RwLock<Vec<T>>,
}

impl<T> Default for LockedVec<T> {
    fn default() -> Self {
        LockedVec::new()
    }
}

impl<T> LockedVec<T> {
    pub fn new() -> Self {
        LockedVec {
            inner: RwLock::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().unwrap().is_empty()
    }

    pub fn push(&self, value: T) {
        self.inner.write().unwrap().push(value);
    }

    pub fn retain(&self, f: impl FnMut(&T) -> bool) {
        self.inner.write().unwrap().retain(f);
    }

    pub fn cloned(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.inner.read().unwrap().clone()
    }

    pub fn find(&self, mut pred: impl FnMut(&T) -> bool) -> Option<T>
    where
        T: Clone,
    {
        self.inner.read().unwrap().iter().find(|t| pred(t)).cloned()
    }
}
