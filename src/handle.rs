// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Reference-counted handle used to carry operations through the engine.
//!
//! `Operation`s are simultaneously indexed by the engine, referenced by
//! submitters, and briefly held by the executing worker (spec §9,
//! "Intrusive reference counting"). `Arc` already gives us exactly the
//! strong-count semantics spec §4.1 asks for — last holder drops the
//! target, copy increments, drop decrements exactly once — so `Handle<T>`
//! is a thin newtype rather than a hand-rolled atomic counter.

use std::{
    ops::Deref,
    sync::Arc,
};

/// A thread-safe, reference-counted owning reference to a `T`.
///
/// `Handle` is always non-null; the nullable case from the spec (a handle
/// that holds nothing) is expressed as `Option<Handle<T>>`, which is how
/// idiomatic Rust spells an optional owning reference.
#[derive(Debug)]
pub struct Handle<T>(Arc<T>);

impl<T> Handle<T> {
    pub fn new(value: T) -> Self { Self(Arc::new(value)) }

    /// Number of outstanding strong references, including this one.
    #[must_use]
    pub fn strong_count(this: &Self) -> usize { Arc::strong_count(&this.0) }

    /// Pointer identity, usable as a stable key for index maps. Two handles
    /// compare equal under this iff they share the same allocation.
    #[must_use]
    pub fn as_ptr(this: &Self) -> *const T { Arc::as_ptr(&this.0) }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self { Self(Arc::clone(&self.0)) }
}

impl<T> Deref for Handle<T> {
    type Target = T;

    fn deref(&self) -> &T { &self.0 }
}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool { Arc::ptr_eq(&self.0, &other.0) }
}

impl<T> Eq for Handle<T> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_increments_and_drop_decrements() {
        let h = Handle::new(42);
        assert_eq!(Handle::strong_count(&h), 1);
        let h2 = h.clone();
        assert_eq!(Handle::strong_count(&h), 2);
        drop(h2);
        assert_eq!(Handle::strong_count(&h), 1);
    }

    #[test]
    fn equality_is_pointer_identity() {
        let h1 = Handle::new(1);
        let h2 = Handle::new(1);
        let h3 = h1.clone();
        assert_ne!(h1, h2);
        assert_eq!(h1, h3);
    }

    #[test]
    fn deref_reaches_target() {
        let h = Handle::new(String::from("hi"));
        assert_eq!(h.len(), 2);
    }
}
