//! Ownership of referenced entities.
//!
//! A container that holds a reference to an entity it did not allocate itself
//! (a row's material, a factor's treatment, an observation's variable) records
//! how it holds it. Only the two owned modes keep the referent alive, so
//! dropping a container that merely shadows an entity never releases it.

use std::fmt;
use std::sync::{Arc, Weak};

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum OwnershipMode {
    OwnedDeepCopy,
    OwnedShallow,
    BorrowedShadow,
    AlreadyReleased,
}

impl OwnershipMode {
    pub fn is_owned(&self) -> bool {
        matches!(self, Self::OwnedDeepCopy | Self::OwnedShallow)
    }
}

pub enum Link<T> {
    DeepCopy(Arc<T>),
    Shallow(Arc<T>),
    Shadow(Weak<T>),
    Released,
}

impl<T> Link<T> {
    /// Takes sole ownership of a freshly allocated value.
    pub fn owned(value: T) -> Self {
        Self::DeepCopy(Arc::new(value))
    }
    pub fn shallow(value: &Arc<T>) -> Self {
        Self::Shallow(Arc::clone(value))
    }
    pub fn shadow(value: &Arc<T>) -> Self {
        Self::Shadow(Arc::downgrade(value))
    }
    pub fn mode(&self) -> OwnershipMode {
        match self {
            Self::DeepCopy(_) => OwnershipMode::OwnedDeepCopy,
            Self::Shallow(_) => OwnershipMode::OwnedShallow,
            Self::Shadow(_) => OwnershipMode::BorrowedShadow,
            Self::Released => OwnershipMode::AlreadyReleased,
        }
    }
    pub fn resolve(&self) -> Option<Arc<T>> {
        match self {
            Self::DeepCopy(value) | Self::Shallow(value) => Some(Arc::clone(value)),
            Self::Shadow(weak) => weak.upgrade(),
            Self::Released => None,
        }
    }
    /// Gives up the referent, releasing it if it was owned.
    pub fn release(&mut self) {
        *self = Self::Released;
    }
}

impl<T: Clone> Link<T> {
    pub fn deep_copy(value: &T) -> Self {
        Self::DeepCopy(Arc::new(value.clone()))
    }
}

impl<T> Clone for Link<T> {
    // Cloning an owned deep copy would share it, so the clone holds a shallow share.
    fn clone(&self) -> Self {
        match self {
            Self::DeepCopy(value) | Self::Shallow(value) => Self::Shallow(Arc::clone(value)),
            Self::Shadow(weak) => Self::Shadow(Weak::clone(weak)),
            Self::Released => Self::Released,
        }
    }
}

impl<T> fmt::Debug for Link<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Link({:?})", self.mode())
    }
}
