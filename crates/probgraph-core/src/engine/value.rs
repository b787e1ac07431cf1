//! # Node Values
//!
//! Node identities, typed handles and the type-erased value slot.
//!
//! ## Key Components
//!
//! - **NodeId**: stable `u32` identity of a node inside a [`ModelGraph`](crate::engine::graph::ModelGraph)
//! - **Value**: capability set every node value must satisfy (clone, compare, debug-format)
//! - **Handle**: typed, copyable reference to a node whose value has type `T`
//! - **DynValue**: object-safe view used by the graph to store heterogeneous values

use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use crate::engine::errors::ModelError;

/// Unique identifier for a node in a model graph.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NodeId(pub u32);

impl NodeId {
    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Capability set of node values.
///
/// Implemented for every `'static` type that can be cloned, compared for
/// equality and formatted for diagnostics.
pub trait Value: Any + Clone + PartialEq + fmt::Debug {}

impl<T> Value for T where T: Any + Clone + PartialEq + fmt::Debug {}

/// Object-safe form of [`Value`], stored in node slots.
pub(crate) trait DynValue: fmt::Debug {
    fn as_any(&self) -> &dyn Any;
    fn clone_box(&self) -> Box<dyn DynValue>;
    fn eq_dyn(&self, other: &dyn DynValue) -> bool;
    fn value_type(&self) -> TypeId;
    fn type_name(&self) -> &'static str;
}

impl<T: Value> DynValue for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn clone_box(&self) -> Box<dyn DynValue> {
        Box::new(self.clone())
    }

    fn eq_dyn(&self, other: &dyn DynValue) -> bool {
        other.as_any().downcast_ref::<T>() == Some(self)
    }

    fn value_type(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

impl Clone for Box<dyn DynValue> {
    fn clone(&self) -> Self {
        (**self).clone_box()
    }
}

/// Downcasts a stored value, reporting the node on failure.
pub(crate) fn downcast<T: Value>(value: &dyn DynValue, node: NodeId) -> Result<&T, ModelError> {
    value.as_any().downcast_ref::<T>().ok_or_else(|| {
        ModelError::TypeMismatch(format!(
            "node {} holds {}, requested {}",
            node,
            value.type_name(),
            std::any::type_name::<T>()
        ))
    })
}

/// Typed reference to a node whose value has type `T`.
///
/// Handles are plain ids: they do not keep the node alive and every access
/// through the graph re-checks the value type.
pub struct Handle<T> {
    id: NodeId,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    /// Wraps an untyped id. The type is verified on each access.
    pub fn from_id(id: NodeId) -> Self {
        Self {
            id,
            _marker: PhantomData,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Rewrites the referenced id, used when collaborators swap or remap parameters.
    pub fn remap(&mut self, remap: &mut dyn FnMut(NodeId) -> NodeId) {
        self.id = remap(self.id);
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle<{}>({})", std::any::type_name::<T>(), self.id)
    }
}

impl<T> From<Handle<T>> for NodeId {
    fn from(handle: Handle<T>) -> Self {
        handle.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dyn_values_compare_by_type_and_content() {
        let a: Box<dyn DynValue> = Box::new(1.5_f64);
        let b: Box<dyn DynValue> = Box::new(1.5_f64);
        let c: Box<dyn DynValue> = Box::new(vec![1.5_f64]);
        assert!(a.eq_dyn(b.as_ref()));
        assert!(!a.eq_dyn(c.as_ref()));
        assert_eq!(a.value_type(), TypeId::of::<f64>());
    }

    #[test]
    fn downcast_reports_requested_type() {
        let v: Box<dyn DynValue> = Box::new(3_i64);
        assert_eq!(*downcast::<i64>(v.as_ref(), NodeId(0)).expect("i64"), 3);
        let err = downcast::<f64>(v.as_ref(), NodeId(4)).unwrap_err();
        assert!(matches!(err, ModelError::TypeMismatch(msg) if msg.contains("#4")));
    }

    #[test]
    fn handle_remap_rewrites_id() {
        let mut h: Handle<f64> = Handle::from_id(NodeId(2));
        h.remap(&mut |id| if id == NodeId(2) { NodeId(9) } else { id });
        assert_eq!(h.id(), NodeId(9));
        assert_eq!(NodeId::from(h), NodeId(9));
    }
}
