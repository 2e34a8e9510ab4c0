//! Type-erased item values.
//!
//! An `Item`'s payload can be any type the engine has never heard of --
//! `Link`, `Address`, `Route`, `Bridge`, an iptables rule, a DHCP config
//! file. The engine only needs `Equal` and downcasting, so values are
//! stored behind `Box<dyn ItemValue>` rather than a concrete enum, keeping
//! the graph generic over every Configurator that registers with it.

use std::any::Any;
use std::fmt::Debug;

/// Capability set every item payload must provide (spec §3 "Item").
pub trait ItemValue: Any + Debug + Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn equals(&self, other: &dyn ItemValue) -> bool;
    fn clone_box(&self) -> Box<dyn ItemValue>;
}

impl<T> ItemValue for T
where
    T: Any + Debug + Send + Sync + Clone + PartialEq,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn equals(&self, other: &dyn ItemValue) -> bool {
        match other.as_any().downcast_ref::<T>() {
            Some(o) => self == o,
            None => false,
        }
    }

    fn clone_box(&self) -> Box<dyn ItemValue> {
        Box::new(self.clone())
    }
}

impl Clone for Box<dyn ItemValue> {
    fn clone(&self) -> Self {
        self.as_ref().clone_box()
    }
}

/// A predicate evaluated against a dependency target's current value
/// (spec §3 `Dependency.MustSatisfy`).
pub type MustSatisfy = Box<dyn Fn(&dyn ItemValue) -> bool + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Point(i32, i32);

    #[test]
    fn equal_values_of_same_type_are_equal() {
        let a: Box<dyn ItemValue> = Box::new(Point(1, 2));
        let b: Box<dyn ItemValue> = Box::new(Point(1, 2));
        let c: Box<dyn ItemValue> = Box::new(Point(1, 3));
        assert!(a.equals(b.as_ref()));
        assert!(!a.equals(c.as_ref()));
    }

    #[test]
    fn values_of_different_types_are_never_equal() {
        let a: Box<dyn ItemValue> = Box::new(Point(1, 2));
        let b: Box<dyn ItemValue> = Box::new(7i32);
        assert!(!a.equals(b.as_ref()));
    }
}
