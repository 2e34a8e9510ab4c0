//! Dependency kinds (spec §3).

use crate::item::{ItemValue, MustSatisfy};

/// Currently the only dependency kind; the enum leaves room for future
/// variants without disturbing callers that match on it today (spec §9).
pub enum Dependency {
    ItemIsCreated {
        target: String,
        must_satisfy: Option<MustSatisfy>,
        recreate_when_modified: bool,
    },
}

impl Dependency {
    pub fn on(target: impl Into<String>) -> Self {
        Dependency::ItemIsCreated {
            target: target.into(),
            must_satisfy: None,
            recreate_when_modified: false,
        }
    }

    pub fn with_must_satisfy(mut self, pred: MustSatisfy) -> Self {
        match &mut self {
            Dependency::ItemIsCreated { must_satisfy, .. } => *must_satisfy = Some(pred),
        }
        self
    }

    pub fn recreate_when_modified(mut self) -> Self {
        match &mut self {
            Dependency::ItemIsCreated {
                recreate_when_modified,
                ..
            } => *recreate_when_modified = true,
        }
        self
    }

    pub fn target(&self) -> &str {
        match self {
            Dependency::ItemIsCreated { target, .. } => target,
        }
    }

    pub fn recreates_on_modify(&self) -> bool {
        match self {
            Dependency::ItemIsCreated {
                recreate_when_modified,
                ..
            } => *recreate_when_modified,
        }
    }

    pub fn has_must_satisfy(&self) -> bool {
        match self {
            Dependency::ItemIsCreated { must_satisfy, .. } => must_satisfy.is_some(),
        }
    }

    /// Whether this dependency holds against `target_value`, given that the
    /// target is currently `Created`. Callers must check the target's state
    /// separately -- a dependency on a non-`Created` node is never satisfied.
    pub fn must_satisfy_holds(&self, target_value: &dyn ItemValue) -> bool {
        match self {
            Dependency::ItemIsCreated { must_satisfy, .. } => must_satisfy
                .as_ref()
                .map(|pred| pred(target_value))
                .unwrap_or(true),
        }
    }
}

impl std::fmt::Debug for Dependency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dependency::ItemIsCreated {
                target,
                must_satisfy,
                recreate_when_modified,
            } => f
                .debug_struct("ItemIsCreated")
                .field("target", target)
                .field("must_satisfy", &must_satisfy.is_some())
                .field("recreate_when_modified", recreate_when_modified)
                .finish(),
        }
    }
}
