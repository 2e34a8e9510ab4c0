//! Node bookkeeping (spec §3 "Node").

use crate::item::ItemValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Unknown,
    Created,
    Pending,
    Modifying,
    Recreating,
    Deleting,
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LastOp {
    None,
    Create,
    Modify,
    Delete,
    Recreate,
}

pub struct Node {
    pub name: String,
    pub item_type: String,
    pub external: bool,
    pub cluster_path: Vec<String>,
    pub state: NodeState,
    pub last_op: LastOp,
    pub last_error: Option<String>,
    pub value: Option<Box<dyn ItemValue>>,
    /// Value a Sync pass has staged for this node but not yet committed to
    /// `value` -- set pre-order, consumed post-order once Modify/Create
    /// succeeds (spec §3 "Node").
    pub staged_value: Option<Box<dyn ItemValue>>,
}

impl Node {
    pub fn new(name: impl Into<String>, item_type: impl Into<String>, external: bool) -> Self {
        Self {
            name: name.into(),
            item_type: item_type.into(),
            external,
            cluster_path: Vec::new(),
            state: NodeState::Unknown,
            last_op: LastOp::None,
            last_error: None,
            value: None,
            staged_value: None,
        }
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("item_type", &self.item_type)
            .field("external", &self.external)
            .field("state", &self.state)
            .field("last_op", &self.last_op)
            .field("last_error", &self.last_error)
            .finish()
    }
}
