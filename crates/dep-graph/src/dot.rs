//! Graphviz rendering of the graph's current state (spec §4.A "DOT
//! rendering"), used for debugging Recreate/Pending chains by hand.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::graph::Graph;
use crate::node::NodeState;

impl Graph {
    /// Render the graph as a `digraph`: nodes grouped by cluster subgraph,
    /// colored by state, with unsatisfied edges in red and
    /// referenced-but-missing targets drawn as dashed grey placeholders.
    pub fn render_dot(&self) -> String {
        let mut by_cluster: BTreeMap<Vec<String>, Vec<(&str, NodeState)>> = BTreeMap::new();
        for node in self.sorted_nodes() {
            by_cluster
                .entry(node.cluster_path.to_vec())
                .or_default()
                .push((node.name, node.state));
        }

        let mut out = String::new();
        out.push_str("digraph nim {\n  rankdir=LR;\n");

        for (path, nodes) in &by_cluster {
            if path.is_empty() {
                for (name, state) in nodes {
                    writeln!(out, "  {};", node_stmt(name, *state)).ok();
                }
            } else {
                writeln!(out, "  subgraph \"cluster_{}\" {{", path.join("/")).ok();
                writeln!(out, "    label=\"{}\";", path.join("/")).ok();
                for (name, state) in nodes {
                    writeln!(out, "    {};", node_stmt(name, *state)).ok();
                }
                out.push_str("  }\n");
            }
        }

        let mut missing: BTreeMap<String, ()> = BTreeMap::new();
        for node in self.sorted_nodes() {
            for (to_name, satisfied) in self.outgoing_targets(node.name) {
                if self.get_node(&to_name).is_none() {
                    missing.insert(to_name.clone(), ());
                }
                let color = if satisfied { "black" } else { "red" };
                writeln!(out, "  \"{}\" -> \"{}\" [color={}];", node.name, to_name, color).ok();
            }
        }
        for name in missing.keys() {
            writeln!(out, "  \"{name}\" [style=dashed, color=grey];").ok();
        }

        out.push_str("}\n");
        out
    }
}

fn node_stmt(name: &str, state: NodeState) -> String {
    let color = match state {
        NodeState::Created => "black",
        NodeState::Failure => "red",
        _ => "grey",
    };
    format!("\"{name}\" [color={color}]")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configurator::Configurator;
    use crate::item::ItemValue;
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq)]
    struct V;

    struct Noop;
    impl Configurator for Noop {
        fn create(&self, _n: &str, _v: &dyn ItemValue) -> crate::configurator::ConfiguratorResult<()> {
            Ok(())
        }
        fn modify(&self, _n: &str, _o: &dyn ItemValue, _v: &dyn ItemValue) -> crate::configurator::ConfiguratorResult<()> {
            Ok(())
        }
        fn delete(&self, _n: &str, _v: &dyn ItemValue) -> crate::configurator::ConfiguratorResult<()> {
            Ok(())
        }
    }

    #[test]
    fn render_contains_node_and_cluster_labels() {
        let mut g = Graph::new();
        g.register_configurator("t", Arc::new(Noop));
        g.put_item_in_cluster("bn1", "t", false, vec!["ni-1".into()], V);
        g.sync();
        let dot = g.render_dot();
        assert!(dot.starts_with("digraph nim"));
        assert!(dot.contains("cluster_ni-1"));
        assert!(dot.contains("\"bn1\""));
    }
}
