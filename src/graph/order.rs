// src/graph/order.rs

use std::collections::HashSet;
use std::sync::Arc;

use crate::errors::Result;
use crate::graph::build_graph::BuildNode;

/// Post-order walk over every root with one shared "seen" set.
///
/// A node for which `prune` returns `true` is neither yielded nor descended
/// into. Each node is visited (and `prune`d) at most once.
pub fn postorder<F>(roots: &[Arc<BuildNode>], mut prune: F) -> Result<Vec<Arc<BuildNode>>>
where
    F: FnMut(&BuildNode) -> Result<bool>,
{
    let mut seen: HashSet<*const BuildNode> = HashSet::new();
    let mut out = Vec::new();

    for root in roots {
        let mut stack: Vec<(Arc<BuildNode>, bool)> = vec![(Arc::clone(root), false)];

        while let Some((node, expanded)) = stack.pop() {
            if expanded {
                out.push(node);
                continue;
            }

            if !seen.insert(Arc::as_ptr(&node)) {
                continue;
            }
            if prune(node.as_ref())? {
                continue;
            }

            let children: Vec<Arc<BuildNode>> = node
                .dependencies()
                .iter()
                .rev()
                .map(|d| Arc::clone(&d.node))
                .collect();
            stack.push((node, true));
            for child in children {
                stack.push((child, false));
            }
        }
    }

    Ok(out)
}
