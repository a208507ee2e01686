//! Dependency ordering of resolved bundles.

use crate::error::{BundleError, BundleResult};
use crate::resolved::ResolvedBundle;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// Order bundles so that each comes after all of its dependencies.
///
/// Depth-first with an explicit stack. Meeting a bundle that is still in
/// progress means the graph has a cycle through it.
pub fn topological_sort(bundles: &[ResolvedBundle]) -> BundleResult<Vec<usize>> {
    let mut marks = vec![Mark::Unvisited; bundles.len()];
    let mut order = Vec::with_capacity(bundles.len());

    for root in 0..bundles.len() {
        if marks[root] != Mark::Unvisited {
            continue;
        }
        // (bundle, index of the next dependency to visit)
        let mut stack = vec![(root, 0usize)];
        marks[root] = Mark::InProgress;

        while let Some(frame) = stack.last_mut() {
            let (node, next) = *frame;
            match bundles[node].dependencies.get(next) {
                Some(&dep) => {
                    frame.1 += 1;
                    match marks[dep] {
                        Mark::Done => {}
                        Mark::InProgress => {
                            return Err(BundleError::CyclicDependency(bundles[dep].name.clone()))
                        }
                        Mark::Unvisited => {
                            marks[dep] = Mark::InProgress;
                            stack.push((dep, 0));
                        }
                    }
                }
                None => {
                    marks[node] = Mark::Done;
                    order.push(node);
                    stack.pop();
                }
            }
        }
    }
    Ok(order)
}
