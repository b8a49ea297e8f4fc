// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! An iterative, three-colour depth-first walk producing a post-order.

use std::collections::HashMap;
use std::hash::Hash;

/// Why a walk stopped early.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalkError<T> {
    /// The walk reached a node that is still on the current path.
    Cycle(T),
    /// The neighbour function does not know the node.
    Missing(T),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
}

struct Frame<T> {
    node: T,
    children: Vec<T>,
    next: usize,
}

/// Walks the graph depth-first from each root and returns every reachable
/// node in post-order: a node is emitted only after all of its children.
///
/// Children are visited in the order `children_of` yields them and a node
/// reached twice is emitted once, at its first completion, so the result is
/// deterministic for a given input. The walk uses an explicit stack and
/// therefore cannot overflow on deep chains.
///
/// # Arguments
///
/// * `roots`: the nodes to start from, in order.
/// * `children_of`: returns the direct children of a node, or `None` if the
///   node is unknown.
///
/// # Errors
///
/// * [`WalkError::Cycle`] when a child is still in progress on the current path.
/// * [`WalkError::Missing`] when `children_of` returns `None`.
pub fn depth_first_post_order<T, F, I>(
    roots: impl IntoIterator<Item = T>,
    mut children_of: F,
) -> Result<Vec<T>, WalkError<T>>
where
    T: Clone + Eq + Hash,
    F: FnMut(&T) -> Option<I>,
    I: IntoIterator<Item = T>,
{
    let mut marks: HashMap<T, Mark> = HashMap::new();
    let mut order = Vec::new();
    let mut stack: Vec<Frame<T>> = Vec::new();

    let mut enter = |node: T,
                     marks: &mut HashMap<T, Mark>,
                     stack: &mut Vec<Frame<T>>|
     -> Result<(), WalkError<T>> {
        let children = children_of(&node)
            .ok_or_else(|| WalkError::Missing(node.clone()))?
            .into_iter()
            .collect();
        marks.insert(node.clone(), Mark::InProgress);
        stack.push(Frame {
            node,
            children,
            next: 0,
        });
        Ok(())
    };

    for root in roots {
        if marks.contains_key(&root) {
            continue;
        }
        enter(root, &mut marks, &mut stack)?;

        while let Some(frame) = stack.last_mut() {
            if let Some(child) = frame.children.get(frame.next).cloned() {
                frame.next += 1;
                match marks.get(&child) {
                    Some(Mark::Done) => {}
                    Some(Mark::InProgress) => return Err(WalkError::Cycle(child)),
                    None => enter(child, &mut marks, &mut stack)?,
                }
            } else if let Some(finished) = stack.pop() {
                marks.insert(finished.node.clone(), Mark::Done);
                order.push(finished.node);
            }
        }
    }

    Ok(order)
}
