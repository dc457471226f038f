//! Reply-tree analysis: thread order and depth.
//!
//! The reply graph of a thread is rebuilt after every append. An edge from
//! parent to child is only inserted when it keeps the graph acyclic, so
//! self-replies and reply loops degrade to flat entries instead of
//! aborting ingestion. Traversal starts from the thread's starting email
//! and assigns a global pre-order counter (`thread_order`) and the stack
//! depth (`thread_depth`).

use chrono::NaiveDateTime;

/// One email of a thread, in insertion order.
#[derive(Debug, Clone)]
pub struct ThreadNode {
    pub message_id: String,
    pub in_reply_to: Option<String>,
    pub date: NaiveDateTime,
}

/// Computed position of one email inside its thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadPosition {
    pub message_id: String,
    pub thread_order: i32,
    pub thread_depth: i32,
}

/// Pick the starting email: the first one without a reply reference, or the
/// oldest one when the thread was assembled from partial history. The reply
/// link takes precedence over date order, so a reply dated earlier than its
/// parent does not become the starting email.
fn starting_index(nodes: &[ThreadNode]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (idx, node) in nodes.iter().enumerate() {
        if node.in_reply_to.is_some() {
            continue;
        }
        match best {
            Some(current) if nodes[current].date <= node.date => {}
            _ => best = Some(idx),
        }
    }
    if best.is_some() {
        return best;
    }
    nodes
        .iter()
        .enumerate()
        .min_by_key(|(_, node)| node.date)
        .map(|(idx, _)| idx)
}

/// Walking up the ancestry from `parent`, would linking `child` under it
/// close a loop?
fn creates_cycle(parents: &[Option<usize>], child: usize, parent: usize) -> bool {
    let mut current = Some(parent);
    let mut hops = 0;
    while let Some(node) = current {
        if node == child {
            return true;
        }
        hops += 1;
        if hops > parents.len() {
            return true;
        }
        current = parents[node];
    }
    false
}

/// Compute `thread_order` and `thread_depth` for every email of a thread.
///
/// `nodes` must be in original insertion order; children are visited in
/// that order. Emails whose parent is absent from the thread are traversed
/// as extra roots after the starting email so every email receives a
/// position.
pub fn compute_order_and_depth(nodes: &[ThreadNode]) -> Vec<ThreadPosition> {
    if nodes.is_empty() {
        return Vec::new();
    }

    let index_of = |message_id: &str| nodes.iter().position(|n| n.message_id == message_id);

    let mut parents: Vec<Option<usize>> = vec![None; nodes.len()];
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];

    for (idx, node) in nodes.iter().enumerate() {
        let Some(ref reference) = node.in_reply_to else {
            continue;
        };
        if reference == &node.message_id {
            // No self-reply.
            continue;
        }
        let Some(parent) = index_of(reference) else {
            continue;
        };
        if creates_cycle(&parents, idx, parent) {
            continue;
        }
        parents[idx] = Some(parent);
        children[parent].push(idx);
    }

    let start = starting_index(nodes).unwrap_or(0);

    let mut order = vec![-1i32; nodes.len()];
    let mut depth = vec![0i32; nodes.len()];
    let mut counter = 0i32;

    fn visit(
        node: usize,
        level: i32,
        counter: &mut i32,
        order: &mut [i32],
        depth: &mut [i32],
        children: &[Vec<usize>],
    ) {
        if order[node] >= 0 {
            return;
        }
        order[node] = *counter;
        depth[node] = level;
        *counter += 1;
        for &child in &children[node] {
            visit(child, level + 1, counter, order, depth, children);
        }
    }

    visit(start, 0, &mut counter, &mut order, &mut depth, &children);

    // Emails left unvisited hang from a parent outside the thread; walk
    // them as additional roots in insertion order.
    for idx in 0..nodes.len() {
        if order[idx] < 0 && parents[idx].is_none() {
            visit(idx, 0, &mut counter, &mut order, &mut depth, &children);
        }
    }

    nodes
        .iter()
        .enumerate()
        .map(|(idx, node)| ThreadPosition {
            message_id: node.message_id.clone(),
            thread_order: order[idx].max(0),
            thread_depth: depth[idx],
        })
        .collect()
}
