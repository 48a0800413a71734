//! # Donation Graph
//!
//! Effective priority is a property of the donation graph, not of any one
//! node: a queue is worth the best of its waiters, a thread is worth the
//! best of its base priority and the queues it holds. Both values are
//! cached and recomputed lazily.
//!
//! ## Invalidation
//!
//! ```text
//!   thread ──waits on──► queue ──held by──► thread ──waits on──► queue ...
//!        change flows this way, marking every node it reaches dirty
//! ```
//!
//! A mutation marks the node it touched dirty and walks the "is depended on
//! by" edges (thread → queues it waits on, queue → its holder) with an
//! explicit worklist. The walk stops at nodes that are already dirty and at
//! queues that do not transfer priority.
//!
//! This relies on one invariant: **every dependent of a dirty node is dirty**.
//! Recomputation clears a node only after all of its inputs are clean, and
//! every edge insertion explicitly invalidates the node gaining the input, so
//! the invariant survives both.
//!
//! ## Recomputation
//!
//! Reads recompute dirty nodes on demand, depth-first down the same edges.
//! A burst of mutations followed by one read costs one walk. Recursion
//! depth is bounded by the arena sizes as long as the graph is acyclic;
//! a cycle is a deadlock between the threads involved and is not detected.

use critical_section::CriticalSection;
use heapless::Vec;
use log::trace;

use crate::config::{Priority, MAX_QUEUES, MAX_THREADS, PRIORITY_MIN};
use crate::queue::QueueId;
use crate::scheduler::Scheduler;
use crate::thread::ThreadId;

/// A node of the donation graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphNode {
    Thread(ThreadId),
    Queue(QueueId),
}

/// Nodes are marked before they are pushed, so each one enters the
/// worklist at most once per walk.
const WORKLIST_LEN: usize = MAX_THREADS + MAX_QUEUES;

impl Scheduler {
    /// Mark `start` stale along with everything whose effective priority
    /// depends on it.
    pub fn invalidate(&mut self, _cs: CriticalSection<'_>, start: GraphNode) {
        let mut work: Vec<GraphNode, WORKLIST_LEN> = Vec::new();
        if self.mark_dirty(start) {
            push(&mut work, start);
        }

        while let Some(node) = work.pop() {
            match node {
                GraphNode::Thread(thread) => {
                    let waiting_on = self.state_mut(thread).waiting_on();
                    for queue in waiting_on {
                        if self.mark_dirty(GraphNode::Queue(queue)) {
                            push(&mut work, GraphNode::Queue(queue));
                        }
                    }
                }
                GraphNode::Queue(queue) => {
                    if let Some(holder) = self.queue(queue).holder() {
                        if self.mark_dirty(GraphNode::Thread(holder)) {
                            push(&mut work, GraphNode::Thread(holder));
                        }
                    }
                }
            }
        }
    }

    /// Returns `true` if `node` was clean and is now dirty.
    fn mark_dirty(&mut self, node: GraphNode) -> bool {
        match node {
            GraphNode::Thread(thread) => self.state_mut(thread).mark_dirty(),
            GraphNode::Queue(queue) => self.queue_mut(queue).mark_dirty(),
        }
    }

    /// Effective priority of a thread, recomputed if stale.
    pub(crate) fn thread_effective(&mut self, thread: ThreadId) -> Priority {
        let state = self.state_mut(thread);
        if let Some(cached) = state.cached() {
            return cached;
        }

        let mut effective = state.priority();
        let held = state.held();
        for queue in held {
            effective = effective.max(self.queue_effective(queue));
        }

        self.state_mut(thread).store(effective);
        trace!("{} effective priority = {}", thread, effective);
        effective
    }

    /// Effective priority a queue donates, recomputed if stale.
    pub(crate) fn queue_effective(&mut self, queue: QueueId) -> Priority {
        let q = self.queue(queue);
        if !q.transfers_priority() {
            return PRIORITY_MIN;
        }
        if let Some(cached) = q.cached() {
            return cached;
        }

        let mut effective = PRIORITY_MIN;
        let count = q.waiters().len();
        for i in 0..count {
            let waiter = self.queue(queue).waiters()[i];
            effective = effective.max(self.thread_effective(waiter));
        }

        self.queue_mut(queue).store(effective);
        trace!("{} donates {}", queue, effective);
        effective
    }
}

fn push(work: &mut Vec<GraphNode, WORKLIST_LEN>, node: GraphNode) {
    let pushed = work.push(node);
    debug_assert!(pushed.is_ok(), "donation worklist overflow");
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
