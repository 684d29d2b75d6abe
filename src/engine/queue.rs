//! Input queue manager — deterministic multi-queue priority selection
//! (spec.md §4.1).
//!
//! Grounded in the priority-buffer drain pattern used by this ecosystem's
//! single-consumer event loops: wait for the first available event, then
//! drain everything else that is *already* ready without waiting again, sort
//! the batch by priority, and serve the batch head-first before touching the
//! channel again. Critically, items pulled out of the channel are buffered
//! locally rather than re-enqueued — re-enqueuing to the tail of a `mpsc`
//! channel is what caused the "ready events reinserted at the tail"
//! reordering bug spec §4.1 calls out.

use std::collections::VecDeque;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

use crate::engine::error::QueueError;
use crate::engine::runtime_event::QueueKind;

/// One FIFO lane. Bounded; `try_send` fails with [`QueueError::QueueFull`]
/// once the bound is reached (spec §3, §5 backpressure).
struct Lane<T> {
    kind: QueueKind,
    tx: mpsc::Sender<T>,
    rx: mpsc::Receiver<T>,
}

/// Owns one typed FIFO queue per [`QueueKind`] and selects the next event to
/// dispatch according to spec §4.1's two-phase algorithm.
///
/// Created inside the worker loop during bootstrap so the queues bind to
/// that loop (spec §3, "InputQueueSet lifetime").
pub struct InputQueueSet<T> {
    lanes: Vec<Lane<T>>,
    /// Items already pulled out of a channel but not yet served, kept in
    /// priority order across calls to [`next`](Self::next). Never
    /// re-enqueued to a channel tail.
    buffered: VecDeque<(usize, T)>,
}

impl<T> InputQueueSet<T> {
    /// Build a queue set over the given priority-ordered kinds (high → low),
    /// each with capacity `capacity`. Returns the set plus one sender per
    /// kind for cross-thread submission (spec §4.1, "Cross-thread
    /// submission").
    pub fn new(kinds: &[QueueKind], capacity: usize) -> (Self, Vec<(QueueKind, mpsc::Sender<T>)>) {
        let mut lanes = Vec::with_capacity(kinds.len());
        let mut senders = Vec::with_capacity(kinds.len());
        for &kind in kinds {
            let (tx, rx) = mpsc::channel(capacity.max(1));
            senders.push((kind, tx.clone()));
            lanes.push(Lane { kind, tx, rx });
        }
        (
            Self {
                lanes,
                buffered: VecDeque::new(),
            },
            senders,
        )
    }

    fn index_of(&self, kind: QueueKind) -> Option<usize> {
        self.lanes.iter().position(|l| l.kind == kind)
    }

    /// Non-blocking submission used by callers already running on the
    /// worker loop. Cross-thread callers go through the cloned `Sender`
    /// returned from [`new`](Self::new), which serializes onto the worker
    /// loop per spec §4.1.
    pub fn try_enqueue(&self, kind: QueueKind, item: T) -> Result<(), QueueError> {
        let idx = self.index_of(kind).expect("unregistered queue kind");
        self.lanes[idx]
            .tx
            .try_send(item)
            .map_err(|_| QueueError::QueueFull {
                queue: queue_name(kind),
            })
    }

    /// Two-phase, cancellation-safe selection (spec §4.1):
    /// 1. If any lane has buffered items, return the head of the
    ///    highest-priority non-empty lane.
    /// 2. Otherwise wait on all lanes with a first-completed primitive, and
    ///    once at least one yields, drain everything else immediately
    ///    available, buffer it all by priority, and serve from the buffer.
    ///
    /// `None` means every lane's senders have been dropped and the wait
    /// timed out with nothing pending — the caller should check its stop
    /// signal.
    pub async fn next(&mut self, wait_timeout: Duration) -> Option<T> {
        if let Some((_, item)) = self.buffered.pop_front() {
            return Some(item);
        }

        let first = self.wait_for_first(wait_timeout).await?;
        self.buffered.push_back(first);
        self.drain_ready();
        self.sort_buffered();
        self.buffered.pop_front().map(|(_, item)| item)
    }

    async fn wait_for_first(&mut self, wait_timeout: Duration) -> Option<(usize, T)> {
        // `select_all` races one `recv()` future per lane and resolves as
        // soon as any lane yields, without polling the others in a busy
        // loop. Dropping the unfinished futures on return is what makes the
        // overall `next()` cancellation-safe (spec §4.1): nothing is taken
        // out of a lane until one actually resolves.
        let futs = self
            .lanes
            .iter_mut()
            .enumerate()
            .map(|(priority_idx, lane)| Box::pin(async move { (priority_idx, lane.rx.recv().await) }));
        let fut = futures_util::future::select_all(futs);
        match timeout(wait_timeout, fut).await {
            Ok(((priority_idx, Some(item)), _, _)) => Some((priority_idx, item)),
            Ok((_, _, _)) => None,
            Err(_) => None,
        }
    }

    fn drain_ready(&mut self) {
        for (priority_idx, lane) in self.lanes.iter_mut().enumerate() {
            while let Ok(item) = lane.rx.try_recv() {
                self.buffered.push_back((priority_idx, item));
            }
        }
    }

    fn sort_buffered(&mut self) {
        // VecDeque doesn't have a direct stable sort; rebuild via a Vec to
        // keep FIFO-within-lane (stable sort) while ordering lanes by
        // priority index (spec §4.1: FIFO within queue, priority across).
        let mut items: Vec<_> = self.buffered.drain(..).collect();
        items.sort_by_key(|(priority_idx, _)| *priority_idx);
        self.buffered = items.into();
    }

    /// Senders for cross-thread submission, one per kind.
    pub fn sender(&self, kind: QueueKind) -> mpsc::Sender<T> {
        let idx = self.index_of(kind).expect("unregistered queue kind");
        self.lanes[idx].tx.clone()
    }
}

fn queue_name(kind: QueueKind) -> &'static str {
    match kind {
        QueueKind::UserMessage => "user_message",
        QueueKind::InterAgentMessage => "inter_agent_message",
        QueueKind::ToolInvocationRequest => "tool_invocation_request",
        QueueKind::ToolResult => "tool_result",
        QueueKind::ToolApproval => "tool_approval",
        QueueKind::InternalSystem => "internal_system",
    }
}
