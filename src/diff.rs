// prolly-seq/src/diff.rs

//! Streaming structural diff between two versions of the same ordered
//! sequence kind.
//!
//! Two sub-algorithms compose. Left-right walks both sequences with leaf
//! cursors and a fast-forward that skips whole equal subtrees by comparing
//! parent frames, so it starts emitting almost immediately. Top-down
//! computes a splice plan over the meta tuples and recurses on the changed
//! ranges in parallel, which is slower to first event but faster overall.
//! The "best" entry point runs both and forwards left-right events until
//! top-down has demonstrably caught up, then switches.

use std::sync::Arc;

use async_recursion::async_recursion;
use log::debug;
use tokio::sync::{mpsc, watch};

use crate::error::{ProllyError, Result};
use crate::node::CollectionKind;
use crate::sequence::{Sequence, SequenceCursor};
use crate::splice::{calc_splices, Splice, DEFAULT_MAX_SPLICE_MATRIX_SIZE};
use crate::store::ChunkStore;
use crate::value::{load_value_repr, Value};

/// Depth of the internal result channels.
const DIFF_CHANNEL_DEPTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    Added,
    Removed,
    Modified,
}

/// A single difference between two map versions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueChanged {
    pub change_type: ChangeType,
    pub key: Value,
    /// Value in `last`; `None` for additions.
    pub old_value: Option<Value>,
    /// Value in `current`; `None` for removals.
    pub new_value: Option<Value>,
}

impl ValueChanged {
    fn added(key: Value, new_value: Value) -> Self {
        ValueChanged {
            change_type: ChangeType::Added,
            key,
            old_value: None,
            new_value: Some(new_value),
        }
    }

    fn removed(key: Value, old_value: Value) -> Self {
        ValueChanged {
            change_type: ChangeType::Removed,
            key,
            old_value: Some(old_value),
            new_value: None,
        }
    }

    fn modified(key: Value, old_value: Value, new_value: Value) -> Self {
        ValueChanged {
            change_type: ChangeType::Modified,
            key,
            old_value: Some(old_value),
            new_value: Some(new_value),
        }
    }
}

/// Decides when the best-strategy multiplexer abandons left-right for
/// top-down. Counts are events received from each strategy so far.
pub trait CutoverPolicy: Send + Sync {
    fn should_cut_over(&self, left_right_count: usize, top_down_count: usize) -> bool;
}

/// The original heuristic: switch as soon as top-down has produced strictly
/// more events than left-right.
pub struct RaceToMajority;

impl CutoverPolicy for RaceToMajority {
    fn should_cut_over(&self, left_right_count: usize, top_down_count: usize) -> bool {
        top_down_count > left_right_count
    }
}

/// Resolves when the stop signal is observed. A dropped sender without a
/// signal never cancels.
async fn wait_for_stop(stop: &mut watch::Receiver<bool>) {
    loop {
        if *stop.borrow() {
            return;
        }
        if stop.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Sends one change unless the stop signal fires first. Returns `false`
/// when the diff should wind down (stopped, or the consumer went away).
async fn send_change(
    changes: &mpsc::Sender<ValueChanged>,
    stop: &watch::Receiver<bool>,
    change: ValueChanged,
) -> bool {
    if *stop.borrow() {
        return false;
    }
    let mut stop = stop.clone();
    tokio::select! {
        res = changes.send(change) => res.is_ok(),
        _ = wait_for_stop(&mut stop) => false,
    }
}

async fn send_splice(
    changes: &mpsc::Sender<Splice>,
    stop: &watch::Receiver<bool>,
    splice: Splice,
) -> bool {
    if *stop.borrow() {
        return false;
    }
    let mut stop = stop.clone();
    tokio::select! {
        res = changes.send(splice) => res.is_ok(),
        _ = wait_for_stop(&mut stop) => false,
    }
}

fn ensure_kind<S: ChunkStore>(
    last: &Sequence<S>,
    current: &Sequence<S>,
    kind: CollectionKind,
) -> Result<()> {
    if last.kind() != kind || current.kind() != kind {
        return Err(ProllyError::TypeMismatch(format!(
            "diff requires two {kind:?} sequences, got {:?} and {:?}",
            last.kind(),
            current.kind()
        )));
    }
    Ok(())
}

// --- map diff: best strategy ------------------------------------------------

/// Streams the diff from `last` to `current` into `changes` using both
/// strategies in parallel with the default cutover. Returns `Ok(true)` when
/// the full diff was delivered, `Ok(false)` when stopped.
pub async fn diff_maps<S: ChunkStore>(
    last: &Sequence<S>,
    current: &Sequence<S>,
    changes: mpsc::Sender<ValueChanged>,
    stop: watch::Receiver<bool>,
) -> Result<bool> {
    diff_maps_with_policy(last, current, changes, stop, &RaceToMajority).await
}

enum BestOutcome {
    Stopped,
    LeftRightDone,
    TopDownDone,
}

pub async fn diff_maps_with_policy<S: ChunkStore>(
    last: &Sequence<S>,
    current: &Sequence<S>,
    changes: mpsc::Sender<ValueChanged>,
    stop: watch::Receiver<bool>,
    policy: &dyn CutoverPolicy,
) -> Result<bool> {
    ensure_kind(last, current, CollectionKind::Map)?;
    if last.hash().is_some() && last.hash() == current.hash() {
        return Ok(true);
    }

    let (lr_tx, mut lr_rx) = mpsc::channel(DIFF_CHANNEL_DEPTH);
    let (td_tx, mut td_rx) = mpsc::channel(DIFF_CHANNEL_DEPTH);
    let (lr_stop_tx, lr_stop_rx) = watch::channel(false);
    let (td_stop_tx, td_stop_rx) = watch::channel(false);

    let lr_handle = tokio::spawn(diff_maps_left_right(
        last.clone(),
        current.clone(),
        lr_tx,
        lr_stop_rx,
    ));
    let td_handle = tokio::spawn(diff_maps_top_down(
        last.clone(),
        current.clone(),
        td_tx,
        td_stop_rx,
    ));

    let outcome = best_loop(
        &mut lr_rx,
        &mut td_rx,
        &changes,
        &stop,
        &lr_stop_tx,
        policy,
    )
    .await;

    // Stop whatever is still running and join both tasks so no producer
    // outlives this call; dropped receivers unblock any pending send.
    let _ = lr_stop_tx.send(true);
    let _ = td_stop_tx.send(true);
    drop(lr_rx);
    drop(td_rx);
    let lr_result = lr_handle.await;
    let td_result = td_handle.await;

    match outcome {
        BestOutcome::Stopped => {
            propagate_task_error(lr_result)?;
            propagate_task_error(td_result)?;
            Ok(false)
        }
        BestOutcome::LeftRightDone => {
            propagate_task_error(td_result)?;
            Ok(propagate_task_error(lr_result)?)
        }
        BestOutcome::TopDownDone => {
            propagate_task_error(lr_result)?;
            Ok(propagate_task_error(td_result)?)
        }
    }
}

fn propagate_task_error(
    result: std::result::Result<Result<bool>, tokio::task::JoinError>,
) -> Result<bool> {
    match result {
        Ok(Ok(complete)) => Ok(complete),
        Ok(Err(e)) => Err(e),
        Err(join) => Err(join.into()),
    }
}

async fn best_loop(
    lr_rx: &mut mpsc::Receiver<ValueChanged>,
    td_rx: &mut mpsc::Receiver<ValueChanged>,
    changes: &mpsc::Sender<ValueChanged>,
    stop: &watch::Receiver<bool>,
    lr_stop_tx: &watch::Sender<bool>,
    policy: &dyn CutoverPolicy,
) -> BestOutcome {
    let mut lr_count = 0usize;
    let mut td_count = 0usize;

    // Forward left-right events while top-down catches up. Both strategies
    // emit the identical key-ordered event stream, so the first
    // `lr_count` top-down events are duplicates and are dropped.
    loop {
        let mut stop_watch = stop.clone();
        tokio::select! {
            _ = wait_for_stop(&mut stop_watch) => return BestOutcome::Stopped,
            lr = lr_rx.recv() => match lr {
                None => return BestOutcome::LeftRightDone,
                Some(change) => {
                    lr_count += 1;
                    if !send_change(changes, stop, change).await {
                        return BestOutcome::Stopped;
                    }
                }
            },
            td = td_rx.recv() => match td {
                None => return BestOutcome::TopDownDone,
                Some(change) => {
                    td_count += 1;
                    if policy.should_cut_over(lr_count, td_count) {
                        // Top-down has overtaken left-right: emit this event
                        // and switch streams.
                        debug!(
                            "diff cutover to top-down after {lr_count} left-right events"
                        );
                        if !send_change(changes, stop, change).await {
                            return BestOutcome::Stopped;
                        }
                        let _ = lr_stop_tx.send(true);
                        break;
                    }
                }
            },
        }
    }

    // Drain the remainder from top-down.
    loop {
        let mut stop_watch = stop.clone();
        tokio::select! {
            _ = wait_for_stop(&mut stop_watch) => return BestOutcome::Stopped,
            td = td_rx.recv() => match td {
                None => return BestOutcome::TopDownDone,
                Some(change) => {
                    if !send_change(changes, stop, change).await {
                        return BestOutcome::Stopped;
                    }
                }
            },
        }
    }
}

// --- map diff: left-right ---------------------------------------------------

/// Single-task cursor walk emitting changes in key order, with the
/// double-accelerated fast-forward over shared subtrees.
pub async fn diff_maps_left_right<S: ChunkStore>(
    last: Sequence<S>,
    current: Sequence<S>,
    changes: mpsc::Sender<ValueChanged>,
    stop: watch::Receiver<bool>,
) -> Result<bool> {
    ensure_kind(&last, &current, CollectionKind::Map)?;
    let last_store = Arc::clone(last.store());
    let current_store = Arc::clone(current.store());

    let mut last_cur = SequenceCursor::at_start(last).await?;
    let mut current_cur = SequenceCursor::at_start(current).await?;

    while last_cur.valid() && current_cur.valid() {
        fast_forward(&mut last_cur, &mut current_cur).await?;

        while last_cur.valid()
            && current_cur.valid()
            && !is_current_equal(&last_cur, &current_cur)
        {
            let last_key = last_cur.current_key()?;
            let current_key = current_cur.current_key()?;
            if current_key < last_key {
                let new_value =
                    load_value_repr(&current_store, &current_cur.current_map_entry()?.value)
                        .await?;
                if !send_change(&changes, &stop, ValueChanged::added(current_key, new_value))
                    .await
                {
                    return Ok(false);
                }
                current_cur.advance().await?;
            } else if last_key < current_key {
                let old_value =
                    load_value_repr(&last_store, &last_cur.current_map_entry()?.value).await?;
                if !send_change(&changes, &stop, ValueChanged::removed(last_key, old_value))
                    .await
                {
                    return Ok(false);
                }
                last_cur.advance().await?;
            } else {
                let old_value =
                    load_value_repr(&last_store, &last_cur.current_map_entry()?.value).await?;
                let new_value =
                    load_value_repr(&current_store, &current_cur.current_map_entry()?.value)
                        .await?;
                if !send_change(
                    &changes,
                    &stop,
                    ValueChanged::modified(last_key, old_value, new_value),
                )
                .await
                {
                    return Ok(false);
                }
                last_cur.advance().await?;
                current_cur.advance().await?;
            }
        }
    }

    while last_cur.valid() {
        let key = last_cur.current_key()?;
        let old_value =
            load_value_repr(&last_store, &last_cur.current_map_entry()?.value).await?;
        if !send_change(&changes, &stop, ValueChanged::removed(key, old_value)).await {
            return Ok(false);
        }
        last_cur.advance().await?;
    }
    while current_cur.valid() {
        let key = current_cur.current_key()?;
        let new_value =
            load_value_repr(&current_store, &current_cur.current_map_entry()?.value).await?;
        if !send_change(&changes, &stop, ValueChanged::added(key, new_value)).await {
            return Ok(false);
        }
        current_cur.advance().await?;
    }

    Ok(true)
}

fn is_current_equal<S: ChunkStore>(a: &SequenceCursor<S>, b: &SequenceCursor<S>) -> bool {
    a.valid()
        && b.valid()
        && a.sequence()
            .item_eq(a.idx() as usize, b.sequence(), b.idx() as usize)
}

/// Advances both cursors past their common run of equal items.
async fn fast_forward<S: ChunkStore>(
    a: &mut SequenceCursor<S>,
    b: &mut SequenceCursor<S>,
) -> Result<()> {
    if a.valid() && b.valid() {
        do_fast_forward(true, a, b).await?;
    }
    Ok(())
}

/// Returns whether each cursor still has items. When both parents sit on
/// equal tuples, the entire sibling subtree is known equal and both parents
/// advance one whole chunk without reading any leaf bytes.
#[async_recursion]
async fn do_fast_forward<S: ChunkStore>(
    allow_past_end: bool,
    a: &mut SequenceCursor<S>,
    b: &mut SequenceCursor<S>,
) -> Result<(bool, bool)> {
    let mut a_has_more = true;
    let mut b_has_more = true;

    while a_has_more && b_has_more && is_current_equal(a, b) {
        let parents_equal = match (a.parent_ref(), b.parent_ref()) {
            (Some(pa), Some(pb)) => is_current_equal(pa, pb),
            _ => false,
        };
        if parents_equal {
            let (pa_more, pb_more) = do_fast_forward(
                false,
                a.parent_mut().ok_or_else(parent_vanished)?,
                b.parent_mut().ok_or_else(parent_vanished)?,
            )
            .await?;
            a.sync_with_idx(pa_more, allow_past_end).await?;
            b.sync_with_idx(pb_more, allow_past_end).await?;
            a_has_more = pa_more;
            b_has_more = pb_more;
        } else {
            a_has_more = a.advance_maybe_allow_past_end(allow_past_end).await?;
            b_has_more = b.advance_maybe_allow_past_end(allow_past_end).await?;
        }
    }
    Ok((a_has_more, b_has_more))
}

fn parent_vanished() -> ProllyError {
    ProllyError::InvariantViolation("cursor parent vanished during fast-forward".to_string())
}

// --- map diff: top-down -----------------------------------------------------

/// Parallel top-down diff: equalize heights, plan splices over meta tuples,
/// and recurse on each changed range in its own task, forwarding results in
/// splice order.
pub async fn diff_maps_top_down<S: ChunkStore>(
    last: Sequence<S>,
    current: Sequence<S>,
    changes: mpsc::Sender<ValueChanged>,
    stop: watch::Receiver<bool>,
) -> Result<bool> {
    ensure_kind(&last, &current, CollectionKind::Map)?;
    diff_internal_nodes(last, current, changes, stop).await
}

#[async_recursion]
async fn diff_internal_nodes<S: ChunkStore>(
    last: Sequence<S>,
    current: Sequence<S>,
    changes: mpsc::Sender<ValueChanged>,
    stop: watch::Receiver<bool>,
) -> Result<bool> {
    // Equalize heights by replacing the taller side with the virtual
    // concatenation of all its children.
    if last.tree_level() > current.tree_level() {
        let last_child = last
            .composite_child_sequence(0, last.seq_len() as u64)
            .await?;
        return diff_internal_nodes(last_child, current, changes, stop).await;
    }
    if current.tree_level() > last.tree_level() {
        let current_child = current
            .composite_child_sequence(0, current.seq_len() as u64)
            .await?;
        return diff_internal_nodes(last, current_child, changes, stop).await;
    }

    if last.is_leaf() && current.is_leaf() {
        return diff_maps_left_right(last, current, changes, stop).await;
    }

    let splices = calc_splices(
        last.seq_len() as u64,
        current.seq_len() as u64,
        DEFAULT_MAX_SPLICE_MATRIX_SIZE,
        |i, j| last.item_eq(i as usize, &current, j as usize),
    );

    // One worker per splice range; output is forwarded range by range so
    // the stream stays key ordered.
    let mut workers = Vec::with_capacity(splices.len());
    for splice in splices {
        let (tx, rx) = mpsc::channel::<ValueChanged>(DIFF_CHANNEL_DEPTH);
        let last = last.clone();
        let current = current.clone();
        let stop_child = stop.clone();
        let handle = tokio::spawn(async move {
            let (last_child, current_child) = tokio::try_join!(
                last.composite_child_sequence(splice.at, splice.removed),
                current.composite_child_sequence(splice.from, splice.added),
            )?;
            diff_internal_nodes(last_child, current_child, tx, stop_child).await
        });
        workers.push((handle, rx));
    }

    let mut complete = true;
    let mut first_error: Option<ProllyError> = None;
    for (handle, mut rx) in workers {
        if complete && first_error.is_none() {
            while let Some(change) = rx.recv().await {
                if !send_change(&changes, &stop, change).await {
                    complete = false;
                    break;
                }
            }
        }
        // Dropping the receiver unblocks the worker if it is still sending.
        drop(rx);
        match handle.await {
            Ok(Ok(worker_complete)) => complete = complete && worker_complete,
            Ok(Err(e)) => first_error = first_error.or(Some(e)),
            Err(join) => first_error = first_error.or(Some(join.into())),
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(complete),
    }
}

// --- list diff --------------------------------------------------------------

/// Streams splices turning `last` into `current`. The matrix ceiling bounds
/// how much matching work is done before a range is coarsely reported as
/// wholly changed.
pub async fn diff_lists<S: ChunkStore>(
    last: &Sequence<S>,
    current: &Sequence<S>,
    changes: mpsc::Sender<Splice>,
    stop: watch::Receiver<bool>,
    max_matrix_size: u64,
) -> Result<bool> {
    ensure_kind(last, current, CollectionKind::List)?;
    if last.hash().is_some() && last.hash() == current.hash() {
        return Ok(true);
    }

    let last_len = last.num_leaves();
    let current_len = current.num_leaves();
    if current_len == 0 && last_len == 0 {
        return Ok(true);
    }
    if current_len == 0 {
        return Ok(send_splice(
            &changes,
            &stop,
            Splice {
                at: 0,
                removed: last_len,
                added: 0,
                from: 0,
            },
        )
        .await);
    }
    if last_len == 0 {
        return Ok(send_splice(
            &changes,
            &stop,
            Splice {
                at: 0,
                removed: 0,
                added: current_len,
                from: 0,
            },
        )
        .await);
    }

    indexed_sequence_diff(
        last.clone(),
        0,
        current.clone(),
        0,
        &changes,
        &stop,
        max_matrix_size,
    )
    .await
}

#[async_recursion]
async fn indexed_sequence_diff<S: ChunkStore>(
    last: Sequence<S>,
    last_offset: u64,
    current: Sequence<S>,
    current_offset: u64,
    changes: &mpsc::Sender<Splice>,
    stop: &watch::Receiver<bool>,
    max_matrix_size: u64,
) -> Result<bool> {
    if last.tree_level() > current.tree_level() {
        let last_child = last
            .composite_child_sequence(0, last.seq_len() as u64)
            .await?;
        return indexed_sequence_diff(
            last_child,
            last_offset,
            current,
            current_offset,
            changes,
            stop,
            max_matrix_size,
        )
        .await;
    }
    if current.tree_level() > last.tree_level() {
        let current_child = current
            .composite_child_sequence(0, current.seq_len() as u64)
            .await?;
        return indexed_sequence_diff(
            last,
            last_offset,
            current_child,
            current_offset,
            changes,
            stop,
            max_matrix_size,
        )
        .await;
    }

    let splices = calc_splices(
        last.seq_len() as u64,
        current.seq_len() as u64,
        max_matrix_size,
        |i, j| last.item_eq(i as usize, &current, j as usize),
    );

    if last.is_leaf() {
        for mut splice in splices {
            if splice.removed == 0 && splice.added == 0 {
                continue;
            }
            splice.at += last_offset;
            if splice.added > 0 {
                splice.from += current_offset;
            }
            if !send_splice(changes, stop, splice).await {
                return Ok(false);
            }
        }
        return Ok(true);
    }

    for splice in splices {
        let (last_child, current_child) = tokio::try_join!(
            last.composite_child_sequence(splice.at, splice.removed),
            current.composite_child_sequence(splice.from, splice.added),
        )?;
        let last_child_offset = last_offset + last.leaves_before_tuple(splice.at as usize);
        let current_child_offset =
            current_offset + current.leaves_before_tuple(splice.from as usize);
        if !indexed_sequence_diff(
            last_child,
            last_child_offset,
            current_child,
            current_child_offset,
            changes,
            stop,
            max_matrix_size,
        )
        .await?
        {
            return Ok(false);
        }
    }
    Ok(true)
}
