// SPDX-FileCopyrightText: Copyright (c) 2024-2026 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Transaction pool.
//!
//! Hands out unique transaction ids, stores the in-flight set, delivers the
//! outcome to each waiter exactly once and reclaims ids on any terminal
//! outcome. The free ids live in a bounded lock-free queue so returning an
//! id from the completion path never blocks; the in-flight map is guarded
//! by a mutex that is only held across short map operations.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use crossbeam_queue::ArrayQueue;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::{
    error::{Error, Result},
    frame::tcp::{ResponseAdu, TransactionId},
};

/// Number of distinct transaction ids.
const ID_SPACE: usize = 1 << 16;

/// Cadence of the timeout monitor.
const MONITOR_INTERVAL: Duration = Duration::from_secs(1);

/// Default age after which an unanswered transaction times out.
pub(crate) const DEFAULT_TRANSACTION_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PoolState {
    Open,
    Closed,
}

#[derive(Debug)]
struct Pending {
    created_at: Instant,
    timeout: Duration,
    tx: oneshot::Sender<Result<ResponseAdu>>,
}

#[derive(Debug)]
struct Live {
    map: HashMap<TransactionId, Pending>,
    state: PoolState,
}

/// A placed transaction: the reserved id and the waiter end of its
/// one-shot result slot.
#[derive(Debug)]
pub(crate) struct Placed {
    pub(crate) transaction_id: TransactionId,
    pub(crate) rx: oneshot::Receiver<Result<ResponseAdu>>,
}

#[derive(Debug)]
pub(crate) struct TransactionPool {
    live: Mutex<Live>,
    free_ids: ArrayQueue<TransactionId>,
    default_timeout: Duration,
    monitor_interval: Duration,
    monitor_stop: CancellationToken,
}

impl TransactionPool {
    pub(crate) fn new(default_timeout: Duration) -> Self {
        Self::with_monitor_interval(default_timeout, MONITOR_INTERVAL)
    }

    fn with_monitor_interval(default_timeout: Duration, monitor_interval: Duration) -> Self {
        let free_ids = ArrayQueue::new(ID_SPACE);
        for id in 0..=TransactionId::MAX {
            // Cannot fail: the queue capacity equals the id space.
            let _ = free_ids.push(id);
        }
        Self {
            live: Mutex::new(Live {
                map: HashMap::new(),
                state: PoolState::Open,
            }),
            free_ids,
            default_timeout,
            monitor_interval,
            monitor_stop: CancellationToken::new(),
        }
    }

    /// Spawn the timeout monitor that expires stale transactions.
    ///
    /// Runs until [`close`](Self::close).
    pub(crate) fn start_monitor(self: &Arc<Self>) {
        let pool = Arc::clone(self);
        let stop = self.monitor_stop.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(pool.monitor_interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = stop.cancelled() => break,
                    _ = tick.tick() => pool.expire_stale(),
                }
            }
        });
    }

    /// Reserve a free id and record a new in-flight transaction.
    ///
    /// `timeout` overrides the pool-wide default for this transaction only.
    pub(crate) fn place(&self, timeout: Option<Duration>) -> Result<Placed> {
        let mut live = self
            .live
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if live.state == PoolState::Closed {
            return Err(Error::TransportClosing);
        }
        let Some(transaction_id) = self.free_ids.pop() else {
            return Err(Error::PoolExhausted);
        };
        let (tx, rx) = oneshot::channel();
        live.map.insert(
            transaction_id,
            Pending {
                created_at: Instant::now(),
                timeout: timeout.unwrap_or(self.default_timeout),
                tx,
            },
        );
        Ok(Placed { transaction_id, rx })
    }

    /// Non-removing lookup: the creation timestamp of an in-flight
    /// transaction.
    pub(crate) fn get(&self, transaction_id: TransactionId) -> Option<Instant> {
        let live = self
            .live
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        live.map.get(&transaction_id).map(|p| p.created_at)
    }

    /// Atomically remove a transaction and return its id to the free list.
    fn release(&self, transaction_id: TransactionId) -> Option<Pending> {
        let mut live = self
            .live
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let pending = live.map.remove(&transaction_id)?;
        // Cannot fail: an id is either in the free list or in the map,
        // never both.
        let _ = self.free_ids.push(transaction_id);
        Some(pending)
    }

    /// Deliver a decoded response to the waiter of `transaction_id`.
    ///
    /// Returns `false` for a stray response without a matching transaction,
    /// e.g. one whose waiter already timed out.
    pub(crate) fn complete(&self, transaction_id: TransactionId, adu: ResponseAdu) -> bool {
        match self.release(transaction_id) {
            Some(pending) => {
                // The waiter may be gone after caller cancellation.
                let _ = pending.tx.send(Ok(adu));
                true
            }
            None => false,
        }
    }

    /// Deliver an error outcome to the waiter of `transaction_id`.
    pub(crate) fn fail(&self, transaction_id: TransactionId, err: Error) -> bool {
        match self.release(transaction_id) {
            Some(pending) => {
                let _ = pending.tx.send(Err(err));
                true
            }
            None => false,
        }
    }

    /// Terminal-error every live transaction and free all ids.
    pub(crate) fn reset(&self, reason: impl Fn() -> Error) {
        let drained = {
            let mut live = self
                .live
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            std::mem::take(&mut live.map)
        };
        for (transaction_id, pending) in drained {
            let _ = self.free_ids.push(transaction_id);
            let _ = pending.tx.send(Err(reason()));
        }
    }

    /// As [`reset`](Self::reset), plus stop the timeout monitor and refuse
    /// all further operations. Idempotent.
    pub(crate) fn close(&self, reason: impl Fn() -> Error) {
        {
            let mut live = self
                .live
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if live.state == PoolState::Closed {
                return;
            }
            live.state = PoolState::Closed;
        }
        self.reset(reason);
        self.monitor_stop.cancel();
    }

    /// Expire every transaction older than its timeout.
    fn expire_stale(&self) {
        let now = Instant::now();
        let expired = {
            let mut live = self
                .live
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            let ids: Vec<_> = live
                .map
                .iter()
                .filter(|(_, p)| now.duration_since(p.created_at) > p.timeout)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| live.map.remove(&id).map(|p| (id, p)))
                .collect::<Vec<_>>()
        };
        for (transaction_id, pending) in expired {
            log::debug!("transaction {transaction_id} timed out");
            let _ = self.free_ids.push(transaction_id);
            let _ = pending.tx.send(Err(Error::TransactionTimeout));
        }
    }

    #[cfg(test)]
    fn live_len(&self) -> usize {
        self.live
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .map
            .len()
    }

    #[cfg(test)]
    fn free_len(&self) -> usize {
        self.free_ids.len()
    }
}
