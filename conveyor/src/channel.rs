//! A blocking, fixed-capacity FIFO channel with an end-of-stream signal.
//!
//! [`BoundedChannel`] is the backbone of the threaded pipeline. Producers block in
//! [`BoundedChannel::put`] while the buffer is full (backpressure) and consumers block in
//! [`BoundedChannel::get`] while it is empty, for at most the timeout they pass. Closing the
//! channel is a one-way transition: once closed and drained, every pending and future `get`
//! returns [`Received::EndOfStream`] immediately.
//!
//! All state lives behind a single mutex. Two condition variables park producers waiting for
//! space and consumers waiting for data. Metrics are recorded after the lock is released.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use metrics::{counter, gauge};
use tracing::trace;

use crate::bail;
use crate::error::{ConveyorResult, ErrorKind};
use crate::metrics::{
    CONVEYOR_CHANNEL_OCCUPANCY, CONVEYOR_GET_TIMEOUTS_TOTAL, CONVEYOR_ITEMS_DEQUEUED_TOTAL,
    CONVEYOR_ITEMS_ENQUEUED_TOTAL,
};

/// Outcome of a `get` on a [`BoundedChannel`].
///
/// Neither [`Received::Timeout`] nor [`Received::EndOfStream`] is an error: the first tells a
/// consumer to re-check its stop signal, the second tells it to exit.
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received<T> {
    /// The oldest item in the channel.
    Item(T),
    /// The timeout elapsed while the channel was open and empty.
    Timeout,
    /// The channel is closed and empty.
    EndOfStream,
}

impl<T> Received<T> {
    /// Returns the item, discarding the control-flow signals.
    pub fn into_item(self) -> Option<T> {
        match self {
            Received::Item(item) => Some(item),
            Received::Timeout | Received::EndOfStream => None,
        }
    }

    /// Returns `true` for [`Received::EndOfStream`].
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, Received::EndOfStream)
    }
}

/// Outcome of a [`BoundedChannel::put_timeout`].
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent<T> {
    /// The item was appended.
    Stored,
    /// No space freed up in time; the item is handed back to the caller.
    Timeout(T),
}

/// Point-in-time counters of a [`BoundedChannel`].
///
/// `enqueued_total == dequeued_total + occupancy` holds for every snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelStats {
    pub capacity: usize,
    pub occupancy: usize,
    pub enqueued_total: u64,
    pub dequeued_total: u64,
    pub closed: bool,
}

#[derive(Debug)]
struct State<T> {
    items: VecDeque<T>,
    closed: bool,
    enqueued_total: u64,
    dequeued_total: u64,
}

#[derive(Debug)]
struct Shared<T> {
    state: Mutex<State<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

/// Fixed-capacity FIFO queue with blocking put/get and a closeable end of stream.
///
/// Cloning yields another handle to the same buffer.
pub struct BoundedChannel<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for BoundedChannel<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for BoundedChannel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = self.stats();
        f.debug_struct("BoundedChannel")
            .field("capacity", &stats.capacity)
            .field("occupancy", &stats.occupancy)
            .field("closed", &stats.closed)
            .finish()
    }
}

impl<T> BoundedChannel<T> {
    /// Creates an open, empty channel holding at most `capacity` items.
    pub fn new(capacity: usize) -> ConveyorResult<Self> {
        if capacity == 0 {
            bail!(
                ErrorKind::InvalidConfig,
                "Channel capacity must be greater than 0"
            );
        }

        Ok(Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    items: VecDeque::with_capacity(capacity),
                    closed: false,
                    enqueued_total: 0,
                    dequeued_total: 0,
                }),
                not_empty: Condvar::new(),
                not_full: Condvar::new(),
                capacity,
            }),
        })
    }

    /// Appends `item`, blocking while the channel is full.
    ///
    /// Fails with [`ErrorKind::ChannelClosed`] when called after [`BoundedChannel::close`]. A
    /// producer that is already parked waiting for space is not affected by a later close.
    pub fn put(&self, item: T) -> ConveyorResult<()> {
        let mut state = self.lock();
        if state.closed {
            bail!(ErrorKind::ChannelClosed, "Put on a closed channel");
        }

        while state.items.len() >= self.shared.capacity {
            state = self
                .shared
                .not_full
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }

        let occupancy = Self::push(&mut state, item);
        drop(state);

        self.after_put(occupancy);

        Ok(())
    }

    /// Like [`BoundedChannel::put`] but gives the item back if no space frees up within
    /// `timeout`.
    ///
    /// A timeout too large to be represented as a deadline waits like [`BoundedChannel::put`].
    pub fn put_timeout(&self, item: T, timeout: Duration) -> ConveyorResult<Sent<T>> {
        let deadline = Instant::now().checked_add(timeout);

        let mut state = self.lock();
        if state.closed {
            bail!(ErrorKind::ChannelClosed, "Put on a closed channel");
        }

        while state.items.len() >= self.shared.capacity {
            state = match Self::wait_until(&self.shared.not_full, state, deadline) {
                Some(state) => state,
                None => return Ok(Sent::Timeout(item)),
            };
        }

        let occupancy = Self::push(&mut state, item);
        drop(state);

        self.after_put(occupancy);

        Ok(Sent::Stored)
    }

    /// Removes the oldest item, waiting at most `timeout` for one to arrive.
    ///
    /// Returns [`Received::EndOfStream`] without waiting when the channel is closed and empty,
    /// and [`Received::Timeout`] when the timeout elapses on an open, empty channel.
    ///
    /// A timeout too large to be represented as a deadline never yields
    /// [`Received::Timeout`].
    pub fn get(&self, timeout: Duration) -> Received<T> {
        let deadline = Instant::now().checked_add(timeout);

        let mut state = self.lock();
        loop {
            if let Some((item, occupancy)) = Self::pop(&mut state) {
                drop(state);
                self.after_get(occupancy);
                return Received::Item(item);
            }

            if state.closed {
                return Received::EndOfStream;
            }

            state = match Self::wait_until(&self.shared.not_empty, state, deadline) {
                Some(state) => state,
                None => {
                    counter!(CONVEYOR_GET_TIMEOUTS_TOTAL).increment(1);
                    return Received::Timeout;
                }
            };
        }
    }

    /// Removes the oldest item, waiting without a deadline. Returns `None` at end of stream.
    pub fn get_blocking(&self) -> Option<T> {
        let mut state = self.lock();
        loop {
            if let Some((item, occupancy)) = Self::pop(&mut state) {
                drop(state);
                self.after_get(occupancy);
                return Some(item);
            }

            if state.closed {
                return None;
            }

            state = self
                .shared
                .not_empty
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Closes the channel. Idempotent.
    ///
    /// Consumers parked on an empty channel are released with [`Received::EndOfStream`];
    /// items already buffered can still be drained.
    pub fn close(&self) {
        let mut state = self.lock();
        let was_closed = std::mem::replace(&mut state.closed, true);
        drop(state);

        if !was_closed {
            trace!("channel closed");
        }
        self.shared.not_empty.notify_all();
    }

    /// Returns the number of items currently held.
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    /// Returns `true` if no item is held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if the channel holds `capacity` items.
    pub fn is_full(&self) -> bool {
        self.len() >= self.shared.capacity
    }

    /// Returns the maximum number of items the channel holds.
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Returns `true` once [`BoundedChannel::close`] was called.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Returns a consistent snapshot of the channel counters.
    pub fn stats(&self) -> ChannelStats {
        let state = self.lock();
        ChannelStats {
            capacity: self.shared.capacity,
            occupancy: state.items.len(),
            enqueued_total: state.enqueued_total,
            dequeued_total: state.dequeued_total,
            closed: state.closed,
        }
    }

    /// Parks on `condvar` until notified or `deadline` passes. Returns `None` once the
    /// deadline has passed, releasing the lock. Without a deadline, waits for a notification.
    fn wait_until<'a>(
        condvar: &Condvar,
        state: MutexGuard<'a, State<T>>,
        deadline: Option<Instant>,
    ) -> Option<MutexGuard<'a, State<T>>> {
        let Some(deadline) = deadline else {
            return Some(condvar.wait(state).unwrap_or_else(PoisonError::into_inner));
        };

        let remaining = deadline.checked_duration_since(Instant::now())?;
        if remaining.is_zero() {
            return None;
        }

        let (state, _) = condvar
            .wait_timeout(state, remaining)
            .unwrap_or_else(PoisonError::into_inner);
        Some(state)
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        // No code panics while holding the lock, so a poisoned state is still consistent.
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn push(state: &mut State<T>, item: T) -> usize {
        state.items.push_back(item);
        state.enqueued_total += 1;
        state.items.len()
    }

    fn pop(state: &mut State<T>) -> Option<(T, usize)> {
        let item = state.items.pop_front()?;
        state.dequeued_total += 1;
        Some((item, state.items.len()))
    }

    fn after_put(&self, occupancy: usize) {
        self.shared.not_empty.notify_one();
        counter!(CONVEYOR_ITEMS_ENQUEUED_TOTAL).increment(1);
        gauge!(CONVEYOR_CHANNEL_OCCUPANCY).set(occupancy as f64);
    }

    fn after_get(&self, occupancy: usize) {
        // Unconditional: several producers may be parked on a full buffer.
        self.shared.not_full.notify_one();
        counter!(CONVEYOR_ITEMS_DEQUEUED_TOTAL).increment(1);
        gauge!(CONVEYOR_CHANNEL_OCCUPANCY).set(occupancy as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    const SHORT: Duration = Duration::from_millis(20);
    const LONG: Duration = Duration::from_secs(10);

    #[test]
    fn put_then_get_returns_the_same_item() {
        let channel = BoundedChannel::new(1).unwrap();
        channel.put("burger").unwrap();
        assert_eq!(channel.get(SHORT), Received::Item("burger"));
    }

    #[test]
    fn items_are_served_in_enqueue_order() {
        let channel = BoundedChannel::new(4).unwrap();
        for i in 0..4 {
            channel.put(i).unwrap();
        }

        let drained: Vec<_> = (0..4).filter_map(|_| channel.get(SHORT).into_item()).collect();
        assert_eq!(drained, vec![0, 1, 2, 3]);
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let err = BoundedChannel::<u8>::new(0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
    }

    #[test]
    fn get_on_open_empty_channel_times_out() {
        let channel = BoundedChannel::<u8>::new(2).unwrap();
        let started = Instant::now();

        assert_eq!(channel.get(SHORT), Received::Timeout);
        assert!(started.elapsed() >= SHORT);
    }

    #[test]
    fn get_on_closed_empty_channel_returns_end_of_stream_immediately() {
        let channel = BoundedChannel::<u8>::new(2).unwrap();
        channel.close();
        channel.close();

        let started = Instant::now();
        assert_eq!(channel.get(LONG), Received::EndOfStream);
        assert!(started.elapsed() < LONG);
        assert_eq!(channel.get_blocking(), None);
    }

    #[test]
    fn buffered_items_are_drained_before_end_of_stream() {
        let channel = BoundedChannel::new(3).unwrap();
        channel.put(1).unwrap();
        channel.put(2).unwrap();
        channel.close();

        assert_eq!(channel.get(SHORT), Received::Item(1));
        assert_eq!(channel.get_blocking(), Some(2));
        assert!(channel.get(SHORT).is_end_of_stream());
    }

    #[test]
    fn put_after_close_fails() {
        let channel = BoundedChannel::new(3).unwrap();
        channel.close();

        let err = channel.put(1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ChannelClosed);
        let err = channel.put_timeout(1, SHORT).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ChannelClosed);
        assert_eq!(channel.stats().enqueued_total, 0);
    }

    #[test]
    fn put_beyond_capacity_blocks_until_a_get() {
        let channel = BoundedChannel::new(2).unwrap();
        channel.put(0).unwrap();
        channel.put(1).unwrap();
        assert!(channel.is_full());

        let stored = Arc::new(AtomicBool::new(false));
        let producer = {
            let channel = channel.clone();
            let stored = Arc::clone(&stored);
            thread::spawn(move || {
                channel.put(2).unwrap();
                stored.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(100));
        assert!(!stored.load(Ordering::SeqCst));
        assert_eq!(channel.len(), 2);

        assert_eq!(channel.get(SHORT), Received::Item(0));
        producer.join().unwrap();

        assert!(stored.load(Ordering::SeqCst));
        assert_eq!(channel.get(SHORT), Received::Item(1));
        assert_eq!(channel.get(SHORT), Received::Item(2));
    }

    #[test]
    fn put_timeout_hands_the_item_back_when_full() {
        let channel = BoundedChannel::new(1).unwrap();
        assert_eq!(channel.put_timeout(1, SHORT).unwrap(), Sent::Stored);
        assert_eq!(channel.put_timeout(2, SHORT).unwrap(), Sent::Timeout(2));
        assert_eq!(channel.len(), 1);
    }

    #[test]
    fn unrepresentable_timeouts_wait_without_a_deadline() {
        let channel = BoundedChannel::new(1).unwrap();
        assert_eq!(channel.put_timeout(1, Duration::MAX).unwrap(), Sent::Stored);
        assert_eq!(channel.get(Duration::MAX), Received::Item(1));

        let consumer = {
            let channel = channel.clone();
            thread::spawn(move || channel.get(Duration::MAX))
        };
        thread::sleep(Duration::from_millis(50));
        channel.put(2).unwrap();
        assert_eq!(consumer.join().unwrap(), Received::Item(2));

        channel.put(3).unwrap();
        let producer = {
            let channel = channel.clone();
            thread::spawn(move || channel.put_timeout(4, Duration::MAX).unwrap())
        };
        thread::sleep(Duration::from_millis(50));
        assert_eq!(channel.get(SHORT), Received::Item(3));
        assert_eq!(producer.join().unwrap(), Sent::Stored);
        assert_eq!(channel.get(SHORT), Received::Item(4));

        channel.close();
        assert_eq!(channel.get(Duration::MAX), Received::EndOfStream);
    }

    #[test]
    fn close_releases_every_blocked_consumer() {
        let channel = BoundedChannel::<u32>::new(2).unwrap();
        let consumers: Vec<_> = (0..3)
            .map(|_| {
                let channel = channel.clone();
                thread::spawn(move || channel.get(LONG))
            })
            .collect();

        thread::sleep(Duration::from_millis(50));
        let started = Instant::now();
        channel.close();

        for consumer in consumers {
            assert_eq!(consumer.join().unwrap(), Received::EndOfStream);
        }
        assert!(started.elapsed() < LONG);
    }

    #[test]
    fn stats_balance_enqueued_dequeued_and_resident() {
        let channel = BoundedChannel::new(8).unwrap();
        for i in 0..6 {
            channel.put(i).unwrap();
        }
        for _ in 0..4 {
            let _ = channel.get(SHORT);
        }
        channel.close();

        let stats = channel.stats();
        assert_eq!(stats.enqueued_total, 6);
        assert_eq!(stats.dequeued_total, 4);
        assert_eq!(stats.occupancy, 2);
        assert_eq!(stats.enqueued_total, stats.dequeued_total + stats.occupancy as u64);
        assert!(stats.closed);
    }
}
