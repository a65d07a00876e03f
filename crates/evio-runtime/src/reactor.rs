//! # Reactor: single-threaded readiness dispatcher
//!
//! The reactor owns every registered stream and listener and runs their
//! callbacks on the thread that calls [`Reactor::run`]. Per round it:
//! 1. Computes the wait budget (nearest timer deadline vs. caller cap)
//! 2. Collects readiness from the multiplexer backend
//! 3. Dispatches each event to its slot's handler
//! 4. Fires due timers in deadline order
//!
//! Registrations live in a slot table. A slot index is recycled LIFO, and
//! every recycle bumps the slot's generation; tokens carry index and
//! generation together, so a readiness report queued for a previous
//! occupant of the slot is recognised as stale and dropped instead of
//! being delivered to the wrong connection.
//!
//! During a callback the slot's occupant is moved out of the table. The
//! callback gets the reactor and its own stream as two independent
//! borrows, and its returned [`Action`] decides what happens to the
//! registration afterwards. Handlers may freely register, deregister and
//! arm timers for OTHER slots; their own slot only changes through the
//! returned verdict.

use std::collections::HashMap;
use std::fmt;
use std::mem;
use std::time::{Duration, Instant};

use evio_core::constants::DEFAULT_BUFFER_SIZE;
use evio_core::error::{AcceptError, ConnectError, ReactorError, TransportError};
use evio_core::interest::Interest;
use evio_core::{evdebug, evwarn};

use crate::backend::{create_backend, EventBackend, PollEvent, Token};
use crate::config::ReactorConfig;
use crate::listener::Listener;
use crate::stream::{BlockMode, Stream};
use crate::timer::{TimerId, TimerOutcome, TimerQueue};

// ===== Identifiers =====

/// Handle to a registered stream, listener or pending connect.
///
/// Carries the slot index plus the slot's generation at registration
/// time. Operations against an id whose slot has since been recycled
/// fail with [`ReactorError::StaleId`] instead of touching the new
/// occupant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId {
    index: u32,
    gen: u32,
}

impl StreamId {
    #[inline]
    fn token(&self) -> Token {
        Token(((self.gen as u64) << 32) | self.index as u64)
    }

    #[inline]
    fn from_token(t: Token) -> StreamId {
        StreamId {
            index: (t.0 & 0xFFFF_FFFF) as u32,
            gen: (t.0 >> 32) as u32,
        }
    }

    /// Slot index, stable for the lifetime of the registration.
    pub fn index(&self) -> u32 {
        self.index
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}.g{}", self.index, self.gen)
    }
}

// ===== Handler traits =====

/// Verdict returned by stream callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Keep the registration and watch for this interest next.
    Rearm(Interest),
    /// Keep the stream registered but stop watching it. Wake it later
    /// with [`Reactor::rearm`].
    Idle,
    /// Flush, close and drop the stream; the slot is recycled.
    Close,
}

/// Callbacks for a registered stream.
///
/// Only armed directions are delivered: a handler that asked for
/// `READABLE` never sees `on_writable`. When one event carries both
/// directions, `on_readable` runs first and `on_writable`'s verdict
/// supersedes (unless the read verdict was `Close`). Handlers wanting
/// both directions keep returning `Rearm(Interest::BOTH)`.
pub trait StreamHandler {
    fn on_readable(&mut self, rt: &mut Reactor, id: StreamId, stream: &mut Stream) -> Action {
        let _ = (rt, id, stream);
        Action::Idle
    }

    fn on_writable(&mut self, rt: &mut Reactor, id: StreamId, stream: &mut Stream) -> Action {
        let _ = (rt, id, stream);
        Action::Idle
    }
}

/// Callbacks for a registered listener.
pub trait AcceptHandler {
    /// A connection arrived. Return `false` to pause accepting: the
    /// listener keeps its slot and its backlog, but no further
    /// connections are dispatched until [`Reactor::resume_accept`].
    fn on_accept(&mut self, rt: &mut Reactor, stream: Stream) -> bool;

    /// Offer a used stream for in-place recycling. Asked once per
    /// arriving connection, after the raw accept succeeded.
    fn supply_reuse(&mut self) -> Option<Stream> {
        None
    }
}

/// Callbacks for a pending outbound connect.
///
/// Exactly one of the two methods fires, after which the registration is
/// gone: `on_connected` receives the stream with full ownership and may
/// hand it straight back to [`Reactor::register`].
pub trait ConnectHandler {
    fn on_connected(&mut self, rt: &mut Reactor, stream: Stream);
    fn on_connect_error(&mut self, rt: &mut Reactor, err: ConnectError);
}

/// Closures over `Result` work directly as connect handlers.
impl<F> ConnectHandler for F
where
    F: FnMut(&mut Reactor, Result<Stream, ConnectError>),
{
    fn on_connected(&mut self, rt: &mut Reactor, stream: Stream) {
        self(rt, Ok(stream))
    }

    fn on_connect_error(&mut self, rt: &mut Reactor, err: ConnectError) {
        self(rt, Err(err))
    }
}

/// One-shot timer callback. Receives `TimedOut` when the deadline passed
/// or `Cancelled` when the reactor tears down with the timer pending.
pub type TimerCallback = Box<dyn FnOnce(&mut Reactor, TimerOutcome)>;

// ===== Slot table =====

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    /// Unoccupied, index waiting on the free stack.
    Vacant,
    /// Occupied but not armed with the backend.
    Parked,
    /// Occupied and armed; events route here.
    Awaiting,
    /// Occupant temporarily moved out while its callback runs.
    Dispatching,
}

enum Occupant {
    Stream {
        stream: Stream,
        handler: Box<dyn StreamHandler>,
        interest: Interest,
    },
    Listener {
        listener: Listener,
        handler: Box<dyn AcceptHandler>,
        paused: bool,
    },
    Connecting {
        stream: Stream,
        handler: Box<dyn ConnectHandler>,
        timer: Option<TimerId>,
    },
}

struct Slot {
    gen: u32,
    state: SlotState,
    occupant: Option<Occupant>,
}

// ===== Stats =====

/// Counters since reactor creation.
#[derive(Debug, Clone, Default)]
pub struct ReactorStats {
    /// Wait rounds completed
    pub rounds: u64,
    /// Connections accepted
    pub accepts: u64,
    /// Stream callbacks invoked
    pub dispatches: u64,
    /// Timer callbacks fired as TimedOut
    pub timers_fired: u64,
    /// Readiness reports dropped by the generation check
    pub stale_events: u64,
}

// ===== Reactor =====

pub struct Reactor {
    config: ReactorConfig,
    backend: Box<dyn EventBackend>,
    slots: Vec<Slot>,
    /// LIFO stack of vacant slot indexes, freshest first.
    free: Vec<u32>,
    next_fresh: u32,
    live: usize,
    timers: TimerQueue,
    timer_callbacks: HashMap<TimerId, TimerCallback>,
    /// Scratch taken by `mem::take` during dispatch.
    events: Vec<PollEvent>,
    stopped: bool,
    in_shutdown: bool,
    stats: ReactorStats,
}

impl Reactor {
    pub fn new() -> Result<Self, ReactorError> {
        Self::with_config(ReactorConfig::default())
    }

    pub fn with_config(config: ReactorConfig) -> Result<Self, ReactorError> {
        config.validate()?;
        let backend = create_backend(config.backend, config.max_events)?;
        evdebug!(
            "reactor: backend={} max_streams={} accept_batch={}",
            backend.name(),
            config.max_streams,
            config.accept_batch
        );
        Ok(Reactor {
            slots: Vec::new(),
            free: Vec::with_capacity(64),
            next_fresh: 0,
            live: 0,
            timers: TimerQueue::new(),
            timer_callbacks: HashMap::new(),
            events: Vec::with_capacity(config.max_events),
            stopped: false,
            in_shutdown: false,
            stats: ReactorStats::default(),
            backend,
            config,
        })
    }

    // ===== Registration =====

    /// Hand a stream to the reactor and start watching it.
    ///
    /// The stream is forced non-blocking. On failure to arm the backend
    /// the stream is closed and dropped, since the caller cannot get it
    /// back through the error.
    pub fn register<H>(
        &mut self,
        mut stream: Stream,
        interest: Interest,
        handler: H,
    ) -> Result<StreamId, ReactorError>
    where
        H: StreamHandler + 'static,
    {
        stream
            .set_block_mode(BlockMode::NonBlocking)
            .map_err(admission_err)?;
        let index = self.alloc_slot()?;
        let id = self.id_at(index);
        if let Err(e) = self.backend.register(stream.fd(), id.token(), interest) {
            evwarn!("reactor: arming fd {} failed: {}", stream.fd(), e);
            self.free.push(index);
            return Err(e);
        }
        self.occupy(
            index,
            Occupant::Stream {
                stream,
                handler: Box::new(handler),
                interest,
            },
            if interest.is_empty() {
                SlotState::Parked
            } else {
                SlotState::Awaiting
            },
        );
        Ok(id)
    }

    /// Watch a listener; arriving connections go to the handler.
    pub fn register_listener<H>(
        &mut self,
        mut listener: Listener,
        handler: H,
    ) -> Result<StreamId, ReactorError>
    where
        H: AcceptHandler + 'static,
    {
        listener.force_nonblocking().map_err(admission_err)?;
        let index = self.alloc_slot()?;
        let id = self.id_at(index);
        if let Err(e) = self
            .backend
            .register(listener.fd(), id.token(), Interest::READABLE)
        {
            evwarn!("reactor: arming listener fd {} failed: {}", listener.fd(), e);
            self.free.push(index);
            return Err(e);
        }
        self.occupy(
            index,
            Occupant::Listener {
                listener,
                handler: Box::new(handler),
                paused: false,
            },
            SlotState::Awaiting,
        );
        Ok(id)
    }

    /// Track a connect-in-progress stream until it resolves.
    ///
    /// When `timeout` is set and the attempt neither completes nor fails
    /// in time, the handler sees `ConnectError::TimedOut` and the stream
    /// is closed.
    pub fn register_connect<H>(
        &mut self,
        mut stream: Stream,
        timeout: Option<Duration>,
        handler: H,
    ) -> Result<StreamId, ReactorError>
    where
        H: ConnectHandler + 'static,
    {
        stream
            .set_block_mode(BlockMode::NonBlocking)
            .map_err(admission_err)?;
        let index = self.alloc_slot()?;
        let id = self.id_at(index);
        if let Err(e) = self
            .backend
            .register(stream.fd(), id.token(), Interest::WRITABLE)
        {
            evwarn!("reactor: arming connect fd {} failed: {}", stream.fd(), e);
            self.free.push(index);
            return Err(e);
        }
        // An already-established stream resolves on the first writable
        // report, so the guard timer is only needed mid-handshake.
        let timer = if stream.is_connecting() {
            timeout.map(|d| {
                self.set_timer(d, move |rt, outcome| {
                    if outcome == TimerOutcome::TimedOut {
                        rt.connect_timed_out(id);
                    }
                })
            })
        } else {
            None
        };
        self.occupy(
            index,
            Occupant::Connecting {
                stream,
                handler: Box::new(handler),
                timer,
            },
            SlotState::Awaiting,
        );
        Ok(id)
    }

    /// Open a non-blocking connection and track it, with default buffer
    /// size and no read/write timeout. Use [`Stream::connect`] plus
    /// [`Reactor::register_connect`] for full control.
    pub fn connect<H>(
        &mut self,
        addr: &str,
        timeout: Option<Duration>,
        handler: H,
    ) -> Result<StreamId, ConnectError>
    where
        H: ConnectHandler + 'static,
    {
        let stream = Stream::connect(addr, BlockMode::NonBlocking, None, None, DEFAULT_BUFFER_SIZE)?;
        self.register_connect(stream, timeout, handler)
            .map_err(reactor_to_connect)
    }

    // ===== Slot operations =====

    /// Change what a parked or armed stream is watched for.
    ///
    /// Not valid for the slot currently being dispatched; its own
    /// callback re-arms through the returned [`Action`] instead.
    pub fn rearm(&mut self, id: StreamId, interest: Interest) -> Result<(), ReactorError> {
        let index = self.check_live(id)?;
        let slot = &mut self.slots[index];
        match slot.occupant.as_mut() {
            Some(Occupant::Stream {
                stream,
                interest: cur,
                ..
            }) => {
                let fd = stream.fd();
                if interest.is_empty() {
                    self.backend.deregister(fd)?;
                } else {
                    self.backend.register(fd, id.token(), interest)?;
                }
                *cur = interest;
                slot.state = if interest.is_empty() {
                    SlotState::Parked
                } else {
                    SlotState::Awaiting
                };
                Ok(())
            }
            _ => Err(ReactorError::StaleId),
        }
    }

    /// Stop dispatching a listener's connections without dropping its
    /// backlog. The inverse of an `on_accept` returning `false`.
    pub fn pause_accept(&mut self, id: StreamId) -> Result<(), ReactorError> {
        let index = self.check_live(id)?;
        let slot = &mut self.slots[index];
        match slot.occupant.as_mut() {
            Some(Occupant::Listener {
                listener, paused, ..
            }) => {
                if !*paused {
                    self.backend.deregister(listener.fd())?;
                    *paused = true;
                    slot.state = SlotState::Parked;
                }
                Ok(())
            }
            _ => Err(ReactorError::StaleId),
        }
    }

    /// Resume a paused listener. Connections that queued up in the
    /// backlog meanwhile are dispatched on the next round.
    pub fn resume_accept(&mut self, id: StreamId) -> Result<(), ReactorError> {
        let index = self.check_live(id)?;
        let slot = &mut self.slots[index];
        match slot.occupant.as_mut() {
            Some(Occupant::Listener {
                listener, paused, ..
            }) => {
                if *paused {
                    self.backend
                        .register(listener.fd(), id.token(), Interest::READABLE)?;
                    *paused = false;
                    slot.state = SlotState::Awaiting;
                }
                Ok(())
            }
            _ => Err(ReactorError::StaleId),
        }
    }

    /// Take a stream back out of the reactor.
    ///
    /// Fails with `StaleId` for recycled ids and for the slot currently
    /// being dispatched; a callback that wants its own stream out uses
    /// [`Stream::take_handle`] and returns [`Action::Close`].
    pub fn deregister(&mut self, id: StreamId) -> Result<Stream, ReactorError> {
        let index = self.check_live(id)?;
        match self.slots[index].occupant.take() {
            Some(Occupant::Stream { stream, .. }) => {
                let _ = self.backend.deregister(stream.fd());
                self.free_index(index as u32);
                Ok(stream)
            }
            other => {
                self.slots[index].occupant = other;
                Err(ReactorError::StaleId)
            }
        }
    }

    /// Take a listener back out of the reactor.
    pub fn deregister_listener(&mut self, id: StreamId) -> Result<Listener, ReactorError> {
        let index = self.check_live(id)?;
        match self.slots[index].occupant.take() {
            Some(Occupant::Listener { listener, .. }) => {
                let _ = self.backend.deregister(listener.fd());
                self.free_index(index as u32);
                Ok(listener)
            }
            other => {
                self.slots[index].occupant = other;
                Err(ReactorError::StaleId)
            }
        }
    }

    // ===== Timers =====

    /// Schedule a one-shot callback `delay` from now.
    pub fn set_timer<F>(&mut self, delay: Duration, cb: F) -> TimerId
    where
        F: FnOnce(&mut Reactor, TimerOutcome) + 'static,
    {
        let id = self.timers.insert(Instant::now() + delay);
        self.timer_callbacks.insert(id, Box::new(cb));
        id
    }

    /// Cancel a pending timer. The callback is dropped without being
    /// invoked. Returns false when the timer already fired or was
    /// cancelled before.
    pub fn cancel_timer(&mut self, id: TimerId) -> bool {
        if self.timers.cancel(id) {
            self.timer_callbacks.remove(&id);
            true
        } else {
            false
        }
    }

    // ===== Loop =====

    /// One wait-dispatch round. Returns the number of callbacks run.
    ///
    /// `max_wait` caps the blocking time; the nearest timer deadline
    /// shortens it further. Not reentrant: handlers must not call back
    /// into `run` or `run_once`.
    pub fn run_once(&mut self, max_wait: Option<Duration>) -> Result<usize, ReactorError> {
        if self.stopped {
            return Ok(0);
        }
        self.stats.rounds += 1;

        // ── Step 1: wait budget ──
        let now = Instant::now();
        let timer_wait = self
            .timers
            .next_deadline()
            .map(|d| d.saturating_duration_since(now));
        let wait = match (timer_wait, max_wait) {
            (Some(t), Some(m)) => Some(t.min(m)),
            (Some(t), None) => Some(t),
            (None, m) => m,
        };

        // ── Step 2: collect readiness ──
        let mut events = mem::take(&mut self.events);
        let res = self.backend.wait(&mut events, wait);
        if let Err(e) = res {
            self.events = events;
            return Err(e);
        }

        // ── Step 3: dispatch events ──
        let mut work = 0;
        for ev in &events {
            if self.stopped {
                break;
            }
            work += self.dispatch_event(*ev);
        }
        events.clear();
        self.events = events;

        // ── Step 4: fire due timers ──
        work += self.fire_due_timers();

        Ok(work)
    }

    /// Run rounds until [`Reactor::stop`] is called, or until nothing is
    /// registered and no timer is pending (an empty reactor would only
    /// sleep forever).
    ///
    /// `max_idle` bounds each round's wait so cooperative stop requests
    /// from callbacks and external flags get noticed.
    pub fn run(&mut self, max_idle: Option<Duration>) -> Result<(), ReactorError> {
        self.stopped = false;
        loop {
            if self.stopped {
                break;
            }
            if self.live == 0 && self.timers.is_empty() {
                break;
            }
            self.run_once(max_idle)?;
        }
        Ok(())
    }

    /// Request a cooperative stop. The current round finishes its
    /// already-collected batch member, then `run` returns.
    pub fn stop(&mut self) {
        self.stopped = true;
    }

    pub fn stopped(&self) -> bool {
        self.stopped
    }

    /// Close every registration and deliver `Cancelled` to pending
    /// timers, in deadline order. Runs at most once; also invoked from
    /// `Drop`.
    pub fn shutdown(&mut self) {
        if self.in_shutdown {
            return;
        }
        self.in_shutdown = true;
        self.stopped = true;

        let pending = self.timers.drain_all();
        for tid in pending {
            if let Some(cb) = self.timer_callbacks.remove(&tid) {
                cb(self, TimerOutcome::Cancelled);
            }
        }
        // Timers re-armed by Cancelled callbacks are discarded.
        self.timer_callbacks.clear();

        for index in 0..self.slots.len() {
            if let Some(occ) = self.slots[index].occupant.take() {
                self.drop_occupant(occ);
                self.free_index(index as u32);
            }
        }
        evdebug!(
            "reactor: shutdown rounds={} accepts={} dispatches={} timers={} stale={}",
            self.stats.rounds,
            self.stats.accepts,
            self.stats.dispatches,
            self.stats.timers_fired,
            self.stats.stale_events
        );
    }

    // ===== Introspection =====

    pub fn stats(&self) -> ReactorStats {
        self.stats.clone()
    }

    /// Occupied slot count (streams, listeners and pending connects).
    pub fn live_count(&self) -> usize {
        self.live
    }

    /// Pending (non-cancelled) timer count.
    pub fn timer_count(&self) -> usize {
        self.timers.len()
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn config(&self) -> &ReactorConfig {
        &self.config
    }

    // ===== Slot plumbing =====

    fn alloc_slot(&mut self) -> Result<u32, ReactorError> {
        if let Some(index) = self.free.pop() {
            return Ok(index);
        }
        if (self.next_fresh as usize) >= self.config.max_streams {
            return Err(ReactorError::SlotsExhausted);
        }
        let index = self.next_fresh;
        self.next_fresh += 1;
        self.slots.push(Slot {
            gen: 0,
            state: SlotState::Vacant,
            occupant: None,
        });
        Ok(index)
    }

    #[inline]
    fn id_at(&self, index: u32) -> StreamId {
        StreamId {
            index,
            gen: self.slots[index as usize].gen,
        }
    }

    fn occupy(&mut self, index: u32, occ: Occupant, state: SlotState) {
        let slot = &mut self.slots[index as usize];
        slot.occupant = Some(occ);
        slot.state = state;
        self.live += 1;
    }

    /// Vacate a slot: recycle the index and invalidate outstanding ids.
    fn free_index(&mut self, index: u32) {
        let slot = &mut self.slots[index as usize];
        slot.gen = slot.gen.wrapping_add(1);
        slot.state = SlotState::Vacant;
        slot.occupant = None;
        self.free.push(index);
        self.live = self.live.saturating_sub(1);
    }

    /// Validate an id against the table: bounds, generation, occupancy.
    fn check_live(&self, id: StreamId) -> Result<usize, ReactorError> {
        let index = id.index as usize;
        match self.slots.get(index) {
            Some(slot) if slot.gen == id.gen && slot.occupant.is_some() => Ok(index),
            _ => Err(ReactorError::StaleId),
        }
    }

    fn drop_occupant(&mut self, occ: Occupant) {
        match occ {
            Occupant::Stream { mut stream, .. } => {
                let _ = self.backend.deregister(stream.fd());
                stream.close();
            }
            Occupant::Listener { mut listener, .. } => {
                let _ = self.backend.deregister(listener.fd());
                listener.close();
            }
            Occupant::Connecting { mut stream, .. } => {
                let _ = self.backend.deregister(stream.fd());
                stream.close();
            }
        }
    }

    /// Return a dispatched occupant to its slot, unless shutdown ran
    /// underneath the callback.
    fn put_back(&mut self, index: u32, occ: Occupant, state: SlotState) {
        if self.in_shutdown {
            self.drop_occupant(occ);
            self.free_index(index);
            return;
        }
        let slot = &mut self.slots[index as usize];
        slot.occupant = Some(occ);
        slot.state = state;
    }

    // ===== Dispatch =====

    fn dispatch_event(&mut self, ev: PollEvent) -> usize {
        let id = StreamId::from_token(ev.token);
        let index = id.index as usize;

        let live = matches!(
            self.slots.get(index),
            Some(slot) if slot.gen == id.gen && slot.occupant.is_some()
        );
        if !live {
            self.stats.stale_events += 1;
            return 0;
        }

        let occ = match self.slots[index].occupant.take() {
            Some(o) => o,
            None => return 0,
        };
        self.slots[index].state = SlotState::Dispatching;

        match occ {
            Occupant::Stream {
                stream,
                handler,
                interest,
            } => self.dispatch_stream(ev, id, stream, handler, interest),
            Occupant::Listener {
                listener,
                handler,
                paused,
            } => self.dispatch_accept(id, listener, handler, paused),
            Occupant::Connecting {
                stream,
                handler,
                timer,
            } => self.dispatch_connect(id, stream, handler, timer),
        }
    }

    fn dispatch_stream(
        &mut self,
        ev: PollEvent,
        id: StreamId,
        mut stream: Stream,
        mut handler: Box<dyn StreamHandler>,
        interest: Interest,
    ) -> usize {
        let index = id.index;
        // The handler may close the stream or take its handle; the fd we
        // registered is needed afterwards either way.
        let registered_fd = stream.fd();

        if !ev.readiness.intersects_interest(interest) {
            // Readiness the occupant never asked for, e.g. the second of
            // two same-round events after the first verdict parked it.
            let state = if interest.is_empty() {
                SlotState::Parked
            } else {
                SlotState::Awaiting
            };
            self.put_back(index, Occupant::Stream { stream, handler, interest }, state);
            return 0;
        }

        let mut work = 0;
        let mut verdict = None;
        if ev.readiness.is_readable() && interest.is_readable() {
            self.stats.dispatches += 1;
            work += 1;
            verdict = Some(handler.on_readable(self, id, &mut stream));
        }
        let closed_by_read = matches!(verdict, Some(Action::Close));
        if !closed_by_read
            && ev.readiness.is_writable()
            && interest.is_writable()
            && stream.is_open()
        {
            self.stats.dispatches += 1;
            work += 1;
            verdict = Some(handler.on_writable(self, id, &mut stream));
        }
        let mut action = verdict.unwrap_or(Action::Rearm(interest));

        // A handler that closed its stream (or took the handle) decided
        // regardless of what it returned.
        if !stream.is_open() {
            action = Action::Close;
        }
        if let Action::Rearm(next) = action {
            if next.is_empty() {
                action = Action::Idle;
            }
        }

        match action {
            Action::Rearm(next) => {
                if next == interest {
                    // Level-triggered registration is still armed as-is.
                    self.put_back(index, Occupant::Stream { stream, handler, interest }, SlotState::Awaiting);
                } else if let Err(e) = self.backend.register(registered_fd, id.token(), next) {
                    evwarn!("reactor: re-arming {} failed: {}", id, e);
                    let _ = self.backend.deregister(registered_fd);
                    stream.close();
                    self.free_index(index);
                } else {
                    self.put_back(
                        index,
                        Occupant::Stream { stream, handler, interest: next },
                        SlotState::Awaiting,
                    );
                }
            }
            Action::Idle => {
                let _ = self.backend.deregister(registered_fd);
                self.put_back(
                    index,
                    Occupant::Stream { stream, handler, interest: Interest::NONE },
                    SlotState::Parked,
                );
            }
            Action::Close => {
                let _ = self.backend.deregister(registered_fd);
                stream.close();
                self.free_index(index);
            }
        }
        work
    }

    fn dispatch_accept(
        &mut self,
        id: StreamId,
        mut listener: Listener,
        mut handler: Box<dyn AcceptHandler>,
        paused: bool,
    ) -> usize {
        let index = id.index;
        if paused {
            // Event raced with a pause; backlog stays queued.
            self.put_back(index, Occupant::Listener { listener, handler, paused }, SlotState::Parked);
            return 0;
        }

        let registered_fd = listener.fd();
        let mut work = 0;
        let mut pause_now = false;
        let mut dead = false;

        // Drain a bounded batch so one busy listener cannot starve the
        // rest of the round.
        for _ in 0..self.config.accept_batch {
            if self.stopped {
                break;
            }
            match listener.accept_raw() {
                Ok((cfd, peer)) => {
                    let reuse = handler.supply_reuse();
                    match listener.finish_accept(cfd, peer, reuse) {
                        Ok(stream) => {
                            self.stats.accepts += 1;
                            work += 1;
                            if !handler.on_accept(self, stream) {
                                pause_now = true;
                                break;
                            }
                        }
                        Err(e) => {
                            evwarn!("reactor: accepted fd setup failed: {}", e);
                        }
                    }
                }
                Err(AcceptError::WouldBlock) => break,
                Err(AcceptError::TransportClosed) => {
                    dead = true;
                    break;
                }
                Err(e) => {
                    evwarn!("reactor: accept on {} failed: {}", id, e);
                    break;
                }
            }
        }

        if dead {
            evwarn!("reactor: listener {} closed underneath us", id);
            let _ = self.backend.deregister(registered_fd);
            listener.close();
            self.free_index(index);
            return work;
        }
        if pause_now {
            let _ = self.backend.deregister(registered_fd);
            self.put_back(
                index,
                Occupant::Listener { listener, handler, paused: true },
                SlotState::Parked,
            );
        } else {
            self.put_back(
                index,
                Occupant::Listener { listener, handler, paused: false },
                SlotState::Awaiting,
            );
        }
        work
    }

    fn dispatch_connect(
        &mut self,
        id: StreamId,
        mut stream: Stream,
        mut handler: Box<dyn ConnectHandler>,
        timer: Option<TimerId>,
    ) -> usize {
        let index = id.index;
        let registered_fd = stream.fd();

        // Any readiness on a connecting socket resolves the attempt, so
        // the registration ends here either way. Freeing the slot first
        // lets the callback re-register the stream immediately.
        if let Some(tid) = timer {
            self.cancel_timer(tid);
        }
        let _ = self.backend.deregister(registered_fd);
        self.free_index(index);

        match stream.finish_connect() {
            Ok(()) => handler.on_connected(self, stream),
            Err(e) => {
                stream.close();
                handler.on_connect_error(self, e);
            }
        }
        1
    }

    /// Guard-timer path: the connect deadline passed first.
    fn connect_timed_out(&mut self, id: StreamId) {
        let index = match self.check_live(id) {
            Ok(i) => i,
            Err(_) => return, // resolved and recycled in the meantime
        };
        match self.slots[index].occupant.take() {
            Some(Occupant::Connecting {
                mut stream,
                mut handler,
                ..
            }) => {
                let _ = self.backend.deregister(stream.fd());
                self.free_index(index as u32);
                stream.close();
                handler.on_connect_error(self, ConnectError::TimedOut);
            }
            other => {
                self.slots[index].occupant = other;
            }
        }
    }

    fn fire_due_timers(&mut self) -> usize {
        let due = self.timers.poll_expired(Instant::now());
        let mut fired = 0;
        for tid in due {
            if let Some(cb) = self.timer_callbacks.remove(&tid) {
                self.stats.timers_fired += 1;
                fired += 1;
                cb(self, TimerOutcome::TimedOut);
            }
        }
        fired
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn admission_err(e: TransportError) -> ReactorError {
    ReactorError::Backend(e.errno().unwrap_or(libc::EIO))
}

fn reactor_to_connect(e: ReactorError) -> ConnectError {
    let errno = match e {
        ReactorError::Backend(n) => n,
        ReactorError::SlotsExhausted => libc::EMFILE,
        _ => libc::EIO,
    };
    ConnectError::Transport(TransportError::Io(errno))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendKind;
    use crate::sock::pipe_pair;
    use crate::stream::StreamKind;
    use evio_core::IoOutcome;
    use std::cell::RefCell;
    use std::io::{Read, Write};
    use std::net::{TcpListener as StdListener, TcpStream as StdStream};
    use std::os::unix::io::RawFd;
    use std::rc::Rc;
    use std::thread;

    fn test_reactor() -> Reactor {
        let cfg = ReactorConfig::new().backend(BackendKind::Poll);
        Reactor::with_config(cfg).unwrap()
    }

    fn pipe_stream(fd: RawFd) -> Stream {
        Stream::from_fd(fd, StreamKind::Pipe, BlockMode::NonBlocking, 4096, None).unwrap()
    }

    fn write_fd(fd: RawFd, data: &[u8]) {
        let n = unsafe { libc::write(fd, data.as_ptr() as *const libc::c_void, data.len()) };
        assert_eq!(n, data.len() as isize);
    }

    /// Drive the reactor until `done` reports true or the deadline hits.
    fn drive_until<F: Fn() -> bool>(rt: &mut Reactor, secs: u64, done: F) {
        let deadline = Instant::now() + Duration::from_secs(secs);
        while !done() {
            assert!(Instant::now() < deadline, "test deadline exceeded");
            rt.run_once(Some(Duration::from_millis(20))).unwrap();
        }
    }

    // ===== Timers =====

    #[test]
    fn test_timers_fire_in_deadline_order() {
        let mut rt = test_reactor();

        // Idle read-interest registrations must not disturb timer order.
        struct Quiet;
        impl StreamHandler for Quiet {}
        let mut write_ends = Vec::new();
        for _ in 0..3 {
            let (r, w) = pipe_pair().unwrap();
            rt.register(pipe_stream(r), Interest::READABLE, Quiet).unwrap();
            write_ends.push(w);
        }

        let base = Instant::now();
        let order = Rc::new(RefCell::new(Vec::new()));
        for (label, ms) in [(3u32, 30u64), (1, 10), (2, 20)] {
            let order = Rc::clone(&order);
            let deadline = base + Duration::from_millis(ms);
            rt.set_timer(Duration::from_millis(ms), move |_rt, outcome| {
                assert_eq!(outcome, TimerOutcome::TimedOut);
                assert!(Instant::now() >= deadline, "timer fired early");
                order.borrow_mut().push(label);
            });
        }

        let order2 = Rc::clone(&order);
        drive_until(&mut rt, 5, move || order2.borrow().len() == 3);
        assert_eq!(*order.borrow(), vec![1, 2, 3]);
        assert_eq!(rt.stats().timers_fired, 3);

        for w in write_ends {
            unsafe { libc::close(w) };
        }
    }

    #[test]
    fn test_cancelled_timer_never_fires() {
        let mut rt = test_reactor();
        let fired = Rc::new(RefCell::new(false));

        let fired2 = Rc::clone(&fired);
        let id = rt.set_timer(Duration::from_millis(5), move |_rt, _| {
            *fired2.borrow_mut() = true;
        });
        assert!(rt.cancel_timer(id));
        assert!(!rt.cancel_timer(id));

        std::thread::sleep(Duration::from_millis(10));
        rt.run_once(Some(Duration::from_millis(1))).unwrap();
        assert!(!*fired.borrow());
        assert_eq!(rt.timer_count(), 0);
    }

    #[test]
    fn test_teardown_delivers_cancelled_outcome() {
        let mut rt = test_reactor();
        let outcome = Rc::new(RefCell::new(None));

        let outcome2 = Rc::clone(&outcome);
        rt.set_timer(Duration::from_secs(3600), move |_rt, o| {
            *outcome2.borrow_mut() = Some(o);
        });
        rt.shutdown();
        assert_eq!(*outcome.borrow(), Some(TimerOutcome::Cancelled));
    }

    // ===== Slot table =====

    #[test]
    fn test_register_deregister_roundtrip() {
        let mut rt = test_reactor();
        let (r, w) = pipe_pair().unwrap();

        struct Quiet;
        impl StreamHandler for Quiet {}

        let id = rt.register(pipe_stream(r), Interest::READABLE, Quiet).unwrap();
        assert_eq!(rt.live_count(), 1);

        let stream = rt.deregister(id).unwrap();
        assert!(stream.is_open());
        assert_eq!(rt.live_count(), 0);

        // Same id again: the slot was recycled.
        assert!(matches!(rt.deregister(id), Err(ReactorError::StaleId)));
        unsafe { libc::close(w) };
    }

    #[test]
    fn test_slot_exhaustion_and_recycling() {
        let cfg = ReactorConfig::new().backend(BackendKind::Poll).max_streams(1);
        let mut rt = Reactor::with_config(cfg).unwrap();
        let (r1, w1) = pipe_pair().unwrap();
        let (r2, w2) = pipe_pair().unwrap();

        struct Quiet;
        impl StreamHandler for Quiet {}

        let id1 = rt.register(pipe_stream(r1), Interest::READABLE, Quiet).unwrap();
        let err = rt.register(pipe_stream(r2), Interest::READABLE, Quiet);
        assert!(matches!(err, Err(ReactorError::SlotsExhausted)));

        drop(rt.deregister(id1).unwrap());
        let (r3, w3) = pipe_pair().unwrap();
        let id3 = rt.register(pipe_stream(r3), Interest::READABLE, Quiet).unwrap();
        // Index reused, generation moved on.
        assert_eq!(id3.index(), id1.index());
        assert_ne!(id3, id1);

        unsafe {
            libc::close(w1);
            libc::close(w2);
            libc::close(w3);
        }
    }

    // ===== Stream dispatch =====

    struct Recorder {
        seen: Rc<RefCell<Vec<usize>>>,
        verdict: Action,
    }

    impl StreamHandler for Recorder {
        fn on_readable(&mut self, _rt: &mut Reactor, _id: StreamId, stream: &mut Stream) -> Action {
            let mut buf = [0u8; 64];
            match stream.read(&mut buf) {
                Ok(IoOutcome::Transferred(n)) => self.seen.borrow_mut().push(n),
                Ok(o) if o.is_closed() => return Action::Close,
                Ok(_) => {}
                Err(_) => return Action::Close,
            }
            self.verdict
        }
    }

    #[test]
    fn test_idle_parks_until_rearmed() {
        let mut rt = test_reactor();
        let (r, w) = pipe_pair().unwrap();
        let seen = Rc::new(RefCell::new(Vec::new()));

        let id = rt
            .register(
                pipe_stream(r),
                Interest::READABLE,
                Recorder { seen: Rc::clone(&seen), verdict: Action::Idle },
            )
            .unwrap();

        write_fd(w, b"one");
        let seen2 = Rc::clone(&seen);
        drive_until(&mut rt, 5, move || !seen2.borrow().is_empty());
        assert_eq!(seen.borrow().len(), 1);

        // Parked: more data must not dispatch.
        write_fd(w, b"two");
        for _ in 0..3 {
            rt.run_once(Some(Duration::from_millis(10))).unwrap();
        }
        assert_eq!(seen.borrow().len(), 1);

        // Rearm wakes it back up.
        rt.rearm(id, Interest::READABLE).unwrap();
        let seen2 = Rc::clone(&seen);
        drive_until(&mut rt, 5, move || seen2.borrow().len() == 2);

        unsafe { libc::close(w) };
    }

    #[test]
    fn test_close_verdict_frees_slot() {
        let mut rt = test_reactor();
        let (r, w) = pipe_pair().unwrap();
        let seen = Rc::new(RefCell::new(Vec::new()));

        rt.register(
            pipe_stream(r),
            Interest::READABLE,
            Recorder { seen: Rc::clone(&seen), verdict: Action::Close },
        )
        .unwrap();

        write_fd(w, b"x");
        drive_until(&mut rt, 5, {
            let rt_done = Rc::clone(&seen);
            move || !rt_done.borrow().is_empty()
        });
        assert_eq!(rt.live_count(), 0);
        unsafe { libc::close(w) };
    }

    // ===== Listener dispatch =====

    struct Acceptor {
        accepted: Rc<RefCell<Vec<Stream>>>,
        keep_going: bool,
        stash: Option<Stream>,
    }

    impl AcceptHandler for Acceptor {
        fn on_accept(&mut self, _rt: &mut Reactor, stream: Stream) -> bool {
            self.accepted.borrow_mut().push(stream);
            self.keep_going
        }

        fn supply_reuse(&mut self) -> Option<Stream> {
            self.stash.take()
        }
    }

    #[test]
    fn test_accept_echo_roundtrip() {
        let mut rt = test_reactor();
        let listener = Listener::bind("127.0.0.1:0", 16).unwrap();
        let port = listener.local_endpoint().unwrap().port().unwrap();

        struct Echo;
        impl AcceptHandler for Echo {
            fn on_accept(&mut self, rt: &mut Reactor, stream: Stream) -> bool {
                struct Back;
                impl StreamHandler for Back {
                    fn on_readable(
                        &mut self,
                        _rt: &mut Reactor,
                        _id: StreamId,
                        stream: &mut Stream,
                    ) -> Action {
                        let mut buf = [0u8; 256];
                        loop {
                            match stream.read(&mut buf) {
                                Ok(IoOutcome::Transferred(n)) => {
                                    if stream.write_all(&buf[..n]).is_err() {
                                        return Action::Close;
                                    }
                                }
                                Ok(IoOutcome::WouldBlock) => {
                                    return Action::Rearm(Interest::READABLE)
                                }
                                Ok(_) | Err(_) => return Action::Close,
                            }
                        }
                    }
                }
                rt.register(stream, Interest::READABLE, Back).unwrap();
                true
            }
        }

        rt.register_listener(listener, Echo).unwrap();

        let client = thread::spawn(move || {
            let mut c = StdStream::connect(("127.0.0.1", port)).unwrap();
            c.write_all(b"hello").unwrap();
            let mut buf = [0u8; 5];
            c.read_exact(&mut buf).unwrap();
            buf
        });

        let deadline = Instant::now() + Duration::from_secs(5);
        while !client.is_finished() {
            assert!(Instant::now() < deadline, "echo roundtrip stalled");
            rt.run_once(Some(Duration::from_millis(20))).unwrap();
        }
        assert_eq!(&client.join().unwrap(), b"hello");
        assert_eq!(rt.stats().accepts, 1);
    }

    #[test]
    fn test_supply_reuse_discards_previous_state() {
        let mut rt = test_reactor();
        let listener = Listener::bind("127.0.0.1:0", 16).unwrap();
        let port = listener.local_endpoint().unwrap().port().unwrap();

        // A dirty stream: open pipe with buffered leftovers.
        let (r, w) = pipe_pair().unwrap();
        write_fd(w, b"stale");
        let mut dirty = pipe_stream(r);
        let mut tmp = [0u8; 2];
        // Pull the bytes into the stream buffer so reuse has state to shed.
        dirty.set_read_timeout(Some(Duration::from_millis(100)));
        let _ = dirty.read(&mut tmp);
        dirty.set_write_timeout(Some(Duration::from_millis(1)));

        let accepted = Rc::new(RefCell::new(Vec::new()));
        rt.register_listener(
            listener,
            Acceptor {
                accepted: Rc::clone(&accepted),
                keep_going: true,
                stash: Some(dirty),
            },
        )
        .unwrap();

        let client = thread::spawn(move || {
            let _c = StdStream::connect(("127.0.0.1", port)).unwrap();
            thread::sleep(Duration::from_millis(50));
        });
        let accepted2 = Rc::clone(&accepted);
        drive_until(&mut rt, 5, move || !accepted2.borrow().is_empty());
        client.join().unwrap();

        let got = accepted.borrow();
        let s = &got[0];
        assert!(s.is_open());
        assert_eq!(s.buffered(), 0, "recycled stream must not leak old bytes");
        assert_eq!(s.staged(), 0);
        assert!(s.read_timeout().is_none(), "timeouts reset to listener's");
        assert!(s.peer_endpoint().is_some());
        unsafe { libc::close(w) };
    }

    #[test]
    fn test_on_accept_false_pauses_until_resumed() {
        let mut rt = test_reactor();
        let listener = Listener::bind("127.0.0.1:0", 16).unwrap();
        let port = listener.local_endpoint().unwrap().port().unwrap();

        let accepted = Rc::new(RefCell::new(Vec::new()));
        let lid = rt
            .register_listener(
                listener,
                Acceptor {
                    accepted: Rc::clone(&accepted),
                    keep_going: false,
                    stash: None,
                },
            )
            .unwrap();

        let mut c1 = StdStream::connect(("127.0.0.1", port)).unwrap();
        let accepted2 = Rc::clone(&accepted);
        drive_until(&mut rt, 5, move || !accepted2.borrow().is_empty());
        assert_eq!(accepted.borrow().len(), 1);

        // Paused: the second client queues in the backlog.
        let c2 = StdStream::connect(("127.0.0.1", port)).unwrap();
        for _ in 0..5 {
            rt.run_once(Some(Duration::from_millis(10))).unwrap();
        }
        assert_eq!(accepted.borrow().len(), 1, "paused listener must not accept");

        // The connection accepted before the pause keeps being served.
        let first = accepted.borrow_mut().remove(0);
        let seen = Rc::new(RefCell::new(Vec::new()));
        rt.register(
            first,
            Interest::READABLE,
            Recorder {
                seen: Rc::clone(&seen),
                verdict: Action::Rearm(Interest::READABLE),
            },
        )
        .unwrap();
        c1.write_all(b"ping").unwrap();
        let seen2 = Rc::clone(&seen);
        drive_until(&mut rt, 5, move || !seen2.borrow().is_empty());
        assert_eq!(seen.borrow()[0], 4);
        assert_eq!(accepted.borrow().len(), 0, "still paused");

        rt.resume_accept(lid).unwrap();
        let accepted2 = Rc::clone(&accepted);
        drive_until(&mut rt, 5, move || accepted2.borrow().len() == 1);

        drop(c1);
        drop(c2);
    }

    #[test]
    fn test_stop_from_callback_ends_run() {
        let mut rt = test_reactor();
        let listener = Listener::bind("127.0.0.1:0", 16).unwrap();
        let port = listener.local_endpoint().unwrap().port().unwrap();

        struct StopOnAccept;
        impl AcceptHandler for StopOnAccept {
            fn on_accept(&mut self, rt: &mut Reactor, _stream: Stream) -> bool {
                rt.stop();
                true
            }
        }
        rt.register_listener(listener, StopOnAccept).unwrap();

        let client = thread::spawn(move || {
            let _c = StdStream::connect(("127.0.0.1", port)).unwrap();
            thread::sleep(Duration::from_millis(100));
        });

        rt.run(Some(Duration::from_millis(50))).unwrap();
        assert!(rt.stopped());
        client.join().unwrap();
    }

    // ===== Connect dispatch =====

    #[test]
    fn test_connect_resolves_ok() {
        let mut rt = test_reactor();
        let server = StdListener::bind("127.0.0.1:0").unwrap();
        let addr = format!("127.0.0.1:{}", server.local_addr().unwrap().port());

        let result: Rc<RefCell<Option<Result<u16, ConnectError>>>> = Rc::new(RefCell::new(None));
        let result2 = Rc::clone(&result);
        rt.connect(
            &addr,
            Some(Duration::from_secs(2)),
            move |rt: &mut Reactor, res: Result<Stream, ConnectError>| {
                *result2.borrow_mut() = Some(res.map(|s| {
                    s.peer_endpoint().and_then(|e| e.port()).unwrap_or(0)
                }));
                rt.stop();
            },
        )
        .unwrap();

        let result2 = Rc::clone(&result);
        drive_until(&mut rt, 5, move || result2.borrow().is_some());
        let got = result.borrow_mut().take().unwrap().unwrap();
        assert_eq!(got, server.local_addr().unwrap().port());
        assert_eq!(rt.live_count(), 0, "resolved connect releases its slot");
        assert_eq!(rt.timer_count(), 0, "guard timer cancelled on resolution");
    }

    #[test]
    fn test_connect_refused_reports_error() {
        let mut rt = test_reactor();
        // Grab an ephemeral port and release it so nothing listens there.
        let port = {
            let l = StdListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };

        let result: Rc<RefCell<Option<Result<(), ConnectError>>>> = Rc::new(RefCell::new(None));
        let result2 = Rc::clone(&result);
        let started = rt.connect(
            &format!("127.0.0.1:{}", port),
            Some(Duration::from_secs(2)),
            move |_rt: &mut Reactor, res: Result<Stream, ConnectError>| {
                *result2.borrow_mut() = Some(res.map(|_| ()));
            },
        );
        if started.is_err() {
            // Loopback refusals can surface synchronously from connect().
            return;
        }

        let result2 = Rc::clone(&result);
        drive_until(&mut rt, 5, move || result2.borrow().is_some());
        let got = result.borrow_mut().take().unwrap();
        assert!(got.is_err(), "connect to dead port must fail");
    }

    #[test]
    fn test_connect_timeout_is_bounded() {
        let mut rt = test_reactor();
        // Non-routable test address; the attempt can only hang or bounce.
        let result: Rc<RefCell<Option<Result<(), ConnectError>>>> = Rc::new(RefCell::new(None));
        let result2 = Rc::clone(&result);
        let started = Instant::now();
        let res = rt.connect(
            "10.255.255.1:9",
            Some(Duration::from_millis(200)),
            move |_rt: &mut Reactor, res: Result<Stream, ConnectError>| {
                *result2.borrow_mut() = Some(res.map(|_| ()));
            },
        );
        if res.is_err() {
            // Some environments reject the route at connect() time; that
            // is already the bounded failure we want.
            return;
        }

        let result2 = Rc::clone(&result);
        drive_until(&mut rt, 5, move || result2.borrow().is_some());
        let got = result.borrow_mut().take().unwrap();
        assert!(got.is_err());
        assert!(started.elapsed() < Duration::from_secs(4));
        assert_eq!(rt.live_count(), 0);
    }

    // ===== Run loop =====

    #[test]
    fn test_run_returns_when_empty() {
        let mut rt = test_reactor();
        // Nothing registered, no timers: run must not hang.
        rt.run(Some(Duration::from_millis(10))).unwrap();

        // With one short timer it runs until the timer fires, then the
        // reactor is empty again and run returns.
        let fired = Rc::new(RefCell::new(false));
        let fired2 = Rc::clone(&fired);
        rt.set_timer(Duration::from_millis(10), move |_rt, _| {
            *fired2.borrow_mut() = true;
        });
        rt.run(Some(Duration::from_millis(20))).unwrap();
        assert!(*fired.borrow());
    }

    #[test]
    fn test_stale_event_after_close_is_dropped() {
        let mut rt = test_reactor();
        let (r, w) = pipe_pair().unwrap();
        let (r2, w2) = pipe_pair().unwrap();
        let seen = Rc::new(RefCell::new(Vec::new()));

        // Two readable streams; the first handler closes the SECOND's
        // registration, so the second's queued event goes stale within
        // the same round.
        struct CloseOther {
            other: Rc<RefCell<Option<StreamId>>>,
        }
        impl StreamHandler for CloseOther {
            fn on_readable(&mut self, rt: &mut Reactor, _id: StreamId, stream: &mut Stream) -> Action {
                let mut buf = [0u8; 8];
                let _ = stream.read(&mut buf);
                if let Some(other) = self.other.borrow_mut().take() {
                    drop(rt.deregister(other));
                }
                Action::Close
            }
        }

        let other_id = Rc::new(RefCell::new(None));
        rt.register(
            pipe_stream(r),
            Interest::READABLE,
            CloseOther { other: Rc::clone(&other_id) },
        )
        .unwrap();
        let id2 = rt
            .register(
                pipe_stream(r2),
                Interest::READABLE,
                Recorder { seen: Rc::clone(&seen), verdict: Action::Idle },
            )
            .unwrap();
        *other_id.borrow_mut() = Some(id2);

        write_fd(w, b"a");
        write_fd(w2, b"b");

        let deadline = Instant::now() + Duration::from_secs(5);
        while rt.live_count() > 0 && Instant::now() < deadline {
            rt.run_once(Some(Duration::from_millis(20))).unwrap();
        }
        assert_eq!(rt.live_count(), 0);
        // Depending on event ordering the second stream may never get
        // dispatched; it must never be dispatched AFTER its close.
        assert!(seen.borrow().len() <= 1);

        unsafe {
            libc::close(w);
            libc::close(w2);
        }
    }
}
