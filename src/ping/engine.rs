//! The ping engine and inbound dispatcher.
//!
//! [`IcmpStack`] orchestrates one-shot blocking pings and at most one
//! background continuous session over a shared 16-slot pending table. The
//! table, the continuous session handle, and the session statistics live
//! behind a single mutex; allocate, match, free, and sweep are each one
//! atomic region under it. Inbound datagrams enter through
//! [`deliver`](IcmpStack::deliver), called by the IP layer.

use log::{debug, warn};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::{PingConfig, DEFAULT_COUNT, DEFAULT_TIMEOUT};
use crate::error::IcmpError;
use crate::ping::pending::{AllocResult, EchoOutcome, PendingEcho, PendingTable};
use crate::ping::stats::PingStats;
use crate::transport::IpTransport;
use crate::wire::checksum;
use crate::wire::message::{
    self, EchoKind, ErrorKind, IcmpMessage, CODE_NET_UNKNOWN, CODE_NET_UNREACHABLE,
    ICMP_HEADER_LEN, ICMP_PROTOCOL, MAX_ECHO_DATA, TYPE_ECHO_REQUEST,
};

/// Delay between retries when the table is at capacity
const BUSY_RETRY_DELAY: Duration = Duration::from_millis(20);
/// Period of the continuous session's expiry sweep
const SWEEP_PERIOD: Duration = Duration::from_millis(250);

/// A running continuous session: its identity plus the handles needed to
/// cancel and drain its send and sweep tasks.
struct ContinuousSession {
    destination: Ipv4Addr,
    identifier: u16,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

/// Everything covered by the engine's mutual-exclusion domain.
struct EngineState {
    table: PendingTable,
    session: Option<ContinuousSession>,
    stats: PingStats,
}

#[derive(Debug, Default)]
struct Counters {
    rx_total: AtomicU64,
    rx_echo_request: AtomicU64,
    rx_echo_reply: AtomicU64,
    rx_errors: AtomicU64,
    rx_dropped: AtomicU64,
    tx_total: AtomicU64,
}

/// Point-in-time view of the stack's delivery counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StackCounters {
    pub rx_total: u64,
    pub rx_echo_request: u64,
    pub rx_echo_reply: u64,
    pub rx_errors: u64,
    pub rx_dropped: u64,
    pub tx_total: u64,
}

impl fmt::Display for StackCounters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rx {} (echo req {}, echo reply {}, errors {}, dropped {}), tx {}",
            self.rx_total,
            self.rx_echo_request,
            self.rx_echo_reply,
            self.rx_errors,
            self.rx_dropped,
            self.tx_total
        )
    }
}

/// The ICMP layer: packet sends, inbound dispatch, and the ping engine.
pub struct IcmpStack {
    transport: Arc<dyn IpTransport>,
    config: PingConfig,
    state: Mutex<EngineState>,
    next_ident: AtomicU16,
    counters: Counters,
}

impl IcmpStack {
    pub fn new(transport: Arc<dyn IpTransport>, config: PingConfig) -> Arc<Self> {
        // Placeholder until the first session starts
        let mut stats = PingStats::new(Ipv4Addr::UNSPECIFIED);
        stats.active = false;

        Arc::new(Self {
            transport,
            config,
            state: Mutex::new(EngineState {
                table: PendingTable::new(),
                session: None,
                stats,
            }),
            next_ident: AtomicU16::new(std::process::id() as u16),
            counters: Counters::default(),
        })
    }

    /// Distinct per session so concurrent sessions cannot cross-match.
    fn next_identifier(&self) -> u16 {
        self.next_ident.fetch_add(1, Ordering::Relaxed)
    }

    pub fn counters(&self) -> StackCounters {
        StackCounters {
            rx_total: self.counters.rx_total.load(Ordering::Relaxed),
            rx_echo_request: self.counters.rx_echo_request.load(Ordering::Relaxed),
            rx_echo_reply: self.counters.rx_echo_reply.load(Ordering::Relaxed),
            rx_errors: self.counters.rx_errors.load(Ordering::Relaxed),
            rx_dropped: self.counters.rx_dropped.load(Ordering::Relaxed),
            tx_total: self.counters.tx_total.load(Ordering::Relaxed),
        }
    }

    // ---- raw send primitives ----

    pub fn send_echo_request(
        &self,
        destination: Ipv4Addr,
        identifier: u16,
        sequence: u16,
        payload: &[u8],
    ) -> Result<(), IcmpError> {
        if payload.len() > MAX_ECHO_DATA {
            return Err(IcmpError::InvalidArgument);
        }
        self.send_message(
            destination,
            &IcmpMessage::Echo {
                kind: EchoKind::Request,
                identifier,
                sequence,
                payload: payload.to_vec(),
            },
        )
    }

    pub fn send_echo_reply(
        &self,
        destination: Ipv4Addr,
        identifier: u16,
        sequence: u16,
        payload: &[u8],
    ) -> Result<(), IcmpError> {
        if payload.len() > MAX_ECHO_DATA {
            return Err(IcmpError::InvalidArgument);
        }
        self.send_message(
            destination,
            &IcmpMessage::Echo {
                kind: EchoKind::Reply,
                identifier,
                sequence,
                payload: payload.to_vec(),
            },
        )
    }

    /// Report an undeliverable datagram back to its source, quoting its IP
    /// header and first 8 payload bytes per RFC 792.
    pub fn send_dest_unreachable(
        &self,
        destination: Ipv4Addr,
        original_datagram: &[u8],
        code: u8,
    ) -> Result<(), IcmpError> {
        self.send_error(destination, ErrorKind::DestUnreachable(code), original_datagram)
    }

    pub fn send_time_exceeded(
        &self,
        destination: Ipv4Addr,
        original_datagram: &[u8],
        code: u8,
    ) -> Result<(), IcmpError> {
        self.send_error(destination, ErrorKind::TimeExceeded(code), original_datagram)
    }

    fn send_error(
        &self,
        destination: Ipv4Addr,
        kind: ErrorKind,
        original_datagram: &[u8],
    ) -> Result<(), IcmpError> {
        let (header, payload) = message::split_quoted_datagram(original_datagram);
        self.send_message(
            destination,
            &IcmpMessage::Error {
                kind,
                original_header: header.to_vec(),
                original_payload: payload.to_vec(),
            },
        )
    }

    fn send_message(&self, destination: Ipv4Addr, msg: &IcmpMessage) -> Result<(), IcmpError> {
        let bytes = msg.encode_vec();
        self.transport
            .send_packet(destination, &bytes)
            .map_err(|e| IcmpError::Send(e.to_string()))?;
        self.counters.tx_total.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    // ---- one-shot ping ----

    /// Send `count` echo requests and wait for each reply in turn.
    ///
    /// `count` 0 means the default of 4; `timeout_ms` 0 means the default
    /// of 1000. Each sequence number is sent exactly once; a lost request
    /// shows up only in the returned statistics. The call itself fails only
    /// when it cannot begin or the underlying send fails.
    pub async fn ping(
        &self,
        destination: Ipv4Addr,
        count: u32,
        timeout_ms: u64,
    ) -> Result<PingStats, IcmpError> {
        if destination.is_unspecified() || destination.is_broadcast() {
            return Err(IcmpError::InvalidArgument);
        }
        if self.config.payload_size > MAX_ECHO_DATA {
            return Err(IcmpError::InvalidArgument);
        }
        let count = if count == 0 { DEFAULT_COUNT } else { count };
        let timeout = if timeout_ms == 0 {
            DEFAULT_TIMEOUT
        } else {
            Duration::from_millis(timeout_ms)
        };
        let identifier = self.next_identifier();
        let payload = echo_payload(self.config.payload_size);
        let mut stats = PingStats::new(destination);

        for i in 0..count {
            let sequence = i as u16;
            let mut rx = self
                .allocate_with_retry(destination, identifier, sequence, timeout)
                .await?;

            if let Err(e) = self.send_echo_request(destination, identifier, sequence, &payload) {
                self.release_slot(destination, identifier, sequence);
                return Err(e);
            }
            stats.record_sent();

            let iteration_start = Instant::now();
            let outcome = match tokio::time::timeout(timeout, &mut rx).await {
                Ok(Ok(outcome)) => outcome,
                // Waiter vanished with the slot; count it as lost
                Ok(Err(_)) => EchoOutcome::TimedOut,
                Err(_) => {
                    // Deadline elapsed. A reply can still land between the
                    // timer firing and the sweep taking the lock, in which
                    // case the waiter already holds the outcome.
                    self.sweep(timeout);
                    match rx.try_recv() {
                        Ok(outcome) => outcome,
                        Err(_) => {
                            self.release_slot(destination, identifier, sequence);
                            EchoOutcome::TimedOut
                        }
                    }
                }
            };

            match outcome {
                EchoOutcome::Replied { rtt } => stats.record_reply(rtt),
                EchoOutcome::TimedOut => stats.record_lost(),
                EchoOutcome::Failed(e) => {
                    debug!("echo to {} seq {} failed: {}", destination, sequence, e);
                    stats.record_error();
                }
            }

            if i + 1 != count {
                let wait = self.config.interval.saturating_sub(iteration_start.elapsed());
                if !wait.is_zero() {
                    tokio::time::sleep(wait).await;
                }
            }
        }

        stats.finalize();
        Ok(stats)
    }

    /// Reserve a table slot, retrying `Busy` until the request deadline.
    async fn allocate_with_retry(
        &self,
        destination: Ipv4Addr,
        identifier: u16,
        sequence: u16,
        timeout: Duration,
    ) -> Result<oneshot::Receiver<EchoOutcome>, IcmpError> {
        let deadline = Instant::now() + timeout;
        loop {
            let (tx, rx) = oneshot::channel();
            match self.try_allocate(destination, identifier, sequence, Some(tx), timeout) {
                Ok(()) => return Ok(rx),
                Err(IcmpError::Busy) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(IcmpError::Busy);
                    }
                    tokio::time::sleep(BUSY_RETRY_DELAY.min(deadline - now)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn try_allocate(
        &self,
        destination: Ipv4Addr,
        identifier: u16,
        sequence: u16,
        waiter: Option<oneshot::Sender<EchoOutcome>>,
        timeout: Duration,
    ) -> Result<(), IcmpError> {
        let now = Instant::now();
        let mut state = self.state.lock();
        let AllocResult { slot, expired } =
            state
                .table
                .allocate(destination, identifier, sequence, waiter, now, timeout);
        Self::reap(&mut state, expired);
        match slot {
            Some(_) => Ok(()),
            None => Err(IcmpError::Busy),
        }
    }

    /// Free one slot after a failed send. No statistics change.
    fn release_slot(&self, destination: Ipv4Addr, identifier: u16, sequence: u16) {
        let mut state = self.state.lock();
        if let Some(handle) = state.table.match_reply(destination, identifier, sequence) {
            state.table.free(handle);
        }
    }

    /// Reclaim expired slots and account each exactly once.
    fn sweep(&self, timeout: Duration) {
        let now = Instant::now();
        let mut state = self.state.lock();
        let expired = state.table.sweep_expired(now, timeout);
        Self::reap(&mut state, expired);
    }

    fn reap(state: &mut EngineState, reclaimed: Vec<PendingEcho>) {
        for entry in reclaimed {
            match entry.waiter {
                Some(tx) => {
                    let _ = tx.send(EchoOutcome::TimedOut);
                }
                None => state.stats.record_lost(),
            }
        }
    }

    // ---- continuous ping ----

    /// Start the background session: a recurring send and a recurring
    /// expiry sweep. Returns immediately; fails `Busy` while another
    /// continuous session is running.
    pub fn ping_start(self: &Arc<Self>, destination: Ipv4Addr) -> Result<(), IcmpError> {
        if destination.is_unspecified() || destination.is_broadcast() {
            return Err(IcmpError::InvalidArgument);
        }
        let identifier = self.next_identifier();

        let mut state = self.state.lock();
        if state.session.is_some() {
            return Err(IcmpError::Busy);
        }
        state.stats = PingStats::new(destination);

        let cancel = CancellationToken::new();
        let sender = tokio::spawn(Arc::clone(self).continuous_send_loop(
            destination,
            identifier,
            cancel.clone(),
        ));
        let sweeper = tokio::spawn(Arc::clone(self).continuous_sweep_loop(cancel.clone()));
        state.session = Some(ContinuousSession {
            destination,
            identifier,
            cancel,
            tasks: vec![sender, sweeper],
        });
        Ok(())
    }

    /// Stop the background session, drain its tasks, run a final reclaim,
    /// and finalize statistics. The last snapshot stays readable until the
    /// next `ping_start`.
    pub async fn ping_stop(&self) -> Result<(), IcmpError> {
        let session = self.state.lock().session.take();
        let Some(session) = session else {
            return Err(IcmpError::InvalidArgument);
        };

        session.cancel.cancel();
        // Synchronize with any in-flight send or sweep before finalizing
        for task in session.tasks {
            let _ = task.await;
        }

        let mut state = self.state.lock();
        let leftover = state
            .table
            .purge_session(session.destination, session.identifier);
        for entry in leftover {
            if entry.waiter.is_none() {
                state.stats.record_lost();
            }
        }
        state.stats.finalize();
        Ok(())
    }

    /// Snapshot of the running session, or of the last stopped one.
    pub fn ping_get_stats(&self) -> PingStats {
        self.state.lock().stats.snapshot()
    }

    pub fn ping_is_active(&self) -> bool {
        self.state.lock().session.is_some()
    }

    async fn continuous_send_loop(
        self: Arc<Self>,
        destination: Ipv4Addr,
        identifier: u16,
        cancel: CancellationToken,
    ) {
        let payload = echo_payload(self.config.payload_size);
        let timeout = self.config.timeout;
        let mut sequence: u16 = 0;
        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    match self.try_allocate(destination, identifier, sequence, None, timeout) {
                        Ok(()) => {
                            if let Err(e) =
                                self.send_echo_request(destination, identifier, sequence, &payload)
                            {
                                self.release_slot(destination, identifier, sequence);
                                warn!("echo request to {} failed: {}", destination, e);
                            } else {
                                self.state.lock().stats.record_sent();
                            }
                        }
                        // Table full: skip this tick rather than queue
                        Err(e) => warn!("skipping echo request to {}: {}", destination, e),
                    }
                    sequence = sequence.wrapping_add(1);
                }
            }
        }
    }

    async fn continuous_sweep_loop(self: Arc<Self>, cancel: CancellationToken) {
        let timeout = self.config.timeout;
        let mut interval = tokio::time::interval(SWEEP_PERIOD);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => self.sweep(timeout),
            }
        }
    }

    // ---- inbound dispatch ----

    /// Entry point for inbound ICMP datagrams from the IP layer.
    ///
    /// Malformed or checksum-failing input is dropped with a debug log and
    /// no state change.
    pub fn deliver(&self, src: Ipv4Addr, bytes: &[u8]) {
        self.counters.rx_total.fetch_add(1, Ordering::Relaxed);

        if !checksum::verify(bytes) {
            self.counters.rx_dropped.fetch_add(1, Ordering::Relaxed);
            debug!("dropped ICMP datagram from {} with bad checksum", src);
            return;
        }
        let msg = match IcmpMessage::decode(bytes) {
            Ok(msg) => msg,
            Err(e) => {
                self.counters.rx_dropped.fetch_add(1, Ordering::Relaxed);
                debug!("dropped ICMP datagram from {}: {}", src, e);
                return;
            }
        };

        match msg {
            IcmpMessage::Echo {
                kind: EchoKind::Request,
                identifier,
                sequence,
                payload,
            } => {
                self.counters.rx_echo_request.fetch_add(1, Ordering::Relaxed);
                // Stateless turnaround: never consults the pending table
                if let Err(e) = self.send_echo_reply(src, identifier, sequence, &payload) {
                    warn!("echo reply to {} failed: {}", src, e);
                }
            }
            IcmpMessage::Echo {
                kind: EchoKind::Reply,
                identifier,
                sequence,
                ..
            } => {
                self.counters.rx_echo_reply.fetch_add(1, Ordering::Relaxed);
                self.handle_echo_reply(src, identifier, sequence);
            }
            IcmpMessage::Error {
                kind,
                original_header,
                original_payload,
            } => {
                self.counters.rx_errors.fetch_add(1, Ordering::Relaxed);
                self.handle_error_message(src, kind, &original_header, &original_payload);
            }
            IcmpMessage::Generic { msg_type, .. } => {
                debug!(
                    "ignoring ICMP type {} ({}) from {}",
                    msg_type,
                    message::type_name(msg_type),
                    src
                );
            }
        }
    }

    fn handle_echo_reply(&self, src: Ipv4Addr, identifier: u16, sequence: u16) {
        let now = Instant::now();
        let mut state = self.state.lock();
        let Some(handle) = state.table.match_reply(src, identifier, sequence) else {
            debug!(
                "unmatched echo reply from {} (id {:#06x}, seq {})",
                src, identifier, sequence
            );
            return;
        };
        let Some(entry) = state.table.free(handle) else {
            return;
        };
        let rtt = now.duration_since(entry.send_time);
        match entry.waiter {
            Some(tx) => {
                let _ = tx.send(EchoOutcome::Replied { rtt });
            }
            None => state.stats.record_reply(rtt),
        }
    }

    fn handle_error_message(
        &self,
        src: Ipv4Addr,
        kind: ErrorKind,
        original_header: &[u8],
        original_payload: &[u8],
    ) {
        match kind {
            ErrorKind::DestUnreachable(code) => debug!(
                "destination unreachable from {}: {}",
                src,
                message::unreachable_code_name(code)
            ),
            ErrorKind::TimeExceeded(code) => {
                debug!("time exceeded from {} (code {})", src, code)
            }
        }

        // Correlate only when the quoted datagram carries one of our echoes
        let Some((orig_dest, protocol)) = message::quoted_destination(original_header) else {
            return;
        };
        if protocol != ICMP_PROTOCOL
            || original_payload.len() < ICMP_HEADER_LEN
            || original_payload[0] != TYPE_ECHO_REQUEST
        {
            return;
        }
        let identifier = u16::from_be_bytes([original_payload[4], original_payload[5]]);
        let sequence = u16::from_be_bytes([original_payload[6], original_payload[7]]);

        let mut state = self.state.lock();
        let Some(handle) = state.table.match_reply(orig_dest, identifier, sequence) else {
            return;
        };
        let Some(entry) = state.table.free(handle) else {
            return;
        };
        match entry.waiter {
            Some(tx) => {
                let _ = tx.send(EchoOutcome::Failed(report_error(kind)));
            }
            None => state.stats.record_error(),
        }
    }
}

/// Error kind surfaced to the request that an inbound error message names.
fn report_error(kind: ErrorKind) -> IcmpError {
    match kind {
        ErrorKind::DestUnreachable(CODE_NET_UNREACHABLE | CODE_NET_UNKNOWN) => IcmpError::NoRoute,
        ErrorKind::DestUnreachable(_) => IcmpError::Unreachable,
        ErrorKind::TimeExceeded(_) => IcmpError::Unreachable,
    }
}

/// Pattern-filled echo payload
fn echo_payload(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i & 0xFF) as u8).collect()
}
