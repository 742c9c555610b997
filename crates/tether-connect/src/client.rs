//! ConnectionClient: owns the live connection and everything that feeds it
//!
//! Producers call [`ConnectionClient::send_event`] from any thread. Until the
//! connection is authenticated, events wait in a bounded drop-oldest queue;
//! afterwards they are batched or sent directly. Each connection attempt gets
//! a generation number and one driver task that consumes the transport's
//! events in order, so a late event from a superseded connection can never
//! touch the current one.
//!
//! ```text
//! Closed -> Connecting -> Open -> Authenticating -> Authenticated
//!    ^                                                   |
//!    +---- failure: record on breaker, schedule retry ---+
//! ```
//!
//! Reconnects run on a single background task at a time. Every attempt,
//! scheduled or manual, first asks the circuit breaker for permission.

use crate::error::{DeliveryError, DeliveryResult};
use crate::metrics::{ClientCounters, ClientMetrics, ReconnectMetrics};
use crate::protocol::{Envelope, InboundSignal};
use crate::settings::{ClientSettings, EventFilter, SettingsProvider};
use crate::state::{AtomicConnectionState, ConnectionState};
use crate::transport::{OutboundFrame, Transport, TransportEvent, TransportLink};
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak,
};
use std::time::Duration;
use tether_core_queue::{
    BatchRejected, BatcherError, BoundedEventQueue, EventBatcher, QueueMetrics, QueuedEvent,
};
use tether_core_resilience::{
    AdmissionGate, CircuitBreaker, RateLimiter, ReconnectSchedule, UnlimitedGate,
};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Shortest wait between re-checks of an open breaker
const MIN_DEFER: Duration = Duration::from_millis(10);

/// What happened to an event handed to [`ConnectionClient::send_event`]
///
/// Informational only; none of these is an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Written to the live connection as an EVENT envelope
    Transmitted,
    /// Added to the pending batch
    Batched,
    /// Held in the queue until the next authenticated connection
    Queued,
    /// Rejected by the event filter
    Filtered,
    /// Rejected by the admission gate
    RateLimited,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn gate_from_settings(settings: &ClientSettings) -> DeliveryResult<Arc<dyn AdmissionGate>> {
    match settings.admission {
        Some(admission) => {
            let limiter = RateLimiter::try_new(admission.max_events, admission.window)
                .map_err(|e| DeliveryError::Configuration(e.to_string()))?;
            Ok(Arc::new(limiter))
        }
        None => Ok(Arc::new(UnlimitedGate)),
    }
}

/// Builder for [`ConnectionClient`]
pub struct ClientBuilder {
    provider: Arc<dyn SettingsProvider>,
    transport: Arc<dyn Transport>,
    filter: Option<Arc<dyn EventFilter>>,
    gate: Option<Arc<dyn AdmissionGate>>,
}

impl ClientBuilder {
    /// Drop events the filter rejects before they reach the gate
    pub fn filter(mut self, filter: Arc<dyn EventFilter>) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Use this gate instead of one built from the admission settings
    pub fn admission_gate(mut self, gate: Arc<dyn AdmissionGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Build the client on the current tokio runtime
    ///
    /// The queue is sized from the provider's settings at this point and
    /// keeps that capacity for the life of the client.
    pub fn build(self) -> DeliveryResult<ConnectionClient> {
        let runtime = Handle::try_current().map_err(|_| DeliveryError::NoRuntime)?;
        let settings = self.provider.settings();

        let queue = BoundedEventQueue::new(settings.queue_capacity)
            .map_err(|e| DeliveryError::Configuration(e.to_string()))?;
        let custom_gate = self.gate.is_some();
        let gate = match self.gate {
            Some(gate) => gate,
            None => gate_from_settings(&settings)?,
        };

        let inner = Arc::new(ClientInner {
            provider: self.provider,
            transport: self.transport,
            filter: self.filter,
            gate: RwLock::new(gate),
            custom_gate,
            runtime,
            breaker: RwLock::new(CircuitBreaker::new(settings.breaker.clone())),
            schedule: Mutex::new(ReconnectSchedule::new(settings.backoff.clone())),
            settings: RwLock::new(settings),
            state: AtomicConnectionState::new(ConnectionState::Closed),
            generation: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            lifecycle: Mutex::new(()),
            queue,
            batcher: RwLock::new(None),
            link: RwLock::new(None),
            reconnect_in_flight: AtomicBool::new(false),
            reconnect_task: Mutex::new(None),
            counters: ClientCounters::default(),
        });

        Ok(ConnectionClient { inner })
    }
}

/// Resources of the connection currently in use
struct ActiveLink {
    generation: u64,
    outbound: mpsc::UnboundedSender<OutboundFrame>,
    cancel: CancellationToken,
}

struct ClientInner {
    provider: Arc<dyn SettingsProvider>,
    transport: Arc<dyn Transport>,
    filter: Option<Arc<dyn EventFilter>>,
    gate: RwLock<Arc<dyn AdmissionGate>>,
    custom_gate: bool,
    runtime: Handle,

    /// Snapshot taken on the last initialize/reconnect
    settings: RwLock<ClientSettings>,
    state: AtomicConnectionState,
    generation: AtomicU64,
    closed: AtomicBool,
    /// Serializes connect, reconnect, close and scheduled attempts
    lifecycle: Mutex<()>,

    queue: BoundedEventQueue,
    batcher: RwLock<Option<Arc<EventBatcher>>>,

    breaker: RwLock<CircuitBreaker>,
    schedule: Mutex<ReconnectSchedule>,
    link: RwLock<Option<ActiveLink>>,
    reconnect_in_flight: AtomicBool,
    reconnect_task: Mutex<Option<JoinHandle<()>>>,

    counters: ClientCounters,
}

impl ClientInner {
    fn breaker(&self) -> CircuitBreaker {
        read(&self.breaker).clone()
    }

    fn load_settings(&self) -> DeliveryResult<ClientSettings> {
        let settings = self.provider.settings();
        if !self.provider.is_valid() {
            return Err(DeliveryError::Configuration(
                "settings provider reports invalid settings".to_string(),
            ));
        }
        settings.validate()?;
        Ok(settings)
    }

    fn apply_settings(self: &Arc<Self>, settings: ClientSettings) -> DeliveryResult<()> {
        if !self.custom_gate {
            *write(&self.gate) = gate_from_settings(&settings)?;
        }

        {
            let mut breaker = write(&self.breaker);
            if breaker.config() != &settings.breaker {
                *breaker = CircuitBreaker::new(settings.breaker.clone());
            }
        }

        {
            let mut schedule = lock(&self.schedule);
            if schedule.config() != &settings.backoff {
                schedule.reconfigure(settings.backoff.clone());
            }
        }

        *write(&self.settings) = settings.clone();
        self.replace_batcher(&settings)
    }

    fn replace_batcher(self: &Arc<Self>, settings: &ClientSettings) -> DeliveryResult<()> {
        let previous = write(&self.batcher).take();
        if let Some(previous) = previous {
            previous.shutdown();
        }

        if !settings.batching_enabled {
            return Ok(());
        }

        let weak: Weak<ClientInner> = Arc::downgrade(self);
        let sink = move |batch: Vec<QueuedEvent>| -> Result<(), BatchRejected> {
            match weak.upgrade() {
                Some(inner) => inner.deliver_batch(batch),
                None => Err(BatchRejected::new(batch.len(), "client dropped")),
            }
        };

        let batcher = {
            let _runtime = self.runtime.enter();
            EventBatcher::start(settings.batcher.clone(), Arc::new(sink))
                .map_err(|e| DeliveryError::Configuration(e.to_string()))?
        };
        *write(&self.batcher) = Some(Arc::new(batcher));
        Ok(())
    }

    fn initialize(self: &Arc<Self>) -> DeliveryResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DeliveryError::Closed);
        }
        let settings = self.load_settings()?;
        let enabled = settings.enabled;
        self.apply_settings(settings)?;

        if !enabled {
            info!("Event delivery disabled by settings, not connecting");
            return Ok(());
        }
        self.connect()
    }

    fn connect(self: &Arc<Self>) -> DeliveryResult<()> {
        let _lifecycle = lock(&self.lifecycle);
        if self.closed.load(Ordering::SeqCst) {
            return Err(DeliveryError::Closed);
        }

        match self.state.load() {
            ConnectionState::Connecting
            | ConnectionState::Open
            | ConnectionState::Authenticating
            | ConnectionState::Authenticated => {
                debug!(state = %self.state.load(), "Already connecting or connected");
                return Ok(());
            }
            _ => {}
        }

        self.cancel_reconnect();

        if !self.breaker().allow_connection() {
            debug!("Circuit breaker refused connection attempt");
            self.schedule_reconnect();
            return Err(DeliveryError::CircuitOpen);
        }

        self.open_connection()
    }

    fn reconnect(self: &Arc<Self>) -> DeliveryResult<()> {
        let settings = self.load_settings()?;
        {
            let _lifecycle = lock(&self.lifecycle);
            if self.closed.load(Ordering::SeqCst) {
                return Err(DeliveryError::Closed);
            }
            self.cancel_reconnect();
            self.detach_link(None, true);
        }

        let enabled = settings.enabled;
        self.apply_settings(settings)?;
        self.breaker().reset();
        lock(&self.schedule).reset();
        info!("Manual reconnect requested");

        if !enabled {
            info!("Event delivery disabled by settings, not connecting");
            return Ok(());
        }
        self.connect()
    }

    fn close(&self) {
        {
            let _lifecycle = lock(&self.lifecycle);
            if self.closed.swap(true, Ordering::SeqCst) {
                return;
            }
            self.cancel_reconnect();
        }

        // Final batch goes out while the connection is still live
        let batcher = write(&self.batcher).take();
        if let Some(batcher) = batcher {
            batcher.shutdown();
        }

        self.state.store(ConnectionState::Closing);
        self.detach_link(None, true);

        info!(
            queued = self.queue.size(),
            "Connection client closed"
        );
    }

    /// Start a transport connection; the caller holds the lifecycle lock
    fn open_connection(self: &Arc<Self>) -> DeliveryResult<()> {
        self.detach_link(None, true);

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (endpoint, heartbeat) = {
            let settings = read(&self.settings);
            (settings.endpoint.clone(), settings.heartbeat_interval)
        };

        self.state.store(ConnectionState::Connecting);
        ClientCounters::bump(&self.counters.connect_attempts);
        info!(endpoint = %endpoint, generation, "Connecting");

        let opened = {
            let _runtime = self.runtime.enter();
            self.transport.open(&endpoint)
        };

        match opened {
            Ok(TransportLink { outbound, events }) => {
                let cancel = CancellationToken::new();
                *write(&self.link) = Some(ActiveLink {
                    generation,
                    outbound,
                    cancel: cancel.clone(),
                });
                self.runtime.spawn(Arc::clone(self).drive(generation, events, cancel, heartbeat));
                Ok(())
            }
            Err(err) => {
                self.state.store(ConnectionState::Closed);
                self.after_failure(err.clone());
                Err(err)
            }
        }
    }

    /// Drop the live link; with `Some(generation)` only if it is still current
    fn detach_link(&self, generation: Option<u64>, graceful: bool) -> bool {
        let mut link = write(&self.link);
        let current = match (link.as_ref(), generation) {
            (_, None) => true,
            (Some(active), Some(generation)) => active.generation == generation,
            (None, Some(_)) => false,
        };
        if !current {
            return false;
        }

        if let Some(active) = link.take() {
            if graceful {
                let _ = active.outbound.send(OutboundFrame::Close);
            }
            active.cancel.cancel();
        }
        self.state.store(ConnectionState::Closed);
        true
    }

    /// Run `f` against the link if `generation` is still the live connection
    fn if_current<R>(&self, generation: u64, f: impl FnOnce(&ActiveLink) -> R) -> Option<R> {
        let link = read(&self.link);
        match link.as_ref() {
            Some(active) if active.generation == generation => Some(f(active)),
            _ => None,
        }
    }

    fn handle_failure(self: &Arc<Self>, generation: u64, err: DeliveryError) {
        if self.detach_link(Some(generation), false) {
            self.after_failure(err);
        } else {
            trace!(generation, error = %err, "Ignoring failure from superseded connection");
        }
    }

    fn after_failure(self: &Arc<Self>, err: DeliveryError) {
        ClientCounters::bump(&self.counters.connect_failures);
        if self.closed.load(Ordering::SeqCst) {
            return;
        }

        let breaker = self.breaker();
        if err.is_certificate_failure() {
            breaker.trip();
            error!(
                error = %err,
                "Certificate verification failed, automatic reconnection halted until manual reconnect"
            );
            return;
        }

        breaker.record_failure();
        if err.is_retryable() {
            warn!(
                error = %err,
                consecutive_failures = breaker.failure_count(),
                breaker = %breaker.state(),
                "Connection failed"
            );
            self.schedule_reconnect();
        } else {
            error!(error = %err, "Connection failed with non-retryable error");
        }
    }

    fn cancel_reconnect(&self) {
        if let Some(task) = lock(&self.reconnect_task).take() {
            task.abort();
        }
        self.reconnect_in_flight.store(false, Ordering::SeqCst);
    }

    fn schedule_reconnect(self: &Arc<Self>) {
        if self.closed.load(Ordering::SeqCst) || self.breaker().is_latched() {
            return;
        }
        if self.reconnect_in_flight.swap(true, Ordering::SeqCst) {
            trace!("Reconnect already scheduled");
            return;
        }

        let (delay, attempt) = {
            let mut schedule = lock(&self.schedule);
            let delay = schedule.advance();
            (delay, schedule.attempt())
        };
        self.state
            .transition(ConnectionState::Closed, ConnectionState::Reconnecting);

        info!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Scheduling reconnect"
        );

        let task = self.runtime.spawn(Arc::clone(self).run_reconnect(delay));
        *lock(&self.reconnect_task) = Some(task);
    }

    async fn run_reconnect(self: Arc<Self>, delay: Duration) {
        tokio::time::sleep(delay).await;

        loop {
            let wait = {
                let _lifecycle = lock(&self.lifecycle);
                if self.closed.load(Ordering::SeqCst) {
                    self.reconnect_in_flight.store(false, Ordering::SeqCst);
                    return;
                }

                let breaker = self.breaker();
                if breaker.allow_connection() {
                    self.reconnect_in_flight.store(false, Ordering::SeqCst);
                    debug!("Running scheduled reconnect");
                    let _ = self.open_connection();
                    return;
                }
                if breaker.is_latched() {
                    self.reconnect_in_flight.store(false, Ordering::SeqCst);
                    return;
                }
                breaker
                    .remaining_open_time()
                    .unwrap_or(MIN_DEFER)
                    .max(MIN_DEFER)
            };

            debug!(
                wait_ms = wait.as_millis() as u64,
                "Circuit breaker open, deferring reconnect"
            );
            tokio::time::sleep(wait).await;
        }
    }

    async fn drive(
        self: Arc<Self>,
        generation: u64,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
        cancel: CancellationToken,
        heartbeat: Duration,
    ) {
        let mut ticker = (!heartbeat.is_zero()).then(|| {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + heartbeat, heartbeat);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => {
                    let event = event.unwrap_or_else(|| {
                        TransportEvent::Failed(DeliveryError::Connection(
                            "transport event stream ended".to_string(),
                        ))
                    });
                    if self.handle_event(generation, event).is_break() {
                        break;
                    }
                }
                _ = next_tick(&mut ticker) => self.send_heartbeat(generation),
            }
        }

        trace!(generation, "Connection driver stopped");
    }

    fn handle_event(self: &Arc<Self>, generation: u64, event: TransportEvent) -> ControlFlow<()> {
        match event {
            TransportEvent::Opened => {
                let sent = self.if_current(generation, |link| -> DeliveryResult<()> {
                    self.state.store(ConnectionState::Open);
                    let frame = {
                        let settings = read(&self.settings);
                        Envelope::auth(&settings.auth_token, &settings.instance_id).to_json()?
                    };
                    link.outbound
                        .send(OutboundFrame::Text(frame))
                        .map_err(|_| {
                            DeliveryError::Connection("transport closed before AUTH".to_string())
                        })?;
                    self.state.store(ConnectionState::Authenticating);
                    Ok(())
                });

                match sent {
                    None => ControlFlow::Break(()),
                    Some(Ok(())) => {
                        debug!(generation, "Transport open, AUTH sent");
                        ControlFlow::Continue(())
                    }
                    Some(Err(err)) => {
                        self.handle_failure(generation, err);
                        ControlFlow::Break(())
                    }
                }
            }
            TransportEvent::Message(text) => self.handle_message(generation, &text),
            TransportEvent::Closed { code, reason } => {
                let err = DeliveryError::Connection(match code {
                    Some(code) => format!("closed by remote with code {}: {}", code, reason),
                    None => format!("closed by remote: {}", reason),
                });
                self.handle_failure(generation, err);
                ControlFlow::Break(())
            }
            TransportEvent::Failed(err) => {
                self.handle_failure(generation, err);
                ControlFlow::Break(())
            }
        }
    }

    fn handle_message(self: &Arc<Self>, generation: u64, text: &str) -> ControlFlow<()> {
        match InboundSignal::classify(text) {
            InboundSignal::AuthSuccess => {
                let authenticated = self
                    .if_current(generation, |_| {
                        self.state.transition(
                            ConnectionState::Authenticating,
                            ConnectionState::Authenticated,
                        )
                    })
                    .unwrap_or(false);

                if authenticated {
                    self.on_authenticated(generation);
                } else {
                    debug!(generation, state = %self.state.load(), "Ignoring unexpected AUTH_SUCCESS");
                }
                ControlFlow::Continue(())
            }
            InboundSignal::AuthFailed => {
                self.handle_failure(generation, DeliveryError::Authentication(text.to_string()));
                ControlFlow::Break(())
            }
            InboundSignal::Error => {
                ClientCounters::bump(&self.counters.server_errors);
                warn!(message = %text, "Server reported an error");
                ControlFlow::Continue(())
            }
            InboundSignal::Pong => {
                self.counters.record_pong();
                trace!("Heartbeat acknowledged");
                ControlFlow::Continue(())
            }
            InboundSignal::Ack => {
                ClientCounters::bump(&self.counters.acks_received);
                ControlFlow::Continue(())
            }
            InboundSignal::Unknown => {
                debug!(message = %text, "Ignoring unrecognized message");
                ControlFlow::Continue(())
            }
        }
    }

    fn on_authenticated(&self, generation: u64) {
        self.breaker().record_success();
        lock(&self.schedule).reset();
        ClientCounters::bump(&self.counters.connect_successes);
        info!(generation, queued = self.queue.size(), "Authenticated");

        self.flush_queue(generation);
    }

    fn flush_current_link(&self) {
        let generation = read(&self.link).as_ref().map(|link| link.generation);
        if let Some(generation) = generation {
            self.flush_queue(generation);
        }
    }

    /// Send everything queued while disconnected, oldest first
    fn flush_queue(&self, generation: u64) {
        let events = self.queue.dequeue_all();
        if events.is_empty() {
            return;
        }

        let mut pending = events.into_iter();
        let mut sent = 0usize;

        while let Some(event) = pending.next() {
            let delivered = match Envelope::event(event.payload()).to_json() {
                Ok(frame) => self
                    .if_current(generation, |link| {
                        link.outbound.send(OutboundFrame::Text(frame)).is_ok()
                    })
                    .unwrap_or(false),
                Err(e) => {
                    warn!(error = %e, "Failed to encode queued event");
                    false
                }
            };

            if !delivered {
                let mut remainder = vec![event];
                remainder.extend(pending);
                let remaining = remainder.len();
                self.queue.requeue(remainder);
                warn!(
                    sent,
                    remaining, "Connection lost while flushing queue, re-queued remainder"
                );
                return;
            }

            sent += 1;
            ClientCounters::bump(&self.counters.events_transmitted);
        }

        info!(count = sent, "Flushed queued events");
    }

    fn send_heartbeat(&self, generation: u64) {
        if self.state.load() != ConnectionState::Authenticated {
            return;
        }
        match Envelope::ping().to_json() {
            Ok(frame) => {
                let _ = self.if_current(generation, |link| {
                    link.outbound.send(OutboundFrame::Text(frame))
                });
                trace!(generation, "Heartbeat sent");
            }
            Err(e) => warn!(error = %e, "Failed to encode heartbeat"),
        }
    }

    fn transmit(&self, frame: String) -> DeliveryResult<()> {
        let link = read(&self.link);
        let link = link.as_ref().ok_or(DeliveryError::NotConnected)?;
        link.outbound
            .send(OutboundFrame::Text(frame))
            .map_err(|_| DeliveryError::EventSending("transport stopped accepting frames".to_string()))
    }

    /// Batch sink: sends a batch envelope or puts the events back in the queue
    fn deliver_batch(&self, batch: Vec<QueuedEvent>) -> Result<(), BatchRejected> {
        let count = batch.len();
        if self.state.load() != ConnectionState::Authenticated {
            self.queue.requeue(batch);
            return Err(BatchRejected::new(count, "not connected"));
        }

        let instance_id = read(&self.settings).instance_id.clone();
        let sent = Envelope::batch(&instance_id, &batch)
            .to_json()
            .and_then(|frame| self.transmit(frame));

        match sent {
            Ok(()) => {
                ClientCounters::bump(&self.counters.batches_transmitted);
                trace!(count, "Batch transmitted");
                Ok(())
            }
            Err(err) => {
                ClientCounters::bump(&self.counters.transmit_failures);
                warn!(count, error = %err, "Batch transmission failed, re-queueing");
                self.queue.requeue(batch);
                Err(BatchRejected::new(count, err.to_string()))
            }
        }
    }

    fn send_event(&self, payload: String) -> SendOutcome {
        if let Some(filter) = &self.filter {
            if !filter.should_send(&payload) {
                ClientCounters::bump(&self.counters.events_filtered);
                return SendOutcome::Filtered;
            }
        }

        if !read(&self.gate).try_acquire() {
            ClientCounters::bump(&self.counters.events_rate_limited);
            debug!("Event rejected by admission gate");
            return SendOutcome::RateLimited;
        }

        if self.state.load() != ConnectionState::Authenticated {
            self.queue.enqueue(payload);
            // Authentication may have completed and drained the queue
            // between the state check and the enqueue
            if self.state.load() == ConnectionState::Authenticated {
                self.flush_current_link();
            }
            return SendOutcome::Queued;
        }

        let batcher = read(&self.batcher).clone();
        if let Some(batcher) = batcher {
            return match batcher.add(payload) {
                Ok(()) => SendOutcome::Batched,
                Err(err) => {
                    if let BatcherError::ShutDown(payload) = err {
                        self.queue.enqueue(payload);
                    }
                    SendOutcome::Queued
                }
            };
        }

        let sent = Envelope::event(&payload)
            .to_json()
            .and_then(|frame| self.transmit(frame));
        match sent {
            Ok(()) => {
                ClientCounters::bump(&self.counters.events_transmitted);
                SendOutcome::Transmitted
            }
            Err(err) => {
                ClientCounters::bump(&self.counters.transmit_failures);
                debug!(error = %err, "Transmit failed, queueing event");
                self.queue.enqueue(payload);
                SendOutcome::Queued
            }
        }
    }

    fn reconnect_metrics(&self) -> ReconnectMetrics {
        ReconnectMetrics {
            attempts: ClientCounters::get(&self.counters.connect_attempts),
            successes: ClientCounters::get(&self.counters.connect_successes),
            failures: ClientCounters::get(&self.counters.connect_failures),
            current_delay: lock(&self.schedule).current_delay(),
            scheduled: self.reconnect_in_flight.load(Ordering::SeqCst),
        }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Client for delivering events over an authenticated connection
///
/// Cloning is cheap; all clones drive the same connection. Call
/// [`ConnectionClient::close`] when done, since background tasks keep the
/// shared state alive until then.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use tether_connect::{ClientSettings, ConnectionClient, WebSocketTransport};
///
/// # async fn example() -> Result<(), tether_connect::DeliveryError> {
/// let settings = ClientSettings {
///     endpoint: "wss://ingest.example.com/events".to_string(),
///     auth_token: "secret".to_string(),
///     instance_id: "node-1".to_string(),
///     ..ClientSettings::default()
/// };
///
/// let client = ConnectionClient::builder(Arc::new(settings), Arc::new(WebSocketTransport::default()))
///     .build()?;
/// client.initialize()?;
///
/// client.send_event(r#"{"kind":"login"}"#);
/// client.close();
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ConnectionClient {
    inner: Arc<ClientInner>,
}

impl ConnectionClient {
    pub fn builder(
        provider: Arc<dyn SettingsProvider>,
        transport: Arc<dyn Transport>,
    ) -> ClientBuilder {
        ClientBuilder {
            provider,
            transport,
            filter: None,
            gate: None,
        }
    }

    /// Read settings and, when enabled, start connecting
    ///
    /// Invalid settings yield [`DeliveryError::Configuration`] and nothing is
    /// retried.
    pub fn initialize(&self) -> DeliveryResult<()> {
        self.inner.initialize()
    }

    /// Start a connection attempt if the breaker permits it
    pub fn connect(&self) -> DeliveryResult<()> {
        self.inner.connect()
    }

    /// Hand an event to the pipeline; never blocks on I/O
    pub fn send_event(&self, payload: impl Into<String>) -> SendOutcome {
        self.inner.send_event(payload.into())
    }

    /// Drop the current connection and start over with fresh settings
    ///
    /// Resets the breaker (including a certificate latch) and the backoff.
    pub fn reconnect(&self) -> DeliveryResult<()> {
        self.inner.reconnect()
    }

    /// Stop delivery: cancel retries, flush the pending batch, close the link
    ///
    /// Events still queued are not drained. Idempotent.
    pub fn close(&self) {
        self.inner.close()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state.load() == ConnectionState::Authenticated
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.load()
    }

    /// Settings snapshot taken on the last initialize/reconnect
    pub fn settings(&self) -> ClientSettings {
        read(&self.inner.settings).clone()
    }

    /// Flush the pending batch now; returns the number of events cut
    pub fn flush_batch(&self) -> usize {
        let batcher = read(&self.inner.batcher).clone();
        batcher.map(|batcher| batcher.flush()).unwrap_or(0)
    }

    pub fn metrics(&self) -> ClientMetrics {
        let inner = &self.inner;
        let counters = &inner.counters;
        ClientMetrics {
            state: inner.state.load(),
            events_transmitted: ClientCounters::get(&counters.events_transmitted),
            batches_transmitted: ClientCounters::get(&counters.batches_transmitted),
            events_filtered: ClientCounters::get(&counters.events_filtered),
            events_rate_limited: ClientCounters::get(&counters.events_rate_limited),
            transmit_failures: ClientCounters::get(&counters.transmit_failures),
            acks_received: ClientCounters::get(&counters.acks_received),
            server_errors: ClientCounters::get(&counters.server_errors),
            last_pong: counters.last_pong(),
            queue: inner.queue.metrics(),
            batcher: read(&inner.batcher).as_ref().map(|b| b.metrics()),
            breaker: inner.breaker().metrics(),
            reconnect: inner.reconnect_metrics(),
        }
    }

    pub fn queue_metrics(&self) -> QueueMetrics {
        self.inner.queue.metrics()
    }

    pub fn reconnect_metrics(&self) -> ReconnectMetrics {
        self.inner.reconnect_metrics()
    }

    /// Discard every queued event (administration only)
    pub fn clear_queue(&self) {
        self.inner.queue.clear();
    }

    /// Zero the client and queue counters (administration only)
    pub fn reset_metrics(&self) {
        self.inner.counters.reset();
        self.inner.queue.reset_metrics();
    }
}

impl std::fmt::Debug for ConnectionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionClient")
            .field("state", &self.inner.state.load())
            .field("queued", &self.inner.queue.size())
            .field("breaker", &self.inner.breaker().state())
            .finish()
    }
}
