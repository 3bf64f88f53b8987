//! Player runtime - effect executor around the pure reducer
//!
//! The runtime owns everything with a lifetime:
//! - the committed [`PlayerState`]
//! - the single live adapter and its subscription
//! - the mounted video surface
//! - a FIFO queue shared by intents and engine events
//!
//! A worker task drains the queue one event at a time. Each event is
//! reduced, the new state is published, and the transition's effects run
//! in order before the next queued event is looked at. Adapter failures
//! are turned into `Engine/Error` events and reduced as part of the same
//! dispatch.

use crate::adapter::{AdapterFactory, PlaybackAdapter};
use crate::config::PlayerConfig;
use crate::error::{AdapterError, DestroyError, Error, Result};
use crate::event::{EngineEvent, Event};
use crate::listeners::{Listeners, Subscription};
use crate::reducer::{detect_type, reduce, Effect, ReduceContext};
use crate::state::PlayerState;
use crate::surface::SharedSurface;
use crate::types::{PlaybackType, RuntimeId};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, info_span, instrument, warn, Instrument};

enum Command {
    Dispatch {
        event: Event,
        done: Option<oneshot::Sender<()>>,
        /// Adapter generation that emitted the event; `None` for callers
        generation: Option<u64>,
    },
    Mount {
        surface: SharedSurface,
        done: oneshot::Sender<()>,
    },
    Destroy {
        done: oneshot::Sender<()>,
    },
}

/// Depth gauge of the runtime queue
#[derive(Clone)]
struct Queue {
    depth: Arc<AtomicUsize>,
    warn_depth: usize,
}

impl Queue {
    fn push(&self, tx: &mpsc::UnboundedSender<Command>, command: Command) -> bool {
        let depth = self.depth.fetch_add(1, Ordering::SeqCst) + 1;
        if depth > self.warn_depth {
            warn!(depth, limit = self.warn_depth, "Runtime queue is backing up");
        }
        if tx.send(command).is_err() {
            self.depth.fetch_sub(1, Ordering::SeqCst);
            return false;
        }
        true
    }

    fn popped(&self) {
        self.depth.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Handle to a running player core.
///
/// Cheap to share behind an `Arc`; every method may be called concurrently
/// and all of them are serialized through the runtime queue.
pub struct PlayerRuntime {
    id: RuntimeId,
    commands: mpsc::UnboundedSender<Command>,
    queue: Queue,
    state: watch::Receiver<Arc<PlayerState>>,
    playback_type: watch::Receiver<Option<PlaybackType>>,
    listeners: Listeners<PlayerState>,
}

impl PlayerRuntime {
    /// Start a runtime on the current tokio runtime
    pub fn new(factory: Arc<dyn AdapterFactory>, config: PlayerConfig) -> Result<Self> {
        config.validate()?;
        let handle = Handle::try_current().map_err(|e| Error::NoAsyncRuntime(e.to_string()))?;

        let id = RuntimeId::new();
        let (commands, receiver) = mpsc::unbounded_channel();
        let initial = Arc::new(PlayerState::idle());
        let (state_tx, state) = watch::channel(Arc::clone(&initial));
        let (type_tx, playback_type) = watch::channel(None);
        let listeners = Listeners::new();
        let queue = Queue {
            depth: Arc::new(AtomicUsize::new(0)),
            warn_depth: config.queue_warn_depth,
        };

        let worker = Worker {
            factory,
            config,
            state: initial,
            state_tx,
            type_tx,
            playback_type: None,
            listeners: listeners.clone(),
            adapter: None,
            adapter_subscription: None,
            generation: 0,
            surface: None,
            loopback: commands.downgrade(),
            queue: queue.clone(),
        };
        handle.spawn(
            worker
                .run(receiver)
                .instrument(info_span!("player_runtime", runtime_id = %id)),
        );

        info!(runtime_id = %id, "Player runtime started");
        Ok(Self {
            id,
            commands,
            queue,
            state,
            playback_type,
            listeners,
        })
    }

    pub fn id(&self) -> RuntimeId {
        self.id
    }

    /// Queue `event`; resolves once it has been reduced and the effects it
    /// triggered have completed
    #[instrument(skip(self, event), fields(runtime_id = %self.id))]
    pub async fn dispatch(&self, event: impl Into<Event>) -> Result<()> {
        let event = event.into();
        debug!(event = event.label(), "Dispatch");
        let (done, completed) = oneshot::channel();
        let command = Command::Dispatch {
            event,
            done: Some(done),
            generation: None,
        };
        if !self.queue.push(&self.commands, command) {
            return Err(Error::RuntimeStopped);
        }
        completed.await.map_err(|_| Error::RuntimeStopped)
    }

    /// Store the surface later loads mount adapters on; no state change
    #[instrument(skip(self, surface), fields(runtime_id = %self.id))]
    pub async fn mount(&self, surface: SharedSurface) -> Result<()> {
        let (done, completed) = oneshot::channel();
        if !self.queue.push(&self.commands, Command::Mount { surface, done }) {
            return Err(Error::RuntimeStopped);
        }
        completed.await.map_err(|_| Error::RuntimeStopped)
    }

    /// Register `listener`; it is called right away with the current state
    /// and then after every reduction
    pub fn subscribe(
        &self,
        listener: impl Fn(&PlayerState) + Send + Sync + 'static,
    ) -> Subscription {
        let listener = Arc::new(listener);
        let subscription = self.listeners.add(listener.clone());
        let current = self.state();
        listener(current.as_ref());
        subscription
    }

    /// Watch committed states
    pub fn watch_state(&self) -> watch::Receiver<Arc<PlayerState>> {
        self.state.clone()
    }

    /// Last committed state; the same `Arc` is returned until the next change
    pub fn state(&self) -> Arc<PlayerState> {
        Arc::clone(&self.state.borrow())
    }

    /// Type detected for the current source, `None` before the first load
    pub fn playback_type(&self) -> Option<PlaybackType> {
        *self.playback_type.borrow()
    }

    /// Tear down the adapter, drop the surface and every listener.
    ///
    /// Idempotent; the runtime keeps accepting events afterwards.
    #[instrument(skip(self), fields(runtime_id = %self.id))]
    pub async fn destroy(&self) -> std::result::Result<(), DestroyError> {
        let (done, completed) = oneshot::channel();
        if !self.queue.push(&self.commands, Command::Destroy { done }) {
            return Err(DestroyError::WorkerGone);
        }
        completed.await.map_err(|_| DestroyError::WorkerGone)
    }

    /// Commands queued but not yet picked up by the worker
    pub fn queue_depth(&self) -> usize {
        self.queue.depth.load(Ordering::SeqCst)
    }
}

struct Worker {
    factory: Arc<dyn AdapterFactory>,
    config: PlayerConfig,
    state: Arc<PlayerState>,
    state_tx: watch::Sender<Arc<PlayerState>>,
    type_tx: watch::Sender<Option<PlaybackType>>,
    playback_type: Option<PlaybackType>,
    listeners: Listeners<PlayerState>,
    adapter: Option<Arc<dyn PlaybackAdapter>>,
    adapter_subscription: Option<Subscription>,
    /// Bumped whenever an adapter is created or released; events stamped
    /// with an older value are dropped
    generation: u64,
    surface: Option<SharedSurface>,
    /// Engine events re-enter the queue through this; weak so the queue
    /// closes once every runtime handle is gone
    loopback: mpsc::WeakUnboundedSender<Command>,
    queue: Queue,
}

impl Worker {
    async fn run(mut self, mut receiver: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = receiver.recv().await {
            self.queue.popped();
            match command {
                Command::Dispatch {
                    event,
                    done,
                    generation,
                } => {
                    if generation.is_some_and(|stamp| stamp != self.generation) {
                        debug!(
                            event = event.label(),
                            ?generation,
                            "Dropped event from a released adapter"
                        );
                    } else {
                        self.process(event).await;
                    }
                    if let Some(done) = done {
                        let _ = done.send(());
                    }
                }
                Command::Mount { surface, done } => {
                    debug!("Surface mounted");
                    self.surface = Some(surface);
                    let _ = done.send(());
                }
                Command::Destroy { done } => {
                    self.teardown().await;
                    let _ = done.send(());
                }
            }
        }

        self.teardown().await;
        debug!("Runtime worker stopped");
    }

    fn context(&self) -> ReduceContext {
        ReduceContext {
            playback_type: self.playback_type,
            loop_playback: self.config.loop_playback,
        }
    }

    /// Reduce `event` and run its effects, then any failure events they raised
    async fn process(&mut self, event: Event) {
        let mut cascade = VecDeque::from([event]);

        while let Some(event) = cascade.pop_front() {
            let transition = reduce(&self.state, &event, &self.context());
            debug!(
                event = event.label(),
                from = self.state.tag(),
                to = transition.state.tag(),
                effects = transition.effects.len(),
                "Reduced"
            );
            self.commit(transition.state);

            if let Some(failure) = self.run_effects(transition.effects).await {
                cascade.push_back(Event::Engine(failure));
            }
        }
    }

    fn commit(&mut self, next: PlayerState) {
        if *self.state != next {
            if self.state.tag() != next.tag() {
                info!(from = self.state.tag(), to = next.tag(), "State transition");
            }
            self.state = Arc::new(next);
            self.state_tx.send_replace(Arc::clone(&self.state));
        }
        self.listeners.emit(self.state.as_ref());
    }

    /// Run `effects` in order; the first failure stops the rest and is
    /// returned as an engine error event
    async fn run_effects(&mut self, effects: Vec<Effect>) -> Option<EngineEvent> {
        for effect in effects {
            if let Err(error) = self.execute(&effect).await {
                warn!(
                    ?effect,
                    error = %error,
                    code = error.error_code(),
                    recoverable = error.is_recoverable(),
                    "Effect failed"
                );
                return Some(EngineEvent::Error(error.to_engine_error()));
            }
        }
        None
    }

    async fn execute(&mut self, effect: &Effect) -> std::result::Result<(), AdapterError> {
        match effect {
            Effect::DestroyAdapterIfAny => {
                self.release_adapter().await;
                Ok(())
            }
            Effect::DetectType { url } => {
                let kind = detect_type(url);
                info!(url = %url, kind = %kind, "Playback type detected");
                self.set_playback_type(Some(kind));
                Ok(())
            }
            Effect::CreateAdapter => {
                let kind = self.playback_type.ok_or_else(|| {
                    AdapterError::InitializationFailed("playback type not detected".into())
                })?;
                let adapter = self.factory.create(kind, &self.config)?;
                self.generation += 1;
                self.adapter = Some(adapter);
                Ok(())
            }
            Effect::Subscribe => {
                let adapter = self.live_adapter()?;
                let loopback = self.loopback.clone();
                let queue = self.queue.clone();
                let generation = self.generation;
                let subscription = adapter.subscribe(Arc::new(move |event: &EngineEvent| {
                    if let Some(tx) = loopback.upgrade() {
                        let command = Command::Dispatch {
                            event: Event::Engine(event.clone()),
                            done: None,
                            generation: Some(generation),
                        };
                        queue.push(&tx, command);
                    }
                }));
                if let Some(previous) = self.adapter_subscription.replace(subscription) {
                    previous.unsubscribe();
                }
                Ok(())
            }
            Effect::Mount => {
                let adapter = self.live_adapter()?;
                let surface = self.surface.clone().ok_or(AdapterError::NotMounted)?;
                adapter.mount(surface).await
            }
            Effect::Load { url } => self.live_adapter()?.load(url).await,
            Effect::Play => self.control(|adapter| async move { adapter.play().await }).await,
            Effect::Pause => self.control(|adapter| async move { adapter.pause().await }).await,
            Effect::Seek { time } => {
                let time = *time;
                self.control(|adapter| async move { adapter.seek(time).await })
                    .await
            }
            Effect::SetVolume { volume } => {
                let volume = *volume;
                self.control(|adapter| async move { adapter.set_volume(volume).await })
                    .await
            }
            Effect::SetMuted { muted } => {
                let muted = *muted;
                self.control(|adapter| async move { adapter.set_muted(muted).await })
                    .await
            }
        }
    }

    fn live_adapter(&self) -> std::result::Result<Arc<dyn PlaybackAdapter>, AdapterError> {
        self.adapter
            .clone()
            .ok_or_else(|| AdapterError::InitializationFailed("no adapter created".into()))
    }

    /// Control effects are inert while no adapter is live
    async fn control<F, Fut>(&self, call: F) -> std::result::Result<(), AdapterError>
    where
        F: FnOnce(Arc<dyn PlaybackAdapter>) -> Fut,
        Fut: std::future::Future<Output = std::result::Result<(), AdapterError>>,
    {
        match self.adapter.clone() {
            Some(adapter) => call(adapter).await,
            None => {
                debug!("Control effect skipped without a live adapter");
                Ok(())
            }
        }
    }

    async fn release_adapter(&mut self) {
        if let Some(subscription) = self.adapter_subscription.take() {
            subscription.unsubscribe();
        }
        if let Some(adapter) = self.adapter.take() {
            self.generation += 1;
            info!(name = adapter.name(), kind = %adapter.kind(), "Destroying adapter");
            adapter.destroy().await;
        }
    }

    fn set_playback_type(&mut self, kind: Option<PlaybackType>) {
        self.playback_type = kind;
        self.type_tx.send_replace(kind);
    }

    async fn teardown(&mut self) {
        self.release_adapter().await;
        self.surface = None;
        self.set_playback_type(None);
        self.listeners.clear();
        debug!("Runtime torn down");
    }
}
