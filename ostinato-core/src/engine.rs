//! Engine: the root of the module tree plus the fixed-period tick scheduler,
//! tempo registry, scene registry and outbound message dispatch.
//!
//! One scheduling context — the thread driving `run` (or `step` in tests) —
//! owns all module/parameter/mapping mutation. Scene threads and transports
//! talk to it through channels only: commands in, inbound messages in,
//! outbound messages out.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};

use ostinato_types::{EngineEvent, Message, PortSpec, Value};

use crate::address;
use crate::clock::{Clock, SharedClock};
use crate::config::EngineConfig;
use crate::dispatch::{self, Command};
use crate::module::{Module, ModuleId, ModuleTree};
use crate::scene::{SceneBody, SceneCtx, SceneExit, SceneHandle};
use crate::timer::{TempoMap, Timer};

/// Per-module hook for inbound messages. The default route is a no-op;
/// devices override it to translate their wire traffic into parameter writes.
/// Returning `false` suppresses the engine-level fallback handler.
pub trait RouteHandler: Send {
    fn route(&mut self, engine: &mut Engine, module: ModuleId, address: &str, args: &[Value])
        -> bool;
}

impl<F> RouteHandler for F
where
    F: FnMut(&mut Engine, ModuleId, &str, &[Value]) -> bool + Send,
{
    fn route(
        &mut self,
        engine: &mut Engine,
        module: ModuleId,
        address: &str,
        args: &[Value],
    ) -> bool {
        self(engine, module, address, args)
    }
}

/// Clonable stop signal for an engine running on another thread.
#[derive(Clone)]
pub struct ShutdownHandle {
    running: Arc<AtomicBool>,
}

impl ShutdownHandle {
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

pub struct Engine {
    clock: SharedClock,
    tempo_map: Arc<TempoMap>,
    tree: ModuleTree,
    mainloop_period: Duration,
    animation_period_ns: u64,
    last_animation: u64,
    scenes: HashMap<String, SceneHandle>,
    command_tx: Sender<Command>,
    command_rx: Receiver<Command>,
    inbound_tx: Sender<Message>,
    inbound_rx: Receiver<Message>,
    outbound_tx: Option<Sender<Message>>,
    handlers: HashMap<ModuleId, Box<dyn RouteHandler>>,
    port_index: HashMap<PortSpec, ModuleId>,
    running: Arc<AtomicBool>,
    epoch: Instant,
}

impl Engine {
    /// Build an engine whose root module carries the given name. Timing and
    /// the state folder come from the config.
    pub fn new(name: &str, config: &EngineConfig) -> Engine {
        let (command_tx, command_rx) = crossbeam_channel::unbounded();
        let (inbound_tx, inbound_rx) = crossbeam_channel::unbounded();
        Engine {
            clock: Clock::new(),
            tempo_map: TempoMap::new(config.tempo(), config.cycle_length(), 0),
            tree: ModuleTree::new(Module::new(name), config.state_folder()),
            mainloop_period: config.mainloop_period(),
            animation_period_ns: config.animation_period().as_nanos() as u64,
            last_animation: 0,
            scenes: HashMap::new(),
            command_tx,
            command_rx,
            inbound_tx,
            inbound_rx,
            outbound_tx: None,
            handlers: HashMap::new(),
            port_index: HashMap::new(),
            running: Arc::new(AtomicBool::new(false)),
            epoch: Instant::now(),
        }
    }

    /// Root module id — the engine itself as a tree node.
    pub fn root(&self) -> ModuleId {
        self.tree.root()
    }

    pub fn modules(&self) -> &ModuleTree {
        &self.tree
    }

    pub fn modules_mut(&mut self) -> &mut ModuleTree {
        &mut self.tree
    }

    /// Attach a top-level device module under the root. A module with its own
    /// port also receives inbound traffic addressed to that port through its
    /// route handler; nested submodules send but never receive.
    pub fn add_module(&mut self, module: Module) -> ModuleId {
        let root = self.tree.root();
        let id = self.tree.add_submodule(root, module);
        if let Some(port) = self.tree.module(id).port().cloned() {
            self.port_index.insert(port, id);
        }
        id
    }

    /// Attach a submodule anywhere in the tree.
    pub fn add_submodule(&mut self, parent: ModuleId, module: Module) -> ModuleId {
        self.tree.add_submodule(parent, module)
    }

    /// Install the inbound route hook for a module.
    pub fn set_route_handler(&mut self, module: ModuleId, handler: Box<dyn RouteHandler>) {
        self.handlers.insert(module, handler);
    }

    /// Register an event observer.
    pub fn subscribe_events(&mut self) -> Receiver<EngineEvent> {
        self.tree.events.subscribe()
    }

    /// Sender for transport adapters to feed inbound messages.
    pub fn inbound_sender(&self) -> Sender<Message> {
        self.inbound_tx.clone()
    }

    /// Sender other threads use to marshal writes onto the tick loop.
    pub fn command_sender(&self) -> Sender<Command> {
        self.command_tx.clone()
    }

    /// Register the transport boundary consuming outbound messages. Without
    /// one, messages accumulate for `drain_outbound`.
    pub fn set_outbound(&mut self, tx: Sender<Message>) {
        self.outbound_tx = Some(tx);
    }

    /// Take every queued outbound message. Test and embedding hook.
    pub fn drain_outbound(&mut self) -> Vec<Message> {
        self.tree.outbox.drain(..).collect()
    }

    pub fn current_time(&self) -> u64 {
        self.clock.now()
    }

    pub fn clock(&self) -> SharedClock {
        self.clock.clone()
    }

    pub fn tempo_map(&self) -> Arc<TempoMap> {
        self.tempo_map.clone()
    }

    pub fn tempo(&self) -> f64 {
        self.tempo_map.tempo()
    }

    pub fn cycle_length(&self) -> f64 {
        self.tempo_map.cycle_length()
    }

    /// Integer beat count since engine start, across all tempo changes.
    pub fn current_beat(&self) -> i64 {
        self.tempo_map.beats_at(self.clock.now()).floor() as i64
    }

    /// Integer cycle count since engine start.
    pub fn current_cycle(&self) -> i64 {
        self.tempo_map.cycles_at(self.clock.now()).floor() as i64
    }

    /// Change the tempo. Appends a tempo-map entry; live beat-relative waits
    /// observe the change at their next poll and keep their remaining beat
    /// count.
    pub fn set_tempo(&mut self, bpm: f64) {
        self.tempo_map.set_tempo(self.clock.now(), bpm);
        log::info!(target: "engine", "tempo set to {}", self.tempo_map.tempo());
    }

    /// Change the musical cycle (measure) length in beats.
    pub fn set_cycle_length(&mut self, beats: f64) {
        self.tempo_map.set_cycle_length(self.clock.now(), beats);
    }

    /// Start (or restart) a named scene. A previous run with the same name is
    /// cancelled cooperatively: its next wait poll observes the signal.
    pub fn start_scene(&mut self, name: &str, body: SceneBody) {
        self.cancel_scene(name);
        let cancel = Arc::new(AtomicBool::new(false));
        let timer = Timer::new(
            self.clock.clone(),
            self.tempo_map.clone(),
            cancel.clone(),
            self.mainloop_period,
        );
        let mut ctx = SceneCtx::new(name.to_string(), timer, self.command_tx.clone());
        log::info!(target: "engine", "starting scene {}", name);
        let spawned = thread::Builder::new()
            .name(format!("scene/{}", name))
            .spawn(move || match body(&mut ctx) {
                Ok(()) => log::debug!(target: "engine", "scene \"{}\" finished", ctx.name()),
                Err(SceneExit::Cancelled) => {
                    log::debug!(target: "engine", "scene \"{}\" cancelled", ctx.name())
                }
            });
        match spawned {
            Ok(handle) => {
                self.scenes.insert(
                    name.to_string(),
                    SceneHandle {
                        cancel,
                        thread: Some(handle),
                    },
                );
            }
            Err(e) => log::error!(target: "engine", "failed to spawn scene \"{}\": {}", name, e),
        }
    }

    /// Start a scene namespaced by a module's tree path, so different modules
    /// can reuse scene names freely.
    pub fn start_module_scene(&mut self, module: ModuleId, name: &str, body: SceneBody) {
        let scoped = format!(
            "module/{}/{}",
            self.tree.module(module).module_path().join("/"),
            name
        );
        self.start_scene(&scoped, body);
    }

    /// Stop scenes by name, with wildcard support (`"*"` stops everything).
    pub fn stop_scene(&mut self, pattern: &str) {
        if address::is_pattern(pattern) {
            let Some(re) = address::glob_to_regex(pattern) else {
                log::error!(target: "engine", "malformed scene pattern \"{}\"", pattern);
                return;
            };
            let names: Vec<String> = self
                .scenes
                .keys()
                .filter(|name| re.is_match(name))
                .cloned()
                .collect();
            for name in names {
                self.cancel_scene(&name);
            }
        } else {
            self.cancel_scene(pattern);
        }
    }

    fn cancel_scene(&mut self, name: &str) {
        if let Some(handle) = self.scenes.remove(name) {
            log::info!(target: "engine", "stopping scene {}", name);
            handle.cancel();
        }
    }

    /// Route one inbound message: the module registered for the message's
    /// port gets its handler called first; unless it returns `false`, the
    /// root module's handler (if any) sees the message as a fallback.
    pub fn route(&mut self, message: Message) {
        let module = self.port_index.get(&message.port).copied();
        let mut pass = true;
        if let Some(mid) = module {
            pass = self.call_handler(mid, &message);
        }
        let root = self.tree.root();
        if pass && module != Some(root) {
            self.call_handler(root, &message);
        }
    }

    fn call_handler(&mut self, module: ModuleId, message: &Message) -> bool {
        let Some(mut handler) = self.handlers.remove(&module) else {
            return true;
        };
        let pass = handler.route(self, module, &message.address, &message.args);
        // A handler may have swapped itself out while running; keep the
        // replacement in that case.
        self.handlers.entry(module).or_insert(handler);
        pass
    }

    /// Run the tick loop until stopped. Blocks the calling thread.
    pub fn run(&mut self) {
        self.running.store(true, Ordering::SeqCst);
        self.epoch = Instant::now();
        log::info!(target: "engine", "started");
        while self.running.load(Ordering::SeqCst) {
            let now = self.epoch.elapsed().as_nanos() as u64;
            self.tick(now);
            thread::sleep(self.mainloop_period);
        }
        self.stop_scene("*");
        log::info!(target: "engine", "stopped");
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            running: self.running.clone(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Execute a single tick at an explicit timestamp. Deterministic driver
    /// for tests and offline use.
    pub fn step(&mut self, now_ns: u64) {
        self.tick(now_ns);
    }

    fn tick(&mut self, now_ns: u64) {
        self.clock.advance_to(now_ns);
        let now = self.clock.now();

        // Inbound transport events reach route handlers first.
        while let Ok(message) = self.inbound_rx.try_recv() {
            self.route(message);
        }

        // Marshalled writes from scene threads, in arrival order.
        while let Ok(command) = self.command_rx.try_recv() {
            dispatch::apply(self, command);
        }

        // Animations advance at the coarser cadence.
        if now.saturating_sub(self.last_animation) >= self.animation_period_ns {
            self.last_animation = now;
            let animating: Vec<ModuleId> = self.tree.animating.clone();
            let tempo = self.tempo_map.tempo();
            for mid in animating {
                self.tree.update_animations(mid, now, tempo);
            }
            let keep: Vec<ModuleId> = self
                .tree
                .animating
                .iter()
                .copied()
                .filter(|mid| self.tree.has_animations(*mid))
                .collect();
            self.tree.animating = keep;
        }

        // Flush dirty modules, at most once per module per tick. A module
        // re-dirtied after its flush waits for the next tick.
        let mut flushed: HashSet<ModuleId> = HashSet::new();
        let mut deferred: VecDeque<ModuleId> = VecDeque::new();
        while let Some(mid) = self.tree.dirty_modules.pop_front() {
            if !flushed.insert(mid) {
                deferred.push_back(mid);
                continue;
            }
            self.tree.update_dirty_parameters(mid);
        }
        self.tree.dirty_modules = deferred;

        // Hand queued messages to the transport boundary.
        if let Some(tx) = &self.outbound_tx {
            while let Some(message) = self.tree.outbox.pop_front() {
                if tx.send(message).is_err() {
                    log::warn!(target: "engine", "transport disconnected, dropping outbound queue");
                    self.outbound_tx = None;
                    self.tree.outbox.clear();
                    break;
                }
            }
        }
    }
}
