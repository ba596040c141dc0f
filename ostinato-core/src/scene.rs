//! Scene tasks: schedulable script executions that wait on a tempo-elastic
//! timer without ever blocking the engine tick loop.
//!
//! A scene body runs on its own named thread and owns exactly one `Timer`.
//! It gets no direct access to the module tree — every mutation is marshalled
//! as a `Command` onto the engine's serialized write path, so all writes from
//! all scenes observe one total order. Cancellation is cooperative: a restart
//! or stop flips the shared flag and the old run's next wait poll returns
//! `Cancelled`, which the `?` operator turns into an orderly exit.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::Sender;

use ostinato_types::Value;

use crate::dispatch::Command;
use crate::module::{AnimateArgs, ModuleId, SetOptions};
use crate::state::StateRow;
use crate::timer::{Cancelled, TimeMode, Timer};

/// Why a scene body returned early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneExit {
    Cancelled,
}

impl From<Cancelled> for SceneExit {
    fn from(_: Cancelled) -> SceneExit {
        SceneExit::Cancelled
    }
}

pub type SceneResult = Result<(), SceneExit>;

/// A scene script. `wait` results propagate with `?` so a cancelled scene
/// unwinds at its next suspension point.
pub type SceneBody = Box<dyn FnOnce(&mut SceneCtx) -> SceneResult + Send + 'static>;

/// The scene's view of the engine: its timer plus a command sender.
pub struct SceneCtx {
    name: String,
    timer: Timer,
    commands: Sender<Command>,
}

impl SceneCtx {
    pub(crate) fn new(name: String, timer: Timer, commands: Sender<Command>) -> SceneCtx {
        SceneCtx {
            name,
            timer,
            commands,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Suspend for `duration` in the given mode. Consecutive waits rebase on
    /// the previous target, so beat sequences do not drift.
    pub fn wait(&mut self, duration: f64, mode: TimeMode) -> Result<(), Cancelled> {
        self.timer.wait(duration, mode)
    }

    /// Suspend until the integer beat count changes.
    pub fn wait_next_beat(&mut self) -> Result<(), Cancelled> {
        self.timer.wait_next_beat()
    }

    /// Suspend until the integer cycle count changes.
    pub fn wait_next_cycle(&mut self) -> Result<(), Cancelled> {
        self.timer.wait_next_cycle()
    }

    pub fn current_beat(&self) -> i64 {
        self.timer.current_beat()
    }

    pub fn current_cycle(&self) -> i64 {
        self.timer.current_cycle()
    }

    /// Set a parameter on the engine's next tick.
    pub fn set(&self, module: ModuleId, target: &[&str], values: Vec<Value>) {
        self.set_with(module, target, values, SetOptions::default());
    }

    pub fn set_with(
        &self,
        module: ModuleId,
        target: &[&str],
        values: Vec<Value>,
        options: SetOptions,
    ) {
        self.send_command(Command::Set {
            module,
            target: own(target),
            values,
            options,
        });
    }

    pub fn animate(&self, module: ModuleId, target: &[&str], args: AnimateArgs) {
        self.send_command(Command::Animate {
            module,
            target: own(target),
            args,
        });
    }

    pub fn stop_animate(&self, module: ModuleId, target: &[&str]) {
        self.send_command(Command::StopAnimate {
            module,
            target: own(target),
        });
    }

    pub fn reset(&self, module: ModuleId, name: Option<&str>) {
        self.send_command(Command::Reset {
            module,
            name: name.map(str::to_string),
        });
    }

    pub fn set_state(&self, module: ModuleId, rows: Vec<StateRow>, force_send: bool) {
        self.send_command(Command::SetState {
            module,
            rows,
            force_send,
        });
    }

    pub fn send_state(&self, module: ModuleId) {
        self.send_command(Command::SendState { module });
    }

    pub fn save(&self, module: ModuleId, name: &str, omit_defaults: bool) {
        self.send_command(Command::SaveState {
            module,
            name: name.to_string(),
            omit_defaults,
        });
    }

    pub fn load(&self, module: ModuleId, name: &str, force_send: bool) {
        self.send_command(Command::LoadState {
            module,
            name: name.to_string(),
            force_send,
        });
    }

    pub fn set_tempo(&self, bpm: f64) {
        self.send_command(Command::SetTempo(bpm));
    }

    pub fn set_cycle_length(&self, beats: f64) {
        self.send_command(Command::SetCycleLength(beats));
    }

    /// Start (or restart) another scene from inside this one.
    pub fn start_scene(&self, name: &str, body: SceneBody) {
        self.send_command(Command::StartScene {
            name: name.to_string(),
            body,
        });
    }

    /// Stop scenes by name, with wildcard support.
    pub fn stop_scene(&self, name: &str) {
        self.send_command(Command::StopScene {
            name: name.to_string(),
        });
    }

    fn send_command(&self, command: Command) {
        if self.commands.send(command).is_err() {
            log::debug!(
                target: "scene",
                "scene \"{}\": engine gone, dropping command",
                self.name
            );
        }
    }
}

fn own(target: &[&str]) -> Vec<String> {
    target.iter().map(|s| s.to_string()).collect()
}

/// Bookkeeping for a running scene. Dropping the handle detaches the thread;
/// the cancel flag is the only control channel.
pub(crate) struct SceneHandle {
    pub(crate) cancel: Arc<AtomicBool>,
    #[allow(dead_code)]
    pub(crate) thread: Option<JoinHandle<()>>,
}

impl SceneHandle {
    pub(crate) fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }
}
