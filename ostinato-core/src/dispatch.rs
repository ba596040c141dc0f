//! The serialized write path: commands marshalled from scene threads (or any
//! other execution context) and applied by the engine tick loop, in arrival
//! order, before the flush.

use ostinato_types::Value;

use crate::engine::Engine;
use crate::module::{AnimateArgs, ModuleId, SetOptions};
use crate::scene::SceneBody;
use crate::state::StateRow;

/// A write intent against the module tree or the engine's registries.
/// Everything a scene may mutate goes through one of these.
pub enum Command {
    Set {
        module: ModuleId,
        target: Vec<String>,
        values: Vec<Value>,
        options: SetOptions,
    },
    Reset {
        module: ModuleId,
        name: Option<String>,
    },
    Animate {
        module: ModuleId,
        target: Vec<String>,
        args: AnimateArgs,
    },
    StopAnimate {
        module: ModuleId,
        target: Vec<String>,
    },
    SetState {
        module: ModuleId,
        rows: Vec<StateRow>,
        force_send: bool,
    },
    SendState {
        module: ModuleId,
    },
    SaveState {
        module: ModuleId,
        name: String,
        omit_defaults: bool,
    },
    LoadState {
        module: ModuleId,
        name: String,
        force_send: bool,
    },
    SetTempo(f64),
    SetCycleLength(f64),
    StartScene {
        name: String,
        body: SceneBody,
    },
    StopScene {
        name: String,
    },
}

/// Apply one command on the engine's scheduling context.
pub(crate) fn apply(engine: &mut Engine, command: Command) {
    match command {
        Command::Set {
            module,
            target,
            values,
            options,
        } => {
            let target: Vec<&str> = target.iter().map(String::as_str).collect();
            engine.modules_mut().set(module, &target, &values, options);
        }
        Command::Reset { module, name } => {
            engine.modules_mut().reset(module, name.as_deref());
        }
        Command::Animate {
            module,
            target,
            args,
        } => {
            let now = engine.current_time();
            let target: Vec<&str> = target.iter().map(String::as_str).collect();
            engine.modules_mut().animate(module, &target, args, now);
        }
        Command::StopAnimate { module, target } => {
            let target: Vec<&str> = target.iter().map(String::as_str).collect();
            engine.modules_mut().stop_animate(module, &target);
        }
        Command::SetState {
            module,
            rows,
            force_send,
        } => {
            engine.modules_mut().set_state(module, &rows, force_send);
        }
        Command::SendState { module } => {
            engine.modules_mut().send_state(module);
        }
        Command::SaveState {
            module,
            name,
            omit_defaults,
        } => {
            engine.modules_mut().save(module, &name, omit_defaults);
        }
        Command::LoadState {
            module,
            name,
            force_send,
        } => {
            engine.modules_mut().load(module, &name, force_send);
        }
        Command::SetTempo(bpm) => engine.set_tempo(bpm),
        Command::SetCycleLength(beats) => engine.set_cycle_length(beats),
        Command::StartScene { name, body } => engine.start_scene(&name, body),
        Command::StopScene { name } => engine.stop_scene(&name),
    }
}
