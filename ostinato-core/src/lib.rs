//! # ostinato-core
//!
//! Real-time control engine for external audio/lighting/stage devices: a tree
//! of addressable parameters, animated and mapped live, synchronized to a
//! musical tempo. Transport adapters (OSC/MIDI wiring) live in
//! `ostinato-net`; this crate is the scheduler and the data model.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use ostinato_core::config::EngineConfig;
//! use ostinato_core::engine::Engine;
//! use ostinato_core::module::Module;
//! use ostinato_core::param::Parameter;
//! use ostinato_types::{PortSpec, Protocol, Value};
//!
//! // 1. Build the engine and attach device modules
//! let config = EngineConfig::load();
//! let mut engine = Engine::new("ostinato", &config);
//! let looper = engine.add_module(
//!     Module::new("looper")
//!         .with_protocol(Protocol::Osc)
//!         .with_port(PortSpec::Number(9000)),
//! );
//! engine.modules_mut().add_parameter(
//!     looper,
//!     Parameter::new("gain", Some("/loop/gain"), "f", vec![], Some(vec![Value::Float(1.0)])),
//! );
//!
//! // 2. Wire transports (see ostinato-net), then run the tick loop
//! // engine.set_outbound(osc_adapter.outbound());
//! engine.run();
//! ```
//!
//! ## Module Overview
//!
//! - [`module`] — `Module`/`ModuleTree`: the addressable tree, dirty-flush
//!   coalescing, mapping propagation, state rows
//! - [`param`] — `Parameter`: typed value slots, send tracking, animations
//! - [`mapping`] — transform edges with per-cycle cycle protection
//! - [`engine`] — the tick scheduler, tempo registry, scenes, routing
//! - [`timer`] — `TempoMap` integration and the tempo-elastic `Timer`
//! - [`scene`] — scene tasks and the marshalled write context
//! - [`dispatch`] — the `Command` write path consumed by the tick loop
//! - [`easing`] — interpolation curves with `-mirror`/`-out`/`-inout`
//! - [`midi`] — the fixed MIDI↔OSC translation table
//! - [`state`] — JSON state files with interleaved comments
//! - [`config`] — TOML timing/paths configuration
//! - [`events`] — observer registration and event fan-out

pub mod address;
pub mod clock;
pub mod config;
pub mod dispatch;
pub mod easing;
pub mod engine;
pub mod events;
pub mod mapping;
pub mod midi;
pub mod module;
pub mod param;
pub mod scene;
pub mod state;
pub mod timer;

pub use config::EngineConfig;
pub use engine::{Engine, RouteHandler};
pub use module::{AnimateArgs, Module, ModuleId, ModuleTree, SetOptions};
pub use param::Parameter;
pub use scene::{SceneCtx, SceneExit, SceneResult};
pub use timer::{TimeMode, Timer};
