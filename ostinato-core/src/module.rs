//! Module tree: the addressable unit of dirty-flush, mapping propagation and
//! routing.
//!
//! Modules live in an arena owned by the engine and are addressed by
//! `ModuleId`; a module's root-to-self name path is stable for its lifetime
//! and forms a unique tree address. All mutation goes through `ModuleTree`
//! methods on the engine's scheduling context — scene threads marshal their
//! writes as commands instead (see `dispatch`).

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use indexmap::IndexMap;
use regex::Regex;

use ostinato_types::{EngineEvent, Message, PortSpec, Protocol, Value};

use crate::address::{resolve_one, resolve_pattern};
use crate::events::EventBus;
use crate::mapping::{parse_path, Mapping, ParamPath, TransformFn};
use crate::param::Parameter;
use crate::state::{self, StateEntry, StateRow};
use crate::timer::TimeMode;

/// Arena index of a module. Stable for the process lifetime — modules are
/// never destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleId(pub(crate) usize);

/// Options for `set` and `set_state`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SetOptions {
    /// Send a message immediately, regardless of the last sent value,
    /// bypassing the dirty buffer.
    pub force_send: bool,
    /// Keep a running animation alive instead of stopping it.
    pub preserve_animation: bool,
}

/// Arguments for `animate`.
#[derive(Debug, Clone)]
pub struct AnimateArgs {
    /// Starting value(s); `None` uses the current value (single-value numeric
    /// parameters only).
    pub start: Option<Vec<f64>>,
    /// Ending value(s); `None` uses the current value.
    pub end: Option<Vec<f64>>,
    pub duration: f64,
    pub mode: TimeMode,
    pub easing: String,
    /// Start over when `duration` is reached (combine with a mirror easing
    /// for a back-and-forth loop).
    pub looping: bool,
}

impl Default for AnimateArgs {
    fn default() -> Self {
        AnimateArgs {
            start: None,
            end: None,
            duration: 1.0,
            mode: TimeMode::Beats,
            easing: "linear".into(),
            looping: false,
        }
    }
}

/// One node of the tree. Construct with `Module::new` and attach through
/// `ModuleTree::add_submodule` (or `Engine::add_module` for top-level
/// devices).
pub struct Module {
    name: String,
    protocol: Option<Protocol>,
    port: Option<PortSpec>,
    parent: Option<ModuleId>,
    path: Vec<String>,
    submodules: IndexMap<String, ModuleId>,
    aliases: HashMap<String, String>,
    parameters: IndexMap<String, Parameter>,
    mappings: Vec<Mapping>,
    dirty_queue: VecDeque<String>,
    pub(crate) dirty: bool,
    animations: Vec<String>,
    states: HashMap<String, Vec<StateEntry>>,
}

impl Module {
    pub fn new(name: &str) -> Module {
        if name.contains('*') || name.contains('[') {
            log::error!(
                target: "module",
                "characters \"*\" and \"[\" are forbidden in module name \"{}\"",
                name
            );
        }
        Module {
            name: name.to_string(),
            protocol: None,
            port: None,
            parent: None,
            path: vec![name.to_string()],
            submodules: IndexMap::new(),
            aliases: HashMap::new(),
            parameters: IndexMap::new(),
            mappings: Vec::new(),
            dirty_queue: VecDeque::new(),
            dirty: false,
            animations: Vec::new(),
            states: HashMap::new(),
        }
    }

    pub fn with_protocol(mut self, protocol: Protocol) -> Module {
        self.protocol = Some(protocol);
        self
    }

    pub fn with_port(mut self, port: PortSpec) -> Module {
        self.port = Some(port);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Root-to-self name sequence.
    pub fn module_path(&self) -> &[String] {
        &self.path
    }

    pub fn protocol(&self) -> Option<Protocol> {
        self.protocol
    }

    pub fn port(&self) -> Option<&PortSpec> {
        self.port.as_ref()
    }

    pub fn parent(&self) -> Option<ModuleId> {
        self.parent
    }

    pub fn submodule_names(&self) -> impl Iterator<Item = &str> {
        self.submodules.keys().map(String::as_str)
    }

    pub fn parameter_names(&self) -> impl Iterator<Item = &str> {
        self.parameters.keys().map(String::as_str)
    }
}

/// The arena of modules plus everything a flush touches: the engine-level
/// dirty FIFO, the animating set, the outbound queue and the event bus.
pub struct ModuleTree {
    modules: Vec<Module>,
    state_dir: PathBuf,
    pub(crate) dirty_modules: VecDeque<ModuleId>,
    pub(crate) animating: Vec<ModuleId>,
    pub(crate) outbox: VecDeque<Message>,
    pub(crate) events: EventBus,
}

impl ModuleTree {
    pub fn new(root: Module, state_dir: PathBuf) -> ModuleTree {
        ModuleTree {
            modules: vec![root],
            state_dir,
            dirty_modules: VecDeque::new(),
            animating: Vec::new(),
            outbox: VecDeque::new(),
            events: EventBus::new(),
        }
    }

    pub fn root(&self) -> ModuleId {
        ModuleId(0)
    }

    pub fn module(&self, id: ModuleId) -> &Module {
        &self.modules[id.0]
    }

    pub fn module_mut(&mut self, id: ModuleId) -> &mut Module {
        &mut self.modules[id.0]
    }

    /// Attach a constructed module under a parent. The submodule inherits the
    /// parent's protocol and port when its own are unset; a MIDI module with
    /// no port gets its own name as device port.
    pub fn add_submodule(&mut self, parent: ModuleId, mut module: Module) -> ModuleId {
        let id = ModuleId(self.modules.len());
        if module.protocol == Some(Protocol::Midi) && module.port.is_none() {
            module.port = Some(PortSpec::Device(module.name.clone()));
        }
        let (parent_path, parent_protocol, parent_port) = {
            let p = &self.modules[parent.0];
            (p.path.clone(), p.protocol, p.port.clone())
        };
        if module.protocol.is_none() {
            module.protocol = parent_protocol;
        }
        if module.port.is_none() {
            module.port = parent_port;
        }
        module.parent = Some(parent);
        let mut path = parent_path.clone();
        path.push(module.name.clone());
        module.path = path;
        let name = module.name.clone();
        self.modules.push(module);
        if self.modules[parent.0]
            .submodules
            .insert(name.clone(), id)
            .is_some()
        {
            log::error!(
                target: "module",
                "submodule \"{}\" already exists under \"{}\", replacing",
                name,
                parent_path.join("/")
            );
        }
        self.events.dispatch(EngineEvent::ModuleAdded {
            parent_path,
            name,
        });
        id
    }

    /// Install alternate names for submodules.
    pub fn set_aliases(&mut self, id: ModuleId, aliases: &[(&str, &str)]) {
        let m = &mut self.modules[id.0];
        m.aliases = aliases
            .iter()
            .map(|(alias, name)| (alias.to_string(), name.to_string()))
            .collect();
    }

    /// Add a parameter, resetting it to its default immediately. Duplicate
    /// names are a logged error and a no-op.
    pub fn add_parameter(&mut self, id: ModuleId, parameter: Parameter) {
        let name = parameter.name().to_string();
        {
            let m = &mut self.modules[id.0];
            if m.parameters.contains_key(&name) {
                log::error!(
                    target: "module",
                    "could not add parameter \"{}\" (parameter already exists)",
                    name
                );
                return;
            }
            m.parameters.insert(name.clone(), parameter);
        }
        self.reset(id, Some(&name));
        let module_path = self.modules[id.0].path.clone();
        self.events.dispatch(EngineEvent::ParameterAdded {
            module_path,
            name,
        });
    }

    /// Remove a parameter; `"*"` removes all of them.
    pub fn remove_parameter(&mut self, id: ModuleId, name: &str) {
        if name == "*" {
            let names: Vec<String> = self.modules[id.0].parameters.keys().cloned().collect();
            for name in names {
                self.remove_parameter(id, &name);
            }
            return;
        }
        let m = &mut self.modules[id.0];
        m.parameters.shift_remove(name);
        m.animations.retain(|n| n != name);
    }

    /// Get a parameter's current dynamic values. Exact resolution only.
    pub fn get(&self, id: ModuleId, target: &[&str]) -> Option<Vec<Value>> {
        match self.find_parameter(id, target) {
            Some(p) => Some(p.get().to_vec()),
            None => {
                log::error!(
                    target: "module",
                    "get: parameter or submodule \"{}\" not found",
                    target.join("/")
                );
                None
            }
        }
    }

    /// Look a parameter up without logging. Exact resolution only.
    pub fn get_parameter(&self, id: ModuleId, target: &[&str]) -> Option<&Parameter> {
        self.find_parameter(id, target)
    }

    fn find_parameter(&self, id: ModuleId, target: &[&str]) -> Option<&Parameter> {
        let (mid, name) = resolve_one(self, id, target)?;
        self.modules[mid.0].parameters.get(&name)
    }

    fn parameter_at(&self, id: ModuleId, path: &[String]) -> Option<&Parameter> {
        let target: Vec<&str> = path.iter().map(String::as_str).collect();
        self.find_parameter(id, &target)
    }

    /// Set parameter value(s). The leading target segment may be a literal
    /// submodule or alias name, a wildcard, or a bracket range; the call fans
    /// out to every match. The new value is applied now and flushed at the
    /// end of the current cycle unless `force_send` bypasses the buffer.
    pub fn set(&mut self, id: ModuleId, target: &[&str], values: &[Value], opts: SetOptions) {
        let targets = resolve_pattern(self, id, target);
        if targets.is_empty() {
            log::error!(
                target: "module",
                "set: parameter or submodule \"{}\" not found",
                target.join("/")
            );
            return;
        }
        for (mid, name) in targets {
            self.set_local(mid, &name, values, opts);
        }
    }

    fn set_local(&mut self, mid: ModuleId, name: &str, values: &[Value], opts: SetOptions) {
        let mut immediate: Option<(String, Vec<Value>)> = None;
        let mut newly_dirty = false;
        {
            let m = &mut self.modules[mid.0];
            let Some(p) = m.parameters.get_mut(name) else {
                log::error!(
                    target: "module",
                    "set: parameter or submodule \"{}\" not found",
                    name
                );
                return;
            };
            if p.animating() && !opts.preserve_animation {
                p.stop_animation();
            }
            let forced_address = if opts.force_send {
                p.address().map(str::to_string)
            } else {
                None
            };
            if let Some(address) = forced_address {
                p.set(values);
                p.mark_forced();
                let args = p.get_message_args();
                p.set_last_sent();
                immediate = Some((address, args));
            } else if p.set(values) && !p.dirty {
                p.dirty = true;
                m.dirty_queue.push_back(name.to_string());
                newly_dirty = true;
            }
        }
        if newly_dirty {
            self.mark_module_dirty(mid);
        }
        if let Some((address, args)) = immediate {
            self.send(mid, &address, args);
        }
    }

    /// Reset a named parameter — or, when `name` is `None`, every parameter
    /// recursively including submodules — to its default value(s).
    pub fn reset(&mut self, id: ModuleId, name: Option<&str>) {
        match name {
            None => {
                let subs: Vec<ModuleId> = self.modules[id.0].submodules.values().copied().collect();
                for sub in subs {
                    self.reset(sub, None);
                }
                let names: Vec<String> = self.modules[id.0].parameters.keys().cloned().collect();
                for name in names {
                    self.reset(id, Some(&name));
                }
            }
            Some(name) => {
                let default = self.modules[id.0]
                    .parameters
                    .get(name)
                    .and_then(|p| p.default().map(<[Value]>::to_vec));
                if let Some(default) = default {
                    self.set_local(id, name, &default, SetOptions::default());
                }
            }
        }
    }

    /// Start an animation on every resolved target.
    pub fn animate(&mut self, id: ModuleId, target: &[&str], args: AnimateArgs, now: u64) {
        let targets = resolve_pattern(self, id, target);
        if targets.is_empty() {
            log::error!(
                target: "module",
                "animate: parameter or submodule \"{}\" not found",
                target.join("/")
            );
            return;
        }
        for (mid, name) in targets {
            let started = {
                let m = &mut self.modules[mid.0];
                let Some(p) = m.parameters.get_mut(&name) else {
                    log::error!(
                        target: "module",
                        "animate: parameter or submodule \"{}\" not found",
                        name
                    );
                    continue;
                };
                p.start_animation(
                    now,
                    args.start.clone(),
                    args.end.clone(),
                    args.duration,
                    args.mode,
                    &args.easing,
                    args.looping,
                );
                p.animating()
            };
            if started {
                let m = &mut self.modules[mid.0];
                if !m.animations.contains(&name) {
                    m.animations.push(name.clone());
                }
                if !self.animating.contains(&mid) {
                    self.animating.push(mid);
                }
            }
        }
    }

    /// Stop animations. `"*"` stops every running animation in the subtree.
    pub fn stop_animate(&mut self, id: ModuleId, target: &[&str]) {
        if target == ["*"] {
            let subs: Vec<ModuleId> = self.modules[id.0].submodules.values().copied().collect();
            for sub in subs {
                self.stop_animate(sub, &["*"]);
            }
            let m = &mut self.modules[id.0];
            for name in m.animations.clone() {
                if let Some(p) = m.parameters.get_mut(&name) {
                    p.stop_animation();
                }
            }
            return;
        }
        for (mid, name) in resolve_pattern(self, id, target) {
            if let Some(p) = self.modules[mid.0].parameters.get_mut(&name) {
                p.stop_animation();
            }
        }
    }

    /// Advance animations: submodules first, then this module's active set.
    /// Animations observed idle are dropped from the set on this pass.
    pub fn update_animations(&mut self, id: ModuleId, now: u64, tempo: f64) {
        let subs: Vec<ModuleId> = self.modules[id.0].submodules.values().copied().collect();
        for sub in subs {
            self.update_animations(sub, now, tempo);
        }
        let names: Vec<String> = self.modules[id.0].animations.clone();
        for name in names {
            let mut newly_dirty = false;
            let mut finished = false;
            {
                let m = &mut self.modules[id.0];
                match m.parameters.get_mut(&name) {
                    Some(p) if p.animating() => {
                        if p.update_animation(now, tempo) && !p.dirty {
                            p.dirty = true;
                            m.dirty_queue.push_back(name.clone());
                            newly_dirty = true;
                        }
                    }
                    _ => finished = true,
                }
            }
            if finished {
                self.modules[id.0].animations.retain(|n| n != &name);
            }
            if newly_dirty {
                self.mark_module_dirty(id);
            }
        }
    }

    /// True while this module still owns running animations.
    pub fn has_animations(&self, id: ModuleId) -> bool {
        !self.modules[id.0].animations.is_empty()
    }

    /// Register a value mapping between parameters owned by this module or
    /// its submodules. `src`/`dest` entries are slash paths relative to the
    /// module (`"gain"`, `"voice1/gain"`). An `inverse` registers the
    /// reciprocal mapping. The new mapping is evaluated once immediately
    /// unless a referenced parameter does not exist yet.
    pub fn add_mapping(
        &mut self,
        id: ModuleId,
        src: &[&str],
        dest: &[&str],
        transform: Arc<TransformFn>,
        inverse: Option<Arc<TransformFn>>,
    ) {
        let src_paths: Vec<ParamPath> = src.iter().map(|s| parse_path(s)).collect();
        let dest_paths: Vec<ParamPath> = dest.iter().map(|s| parse_path(s)).collect();
        self.modules[id.0]
            .mappings
            .push(Mapping::new(src_paths.clone(), dest_paths.clone(), transform));
        let idx = self.modules[id.0].mappings.len() - 1;
        if let Some(inverse) = inverse {
            self.add_mapping(id, dest, src, inverse, None);
        }
        // Skip the initial evaluation while dependencies are missing — they
        // may simply not be ready yet.
        for path in src_paths.iter().chain(dest_paths.iter()) {
            if self.parameter_at(id, path).is_none() {
                return;
            }
        }
        self.update_mapping(id, idx);
    }

    /// Re-evaluate every local mapping whose source matches `path`, then
    /// bubble the (name-prefixed) path up to the parent so ancestor-owned
    /// mappings see the change too.
    pub(crate) fn check_mappings(&mut self, id: ModuleId, path: Vec<String>) {
        let mut idx = 0;
        while idx < self.modules[id.0].mappings.len() {
            if self.modules[id.0].mappings[idx].matches(&path) {
                self.update_mapping(id, idx);
            }
            idx += 1;
        }
        if let Some(parent) = self.modules[id.0].parent {
            let mut prefixed = Vec::with_capacity(path.len() + 1);
            prefixed.push(self.modules[id.0].name.clone());
            prefixed.extend(path);
            self.check_mappings(parent, prefixed);
        }
    }

    fn update_mapping(&mut self, id: ModuleId, idx: usize) {
        {
            let Some(mapping) = self.modules[id.0].mappings.get_mut(idx) else {
                return;
            };
            if !mapping.lock() {
                log::debug!(
                    target: "module",
                    "mapping already ran this cycle, skipping re-trigger"
                );
                return;
            }
        }
        let (sources, destinations, transform) = {
            let mapping = &self.modules[id.0].mappings[idx];
            (
                mapping.sources().to_vec(),
                mapping.destinations().to_vec(),
                mapping.transform(),
            )
        };
        let mut src_values: Vec<Value> = Vec::new();
        for path in &sources {
            match self.parameter_at(id, path) {
                Some(p) => src_values.extend(p.get().iter().cloned()),
                None => {
                    log::error!(
                        target: "module",
                        "mapping source \"{}\" not found",
                        path.join("/")
                    );
                    return;
                }
            }
        }
        // A panicking transform must not take the flush or the tick loop
        // down with it.
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            transform(&src_values)
        }));
        let values = match result {
            Ok(values) => values,
            Err(_) => {
                log::error!(target: "module", "mapping transform panicked, skipping");
                return;
            }
        };
        if destinations.len() == 1 {
            let target: Vec<&str> = destinations[0].iter().map(String::as_str).collect();
            self.set(id, &target, &values, SetOptions::default());
        } else {
            for (i, dest) in destinations.iter().enumerate() {
                let Some(value) = values.get(i) else {
                    log::error!(
                        target: "module",
                        "mapping transform returned {} values for {} destinations",
                        values.len(),
                        destinations.len()
                    );
                    break;
                };
                let target: Vec<&str> = dest.iter().map(String::as_str).collect();
                self.set(id, &target, std::slice::from_ref(value), SetOptions::default());
            }
        }
        // While the owning module is dirty its flush is still pending this
        // cycle: hold the lock until that flush's end-of-cycle sweep so a
        // transform/inverse pair cannot ping-pong. A clean owner unlocks now,
        // allowing a re-trigger later in the same cycle from a different
        // upstream source.
        if !self.modules[id.0].dirty {
            self.modules[id.0].mappings[idx].unlock();
        }
    }

    /// Add a parameter that mirrors another parameter owned by this module
    /// or a submodule: an unaddressed parameter plus a 1:1 mapping pair.
    pub fn add_alias_parameter(&mut self, id: ModuleId, name: &str, target: &str) {
        let path = parse_path(target);
        let Some(p) = self.parameter_at(id, &path) else {
            log::error!(
                target: "module",
                "could not create alias parameter \"{}\" for \"{}\" (parameter doesn't exist)",
                name,
                target
            );
            return;
        };
        let current = p.get().to_vec();
        let types = "*".repeat(current.len());
        if self.modules[id.0].parameters.contains_key(name) {
            log::error!(
                target: "module",
                "could not create alias parameter \"{}\" (parameter already exists)",
                name
            );
            return;
        }
        let mut mirror = Parameter::new(name, None, &types, vec![], None);
        mirror.set(&current);
        self.modules[id.0].parameters.insert(name.to_string(), mirror);
        self.add_mapping(
            id,
            &[target],
            &[name],
            Arc::new(|v: &[Value]| v.to_vec()),
            Some(Arc::new(|v: &[Value]| v.to_vec())),
        );
        let module_path = self.modules[id.0].path.clone();
        self.events.dispatch(EngineEvent::ParameterAdded {
            module_path,
            name: name.to_string(),
        });
    }

    /// Flush this module's dirty parameters: transmit what changed, emit
    /// change events, re-evaluate affected mappings (which may dirty further
    /// parameters, resolved within this same flush), then unlock every owned
    /// mapping and clear the module's dirty flag. The engine guarantees at
    /// most one flush per module per tick.
    pub fn update_dirty_parameters(&mut self, id: ModuleId) {
        while let Some(name) = {
            let m = &mut self.modules[id.0];
            m.dirty_queue.pop_front()
        } {
            let mut outgoing: Option<(String, Vec<Value>)> = None;
            let mut changed: Option<Vec<Value>> = None;
            {
                let m = &mut self.modules[id.0];
                let Some(p) = m.parameters.get_mut(&name) else {
                    continue;
                };
                if p.should_send() {
                    outgoing = p.address().map(|a| (a.to_string(), p.get_message_args()));
                    changed = Some(p.get().to_vec());
                    p.set_last_sent();
                }
                p.dirty = false;
            }
            if let Some((address, args)) = outgoing {
                self.send(id, &address, args);
            }
            if let Some(value) = changed {
                let module_path = self.modules[id.0].path.clone();
                self.events.dispatch(EngineEvent::ParameterChanged {
                    module_path,
                    name: name.clone(),
                    value,
                });
                self.check_mappings(id, vec![name]);
            }
        }
        for mapping in &mut self.modules[id.0].mappings {
            mapping.unlock();
        }
        self.modules[id.0].dirty = false;
    }

    /// Flat state rows for this module and its subtree, submodule rows
    /// prefixed by the submodule name.
    pub fn get_state(&self, id: ModuleId, omit_defaults: bool) -> Vec<StateRow> {
        let mut rows = Vec::new();
        let m = &self.modules[id.0];
        for (name, p) in &m.parameters {
            let values = p.get();
            if omit_defaults && p.default() == Some(values) {
                continue;
            }
            let mut row: StateRow = vec![Value::Str(name.clone())];
            row.extend(values.iter().cloned());
            rows.push(row);
        }
        let subs: Vec<(String, ModuleId)> = m
            .submodules
            .iter()
            .map(|(n, sid)| (n.clone(), *sid))
            .collect();
        for (name, sid) in subs {
            for mut row in self.get_state(sid, omit_defaults) {
                row.insert(0, Value::Str(name.clone()));
                rows.push(row);
            }
        }
        rows
    }

    /// Apply state rows through the normal `set` path.
    pub fn set_state(&mut self, id: ModuleId, rows: &[StateRow], force_send: bool) {
        let opts = SetOptions {
            force_send,
            preserve_animation: false,
        };
        for row in rows {
            self.apply_row(id, row, opts);
        }
    }

    fn apply_row(&mut self, id: ModuleId, row: &[Value], opts: SetOptions) {
        let mut mid = id;
        let mut i = 0;
        while let Some(Value::Str(segment)) = row.get(i) {
            match self.submodule_id(mid, segment) {
                Some(sub) if i + 1 < row.len() => {
                    mid = sub;
                    i += 1;
                }
                _ => break,
            }
        }
        let Some(Value::Str(name)) = row.get(i) else {
            log::error!(target: "module", "malformed state row (missing parameter name)");
            return;
        };
        let name = name.clone();
        self.set_local(mid, &name, &row[i + 1..], opts);
    }

    /// Retransmit the whole subtree state.
    pub fn send_state(&mut self, id: ModuleId) {
        let rows = self.get_state(id, false);
        self.set_state(id, &rows, true);
    }

    /// Save the subtree state to a named JSON file under this module's state
    /// directory.
    pub fn save(&mut self, id: ModuleId, name: &str, omit_defaults: bool) {
        let rows = self.get_state(id, omit_defaults);
        let entries: Vec<StateEntry> = rows.into_iter().map(StateEntry::Row).collect();
        let path = self.state_file(id, name);
        match state::write_state(&path, &entries) {
            Ok(()) => {
                self.modules[id.0].states.insert(name.to_string(), entries);
                log::info!(
                    target: "module",
                    "state \"{}\" saved to {}",
                    name,
                    path.display()
                );
            }
            Err(e) => log::error!(target: "module", "{}", e),
        }
    }

    /// Load a named state, reading and caching the file on first use. A
    /// failed read or parse leaves any cached state unmodified.
    pub fn load(&mut self, id: ModuleId, name: &str, force_send: bool) {
        if !self.modules[id.0].states.contains_key(name) {
            let path = self.state_file(id, name);
            match state::read_state(&path) {
                Ok(entries) => {
                    self.modules[id.0].states.insert(name.to_string(), entries);
                    log::info!(
                        target: "module",
                        "state \"{}\" preloaded from {}",
                        name,
                        path.display()
                    );
                }
                Err(e) => log::error!(target: "module", "{}", e),
            }
        }
        let Some(entries) = self.modules[id.0].states.get(name).cloned() else {
            log::error!(target: "module", "state \"{}\" not found", name);
            return;
        };
        let rows: Vec<StateRow> = entries
            .into_iter()
            .filter_map(|e| match e {
                StateEntry::Row(row) => Some(row),
                StateEntry::Comment(_) => None,
            })
            .collect();
        self.set_state(id, &rows, force_send);
        log::info!(target: "module", "state \"{}\" loaded", name);
    }

    /// Names of states saved on disk for this module.
    pub fn list_states(&self, id: ModuleId) -> Vec<String> {
        state::list_states(&self.module_state_dir(id))
    }

    fn module_state_dir(&self, id: ModuleId) -> PathBuf {
        let mut dir = self.state_dir.join("states");
        for segment in &self.modules[id.0].path[1..] {
            dir.push(segment);
        }
        dir
    }

    fn state_file(&self, id: ModuleId, name: &str) -> PathBuf {
        self.module_state_dir(id).join(format!("{}.json", name))
    }

    /// Enqueue an outbound message on this module's effective protocol/port —
    /// its own, or the nearest ancestor's with a port set. Without a resolved
    /// port the message is silently dropped.
    pub fn send(&mut self, id: ModuleId, address: &str, args: Vec<Value>) {
        let mut cursor = Some(id);
        while let Some(mid) = cursor {
            let m = &self.modules[mid.0];
            if let Some(port) = &m.port {
                let message = Message::new(
                    m.protocol.unwrap_or(Protocol::Osc),
                    port.clone(),
                    address,
                    args,
                );
                self.outbox.push_back(message);
                return;
            }
            cursor = m.parent;
        }
    }

    pub(crate) fn mark_module_dirty(&mut self, mid: ModuleId) {
        let m = &mut self.modules[mid.0];
        if !m.dirty {
            m.dirty = true;
            self.dirty_modules.push_back(mid);
        }
    }

    /// Resolve a submodule by name or alias.
    pub(crate) fn submodule_id(&self, id: ModuleId, name: &str) -> Option<ModuleId> {
        let m = &self.modules[id.0];
        if let Some(sub) = m.submodules.get(name) {
            return Some(*sub);
        }
        let canonical = m.aliases.get(name)?;
        m.submodules.get(canonical).copied()
    }

    /// Submodules whose name (or an alias of it) matches the pattern, in
    /// insertion order, deduplicated.
    pub(crate) fn matching_submodules(&self, id: ModuleId, re: &Regex) -> Vec<ModuleId> {
        let m = &self.modules[id.0];
        let mut out: Vec<ModuleId> = m
            .submodules
            .iter()
            .filter(|(name, _)| re.is_match(name))
            .map(|(_, sid)| *sid)
            .collect();
        for (alias, canonical) in &m.aliases {
            if re.is_match(alias) {
                if let Some(sid) = m.submodules.get(canonical) {
                    if !out.contains(sid) {
                        out.push(*sid);
                    }
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn float_param(name: &str, address: Option<&str>, default: f32) -> Parameter {
        Parameter::new(name, address, "f", vec![], Some(vec![Value::Float(default)]))
    }

    fn test_tree() -> ModuleTree {
        ModuleTree::new(
            Module::new("engine"),
            std::env::temp_dir().join("ostinato-module-tests"),
        )
    }

    /// Drain the dirty FIFO the way the engine does within one tick: at most
    /// one flush per module.
    fn flush_all(tree: &mut ModuleTree) {
        let mut flushed = HashSet::new();
        while let Some(mid) = tree.dirty_modules.pop_front() {
            if !flushed.insert(mid) {
                continue;
            }
            tree.update_dirty_parameters(mid);
        }
    }

    #[test]
    fn equal_sets_dirty_once() {
        let mut tree = test_tree();
        let root = tree.root();
        tree.add_parameter(root, float_param("x", Some("/x"), 0.0));
        tree.set(root, &["x"], &[Value::Float(1.0)], SetOptions::default());
        tree.set(root, &["x"], &[Value::Float(1.0)], SetOptions::default());
        assert_eq!(tree.dirty_modules.len(), 1);
        flush_all(&mut tree);
        assert_eq!(tree.outbox.len(), 1);
        let msg = tree.outbox.pop_front().unwrap();
        assert_eq!(msg.address, "/x");
        assert_eq!(msg.args, vec![Value::Float(1.0)]);
    }

    #[test]
    fn flush_emits_last_value_once() {
        let mut tree = test_tree();
        let root = tree.root();
        tree.add_parameter(root, float_param("x", Some("/x"), 0.0));
        tree.set(root, &["x"], &[Value::Float(1.0)], SetOptions::default());
        tree.set(root, &["x"], &[Value::Float(2.0)], SetOptions::default());
        flush_all(&mut tree);
        // Intermediate values are overwritten, not queued.
        assert_eq!(tree.outbox.len(), 1);
        assert_eq!(
            tree.outbox.pop_front().unwrap().args,
            vec![Value::Float(2.0)]
        );
    }

    #[test]
    fn unchanged_value_sends_nothing_after_snapshot() {
        let mut tree = test_tree();
        let root = tree.root();
        tree.add_parameter(root, float_param("x", Some("/x"), 0.0));
        tree.set(root, &["x"], &[Value::Float(1.0)], SetOptions::default());
        flush_all(&mut tree);
        tree.outbox.clear();
        tree.set(root, &["x"], &[Value::Float(1.0)], SetOptions::default());
        flush_all(&mut tree);
        assert!(tree.outbox.is_empty());
    }

    #[test]
    fn force_send_bypasses_dirty_buffer() {
        let mut tree = test_tree();
        let root = tree.root();
        tree.add_parameter(root, float_param("x", Some("/x"), 0.0));
        tree.set(
            root,
            &["x"],
            &[Value::Float(1.0)],
            SetOptions {
                force_send: true,
                preserve_animation: false,
            },
        );
        assert_eq!(tree.outbox.len(), 1);
        assert!(tree.dirty_modules.is_empty());
        // Forcing the same value again still transmits.
        tree.set(
            root,
            &["x"],
            &[Value::Float(1.0)],
            SetOptions {
                force_send: true,
                preserve_animation: false,
            },
        );
        assert_eq!(tree.outbox.len(), 2);
    }

    #[test]
    fn duplicate_parameter_is_rejected() {
        let mut tree = test_tree();
        let root = tree.root();
        tree.add_parameter(root, float_param("x", None, 1.0));
        tree.add_parameter(root, float_param("x", None, 9.0));
        assert_eq!(
            tree.get_parameter(root, &["x"]).unwrap().default(),
            Some(&[Value::Float(1.0)][..])
        );
    }

    fn voices_tree() -> (ModuleTree, ModuleId) {
        let mut tree = test_tree();
        let root = tree.root();
        for i in 1..=4 {
            let sub = tree.add_submodule(root, Module::new(&format!("voice{}", i)));
            tree.add_parameter(sub, float_param("gain", None, 0.0));
        }
        (tree, root)
    }

    #[test]
    fn bracket_range_fans_out_to_subset() {
        let (mut tree, root) = voices_tree();
        tree.set(
            root,
            &["voice[1-2]", "gain"],
            &[Value::Float(0.5)],
            SetOptions::default(),
        );
        assert_eq!(
            tree.get(root, &["voice1", "gain"]),
            Some(vec![Value::Float(0.5)])
        );
        assert_eq!(
            tree.get(root, &["voice2", "gain"]),
            Some(vec![Value::Float(0.5)])
        );
        assert_eq!(
            tree.get(root, &["voice3", "gain"]),
            Some(vec![Value::Float(0.0)])
        );
    }

    #[test]
    fn wildcard_fans_out_to_all() {
        let (mut tree, root) = voices_tree();
        tree.set(
            root,
            &["*", "gain"],
            &[Value::Float(0.3)],
            SetOptions::default(),
        );
        for i in 1..=4 {
            let name = format!("voice{}", i);
            assert_eq!(
                tree.get(root, &[&name, "gain"]),
                Some(vec![Value::Float(0.3)])
            );
        }
    }

    #[test]
    fn aliases_resolve_like_names() {
        let (mut tree, root) = voices_tree();
        tree.set_aliases(root, &[("lead", "voice1")]);
        tree.set(
            root,
            &["lead", "gain"],
            &[Value::Float(0.9)],
            SetOptions::default(),
        );
        assert_eq!(
            tree.get(root, &["voice1", "gain"]),
            Some(vec![Value::Float(0.9)])
        );
        assert_eq!(
            tree.get(root, &["lead", "gain"]),
            Some(vec![Value::Float(0.9)])
        );
    }

    #[test]
    fn state_roundtrip_preserves_values() {
        let (mut tree, root) = voices_tree();
        tree.add_parameter(root, float_param("master", None, 1.0));
        tree.set(
            root,
            &["voice1", "gain"],
            &[Value::Float(0.7)],
            SetOptions::default(),
        );
        let state = tree.get_state(root, false);
        // Rows: master plus one gain per voice.
        assert_eq!(state.len(), 5);
        tree.reset(root, None);
        tree.set_state(root, &state, false);
        assert_eq!(
            tree.get(root, &["voice1", "gain"]),
            Some(vec![Value::Float(0.7)])
        );
        assert_eq!(tree.get(root, &["master"]), Some(vec![Value::Float(1.0)]));
    }

    #[test]
    fn omit_defaults_filters_rows() {
        let (mut tree, root) = voices_tree();
        tree.set(
            root,
            &["voice2", "gain"],
            &[Value::Float(0.4)],
            SetOptions::default(),
        );
        let state = tree.get_state(root, true);
        assert_eq!(state.len(), 1);
        assert_eq!(
            state[0],
            vec![
                Value::Str("voice2".into()),
                Value::Str("gain".into()),
                Value::Float(0.4)
            ]
        );
    }

    #[test]
    fn mapping_doubles_destination_once_per_cycle() {
        let mut tree = test_tree();
        let root = tree.root();
        tree.add_parameter(root, float_param("a", None, 0.0));
        tree.add_parameter(root, float_param("b", Some("/b"), 0.0));
        tree.add_mapping(
            root,
            &["a"],
            &["b"],
            Arc::new(|v: &[Value]| {
                vec![Value::Float(v[0].as_number().unwrap_or(0.0) as f32 * 2.0)]
            }),
            Some(Arc::new(|v: &[Value]| {
                vec![Value::Float(v[0].as_number().unwrap_or(0.0) as f32 / 2.0)]
            })),
        );
        tree.outbox.clear();
        tree.set(root, &["a"], &[Value::Float(3.0)], SetOptions::default());
        flush_all(&mut tree);
        assert_eq!(tree.get(root, &["a"]), Some(vec![Value::Float(3.0)]));
        assert_eq!(tree.get(root, &["b"]), Some(vec![Value::Float(6.0)]));
        // Exactly one transmission of the destination, no inverse re-trigger.
        assert_eq!(tree.outbox.len(), 1);
        let msg = tree.outbox.pop_front().unwrap();
        assert_eq!(msg.address, "/b");
        assert_eq!(msg.args, vec![Value::Float(6.0)]);
        // Locks are released by the end-of-flush sweep.
        assert!(tree.modules[root.0].mappings.iter().all(|m| !m.is_locked()));
    }

    #[test]
    fn mapping_with_missing_dependency_defers() {
        let mut tree = test_tree();
        let root = tree.root();
        tree.add_parameter(root, float_param("a", None, 0.0));
        tree.add_mapping(
            root,
            &["a"],
            &["c"],
            Arc::new(|v: &[Value]| {
                vec![Value::Float(v[0].as_number().unwrap_or(0.0) as f32 * 2.0)]
            }),
            None,
        );
        // No evaluation yet: "c" does not exist.
        tree.add_parameter(root, float_param("c", None, 0.0));
        tree.set(root, &["a"], &[Value::Float(2.0)], SetOptions::default());
        flush_all(&mut tree);
        assert_eq!(tree.get(root, &["c"]), Some(vec![Value::Float(4.0)]));
    }

    #[test]
    fn ancestor_mapping_sees_submodule_change() {
        let mut tree = test_tree();
        let root = tree.root();
        let voice = tree.add_submodule(root, Module::new("voice1"));
        tree.add_parameter(voice, float_param("gain", None, 0.0));
        tree.add_parameter(root, float_param("master", None, 0.0));
        tree.add_mapping(
            root,
            &["voice1/gain"],
            &["master"],
            Arc::new(|v: &[Value]| vec![v[0].clone()]),
            None,
        );
        tree.set(
            root,
            &["voice1", "gain"],
            &[Value::Float(0.6)],
            SetOptions::default(),
        );
        flush_all(&mut tree);
        assert_eq!(tree.get(root, &["master"]), Some(vec![Value::Float(0.6)]));
    }

    #[test]
    fn panicking_transform_does_not_abort_flush() {
        let mut tree = test_tree();
        let root = tree.root();
        tree.add_parameter(root, float_param("a", None, 0.0));
        tree.add_parameter(root, float_param("b", Some("/b"), 0.0));
        tree.add_mapping(
            root,
            &["a"],
            &["b"],
            Arc::new(|_: &[Value]| panic!("boom")),
            None,
        );
        tree.set(root, &["a"], &[Value::Float(1.0)], SetOptions::default());
        flush_all(&mut tree);
        // The flush completed and the module is clean again.
        assert!(!tree.modules[root.0].dirty);
    }

    #[test]
    fn send_inherits_nearest_ancestor_port() {
        let mut tree = test_tree();
        let root = tree.root();
        let device = tree.add_submodule(
            root,
            Module::new("looper")
                .with_protocol(Protocol::Osc)
                .with_port(PortSpec::Number(9000)),
        );
        let sub = tree.add_submodule(device, Module::new("track1"));
        tree.send(sub, "/track/level", vec![Value::Float(0.5)]);
        let msg = tree.outbox.pop_front().unwrap();
        assert_eq!(msg.port, PortSpec::Number(9000));
        assert_eq!(msg.protocol, Protocol::Osc);
    }

    #[test]
    fn send_without_port_is_dropped() {
        let mut tree = test_tree();
        let root = tree.root();
        tree.send(root, "/nowhere", vec![]);
        assert!(tree.outbox.is_empty());
    }

    #[test]
    fn midi_module_defaults_port_to_name() {
        let mut tree = test_tree();
        let root = tree.root();
        let synth =
            tree.add_submodule(root, Module::new("prophet").with_protocol(Protocol::Midi));
        assert_eq!(
            tree.module(synth).port(),
            Some(&PortSpec::Device("prophet".into()))
        );
    }

    #[test]
    fn reset_restores_defaults_recursively() {
        let (mut tree, root) = voices_tree();
        tree.add_parameter(root, float_param("master", None, 1.0));
        tree.set(
            root,
            &["*", "gain"],
            &[Value::Float(0.8)],
            SetOptions::default(),
        );
        tree.set(root, &["master"], &[Value::Float(0.2)], SetOptions::default());
        tree.reset(root, None);
        assert_eq!(tree.get(root, &["master"]), Some(vec![Value::Float(1.0)]));
        assert_eq!(
            tree.get(root, &["voice1", "gain"]),
            Some(vec![Value::Float(0.0)])
        );
    }

    #[test]
    fn remove_all_parameters() {
        let mut tree = test_tree();
        let root = tree.root();
        tree.add_parameter(root, float_param("x", None, 0.0));
        tree.add_parameter(root, float_param("y", None, 0.0));
        tree.remove_parameter(root, "*");
        assert_eq!(tree.module(root).parameter_names().count(), 0);
    }

    #[test]
    fn save_and_load_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut tree = ModuleTree::new(Module::new("engine"), dir.path().to_path_buf());
        let root = tree.root();
        tree.add_parameter(root, float_param("x", None, 0.0));
        tree.set(root, &["x"], &[Value::Float(0.7)], SetOptions::default());
        tree.save(root, "snap", false);
        tree.set(root, &["x"], &[Value::Float(0.1)], SetOptions::default());
        tree.load(root, "snap", false);
        assert_eq!(tree.get(root, &["x"]), Some(vec![Value::Float(0.7)]));
        assert_eq!(tree.list_states(root), vec!["snap".to_string()]);

        // A fresh tree instance reads the file lazily.
        let mut fresh = ModuleTree::new(Module::new("engine"), dir.path().to_path_buf());
        let froot = fresh.root();
        fresh.add_parameter(froot, float_param("x", None, 0.0));
        fresh.load(froot, "snap", false);
        assert_eq!(fresh.get(froot, &["x"]), Some(vec![Value::Float(0.7)]));
    }

    #[test]
    fn load_unknown_state_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mut tree = ModuleTree::new(Module::new("engine"), dir.path().to_path_buf());
        let root = tree.root();
        tree.add_parameter(root, float_param("x", None, 0.0));
        tree.set(root, &["x"], &[Value::Float(0.5)], SetOptions::default());
        tree.load(root, "ghost", false);
        assert_eq!(tree.get(root, &["x"]), Some(vec![Value::Float(0.5)]));
    }

    #[test]
    fn set_stops_running_animation_unless_preserved() {
        let mut tree = test_tree();
        let root = tree.root();
        tree.add_parameter(root, float_param("x", None, 0.0));
        tree.animate(
            root,
            &["x"],
            AnimateArgs {
                start: Some(vec![0.0]),
                end: Some(vec![10.0]),
                duration: 1.0,
                mode: TimeMode::Seconds,
                ..AnimateArgs::default()
            },
            0,
        );
        assert!(tree.get_parameter(root, &["x"]).unwrap().animating());
        tree.set(root, &["x"], &[Value::Float(4.0)], SetOptions::default());
        assert!(!tree.get_parameter(root, &["x"]).unwrap().animating());

        tree.animate(
            root,
            &["x"],
            AnimateArgs {
                start: Some(vec![0.0]),
                end: Some(vec![10.0]),
                duration: 1.0,
                mode: TimeMode::Seconds,
                ..AnimateArgs::default()
            },
            0,
        );
        tree.set(
            root,
            &["x"],
            &[Value::Float(5.0)],
            SetOptions {
                force_send: false,
                preserve_animation: true,
            },
        );
        assert!(tree.get_parameter(root, &["x"]).unwrap().animating());
    }

    #[test]
    fn finished_animation_leaves_active_set_next_pass() {
        let mut tree = test_tree();
        let root = tree.root();
        tree.add_parameter(root, float_param("x", None, 0.0));
        tree.animate(
            root,
            &["x"],
            AnimateArgs {
                start: Some(vec![0.0]),
                end: Some(vec![10.0]),
                duration: 1.0,
                mode: TimeMode::Seconds,
                ..AnimateArgs::default()
            },
            0,
        );
        assert!(tree.has_animations(root));
        // Past the end: final value written, state goes idle.
        tree.update_animations(root, 2_000_000_000, 120.0);
        assert_eq!(tree.get(root, &["x"]), Some(vec![Value::Float(10.0)]));
        assert!(tree.has_animations(root));
        // The following scan drops it from the active set.
        tree.update_animations(root, 2_100_000_000, 120.0);
        assert!(!tree.has_animations(root));
    }

    #[test]
    fn alias_parameter_mirrors_both_ways() {
        let mut tree = test_tree();
        let root = tree.root();
        let voice = tree.add_submodule(root, Module::new("voice1"));
        tree.add_parameter(voice, float_param("gain", None, 0.0));
        tree.add_alias_parameter(root, "lead_gain", "voice1/gain");
        tree.set(
            root,
            &["voice1", "gain"],
            &[Value::Float(0.4)],
            SetOptions::default(),
        );
        flush_all(&mut tree);
        assert_eq!(
            tree.get(root, &["lead_gain"]),
            Some(vec![Value::Float(0.4)])
        );
        tree.set(root, &["lead_gain"], &[Value::Float(0.9)], SetOptions::default());
        flush_all(&mut tree);
        assert_eq!(
            tree.get(root, &["voice1", "gain"]),
            Some(vec![Value::Float(0.9)])
        );
    }

    #[test]
    fn stop_animate_wildcard_covers_subtree() {
        let (mut tree, root) = voices_tree();
        tree.animate(
            root,
            &["*", "gain"],
            AnimateArgs {
                start: Some(vec![0.0]),
                end: Some(vec![1.0]),
                duration: 10.0,
                mode: TimeMode::Seconds,
                ..AnimateArgs::default()
            },
            0,
        );
        assert!(tree
            .get_parameter(root, &["voice1", "gain"])
            .unwrap()
            .animating());
        tree.stop_animate(root, &["*"]);
        for i in 1..=4 {
            let name = format!("voice{}", i);
            assert!(!tree
                .get_parameter(root, &[&name, "gain"])
                .unwrap()
                .animating());
        }
    }
}
