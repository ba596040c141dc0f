//! Parameter: a named, typed value slot with optional wire address,
//! dirty/send tracking and animation state.

use ostinato_types::{TypeTag, Value};

use crate::easing::{lerp, Easing};
use crate::timer::TimeMode;

const NS_PER_SEC: f64 = 1_000_000_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnimationState {
    Idle,
    Running,
}

/// In-flight animation for one parameter. Durations are kept in mode units;
/// beat durations convert through the live tempo at every update, so a tempo
/// change rescales the remaining progress.
pub struct Animation {
    from: Vec<f64>,
    to: Vec<f64>,
    start_time: u64,
    duration: f64,
    mode: TimeMode,
    easing: Easing,
    looping: bool,
    state: AnimationState,
}

impl Animation {
    fn progress(&self, now: u64, tempo: f64) -> f64 {
        let duration_secs = match self.mode {
            TimeMode::Beats => self.duration * 60.0 / tempo,
            TimeMode::Seconds => self.duration,
            TimeMode::Nanoseconds => self.duration / NS_PER_SEC,
        };
        if duration_secs <= 0.0 {
            return 1.0;
        }
        let elapsed = now.saturating_sub(self.start_time) as f64 / NS_PER_SEC;
        elapsed / duration_secs
    }
}

/// A named value slot owned by a module.
///
/// The full argument vector holds a static prefix (fixed at creation) followed
/// by the dynamic values; only the dynamic tail is settable. A parameter
/// without an address is never transmitted — it exists for computed values
/// and mapping endpoints.
pub struct Parameter {
    name: String,
    address: Option<String>,
    types: Vec<TypeTag>,
    args: Vec<Value>,
    n_dynamic: usize,
    default: Option<Vec<Value>>,
    pub(crate) dirty: bool,
    forced: bool,
    last_sent: Option<Vec<Value>>,
    animation: Option<Animation>,
}

impl Parameter {
    /// Build a parameter. `types` is an OSC-style typetag string covering
    /// static and dynamic slots; `static_args` pins the leading slots.
    pub fn new(
        name: &str,
        address: Option<&str>,
        types: &str,
        static_args: Vec<Value>,
        default: Option<Vec<Value>>,
    ) -> Parameter {
        let types = TypeTag::parse(types);
        let n_dynamic = types.len().saturating_sub(static_args.len());
        let mut args: Vec<Value> = Vec::with_capacity(types.len());
        args.extend(static_args);
        for tag in types.iter().skip(args.len()) {
            // Dynamic slots start from a typed zero until first set/reset.
            args.push(match tag {
                TypeTag::Int => Value::Int(0),
                TypeTag::Float => Value::Float(0.0),
                TypeTag::Str => Value::Str(String::new()),
                TypeTag::True => Value::Bool(true),
                TypeTag::False => Value::Bool(false),
                TypeTag::Any => Value::Int(0),
            });
        }
        Parameter {
            name: name.to_string(),
            address: address.map(str::to_string),
            types,
            args,
            n_dynamic,
            default,
            dirty: false,
            forced: false,
            last_sent: None,
            animation: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    pub fn default(&self) -> Option<&[Value]> {
        self.default.as_deref()
    }

    /// Current dynamic values.
    pub fn get(&self) -> &[Value] {
        &self.args[self.args.len() - self.n_dynamic..]
    }

    /// Full argument vector for transmission: static prefix plus dynamics.
    pub fn get_message_args(&self) -> Vec<Value> {
        self.args.clone()
    }

    /// Apply new dynamic values. A count mismatch is logged and ignored.
    /// Returns true iff at least one slot actually changed.
    pub fn set(&mut self, values: &[Value]) -> bool {
        if values.len() != self.n_dynamic {
            log::error!(
                target: "param",
                "wrong number of arguments for \"{}\": {} expected, {} provided",
                self.name,
                self.n_dynamic,
                values.len()
            );
            return false;
        }
        let offset = self.args.len() - self.n_dynamic;
        let mut changed = false;
        for (i, value) in values.iter().enumerate() {
            let tag = self.types[offset + i];
            let Some(coerced) = tag.coerce(value) else {
                log::error!(
                    target: "param",
                    "cannot coerce {} for \"{}\" slot {}",
                    value,
                    self.name,
                    i
                );
                continue;
            };
            if coerced != self.args[offset + i] {
                self.args[offset + i] = coerced;
                changed = true;
            }
        }
        changed
    }

    /// True while an animation is running.
    pub fn animating(&self) -> bool {
        matches!(
            self.animation.as_ref().map(|a| a.state),
            Some(AnimationState::Running)
        )
    }

    /// Begin an animation. Omitted endpoints substitute the current value,
    /// which is only valid for single-valued numeric parameters.
    #[allow(clippy::too_many_arguments)]
    pub fn start_animation(
        &mut self,
        now: u64,
        start: Option<Vec<f64>>,
        end: Option<Vec<f64>>,
        duration: f64,
        mode: TimeMode,
        easing: &str,
        looping: bool,
    ) {
        let current = |p: &Parameter| -> Option<Vec<f64>> {
            if p.n_dynamic != 1 {
                return None;
            }
            p.get()[0].as_number().map(|n| vec![n])
        };
        let from = match start {
            Some(v) => v,
            None => match current(self) {
                Some(v) => v,
                None => {
                    log::error!(
                        target: "param",
                        "animate \"{}\": omitted start needs a single numeric value",
                        self.name
                    );
                    return;
                }
            },
        };
        let to = match end {
            Some(v) => v,
            None => match current(self) {
                Some(v) => v,
                None => {
                    log::error!(
                        target: "param",
                        "animate \"{}\": omitted end needs a single numeric value",
                        self.name
                    );
                    return;
                }
            },
        };
        if from.len() != self.n_dynamic || to.len() != self.n_dynamic {
            log::error!(
                target: "param",
                "animate \"{}\": wrong number of values ({} expected)",
                self.name,
                self.n_dynamic
            );
            return;
        }
        self.animation = Some(Animation {
            from,
            to,
            start_time: now,
            duration,
            mode,
            easing: Easing::parse(easing),
            looping,
            state: AnimationState::Running,
        });
    }

    pub fn stop_animation(&mut self) {
        if let Some(animation) = self.animation.as_mut() {
            animation.state = AnimationState::Idle;
        }
    }

    /// Advance the animation to `now`, writing the eased value through `set`.
    /// Returns whether the parameter value changed this step.
    pub fn update_animation(&mut self, now: u64, tempo: f64) -> bool {
        let Some(animation) = self.animation.as_mut() else {
            return false;
        };
        if animation.state != AnimationState::Running {
            return false;
        }
        let mut t = animation.progress(now, tempo);
        if animation.looping {
            t %= 1.0;
        } else if t >= 1.0 {
            t = 1.0;
            animation.state = AnimationState::Idle;
        }
        let eased = animation.easing.apply(t);
        let values: Vec<Value> = animation
            .from
            .iter()
            .zip(&animation.to)
            .map(|(from, to)| Value::Float(lerp(*from, *to, eased) as f32))
            .collect();
        self.set(&values)
    }

    /// True if a forced send was requested or the message args differ from
    /// the last flushed snapshot. Unaddressed parameters use the same
    /// comparison so mapping propagation still observes their changes; the
    /// flush site gates actual transmission on the address.
    pub fn should_send(&self) -> bool {
        if self.forced {
            return true;
        }
        self.last_sent.as_deref() != Some(&self.args[..])
    }

    /// Snapshot current message args as the new baseline for `should_send`.
    pub fn set_last_sent(&mut self) {
        self.last_sent = Some(self.args.clone());
        self.forced = false;
    }

    /// Request an unconditional transmit on the next send decision.
    pub fn mark_forced(&mut self) {
        self.forced = true;
    }
}
