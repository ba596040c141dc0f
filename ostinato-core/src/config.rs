//! Engine configuration: timing constants, startup tempo and the state
//! folder. Embedded TOML defaults, merged field-by-field with an optional
//! user file under the platform config directory.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

const DEFAULT_CONFIG: &str = include_str!("../config.toml");

#[derive(Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    timing: TimingConfig,
    #[serde(default)]
    defaults: DefaultsConfig,
    #[serde(default)]
    paths: PathsConfig,
}

#[derive(Deserialize, Default)]
struct TimingConfig {
    mainloop_period_us: Option<u64>,
    animation_period_us: Option<u64>,
}

#[derive(Deserialize, Default)]
struct DefaultsConfig {
    tempo: Option<f64>,
    cycle_length: Option<f64>,
}

#[derive(Deserialize, Default)]
struct PathsConfig {
    state_folder: Option<String>,
}

pub struct EngineConfig {
    timing: TimingConfig,
    defaults: DefaultsConfig,
    paths: PathsConfig,
}

impl Default for EngineConfig {
    /// Embedded defaults only — no filesystem access. What tests use.
    fn default() -> Self {
        let base: ConfigFile =
            toml::from_str(DEFAULT_CONFIG).expect("failed to parse embedded config.toml");
        EngineConfig {
            timing: base.timing,
            defaults: base.defaults,
            paths: base.paths,
        }
    }
}

impl EngineConfig {
    /// Embedded defaults merged with the user's config file, when present.
    pub fn load() -> Self {
        let mut config = EngineConfig::default();
        if let Some(path) = user_config_path() {
            if path.exists() {
                match std::fs::read_to_string(&path) {
                    Ok(contents) => match toml::from_str::<ConfigFile>(&contents) {
                        Ok(user) => {
                            merge_timing(&mut config.timing, user.timing);
                            merge_defaults(&mut config.defaults, user.defaults);
                            merge_paths(&mut config.paths, user.paths);
                        }
                        Err(e) => {
                            log::warn!(target: "config", "ignoring malformed config {}: {}", path.display(), e)
                        }
                    },
                    Err(e) => {
                        log::warn!(target: "config", "could not read config {}: {}", path.display(), e)
                    }
                }
            }
        }
        config
    }

    /// Tick loop period. Clamped to at least 100µs.
    pub fn mainloop_period(&self) -> Duration {
        Duration::from_micros(self.timing.mainloop_period_us.unwrap_or(1000).max(100))
    }

    /// Animation advance cadence. Never finer than the tick period.
    pub fn animation_period(&self) -> Duration {
        let anim = Duration::from_micros(self.timing.animation_period_us.unwrap_or(10_000));
        anim.max(self.mainloop_period())
    }

    /// Startup tempo in beats per minute.
    pub fn tempo(&self) -> f64 {
        self.defaults.tempo.unwrap_or(120.0).max(0.001)
    }

    /// Startup cycle length in beats.
    pub fn cycle_length(&self) -> f64 {
        self.defaults.cycle_length.unwrap_or(8.0).max(0.001)
    }

    /// Folder for per-module state files.
    pub fn state_folder(&self) -> PathBuf {
        match &self.paths.state_folder {
            Some(folder) => PathBuf::from(folder),
            None => dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("ostinato"),
        }
    }

    /// Override the state folder (embedding and tests).
    pub fn with_state_folder(mut self, folder: PathBuf) -> Self {
        self.paths.state_folder = Some(folder.to_string_lossy().into_owned());
        self
    }
}

fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("ostinato").join("config.toml"))
}

fn merge_timing(base: &mut TimingConfig, user: TimingConfig) {
    if user.mainloop_period_us.is_some() {
        base.mainloop_period_us = user.mainloop_period_us;
    }
    if user.animation_period_us.is_some() {
        base.animation_period_us = user.animation_period_us;
    }
}

fn merge_defaults(base: &mut DefaultsConfig, user: DefaultsConfig) {
    if user.tempo.is_some() {
        base.tempo = user.tempo;
    }
    if user.cycle_length.is_some() {
        base.cycle_length = user.cycle_length;
    }
}

fn merge_paths(base: &mut PathsConfig, user: PathsConfig) {
    if user.state_folder.is_some() {
        base.state_folder = user.state_folder;
    }
}
