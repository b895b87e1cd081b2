//! Shared documents exchanged between cooperating daemons.
//!
//! Every document is JSON text stored under one key. Writes are last writer
//! wins. Reads never fail: a missing or malformed document yields the
//! compiled-in default and a warning.

use std::{
    cell::RefCell,
    collections::HashMap,
};

use serde::{
    de::DeserializeOwned,
    Deserialize,
    Serialize,
};
use tracing::{
    debug,
    warn,
};

use crate::{
    error::SchedulerError,
    host::Host,
};

/// Narrow key/value interface over whatever persists the documents.
pub trait StateStore {
    fn get(
        &self,
        key: &str,
    ) -> Option<String>;

    fn set(
        &self,
        key: &str,
        value: &str,
    );
}

/// A document stored under a fixed key.
pub trait Document: Serialize + DeserializeOwned + Default {
    const KEY: &'static str;

    fn load(store: &impl StateStore) -> Self {
        load_json(store, Self::KEY)
    }

    fn save(
        &self,
        store: &impl StateStore,
    ) {
        save_json(store, Self::KEY, self)
    }
}

pub fn load_json<T>(
    store: &impl StateStore,
    key: &str,
) -> T
where
    T: DeserializeOwned + Default,
{
    let raw = match store.get(key) {
        Some(raw) if !raw.trim().is_empty() => raw,
        _ => {
            debug!(key, "document missing, using defaults");
            return T::default();
        },
    };

    match serde_json::from_str(&raw) {
        Ok(value) => value,
        Err(source) => {
            let error = SchedulerError::MalformedPersistedState {
                key: key.to_owned(),
                source,
            };
            warn!(%error, "using defaults");
            T::default()
        },
    }
}

pub fn save_json<T>(
    store: &impl StateStore,
    key: &str,
    value: &T,
) where
    T: Serialize,
{
    match serde_json::to_string(value) {
        Ok(raw) => store.set(key, &raw),
        Err(error) => warn!(key, %error, "document not serializable"),
    }
}

/// Stores documents as text files on the current node.
pub struct FileStore<'h, H: Host> {
    host: &'h H,
    dir: &'static str,
}

impl<'h, H: Host> FileStore<'h, H> {
    pub fn new(host: &'h H) -> FileStore<'h, H> {
        FileStore { host, dir: "/data" }
    }

    fn path(
        &self,
        key: &str,
    ) -> String {
        format!("{}/{}.txt", self.dir, key)
    }
}

impl<H: Host> StateStore for FileStore<'_, H> {
    fn get(
        &self,
        key: &str,
    ) -> Option<String> {
        let contents = self.host.read_file(&self.path(key));
        (!contents.is_empty()).then_some(contents)
    }

    fn set(
        &self,
        key: &str,
        value: &str,
    ) {
        self.host.write_file(&self.path(key), value);
    }
}

/// In-process store, for tests and single-process runs.
#[derive(Debug, Default)]
pub struct MemoryStore(RefCell<HashMap<String, String>>);

impl StateStore for MemoryStore {
    fn get(
        &self,
        key: &str,
    ) -> Option<String> {
        self.0.borrow().get(key).cloned()
    }

    fn set(
        &self,
        key: &str,
        value: &str,
    ) {
        self.0.borrow_mut().insert(key.to_owned(), value.to_owned());
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GamePhase {
    #[default]
    Early,
    EarlyMid,
    Mid,
    Late,
    Endgame,
}

impl GamePhase {
    pub fn detect(
        money: f64,
        hacking_level: u32,
    ) -> GamePhase {
        use GamePhase::*;

        match (money, hacking_level) {
            (m, l) if 1e15 < m && 2000 < l => Endgame,
            (m, l) if 1e12 < m && 1000 < l => Late,
            (m, l) if 1e9 < m && 500 < l => Mid,
            (m, l) if 1e6 < m && 50 < l => EarlyMid,
            _ => Early,
        }
    }

    /// What the other automations should focus on during this phase.
    pub fn priority(&self) -> Priority {
        use GamePhase::*;

        match self {
            Early => Priority::Xp,
            EarlyMid | Mid => Priority::Money,
            Late => Priority::Reputation,
            Endgame => Priority::Prestige,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Priority {
    Xp,
    #[default]
    Money,
    Reputation,
    Prestige,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AggregateStats {
    pub income: f64,
    pub hacking_level: u32,
    pub net_worth: f64,
}

/// Cross-process coordination document.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Coordination {
    pub phase: GamePhase,
    pub priority: Priority,
    pub stats: AggregateStats,
    pub last_update: f64,
}

impl Document for Coordination {
    const KEY: &'static str = "brain-state";
}

/// Telemetry blob published by a subsystem, keyed `feedback-<subsystem>`.
pub fn feedback_key(subsystem: &str) -> String {
    format!("feedback-{}", subsystem)
}
