//! Name → factory registry for referees.
//!
//! The registry owns every static fact about a referee (category, cost,
//! timeout, display name) alongside a factory closure. Lookups are
//! case-insensitive and aliases resolve to the same entry.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::error::RegistryError;
use crate::referee::{Referee, RefereeCategory};

/// Cost charged for a referee the registry has no entry for.
pub const DEFAULT_COST: usize = 3;

/// Timeout applied to a referee the registry has no entry for.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Builds a fresh referee instance per job.
pub type RefereeFactory = Arc<dyn Fn() -> Box<dyn Referee> + Send + Sync>;

/// Static description of a registered referee.
#[derive(Debug, Clone, Serialize)]
pub struct RefereeDescriptor {
    pub name: String,
    pub category: RefereeCategory,
    /// Capacity units charged while the referee runs.
    pub cost: usize,
    #[serde(with = "crate::config::duration_secs")]
    pub timeout: Duration,
    /// Short label for UI updates.
    pub short_name: String,
    pub description: String,
    pub aliases: Vec<String>,
}

impl RefereeDescriptor {
    pub fn new(name: impl Into<String>, category: RefereeCategory) -> Self {
        let name = name.into();
        Self {
            short_name: name.clone(),
            name,
            category,
            cost: DEFAULT_COST,
            timeout: DEFAULT_TIMEOUT,
            description: String::new(),
            aliases: Vec::new(),
        }
    }

    pub fn cost(mut self, cost: usize) -> Self {
        self.cost = cost.max(1);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn short_name(mut self, short_name: impl Into<String>) -> Self {
        self.short_name = short_name.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }
}

struct Entry {
    descriptor: RefereeDescriptor,
    factory: RefereeFactory,
}

/// Registry of available referees.
#[derive(Default)]
pub struct RefereeRegistry {
    entries: Vec<Entry>,
    index: HashMap<String, usize>,
}

fn normalize(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}

impl RefereeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a referee. Fails if the name or any alias is already taken.
    pub fn register<F>(&mut self, descriptor: RefereeDescriptor, factory: F) -> Result<(), RegistryError>
    where
        F: Fn() -> Box<dyn Referee> + Send + Sync + 'static,
    {
        let keys: Vec<String> = std::iter::once(&descriptor.name)
            .chain(descriptor.aliases.iter())
            .map(|k| normalize(k))
            .collect();
        if let Some(taken) = keys.iter().find(|k| self.index.contains_key(*k)) {
            return Err(RegistryError::Duplicate(taken.clone()));
        }

        let slot = self.entries.len();
        for key in keys {
            self.index.insert(key, slot);
        }
        log::debug!(
            "registered referee {} ({}, cost {})",
            descriptor.name,
            descriptor.category,
            descriptor.cost
        );
        self.entries.push(Entry {
            descriptor,
            factory: Arc::new(factory),
        });
        Ok(())
    }

    fn entry(&self, name: &str) -> Option<&Entry> {
        self.index.get(&normalize(name)).map(|&i| &self.entries[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entry(name).is_some()
    }

    pub fn descriptor(&self, name: &str) -> Option<&RefereeDescriptor> {
        self.entry(name).map(|e| &e.descriptor)
    }

    /// Construct a fresh referee by name or alias.
    pub fn get_referee_factory(&self, name: &str) -> Result<Box<dyn Referee>, RegistryError> {
        self.entry(name)
            .map(|e| (e.factory)())
            .ok_or_else(|| RegistryError::UnknownReferee(name.to_string()))
    }

    /// The factory itself, for callers that construct on another thread.
    pub fn factory(&self, name: &str) -> Result<RefereeFactory, RegistryError> {
        self.entry(name)
            .map(|e| Arc::clone(&e.factory))
            .ok_or_else(|| RegistryError::UnknownReferee(name.to_string()))
    }

    pub fn cost_of(&self, name: &str) -> usize {
        self.descriptor(name).map_or(DEFAULT_COST, |d| d.cost)
    }

    pub fn timeout_of(&self, name: &str) -> Duration {
        self.descriptor(name).map_or(DEFAULT_TIMEOUT, |d| d.timeout)
    }

    pub fn category_of(&self, name: &str) -> Option<RefereeCategory> {
        self.descriptor(name).map(|d| d.category)
    }

    /// Short UI label; falls back to the name itself.
    pub fn short_name_of(&self, name: &str) -> String {
        self.descriptor(name)
            .map_or_else(|| name.to_string(), |d| d.short_name.clone())
    }

    /// Descriptors in registration order.
    pub fn descriptors(&self) -> impl Iterator<Item = &RefereeDescriptor> {
        self.entries.iter().map(|e| &e.descriptor)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check a Tri-Gate selection: exactly three registered referees, no
    /// repeats, three distinct categories.
    pub fn validate_compatibility(&self, names: &[&str]) -> Result<(), RegistryError> {
        if names.len() != 3 {
            return Err(RegistryError::WrongBatterySize(names.len()));
        }
        let mut seen = HashSet::new();
        let mut categories = HashSet::new();
        for name in names {
            let d = self
                .descriptor(name)
                .ok_or_else(|| RegistryError::UnknownReferee(name.to_string()))?;
            if !seen.insert(normalize(&d.name)) {
                return Err(RegistryError::RepeatedReferee(d.name.clone()));
            }
            categories.insert(d.category);
        }
        if categories.len() != 3 {
            return Err(RegistryError::SharedCategory);
        }
        Ok(())
    }
}

impl std::fmt::Debug for RefereeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|e| &e.descriptor.name))
            .finish()
    }
}
