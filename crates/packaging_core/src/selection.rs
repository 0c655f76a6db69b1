//! Multi-selection over the loaded container collection.

use std::collections::{BTreeSet, HashSet};

use shared::{domain::ContainerKey, protocol::Container};
use tracing::debug;

use crate::error::NotReadyContainer;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SelectionFlags {
    pub count: usize,
    pub can_open_samples: bool,
    pub can_create_proposal: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ContainerSelectionTracker {
    containers: Vec<Container>,
    loaded: bool,
    accounts: Vec<String>,
    account_filter: Option<String>,
    selected: BTreeSet<ContainerKey>,
}

impl ContainerSelectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the collection wholesale. Selection and account filter are reset.
    pub fn replace(&mut self, containers: Vec<Container>) {
        let accounts: BTreeSet<&str> = containers
            .iter()
            .map(|c| c.account_name.trim())
            .filter(|name| !name.is_empty())
            .collect();
        self.accounts = accounts.into_iter().map(str::to_string).collect();
        self.containers = containers;
        self.loaded = true;
        self.account_filter = None;
        self.selected.clear();
    }

    /// Forgets the collection; the next activation of container selection reloads it.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn containers(&self) -> &[Container] {
        &self.containers
    }

    pub fn accounts(&self) -> &[String] {
        &self.accounts
    }

    pub fn account_filter(&self) -> Option<&str> {
        self.account_filter.as_deref()
    }

    /// Exact-match filter on the account name; blank means all accounts.
    pub fn set_account_filter(&mut self, account: Option<&str>) {
        self.account_filter = account
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string);
        self.selected.clear();
    }

    pub fn visible(&self) -> impl Iterator<Item = &Container> {
        let filter = self.account_filter.as_deref();
        self.containers
            .iter()
            .filter(move |c| filter.map_or(true, |account| c.account_name.trim() == account))
    }

    /// Replaces the selection. Keys outside the loaded, filtered collection are dropped.
    pub fn select<I>(&mut self, keys: I)
    where
        I: IntoIterator<Item = ContainerKey>,
    {
        let visible: HashSet<ContainerKey> = self.visible().map(Container::key).collect();
        let mut ignored = 0usize;
        self.selected = keys
            .into_iter()
            .filter(|key| {
                let keep = visible.contains(key);
                ignored += usize::from(!keep);
                keep
            })
            .collect();
        if ignored > 0 {
            debug!(ignored, "selection: dropped keys outside the visible collection");
        }
    }

    pub fn clear(&mut self) {
        self.selected.clear();
    }

    pub fn is_selected(&self, key: &ContainerKey) -> bool {
        self.selected.contains(key)
    }

    /// Selected containers in collection order.
    pub fn selected(&self) -> Vec<&Container> {
        self.visible()
            .filter(|c| self.selected.contains(&c.key()))
            .collect()
    }

    pub fn count(&self) -> usize {
        self.selected.len()
    }

    pub fn not_ready(&self) -> Vec<NotReadyContainer> {
        self.selected()
            .into_iter()
            .filter(|c| !c.is_ready())
            .map(|c| NotReadyContainer {
                key: c.key(),
                samples_received: c.samples_received,
                container_total: c.container_total,
            })
            .collect()
    }

    pub fn flags(&self) -> SelectionFlags {
        let count = self.count();
        SelectionFlags {
            count,
            can_open_samples: count > 0,
            can_create_proposal: count > 0 && self.selected().iter().all(|c| c.is_ready()),
        }
    }
}

#[cfg(test)]
#[path = "tests/selection_tests.rs"]
mod tests;
