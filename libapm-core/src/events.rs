// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use rand::Rng;
use serde_json::{Map, Value};

/// An event rendered to its final JSON form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyticsEvent(String);

impl AnalyticsEvent {
    pub fn new(
        intrinsics: Map<String, Value>,
        user_attributes: Map<String, Value>,
        agent_attributes: Map<String, Value>,
    ) -> Self {
        Self(crate::json::event_triple(
            intrinsics,
            user_attributes,
            agent_attributes,
        ))
    }

    pub fn json(&self) -> &str {
        &self.0
    }
}

/// A bounded pool that keeps a uniform random sample of everything offered to it.
///
/// Once full, each new item replaces a random slot with probability `capacity / seen`, so
/// `seen()` may exceed `saved()`.
#[derive(Debug, Clone)]
pub struct Reservoir<T> {
    items: Vec<T>,
    capacity: usize,
    seen: u64,
}

impl<T> Reservoir<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Vec::new(),
            capacity,
            seen: 0,
        }
    }

    pub fn add(&mut self, item: T) {
        self.seen += 1;
        if self.capacity == 0 {
            return;
        }
        if self.items.len() < self.capacity {
            self.items.push(item);
            return;
        }
        let slot = rand::thread_rng().gen_range(0..self.seen);
        if let Some(existing) = self.items.get_mut(slot as usize) {
            *existing = item;
        }
    }

    pub fn seen(&self) -> u64 {
        self.seen
    }

    pub fn saved(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }
}
