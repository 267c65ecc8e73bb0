// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Segment tree of a transaction and its exclusive time bookkeeping.
//!
//! Segments live in an arena indexed by position; index 0 is the root. Every segment owns a
//! children duration accumulator. While a segment runs, it is the tree's "current" segment:
//! segments started without an explicit parent nest under it, and it is restored to the previous
//! owner when the segment ends.

use libapm_common::time::Micros;

pub(crate) const ROOT: usize = 0;

/// Reference to a segment of a specific transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SegmentHandle {
    pub(crate) txn_id: u64,
    pub(crate) index: usize,
}

impl SegmentHandle {
    pub fn is_root(&self) -> bool {
        self.index == ROOT
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatastoreAttrs {
    /// Datastore vendor, e.g. `MySQL`. Defaults to `Other`.
    pub product: Option<String>,
    pub collection: Option<String>,
    /// Defaults to `other`.
    pub operation: Option<String>,
    pub host: Option<String>,
    pub port_path_or_id: Option<String>,
    pub database_name: Option<String>,
    pub query: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExternalAttrs {
    pub uri: String,
    pub method: Option<String>,
    pub library: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SegmentKind {
    #[default]
    Generic,
    Datastore(DatastoreAttrs),
    External(ExternalAttrs),
}

#[derive(Debug, Clone)]
pub(crate) struct SegmentNode {
    pub(crate) start: Micros,
    pub(crate) stop: Micros,
    pub(crate) timing_set: bool,
    pub(crate) ended: bool,
    pub(crate) kind: SegmentKind,
    pub(crate) name: Option<String>,
    pub(crate) parent: Option<usize>,
    pub(crate) children: Vec<usize>,
    kids_duration: Micros,
    saved_owner: Option<usize>,
    pub(crate) duration: Micros,
    pub(crate) exclusive: Micros,
    pub(crate) guid: Option<String>,
}

impl SegmentNode {
    fn new(start: Micros, parent: Option<usize>, saved_owner: Option<usize>) -> Self {
        Self {
            start,
            stop: start,
            timing_set: false,
            ended: false,
            kind: SegmentKind::Generic,
            name: None,
            parent,
            children: Vec::new(),
            kids_duration: 0,
            saved_owner,
            duration: 0,
            exclusive: 0,
            guid: None,
        }
    }
}

/// Timing of a segment that just ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Ended {
    pub(crate) duration: Micros,
    pub(crate) exclusive: Micros,
}

#[derive(Debug, Clone)]
pub(crate) struct SegmentTree {
    nodes: Vec<SegmentNode>,
    current: Option<usize>,
    depth: u32,
}

impl SegmentTree {
    pub(crate) fn new(start: Micros) -> Self {
        Self {
            nodes: vec![SegmentNode::new(start, None, None)],
            current: Some(ROOT),
            depth: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn get(&self, index: usize) -> Option<&SegmentNode> {
        self.nodes.get(index)
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut SegmentNode> {
        self.nodes.get_mut(index)
    }

    pub(crate) fn root(&self) -> &SegmentNode {
        &self.nodes[ROOT]
    }

    /// Number of segments currently running, not counting the root.
    pub(crate) fn depth(&self) -> u32 {
        self.depth
    }

    pub(crate) fn current(&self) -> Option<usize> {
        self.current
    }

    fn is_open(&self, index: usize) -> bool {
        self.nodes.get(index).is_some_and(|n| !n.ended)
    }

    /// Starts a segment under `parent`, or under the running segment when no parent is given.
    pub(crate) fn start(&mut self, parent: Option<usize>, now: Micros) -> usize {
        let parent = parent
            .filter(|p| self.is_open(*p))
            .or(self.current)
            .unwrap_or(ROOT);
        let index = self.nodes.len();
        self.nodes
            .push(SegmentNode::new(now, Some(parent), self.current));
        self.nodes[parent].children.push(index);
        self.current = Some(index);
        self.depth += 1;
        index
    }

    /// Moves `index` under `new_parent`. Both must be open, and the move must not create a cycle.
    pub(crate) fn set_parent(&mut self, index: usize, new_parent: usize) -> bool {
        if index == ROOT || index == new_parent {
            return false;
        }
        if !self.is_open(index) || !self.is_open(new_parent) {
            return false;
        }

        let mut ancestor = Some(new_parent);
        while let Some(a) = ancestor {
            if a == index {
                return false;
            }
            ancestor = self.nodes[a].parent;
        }

        if let Some(old_parent) = self.nodes[index].parent {
            self.nodes[old_parent].children.retain(|c| *c != index);
        }
        self.nodes[new_parent].children.push(index);
        self.nodes[index].parent = Some(new_parent);
        true
    }

    /// Sets explicit timing; the segment keeps this stop time when it ends.
    pub(crate) fn set_timing(&mut self, index: usize, start: Micros, duration: Micros) -> bool {
        match self.nodes.get_mut(index) {
            Some(node) if !node.ended => {
                node.start = start;
                node.stop = start.saturating_add(duration);
                node.timing_set = true;
                true
            }
            _ => false,
        }
    }

    /// Ends a segment, returning its duration and exclusive time, or `None` if it already ended.
    pub(crate) fn end(&mut self, index: usize, now: Micros) -> Option<Ended> {
        let node = self.nodes.get_mut(index).filter(|n| !n.ended)?;
        if !node.timing_set {
            node.stop = now;
        }
        node.ended = true;
        node.duration = node.stop.saturating_sub(node.start);
        node.exclusive = node.duration.saturating_sub(node.kids_duration);
        let ended = Ended {
            duration: node.duration,
            exclusive: node.exclusive,
        };
        let parent = node.parent;
        let saved_owner = node.saved_owner;

        if let Some(parent) = parent {
            let acc = &mut self.nodes[parent].kids_duration;
            *acc = acc.saturating_add(ended.duration);
        }

        if index != ROOT {
            self.depth = self.depth.saturating_sub(1);
        }
        if self.current == Some(index) {
            self.current = self.nearest_open_owner(saved_owner);
        }
        Some(ended)
    }

    fn nearest_open_owner(&self, mut owner: Option<usize>) -> Option<usize> {
        while let Some(o) = owner {
            if !self.nodes[o].ended {
                return Some(o);
            }
            owner = self.nodes[o].saved_owner;
        }
        None
    }

    /// Children duration accumulated so far by the root.
    pub(crate) fn root_kids_duration(&self) -> Micros {
        self.nodes[ROOT].kids_duration
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (usize, &SegmentNode)> {
        self.nodes.iter().enumerate()
    }
}
