// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Transaction trace rendering.
//!
//! A trace is the segment tree of one slow transaction, rendered with millisecond offsets from
//! the transaction start. Segment names are interned in a string table at the end of the payload
//! and referenced as "`<index>".

use crate::segment::{SegmentKind, SegmentNode, SegmentTree, ROOT};
use indexmap::IndexSet;
use libapm_common::time::{Micros, US_PER_MS};
use serde_json::{Map, Value};
use std::fmt::Write;

pub const DEFAULT_MAX_TRACE_SEGMENTS: usize = 2000;

/// Everything besides the segment tree that goes into a trace.
#[derive(Debug, Default)]
pub struct TraceContext<'a> {
    pub txn_name: &'a str,
    pub txn_start: Micros,
    pub duration: Micros,
    pub max_segments: usize,
    pub agent_attributes: Map<String, Value>,
    pub user_attributes: Map<String, Value>,
    pub intrinsics: Map<String, Value>,
}

struct Renderer<'a> {
    tree: &'a SegmentTree,
    children: Vec<Vec<usize>>,
    names: IndexSet<String>,
    txn_start: Micros,
}

/// Pending work of the depth first walk. Nesting is unbounded, so the walk keeps its own stack.
enum Step<'a> {
    Open { index: usize, first: bool },
    OpenRoot(&'a str),
    Close,
}

impl Renderer<'_> {
    fn offset_ms(&self, at: Micros) -> u64 {
        at.saturating_sub(self.txn_start) / US_PER_MS
    }

    fn intern(&mut self, name: &str) -> usize {
        match self.names.get_index_of(name) {
            Some(index) => index,
            None => self.names.insert_full(name.to_string()).0,
        }
    }

    fn segment_name(&self, index: usize) -> &str {
        self.tree
            .get(index)
            .and_then(|n| n.name.as_deref())
            .unwrap_or("<unknown>")
    }

    /// Writes the root segment and its kept descendants, each as
    /// `[start_ms,stop_ms,"`<name>",{attrs},[children]]`.
    fn write_tree(&mut self, out: &mut String, root_name: &str) {
        let tree = self.tree;
        let mut stack = vec![Step::OpenRoot(root_name)];
        while let Some(step) = stack.pop() {
            let (index, name) = match step {
                Step::Close => {
                    out.push_str("]]");
                    continue;
                }
                Step::OpenRoot(name) => (ROOT, name.to_string()),
                Step::Open { index, first } => {
                    if !first {
                        out.push(',');
                    }
                    (index, self.segment_name(index).to_string())
                }
            };
            let Some(node) = tree.get(index) else {
                out.push_str("null");
                continue;
            };
            let name_index = self.intern(&name);
            let _ = write!(
                out,
                "[{},{},\"`{}\",{},[",
                self.offset_ms(node.start),
                self.offset_ms(node.stop),
                name_index,
                crate::json::to_string(&segment_attributes(node)),
            );
            stack.push(Step::Close);
            let kids = self.children.get(index).map(Vec::as_slice).unwrap_or(&[]);
            for (position, kid) in kids.iter().enumerate().rev() {
                stack.push(Step::Open {
                    index: *kid,
                    first: position == 0,
                });
            }
        }
    }
}

fn segment_attributes(node: &SegmentNode) -> Map<String, Value> {
    let mut attrs = Map::new();
    match &node.kind {
        SegmentKind::Generic => {}
        SegmentKind::Datastore(ds) => {
            if let Some(host) = &ds.host {
                attrs.insert("host".into(), Value::from(host.as_str()));
            }
            if let Some(port) = &ds.port_path_or_id {
                attrs.insert("port_path_or_id".into(), Value::from(port.as_str()));
            }
            if let Some(db) = &ds.database_name {
                attrs.insert("database_name".into(), Value::from(db.as_str()));
            }
            if let Some(query) = &ds.query {
                attrs.insert("sql".into(), Value::from(query.as_str()));
            }
        }
        SegmentKind::External(ext) => {
            attrs.insert("uri".into(), Value::from(ext.uri.as_str()));
            if let Some(library) = &ext.library {
                attrs.insert("library".into(), Value::from(library.as_str()));
            }
            if let Some(method) = &ext.method {
                attrs.insert("procedure".into(), Value::from(method.as_str()));
            }
        }
    }
    attrs
}

/// Picks the segments that make it into the trace: every ended segment, or the `max` longest
/// when there are more.
fn kept_segments(tree: &SegmentTree, max: usize) -> Vec<bool> {
    let mut kept = vec![false; tree.len()];
    let mut ended: Vec<(usize, Micros)> = tree
        .iter()
        .filter(|(index, node)| *index != ROOT && node.ended)
        .map(|(index, node)| (index, node.duration))
        .collect();

    if ended.len() > max {
        ended.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        ended.truncate(max);
    }
    for (index, _) in ended {
        kept[index] = true;
    }
    kept[ROOT] = true;
    kept
}

/// Renders the trace of `tree`.
pub(crate) fn render(tree: &SegmentTree, ctx: TraceContext<'_>) -> String {
    let kept = kept_segments(tree, ctx.max_segments);

    let mut children: Vec<Vec<usize>> = vec![Vec::new(); tree.len()];
    for (index, _) in tree.iter().filter(|(index, _)| *index != ROOT && kept[*index]) {
        // attach to the nearest kept ancestor
        let mut parent = tree.get(index).and_then(|n| n.parent);
        while let Some(p) = parent {
            if kept[p] {
                break;
            }
            parent = tree.get(p).and_then(|n| n.parent);
        }
        children[parent.unwrap_or(ROOT)].push(index);
    }
    for kids in children.iter_mut() {
        kids.sort_by_key(|kid| (tree.get(*kid).map(|n| n.start).unwrap_or(0), *kid));
    }

    let mut renderer = Renderer {
        tree,
        children,
        names: IndexSet::new(),
        txn_start: ctx.txn_start,
    };
    let duration_ms = ctx.duration / US_PER_MS;

    let mut extras = Map::new();
    extras.insert("agentAttributes".into(), Value::Object(ctx.agent_attributes));
    extras.insert("userAttributes".into(), Value::Object(ctx.user_attributes));
    extras.insert("intrinsics".into(), Value::Object(ctx.intrinsics));

    let mut out = String::with_capacity(64 * tree.len());
    let _ = write!(out, "[[0,{{}},{{}},[0,{duration_ms},\"ROOT\",{{}},[");
    renderer.write_tree(&mut out, ctx.txn_name);
    out.push_str("]],");
    out.push_str(&crate::json::to_string(&extras));
    out.push_str("],");
    out.push_str(&crate::json::to_string(&renderer.names.iter().collect::<Vec<_>>()));
    out.push(']');
    out
}
