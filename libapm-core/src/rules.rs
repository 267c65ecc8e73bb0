// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Name normalization rules handed out by the daemon on connect: regex based URL and transaction
//! name rules, and transaction segment term allow-lists.

use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct RawRule {
    match_expression: String,
    #[serde(default)]
    replacement: String,
    #[serde(default)]
    ignore: bool,
    #[serde(default)]
    eval_order: i64,
    #[serde(default)]
    terminate_chain: bool,
    #[serde(default)]
    each_segment: bool,
    #[serde(default)]
    replace_all: bool,
}

#[derive(Debug, Clone)]
struct Rule {
    regex: Regex,
    replacement: String,
    ignore: bool,
    eval_order: i64,
    terminate_chain: bool,
    each_segment: bool,
    replace_all: bool,
}

impl Rule {
    fn compile(raw: RawRule) -> Option<Self> {
        let regex = RegexBuilder::new(&raw.match_expression)
            .case_insensitive(true)
            .build()
            .map_err(|e| debug!(pattern = %raw.match_expression, error = %e, "invalid rule regex"))
            .ok()?;
        Some(Rule {
            regex,
            replacement: to_regex_replacement(&raw.replacement),
            ignore: raw.ignore,
            eval_order: raw.eval_order,
            terminate_chain: raw.terminate_chain,
            each_segment: raw.each_segment,
            replace_all: raw.replace_all,
        })
    }

    /// Returns the rewritten text, or `None` if the rule did not match.
    fn apply_to(&self, input: &str) -> Option<String> {
        if !self.regex.is_match(input) {
            return None;
        }
        let replaced = if self.replace_all {
            self.regex.replace_all(input, self.replacement.as_str())
        } else {
            self.regex.replace(input, self.replacement.as_str())
        };
        Some(replaced.into_owned())
    }
}

/// Rewrites `\1` style back references into the `${1}` syntax of the regex crate, escaping
/// literal dollars along the way.
fn to_regex_replacement(replacement: &str) -> String {
    let mut out = String::with_capacity(replacement.len() + 4);
    let mut chars = replacement.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek().is_some_and(char::is_ascii_digit) => {
                out.push_str("${");
                while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
                    out.push(d);
                    chars.next();
                }
                out.push('}');
            }
            '$' => out.push_str("$$"),
            c => out.push(c),
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleOutcome {
    /// The name after all matching rules have been applied.
    Name(String),
    /// A matching rule asked for the transaction to be dropped.
    Ignore,
}

/// An ordered list of rewrite rules.
#[derive(Debug, Clone, Default)]
pub struct Rules {
    rules: Vec<Rule>,
}

impl Rules {
    /// Builds the rule list from the JSON array sent by the daemon. Malformed entries are skipped.
    pub fn from_json(value: &Value) -> Self {
        let Some(entries) = value.as_array() else {
            return Self::default();
        };
        let mut rules: Vec<Rule> = entries
            .iter()
            .filter_map(|entry| RawRule::deserialize(entry).ok())
            .filter_map(Rule::compile)
            .collect();
        rules.sort_by_key(|rule| rule.eval_order);
        Self { rules }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn apply(&self, input: &str) -> RuleOutcome {
        let mut name = input.to_string();
        for rule in &self.rules {
            let rewritten = if rule.each_segment {
                let mut matched = false;
                let segments: Vec<String> = name
                    .split('/')
                    .map(|segment| {
                        if segment.is_empty() {
                            return String::new();
                        }
                        match rule.apply_to(segment) {
                            Some(s) => {
                                matched = true;
                                s
                            }
                            None => segment.to_string(),
                        }
                    })
                    .collect();
                matched.then(|| segments.join("/"))
            } else {
                rule.apply_to(&name)
            };

            if let Some(rewritten) = rewritten {
                if rule.ignore {
                    return RuleOutcome::Ignore;
                }
                name = rewritten;
                if rule.terminate_chain {
                    break;
                }
            }
        }
        RuleOutcome::Name(name)
    }
}

#[derive(Debug, Clone)]
struct SegmentTermsRule {
    prefix: String,
    terms: HashSet<String>,
}

/// Allow-lists of path segments per two-segment name prefix. Segments not in the list become
/// `*`, and runs of `*` collapse into one.
#[derive(Debug, Clone, Default)]
pub struct SegmentTerms {
    rules: Vec<SegmentTermsRule>,
}

impl SegmentTerms {
    pub fn from_json(value: &Value) -> Self {
        let Some(entries) = value.as_array() else {
            return Self::default();
        };
        let rules = entries
            .iter()
            .filter_map(|entry| {
                let prefix = entry.get("prefix")?.as_str()?.trim_end_matches('/');
                if prefix.split('/').count() != 2 || prefix.split('/').any(str::is_empty) {
                    debug!(prefix, "segment terms prefix must have two segments");
                    return None;
                }
                let terms = entry
                    .get("terms")?
                    .as_array()?
                    .iter()
                    .filter_map(|t| t.as_str().map(str::to_string))
                    .collect();
                Some(SegmentTermsRule {
                    prefix: prefix.to_string(),
                    terms,
                })
            })
            .collect();
        Self { rules }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Applies the first rule whose prefix matches `name`.
    pub fn apply(&self, name: &str) -> String {
        for rule in &self.rules {
            let Some(rest) = name
                .strip_prefix(rule.prefix.as_str())
                .and_then(|rest| rest.strip_prefix('/'))
            else {
                continue;
            };

            let mut kept: Vec<&str> = Vec::new();
            for segment in rest.split('/') {
                let segment = if rule.terms.contains(segment) {
                    segment
                } else {
                    "*"
                };
                if segment == "*" && kept.last() == Some(&"*") {
                    continue;
                }
                kept.push(segment);
            }
            return format!("{}/{}", rule.prefix, kept.join("/"));
        }
        name.to_string()
    }
}
