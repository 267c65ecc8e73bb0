// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use libapm_common::time::Micros;
use regex::Regex;
use std::sync::LazyLock;

pub const SLOWSQL_LIMIT: usize = 10;

/// A slow datastore query observed by a transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct SlowSql {
    pub id: u32,
    pub count: i32,
    pub total: Micros,
    pub min: Micros,
    pub max: Micros,
    pub metric: String,
    pub query: String,
    pub params_json: String,
}

/// Stable 32-bit identifier of a query string: MurmurHash3 x86_32 with a zero seed. The daemon
/// aggregates slow queries by this id, so it must not depend on the toolchain.
pub fn query_id(query: &str) -> u32 {
    murmur3_32(query.as_bytes(), 0)
}

fn murmur3_32(data: &[u8], seed: u32) -> u32 {
    const C1: u32 = 0xcc9e_2d51;
    const C2: u32 = 0x1b87_3593;

    let mix = |k: u32| k.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);

    let mut h = seed;
    let mut blocks = data.chunks_exact(4);
    for block in &mut blocks {
        let k = u32::from_le_bytes([block[0], block[1], block[2], block[3]]);
        h ^= mix(k);
        h = h.rotate_left(13).wrapping_mul(5).wrapping_add(0xe654_6b64);
    }

    let tail = blocks.remainder();
    if !tail.is_empty() {
        let k = tail
            .iter()
            .rev()
            .fold(0u32, |k, byte| (k << 8) | u32::from(*byte));
        h ^= mix(k);
    }

    h ^= data.len() as u32;
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^= h >> 16;
    h
}

static SQL_LITERAL: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r#"'(?:[^'\\]|\\.|'')*'|"(?:[^"\\]|\\.)*"|\b\d+(?:\.\d+)?\b"#).ok()
});

/// Replaces string and numeric literals with `?`.
pub fn obfuscate_sql(query: &str) -> String {
    match SQL_LITERAL.as_ref() {
        Some(re) => re.replace_all(query, "?").into_owned(),
        None => String::from("?"),
    }
}

/// The slowest queries of a transaction, one entry per distinct query.
#[derive(Debug, Clone)]
pub struct SlowSqls {
    entries: Vec<SlowSql>,
    limit: usize,
}

impl Default for SlowSqls {
    fn default() -> Self {
        Self::new(SLOWSQL_LIMIT)
    }
}

impl SlowSqls {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: Vec::new(),
            limit,
        }
    }

    /// Records one execution of `query`. When the pool is full the new query only gets in by
    /// replacing a faster one.
    pub fn add(&mut self, duration: Micros, metric: &str, query: &str, params_json: &str) {
        let id = query_id(query);
        if let Some(existing) = self.entries.iter_mut().find(|e| e.id == id) {
            existing.count += 1;
            existing.total = existing.total.saturating_add(duration);
            existing.min = existing.min.min(duration);
            if duration > existing.max {
                existing.max = duration;
                existing.metric = metric.to_string();
                existing.params_json = params_json.to_string();
            }
            return;
        }

        let entry = SlowSql {
            id,
            count: 1,
            total: duration,
            min: duration,
            max: duration,
            metric: metric.to_string(),
            query: query.to_string(),
            params_json: params_json.to_string(),
        };

        if self.entries.len() < self.limit {
            self.entries.push(entry);
            return;
        }

        if let Some(fastest) = self
            .entries
            .iter_mut()
            .min_by_key(|e| e.max)
            .filter(|e| e.max < duration)
        {
            *fastest = entry;
        }
    }

    pub fn saved(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SlowSql> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_id_is_murmur3() {
        assert_eq!(query_id(""), 0);
        assert_eq!(query_id("test"), 0xba6b_d213);
        assert_eq!(query_id("hello"), 0x248b_fa47);
        assert_eq!(
            query_id("The quick brown fox jumps over the lazy dog"),
            0x2e4f_f723
        );
    }

    #[test]
    fn test_same_query_aggregates() {
        let mut sqls = SlowSqls::default();
        sqls.add(600, "Datastore/statement/MySQL/users/select", "SELECT 1", "{}");
        sqls.add(900, "Datastore/statement/MySQL/users/select", "SELECT 1", "{}");
        assert_eq!(sqls.saved(), 1);
        let entry = sqls.iter().next().unwrap();
        assert_eq!(entry.count, 2);
        assert_eq!(entry.total, 1500);
        assert_eq!(entry.min, 600);
        assert_eq!(entry.max, 900);
        assert_eq!(entry.id, query_id("SELECT 1"));
    }

    #[test]
    fn test_obfuscation() {
        assert_eq!(
            obfuscate_sql("SELECT * FROM users WHERE name = 'bob' AND id = 42"),
            "SELECT * FROM users WHERE name = ? AND id = ?"
        );
        assert_eq!(obfuscate_sql(r#"UPDATE t SET v = "it\"s""#), "UPDATE t SET v = ?");
        assert_eq!(obfuscate_sql("SELECT col1 FROM t2"), "SELECT col1 FROM t2");
    }

    #[test]
    fn test_keeps_slowest_when_full() {
        let mut sqls = SlowSqls::new(2);
        sqls.add(100, "m", "q1", "{}");
        sqls.add(300, "m", "q2", "{}");
        sqls.add(50, "m", "q3", "{}");
        sqls.add(200, "m", "q4", "{}");

        let mut queries: Vec<&str> = sqls.iter().map(|e| e.query.as_str()).collect();
        queries.sort_unstable();
        assert_eq!(queries, vec!["q2", "q4"]);
    }
}
