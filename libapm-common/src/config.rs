// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

pub mod parse_env {
    use std::{env, str::FromStr, time::Duration};

    /// Reads a duration expressed in milliseconds.
    pub fn duration_ms(name: &str) -> Option<Duration> {
        Some(Duration::from_millis(env::var(name).ok()?.trim().parse::<u64>().ok()?))
    }

    pub fn int<T: FromStr>(name: &str) -> Option<T> {
        env::var(name).ok()?.trim().parse::<T>().ok()
    }

    pub fn bool(name: &str) -> Option<bool> {
        match env::var(name).ok()?.as_str() {
            "1" | "t" | "T" | "TRUE" | "true" | "True" | "on" | "yes" => Some(true),
            _ => Some(false),
        }
    }

    pub fn str_not_empty(name: &str) -> Option<String> {
        env::var(name).ok().filter(|s| !s.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::parse_env;
    use std::time::Duration;

    #[test]
    fn test_parse_env() {
        std::env::set_var("LIBAPM_COMMON_TEST_MS", "250");
        std::env::set_var("LIBAPM_COMMON_TEST_BOOL", "true");
        std::env::set_var("LIBAPM_COMMON_TEST_EMPTY", "");

        assert_eq!(
            parse_env::duration_ms("LIBAPM_COMMON_TEST_MS"),
            Some(Duration::from_millis(250))
        );
        assert_eq!(parse_env::int::<u32>("LIBAPM_COMMON_TEST_MS"), Some(250));
        assert_eq!(parse_env::bool("LIBAPM_COMMON_TEST_BOOL"), Some(true));
        assert_eq!(parse_env::str_not_empty("LIBAPM_COMMON_TEST_EMPTY"), None);
        assert_eq!(parse_env::bool("LIBAPM_COMMON_TEST_UNSET"), None);
    }
}
