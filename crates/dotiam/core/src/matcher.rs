// Dotlanth
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Access matching
//!
//! Paths are matched with doublestar globs:
//!
//! - `*` matches any run of characters inside one segment
//! - `?` matches one character other than `/`
//! - `**` as a whole segment matches zero or more segments, so `/api/**`
//!   also matches `/api` itself
//! - `{a,b}` matches either alternative
//! - `[abc]`, `[!abc]` and `[a-z]` match character classes
//! - `\` escapes the next character
//!
//! Globs are compiled to anchored regular expressions once and cached. A
//! pattern that fails to compile is cached as such and never matches. The
//! cache is bounded; once full it is emptied and refilled from live patterns.

use crate::models::Resource;
use dashmap::DashMap;
use regex::Regex;
use tracing::{debug, warn};

/// Method wildcard
pub const ANY_METHOD: &str = "*";

/// Default number of compiled patterns kept
pub const PATTERN_CACHE_CAPACITY: usize = 4096;

/// Translate a doublestar glob into an anchored regular expression
pub fn glob_to_regex(pattern: &str) -> Option<String> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::from("^");
    let mut braces = 0usize;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '*' if chars.get(i + 1) == Some(&'*') => {
                let mut end = i + 2;
                while chars.get(end) == Some(&'*') {
                    end += 1;
                }
                let starts_segment = i == 0 || chars[i - 1] == '/';
                let ends_segment = end == chars.len() || chars[end] == '/';

                if starts_segment && ends_segment {
                    if end == chars.len() {
                        if i > 0 {
                            // "/**" also matches the bare prefix
                            out.pop();
                            out.push_str("(?:/.*)?");
                        } else {
                            out.push_str(".*");
                        }
                        i = end;
                    } else {
                        out.push_str("(?:.*/)?");
                        i = end + 1;
                    }
                } else {
                    out.push_str(".*");
                    i = end;
                }
                continue;
            }
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            '[' => {
                let close = chars[i + 1..].iter().position(|c| *c == ']').map(|p| p + i + 1)?;
                let mut class = String::from("[");
                for (n, c) in chars[i + 1..close].iter().enumerate() {
                    match c {
                        '!' | '^' if n == 0 => class.push('^'),
                        '\\' | '[' | '&' | '~' => {
                            class.push('\\');
                            class.push(*c);
                        }
                        _ => class.push(*c),
                    }
                }
                class.push(']');
                out.push_str(&class);
                i = close;
            }
            '{' => {
                braces += 1;
                out.push_str("(?:");
            }
            '}' if braces > 0 => {
                braces -= 1;
                out.push(')');
            }
            ',' if braces > 0 => out.push('|'),
            '\\' => {
                let next = chars.get(i + 1)?;
                out.push_str(&regex::escape(&next.to_string()));
                i += 1;
            }
            _ => out.push_str(&regex::escape(&c.to_string())),
        }
        i += 1;
    }

    if braces != 0 {
        return None;
    }
    out.push('$');
    Some(out)
}

/// Resource matcher with a compiled-pattern cache
#[derive(Debug)]
pub struct AccessMatcher {
    patterns: DashMap<String, Option<Regex>>,
    capacity: usize,
}

impl Default for AccessMatcher {
    fn default() -> Self {
        Self::with_capacity(PATTERN_CACHE_CAPACITY)
    }
}

impl AccessMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Matcher caching at most `capacity` compiled patterns
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            patterns: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Glob match with the compiled pattern cache
    pub fn glob_match(&self, pattern: &str, value: &str) -> bool {
        if let Some(compiled) = self.patterns.get(pattern) {
            return compiled.as_ref().is_some_and(|re| re.is_match(value));
        }

        let compiled = glob_to_regex(pattern).and_then(|source| Regex::new(&source).ok());
        if compiled.is_none() {
            warn!(pattern, "Invalid glob pattern, it will never match");
        }
        let matched = compiled.as_ref().is_some_and(|re| re.is_match(value));
        if self.patterns.len() >= self.capacity {
            debug!(capacity = self.capacity, "Pattern cache full, clearing");
            self.patterns.clear();
        }
        self.patterns.insert(pattern.to_string(), compiled);
        matched
    }

    /// Whether a resource admits the request; `None` method admits any method
    pub fn resource_matches(&self, resource: &Resource, path: &str, method: Option<&str>, host: Option<&str>) -> bool {
        let method_allowed = match method {
            None => true,
            Some(method) => resource.methods.is_empty() || resource.methods.iter().any(|m| m == ANY_METHOD || m.eq_ignore_ascii_case(method)),
        };
        if !method_allowed || !self.glob_match(&resource.path, path) {
            return false;
        }

        if resource.hosts.is_empty() {
            return true;
        }
        match host {
            Some(host) => {
                let host = host.to_ascii_lowercase();
                resource.hosts.iter().any(|pattern| self.glob_match(&pattern.to_ascii_lowercase(), &host))
            }
            None => false,
        }
    }

    /// Whether any resource admits `method` on `path` (at `host`)
    pub fn matches(&self, resources: &[Resource], path: &str, method: &str, host: Option<&str>) -> bool {
        resources.iter().any(|resource| self.resource_matches(resource, path, Some(method), host))
    }

    /// Number of cached patterns
    pub fn cached_patterns(&self) -> usize {
        self.patterns.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn glob(pattern: &str, value: &str) -> bool {
        AccessMatcher::new().glob_match(pattern, value)
    }

    #[test]
    fn test_single_star_stays_in_segment() {
        assert!(glob("/api/*", "/api/users"));
        assert!(!glob("/api/*", "/api/users/1"));
        assert!(glob("/api/*/detail", "/api/7/detail"));
        assert!(glob("/files/*.txt", "/files/a.txt"));
    }

    #[test]
    fn test_double_star() {
        assert!(glob("/test/**", "/test/example/1234"));
        assert!(glob("/test/**", "/test"));
        assert!(glob("/test/**", "/test/"));
        assert!(!glob("/test/**", "/testing"));
        assert!(glob("/a/**/b", "/a/b"));
        assert!(glob("/a/**/b", "/a/x/y/b"));
        assert!(!glob("/a/**/b", "/a/x/c"));
        assert!(glob("**", "/anything/at/all"));
        assert!(glob("**/end", "/deep/path/end"));
    }

    #[test]
    fn test_question_mark_classes_and_braces() {
        assert!(glob("/v?/ping", "/v1/ping"));
        assert!(!glob("/v?/ping", "/v/ping"));
        assert!(glob("/v[0-9]/ping", "/v2/ping"));
        assert!(!glob("/v[!0-9]/ping", "/v2/ping"));
        assert!(glob("/{users,roles}/*", "/roles/1"));
        assert!(!glob("/{users,roles}/*", "/lmaps/1"));
    }

    #[test]
    fn test_literal_characters_are_escaped() {
        assert!(glob("/a.b", "/a.b"));
        assert!(!glob("/a.b", "/axb"));
        assert!(glob("/a\\*b", "/a*b"));
        assert!(!glob("/a\\*b", "/axb"));
    }

    #[test]
    fn test_invalid_pattern_never_matches() {
        let matcher = AccessMatcher::new();
        assert!(!matcher.glob_match("/a/[b", "/a/[b"));
        assert!(!matcher.glob_match("/a/{b,c", "/a/b"));
        assert_eq!(matcher.cached_patterns(), 2);
    }

    #[test]
    fn test_pattern_cache_is_bounded() {
        let matcher = AccessMatcher::with_capacity(2);
        for n in 0..10 {
            assert!(matcher.glob_match(&format!("/p{}/*", n), &format!("/p{}/x", n)));
            assert!(matcher.cached_patterns() <= 2);
        }
        assert!(matcher.glob_match("/p0/*", "/p0/y"));
        assert!(!matcher.glob_match("/p0/*", "/p1/y"));
    }

    #[test]
    fn test_methods() {
        let matcher = AccessMatcher::new();
        let any = vec![Resource::new("/x", &[])];
        let star = vec![Resource::new("/x", &["*"])];
        let get = vec![Resource::new("/x", &["get"])];

        assert!(matcher.matches(&any, "/x", "DELETE", None));
        assert!(matcher.matches(&star, "/x", "PATCH", None));
        assert!(matcher.matches(&get, "/x", "GET", None));
        assert!(!matcher.matches(&get, "/x", "POST", None));
    }

    #[test]
    fn test_hosts() {
        let matcher = AccessMatcher::new();
        let resources = vec![Resource::new("/x", &["*"]).with_hosts(&["*.example.com"])];

        assert!(matcher.matches(&resources, "/x", "GET", Some("API.example.com")));
        assert!(!matcher.matches(&resources, "/x", "GET", Some("example.org")));
        assert!(!matcher.matches(&resources, "/x", "GET", None));
    }

    #[test]
    fn test_empty_resources_never_match() {
        assert!(!AccessMatcher::new().matches(&[], "/", "GET", None));
    }

    fn resource_strategy() -> impl Strategy<Value = Resource> {
        let path = prop::sample::select(vec!["/a/**", "/a/*", "/b/c", "/**", "/a/{x,y}"]);
        let methods = prop::collection::vec(prop::sample::select(vec!["GET", "post", "*"]), 0..3);
        let hosts = prop::collection::vec(prop::sample::select(vec!["*.example.com", "localhost"]), 0..2);
        (path, methods, hosts).prop_map(|(path, methods, hosts)| Resource {
            path: path.to_string(),
            methods: methods.into_iter().map(str::to_string).collect(),
            hosts: hosts.into_iter().map(str::to_string).collect(),
        })
    }

    proptest! {
        #[test]
        fn prop_matches_iff_some_resource_matches(
            resources in prop::collection::vec(resource_strategy(), 0..4),
            path in prop::sample::select(vec!["/a", "/a/x", "/a/x/y", "/b/c", "/c"]),
            method in prop::sample::select(vec!["GET", "POST", "PUT"]),
            host in prop::option::of(prop::sample::select(vec!["api.example.com", "localhost", "other"])),
        ) {
            let matcher = AccessMatcher::new();
            let expected = resources.iter().any(|r| {
                let method_ok = r.methods.is_empty() || r.methods.iter().any(|m| m == "*" || m.eq_ignore_ascii_case(method));
                let host_ok = r.hosts.is_empty() || host.is_some_and(|h| r.hosts.iter().any(|p| matcher.glob_match(p, h)));
                method_ok && matcher.glob_match(&r.path, path) && host_ok
            });
            prop_assert_eq!(matcher.matches(&resources, path, method, host), expected);
            if resources.is_empty() {
                prop_assert!(!expected);
            }
        }
    }
}
