//! Regex path rewriting.
//!
//! Rules run in order against the path only; the first rule whose pattern
//! matches is applied and the query string is carried over untouched. No
//! rules means identity: the route prefix is forwarded as-is.

use regex::Regex;

use crate::config::RewriteRuleConfig;

#[derive(Debug, Clone)]
struct RewriteRule {
    pattern: Regex,
    replacement: String,
}

/// Ordered rewrite rules.
#[derive(Debug, Clone, Default)]
pub struct PathRewrite {
    rules: Vec<RewriteRule>,
}

impl PathRewrite {
    pub fn identity() -> Self {
        Self::default()
    }

    pub fn compile(rules: &[RewriteRuleConfig]) -> Result<Self, regex::Error> {
        let rules = rules
            .iter()
            .map(|rule| {
                Ok(RewriteRule {
                    pattern: Regex::new(&rule.pattern)?,
                    replacement: rule.replacement.clone(),
                })
            })
            .collect::<Result<Vec<_>, regex::Error>>()?;
        Ok(Self { rules })
    }

    /// Convenience for a single `pattern → replacement` rule.
    pub fn single(pattern: &str, replacement: &str) -> Result<Self, regex::Error> {
        Self::compile(&[RewriteRuleConfig {
            pattern: pattern.to_string(),
            replacement: replacement.to_string(),
        }])
    }

    pub fn is_identity(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rewrite a path. Results always start with `/`.
    pub fn apply_path(&self, path: &str) -> String {
        let rewritten = self
            .rules
            .iter()
            .find(|rule| rule.pattern.is_match(path))
            .map(|rule| {
                rule.pattern
                    .replace(path, rule.replacement.as_str())
                    .into_owned()
            })
            .unwrap_or_else(|| path.to_string());

        if rewritten.starts_with('/') {
            rewritten
        } else {
            format!("/{rewritten}")
        }
    }

    /// Rewrite the path part of `path_and_query`, keeping the query.
    pub fn apply(&self, path_and_query: &str) -> String {
        match path_and_query.split_once('?') {
            Some((path, query)) => format!("{}?{query}", self.apply_path(path)),
            None => self.apply_path(path_and_query),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_preserves_prefix_and_query() {
        let rewrite = PathRewrite::identity();
        assert!(rewrite.is_identity());
        assert_eq!(rewrite.apply("/api/foo?x=1"), "/api/foo?x=1");
    }

    #[test]
    fn rewrites_old_to_new_keeping_query() {
        let rewrite = PathRewrite::single("^/old", "/new").unwrap();
        assert_eq!(rewrite.apply("/old/items/7?sort=asc&x=1"), "/new/items/7?sort=asc&x=1");
        assert_eq!(rewrite.apply("/old"), "/new");
        assert_eq!(rewrite.apply("/other/old"), "/other/old");
    }

    #[test]
    fn strips_prefix_and_uses_capture_groups() {
        let strip = PathRewrite::single("^/api", "").unwrap();
        assert_eq!(strip.apply("/api?x=1"), "/?x=1");
        assert_eq!(strip.apply("/api/users"), "/users");

        let capture = PathRewrite::single(r"^/v(\d+)/(.*)$", "/api/v$1/$2").unwrap();
        assert_eq!(capture.apply("/v2/things"), "/api/v2/things");
    }

    #[test]
    fn first_matching_rule_wins() {
        let rewrite = PathRewrite::compile(&[
            RewriteRuleConfig {
                pattern: "^/a/b".into(),
                replacement: "/specific".into(),
            },
            RewriteRuleConfig {
                pattern: "^/a".into(),
                replacement: "/general".into(),
            },
        ])
        .unwrap();
        assert_eq!(rewrite.apply("/a/b/c"), "/specific/c");
        assert_eq!(rewrite.apply("/a/x"), "/general/x");
    }

    #[test]
    fn invalid_pattern_fails_to_compile() {
        assert!(PathRewrite::single("([", "").is_err());
    }
}
