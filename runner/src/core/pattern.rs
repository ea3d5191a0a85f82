//! Branch filter patterns for workflow triggers.
//!
//! - `*` and `**` match one or more characters, `/` included
//! - `?` matches a single character except `/`
//!
//! So `pr/*` accepts `pr/123` and `pr/team/123` but never `pr/` or `pr`.
//!
//! Anything else matches literally, so a pattern without wildcards is an
//! exact branch name.

use anyhow::{Context, Result, anyhow};
use regex::Regex;

/// Compiled branch pattern.
#[derive(Debug, Clone)]
pub struct BranchPattern {
    source: String,
    kind: PatternKind,
}

#[derive(Debug, Clone)]
enum PatternKind {
    Exact,
    Wildcard(Regex),
}

impl BranchPattern {
    pub fn parse(pattern: &str) -> Result<Self> {
        let trimmed = pattern.trim();
        if trimmed.is_empty() {
            return Err(anyhow!("branch pattern must not be empty"));
        }
        if trimmed.contains("***") {
            return Err(anyhow!("branch pattern '{trimmed}' has an invalid '***'"));
        }
        let kind = if trimmed.contains(['*', '?']) {
            let regex = Regex::new(&to_regex(trimmed))
                .with_context(|| format!("compile branch pattern '{trimmed}'"))?;
            PatternKind::Wildcard(regex)
        } else {
            PatternKind::Exact
        };
        Ok(Self {
            source: trimmed.to_string(),
            kind,
        })
    }

    pub fn matches(&self, branch: &str) -> bool {
        match &self.kind {
            PatternKind::Exact => self.source == branch,
            PatternKind::Wildcard(regex) => regex.is_match(branch),
        }
    }
}

fn to_regex(pattern: &str) -> String {
    let mut out = String::from("^");
    let mut chars = pattern.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                }
                out.push_str(".+");
            }
            '?' => out.push_str("[^/]"),
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(raw: &str) -> BranchPattern {
        BranchPattern::parse(raw).expect("pattern")
    }

    #[test]
    fn exact_name_matches_only_itself() {
        let main = pattern("main");
        assert!(main.matches("main"));
        assert!(!main.matches("main2"));
        assert!(!main.matches("feature/main"));
    }

    #[test]
    fn single_star_requires_one_more_segment() {
        let pr = pattern("pr/*");
        assert!(pr.matches("pr/123"));
        assert!(pr.matches("pr/fix-ci"));
        assert!(pr.matches("pr/team/123"));
        assert!(!pr.matches("pr/"));
        assert!(!pr.matches("pr"));
        assert!(!pr.matches("feature/123"));
        assert!(!pr.matches("xpr/1"));
    }

    #[test]
    fn double_star_crosses_slashes() {
        let pr = pattern("pr/**");
        assert!(pr.matches("pr/a/b"));
        assert!(pr.matches("pr/a"));
        assert!(!pr.matches("pr/"));
    }

    #[test]
    fn question_mark_matches_single_char() {
        let v = pattern("v?");
        assert!(v.matches("v1"));
        assert!(!v.matches("v10"));
    }

    #[test]
    fn regex_metacharacters_are_literal() {
        let dotted = pattern("release-1.0/*");
        assert!(dotted.matches("release-1.0/hotfix"));
        assert!(!dotted.matches("release-1x0/hotfix"));
    }

    #[test]
    fn rejects_empty_and_triple_star() {
        assert!(BranchPattern::parse("  ").is_err());
        assert!(BranchPattern::parse("a/***").is_err());
    }
}
