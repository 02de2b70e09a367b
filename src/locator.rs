use std::fmt;

use fancy_regex::Regex;
use tracing::debug;

use crate::driver::{FrameHandle, PageDriver};
use crate::{Error, Result};

/// Regular expression matched against sub-context URLs.
#[derive(Clone)]
pub struct UrlPattern {
    source: String,
    regex: Regex,
}

impl UrlPattern {
    pub fn new(source: &str) -> Result<Self> {
        let regex = Regex::new(source)
            .map_err(|err| Error::InvalidPattern(format!("{source}: {err}")))?;
        Ok(Self {
            source: source.to_string(),
            regex,
        })
    }

    /// Matches URLs that start with exactly `origin` followed by `path`,
    /// optionally followed by a query or fragment.
    pub fn anchored(origin: &str, path: &str) -> Result<Self> {
        let origin = origin.trim_end_matches('/');
        Self::new(&format!(
            "^{}{}(?:[?#]|$)",
            escape_literal(origin),
            escape_literal(path)
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Regex engine failures (backtrack limit) count as no match.
    pub fn is_match(&self, url: &str) -> bool {
        self.regex.is_match(url).unwrap_or(false)
    }
}

impl fmt::Debug for UrlPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("UrlPattern").field(&self.source).finish()
    }
}

impl fmt::Display for UrlPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/", self.source)
    }
}

fn escape_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(
            ch,
            '\\' | '.' | '+' | '*' | '?' | '(' | ')' | '|' | '[' | ']' | '{' | '}' | '^' | '$'
        ) {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// What to do when more than one sub-context matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AmbiguityPolicy {
    #[default]
    Reject,
    FirstMatch,
}

#[derive(Debug, Clone)]
pub struct ContextLocator {
    pattern: UrlPattern,
    policy: AmbiguityPolicy,
}

impl ContextLocator {
    pub fn new(pattern: UrlPattern) -> Self {
        Self {
            pattern,
            policy: AmbiguityPolicy::default(),
        }
    }

    pub fn for_document(origin: &str, path: &str) -> Result<Self> {
        Ok(Self::new(UrlPattern::anchored(origin, path)?))
    }

    pub fn with_policy(mut self, policy: AmbiguityPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn pattern(&self) -> &UrlPattern {
        &self.pattern
    }

    pub fn locate<D: PageDriver>(&self, driver: &D) -> Result<D::Frame> {
        let mut matches: Vec<D::Frame> = driver
            .sub_contexts()
            .into_iter()
            .filter(|frame| self.pattern.is_match(&frame.current_url()))
            .collect();

        match (matches.len(), self.policy) {
            (0, _) => Err(Error::ContextNotFound {
                pattern: self.pattern.to_string(),
            }),
            (1, _) | (_, AmbiguityPolicy::FirstMatch) => {
                let frame = matches.swap_remove(0);
                debug!(
                    pattern = %self.pattern,
                    url = %frame.current_url(),
                    "embedded context located"
                );
                Ok(frame)
            }
            (_, AmbiguityPolicy::Reject) => Err(Error::AmbiguousContext {
                pattern: self.pattern.to_string(),
                matches: matches.iter().map(FrameHandle::current_url).collect(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone)]
    struct StubFrame(String);

    impl FrameHandle for StubFrame {
        fn current_url(&self) -> String {
            self.0.clone()
        }
    }

    struct StubDriver {
        frames: Vec<&'static str>,
    }

    impl PageDriver for StubDriver {
        type Frame = StubFrame;

        fn navigate(&mut self, _url: &str) -> Result<()> {
            Ok(())
        }

        fn current_url(&self) -> Option<String> {
            Some("http://localhost:8000/host.html".into())
        }

        fn sub_contexts(&self) -> Vec<StubFrame> {
            self.frames.iter().map(|url| StubFrame(url.to_string())).collect()
        }
    }

    #[test]
    fn anchored_pattern_requires_exact_origin_and_path() -> Result<()> {
        let pattern = UrlPattern::anchored("http://localhost:8001", "/widget.html")?;
        assert!(pattern.is_match("http://localhost:8001/widget.html"));
        assert!(pattern.is_match("http://localhost:8001/widget.html?theme=dark"));
        assert!(!pattern.is_match("http://localhost:8001/widget.html.bak"));
        assert!(!pattern.is_match("http://localhost:80011/widget.html"));
        assert!(!pattern.is_match("http://localhostx8001/widget.html"));
        assert!(!pattern.is_match("https://evil.test/?http://localhost:8001/widget.html"));
        Ok(())
    }

    #[test]
    fn invalid_regex_is_reported() {
        assert!(matches!(UrlPattern::new("(unclosed"), Err(Error::InvalidPattern(_))));
    }

    #[test]
    fn locate_returns_single_match() -> Result<()> {
        let driver = StubDriver {
            frames: vec!["about:blank", "http://localhost:8001/widget.html"],
        };
        let frame = ContextLocator::for_document("http://localhost:8001", "/widget.html")?
            .locate(&driver)?;
        assert_eq!(frame.current_url(), "http://localhost:8001/widget.html");
        assert_eq!(frame.origin(), "http://localhost:8001");
        assert!(driver.find_sub_context(&UrlPattern::new("^about:")?).is_some());
        Ok(())
    }

    #[test]
    fn locate_without_match_is_not_found() -> Result<()> {
        let driver = StubDriver {
            frames: vec!["http://localhost:9000/widget.html"],
        };
        let err = ContextLocator::for_document("http://localhost:8001", "/widget.html")?
            .locate(&driver)
            .expect_err("no widget frame");
        assert!(matches!(err, Error::ContextNotFound { .. }));
        Ok(())
    }

    #[test]
    fn ambiguity_is_rejected_unless_first_match_is_requested() -> Result<()> {
        let driver = StubDriver {
            frames: vec![
                "http://localhost:8001/widget.html?slot=a",
                "http://localhost:8001/widget.html?slot=b",
            ],
        };
        let locator = ContextLocator::for_document("http://localhost:8001", "/widget.html")?;
        match locator.locate(&driver) {
            Err(Error::AmbiguousContext { matches, .. }) => assert_eq!(matches.len(), 2),
            other => panic!("expected ambiguity error, got {other:?}"),
        }
        let first = locator
            .with_policy(AmbiguityPolicy::FirstMatch)
            .locate(&driver)?;
        assert!(first.current_url().ends_with("slot=a"));
        Ok(())
    }
}
