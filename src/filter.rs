/*!
 * Regex-based event filtering
 */

use regex::{Regex, RegexSet};
use tether_connect::EventFilter;

use crate::config::FilterConfig;
use crate::error::{Result, TetherError};

/// Decision for a single payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDecision {
    /// Payload is sent
    Include,
    /// Payload matched an exclude pattern
    Excluded,
    /// Include patterns exist and none matched
    NotIncluded,
}

/// Include/exclude filter over raw event payloads
///
/// Exclusion wins over inclusion. With no include patterns every payload
/// not excluded is sent.
#[derive(Debug, Clone)]
pub struct RegexEventFilter {
    include: Option<RegexSet>,
    exclude: Option<RegexSet>,
}

impl RegexEventFilter {
    pub fn new<I, E>(include: I, exclude: E) -> Result<Self>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
        E: IntoIterator,
        E::Item: AsRef<str>,
    {
        Ok(Self {
            include: compile(include)?,
            exclude: compile(exclude)?,
        })
    }

    pub fn from_config(config: &FilterConfig) -> Result<Self> {
        Self::new(&config.include_patterns, &config.exclude_patterns)
    }

    /// Check a payload against the patterns
    pub fn decide(&self, payload: &str) -> FilterDecision {
        if self
            .exclude
            .as_ref()
            .is_some_and(|set| set.is_match(payload))
        {
            return FilterDecision::Excluded;
        }
        match &self.include {
            Some(set) if !set.is_match(payload) => FilterDecision::NotIncluded,
            _ => FilterDecision::Include,
        }
    }

    pub fn include_count(&self) -> usize {
        self.include.as_ref().map_or(0, RegexSet::len)
    }

    pub fn exclude_count(&self) -> usize {
        self.exclude.as_ref().map_or(0, RegexSet::len)
    }
}

impl EventFilter for RegexEventFilter {
    fn should_send(&self, payload: &str) -> bool {
        self.decide(payload) == FilterDecision::Include
    }
}

fn compile<P>(patterns: P) -> Result<Option<RegexSet>>
where
    P: IntoIterator,
    P::Item: AsRef<str>,
{
    let patterns: Vec<String> = patterns
        .into_iter()
        .map(|p| p.as_ref().to_string())
        .collect();
    if patterns.is_empty() {
        return Ok(None);
    }

    // Compile one at a time so the error names the bad pattern
    for pattern in &patterns {
        Regex::new(pattern)
            .map_err(|e| TetherError::Filter(format!("Invalid pattern '{}': {}", pattern, e)))?;
    }
    Ok(Some(RegexSet::new(&patterns)?))
}
