//! Glob allow/deny lists with memoized match results.
//!
//! A `PatternList` only ever grows. Strings found to match stay matched for the
//! lifetime of the list, so hit results are never re-evaluated. Miss results are
//! dropped whenever patterns are appended since a new pattern may turn a miss
//! into a hit.

use glob::Pattern;
use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;

#[derive(thiserror::Error, Debug)]
#[error("invalid pattern {pattern:?}: {source}")]
pub struct PatternError {
    pattern: String,
    #[source]
    source: glob::PatternError,
}

#[derive(Default)]
pub struct PatternList {
    elements: Vec<String>,
    matchers: Vec<Pattern>,
    hits: RefCell<HashSet<String>>,
    misses: RefCell<HashSet<String>>,
}

impl PatternList {
    pub fn new<I, S>(elements: I) -> Result<Self, PatternError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut list = PatternList::default();
        list.update(elements)?;
        Ok(list)
    }

    /// Appends patterns, compiling each one once.
    pub fn update<I, S>(&mut self, elements: I) -> Result<(), PatternError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for element in elements {
            let element = element.into();
            let matcher = compile(&element)?;
            self.elements.push(element);
            self.matchers.push(matcher);
        }
        self.misses.borrow_mut().clear();
        Ok(())
    }

    pub fn elements(&self) -> &[String] {
        &self.elements
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Returns the strings hit by any pattern, in first-seen order and without
    /// duplicates.
    pub fn matches<'a, I>(&self, strings: I) -> Vec<&'a str>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut seen = HashSet::new();
        let mut matches = Vec::new();
        for string in strings {
            if seen.contains(string) {
                continue;
            }
            if self.is_match(string) {
                seen.insert(string);
                matches.push(string);
            }
        }
        matches
    }

    pub fn is_match(&self, string: &str) -> bool {
        if self.hits.borrow().contains(string) {
            return true;
        }
        if self.misses.borrow().contains(string) {
            return false;
        }

        let hit = self.matchers.iter().any(|m| m.matches(string));
        let cache = if hit { &self.hits } else { &self.misses };
        cache.borrow_mut().insert(string.to_string());
        hit
    }

    #[cfg(test)]
    fn cached(&self) -> (usize, usize) {
        (self.hits.borrow().len(), self.misses.borrow().len())
    }
}

impl fmt::Debug for PatternList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(&self.elements).finish()
    }
}

fn compile(pattern: &str) -> Result<Pattern, PatternError> {
    Pattern::new(pattern).map_err(|source| PatternError {
        pattern: pattern.to_string(),
        source,
    })
}

/// Splits candidates into hits (whitelisted and not blacklisted) and misses,
/// preserving candidate order.
pub fn filter_by_pattern_lists<'a, I>(
    candidates: I,
    whitelist: &PatternList,
    blacklist: &PatternList,
) -> (Vec<&'a str>, Vec<&'a str>)
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen = HashSet::new();
    let mut hits = Vec::new();
    let mut misses = Vec::new();
    for candidate in candidates {
        if !seen.insert(candidate) {
            continue;
        }
        if whitelist.is_match(candidate) && !blacklist.is_match(candidate) {
            hits.push(candidate);
        } else {
            misses.push(candidate);
        }
    }
    (hits, misses)
}
