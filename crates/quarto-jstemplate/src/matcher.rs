/*
 * matcher.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Delimiter matching.
//!
//! The escape, interpolate and evaluate patterns are combined into one
//! alternation (in that order) followed by an end-of-input alternative. A
//! single left-to-right scan then yields every delimited region in document
//! order, followed by exactly one [`MatchKind::End`] match at the end of the
//! text so the trailing literal text is never lost.

use std::iter::FusedIterator;

use regex::{CaptureMatches, Regex};
use tracing::trace;

use crate::error::{TemplateError, TemplateResult};
use crate::settings::{Pattern, Region, TemplateSettings};

/// Stand-in for a disabled region. It never matches but still has the one
/// capture group, so group numbers stay fixed.
const NO_MATCH: &str = "(.)^";

/// What a [`Match`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Escape,
    Interpolate,
    Evaluate,
    /// The end of the template text.
    End,
}

impl From<Region> for MatchKind {
    fn from(region: Region) -> Self {
        match region {
            Region::Escape => MatchKind::Escape,
            Region::Interpolate => MatchKind::Interpolate,
            Region::Evaluate => MatchKind::Evaluate,
        }
    }
}

/// One delimited region (or the end of the text).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Match<'t> {
    pub kind: MatchKind,
    /// The whole matched text, delimiters included. Empty for `End`.
    pub text: &'t str,
    /// Byte offset of the match in the template.
    pub start: usize,
    /// The captured inner source. `None` for `End`.
    pub inner: Option<&'t str>,
}

impl Match<'_> {
    /// Byte offset just past the match.
    pub fn end(&self) -> usize {
        self.start + self.text.len()
    }
}

/// A compiled delimiter scanner for one set of settings.
#[derive(Debug, Clone)]
pub struct Matcher {
    combined: Regex,
}

impl Matcher {
    /// Validate the configured patterns and combine them.
    pub fn new(settings: &TemplateSettings) -> TemplateResult<Self> {
        let mut branches = Vec::with_capacity(Region::ALL.len());
        for region in Region::ALL {
            let branch = match settings.pattern(region) {
                Some(pattern) => {
                    validate(region, pattern)?;
                    pattern.regex().as_str()
                }
                None => NO_MATCH,
            };
            branches.push(format!("(?:{branch})"));
        }
        let source = format!("{}|$", branches.join("|"));

        let combined = Regex::new(&source)
            .map_err(|e| TemplateError::invalid_pattern(None, &source, e.to_string()))?;
        if combined.captures_len() != Region::ALL.len() + 1 {
            return Err(TemplateError::invalid_pattern(
                None,
                &source,
                "combined pattern has an unexpected number of capture groups",
            ));
        }

        trace!(pattern = %source, "combined delimiter pattern");
        Ok(Self { combined })
    }

    /// Lazily scan `text`.
    pub fn matches<'r, 't>(&'r self, text: &'t str) -> Matches<'r, 't> {
        Matches {
            text,
            captures: self.combined.captures_iter(text),
            finished: false,
        }
    }
}

fn validate(region: Region, pattern: &Pattern) -> TemplateResult<()> {
    if !pattern.is_global() {
        return Err(TemplateError::invalid_pattern(
            Some(region),
            pattern.as_str(),
            "pattern must scan for every match (add the `g` flag)",
        ));
    }
    let groups = pattern.capture_groups();
    if groups != 1 {
        return Err(TemplateError::invalid_pattern(
            Some(region),
            pattern.as_str(),
            format!("expected exactly one capture group, found {groups}"),
        ));
    }
    Ok(())
}

/// Iterator over the matches in one template. See [`Matcher::matches`].
#[derive(Debug)]
pub struct Matches<'r, 't> {
    text: &'t str,
    captures: CaptureMatches<'r, 't>,
    finished: bool,
}

impl<'t> Iterator for Matches<'_, 't> {
    type Item = Match<'t>;

    fn next(&mut self) -> Option<Match<'t>> {
        if self.finished {
            return None;
        }

        for captures in self.captures.by_ref() {
            let Some(whole) = captures.get(0) else {
                continue;
            };
            let region = Region::ALL
                .iter()
                .zip(1..)
                .find_map(|(region, group)| captures.get(group).map(|inner| (*region, inner)));

            match region {
                Some((region, inner)) => {
                    return Some(Match {
                        kind: region.into(),
                        text: whole.as_str(),
                        start: whole.start(),
                        inner: Some(inner.as_str()),
                    });
                }
                // Only the end-of-input alternative matches without a group.
                None => break,
            }
        }

        // A region that ends exactly at the end of the text hides the
        // zero-width end alternative from the scan, so `End` is produced here
        // rather than taken from the regex.
        self.finished = true;
        Some(Match {
            kind: MatchKind::End,
            text: "",
            start: self.text.len(),
            inner: None,
        })
    }
}

impl FusedIterator for Matches<'_, '_> {}
