use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

use super::catalog::CatalogThread;
use super::descriptor::BoardDescriptor;

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("Filter pattern is empty")]
    EmptyPattern,

    #[error("Unknown regex flag '{0}' in filter pattern")]
    UnknownFlag(char),

    #[error("Invalid filter pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("Filter has no targets")]
    NoTargets,
}

/// Which part of a post a filter is tested against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterTarget {
    Subject,
    Comment,
}

/// Boards a filter applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterScope {
    All,
    Boards(BTreeSet<BoardDescriptor>),
}

impl FilterScope {
    pub fn contains(&self, board: &BoardDescriptor) -> bool {
        match self {
            FilterScope::All => true,
            FilterScope::Boards(boards) => boards.contains(board),
        }
    }
}

/// A user rule as stored in the database.
///
/// `pattern` is either plain text (case-insensitive, `*` matches anything) or
/// a regex literal written as `/body/flags` with flags from `i`, `m`, `s`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchFilter {
    /// Database id, `None` until inserted.
    pub id: Option<i64>,
    pub targets: Vec<FilterTarget>,
    pub pattern: String,
    pub scope: FilterScope,
    pub enabled: bool,
    /// Matches create bookmarks. Non-watch filters are kept for other consumers.
    pub watch: bool,
}

impl WatchFilter {
    pub fn new(targets: Vec<FilterTarget>, pattern: impl Into<String>, scope: FilterScope) -> Self {
        Self {
            id: None,
            targets,
            pattern: pattern.into(),
            scope,
            enabled: true,
            watch: true,
        }
    }

    pub fn is_enabled_watch(&self) -> bool {
        self.enabled && self.watch
    }
}

/// A [`WatchFilter`] with its pattern compiled.
#[derive(Debug, Clone)]
pub struct ChanFilter {
    pub filter: WatchFilter,
    matcher: Regex,
}

impl ChanFilter {
    pub fn compile(filter: WatchFilter) -> Result<Self, FilterError> {
        if filter.targets.is_empty() {
            return Err(FilterError::NoTargets);
        }
        let matcher = compile_pattern(&filter.pattern)?;
        Ok(Self { filter, matcher })
    }

    pub fn applies_to_board(&self, board: &BoardDescriptor) -> bool {
        self.filter.scope.contains(board)
    }

    pub fn matches_text(&self, text: &str) -> bool {
        self.matcher.is_match(text)
    }

    /// Test the thread's subject and/or cleaned comment, depending on targets.
    ///
    /// The comment is cleaned lazily, so subject-only filters never pay for it.
    pub fn matches_thread(&self, thread: &CatalogThread) -> bool {
        self.filter.targets.iter().any(|target| match target {
            FilterTarget::Subject => thread
                .subject
                .as_deref()
                .is_some_and(|subject| self.matches_text(subject)),
            FilterTarget::Comment => self.matches_text(thread.comment()),
        })
    }
}

fn compile_pattern(pattern: &str) -> Result<Regex, FilterError> {
    let trimmed = pattern.trim();
    if trimmed.is_empty() {
        return Err(FilterError::EmptyPattern);
    }

    if let Some(rest) = trimmed.strip_prefix('/') {
        if let Some(end) = rest.rfind('/') {
            let (body, flags) = (&rest[..end], &rest[end + 1..]);
            if body.is_empty() {
                return Err(FilterError::EmptyPattern);
            }
            let mut builder = RegexBuilder::new(body);
            for flag in flags.chars() {
                match flag {
                    'i' => {
                        builder.case_insensitive(true);
                    }
                    'm' => {
                        builder.multi_line(true);
                    }
                    's' => {
                        builder.dot_matches_new_line(true);
                    }
                    other => return Err(FilterError::UnknownFlag(other)),
                }
            }
            return Ok(builder.build()?);
        }
    }

    let escaped = trimmed
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Ok(RegexBuilder::new(&escaped).case_insensitive(true).build()?)
}
