//! Compiled file filters.

use chrono::NaiveDate;
use regex::Regex;

use crate::processor::matches_date_filter;

/// How file names are matched.
#[derive(Debug, Clone)]
pub enum NameMatcher {
    /// Anchored, case-insensitive regular expression
    Regex(Regex),
    /// Case-insensitive exact comparison, used when no regex could be built
    Literal(String),
}

impl NameMatcher {
    pub fn is_match(&self, name: &str) -> bool {
        match self {
            NameMatcher::Regex(re) => re.is_match(name),
            NameMatcher::Literal(literal) => literal.to_lowercase() == name.to_lowercase(),
        }
    }
}

/// The executable form of a task's file pattern.
///
/// Two filters compiled from the same pattern on the same day are equal.
#[derive(Debug, Clone)]
pub struct CompiledFilter {
    /// Anchored regex text (or the literal fallback)
    pub regex_pattern: String,
    /// Whether the modification-age filter applies
    pub requires_date_filter: bool,
    /// Non-negative window size for the modification-age filter
    pub days_back: Option<i64>,
    /// Pattern as written on the task
    pub original_pattern: String,
    matcher: NameMatcher,
}

impl CompiledFilter {
    pub(crate) fn new(
        regex_pattern: String,
        matcher: NameMatcher,
        days_back: Option<i64>,
        original_pattern: String,
    ) -> Self {
        Self {
            regex_pattern,
            requires_date_filter: days_back.is_some(),
            days_back,
            original_pattern,
            matcher,
        }
    }

    /// True if the file name passes the name part of the filter.
    pub fn matches_name(&self, name: &str) -> bool {
        self.matcher.is_match(name)
    }

    /// True if a file passes both the name and, when required, the date filter.
    ///
    /// `last_modified` is the file's modification date in the reference
    /// timezone. A file without a known modification date never passes a
    /// date filter.
    pub fn accepts(&self, name: &str, last_modified: Option<NaiveDate>, today: NaiveDate) -> bool {
        if !self.matches_name(name) {
            return false;
        }
        match (self.requires_date_filter, self.days_back) {
            (true, Some(days_back)) => last_modified
                .map(|date| matches_date_filter(date, days_back, today))
                .unwrap_or(false),
            _ => true,
        }
    }

    pub fn matcher(&self) -> &NameMatcher {
        &self.matcher
    }
}

impl PartialEq for CompiledFilter {
    fn eq(&self, other: &Self) -> bool {
        self.regex_pattern == other.regex_pattern
            && self.requires_date_filter == other.requires_date_filter
            && self.days_back == other.days_back
            && self.original_pattern == other.original_pattern
    }
}

impl Eq for CompiledFilter {}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 15).unwrap()
    }

    #[test]
    fn test_literal_matcher_ignores_case() {
        let matcher = NameMatcher::Literal("Report.CSV".to_string());
        assert!(matcher.is_match("report.csv"));
        assert!(!matcher.is_match("report.csv.bak"));
    }

    #[test]
    fn test_accepts_without_date_filter_ignores_dates() {
        let filter = CompiledFilter::new(
            "^.*$".to_string(),
            NameMatcher::Regex(Regex::new("^.*$").unwrap()),
            None,
            String::new(),
        );
        assert!(filter.accepts("anything.bin", None, today()));
    }

    #[test]
    fn test_accepts_with_date_filter_needs_known_date() {
        let filter = CompiledFilter::new(
            "^.*$".to_string(),
            NameMatcher::Regex(Regex::new("^.*$").unwrap()),
            Some(2),
            "*[fechaUltMod_2]".to_string(),
        );
        assert!(filter.accepts("a.txt", Some(today()), today()));
        assert!(filter.accepts("a.txt", NaiveDate::from_ymd_opt(2024, 3, 13), today()));
        assert!(!filter.accepts("a.txt", NaiveDate::from_ymd_opt(2024, 3, 12), today()));
        assert!(!filter.accepts("a.txt", None, today()));
    }
}
