//! Pattern compilation.
//!
//! The pattern language is a file-name glob with two bracketed tokens:
//!
//! - `[fechaAyerddmmaaaa]` expands to yesterday's date as `ddMMyyyy`.
//! - `[fechaUltMod]` / `[fechaUltMod_N]` is removed from the name pattern and
//!   restricts matches to files modified within the last N days (default 1).
//!
//! `*` matches any run of characters, `?` exactly one, everything else is
//! literal. Tokens and names are matched case-insensitively.

use std::sync::LazyLock;

use chrono::{DateTime, Days, NaiveDate, Utc};
use chrono_tz::Tz;
use regex::{Regex, RegexBuilder};
use tracing::{debug, warn};

use crate::filter::{CompiledFilter, NameMatcher};

/// Window used by `[fechaUltMod]` without a number.
pub const DEFAULT_DAYS_BACK: i64 = 1;

static YESTERDAY_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\[fechaAyerddmmaaaa\]").expect("constant regex pattern is valid")
});

static LAST_MODIFIED_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\[fechaUltMod(?:_(-?\d+))?\]").expect("constant regex pattern is valid")
});

/// Compiles task patterns against the current date in a reference timezone.
#[derive(Debug, Clone, Copy)]
pub struct PatternProcessor {
    timezone: Tz,
}

impl PatternProcessor {
    pub fn new(timezone: Tz) -> Self {
        Self { timezone }
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Calendar date of `instant` in the reference timezone.
    pub fn local_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.timezone).date_naive()
    }

    /// Compile `raw` with "today" taken from `now`.
    pub fn compile(&self, raw: Option<&str>, now: DateTime<Utc>) -> CompiledFilter {
        compile_pattern(raw, self.local_date(now))
    }

    /// Modification-age check with both instants converted to the reference timezone.
    pub fn matches_date_filter(
        &self,
        last_modified: DateTime<Utc>,
        days_back: i64,
        now: DateTime<Utc>,
    ) -> bool {
        matches_date_filter(self.local_date(last_modified), days_back, self.local_date(now))
    }
}

impl Default for PatternProcessor {
    fn default() -> Self {
        Self::new(Tz::UTC)
    }
}

/// Compile a raw pattern. Never fails: blank patterns match everything and a
/// pattern that cannot become a regex degrades to a literal comparison.
pub fn compile_pattern(raw: Option<&str>, today: NaiveDate) -> CompiledFilter {
    let original = raw.unwrap_or_default().to_string();

    if original.trim().is_empty() {
        return match_all(None, original);
    }

    let (remainder, days_back) = extract_days_back(&original);
    let expanded = expand_yesterday(&remainder, today);

    // A pattern made only of the modification token filters by date alone.
    if expanded.trim().is_empty() {
        return match_all(days_back, original);
    }

    let regex_pattern = glob_to_regex(&expanded);
    match RegexBuilder::new(&regex_pattern)
        .case_insensitive(true)
        .build()
    {
        Ok(re) => {
            debug!(
                pattern = %original,
                regex = %regex_pattern,
                days_back = ?days_back,
                "Compiled file pattern"
            );
            CompiledFilter::new(regex_pattern, NameMatcher::Regex(re), days_back, original)
        }
        Err(e) => {
            warn!(pattern = %original, error = %e, "Pattern is not a valid regex, matching literally");
            let literal = format!("^{}$", regex::escape(&original));
            let matcher = RegexBuilder::new(&literal)
                .case_insensitive(true)
                .build()
                .map(NameMatcher::Regex)
                .unwrap_or_else(|_| NameMatcher::Literal(original.clone()));
            CompiledFilter::new(literal, matcher, None, original)
        }
    }
}

/// True iff `last_modified` lies in `[today - |days_back|, today]`.
///
/// Negative windows are corrected to their absolute value.
pub fn matches_date_filter(last_modified: NaiveDate, days_back: i64, today: NaiveDate) -> bool {
    if days_back < 0 {
        warn!(days_back, "Negative days_back, using absolute value");
    }
    let window = days_back.unsigned_abs();
    let earliest = today
        .checked_sub_days(Days::new(window))
        .unwrap_or(NaiveDate::MIN);
    last_modified >= earliest && last_modified <= today
}

fn match_all(days_back: Option<i64>, original: String) -> CompiledFilter {
    let regex_pattern = ".*".to_string();
    let matcher = Regex::new(&regex_pattern)
        .map(NameMatcher::Regex)
        .unwrap_or_else(|_| NameMatcher::Literal(String::new()));
    CompiledFilter::new(regex_pattern, matcher, days_back, original)
}

/// Strip every modification-age token; the first one decides the window.
fn extract_days_back(pattern: &str) -> (String, Option<i64>) {
    let Some(captures) = LAST_MODIFIED_TOKEN.captures(pattern) else {
        return (pattern.to_string(), None);
    };

    let days_back = captures
        .get(1)
        .and_then(|n| n.as_str().parse::<i64>().ok())
        .map(i64::abs)
        .unwrap_or(DEFAULT_DAYS_BACK);

    let cleaned = LAST_MODIFIED_TOKEN.replace_all(pattern, "").into_owned();
    (cleaned, Some(days_back))
}

fn expand_yesterday(pattern: &str, today: NaiveDate) -> String {
    if !YESTERDAY_TOKEN.is_match(pattern) {
        return pattern.to_string();
    }
    let yesterday = today.pred_opt().unwrap_or(today);
    let formatted = yesterday.format("%d%m%Y").to_string();
    YESTERDAY_TOKEN
        .replace_all(pattern, regex::NoExpand(&formatted))
        .into_owned()
}

fn glob_to_regex(glob: &str) -> String {
    let mut out = String::with_capacity(glob.len() + 8);
    out.push('^');
    let mut buf = [0u8; 4];
    for c in glob.chars() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            other => out.push_str(&regex::escape(other.encode_utf8(&mut buf))),
        }
    }
    out.push('$');
    out
}
