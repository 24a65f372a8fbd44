//! # relay-pattern
//!
//! Compiles task file patterns into matchable filters.
//!
//! ```rust
//! use chrono::NaiveDate;
//! use relay_pattern::compile_pattern;
//!
//! let today = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
//! let filter = compile_pattern(Some("sales_[fechaAyerddmmaaaa]_*.csv"), today);
//! assert!(filter.matches_name("sales_14032024_north.csv"));
//! ```

pub mod filter;
pub mod processor;

pub use filter::{CompiledFilter, NameMatcher};
pub use processor::{compile_pattern, matches_date_filter, PatternProcessor, DEFAULT_DAYS_BACK};
