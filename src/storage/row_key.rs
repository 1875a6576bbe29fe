//! Row-key formats
//!
//! Row keys are bucket timestamps rendered through a custom date-format
//! pattern such as `yyyy-MM-dd-HH-mm`. Supported specifiers:
//!
//! | Specifier | Field  | Width |
//! |-----------|--------|-------|
//! | `yyyy`    | year   | 4     |
//! | `MM`      | month  | 2     |
//! | `dd`      | day    | 2     |
//! | `HH`      | hour   | 2     |
//! | `mm`      | minute | 2     |
//! | `ss`      | second | 2     |
//!
//! Any other non-letter character is copied literally, as is text inside
//! single quotes or a character escaped with `\`. Letters outside those forms
//! are rejected because they would not produce fixed-width output.
//!
//! Range retrieval compares row keys as strings, so a format is only usable
//! when rendering preserves chronological order. [`RowKeyFormat::validate_for`]
//! checks that.

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::time_unit::TimeUnit;
use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};
use std::ops::RangeInclusive;
use std::fmt::Write;
use std::str::FromStr;

/// Years a four-digit row key can represent
pub const ROW_KEY_YEARS: RangeInclusive<i32> = 0..=9999;

/// A date field rendered as zero-padded digits
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Field {
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
}

impl Field {
    /// Significance order, most significant first
    const ORDER: [Field; 6] = [
        Field::Year,
        Field::Month,
        Field::Day,
        Field::Hour,
        Field::Minute,
        Field::Second,
    ];

    fn width(self) -> usize {
        match self {
            Field::Year => 4,
            _ => 2,
        }
    }

    fn from_run(letter: char, len: usize) -> Option<Field> {
        match (letter, len) {
            ('y', 4) => Some(Field::Year),
            ('M', 2) => Some(Field::Month),
            ('d', 2) => Some(Field::Day),
            ('H', 2) => Some(Field::Hour),
            ('m', 2) => Some(Field::Minute),
            ('s', 2) => Some(Field::Second),
            _ => None,
        }
    }

    fn value(self, ts: &DateTime<Utc>) -> u32 {
        match self {
            Field::Year => ts.year().clamp(*ROW_KEY_YEARS.start(), *ROW_KEY_YEARS.end()) as u32,
            Field::Month => ts.month(),
            Field::Day => ts.day(),
            Field::Hour => ts.hour(),
            Field::Minute => ts.minute(),
            Field::Second => ts.second(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Field(Field),
    Literal(String),
}

/// A parsed row-key format pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowKeyFormat {
    pattern: String,
    tokens: Vec<Token>,
}

impl RowKeyFormat {
    /// Parse a format pattern
    pub fn parse(pattern: &str) -> StorageResult<Self> {
        let invalid = |reason: String| StorageError::InvalidRowKeyFormat {
            format: pattern.to_string(),
            reason,
        };

        let mut tokens = Vec::new();
        let mut literal = String::new();
        let mut chars = pattern.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '\'' => {
                    let mut closed = false;
                    for q in chars.by_ref() {
                        if q == '\'' {
                            closed = true;
                            break;
                        }
                        literal.push(q);
                    }
                    if !closed {
                        return Err(invalid("unterminated quoted literal".into()));
                    }
                }
                '\\' => match chars.next() {
                    Some(escaped) => literal.push(escaped),
                    None => return Err(invalid("dangling escape at end of pattern".into())),
                },
                c if c.is_ascii_alphabetic() => {
                    let mut len = 1;
                    while chars.peek() == Some(&c) {
                        chars.next();
                        len += 1;
                    }
                    let field = Field::from_run(c, len).ok_or_else(|| {
                        invalid(format!(
                            "unsupported specifier {:?}",
                            std::iter::repeat(c).take(len).collect::<String>()
                        ))
                    })?;
                    if !literal.is_empty() {
                        tokens.push(Token::Literal(std::mem::take(&mut literal)));
                    }
                    tokens.push(Token::Field(field));
                }
                c if c.is_alphabetic() => {
                    return Err(invalid(format!("unsupported specifier {:?}", c)));
                }
                other => literal.push(other),
            }
        }

        if !literal.is_empty() {
            tokens.push(Token::Literal(literal));
        }

        if !tokens.iter().any(|t| matches!(t, Token::Field(_))) {
            return Err(invalid("pattern contains no date fields".into()));
        }

        Ok(Self {
            pattern: pattern.to_string(),
            tokens,
        })
    }

    /// The pattern this format was parsed from
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    fn fields(&self) -> impl Iterator<Item = Field> + '_ {
        self.tokens.iter().filter_map(|t| match t {
            Token::Field(f) => Some(*f),
            Token::Literal(_) => None,
        })
    }

    /// Finest unit this format distinguishes, if its fields form a valid prefix
    pub fn resolution(&self) -> Option<TimeUnit> {
        let fields: Vec<Field> = self.fields().collect();
        if fields.is_empty() || fields.len() > Field::ORDER.len() {
            return None;
        }
        if fields[..] != Field::ORDER[..fields.len()] {
            return None;
        }
        match fields.len() {
            6 => Some(TimeUnit::Second),
            5 => Some(TimeUnit::Minute),
            4 => Some(TimeUnit::Hour),
            3 => Some(TimeUnit::Day),
            2 => Some(TimeUnit::Month),
            _ => None,
        }
    }

    /// Check that this format yields sortable, collision-free row keys for `unit`.
    ///
    /// Fields must appear once each, from year downwards without gaps, and
    /// reach at least the unit's own granularity.
    pub fn validate_for(&self, unit: TimeUnit) -> StorageResult<()> {
        let resolution = self.resolution().ok_or_else(|| StorageError::InvalidRowKeyFormat {
            format: self.pattern.clone(),
            reason: "fields must run from yyyy downwards without gaps or repeats".into(),
        })?;

        if resolution > unit {
            return Err(StorageError::InvalidRowKeyFormat {
                format: self.pattern.clone(),
                reason: format!(
                    "resolution {} is coarser than time unit {}",
                    resolution, unit
                ),
            });
        }

        Ok(())
    }

    /// Render a timestamp that identifies a stored bucket.
    ///
    /// Fails for years outside [`ROW_KEY_YEARS`], which would otherwise share
    /// a row key with another bucket.
    pub fn format_bucket(&self, ts: &DateTime<Utc>) -> StorageResult<String> {
        if !ROW_KEY_YEARS.contains(&ts.year()) {
            return Err(StorageError::TimeOutOfRange(*ts));
        }
        Ok(self.format(ts))
    }

    /// Render a timestamp as a row key, clamping the year into [`ROW_KEY_YEARS`].
    ///
    /// Suitable for range bounds; use [`format_bucket`](Self::format_bucket)
    /// for keys of stored rows.
    pub fn format(&self, ts: &DateTime<Utc>) -> String {
        let mut out = String::with_capacity(self.pattern.len());
        for token in &self.tokens {
            match token {
                Token::Literal(text) => out.push_str(text),
                Token::Field(field) => {
                    let _ = write!(out, "{:0width$}", field.value(ts), width = field.width());
                }
            }
        }
        out
    }

    /// Parse a row key back into the timestamp it was rendered from.
    ///
    /// Fields absent from the format default to the start of their range.
    /// Returns `None` for row keys that do not match the format.
    pub fn parse_row_key(&self, row_key: &str) -> Option<DateTime<Utc>> {
        let mut rest = row_key;
        let (mut year, mut month, mut day) = (0i32, 1u32, 1u32);
        let (mut hour, mut minute, mut second) = (0u32, 0u32, 0u32);

        for token in &self.tokens {
            match token {
                Token::Literal(text) => {
                    rest = rest.strip_prefix(text.as_str())?;
                }
                Token::Field(field) => {
                    let width = field.width();
                    let digits = rest.get(..width)?;
                    if !digits.bytes().all(|b| b.is_ascii_digit()) {
                        return None;
                    }
                    let value: u32 = digits.parse().ok()?;
                    rest = &rest[width..];
                    match field {
                        Field::Year => year = value as i32,
                        Field::Month => month = value,
                        Field::Day => day = value,
                        Field::Hour => hour = value,
                        Field::Minute => minute = value,
                        Field::Second => second = value,
                    }
                }
            }
        }

        if !rest.is_empty() {
            return None;
        }

        NaiveDate::from_ymd_opt(year, month, day)?
            .and_hms_opt(hour, minute, second)
            .map(|naive| naive.and_utc())
    }
}

impl FromStr for RowKeyFormat {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl std::fmt::Display for RowKeyFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.pattern)
    }
}
