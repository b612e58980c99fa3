//! Cursor pagination over compound sort keys
//!
//! A cursor token is an opaque, URL-safe encoding of the position of the last row a
//! client has seen: the sort field, the direction, the row's primary sort value and the
//! row identifier used to break ties. Tokens are derived only from persisted column
//! values, so a token issued before a restart stays valid after it.
//!
//! Rows are ordered by `(primary, id)` with both components in the requested direction.
//! Rows whose datetime is unknown sort as the Unix epoch; stores that evaluate
//! predicates themselves must apply the same rule.
//!
//! # Example
//!
//! ```
//! use chrono::{TimeZone, Utc};
//! use livefeed_core::pagination::{decode_cursor, encode_cursor, SortKey, SortSpec};
//!
//! struct Row { id: i64, views: i64 }
//!
//! impl SortKey for Row {
//!     fn sort_id(&self) -> i64 { self.id }
//!     fn sort_datetime(&self) -> Option<chrono::DateTime<Utc>> { None }
//!     fn sort_views(&self) -> i64 { self.views }
//! }
//!
//! let spec = SortSpec::views_desc();
//! let token = encode_cursor(spec, &Row { id: 7, views: 100 });
//! let predicate = decode_cursor(&token).unwrap();
//!
//! assert!(predicate.admits_row(&Row { id: 3, views: 100 }));
//! assert!(!predicate.admits_row(&Row { id: 9, views: 100 }));
//! ```

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

use crate::error::LiveFeedError;

/// Default number of rows per page
pub const DEFAULT_PAGE_SIZE: usize = 30;

const TOKEN_VERSION: &str = "v1";

/// Errors produced while decoding a cursor token
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PaginationError {
    #[error("Invalid cursor encoding: {0}")]
    Encoding(String),

    #[error("Invalid cursor format: {0}")]
    Format(String),

    #[error("Cursor was issued for {token} but the request sorts by {requested}")]
    SpecMismatch {
        token: SortSpec,
        requested: SortSpec,
    },
}

impl From<PaginationError> for LiveFeedError {
    fn from(err: PaginationError) -> Self {
        LiveFeedError::InvalidCursor(err.to_string())
    }
}

/// Column a listing is ordered by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortField {
    Datetime,
    Views,
}

impl SortField {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Datetime => "datetime",
            Self::Views => "views",
        }
    }
}

/// Ordering direction, applied to both the primary value and the tie-breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }

    /// SQL keyword for this direction
    pub fn sql(&self) -> &'static str {
        self.as_str()
    }
}

/// Sort field plus direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: SortField,
    pub direction: SortDirection,
}

impl fmt::Display for SortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.field.as_str(), self.direction.as_str())
    }
}

impl SortSpec {
    pub const fn new(field: SortField, direction: SortDirection) -> Self {
        Self { field, direction }
    }

    pub const fn newest_first() -> Self {
        Self::new(SortField::Datetime, SortDirection::Desc)
    }

    pub const fn oldest_first() -> Self {
        Self::new(SortField::Datetime, SortDirection::Asc)
    }

    pub const fn views_desc() -> Self {
        Self::new(SortField::Views, SortDirection::Desc)
    }

    /// Compare two positions in listing order
    ///
    /// `Ordering::Less` means `a` is listed before `b`.
    pub fn compare(&self, a: &CursorPosition, b: &CursorPosition) -> Ordering {
        let ascending = (a.value, a.id).cmp(&(b.value, b.id));
        match self.direction {
            SortDirection::Asc => ascending,
            SortDirection::Desc => ascending.reverse(),
        }
    }

    /// Position of `row` under this spec's field
    pub fn position_of<R: SortKey + ?Sized>(&self, row: &R) -> CursorPosition {
        let value = match self.field {
            SortField::Datetime => datetime_sort_value(row.sort_datetime()),
            SortField::Views => row.sort_views(),
        };

        CursorPosition {
            value,
            id: row.sort_id(),
        }
    }
}

/// Primary sort value of a datetime: microseconds since the epoch, epoch when unknown
pub fn datetime_sort_value(datetime: Option<DateTime<Utc>>) -> i64 {
    datetime.map(|dt| dt.timestamp_micros()).unwrap_or(0)
}

/// Rows that can be positioned by the cursor codec
pub trait SortKey {
    /// Stable row identifier used as the tie-breaker
    fn sort_id(&self) -> i64;
    fn sort_datetime(&self) -> Option<DateTime<Utc>>;
    fn sort_views(&self) -> i64;
}

/// Position of a row: primary sort value and row identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CursorPosition {
    pub value: i64,
    pub id: i64,
}

/// Filter decoded from a cursor token
///
/// Admits exactly the rows listed after the encoded row under the encoded spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CursorPredicate {
    pub spec: SortSpec,
    pub after: CursorPosition,
}

impl CursorPredicate {
    pub fn admits(&self, position: &CursorPosition) -> bool {
        self.spec.compare(&self.after, position) == Ordering::Less
    }

    pub fn admits_row<R: SortKey + ?Sized>(&self, row: &R) -> bool {
        self.admits(&self.spec.position_of(row))
    }

    /// The primary value as a timestamp, for datetime-sorted SQL predicates
    pub fn datetime_bound(&self) -> DateTime<Utc> {
        let secs = self.after.value.div_euclid(1_000_000);
        let nanos = (self.after.value.rem_euclid(1_000_000) * 1_000) as u32;
        Utc.timestamp_opt(secs, nanos).single().unwrap_or_default()
    }

    /// Reject tokens issued for a different ordering than the current request
    pub fn ensure_spec(&self, requested: SortSpec) -> Result<(), PaginationError> {
        if self.spec == requested {
            Ok(())
        } else {
            Err(PaginationError::SpecMismatch {
                token: self.spec,
                requested,
            })
        }
    }
}

/// Encode the position of `row` under `spec` as an opaque token
///
/// Identical inputs always produce the identical token.
pub fn encode_cursor<R: SortKey + ?Sized>(spec: SortSpec, row: &R) -> String {
    let position = spec.position_of(row);
    let raw = format!(
        "{}:{}:{}:{}:{}",
        TOKEN_VERSION,
        spec.field.as_str(),
        spec.direction.as_str(),
        position.value,
        position.id
    );
    URL_SAFE_NO_PAD.encode(raw.as_bytes())
}

/// Decode a token produced by [`encode_cursor`]
pub fn decode_cursor(token: &str) -> Result<CursorPredicate, PaginationError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(token.trim().as_bytes())
        .map_err(|e| PaginationError::Encoding(e.to_string()))?;
    let raw = String::from_utf8(bytes).map_err(|e| PaginationError::Encoding(e.to_string()))?;

    let parts: Vec<&str> = raw.split(':').collect();
    if parts.len() != 5 {
        return Err(PaginationError::Format(format!(
            "expected 5 segments, found {}",
            parts.len()
        )));
    }

    if parts[0] != TOKEN_VERSION {
        return Err(PaginationError::Format(format!(
            "unsupported version '{}'",
            parts[0]
        )));
    }

    let field = match parts[1] {
        "datetime" => SortField::Datetime,
        "views" => SortField::Views,
        other => return Err(PaginationError::Format(format!("unknown field '{}'", other))),
    };

    let direction = match parts[2] {
        "ASC" => SortDirection::Asc,
        "DESC" => SortDirection::Desc,
        other => {
            return Err(PaginationError::Format(format!(
                "unknown direction '{}'",
                other
            )))
        }
    };

    let value = parts[3]
        .parse::<i64>()
        .map_err(|e| PaginationError::Format(format!("invalid sort value: {}", e)))?;
    let id = parts[4]
        .parse::<i64>()
        .map_err(|e| PaginationError::Format(format!("invalid row id: {}", e)))?;

    Ok(CursorPredicate {
        spec: SortSpec::new(field, direction),
        after: CursorPosition { value, id },
    })
}

/// One page of a cursor-paginated listing
///
/// `next_token` is only set when the page came back full. This approximates "has more":
/// a full final page still yields a token, and following it returns an empty page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub data: Vec<T>,
    pub next_token: Option<String>,
}

impl<T> Default for Page<T> {
    fn default() -> Self {
        Self {
            data: Vec::new(),
            next_token: None,
        }
    }
}

impl<T: SortKey> Page<T> {
    /// Wrap rows already ordered by `spec` and limited to `page_size`
    pub fn from_rows(data: Vec<T>, spec: SortSpec, page_size: usize) -> Self {
        let next_token = if page_size > 0 && data.len() >= page_size {
            data.last().map(|row| encode_cursor(spec, row))
        } else {
            None
        };

        Self { data, next_token }
    }
}

impl<T> Page<T> {
    pub fn map<U, F: FnMut(T) -> U>(self, f: F) -> Page<U> {
        Page {
            data: self.data.into_iter().map(f).collect(),
            next_token: self.next_token,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone)]
    struct Row {
        id: i64,
        datetime: Option<DateTime<Utc>>,
        views: i64,
    }

    impl SortKey for Row {
        fn sort_id(&self) -> i64 {
            self.id
        }
        fn sort_datetime(&self) -> Option<DateTime<Utc>> {
            self.datetime
        }
        fn sort_views(&self) -> i64 {
            self.views
        }
    }

    fn row(id: i64, hour: u32, views: i64) -> Row {
        Row {
            id,
            datetime: Some(Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap()),
            views,
        }
    }

    fn sample() -> Vec<Row> {
        vec![
            row(1, 10, 500),
            row(2, 11, 300),
            row(3, 11, 300),
            row(4, 12, 300),
            row(5, 9, 900),
            Row {
                id: 6,
                datetime: None,
                views: 0,
            },
        ]
    }

    fn sorted(rows: &[Row], spec: SortSpec) -> Vec<Row> {
        let mut rows = rows.to_vec();
        rows.sort_by(|a, b| spec.compare(&spec.position_of(a), &spec.position_of(b)));
        rows
    }

    #[test]
    fn test_encode_is_deterministic() {
        let r = row(42, 8, 77);
        let spec = SortSpec::newest_first();
        assert_eq!(encode_cursor(spec, &r), encode_cursor(spec, &r));
        assert_ne!(
            encode_cursor(spec, &r),
            encode_cursor(SortSpec::oldest_first(), &r)
        );
    }

    #[test]
    fn test_token_is_url_safe() {
        let token = encode_cursor(SortSpec::views_desc(), &row(i64::MAX, 23, i64::MAX));
        assert!(token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_predicate_excludes_row_and_predecessors_for_every_spec() {
        let rows = sample();
        let specs = [
            SortSpec::newest_first(),
            SortSpec::oldest_first(),
            SortSpec::views_desc(),
            SortSpec::new(SortField::Views, SortDirection::Asc),
        ];

        for spec in specs {
            let ordered = sorted(&rows, spec);
            for (index, pivot) in ordered.iter().enumerate() {
                let predicate = decode_cursor(&encode_cursor(spec, pivot)).unwrap();
                let admitted: Vec<i64> = ordered
                    .iter()
                    .filter(|r| predicate.admits_row(*r))
                    .map(|r| r.id)
                    .collect();
                let expected: Vec<i64> = ordered[index + 1..].iter().map(|r| r.id).collect();
                assert_eq!(admitted, expected, "spec {} pivot {}", spec, pivot.id);
            }
        }
    }

    #[test]
    fn test_ties_break_on_id_in_sort_direction() {
        let spec = SortSpec::views_desc();
        let ordered: Vec<i64> = sorted(&sample(), spec).iter().map(|r| r.id).collect();
        assert_eq!(ordered, vec![5, 1, 4, 3, 2, 6]);

        let spec = SortSpec::oldest_first();
        let ordered: Vec<i64> = sorted(&sample(), spec).iter().map(|r| r.id).collect();
        assert_eq!(ordered, vec![6, 5, 1, 2, 3, 4]);
    }

    #[test]
    fn test_paging_through_ties_visits_every_row_once() {
        let rows: Vec<Row> = (1..=7).map(|id| row(id, 10, 100)).collect();
        let spec = SortSpec::views_desc();
        let page_size = 3;

        let mut seen = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let predicate = token.as_deref().map(|t| decode_cursor(t).unwrap());
            let page_rows: Vec<Row> = sorted(&rows, spec)
                .into_iter()
                .filter(|r| predicate.map_or(true, |p| p.admits_row(r)))
                .take(page_size)
                .collect();
            let page = Page::from_rows(page_rows, spec, page_size);
            seen.extend(page.data.iter().map(|r| r.id));
            match page.next_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        assert_eq!(seen, vec![7, 6, 5, 4, 3, 2, 1]);
    }

    #[test]
    fn test_token_only_on_full_page() {
        let spec = SortSpec::newest_first();
        let full = Page::from_rows(vec![row(1, 1, 1), row(2, 2, 2)], spec, 2);
        assert!(full.next_token.is_some());

        let partial = Page::from_rows(vec![row(1, 1, 1)], spec, 2);
        assert!(partial.next_token.is_none());

        let empty: Page<Row> = Page::from_rows(Vec::new(), spec, DEFAULT_PAGE_SIZE);
        assert!(empty.next_token.is_none());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            decode_cursor("%%%"),
            Err(PaginationError::Encoding(_))
        ));

        let wrong_version = URL_SAFE_NO_PAD.encode("v0:views:DESC:1:1");
        assert!(matches!(
            decode_cursor(&wrong_version),
            Err(PaginationError::Format(_))
        ));

        let bad_field = URL_SAFE_NO_PAD.encode("v1:title:DESC:1:1");
        assert!(matches!(
            decode_cursor(&bad_field),
            Err(PaginationError::Format(_))
        ));
    }

    #[test]
    fn test_ensure_spec_mismatch() {
        let token = encode_cursor(SortSpec::views_desc(), &row(1, 1, 1));
        let predicate = decode_cursor(&token).unwrap();
        assert!(predicate.ensure_spec(SortSpec::views_desc()).is_ok());
        assert!(matches!(
            predicate.ensure_spec(SortSpec::newest_first()),
            Err(PaginationError::SpecMismatch { .. })
        ));
    }

    #[test]
    fn test_datetime_bound_round_trips_micros() {
        let r = row(9, 14, 0);
        let predicate = decode_cursor(&encode_cursor(SortSpec::newest_first(), &r)).unwrap();
        assert_eq!(Some(predicate.datetime_bound()), r.datetime);
    }
}
