use jiff::tz::TimeZone;
use jiff::Timestamp;
use shortcut_core::link::{format_timestamp, parse_timestamp};
use shortcut_core::{LinkName, StoreError};
use std::fmt::Display;
use std::str::FromStr;

/// A calendar month in UTC, the partition key of the recency index.
///
/// Rendered as `YYYY-MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MonthBucket {
    year: i16,
    month: i8,
}

impl MonthBucket {
    pub fn new(year: i16, month: i8) -> Option<Self> {
        ((0..=9999).contains(&year) && (1..=12).contains(&month)).then_some(Self { year, month })
    }

    /// The bucket `ts` falls into.
    pub fn of(ts: Timestamp) -> Self {
        let zoned = ts.to_zoned(TimeZone::UTC);
        Self {
            year: zoned.year(),
            month: zoned.month(),
        }
    }

    pub fn year(&self) -> i16 {
        self.year
    }

    pub fn month(&self) -> i8 {
        self.month
    }

    /// The month before this one, or `None` before year 0.
    pub fn prev(&self) -> Option<Self> {
        if self.month > 1 {
            Self::new(self.year, self.month - 1)
        } else {
            Self::new(self.year - 1, 12)
        }
    }
}

impl Display for MonthBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for MonthBucket {
    type Err = StoreError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = || StoreError::InvalidToken(raw.to_string());

        let (year, month) = raw.split_once('-').ok_or_else(invalid)?;
        if year.len() != 4 || month.len() != 2 {
            return Err(invalid());
        }
        let year = year.parse().map_err(|_| invalid())?;
        let month = month.parse().map_err(|_| invalid())?;
        Self::new(year, month).ok_or_else(invalid)
    }
}

/// Continuation token of a DynamoDB recency listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DynamoDbCursor {
    /// Start at the newest entry of a bucket.
    Bucket(MonthBucket),
    /// Resume inside a bucket, after the given index entry.
    After {
        bucket: MonthBucket,
        name: LinkName,
        updated_at: Timestamp,
    },
}

impl DynamoDbCursor {
    pub fn bucket(&self) -> MonthBucket {
        match self {
            DynamoDbCursor::Bucket(bucket) | DynamoDbCursor::After { bucket, .. } => *bucket,
        }
    }
}

impl Display for DynamoDbCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DynamoDbCursor::Bucket(bucket) => write!(f, "{bucket}"),
            DynamoDbCursor::After {
                bucket,
                name,
                updated_at,
            } => write!(f, "{bucket}:{name}:{}", format_timestamp(*updated_at)),
        }
    }
}

impl FromStr for DynamoDbCursor {
    type Err = StoreError;

    /// Names never contain `:` but timestamps do, so the timestamp is
    /// whatever follows the second colon.
    fn from_str(token: &str) -> Result<Self, Self::Err> {
        let invalid = || StoreError::InvalidToken(token.to_string());

        let mut parts = token.splitn(3, ':');
        let bucket = parts.next().ok_or_else(invalid)?.parse().map_err(|_| invalid())?;
        match (parts.next(), parts.next()) {
            (None, _) => Ok(DynamoDbCursor::Bucket(bucket)),
            (Some(name), Some(updated_at)) => Ok(DynamoDbCursor::After {
                bucket,
                name: LinkName::new(name).map_err(|_| invalid())?,
                updated_at: parse_timestamp(updated_at).map_err(|_| invalid())?,
            }),
            (Some(_), None) => Err(invalid()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_of_timestamp_is_utc_month() {
        let ts = Timestamp::from_second(1_700_000_000).unwrap();
        assert_eq!(MonthBucket::of(ts).to_string(), "2023-11");

        // 2024-01-01T00:00:00Z minus one millisecond
        let ts = Timestamp::from_millisecond(1_704_067_199_999).unwrap();
        assert_eq!(MonthBucket::of(ts).to_string(), "2023-12");
    }

    #[test]
    fn prev_crosses_year_boundary() {
        let jan = MonthBucket::new(2024, 1).unwrap();
        assert_eq!(jan.prev(), MonthBucket::new(2023, 12));
        assert_eq!(MonthBucket::new(2024, 7).unwrap().prev(), MonthBucket::new(2024, 6));
        assert_eq!(MonthBucket::new(0, 1).unwrap().prev(), None);
    }

    #[test]
    fn bucket_parsing() {
        assert_eq!("2023-04".parse::<MonthBucket>().unwrap(), MonthBucket::new(2023, 4).unwrap());
        for raw in ["", "2023", "2023-4", "2023-13", "2023-00", "23-04", "2023/04"] {
            assert!(raw.parse::<MonthBucket>().is_err(), "{raw}");
        }
    }

    #[test]
    fn cursor_forms() {
        let bucket = MonthBucket::new(2023, 11).unwrap();
        let after = DynamoDbCursor::After {
            bucket,
            name: LinkName::new("go/docs").unwrap(),
            updated_at: Timestamp::from_second(1_700_000_000).unwrap(),
        };
        let token = after.to_string();
        assert_eq!(token, "2023-11:go/docs:2023-11-14T22:13:20.000Z");
        assert_eq!(token.parse::<DynamoDbCursor>().unwrap(), after);

        let only = "2023-10".parse::<DynamoDbCursor>().unwrap();
        assert_eq!(only, DynamoDbCursor::Bucket(MonthBucket::new(2023, 10).unwrap()));
        assert_eq!(only.bucket().to_string(), "2023-10");
    }

    #[test]
    fn malformed_cursors_are_invalid_tokens() {
        for token in ["", "nope", "2023-11:name", "2023-11:bad name:2023-11-14T22:13:20.000Z", "2023-11:a:yesterday"] {
            assert!(
                matches!(token.parse::<DynamoDbCursor>(), Err(StoreError::InvalidToken(_))),
                "{token}"
            );
        }
    }
}
