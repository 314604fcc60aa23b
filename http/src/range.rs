/// A satisfiable byte range of a resource of known size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub length: u64,
}

impl ByteRange {
    pub fn full(total: u64) -> Self {
        Self {
            start: 0,
            length: total,
        }
    }

    /// Inclusive index of the last byte.
    pub fn last(&self) -> u64 {
        (self.start + self.length).saturating_sub(1)
    }

    /// Whether a response for this range must be `206 Partial Content`.
    pub fn is_partial(&self, total: u64) -> bool {
        self.start > 0 || self.start + self.length < total
    }

    /// Value for the `Content-Range` header.
    pub fn content_range(&self, total: u64) -> String {
        format!("bytes {}-{}/{total}", self.start, self.last())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeError {
    /// Not a byte range we understand, the header should be ignored.
    Malformed,
    /// Well formed but outside of the resource.
    Unsatisfiable,
}

/// Digits only, `u64::from_str` would also take a leading `+`.
fn parse_u64(s: &str) -> Result<u64, RangeError> {
    let s = s.trim();
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(RangeError::Malformed);
    }
    s.parse::<u64>().map_err(|_| RangeError::Malformed)
}

/// Resolve an optional `Range` header value against a resource of `total` bytes.
///
/// Supports `bytes=<start>-`, `bytes=<start>-<end>` and `bytes=-<suffix>`. Only the first
/// range of a multi-range request is honored. An end past the resource is clamped.
pub fn parse_range(value: Option<&str>, total: u64) -> Result<ByteRange, RangeError> {
    let Some(value) = value else {
        return Ok(ByteRange::full(total));
    };

    let value = value.trim();
    let Some(ranges) = value
        .get(..6)
        .filter(|unit| unit.eq_ignore_ascii_case("bytes="))
        .map(|_| &value[6..])
    else {
        return Err(RangeError::Malformed);
    };

    let first = ranges.split(',').next().unwrap_or_default().trim();
    let Some((start, end)) = first.split_once('-') else {
        return Err(RangeError::Malformed);
    };

    if start.trim().is_empty() {
        let suffix = parse_u64(end)?;
        if suffix == 0 || total == 0 {
            return Err(RangeError::Unsatisfiable);
        }
        let length = suffix.min(total);
        return Ok(ByteRange {
            start: total - length,
            length,
        });
    }

    let start = parse_u64(start)?;
    let end = if end.trim().is_empty() {
        None
    } else {
        Some(parse_u64(end)?)
    };

    if let Some(end) = end {
        if end < start {
            return Err(RangeError::Malformed);
        }
    }

    if start >= total {
        return Err(RangeError::Unsatisfiable);
    }

    let last = end.map_or(total - 1, |end| end.min(total - 1));

    Ok(ByteRange {
        start,
        length: last - start + 1,
    })
}

#[cfg(test)]
mod tests {
    use quickcheck_macros::quickcheck;

    use super::*;

    #[test]
    fn no_header_is_whole_resource() {
        let range = parse_range(None, 1000).unwrap();
        assert_eq!(range, ByteRange::full(1000));
        assert!(!range.is_partial(1000));
        assert_eq!(range.last(), 999);
    }

    #[test]
    fn closed_range() {
        let range = parse_range(Some("bytes=100-199"), 1000).unwrap();
        assert_eq!(
            range,
            ByteRange {
                start: 100,
                length: 100
            }
        );
        assert!(range.is_partial(1000));
        assert_eq!(range.content_range(1000), "bytes 100-199/1000");
    }

    #[test]
    fn open_ended_range() {
        let range = parse_range(Some("bytes=0-"), 1000).unwrap();
        assert!(!range.is_partial(1000));

        let range = parse_range(Some("bytes=500-"), 1000).unwrap();
        assert_eq!(range.length, 500);
        assert_eq!(range.content_range(1000), "bytes 500-999/1000");
    }

    #[test]
    fn end_is_clamped() {
        let range = parse_range(Some("bytes=900-5000"), 1000).unwrap();
        assert_eq!(
            range,
            ByteRange {
                start: 900,
                length: 100
            }
        );
    }

    #[test]
    fn full_explicit_range_is_not_partial() {
        let range = parse_range(Some("bytes=0-999"), 1000).unwrap();
        assert!(!range.is_partial(1000));
    }

    #[test]
    fn suffix_range() {
        let range = parse_range(Some("bytes=-100"), 1000).unwrap();
        assert_eq!(
            range,
            ByteRange {
                start: 900,
                length: 100
            }
        );
        let range = parse_range(Some("bytes=-5000"), 1000).unwrap();
        assert_eq!(range, ByteRange::full(1000));
    }

    #[test]
    fn first_of_multiple_ranges() {
        let range = parse_range(Some("bytes=0-9, 20-29"), 1000).unwrap();
        assert_eq!(range, ByteRange { start: 0, length: 10 });
    }

    #[test]
    fn unsatisfiable() {
        assert_eq!(
            parse_range(Some("bytes=1000-"), 1000),
            Err(RangeError::Unsatisfiable)
        );
        assert_eq!(
            parse_range(Some("bytes=-0"), 1000),
            Err(RangeError::Unsatisfiable)
        );
        assert_eq!(
            parse_range(Some("bytes=0-"), 0),
            Err(RangeError::Unsatisfiable)
        );
    }

    #[test]
    fn malformed() {
        assert_eq!(
            parse_range(Some("items=0-1"), 1000),
            Err(RangeError::Malformed)
        );
        assert_eq!(
            parse_range(Some("bytes=abc-"), 1000),
            Err(RangeError::Malformed)
        );
        assert_eq!(
            parse_range(Some("bytes=200-100"), 1000),
            Err(RangeError::Malformed)
        );
        assert_eq!(parse_range(Some("bytes="), 1000), Err(RangeError::Malformed));
        assert_eq!(
            parse_range(Some("bytes=+5-"), 1000),
            Err(RangeError::Malformed)
        );
        assert_eq!(
            parse_range(Some("bytes=0-+9"), 1000),
            Err(RangeError::Malformed)
        );
        assert_eq!(
            parse_range(Some("bytes=-+9"), 1000),
            Err(RangeError::Malformed)
        );
    }

    #[quickcheck]
    fn satisfiable_ranges_stay_inside(start: u32, end: Option<u32>, total: u32) -> bool {
        let total = total as u64;
        let header = match end {
            Some(end) => format!("bytes={start}-{end}"),
            None => format!("bytes={start}-"),
        };
        match parse_range(Some(&header), total) {
            Ok(range) => {
                range.length > 0
                    && range.start == start as u64
                    && range.start + range.length <= total
            }
            Err(RangeError::Unsatisfiable) => start as u64 >= total,
            Err(RangeError::Malformed) => end.is_some_and(|end| end < start),
        }
    }
}
