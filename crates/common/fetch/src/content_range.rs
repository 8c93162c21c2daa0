//! Parsing of `Content-Range` headers on partial responses.

/// The `bytes A-B/T` triple of a partial response.
///
/// A server answering a range request may return a different range than the
/// one asked for, so the first position has to be taken from the header
/// rather than assumed. Only single ranges are handled; a
/// `multipart/byteranges` body never occurs because requests always carry a
/// single range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ContentRange {
    pub first: i64,
    pub last: i64,
    pub total: i64,
}

#[derive(Debug, thiserror::Error)]
#[error("invalid Content-Range header, reason: {reason}, got: {value:?}")]
pub struct ContentRangeError {
    reason: &'static str,
    value: String,
}

impl ContentRangeError {
    fn new(reason: &'static str, value: &str) -> Self {
        Self {
            reason,
            value: value.into(),
        }
    }
}

pub(crate) fn parse(value: &str) -> Result<ContentRange, ContentRangeError> {
    let (unit, range) = value
        .split_once(' ')
        .ok_or_else(|| ContentRangeError::new("missing unit", value))?;
    if unit != "bytes" {
        return Err(ContentRangeError::new("unknown unit", value));
    }
    let (range, total) = range
        .split_once('/')
        .ok_or_else(|| ContentRangeError::new("missing complete length", value))?;
    let (first, last) = range
        .split_once('-')
        .ok_or_else(|| ContentRangeError::new("missing range bounds", value))?;

    let first = first
        .parse()
        .map_err(|_| ContentRangeError::new("unparsable first position", value))?;
    let last = last
        .parse()
        .map_err(|_| ContentRangeError::new("unparsable last position", value))?;
    let total = total
        .parse()
        .map_err(|_| ContentRangeError::new("unparsable complete length", value))?;
    if first < 0 || last < first || total <= last {
        return Err(ContentRangeError::new("inconsistent range", value));
    }

    Ok(ContentRange { first, last, total })
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn parses_a_single_byte_probe_response() {
        let range = parse("bytes 0-0/1000000").unwrap();
        assert_eq!(
            range,
            ContentRange {
                first: 0,
                last: 0,
                total: 1000000
            }
        );
    }

    #[test]
    fn parses_a_resumed_range() {
        let range = parse("bytes 500000-999999/1000000").unwrap();
        assert_eq!(range.first, 500000);
        assert_eq!(range.last, 999999);
        assert_eq!(range.total, 1000000);
    }

    #[test_case("" ; "empty")]
    #[test_case("bytes" ; "no range")]
    #[test_case("items 0-0/10" ; "wrong unit")]
    #[test_case("bytes 0-0" ; "no complete length")]
    #[test_case("bytes 0-0/*" ; "unknown complete length")]
    #[test_case("bytes x-0/10" ; "garbage first position")]
    #[test_case("bytes 5-4/10" ; "inverted range")]
    #[test_case("bytes 5-10/10" ; "range past the end")]
    fn rejects_malformed_headers(value: &str) {
        assert!(parse(value).is_err());
    }
}
