//! Number range expressions used to select dives
//!
//! A range is a comma separated list of items, each one of
//! - `n` - single number
//! - `a-b` - closed range
//! - `a-` - everything from `a`
//! - `-b` - everything up to `b`
//!
//! Numbers are 1-based positions, e.g. `1-3,5` or `20-`.

use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid range {0}")]
pub struct RangeError(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Span {
    Single(usize),
    Between(usize, usize),
    From(usize),
    UpTo(usize),
}

impl Span {
    fn contains(&self, n: usize) -> bool {
        match *self {
            Self::Single(v) => n == v,
            Self::Between(a, b) => a <= n && n <= b,
            Self::From(a) => a <= n,
            Self::UpTo(b) => n <= b,
        }
    }
}

/// Parsed range expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumberRange {
    spans: Vec<Span>,
}

impl NumberRange {
    /// Check if a 1-based position is selected by the range
    pub fn contains(&self, n: usize) -> bool {
        self.spans.iter().any(|s| s.contains(n))
    }
}

impl FromStr for NumberRange {
    type Err = RangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || RangeError(s.to_string());
        let number = |v: &str| v.trim().parse::<usize>().map_err(|_| err());

        let mut spans = Vec::new();
        for item in s.split(',') {
            let parts: Vec<&str> = item.split('-').collect();
            let span = match *parts.as_slice() {
                [single] => Span::Single(number(single)?),
                [a, b] => match (a.trim().is_empty(), b.trim().is_empty()) {
                    (false, false) => Span::Between(number(a)?, number(b)?),
                    (false, true) => Span::From(number(a)?),
                    (true, false) => Span::UpTo(number(b)?),
                    (true, true) => return Err(err()),
                },
                _ => return Err(err()),
            };
            spans.push(span);
        }
        Ok(Self { spans })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ranges() {
        let r: NumberRange = "1-3,5".parse().unwrap();
        assert!(r.contains(1) && r.contains(3) && r.contains(5));
        assert!(!r.contains(4) && !r.contains(6));

        let r: NumberRange = "-3,10".parse().unwrap();
        assert!(r.contains(2) && r.contains(10));
        assert!(!r.contains(4));

        let r: NumberRange = "20-".parse().unwrap();
        assert!(r.contains(20) && r.contains(1000));
        assert!(!r.contains(19));

        let r: NumberRange = " 2 ".parse().unwrap();
        assert!(r.contains(2));
    }

    #[test]
    fn test_invalid_ranges() {
        for s in ["", "a", "1-2-3", "-", "1,,2", "3-x"] {
            let err = s.parse::<NumberRange>().unwrap_err();
            assert_eq!(err, RangeError(s.to_string()));
        }
        assert_eq!(
            "1-2-3".parse::<NumberRange>().unwrap_err().to_string(),
            "Invalid range 1-2-3"
        );
    }
}
