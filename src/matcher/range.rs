//! Range expressions for `GROUPID=`, `INSERT=` and `PORT=` predicates.
//!
//! An expression is a comma-separated list of tokens evaluated left to
//! right into a single match flag:
//!
//! | token  | effect                                             |
//! |--------|----------------------------------------------------|
//! | `N`    | set when value == N (N may be negative)            |
//! | `A-B`  | set when A <= value <= B                           |
//! | `!N`   | set, then clear when value == N                    |
//! | `!A-B` | set, then clear when A <= value <= B               |
//! | `A-`   | set when value <= A                                |
//! | `A+`   | set when value >= A                                |
//!
//! Inclusion tokens only ever set the flag. Exclusion tokens always set it
//! first, so `"!50,10-20"` matches every value except 50 and a later
//! exclusion overrides an earlier inclusion. Unknown tokens are ignored.

/// A single parsed range token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RangeToken {
    Exact(i64),
    Between(i64, i64),
    NotExact(i64),
    NotBetween(i64, i64),
    AtMost(i64),
    AtLeast(i64),
}

impl RangeToken {
    fn parse(token: &str) -> Option<Self> {
        if token.is_empty() {
            return None;
        }

        if let Some(rest) = token.strip_prefix('!') {
            if is_signed_number(rest) {
                return Some(RangeToken::NotExact(to_int(rest)));
            }
            return split_between(rest).map(|(a, b)| RangeToken::NotBetween(a, b));
        }

        if is_signed_number(token) {
            return Some(RangeToken::Exact(to_int(token)));
        }
        if let Some(bound) = token.strip_suffix('-') {
            if is_digits(bound) {
                return Some(RangeToken::AtMost(to_int(bound)));
            }
        }
        if let Some(bound) = token.strip_suffix('+') {
            if is_digits(bound) {
                return Some(RangeToken::AtLeast(to_int(bound)));
            }
        }
        split_between(token).map(|(a, b)| RangeToken::Between(a, b))
    }

    fn apply(self, value: i64, matched: &mut bool) {
        match self {
            RangeToken::Exact(n) => {
                if value == n {
                    *matched = true;
                }
            }
            RangeToken::Between(a, b) => {
                if value >= a && value <= b {
                    *matched = true;
                }
            }
            RangeToken::NotExact(n) => {
                *matched = value != n;
            }
            RangeToken::NotBetween(a, b) => {
                *matched = !(value >= a && value <= b);
            }
            RangeToken::AtMost(n) => {
                if value <= n {
                    *matched = true;
                }
            }
            RangeToken::AtLeast(n) => {
                if value >= n {
                    *matched = true;
                }
            }
        }
    }
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

fn is_signed_number(s: &str) -> bool {
    is_digits(s.strip_prefix('-').unwrap_or(s))
}

/// Parse an integer, yielding 0 when it does not fit or is malformed.
fn to_int(s: &str) -> i64 {
    s.parse().unwrap_or(0)
}

/// Split `A-B` where both sides are unsigned digit runs.
fn split_between(s: &str) -> Option<(i64, i64)> {
    let (a, b) = s.split_once('-')?;
    if is_digits(a) && is_digits(b) {
        Some((to_int(a), to_int(b)))
    } else {
        None
    }
}

/// Evaluate a range expression against a value.
pub fn match_range(expr: &str, value: i64) -> bool {
    let mut matched = false;
    for token in expr.split(',') {
        if let Some(token) = RangeToken::parse(token.trim()) {
            token.apply(value, &mut matched);
        }
    }
    matched
}

/// Check whether a string only uses range characters (`0-9`, `-`, `+`, `!`, `,`).
///
/// Predicates whose argument fails this test are not range predicates.
pub fn is_range_expr(expr: &str) -> bool {
    !expr.is_empty()
        && expr
            .bytes()
            .all(|b| b.is_ascii_digit() || matches!(b, b'-' | b'+' | b'!' | b','))
}
