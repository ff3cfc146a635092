//! Fractional ranks: ordering by strings that always admit a string between.
//!
//! A rank is a non-empty string over the base-62 alphabet `0-9A-Za-z`
//! (already in byte order) that does not end in `0`. Lists are ordered by
//! comparing ranks as plain strings, so moving one item rewrites one rank.

use thiserror::Error;

const DIGITS: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
const BASE: usize = 62;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RankError {
  #[error("invalid rank {0:?}")]
  Invalid(String),

  #[error("rank {lower:?} does not sort before {upper:?}")]
  OutOfOrder { lower: String, upper: String },
}

/// A rank strictly between `lower` and `upper`. `None` leaves that side open.
pub fn between(lower: Option<&str>, upper: Option<&str>) -> Result<String, RankError> {
  if let Some(lower) = lower {
    validate(lower)?;
  }
  if let Some(upper) = upper {
    validate(upper)?;
  }
  if let (Some(lower), Some(upper)) = (lower, upper) {
    if lower >= upper {
      return Err(RankError::OutOfOrder {
        lower: lower.to_string(),
        upper: upper.to_string(),
      });
    }
  }

  Ok(midpoint(lower.unwrap_or("").as_bytes(), upper.map(str::as_bytes)))
}

/// A rank sorting after `rank`.
pub fn after(rank: &str) -> Result<String, RankError> {
  between(Some(rank), None)
}

/// A rank sorting before `rank`.
pub fn before(rank: &str) -> Result<String, RankError> {
  between(None, Some(rank))
}

/// `n` ascending ranks for a list that has none yet.
pub fn sequence(n: usize) -> Vec<String> {
  let mut ranks = Vec::with_capacity(n);
  let mut last: Option<String> = None;
  for _ in 0..n {
    let next = midpoint(last.as_deref().unwrap_or("").as_bytes(), None);
    ranks.push(next.clone());
    last = Some(next);
  }
  ranks
}

pub fn is_valid(rank: &str) -> bool {
  validate(rank).is_ok()
}

fn validate(rank: &str) -> Result<(), RankError> {
  let ok = !rank.is_empty()
    && rank.bytes().all(|b| digit(b).is_some())
    && !rank.ends_with('0');
  if ok {
    Ok(())
  } else {
    Err(RankError::Invalid(rank.to_string()))
  }
}

fn digit(b: u8) -> Option<usize> {
  DIGITS.iter().position(|&d| d == b)
}

/// Midpoint of two validated digit strings, `lower < upper`. An empty
/// `lower` is the bottom of the range and `None` the top.
fn midpoint(lower: &[u8], upper: Option<&[u8]>) -> String {
  if let Some(upper) = upper {
    // shared prefix, reading missing lower digits as zero
    let mut n = 0;
    while n < upper.len() && lower.get(n).copied().unwrap_or(b'0') == upper[n] {
      n += 1;
    }
    if n > 0 {
      let prefix = String::from_utf8_lossy(&upper[..n]).into_owned();
      let rest = midpoint(lower.get(n..).unwrap_or(&[]), Some(&upper[n..]));
      return prefix + &rest;
    }
  }

  let low = lower.first().and_then(|&b| digit(b)).unwrap_or(0);
  let high = upper.and_then(|u| u.first()).and_then(|&b| digit(b)).unwrap_or(BASE);

  if high - low > 1 {
    return char::from(DIGITS[(low + high) / 2]).to_string();
  }

  match upper {
    Some(upper) if upper.len() > 1 => char::from(upper[0]).to_string(),
    _ => {
      let rest = midpoint(lower.get(1..).unwrap_or(&[]), None);
      format!("{}{}", char::from(DIGITS[low]), rest)
    }
  }
}
