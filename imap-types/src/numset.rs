use std::fmt;
use std::marker::PhantomData;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NumSetError {
    #[error("sequence set is empty")]
    Empty,
    #[error("invalid sequence set token: {0:?}")]
    InvalidToken(String),
    #[error("number out of range: {0:?}")]
    OutOfRange(String),
}

/// Either a concrete 32-bit number or the `*` sentinel meaning "the largest
/// number in use" (the largest sequence number / UID in the selected
/// mailbox, resolved by the caller since a `NumSet` doesn't know the
/// mailbox state it will be matched against).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    Value(u32),
    Star,
}

impl Bound {
    fn resolve(self, max: u32) -> u32 {
        match self {
            Bound::Value(v) => v,
            Bound::Star => max,
        }
    }
}

impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bound::Value(v) => write!(f, "{v}"),
            Bound::Star => write!(f, "*"),
        }
    }
}

/// A single `N` or `N:M` token as written on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Item {
    pub lo: Bound,
    pub hi: Bound,
}

impl Item {
    fn single(v: Bound) -> Self {
        Self { lo: v, hi: v }
    }

    fn is_range(&self) -> bool {
        self.lo != self.hi
    }
}

impl fmt::Display for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_range() {
            write!(f, "{}:{}", self.lo, self.hi)
        } else {
            write!(f, "{}", self.lo)
        }
    }
}

pub trait SetKind: Clone + fmt::Debug {
    const NAME: &'static str;
}

#[derive(Debug, Clone, Copy)]
pub struct SeqMarker;
impl SetKind for SeqMarker {
    const NAME: &'static str = "SequenceSet";
}

#[derive(Debug, Clone, Copy)]
pub struct UidMarker;
impl SetKind for UidMarker {
    const NAME: &'static str = "UidSet";
}

/// An ordered collection of numeric ranges (RFC 3501 §9, `sequence-set`).
///
/// `items` is the canonical, merged form used for membership tests and
/// `Display`; `original_order` is the as-parsed sequence of tokens, kept
/// around so callers that need positional alignment between two sets
/// (`COPYUID`, `APPENDUID`) can zip their expansions item-for-item.
#[derive(Debug, Clone)]
pub struct NumSet<K> {
    items: Vec<Item>,
    original_order: Vec<Item>,
    _kind: PhantomData<K>,
}

pub type SeqSet = NumSet<SeqMarker>;
pub type UidSet = NumSet<UidMarker>;

impl<K: SetKind> NumSet<K> {
    pub fn from_items(original_order: Vec<Item>) -> Self {
        let items = canonicalize(&original_order);
        Self {
            items,
            original_order,
            _kind: PhantomData,
        }
    }

    pub fn single(n: u32) -> Self {
        Self::from_items(vec![Item::single(Bound::Value(n))])
    }

    pub fn all() -> Self {
        Self::from_items(vec![Item {
            lo: Bound::Value(1),
            hi: Bound::Star,
        }])
    }

    pub fn parse(s: &str) -> Result<Self, NumSetError> {
        if s.is_empty() {
            return Err(NumSetError::Empty);
        }
        let mut items = Vec::new();
        for token in s.split(',') {
            if token.is_empty() {
                return Err(NumSetError::InvalidToken(s.to_string()));
            }
            match token.split_once(':') {
                Some((lo, hi)) => {
                    items.push(Item {
                        lo: parse_bound(lo)?,
                        hi: parse_bound(hi)?,
                    });
                }
                None => items.push(Item::single(parse_bound(token)?)),
            }
        }
        Ok(Self::from_items(items))
    }

    /// Does `n` fall in this set once `*` is resolved against `max`
    /// (the highest sequence number / UID currently known)?
    pub fn contains(&self, n: u32, max: u32) -> bool {
        self.items.iter().any(|item| {
            let (lo, hi) = normalized(*item, max);
            n >= lo && n <= hi
        })
    }

    /// Expand every item to its member numbers in ascending order per
    /// item, in the original (as-parsed) item order — the form
    /// `COPYUID`/`APPENDUID` alignment needs.
    pub fn iter_in_order(&self, max: u32) -> impl Iterator<Item = u32> + '_ {
        self.original_order.iter().flat_map(move |item| {
            let (lo, hi) = normalized(*item, max);
            lo..=hi
        })
    }

    /// Intersection against another set of the same kind, resolved
    /// against a shared `max`.
    pub fn intersect(&self, other: &Self, max: u32) -> Vec<u32> {
        self.iter_in_order(max)
            .filter(|n| other.contains(*n, max))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

fn normalized(item: Item, max: u32) -> (u32, u32) {
    let a = item.lo.resolve(max);
    let b = item.hi.resolve(max);
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

fn parse_bound(s: &str) -> Result<Bound, NumSetError> {
    if s == "*" {
        return Ok(Bound::Star);
    }
    s.parse::<u32>()
        .map(Bound::Value)
        .map_err(|_| NumSetError::OutOfRange(s.to_string()))
}

/// Merge overlapping/adjacent non-`*` ranges into a minimal cover.
/// Items touching `*` can't be merged without knowing the resolved
/// maximum, so they pass through untouched (deduplicated by value).
fn canonicalize(items: &[Item]) -> Vec<Item> {
    let mut concrete: Vec<(u32, u32)> = Vec::new();
    let mut starred: Vec<Item> = Vec::new();

    for item in items {
        match (item.lo, item.hi) {
            (Bound::Value(a), Bound::Value(b)) => {
                concrete.push(if a <= b { (a, b) } else { (b, a) });
            }
            _ => starred.push(*item),
        }
    }

    concrete.sort_unstable();
    let mut merged: Vec<(u32, u32)> = Vec::new();
    for (lo, hi) in concrete {
        match merged.last_mut() {
            Some((_, last_hi)) if lo <= last_hi.saturating_add(1) => {
                *last_hi = (*last_hi).max(hi);
            }
            _ => merged.push((lo, hi)),
        }
    }

    let mut out: Vec<Item> = merged
        .into_iter()
        .map(|(lo, hi)| Item {
            lo: Bound::Value(lo),
            hi: Bound::Value(hi),
        })
        .collect();
    out.extend(starred);
    out
}

impl<K: SetKind> fmt::Display for NumSet<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = self
            .items
            .iter()
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join(",");
        write!(f, "{rendered}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty() {
        assert_eq!(SeqSet::parse(""), Err(NumSetError::Empty));
    }

    #[test]
    fn parses_singletons_ranges_and_star() {
        let set = SeqSet::parse("1,3:5,9:*").unwrap();
        assert!(set.contains(1, 100));
        assert!(set.contains(4, 100));
        assert!(!set.contains(6, 100));
        assert!(set.contains(50, 100));
        assert!(!set.contains(8, 100));
    }

    #[test]
    fn reversed_range_is_normalized() {
        let set = SeqSet::parse("5:3").unwrap();
        assert!(set.contains(3, 100));
        assert!(set.contains(4, 100));
        assert!(set.contains(5, 100));
        assert!(!set.contains(6, 100));
    }

    #[test]
    fn format_round_trips_canonical_form() {
        let set = SeqSet::parse("1,2,3,10:12").unwrap();
        assert_eq!(set.to_string(), "1:3,10:12");
        let reparsed = SeqSet::parse(&set.to_string()).unwrap();
        assert_eq!(reparsed.to_string(), set.to_string());
    }

    #[test]
    fn iter_in_order_preserves_original_token_order_for_copyuid() {
        // A client may list a set out of ascending order; COPYUID must
        // align position-for-position with the destination UID set, not
        // by canonical numeric order.
        let set = SeqSet::parse("9,3,1").unwrap();
        assert_eq!(set.iter_in_order(100).collect::<Vec<_>>(), vec![9, 3, 1]);
    }

    #[test]
    fn intersection() {
        let a = SeqSet::parse("1:10").unwrap();
        let b = SeqSet::parse("5,6,20").unwrap();
        assert_eq!(a.intersect(&b, 100), vec![5, 6]);
    }
}
