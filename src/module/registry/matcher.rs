//! Module id matching
//!
//! Exact and wildcard id comparison, plus the descending alphanumeric rank
//! used to pick the highest of several wildcard matches.
//!
//! Ids are split into segments on `.` and `/`. Two ids are compared segment by
//! segment: a purely numeric segment ranks below an alphabetic one, otherwise
//! the letters of each segment are compared lexically and then the digits as
//! integers. So `pkg.v2` outranks `pkg.v1` and `a.10` outranks `a.2`.

use regex::Regex;
use std::cmp::Ordering;
use tracing::warn;

use crate::module::traits::Identified;

/// Multi-character wildcard
pub const WILDCARD: char = '*';

/// Whether `pattern` contains a wildcard
pub fn is_pattern(pattern: &str) -> bool {
    pattern.contains(WILDCARD)
}

/// Compiled wildcard pattern
///
/// `*` matches zero or more characters of any kind; everything else, including
/// the `.` and `/` separators, matches literally. Matching is anchored to the
/// whole id.
#[derive(Debug, Clone)]
pub struct WildcardPattern {
    source: String,
    regex: Regex,
}

impl WildcardPattern {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        let body = pattern
            .split(WILDCARD)
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");
        let regex = Regex::new(&format!("(?s)^{}$", body))?;
        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn is_match(&self, id: &str) -> bool {
        self.regex.is_match(id)
    }
}

/// Anchored wildcard match of `id` against `pattern`
pub fn matches_wildcard(id: &str, pattern: &str) -> bool {
    match WildcardPattern::new(pattern) {
        Ok(compiled) => compiled.is_match(id),
        Err(e) => {
            warn!("Wildcard pattern '{}' could not be compiled: {}", pattern, e);
            false
        }
    }
}

/// Exact match for plain ids, wildcard match for patterns
pub fn matches(id: &str, pattern: &str) -> bool {
    if is_pattern(pattern) {
        matches_wildcard(id, pattern)
    } else {
        id == pattern
    }
}

/// Empty segments are kept; they rank below any non-empty one
fn segments(id: &str) -> impl Iterator<Item = &str> {
    id.split(['.', '/'])
}

fn is_numeric(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit())
}

/// Compare digit strings as unbounded integers; no digits ranks lowest
fn compare_numbers(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

fn compare_segments(a: &str, b: &str) -> Ordering {
    match (is_numeric(a), is_numeric(b)) {
        (true, false) => return Ordering::Less,
        (false, true) => return Ordering::Greater,
        _ => {}
    }

    let letters = |s: &str| s.chars().filter(char::is_ascii_alphabetic).collect::<String>();
    let order = letters(a).cmp(&letters(b));
    if order != Ordering::Equal {
        return order;
    }

    let digits = |s: &str| s.chars().filter(char::is_ascii_digit).collect::<String>();
    let (da, db) = (digits(a), digits(b));
    match (da.is_empty(), db.is_empty()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => compare_numbers(&da, &db),
    }
}

/// Ascending rank order of two ids
///
/// Ids whose shared segments all compare equal are equal, even if one has more
/// segments than the other.
pub fn compare_ids(a: &str, b: &str) -> Ordering {
    for (x, y) in segments(a).zip(segments(b)) {
        if x == y {
            continue;
        }
        match compare_segments(x, y) {
            Ordering::Equal => continue,
            order => return order,
        }
    }
    Ordering::Equal
}

/// Stable descending insertion sort
///
/// The prefix tie rule makes `compare_ids` non-transitive, which the standard
/// library sorts are allowed to reject. Insertion only moves an element past
/// strictly lower ranked neighbours, so ties keep their original order.
fn sort_descending_by<T>(items: &mut [T], id: impl Fn(&T) -> &str) {
    for i in 1..items.len() {
        let mut j = i;
        while j > 0 && compare_ids(id(&items[j - 1]), id(&items[j])) == Ordering::Less {
            items.swap(j - 1, j);
            j -= 1;
        }
    }
}

/// Sort ids highest rank first; equal ids keep their original order
pub fn rank_ids_descending(ids: &mut [&str]) {
    sort_descending_by(ids, |id| *id);
}

/// Candidates ordered highest rank first; anonymous entries rank as ""
pub fn rank_descending<'a, T, I>(candidates: I) -> Vec<&'a T>
where
    T: Identified + ?Sized + 'a,
    I: IntoIterator<Item = &'a T>,
{
    let mut ranked: Vec<&'a T> = candidates.into_iter().collect();
    sort_descending_by(&mut ranked, |candidate| candidate.id().unwrap_or(""));
    ranked
}

/// Pick the candidate matching `pattern`
///
/// Plain ids match exactly; patterns return the highest ranked match.
/// Anonymous candidates never match. `None` means nothing matched; the caller
/// decides whether that is fatal.
pub fn resolve<'a, T, I>(candidates: I, pattern: &str) -> Option<&'a T>
where
    T: Identified + ?Sized + 'a,
    I: IntoIterator<Item = &'a T>,
{
    if !is_pattern(pattern) {
        return candidates
            .into_iter()
            .find(|candidate| candidate.id() == Some(pattern));
    }

    let compiled = match WildcardPattern::new(pattern) {
        Ok(compiled) => compiled,
        Err(e) => {
            warn!("Wildcard pattern '{}' could not be compiled: {}", pattern, e);
            return None;
        }
    };
    let matching = candidates
        .into_iter()
        .filter(|candidate| candidate.id().is_some_and(|id| compiled.is_match(id)));
    rank_descending(matching).into_iter().next()
}
