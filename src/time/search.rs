//! Checks whether a date search parameter is satisfied by a resource value.
//!
//! Both sides are expanded into half-open intervals, the relationship of the
//! search interval to the target interval is classified, and the comparator
//! maps that relationship to a boolean.

use crate::time::error::DateError;
use crate::time::precision::{expand, Bound, Interval};
use core::str::FromStr;
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    Sa,
    Eb,
    Ap,
}

/// Where the search interval `S` lies relative to the target interval `T`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    Equal,
    /// `S ⊂ T`
    SearchWithinTarget,
    /// `T ⊂ S`
    TargetWithinSearch,
    Before,
    After,
    /// `S` starts below `T` and ends inside it.
    OverlapsStart,
    /// `S` starts inside `T` and ends above it.
    OverlapsEnd,
}

/// A search parameter value such as `ge2001-04` or `2001-04-05T10:00:00Z`.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchValue {
    pub comparator: Comparator,
    pub interval: Interval,
}

/// The resource-side value a search is checked against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    DateTime(String),
    Period {
        start: Option<String>,
        end: Option<String>,
    },
}

impl Comparator {
    pub const ALL: [Comparator; 9] = [
        Comparator::Eq,
        Comparator::Ne,
        Comparator::Gt,
        Comparator::Lt,
        Comparator::Ge,
        Comparator::Le,
        Comparator::Sa,
        Comparator::Eb,
        Comparator::Ap,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Comparator::Eq => "eq",
            Comparator::Ne => "ne",
            Comparator::Gt => "gt",
            Comparator::Lt => "lt",
            Comparator::Ge => "ge",
            Comparator::Le => "le",
            Comparator::Sa => "sa",
            Comparator::Eb => "eb",
            Comparator::Ap => "ap",
        }
    }

    pub fn satisfied_by(self, relation: Relation) -> bool {
        use Relation::*;
        let contained = matches!(relation, Equal | SearchWithinTarget | TargetWithinSearch);
        match self {
            Comparator::Eq => relation == Equal,
            Comparator::Ne => relation != Equal,
            Comparator::Gt => matches!(relation, After | OverlapsEnd),
            Comparator::Lt => matches!(relation, Before | OverlapsStart),
            Comparator::Ge => contained || matches!(relation, After | OverlapsEnd),
            Comparator::Le => contained || matches!(relation, Before | OverlapsStart),
            Comparator::Sa => relation == After,
            Comparator::Eb => relation == Before,
            Comparator::Ap => !matches!(relation, Before | After),
        }
    }
}

impl FromStr for Comparator {
    type Err = DateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Comparator::ALL
            .iter()
            .copied()
            .find(|comparator| comparator.as_str() == s)
            .ok_or_else(|| DateError::UnknownComparator(s.to_owned()))
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchValue {
    type Err = DateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (comparator, literal) = match s.get(..2) {
            Some(prefix) if prefix.chars().all(|c| c.is_ascii_alphabetic()) => {
                (prefix.parse::<Comparator>()?, &s[2..])
            }
            _ => (Comparator::Eq, s),
        };
        Ok(Self {
            comparator,
            interval: expand(literal)?,
        })
    }
}

impl Target {
    pub fn date_time(value: impl Into<String>) -> Self {
        Target::DateTime(value.into())
    }

    pub fn period(start: Option<&str>, end: Option<&str>) -> Self {
        Target::Period {
            start: start.map(str::to_owned),
            end: end.map(str::to_owned),
        }
    }

    /// Reads a `dateTime`/`instant` string or a `Period` object.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::String(literal) => Some(Target::date_time(literal.as_str())),
            Value::Object(object) => Some(Target::period(
                object.get("start").and_then(Value::as_str),
                object.get("end").and_then(Value::as_str),
            )),
            _ => None,
        }
    }

    pub fn interval(&self) -> Result<Interval, DateError> {
        match self {
            Target::DateTime(literal) => expand(literal),
            Target::Period { start: None, end: None } => Err(DateError::InvalidTarget(
                "period has neither start nor end".to_owned(),
            )),
            Target::Period { start, end } => {
                let lower = match start {
                    Some(start) => expand(start)?.lower,
                    None => Bound::NegInfinity,
                };
                let upper = match end {
                    Some(end) => expand(end)?.upper,
                    None => Bound::PosInfinity,
                };
                if lower >= upper {
                    return Err(DateError::InvalidTarget(format!(
                        "period ends before it starts ({:?} .. {:?})",
                        start, end
                    )));
                }
                Ok(Interval::new(lower, upper))
            }
        }
    }
}

pub fn classify(search: &Interval, target: &Interval) -> Relation {
    if search == target {
        Relation::Equal
    } else if search.upper <= target.lower {
        Relation::Before
    } else if search.lower >= target.upper {
        Relation::After
    } else if target.contains(search) {
        Relation::SearchWithinTarget
    } else if search.contains(target) {
        Relation::TargetWithinSearch
    } else if search.lower < target.lower {
        Relation::OverlapsStart
    } else {
        Relation::OverlapsEnd
    }
}

/// Returns whether `search` (optionally prefixed by a comparator) is
/// satisfied by `target`.
pub fn validate_date_search(search: &str, target: &Target) -> Result<bool, DateError> {
    let search = search.parse::<SearchValue>()?;
    let target_interval = target.interval()?;
    let relation = classify(&search.interval, &target_interval);
    let satisfied = search.comparator.satisfied_by(relation);
    debug!(
        "Search {} against {:?}: {:?} => {}",
        search.comparator, target, relation, satisfied
    );
    Ok(satisfied)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(search: &str, target: &Target) -> bool {
        validate_date_search(search, target).unwrap()
    }

    fn relation(search: &str, target: &Target) -> Relation {
        classify(&expand(search).unwrap(), &target.interval().unwrap())
    }

    /// Expected outcome per relation, in `Comparator::ALL` order:
    /// eq, ne, gt, lt, ge, le, sa, eb, ap.
    const TRUTH_TABLE: [(Relation, [bool; 9]); 7] = [
        (Relation::Equal, [true, false, false, false, true, true, false, false, true]),
        (Relation::SearchWithinTarget, [false, true, false, false, true, true, false, false, true]),
        (Relation::TargetWithinSearch, [false, true, false, false, true, true, false, false, true]),
        (Relation::Before, [false, true, false, true, false, true, false, true, false]),
        (Relation::After, [false, true, true, false, true, false, true, false, false]),
        (Relation::OverlapsStart, [false, true, false, true, false, true, false, false, true]),
        (Relation::OverlapsEnd, [false, true, true, false, true, false, false, false, true]),
    ];

    #[test]
    fn test_truth_table() {
        for (relation, expected) in TRUTH_TABLE.iter() {
            for (comparator, expected) in Comparator::ALL.iter().zip(expected.iter()) {
                assert_eq!(
                    comparator.satisfied_by(*relation),
                    *expected,
                    "{} on {:?}",
                    comparator,
                    relation
                );
            }
        }
    }

    #[test]
    fn test_truth_table_through_validation() {
        let window = Target::period(Some("2001-03-15"), Some("2001-05-15"));
        let cases = [
            ("2001-04", Target::date_time("2001-04"), Relation::Equal),
            ("2001-04", Target::period(Some("2001-01"), Some("2001-12")), Relation::SearchWithinTarget),
            ("2001", Target::date_time("2001-04-05"), Relation::TargetWithinSearch),
            ("2000", Target::date_time("2001-04"), Relation::Before),
            ("2002", Target::date_time("2001-04"), Relation::After),
            ("2001-03", window.clone(), Relation::OverlapsStart),
            ("2001-05", window, Relation::OverlapsEnd),
        ];
        for (literal, target, expected_relation) in cases.iter() {
            assert_eq!(relation(literal, target), *expected_relation, "{}", literal);
            let (_, row) = TRUTH_TABLE
                .iter()
                .find(|(relation, _)| relation == expected_relation)
                .unwrap();
            for (comparator, expected) in Comparator::ALL.iter().zip(row.iter()) {
                let search = format!("{}{}", comparator, literal);
                assert_eq!(check(&search, target), *expected, "{} against {:?}", search, target);
            }
        }
    }

    #[test]
    fn test_comparator_prefix_defaults_to_eq() {
        assert_eq!("2001".parse::<SearchValue>().unwrap().comparator, Comparator::Eq);
        assert_eq!("sa2001".parse::<SearchValue>().unwrap().comparator, Comparator::Sa);
        assert!(matches!(
            "xx2001".parse::<SearchValue>(),
            Err(DateError::UnknownComparator(_))
        ));
    }

    #[test]
    fn test_search_within_target_period() {
        let target = Target::period(Some("2000-04-12"), Some("2002-03-09"));
        assert_eq!(relation("2001", &target), Relation::SearchWithinTarget);
        assert!(!check("2001", &target));
        assert!(check("ne2001", &target));
        assert!(check("ap2001", &target));
        assert!(!check("sa2001", &target));
        assert!(!check("eb2001", &target));
        assert!(check("ge2001", &target));
        assert!(check("le2001", &target));
    }

    #[test]
    fn test_search_strictly_above_scalar_target() {
        let target = Target::date_time("2000-12-31");
        assert_eq!(relation("2001", &target), Relation::After);
        assert!(check("gt2001", &target));
        assert!(!check("lt2001", &target));
        assert!(!check("ap2001", &target));
        assert!(check("sa2001", &target));
    }

    #[test]
    fn test_equal_intervals_across_precision() {
        let target = Target::date_time("2001-04-05");
        assert_eq!(relation("2001-04-05", &target), Relation::Equal);
        assert!(check("eq2001-04-05", &target));
        assert!(check("ge2001-04-05", &target));
        assert!(check("le2001-04-05", &target));
        assert!(check("ap2001-04-05", &target));
        assert!(!check("gt2001-04-05", &target));
        assert!(!check("ne2001-04-05", &target));
    }

    #[test]
    fn test_target_within_search() {
        let target = Target::date_time("2001-04-05T10:00:00Z");
        assert_eq!(relation("2001-04", &target), Relation::TargetWithinSearch);
        assert!(!check("2001-04", &target));
        assert!(check("ap2001-04", &target));
        assert!(check("ge2001-04", &target));
        assert!(check("le2001-04", &target));
        assert!(!check("gt2001-04", &target));
    }

    #[test]
    fn test_partial_overlaps() {
        let target = Target::period(Some("2001-03-15"), Some("2001-05-15"));
        assert_eq!(relation("2001-03", &target), Relation::OverlapsStart);
        assert!(check("lt2001-03", &target));
        assert!(check("le2001-03", &target));
        assert!(!check("gt2001-03", &target));
        assert!(check("ap2001-03", &target));

        assert_eq!(relation("2001-05", &target), Relation::OverlapsEnd);
        assert!(check("gt2001-05", &target));
        assert!(check("ge2001-05", &target));
        assert!(!check("lt2001-05", &target));
        assert!(check("ap2001-05", &target));
    }

    #[test]
    fn test_adjacent_intervals_are_disjoint() {
        let target = Target::date_time("2001-05-01");
        assert_eq!(relation("2001-04", &target), Relation::Before);
        assert!(check("eb2001-04", &target));
        assert!(!check("ap2001-04", &target));
        assert!(!check("sa2001-04", &target));
    }

    #[test]
    fn test_open_period_bounds_are_infinite() {
        let open_start = Target::period(None, Some("2001-04-05"));
        assert_eq!(relation("1970", &open_start), Relation::SearchWithinTarget);
        assert_eq!(relation("1800", &open_start), Relation::SearchWithinTarget);
        assert!(check("sa2001-04-06", &open_start));

        let open_end = Target::period(Some("2001-04-05"), None);
        assert_eq!(relation("2999", &open_end), Relation::SearchWithinTarget);
        assert!(check("eb2001-04-04", &open_end));
        assert!(!check("sa2999", &open_end));
    }

    #[test]
    fn test_invalid_periods_are_rejected() {
        let empty = Target::period(None, None);
        assert!(matches!(
            validate_date_search("ap2001", &empty),
            Err(DateError::InvalidTarget(_))
        ));
        let inverted = Target::period(Some("2002"), Some("2001"));
        assert!(matches!(inverted.interval(), Err(DateError::InvalidTarget(_))));
    }

    #[test]
    fn test_target_from_json() {
        let scalar = serde_json::json!("2001-04-05");
        assert_eq!(Target::from_json(&scalar), Some(Target::date_time("2001-04-05")));
        let period = serde_json::json!({ "start": "2001" });
        assert_eq!(Target::from_json(&period), Some(Target::period(Some("2001"), None)));
        assert_eq!(Target::from_json(&serde_json::json!(42)), None);
    }

    #[test]
    fn test_validation_is_repeatable() {
        let target = Target::period(Some("2000-04-12"), Some("2002-03-09"));
        for comparator in Comparator::ALL.iter() {
            let search = format!("{}2001", comparator);
            assert_eq!(check(&search, &target), check(&search, &target));
        }
    }
}
