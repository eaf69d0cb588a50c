//! Sorted-merge set difference.

use std::cmp::Ordering;

/// Splits two sorted sequences into the elements only in `intended` and the
/// elements only in `programmed`, in one linear pass.
///
/// Both inputs must be sorted ascending; elements present in both are
/// skipped. Output sequences keep the input order.
pub fn diff_sorted<'a, T, I, P>(intended: I, programmed: P) -> (Vec<T>, Vec<T>)
where
    T: Ord + Clone + 'a,
    I: IntoIterator<Item = &'a T>,
    P: IntoIterator<Item = &'a T>,
{
    let mut left = intended.into_iter().peekable();
    let mut right = programmed.into_iter().peekable();
    let mut only_intended = Vec::new();
    let mut only_programmed = Vec::new();

    loop {
        match (left.peek(), right.peek()) {
            (Some(l), Some(r)) => match l.cmp(r) {
                Ordering::Less => {
                    only_intended.push((*l).clone());
                    left.next();
                }
                Ordering::Greater => {
                    only_programmed.push((*r).clone());
                    right.next();
                }
                Ordering::Equal => {
                    left.next();
                    right.next();
                }
            },
            (Some(_), None) => {
                only_intended.extend(left.cloned());
                break;
            }
            (None, Some(_)) => {
                only_programmed.extend(right.cloned());
                break;
            }
            (None, None) => break,
        }
    }

    (only_intended, only_programmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RouteKey;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeSet;

    fn keys(list: &[&str]) -> BTreeSet<RouteKey> {
        list.iter().map(|s| RouteKey::parse(s).unwrap()).collect()
    }

    #[test]
    fn test_diff_disjoint_and_shared() {
        let a = keys(&["10.0.0.0/24", "10.0.1.0/24", "10.0.2.0/24"]);
        let b = keys(&["10.0.1.0/24", "10.0.3.0/24"]);

        let (only_a, only_b) = diff_sorted(&a, &b);
        assert_eq!(
            only_a,
            vec![
                RouteKey::parse("10.0.0.0/24").unwrap(),
                RouteKey::parse("10.0.2.0/24").unwrap()
            ]
        );
        assert_eq!(only_b, vec![RouteKey::parse("10.0.3.0/24").unwrap()]);
    }

    #[test]
    fn test_diff_empty_sides() {
        let a = keys(&["10.0.0.0/24"]);
        let empty = BTreeSet::new();

        let (only_a, only_b) = diff_sorted(&a, &empty);
        assert_eq!(only_a.len(), 1);
        assert!(only_b.is_empty());

        let (only_a, only_b) = diff_sorted(&empty, &a);
        assert!(only_a.is_empty());
        assert_eq!(only_b.len(), 1);
    }

    #[test]
    fn test_diff_matches_set_difference() {
        // Insertion order differs from sorted order on purpose.
        let cases: [(&[&str], &[&str]); 4] = [
            (&["30.0.0.0/8", "10.0.0.0/8", "20.0.0.0/8"], &["20.0.0.0/8"]),
            (&["fc00::/64", "10.0.0.0/8"], &["fc00::/64", "10.0.0.0/8"]),
            (&[], &["1.1.1.1", "fc00::1"]),
            (&["10.10.196.20/31", "10.10.196.12/31"], &["20.10.196.12/31", "10.10.196.12/31"]),
        ];

        for (left, right) in cases {
            let a = keys(left);
            let b = keys(right);
            let (only_a, only_b) = diff_sorted(&a, &b);

            let expected_a: Vec<RouteKey> = a.difference(&b).cloned().collect();
            let expected_b: Vec<RouteKey> = b.difference(&a).cloned().collect();
            assert_eq!(only_a, expected_a);
            assert_eq!(only_b, expected_b);
        }
    }

    #[test]
    fn test_diff_plain_strings() {
        let a = vec!["a".to_string(), "c".to_string()];
        let b = vec!["b".to_string(), "c".to_string()];
        let (only_a, only_b) = diff_sorted(&a, &b);
        assert_eq!(only_a, vec!["a".to_string()]);
        assert_eq!(only_b, vec!["b".to_string()]);
    }
}
