//! Myers' O(ND) shortest edit script.

/// One step of an edit script, indexing into the old (`a`) and new (`b`)
/// sequences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edit {
    Equal(usize, usize),
    Delete(usize),
    Insert(usize),
}

/// Computes a shortest edit script turning `a` into `b`. Deletions are
/// emitted before insertions when both are possible at the same point.
pub fn myers_diff<T>(a: &[T], b: &[T], eq: impl Fn(&T, &T) -> bool) -> Vec<Edit> {
    let n = a.len() as isize;
    let m = b.len() as isize;
    let max = n + m;
    if max == 0 {
        return Vec::new();
    }

    let offset = max + 1;
    let mut v = vec![0isize; (2 * max + 3) as usize];
    // Row d holds the furthest-reaching x for diagonals -d-1..=d+1 before
    // step d ran.
    let mut trace: Vec<Vec<isize>> = Vec::new();

    'search: for d in 0..=max {
        let lo = (offset - d - 1) as usize;
        let hi = (offset + d + 1) as usize;
        trace.push(v[lo..=hi].to_vec());

        let mut k = -d;
        while k <= d {
            let idx = (offset + k) as usize;
            let mut x = if k == -d || (k != d && v[idx - 1] < v[idx + 1]) {
                v[idx + 1]
            } else {
                v[idx - 1] + 1
            };
            let mut y = x - k;
            while x < n && y < m && eq(&a[x as usize], &b[y as usize]) {
                x += 1;
                y += 1;
            }
            v[idx] = x;
            if x >= n && y >= m {
                break 'search;
            }
            k += 2;
        }
    }

    backtrack(&trace, n, m)
}

fn backtrack(trace: &[Vec<isize>], n: isize, m: isize) -> Vec<Edit> {
    let mut edits = Vec::new();
    let (mut x, mut y) = (n, m);

    for (d, row) in trace.iter().enumerate().rev() {
        let d = d as isize;
        let at = |k: isize| row[(k + d + 1) as usize];
        let k = x - y;
        let prev_k = if k == -d || (k != d && at(k - 1) < at(k + 1)) {
            k + 1
        } else {
            k - 1
        };
        let prev_x = at(prev_k);
        let prev_y = prev_x - prev_k;

        while x > prev_x && y > prev_y {
            edits.push(Edit::Equal((x - 1) as usize, (y - 1) as usize));
            x -= 1;
            y -= 1;
        }
        if d > 0 {
            if x == prev_x {
                edits.push(Edit::Insert((y - 1) as usize));
            } else {
                edits.push(Edit::Delete((x - 1) as usize));
            }
        }
        x = prev_x;
        y = prev_y;
    }

    edits.reverse();
    edits
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chars(text: &str) -> Vec<char> {
        text.chars().collect()
    }

    fn script(a: &str, b: &str) -> String {
        let (a, b) = (chars(a), chars(b));
        myers_diff(&a, &b, |x, y| x == y)
            .into_iter()
            .map(|edit| match edit {
                Edit::Equal(i, _) => format!(" {}", a[i]),
                Edit::Delete(i) => format!("-{}", a[i]),
                Edit::Insert(j) => format!("+{}", b[j]),
            })
            .collect()
    }

    #[test]
    fn test_classic_example() {
        // ABCABBA -> CBABAC has distance 5.
        let (a, b) = (chars("ABCABBA"), chars("CBABAC"));
        let edits = myers_diff(&a, &b, |x, y| x == y);
        let changes = edits
            .iter()
            .filter(|edit| !matches!(edit, Edit::Equal(..)))
            .count();
        assert_eq!(changes, 5);
    }

    #[test]
    fn test_substitution_deletes_first() {
        assert_eq!(script("abc", "axc"), " a-b+x c");
    }

    #[test]
    fn test_empty_sides() {
        assert!(myers_diff::<char>(&[], &[], |x, y| x == y).is_empty());
        assert_eq!(script("", "ab"), "+a+b");
        assert_eq!(script("ab", ""), "-a-b");
    }

    #[test]
    fn test_edits_reconstruct_target() {
        let (a, b) = (chars("kitten sitting"), chars("sitting kitten"));
        let rebuilt: String = myers_diff(&a, &b, |x, y| x == y)
            .into_iter()
            .filter_map(|edit| match edit {
                Edit::Equal(_, j) | Edit::Insert(j) => Some(b[j]),
                Edit::Delete(_) => None,
            })
            .collect();
        assert_eq!(rebuilt, "sitting kitten");
    }
}
