/// Case-insensitive, whitespace-normalized similarity between two OCR strings.
///
/// Both empty is a perfect match; exactly one empty is a total mismatch.
pub fn text_similarity(lhs: &str, rhs: &str) -> f64 {
    let lhs = normalize(lhs);
    let rhs = normalize(rhs);

    match (lhs.is_empty(), rhs.is_empty()) {
        (true, true) => 1.0,
        (true, false) | (false, true) => 0.0,
        (false, false) => {
            let a: Vec<char> = lhs.chars().collect();
            let b: Vec<char> = rhs.chars().collect();
            matching_ratio(&a, &b)
        }
    }
}

pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// `2 * M / T`, where M is the number of characters covered by recursively
/// chosen longest common blocks and T the combined length.
pub fn matching_ratio(a: &[char], b: &[char]) -> f64 {
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    2.0 * matched_chars(a, b) as f64 / total as f64
}

fn matched_chars(a: &[char], b: &[char]) -> usize {
    let mut matched = 0;
    let mut pending = vec![(0, a.len(), 0, b.len())];

    while let Some((alo, ahi, blo, bhi)) = pending.pop() {
        let (i, j, size) = longest_match(a, b, alo, ahi, blo, bhi);
        if size == 0 {
            continue;
        }
        matched += size;
        if alo < i && blo < j {
            pending.push((alo, i, blo, j));
        }
        if i + size < ahi && j + size < bhi {
            pending.push((i + size, ahi, j + size, bhi));
        }
    }

    matched
}

/// Longest common run inside `a[alo..ahi]` and `b[blo..bhi]`; ties resolve
/// to the earliest start in `a`, then in `b`.
fn longest_match(
    a: &[char],
    b: &[char],
    alo: usize,
    ahi: usize,
    blo: usize,
    bhi: usize,
) -> (usize, usize, usize) {
    let mut best = (alo, blo, 0);
    let width = bhi - blo + 1;
    let mut prev = vec![0usize; width];
    let mut curr = vec![0usize; width];

    for i in alo..ahi {
        for j in blo..bhi {
            let slot = j - blo + 1;
            if a[i] == b[j] {
                let run = prev[slot - 1] + 1;
                curr[slot] = run;
                if run > best.2 {
                    best = (i + 1 - run, j + 1 - run, run);
                }
            } else {
                curr[slot] = 0;
            }
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    best
}
