use sha2::{Digest, Sha256};

/// SHA-256 over `title + "\n" + content` with runs of whitespace collapsed,
/// hex-encoded. The collapse makes the hash robust to formatting-only
/// differences between captures of the same post.
pub fn content_hash(title: &str, content: &str) -> String {
    let combined = format!("{title}\n{content}");
    let normalized = combined.split_whitespace().collect::<Vec<_>>().join(" ");
    hex::encode(Sha256::digest(normalized.as_bytes()))
}

/// Ratcliff-Obershelp similarity ratio over lowercased text:
/// `2 * M / (len(a) + len(b))` where M counts characters in the longest
/// common substring plus, recursively, the matches to its left and right.
pub fn text_similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let a: Vec<char> = a.to_lowercase().chars().collect();
    let b: Vec<char> = b.to_lowercase().chars().collect();
    let matches = matching_len(&a, &b);
    2.0 * matches as f64 / (a.len() + b.len()) as f64
}

fn matching_len(a: &[char], b: &[char]) -> usize {
    let (a_start, b_start, len) = longest_common_block(a, b);
    if len == 0 {
        return 0;
    }
    len + matching_len(&a[..a_start], &b[..b_start])
        + matching_len(&a[a_start + len..], &b[b_start + len..])
}

/// Longest common substring via a rolling-row DP, returning
/// (start in a, start in b, length).
fn longest_common_block(a: &[char], b: &[char]) -> (usize, usize, usize) {
    if a.is_empty() || b.is_empty() {
        return (0, 0, 0);
    }
    let mut prev = vec![0usize; b.len() + 1];
    let mut best = (0usize, 0usize, 0usize);

    for (i, ca) in a.iter().enumerate() {
        let mut row = vec![0usize; b.len() + 1];
        for (j, cb) in b.iter().enumerate() {
            if ca == cb {
                let len = prev[j] + 1;
                row[j + 1] = len;
                if len > best.2 {
                    best = (i + 1 - len, j + 1 - len, len);
                }
            }
        }
        prev = row;
    }
    best
}
