use human_bytes::human_bytes;

/// Case-insensitive `*` / `?` wildcard match, as the cluster applies to index names.
pub fn wildcard_match(value: &str, pattern: &str) -> bool {
    let value = value.to_ascii_lowercase();
    let pattern = pattern.to_ascii_lowercase();
    wildcard_match_bytes(value.as_bytes(), pattern.as_bytes())
}

fn wildcard_match_bytes(value: &[u8], pattern: &[u8]) -> bool {
    let mut dp = vec![false; pattern.len() + 1];
    dp[0] = true;
    for (i, &p) in pattern.iter().enumerate() {
        if p == b'*' {
            dp[i + 1] = dp[i];
        }
    }
    for &c in value {
        let mut next = vec![false; pattern.len() + 1];
        for (i, &p) in pattern.iter().enumerate() {
            match p {
                b'?' => next[i + 1] = dp[i],
                b'*' => next[i + 1] = next[i] || dp[i + 1],
                _ => next[i + 1] = dp[i] && p == c,
            }
        }
        dp = next;
    }
    dp[pattern.len()]
}

pub fn format_size(bytes: Option<u64>) -> String {
    match bytes {
        Some(value) => human_bytes(value as f64),
        None => "n/a".to_string(),
    }
}

/// Turns `-a/--address` into a base URL; a bare host gets `https://` and port 9200.
pub fn endpoint_url(address: &str) -> String {
    let address = address.trim().trim_end_matches('/');
    if address.contains("://") {
        address.to_string()
    } else if address.contains(':') {
        format!("https://{}", address)
    } else {
        format!("https://{}:9200", address)
    }
}
