//! Sender allowlist matching.

/// Whether `peer` may use the relay.
///
/// An empty list admits everyone. Entries compare case-insensitively and may
/// contain `*` wildcards (`"4917*"`, `"*4567"`). `peer` is the user part of
/// the sender JID, without device or server.
pub fn is_allowed(peer: &str, allowlist: &[String]) -> bool {
    if allowlist.is_empty() {
        return true;
    }
    let peer = peer.to_lowercase();
    allowlist.iter().any(|entry| {
        let entry = entry.to_lowercase();
        if entry.contains('*') {
            wildcard_match(&entry, &peer)
        } else {
            entry == peer
        }
    })
}

fn wildcard_match(pattern: &str, text: &str) -> bool {
    let mut segments = pattern.split('*');
    // A pattern with a `*` always yields at least two segments.
    let Some(head) = segments.next() else {
        return false;
    };
    let Some(mut rest) = text.strip_prefix(head) else {
        return false;
    };

    let mut segments: Vec<&str> = segments.collect();
    let tail = segments.pop().unwrap_or_default();

    for segment in segments {
        if segment.is_empty() {
            continue;
        }
        match rest.find(segment) {
            Some(idx) => rest = &rest[idx + segment.len()..],
            None => return false,
        }
    }

    rest.len() >= tail.len() && rest.ends_with(tail)
}
