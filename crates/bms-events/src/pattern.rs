/// Wildcard match of a subscription pattern against an event.
///
/// Both pattern and event type split on `.`. Rules, in order:
/// - a bare `*` matches everything;
/// - equal segment counts compare left-to-right, `*` matching any single
///   segment;
/// - a shorter pattern matches only when its final segment is `*` and the
///   preceding segments match the event's prefix (`pull.*` matches
///   `pull.fetch_detail.start`);
/// - a two-segment `*.<lit>` pattern suffix-matches: it also fires when
///   the event type's last segment — or the event's source tag — equals
///   `<lit>` (`*.accounts` picks up everything the accounts batch emits).
pub fn pattern_matches(pattern: &str, event_type: &str, source: &str) -> bool {
    if pattern == "*" {
        return true;
    }

    let pat: Vec<&str> = pattern.split('.').collect();
    let evt: Vec<&str> = event_type.split('.').collect();

    if pat.len() == 2 && pat[0] == "*" {
        let suffix = pat[1];
        if evt.last() == Some(&suffix) || source == suffix {
            return true;
        }
    }

    if pat.len() == evt.len() {
        return pat
            .iter()
            .zip(evt.iter())
            .all(|(p, e)| *p == "*" || p == e);
    }

    if pat.len() < evt.len() && pat.last() == Some(&"*") {
        return pat[..pat.len() - 1]
            .iter()
            .zip(evt.iter())
            .all(|(p, e)| *p == "*" || p == e);
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_star_matches_all() {
        assert!(pattern_matches("*", "pull.complete", "accounts"));
        assert!(pattern_matches("*", "anything", ""));
    }

    #[test]
    fn exact_and_segment_wildcards() {
        assert!(pattern_matches("pull.complete", "pull.complete", "x"));
        assert!(!pattern_matches("pull.complete", "pull.start", "x"));
        assert!(pattern_matches("pull.*", "pull.complete", "x"));
        assert!(pattern_matches("*.complete", "pull.complete", "x"));
    }

    #[test]
    fn trailing_star_matches_longer_types() {
        assert!(pattern_matches("pull.*", "pull.fetch_detail.start", "accounts"));
        assert!(!pattern_matches("push.*", "pull.fetch_detail.start", "accounts"));
        // Shorter pattern without trailing star never matches longer type.
        assert!(!pattern_matches("pull.fetch_detail", "pull.fetch_detail.start", "x"));
    }

    #[test]
    fn suffix_pattern_matches_source_tag() {
        // The S5 routing table.
        assert!(pattern_matches("pull.*", "pull.complete", "accounts"));
        assert!(pattern_matches("*.accounts", "pull.complete", "accounts"));
        assert!(pattern_matches("*", "pull.complete", "accounts"));

        assert!(!pattern_matches("pull.*", "push.start", "accounts"));
        assert!(pattern_matches("*.accounts", "push.start", "accounts"));
        assert!(!pattern_matches("*.accounts", "push.start", "routes"));
    }
}
