//! Topic filter matching with `+` and `#` wildcards.

use crate::store::types::TopicConfig;

/// Check if a topic filter matches a literal topic path.
///
/// - `+` matches exactly one level
/// - `#` matches the remaining levels; it only takes effect as the final
///   filter segment. A `#` anywhere else fails the match (the comparison
///   against the last index is kept as observed in the reference behavior
///   rather than rejecting such filters up front).
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    if filter == "#" {
        return true;
    }
    let filter_parts: Vec<&str> = filter.split('/').collect();
    let topic_parts: Vec<&str> = topic.split('/').collect();

    let mut index = 0;
    while index < filter_parts.len() {
        let part = filter_parts[index];
        if part == "#" {
            return index == filter_parts.len() - 1;
        }
        if index >= topic_parts.len() {
            return false;
        }
        if part != "+" && part != topic_parts[index] {
            return false;
        }
        index += 1;
    }
    index == topic_parts.len()
}

/// Pick the authoritative topic config for a message: enabled configs whose
/// filter matches, longest filter wins. Equal-length ties are broken
/// lexicographically (greater filter wins) so the result is stable.
pub fn best_match<'a, I>(configs: I, topic: &str) -> Option<&'a TopicConfig>
where
    I: IntoIterator<Item = &'a TopicConfig>,
{
    configs
        .into_iter()
        .filter(|c| c.enabled && topic_matches(&c.filter, topic))
        .max_by(|a, b| {
            a.filter
                .len()
                .cmp(&b.filter.len())
                .then_with(|| a.filter.cmp(&b.filter))
        })
}

/// Pick the config that decides alerting for a message: notify-enabled
/// configs whose filter matches, longest filter wins. This deliberately does
/// not require `enabled`; a notify-enabled filter alerts even while a more
/// specific notify-disabled filter also matches.
pub fn best_notify_match<'a, I>(configs: I, topic: &str) -> Option<&'a TopicConfig>
where
    I: IntoIterator<Item = &'a TopicConfig>,
{
    configs
        .into_iter()
        .filter(|c| c.notify_enabled && topic_matches(&c.filter, topic))
        .max_by(|a, b| {
            a.filter
                .len()
                .cmp(&b.filter.len())
                .then_with(|| a.filter.cmp(&b.filter))
        })
}
