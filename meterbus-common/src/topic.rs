//! Topic naming, wildcard patterns and filter matching.
//!
//! Zenoh key expressions and MQTT topics separate segments with `/`, NATS
//! subjects with `.`. Subscription wildcards follow the transport:
//!
//! | transport | one segment | rest of the hierarchy |
//! |-----------|-------------|-----------------------|
//! | zenoh     | `*`         | `**`                  |
//! | mqtt      | `+`         | `#`                   |
//! | nats      | `*`         | `>`                   |

use crate::config::Transport;
use crate::error::{Error, Result};

/// Default hierarchy root for meter readings, in `/` form.
pub const DEFAULT_TOPIC_ROOT: &str = "openfmb/metermodule/MeterReadingProfile";

/// Default topic the bridge publishes to, in `/` form.
pub const DEFAULT_TOPIC: &str = "openfmb/metermodule/MeterReadingProfile/modbus";

/// Characters reserved for subscription wildcards on any transport.
const WILDCARD_CHARS: [char; 4] = ['*', '#', '+', '>'];

/// [`DEFAULT_TOPIC_ROOT`] with the transport's separator.
pub fn default_topic_root(transport: Transport) -> String {
    localize(DEFAULT_TOPIC_ROOT, transport)
}

/// [`DEFAULT_TOPIC`] with the transport's separator.
///
/// # Example
/// ```
/// use meterbus_common::config::Transport;
/// use meterbus_common::topic::default_topic;
///
/// assert_eq!(
///     default_topic(Transport::Nats),
///     "openfmb.metermodule.MeterReadingProfile.modbus"
/// );
/// ```
pub fn default_topic(transport: Transport) -> String {
    localize(DEFAULT_TOPIC, transport)
}

fn localize(path: &str, transport: Transport) -> String {
    path.replace('/', &transport.separator().to_string())
}

/// Build a pattern matching every topic below `root` on the given transport.
///
/// # Example
/// ```
/// use meterbus_common::config::Transport;
/// use meterbus_common::topic::subtree_pattern;
///
/// assert_eq!(subtree_pattern("openfmb/meter", Transport::Zenoh), "openfmb/meter/**");
/// assert_eq!(subtree_pattern("openfmb/meter", Transport::Mqtt), "openfmb/meter/#");
/// assert_eq!(subtree_pattern("openfmb.meter", Transport::Nats), "openfmb.meter.>");
/// ```
pub fn subtree_pattern(root: &str, transport: Transport) -> String {
    let separator = transport.separator();
    let root = root.trim_end_matches(separator);
    let wildcard = match transport {
        Transport::Zenoh => "**",
        Transport::Mqtt => "#",
        Transport::Nats => ">",
    };
    format!("{}{}{}", root, separator, wildcard)
}

/// Check that a topic is publishable on `transport`: non-empty segments,
/// no wildcards, and no whitespace in NATS subjects.
pub fn validate_topic(topic: &str, transport: Transport) -> Result<()> {
    if topic.is_empty() {
        return Err(Error::topic(topic, "topic is empty"));
    }

    for segment in topic.split(transport.separator()) {
        if segment.is_empty() {
            return Err(Error::topic(topic, "empty segment"));
        }
        if segment.contains(WILDCARD_CHARS) {
            return Err(Error::topic(
                topic,
                format!("segment '{}' contains a wildcard", segment),
            ));
        }
        if transport == Transport::Nats && segment.contains(char::is_whitespace) {
            return Err(Error::topic(topic, "NATS subjects cannot contain whitespace"));
        }
    }

    Ok(())
}

/// Check that a subscription pattern uses the wildcard syntax of `transport`.
pub fn validate_pattern(pattern: &str, transport: Transport) -> Result<()> {
    if pattern.is_empty() {
        return Err(Error::topic(pattern, "pattern is empty"));
    }

    let segments: Vec<&str> = pattern.split(transport.separator()).collect();
    for (i, segment) in segments.iter().enumerate() {
        let last = i + 1 == segments.len();
        let ok = match (*segment, transport) {
            ("", _) => false,
            ("*" | "**", Transport::Zenoh) => true,
            ("+", Transport::Mqtt) => true,
            ("#", Transport::Mqtt) => last,
            ("*", Transport::Nats) => true,
            (">", Transport::Nats) => last,
            (s, Transport::Nats) => {
                !s.contains(WILDCARD_CHARS) && !s.contains(char::is_whitespace)
            }
            (s, _) => !s.contains(WILDCARD_CHARS),
        };
        if !ok {
            return Err(Error::topic(
                pattern,
                format!("invalid segment '{}' for {} subscriptions", segment, transport),
            ));
        }
    }

    Ok(())
}

/// Match a topic against a subscription filter of the given transport.
///
/// `+`/`*` match exactly one segment. `#` and `**` match zero or more
/// segments, `>` matches one or more.
pub fn topic_matches(filter: &str, topic: &str, transport: Transport) -> bool {
    let separator = transport.separator();
    let filter: Vec<&str> = filter.split(separator).collect();
    let topic: Vec<&str> = topic.split(separator).collect();
    match_segments(&filter, &topic)
}

fn match_segments(filter: &[&str], topic: &[&str]) -> bool {
    match filter.split_first() {
        None => topic.is_empty(),
        Some((&("#" | "**"), rest)) => (0..=topic.len()).any(|i| match_segments(rest, &topic[i..])),
        Some((&">", rest)) => (1..=topic.len()).any(|i| match_segments(rest, &topic[i..])),
        Some((&("+" | "*"), rest)) => !topic.is_empty() && match_segments(rest, &topic[1..]),
        Some((segment, rest)) => {
            topic.first() == Some(segment) && match_segments(rest, &topic[1..])
        }
    }
}
