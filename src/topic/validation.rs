//! Topic name and filter validation
//!
//! Rules (MQTT v3.1.1 §4.7):
//! - Topic names never contain wildcards
//! - Multi-level wildcard (#) must occupy an entire level and be last
//! - Single-level wildcard (+) must occupy an entire level
//! - Names and filters are 1..=65535 bytes with no NUL characters

/// Validate a topic name (used in PUBLISH)
pub fn validate_topic_name(topic: &str) -> Result<(), &'static str> {
    if topic.is_empty() {
        return Err("topic name cannot be empty");
    }

    if topic.len() > 65535 {
        return Err("topic name exceeds maximum length");
    }

    if topic.contains('\0') {
        return Err("topic name cannot contain null character");
    }

    if topic.contains('+') || topic.contains('#') {
        return Err("topic name cannot contain wildcards");
    }

    Ok(())
}

/// Validate a topic filter (used in SUBSCRIBE/UNSUBSCRIBE)
pub fn validate_topic_filter(filter: &str) -> Result<(), &'static str> {
    if filter.is_empty() {
        return Err("topic filter cannot be empty");
    }

    if filter.len() > 65535 {
        return Err("topic filter exceeds maximum length");
    }

    if filter.contains('\0') {
        return Err("topic filter cannot contain null character");
    }

    let levels: Vec<&str> = filter.split('/').collect();

    for (i, level) in levels.iter().enumerate() {
        if level.contains('#') {
            if *level != "#" {
                return Err("multi-level wildcard must occupy entire level");
            }
            if i != levels.len() - 1 {
                return Err("multi-level wildcard must be last level");
            }
        }

        if level.contains('+') && *level != "+" {
            return Err("single-level wildcard must occupy entire level");
        }
    }

    Ok(())
}

/// Check whether a topic filter matches a topic name
///
/// A standalone matcher with the same semantics as the tree walk; live
/// fan-out goes through the tree, this covers one-off checks.
/// `$`-prefixed topics are not matched by filters starting with a wildcard.
pub fn topic_matches_filter(topic: &str, filter: &str) -> bool {
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let topic_levels: Vec<&str> = topic.split('/').collect();
    let filter_levels: Vec<&str> = filter.split('/').collect();

    let mut ti = 0;
    let mut fi = 0;

    while fi < filter_levels.len() {
        let filter_level = filter_levels[fi];

        if filter_level == "#" {
            return true;
        }

        if ti >= topic_levels.len() {
            return false;
        }

        if filter_level == "+" || filter_level == topic_levels[ti] {
            ti += 1;
            fi += 1;
        } else {
            return false;
        }
    }

    ti == topic_levels.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("test" => true ; "name_single")]
    #[test_case("test/topic" => true ; "name_two_levels")]
    #[test_case("/test/topic" => true ; "name_leading_slash")]
    #[test_case("test/topic/" => true ; "name_trailing_slash")]
    #[test_case("" => false ; "name_empty")]
    #[test_case("test+topic" => false ; "name_plus_in_level")]
    #[test_case("test#topic" => false ; "name_hash_in_level")]
    #[test_case("test/+/topic" => false ; "name_plus_level")]
    #[test_case("test/#" => false ; "name_hash_level")]
    fn test_validate_topic_name(topic: &str) -> bool {
        validate_topic_name(topic).is_ok()
    }

    #[test_case("test" => true ; "filter_single")]
    #[test_case("test/topic" => true ; "filter_two_levels")]
    #[test_case("+" => true ; "filter_plus_only")]
    #[test_case("#" => true ; "filter_hash_only")]
    #[test_case("test/+" => true ; "filter_trailing_plus")]
    #[test_case("test/#" => true ; "filter_trailing_hash")]
    #[test_case("+/test" => true ; "filter_leading_plus")]
    #[test_case("+/+/+" => true ; "filter_all_plus")]
    #[test_case("test/+/topic" => true ; "filter_mid_plus")]
    #[test_case("" => false ; "filter_empty")]
    #[test_case("test+" => false ; "filter_plus_suffix")]
    #[test_case("test#" => false ; "filter_hash_suffix")]
    #[test_case("test/#/more" => false ; "filter_hash_not_last")]
    #[test_case("+test" => false ; "filter_plus_prefix")]
    #[test_case("#/test" => false ; "filter_hash_prefix")]
    fn test_validate_topic_filter(filter: &str) -> bool {
        validate_topic_filter(filter).is_ok()
    }

    #[test]
    fn test_topic_matches() {
        // exact
        assert!(topic_matches_filter("test", "test"));
        assert!(topic_matches_filter("test/topic", "test/topic"));
        assert!(!topic_matches_filter("test", "test/topic"));
        assert!(!topic_matches_filter("test/topic", "test"));

        // single-level wildcard
        assert!(topic_matches_filter("test/topic", "test/+"));
        assert!(topic_matches_filter("test/topic", "+/topic"));
        assert!(topic_matches_filter("a/b/c", "+/b/+"));
        assert!(!topic_matches_filter("test", "+/+"));
        assert!(!topic_matches_filter("test/topic/extra", "test/+"));

        // multi-level wildcard
        assert!(topic_matches_filter("test", "#"));
        assert!(topic_matches_filter("test/topic/more", "#"));
        assert!(topic_matches_filter("test/topic", "test/#"));
        assert!(topic_matches_filter("test", "test/#"));
        assert!(!topic_matches_filter("other/topic", "test/#"));

        // $-topics
        assert!(!topic_matches_filter("$SYS/test", "+/test"));
        assert!(!topic_matches_filter("$SYS/test", "#"));
        assert!(topic_matches_filter("$SYS/test", "$SYS/+"));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn topic_strategy() -> impl Strategy<Value = String> {
            proptest::collection::vec("[a-z0-9]{1,8}", 1..5).prop_map(|levels| levels.join("/"))
        }

        proptest! {
            #[test]
            fn every_topic_matches_itself(topic in topic_strategy()) {
                prop_assert!(topic_matches_filter(&topic, &topic));
            }

            #[test]
            fn hash_matches_every_plain_topic(topic in topic_strategy()) {
                prop_assert!(topic_matches_filter(&topic, "#"));
            }

            #[test]
            fn plus_matches_any_single_level_suffix(topic in topic_strategy()) {
                let filter = match topic.rsplit_once('/') {
                    Some((prefix, _)) => format!("{}/+", prefix),
                    None => "+".to_string(),
                };
                prop_assert!(topic_matches_filter(&topic, &filter));
            }
        }
    }
}
