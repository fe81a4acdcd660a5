//! Topiced-event publish topic reconstruction (spec example: stored topic
//! `"anything/2c/foo/bar"` + `topicprefix="ignite/"` + `device_id="HUV481"`
//! publishes to `"ignite/HUV481/2c/foo/bar"`).

/// Rebuild the publish topic for a topiced event row, or `None` if the
/// stored topic has no `2c/` marker (malformed; caller should log and
/// leave the row in place rather than publish to a bogus topic).
pub fn reconstruct_topic(topic_prefix: &str, device_id: &str, stored_topic: &str) -> Option<String> {
    let idx = stored_topic.find("2c/")?;
    let suffix = &stored_topic[idx..];
    Some(format!("{topic_prefix}{device_id}/{suffix}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconstructs_from_2c_marker() {
        let topic = reconstruct_topic("ignite/", "HUV481", "anything/2c/foo/bar").unwrap();
        assert_eq!(topic, "ignite/HUV481/2c/foo/bar");
    }

    #[test]
    fn missing_marker_returns_none() {
        assert!(reconstruct_topic("ignite/", "HUV481", "no-marker-here").is_none());
    }
}
