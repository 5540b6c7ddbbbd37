/// Commands for the MQTT sender task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    /// Event payload for a named queue.
    Publish { queue: String, payload: String },
}

/// Topic carrying a queue.
pub fn topic(base: &str, queue: &str) -> String {
    format!("{}/{}", base, queue)
}

/// Queue name from a topic, `None` for topics outside `base`.
pub fn queue_of<'a>(base: &str, topic: &'a str) -> Option<&'a str> {
    topic
        .strip_prefix(base)?
        .strip_prefix('/')
        .filter(|queue| !queue.is_empty() && !queue.contains('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topics_map_to_queues() {
        assert_eq!(topic("domotica", "IQ_RPI_OUTPUTRELAY"), "domotica/IQ_RPI_OUTPUTRELAY");
        assert_eq!(queue_of("domotica", "domotica/IQ_A"), Some("IQ_A"));
        assert_eq!(queue_of("domotica", "domotica/"), None);
        assert_eq!(queue_of("domotica", "domotica/a/b"), None);
        assert_eq!(queue_of("domotica", "other/IQ_A"), None);
        assert_eq!(queue_of("domotica", "domoticaX/IQ_A"), None);
    }
}
