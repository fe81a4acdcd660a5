//! Session-window partitioning shared by every policy that needs it: a
//! run of rows between consecutive `IgniteClientLaunched` markers (spec
//! §4.6).

use ignite_types::{synthetic, EventRecord};

/// A contiguous, rowid-ordered run of events belonging to one session.
pub struct SessionWindow<'a> {
    /// Rows in this window, in rowid order.
    pub rows: Vec<&'a EventRecord>,
}

/// Split `rows` (already ordered by rowid ascending) into session windows,
/// starting a new window at each `IgniteClientLaunched` marker.
pub fn partition_sessions(rows: &[EventRecord]) -> Vec<SessionWindow<'_>> {
    let mut windows: Vec<SessionWindow<'_>> = Vec::new();
    let mut current: Vec<&EventRecord> = Vec::new();

    for row in rows {
        if row.event_id.0 == synthetic::IGNITE_CLIENT_LAUNCHED && !current.is_empty() {
            windows.push(SessionWindow { rows: std::mem::take(&mut current) });
        }
        current.push(row);
    }
    if !current.is_empty() {
        windows.push(SessionWindow { rows: current });
    }
    windows
}

#[cfg(test)]
mod tests {
    use super::*;
    use ignite_types::EventName;

    fn ev(id: &str, rowid: i64) -> EventRecord {
        EventRecord {
            id: Some(rowid),
            event_id: EventName::new(id),
            timestamp_ms: rowid,
            timezone_ms: 0,
            size: 0,
            has_attach: false,
            priority: 0,
            payload_blob: vec![],
            app_id: "app".into(),
            topic: String::new(),
            mid: 0,
            stream_flag: false,
            batch_flag: true,
            granularity_level: 0,
            attachment_failure_reason: None,
        }
    }

    #[test]
    fn splits_on_launch_marker() {
        let rows = vec![
            ev(synthetic::IGNITE_CLIENT_LAUNCHED, 1),
            ev("Speed", 2),
            ev(synthetic::IGNITE_CLIENT_LAUNCHED, 3),
            ev("Speed", 4),
            ev("Speed", 5),
        ];
        let windows = partition_sessions(&rows);
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0].rows.len(), 2);
        assert_eq!(windows[1].rows.len(), 3);
    }
}
