//! The three non-FIFO reduction policies (spec §4.6). Each is a pure
//! function over an already-loaded, rowid-ordered row set, returning the
//! ids to delete — the reducer performs the actual deletion and vacuum.

use std::collections::{HashMap, HashSet};

use ignite_types::RowId;

use crate::sessions::partition_sessions;

/// A row is protected from every named policy (not just the FIFO fallback)
/// when its event id is exempted or it's already flagged for the stream
/// transport — a streamed row must never be deleted by reduction (spec
/// §8 invariant 3).
fn is_protected(row: &ignite_types::EventRecord, exempt_ids: &HashSet<String>) -> bool {
    row.stream_flag || exempt_ids.contains(row.event_id.0.as_str())
}

/// `(last_ts, last_rowid)` checkpoint so a re-invocation doesn't
/// re-examine rows already swept by a previous run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Checkpoint {
    /// Timestamp of the last row considered.
    pub last_ts: i64,
    /// Rowid of the last row considered.
    pub last_rowid: RowId,
}

/// RemoveAlternateSimilarEvent: within each session window and event id,
/// delete the even-indexed occurrences (0-based), keep the odd-indexed
/// ones. Exempted event ids are skipped entirely.
pub fn remove_alternate_similar_event(
    rows: &[ignite_types::EventRecord],
    exempt_ids: &HashSet<String>,
    checkpoint: Option<Checkpoint>,
) -> (Vec<RowId>, Option<Checkpoint>) {
    let windows = partition_sessions(rows);
    let mut to_delete = Vec::new();
    let mut new_checkpoint = checkpoint;

    for window in windows {
        let mut by_event_id: HashMap<&str, Vec<&ignite_types::EventRecord>> = HashMap::new();
        for row in &window.rows {
            if is_protected(row, exempt_ids) {
                continue;
            }
            if let Some(cp) = checkpoint {
                let rowid = row.id.unwrap_or(0);
                if (row.timestamp_ms, rowid) <= (cp.last_ts, cp.last_rowid) {
                    continue;
                }
            }
            by_event_id.entry(row.event_id.0.as_str()).or_default().push(row);
        }

        for occurrences in by_event_id.values() {
            for (idx, row) in occurrences.iter().enumerate() {
                if idx % 2 == 0 {
                    if let Some(id) = row.id {
                        to_delete.push(id);
                    }
                }
            }
        }

        if let Some(last) = window.rows.last() {
            new_checkpoint = Some(Checkpoint {
                last_ts: last.timestamp_ms,
                last_rowid: last.id.unwrap_or(0),
            });
        }
    }

    (to_delete, new_checkpoint)
}

/// RemoveRepeatedTriggerEvents_LeaveFirstAndLast: pair pre-trigger events
/// (ids ending in `pre_suffix`) with the next post-trigger event of the
/// same base name (ids ending in `post_suffix`) within the same session
/// window; keep the first and last pair, delete the rest.
pub fn remove_repeated_trigger_events_leave_first_and_last(
    rows: &[ignite_types::EventRecord],
    pre_suffix: &str,
    post_suffix: &str,
    exempt_ids: &HashSet<String>,
) -> Vec<RowId> {
    let windows = partition_sessions(rows);
    let mut to_delete = Vec::new();

    for window in windows {
        let mut pairs: HashMap<String, Vec<(RowId, RowId)>> = HashMap::new();
        let mut pending_pre: HashMap<String, RowId> = HashMap::new();

        for row in &window.rows {
            if is_protected(row, exempt_ids) {
                continue;
            }
            let Some(id) = row.id else { continue };
            if let Some(base) = row.event_id.0.strip_suffix(pre_suffix) {
                pending_pre.insert(base.to_string(), id);
            } else if let Some(base) = row.event_id.0.strip_suffix(post_suffix) {
                if let Some(pre_id) = pending_pre.remove(base) {
                    pairs.entry(base.to_string()).or_default().push((pre_id, id));
                }
            }
        }

        for group in pairs.values() {
            if group.len() <= 2 {
                continue;
            }
            for &(pre_id, post_id) in &group[1..group.len() - 1] {
                to_delete.push(pre_id);
                to_delete.push(post_id);
            }
        }
    }

    to_delete
}

/// RemoveTriggerEventPostFiles: post-trigger events (ids ending in
/// `post_suffix`) that carry an attachment are deleted outright.
pub fn remove_trigger_event_post_files(
    rows: &[ignite_types::EventRecord],
    post_suffix: &str,
    exempt_ids: &HashSet<String>,
) -> Vec<RowId> {
    rows.iter()
        .filter(|row| row.event_id.0.ends_with(post_suffix) && row.has_attach && !is_protected(row, exempt_ids))
        .filter_map(|row| row.id)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ignite_types::EventName;

    fn ev(id: &str, rowid: i64, has_attach: bool) -> ignite_types::EventRecord {
        ignite_types::EventRecord {
            id: Some(rowid),
            event_id: EventName::new(id),
            timestamp_ms: rowid,
            timezone_ms: 0,
            size: 0,
            has_attach,
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
    fn alternate_policy_keeps_odd_indexed_occurrences() {
        let rows = vec![
            ev("Speed", 1, false),
            ev("Speed", 2, false),
            ev("Speed", 3, false),
            ev("Speed", 4, false),
        ];
        let (deleted, _) = remove_alternate_similar_event(&rows, &HashSet::new(), None);
        assert_eq!(deleted, vec![1, 3]);
    }

    #[test]
    fn alternate_policy_skips_exempt_ids() {
        let rows = vec![ev("Critical", 1, false), ev("Critical", 2, false)];
        let mut exempt = HashSet::new();
        exempt.insert("Critical".to_string());
        let (deleted, _) = remove_alternate_similar_event(&rows, &exempt, None);
        assert!(deleted.is_empty());
    }

    #[test]
    fn alternate_policy_never_deletes_a_streamed_row() {
        let mut rows = vec![ev("Speed", 1, false), ev("Speed", 2, false)];
        rows[0].stream_flag = true;
        let (deleted, _) = remove_alternate_similar_event(&rows, &HashSet::new(), None);
        assert!(!deleted.contains(&1));
    }

    #[test]
    fn trigger_pairs_keep_first_and_last() {
        let rows = vec![
            ev("DTC_BEF", 1, false),
            ev("DTC_AFT", 2, false),
            ev("DTC_BEF", 3, false),
            ev("DTC_AFT", 4, false),
            ev("DTC_BEF", 5, false),
            ev("DTC_AFT", 6, false),
        ];
        let deleted =
            remove_repeated_trigger_events_leave_first_and_last(&rows, "_BEF", "_AFT", &HashSet::new());
        assert_eq!(deleted, vec![3, 4]);
    }

    #[test]
    fn post_files_deletes_only_attached_post_trigger() {
        let rows = vec![ev("DTC_AFT", 1, true), ev("DTC_AFT", 2, false)];
        let deleted = remove_trigger_event_post_files(&rows, "_AFT", &HashSet::new());
        assert_eq!(deleted, vec![1]);
    }
}
