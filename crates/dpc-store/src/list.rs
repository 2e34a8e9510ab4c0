//! In-memory priority-ordered DPC candidate list (spec §4.B).

use chrono::{DateTime, Duration, Utc};
use nim_shared_types::dpc::{Dpc, DpcKey};
use serde::{Deserialize, Serialize};

/// Default `minTimeSinceFailure` used by [`DpcList::is_testable`].
pub const DEFAULT_MIN_TIME_SINCE_FAILURE: Duration = Duration::minutes(5);

/// The priority-ordered list of candidate DPCs (spec §3 "DPC List", §4.B).
///
/// Entries are always kept sorted by `TimePriority` descending, ties broken
/// by `Key` ascending, so `entries[0]` is always the highest-priority
/// candidate. The "current" candidate is tracked by key rather than index,
/// since a superseding `Add` can shift everyone's position.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DpcList {
    entries: Vec<Dpc>,
    current_key: Option<DpcKey>,
    #[serde(skip, default = "default_min_time_since_failure")]
    min_time_since_failure: Duration,
}

fn default_min_time_since_failure() -> Duration {
    DEFAULT_MIN_TIME_SINCE_FAILURE
}

impl DpcList {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            current_key: None,
            min_time_since_failure: DEFAULT_MIN_TIME_SINCE_FAILURE,
        }
    }

    pub fn with_min_time_since_failure(mut self, d: Duration) -> Self {
        self.min_time_since_failure = d;
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `Get(index) -> DPC` (spec §4.B contract).
    pub fn get(&self, index: usize) -> Option<&Dpc> {
        self.entries.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Dpc> {
        self.entries.get_mut(index)
    }

    pub fn index_of(&self, key: &DpcKey) -> Option<usize> {
        self.entries.iter().position(|d| &d.key == key)
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current_key.as_ref().and_then(|k| self.index_of(k))
    }

    pub fn current(&self) -> Option<&Dpc> {
        self.current_index().and_then(|i| self.entries.get(i))
    }

    pub fn set_current(&mut self, key: Option<DpcKey>) {
        self.current_key = key;
    }

    pub fn iter(&self) -> impl Iterator<Item = &Dpc> {
        self.entries.iter()
    }

    /// `Add(dpc)`: inserts, or supersedes the existing entry with the same
    /// `Key` if `dpc.time_priority` is strictly newer (spec §4.B "Dedup and
    /// replacement"). A DPC with the same or older priority than the
    /// existing entry for that key is dropped. Returns whether the list was
    /// changed.
    pub fn add(&mut self, dpc: Dpc) -> bool {
        if let Some(idx) = self.index_of(&dpc.key) {
            if dpc.time_priority <= self.entries[idx].time_priority {
                log::debug!(
                    "ignoring DPC {} with stale time_priority {}",
                    dpc.key,
                    dpc.time_priority
                );
                return false;
            }
            self.entries.remove(idx);
        }
        self.entries.push(dpc);
        self.resort();
        true
    }

    /// `Del(dpc)` by key. Clears the current cursor if it pointed at the
    /// removed entry.
    pub fn del(&mut self, key: &DpcKey) -> Option<Dpc> {
        let idx = self.index_of(key)?;
        if self.current_key.as_ref() == Some(key) {
            self.current_key = None;
        }
        Some(self.entries.remove(idx))
    }

    /// Replace the port list of the entry keyed by `key` in place, without
    /// touching its `TimePriority` or position. Used to keep a
    /// last-resort candidate's interfaces in sync with interface events
    /// (spec §4.C "Kept in sync with interface events while enabled").
    pub fn replace_ports(&mut self, key: &DpcKey, ports: Vec<nim_shared_types::dpc::Port>) -> bool {
        match self.index_of(key) {
            Some(idx) => {
                self.entries[idx].ports = ports;
                true
            }
            None => false,
        }
    }

    fn resort(&mut self) {
        self.entries
            .sort_by(|a, b| b.time_priority.cmp(&a.time_priority).then_with(|| a.key.cmp(&b.key)));
    }

    /// Whether the DPC at `index` currently qualifies as testable (spec
    /// §4.B "Ordering"): at least one management port, and either its last
    /// failure predates its last success, or enough time has passed since
    /// the last failure.
    pub fn is_testable(&self, index: usize, now: DateTime<Utc>) -> bool {
        match self.entries.get(index) {
            Some(dpc) => Self::dpc_is_testable(dpc, now, self.min_time_since_failure),
            None => false,
        }
    }

    pub fn dpc_is_testable(dpc: &Dpc, now: DateTime<Utc>, min_time_since_failure: Duration) -> bool {
        if dpc.management_ports().next().is_none() {
            return false;
        }
        match (dpc.test_results.last_failed, dpc.test_results.last_succeeded) {
            (None, _) => true,
            (Some(failed), Some(succeeded)) if failed < succeeded => true,
            (Some(failed), _) => now - failed >= min_time_since_failure,
        }
    }

    /// Whether the DPC at `index` has never been probed (spec §4.B
    /// "Ordering"): both timestamps absent.
    pub fn is_untested(&self, index: usize) -> bool {
        self.entries
            .get(index)
            .map(|d| d.test_results.is_untested())
            .unwrap_or(false)
    }

    /// `Pick() -> (index, dpc)`: the highest-priority testable candidate,
    /// if any (spec §4.B contract). The list is already priority-ordered,
    /// so this is a linear scan for the first testable entry.
    pub fn pick(&self, now: DateTime<Utc>) -> Option<(usize, &Dpc)> {
        self.entries
            .iter()
            .enumerate()
            .find(|(i, _)| self.is_testable(*i, now))
    }

    /// `SetTestResult(index, result)`: merges a probe result into the
    /// entry's whole-DPC `TestResults`, never regressing a newer timestamp
    /// (spec §4.B, `TestResults::Update`).
    pub fn set_test_result(
        &mut self,
        index: usize,
        result: &nim_shared_types::dpc::TestResults,
    ) -> bool {
        match self.entries.get_mut(index) {
            Some(dpc) => {
                dpc.test_results.update(result);
                true
            }
            None => false,
        }
    }

    /// At most one entry may be `State = Success`, and it must be the
    /// current entry (spec §3 invariant). Debug-only consistency check used
    /// by tests.
    #[cfg(test)]
    fn invariant_ok(&self) -> bool {
        use nim_shared_types::dpc::DpcState;
        let successes: Vec<&DpcKey> = self
            .entries
            .iter()
            .filter(|d| d.state == DpcState::Success)
            .map(|d| &d.key)
            .collect();
        match successes.as_slice() {
            [] => true,
            [only] => self.current_key.as_ref() == Some(*only),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use nim_shared_types::dpc::{epoch_priority, Port};

    fn dpc(key: &str, priority: DateTime<Utc>) -> Dpc {
        Dpc::new(DpcKey(key.into()), priority, vec![Port::new("eth0", 0, true)])
    }

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn ordered_by_time_priority_descending() {
        let mut list = DpcList::new();
        list.add(dpc("a", t(100)));
        list.add(dpc("b", t(300)));
        list.add(dpc("c", t(200)));
        let keys: Vec<_> = list.iter().map(|d| d.key.0.clone()).collect();
        assert_eq!(keys, vec!["b", "c", "a"]);
    }

    #[test]
    fn ties_broken_by_key() {
        let mut list = DpcList::new();
        list.add(dpc("z", t(100)));
        list.add(dpc("a", t(100)));
        let keys: Vec<_> = list.iter().map(|d| d.key.0.clone()).collect();
        assert_eq!(keys, vec!["a", "z"]);
    }

    #[test]
    fn last_resort_with_epoch_priority_sorts_last() {
        let mut list = DpcList::new();
        list.add(dpc("controller", t(500)));
        list.add(dpc("last-resort", epoch_priority()));
        let keys: Vec<_> = list.iter().map(|d| d.key.0.clone()).collect();
        assert_eq!(keys, vec!["controller", "last-resort"]);
    }

    #[test]
    fn newer_time_priority_supersedes_same_key() {
        let mut list = DpcList::new();
        assert!(list.add(dpc("a", t(100))));
        assert!(list.add(dpc("a", t(200))));
        assert_eq!(list.len(), 1);
        assert_eq!(list.get(0).unwrap().time_priority, t(200));
    }

    #[test]
    fn stale_time_priority_is_dropped() {
        let mut list = DpcList::new();
        list.add(dpc("a", t(200)));
        assert!(!list.add(dpc("a", t(100))));
        assert_eq!(list.get(0).unwrap().time_priority, t(200));
    }

    #[test]
    fn del_clears_current_if_it_was_the_removed_entry() {
        let mut list = DpcList::new();
        list.add(dpc("a", t(100)));
        list.set_current(Some(DpcKey("a".into())));
        list.del(&DpcKey("a".into()));
        assert!(list.current().is_none());
    }

    #[test]
    fn candidate_with_no_management_port_is_never_testable() {
        let mut list = DpcList::new();
        let mut d = dpc("a", t(100));
        d.ports[0].is_management = false;
        list.add(d);
        assert!(!list.is_testable(0, t(1000)));
    }

    #[test]
    fn candidate_becomes_testable_again_after_min_time_since_failure() {
        let mut list = DpcList::new();
        let mut d = dpc("a", t(100));
        d.test_results.record_failure(t(0), "boom");
        list.add(d);
        assert!(!list.is_testable(0, t(100)));
        assert!(list.is_testable(0, t(301)));
    }

    #[test]
    fn candidate_testable_immediately_when_failure_precedes_success() {
        let mut list = DpcList::new();
        let mut d = dpc("a", t(100));
        d.test_results.record_failure(t(0), "boom");
        d.test_results.record_success(t(50));
        list.add(d);
        assert!(list.is_testable(0, t(60)));
    }

    #[test]
    fn pick_returns_highest_priority_testable_candidate() {
        let mut list = DpcList::new();
        let mut blocked = dpc("high", t(300));
        blocked.test_results.record_failure(t(290), "boom");
        list.add(blocked);
        list.add(dpc("low", t(100)));
        let (idx, picked) = list.pick(t(291)).expect("some candidate testable");
        assert_eq!(picked.key.0, "low");
        assert_eq!(idx, 1);
    }

    #[test]
    fn untested_when_both_timestamps_absent() {
        let mut list = DpcList::new();
        list.add(dpc("a", t(100)));
        assert!(list.is_untested(0));
    }

    #[test]
    fn set_test_result_never_regresses_a_newer_timestamp() {
        let mut list = DpcList::new();
        let mut d = dpc("a", t(100));
        d.test_results.record_success(t(500));
        list.add(d);
        let stale = nim_shared_types::dpc::TestResults {
            last_failed: Some(t(10)),
            last_succeeded: None,
            last_error: Some("stale".into()),
        };
        list.set_test_result(0, &stale);
        assert!(!list.get(0).unwrap().test_results.has_error());
    }

    #[test]
    fn invariant_holds_with_single_success_at_current_index() {
        use nim_shared_types::dpc::DpcState;
        let mut list = DpcList::new();
        let mut d = dpc("a", t(100));
        d.state = DpcState::Success;
        list.add(d);
        list.set_current(Some(DpcKey("a".into())));
        assert!(list.invariant_ok());
    }
}
