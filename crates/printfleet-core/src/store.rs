// ── Device store ──
//
// Lock-free concurrent storage for the latest known state of every
// managed device, with push-based change notification via a watch
// channel. Poll results and push payloads both land here.

use std::sync::Arc;

use dashmap::DashMap;
use printfleet_api::{DeviceId, DeviceStatus, FleetActivity};
use tokio::sync::watch;

pub(crate) struct DeviceStore {
    by_id: DashMap<DeviceId, Arc<DeviceStatus>>,
    /// Full snapshot sorted by id, rebuilt on mutation.
    snapshot: watch::Sender<Arc<Vec<Arc<DeviceStatus>>>>,
}

impl DeviceStore {
    pub(crate) fn new() -> Self {
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            by_id: DashMap::new(),
            snapshot,
        }
    }

    /// Insert or replace a device's status. Returns `true` if the id was new.
    pub(crate) fn apply(&self, status: DeviceStatus) -> bool {
        let is_new = self
            .by_id
            .insert(status.id, Arc::new(status))
            .is_none();
        self.rebuild_snapshot();
        is_new
    }

    pub(crate) fn get(&self, id: DeviceId) -> Option<Arc<DeviceStatus>> {
        self.by_id.get(&id).map(|r| Arc::clone(r.value()))
    }

    /// Current snapshot (cheap `Arc` clone), sorted by device id.
    pub(crate) fn snapshot(&self) -> Arc<Vec<Arc<DeviceStatus>>> {
        self.snapshot.borrow().clone()
    }

    /// Activity flags for one policy evaluation.
    pub(crate) fn activity(&self) -> FleetActivity {
        let snapshot = self.snapshot();
        FleetActivity::from_statuses(snapshot.iter().map(Arc::as_ref))
    }

    fn rebuild_snapshot(&self) {
        let mut entries: Vec<Arc<DeviceStatus>> = self
            .by_id
            .iter()
            .map(|r| Arc::clone(r.value()))
            .collect();
        entries.sort_by_key(|s| s.id);
        let _ = self.snapshot.send(Arc::new(entries));
    }
}

#[cfg(test)]
mod tests {
    use printfleet_api::{DeviceId, DeviceStatus};

    use super::DeviceStore;

    #[test]
    fn apply_reports_new_vs_replaced() {
        let store = DeviceStore::new();
        assert!(store.apply(DeviceStatus::new(DeviceId(1), "mono")));
        assert!(!store.apply(DeviceStatus::new(DeviceId(1), "mono")));
        assert_eq!(store.snapshot().len(), 1);
    }

    #[test]
    fn snapshot_stays_sorted_by_id() {
        let store = DeviceStore::new();

        store.apply(DeviceStatus::new(DeviceId(7), "kobra"));
        store.apply(DeviceStatus::new(DeviceId(3), "max"));

        let snapshot = store.snapshot();
        let ids: Vec<u64> = snapshot.iter().map(|s| s.id.0).collect();
        assert_eq!(ids, vec![3, 7]);
    }

    #[test]
    fn activity_reflects_latest_statuses() {
        let store = DeviceStore::new();
        let mut busy = DeviceStatus::new(DeviceId(1), "mono");
        busy.busy = true;
        busy.job.in_progress = true;
        store.apply(busy);

        assert!(store.activity().any_busy);

        let mut idle = DeviceStatus::new(DeviceId(1), "mono");
        idle.online = false;
        store.apply(idle);

        let activity = store.activity();
        assert!(!activity.any_busy);
        assert!(!activity.any_online_or_busy);
    }
}
