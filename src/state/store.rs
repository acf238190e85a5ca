// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-memory device store.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::{Device, Valve, WateringStatus};
use crate::event::{Event, ScheduleChange};
use crate::types::{DeviceId, RunMode, Schedule, StationId};

/// Default capacity of the recent watering log.
pub const DEFAULT_RECENT_CAPACITY: usize = 100;

/// Entry of the recent watering log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WateringRecord {
    /// A station started watering.
    Started {
        /// The device.
        device_id: DeviceId,
        /// Station that started.
        station: Option<StationId>,
        /// Reported run time.
        run_time: Option<Duration>,
        /// When the event was applied.
        at: DateTime<Utc>,
    },
    /// Watering finished.
    Completed {
        /// The device.
        device_id: DeviceId,
        /// Station that finished.
        station: Option<StationId>,
        /// When the event was applied.
        at: DateTime<Utc>,
    },
}

impl WateringRecord {
    /// Returns the device of the record.
    #[must_use]
    pub fn device_id(&self) -> &DeviceId {
        match self {
            Self::Started { device_id, .. } | Self::Completed { device_id, .. } => device_id,
        }
    }
}

/// Authoritative cache of device snapshots.
///
/// Only inbound events mutate the store. Every update builds a new
/// [`Device`] and swaps it in, so readers see either the previous or the
/// next snapshot of a device.
#[derive(Debug)]
pub struct DeviceStore {
    devices: RwLock<HashMap<DeviceId, Arc<Device>>>,
    recent: RwLock<VecDeque<WateringRecord>>,
    recent_capacity: usize,
}

impl DeviceStore {
    /// Creates an empty store with the given recent-log capacity.
    #[must_use]
    pub fn new(recent_capacity: usize) -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
            recent: RwLock::new(VecDeque::with_capacity(recent_capacity)),
            recent_capacity,
        }
    }

    /// Applies an inbound event.
    ///
    /// Returns `true` if the store changed.
    pub(crate) fn apply(&self, event: &Event) -> bool {
        self.apply_at(event, Utc::now())
    }

    pub(crate) fn apply_at(&self, event: &Event, now: DateTime<Utc>) -> bool {
        match event {
            Event::DeviceDetails { device_id, details } => {
                let mut devices = self.devices.write();
                let mut device = match devices.get(device_id) {
                    Some(current) => {
                        let mut device = Device::clone(current);
                        device.replace_details((**details).clone());
                        device
                    }
                    None => {
                        tracing::debug!(device_id = %device_id, "Adding device");
                        Device::from_details(device_id.clone(), (**details).clone())
                    }
                };
                device.touch(now);
                devices.insert(device_id.clone(), Arc::new(device));
                true
            }
            Event::DeviceStatus { device_id, status } => {
                self.update(device_id, now, |device| device.apply_status(status))
            }
            Event::WateringStarted {
                device_id,
                station,
                run_time,
                started_at,
                ..
            } => {
                let watering = WateringStatus {
                    station: *station,
                    remaining: *run_time,
                    started_at: *started_at,
                };
                let changed =
                    self.update(device_id, now, |device| device.set_watering(Some(watering)));
                self.record(WateringRecord::Started {
                    device_id: device_id.clone(),
                    station: *station,
                    run_time: *run_time,
                    at: now,
                });
                changed
            }
            Event::WateringCompleted {
                device_id, station, ..
            } => {
                let changed = self.update(device_id, now, |device| device.set_watering(None));
                self.record(WateringRecord::Completed {
                    device_id: device_id.clone(),
                    station: *station,
                    at: now,
                });
                changed
            }
            Event::ModeChanged {
                device_id, mode, ..
            } => self.update(device_id, now, |device| device.set_mode(*mode)),
            Event::ScheduleChanged {
                device_id, change, ..
            } => self.update(device_id, now, |device| match change {
                ScheduleChange::Saved(schedule) => device.upsert_schedule(schedule.clone()),
                ScheduleChange::Deleted(id) => device.remove_schedule(id),
                ScheduleChange::Listed(schedules) => device.replace_schedules(schedules.clone()),
            }),
            Event::DeviceMessage { device_id, .. } => self.update(device_id, now, |_| {}),
            Event::DevicesList { device_ids } => {
                let keep: HashSet<&DeviceId> = device_ids.iter().collect();
                let mut devices = self.devices.write();
                let before = devices.len();
                devices.retain(|id, _| {
                    let kept = keep.contains(id);
                    if !kept {
                        tracing::info!(device_id = %id, "Removing device no longer listed");
                    }
                    kept
                });
                before != devices.len()
            }
            _ => false,
        }
    }

    /// Replaces one device's snapshot with an updated copy.
    fn update(&self, device_id: &DeviceId, now: DateTime<Utc>, f: impl FnOnce(&mut Device)) -> bool {
        let mut devices = self.devices.write();
        let Some(current) = devices.get(device_id) else {
            tracing::debug!(device_id = %device_id, "Ignoring event for unknown device");
            return false;
        };
        let mut device = Device::clone(current);
        f(&mut device);
        device.touch(now);
        devices.insert(device_id.clone(), Arc::new(device));
        true
    }

    fn record(&self, record: WateringRecord) {
        if self.recent_capacity == 0 {
            return;
        }
        let mut recent = self.recent.write();
        while recent.len() >= self.recent_capacity {
            recent.pop_front();
        }
        recent.push_back(record);
    }

    /// Returns a device snapshot.
    #[must_use]
    pub fn get(&self, device_id: &DeviceId) -> Option<Arc<Device>> {
        self.devices.read().get(device_id).cloned()
    }

    /// Returns every device, ordered by id.
    #[must_use]
    pub fn list(&self) -> Vec<Arc<Device>> {
        let mut devices: Vec<_> = self.devices.read().values().cloned().collect();
        devices.sort_by(|a, b| a.id().as_str().cmp(b.id().as_str()));
        devices
    }

    /// Returns the number of devices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    /// Returns `true` if the store holds no device.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }

    /// Returns whether the device is watering; `false` for unknown devices.
    #[must_use]
    pub fn is_watering(&self, device_id: &DeviceId) -> bool {
        self.get(device_id).is_some_and(|d| d.is_watering())
    }

    /// Returns the station the device is watering.
    #[must_use]
    pub fn current_station(&self, device_id: &DeviceId) -> Option<StationId> {
        self.get(device_id).and_then(|d| d.current_station())
    }

    /// Returns the run mode of the device.
    #[must_use]
    pub fn current_mode(&self, device_id: &DeviceId) -> Option<RunMode> {
        self.get(device_id).and_then(|d| d.mode())
    }

    /// Returns the valve of a station.
    #[must_use]
    pub fn valve(&self, device_id: &DeviceId, station: StationId) -> Option<Valve> {
        self.get(device_id).and_then(|d| d.valve(station).cloned())
    }

    /// Returns the known schedules of the device.
    #[must_use]
    pub fn schedules(&self, device_id: &DeviceId) -> Option<Vec<Schedule>> {
        self.get(device_id).map(|d| d.schedules().to_vec())
    }

    /// Returns the recent watering log, oldest first.
    #[must_use]
    pub fn recent_events(&self) -> Vec<WateringRecord> {
        self.recent.read().iter().cloned().collect()
    }
}

impl Default for DeviceStore {
    fn default() -> Self {
        Self::new(DEFAULT_RECENT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{DeviceDetails, DeviceStatus, WateringReport};
    use crate::types::ScheduleId;

    fn id() -> DeviceId {
        DeviceId::new("d1")
    }

    fn station(n: u8) -> StationId {
        StationId::new(n).unwrap()
    }

    fn at(hour: u32) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(&format!("2026-04-02T{hour:02}:00:00Z"))
            .unwrap()
            .with_timezone(&Utc)
    }

    fn details(valves: Vec<Valve>, connected: bool) -> Event {
        Event::DeviceDetails {
            device_id: id(),
            details: Box::new(DeviceDetails {
                name: "Front yard".to_string(),
                is_connected: connected,
                mode: Some(RunMode::Auto),
                valves,
                ..DeviceDetails::default()
            }),
        }
    }

    fn started(n: u8) -> Event {
        Event::WateringStarted {
            device_id: id(),
            station: Some(station(n)),
            run_time: Some(Duration::from_secs(300)),
            started_at: None,
            token: None,
        }
    }

    fn completed() -> Event {
        Event::WateringCompleted {
            device_id: id(),
            station: None,
            token: None,
        }
    }

    #[test]
    fn details_valves_replace_not_merge() {
        let store = DeviceStore::default();
        store.apply(&details(
            vec![Valve::new(station(1), "Front"), Valve::new(station(2), "Back")],
            true,
        ));
        assert!(store.valve(&id(), station(2)).is_some());

        store.apply(&details(vec![Valve::new(station(1), "Front")], true));
        assert!(store.valve(&id(), station(2)).is_none());
        assert_eq!(store.valve(&id(), station(1)).unwrap().name, "Front");
    }

    #[test]
    fn events_for_unknown_devices_are_ignored() {
        let store = DeviceStore::default();
        assert!(!store.apply(&started(1)));
        assert!(store.get(&id()).is_none());
        assert!(!store.is_watering(&id()));
    }

    #[test]
    fn interleaved_events_apply_in_order() {
        let store = DeviceStore::default();
        store.apply(&details(vec![], true));
        store.apply(&started(2));
        store.apply(&Event::DeviceStatus {
            device_id: id(),
            status: DeviceStatus {
                mode: Some(RunMode::Manual),
                ..DeviceStatus::default()
            },
        });
        assert!(store.is_watering(&id()));
        assert_eq!(store.current_station(&id()), Some(station(2)));
        assert_eq!(store.current_mode(&id()), Some(RunMode::Manual));

        // A later details report wins over the earlier status.
        store.apply(&details(vec![], true));
        assert!(!store.is_watering(&id()));
        assert_eq!(store.current_mode(&id()), Some(RunMode::Auto));

        store.apply(&Event::DeviceStatus {
            device_id: id(),
            status: DeviceStatus {
                watering: WateringReport::Active(WateringStatus {
                    station: Some(station(1)),
                    ..WateringStatus::default()
                }),
                ..DeviceStatus::default()
            },
        });
        store.apply(&completed());
        assert!(!store.is_watering(&id()));
    }

    #[test]
    fn readers_keep_their_snapshot() {
        let store = DeviceStore::default();
        store.apply(&details(vec![], true));
        let before = store.get(&id()).unwrap();

        store.apply(&started(1));

        assert!(!before.is_watering());
        assert!(store.get(&id()).unwrap().is_watering());
    }

    #[test]
    fn recent_log_evicts_oldest() {
        let store = DeviceStore::new(3);
        store.apply(&details(vec![], true));
        store.apply_at(&started(1), at(6));
        store.apply_at(&completed(), at(7));
        store.apply_at(&started(2), at(8));
        store.apply_at(&completed(), at(9));

        let recent = store.recent_events();
        assert_eq!(recent.len(), 3);
        assert!(matches!(&recent[0], WateringRecord::Completed { at: t, .. } if *t == at(7)));
        assert!(matches!(&recent[2], WateringRecord::Completed { at: t, .. } if *t == at(9)));
    }

    #[test]
    fn schedule_changes() {
        let store = DeviceStore::default();
        store.apply(&details(vec![], true));
        let schedule = Schedule::builder("Morning")
            .start_time("06:00")
            .station(station(1), 10)
            .build()
            .unwrap()
            .with_id(ScheduleId::new("p1"));

        store.apply(&Event::ScheduleChanged {
            device_id: id(),
            change: ScheduleChange::Saved(schedule.clone()),
            token: None,
        });
        assert_eq!(store.schedules(&id()).unwrap(), vec![schedule.clone()]);

        store.apply(&Event::ScheduleChanged {
            device_id: id(),
            change: ScheduleChange::Deleted(ScheduleId::new("p1")),
            token: None,
        });
        assert!(store.schedules(&id()).unwrap().is_empty());

        store.apply(&Event::ScheduleChanged {
            device_id: id(),
            change: ScheduleChange::Listed(vec![schedule]),
            token: None,
        });
        assert_eq!(store.schedules(&id()).unwrap().len(), 1);
    }

    #[test]
    fn devices_list_prunes_missing_devices() {
        let store = DeviceStore::default();
        store.apply(&details(vec![], true));
        store.apply(&Event::DevicesList {
            device_ids: vec![DeviceId::new("d2")],
        });
        assert!(store.is_empty());
    }

    #[test]
    fn last_seen_follows_applied_events() {
        let store = DeviceStore::default();
        store.apply_at(&details(vec![], true), at(6));
        store.apply_at(&completed(), at(8));
        assert_eq!(store.get(&id()).unwrap().last_seen(), Some(at(8)));
    }
}
