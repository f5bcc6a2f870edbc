//! Per-relay schedule table and trigger arithmetic.
//!
//! The table maps schedule names to entries and tracks at most one pending
//! trigger instant per entry. Instants are derived from the start of the
//! current local calendar day in the relay's timezone:
//!
//! ```text
//! candidate = local_midnight + at
//! next      = candidate + 24h   if now > candidate
//!           = candidate         otherwise
//! ```
//!
//! Solar entries (`sunrise`/`sunset`) use the calculator's instant for the
//! local date, shifted by the configured offset, as their candidate. Their
//! `at` is kept as the distance from local midnight so that the wire view
//! shows when they fire today.

use chrono::{DateTime, NaiveDate, NaiveTime, TimeDelta, Utc};
use chrono_tz::Tz;
use std::collections::BTreeMap;

use crate::constants::{SUNRISE_SCHEDULE, SUNSET_SCHEDULE};
use crate::error::RelayResult;
use crate::relay::RelayState;
use crate::schedule::{ScheduleEntry, SunConfig};
use crate::solar::{Location, SolarCalculator};

/// Whether a name belongs to the solar subsystem.
pub fn is_solar_name(name: &str) -> bool {
    name == SUNRISE_SCHEDULE || name == SUNSET_SCHEDULE
}

/// Start of the local calendar day containing `now`.
///
/// An ambiguous midnight resolves to its earliest instant; a midnight inside
/// a DST gap resolves to the first valid local instant after it.
pub fn local_midnight(tz: Tz, now: DateTime<Utc>) -> DateTime<Tz> {
    midnight_of(tz, now.with_timezone(&tz).date_naive())
}

/// Start of the local calendar day after the one containing `now`.
pub fn next_local_midnight(tz: Tz, now: DateTime<Utc>) -> DateTime<Tz> {
    let today = now.with_timezone(&tz).date_naive();
    match today.succ_opt() {
        Some(tomorrow) => midnight_of(tz, tomorrow),
        None => local_midnight(tz, now) + TimeDelta::days(1),
    }
}

fn midnight_of(tz: Tz, date: NaiveDate) -> DateTime<Tz> {
    let start = date.and_time(NaiveTime::MIN);
    if let Some(instant) = start.and_local_timezone(tz).earliest() {
        return instant;
    }
    // Gaps are whole minutes in every zone tzdata knows about
    (1..=24 * 60)
        .find_map(|minute| {
            (start + TimeDelta::minutes(minute))
                .and_local_timezone(tz)
                .earliest()
        })
        .unwrap_or_else(|| start.and_utc().with_timezone(&tz))
}

/// Roll a candidate that has already passed over to the next day.
pub fn next_fire(candidate: DateTime<Tz>, now: DateTime<Utc>) -> DateTime<Tz> {
    if now > candidate {
        candidate + TimeDelta::hours(24)
    } else {
        candidate
    }
}

/// Today's offset-adjusted sunrise and sunset with the states they switch to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolarWindow {
    pub sunrise: DateTime<Tz>,
    pub sunset: DateTime<Tz>,
    pub rise_state: RelayState,
    pub set_state: RelayState,
}

impl SolarWindow {
    /// Compute the window for the local date containing `now`.
    pub fn compute(
        calculator: &dyn SolarCalculator,
        location: Location,
        sun: &SunConfig,
        tz: Tz,
        now: DateTime<Utc>,
    ) -> RelayResult<Self> {
        let date = now.with_timezone(&tz).date_naive();
        let times = calculator.sun_times(location, date)?;
        Ok(Self {
            sunrise: (times.sunrise + sun.rise_offset).with_timezone(&tz),
            sunset: (times.sunset + sun.set_offset).with_timezone(&tz),
            rise_state: sun.rise_state,
            set_state: sun.set_state,
        })
    }

    /// The state the relay should be in at `now`: `rise_state` within
    /// `[sunrise, sunset)`, `set_state` otherwise.
    pub fn state_at(&self, now: DateTime<Utc>) -> RelayState {
        if self.sunrise <= now && now < self.sunset {
            self.rise_state
        } else {
            self.set_state
        }
    }

    fn entries(&self, midnight: DateTime<Tz>) -> [(ScheduleEntry, DateTime<Tz>); 2] {
        [
            (
                ScheduleEntry::new(
                    SUNRISE_SCHEDULE,
                    self.sunrise.signed_duration_since(midnight),
                    self.rise_state,
                ),
                self.sunrise,
            ),
            (
                ScheduleEntry::new(
                    SUNSET_SCHEDULE,
                    self.sunset.signed_duration_since(midnight),
                    self.set_state,
                ),
                self.sunset,
            ),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Anchor {
    Clock,
    Solar,
}

#[derive(Debug, Clone)]
struct Slot {
    entry: ScheduleEntry,
    anchor: Anchor,
    pending: Option<DateTime<Tz>>,
    // Last trigger consumed by take_due
    fired: Option<DateTime<Tz>>,
}

impl Slot {
    fn new(entry: ScheduleEntry, anchor: Anchor) -> Self {
        Self {
            entry,
            anchor,
            pending: None,
            fired: None,
        }
    }

    /// Like [`next_fire`], but a candidate that already fired counts as
    /// passed even when `now` is exactly that instant.
    fn next_after(&self, candidate: DateTime<Tz>, now: DateTime<Utc>) -> DateTime<Tz> {
        if self.fired == Some(candidate) {
            candidate + TimeDelta::hours(24)
        } else {
            next_fire(candidate, now)
        }
    }

    fn upcoming(&self, midnight: DateTime<Tz>, now: DateTime<Utc>) -> DateTime<Tz> {
        self.pending
            .unwrap_or_else(|| self.next_after(midnight + self.entry.at, now))
    }
}

/// Name → entry mapping for one relay.
#[derive(Debug, Clone, Default)]
pub struct ScheduleTable {
    slots: BTreeMap<String, Slot>,
}

impl ScheduleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a template list. Solar names are skipped; the solar
    /// subsystem owns them.
    pub fn from_entries(entries: impl IntoIterator<Item = ScheduleEntry>) -> Self {
        let mut table = Self::new();
        for entry in entries.into_iter().filter(|e| !is_solar_name(&e.name)) {
            table.insert(entry);
        }
        table
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.slots.contains_key(name)
    }

    /// Insert or replace a clock entry, unarmed. Returns the replaced entry.
    pub fn insert(&mut self, entry: ScheduleEntry) -> Option<ScheduleEntry> {
        let slot = Slot::new(entry, Anchor::Clock);
        self.slots
            .insert(slot.entry.name.clone(), slot)
            .map(|old| old.entry)
    }

    /// Remove an entry, dropping its pending trigger.
    pub fn remove(&mut self, name: &str) -> Option<ScheduleEntry> {
        self.slots.remove(name).map(|slot| slot.entry)
    }

    /// Arm one clock entry for its next occurrence.
    pub fn arm(&mut self, name: &str, tz: Tz, now: DateTime<Utc>) -> Option<DateTime<Tz>> {
        let midnight = local_midnight(tz, now);
        let slot = self.slots.get_mut(name)?;
        let next = slot.next_after(midnight + slot.entry.at, now);
        slot.pending = Some(next);
        Some(next)
    }

    /// Create (or replace) the `sunrise`/`sunset` entries from `window` and
    /// arm them.
    pub fn materialize_solar(&mut self, window: &SolarWindow, tz: Tz, now: DateTime<Utc>) {
        let midnight = local_midnight(tz, now);
        for (entry, candidate) in window.entries(midnight) {
            let fired = self.slots.get(&entry.name).and_then(|slot| slot.fired);
            let mut slot = Slot::new(entry.clone(), Anchor::Solar);
            slot.fired = fired;
            slot.pending = Some(slot.next_after(candidate, now));
            self.slots.insert(entry.name, slot);
        }
    }

    /// Re-anchor every entry to the day containing `now` and re-arm it.
    ///
    /// Solar entries still present are refreshed from `window`; without a
    /// window they are removed.
    pub fn recompute(&mut self, tz: Tz, now: DateTime<Utc>, window: Option<&SolarWindow>) {
        let midnight = local_midnight(tz, now);
        let solar = window.map(|w| w.entries(midnight));

        self.slots.retain(|name, slot| {
            match (slot.anchor, &solar) {
                (Anchor::Clock, _) => {
                    slot.pending = Some(slot.next_after(midnight + slot.entry.at, now));
                }
                (Anchor::Solar, Some(fresh)) => {
                    let Some((entry, candidate)) = fresh.iter().find(|(e, _)| &e.name == name)
                    else {
                        return false;
                    };
                    slot.entry = entry.clone();
                    slot.pending = Some(slot.next_after(*candidate, now));
                }
                (Anchor::Solar, None) => return false,
            }
            true
        });
    }

    /// Clear every pending trigger.
    pub fn disarm_all(&mut self) {
        for slot in self.slots.values_mut() {
            slot.pending = None;
        }
    }

    /// Armed triggers as `(instant, name)` pairs.
    pub fn pending(&self) -> Vec<(DateTime<Utc>, String)> {
        self.slots
            .iter()
            .filter_map(|(name, slot)| {
                slot.pending
                    .map(|at| (at.with_timezone(&Utc), name.clone()))
            })
            .collect()
    }

    pub fn pending_of(&self, name: &str) -> Option<DateTime<Tz>> {
        self.slots.get(name).and_then(|slot| slot.pending)
    }

    /// Consume the trigger of `name` if it is still armed for `at`.
    ///
    /// A trigger that was re-armed, disarmed or removed since `at` was read
    /// yields `None`.
    pub fn take_due(&mut self, name: &str, at: DateTime<Utc>) -> Option<ScheduleEntry> {
        let slot = self.slots.get_mut(name)?;
        match slot.pending {
            Some(pending) if pending == at => {
                slot.pending = None;
                slot.fired = Some(pending);
                Some(slot.entry.clone())
            }
            _ => None,
        }
    }

    /// Next fire instant of every entry. Armed entries report their pending
    /// trigger; unarmed ones the instant they would be armed for.
    pub fn upcoming(&self, tz: Tz, now: DateTime<Utc>) -> BTreeMap<String, DateTime<Tz>> {
        let midnight = local_midnight(tz, now);
        self.slots
            .iter()
            .map(|(name, slot)| (name.clone(), slot.upcoming(midnight, now)))
            .collect()
    }

    /// Entries in name order.
    pub fn entries(&self) -> Vec<ScheduleEntry> {
        self.slots.values().map(|slot| slot.entry.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solar::FixedSunTimes;
    use chrono::TimeZone;
    use chrono_tz::Europe::Rome;
    use proptest::prelude::*;

    fn rome(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Rome.with_ymd_and_hms(y, m, d, h, min, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn evening() -> ScheduleEntry {
        ScheduleEntry::new(
            "evening",
            TimeDelta::hours(18) + TimeDelta::minutes(30),
            RelayState::On,
        )
        .held_for(TimeDelta::hours(2))
    }

    fn fixed_sun() -> FixedSunTimes {
        // 06:00 and 18:00 Rome summer time
        FixedSunTimes {
            sunrise: NaiveTime::from_hms_opt(4, 0, 0).unwrap(),
            sunset: NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_local_midnight_in_rome() {
        let now = rome(2024, 6, 21, 0, 30);
        let midnight = local_midnight(Rome, now);
        assert_eq!(midnight.to_rfc3339(), "2024-06-21T00:00:00+02:00");
        assert_eq!(
            next_local_midnight(Rome, now).to_rfc3339(),
            "2024-06-22T00:00:00+02:00"
        );
    }

    #[test]
    fn test_midnight_inside_dst_gap() {
        // Santiago springs forward at 00:00 -> 01:00
        let tz: Tz = "America/Santiago".parse().unwrap();
        let now = Utc.with_ymd_and_hms(2024, 9, 8, 12, 0, 0).unwrap();
        let midnight = local_midnight(tz, now);
        assert_eq!(midnight.to_rfc3339(), "2024-09-08T01:00:00-03:00");
    }

    #[test]
    fn test_next_day_boundary_across_dst_is_calendar_midnight() {
        // 2024-10-27 is 25 hours long in Rome
        let now = rome(2024, 10, 27, 12, 0);
        let boundary = next_local_midnight(Rome, now);
        assert_eq!(boundary.to_rfc3339(), "2024-10-28T00:00:00+01:00");
        assert_eq!(
            boundary.signed_duration_since(local_midnight(Rome, now)),
            TimeDelta::hours(25)
        );
    }

    #[test]
    fn test_passed_entry_rolls_to_tomorrow() {
        let now = rome(2024, 6, 21, 20, 0);
        let mut table = ScheduleTable::from_entries([evening()]);
        let next = table.arm("evening", Rome, now).unwrap();
        assert_eq!(next.to_rfc3339(), "2024-06-22T18:30:00+02:00");
        assert_eq!(table.pending_of("evening"), Some(next));
    }

    #[test]
    fn test_future_entry_fires_today() {
        let now = rome(2024, 6, 21, 8, 0);
        let mut table = ScheduleTable::from_entries([evening()]);
        let next = table.arm("evening", Rome, now).unwrap();
        assert_eq!(next.to_rfc3339(), "2024-06-21T18:30:00+02:00");
    }

    #[test]
    fn test_solar_names_in_template_are_dropped() {
        let table = ScheduleTable::from_entries([
            evening(),
            ScheduleEntry::new(SUNRISE_SCHEDULE, TimeDelta::hours(6), RelayState::On),
        ]);
        assert_eq!(table.len(), 1);
        assert!(!table.contains(SUNRISE_SCHEDULE));
    }

    #[test]
    fn test_solar_materialization_and_catch_up() {
        let rome_loc = Location::new(41.9, 12.5).unwrap();
        let sun = SunConfig::enabled(RelayState::On, RelayState::Off);
        let noon = rome(2024, 6, 21, 12, 0);
        let window = SolarWindow::compute(&fixed_sun(), rome_loc, &sun, Rome, noon).unwrap();
        assert_eq!(window.state_at(noon), RelayState::On);
        assert_eq!(window.state_at(rome(2024, 6, 21, 5, 59)), RelayState::Off);
        assert_eq!(window.state_at(rome(2024, 6, 21, 6, 0)), RelayState::On);
        assert_eq!(window.state_at(rome(2024, 6, 21, 18, 0)), RelayState::Off);

        let mut table = ScheduleTable::new();
        table.materialize_solar(&window, Rome, noon);
        let upcoming = table.upcoming(Rome, noon);
        assert_eq!(
            upcoming[SUNRISE_SCHEDULE].to_rfc3339(),
            "2024-06-22T06:00:00+02:00"
        );
        assert_eq!(
            upcoming[SUNSET_SCHEDULE].to_rfc3339(),
            "2024-06-21T18:00:00+02:00"
        );

        let entries = table.entries();
        assert_eq!(entries[0].name, SUNRISE_SCHEDULE);
        assert_eq!(entries[0].at, TimeDelta::hours(6));
        assert_eq!(entries[1].at, TimeDelta::hours(18));
    }

    #[test]
    fn test_offsets_shift_solar_window() {
        let rome_loc = Location::new(41.9, 12.5).unwrap();
        let sun = SunConfig::enabled(RelayState::On, RelayState::Off)
            .with_offsets(TimeDelta::minutes(30), TimeDelta::minutes(-30));
        let now = rome(2024, 6, 21, 12, 0);
        let window = SolarWindow::compute(&fixed_sun(), rome_loc, &sun, Rome, now).unwrap();
        assert_eq!(window.sunrise.to_rfc3339(), "2024-06-21T06:30:00+02:00");
        assert_eq!(window.sunset.to_rfc3339(), "2024-06-21T17:30:00+02:00");
    }

    #[test]
    fn test_recompute_without_window_drops_solar_entries() {
        let rome_loc = Location::new(41.9, 12.5).unwrap();
        let sun = SunConfig::enabled(RelayState::On, RelayState::Off);
        let now = rome(2024, 6, 21, 12, 0);
        let window = SolarWindow::compute(&fixed_sun(), rome_loc, &sun, Rome, now).unwrap();

        let mut table = ScheduleTable::from_entries([evening()]);
        table.materialize_solar(&window, Rome, now);
        assert_eq!(table.len(), 3);

        table.recompute(Rome, now, None);
        assert_eq!(table.len(), 1);
        assert!(table.pending_of("evening").is_some());
    }

    #[test]
    fn test_recompute_keeps_removed_solar_entries_removed() {
        let rome_loc = Location::new(41.9, 12.5).unwrap();
        let sun = SunConfig::enabled(RelayState::On, RelayState::Off);
        let now = rome(2024, 6, 21, 12, 0);
        let window = SolarWindow::compute(&fixed_sun(), rome_loc, &sun, Rome, now).unwrap();

        let mut table = ScheduleTable::new();
        table.materialize_solar(&window, Rome, now);
        table.remove(SUNSET_SCHEDULE);

        let tomorrow = now + TimeDelta::days(1);
        let window = SolarWindow::compute(&fixed_sun(), rome_loc, &sun, Rome, tomorrow).unwrap();
        table.recompute(Rome, tomorrow, Some(&window));
        assert_eq!(table.len(), 1);
        assert_eq!(
            table.pending_of(SUNRISE_SCHEDULE).unwrap().to_rfc3339(),
            "2024-06-23T06:00:00+02:00"
        );
    }

    #[test]
    fn test_take_due_honours_only_current_trigger() {
        let now = rome(2024, 6, 21, 8, 0);
        let mut table = ScheduleTable::from_entries([evening()]);
        let armed = table.arm("evening", Rome, now).unwrap().with_timezone(&Utc);

        assert!(table.take_due("evening", armed - TimeDelta::hours(1)).is_none());
        let entry = table.take_due("evening", armed).unwrap();
        assert_eq!(entry.hold, TimeDelta::hours(2));
        // One-shot until re-armed
        assert!(table.take_due("evening", armed).is_none());
        assert!(table.pending().is_empty());
    }

    #[test]
    fn test_trigger_fired_at_boundary_is_not_rearmed() {
        let midnight = rome(2024, 6, 22, 0, 0);
        let mut table = ScheduleTable::from_entries([ScheduleEntry::new(
            "midnight",
            TimeDelta::zero(),
            RelayState::On,
        )]);
        let armed = table.arm("midnight", Rome, rome(2024, 6, 21, 12, 0)).unwrap();
        assert_eq!(armed.with_timezone(&Utc), midnight);

        assert!(table.take_due("midnight", midnight).is_some());
        table.disarm_all();
        table.recompute(Rome, midnight, None);

        let next = Rome.with_ymd_and_hms(2024, 6, 23, 0, 0, 0).unwrap();
        assert_eq!(table.pending_of("midnight"), Some(next));
        assert_eq!(table.upcoming(Rome, midnight)["midnight"], next);
        assert!(table.take_due("midnight", midnight).is_none());
    }

    #[test]
    fn test_upcoming_is_stable_and_read_only() {
        let now = rome(2024, 6, 21, 20, 0);
        let mut table = ScheduleTable::from_entries([evening()]);
        table.arm("evening", Rome, now);
        let first = table.upcoming(Rome, now);
        let second = table.upcoming(Rome, now);
        assert_eq!(first, second);
        assert_eq!(table.pending().len(), 1);

        table.disarm_all();
        assert_eq!(table.upcoming(Rome, now), first);
    }

    proptest! {
        #[test]
        fn prop_next_fire_rule(
            offset_secs in 0i64..86_400,
            now_secs in 0i64..86_400,
            day in 1u32..28,
        ) {
            // January keeps Rome at a fixed +01:00 offset
            let midnight = Rome.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap();
            let now = (midnight + TimeDelta::seconds(now_secs)).with_timezone(&Utc);
            let offset = TimeDelta::seconds(offset_secs);

            let mut table = ScheduleTable::from_entries([
                ScheduleEntry::new("p", offset, RelayState::On),
            ]);
            let next = table.arm("p", Rome, now).unwrap();

            let candidate = midnight + offset;
            if now > candidate {
                prop_assert_eq!(next, candidate + TimeDelta::hours(24));
            } else {
                prop_assert_eq!(next, candidate);
            }
            prop_assert!(next >= now);
        }
    }
}
