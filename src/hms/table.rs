//! Bounded table of HMS fault events.
//!
//! Slots are never allocated or freed: a slot with an unset key is free,
//! expiry only clears `active`, and a slot is only repurposed when a new fault
//! arrives and no free slot is left. Reuse prefers the stalest inactive slot
//! and falls back to the stalest slot overall.

use super::{HmsCode, Severity};
use tracing::info;

pub const HMS_CAPACITY: usize = 20;
pub const DEFAULT_HMS_TTL_MS: u64 = 20_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HmsEvent {
    pub key: HmsCode,
    pub severity: Severity,
    pub first_seen_ms: u64,
    pub last_seen_ms: u64,
    pub occurrence_count: u32,
    pub active: bool,
}

impl HmsEvent {
    pub fn attr(&self) -> u32 {
        self.key.attr()
    }

    pub fn code(&self) -> u32 {
        self.key.code()
    }
}

/// What `upsert` did with a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// Already active; timestamps and counter refreshed.
    Refreshed,
    /// Known but expired; active again with its history intact.
    Reactivated,
    /// Placed in a free slot.
    Inserted,
    /// Took over a slot that held another fault.
    Evicted(HmsCode),
    /// Key zero marks free slots and cannot be stored.
    Rejected,
}

#[derive(Debug, Clone)]
pub struct HmsTable {
    slots: [HmsEvent; HMS_CAPACITY],
    ttl_ms: u64,
}

impl Default for HmsTable {
    fn default() -> Self {
        Self::new(DEFAULT_HMS_TTL_MS)
    }
}

impl HmsTable {
    pub fn new(ttl_ms: u64) -> Self {
        Self {
            slots: [HmsEvent::default(); HMS_CAPACITY],
            ttl_ms: if ttl_ms == 0 { DEFAULT_HMS_TTL_MS } else { ttl_ms },
        }
    }

    pub fn ttl_ms(&self) -> u64 {
        self.ttl_ms
    }

    pub fn set_ttl_ms(&mut self, ttl_ms: u64) {
        self.ttl_ms = if ttl_ms == 0 { DEFAULT_HMS_TTL_MS } else { ttl_ms };
    }

    pub fn upsert(&mut self, attr: u32, code: u32, now_ms: u64) -> UpsertOutcome {
        let key = HmsCode::new(attr, code);
        if key.is_unset() {
            return UpsertOutcome::Rejected;
        }

        if let Some(slot) = self.slots.iter_mut().find(|e| e.key == key) {
            let was_active = slot.active;
            slot.last_seen_ms = now_ms;
            slot.occurrence_count = slot.occurrence_count.saturating_add(1);
            slot.active = true;
            if was_active {
                return UpsertOutcome::Refreshed;
            }
            info!("[HMS] {} sev={} (again, seen {}x)", key, slot.severity, slot.occurrence_count);
            return UpsertOutcome::Reactivated;
        }

        let index = self.free_slot().unwrap_or_else(|| self.eviction_slot());
        let previous = self.slots[index].key;
        let severity = Severity::from_code(code);
        self.slots[index] = HmsEvent {
            key,
            severity,
            first_seen_ms: now_ms,
            last_seen_ms: now_ms,
            occurrence_count: 1,
            active: true,
        };
        info!("[HMS] {} sev={}", key, severity);

        if previous.is_unset() {
            UpsertOutcome::Inserted
        } else {
            UpsertOutcome::Evicted(previous)
        }
    }

    fn free_slot(&self) -> Option<usize> {
        self.slots.iter().position(|e| e.key.is_unset())
    }

    fn eviction_slot(&self) -> usize {
        let stalest = |inactive_only: bool| {
            self.slots
                .iter()
                .enumerate()
                .filter(|(_, e)| !inactive_only || !e.active)
                .min_by_key(|(_, e)| e.last_seen_ms)
                .map(|(i, _)| i)
        };
        stalest(true).or_else(|| stalest(false)).unwrap_or(0)
    }

    /// Marks faults not refreshed within the TTL as inactive. Returns how many
    /// went inactive.
    pub fn expire(&mut self, now_ms: u64) -> usize {
        let ttl = self.ttl_ms;
        let mut expired = 0;
        for slot in self.slots.iter_mut() {
            if slot.key.is_unset() || !slot.active {
                continue;
            }
            if now_ms.saturating_sub(slot.last_seen_ms) > ttl {
                slot.active = false;
                expired += 1;
            }
        }
        expired
    }

    pub fn iter_active(&self) -> impl Iterator<Item = &HmsEvent> {
        self.slots.iter().filter(|e| e.active)
    }

    pub fn top_severity(&self) -> Severity {
        self.iter_active()
            .map(|e| e.severity)
            .max()
            .unwrap_or(Severity::None)
    }

    /// Warning or worse.
    pub fn has_problem(&self) -> bool {
        self.top_severity() >= Severity::Warning
    }

    pub fn count_active(&self, severity: Severity) -> usize {
        self.iter_active().filter(|e| e.severity == severity).count()
    }

    pub fn count_active_total(&self) -> usize {
        self.iter_active().count()
    }

    /// Copy of the active events for display.
    pub fn active_snapshot(&self) -> heapless::Vec<HmsEvent, HMS_CAPACITY> {
        self.iter_active().copied().collect()
    }

    pub fn find(&self, attr: u32, code: u32) -> Option<&HmsEvent> {
        let key = HmsCode::new(attr, code);
        self.slots.iter().find(|e| e.key == key)
    }

    pub fn clear(&mut self) {
        self.slots = [HmsEvent::default(); HMS_CAPACITY];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WARN: u32 = 0x0003_0001;
    const FATAL: u32 = 0x0001_0001;
    const INFO: u32 = 0x0004_0001;

    fn filled_table(now: u64) -> HmsTable {
        let mut table = HmsTable::default();
        for i in 0..HMS_CAPACITY as u32 {
            table.upsert(0x0100 + i, WARN, now + u64::from(i) * 100);
        }
        table
    }

    #[test]
    fn test_upsert_inserts_and_refreshes() {
        let mut table = HmsTable::default();
        assert_eq!(table.upsert(1, WARN, 1_000), UpsertOutcome::Inserted);
        assert_eq!(table.upsert(1, WARN, 2_000), UpsertOutcome::Refreshed);

        let event = table.find(1, WARN).unwrap();
        assert_eq!(event.first_seen_ms, 1_000);
        assert_eq!(event.last_seen_ms, 2_000);
        assert_eq!(event.occurrence_count, 2);
        assert_eq!(event.severity, Severity::Warning);
        assert!(event.active);
    }

    #[test]
    fn test_zero_key_rejected() {
        let mut table = HmsTable::default();
        assert_eq!(table.upsert(0, 0, 10), UpsertOutcome::Rejected);
        assert_eq!(table.count_active_total(), 0);
    }

    #[test]
    fn test_ttl_expiry() {
        let mut table = HmsTable::default();
        table.upsert(1, FATAL, 0);
        assert_eq!(table.expire(20_000), 0);
        assert_eq!(table.top_severity(), Severity::Fatal);

        assert_eq!(table.expire(20_001), 1);
        assert!(!table.find(1, FATAL).unwrap().active);
        assert_eq!(table.top_severity(), Severity::None);
        assert_eq!(table.count_active_total(), 0);

        // Later expiry passes do not bring it back.
        table.expire(40_000);
        assert_eq!(table.top_severity(), Severity::None);
    }

    #[test]
    fn test_expired_fault_keeps_history_on_reactivation() {
        let mut table = HmsTable::default();
        table.upsert(7, WARN, 0);
        table.expire(30_000);
        assert_eq!(table.upsert(7, WARN, 31_000), UpsertOutcome::Reactivated);
        let event = table.find(7, WARN).unwrap();
        assert_eq!(event.first_seen_ms, 0);
        assert_eq!(event.occurrence_count, 2);
        assert!(event.active);
    }

    #[test]
    fn test_eviction_prefers_oldest_inactive() {
        let mut table = filled_table(0);
        // Everything except slot 3 is refreshed, so only slot 3 expires.
        for i in 0..HMS_CAPACITY as u32 {
            if i != 3 {
                table.upsert(0x0100 + i, WARN, 30_000);
            }
        }
        table.expire(30_000);
        assert!(!table.find(0x0103, WARN).unwrap().active);

        let outcome = table.upsert(0x0999, FATAL, 30_500);
        assert_eq!(outcome, UpsertOutcome::Evicted(HmsCode::new(0x0103, WARN)));
        assert!(table.find(0x0103, WARN).is_none());
        assert_eq!(table.count_active_total(), HMS_CAPACITY);
    }

    #[test]
    fn test_eviction_falls_back_to_globally_oldest() {
        let mut table = filled_table(1_000);
        assert_eq!(table.count_active_total(), HMS_CAPACITY);

        let outcome = table.upsert(0x0999, INFO, 5_000);
        assert_eq!(outcome, UpsertOutcome::Evicted(HmsCode::new(0x0100, WARN)));

        let event = table.find(0x0999, INFO).unwrap();
        assert_eq!(event.occurrence_count, 1);
        assert_eq!(event.first_seen_ms, 5_000);

        // The evicted fault comes back as a fresh event.
        let outcome = table.upsert(0x0100, WARN, 6_000);
        assert_eq!(outcome, UpsertOutcome::Evicted(HmsCode::new(0x0101, WARN)));
        let event = table.find(0x0100, WARN).unwrap();
        assert_eq!(event.occurrence_count, 1);
        assert_eq!(event.first_seen_ms, 6_000);
    }

    #[test]
    fn test_counts_and_snapshot() {
        let mut table = HmsTable::default();
        table.upsert(1, WARN, 0);
        table.upsert(2, WARN, 0);
        table.upsert(3, INFO, 0);
        table.upsert(4, FATAL, 15_000);
        table.expire(25_000);

        assert_eq!(table.count_active(Severity::Warning), 0);
        assert_eq!(table.count_active(Severity::Fatal), 1);
        assert_eq!(table.count_active_total(), 1);
        assert!(table.has_problem());

        let snapshot = table.active_snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].key, HmsCode::new(4, FATAL));
    }

    #[test]
    fn test_info_only_is_not_a_problem() {
        let mut table = HmsTable::default();
        table.upsert(1, INFO, 0);
        assert_eq!(table.top_severity(), Severity::Info);
        assert!(!table.has_problem());
    }
}
