//! Attribute delta optimisation.
//!
//! When enabled, the sender strips attributes that are byte-identical
//! (value and traits) to the last transmission for the same UEID, so
//! steady-state entities cost almost nothing on the wire. Every N cycles
//! the full attribute set goes out again as a refresh; each UEID's cycle
//! counter starts at a uniformly random offset in `[0, N)` so the refreshes
//! of a large fleet of entities smear across cycles instead of spiking
//! together.

use std::collections::HashMap;

use rand::Rng;

use entityd_core::{EntityUpdate, Ueid, UpdateAttr};

pub(crate) struct StreamOptimiser {
    frequency: u32,
    cycles: HashMap<Ueid, u32>,
    seen: HashMap<Ueid, HashMap<String, UpdateAttr>>,
}

impl StreamOptimiser {
    pub(crate) fn new(frequency: u32) -> Self {
        StreamOptimiser {
            frequency: frequency.max(1),
            cycles: HashMap::new(),
            seen: HashMap::new(),
        }
    }

    /// Strips unchanged attributes from `update`, in place.
    ///
    /// Attributes are kept when they are new, changed (different value or
    /// traits) or deleted. On a refresh cycle the remembered baseline is
    /// cleared first, so everything counts as new and the full set goes
    /// out. A tombstone forgets its UEID's baseline entirely; the next
    /// sighting, if any, is sent in full.
    pub(crate) fn apply(&mut self, update: &mut EntityUpdate) {
        let ueid = update.ueid();
        let optimise = self.next_cycle(ueid);

        let seen = self.seen.entry(ueid).or_default();
        if !optimise {
            seen.clear();
        }

        let mut keep: Vec<String> = update.attrs.deleted().map(str::to_string).collect();
        for (name, attr) in update.attrs.iter() {
            if seen.get(name) != Some(attr) {
                keep.push(name.to_string());
            }
        }

        for (name, attr) in update.attrs.iter() {
            seen.insert(name.to_string(), attr.clone());
        }
        for name in update.attrs.deleted().map(str::to_string).collect::<Vec<_>>() {
            seen.remove(&name);
        }

        let drop: Vec<String> = update
            .attrs
            .iter()
            .map(|(name, _)| name.to_string())
            .filter(|name| !keep.contains(name))
            .collect();
        for name in &drop {
            update.attrs.clear(name);
        }

        if !update.exists() {
            self.seen.remove(&ueid);
        }
    }

    /// Advances the UEID's cycle counter.
    ///
    /// Returns false — send everything — once the counter reaches the
    /// refresh frequency, resetting it; true otherwise. First sightings
    /// seed the counter randomly to smear refreshes across UEIDs.
    fn next_cycle(&mut self, ueid: Ueid) -> bool {
        let frequency = self.frequency;
        let counter = self
            .cycles
            .entry(ueid)
            .or_insert_with(|| rand::thread_rng().gen_range(0..frequency));
        *counter += 1;
        if *counter >= frequency {
            *counter = 0;
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use entityd_core::traits;

    use super::*;

    fn host(state: &str) -> EntityUpdate {
        let mut update = EntityUpdate::new("Host");
        update.attrs.set("fqdn", "h1", &[traits::ENTITY_ID]);
        update.attrs.set("state", state, &[]);
        update
    }

    fn attr_count(update: &EntityUpdate) -> usize {
        update.attrs.iter().count()
    }

    /// Pins the UEID's cycle counter so the next apply is never a refresh.
    fn pin(optimiser: &mut StreamOptimiser, update: &EntityUpdate) {
        optimiser.cycles.insert(update.ueid(), 0);
    }

    #[test]
    fn refreshes_smear_but_hit_the_frequency() {
        // Twenty sightings at N=5 must produce 4 or 5 full transmissions
        // (one extra when the very first cycle is not itself a refresh).
        let mut optimiser = StreamOptimiser::new(5);
        let mut full = 0;
        for _ in 0..20 {
            let mut update = host("up");
            optimiser.apply(&mut update);
            match attr_count(&update) {
                2 => full += 1,
                0 => {}
                n => panic!("partial transmission of {n} attributes"),
            }
        }
        assert!((4..=5).contains(&full), "{full} full transmissions");
    }

    #[test]
    fn changed_attributes_always_go_out() {
        let mut optimiser = StreamOptimiser::new(100);
        let mut first = host("up");
        pin(&mut optimiser, &first);
        optimiser.apply(&mut first);

        let mut second = host("down");
        pin(&mut optimiser, &second);
        optimiser.apply(&mut second);
        assert!(second.attrs.get("state").is_some());
        // The unchanged identity attribute is stripped.
        assert!(second.attrs.get("fqdn").is_none());

        let mut third = host("down");
        pin(&mut optimiser, &third);
        optimiser.apply(&mut third);
        assert_eq!(attr_count(&third), 0);
    }

    #[test]
    fn trait_changes_count_as_changes() {
        let mut optimiser = StreamOptimiser::new(100);
        let mut first = host("up");
        pin(&mut optimiser, &first);
        optimiser.apply(&mut first);

        let mut second = host("up");
        second.attrs.set("state", "up", &[traits::INDEX]);
        pin(&mut optimiser, &second);
        optimiser.apply(&mut second);
        assert!(second.attrs.get("state").is_some());
    }

    #[test]
    fn deleted_attributes_always_go_out() {
        let mut optimiser = StreamOptimiser::new(100);
        let mut first = host("up");
        pin(&mut optimiser, &first);
        optimiser.apply(&mut first);

        let mut second = host("up");
        second.attrs.delete("state");
        pin(&mut optimiser, &second);
        optimiser.apply(&mut second);
        assert!(second.attrs.is_deleted("state"));

        // Deletion also forgets the baseline, so a reappearing value is sent.
        let mut third = host("up");
        pin(&mut optimiser, &third);
        optimiser.apply(&mut third);
        assert!(third.attrs.get("state").is_some());
    }

    #[test]
    fn tombstone_forgets_the_baseline() {
        let mut optimiser = StreamOptimiser::new(100);
        let mut first = host("up");
        optimiser.apply(&mut first);

        let mut tombstone = host("up");
        tombstone.delete();
        optimiser.apply(&mut tombstone);

        let mut revived = host("up");
        optimiser.apply(&mut revived);
        assert_eq!(attr_count(&revived), 2);
    }

    #[test]
    fn frequency_of_one_never_optimises() {
        let mut optimiser = StreamOptimiser::new(1);
        for _ in 0..3 {
            let mut update = host("up");
            optimiser.apply(&mut update);
            assert_eq!(attr_count(&update), 2);
        }
    }
}
