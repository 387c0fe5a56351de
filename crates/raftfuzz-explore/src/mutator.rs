//! Schedule mutation — derives descendant schedules from successful ones.
//!
//! A mutator is a unary operator `(schedule, observed events) → Option<schedule>`.
//! It either produces a freshly-allocated candidate descendant or refuses
//! (`None`, reserved for pathological inputs like an empty schedule). The
//! driver uses [`CombinedMutator`], which picks one concrete mutator
//! uniformly at random per call. Every mutator is deterministic given its
//! seeded RNG and reads nothing beyond its two arguments.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use raftfuzz_model::{Choice, EventTrace, Trace};

/// A schedule mutation operator.
pub trait Mutator {
    /// Produce a candidate descendant, or refuse.
    fn mutate(&mut self, schedule: &Trace, events: &EventTrace) -> Option<Trace>;
}

/// Re-assigns the node of each `Crash` choice with a fixed probability.
pub struct SwapCrashNodeMutator {
    swap_prob: f64,
    num_nodes: u32,
    rng: ChaCha8Rng,
}

impl SwapCrashNodeMutator {
    pub fn new(swap_prob: f64, num_nodes: u32, seed: u64) -> Self {
        Self {
            swap_prob,
            num_nodes,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }
}

impl Mutator for SwapCrashNodeMutator {
    fn mutate(&mut self, schedule: &Trace, _events: &EventTrace) -> Option<Trace> {
        if schedule.is_empty() {
            return None;
        }

        let mut descendant = schedule.clone();
        for choice in descendant.choices_mut() {
            if let Choice::Crash { node, .. } = choice {
                if self.rng.gen_bool(self.swap_prob) {
                    *node = self.rng.gen_range(1..=self.num_nodes);
                }
            }
        }
        Some(descendant)
    }
}

/// Re-assigns `from`/`to` of a handful of random `DeliverEdge` choices.
pub struct SwapNodeMutator {
    num_swaps: usize,
    num_nodes: u32,
    rng: ChaCha8Rng,
}

impl SwapNodeMutator {
    pub fn new(num_swaps: usize, num_nodes: u32, seed: u64) -> Self {
        Self {
            num_swaps,
            num_nodes,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }
}

impl Mutator for SwapNodeMutator {
    fn mutate(&mut self, schedule: &Trace, _events: &EventTrace) -> Option<Trace> {
        if schedule.is_empty() {
            return None;
        }

        let mut descendant = schedule.clone();
        let deliver_indices: Vec<usize> = descendant
            .choices()
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_deliver())
            .map(|(i, _)| i)
            .collect();
        if deliver_indices.is_empty() {
            return Some(descendant);
        }

        for _ in 0..self.num_swaps {
            let target = deliver_indices[self.rng.gen_range(0..deliver_indices.len())];
            if let Choice::DeliverEdge { from, to, .. } = &mut descendant.choices_mut()[target] {
                // Swap the source, the destination, or both.
                match self.rng.gen_range(0..3) {
                    0 => *from = self.rng.gen_range(1..=self.num_nodes),
                    1 => *to = self.rng.gen_range(1..=self.num_nodes),
                    _ => {
                        *from = self.rng.gen_range(1..=self.num_nodes);
                        *to = self.rng.gen_range(1..=self.num_nodes);
                    }
                }
            }
        }
        Some(descendant)
    }
}

/// Re-assigns `max_messages` of a handful of random `DeliverEdge` choices.
pub struct SwapMaxMessagesMutator {
    num_swaps: usize,
    max_messages: usize,
    rng: ChaCha8Rng,
}

impl SwapMaxMessagesMutator {
    pub fn new(num_swaps: usize, max_messages: usize, seed: u64) -> Self {
        Self {
            num_swaps,
            max_messages,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }
}

impl Mutator for SwapMaxMessagesMutator {
    fn mutate(&mut self, schedule: &Trace, _events: &EventTrace) -> Option<Trace> {
        if schedule.is_empty() {
            return None;
        }

        let mut descendant = schedule.clone();
        let deliver_indices: Vec<usize> = descendant
            .choices()
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_deliver())
            .map(|(i, _)| i)
            .collect();
        if deliver_indices.is_empty() {
            return Some(descendant);
        }

        for _ in 0..self.num_swaps {
            let target = deliver_indices[self.rng.gen_range(0..deliver_indices.len())];
            if let Choice::DeliverEdge { max_messages, .. } = &mut descendant.choices_mut()[target]
            {
                *max_messages = self.rng.gen_range(0..self.max_messages);
            }
        }
        Some(descendant)
    }
}

/// Picks one of the underlying mutators uniformly at random and delegates.
pub struct CombinedMutator {
    mutators: Vec<Box<dyn Mutator + Send>>,
    rng: ChaCha8Rng,
}

impl CombinedMutator {
    pub fn new(mutators: Vec<Box<dyn Mutator + Send>>, seed: u64) -> Self {
        Self {
            mutators,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// The driver's standard combination: crash-node, node, and
    /// max-messages swaps, with RNG streams derived from `seed`.
    pub fn standard(num_nodes: u32, max_messages: usize, seed: u64) -> Self {
        Self::new(
            vec![
                Box::new(SwapCrashNodeMutator::new(1.0, num_nodes, seed.wrapping_add(1))),
                Box::new(SwapNodeMutator::new(20, num_nodes, seed.wrapping_add(2))),
                Box::new(SwapMaxMessagesMutator::new(
                    20,
                    max_messages,
                    seed.wrapping_add(3),
                )),
            ],
            seed,
        )
    }
}

impl Mutator for CombinedMutator {
    fn mutate(&mut self, schedule: &Trace, events: &EventTrace) -> Option<Trace> {
        if self.mutators.is_empty() {
            return None;
        }
        let pick = self.rng.gen_range(0..self.mutators.len());
        self.mutators[pick].mutate(schedule, events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule(horizon: usize, crashes: &[(usize, u32)]) -> Trace {
        let mut trace = Trace::new();
        for step in 0..horizon {
            trace.add(Choice::DeliverEdge {
                step,
                from: 1,
                to: 2,
                max_messages: 5,
            });
        }
        for &(step, node) in crashes {
            trace.add(Choice::Crash { step, node });
        }
        trace
    }

    #[test]
    fn all_refuse_empty_schedule() {
        let empty = Trace::new();
        let events = EventTrace::new();

        assert!(SwapCrashNodeMutator::new(1.0, 3, 0)
            .mutate(&empty, &events)
            .is_none());
        assert!(SwapNodeMutator::new(20, 3, 0).mutate(&empty, &events).is_none());
        assert!(SwapMaxMessagesMutator::new(20, 10, 0)
            .mutate(&empty, &events)
            .is_none());
        assert!(CombinedMutator::standard(3, 10, 0)
            .mutate(&empty, &events)
            .is_none());
    }

    #[test]
    fn swap_crash_node_rewrites_every_crash() {
        let base = schedule(5, &[(0, 1), (2, 1), (4, 1)]);
        let events = EventTrace::new();
        let mut mutator = SwapCrashNodeMutator::new(1.0, 3, 42);

        let descendant = mutator.mutate(&base, &events).unwrap();

        // Probability 1: every crash node re-rolled into range.
        for choice in descendant.choices() {
            if let Choice::Crash { node, .. } = choice {
                assert!((1..=3).contains(node));
            }
        }
        // Deliver choices untouched.
        assert_eq!(descendant.choices()[..5], base.choices()[..5]);
        // The original is unchanged.
        assert_eq!(base, schedule(5, &[(0, 1), (2, 1), (4, 1)]));
    }

    #[test]
    fn swap_node_only_touches_deliver_choices() {
        let base = schedule(10, &[(3, 2)]);
        let events = EventTrace::new();
        let mut mutator = SwapNodeMutator::new(20, 3, 7);

        let descendant = mutator.mutate(&base, &events).unwrap();
        assert_eq!(descendant.len(), base.len());

        for (old, new) in base.choices().iter().zip(descendant.choices()) {
            match (old, new) {
                (Choice::Crash { .. }, _) => assert_eq!(old, new),
                (
                    Choice::DeliverEdge {
                        step: s1,
                        max_messages: m1,
                        ..
                    },
                    Choice::DeliverEdge {
                        step: s2,
                        from,
                        to,
                        max_messages: m2,
                    },
                ) => {
                    assert_eq!(s1, s2);
                    assert_eq!(m1, m2);
                    assert!((1..=3).contains(from));
                    assert!((1..=3).contains(to));
                }
                _ => panic!("choice kind changed"),
            }
        }
        // With 20 swaps over 10 edges, something moved.
        assert_ne!(descendant, base);
    }

    #[test]
    fn swap_max_messages_stays_in_range() {
        let base = schedule(10, &[]);
        let events = EventTrace::new();
        let mut mutator = SwapMaxMessagesMutator::new(20, 8, 9);

        let descendant = mutator.mutate(&base, &events).unwrap();
        for choice in descendant.choices() {
            if let Choice::DeliverEdge { max_messages, .. } = choice {
                assert!(*max_messages < 8);
            }
        }
        assert_ne!(descendant, base);
    }

    #[test]
    fn mutators_are_deterministic() {
        let base = schedule(10, &[(1, 2), (5, 3)]);
        let events = EventTrace::new();

        let a = CombinedMutator::standard(3, 10, 99)
            .mutate(&base, &events)
            .unwrap();
        let b = CombinedMutator::standard(3, 10, 99)
            .mutate(&base, &events)
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn combined_draws_from_all_strategies() {
        let base = schedule(10, &[(1, 2)]);
        let events = EventTrace::new();
        let mut combined = CombinedMutator::standard(5, 10, 123);

        let mut max_messages_changed = false;
        let mut edges_changed = false;
        for _ in 0..50 {
            let descendant = combined.mutate(&base, &events).unwrap();
            for (old, new) in base.choices().iter().zip(descendant.choices()) {
                if let (
                    Choice::DeliverEdge {
                        from: f1,
                        to: t1,
                        max_messages: m1,
                        ..
                    },
                    Choice::DeliverEdge {
                        from: f2,
                        to: t2,
                        max_messages: m2,
                        ..
                    },
                ) = (old, new)
                {
                    if m1 != m2 {
                        max_messages_changed = true;
                    }
                    if f1 != f2 || t1 != t2 {
                        edges_changed = true;
                    }
                }
            }
        }
        assert!(max_messages_changed);
        assert!(edges_changed);
    }
}
