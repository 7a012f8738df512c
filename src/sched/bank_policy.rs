//! Composable bank-selection comparators for the per-bank scheduler

use std::cmp::Ordering;

use rand::Rng;

/// Per-bank facts the comparators order by
#[derive(Clone, Copy, Debug, Default)]
pub struct BankInfo {
    pub bank_id: u32,
    /// Enqueue cycle of the head transaction, 0 when the queue is empty
    pub age: u64,
    pub queue_size: u32,
    /// Queued transactions of the head's kind targeting the head's row
    pub consecutive_hits: u32,
}

#[derive(Debug)]
enum Comparator {
    Random { weights: Vec<u32> },
    RoundRobin { next: u32, banks: u32 },
    OldestFirst,
    YoungestFirst,
    MoreConsecutiveHitsFirst,
    LessConsecutiveHitsFirst,
    MorePendingRequestsFirst,
    LessPendingRequestsFirst,
    ZeroPendingFirst,
}

impl Comparator {
    /// Refreshes per-sort state; called once before each sort
    fn update(&mut self) {
        match self {
            Comparator::Random { weights } => {
                let mut rng = rand::thread_rng();
                for weight in weights.iter_mut() {
                    *weight = rng.gen();
                }
            }
            Comparator::RoundRobin { next, banks } => {
                *next = (*next + 1) % *banks;
            }
            _ => {}
        }
    }

    fn compare(&self, a: &BankInfo, b: &BankInfo) -> Ordering {
        match self {
            Comparator::Random { weights } => {
                weights[a.bank_id as usize].cmp(&weights[b.bank_id as usize])
            }
            Comparator::RoundRobin { next, banks } => {
                let da = (a.bank_id + banks - next) % banks;
                let db = (b.bank_id + banks - next) % banks;
                da.cmp(&db)
            }
            Comparator::OldestFirst => a.age.cmp(&b.age),
            Comparator::YoungestFirst => b.age.cmp(&a.age),
            Comparator::MoreConsecutiveHitsFirst => b.consecutive_hits.cmp(&a.consecutive_hits),
            Comparator::LessConsecutiveHitsFirst => a.consecutive_hits.cmp(&b.consecutive_hits),
            Comparator::MorePendingRequestsFirst => b.queue_size.cmp(&a.queue_size),
            Comparator::LessPendingRequestsFirst => a.queue_size.cmp(&b.queue_size),
            Comparator::ZeroPendingFirst => {
                let za = a.queue_size == 0;
                let zb = b.queue_size == 0;
                zb.cmp(&za)
            }
        }
    }
}

/// A pipeline of comparators applied as tie-breakers: the first comparator
/// that yields a strict ordering decides.
///
/// Built from a textual definition, e.g.
/// `"MORE_CONSECUTIVE_HITS OLDEST_FIRST RANDOM"`.
#[derive(Debug)]
pub struct BankSelectionPolicy {
    comparators: Vec<Comparator>,
}

impl BankSelectionPolicy {
    /// # Panics
    ///
    /// Panics on an empty definition or an unknown policy name
    pub fn parse(definition: &str, banks: u32) -> BankSelectionPolicy {
        let mut comparators = Vec::new();
        for token in definition.split_whitespace() {
            let comparator = match token {
                "RANDOM" => Comparator::Random {
                    weights: vec![0; banks as usize],
                },
                "ROUND_ROBIN" => Comparator::RoundRobin { next: banks - 1, banks },
                "OLDEST_FIRST" => Comparator::OldestFirst,
                "YOUNGEST_FIRST" => Comparator::YoungestFirst,
                "MORE_CONSECUTIVE_HITS" => Comparator::MoreConsecutiveHitsFirst,
                "LESS_CONSECUTIVE_HITS" => Comparator::LessConsecutiveHitsFirst,
                "MORE_PENDING_REQUESTS" => Comparator::MorePendingRequestsFirst,
                "LESS_PENDING_REQUESTS" => Comparator::LessPendingRequestsFirst,
                "ZERO_PENDING_FIRST" => Comparator::ZeroPendingFirst,
                unknown => panic!("unknown bank selection policy '{}'", unknown),
            };
            comparators.push(comparator);
        }
        assert!(
            !comparators.is_empty(),
            "bank selection policy definition cannot be empty"
        );
        BankSelectionPolicy { comparators }
    }

    /// Sorts the banks by descending priority. The sort is stable, so
    /// unresolved ties keep bank-id order.
    pub fn sort_banks(&mut self, infos: &mut [BankInfo]) {
        for comparator in &mut self.comparators {
            comparator.update();
        }
        let comparators = &self.comparators;
        infos.sort_by(|a, b| {
            for comparator in comparators {
                match comparator.compare(a, b) {
                    Ordering::Equal => continue,
                    decided => return decided,
                }
            }
            Ordering::Equal
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn infos() -> Vec<BankInfo> {
        vec![
            BankInfo { bank_id: 0, age: 30, queue_size: 2, consecutive_hits: 1 },
            BankInfo { bank_id: 1, age: 10, queue_size: 0, consecutive_hits: 0 },
            BankInfo { bank_id: 2, age: 20, queue_size: 5, consecutive_hits: 3 },
        ]
    }

    fn order(infos: &[BankInfo]) -> Vec<u32> {
        infos.iter().map(|i| i.bank_id).collect()
    }

    #[test]
    fn oldest_first_orders_by_age() {
        let mut policy = BankSelectionPolicy::parse("OLDEST_FIRST", 3);
        let mut infos = infos();
        policy.sort_banks(&mut infos);
        assert_eq!(order(&infos), vec![1, 2, 0]);
    }

    #[test]
    fn hits_break_ties_before_age() {
        let mut policy = BankSelectionPolicy::parse("MORE_CONSECUTIVE_HITS OLDEST_FIRST", 3);
        let mut infos = infos();
        infos[0].consecutive_hits = 3;
        policy.sort_banks(&mut infos);
        // banks 0 and 2 tie on hits, age decides between them
        assert_eq!(order(&infos), vec![2, 0, 1]);
    }

    #[test]
    fn zero_pending_classifies_in_two_groups() {
        let mut policy = BankSelectionPolicy::parse("ZERO_PENDING_FIRST OLDEST_FIRST", 3);
        let mut infos = infos();
        policy.sort_banks(&mut infos);
        assert_eq!(order(&infos), vec![1, 2, 0]);
    }

    #[test]
    fn round_robin_rotates_the_start_bank() {
        let mut policy = BankSelectionPolicy::parse("ROUND_ROBIN", 3);
        let mut infos = infos();
        policy.sort_banks(&mut infos);
        assert_eq!(order(&infos), vec![0, 1, 2]);
        let mut infos2 = infos;
        policy.sort_banks(&mut infos2);
        assert_eq!(order(&infos2), vec![1, 2, 0]);
    }

    #[test]
    #[should_panic(expected = "unknown bank selection policy")]
    fn unknown_policy_is_fatal() {
        let _ = BankSelectionPolicy::parse("NEWEST_FIRST", 2);
    }
}
