//! Read-versus-write operation mode arbitration

use super::SwitchModePolicy;

/// Decides whether the scheduler is in read or write mode.
///
/// `update` must be called with the current candidate situation before
/// `reading` is consulted for a selection.
#[derive(Debug)]
pub enum SwitchMode {
    /// Each mode has a consecutive-operation budget; switch when the
    /// current kind runs dry or the budget is spent and the other kind
    /// has candidates
    TwoCounters {
        max_reads: u32,
        max_writes: u32,
        reading: bool,
        consecutive_ops: u32,
    },
    /// Default to reads; switch to writes only when no reads exist, and
    /// back as soon as a read exists and the pending write misses its row
    LoadsOverStores { reading: bool },
}

impl SwitchMode {
    pub fn new(policy: SwitchModePolicy, max_reads: u32, max_writes: u32) -> SwitchMode {
        match policy {
            SwitchModePolicy::TwoCounters => SwitchMode::TwoCounters {
                max_reads,
                max_writes,
                reading: true,
                consecutive_ops: 0,
            },
            SwitchModePolicy::LoadsOverStores => SwitchMode::LoadsOverStores { reading: true },
            SwitchModePolicy::SwitchOnMiss | SwitchModePolicy::MinSwitches => {
                panic!("switch-mode policy {:?} is not implemented", policy)
            }
        }
    }

    pub fn reading(&self) -> bool {
        match self {
            SwitchMode::TwoCounters { reading, .. } => *reading,
            SwitchMode::LoadsOverStores { reading } => *reading,
        }
    }

    pub fn writing(&self) -> bool {
        !self.reading()
    }

    pub fn update(
        &mut self,
        reads_exist: bool,
        writes_exist: bool,
        read_is_hit: bool,
        write_is_hit: bool,
    ) {
        assert!(
            reads_exist || !read_is_hit,
            "no read candidate exists but a read hit is flagged"
        );
        assert!(
            writes_exist || !write_is_hit,
            "no write candidate exists but a write hit is flagged"
        );

        match self {
            SwitchMode::TwoCounters {
                max_reads,
                max_writes,
                reading,
                consecutive_ops,
            } => {
                if !reads_exist && !writes_exist {
                    return;
                }
                if *reading {
                    if !reads_exist || (*consecutive_ops >= *max_reads && writes_exist) {
                        *consecutive_ops = 0;
                        *reading = false;
                    }
                } else if !writes_exist || (*consecutive_ops >= *max_writes && reads_exist) {
                    *consecutive_ops = 0;
                    *reading = true;
                }

                // Continuing past a spent budget restarts the count
                if *reading && *consecutive_ops == *max_reads {
                    *consecutive_ops = 0;
                } else if !*reading && *consecutive_ops == *max_writes {
                    *consecutive_ops = 0;
                }
                *consecutive_ops += 1;
            }
            SwitchMode::LoadsOverStores { reading } => {
                if *reading {
                    if !reads_exist && writes_exist {
                        *reading = false;
                    }
                } else if reads_exist && !write_is_hit {
                    *reading = true;
                }
            }
        }
    }

    /// Operations left in the current mode's budget
    pub fn remaining_ops(&self) -> u32 {
        match self {
            SwitchMode::TwoCounters {
                max_reads,
                max_writes,
                reading,
                consecutive_ops,
            } => {
                if *reading {
                    max_reads - consecutive_ops
                } else {
                    max_writes - consecutive_ops
                }
            }
            SwitchMode::LoadsOverStores { .. } => u32::MAX,
        }
    }

    pub fn max_consecutive_reads(&self) -> u32 {
        match self {
            SwitchMode::TwoCounters { max_reads, .. } => *max_reads,
            SwitchMode::LoadsOverStores { .. } => u32::MAX,
        }
    }

    pub fn max_consecutive_writes(&self) -> u32 {
        match self {
            SwitchMode::TwoCounters { max_writes, .. } => *max_writes,
            SwitchMode::LoadsOverStores { .. } => u32::MAX,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_counters_switch_when_budget_is_spent() {
        let mut sm = SwitchMode::new(SwitchModePolicy::TwoCounters, 2, 2);
        assert!(sm.reading());
        sm.update(true, true, false, false);
        assert!(sm.reading());
        sm.update(true, true, false, false);
        assert!(sm.reading());
        // budget of two reads spent, writes waiting
        sm.update(true, true, false, false);
        assert!(sm.writing());
    }

    #[test]
    fn two_counters_switch_when_mode_runs_dry() {
        let mut sm = SwitchMode::new(SwitchModePolicy::TwoCounters, 4, 4);
        sm.update(false, true, false, false);
        assert!(sm.writing());
        sm.update(true, false, false, false);
        assert!(sm.reading());
    }

    #[test]
    fn two_counters_reset_when_no_alternative_exists() {
        let mut sm = SwitchMode::new(SwitchModePolicy::TwoCounters, 1, 1);
        sm.update(true, false, false, false);
        sm.update(true, false, false, false);
        // no writes ever showed up, reads keep flowing
        assert!(sm.reading());
    }

    #[test]
    fn loads_over_stores_prefers_reads() {
        let mut sm = SwitchMode::new(SwitchModePolicy::LoadsOverStores, 0, 0);
        sm.update(true, true, false, true);
        assert!(sm.reading());
        sm.update(false, true, false, true);
        assert!(sm.writing());
        // writes keep hitting the open row, stay on writes
        sm.update(true, true, false, true);
        assert!(sm.writing());
        // the pending write misses and a read exists: back to reads
        sm.update(true, true, false, false);
        assert!(sm.reading());
    }

    #[test]
    #[should_panic(expected = "not implemented")]
    fn reserved_policies_are_rejected() {
        let _ = SwitchMode::new(SwitchModePolicy::SwitchOnMiss, 1, 1);
    }
}
