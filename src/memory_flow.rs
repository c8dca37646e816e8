//! Memory-Flow Derivations (spec §4.9): pure functions over a Metric
//! Record that turn raw sector/hit-rate counters into byte-traffic and
//! conflict figures. Each returns a small, independently serializable
//! record; the join phase attaches whichever of these a detector needs.

use serde::Serialize;

use crate::metrics::MetricRecord;

const BYTES_PER_SECTOR: f64 = 32.0;

#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadFlow {
    pub global_to_l1_ld_bytes: f64,
    pub global_to_l1_st_bytes: f64,
    pub l1_to_l2_ld_bytes: f64,
    pub l1_to_l2_st_bytes: f64,
    pub local_to_l1_ld_bytes: f64,
    pub local_to_l1_st_bytes: f64,
    pub l1_to_l2_local_ld_bytes: f64,
    pub l1_to_l2_local_st_bytes: f64,
    pub l2_to_dram_ld_bytes: f64,
    pub l2_to_dram_st_bytes: f64,
}

fn l1_to_l2(bytes: f64, hit_rate_pct: f64) -> f64 {
    bytes * (1.0 - hit_rate_pct / 100.0)
}

/// spec §4.9 *load-flow*: global-to-L1 bytes = 32*sectors; L1-to-L2 bytes
/// = that * (1 - hit_rate/100); local-memory variants analogous;
/// L2-to-DRAM bytes = (L1-to-L2 global + L1-to-L2 local) * (1 - L2_hit/100).
pub fn load_flow(m: &MetricRecord) -> LoadFlow {
    let global_to_l1_ld_bytes = BYTES_PER_SECTOR * m.sectors_global_ld;
    let global_to_l1_st_bytes = BYTES_PER_SECTOR * m.sectors_global_st;
    let local_to_l1_ld_bytes = BYTES_PER_SECTOR * m.sectors_local_ld;
    let local_to_l1_st_bytes = BYTES_PER_SECTOR * m.sectors_local_st;

    let l1_to_l2_ld_bytes = l1_to_l2(global_to_l1_ld_bytes, m.sectors_global_ld_hit_rate);
    let l1_to_l2_st_bytes = l1_to_l2(global_to_l1_st_bytes, m.sectors_global_st_hit_rate);
    let l1_to_l2_local_ld_bytes = l1_to_l2(local_to_l1_ld_bytes, m.sectors_local_ld_hit_rate);
    let l1_to_l2_local_st_bytes = l1_to_l2(local_to_l1_st_bytes, m.sectors_local_st_hit_rate);

    let l2_to_dram_ld_bytes = l1_to_l2(l1_to_l2_ld_bytes + l1_to_l2_local_ld_bytes, m.l2_sectors_read_hit_rate);
    let l2_to_dram_st_bytes = l1_to_l2(l1_to_l2_st_bytes + l1_to_l2_local_st_bytes, m.l2_sectors_write_hit_rate);

    LoadFlow {
        global_to_l1_ld_bytes,
        global_to_l1_st_bytes,
        l1_to_l2_ld_bytes,
        l1_to_l2_st_bytes,
        local_to_l1_ld_bytes,
        local_to_l1_st_bytes,
        l1_to_l2_local_ld_bytes,
        l1_to_l2_local_st_bytes,
        l2_to_dram_ld_bytes,
        l2_to_dram_st_bytes,
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AtomicFlow {
    pub global_to_l1_bytes: f64,
    pub l1_to_l2_bytes: f64,
    pub l2_to_dram_bytes: f64,
}

/// spec §4.9 *atomic-flow*: combines red+atom sectors with their hit-rates
/// through L1 and L2 identically to load-flow.
pub fn atomic_flow(m: &MetricRecord) -> AtomicFlow {
    let global_to_l1_bytes = BYTES_PER_SECTOR * (m.sectors_global_atom + m.sectors_global_red);
    let l1_hit_rate = if m.sectors_global_atom + m.sectors_global_red > 0.0 {
        (m.sectors_global_atom_hit_rate * m.sectors_global_atom
            + m.sectors_global_red_hit_rate * m.sectors_global_red)
            / (m.sectors_global_atom + m.sectors_global_red)
    } else {
        0.0
    };
    let l1_to_l2_bytes = l1_to_l2(global_to_l1_bytes, l1_hit_rate);
    let l2_bytes = BYTES_PER_SECTOR * (m.l2_sectors_atom + m.l2_sectors_red);
    let l2_hit_rate = if m.l2_sectors_atom + m.l2_sectors_red > 0.0 {
        (m.l2_sectors_atom_hit_rate * m.l2_sectors_atom + m.l2_sectors_red_hit_rate * m.l2_sectors_red)
            / (m.l2_sectors_atom + m.l2_sectors_red)
    } else {
        0.0
    };
    let l2_to_dram_bytes = l1_to_l2(l1_to_l2_bytes.max(l2_bytes), l2_hit_rate);

    AtomicFlow {
        global_to_l1_bytes,
        l1_to_l2_bytes,
        l2_to_dram_bytes,
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TextureFlow {
    pub global_to_l1_bytes: f64,
    pub l1_to_l2_bytes: f64,
    pub l2_to_dram_bytes: f64,
}

/// spec §4.9 *texture-flow*: same pattern with texture-specific sector and
/// hit-rate fields.
pub fn texture_flow(m: &MetricRecord) -> TextureFlow {
    let global_to_l1_bytes = BYTES_PER_SECTOR * m.sectors_texture;
    let l1_to_l2_bytes = l1_to_l2(global_to_l1_bytes, m.sectors_texture_hit_rate);
    let l2_bytes = BYTES_PER_SECTOR * m.l2_sectors_texture;
    let l2_to_dram_bytes = l1_to_l2(l1_to_l2_bytes.max(l2_bytes), m.l2_sectors_texture_hit_rate);

    TextureFlow {
        global_to_l1_bytes,
        l1_to_l2_bytes,
        l2_to_dram_bytes,
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SharedFlow {
    pub shared_load_instruction_count: f64,
}

/// spec §4.9 *shared-flow*: simply reports the shared-load instruction
/// count.
pub fn shared_flow(m: &MetricRecord) -> SharedFlow {
    SharedFlow {
        shared_load_instruction_count: m.shared_inst_executed_ld,
    }
}

/// spec §4.9 *bank-conflict*: `floor(shared_wavefronts_ld /
/// shared_inst_executed_ld)`. 1 means no conflict, n>1 means n-way
/// conflict, 0 is reported when no shared requests occurred.
pub fn bank_conflict(m: &MetricRecord) -> u64 {
    if m.shared_inst_executed_ld <= 0.0 {
        return 0;
    }
    (m.shared_wavefronts_ld / m.shared_inst_executed_ld).floor() as u64
}

/// Coalescing excess: how many more sectors were actually touched than the
/// ideal fully-coalesced access would require, for global loads and stores.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CoalescingExcess {
    pub global_ld_excess_sectors: f64,
    pub global_st_excess_sectors: f64,
}

pub fn coalescing_excess(m: &MetricRecord) -> CoalescingExcess {
    CoalescingExcess {
        global_ld_excess_sectors: (m.sectors_global_ld - m.ideal_sectors_global_ld).max(0.0),
        global_st_excess_sectors: (m.sectors_global_st - m.ideal_sectors_global_st).max(0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_flow_applies_hit_rate_at_each_level() {
        let mut m = MetricRecord::default();
        m.sectors_global_ld = 100.0;
        m.sectors_global_ld_hit_rate = 50.0;
        m.l2_sectors_read_hit_rate = 25.0;
        let flow = load_flow(&m);
        assert_eq!(flow.global_to_l1_ld_bytes, 3200.0);
        assert_eq!(flow.l1_to_l2_ld_bytes, 1600.0);
        assert_eq!(flow.l2_to_dram_ld_bytes, 1200.0);
    }

    #[test]
    fn bank_conflict_is_zero_with_no_shared_requests() {
        let m = MetricRecord::default();
        assert_eq!(bank_conflict(&m), 0);
    }

    #[test]
    fn bank_conflict_detects_n_way_conflict() {
        let mut m = MetricRecord::default();
        m.shared_wavefronts_ld = 40.0;
        m.shared_inst_executed_ld = 10.0;
        assert_eq!(bank_conflict(&m), 4);
    }

    #[test]
    fn coalescing_excess_never_negative() {
        let mut m = MetricRecord::default();
        m.sectors_global_ld = 10.0;
        m.ideal_sectors_global_ld = 20.0;
        assert_eq!(coalescing_excess(&m).global_ld_excess_sectors, 0.0);
    }
}
