//! Traffic counters, kept per epoch and folded into lifetime totals.

use serde::Serialize;

#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct ChipIoStats {
    pub read_count: u64,
    pub read_traffic: u64,
    pub write_count: u64,
    pub write_traffic: u64,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct ChannelIoStats {
    /// Bytes moved over the channel bus by PULL/PUSH transfers.
    pub bus_traffic: f64,
    pub chips: Vec<ChipIoStats>,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct IoStats {
    pub channels: Vec<ChannelIoStats>,
}

impl IoStats {
    pub fn new(channels: usize, chips_per_channel: usize) -> Self {
        Self {
            channels: (0..channels)
                .map(|_| ChannelIoStats {
                    bus_traffic: 0.0,
                    chips: vec![ChipIoStats::default(); chips_per_channel],
                })
                .collect(),
        }
    }

    pub fn absorb(&mut self, other: &IoStats) {
        assert_eq!(self.channels.len(), other.channels.len());
        for (into, from) in self.channels.iter_mut().zip(&other.channels) {
            into.bus_traffic += from.bus_traffic;
            for (chip_into, chip_from) in into.chips.iter_mut().zip(&from.chips) {
                chip_into.read_count += chip_from.read_count;
                chip_into.read_traffic += chip_from.read_traffic;
                chip_into.write_count += chip_from.write_count;
                chip_into.write_traffic += chip_from.write_traffic;
            }
        }
    }

    pub fn reset(&mut self) {
        for channel in &mut self.channels {
            channel.bus_traffic = 0.0;
            channel.chips.fill(ChipIoStats::default());
        }
    }

    pub fn total_bus_traffic(&self) -> f64 {
        self.channels.iter().map(|c| c.bus_traffic).sum()
    }

    pub fn total_read_traffic(&self) -> u64 {
        self.channels
            .iter()
            .flat_map(|c| &c.chips)
            .map(|chip| chip.read_traffic)
            .sum()
    }

    pub fn total_write_traffic(&self) -> u64 {
        self.channels
            .iter()
            .flat_map(|c| &c.chips)
            .map(|chip| chip.write_traffic)
            .sum()
    }
}
