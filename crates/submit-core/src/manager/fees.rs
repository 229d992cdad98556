//! Fee selection

use rtxn_ledger_core::Drops;

use crate::connection::FeeSettings;

/// Latest fee settings seen from the server
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct FeeSchedule {
    settings: FeeSettings,
}

impl FeeSchedule {
    pub(crate) fn new(settings: FeeSettings) -> Self {
        Self { settings }
    }

    pub(crate) fn update(&mut self, settings: FeeSettings) {
        self.settings = settings;
    }

    /// Load-scaled fee with `cushion` applied, rounded up
    pub(crate) fn compute(&self, cushion: f64) -> Drops {
        let scaled = self.settings.scaled_fee().get() as f64;
        let cushioned = (scaled * cushion).ceil();
        if cushioned >= u64::MAX as f64 {
            Drops::new(u64::MAX)
        } else {
            Drops::new(cushioned as u64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::LOAD_BASE;

    #[test]
    fn test_normal_load() {
        let fees = FeeSchedule::default();
        assert_eq!(fees.compute(1.0), Drops::new(10));
        assert_eq!(fees.compute(1.2), Drops::new(12));
    }

    #[test]
    fn test_load_scaling_rounds_up() {
        let settings = FeeSettings {
            base_fee: Drops::new(10),
            load_factor: LOAD_BASE * 3 / 2 + 1,
        };
        assert_eq!(settings.scaled_fee(), Drops::new(16));
        let fees = FeeSchedule::new(settings);
        assert_eq!(fees.compute(1.5), Drops::new(24));
    }

    #[test]
    fn test_update_replaces_settings() {
        let mut fees = FeeSchedule::default();
        fees.update(FeeSettings {
            base_fee: Drops::new(10),
            load_factor: LOAD_BASE * 1000,
        });
        assert_eq!(fees.compute(1.0), Drops::new(10_000));
    }
}
