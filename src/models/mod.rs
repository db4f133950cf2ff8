use serde::{Deserialize, Serialize};

/// The complete measurement set of a grid meter.
///
/// The channel set is fixed: every value the bridge can ever report is a
/// field here, and `MeterData::default()` (all channels zero) doubles as
/// the "no data" sentinel the store falls back to on timeout. Channels the
/// connected meter does not report simply stay at zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeterData {
    pub energy_active: f64,
    pub import_energy_active: f64,
    pub power_active: f64,
    pub l1_power_active: f64,
    pub l2_power_active: f64,
    pub l3_power_active: f64,
    pub voltage_ln: f64,
    pub l1n_voltage: f64,
    pub l2n_voltage: f64,
    pub l3n_voltage: f64,
    pub voltage_ll: f64,
    pub l12_voltage: f64,
    pub l23_voltage: f64,
    pub l31_voltage: f64,
    pub frequency: f64,
    pub l1_energy_active: f64,
    pub l2_energy_active: f64,
    pub l3_energy_active: f64,
    pub l1_import_energy_active: f64,
    pub l2_import_energy_active: f64,
    pub l3_import_energy_active: f64,
    pub export_energy_active: f64,
    pub l1_export_energy_active: f64,
    pub l2_export_energy_active: f64,
    pub l3_export_energy_active: f64,
    pub energy_reactive: f64,
    pub l1_energy_reactive: f64,
    pub l2_energy_reactive: f64,
    pub l3_energy_reactive: f64,
    pub energy_apparent: f64,
    pub l1_energy_apparent: f64,
    pub l2_energy_apparent: f64,
    pub l3_energy_apparent: f64,
    pub power_factor: f64,
    pub l1_power_factor: f64,
    pub l2_power_factor: f64,
    pub l3_power_factor: f64,
    pub power_reactive: f64,
    pub l1_power_reactive: f64,
    pub l2_power_reactive: f64,
    pub l3_power_reactive: f64,
    pub power_apparent: f64,
    pub l1_power_apparent: f64,
    pub l2_power_apparent: f64,
    pub l3_power_apparent: f64,
    pub l1_current: f64,
    pub l2_current: f64,
    pub l3_current: f64,
    pub demand_power_active: f64,
    pub minimum_demand_power_active: f64,
    pub maximum_demand_power_active: f64,
    pub demand_power_apparent: f64,
    pub l1_demand_power_active: f64,
    pub l2_demand_power_active: f64,
    pub l3_demand_power_active: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_all_zero() {
        let data = MeterData::default();
        assert_eq!(data.power_active, 0.0);
        assert_eq!(data.import_energy_active, 0.0);
        assert_eq!(data.l3_demand_power_active, 0.0);
    }

    #[test]
    fn test_serializes_channel_names() {
        let mut data = MeterData::default();
        data.power_active = 42.5;
        let json = serde_json::to_string(&data).unwrap();
        assert!(json.contains("\"power_active\":42.5"));
        assert!(json.contains("\"l1_import_energy_active\":0.0"));
    }
}
