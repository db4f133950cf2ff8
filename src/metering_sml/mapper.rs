use super::structs::{format_obis_code, SmlListEntry, SmlMessage};
use super::utils::apply_scaler;
use crate::models::MeterData;
use log::trace;

/// OBIS 1-0:1.8.0*255, total imported active energy.
pub const OBIS_IMPORT_ENERGY_TOTAL: &[u8] = &[1, 0, 1, 8, 0, 255];
/// OBIS 1-0:16.7.0*255, instantaneous active power.
pub const OBIS_ACTIVE_POWER_TOTAL: &[u8] = &[1, 0, 16, 7, 0, 255];

const ERROR_POWER_FLOOR: i64 = -1000;
const ERROR_POWER_STEP: i64 = 50;
const POWER_NOISE_LIMIT: f64 = 1.0;

/// Maps decoded SML messages onto the live measurement record.
///
/// Carries the jitter-suppression bias across calls, so one mapper
/// instance must stay attached to one meter stream. Constructing a fresh
/// mapper resets the bias.
pub struct MeasurementMapper {
    error_power: i64,
}

impl MeasurementMapper {
    pub fn new() -> Self {
        MeasurementMapper { error_power: 0 }
    }

    /// Apply one decoded message to the live record, mutating matched
    /// channels in place. Returns whether the message carried a value
    /// list; that is what counts as a fresh reading for the staleness
    /// guard, whether or not any channel matched.
    pub fn map_message(&mut self, message: &SmlMessage, data: &mut MeterData) -> bool {
        let list = match message.message_body.get_list_response.as_ref() {
            Some(list) => list,
            None => return false,
        };

        for entry in &list.val_list {
            self.map_entry(entry, data);
        }

        true
    }

    fn map_entry(&mut self, entry: &SmlListEntry, data: &mut MeterData) {
        let obis = match entry.obis_code.as_deref() {
            Some(obis) => obis,
            None => return,
        };
        let raw = match entry.value.as_ref().and_then(|v| v.as_f64()) {
            Some(raw) => raw,
            None => return,
        };
        let value = apply_scaler(raw, entry.scaler);

        if obis == OBIS_IMPORT_ENERGY_TOTAL {
            data.import_energy_active = value;
            // This meter variant only reports the total import register;
            // the per-phase channels are a synthetic even split, an
            // approximation rather than a measurement.
            data.l1_import_energy_active = value / 3.0;
            data.l2_import_energy_active = value / 3.0;
            data.l3_import_energy_active = value / 3.0;
        } else if obis == OBIS_ACTIVE_POWER_TOTAL {
            let value = self.suppress_jitter(value);
            data.power_active = value;
            data.l1_power_active = value / 3.0;
            data.l2_power_active = value / 3.0;
            data.l3_power_active = value / 3.0;
        } else {
            trace!("Ignoring unmapped OBIS code {}", format_obis_code(obis));
        }
    }

    /// Near-zero power readings on this meter flicker instead of settling.
    /// The bias walks down by 50 per noisy reading (floor -1000) and back
    /// up by 50 per good one; while it is negative it replaces the raw
    /// value, so an idle meter reports a smooth negative decay instead of
    /// a jumpy near-zero. The gates are asymmetric: readings below 1
    /// drive the bias down, and recovery only runs while the bias is
    /// negative. That asymmetry is the hysteresis, not an off-by-one.
    fn suppress_jitter(&mut self, value: f64) -> f64 {
        if value < POWER_NOISE_LIMIT {
            if self.error_power > ERROR_POWER_FLOOR {
                self.error_power -= ERROR_POWER_STEP;
            }
        } else if self.error_power < 0 {
            self.error_power += ERROR_POWER_STEP;
        }

        if self.error_power < 0 {
            self.error_power as f64
        } else {
            value
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::structs::{
        SmlGetListResponse, SmlListEntry, SmlMessage, SmlMessageBody, SmlValue,
    };
    use super::*;

    fn list_message(entries: Vec<SmlListEntry>) -> SmlMessage {
        SmlMessage {
            transaction_id: vec![0x42],
            group_no: 0,
            abort_on_error: 0,
            message_body: SmlMessageBody {
                msg_type: 0x0701,
                get_list_response: Some(SmlGetListResponse {
                    client_id: None,
                    server_id: Some(b"meter1".to_vec()),
                    list_name: None,
                    act_sensor_time: None,
                    val_list: entries,
                    list_signature: None,
                    act_gateway_time: None,
                }),
            },
            crc: None,
        }
    }

    fn entry(obis: &[u8], value: i32, scaler: Option<i8>) -> SmlListEntry {
        SmlListEntry {
            obis_code: Some(obis.to_vec()),
            status: None,
            val_time: None,
            unit: None,
            scaler,
            value: Some(SmlValue::Int32(value)),
            value_signature: None,
        }
    }

    #[test]
    fn test_import_energy_split_across_phases() {
        let mut mapper = MeasurementMapper::new();
        let mut data = MeterData::default();

        let updated = mapper.map_message(
            &list_message(vec![entry(OBIS_IMPORT_ENERGY_TOTAL, 9000, None)]),
            &mut data,
        );

        assert!(updated);
        assert_eq!(data.import_energy_active, 9000.0);
        assert_eq!(data.l1_import_energy_active, 3000.0);
        assert_eq!(data.l2_import_energy_active, 3000.0);
        assert_eq!(data.l3_import_energy_active, 3000.0);

        let sum = data.l1_import_energy_active
            + data.l2_import_energy_active
            + data.l3_import_energy_active;
        assert!((sum - data.import_energy_active).abs() < 1e-9);
    }

    #[test]
    fn test_clean_power_passes_through() {
        let mut mapper = MeasurementMapper::new();
        let mut data = MeterData::default();

        mapper.map_message(
            &list_message(vec![entry(OBIS_ACTIVE_POWER_TOTAL, 500, None)]),
            &mut data,
        );

        assert_eq!(data.power_active, 500.0);
        assert_eq!(data.l1_power_active, 500.0 / 3.0);
    }

    #[test]
    fn test_single_noise_reading_reports_bias() {
        let mut mapper = MeasurementMapper::new();
        let mut data = MeterData::default();

        // 0.5 W, encoded as 5 with scaler -1
        mapper.map_message(
            &list_message(vec![entry(OBIS_ACTIVE_POWER_TOTAL, 5, Some(-1))]),
            &mut data,
        );

        assert_eq!(data.power_active, -50.0);
        assert_eq!(data.l1_power_active, -50.0 / 3.0);
        assert_eq!(data.l2_power_active, -50.0 / 3.0);
        assert_eq!(data.l3_power_active, -50.0 / 3.0);
    }

    #[test]
    fn test_bias_staircase_clamps_at_floor() {
        let mut mapper = MeasurementMapper::new();
        let mut data = MeterData::default();
        let noise = list_message(vec![entry(OBIS_ACTIVE_POWER_TOTAL, 0, None)]);

        for step in 1..=20 {
            mapper.map_message(&noise, &mut data);
            assert_eq!(data.power_active, (-50 * step) as f64);
        }

        // clamped; further noise holds the floor
        for _ in 0..5 {
            mapper.map_message(&noise, &mut data);
            assert_eq!(data.power_active, -1000.0);
        }
    }

    #[test]
    fn test_bias_recovers_and_raw_values_return() {
        let mut mapper = MeasurementMapper::new();
        let mut data = MeterData::default();
        let noise = list_message(vec![entry(OBIS_ACTIVE_POWER_TOTAL, 0, None)]);
        let load = list_message(vec![entry(OBIS_ACTIVE_POWER_TOTAL, 800, None)]);

        for _ in 0..20 {
            mapper.map_message(&noise, &mut data);
        }
        assert_eq!(data.power_active, -1000.0);

        // bias climbs by 50 per good reading and keeps masking the raw
        // value until it reaches zero
        for step in 1..20 {
            mapper.map_message(&load, &mut data);
            assert_eq!(data.power_active, (-1000 + 50 * step) as f64);
        }

        mapper.map_message(&load, &mut data);
        assert_eq!(data.power_active, 800.0);
    }

    #[test]
    fn test_unmapped_obis_is_ignored_but_counts_as_update() {
        let mut mapper = MeasurementMapper::new();
        let mut data = MeterData::default();

        // export energy register, not mapped by this bridge
        let updated = mapper.map_message(
            &list_message(vec![entry(&[1, 0, 2, 8, 0, 255], 1234, None)]),
            &mut data,
        );

        assert!(updated);
        assert_eq!(data, MeterData::default());
    }

    #[test]
    fn test_message_without_value_list_is_no_update() {
        let mut mapper = MeasurementMapper::new();
        let mut data = MeterData::default();

        let message = SmlMessage {
            transaction_id: vec![0x42],
            group_no: 0,
            abort_on_error: 0,
            message_body: SmlMessageBody {
                msg_type: 0x0601,
                get_list_response: None,
            },
            crc: None,
        };

        assert!(!mapper.map_message(&message, &mut data));
        assert_eq!(data, MeterData::default());
    }
}
