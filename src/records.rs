// src/records.rs
//
// Typed telemetry records, one per frame kind, plus the text-field re-parse
// helpers used by the dispatch handlers.
//
// Record payloads serialize to string-keyed maps of scalars: snake_case
// field names, capture timestamp as Unix seconds. Kinds that are
// field-identical share one struct with a skipped discriminator (aero,
// strain gauges, the two PDM reports).

use chrono::{DateTime, Local};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::decoder::DecodedFrame;

// ============================================================================
// Field Parsing
// ============================================================================

/// Parse an integer signal from a decoded frame; missing or unparseable
/// text reads as 0.
pub fn int_field(frame: &DecodedFrame, name: &str) -> i64 {
    frame
        .get(name)
        .and_then(|v| v.trim().parse::<i64>().ok())
        .unwrap_or(0)
}

/// Parse a float signal from a decoded frame; missing or unparseable text
/// reads as 0.0.
pub fn float_field(frame: &DecodedFrame, name: &str) -> f64 {
    frame
        .get(name)
        .and_then(|v| v.trim().parse::<f64>().ok())
        .unwrap_or(0.0)
}

fn unix_seconds<S: Serializer>(ts: &DateTime<Local>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_i64(ts.timestamp())
}

/// Which end of the car a shared-shape record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum End {
    Front,
    Rear,
}

// ============================================================================
// Record Structs
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct PackCurrent {
    #[serde(serialize_with = "unix_seconds")]
    pub timestamp: DateTime<Local>,
    pub current: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PackVoltage {
    #[serde(serialize_with = "unix_seconds")]
    pub timestamp: DateTime<Local>,
    pub voltage: f64,
}

/// Throttle control unit: pedal position sensors and brake encoder.
#[derive(Debug, Clone, Serialize)]
pub struct Tcu {
    #[serde(serialize_with = "unix_seconds")]
    pub timestamp: DateTime<Local>,
    pub apps1: f64,
    pub apps2: f64,
    pub bse: f64,
    pub status: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AculvFd1 {
    #[serde(serialize_with = "unix_seconds")]
    pub timestamp: DateTime<Local>,
    pub ams_status: i64,
    pub fld: i64,
    pub state_of_charge: f64,
    pub accumulator_voltage: f64,
    pub tractive_voltage: f64,
    pub cell_current: f64,
    pub isolation_monitoring: i64,
    pub isolation_monitoring1: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AculvFd2 {
    #[serde(serialize_with = "unix_seconds")]
    pub timestamp: DateTime<Local>,
    pub fan_set_point: f64,
    pub rpm: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Aculv1 {
    #[serde(serialize_with = "unix_seconds")]
    pub timestamp: DateTime<Local>,
    pub charge_status1: f64,
    pub charge_status2: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Aculv2 {
    #[serde(serialize_with = "unix_seconds")]
    pub timestamp: DateTime<Local>,
    pub charge_request: i64,
}

/// One thermistor expansion module: unit id plus 16 probe temperatures.
#[derive(Debug, Clone)]
pub struct Thermistor {
    pub timestamp: DateTime<Local>,
    pub thermistor_id: i64,
    pub probes: [f64; 16],
}

impl Serialize for Thermistor {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2 + self.probes.len()))?;
        map.serialize_entry("timestamp", &self.timestamp.timestamp())?;
        map.serialize_entry("thermistor_id", &self.thermistor_id)?;
        for (i, probe) in self.probes.iter().enumerate() {
            map.serialize_entry(&format!("therm{}", i + 1), probe)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GpsBestPos {
    #[serde(serialize_with = "unix_seconds")]
    pub timestamp: DateTime<Local>,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub std_latitude: f64,
    pub std_longitude: f64,
    pub std_altitude: f64,
    pub gps_status: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct InsGps {
    #[serde(serialize_with = "unix_seconds")]
    pub timestamp: DateTime<Local>,
    pub gnss_week: i64,
    pub gnss_seconds: f64,
    pub gnss_lat: f64,
    pub gnss_long: f64,
    pub gnss_height: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct InsImu {
    #[serde(serialize_with = "unix_seconds")]
    pub timestamp: DateTime<Local>,
    pub north_vel: f64,
    pub east_vel: f64,
    pub up_vel: f64,
    pub roll: f64,
    pub pitch: f64,
    pub azimuth: f64,
    pub status: i64,
}

/// Motor controller enable/brake-light state.
#[derive(Debug, Clone, Serialize)]
pub struct Bamocar {
    #[serde(serialize_with = "unix_seconds")]
    pub timestamp: DateTime<Local>,
    pub bamocar_frg: i64,
    pub bamocar_rfe: i64,
    pub brake_light: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FrontFrequency {
    #[serde(serialize_with = "unix_seconds")]
    pub timestamp: DateTime<Local>,
    pub rear_right: f64,
    pub front_right: f64,
    pub rear_left: f64,
    pub front_left: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RearFrequency {
    #[serde(serialize_with = "unix_seconds")]
    pub timestamp: DateTime<Local>,
    pub freq1: f64,
    pub freq2: f64,
    pub freq3: f64,
    pub freq4: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Encoder {
    #[serde(serialize_with = "unix_seconds")]
    pub timestamp: DateTime<Local>,
    pub encoder1: i64,
    pub encoder2: i64,
    pub encoder3: i64,
    pub encoder4: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RearAnalog {
    #[serde(serialize_with = "unix_seconds")]
    pub timestamp: DateTime<Local>,
    pub analog1: i64,
    pub analog2: i64,
    pub analog3: i64,
    pub analog4: i64,
    pub analog5: i64,
    pub analog6: i64,
    pub analog7: i64,
    pub analog8: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FrontAnalog {
    #[serde(serialize_with = "unix_seconds")]
    pub timestamp: DateTime<Local>,
    pub left_rad: i64,
    pub right_rad: i64,
    pub front_right_pot: f64,
    pub front_left_pot: f64,
    pub rear_right_pot: f64,
    pub rear_left_pot: f64,
    pub steering_angle: f64,
    pub analog8: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BamocarTx {
    #[serde(serialize_with = "unix_seconds")]
    pub timestamp: DateTime<Local>,
    pub regid: i64,
    pub data: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BamocarRx {
    #[serde(serialize_with = "unix_seconds")]
    pub timestamp: DateTime<Local>,
    pub regid: i64,
    pub byte1: i64,
    pub byte2: i64,
    pub byte3: i64,
    pub byte4: i64,
    pub byte5: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BamocarReTransmit {
    #[serde(serialize_with = "unix_seconds")]
    pub timestamp: DateTime<Local>,
    pub motor_temp: i64,
    pub controller_temp: i64,
}

/// PDM status report; the retransmit variant omits the compound id.
#[derive(Debug, Clone, Serialize)]
pub struct PdmReport {
    #[serde(skip)]
    pub retransmit: bool,
    #[serde(serialize_with = "unix_seconds")]
    pub timestamp: DateTime<Local>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compound_id: Option<i64>,
    pub pdm_int_temperature: i64,
    pub pdm_batt_voltage: f64,
    pub global_error_flag: i64,
    pub total_current: i64,
    pub internal_rail_voltage: f64,
    pub reset_source: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PdmCurrent {
    #[serde(serialize_with = "unix_seconds")]
    pub timestamp: DateTime<Local>,
    pub accumulator_current: i64,
    pub tcu_current: i64,
    pub bamocar_current: i64,
    pub pumps_current: i64,
    pub tsal_current: i64,
    pub daq_current: i64,
    pub display_kvaser_current: i64,
    pub shutdown_reset_current: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Aero {
    #[serde(skip)]
    pub end: End,
    #[serde(serialize_with = "unix_seconds")]
    pub timestamp: DateTime<Local>,
    pub pressure1: i64,
    pub pressure2: i64,
    pub pressure3: i64,
    pub temperature1: i64,
    pub temperature2: i64,
    pub temperature3: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StrainGauges {
    #[serde(skip)]
    pub end: End,
    /// Gauge set 1 or 2.
    #[serde(skip)]
    pub set: u8,
    #[serde(serialize_with = "unix_seconds")]
    pub timestamp: DateTime<Local>,
    pub gauge1: i64,
    pub gauge2: i64,
    pub gauge3: i64,
    pub gauge4: i64,
    pub gauge5: i64,
    pub gauge6: i64,
}

/// Completed 128-slot cell-voltage snapshot from the aggregator.
#[derive(Debug, Clone)]
pub struct CellSnapshot {
    pub timestamp: DateTime<Local>,
    pub cells: [f64; 128],
}

impl Serialize for CellSnapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1 + self.cells.len()))?;
        map.serialize_entry("timestamp", &self.timestamp.timestamp())?;
        for (i, v) in self.cells.iter().enumerate() {
            // Snapshot values publish as fixed three-decimal strings
            map.serialize_entry(&format!("cell{}", i + 1), &format!("{:.3}", v))?;
        }
        map.end()
    }
}

// ============================================================================
// Record Enum
// ============================================================================

/// One decoded telemetry record of any kind, as handed to the sink and
/// wrapped into the outbound envelope.
#[derive(Debug, Clone)]
pub enum Record {
    PackCurrent(PackCurrent),
    PackVoltage(PackVoltage),
    Tcu(Tcu),
    AculvFd1(AculvFd1),
    AculvFd2(AculvFd2),
    Aculv1(Aculv1),
    Aculv2(Aculv2),
    Thermistor(Thermistor),
    GpsBestPos(GpsBestPos),
    InsGps(InsGps),
    InsImu(InsImu),
    Bamocar(Bamocar),
    FrontFrequency(FrontFrequency),
    RearFrequency(RearFrequency),
    Encoder(Encoder),
    RearAnalog(RearAnalog),
    FrontAnalog(FrontAnalog),
    BamocarTx(BamocarTx),
    BamocarRx(BamocarRx),
    BamocarReTransmit(BamocarReTransmit),
    PdmReport(PdmReport),
    PdmCurrent(PdmCurrent),
    Aero(Aero),
    StrainGauges(StrainGauges),
    Cells(CellSnapshot),
}

impl Record {
    /// Envelope type tag for this record kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PackCurrent(_) => "pack_current",
            Self::PackVoltage(_) => "pack_voltage",
            Self::Tcu(_) => "tcu",
            Self::AculvFd1(_) => "aculv_fd_1",
            Self::AculvFd2(_) => "aculv_fd_2",
            Self::Aculv1(_) => "aculv1",
            Self::Aculv2(_) => "aculv2",
            Self::Thermistor(_) => "thermistor",
            Self::GpsBestPos(_) => "gps_best_pos",
            Self::InsGps(_) => "ins_gps",
            Self::InsImu(_) => "ins_imu",
            Self::Bamocar(_) => "bamocar",
            Self::FrontFrequency(_) => "front_frequency",
            Self::RearFrequency(_) => "rear_frequency",
            Self::Encoder(_) => "encoder",
            Self::RearAnalog(_) => "rear_analog",
            Self::FrontAnalog(_) => "front_analog",
            Self::BamocarTx(_) => "bamocar_tx_data",
            Self::BamocarRx(_) => "bamocar_rx_data",
            Self::BamocarReTransmit(_) => "bamo_car_re_transmit",
            Self::PdmReport(r) => {
                if r.retransmit {
                    "pdm_re_transmit"
                } else {
                    "pdm1"
                }
            }
            Self::PdmCurrent(_) => "pdm_current",
            Self::Aero(r) => match r.end {
                End::Front => "front_aero",
                End::Rear => "rear_aero",
            },
            Self::StrainGauges(r) => match (r.end, r.set) {
                (End::Front, 1) => "front_strain_gauges_1",
                (End::Front, _) => "front_strain_gauges_2",
                (End::Rear, 1) => "rear_strain_gauges1",
                (End::Rear, _) => "rear_strain_gauges2",
            },
            Self::Cells(_) => "cell",
        }
    }

    /// Capture time of the record.
    pub fn timestamp(&self) -> DateTime<Local> {
        match self {
            Self::PackCurrent(r) => r.timestamp,
            Self::PackVoltage(r) => r.timestamp,
            Self::Tcu(r) => r.timestamp,
            Self::AculvFd1(r) => r.timestamp,
            Self::AculvFd2(r) => r.timestamp,
            Self::Aculv1(r) => r.timestamp,
            Self::Aculv2(r) => r.timestamp,
            Self::Thermistor(r) => r.timestamp,
            Self::GpsBestPos(r) => r.timestamp,
            Self::InsGps(r) => r.timestamp,
            Self::InsImu(r) => r.timestamp,
            Self::Bamocar(r) => r.timestamp,
            Self::FrontFrequency(r) => r.timestamp,
            Self::RearFrequency(r) => r.timestamp,
            Self::Encoder(r) => r.timestamp,
            Self::RearAnalog(r) => r.timestamp,
            Self::FrontAnalog(r) => r.timestamp,
            Self::BamocarTx(r) => r.timestamp,
            Self::BamocarRx(r) => r.timestamp,
            Self::BamocarReTransmit(r) => r.timestamp,
            Self::PdmReport(r) => r.timestamp,
            Self::PdmCurrent(r) => r.timestamp,
            Self::Aero(r) => r.timestamp,
            Self::StrainGauges(r) => r.timestamp,
            Self::Cells(r) => r.timestamp,
        }
    }

    /// Payload map for the outbound envelope.
    pub fn payload(&self) -> serde_json::Value {
        let value = match self {
            Self::PackCurrent(r) => serde_json::to_value(r),
            Self::PackVoltage(r) => serde_json::to_value(r),
            Self::Tcu(r) => serde_json::to_value(r),
            Self::AculvFd1(r) => serde_json::to_value(r),
            Self::AculvFd2(r) => serde_json::to_value(r),
            Self::Aculv1(r) => serde_json::to_value(r),
            Self::Aculv2(r) => serde_json::to_value(r),
            Self::Thermistor(r) => serde_json::to_value(r),
            Self::GpsBestPos(r) => serde_json::to_value(r),
            Self::InsGps(r) => serde_json::to_value(r),
            Self::InsImu(r) => serde_json::to_value(r),
            Self::Bamocar(r) => serde_json::to_value(r),
            Self::FrontFrequency(r) => serde_json::to_value(r),
            Self::RearFrequency(r) => serde_json::to_value(r),
            Self::Encoder(r) => serde_json::to_value(r),
            Self::RearAnalog(r) => serde_json::to_value(r),
            Self::FrontAnalog(r) => serde_json::to_value(r),
            Self::BamocarTx(r) => serde_json::to_value(r),
            Self::BamocarRx(r) => serde_json::to_value(r),
            Self::BamocarReTransmit(r) => serde_json::to_value(r),
            Self::PdmReport(r) => serde_json::to_value(r),
            Self::PdmCurrent(r) => serde_json::to_value(r),
            Self::Aero(r) => serde_json::to_value(r),
            Self::StrainGauges(r) => serde_json::to_value(r),
            Self::Cells(r) => serde_json::to_value(r),
        };
        value.unwrap_or_else(|_| serde_json::Value::Object(Default::default()))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_field_parsing_defaults_to_zero() {
        let mut frame: DecodedFrame = HashMap::new();
        frame.insert("Status".to_string(), "3".to_string());
        frame.insert("APPS1".to_string(), "12.500000".to_string());
        frame.insert("Broken".to_string(), "".to_string());

        assert_eq!(int_field(&frame, "Status"), 3);
        assert_eq!(float_field(&frame, "APPS1"), 12.5);
        assert_eq!(int_field(&frame, "Broken"), 0);
        assert_eq!(float_field(&frame, "Missing"), 0.0);
    }

    #[test]
    fn test_payload_keys_are_snake_case() {
        let record = Record::Tcu(Tcu {
            timestamp: Local::now(),
            apps1: 1.0,
            apps2: 2.0,
            bse: 3.0,
            status: 1,
        });
        let payload = record.payload();
        let map = payload.as_object().unwrap();
        assert!(map.contains_key("timestamp"));
        assert!(map.contains_key("apps1"));
        assert!(map.contains_key("bse"));
        assert!(map["timestamp"].is_i64());
    }

    #[test]
    fn test_shared_shape_kind_tags() {
        let ts = Local::now();
        let front = Record::Aero(Aero {
            end: End::Front,
            timestamp: ts,
            pressure1: 0,
            pressure2: 0,
            pressure3: 0,
            temperature1: 0,
            temperature2: 0,
            temperature3: 0,
        });
        assert_eq!(front.kind(), "front_aero");

        let gauges = Record::StrainGauges(StrainGauges {
            end: End::Rear,
            set: 2,
            timestamp: ts,
            gauge1: 0,
            gauge2: 0,
            gauge3: 0,
            gauge4: 0,
            gauge5: 0,
            gauge6: 0,
        });
        assert_eq!(gauges.kind(), "rear_strain_gauges2");
        // The discriminators stay out of the payload
        assert!(!gauges.payload().as_object().unwrap().contains_key("end"));
    }

    #[test]
    fn test_cell_snapshot_renders_three_decimals() {
        let mut cells = [0.0f64; 128];
        cells[0] = 3.7154;
        cells[127] = 4.2;
        let record = Record::Cells(CellSnapshot {
            timestamp: Local::now(),
            cells,
        });
        let payload = record.payload();
        let map = payload.as_object().unwrap();
        assert_eq!(map.len(), 129); // timestamp + 128 cells
        assert_eq!(map["cell1"], "3.715");
        assert_eq!(map["cell128"], "4.200");
        assert_eq!(record.kind(), "cell");
    }
}
