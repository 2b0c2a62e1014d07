// src/dispatch.rs
//
// Frame dispatch: maps a frame id to its handling routine.
//
// Every raw frame from every ingest connection funnels through one pipeline
// task that owns the Dispatcher, and with it the cell aggregator, which is
// thereby confined to a single execution context without locking. Unknown
// frame ids are expected noise and are silently discarded.
//
// Handler policy: build the typed record, persist it, and publish only when
// persistence succeeded. Publication goes through the throttle into the hub.

use chrono::Local;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::catalog::Catalog;
use crate::cells::{is_cell_frame, remap_cell_fields, CellAggregator};
use crate::decoder::{decode_frame, DecodedFrame, RawFrame};
use crate::envelope::Envelope;
use crate::records::*;
use crate::sink::TelemetrySink;
use crate::throttle::Throttle;
use crate::hub::HubHandle;
use crate::tlog;

/// Queue depth between ingest connections and the pipeline task.
const PIPELINE_QUEUE: usize = 1024;

// ============================================================================
// Publisher
// ============================================================================

/// Publishes records to the hub, rate-limited by the shared throttle.
pub struct Publisher {
    throttle: Arc<Throttle>,
    hub: HubHandle,
}

impl Publisher {
    pub fn new(throttle: Arc<Throttle>, hub: HubHandle) -> Self {
        Self { throttle, hub }
    }

    pub async fn publish(&self, record: &Record) {
        let Some(bytes) = Envelope::from_record(record).encode() else {
            return;
        };
        self.throttle.acquire().await;
        self.hub.broadcast(bytes).await;
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

pub struct Dispatcher {
    catalog: Arc<Catalog>,
    sink: Arc<dyn TelemetrySink>,
    publisher: Publisher,
    cells: CellAggregator,
}

impl Dispatcher {
    pub fn new(catalog: Arc<Catalog>, sink: Arc<dyn TelemetrySink>, publisher: Publisher) -> Self {
        Self {
            catalog,
            sink,
            publisher,
            cells: CellAggregator::new(),
        }
    }

    /// Decode and route one raw frame.
    pub async fn handle_frame(&mut self, frame: &RawFrame) {
        let Some(msg) = self.catalog.get(frame.frame_id) else {
            // Not in the catalog: expected noise, drop without comment
            return;
        };
        let decoded = decode_frame(&frame.data, msg);

        if is_cell_frame(frame.frame_id) {
            let names: Vec<String> = msg.signals.iter().map(|s| s.name.clone()).collect();
            let adjusted = remap_cell_fields(frame.frame_id, &names, &decoded);
            if let Some(snapshot) = self.cells.apply(frame.frame_id, &adjusted) {
                self.store_and_publish(Record::Cells(snapshot)).await;
            }
            return;
        }

        if let Some(record) = build_record(frame.frame_id, &decoded) {
            self.store_and_publish(record).await;
        }
    }

    /// Persist, then publish only on success.
    async fn store_and_publish(&self, record: Record) {
        if let Err(e) = self.sink.insert(&record).await {
            tlog!("[dispatch] {}", e);
            return;
        }
        self.publisher.publish(&record).await;
    }

    /// Flush a partial cell aggregate during orderly shutdown.
    pub async fn shutdown(&mut self) {
        if let Some(snapshot) = self.cells.flush_remaining() {
            tlog!("[dispatch] flushing partial cell aggregate");
            self.store_and_publish(Record::Cells(snapshot)).await;
        }
    }
}

/// Spawn the pipeline task. Ingest connections send raw frames into the
/// returned channel; closing it (all senders dropped) flushes the aggregator
/// and ends the task.
pub fn spawn_pipeline(
    catalog: Arc<Catalog>,
    sink: Arc<dyn TelemetrySink>,
    publisher: Publisher,
) -> (mpsc::Sender<RawFrame>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<RawFrame>(PIPELINE_QUEUE);
    let task = tokio::spawn(async move {
        let mut dispatcher = Dispatcher::new(catalog, sink, publisher);
        while let Some(frame) = rx.recv().await {
            dispatcher.handle_frame(&frame).await;
        }
        dispatcher.shutdown().await;
    });
    (tx, task)
}

// ============================================================================
// Per-Kind Handlers
// ============================================================================

/// Build the typed record for a non-aggregating frame id. None for ids
/// outside the dispatch table.
fn build_record(frame_id: u32, d: &DecodedFrame) -> Option<Record> {
    let now = Local::now();
    let record = match frame_id {
        4 => Record::PackCurrent(PackCurrent {
            timestamp: now,
            current: float_field(d, "PackCurrent"),
        }),
        5 => Record::PackVoltage(PackVoltage {
            timestamp: now,
            voltage: float_field(d, "PackVoltage"),
        }),
        6 => Record::Tcu(Tcu {
            timestamp: now,
            apps1: float_field(d, "APPS1"),
            apps2: float_field(d, "APPS2"),
            bse: float_field(d, "BSE"),
            status: int_field(d, "Status"),
        }),
        8 => Record::AculvFd1(AculvFd1 {
            timestamp: now,
            ams_status: int_field(d, "AMSStatus"),
            fld: int_field(d, "FLD"),
            state_of_charge: float_field(d, "StateOfCharge"),
            accumulator_voltage: float_field(d, "AccumulatorVoltage"),
            tractive_voltage: float_field(d, "TractiveVoltage"),
            cell_current: float_field(d, "CellCurrent"),
            isolation_monitoring: int_field(d, "IsolationMonitoring"),
            isolation_monitoring1: float_field(d, "IsolationMonitoring1"),
        }),
        30 => Record::AculvFd2(AculvFd2 {
            timestamp: now,
            fan_set_point: float_field(d, "FanSetPoint"),
            rpm: float_field(d, "RPM"),
        }),
        40 => Record::Aculv1(Aculv1 {
            timestamp: now,
            charge_status1: float_field(d, "ChargeStatus1"),
            charge_status2: float_field(d, "ChargeStatus2"),
        }),
        41 => Record::Aculv2(Aculv2 {
            timestamp: now,
            charge_request: int_field(d, "ChargeRequest"),
        }),
        60..=71 => Record::Thermistor(Thermistor {
            timestamp: now,
            thermistor_id: (frame_id - 59) as i64,
            probes: std::array::from_fn(|i| float_field(d, &format!("Therm{}", i + 1))),
        }),
        80 => Record::GpsBestPos(GpsBestPos {
            timestamp: now,
            latitude: float_field(d, "Latitude"),
            longitude: float_field(d, "Longitude"),
            altitude: float_field(d, "Altitude"),
            std_latitude: float_field(d, "stdLatitude"),
            std_longitude: float_field(d, "stdLongitude"),
            std_altitude: float_field(d, "stdAltitude"),
            gps_status: int_field(d, "gpsStatus"),
        }),
        81 => Record::InsGps(InsGps {
            timestamp: now,
            gnss_week: int_field(d, "gnss_week"),
            gnss_seconds: float_field(d, "gnss_seconds"),
            gnss_lat: float_field(d, "gnss_lat"),
            gnss_long: float_field(d, "gnss_long"),
            gnss_height: float_field(d, "gnss_height"),
        }),
        82 => Record::InsImu(InsImu {
            timestamp: now,
            north_vel: float_field(d, "north_vel"),
            east_vel: float_field(d, "east_vel"),
            up_vel: float_field(d, "up_vel"),
            roll: float_field(d, "roll"),
            pitch: float_field(d, "pitch"),
            azimuth: float_field(d, "azimuth"),
            status: int_field(d, "status"),
        }),
        100 => Record::Bamocar(Bamocar {
            timestamp: now,
            bamocar_frg: int_field(d, "BamocarFRG"),
            bamocar_rfe: int_field(d, "BamocarRFE"),
            brake_light: int_field(d, "BrakeLight"),
        }),
        101 => Record::FrontFrequency(FrontFrequency {
            timestamp: now,
            rear_right: float_field(d, "RearRight"),
            front_right: float_field(d, "FrontRight"),
            rear_left: float_field(d, "RearLeft"),
            front_left: float_field(d, "FrontLeft"),
        }),
        102 => Record::RearFrequency(RearFrequency {
            timestamp: now,
            freq1: float_field(d, "Freq1"),
            freq2: float_field(d, "Freq2"),
            freq3: float_field(d, "Freq3"),
            freq4: float_field(d, "Freq4"),
        }),
        200 => Record::Encoder(Encoder {
            timestamp: now,
            encoder1: int_field(d, "Encoder1"),
            encoder2: int_field(d, "Encoder2"),
            encoder3: int_field(d, "Encoder3"),
            encoder4: int_field(d, "Encoder4"),
        }),
        258 => Record::RearAnalog(RearAnalog {
            timestamp: now,
            analog1: int_field(d, "Analog1"),
            analog2: int_field(d, "Analog2"),
            analog3: int_field(d, "Analog3"),
            analog4: int_field(d, "Analog4"),
            analog5: int_field(d, "Analog5"),
            analog6: int_field(d, "Analog6"),
            analog7: int_field(d, "Analog7"),
            analog8: int_field(d, "Analog8"),
        }),
        259 => Record::FrontAnalog(FrontAnalog {
            timestamp: now,
            left_rad: int_field(d, "LeftRad"),
            right_rad: int_field(d, "RightRad"),
            front_right_pot: float_field(d, "FrontRightPot"),
            front_left_pot: float_field(d, "FrontLeftPot"),
            rear_right_pot: float_field(d, "RearRightPot"),
            rear_left_pot: float_field(d, "RearLeftPot"),
            steering_angle: float_field(d, "SteeringAngle"),
            analog8: int_field(d, "Analog8"),
        }),
        385 => Record::BamocarTx(BamocarTx {
            timestamp: now,
            regid: int_field(d, "REGID"),
            data: int_field(d, "Data"),
        }),
        513 => Record::BamocarRx(BamocarRx {
            timestamp: now,
            regid: int_field(d, "REGID"),
            byte1: int_field(d, "Byte1"),
            byte2: int_field(d, "Byte2"),
            byte3: int_field(d, "Byte3"),
            byte4: int_field(d, "Byte4"),
            byte5: int_field(d, "Byte5"),
        }),
        600 => Record::BamocarReTransmit(BamocarReTransmit {
            timestamp: now,
            motor_temp: int_field(d, "MotorTemp"),
            controller_temp: int_field(d, "ControllerTemp"),
        }),
        1280 | 1680 => Record::PdmReport(PdmReport {
            retransmit: frame_id == 1680,
            timestamp: now,
            compound_id: (frame_id == 1280).then(|| int_field(d, "CompoundID")),
            pdm_int_temperature: int_field(d, "PDMIntTemperature"),
            pdm_batt_voltage: float_field(d, "PDMBattVoltage"),
            global_error_flag: int_field(d, "GlobalErrorFlag"),
            total_current: int_field(d, "TotalCurrent"),
            internal_rail_voltage: float_field(d, "InternalRailVoltage"),
            reset_source: int_field(d, "ResetSource"),
        }),
        1312 => Record::PdmCurrent(PdmCurrent {
            timestamp: now,
            accumulator_current: int_field(d, "AccumulatorCurrent"),
            tcu_current: int_field(d, "TCUCurrent"),
            bamocar_current: int_field(d, "BamocarCurrent"),
            pumps_current: int_field(d, "PumpsCurrent"),
            tsal_current: int_field(d, "TSALCurrent"),
            daq_current: int_field(d, "DAQCurrent"),
            display_kvaser_current: int_field(d, "DisplayKvaserCurrent"),
            shutdown_reset_current: int_field(d, "ShutdownResetCurrent"),
        }),
        1536 | 1537 => Record::Aero(Aero {
            end: if frame_id == 1536 { End::Front } else { End::Rear },
            timestamp: now,
            pressure1: int_field(d, "Pressure1"),
            pressure2: int_field(d, "Pressure2"),
            pressure3: int_field(d, "Pressure3"),
            temperature1: int_field(d, "Temperature1"),
            temperature2: int_field(d, "Temperature2"),
            temperature3: int_field(d, "Temperature3"),
        }),
        1552..=1555 => Record::StrainGauges(StrainGauges {
            end: if frame_id < 1554 { End::Front } else { End::Rear },
            set: if frame_id % 2 == 0 { 1 } else { 2 },
            timestamp: now,
            gauge1: int_field(d, "Gauge1"),
            gauge2: int_field(d, "Gauge2"),
            gauge3: int_field(d, "Gauge3"),
            gauge4: int_field(d, "Gauge4"),
            gauge5: int_field(d, "Gauge5"),
            gauge6: int_field(d, "Gauge6"),
        }),
        _ => return None,
    };
    Some(record)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub;
    use crate::sink::MemorySink;

    fn tcu_catalog() -> Arc<Catalog> {
        Arc::new(
            Catalog::from_json(
                r#"[{
                    "frameId": 6,
                    "length": 8,
                    "signals": [
                        {"name": "APPS1", "start": 0, "length": 16, "byteOrder": "little_endian",
                         "isSigned": false, "isFloat": false, "factor": 0.1, "offset": 0.0},
                        {"name": "APPS2", "start": 16, "length": 16, "byteOrder": "little_endian",
                         "isSigned": false, "isFloat": false, "factor": 0.1, "offset": 0.0},
                        {"name": "BSE", "start": 32, "length": 16, "byteOrder": "little_endian",
                         "isSigned": false, "isFloat": false, "factor": 0.1, "offset": 0.0},
                        {"name": "Status", "start": 48, "length": 8, "byteOrder": "little_endian",
                         "isSigned": true, "isFloat": false, "factor": 1.0, "offset": 0.0}
                    ]
                }]"#,
            )
            .unwrap(),
        )
    }

    /// Catalog for the eight cell banks: 16 one-byte cells per frame,
    /// factor 0.001.
    fn cell_catalog() -> Arc<Catalog> {
        let mut messages = Vec::new();
        for frame_id in 50..=57 {
            let signals: Vec<String> = (1..=16)
                .map(|i| {
                    format!(
                        r#"{{"name": "Cell{i}", "start": {}, "length": 8,
                            "byteOrder": "little_endian", "isSigned": false,
                            "isFloat": false, "factor": 0.001, "offset": 0.0}}"#,
                        (i - 1) * 8
                    )
                })
                .collect();
            messages.push(format!(
                r#"{{"frameId": {frame_id}, "length": 16, "signals": [{}]}}"#,
                signals.join(",")
            ));
        }
        Arc::new(Catalog::from_json(&format!("[{}]", messages.join(","))).unwrap())
    }

    struct Fixture {
        sink: Arc<MemorySink>,
        _hub: HubHandle,
        dispatcher: Dispatcher,
        rx: mpsc::Receiver<Vec<u8>>,
    }

    async fn fixture(catalog: Arc<Catalog>) -> Fixture {
        let sink = Arc::new(MemorySink::new());
        let (hub, _task) = hub::spawn();
        let (_id, rx) = hub.register().await;
        let publisher = Publisher::new(Arc::new(Throttle::new(0)), hub.clone());
        let dispatcher = Dispatcher::new(catalog, sink.clone(), publisher);
        Fixture {
            sink,
            _hub: hub,
            dispatcher,
            rx,
        }
    }

    #[tokio::test]
    async fn test_known_frame_persists_and_publishes() {
        let mut f = fixture(tcu_catalog()).await;
        // APPS1=100 (10.0), APPS2=200 (20.0), BSE=55 (5.5), Status=1
        let mut data = vec![0u8; 8];
        data[0..2].copy_from_slice(&100u16.to_le_bytes());
        data[2..4].copy_from_slice(&200u16.to_le_bytes());
        data[4..6].copy_from_slice(&55u16.to_le_bytes());
        data[6] = 1;

        f.dispatcher
            .handle_frame(&RawFrame { frame_id: 6, data })
            .await;

        assert_eq!(f.sink.kinds(), vec!["tcu"]);
        let bytes = f.rx.recv().await.unwrap();
        let envelope = Envelope::decode(&bytes).unwrap();
        assert_eq!(envelope.kind, "tcu");
        assert_eq!(envelope.payload["apps1"], 10.0);
        assert_eq!(envelope.payload["bse"], 5.5);
        assert_eq!(envelope.payload["status"], 1);
    }

    #[tokio::test]
    async fn test_unknown_frame_is_discarded() {
        let mut f = fixture(tcu_catalog()).await;
        f.dispatcher
            .handle_frame(&RawFrame {
                frame_id: 9999,
                data: vec![1, 2, 3, 4],
            })
            .await;

        assert!(f.sink.is_empty());
        assert!(f.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_persist_failure_suppresses_publish() {
        let mut f = fixture(tcu_catalog()).await;
        f.sink.set_fail(true);
        f.dispatcher
            .handle_frame(&RawFrame {
                frame_id: 6,
                data: vec![0u8; 8],
            })
            .await;

        assert!(f.sink.is_empty());
        assert!(f.rx.try_recv().is_err());

        // Recovery: the next frame flows again
        f.sink.set_fail(false);
        f.dispatcher
            .handle_frame(&RawFrame {
                frame_id: 6,
                data: vec![0u8; 8],
            })
            .await;
        assert_eq!(f.sink.len(), 1);
        assert!(f.rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_cell_sequence_publishes_one_snapshot() {
        let mut f = fixture(cell_catalog()).await;

        for round in 0..2 {
            for frame_id in 50u32..=57 {
                let offset = (frame_id - 50) as u8 * 16;
                let data: Vec<u8> = (1..=16).map(|i| offset + i).collect();
                f.dispatcher.handle_frame(&RawFrame { frame_id, data }).await;
            }

            assert_eq!(f.sink.len(), round + 1);
            let bytes = f.rx.recv().await.unwrap();
            let envelope = Envelope::decode(&bytes).unwrap();
            assert_eq!(envelope.kind, "cell");
            let map = envelope.payload.as_object().unwrap();
            assert_eq!(map.len(), 129);
            assert_eq!(map["cell1"], "0.001");
            assert_eq!(map["cell128"], "0.128");
            // Exactly one publish per completed sequence
            assert!(f.rx.try_recv().is_err());
        }
    }

    #[tokio::test]
    async fn test_shutdown_flushes_partial_aggregate() {
        let mut f = fixture(cell_catalog()).await;
        let data: Vec<u8> = (1..=16).collect();
        f.dispatcher
            .handle_frame(&RawFrame { frame_id: 50, data })
            .await;
        assert!(f.sink.is_empty());

        f.dispatcher.shutdown().await;
        assert_eq!(f.sink.kinds(), vec!["cell"]);
        let bytes = f.rx.recv().await.unwrap();
        assert_eq!(Envelope::decode(&bytes).unwrap().kind, "cell");
    }

    #[tokio::test]
    async fn test_pipeline_channel_close_flushes() {
        let sink = Arc::new(MemorySink::new());
        let (hub_handle, _task) = hub::spawn();
        let publisher = Publisher::new(Arc::new(Throttle::new(0)), hub_handle.clone());
        let (tx, pipeline) = spawn_pipeline(cell_catalog(), sink.clone(), publisher);

        let data: Vec<u8> = (1..=16).collect();
        tx.send(RawFrame { frame_id: 50, data }).await.unwrap();
        drop(tx);
        pipeline.await.unwrap();

        assert_eq!(sink.kinds(), vec!["cell"]);
    }
}
