//! Sensus Ultra memory image conversion through the extraction bridge

use abyss_core::dive::reorder;
use abyss_core::uddf::DeviceDump;
use abyss_core::units::mbar_to_depth;
use abyss_driver::bridge::BridgeConfig;
use abyss_driver::format::{convert, DumpFormat, FormatError};
use abyss_driver::sensus::parser::{DATA_SIZE, DUMP_SIZE, HANDSHAKE_SIZE, USER_SIZE};
use abyss_driver::sensus::SensusUltraFormat;
use abyss_driver::DeviceError;
use chrono::{NaiveDate, NaiveDateTime};

/// Device clock when the dump was taken
const DEVICE_TIME: u32 = 100_000;

fn time(h: u32, m: u32, s: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2011, 6, 12)
        .unwrap()
        .and_hms_opt(h, m, s)
        .unwrap()
}

/// Dive bytes; samples are (temperature in 0.01 K, pressure in mbar)
fn dive(device_time: u32, endcount: u16, samples: &[(u16, u16)], stop: bool) -> Vec<u8> {
    let mut d = vec![0u8; 4];
    d.extend(device_time.to_le_bytes());
    for v in [10u16, 0x0190, endcount, 4] {
        d.extend(v.to_le_bytes());
    }
    for (t, p) in samples {
        d.extend(t.to_le_bytes());
        d.extend(p.to_le_bytes());
    }
    if stop {
        d.extend([0xff; 4]);
    }
    d
}

fn image(dives: &[Vec<u8>]) -> Vec<u8> {
    let mut data = vec![1u8, 2];
    data.extend(4242u16.to_le_bytes());
    data.extend(DEVICE_TIME.to_le_bytes());
    data.resize(HANDSHAKE_SIZE + USER_SIZE, 0);

    let mut memory = vec![0xffu8; 1024];
    for d in dives {
        memory.extend(d);
    }
    memory.resize(DATA_SIZE, 0xff);
    data.extend(memory);
    assert_eq!(data.len(), DUMP_SIZE);
    data
}

fn dump(data: Vec<u8>) -> DeviceDump {
    DeviceDump {
        id: "su".to_string(),
        model: "Sensus Ultra 2.1".to_string(),
        time: time(12, 0, 0),
        data,
    }
}

fn morning_dive() -> Vec<u8> {
    let c = |celsius: u16| 27315 + celsius * 100;
    dive(
        90_000,
        2,
        &[
            (c(18), 1500),
            (c(16), 2000),
            (c(15), 3000),
            (c(15), 3000),
            (c(14), 2500),
            (c(15), 2000),
            (c(16), 1500),
            (c(17), 1200),
            // logged after surfacing
            (c(2), 4000),
            (c(1), 1013),
        ],
        true,
    )
}

fn noon_dive() -> Vec<u8> {
    let c = |celsius: u16| 27315 + celsius * 100;
    dive(
        95_000,
        1,
        &[(c(20), 1400), (c(19), 1800), (c(19), 1400), (c(20), 1013)],
        true,
    )
}

#[test]
fn test_model_from_handshake() {
    let data = image(&[]);
    let format = SensusUltraFormat::default();
    assert_eq!(format.model(&data).unwrap(), "Sensus Ultra 2.1");
}

#[test]
fn test_dives_newest_first() {
    let format = SensusUltraFormat::default();
    let dump = dump(image(&[morning_dive(), noon_dive()]));
    let raw: Vec<_> = format
        .raw_dives(&dump)
        .unwrap()
        .map(|d| d.unwrap())
        .collect();

    assert_eq!(raw.len(), 2);
    // boot at 12:00 - 100000 s, dive at +95000 s, one interval earlier
    assert_eq!(raw[0].start, time(10, 36, 30));
    assert_eq!(raw[1].start, time(9, 13, 10));
    assert_eq!(raw[1].samples.len(), 10);
    assert_eq!(raw[1].endcount, 2);
    assert_eq!(raw[1].samples[0].time, 20);
    assert_eq!(raw[1].samples[9].time, 110);
}

#[test]
fn test_convert_trims_endcount() {
    let format = SensusUltraFormat::default();
    let mut dives = convert(&format, &dump(image(&[morning_dive(), noon_dive()]))).unwrap();
    reorder(&mut dives);

    assert_eq!(dives.len(), 2);
    let morning = &dives[0];
    // 10 samples, 2 trailing dropped, 2 surface samples added
    assert_eq!(morning.samples.len(), 10);
    assert_eq!(morning.duration, 100);
    assert!((morning.max_depth - mbar_to_depth(3000.0)).abs() < 1e-9);
    assert!((morning.min_temperature.unwrap() - 287.15).abs() < 1e-9);
    assert_eq!(morning.samples[1].time, 20);
    assert_eq!(morning.samples[9].depth, 0.0);
}

#[test]
fn test_small_queue_nested_extraction() {
    let format = SensusUltraFormat::new(BridgeConfig {
        capacity: 1,
        ..BridgeConfig::default()
    });
    let dives: Vec<_> = (0..12)
        .map(|i| dive(10_000 + i * 1000, 0, &[(28815, 1600); 40], true))
        .collect();

    let converted = convert(&format, &dump(image(&dives))).unwrap();
    assert_eq!(converted.len(), 12);
    assert!(converted.iter().all(|d| d.samples.len() == 42));
}

#[test]
fn test_extraction_failure_after_valid_dives() {
    let format = SensusUltraFormat::default();
    // samples of the first dive run into the second one
    let mut broken = dive(80_000, 0, &[(28815, 1600); 8], false);
    broken.extend(noon_dive());
    let dump = dump(image(&[broken]));

    let mut raw = format.raw_dives(&dump).unwrap();
    let first = raw.next().unwrap().unwrap();
    assert_eq!(first.start, time(10, 36, 30));
    assert!(matches!(
        raw.next(),
        Some(Err(FormatError::Device(DeviceError::Extraction(_))))
    ));
    assert!(raw.next().is_none());

    assert!(matches!(
        convert(&format, &dump),
        Err(FormatError::Device(_))
    ));
}

#[test]
fn test_empty_memory() {
    let format = SensusUltraFormat::default();
    let dives = convert(&format, &dump(image(&[]))).unwrap();
    assert!(dives.is_empty());
}
