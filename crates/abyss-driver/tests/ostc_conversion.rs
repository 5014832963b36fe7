//! OSTC memory image conversion on a synthetic five dive image

use abyss_core::dive::{Alarm, DecoKind};
use abyss_core::uddf::{DeviceDump, Uddf};
use abyss_driver::format::{convert, DumpFormat, FormatError};
use abyss_driver::ostc::parser::{self, DIVE_END, DIVE_START, HEADER_END, HEADER_SIZE};
use abyss_driver::ostc::OstcFormat;
use chrono::{NaiveDate, NaiveDateTime};
use tempfile::TempDir;

#[derive(Clone, Default)]
struct Sample {
    depth_cm: u16,
    temperature: Option<i16>,
    deco: Option<(u8, u8)>,
    gas_change: Option<u8>,
}

struct Record {
    end: (u8, u8, u8, u8, u8),
    sampling: u8,
    temp_divisor: u8,
    deco_divisor: u8,
    samples: Vec<Sample>,
}

impl Record {
    fn encode(&self) -> Vec<u8> {
        let dive_time = self.samples.len() as u32 * u32::from(self.sampling);
        let (year, month, day, hour, minute) = self.end;

        let mut h = vec![0u8; HEADER_SIZE];
        h[..2].copy_from_slice(&DIVE_START);
        h[2] = 0x20;
        h[3] = month;
        h[4] = day;
        h[5] = year;
        h[6] = hour;
        h[7] = minute;
        let max = self.samples.iter().map(|s| s.depth_cm).max().unwrap_or(0);
        h[8..10].copy_from_slice(&max.to_le_bytes());
        h[10..12].copy_from_slice(&((dive_time / 60) as u16).to_le_bytes());
        h[12] = (dive_time % 60) as u8;
        h[36] = self.sampling;
        h[37] = 0x20 | self.temp_divisor;
        h[38] = 0x20 | self.deco_divisor;
        h[45..47].copy_from_slice(&HEADER_END);

        let applies = |div: u8, n: usize| div != 0 && n % usize::from(div) == 0;
        for (i, s) in self.samples.iter().enumerate() {
            let n = i + 1;
            let mut extra = Vec::new();
            let mut flag = 0u8;
            if let Some(gas) = s.gas_change {
                flag |= 0x80;
                extra.extend([0x20, gas]);
            }
            if applies(self.temp_divisor, n) {
                extra.extend(s.temperature.unwrap_or(0).to_le_bytes());
            }
            if applies(self.deco_divisor, n) {
                let (depth, time) = s.deco.unwrap_or((0, 0));
                extra.extend([depth, time]);
            }
            flag |= extra.len() as u8;

            h.extend(s.depth_cm.to_le_bytes());
            h.push(flag);
            h.extend(extra);
        }
        h.extend(DIVE_END);
        h
    }
}

fn image(records: &[Record]) -> Vec<u8> {
    let mut data = vec![0u8; 266];
    data[..6].copy_from_slice(&[0xaa, 0xaa, 0xaa, 0xaa, 0x55, 0x55]);
    data[6..8].copy_from_slice(&1220u16.to_le_bytes());
    data[8..10].copy_from_slice(&(records.len() as u16).to_le_bytes());
    data[264] = 1;
    data[265] = 80;

    let mut memory = vec![0xffu8; 32];
    for r in records {
        memory.extend(r.encode());
        memory.extend([0xff; 5]);
    }
    memory.resize(parser::PROFILE_MEMORY_SIZE, 0xff);
    data.extend(memory);
    assert_eq!(data.len(), parser::DUMP_SIZE);
    data
}

/// Dive with two deco periods, 191 samples, starting 2009-01-31 23:08
fn deco_dive() -> Record {
    let samples = (0..191usize)
        .map(|j| {
            let (depth_cm, deco) = match j {
                0..=9 => (300 * (j as u16 + 1), (0, 40)),
                10..=119 => (3000, (0, 40 - (j / 10) as u8)),
                120..=139 => (3000, (6, 3)),
                140..=153 => (3000 - 160 * (j as u16 - 139), (6, 3)),
                154..=159 => (630, (6, 2)),
                160..=165 => (450, (0, 0)),
                166..=183 => (320, (3, 2)),
                _ => (250 - 30 * (j as u16 - 184), (0, 0)),
            };
            Sample {
                depth_cm,
                temperature: Some(120 - (j / 6) as i16),
                deco: Some(deco),
                gas_change: (j == 49).then_some(2),
            }
        })
        .collect();

    Record {
        // end of dive: 23:08 + 191 * 10 s + 10 s
        end: (9, 1, 31, 23, 40),
        sampling: 10,
        temp_divisor: 6,
        deco_divisor: 1,
        samples,
    }
}

fn simple_dive(day: u8, hour: u8, depth_cm: u16, count: usize) -> Record {
    let samples = (0..count)
        .map(|j| Sample {
            depth_cm: if j == 0 || j + 1 == count { 150 } else { depth_cm },
            temperature: Some(85),
            ..Default::default()
        })
        .collect();
    Record {
        end: (9, 2, day, hour, 30),
        sampling: 20,
        temp_divisor: 3,
        deco_divisor: 0,
        samples,
    }
}

fn fixture() -> Vec<u8> {
    image(&[
        deco_dive(),
        simple_dive(1, 10, 1200, 30),
        simple_dive(1, 14, 900, 45),
        simple_dive(2, 9, 2150, 60),
        simple_dive(2, 12, 700, 12),
    ])
}

fn dump(data: Vec<u8>) -> DeviceDump {
    DeviceDump {
        id: "ostc".to_string(),
        model: "OSTC Mk.2 1.80".to_string(),
        time: time(2009, 2, 3, 18, 0),
        data,
    }
}

fn time(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, mo, d)
        .unwrap()
        .and_hms_opt(h, mi, 0)
        .unwrap()
}

#[test]
fn test_model_from_image() {
    assert_eq!(OstcFormat.model(&fixture()).unwrap(), "OSTC Mk.2 1.80");
}

#[test]
fn test_five_dives() {
    let dives = convert(&OstcFormat, &dump(fixture())).unwrap();
    assert_eq!(dives.len(), 5);

    let first = &dives[0];
    assert_eq!(first.samples.len(), 193);
    assert_eq!(first.start, time(2009, 1, 31, 23, 8));
    assert_eq!(first.duration, 1920);
    assert_eq!(first.max_depth, 30.0);

    for dive in &dives {
        let (head, tail) = (&dive.samples[0], &dive.samples[dive.samples.len() - 1]);
        assert_eq!((head.time, head.depth), (0, 0.0));
        assert_eq!(tail.depth, 0.0);
        assert_eq!(tail.time, dive.duration);
    }
}

#[test]
fn test_deco_alarm_ranges() {
    let dives = convert(&OstcFormat, &dump(fixture())).unwrap();
    let waypoints = &dives[0].samples;

    for (i, w) in waypoints.iter().enumerate() {
        let expected = (155..161).contains(&i) || (167..185).contains(&i);
        assert_eq!(w.alarm == Some(Alarm::Deco), expected, "waypoint {}", i);
    }

    // ceiling annotation of the second deco period
    let stop = waypoints[170].deco.unwrap();
    assert_eq!(stop.depth, 3.0);
    assert_eq!(stop.duration, 120);
    assert_eq!(stop.kind, DecoKind::Mandatory);
    // zero ceiling means no stop
    assert!(waypoints[5].deco.is_none());
}

#[test]
fn test_sparse_temperature() {
    let dives = convert(&OstcFormat, &dump(fixture())).unwrap();
    let first = &dives[0];

    let with_temp: Vec<usize> = first
        .samples
        .iter()
        .enumerate()
        .filter(|(_, s)| s.temperature.is_some())
        .map(|(i, _)| i)
        .collect();
    // every 6th sample, waypoint index is sample number
    assert_eq!(with_temp.first(), Some(&6));
    assert!(with_temp.iter().all(|i| i % 6 == 0));

    // lowest logged value: sample 186 is 120 - 185 / 6 = 90 (9.0 C)
    let min = first.min_temperature.unwrap();
    assert!((min - 282.15).abs() < 1e-9, "{}", min);
}

#[test]
fn test_invalid_record_skipped() {
    let mut broken = simple_dive(1, 10, 1200, 30);
    broken.end = (9, 14, 1, 10, 30);
    let mut deep = simple_dive(3, 10, 65000, 10);
    deep.end = (9, 2, 3, 10, 30);

    let data = image(&[deco_dive(), broken, simple_dive(2, 9, 2150, 60), deep]);
    let dives = convert(&OstcFormat, &dump(data)).unwrap();
    assert_eq!(dives.len(), 2);
    assert_eq!(dives[1].max_depth, 21.5);
}

#[test]
fn test_invalid_image() {
    let mut data = fixture();
    data[0] = 0;
    assert!(matches!(
        convert(&OstcFormat, &dump(data)),
        Err(FormatError::InvalidPreamble)
    ));
    assert!(matches!(
        convert(&OstcFormat, &dump(vec![0xaa; 512])),
        Err(FormatError::TooShort { .. })
    ));
}

#[test]
fn test_dump_to_profile_file() {
    let temp_dir = TempDir::new().unwrap();
    let dump_path = temp_dir.path().join("ostc-01.uddf");
    let profile_path = temp_dir.path().join("dives.uddf");

    dump(fixture()).save(&dump_path).unwrap();
    let loaded = DeviceDump::open(&dump_path).unwrap();
    assert_eq!(loaded.data.len(), parser::DUMP_SIZE);

    let mut doc = Uddf::new(loaded.time);
    for dive in convert(&OstcFormat, &loaded).unwrap() {
        dive.write_to(&mut doc);
    }
    doc.to_file(&profile_path).unwrap();

    let info = Uddf::from_file(&profile_path).unwrap().dive_info().unwrap();
    assert_eq!(info.len(), 5);
    assert_eq!(info[0].start, time(2009, 1, 31, 23, 8));
    assert!((info[0].duration - 32.0).abs() < 1e-9);
    assert_eq!(info[3].max_depth, 21.5);
}
