use criterion::{criterion_group, criterion_main, Criterion};
use camera_gateway::archive::{RecordPacket, RecordScanner, RecordWriter};
use camera_gateway::model::Packet;
use std::time::{Duration, SystemTime};

fn sample_record(i: u8) -> RecordPacket {
    RecordPacket {
        packet: Packet {
            substream: 0,
            is_keyframe: i % 50 == 0,
            duration: Duration::from_millis(40),
            time: SystemTime::now(),
            payload: vec![i; 1400],
        },
        record_time: SystemTime::now(),
    }
}

fn bench_archive_write(c: &mut Criterion) {
    let dir = std::env::temp_dir().join("camera-gateway-bench-write");
    std::fs::create_dir_all(&dir).ok();
    let path = dir.join("34.0.packets");

    c.bench_function("archive_write_1500_records", |b| {
        b.iter(|| {
            std::fs::remove_file(&path).ok();
            let mut writer = RecordWriter::create(&path).expect("create writer");
            for i in 0..1500u32 {
                writer.write(&sample_record(i as u8)).expect("write record");
            }
        })
    });

    std::fs::remove_dir_all(&dir).ok();
}

fn bench_archive_scan(c: &mut Criterion) {
    let dir = std::env::temp_dir().join("camera-gateway-bench-scan");
    std::fs::create_dir_all(&dir).ok();
    let path = dir.join("34.0.packets");

    let mut writer = RecordWriter::create(&path).expect("create writer");
    for i in 0..1500u32 {
        writer.write(&sample_record(i as u8)).expect("write record");
    }
    drop(writer);

    c.bench_function("archive_scan_1500_records", |b| {
        b.iter(|| {
            let mut scanner = RecordScanner::open(&path).expect("open scanner");
            let mut count = 0;
            while scanner.next().expect("scan record").is_some() {
                count += 1;
            }
            assert_eq!(count, 1500);
        })
    });

    std::fs::remove_dir_all(&dir).ok();
}

criterion_group!(benches, bench_archive_write, bench_archive_scan);
criterion_main!(benches);
