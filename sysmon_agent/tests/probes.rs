//! Probe throttling, history recording, and per-tick sampling.
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sysmon_agent::metrics::{CpuSource, StaticCpu};
use sysmon_agent::probe::{now_ms, Clock, Probe, ProbeKind, ProbeOptions};
use sysmon_agent::sampler::Sampler;
use sysmon_agent::serial::fake::FakeTransport;
use sysmon_agent::serial::{CacheSettings, FrameCache};
use sysmon_agent::storage::{channel_path, StorageSettings};
use sysmon_rrd::Database;

struct ManualClock(Arc<AtomicI64>);

impl ManualClock {
    fn start() -> Self {
        Self(Arc::new(AtomicI64::new(now_ms())))
    }

    fn clock(&self) -> Clock {
        let t = self.0.clone();
        Arc::new(move || t.load(Ordering::SeqCst))
    }

    fn advance(&self, ms: i64) {
        self.0.fetch_add(ms, Ordering::SeqCst);
    }
}

fn options(min_interval_ms: u64) -> ProbeOptions {
    ProbeOptions {
        min_interval: Duration::from_millis(min_interval_ms),
        ..ProbeOptions::default()
    }
}

fn cpu_cores(values: Vec<f32>) -> ProbeKind {
    ProbeKind::cpu_cores(Box::new(StaticCpu { cores: values }))
}

fn sensor_cache(fake: &FakeTransport, retry_ms: u64) -> Arc<FrameCache> {
    Arc::new(FrameCache::new(
        Arc::new(fake.clone()),
        CacheSettings {
            window: Duration::ZERO,
            read_timeout: Duration::from_secs(2),
            retry_delay: Duration::from_millis(retry_ms),
        },
    ))
}

#[tokio::test]
async fn measurement_is_reused_until_interval_passes() {
    let dir = tempfile::tempdir().unwrap();
    let clock = ManualClock::start();
    let probe = Probe::open("cpu", cpu_cores(vec![10.0, 30.0]), options(1_000), dir.path(), &StorageSettings::default())
        .unwrap()
        .with_clock(clock.clock());

    let first = probe.get_data().await;
    assert_eq!(first.values, vec![Some(10.0), Some(30.0)]);

    clock.advance(400);
    assert_eq!(probe.get_data().await, first);
    clock.advance(600);
    // Exactly on the boundary still counts as fresh.
    assert_eq!(probe.get_data().await, first);

    clock.advance(1);
    let second = probe.get_data().await;
    assert!(second.timestamp > first.timestamp);
    assert_eq!(second.timestamp, first.timestamp + 1_001);
    assert_eq!(probe.last_measurement(), Some(second));
}

#[tokio::test]
async fn fresh_values_are_recorded_per_channel() {
    let dir = tempfile::tempdir().unwrap();
    let clock = ManualClock::start();
    let probe = Probe::open("cpu", cpu_cores(vec![12.5, 87.5]), options(500), dir.path(), &StorageSettings::default())
        .unwrap()
        .with_clock(clock.clock());

    let m = probe.get_data().await;
    let secs = m.timestamp.div_euclid(1000);
    drop(probe);

    for (ch, expected) in [(0, 12.5), (1, 87.5)] {
        let db = Database::open(channel_path(dir.path(), "cpu_cores", "cpu", ch)).unwrap();
        assert_eq!(db.point(0, secs).unwrap(), Some(expected));
    }
}

#[tokio::test]
async fn absent_sensor_values_are_not_recorded() {
    let dir = tempfile::tempdir().unwrap();
    let fake = FakeTransport::new(vec![">", "other:1", "<"]);
    let kind = ProbeKind::sensor(sensor_cache(&fake, 1_000), "/dev/ttyFAKE0", 9600, "temp");
    let clock = ManualClock::start();
    let probe = Probe::open("temp", kind, options(500), dir.path(), &StorageSettings::default())
        .unwrap()
        .with_clock(clock.clock());

    let m = probe.get_data().await;
    assert_eq!(m.values, vec![None]);
    let secs = m.timestamp.div_euclid(1000);
    drop(probe);

    let db = Database::open(channel_path(dir.path(), "sensor", "temp", 0)).unwrap();
    assert_eq!(db.point(0, secs).unwrap(), None);
}

#[tokio::test]
async fn description_reports_label_and_channels() {
    let dir = tempfile::tempdir().unwrap();
    let opts = ProbeOptions {
        label: Some("CPU".into()),
        height: Some(40),
        ..ProbeOptions::default()
    };
    let probe = Probe::open("cpu", cpu_cores(vec![0.0; 4]), opts, dir.path(), &StorageSettings::default()).unwrap();
    let d = probe.describe();
    assert_eq!(d.name, "CPU");
    assert_eq!(d.value_count, 4);
    assert_eq!(d.extent, [0.0, 100.0]);
    assert_eq!(d.height, Some(40));
}

#[tokio::test]
async fn unreachable_device_only_blanks_sensor_probes() {
    let dir = tempfile::tempdir().unwrap();
    let fake = FakeTransport::new(vec![">", "temp:19.0", "<"]);
    fake.set_available(false);
    let cache = sensor_cache(&fake, 0);
    let clock = ManualClock::start();
    let settings = StorageSettings::default();

    let cpu = Probe::open("cpu", cpu_cores(vec![50.0]), options(500), dir.path(), &settings)
        .unwrap()
        .with_clock(clock.clock());
    let temp = Probe::open(
        "temp",
        ProbeKind::sensor(cache, "/dev/ttyFAKE0", 9600, "temp"),
        options(500),
        dir.path(),
        &settings,
    )
    .unwrap()
    .with_clock(clock.clock());
    let mut sampler = Sampler::new(vec![Arc::new(cpu), Arc::new(temp)]);

    for _ in 0..3 {
        let snap = sampler.collect(Duration::from_secs(2)).await;
        assert_eq!(snap["cpu"].values, vec![Some(50.0)]);
        assert_eq!(snap["temp"].values, vec![None]);
        clock.advance(1_000);
    }

    fake.set_available(true);
    let snap = sampler.collect(Duration::from_secs(2)).await;
    assert_eq!(snap["temp"].values, vec![Some(19.0)]);
    assert_eq!(snap["cpu"].values, vec![Some(50.0)]);
}

#[tokio::test]
async fn slow_probe_does_not_hold_up_the_tick() {
    let dir = tempfile::tempdir().unwrap();
    let fake = FakeTransport::with_line_delay(vec![">", "temp:7", "<"], Duration::from_millis(100));
    let clock = ManualClock::start();
    let settings = StorageSettings::default();

    let cpu = Probe::open("cpu", cpu_cores(vec![5.0]), options(500), dir.path(), &settings)
        .unwrap()
        .with_clock(clock.clock());
    let temp = Probe::open(
        "temp",
        ProbeKind::sensor(sensor_cache(&fake, 1_000), "/dev/ttyFAKE0", 9600, "temp"),
        options(500),
        dir.path(),
        &settings,
    )
    .unwrap()
    .with_clock(clock.clock());
    let mut sampler = Sampler::new(vec![Arc::new(cpu), Arc::new(temp)]);

    let snap = sampler.collect(Duration::from_millis(50)).await;
    assert!(snap.contains_key("cpu"));
    assert!(!snap.contains_key("temp"), "no earlier measurement to fall back on");

    tokio::time::sleep(Duration::from_millis(500)).await;
    clock.advance(1_000);
    let snap = sampler.collect(Duration::from_millis(50)).await;
    assert_eq!(snap["temp"].values, vec![Some(7.0)]);
    assert_eq!(fake.opens(), 1, "the in-flight measurement was finished, not restarted");
}

#[tokio::test]
async fn slow_read_is_stamped_when_it_completes() {
    let dir = tempfile::tempdir().unwrap();
    // Three lines at 100ms each: the frame takes ~300ms to arrive.
    let fake = FakeTransport::with_line_delay(vec![">", "temp:3", "<"], Duration::from_millis(100));
    let kind = ProbeKind::sensor(sensor_cache(&fake, 1_000), "/dev/ttyFAKE0", 9600, "temp");
    let probe = Probe::open("temp", kind, options(500), dir.path(), &StorageSettings::default()).unwrap();

    let before = now_ms();
    let m = probe.get_data().await;
    let after = now_ms();
    assert_eq!(m.values, vec![Some(3.0)]);
    assert!(m.timestamp >= before + 250, "stamped {} ms after start", m.timestamp - before);
    assert!(m.timestamp <= after);

    let secs = m.timestamp.div_euclid(1000);
    drop(probe);
    let db = Database::open(channel_path(dir.path(), "sensor", "temp", 0)).unwrap();
    assert_eq!(db.point(0, secs).unwrap(), Some(3.0));
}

// Fails hard on its first sample only.
struct FaultyOnce {
    sampled: bool,
}

impl CpuSource for FaultyOnce {
    fn core_count(&self) -> usize {
        2
    }

    fn per_core(&mut self) -> Vec<f32> {
        if !self.sampled {
            self.sampled = true;
            panic!("cpu counters unreadable");
        }
        vec![1.0, 2.0]
    }

    fn overall(&mut self) -> f32 {
        1.5
    }
}

#[tokio::test]
async fn panicking_probe_is_left_out_of_the_tick() {
    let dir = tempfile::tempdir().unwrap();
    let clock = ManualClock::start();
    let settings = StorageSettings::default();

    let faulty = Probe::open(
        "faulty",
        ProbeKind::cpu_cores(Box::new(FaultyOnce { sampled: false })),
        options(500),
        dir.path(),
        &settings,
    )
    .unwrap()
    .with_clock(clock.clock());
    let cpu = Probe::open("cpu", cpu_cores(vec![50.0]), options(500), dir.path(), &settings)
        .unwrap()
        .with_clock(clock.clock());
    let mut sampler = Sampler::new(vec![Arc::new(faulty), Arc::new(cpu)]);

    let snap = sampler.collect(Duration::from_secs(2)).await;
    assert!(!snap.contains_key("faulty"));
    assert_eq!(snap["cpu"].values, vec![Some(50.0)]);

    clock.advance(1_000);
    let snap = sampler.collect(Duration::from_secs(2)).await;
    assert_eq!(snap["faulty"].values, vec![Some(1.0), Some(2.0)]);
    assert_eq!(snap["cpu"].values, vec![Some(50.0)]);
}
