use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use ulid::Ulid;

use rentwell::limits::DAY_MS;
use rentwell::model::now_ms;
use rentwell::{BookingError, BookingRuntime, BookingService, Config, MemoryDirectory, NewReservation};

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

/// `[day, day + days)` counted from tomorrow.
fn request(asset_id: Ulid, base: i64, day: i64, days: i64) -> NewReservation {
    NewReservation {
        asset_id,
        holder_id: Ulid::new(),
        start: base + day * DAY_MS,
        end: base + (day + days) * DAY_MS,
    }
}

async fn phase1_sequential(service: &BookingService, directory: &MemoryDirectory, base: i64) {
    let asset = directory.add(Decimal::from(100));
    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let t = Instant::now();
        service
            .create_reservation(request(asset, base, i as i64, 1))
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} reservations in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("create latency", &mut latencies);
}

async fn phase2_concurrent(service: Arc<BookingService>, directory: &MemoryDirectory, base: i64) {
    let n_tasks = 10;
    let n_per_task = 200;

    let start = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..n_tasks {
        let service = service.clone();
        let asset = directory.add(Decimal::from(100));
        handles.push(tokio::spawn(async move {
            for j in 0..n_per_task {
                service
                    .create_reservation(request(asset, base, j as i64, 1))
                    .await
                    .unwrap();
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let total = n_tasks * n_per_task;
    let ops = total as f64 / elapsed.as_secs_f64();
    println!(
        "  {n_tasks} assets x {n_per_task} reservations = {total} total in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
}

async fn phase3_hot_asset(service: Arc<BookingService>, directory: &MemoryDirectory, base: i64) {
    let rounds = 50;
    let racers = 32;
    let mut latencies = Vec::with_capacity(rounds * racers);
    let mut double_booked = 0;

    for round in 0..rounds {
        let asset = directory.add(Decimal::from(100));
        let mut handles = Vec::new();
        for _ in 0..racers {
            let service = service.clone();
            let req = request(asset, base, round as i64, 2);
            handles.push(tokio::spawn(async move {
                let t = Instant::now();
                let result = service.create_reservation(req).await;
                (t.elapsed(), result)
            }));
        }

        let mut winners = 0;
        for h in handles {
            let (latency, result) = h.await.unwrap();
            latencies.push(latency);
            match result {
                Ok(_) => winners += 1,
                Err(BookingError::Unavailable { .. }) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        if winners != 1 {
            double_booked += 1;
        }
    }

    println!("  {rounds} rounds x {racers} racers, rounds without exactly one winner: {double_booked}");
    print_latency("contended create latency", &mut latencies);
}

async fn phase4_probe_under_load(service: Arc<BookingService>, directory: &MemoryDirectory, base: i64) {
    let stop = Arc::new(AtomicBool::new(false));
    let written = Arc::new(AtomicUsize::new(0));

    let mut writer_handles = Vec::new();
    for _ in 0..5 {
        let service = service.clone();
        let stop = stop.clone();
        let written = written.clone();
        let asset = directory.add(Decimal::from(100));
        writer_handles.push(tokio::spawn(async move {
            let mut day = 0i64;
            while !stop.load(Ordering::Relaxed) {
                if service
                    .create_reservation(request(asset, base, day, 1))
                    .await
                    .is_ok()
                {
                    written.fetch_add(1, Ordering::Relaxed);
                }
                day += 1;
            }
        }));
    }

    let probed = directory.add(Decimal::from(100));
    for day in (0..100).step_by(2) {
        service
            .create_reservation(request(probed, base, day, 1))
            .await
            .unwrap();
    }

    let n_readers = 10;
    let probes_per_reader = 500;
    let mut reader_handles = Vec::new();
    for _ in 0..n_readers {
        let service = service.clone();
        reader_handles.push(tokio::spawn(async move {
            let mut latencies = Vec::with_capacity(probes_per_reader);
            for i in 0..probes_per_reader {
                let day = (i % 100) as i64;
                let t = Instant::now();
                service
                    .is_available(probed, base + day * DAY_MS, base + (day + 1) * DAY_MS)
                    .await
                    .unwrap();
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in reader_handles {
        all_latencies.extend(h.await.unwrap());
    }
    stop.store(true, Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }

    println!("  background writers stored {} reservations", written.load(Ordering::Relaxed));
    print_latency("availability probe", &mut all_latencies);
}

#[tokio::main]
async fn main() {
    rentwell::observability::init_tracing();

    let mut config = Config::from_env();
    if std::env::var("RENTWELL_DATA_DIR").is_err() {
        config.data_dir = std::env::temp_dir().join(format!("rentwell_bench_{}", Ulid::new()));
    }
    rentwell::observability::init(config.metrics_port).expect("failed to install metrics exporter");

    println!("=== rentwell stress benchmark ===");
    println!("data_dir: {}\n", config.data_dir.display());

    let directory = Arc::new(MemoryDirectory::new());
    let runtime = BookingRuntime::start(&config, directory.clone()).expect("failed to start runtime");
    let service = runtime.service();
    let base = now_ms() + DAY_MS;

    println!("[phase 1] sequential create throughput");
    phase1_sequential(&service, &directory, base).await;

    println!("\n[phase 2] concurrent creates across assets");
    phase2_concurrent(service.clone(), &directory, base).await;

    println!("\n[phase 3] contention on one asset");
    phase3_hot_asset(service.clone(), &directory, base).await;

    println!("\n[phase 4] probe latency under write load");
    phase4_probe_under_load(service.clone(), &directory, base).await;

    println!(
        "\nledger holds {} reservations",
        runtime.ledger().reservation_count()
    );
    runtime.shutdown();
    println!("\n=== benchmark complete ===");
}
