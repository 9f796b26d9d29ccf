use std::time::{Duration, Instant};

use taskshift::model::{format_rfc3339, Ms, HOUR_MS as HOUR, MINUTE_MS as MINUTE};
use tokio_postgres::{Config, NoTls};
use ulid::Ulid;

/// 2030-01-07T00:00:00Z, a Monday.
const BASE: Ms = 1_893_974_400_000;

async fn connect(host: &str, port: u16) -> tokio_postgres::Client {
    let mut config = Config::new();
    config.host(host).port(port).dbname("taskshift").user("bench");

    let (client, conn) = config.connect(NoTls).await.expect("connect failed");
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            eprintln!("connection error: {e}");
        }
    });
    client
}

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

/// Register a fresh engineer and give it `n` hour-long tasks spread over the days.
async fn engineer_with_tasks(client: &tokio_postgres::Client, n: usize) -> (String, Vec<String>) {
    let engineer = format!("bench-{}", Ulid::new());
    client
        .batch_execute(&format!("INSERT INTO engineers (id) VALUES ('{engineer}')"))
        .await
        .unwrap();

    let mut ids = Vec::with_capacity(n);
    for i in 0..n as Ms {
        let id = Ulid::new().to_string();
        // 08:00, 10:00, 14:00, 16:00 on successive days.
        let slot = [8, 10, 14, 16][(i % 4) as usize];
        let start = BASE + (i / 4) * 24 * HOUR + slot * HOUR;
        insert_task(client, &id, &engineer, "P3", start, start + HOUR).await;
        ids.push(id);
    }
    (engineer, ids)
}

async fn insert_task(client: &tokio_postgres::Client, id: &str, engineer: &str, priority: &str, start: Ms, end: Ms) {
    client
        .batch_execute(&format!(
            r#"INSERT INTO tasks (id, engineer_id, priority, start, "end") VALUES ('{id}', '{engineer}', '{priority}', '{}', '{}')"#,
            format_rfc3339(start),
            format_rfc3339(end),
        ))
        .await
        .unwrap();
}

async fn relocate(client: &tokio_postgres::Client, task: &str, engineer: &str, start: Ms) -> Result<(), tokio_postgres::Error> {
    client
        .batch_execute(&format!(
            r#"INSERT INTO relocations (task_id, start, "end", engineer_id) VALUES ('{task}', '{}', '{}', '{engineer}')"#,
            format_rfc3339(start),
            format_rfc3339(start + 45 * MINUTE),
        ))
        .await
}

async fn phase1_sequential_inserts(host: &str, port: u16) {
    let client = connect(host, port).await;
    let (engineer, _) = engineer_with_tasks(&client, 0).await;

    let n = 500;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n as Ms {
        let id = Ulid::new().to_string();
        // Every fifth insert is P1 and lands on the morning, forcing a reshuffle.
        let (priority, s) = if i % 5 == 0 {
            ("P1", BASE + 8 * HOUR)
        } else {
            ("P2", BASE + i * 2 * HOUR)
        };
        let t = Instant::now();
        insert_task(&client, &id, &engineer, priority, s, s + 30 * MINUTE).await;
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} inserts in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("insert latency", &mut latencies);
}

async fn phase2_concurrent_relocations(host: &str, port: u16) {
    let setup = connect(host, port).await;
    let (left, left_tasks) = engineer_with_tasks(&setup, 100).await;
    let (right, right_tasks) = engineer_with_tasks(&setup, 100).await;
    drop(setup);

    let n_workers = 8;
    let n_per_worker = 200;
    let start = Instant::now();
    let mut handles = Vec::new();

    for w in 0..n_workers {
        let host = host.to_string();
        let (left, right) = (left.clone(), right.clone());
        let tasks: Vec<String> = left_tasks.iter().chain(&right_tasks).cloned().collect();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let mut latencies = Vec::with_capacity(n_per_worker);
            let mut failed = 0usize;
            for j in 0..n_per_worker {
                let task = &tasks[(w * 31 + j * 7) % tasks.len()];
                // Cross the two engineers back and forth.
                let target = if (w + j) % 2 == 0 { &left } else { &right };
                let s = BASE + ((j % 20) as Ms) * HOUR + ((w as Ms) * 5) * MINUTE;
                let t = Instant::now();
                if relocate(&client, task, target, s).await.is_err() {
                    failed += 1;
                }
                latencies.push(t.elapsed());
            }
            (latencies, failed)
        }));
    }

    let mut all = Vec::new();
    let mut failed = 0;
    for h in handles {
        let (latencies, f) = h.await.unwrap();
        all.extend(latencies);
        failed += f;
    }

    let elapsed = start.elapsed();
    let total = n_workers * n_per_worker;
    println!(
        "  {n_workers} workers x {n_per_worker} relocations = {total} total in {:.2}s = {:.0} ops/sec ({failed} failed)",
        elapsed.as_secs_f64(),
        total as f64 / elapsed.as_secs_f64()
    );
    print_latency("relocation latency", &mut all);

    let check = connect(host, port).await;
    for engineer in [&left, &right] {
        let rows = check
            .simple_query(&format!("SELECT * FROM conflicts WHERE engineer_id = '{engineer}'"))
            .await
            .unwrap();
        let conflicts = rows
            .iter()
            .filter(|m| matches!(m, tokio_postgres::SimpleQueryMessage::Row(_)))
            .count();
        println!("  {engineer}: {conflicts} conflicts after the run");
    }
}

async fn phase3_read_under_load(host: &str, port: u16) {
    let setup = connect(host, port).await;
    let (engineer, tasks) = engineer_with_tasks(&setup, 200).await;
    drop(setup);

    let stop = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for w in 0..4 {
        let host = host.to_string();
        let stop = stop.clone();
        let engineer = engineer.clone();
        let tasks = tasks.clone();
        writer_handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let mut i = 0usize;
            while !stop.load(std::sync::atomic::Ordering::Relaxed) {
                let task = &tasks[(w * 53 + i * 11) % tasks.len()];
                let s = BASE + ((i % 40) as Ms) * HOUR;
                let _ = relocate(&client, task, &engineer, s).await;
                i += 1;
            }
        }));
    }

    let n_readers = 10;
    let reads_per_reader = 300;
    let mut reader_handles = Vec::new();
    for _ in 0..n_readers {
        let host = host.to_string();
        let engineer = engineer.clone();
        reader_handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for _ in 0..reads_per_reader {
                let t = Instant::now();
                client
                    .simple_query(&format!("SELECT * FROM tasks WHERE engineer_id = '{engineer}'"))
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

    stop.store(true, std::sync::atomic::Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }

    print_latency("timeline read", &mut all_latencies);
}

async fn phase4_connection_storm(host: &str, port: u16) {
    let n_conns = 50;
    let ops_per_conn = 10;

    let start = Instant::now();
    let mut handles = Vec::new();
    let success = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));

    for _ in 0..n_conns {
        let host = host.to_string();
        let success = success.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let (engineer, _) = engineer_with_tasks(&client, 0).await;
            for i in 0..ops_per_conn as Ms {
                let s = BASE + i * 3 * HOUR;
                insert_task(&client, &Ulid::new().to_string(), &engineer, "P2", s, s + HOUR).await;
            }
            success.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }));
    }

    for h in handles {
        let _ = h.await;
    }

    let elapsed = start.elapsed();
    let ok = success.load(std::sync::atomic::Ordering::Relaxed);
    println!(
        "  {n_conns} connections, {ops_per_conn} ops each: {ok}/{n_conns} succeeded in {:.2}s",
        elapsed.as_secs_f64()
    );
}

#[tokio::main]
async fn main() {
    let host = std::env::var("TASKSHIFT_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("TASKSHIFT_PORT")
        .unwrap_or_else(|_| "5433".into())
        .parse()
        .expect("invalid TASKSHIFT_PORT");

    println!("=== taskshift stress benchmark ===");
    println!("target: {host}:{port}\n");

    // Each phase works on its own freshly registered engineers.

    println!("[phase 1] sequential inserts with reshuffles");
    phase1_sequential_inserts(&host, port).await;

    println!("\n[phase 2] concurrent cross-engineer relocations");
    phase2_concurrent_relocations(&host, port).await;

    println!("\n[phase 3] timeline reads under relocation load");
    phase3_read_under_load(&host, port).await;

    println!("\n[phase 4] connection storm");
    phase4_connection_storm(&host, port).await;

    println!("\n=== benchmark complete ===");
}
