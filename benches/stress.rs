use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use rand::Rng;
use tokio_postgres::error::SqlState;
use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage};

const HOUR: i64 = 3_600_000;
const DAY: i64 = 24 * HOUR;
const WRITER_SLOTS: i64 = 2_000;

type BenchResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

async fn connect(host: &str, port: u16) -> BenchResult<Client> {
    let mut config = Config::new();
    config.host(host).port(port).dbname("fleet").user("bench");

    let (client, conn) = config.connect(NoTls).await?;
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            eprintln!("connection error: {e}");
        }
    });
    Ok(client)
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
        percentile(latencies, 100.0).as_secs_f64() * 1000.0,
    );
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// First column of the first returned row.
async fn returning_id(client: &Client, sql: &str) -> BenchResult<String> {
    for msg in client.simple_query(sql).await? {
        if let SimpleQueryMessage::Row(row) = msg {
            if let Some(id) = row.get(0) {
                return Ok(id.to_string());
            }
        }
    }
    Err(format!("no row returned by {sql}").into())
}

/// Random legacy-format plate. The server persists across runs, so a
/// duplicate (23505) just means another draw.
fn random_plate() -> String {
    let mut rng = rand::thread_rng();
    let letters: String = (0..3).map(|_| rng.gen_range(b'A'..=b'Z') as char).collect();
    format!("{letters}{:04}", rng.gen_range(0..10_000))
}

async fn register_sedan(client: &Client) -> BenchResult<String> {
    loop {
        let sql = format!(
            "INSERT INTO vehicles (plate, model, category, passenger_capacity) \
             VALUES ('{}', 'Bench Sedan', 'sedan', 5) RETURNING id",
            random_plate()
        );
        match client.simple_query(&sql).await {
            Ok(messages) => {
                for msg in messages {
                    if let SimpleQueryMessage::Row(row) = msg {
                        if let Some(id) = row.get(0) {
                            return Ok(id.to_string());
                        }
                    }
                }
                return Err("vehicle insert returned no row".into());
            }
            Err(e) if e.code() == Some(&SqlState::UNIQUE_VIOLATION) => continue,
            Err(e) => return Err(e.into()),
        }
    }
}

/// Runs one pending → approved → in_progress → completed cycle on `vehicle_id`.
async fn booking_cycle(client: &Client, vehicle_id: &str, start: i64) -> BenchResult<()> {
    let end = start + HOUR;
    let id = returning_id(
        client,
        &format!(
            "INSERT INTO bookings (departure_at, arrival_at, requester_name, headcount, destination, required_category) \
             VALUES ({start}, {end}, 'Bench Runner', 2, 'Depot', 'sedan') RETURNING id"
        ),
    )
    .await?;
    client
        .batch_execute(&format!(
            "UPDATE bookings SET status = 'approved', vehicle_id = '{vehicle_id}' WHERE id = '{id}'"
        ))
        .await?;
    client
        .batch_execute(&format!(
            "UPDATE bookings SET status = 'in_progress' WHERE id = '{id}'"
        ))
        .await?;
    client
        .batch_execute(&format!(
            "UPDATE bookings SET status = 'completed', admin_notes = 'bench' WHERE id = '{id}'"
        ))
        .await?;
    Ok(())
}

/// Start of the window slot `slot` for this run. Each run picks a random
/// far-future base so completed trips from earlier runs stay out of the way.
fn slot_start(base: i64, slot: i64) -> i64 {
    base + slot * 2 * HOUR
}

async fn setup(client: &Client, n: usize) -> BenchResult<Vec<String>> {
    let mut vehicles = Vec::with_capacity(n);
    for _ in 0..n {
        vehicles.push(register_sedan(client).await?);
    }
    println!("  registered {} sedans", vehicles.len());
    Ok(vehicles)
}

async fn phase1_sequential(host: &str, port: u16, vehicle_id: &str, base: i64) -> BenchResult<()> {
    let client = connect(host, port).await?;

    let n = 500;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let t = Instant::now();
        booking_cycle(&client, vehicle_id, slot_start(base, i as i64)).await?;
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = (n * 4) as f64 / elapsed.as_secs_f64();
    println!(
        "  {n} booking cycles in {:.2}s = {ops:.0} statements/sec",
        elapsed.as_secs_f64()
    );
    print_latency("cycle latency", &mut latencies);
    Ok(())
}

async fn phase2_concurrent(host: &str, port: u16, vehicles: &[String], base: i64) -> BenchResult<()> {
    let n_per_task = 100;

    let start = Instant::now();
    let mut handles = Vec::new();

    for (t, vehicle_id) in vehicles.iter().enumerate() {
        let host = host.to_string();
        let vehicle_id = vehicle_id.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await?;
            for j in 0..n_per_task {
                let slot = 1_000 + (t as i64) * 200 + j;
                booking_cycle(&client, &vehicle_id, slot_start(base, slot)).await?;
            }
            BenchResult::Ok(())
        }));
    }

    let n_tasks = handles.len();
    for h in handles {
        h.await??;
    }

    let elapsed = start.elapsed();
    let total = n_tasks as i64 * n_per_task;
    let ops = total as f64 / elapsed.as_secs_f64();
    println!(
        "  {n_tasks} tasks x {n_per_task} cycles = {total} total in {:.2}s = {ops:.0} cycles/sec",
        elapsed.as_secs_f64()
    );
    Ok(())
}

async fn phase3_read_under_load(host: &str, port: u16, vehicles: &[String], base: i64) -> BenchResult<()> {
    let stop = Arc::new(AtomicBool::new(false));

    // Writers keep cycling bookings on their own sedans.
    let mut writer_handles = Vec::new();
    for (w, vehicle_id) in vehicles.iter().take(5).enumerate() {
        let host = host.to_string();
        let vehicle_id = vehicle_id.clone();
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await?;
            let mut i = 0i64;
            while !stop.load(Ordering::Relaxed) && i < WRITER_SLOTS {
                let slot = 5_000 + (w as i64) * WRITER_SLOTS + i;
                let _ = booking_cycle(&client, &vehicle_id, slot_start(base, slot)).await;
                i += 1;
            }
            BenchResult::Ok(())
        }));
    }

    let n_readers = 10;
    let reads_per_reader = 500;
    let mut reader_handles = Vec::new();

    for r in 0..n_readers {
        let host = host.to_string();
        reader_handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await?;
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for k in 0..reads_per_reader {
                let s = slot_start(base, (r * reads_per_reader + k) as i64);
                let e = s + HOUR;
                let t = Instant::now();
                client
                    .batch_execute(&format!(
                        r#"SELECT * FROM available_vehicles WHERE category = 'sedan' AND start >= {s} AND "end" <= {e}"#
                    ))
                    .await?;
                latencies.push(t.elapsed());
            }
            BenchResult::Ok(latencies)
        }));
    }

    let mut all_latencies = Vec::new();
    for h in reader_handles {
        all_latencies.extend(h.await??);
    }

    stop.store(true, Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }

    print_latency("availability query", &mut all_latencies);
    Ok(())
}

async fn phase4_connection_storm(host: &str, port: u16) -> BenchResult<()> {
    let n_conns = 50;
    let ops_per_conn = 10;

    let start = Instant::now();
    let mut handles = Vec::new();
    let success = Arc::new(AtomicUsize::new(0));

    for _ in 0..n_conns {
        let host = host.to_string();
        let success = success.clone();
        handles.push(tokio::spawn(async move {
            let Ok(client) = connect(&host, port).await else {
                return;
            };
            for _ in 0..ops_per_conn {
                if client.batch_execute("SELECT * FROM fleet_stats").await.is_err() {
                    return;
                }
            }
            success.fetch_add(1, Ordering::Relaxed);
        }));
    }

    for h in handles {
        let _ = h.await;
    }

    let elapsed = start.elapsed();
    let ok = success.load(Ordering::Relaxed);
    println!(
        "  {n_conns} connections, {ops_per_conn} ops each: {ok}/{n_conns} succeeded in {:.2}s",
        elapsed.as_secs_f64()
    );
    Ok(())
}

#[tokio::main]
async fn main() -> BenchResult<()> {
    let host = std::env::var("FLEETBOOK_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("FLEETBOOK_PORT")
        .unwrap_or_else(|_| "5433".into())
        .parse()?;

    println!("=== fleetbook stress benchmark ===");
    println!("target: {host}:{port}\n");

    let base = {
        let days_out = rand::thread_rng().gen_range(30..3_000);
        let start = now_ms() + days_out * DAY;
        start - start % HOUR
    };

    println!("[setup]");
    let setup_client = connect(&host, port).await?;
    let vehicles = setup(&setup_client, 10).await?;
    drop(setup_client);

    println!("\n[phase 1] sequential booking cycles");
    phase1_sequential(&host, port, &vehicles[0], base).await?;

    println!("\n[phase 2] concurrent booking cycles");
    phase2_concurrent(&host, port, &vehicles, base).await?;

    println!("\n[phase 3] availability latency under write load");
    phase3_read_under_load(&host, port, &vehicles, base).await?;

    println!("\n[phase 4] connection storm");
    phase4_connection_storm(&host, port).await?;

    println!("\n=== benchmark complete ===");
    Ok(())
}
