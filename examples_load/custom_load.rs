//! Sustained overflow against a real file: compares how many records each
//! backpressure policy gets to disk on this machine.

use std::time::{Duration, Instant};

use batched_log_writer::{BufferedFile, FileOptions, QueuePolicy, Writer, WriterConfig};

fn run(policy: QueuePolicy, dir: &std::path::Path) -> Result<(), Box<dyn std::error::Error>> {
    let config = WriterConfig::default()
        .with_max_queue_size(1_000)
        .with_queue_policy(policy)
        .with_batch_size(500)
        .with_flush_interval(Duration::from_millis(200));

    let writer = Writer::new(config);
    let path = dir.join(format!("{policy}.log"));
    writer.add_batch_destination(BufferedFile::open(FileOptions::new(&path))?);
    writer.start()?;

    let n: u64 = 200_000;
    let start = Instant::now();
    let mut accepted = 0u64;
    for i in 0..n {
        if writer.enqueue(format!("{{\"iteration\":{i},\"msg\":\"custom load test\"}}\n")) {
            accepted += 1;
        }
    }
    let elapsed = start.elapsed();
    writer.stop(Duration::from_secs(30));

    let snap = writer.metrics().snapshot();
    println!(
        "{policy:>12}: {n} records in {elapsed:?} (~{:.0} rec/s), accepted {accepted}, written {} ({:.1}%), dropped {}",
        n as f64 / elapsed.as_secs_f64(),
        snap.written,
        100.0 * snap.written as f64 / snap.enqueued.max(1) as f64,
        snap.dropped,
    );
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let dir = std::env::temp_dir().join("batched-log-writer-load");
    std::fs::create_dir_all(&dir)?;

    for policy in [
        QueuePolicy::Block,
        QueuePolicy::DropOldest,
        QueuePolicy::DropNewest,
    ] {
        run(policy, &dir)?;
    }
    Ok(())
}
