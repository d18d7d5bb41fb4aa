use std::time::{Duration, Instant};

use batched_log_writer::noop_sink::NoopDestination;
use batched_log_writer::{Writer, WriterConfig};

fn main() {
    let writer = Writer::new(WriterConfig::default());
    writer.add_batch_destination(NoopDestination::new());
    if let Err(e) = writer.start() {
        eprintln!("failed to start writer: {e}");
        return;
    }

    let n: u64 = 100_000;
    let start = Instant::now();

    for i in 0..n {
        writer.enqueue(format!("{{\"iteration\":{i},\"msg\":\"default load test\"}}\n"));
    }

    let elapsed = start.elapsed();
    println!("default config: enqueued {} records in {:?} (~{:.0} rec/s)",
        n,
        elapsed,
        n as f64 / elapsed.as_secs_f64()
    );

    let stopped = writer.stop(Duration::from_secs(5));
    println!("stopped cleanly: {stopped}, metrics: {:?}", writer.metrics().snapshot());
}
