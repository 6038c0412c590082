//! Row-mode sub-scheduler: bounded producer/consumer streaming.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crossbeam_channel::{RecvTimeoutError, bounded, unbounded};
use parking_lot::Mutex;

use ninout_dag::{Row, RowFn, RowOutput};

use crate::capture;
use crate::executor::worker::panic_message;

/// Default capacity of the input row queue. Backpressure blocks the
/// producer so memory stays bounded regardless of input size.
pub const ROW_QUEUE_CAPACITY: usize = 1024;

/// Default cadence for `running` progress ticks.
pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(200);

/// Feed `input_rows` through `func` one row at a time.
///
/// The producer and consumer run as two cooperating threads bridged by a
/// bounded queue; the calling worker thread sleeps on the consumer's
/// completion signal and fires `on_tick` with the partial emitted-row
/// count at every cadence interval. Per-row returns: `Emit` appends one
/// row, `EmitAll` appends several, `Skip` drops the input row. The first
/// row error aborts the stream and fails the step with that error.
pub(crate) fn run_row_stream(
    func: RowFn,
    input_rows: Vec<Row>,
    capacity: usize,
    cadence: Duration,
    buffer: Arc<Mutex<String>>,
    mut on_tick: impl FnMut(u64),
) -> anyhow::Result<Vec<Row>> {
    let (rows_tx, rows_rx) = bounded::<Row>(capacity.max(1));
    let (done_tx, done_rx) = unbounded::<()>();
    let emitted = AtomicU64::new(0);

    std::thread::scope(|scope| {
        let emitted = &emitted;
        let func = &func;

        scope.spawn(move || {
            for row in input_rows {
                // The consumer dropping its receiver on error unblocks us.
                if rows_tx.send(row).is_err() {
                    break;
                }
            }
        });

        let consumer = scope.spawn(move || -> anyhow::Result<Vec<Row>> {
            let _done = done_tx;
            let _guard = capture::register(buffer);
            let mut out: Vec<Row> = Vec::new();
            for row in rows_rx.iter() {
                let produced = std::panic::catch_unwind(AssertUnwindSafe(|| func(&row)))
                    .map_err(panic_message)??;
                match produced {
                    RowOutput::Emit(row) => out.push(row),
                    RowOutput::EmitAll(rows) => out.extend(rows),
                    RowOutput::Skip => {}
                }
                emitted.store(out.len() as u64, Ordering::Relaxed);
            }
            Ok(out)
        });

        loop {
            match done_rx.recv_timeout(cadence) {
                Err(RecvTimeoutError::Timeout) => on_tick(emitted.load(Ordering::Relaxed)),
                _ => break,
            }
        }

        consumer
            .join()
            .unwrap_or_else(|payload| Err(panic_message(payload)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use ninout_dag::row;
    use serde_json::json;

    fn ids(count: usize) -> Vec<Row> {
        (1..=count).map(|id| row([("id", json!(id))])).collect()
    }

    fn shared_buffer() -> Arc<Mutex<String>> {
        Arc::new(Mutex::new(String::new()))
    }

    #[test]
    fn emits_and_drops_per_row() {
        let func: RowFn = Arc::new(|row| {
            let id = row["id"].as_i64().unwrap();
            if id == 2 {
                Ok(RowOutput::Skip)
            } else {
                let mut out = row.clone();
                out.insert("ok".into(), json!(true));
                Ok(RowOutput::Emit(out))
            }
        });
        let out = run_row_stream(
            func,
            ids(3),
            ROW_QUEUE_CAPACITY,
            PROGRESS_INTERVAL,
            shared_buffer(),
            |_| {},
        )
        .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["id"], json!(1));
        assert_eq!(out[1]["id"], json!(3));
        assert_eq!(out[0]["ok"], json!(true));
    }

    #[test]
    fn emit_all_flattens() {
        let func: RowFn = Arc::new(|row| Ok(RowOutput::EmitAll(vec![row.clone(), row.clone()])));
        let out = run_row_stream(
            func,
            ids(2),
            ROW_QUEUE_CAPACITY,
            PROGRESS_INTERVAL,
            shared_buffer(),
            |_| {},
        )
        .unwrap();
        assert_eq!(out.len(), 4);
    }

    #[test]
    fn ticks_fire_while_streaming() {
        let func: RowFn = Arc::new(|row| {
            std::thread::sleep(Duration::from_millis(8));
            Ok(RowOutput::Emit(row.clone()))
        });
        let mut ticks = Vec::new();
        let out = run_row_stream(
            func,
            ids(40),
            ROW_QUEUE_CAPACITY,
            Duration::from_millis(20),
            shared_buffer(),
            |count| ticks.push(count),
        )
        .unwrap();
        assert_eq!(out.len(), 40);
        assert!(!ticks.is_empty(), "expected at least one progress tick");
        assert!(ticks.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn row_error_fails_the_stream() {
        let func: RowFn = Arc::new(|row| {
            if row["id"] == json!(2) {
                bail!("bad row");
            }
            Ok(RowOutput::Emit(row.clone()))
        });
        let err = run_row_stream(
            func,
            ids(5),
            2,
            PROGRESS_INTERVAL,
            shared_buffer(),
            |_| {},
        )
        .unwrap_err();
        assert!(err.to_string().contains("bad row"));
    }

    #[test]
    fn row_panic_fails_the_stream() {
        let func: RowFn = Arc::new(|_| panic!("boom"));
        let err = run_row_stream(
            func,
            ids(3),
            ROW_QUEUE_CAPACITY,
            PROGRESS_INTERVAL,
            shared_buffer(),
            |_| {},
        )
        .unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn bounded_queue_handles_more_rows_than_capacity() {
        let func: RowFn = Arc::new(|row| Ok(RowOutput::Emit(row.clone())));
        let out = run_row_stream(
            func,
            ids(500),
            8,
            PROGRESS_INTERVAL,
            shared_buffer(),
            |_| {},
        )
        .unwrap();
        assert_eq!(out.len(), 500);
    }
}
