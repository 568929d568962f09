//! Deterministic decoder scenarios on the manual runtime.

use std::sync::{Arc, Mutex};

use chunk_decoder::{
    Chain, ChunkBlockDecodeRequest, ChunkBlockDecoder, CompressionMethod, DecodeParams,
    DecodedBlock, DecoderConfig, EncodedBlock, ManualRuntime, TaskPriority,
};

type Log = Arc<Mutex<Vec<u32>>>;

fn setup(workers: u32, jobs: u32) -> (ManualRuntime, ChunkBlockDecoder<ManualRuntime>) {
    let rt = ManualRuntime::new();
    let dec = ChunkBlockDecoder::new(
        DecoderConfig::new(workers, jobs, TaskPriority::Normal),
        rt.clone(),
    );
    (rt, dec)
}

/// Stored block tagged with `id`; the callback records `id` in `log`.
fn logged(id: u32, log: &Log) -> ChunkBlockDecodeRequest {
    let log = Arc::clone(log);
    let payload = id.to_le_bytes();
    ChunkBlockDecodeRequest::new(
        DecodeParams::new(CompressionMethod::None, 4).with_format_tag(id),
        EncodedBlock::from(&payload[..]),
        DecodedBlock::with_len(4),
        move |done| {
            assert_eq!(done.output(), Some(&payload[..]));
            log.lock().unwrap().push(id);
            Chain::Done
        },
    )
}

/// Chain of `remaining + 1` blocks starting at `id`.
fn chained(id: u32, remaining: u32, log: &Log) -> ChunkBlockDecodeRequest {
    let log = Arc::clone(log);
    ChunkBlockDecodeRequest::new(
        DecodeParams::new(CompressionMethod::None, 1),
        EncodedBlock::from(vec![id as u8]),
        DecodedBlock::with_len(1),
        move |_| {
            log.lock().unwrap().push(id);
            if remaining == 0 {
                Chain::Done
            } else {
                Chain::Continue(chained(id + 1, remaining - 1, &log))
            }
        },
    )
}

fn snapshot(log: &Log) -> Vec<u32> {
    log.lock().unwrap().clone()
}

#[test]
fn single_context_serializes_through_queue() {
    let (rt, dec) = setup(1, 4);
    let log = Log::default();

    for id in 0..3 {
        dec.enqueue(logged(id, &log));
    }
    assert_eq!(dec.busy_context_count(), 1);
    assert_eq!(dec.pending_len(), 2);
    assert_eq!(rt.queued_tasks(), 1);

    assert!(rt.run_next());
    assert_eq!(snapshot(&log), vec![0]);
    assert_eq!(dec.pending_len(), 1);
    assert_eq!(dec.busy_context_count(), 1);

    assert!(rt.run_next());
    assert!(rt.run_next());
    assert!(!rt.run_next());

    assert_eq!(snapshot(&log), vec![0, 1, 2]);
    assert_eq!(rt.launched_count(), 3);
    assert!(dec.is_idle());
}

#[test]
fn chain_cap_of_one_requeues_to_other_context() {
    let (rt, dec) = setup(2, 1);
    let log = Log::default();

    dec.enqueue(chained(1, 1, &log));
    assert_eq!(dec.busy_context_count(), 1);

    assert!(rt.run_next());
    // R2 was not decoded in R1's task; it went back through the queue and
    // onto a fresh task.
    assert_eq!(snapshot(&log), vec![1]);
    assert_eq!(dec.stats().requeued_at_cap, 1);
    assert_eq!(dec.pending_len(), 0);
    assert_eq!(dec.busy_context_count(), 1);
    assert_eq!(rt.queued_tasks(), 1);

    rt.run_all();
    assert_eq!(snapshot(&log), vec![1, 2]);
    assert_eq!(rt.launched_count(), 2);
    assert!(dec.is_idle());
}

#[test]
fn busy_contexts_match_in_flight_tasks() {
    let (rt, dec) = setup(3, 2);
    let log = Log::default();

    for id in 0..8 {
        dec.enqueue(logged(id, &log));
        assert_eq!(dec.busy_context_count(), rt.queued_tasks());
        assert_eq!(
            dec.busy_context_count() + dec.free_context_count(),
            dec.context_count()
        );
    }

    while rt.run_next() {
        assert_eq!(dec.busy_context_count(), rt.queued_tasks());
        assert_eq!(
            dec.busy_context_count() + dec.free_context_count(),
            dec.context_count()
        );
    }
    assert_eq!(snapshot(&log).len(), 8);
}

#[test]
fn single_context_preserves_enqueue_order() {
    let (rt, dec) = setup(1, 16);
    let log = Log::default();

    for id in 0..32 {
        dec.enqueue(logged(id, &log));
    }
    rt.run_all();

    assert_eq!(snapshot(&log), (0..32).collect::<Vec<_>>());
}

#[test]
fn one_task_stops_at_consecutive_job_cap() {
    let (rt, dec) = setup(1, 4);
    let log = Log::default();

    dec.enqueue(chained(0, 9, &log));

    assert!(rt.run_next());
    assert_eq!(snapshot(&log).len(), 4);
    assert_eq!(dec.stats().requeued_at_cap, 1);
    assert_eq!(rt.queued_tasks(), 1);

    assert!(rt.run_next());
    assert_eq!(snapshot(&log).len(), 8);

    assert!(rt.run_next());
    assert_eq!(snapshot(&log), (0..10).collect::<Vec<_>>());
    assert!(!rt.run_next());

    let stats = dec.stats();
    assert_eq!(stats.decode_jobs, 10);
    assert_eq!(stats.chained, 9);
    assert_eq!(stats.requeued_at_cap, 2);
    assert_eq!(stats.tasks_launched, 3);
}

#[test]
fn retraction_without_busy_contexts_is_a_no_op() {
    let (rt, dec) = setup(2, 1);
    assert!(!dec.try_retract_and_execute_decode_tasks());

    rt.set_oversubscribed(true);
    assert!(!dec.try_retract_and_execute_decode_tasks());
    assert_eq!(rt.retracted_count(), 0);
}

#[test]
fn retraction_not_attempted_without_oversubscription() {
    let (rt, dec) = setup(2, 1);
    let log = Log::default();
    dec.enqueue(logged(0, &log));

    assert!(!dec.try_retract_and_execute_decode_tasks());
    assert!(snapshot(&log).is_empty());
    assert_eq!(rt.queued_tasks(), 1);
}

#[test]
fn oversubscription_retracts_one_task_inline() {
    let (rt, dec) = setup(2, 1);
    let log = Log::default();
    for id in 0..3 {
        dec.enqueue(logged(id, &log));
    }
    assert_eq!(dec.free_context_count(), 0);

    rt.force_oversubscribed_for_retractions(1);
    assert!(dec.try_retract_and_execute_decode_tasks());

    assert_eq!(snapshot(&log), vec![0]);
    assert_eq!(rt.retracted_count(), 1);
    assert_eq!(dec.stats().retractions, 1);
    // The freed context picked up the queued request.
    assert_eq!(dec.pending_len(), 0);
    assert_eq!(dec.busy_context_count(), 2);

    rt.run_all();
    assert_eq!(snapshot(&log), vec![0, 1, 2]);
    assert!(dec.is_idle());
}

#[test]
fn sustained_oversubscription_retracts_every_context() {
    let (rt, dec) = setup(3, 1);
    let log = Log::default();
    for id in 0..3 {
        dec.enqueue(logged(id, &log));
    }

    rt.set_oversubscribed(true);
    assert!(dec.try_retract_and_execute_decode_tasks());
    assert_eq!(rt.retracted_count(), 3);
    assert_eq!(snapshot(&log), vec![0, 1, 2]);
    assert!(dec.is_idle());
    assert_eq!(rt.run_all(), 0);
}

#[test]
fn synchronous_drain_takes_oldest_pending() {
    let (rt, dec) = setup(1, 1);
    let log = Log::default();
    for id in 0..3 {
        dec.enqueue(logged(id, &log));
    }

    assert!(dec.try_execute_decode_request());
    assert_eq!(snapshot(&log), vec![1]);
    assert_eq!(dec.pending_len(), 1);
    assert_eq!(dec.stats().synchronous_decodes, 1);

    assert!(dec.try_execute_decode_request());
    assert!(!dec.try_execute_decode_request());
    assert_eq!(snapshot(&log), vec![1, 2]);

    rt.run_all();
    assert_eq!(snapshot(&log), vec![1, 2, 0]);
    assert!(dec.is_idle());
}

#[test]
fn synchronous_drain_requeues_chained_request() {
    let (rt, dec) = setup(1, 1);
    let log = Log::default();
    dec.enqueue(logged(0, &log));
    dec.enqueue(chained(10, 1, &log));
    dec.enqueue(logged(1, &log));

    assert!(dec.try_execute_decode_request());
    assert_eq!(snapshot(&log), vec![10]);
    // Chained block 11 went behind request 1.
    assert_eq!(dec.pending_len(), 2);

    rt.run_all();
    assert_eq!(snapshot(&log), vec![10, 0, 1, 11]);
    assert!(dec.is_idle());
}

#[test]
fn synchronous_drain_launches_chained_request_on_free_context() {
    let (rt, dec) = setup(1, 1);
    let log = Log::default();
    dec.enqueue(logged(0, &log));

    // While this request is being drained, the running task finishes and
    // frees the only context.
    let pump = rt.clone();
    let next_log = Arc::clone(&log);
    dec.enqueue(ChunkBlockDecodeRequest::new(
        DecodeParams::new(CompressionMethod::None, 1),
        EncodedBlock::from(vec![7u8]),
        DecodedBlock::with_len(1),
        move |_| {
            assert!(pump.run_next());
            Chain::Continue(logged(5, &next_log))
        },
    ));
    assert_eq!(dec.pending_len(), 1);

    assert!(dec.try_execute_decode_request());
    assert_eq!(snapshot(&log), vec![0]);
    assert_eq!(dec.pending_len(), 0);
    assert_eq!(dec.busy_context_count(), 1);
    assert_eq!(rt.queued_tasks(), 1);

    rt.run_all();
    assert_eq!(snapshot(&log), vec![0, 5]);
    assert!(dec.is_idle());
}

#[test]
fn decode_failures_reach_callbacks() {
    let (rt, dec) = setup(1, 1);
    let results = Arc::new(Mutex::new(Vec::new()));

    for method in [CompressionMethod::Deflate, CompressionMethod::Custom(9)] {
        let results = Arc::clone(&results);
        dec.enqueue(ChunkBlockDecodeRequest::new(
            DecodeParams::new(method, 8),
            EncodedBlock::from(vec![0xFF; 4]),
            DecodedBlock::with_len(8),
            move |done| {
                results.lock().unwrap().push(done.result.is_err());
                Chain::Done
            },
        ));
    }
    rt.run_all();

    assert_eq!(*results.lock().unwrap(), vec![true, true]);
    assert_eq!(dec.stats().decode_failures, 2);
}

#[test]
#[should_panic(expected = "invalid decode request: no completion callback bound")]
fn enqueue_panics_on_missing_callback() {
    let (_rt, dec) = setup(1, 1);
    dec.enqueue(ChunkBlockDecodeRequest::default());
}

#[test]
#[should_panic(expected = "invalid decode request: encoded block is empty")]
fn enqueue_panics_on_empty_source() {
    let (_rt, dec) = setup(1, 1);
    dec.enqueue(ChunkBlockDecodeRequest::new(
        DecodeParams::default(),
        EncodedBlock::default(),
        DecodedBlock::with_len(1),
        |_| Chain::Done,
    ));
}
