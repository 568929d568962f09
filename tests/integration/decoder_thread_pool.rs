//! Decoder running on the real thread pool.

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use flate2::write::DeflateEncoder;
use flate2::Compression;

use chunk_decoder::{
    Chain, ChunkBlockDecodeRequest, ChunkBlockDecoder, CompressionMethod, DecodeParams,
    DecodedBlock, DecoderConfig, EncodedBlock, TaskPriority, TaskRuntime, ThreadPool,
    ThreadPoolConfig, ThreadPoolHandle,
};

fn pool(workers: usize) -> ThreadPool {
    ThreadPool::new(ThreadPoolConfig {
        workers,
        spin_iters: 50,
        park_timeout: Duration::from_micros(50),
    })
}

fn counting(count: &Arc<AtomicUsize>, byte: u8) -> ChunkBlockDecodeRequest {
    let count = Arc::clone(count);
    ChunkBlockDecodeRequest::new(
        DecodeParams::new(CompressionMethod::None, 1),
        EncodedBlock::from(vec![byte]),
        DecodedBlock::with_len(1),
        move |done| {
            assert_eq!(done.output(), Some(&[byte][..]));
            count.fetch_add(1, Ordering::Relaxed);
            Chain::Done
        },
    )
}

#[test]
fn no_request_is_lost_for_any_worker_count() {
    const N: usize = 1000;

    for workers in 1..=16u32 {
        let pool = pool(4);
        let dec = ChunkBlockDecoder::new(
            DecoderConfig::new(workers, 4, TaskPriority::Normal),
            pool.handle(),
        );
        let count = Arc::new(AtomicUsize::new(0));

        for i in 0..N {
            dec.enqueue(counting(&count, i as u8));
        }
        pool.join();

        assert_eq!(count.load(Ordering::Relaxed), N, "workers={workers}");
        assert!(dec.is_idle(), "workers={workers}");
        let stats = dec.stats();
        assert_eq!(stats.enqueued, N as u64);
        assert_eq!(stats.decode_jobs, N as u64);
    }
}

#[test]
fn concurrent_producers_with_chaining() {
    const PRODUCERS: usize = 4;
    const CHAINS_PER_PRODUCER: usize = 50;
    const CHAIN_LEN: usize = 7;

    fn chain(count: Arc<AtomicUsize>, remaining: usize) -> ChunkBlockDecodeRequest {
        ChunkBlockDecodeRequest::new(
            DecodeParams::new(CompressionMethod::None, 2),
            EncodedBlock::from(vec![1, 2]),
            DecodedBlock::with_len(2),
            move |_| {
                count.fetch_add(1, Ordering::Relaxed);
                if remaining == 0 {
                    Chain::Done
                } else {
                    Chain::Continue(chain(count, remaining - 1))
                }
            },
        )
    }

    let pool = pool(3);
    let dec = ChunkBlockDecoder::new(
        DecoderConfig::new(2, 3, TaskPriority::Normal),
        pool.handle(),
    );
    let count = Arc::new(AtomicUsize::new(0));

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|_| {
            let dec = dec.clone();
            let count = Arc::clone(&count);
            thread::spawn(move || {
                for _ in 0..CHAINS_PER_PRODUCER {
                    dec.enqueue(chain(Arc::clone(&count), CHAIN_LEN - 1));
                    // Blocked producers help drain.
                    dec.try_execute_decode_request();
                }
            })
        })
        .collect();
    for p in producers {
        p.join().unwrap();
    }
    pool.join();

    assert_eq!(
        count.load(Ordering::Relaxed),
        PRODUCERS * CHAINS_PER_PRODUCER * CHAIN_LEN
    );
    assert!(dec.is_idle());
}

#[test]
fn multi_block_read_inflates_in_order() {
    const BLOCK: usize = 4096;

    let data: Vec<u8> = (0..BLOCK * 8 + 100)
        .map(|i| ((i * 31) % 253) as u8)
        .collect();
    let blocks: Arc<Vec<(Vec<u8>, usize)>> = Arc::new(
        data.chunks(BLOCK)
            .map(|chunk| {
                let mut enc = DeflateEncoder::new(Vec::new(), Compression::default());
                enc.write_all(chunk).unwrap();
                (enc.finish().unwrap(), chunk.len())
            })
            .collect(),
    );

    fn block_request(
        blocks: Arc<Vec<(Vec<u8>, usize)>>,
        index: usize,
        out: Arc<Mutex<Vec<u8>>>,
    ) -> ChunkBlockDecodeRequest {
        let len = blocks[index].1;
        let encoded = EncodedBlock::from(blocks[index].0.as_slice());
        ChunkBlockDecodeRequest::new(
            DecodeParams::new(CompressionMethod::Deflate, len as u32),
            encoded,
            DecodedBlock::with_len(len),
            move |done| {
                out.lock().unwrap().extend_from_slice(done.output().unwrap());
                if index + 1 == blocks.len() {
                    Chain::Done
                } else {
                    Chain::Continue(block_request(blocks, index + 1, out))
                }
            },
        )
    }

    let pool = pool(2);
    let dec = ChunkBlockDecoder::new(
        DecoderConfig::new(2, 2, TaskPriority::High),
        pool.handle(),
    );
    let out = Arc::new(Mutex::new(Vec::new()));
    dec.enqueue(block_request(blocks, 0, Arc::clone(&out)));
    pool.join();

    assert_eq!(*out.lock().unwrap(), data);
    let stats = dec.stats();
    assert_eq!(stats.decode_failures, 0);
    assert_eq!(stats.decode_jobs, 9);
}

#[test]
fn blocked_caller_retracts_queued_decode_tasks() {
    let pool = pool(1);
    let handle: ThreadPoolHandle = pool.handle();

    // Pin the only worker.
    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    handle.launch(
        "blocker",
        TaskPriority::Normal,
        Box::new(move || {
            started_tx.send(()).unwrap();
            release_rx.recv().unwrap();
        }),
    );
    started_rx.recv().unwrap();

    let dec = ChunkBlockDecoder::new(
        DecoderConfig::new(2, 1, TaskPriority::Normal),
        handle.clone(),
    );
    let caller = thread::current().id();
    let ran_on = Arc::new(Mutex::new(Vec::new()));
    for byte in 0..3u8 {
        let ran_on = Arc::clone(&ran_on);
        dec.enqueue(ChunkBlockDecodeRequest::new(
            DecodeParams::new(CompressionMethod::None, 1),
            EncodedBlock::from(vec![byte]),
            DecodedBlock::with_len(1),
            move |_| {
                ran_on.lock().unwrap().push(thread::current().id());
                Chain::Done
            },
        ));
    }
    assert!(handle.is_oversubscription_limit_reached(TaskPriority::Normal));

    // One pass per call: the third request was launched onto context 0
    // after the scan had already passed it.
    assert!(dec.try_retract_and_execute_decode_tasks());
    assert_eq!(ran_on.lock().unwrap().len(), 2);
    assert_eq!(dec.busy_context_count(), 1);

    assert!(dec.try_retract_and_execute_decode_tasks());
    assert!(dec.is_idle());
    assert_eq!(ran_on.lock().unwrap().len(), 3);
    assert!(ran_on.lock().unwrap().iter().all(|id| *id == caller));
    assert!(!handle.is_oversubscription_limit_reached(TaskPriority::Normal));
    assert!(!dec.try_retract_and_execute_decode_tasks());

    release_tx.send(()).unwrap();
    let metrics = pool.join();
    assert_eq!(metrics.tasks_retracted, 3);
    assert_eq!(dec.stats().retractions, 3);
}

#[test]
fn enqueue_after_join_decodes_inline() {
    let pool = pool(2);
    let dec = ChunkBlockDecoder::new(DecoderConfig::default(), pool.handle());
    pool.join();

    let count = Arc::new(AtomicUsize::new(0));
    for i in 0..10 {
        dec.enqueue(counting(&count, i));
    }
    assert_eq!(count.load(Ordering::Relaxed), 10);
    assert!(dec.is_idle());
}
