//! Random interleavings of submissions, task runs, synchronous drains and
//! retractions on the manual runtime.
//!
//! After every step the context pool must partition exactly and the number
//! of busy contexts must equal the number of not-yet-started decode tasks.
//! After draining, every block of every chain must have been decoded once.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use proptest::prelude::*;

use chunk_decoder::{
    Chain, ChunkBlockDecodeRequest, ChunkBlockDecoder, CompressionMethod, DecodeParams,
    DecodedBlock, DecoderConfig, EncodedBlock, ManualRuntime, TaskPriority,
};

#[derive(Clone, Debug)]
enum Op {
    /// Submit a chain of `extra + 1` blocks.
    Enqueue { extra: u8 },
    RunNext,
    TryExecute,
    Retract { budget: u8 },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0u8..6).prop_map(|extra| Op::Enqueue { extra }),
        4 => Just(Op::RunNext),
        2 => Just(Op::TryExecute),
        1 => (0u8..4).prop_map(|budget| Op::Retract { budget }),
    ]
}

fn chain(decoded: Arc<AtomicUsize>, remaining: u8) -> ChunkBlockDecodeRequest {
    ChunkBlockDecodeRequest::new(
        DecodeParams::new(CompressionMethod::None, 1),
        EncodedBlock::from(vec![remaining]),
        DecodedBlock::with_len(1),
        move |done| {
            assert_eq!(done.output(), Some(&[remaining][..]));
            decoded.fetch_add(1, Ordering::Relaxed);
            match remaining {
                0 => Chain::Done,
                n => Chain::Continue(chain(decoded, n - 1)),
            }
        },
    )
}

fn check_pool(rt: &ManualRuntime, dec: &ChunkBlockDecoder<ManualRuntime>) {
    assert_eq!(
        dec.busy_context_count() + dec.free_context_count(),
        dec.context_count()
    );
    assert_eq!(dec.busy_context_count(), rt.queued_tasks());
    if dec.pending_len() > 0 {
        assert_eq!(dec.free_context_count(), 0, "queued work with a free context");
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn decoder_never_loses_or_duplicates_blocks(
        workers in 1u32..5,
        jobs in 1u32..4,
        ops in prop::collection::vec(op_strategy(), 1..80),
    ) {
        let rt = ManualRuntime::new();
        let dec = ChunkBlockDecoder::new(
            DecoderConfig::new(workers, jobs, TaskPriority::Normal),
            rt.clone(),
        );
        let decoded = Arc::new(AtomicUsize::new(0));
        let mut expected = 0usize;

        for op in ops {
            match op {
                Op::Enqueue { extra } => {
                    expected += extra as usize + 1;
                    dec.enqueue(chain(Arc::clone(&decoded), extra));
                }
                Op::RunNext => {
                    rt.run_next();
                }
                Op::TryExecute => {
                    let had_pending = dec.pending_len() > 0;
                    prop_assert_eq!(dec.try_execute_decode_request(), had_pending);
                }
                Op::Retract { budget } => {
                    rt.force_oversubscribed_for_retractions(budget as usize);
                    dec.try_retract_and_execute_decode_tasks();
                    rt.force_oversubscribed_for_retractions(0);
                }
            }
            check_pool(&rt, &dec);
            prop_assert!(decoded.load(Ordering::Relaxed) <= expected);
        }

        rt.run_all();
        prop_assert!(dec.is_idle());
        prop_assert_eq!(decoded.load(Ordering::Relaxed), expected);

        let stats = dec.stats();
        prop_assert_eq!(stats.decode_jobs as usize, expected);
        prop_assert_eq!(stats.decode_failures, 0);
    }
}
