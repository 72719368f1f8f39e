use std::sync::Arc;
use std::thread;

use ctc_decode_lib::scheduler::SchedulerState;
use ctc_decode_lib::{
    CtcDecoder, CtcWeights, DecodeError, DecoderConfig, SharedDecoder, TokenTable,
};
use ndarray::{Array1, Array2};

const VOCAB: &str = "<blk> 0\n\u{2581}he 1\nllo 2\n\u{2581}wor 3\nld 4\n";

fn config() -> DecoderConfig {
    DecoderConfig {
        n_threads: 2,
        max_frames: 64,
        arena_bytes: None,
        frame_shift_sec: 0.06,
        prefer_accelerator: false,
    }
}

/// Class `h + 1` reads hidden unit `h`; the blank class reads nothing.
fn shifted_identity(vocab: usize, hidden: usize) -> CtcWeights {
    let w = Array2::from_shape_fn((vocab, hidden), |(v, h)| if v == h + 1 { 1.0 } else { 0.0 });
    CtcWeights::new(w, Array1::zeros(vocab)).unwrap()
}

/// One frame per entry: `Some(h)` fires hidden unit `h`, `None` stays silent.
fn frames(active: &[Option<usize>], hidden: usize) -> Array2<f32> {
    let mut out = Array2::zeros((active.len(), hidden));
    for (t, unit) in active.iter().enumerate() {
        if let Some(h) = unit {
            out[[t, *h]] = 10.0;
        }
    }
    out
}

fn decoder() -> CtcDecoder {
    let vocab = TokenTable::parse(VOCAB).unwrap();
    CtcDecoder::new(shifted_identity(5, 4), vocab, config()).unwrap()
}

#[test]
fn zero_input_decodes_to_blanks() {
    let mut dec = decoder();
    let transcript = dec.decode(Array2::zeros((3, 4)).view(), 1).unwrap();

    assert_eq!(transcript.text, "");
    assert!(transcript.is_empty());
    assert_eq!(dec.state().ids, vec![0, 0, 0]);
}

#[test]
fn tokens_are_rendered_in_frame_order() {
    let mut dec = decoder();
    let input = frames(&[Some(0), Some(1), None, Some(2), Some(3)], 4);
    let transcript = dec.decode(input.view(), 2).unwrap();

    assert_eq!(dec.state().ids, vec![1, 2, 0, 3, 4]);
    assert_eq!(transcript.token_ids, vec![1, 2, 3, 4]);
    assert_eq!(transcript.tokens, vec![" he", "llo", " wor", "ld"]);
    assert_eq!(transcript.text, "hello world");

    let expected = [0.0, 0.06, 0.18, 0.24];
    assert_eq!(transcript.timestamps.len(), expected.len());
    for (got, want) in transcript.timestamps.iter().zip(expected) {
        assert!((got - want).abs() < 1e-6);
    }
    assert!(transcript.confidences.iter().all(|&p| p > 0.99 && p <= 1.0));
}

#[test]
fn hidden_by_vocab_projection_is_accepted_as_written() {
    // 4 hidden units by 5 classes, ones on the diagonal.
    let w = Array2::from_shape_fn((4, 5), |(h, v)| if h == v { 1.0 } else { 0.0 });
    let weights = CtcWeights::from_projection(w, Array1::zeros(5)).unwrap();
    assert_eq!((weights.hidden_dim(), weights.vocab_size()), (4, 5));

    let vocab = TokenTable::parse(VOCAB).unwrap();
    let mut dec = CtcDecoder::new(weights, vocab, config()).unwrap();

    let transcript = dec.decode(Array2::zeros((3, 4)).view(), 1).unwrap();
    assert_eq!(dec.state().ids, vec![0, 0, 0]);
    assert_eq!(transcript.text, "");

    let transcript = dec.decode(frames(&[Some(2), Some(1)], 4).view(), 1).unwrap();
    assert_eq!(transcript.token_ids, vec![2, 1]);
    assert_eq!(transcript.text, "llo he");
}

#[test]
fn repeated_ids_are_not_collapsed() {
    let mut dec = decoder();
    let input = frames(&[Some(0), Some(0), None, Some(0)], 4);
    let transcript = dec.decode(input.view(), 1).unwrap();

    assert_eq!(transcript.token_ids, vec![1, 1, 1]);
    assert_eq!(transcript.text, "he he he");
}

#[test]
fn ids_stay_within_vocabulary() {
    let mut dec = decoder();
    let input = Array2::from_shape_fn((17, 4), |(t, h)| ((t * 5 + h * 3) as f32 * 0.7).sin());
    dec.decode(input.view(), 4).unwrap();

    assert_eq!(dec.state().ids.len(), 17);
    assert!(dec.state().ids.iter().all(|&id| (0..5).contains(&id)));
}

#[test]
fn repeated_calls_are_deterministic_and_reusable() {
    let mut dec = decoder();
    let input = Array2::from_shape_fn((9, 4), |(t, h)| ((t * 7 + h) as f32 * 0.3).cos() * 4.0);

    let first = dec.decode(input.view(), 3).unwrap();
    let first_ids = dec.state().ids.clone();
    let after_first = dec.timings();
    assert_eq!(dec.scheduler().state(), SchedulerState::Idle);

    let second = dec.decode(input.view(), 1).unwrap();
    let after_second = dec.timings();
    assert_eq!(dec.scheduler().state(), SchedulerState::Idle);

    assert_eq!(first, second);
    assert_eq!(first_ids, dec.state().ids);
    assert_eq!(after_first.n_decode, 1);
    assert_eq!(after_second.n_decode, 2);
    assert!(after_second.t_decode_us >= after_first.t_decode_us);
    assert_eq!(after_second.avg_decode_us(), after_second.t_decode_us / 2);
}

#[test]
fn non_standard_layout_is_accepted() {
    let mut dec = decoder();
    let input = frames(&[Some(2), None, Some(3)], 4);
    let transposed = input.t().to_owned();

    let expected = dec.decode(input.view(), 1).unwrap();
    let actual = dec.decode(transposed.t(), 1).unwrap();
    assert_eq!(expected, actual);
}

#[test]
fn hidden_size_mismatch_fails_fast() {
    let mut dec = decoder();
    let err = dec.decode(Array2::zeros((3, 6)).view(), 1).unwrap_err();

    assert!(matches!(
        err,
        DecodeError::InputShapeMismatch {
            expected: (3, 4),
            actual: (3, 6)
        }
    ));
    assert_eq!(dec.timings().n_decode, 0);
    assert_eq!(dec.scheduler().state(), SchedulerState::Idle);
}

#[test]
fn empty_input_is_rejected() {
    let mut dec = decoder();
    let err = dec.decode(Array2::zeros((0, 4)).view(), 1).unwrap_err();
    assert!(matches!(err, DecodeError::EmptyInput));
}

#[test]
fn frames_beyond_reservation_are_rejected() {
    let mut dec = decoder();
    let err = dec.decode(Array2::zeros((65, 4)).view(), 1).unwrap_err();
    assert!(matches!(
        err,
        DecodeError::TooManyFrames {
            frames: 65,
            max_frames: 64
        }
    ));
}

#[test]
fn undersized_arena_reports_allocation_failure() {
    let vocab = TokenTable::parse(VOCAB).unwrap();
    let cfg = DecoderConfig {
        arena_bytes: Some(64),
        ..config()
    };
    let mut dec = CtcDecoder::new(shifted_identity(5, 4), vocab, cfg).unwrap();
    let input = frames(&[Some(0), Some(1), Some(2)], 4);
    let snapshot = input.clone();

    let err = dec.decode(input.view(), 1).unwrap_err();
    assert!(matches!(err, DecodeError::AllocationFailed(_)));
    assert!(err.user_message().contains("too long"));
    assert_eq!(input, snapshot);
    assert_eq!(dec.timings().n_decode, 0);
    assert_eq!(dec.scheduler().state(), SchedulerState::Idle);

    let retry = dec.decode(input.view(), 1).unwrap_err();
    assert!(matches!(retry, DecodeError::AllocationFailed(_)));
}

#[test]
fn accelerator_path_matches_cpu_path() {
    const HIDDEN: usize = 300;
    const CLASSES: usize = 6;

    // Class v reads a planted unit in the unaligned tail of the hidden axis.
    let planted = |v: usize| 288 + v;
    let w = Array2::from_shape_fn((CLASSES, HIDDEN), |(v, h)| {
        let noise = ((v * 31 + h * 7) as f32 * 0.13).sin() * 0.01;
        if h == planted(v) {
            1.0 + noise
        } else {
            noise
        }
    });
    let input = Array2::from_shape_fn((12, HIDDEN), |(t, h)| {
        let noise = ((t * 11 + h * 5) as f32 * 0.29).cos() * 0.1;
        if h == planted(t % CLASSES) {
            3.0 + noise
        } else {
            noise
        }
    });
    let expected: Vec<i32> = (0..12).map(|t| (t % CLASSES) as i32).collect();
    let tokens: Vec<String> = (0..CLASSES).map(|i| format!("t{i}")).collect();

    let mut cpu = CtcDecoder::new(
        CtcWeights::new(w.clone(), Array1::zeros(CLASSES)).unwrap(),
        TokenTable::new(tokens.clone()),
        config(),
    )
    .unwrap();
    let mut accel = CtcDecoder::new(
        CtcWeights::new(w, Array1::zeros(CLASSES)).unwrap(),
        TokenTable::new(tokens),
        DecoderConfig {
            prefer_accelerator: true,
            ..config()
        },
    )
    .unwrap();
    assert!(accel.scheduler().capabilities().prefers_padded_matmul);

    let from_cpu = cpu.decode(input.view(), 2).unwrap();
    let from_accel = accel.decode(input.view(), 2).unwrap();

    assert_eq!(cpu.state().ids, expected);
    assert_eq!(accel.state().ids, expected);
    assert_eq!(from_cpu.token_ids, from_accel.token_ids);
    for (a, b) in from_cpu.confidences.iter().zip(&from_accel.confidences) {
        assert!((a - b).abs() < 1e-5);
    }
}

#[test]
fn offset_timestamps_shifts_every_token() {
    let mut dec = decoder();
    let mut transcript = dec.decode(frames(&[None, Some(1)], 4).view(), 1).unwrap();
    transcript.offset_timestamps(1.5);
    assert_eq!(transcript.timestamps.len(), 1);
    assert!((transcript.timestamps[0] - 1.56).abs() < 1e-5);
}

#[test]
fn shared_decoder_serializes_concurrent_calls() {
    let shared = Arc::new(SharedDecoder::new(decoder()));
    let input = Arc::new(frames(&[Some(0), Some(1), None, Some(2), Some(3)], 4));

    let workers: Vec<_> = (0..4)
        .map(|i| {
            let shared = Arc::clone(&shared);
            let input = Arc::clone(&input);
            thread::spawn(move || shared.decode(input.view(), i + 1).unwrap().text)
        })
        .collect();

    for worker in workers {
        assert_eq!(worker.join().unwrap(), "hello world");
    }
    assert_eq!(shared.timings().unwrap().n_decode, 4);

    let dec = Arc::try_unwrap(shared).ok().unwrap().into_inner().unwrap();
    assert_eq!(dec.scheduler().state(), SchedulerState::Idle);
}

#[test]
fn user_messages_are_short_and_static() {
    let err = DecodeError::InputShapeMismatch {
        expected: (3, 4),
        actual: (3, 5),
    };
    assert!(err.user_message().contains("recording"));
    assert!(DecodeError::LockPoisoned.user_message().contains("busy"));
}
