use ctc_decode_lib::backend::{AlignedBackend, Backend, CpuBackend};
use ctc_decode_lib::graph::{mul_mat_pad, GraphBuilder, MatmulPlan, MetaArena, OpKind, MATMUL_PAD};
use ctc_decode_lib::scheduler::BackendScheduler;
use ctc_decode_lib::tensor::DType;
use ndarray::Array2;

fn pattern(rows: usize, cols: usize, seed: f32) -> Array2<f32> {
    Array2::from_shape_fn((rows, cols), |(r, c)| ((r * 31 + c * 17) as f32 * seed).sin())
}

struct MatmulRun {
    out: Array2<f32>,
    ops: Vec<OpKind>,
}

/// Computes `y @ x^T` through a graph: `x` is `m` rows of `k`, `y` is `n` rows of `k`.
fn run_matmul(
    x: &Array2<f32>,
    y: &Array2<f32>,
    backends: Vec<Box<dyn Backend>>,
    padded: bool,
) -> MatmulRun {
    let (m, k) = x.dim();
    let n = y.dim().0;
    let x_flat: Vec<f32> = x.iter().copied().collect();
    let y_flat: Vec<f32> = y.iter().copied().collect();

    let mut meta = MetaArena::default();
    let mut b = GraphBuilder::new(&mut meta);
    let xt = b.param_2d("x", &x_flat, k, m).unwrap();
    let yt = b.new_tensor_2d("y", DType::F32, k, n).unwrap();
    b.set_input(yt).unwrap();
    let zt = if padded {
        mul_mat_pad(&mut b, xt, yt, MATMUL_PAD).unwrap()
    } else {
        b.mul_mat(xt, yt).unwrap()
    };
    b.set_output(zt).unwrap();
    let graph = b.finish(zt).unwrap();
    let ops = graph.nodes().iter().map(|node| node.op).collect();

    let mut sched = BackendScheduler::new(backends, 0).unwrap();
    sched.reserve(&graph).unwrap();
    let mut alloc = sched.allocate(&graph).unwrap();
    alloc.bind_input_f32("y", &y_flat).unwrap();
    let outputs = alloc.execute(3).unwrap();
    let out = outputs.get(zt).unwrap().as_array2().unwrap().to_owned();
    MatmulRun { out, ops }
}

fn cpu() -> Vec<Box<dyn Backend>> {
    vec![Box::new(CpuBackend::new())]
}

fn aligned_then_cpu() -> Vec<Box<dyn Backend>> {
    vec![Box::new(AlignedBackend::new()), Box::new(CpuBackend::new())]
}

/// Checks every entry against an f64 reference, scaled by the magnitude of
/// the summed terms.
fn assert_matches_reference(out: &Array2<f32>, x: &Array2<f32>, y: &Array2<f32>) {
    let (m, k) = x.dim();
    let n = y.dim().0;
    assert_eq!(out.dim(), (n, m));
    for r in 0..n {
        for c in 0..m {
            let (mut sum, mut abs_sum) = (0.0f64, 0.0f64);
            for i in 0..k {
                let term = f64::from(x[[c, i]]) * f64::from(y[[r, i]]);
                sum += term;
                abs_sum += term.abs();
            }
            let err = (f64::from(out[[r, c]]) - sum).abs();
            assert!(
                err <= 1e-5 * abs_sum.max(1.0),
                "({r}, {c}): got {}, expected {sum}",
                out[[r, c]]
            );
        }
    }
}

#[test]
fn plan_routes_by_contraction_length() {
    assert_eq!(MatmulPlan::for_contraction(256, MATMUL_PAD), MatmulPlan::Direct);
    assert_eq!(MatmulPlan::for_contraction(255, MATMUL_PAD), MatmulPlan::Direct);
    assert_eq!(
        MatmulPlan::for_contraction(257, MATMUL_PAD),
        MatmulPlan::Split {
            aligned: 256,
            remainder: 1,
        }
    );
    for k in (256..2048).step_by(MATMUL_PAD) {
        assert!(!MatmulPlan::for_contraction(k, MATMUL_PAD).is_split());
    }
}

#[test]
fn aligned_contraction_is_bit_identical_to_direct() {
    let x = pattern(7, 320, 0.013);
    let y = pattern(5, 320, 0.029);

    let padded = run_matmul(&x, &y, cpu(), true);
    let direct = run_matmul(&x, &y, cpu(), false);

    assert_eq!(padded.ops, vec![OpKind::MulMat]);
    assert_eq!(padded.out, direct.out);
}

#[test]
fn unaligned_contraction_matches_reference() {
    for k in [257usize, 300, 567, 1000] {
        let x = pattern(9, k, 0.011);
        let y = pattern(4, k, 0.023);

        let padded = run_matmul(&x, &y, cpu(), true);
        assert_eq!(
            padded.ops,
            vec![OpKind::MulMat, OpKind::MulMat, OpKind::Add],
            "k={k}"
        );
        assert_matches_reference(&padded.out, &x, &y);
    }
}

#[test]
fn aligned_backend_takes_bulk_and_cpu_takes_remainder() {
    let x = pattern(6, 300, 0.017);
    let y = pattern(11, 300, 0.031);

    let mixed = run_matmul(&x, &y, aligned_then_cpu(), true);
    let reference = run_matmul(&x, &y, cpu(), false);

    assert_matches_reference(&mixed.out, &x, &y);
    for (a, b) in mixed.out.iter().zip(reference.out.iter()) {
        assert!((a - b).abs() <= 1e-4 * b.abs().max(1.0));
    }
}

#[test]
fn short_contraction_is_not_split() {
    let x = pattern(3, 40, 0.05);
    let y = pattern(2, 40, 0.07);
    let run = run_matmul(&x, &y, cpu(), true);
    assert_eq!(run.ops, vec![OpKind::MulMat]);
    assert_matches_reference(&run.out, &x, &y);
}
