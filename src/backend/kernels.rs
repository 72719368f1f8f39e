//! Row kernels shared by the host backends.

use std::thread;

use crate::graph::OpKind;

use super::{BackendError, NodeTask, OutputBuf};

pub(crate) type DotFn = fn(&[f32], &[f32]) -> f32;

pub(crate) fn dot(x: &[f32], y: &[f32]) -> f32 {
    x.iter().zip(y).map(|(a, b)| a * b).sum()
}

pub(crate) fn run(
    backend: &str,
    task: NodeTask<'_>,
    n_threads: usize,
    dot: DotFn,
) -> Result<(), BackendError> {
    let NodeTask {
        op,
        src,
        out_ne,
        out,
    } = task;
    let fail = |reason: &str| BackendError::Kernel {
        backend: backend.to_string(),
        op,
        reason: reason.to_string(),
    };
    if out.len() != out_ne.iter().product::<usize>() {
        return Err(fail("output buffer does not match the output shape"));
    }
    let a = src[0].ok_or_else(|| fail("missing first operand"))?;

    match (op, out) {
        (OpKind::MulMat, OutputBuf::F32(out)) => {
            let b = src[1].ok_or_else(|| fail("missing second operand"))?;
            for_each_row(backend, op, out, b.n_rows(), a.n_rows(), n_threads, |n, row| {
                let y = b.row(n);
                for (m, o) in row.iter_mut().enumerate() {
                    *o = dot(a.row(m), y);
                }
            })
        }
        (OpKind::Add, OutputBuf::F32(out)) => {
            let b = src[1].ok_or_else(|| fail("missing second operand"))?;
            let broadcast = b.n_rows() == 1;
            for_each_row(backend, op, out, a.n_rows(), a.ne[0], n_threads, |r, row| {
                let rhs = b.row(if broadcast { 0 } else { r });
                for ((o, &x), &y) in row.iter_mut().zip(a.row(r)).zip(rhs) {
                    *o = x + y;
                }
            })
        }
        (OpKind::SoftMax, OutputBuf::F32(out)) => {
            for_each_row(backend, op, out, a.n_rows(), a.ne[0], n_threads, |r, row| {
                soft_max_row(a.row(r), row)
            })
        }
        (OpKind::Argmax, OutputBuf::I32(out)) => {
            for_each_row(backend, op, out, a.n_rows(), 1, n_threads, |r, cell| {
                cell[0] = argmax_row(a.row(r)) as i32;
            })
        }
        _ => Err(fail("output buffer has the wrong element type")),
    }
}

/// Splits `out` into `n_rows` rows of `row_len` and hands contiguous row
/// ranges to up to `n_threads` scoped workers.
pub(crate) fn for_each_row<T, F>(
    backend: &str,
    op: OpKind,
    out: &mut [T],
    n_rows: usize,
    row_len: usize,
    n_threads: usize,
    f: F,
) -> Result<(), BackendError>
where
    T: Send,
    F: Fn(usize, &mut [T]) + Sync,
{
    if out.len() != n_rows * row_len {
        return Err(BackendError::Kernel {
            backend: backend.to_string(),
            op,
            reason: format!(
                "output holds {} values, expected {} rows of {}",
                out.len(),
                n_rows,
                row_len
            ),
        });
    }
    if n_rows == 0 || row_len == 0 {
        return Ok(());
    }

    let n_threads = n_threads.clamp(1, n_rows);
    if n_threads == 1 {
        for (r, row) in out.chunks_mut(row_len).enumerate() {
            f(r, row);
        }
        return Ok(());
    }

    let rows_per_worker = n_rows.div_ceil(n_threads);
    let f = &f;
    let all_joined = thread::scope(|s| {
        let workers: Vec<_> = out
            .chunks_mut(rows_per_worker * row_len)
            .enumerate()
            .map(|(w, chunk)| {
                s.spawn(move || {
                    for (i, row) in chunk.chunks_mut(row_len).enumerate() {
                        f(w * rows_per_worker + i, row);
                    }
                })
            })
            .collect();
        workers
            .into_iter()
            .map(|worker| worker.join().is_ok())
            .fold(true, |ok, joined| ok && joined)
    });

    if all_joined {
        Ok(())
    } else {
        Err(BackendError::WorkerPanic(backend.to_string()))
    }
}

pub(crate) fn soft_max_row(x: &[f32], out: &mut [f32]) {
    let max = x.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0f32;
    for (o, &v) in out.iter_mut().zip(x) {
        let e = (v - max).exp();
        *o = e;
        sum += e;
    }
    if sum > 0.0 {
        let scale = 1.0 / sum;
        out.iter_mut().for_each(|o| *o *= scale);
    }
}

pub(crate) fn argmax_row(x: &[f32]) -> usize {
    let mut best = 0;
    let mut best_value = f32::NEG_INFINITY;
    for (i, &v) in x.iter().enumerate() {
        if v > best_value {
            best = i;
            best_value = v;
        }
    }
    best
}
