// prolly-seq/src/splice.rs

//! Edit-distance matching between two item arrays, producing splices. Used
//! by the top-down diff over meta tuples and by the list diff over leaf
//! values. The matrix is capped: past `max_matrix_size` cells the whole
//! range is reported as one coarse splice, bounding worst-case CPU.

/// A contiguous rewrite: starting at `at` in the previous array, `removed`
/// items are dropped and `added` items from the current array (starting at
/// `from`) take their place. `from` is zero when nothing was added.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Splice {
    pub at: u64,
    pub removed: u64,
    pub added: u64,
    pub from: u64,
}

/// Ceiling on the edit-distance matrix area.
pub const DEFAULT_MAX_SPLICE_MATRIX_SIZE: u64 = 20_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EditOp {
    Unchanged,
    Updated,
    Removed,
    Added,
}

/// Computes the splices turning the previous array into the current one.
/// `eq(i, j)` reports whether previous item `i` equals current item `j`.
pub fn calc_splices<F>(
    previous_len: u64,
    current_len: u64,
    max_matrix_size: u64,
    eq: F,
) -> Vec<Splice>
where
    F: Fn(u64, u64) -> bool,
{
    // Trim the shared prefix and suffix; only the middle needs matching.
    let min_len = previous_len.min(current_len);
    let mut prefix = 0u64;
    while prefix < min_len && eq(prefix, prefix) {
        prefix += 1;
    }
    let mut suffix = 0u64;
    while suffix < min_len - prefix
        && eq(previous_len - suffix - 1, current_len - suffix - 1)
    {
        suffix += 1;
    }

    let prev_start = prefix;
    let cur_start = prefix;
    let prev_end = previous_len - suffix;
    let cur_end = current_len - suffix;
    let prev_mid = prev_end - prev_start;
    let cur_mid = cur_end - cur_start;

    if prev_mid == 0 && cur_mid == 0 {
        return Vec::new();
    }
    if cur_mid == 0 {
        return vec![Splice {
            at: prev_start,
            removed: prev_mid,
            added: 0,
            from: 0,
        }];
    }
    if prev_mid == 0 {
        return vec![Splice {
            at: prev_start,
            removed: 0,
            added: cur_mid,
            from: cur_start,
        }];
    }
    if prev_mid.saturating_mul(cur_mid) > max_matrix_size {
        // Too big to match; report the whole range as changed.
        return vec![Splice {
            at: prev_start,
            removed: prev_mid,
            added: cur_mid,
            from: cur_start,
        }];
    }

    let ops = edit_ops(prev_mid, cur_mid, |i, j| eq(prev_start + i, cur_start + j));
    splices_from_ops(&ops, prev_start, cur_start)
}

/// Classic dynamic-programming edit script over the trimmed middle.
fn edit_ops<F>(n: u64, m: u64, eq: F) -> Vec<EditOp>
where
    F: Fn(u64, u64) -> bool,
{
    let n = n as usize;
    let m = m as usize;
    let width = m + 1;
    let mut dist = vec![0u32; (n + 1) * width];
    for j in 0..=m {
        dist[j] = j as u32;
    }
    for i in 1..=n {
        dist[i * width] = i as u32;
        for j in 1..=m {
            let diag = dist[(i - 1) * width + j - 1]
                + if eq(i as u64 - 1, j as u64 - 1) { 0 } else { 1 };
            let up = dist[(i - 1) * width + j] + 1;
            let left = dist[i * width + j - 1] + 1;
            dist[i * width + j] = diag.min(up).min(left);
        }
    }

    let mut ops = Vec::with_capacity(n + m);
    let (mut i, mut j) = (n, m);
    while i > 0 || j > 0 {
        let here = dist[i * width + j];
        if i > 0 && j > 0 {
            let equal = eq(i as u64 - 1, j as u64 - 1);
            let diag = dist[(i - 1) * width + j - 1];
            if equal && diag == here {
                ops.push(EditOp::Unchanged);
                i -= 1;
                j -= 1;
                continue;
            }
            if !equal && diag + 1 == here {
                ops.push(EditOp::Updated);
                i -= 1;
                j -= 1;
                continue;
            }
        }
        if i > 0 && dist[(i - 1) * width + j] + 1 == here {
            ops.push(EditOp::Removed);
            i -= 1;
        } else {
            ops.push(EditOp::Added);
            j -= 1;
        }
    }
    ops.reverse();
    ops
}

/// Merges runs of non-unchanged ops into splices.
fn splices_from_ops(ops: &[EditOp], prev_start: u64, cur_start: u64) -> Vec<Splice> {
    let mut splices = Vec::new();
    let mut pi = prev_start;
    let mut ci = cur_start;
    let mut open: Option<Splice> = None;

    for op in ops {
        match op {
            EditOp::Unchanged => {
                if let Some(splice) = open.take() {
                    splices.push(finish(splice));
                }
                pi += 1;
                ci += 1;
            }
            EditOp::Updated => {
                let splice = open.get_or_insert(Splice {
                    at: pi,
                    removed: 0,
                    added: 0,
                    from: ci,
                });
                splice.removed += 1;
                splice.added += 1;
                pi += 1;
                ci += 1;
            }
            EditOp::Removed => {
                let splice = open.get_or_insert(Splice {
                    at: pi,
                    removed: 0,
                    added: 0,
                    from: ci,
                });
                splice.removed += 1;
                pi += 1;
            }
            EditOp::Added => {
                let splice = open.get_or_insert(Splice {
                    at: pi,
                    removed: 0,
                    added: 0,
                    from: ci,
                });
                splice.added += 1;
                ci += 1;
            }
        }
    }
    if let Some(splice) = open.take() {
        splices.push(finish(splice));
    }
    splices
}

fn finish(mut splice: Splice) -> Splice {
    if splice.added == 0 {
        splice.from = 0;
    }
    splice
}
