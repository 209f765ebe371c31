// Stable sorting of small `Copy` keys (physical positions) with a fallible
// "less than" predicate.
//
// The predicate may hit the disk, so it can fail and it is only ever given a
// boolean answer to work with. The standard library sorts take an `Ordering`,
// cannot be interrupted by an error, and are allowed to panic when the
// comparison is not a total order. This sort has none of those problems: any
// predicate, however inconsistent, produces a permutation of the input.
//
// Runs of `INSERTION_RUN` elements are insertion sorted in place, then merged
// bottom-up through a scratch buffer. Ties always take the left element, which
// keeps the sort stable.

const INSERTION_RUN: usize = 12;

pub(crate) fn stable_sort_by<T, E, F>(v: &mut [T], mut less: F) -> Result<(), E>
where
    T: Copy,
    F: FnMut(&T, &T) -> Result<bool, E>,
{
    let len = v.len();
    if len < 2 {
        return Ok(());
    }

    for run in v.chunks_mut(INSERTION_RUN) {
        insertion_sort(run, &mut less)?;
    }

    let mut buf = v.to_vec();
    let mut width = INSERTION_RUN;
    while width < len {
        let mut lo = 0;
        while lo < len {
            let mid = std::cmp::min(lo + width, len);
            let hi = std::cmp::min(lo + 2 * width, len);
            merge(&v[lo..hi], mid - lo, &mut buf[lo..hi], &mut less)?;
            lo = hi;
        }
        v.copy_from_slice(&buf);
        width *= 2;
    }

    Ok(())
}

fn insertion_sort<T, E, F>(v: &mut [T], less: &mut F) -> Result<(), E>
where
    T: Copy,
    F: FnMut(&T, &T) -> Result<bool, E>,
{
    for i in 1..v.len() {
        let mut j = i;
        while j > 0 && less(&v[j], &v[j - 1])? {
            v.swap(j, j - 1);
            j -= 1;
        }
    }
    Ok(())
}

// Merges the sorted halves `src[..mid]` and `src[mid..]` into `dst`.
fn merge<T, E, F>(src: &[T], mid: usize, dst: &mut [T], less: &mut F) -> Result<(), E>
where
    T: Copy,
    F: FnMut(&T, &T) -> Result<bool, E>,
{
    let (mut i, mut j) = (0, mid);
    for slot in dst.iter_mut() {
        let take_right = if i == mid {
            true
        } else if j == src.len() {
            false
        } else {
            less(&src[j], &src[i])?
        };
        if take_right {
            *slot = src[j];
            j += 1;
        } else {
            *slot = src[i];
            i += 1;
        }
    }
    Ok(())
}
