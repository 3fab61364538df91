//! 3-D grid dispatch over a [`Fabric`], or serially when there is none
//! (SPEC_FULL.md §4.J).
//!
//! No direct teacher analogue — `rayon`'s own `par_iter` glue
//! (`src/par_iter/from_par_iter.rs`) covers adjacent ground with a
//! different API shape. Built directly from the spec's workgroup/invocation
//! model on top of this crate's own [`Fabric`], [`Semaphore`], and
//! [`Waitgroup`].

use crate::fabric::Fabric;
use crate::log::Event;
use crate::sync::{Semaphore, Waitgroup};
use std::sync::Arc;

/// A 3-D extent or coordinate: `(x, y, z)`.
pub type Dim3 = (u32, u32, u32);

fn dim_volume(d: Dim3) -> u64 {
    d.0 as u64 * d.1 as u64 * d.2 as u64
}

fn ceil_div(a: u32, b: u32) -> u32 {
    (a + b - 1) / b
}

/// Dispatches `gx*gy*gz` workgroups, each invoking `f` over its
/// `lx*ly*lz` local grid.
///
/// `f` receives `(workgroup_size, workgroup_num, workgroup_id,
/// local_invocation_id, global_invocation_id)`, where
/// `global_invocation_id = workgroup_id * local + local_invocation_id`.
///
/// When `fabric` is `None` the whole grid runs serially on the calling
/// thread; the set of invocations is identical, only ordering differs.
pub fn compute<F>(fabric: Option<&Fabric>, global: Dim3, local: Dim3, f: F)
where
    F: Fn(Dim3, Dim3, Dim3, Dim3, Dim3) + Send + Sync + 'static,
{
    dispatch(fabric, global, local, None, Arc::new(f));
}

/// Like [`compute`], but takes an absolute `size` and derives `global` by
/// ceiling division; invocations whose `global_invocation_id` falls outside
/// `size` on any axis are skipped.
pub fn compute_sized<F>(fabric: Option<&Fabric>, size: Dim3, local: Dim3, f: F)
where
    F: Fn(Dim3, Dim3, Dim3, Dim3, Dim3) + Send + Sync + 'static,
{
    let global = (
        ceil_div(size.0, local.0.max(1)),
        ceil_div(size.1, local.1.max(1)),
        ceil_div(size.2, local.2.max(1)),
    );
    dispatch(fabric, global, local, Some(size), Arc::new(f));
}

fn dispatch<F>(fabric: Option<&Fabric>, global: Dim3, local: Dim3, bound: Option<Dim3>, f: Arc<F>)
where
    F: Fn(Dim3, Dim3, Dim3, Dim3, Dim3) + Send + Sync + 'static,
{
    if dim_volume(global) == 0 || dim_volume(local) == 0 {
        return;
    }

    let fabric = match fabric {
        Some(fabric) => fabric,
        None => {
            run_serially(global, local, bound, &f);
            return;
        }
    };

    let admission = Arc::new(Semaphore::new(fabric.settings().workers_count.max(1)));
    let wg = Arc::new(Waitgroup::new());

    fabric
        .logger()
        .log(|| Event::JobsInjected { count: dim_volume(global) as usize });

    for gz in 0..global.2 {
        for gy in 0..global.1 {
            for gx in 0..global.0 {
                admission.acquire();
                wg.add(1);

                let f = Arc::clone(&f);
                let wg2 = Arc::clone(&wg);
                let admission2 = Arc::clone(&admission);
                let workgroup_id = (gx, gy, gz);
                fabric.go(move || {
                    run_workgroup(global, local, bound, workgroup_id, &f);
                    wg2.done();
                    admission2.release();
                });
            }
        }
    }

    wg.wait();
}

fn run_serially<F>(global: Dim3, local: Dim3, bound: Option<Dim3>, f: &F)
where
    F: Fn(Dim3, Dim3, Dim3, Dim3, Dim3) + Send + Sync + 'static,
{
    for gz in 0..global.2 {
        for gy in 0..global.1 {
            for gx in 0..global.0 {
                run_workgroup(global, local, bound, (gx, gy, gz), f);
            }
        }
    }
}

fn run_workgroup<F>(global: Dim3, local: Dim3, bound: Option<Dim3>, workgroup_id: Dim3, f: &F)
where
    F: Fn(Dim3, Dim3, Dim3, Dim3, Dim3) + Send + Sync + 'static,
{
    for lz in 0..local.2 {
        for ly in 0..local.1 {
            for lx in 0..local.0 {
                let local_invocation_id = (lx, ly, lz);
                let global_invocation_id = (
                    workgroup_id.0 * local.0 + lx,
                    workgroup_id.1 * local.1 + ly,
                    workgroup_id.2 * local.2 + lz,
                );
                if let Some(size) = bound {
                    if global_invocation_id.0 >= size.0
                        || global_invocation_id.1 >= size.1
                        || global_invocation_id.2 >= size.2
                    {
                        continue;
                    }
                }
                f(local, global, workgroup_id, local_invocation_id, global_invocation_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn serial_visits_every_invocation_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        compute(None, (2, 2, 1), (3, 3, 1), move |_, _, _, _, _| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(count.load(Ordering::SeqCst), 2 * 2 * 3 * 3);
    }

    #[test]
    fn sized_skips_out_of_bounds_invocations() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        compute_sized(None, (5, 1, 1), (4, 1, 1), move |_, _, _, _, global| {
            assert!(global.0 < 5);
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(count.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn fabric_dispatch_visits_every_invocation() {
        let fabric = crate::fabric::FabricBuilder::new().workers_count(2).build().unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        compute(Some(&fabric), (4, 1, 1), (4, 1, 1), move |_, _, _, _, _| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(count.load(Ordering::SeqCst), 16);
    }
}
