//! Parallel pi by numerical integration, on the in-process backend.
//!
//! Rank 0 broadcasts the number of intervals, every rank integrates its
//! share of 4/(1+x^2) over [0,1], and the partial sums are reduced on rank 0.
//!
//! Run with: cargo run --example pi_local

use tclmpi::{Context, ElementKind, LocalUniverse, ReduceOp, Result, Value};

const RANKS: usize = 4;

fn main() -> Result<()> {
    let universe = LocalUniverse::new(RANKS);
    let results = universe.run(|endpoint| -> Result<Option<f64>> {
        let mut ctx = Context::new(endpoint);
        ctx.init()?;
        let world = ctx.world_label().to_string();
        let rank = ctx.comm_rank(&world)?;
        let size = ctx.comm_size(&world)?;

        // Only the root's value counts
        let intervals = if rank == 0 { Value::from(1_000_000) } else { Value::empty() };
        let intervals = ctx.bcast(&intervals, ElementKind::Int, 0, &world)?;
        let n = intervals.as_list().first().and_then(Value::to_i32).unwrap_or(0);

        let h = 1.0 / f64::from(n);
        let partial: f64 = (rank..n)
            .step_by(size as usize)
            .map(|i| {
                let x = h * (f64::from(i) + 0.5);
                4.0 / (1.0 + x * x)
            })
            .sum::<f64>()
            * h;

        let total = ctx.reduce(&Value::list([partial]), ElementKind::Float, ReduceOp::Sum, 0, &world)?;
        ctx.finalize()?;
        Ok(total.as_list().first().and_then(Value::to_f64))
    });

    for result in results {
        if let Some(pi) = result? {
            println!("pi is approximately {pi:.12}, error {:.3e}", (pi - std::f64::consts::PI).abs());
        }
    }
    Ok(())
}
