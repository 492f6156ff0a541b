//! Ring communication example - messages of growing size travel around
//! the ring, received without the receiver knowing their length.
//!
//! Run with: cargo build --features mpi --example ring_mpi &&
//!           mpiexec -n 4 ./target/debug/examples/ring_mpi

use tclmpi::{Context, ElementKind, MpiSubstrate, Result, Value, ANY_TAG};

fn main() -> Result<()> {
    let mut ctx = Context::new(MpiSubstrate::new());
    ctx.init()?;
    let world = ctx.world_label().to_string();

    let rank = ctx.comm_rank(&world)?;
    let size = ctx.comm_size(&world)?;
    if size < 2 {
        if rank == 0 {
            eprintln!("This example requires at least 2 processes");
        }
        return ctx.finalize();
    }

    let next = (rank + 1) % size;
    let prev = (rank + size - 1) % size;

    // Each rank sends rank+1 doubles; the receiver learns the size by probing
    let payload = Value::list((0..=rank).map(|i| f64::from(rank) * 100.0 + f64::from(i)));
    let rx = ctx.irecv(ElementKind::Float, prev, ANY_TAG, &world)?;
    ctx.send(&payload, ElementKind::Float, next, rank, &world)?;
    let done = ctx.wait(&rx)?;

    let received = done.value.unwrap_or_else(Value::empty);
    println!(
        "Rank {rank}: received {} doubles from rank {} (tag={}): {received}",
        done.status.count_double(),
        done.status.source,
        done.status.tag,
    );
    assert_eq!(done.status.count_double(), prev as usize + 1, "Data mismatch!");

    ctx.barrier(&world)?;
    if rank == 0 {
        println!("\nRing communication test passed!");
    }
    ctx.finalize()
}
