//! Hello World example - initialization, group queries and a barrier.
//!
//! Run with: cargo build --features mpi --example hello_mpi &&
//!           mpiexec -n 4 ./target/debug/examples/hello_mpi

use tclmpi::{Context, Config, MpiSubstrate, Result};

fn main() -> Result<()> {
    let mut ctx = Context::with_config(MpiSubstrate::new(), Config::from_env());
    ctx.init()?;

    let world = ctx.world_label().to_string();
    let rank = ctx.comm_rank(&world)?;
    let size = ctx.comm_size(&world)?;
    println!("Hello from rank {rank} of {size} ({world})");

    // Synchronize before exiting
    ctx.barrier(&world)?;
    if rank == 0 {
        println!("\nAll processes reported in. Conversion policy: {}", ctx.conv_get());
    }

    ctx.finalize()
}
