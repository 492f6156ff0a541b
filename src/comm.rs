//! Group queries and management.

use tracing::debug;

use crate::datatype::strip_prefix;
use crate::error::{Error, Result};
use crate::substrate::Substrate;
use crate::value::parse_int;
use crate::Context;

/// Parse a split color argument.
///
/// `tclmpi::undefined` yields `None` (exclude the caller); anything else must
/// be an integer.
pub fn parse_color(token: &str) -> Result<Option<i32>> {
    if strip_prefix(token) == "undefined" {
        return Ok(None);
    }
    parse_int(token)
        .map(Some)
        .ok_or_else(|| Error::InvalidInteger(token.to_string()))
}

impl<S: Substrate> Context<S> {
    /// Number of processes in the group.
    pub fn comm_size(&self, comm: &str) -> Result<i32> {
        let comm = self.resolve(comm)?;
        self.substrate.size(comm)
    }

    /// Rank of this process in the group.
    pub fn comm_rank(&self, comm: &str) -> Result<i32> {
        let comm = self.resolve(comm)?;
        self.substrate.rank(comm)
    }

    /// Split the group by color, ordering the parts by key.
    ///
    /// Every member must call this. Callers passing `None` get the null
    /// group's label back.
    ///
    /// # Errors
    ///
    /// A negative color is rejected locally with [`Error::InvalidColor`],
    /// before the substrate is involved.
    pub fn comm_split(&mut self, comm: &str, color: Option<i32>, key: i32) -> Result<String> {
        let parent = self.resolve(comm)?;
        if let Some(c) = color {
            if c < 0 {
                return Err(Error::InvalidColor(c));
            }
        }
        let child = self.substrate.split(parent, color, key)?;
        let label = self.comms.register(child);
        debug!(parent = comm, ?color, key, %label, "split communicator");
        Ok(label)
    }

    /// Release a group created by [`comm_split`](Self::comm_split).
    ///
    /// The label is dead afterwards, even if it is freed again.
    pub fn comm_free(&mut self, comm: &str) -> Result<()> {
        let handle = self.resolve(comm)?;
        self.substrate.free(handle)?;
        self.comms.remove(comm);
        Ok(())
    }

    /// Block until every member of the group has entered the barrier.
    pub fn barrier(&mut self, comm: &str) -> Result<()> {
        let comm = self.resolve(comm)?;
        self.substrate.barrier(comm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;
    use crate::local::LocalUniverse;

    const WORLD: &str = "tclmpi::comm_world";

    #[test]
    fn color_tokens() {
        assert_eq!(parse_color("tclmpi::undefined").unwrap(), None);
        assert_eq!(parse_color("3").unwrap(), Some(3));
        assert_eq!(parse_color("-2").unwrap(), Some(-2));
        assert!(matches!(parse_color("red"), Err(Error::InvalidInteger(_))));
    }

    #[test]
    fn split_and_free_on_four_ranks() {
        let universe = LocalUniverse::new(4);
        let results = universe.run(|ep| {
            let mut ctx = Context::new(ep);
            ctx.init().unwrap();
            let rank = ctx.comm_rank(WORLD).unwrap();
            let half = ctx.comm_split(WORLD, Some(rank / 2), rank).unwrap();
            let shape = (ctx.comm_size(&half).unwrap(), ctx.comm_rank(&half).unwrap());
            ctx.barrier(&half).unwrap();
            ctx.comm_free(&half).unwrap();
            let after = ctx.comm_size(&half);
            let again = ctx.comm_free(&half);
            ctx.finalize().unwrap();
            (half, shape, after.is_err(), again.is_err())
        });
        for (rank, (label, shape, gone, refree)) in results.into_iter().enumerate() {
            assert_eq!(label, "tclmpi::comm0");
            assert_eq!(shape, (2, rank as i32 % 2));
            assert!(gone);
            assert!(refree);
        }
    }

    #[test]
    fn undefined_color_gets_null_label() {
        let universe = LocalUniverse::new(2);
        let labels = universe.run(|ep| {
            let mut ctx = Context::new(ep);
            ctx.init().unwrap();
            let rank = ctx.comm_rank(WORLD).unwrap();
            let color = if rank == 0 { Some(0) } else { None };
            ctx.comm_split(WORLD, color, 0).unwrap()
        });
        assert_eq!(labels[0], "tclmpi::comm0");
        assert_eq!(labels[1], "tclmpi::comm_null");
    }

    #[test]
    fn split_labels_are_never_reused() {
        let universe = LocalUniverse::new(1);
        let mut ctx = Context::new(universe.endpoint(0));
        ctx.init().unwrap();
        let a = ctx.comm_split(WORLD, Some(0), 0).unwrap();
        ctx.comm_free(&a).unwrap();
        let b = ctx.comm_split(WORLD, Some(0), 0).unwrap();
        assert_eq!(a, "tclmpi::comm0");
        assert_eq!(b, "tclmpi::comm1");
    }

    #[test]
    fn negative_color_is_rejected_locally() {
        let universe = LocalUniverse::new(1);
        let mut ctx = Context::new(universe.endpoint(0));
        ctx.init().unwrap();
        let err = ctx.comm_split(WORLD, Some(-4), 0).unwrap_err();
        assert_eq!(err.to_string(), "invalid color argument: -4");
        assert!(err.is_usage());
    }

    #[test]
    fn predefined_and_unknown_groups() {
        let universe = LocalUniverse::new(1);
        let mut ctx = Context::new(universe.endpoint(0));
        ctx.init().unwrap();
        assert_eq!(ctx.comm_size("tclmpi::comm_self").unwrap(), 1);
        let err = ctx.comm_free(WORLD).unwrap_err();
        assert_eq!(err.class(), Some(ErrorClass::Comm));
        assert_eq!(ctx.comm_size(WORLD).unwrap(), 1);
        assert!(matches!(
            ctx.comm_size("tclmpi::comm9"),
            Err(Error::UnknownCommunicator(_))
        ));
        assert!(ctx.comm_size("tclmpi::comm_null").is_err());
    }
}
