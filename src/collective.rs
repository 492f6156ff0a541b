//! Scatter, gather and reductions with size reconciliation.
//!
//! The fixed-count collectives underneath need every member to agree on the
//! element count before any data moves. The checks done here run on every
//! member and fail identically everywhere, so no member is left waiting in
//! a collective the others have abandoned.

use tracing::trace;

use crate::datatype::ElementKind;
use crate::error::{Error, ErrorClass, Result};
use crate::marshal::{decode, Buffer};
use crate::substrate::Substrate;
use crate::value::Value;
use crate::{Context, ReduceOp};

fn reject_bytes(command: &'static str, kind: ElementKind) -> Result<()> {
    if kind == ElementKind::Bytes {
        return Err(Error::UnsupportedDatatype { command, kind });
    }
    Ok(())
}

fn check_op(op: ReduceOp, kind: ElementKind) -> Result<()> {
    if op.supports(kind) {
        Ok(())
    } else {
        Err(Error::substrate(ErrorClass::Op, format!("{op} does not apply to {kind}")))
    }
}

impl<S: Substrate> Context<S> {
    /// Distribute the root's `value` in equal consecutive parts.
    ///
    /// # Errors
    ///
    /// Fails on every member if the root's element count is not a multiple
    /// of the group size.
    pub fn scatter(&mut self, value: &Value, kind: ElementKind, root: i32, comm: &str) -> Result<Value> {
        let comm = self.resolve(comm)?;
        reject_bytes("scatter", kind)?;
        let rank = self.substrate.rank(comm)?;
        let size = self.substrate.size(comm)? as usize;

        let send = if rank == root {
            self.encode(value, kind, comm)?
        } else {
            Buffer::zeroed(kind, 0)
        };
        let total = self.bcast_int(send.len() as i32, root, comm)? as usize;
        trace!(root, total, size, "scatter size announced");
        if total % size != 0 {
            return Err(Error::ScatterCount { total, size });
        }

        let mut recv = Buffer::zeroed(kind, total / size);
        self.substrate
            .scatter(send.as_bytes(), recv.as_bytes_mut(), kind, root, comm)?;
        Ok(decode(&recv))
    }

    /// Collect every member's `value` on `root`, in rank order.
    ///
    /// Non-root members get an empty list back.
    ///
    /// # Errors
    ///
    /// Fails on every member if the members contribute different counts.
    pub fn gather(&mut self, value: &Value, kind: ElementKind, root: i32, comm: &str) -> Result<Value> {
        let comm = self.resolve(comm)?;
        reject_bytes("gather", kind)?;
        let rank = self.substrate.rank(comm)?;
        let size = self.substrate.size(comm)? as usize;

        let send = self.encode(value, kind, comm)?;
        let count = self.agreed_count(send.len(), comm)?;
        let mut recv = Buffer::zeroed(kind, if rank == root { count * size } else { 0 });
        self.substrate
            .gather(send.as_bytes(), recv.as_bytes_mut(), kind, root, comm)?;
        Ok(decode(&recv))
    }

    /// Collect every member's `value` on every member, in rank order.
    pub fn allgather(&mut self, value: &Value, kind: ElementKind, comm: &str) -> Result<Value> {
        let comm = self.resolve(comm)?;
        reject_bytes("allgather", kind)?;
        let size = self.substrate.size(comm)? as usize;

        let send = self.encode(value, kind, comm)?;
        let count = self.agreed_count(send.len(), comm)?;
        let mut recv = Buffer::zeroed(kind, count * size);
        self.substrate
            .allgather(send.as_bytes(), recv.as_bytes_mut(), kind, comm)?;
        Ok(decode(&recv))
    }

    /// Combine every member's `value` element-wise on `root`.
    ///
    /// Non-root members get an empty list back.
    pub fn reduce(&mut self, value: &Value, kind: ElementKind, op: ReduceOp, root: i32, comm: &str) -> Result<Value> {
        let comm = self.resolve(comm)?;
        reject_bytes("reduce", kind)?;
        check_op(op, kind)?;
        let rank = self.substrate.rank(comm)?;

        let send = self.encode(value, kind, comm)?;
        let mut recv = Buffer::zeroed(kind, if rank == root { send.len() } else { 0 });
        self.substrate
            .reduce(send.as_bytes(), recv.as_bytes_mut(), kind, op, root, comm)?;
        Ok(decode(&recv))
    }

    /// Combine every member's `value` element-wise on every member.
    pub fn allreduce(&mut self, value: &Value, kind: ElementKind, op: ReduceOp, comm: &str) -> Result<Value> {
        let comm = self.resolve(comm)?;
        reject_bytes("allreduce", kind)?;
        check_op(op, kind)?;

        let send = self.encode(value, kind, comm)?;
        let mut recv = Buffer::zeroed(kind, send.len());
        self.substrate
            .allreduce(send.as_bytes(), recv.as_bytes_mut(), kind, op, comm)?;
        Ok(decode(&recv))
    }

    /// Require every member to contribute `local` elements.
    fn agreed_count(&mut self, local: usize, comm: S::Comm) -> Result<usize> {
        let local = local as i32;
        let max = self.allreduce_int(local, ReduceOp::Max, comm)?;
        let min = self.allreduce_int(local, ReduceOp::Min, comm)?;
        trace!(min, max, "gather counts reconciled");
        if min != max {
            return Err(Error::GatherCount { min, max });
        }
        Ok(local as usize)
    }
}
