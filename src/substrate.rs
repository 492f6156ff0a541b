//! The message-passing substrate consumed by [`Context`](crate::Context).
//!
//! A substrate moves raw bytes. It knows the element kind of every transfer
//! (so reductions and the real MPI datatypes work) but never sees a dynamic
//! value. All buffers are sized by the caller; the substrate never allocates
//! on the caller's behalf.

use std::fmt::Debug;
use std::hash::Hash;

use crate::datatype::ElementKind;
use crate::error::Result;
use crate::status::Status;
use crate::ReduceOp;

/// Wildcard source rank for probe and receive.
pub const ANY_SOURCE: i32 = -1;

/// Wildcard tag for probe and receive.
pub const ANY_TAG: i32 = -1;

/// Point-to-point, collective and group operations of a message-passing
/// runtime.
///
/// Counts are implied by buffer lengths: a buffer of kind `kind` holds
/// `buf.len() / kind.width()` elements.
pub trait Substrate {
    /// Opaque group handle.
    type Comm: Copy + Eq + Hash + Debug;

    /// In-flight non-blocking operation. Owns its buffer until [`wait`](Self::wait).
    type Request: Debug;

    /// Bring the runtime up.
    fn init(&mut self) -> Result<()>;

    /// Shut the runtime down.
    fn finalize(&mut self) -> Result<()>;

    /// Terminate every process of the computation.
    ///
    /// A real runtime does not return from this. Backends that do return
    /// make every later blocking call fail.
    fn abort(&mut self, comm: Self::Comm, code: i32) -> Result<()>;

    /// The group of all processes.
    fn world(&self) -> Self::Comm;

    /// The group containing only the calling process.
    fn self_comm(&self) -> Self::Comm;

    /// The null group.
    fn null_comm(&self) -> Self::Comm;

    /// Number of processes in `comm`.
    fn size(&self, comm: Self::Comm) -> Result<i32>;

    /// Rank of the calling process in `comm`.
    fn rank(&self, comm: Self::Comm) -> Result<i32>;

    /// Partition `comm` by color, ordering each part by key then old rank.
    ///
    /// `None` is the "exclude me" color and yields the null group.
    fn split(&mut self, comm: Self::Comm, color: Option<i32>, key: i32) -> Result<Self::Comm>;

    /// Release a group created by [`split`](Self::split).
    fn free(&mut self, comm: Self::Comm) -> Result<()>;

    /// Block until every process of `comm` has entered the barrier.
    fn barrier(&mut self, comm: Self::Comm) -> Result<()>;

    /// Broadcast `buf` from `root` into `buf` on every other process.
    fn bcast(&mut self, buf: &mut [u8], kind: ElementKind, root: i32, comm: Self::Comm)
        -> Result<()>;

    /// Blocking send.
    fn send(
        &mut self,
        buf: &[u8],
        kind: ElementKind,
        dest: i32,
        tag: i32,
        comm: Self::Comm,
    ) -> Result<()>;

    /// Blocking receive into `buf`. The message must fit.
    fn recv(
        &mut self,
        buf: &mut [u8],
        kind: ElementKind,
        source: i32,
        tag: i32,
        comm: Self::Comm,
    ) -> Result<Status>;

    /// Wait for a matching message and report its envelope without receiving it.
    fn probe(&mut self, source: i32, tag: i32, comm: Self::Comm) -> Result<Status>;

    /// Report the envelope of a matching message if one is pending.
    fn iprobe(&mut self, source: i32, tag: i32, comm: Self::Comm) -> Result<Option<Status>>;

    /// Start a send of `buf`.
    fn isend(
        &mut self,
        buf: Vec<u8>,
        kind: ElementKind,
        dest: i32,
        tag: i32,
        comm: Self::Comm,
    ) -> Result<Self::Request>;

    /// Start a receive into `buf`.
    fn irecv(
        &mut self,
        buf: Vec<u8>,
        kind: ElementKind,
        source: i32,
        tag: i32,
        comm: Self::Comm,
    ) -> Result<Self::Request>;

    /// Complete a request, handing its buffer back together with the envelope.
    fn wait(&mut self, request: Self::Request) -> Result<(Vec<u8>, Status)>;

    /// Combine `send` from every process into `recv` on `root`.
    #[allow(clippy::too_many_arguments)]
    fn reduce(
        &mut self,
        send: &[u8],
        recv: &mut [u8],
        kind: ElementKind,
        op: ReduceOp,
        root: i32,
        comm: Self::Comm,
    ) -> Result<()>;

    /// Combine `send` from every process into `recv` on every process.
    fn allreduce(
        &mut self,
        send: &[u8],
        recv: &mut [u8],
        kind: ElementKind,
        op: ReduceOp,
        comm: Self::Comm,
    ) -> Result<()>;

    /// Hand consecutive `recv.len()`-byte slices of `send` (read on `root`
    /// only) to the processes in rank order.
    fn scatter(
        &mut self,
        send: &[u8],
        recv: &mut [u8],
        kind: ElementKind,
        root: i32,
        comm: Self::Comm,
    ) -> Result<()>;

    /// Concatenate `send` from every process into `recv` on `root`.
    fn gather(
        &mut self,
        send: &[u8],
        recv: &mut [u8],
        kind: ElementKind,
        root: i32,
        comm: Self::Comm,
    ) -> Result<()>;

    /// Concatenate `send` from every process into `recv` on every process.
    fn allgather(
        &mut self,
        send: &[u8],
        recv: &mut [u8],
        kind: ElementKind,
        comm: Self::Comm,
    ) -> Result<()>;
}
