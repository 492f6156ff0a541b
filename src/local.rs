//! In-process substrate: every rank is a thread.
//!
//! [`LocalUniverse`] owns the shared state of one simulated job and hands
//! out a [`LocalSubstrate`] endpoint per rank. Point-to-point messages are
//! buffered eagerly and matched in arrival order. Collectives are rounds
//! keyed by communicator and a per-communicator sequence number, so two
//! consecutive collectives on the same group can never be mixed up.
//!
//! ```
//! use tclmpi::{Context, ElementKind, LocalUniverse, Value};
//!
//! let universe = LocalUniverse::new(3);
//! let sums = universe.run(|endpoint| {
//!     let mut ctx = Context::new(endpoint);
//!     ctx.init().unwrap();
//!     let world = ctx.world_label().to_string();
//!     let rank = ctx.comm_rank(&world).unwrap();
//!     let total = ctx
//!         .allreduce(&Value::from(rank), ElementKind::Int, tclmpi::ReduceOp::Sum, &world)
//!         .unwrap();
//!     ctx.finalize().unwrap();
//!     total
//! });
//! assert!(sums.iter().all(|v| *v == Value::list([3])));
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::thread;

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, trace};

use crate::datatype::ElementKind;
use crate::error::{Error, ErrorClass, Result};
use crate::status::Status;
use crate::substrate::{Substrate, ANY_SOURCE, ANY_TAG};
use crate::ReduceOp;

/// Group handle of the local backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocalComm(u32);

impl LocalComm {
    /// All ranks.
    pub const WORLD: LocalComm = LocalComm(0);
    /// Only the calling rank.
    pub const SELF: LocalComm = LocalComm(1);
    /// The null group.
    pub const NULL: LocalComm = LocalComm(2);

    const FIRST_DYNAMIC: u32 = 3;
}

#[derive(Debug)]
struct Message {
    comm: u32,
    /// Rank of the sender within `comm`
    source: i32,
    /// World rank of the receiver
    dest: usize,
    tag: i32,
    /// Payload in wire layout
    data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct RoundKey {
    comm: u32,
    /// World rank for `SELF` rounds, 0 otherwise
    scope: usize,
    seq: u64,
}

#[derive(Debug)]
struct Round {
    parts: Vec<Option<Vec<u8>>>,
    readers_left: usize,
}

#[derive(Debug)]
struct Group {
    /// World ranks, indexed by rank in the group
    ranks: Arc<[usize]>,
    holders: usize,
}

#[derive(Debug)]
struct PendingSplit {
    comm: u32,
    joiners_left: usize,
}

#[derive(Debug, Default)]
struct State {
    next_comm: u32,
    groups: HashMap<u32, Group>,
    messages: VecDeque<Message>,
    rounds: HashMap<RoundKey, Round>,
    splits: HashMap<(RoundKey, i32), PendingSplit>,
    aborted: Option<i32>,
    abort_calls: usize,
}

impl State {
    fn check_aborted(&self) -> Result<()> {
        match self.aborted {
            Some(code) => Err(Error::Aborted(code)),
            None => Ok(()),
        }
    }
}

#[derive(Debug)]
struct Shared {
    size: usize,
    state: Mutex<State>,
    wakeup: Condvar,
}

/// A simulated job of `size` ranks.
#[derive(Debug, Clone)]
pub struct LocalUniverse {
    shared: Arc<Shared>,
}

impl LocalUniverse {
    /// Create a job of `size` ranks (at least one).
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        let world: Arc<[usize]> = (0..size).collect();
        let mut state = State {
            next_comm: LocalComm::FIRST_DYNAMIC,
            ..State::default()
        };
        state.groups.insert(
            LocalComm::WORLD.0,
            Group {
                ranks: world,
                holders: size,
            },
        );
        LocalUniverse {
            shared: Arc::new(Shared {
                size,
                state: Mutex::new(state),
                wakeup: Condvar::new(),
            }),
        }
    }

    /// Number of ranks.
    pub fn size(&self) -> usize {
        self.shared.size
    }

    /// Endpoint for `rank`. Each rank must have at most one endpoint in use.
    pub fn endpoint(&self, rank: usize) -> LocalSubstrate {
        LocalSubstrate {
            shared: Arc::clone(&self.shared),
            rank,
            live: [LocalComm::WORLD.0, LocalComm::SELF.0].into_iter().collect(),
            seqs: HashMap::new(),
        }
    }

    /// Run `f` on one thread per rank and collect the results in rank order.
    ///
    /// A panic on any rank is propagated after all threads have finished.
    pub fn run<T, F>(&self, f: F) -> Vec<T>
    where
        T: Send,
        F: Fn(LocalSubstrate) -> T + Sync,
    {
        let f = &f;
        thread::scope(|scope| {
            let handles: Vec<_> = (0..self.size())
                .map(|rank| {
                    let endpoint = self.endpoint(rank);
                    scope.spawn(move || f(endpoint))
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
                .collect()
        })
    }

    /// Code passed to the first `abort`, if any rank aborted.
    pub fn aborted(&self) -> Option<i32> {
        self.shared.state.lock().aborted
    }

    /// How many times `abort` was called across all ranks.
    pub fn abort_count(&self) -> usize {
        self.shared.state.lock().abort_calls
    }

    /// Messages sent but not yet received.
    pub fn pending_messages(&self) -> usize {
        self.shared.state.lock().messages.len()
    }
}

/// One rank's view of a [`LocalUniverse`].
#[derive(Debug)]
pub struct LocalSubstrate {
    shared: Arc<Shared>,
    rank: usize,
    live: HashSet<u32>,
    seqs: HashMap<u32, u64>,
}

/// Request of the local backend.
#[derive(Debug)]
pub enum LocalRequest {
    /// Sends complete eagerly; only the buffer is kept.
    Send {
        /// Payload that was sent
        buf: Vec<u8>,
    },
    /// Receive, matched at post time if a message was already queued.
    Recv {
        /// Destination buffer
        buf: Vec<u8>,
        /// Envelope if already matched
        matched: Option<Status>,
        /// Requested source
        source: i32,
        /// Requested tag
        tag: i32,
        /// Group to receive on
        comm: LocalComm,
        /// Kind the buffer holds
        kind: ElementKind,
    },
}

fn comm_error(comm: LocalComm, what: &str) -> Error {
    Error::substrate(ErrorClass::Comm, format!("{what} (communicator {})", comm.0))
}

impl LocalSubstrate {
    /// World rank of this endpoint.
    pub fn world_rank(&self) -> usize {
        self.rank
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.shared.state.lock()
    }

    fn members(&self, comm: LocalComm) -> Result<Arc<[usize]>> {
        if comm == LocalComm::SELF {
            return Ok(Arc::from(vec![self.rank]));
        }
        if !self.live.contains(&comm.0) {
            return Err(comm_error(comm, "not a member of this communicator"));
        }
        self.lock()
            .groups
            .get(&comm.0)
            .map(|g| Arc::clone(&g.ranks))
            .ok_or_else(|| comm_error(comm, "communicator has been freed"))
    }

    fn my_rank_in(&self, members: &[usize]) -> Result<usize> {
        members
            .iter()
            .position(|&r| r == self.rank)
            .ok_or_else(|| Error::Internal("rank missing from its own group".into()))
    }

    fn check_root(root: i32, size: usize) -> Result<usize> {
        usize::try_from(root)
            .ok()
            .filter(|&r| r < size)
            .ok_or_else(|| Error::substrate(ErrorClass::Root, format!("root {root} in group of {size}")))
    }

    fn check_source(source: i32, size: usize) -> Result<()> {
        if source == ANY_SOURCE || (0..size as i32).contains(&source) {
            Ok(())
        } else {
            Err(Error::substrate(ErrorClass::Rank, format!("source {source} in group of {size}")))
        }
    }

    fn check_tag(tag: i32, wildcard_ok: bool) -> Result<()> {
        if tag >= 0 || (wildcard_ok && tag == ANY_TAG) {
            Ok(())
        } else {
            Err(Error::substrate(ErrorClass::Tag, tag))
        }
    }

    /// Contribute `data` to the next collective round on `comm` and wait for
    /// every member's contribution.
    fn exchange(&mut self, comm: LocalComm, data: Vec<u8>) -> Result<(RoundKey, Vec<Vec<u8>>)> {
        let members = self.members(comm)?;
        let me = self.my_rank_in(&members)?;
        let seq = self.seqs.entry(comm.0).or_insert(0);
        let key = RoundKey {
            comm: comm.0,
            scope: if comm == LocalComm::SELF { self.rank } else { 0 },
            seq: *seq,
        };
        *seq += 1;

        let mut state = self.lock();
        state.check_aborted()?;
        let n = members.len();
        let round = state.rounds.entry(key).or_insert_with(|| Round {
            parts: vec![None; n],
            readers_left: n,
        });
        round.parts[me] = Some(data);
        self.shared.wakeup.notify_all();

        loop {
            state.check_aborted()?;
            let round = state
                .rounds
                .get_mut(&key)
                .ok_or_else(|| Error::Internal("collective round vanished".into()))?;
            if round.parts.iter().all(Option::is_some) {
                let parts: Vec<Vec<u8>> = round.parts.iter().flatten().cloned().collect();
                round.readers_left -= 1;
                if round.readers_left == 0 {
                    state.rounds.remove(&key);
                }
                trace!(comm = comm.0, seq = key.seq, "collective round complete");
                return Ok((key, parts));
            }
            self.shared.wakeup.wait(&mut state);
        }
    }

    fn find_message(&self, state: &State, comm: LocalComm, source: i32, tag: i32) -> Option<usize> {
        state.messages.iter().position(|m| {
            m.comm == comm.0
                && m.dest == self.rank
                && (source == ANY_SOURCE || m.source == source)
                && (tag == ANY_TAG || m.tag == tag)
        })
    }

    /// Remove the first matching message and copy it into `buf`.
    fn take_message(
        &self,
        state: &mut State,
        index: usize,
        buf: &mut [u8],
        kind: ElementKind,
    ) -> Result<Status> {
        let needed = unpacked_len(kind, state.messages[index].data.len());
        if needed > buf.len() {
            return Err(Error::substrate(
                ErrorClass::Truncate,
                format!("{needed} bytes into a buffer of {}", buf.len()),
            ));
        }
        let msg = state
            .messages
            .remove(index)
            .ok_or_else(|| Error::Internal("matched message vanished".into()))?;
        unpack(kind, &msg.data, buf);
        Ok(Status::new(msg.source, msg.tag, msg.data.len()))
    }

    fn blocking_recv(
        &mut self,
        buf: &mut [u8],
        kind: ElementKind,
        source: i32,
        tag: i32,
        comm: LocalComm,
    ) -> Result<Status> {
        let members = self.members(comm)?;
        Self::check_source(source, members.len())?;
        Self::check_tag(tag, true)?;
        let mut state = self.lock();
        loop {
            state.check_aborted()?;
            if let Some(index) = self.find_message(&state, comm, source, tag) {
                return self.take_message(&mut state, index, buf, kind);
            }
            self.shared.wakeup.wait(&mut state);
        }
    }
}

/// Fold `other` into `acc` element by element.
fn combine(kind: ElementKind, op: ReduceOp, acc: &mut [u8], other: &[u8]) -> Result<()> {
    if !op.supports(kind) {
        return Err(Error::substrate(ErrorClass::Op, format!("{op} on {kind}")));
    }
    let width = kind.width();
    for (a, b) in acc.chunks_exact_mut(width).zip(other.chunks_exact(width)) {
        match kind {
            ElementKind::Int => {
                let r = combine_int(op, read_i32(a), read_i32(b));
                a.copy_from_slice(&r.to_ne_bytes());
            }
            ElementKind::Float => {
                let r = combine_float(op, read_f64(a), read_f64(b));
                a.copy_from_slice(&r.to_ne_bytes());
            }
            ElementKind::IntPair => {
                let (av, bv) = (read_i32(a), read_i32(b));
                if take_other(op, av.cmp(&bv), read_i32(&a[4..]), read_i32(&b[4..])) {
                    a.copy_from_slice(b);
                }
            }
            ElementKind::FloatInt => {
                let (av, bv) = (read_f64(a), read_f64(b));
                let ord = av.partial_cmp(&bv).unwrap_or(std::cmp::Ordering::Equal);
                if take_other(op, ord, read_i32(&a[8..]), read_i32(&b[8..])) {
                    a.copy_from_slice(b);
                }
            }
            ElementKind::Bytes => unreachable!("no operator supports bytes"),
        }
    }
    Ok(())
}

fn combine_int(op: ReduceOp, a: i32, b: i32) -> i32 {
    match op {
        ReduceOp::Max => a.max(b),
        ReduceOp::Min => a.min(b),
        ReduceOp::Sum => a.wrapping_add(b),
        ReduceOp::Prod => a.wrapping_mul(b),
        ReduceOp::LogicalAnd => i32::from(a != 0 && b != 0),
        ReduceOp::BitAnd => a & b,
        ReduceOp::LogicalOr => i32::from(a != 0 || b != 0),
        ReduceOp::BitOr => a | b,
        ReduceOp::LogicalXor => i32::from((a != 0) != (b != 0)),
        ReduceOp::BitXor => a ^ b,
        ReduceOp::MaxLoc | ReduceOp::MinLoc => a,
    }
}

fn combine_float(op: ReduceOp, a: f64, b: f64) -> f64 {
    match op {
        ReduceOp::Max => a.max(b),
        ReduceOp::Min => a.min(b),
        ReduceOp::Sum => a + b,
        ReduceOp::Prod => a * b,
        _ => a,
    }
}

/// Location rule: the better value wins, ties go to the smaller index.
fn take_other(op: ReduceOp, ord: std::cmp::Ordering, a_loc: i32, b_loc: i32) -> bool {
    use std::cmp::Ordering::{Equal, Greater, Less};
    match (op, ord) {
        (ReduceOp::MaxLoc, Less) | (ReduceOp::MinLoc, Greater) => true,
        (_, Equal) => b_loc < a_loc,
        _ => false,
    }
}

fn read_i32(b: &[u8]) -> i32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&b[..4]);
    i32::from_ne_bytes(raw)
}

fn read_f64(b: &[u8]) -> f64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&b[..8]);
    f64::from_ne_bytes(raw)
}

/// Drop the padding of every element, as MPI does when it transmits.
fn pack(kind: ElementKind, buf: &[u8]) -> Vec<u8> {
    let (wire, width) = (kind.wire_width(), kind.width());
    if wire == width {
        return buf.to_vec();
    }
    buf.chunks(width)
        .flat_map(|element| &element[..wire.min(element.len())])
        .copied()
        .collect()
}

/// Buffer bytes needed to hold `wire` message bytes as `kind`.
fn unpacked_len(kind: ElementKind, wire: usize) -> usize {
    let (wire_width, width) = (kind.wire_width(), kind.width());
    if wire_width == width {
        wire
    } else {
        (wire + wire_width - 1) / wire_width * width
    }
}

/// Spread wire elements back out to buffer layout. `buf` must hold
/// [`unpacked_len`] bytes.
fn unpack(kind: ElementKind, data: &[u8], buf: &mut [u8]) {
    let (wire, width) = (kind.wire_width(), kind.width());
    for (element, slot) in data.chunks(wire).zip(buf.chunks_mut(width)) {
        slot[..element.len()].copy_from_slice(element);
    }
}

fn copy_exact(dst: &mut [u8], src: &[u8]) -> Result<()> {
    if src.len() > dst.len() {
        return Err(Error::substrate(
            ErrorClass::Truncate,
            format!("{} bytes into a buffer of {}", src.len(), dst.len()),
        ));
    }
    dst[..src.len()].copy_from_slice(src);
    Ok(())
}

impl Substrate for LocalSubstrate {
    type Comm = LocalComm;
    type Request = LocalRequest;

    fn init(&mut self) -> Result<()> {
        debug!(rank = self.rank, size = self.shared.size, "local endpoint up");
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        debug!(rank = self.rank, "local endpoint down");
        Ok(())
    }

    fn abort(&mut self, comm: LocalComm, code: i32) -> Result<()> {
        let mut state = self.lock();
        state.abort_calls += 1;
        state.aborted.get_or_insert(code);
        debug!(rank = self.rank, comm = comm.0, code, "abort");
        self.shared.wakeup.notify_all();
        Ok(())
    }

    fn world(&self) -> LocalComm {
        LocalComm::WORLD
    }

    fn self_comm(&self) -> LocalComm {
        LocalComm::SELF
    }

    fn null_comm(&self) -> LocalComm {
        LocalComm::NULL
    }

    fn size(&self, comm: LocalComm) -> Result<i32> {
        Ok(self.members(comm)?.len() as i32)
    }

    fn rank(&self, comm: LocalComm) -> Result<i32> {
        let members = self.members(comm)?;
        Ok(self.my_rank_in(&members)? as i32)
    }

    fn split(&mut self, comm: LocalComm, color: Option<i32>, key: i32) -> Result<LocalComm> {
        if let Some(c) = color {
            if c < 0 {
                return Err(Error::substrate(ErrorClass::Arg, format!("color {c}")));
            }
        }
        let members = self.members(comm)?;
        let mut mine = Vec::with_capacity(8);
        mine.extend_from_slice(&color.unwrap_or(-1).to_ne_bytes());
        mine.extend_from_slice(&key.to_ne_bytes());
        let (round, parts) = self.exchange(comm, mine)?;

        let Some(color) = color else {
            return Ok(LocalComm::NULL);
        };
        let mut joined: Vec<(i32, usize)> = parts
            .iter()
            .enumerate()
            .filter(|(_, p)| read_i32(p) == color)
            .map(|(old_rank, p)| (read_i32(&p[4..]), old_rank))
            .collect();
        joined.sort_unstable();
        let ranks: Arc<[usize]> = joined.iter().map(|&(_, old)| members[old]).collect();

        let mut state = self.lock();
        let id = match state.splits.get_mut(&(round, color)) {
            Some(pending) => {
                let id = pending.comm;
                pending.joiners_left -= 1;
                if pending.joiners_left == 0 {
                    state.splits.remove(&(round, color));
                }
                id
            }
            None => {
                let id = state.next_comm;
                state.next_comm += 1;
                state.groups.insert(
                    id,
                    Group {
                        ranks: Arc::clone(&ranks),
                        holders: ranks.len(),
                    },
                );
                if ranks.len() > 1 {
                    state.splits.insert(
                        (round, color),
                        PendingSplit {
                            comm: id,
                            joiners_left: ranks.len() - 1,
                        },
                    );
                }
                id
            }
        };
        drop(state);
        self.live.insert(id);
        debug!(rank = self.rank, comm = id, color, size = ranks.len(), "split");
        Ok(LocalComm(id))
    }

    fn free(&mut self, comm: LocalComm) -> Result<()> {
        if comm.0 < LocalComm::FIRST_DYNAMIC {
            return Err(comm_error(comm, "predefined communicators cannot be freed"));
        }
        if !self.live.remove(&comm.0) {
            return Err(comm_error(comm, "not a member of this communicator"));
        }
        self.seqs.remove(&comm.0);
        let mut state = self.lock();
        if let Some(group) = state.groups.get_mut(&comm.0) {
            group.holders -= 1;
            if group.holders == 0 {
                state.groups.remove(&comm.0);
            }
        }
        Ok(())
    }

    fn barrier(&mut self, comm: LocalComm) -> Result<()> {
        self.exchange(comm, Vec::new()).map(|_| ())
    }

    fn bcast(&mut self, buf: &mut [u8], _kind: ElementKind, root: i32, comm: LocalComm) -> Result<()> {
        let members = self.members(comm)?;
        let root = Self::check_root(root, members.len())?;
        let me = self.my_rank_in(&members)?;
        let data = if me == root { buf.to_vec() } else { Vec::new() };
        let (_, parts) = self.exchange(comm, data)?;
        if me != root {
            copy_exact(buf, &parts[root])?;
        }
        Ok(())
    }

    fn send(&mut self, buf: &[u8], kind: ElementKind, dest: i32, tag: i32, comm: LocalComm) -> Result<()> {
        let members = self.members(comm)?;
        let dest_world = usize::try_from(dest)
            .ok()
            .and_then(|d| members.get(d).copied())
            .ok_or_else(|| {
                Error::substrate(ErrorClass::Rank, format!("dest {dest} in group of {}", members.len()))
            })?;
        Self::check_tag(tag, false)?;
        let source = self.my_rank_in(&members)? as i32;
        let mut state = self.lock();
        state.check_aborted()?;
        state.messages.push_back(Message {
            comm: comm.0,
            source,
            dest: dest_world,
            tag,
            data: pack(kind, buf),
        });
        trace!(comm = comm.0, source, dest, tag, bytes = buf.len(), "queued message");
        self.shared.wakeup.notify_all();
        Ok(())
    }

    fn recv(
        &mut self,
        buf: &mut [u8],
        kind: ElementKind,
        source: i32,
        tag: i32,
        comm: LocalComm,
    ) -> Result<Status> {
        self.blocking_recv(buf, kind, source, tag, comm)
    }

    fn probe(&mut self, source: i32, tag: i32, comm: LocalComm) -> Result<Status> {
        let members = self.members(comm)?;
        Self::check_source(source, members.len())?;
        Self::check_tag(tag, true)?;
        let mut state = self.lock();
        loop {
            state.check_aborted()?;
            if let Some(index) = self.find_message(&state, comm, source, tag) {
                let m = &state.messages[index];
                return Ok(Status::new(m.source, m.tag, m.data.len()));
            }
            self.shared.wakeup.wait(&mut state);
        }
    }

    fn iprobe(&mut self, source: i32, tag: i32, comm: LocalComm) -> Result<Option<Status>> {
        let members = self.members(comm)?;
        Self::check_source(source, members.len())?;
        Self::check_tag(tag, true)?;
        let state = self.lock();
        state.check_aborted()?;
        Ok(self
            .find_message(&state, comm, source, tag)
            .map(|index| {
                let m = &state.messages[index];
                Status::new(m.source, m.tag, m.data.len())
            }))
    }

    fn isend(
        &mut self,
        buf: Vec<u8>,
        kind: ElementKind,
        dest: i32,
        tag: i32,
        comm: LocalComm,
    ) -> Result<LocalRequest> {
        self.send(&buf, kind, dest, tag, comm)?;
        Ok(LocalRequest::Send { buf })
    }

    fn irecv(
        &mut self,
        mut buf: Vec<u8>,
        kind: ElementKind,
        source: i32,
        tag: i32,
        comm: LocalComm,
    ) -> Result<LocalRequest> {
        let members = self.members(comm)?;
        Self::check_source(source, members.len())?;
        Self::check_tag(tag, true)?;
        let mut state = self.lock();
        state.check_aborted()?;
        let matched = match self.find_message(&state, comm, source, tag) {
            Some(index) => Some(self.take_message(&mut state, index, &mut buf, kind)?),
            None => None,
        };
        Ok(LocalRequest::Recv {
            buf,
            matched,
            source,
            tag,
            comm,
            kind,
        })
    }

    fn wait(&mut self, request: LocalRequest) -> Result<(Vec<u8>, Status)> {
        match request {
            LocalRequest::Send { buf } => Ok((buf, Status::empty())),
            LocalRequest::Recv {
                buf,
                matched: Some(status),
                ..
            } => Ok((buf, status)),
            LocalRequest::Recv {
                mut buf,
                matched: None,
                source,
                tag,
                comm,
                kind,
            } => {
                let status = self.blocking_recv(&mut buf, kind, source, tag, comm)?;
                Ok((buf, status))
            }
        }
    }

    fn reduce(
        &mut self,
        send: &[u8],
        recv: &mut [u8],
        kind: ElementKind,
        op: ReduceOp,
        root: i32,
        comm: LocalComm,
    ) -> Result<()> {
        let members = self.members(comm)?;
        let root = Self::check_root(root, members.len())?;
        let me = self.my_rank_in(&members)?;
        if !op.supports(kind) {
            return Err(Error::substrate(ErrorClass::Op, format!("{op} on {kind}")));
        }
        let (_, parts) = self.exchange(comm, send.to_vec())?;
        if me == root {
            let mut acc = parts[0].clone();
            for part in &parts[1..] {
                combine(kind, op, &mut acc, part)?;
            }
            copy_exact(recv, &acc)?;
        }
        Ok(())
    }

    fn allreduce(
        &mut self,
        send: &[u8],
        recv: &mut [u8],
        kind: ElementKind,
        op: ReduceOp,
        comm: LocalComm,
    ) -> Result<()> {
        if !op.supports(kind) {
            return Err(Error::substrate(ErrorClass::Op, format!("{op} on {kind}")));
        }
        let (_, parts) = self.exchange(comm, send.to_vec())?;
        let mut acc = parts[0].clone();
        for part in &parts[1..] {
            combine(kind, op, &mut acc, part)?;
        }
        copy_exact(recv, &acc)
    }

    fn scatter(
        &mut self,
        send: &[u8],
        recv: &mut [u8],
        _kind: ElementKind,
        root: i32,
        comm: LocalComm,
    ) -> Result<()> {
        let members = self.members(comm)?;
        let root = Self::check_root(root, members.len())?;
        let me = self.my_rank_in(&members)?;
        let data = if me == root { send.to_vec() } else { Vec::new() };
        let (_, parts) = self.exchange(comm, data)?;
        let chunk = recv.len();
        let slice = parts[root]
            .get(me * chunk..(me + 1) * chunk)
            .ok_or_else(|| Error::substrate(ErrorClass::Count, "scatter source too short"))?;
        recv.copy_from_slice(slice);
        Ok(())
    }

    fn gather(
        &mut self,
        send: &[u8],
        recv: &mut [u8],
        _kind: ElementKind,
        root: i32,
        comm: LocalComm,
    ) -> Result<()> {
        let members = self.members(comm)?;
        let root = Self::check_root(root, members.len())?;
        let me = self.my_rank_in(&members)?;
        let (_, parts) = self.exchange(comm, send.to_vec())?;
        if me == root {
            copy_exact(recv, &parts.concat())?;
        }
        Ok(())
    }

    fn allgather(
        &mut self,
        send: &[u8],
        recv: &mut [u8],
        _kind: ElementKind,
        comm: LocalComm,
    ) -> Result<()> {
        let (_, parts) = self.exchange(comm, send.to_vec())?;
        copy_exact(recv, &parts.concat())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(v: &[i32]) -> Vec<u8> {
        v.iter().flat_map(|x| x.to_ne_bytes()).collect()
    }

    fn to_ints(b: &[u8]) -> Vec<i32> {
        b.chunks_exact(4).map(read_i32).collect()
    }

    #[test]
    fn world_and_self_groups() {
        let universe = LocalUniverse::new(3);
        let shapes = universe.run(|ep| {
            (
                ep.size(LocalComm::WORLD).unwrap(),
                ep.rank(LocalComm::WORLD).unwrap(),
                ep.size(LocalComm::SELF).unwrap(),
                ep.rank(LocalComm::SELF).unwrap(),
            )
        });
        assert_eq!(shapes, vec![(3, 0, 1, 0), (3, 1, 1, 0), (3, 2, 1, 0)]);
    }

    #[test]
    fn null_group_is_unusable() {
        let universe = LocalUniverse::new(1);
        let mut ep = universe.endpoint(0);
        let err = ep.size(LocalComm::NULL).unwrap_err();
        assert_eq!(err.class(), Some(ErrorClass::Comm));
        assert!(ep.barrier(LocalComm::NULL).is_err());
    }

    #[test]
    fn messages_match_in_arrival_order() {
        let universe = LocalUniverse::new(1);
        let mut ep = universe.endpoint(0);
        ep.send(&[1], ElementKind::Bytes, 0, 5, LocalComm::WORLD).unwrap();
        ep.send(&[2, 2], ElementKind::Bytes, 0, 6, LocalComm::WORLD).unwrap();
        ep.send(&[3], ElementKind::Bytes, 0, 5, LocalComm::WORLD).unwrap();

        let status = ep.probe(ANY_SOURCE, 6, LocalComm::WORLD).unwrap();
        assert_eq!((status.source, status.tag, status.bytes), (0, 6, 2));

        let mut buf = [0u8; 4];
        let status = ep.recv(&mut buf, ElementKind::Bytes, 0, 5, LocalComm::WORLD).unwrap();
        assert_eq!((buf[0], status.bytes), (1, 1));
        let status = ep.recv(&mut buf, ElementKind::Bytes, 0, ANY_TAG, LocalComm::WORLD).unwrap();
        assert_eq!((status.tag, status.bytes), (6, 2));
        let status = ep.recv(&mut buf, ElementKind::Bytes, ANY_SOURCE, ANY_TAG, LocalComm::WORLD).unwrap();
        assert_eq!((buf[0], status.tag), (3, 5));
        assert!(ep.iprobe(ANY_SOURCE, ANY_TAG, LocalComm::WORLD).unwrap().is_none());
    }

    #[test]
    fn pair_padding_stays_off_the_wire() {
        let universe = LocalUniverse::new(1);
        let mut ep = universe.endpoint(0);
        let mut element = 2.5f64.to_ne_bytes().to_vec();
        element.extend_from_slice(&7i32.to_ne_bytes());
        element.extend_from_slice(&[0xAA; 4]);
        let sent = [element.clone(), element.clone()].concat();
        ep.send(&sent, ElementKind::FloatInt, 0, 1, LocalComm::WORLD).unwrap();

        let status = ep.probe(0, 1, LocalComm::WORLD).unwrap();
        assert_eq!(status.bytes, 24);
        assert_eq!(status.count(ElementKind::FloatInt), 2);

        let mut buf = vec![0u8; 32];
        ep.recv(&mut buf, ElementKind::FloatInt, 0, 1, LocalComm::WORLD).unwrap();
        assert_eq!(&buf[..12], &element[..12]);
        assert_eq!(&buf[16..28], &element[..12]);
        assert_eq!(&buf[12..16], &[0; 4]);
    }

    #[test]
    fn truncation_and_bad_arguments() {
        let universe = LocalUniverse::new(2);
        let mut ep = universe.endpoint(0);
        ep.send(&[0; 8], ElementKind::Bytes, 0, 0, LocalComm::WORLD).unwrap();
        let mut small = [0u8; 4];
        let err = ep.recv(&mut small, ElementKind::Bytes, 0, 0, LocalComm::WORLD).unwrap_err();
        assert_eq!(err.class(), Some(ErrorClass::Truncate));

        let err = ep.send(&[], ElementKind::Bytes, 2, 0, LocalComm::WORLD).unwrap_err();
        assert_eq!(err.class(), Some(ErrorClass::Rank));
        let err = ep.send(&[], ElementKind::Bytes, 1, -3, LocalComm::WORLD).unwrap_err();
        assert_eq!(err.class(), Some(ErrorClass::Tag));
        let err = ep.probe(5, 0, LocalComm::WORLD).unwrap_err();
        assert_eq!(err.class(), Some(ErrorClass::Rank));
    }

    #[test]
    fn collectives_move_bytes() {
        let universe = LocalUniverse::new(4);
        let results = universe.run(|mut ep| {
            let me = ep.rank(LocalComm::WORLD).unwrap();
            let mut b = if me == 2 { ints(&[7, 8]) } else { ints(&[0, 0]) };
            ep.bcast(&mut b, ElementKind::Int, 2, LocalComm::WORLD).unwrap();

            let mut sum = vec![0u8; 4];
            ep.allreduce(&ints(&[me]), &mut sum, ElementKind::Int, ReduceOp::Sum, LocalComm::WORLD)
                .unwrap();

            let mut gathered = vec![0u8; 16];
            ep.allgather(&ints(&[me * 10]), &mut gathered, ElementKind::Int, LocalComm::WORLD)
                .unwrap();

            let mut piece = vec![0u8; 4];
            let source = if me == 0 { ints(&[4, 5, 6, 7]) } else { Vec::new() };
            ep.scatter(&source, &mut piece, ElementKind::Int, 0, LocalComm::WORLD).unwrap();

            (to_ints(&b), to_ints(&sum), to_ints(&gathered), to_ints(&piece))
        });
        for (rank, (b, sum, gathered, piece)) in results.into_iter().enumerate() {
            assert_eq!(b, [7, 8]);
            assert_eq!(sum, [6]);
            assert_eq!(gathered, [0, 10, 20, 30]);
            assert_eq!(piece, [4 + rank as i32]);
        }
    }

    #[test]
    fn location_reductions_prefer_smaller_index_on_ties() {
        let mut acc = ints(&[5, 3]);
        combine(ElementKind::IntPair, ReduceOp::MaxLoc, &mut acc, &ints(&[5, 1])).unwrap();
        assert_eq!(to_ints(&acc), [5, 1]);
        combine(ElementKind::IntPair, ReduceOp::MaxLoc, &mut acc, &ints(&[9, 4])).unwrap();
        assert_eq!(to_ints(&acc), [9, 4]);
        combine(ElementKind::IntPair, ReduceOp::MinLoc, &mut acc, &ints(&[9, 6])).unwrap();
        assert_eq!(to_ints(&acc), [9, 4]);
    }

    #[test]
    fn operator_kind_mismatch_is_op_error() {
        let mut acc = 1.0f64.to_ne_bytes().to_vec();
        let err = combine(ElementKind::Float, ReduceOp::BitXor, &mut acc, &2.0f64.to_ne_bytes())
            .unwrap_err();
        assert_eq!(err.class(), Some(ErrorClass::Op));
    }

    #[test]
    fn split_orders_by_key_then_rank() {
        let universe = LocalUniverse::new(4);
        let results = universe.run(|mut ep| {
            let me = ep.rank(LocalComm::WORLD).unwrap();
            // evens and odds, reversed order inside each half
            let sub = ep.split(LocalComm::WORLD, Some(me % 2), -me).unwrap();
            let shape = (ep.size(sub).unwrap(), ep.rank(sub).unwrap());
            let mut sum = vec![0u8; 4];
            ep.allreduce(&ints(&[me]), &mut sum, ElementKind::Int, ReduceOp::Sum, sub)
                .unwrap();
            ep.free(sub).unwrap();
            assert!(ep.size(sub).is_err());
            (shape, to_ints(&sum)[0])
        });
        assert_eq!(
            results,
            vec![((2, 1), 2), ((2, 1), 4), ((2, 0), 2), ((2, 0), 4)]
        );
    }

    #[test]
    fn undefined_color_yields_null() {
        let universe = LocalUniverse::new(2);
        let results = universe.run(|mut ep| {
            let me = ep.rank(LocalComm::WORLD).unwrap();
            let color = if me == 0 { None } else { Some(0) };
            ep.split(LocalComm::WORLD, color, 0).unwrap()
        });
        assert_eq!(results[0], LocalComm::NULL);
        assert_ne!(results[1], LocalComm::NULL);
    }

    #[test]
    fn predefined_groups_cannot_be_freed() {
        let universe = LocalUniverse::new(1);
        let mut ep = universe.endpoint(0);
        for comm in [LocalComm::WORLD, LocalComm::SELF, LocalComm::NULL] {
            assert_eq!(ep.free(comm).unwrap_err().class(), Some(ErrorClass::Comm));
        }
    }

    #[test]
    fn abort_wakes_blocked_ranks() {
        let universe = LocalUniverse::new(2);
        let results = universe.run(|mut ep| {
            if ep.world_rank() == 0 {
                ep.abort(LocalComm::WORLD, 9).unwrap();
                Ok(Status::empty())
            } else {
                ep.probe(0, 0, LocalComm::WORLD)
            }
        });
        assert!(matches!(results[1], Err(Error::Aborted(9))));
        assert_eq!(universe.aborted(), Some(9));
        assert_eq!(universe.abort_count(), 1);
    }

    #[test]
    fn deferred_receive_matches_later_send() {
        let universe = LocalUniverse::new(2);
        let results = universe.run(|mut ep| {
            let me = ep.rank(LocalComm::WORLD).unwrap();
            if me == 1 {
                let req = ep
                    .irecv(vec![0; 4], ElementKind::Int, 0, 3, LocalComm::WORLD)
                    .unwrap();
                ep.barrier(LocalComm::WORLD).unwrap();
                let (buf, status) = ep.wait(req).unwrap();
                (to_ints(&buf), status.source, status.tag)
            } else {
                ep.barrier(LocalComm::WORLD).unwrap();
                ep.send(&ints(&[42]), ElementKind::Int, 1, 3, LocalComm::WORLD).unwrap();
                (Vec::new(), 0, 0)
            }
        });
        assert_eq!(results[1], (vec![42], 0, 3));
    }
}
