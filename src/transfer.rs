//! Auto-sizing broadcast and point-to-point transfers.
//!
//! Receivers never have to know how much data is coming:
//!
//! - `bcast` first broadcasts the element count, then the data.
//! - `recv` probes for the message, sizes a buffer from the envelope, then
//!   receives from the *probed* source and tag, so a wildcard receive cannot
//!   pick up a different message than the one it measured.

use tracing::trace;

use crate::datatype::{strip_prefix, ElementKind};
use crate::error::{Error, Result};
use crate::marshal::{decode, Buffer};
use crate::status::Status;
use crate::substrate::{Substrate, ANY_SOURCE, ANY_TAG};
use crate::value::{parse_int, Value};
use crate::Context;

/// Parse a source rank argument; `tclmpi::any_source` is the wildcard.
pub fn parse_source(token: &str) -> Result<i32> {
    parse_wildcard(token, "any_source", ANY_SOURCE)
}

/// Parse a tag argument; `tclmpi::any_tag` is the wildcard.
pub fn parse_tag(token: &str) -> Result<i32> {
    parse_wildcard(token, "any_tag", ANY_TAG)
}

fn parse_wildcard(token: &str, wildcard: &str, value: i32) -> Result<i32> {
    if strip_prefix(token) == wildcard {
        return Ok(value);
    }
    parse_int(token).ok_or_else(|| Error::InvalidInteger(token.to_string()))
}

/// Size a receive buffer for a probed message.
pub(crate) fn buffer_for(status: &Status, kind: ElementKind) -> Result<Buffer> {
    let count = kind
        .elements_on_wire(status.bytes)
        .ok_or(Error::PartialElement {
            bytes: status.bytes,
            kind,
        })?;
    Ok(Buffer::zeroed(kind, count))
}

impl<S: Substrate> Context<S> {
    /// Broadcast `value` from `root` to every member of `comm`.
    ///
    /// Only the root's `value` is read. Every member gets the root's value back,
    /// decoded as `kind`.
    pub fn bcast(&mut self, value: &Value, kind: ElementKind, root: i32, comm: &str) -> Result<Value> {
        let comm = self.resolve(comm)?;
        let rank = self.substrate.rank(comm)?;

        let mut buf = if rank == root {
            self.encode(value, kind, comm)?
        } else {
            Buffer::zeroed(kind, 0)
        };

        let count = self.bcast_int(buf.len() as i32, root, comm)?;
        trace!(root, count, %kind, "broadcast size announced");
        let count =
            usize::try_from(count).map_err(|_| Error::Internal(format!("negative count {count}")))?;
        if rank != root {
            buf = Buffer::zeroed(kind, count);
        }
        if count > 0 {
            self.substrate
                .bcast(buf.as_bytes_mut(), kind, root, comm)?;
        }
        Ok(decode(&buf))
    }

    /// Blocking send of `value` as `kind`.
    pub fn send(&mut self, value: &Value, kind: ElementKind, dest: i32, tag: i32, comm: &str) -> Result<()> {
        let comm = self.resolve(comm)?;
        let buf = self.encode(value, kind, comm)?;
        trace!(dest, tag, count = buf.len(), %kind, "send");
        self.substrate
            .send(buf.as_bytes(), kind, dest, tag, comm)
    }

    /// Blocking receive of a message of any size, decoded as `kind`.
    ///
    /// `source` and `tag` may be [`ANY_SOURCE`] and [`ANY_TAG`]; the returned
    /// status names the actual sender and tag.
    pub fn recv(&mut self, kind: ElementKind, source: i32, tag: i32, comm: &str) -> Result<(Value, Status)> {
        let comm = self.resolve(comm)?;
        let probed = self.substrate.probe(source, tag, comm)?;
        trace!(source = probed.source, tag = probed.tag, bytes = probed.bytes, "recv probed");
        let mut buf = buffer_for(&probed, kind)?;
        let status = self
            .substrate
            .recv(buf.as_bytes_mut(), kind, probed.source, probed.tag, comm)?;
        Ok((decode(&buf), status))
    }

    /// Wait for a matching message and return its envelope without receiving it.
    pub fn probe(&mut self, source: i32, tag: i32, comm: &str) -> Result<Status> {
        let handle = self.resolve(comm)?;
        if self.is_null(handle) {
            return Err(Error::InvalidCommunicator(comm.to_string()));
        }
        self.substrate.probe(source, tag, handle)
    }

    /// Envelope of a matching message if one is pending, `None` otherwise.
    pub fn iprobe(&mut self, source: i32, tag: i32, comm: &str) -> Result<Option<Status>> {
        let handle = self.resolve(comm)?;
        if self.is_null(handle) {
            return Err(Error::InvalidCommunicator(comm.to_string()));
        }
        self.substrate.iprobe(source, tag, handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::LocalUniverse;
    use crate::marshal::ConversionPolicy;

    const WORLD: &str = "tclmpi::comm_world";

    fn sequence(n: usize) -> Value {
        Value::list((0..n as i32).map(|i| i * 3 - 1))
    }

    #[test]
    fn wildcard_tokens() {
        assert_eq!(parse_source("tclmpi::any_source").unwrap(), ANY_SOURCE);
        assert_eq!(parse_tag("::tclmpi::any_tag").unwrap(), ANY_TAG);
        assert_eq!(parse_source("4").unwrap(), 4);
        assert_eq!(parse_tag("0x10").unwrap(), 16);
        assert!(matches!(parse_tag("tclmpi::any_source"), Err(Error::InvalidInteger(_))));
    }

    #[test]
    fn bcast_any_length_any_group_size() {
        for size in 1..=4 {
            let universe = LocalUniverse::new(size);
            let results = universe.run(|ep| {
                let mut ctx = Context::new(ep);
                ctx.init().unwrap();
                let root = ctx.comm_size(WORLD).unwrap() - 1;
                let rank = ctx.comm_rank(WORLD).unwrap();
                let mut out = Vec::new();
                for n in 0..=6 {
                    let mine = if rank == root { sequence(n) } else { Value::empty() };
                    out.push(ctx.bcast(&mine, ElementKind::Int, root, WORLD).unwrap());
                }
                ctx.finalize().unwrap();
                out
            });
            for per_rank in results {
                for (n, got) in per_rank.into_iter().enumerate() {
                    assert_eq!(got, sequence(n), "size {size}, length {n}");
                }
            }
        }
    }

    #[test]
    fn bcast_bytes_and_pairs() {
        let universe = LocalUniverse::new(3);
        let results = universe.run(|ep| {
            let mut ctx = Context::new(ep);
            ctx.init().unwrap();
            let text = ctx
                .bcast(&Value::from("hello world"), ElementKind::Bytes, 0, WORLD)
                .unwrap();
            let pairs = ctx
                .bcast(&Value::list([(1.5, 2), (2.5, 3)]), ElementKind::FloatInt, 1, WORLD)
                .unwrap();
            (text, pairs)
        });
        for (text, pairs) in results {
            assert_eq!(text, Value::Bytes(b"hello world".to_vec()));
            assert_eq!(pairs, Value::list([(1.5, 2), (2.5, 3)]));
        }
    }

    #[test]
    fn recv_resolves_wildcards() {
        let universe = LocalUniverse::new(3);
        let results = universe.run(|ep| {
            let mut ctx = Context::new(ep);
            ctx.init().unwrap();
            let rank = ctx.comm_rank(WORLD).unwrap();
            if rank == 0 {
                let mut got = Vec::new();
                for _ in 0..2 {
                    let (value, status) = ctx.recv(ElementKind::Int, ANY_SOURCE, ANY_TAG, WORLD).unwrap();
                    got.push((status.source, status.tag, status.count_int(), value));
                }
                got.sort_by_key(|g| g.0);
                got
            } else {
                let payload = Value::list(0..rank * 2);
                ctx.send(&payload, ElementKind::Int, 0, 10 + rank, WORLD).unwrap();
                Vec::new()
            }
        });
        assert_eq!(
            results[0],
            vec![
                (1, 11, 2, Value::list([0, 1])),
                (2, 12, 4, Value::list([0, 1, 2, 3])),
            ]
        );
    }

    #[test]
    fn recv_of_partial_elements_fails() {
        let universe = LocalUniverse::new(1);
        let mut ctx = Context::new(universe.endpoint(0));
        ctx.init().unwrap();
        ctx.send(&Value::from("abcdef"), ElementKind::Bytes, 0, 1, WORLD).unwrap();
        let err = ctx.recv(ElementKind::Int, 0, 1, WORLD).unwrap_err();
        assert!(matches!(err, Error::PartialElement { bytes: 6, .. }));
    }

    #[test]
    fn recv_sizes_padded_pairs_from_wire_length() {
        let universe = LocalUniverse::new(1);
        let mut ctx = Context::new(universe.endpoint(0));
        ctx.init().unwrap();
        let pairs = Value::list([(1.5, 2), (-0.25, 9), (8.0, -1)]);
        for n in 1..=3 {
            let sent = Value::List(pairs.as_list()[..n].to_vec());
            ctx.send(&sent, ElementKind::FloatInt, 0, 3, WORLD).unwrap();
            let (value, status) = ctx.recv(ElementKind::FloatInt, 0, 3, WORLD).unwrap();
            assert_eq!(status.bytes, 12 * n);
            assert_eq!(value, sent);
        }
    }

    #[test]
    fn probe_reports_envelope_without_consuming() {
        let universe = LocalUniverse::new(1);
        let mut ctx = Context::new(universe.endpoint(0));
        ctx.init().unwrap();
        assert!(ctx.iprobe(ANY_SOURCE, ANY_TAG, WORLD).unwrap().is_none());
        ctx.send(&Value::list([1.0, 2.0]), ElementKind::Float, 0, 7, WORLD).unwrap();
        let status = ctx.probe(ANY_SOURCE, ANY_TAG, WORLD).unwrap();
        assert_eq!((status.source, status.tag, status.count_double()), (0, 7, 2));
        assert_eq!(ctx.iprobe(0, 7, WORLD).unwrap(), Some(status));
        let (value, _) = ctx.recv(ElementKind::Float, 0, 7, WORLD).unwrap();
        assert_eq!(value, Value::list([1.0, 2.0]));
    }

    #[test]
    fn probe_on_null_group_is_invalid() {
        let universe = LocalUniverse::new(1);
        let mut ctx = Context::new(universe.endpoint(0));
        ctx.init().unwrap();
        assert!(matches!(
            ctx.probe(ANY_SOURCE, ANY_TAG, "tclmpi::comm_null"),
            Err(Error::InvalidCommunicator(_))
        ));
        assert!(matches!(
            ctx.iprobe(ANY_SOURCE, ANY_TAG, "tclmpi::comm_null"),
            Err(Error::InvalidCommunicator(_))
        ));
    }

    #[test]
    fn send_honors_conversion_policy() {
        let universe = LocalUniverse::new(1);
        let mut ctx = Context::new(universe.endpoint(0));
        ctx.init().unwrap();
        let mixed = Value::list([Value::Int(1), Value::from("not-a-number"), Value::Int(3)]);

        let err = ctx.send(&mixed, ElementKind::Int, 0, 0, WORLD).unwrap_err();
        assert!(matches!(err, Error::Conversion { index: 1, .. }));
        assert_eq!(universe.pending_messages(), 0);

        ctx.set_policy(ConversionPolicy::ToZero);
        ctx.send(&mixed, ElementKind::Int, 0, 0, WORLD).unwrap();
        let (value, _) = ctx.recv(ElementKind::Int, 0, 0, WORLD).unwrap();
        assert_eq!(value, Value::list([1, 0, 3]));
    }
}
