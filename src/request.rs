//! Non-blocking sends and receives.
//!
//! A non-blocking receive cannot post its buffer until it knows the message
//! size. [`Context::irecv`] therefore probes once: if a matching message is
//! already pending the buffer is sized and posted right away, otherwise the
//! request is recorded as unposted and [`Context::wait`] falls back to a
//! blocking probe and receive.
//!
//! ```
//! use tclmpi::{Context, ElementKind, LocalUniverse, RequestPhase, Value};
//!
//! let universe = LocalUniverse::new(1);
//! let mut ctx = Context::new(universe.endpoint(0));
//! ctx.init().unwrap();
//! let world = ctx.world_label().to_string();
//!
//! let rx = ctx.irecv(ElementKind::Int, 0, 5, &world).unwrap();
//! assert_eq!(ctx.request_phase(&rx), Some(RequestPhase::Unposted));
//!
//! let tx = ctx.isend(&Value::list([1, 2, 3]), ElementKind::Int, 0, 5, &world).unwrap();
//! assert!(ctx.wait(&tx).unwrap().value.is_none());
//!
//! let done = ctx.wait(&rx).unwrap();
//! assert_eq!(done.value, Some(Value::list([1, 2, 3])));
//! assert_eq!(done.status.tag, 5);
//! ```

use tracing::debug;

use crate::datatype::ElementKind;
use crate::error::Result;
use crate::marshal::{decode, Buffer};
use crate::registry::{PendingRequest, RequestPhase};
use crate::status::Status;
use crate::substrate::Substrate;
use crate::transfer::buffer_for;
use crate::value::Value;
use crate::Context;

/// Result of [`Context::wait`].
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    /// Received data; `None` for sends and unknown requests
    pub value: Option<Value>,
    /// Envelope of the received message; empty for sends and unknown requests
    pub status: Status,
}

impl Completion {
    fn empty() -> Self {
        Completion {
            value: None,
            status: Status::empty(),
        }
    }
}

impl<S: Substrate> Context<S> {
    /// Start sending `value`. The returned label must be passed to [`wait`](Self::wait).
    pub fn isend(&mut self, value: &Value, kind: ElementKind, dest: i32, tag: i32, comm: &str) -> Result<String> {
        let comm = self.resolve(comm)?;
        let buf = self.encode(value, kind, comm)?;
        let native = self
            .substrate
            .isend(buf.into_bytes(), kind, dest, tag, comm)?;
        Ok(self.requests.create(PendingRequest::Send { native }))
    }

    /// Start receiving a message of any size.
    pub fn irecv(&mut self, kind: ElementKind, source: i32, tag: i32, comm: &str) -> Result<String> {
        let comm = self.resolve(comm)?;
        let entry = match self.substrate.iprobe(source, tag, comm)? {
            Some(probed) => {
                let buf = buffer_for(&probed, kind)?;
                let native = self.substrate.irecv(
                    buf.into_bytes(),
                    kind,
                    probed.source,
                    probed.tag,
                    comm,
                )?;
                PendingRequest::Posted { kind, native }
            }
            None => PendingRequest::Unposted {
                kind,
                source,
                tag,
                comm,
            },
        };
        Ok(self.requests.create(entry))
    }

    /// Complete a request.
    ///
    /// Unknown labels (never created, or already completed) complete
    /// immediately with nothing. A deferred receive that fails stays
    /// registered and can be waited for again; any other request is gone
    /// afterwards even if completion fails.
    pub fn wait(&mut self, request: &str) -> Result<Completion> {
        self.ensure_active()?;
        let deferred = match self.requests.get(request) {
            None => {
                debug!(request, "wait on unknown request");
                return Ok(Completion::empty());
            }
            Some(PendingRequest::Unposted {
                kind,
                source,
                tag,
                comm,
            }) => Some((*kind, *source, *tag, *comm)),
            Some(_) => None,
        };

        if let Some((kind, source, tag, comm)) = deferred {
            debug!(request, "posting deferred receive");
            let probed = self.substrate.probe(source, tag, comm)?;
            let mut buf = buffer_for(&probed, kind)?;
            let status = self.substrate.recv(
                buf.as_bytes_mut(),
                kind,
                probed.source,
                probed.tag,
                comm,
            )?;
            self.requests.take(request);
            return Ok(Completion {
                value: Some(decode(&buf)),
                status,
            });
        }

        match self.requests.take(request) {
            Some(PendingRequest::Send { native }) => {
                self.substrate.wait(native)?;
                Ok(Completion::empty())
            }
            Some(PendingRequest::Posted { kind, native }) => {
                let (bytes, status) = self.substrate.wait(native)?;
                let buf = Buffer::from_bytes(kind, bytes)?;
                Ok(Completion {
                    value: Some(decode(&buf)),
                    status,
                })
            }
            Some(PendingRequest::Unposted { .. }) | None => Ok(Completion::empty()),
        }
    }

    /// Phase of an in-flight request, `None` if the label is unknown.
    pub fn request_phase(&self, request: &str) -> Option<RequestPhase> {
        self.requests.get(request).map(PendingRequest::phase)
    }

    /// Number of requests not yet waited for.
    pub fn pending_requests(&self) -> usize {
        self.requests.len()
    }
}
