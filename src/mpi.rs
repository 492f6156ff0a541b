//! Real MPI backend over the C shim.
//!
//! Only one [`MpiSubstrate`] may be initialized per process. MPI is
//! finalized when the substrate is dropped if the caller did not do so.

use std::marker::PhantomData;
use std::os::raw::c_void;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

use crate::datatype::ElementKind;
use crate::error::{Error, ErrorClass, Result};
use crate::ffi;
use crate::status::Status;
use crate::substrate::Substrate;
use crate::ReduceOp;

/// Global flag tracking whether MPI has been initialized
static MPI_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Turn a shim return code into a `Result`, asking MPI for the class and text.
fn check(code: i32) -> Result<()> {
    if code == 0 {
        return Ok(());
    }
    let mut class: i32 = 0;
    let mut buf = [0u8; 1024];
    let mut len: i32 = 0;
    let ret = unsafe {
        ffi::tclmpi_shim_error_info(code, &mut class, buf.as_mut_ptr().cast(), &mut len)
    };
    if ret != 0 {
        return Err(Error::substrate(ErrorClass::Unknown, format!("error code {code}")));
    }
    let len = (len.max(0) as usize).min(buf.len());
    Err(Error::Substrate {
        class: ErrorClass::from_raw(class),
        message: String::from_utf8_lossy(&buf[..len]).into_owned(),
    })
}

fn count_of(buf: &[u8], kind: ElementKind) -> i64 {
    (buf.len() / kind.width()) as i64
}

/// Group handle: a slot in the shim's communicator table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MpiComm(i32);

impl MpiComm {
    /// Get the raw slot number (for advanced use).
    pub fn raw_handle(&self) -> i32 {
        self.0
    }
}

/// A handle to a nonblocking MPI operation together with its buffer.
///
/// The buffer stays owned by the request until [`Substrate::wait`] hands it
/// back. Dropping an incomplete request waits for it first, so MPI never
/// writes into freed memory.
#[derive(Debug)]
pub struct MpiRequest {
    handle: i64,
    buf: Vec<u8>,
    is_send: bool,
    completed: bool,
}

impl MpiRequest {
    /// Get the raw request handle (for advanced use).
    pub fn raw_handle(&self) -> i64 {
        self.handle
    }
}

impl Drop for MpiRequest {
    fn drop(&mut self) {
        if !self.completed {
            // Waiting is the only way to get the buffer back from MPI
            let (mut source, mut tag, mut bytes) = (0, 0, 0);
            unsafe { ffi::tclmpi_shim_wait(self.handle, &mut source, &mut tag, &mut bytes) };
        }
    }
}

/// MPI environment for the calling process.
///
/// Not `Send` or `Sync`: MPI is driven from the thread that initialized it.
///
/// ```no_run
/// use tclmpi::{Context, MpiSubstrate};
///
/// let mut ctx = Context::new(MpiSubstrate::new());
/// ctx.init().unwrap();
/// let world = ctx.world_label().to_string();
/// println!("rank {} of {}", ctx.comm_rank(&world).unwrap(), ctx.comm_size(&world).unwrap());
/// ctx.finalize().unwrap();
/// ```
#[derive(Debug)]
pub struct MpiSubstrate {
    active: bool,
    /// Marker to make MpiSubstrate !Send and !Sync
    _marker: PhantomData<*const ()>,
}

impl MpiSubstrate {
    /// Create an uninitialized environment.
    pub fn new() -> Self {
        MpiSubstrate {
            active: false,
            _marker: PhantomData,
        }
    }
}

impl Default for MpiSubstrate {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MpiSubstrate {
    fn drop(&mut self) {
        if self.active {
            unsafe {
                ffi::tclmpi_shim_finalize();
            }
            self.active = false;
        }
    }
}

impl Substrate for MpiSubstrate {
    type Comm = MpiComm;
    type Request = MpiRequest;

    fn init(&mut self) -> Result<()> {
        if MPI_INITIALIZED.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyInitialized);
        }
        let ret = unsafe { ffi::tclmpi_shim_init() };
        if ret != 0 {
            MPI_INITIALIZED.store(false, Ordering::SeqCst);
            return check(ret);
        }
        self.active = true;
        debug!("MPI initialized");
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        if !self.active {
            return Err(Error::FinalizeBeforeInit);
        }
        self.active = false;
        check(unsafe { ffi::tclmpi_shim_finalize() })
    }

    fn abort(&mut self, comm: MpiComm, code: i32) -> Result<()> {
        check(unsafe { ffi::tclmpi_shim_abort(comm.0, code) })
    }

    fn world(&self) -> MpiComm {
        MpiComm(unsafe { ffi::tclmpi_shim_comm_world() })
    }

    fn self_comm(&self) -> MpiComm {
        MpiComm(unsafe { ffi::tclmpi_shim_comm_self() })
    }

    fn null_comm(&self) -> MpiComm {
        MpiComm(unsafe { ffi::tclmpi_shim_comm_null() })
    }

    fn size(&self, comm: MpiComm) -> Result<i32> {
        let mut size: i32 = 0;
        check(unsafe { ffi::tclmpi_shim_comm_size(comm.0, &mut size) })?;
        Ok(size)
    }

    fn rank(&self, comm: MpiComm) -> Result<i32> {
        let mut rank: i32 = 0;
        check(unsafe { ffi::tclmpi_shim_comm_rank(comm.0, &mut rank) })?;
        Ok(rank)
    }

    fn split(&mut self, comm: MpiComm, color: Option<i32>, key: i32) -> Result<MpiComm> {
        let mut newcomm: i32 = 0;
        let (color, undefined) = match color {
            Some(c) => (c, 0),
            None => (0, 1),
        };
        check(unsafe { ffi::tclmpi_shim_comm_split(comm.0, color, undefined, key, &mut newcomm) })?;
        Ok(MpiComm(newcomm))
    }

    fn free(&mut self, comm: MpiComm) -> Result<()> {
        check(unsafe { ffi::tclmpi_shim_comm_free(comm.0) })
    }

    fn barrier(&mut self, comm: MpiComm) -> Result<()> {
        check(unsafe { ffi::tclmpi_shim_barrier(comm.0) })
    }

    fn bcast(&mut self, buf: &mut [u8], kind: ElementKind, root: i32, comm: MpiComm) -> Result<()> {
        let ret = unsafe {
            ffi::tclmpi_shim_bcast(
                buf.as_mut_ptr().cast::<c_void>(),
                count_of(buf, kind),
                kind as i32,
                root,
                comm.0,
            )
        };
        check(ret)
    }

    fn send(&mut self, buf: &[u8], kind: ElementKind, dest: i32, tag: i32, comm: MpiComm) -> Result<()> {
        let ret = unsafe {
            ffi::tclmpi_shim_send(
                buf.as_ptr().cast::<c_void>(),
                count_of(buf, kind),
                kind as i32,
                dest,
                tag,
                comm.0,
            )
        };
        check(ret)
    }

    fn recv(
        &mut self,
        buf: &mut [u8],
        kind: ElementKind,
        source: i32,
        tag: i32,
        comm: MpiComm,
    ) -> Result<Status> {
        let mut actual_source: i32 = 0;
        let mut actual_tag: i32 = 0;
        let mut actual_bytes: i64 = 0;
        let ret = unsafe {
            ffi::tclmpi_shim_recv(
                buf.as_mut_ptr().cast::<c_void>(),
                count_of(buf, kind),
                kind as i32,
                source,
                tag,
                comm.0,
                &mut actual_source,
                &mut actual_tag,
                &mut actual_bytes,
            )
        };
        check(ret)?;
        Ok(Status::new(actual_source, actual_tag, actual_bytes as usize))
    }

    fn probe(&mut self, source: i32, tag: i32, comm: MpiComm) -> Result<Status> {
        let mut actual_source: i32 = 0;
        let mut actual_tag: i32 = 0;
        let mut actual_bytes: i64 = 0;
        let ret = unsafe {
            ffi::tclmpi_shim_probe(
                source,
                tag,
                comm.0,
                &mut actual_source,
                &mut actual_tag,
                &mut actual_bytes,
            )
        };
        check(ret)?;
        Ok(Status::new(actual_source, actual_tag, actual_bytes as usize))
    }

    fn iprobe(&mut self, source: i32, tag: i32, comm: MpiComm) -> Result<Option<Status>> {
        let mut flag: i32 = 0;
        let mut actual_source: i32 = 0;
        let mut actual_tag: i32 = 0;
        let mut actual_bytes: i64 = 0;
        let ret = unsafe {
            ffi::tclmpi_shim_iprobe(
                source,
                tag,
                comm.0,
                &mut flag,
                &mut actual_source,
                &mut actual_tag,
                &mut actual_bytes,
            )
        };
        check(ret)?;
        Ok((flag != 0).then(|| Status::new(actual_source, actual_tag, actual_bytes as usize)))
    }

    fn isend(
        &mut self,
        buf: Vec<u8>,
        kind: ElementKind,
        dest: i32,
        tag: i32,
        comm: MpiComm,
    ) -> Result<MpiRequest> {
        let mut handle: i64 = 0;
        let ret = unsafe {
            ffi::tclmpi_shim_isend(
                buf.as_ptr().cast::<c_void>(),
                count_of(&buf, kind),
                kind as i32,
                dest,
                tag,
                comm.0,
                &mut handle,
            )
        };
        check(ret)?;
        Ok(MpiRequest {
            handle,
            buf,
            is_send: true,
            completed: false,
        })
    }

    fn irecv(
        &mut self,
        mut buf: Vec<u8>,
        kind: ElementKind,
        source: i32,
        tag: i32,
        comm: MpiComm,
    ) -> Result<MpiRequest> {
        let mut handle: i64 = 0;
        let ret = unsafe {
            ffi::tclmpi_shim_irecv(
                buf.as_mut_ptr().cast::<c_void>(),
                count_of(&buf, kind),
                kind as i32,
                source,
                tag,
                comm.0,
                &mut handle,
            )
        };
        check(ret)?;
        Ok(MpiRequest {
            handle,
            buf,
            is_send: false,
            completed: false,
        })
    }

    fn wait(&mut self, mut request: MpiRequest) -> Result<(Vec<u8>, Status)> {
        let mut source: i32 = 0;
        let mut tag: i32 = 0;
        let mut bytes: i64 = 0;
        let ret = unsafe { ffi::tclmpi_shim_wait(request.handle, &mut source, &mut tag, &mut bytes) };
        request.completed = true;
        check(ret)?;
        let status = if request.is_send {
            Status::empty()
        } else {
            Status::new(source, tag, bytes as usize)
        };
        Ok((std::mem::take(&mut request.buf), status))
    }

    fn reduce(
        &mut self,
        send: &[u8],
        recv: &mut [u8],
        kind: ElementKind,
        op: ReduceOp,
        root: i32,
        comm: MpiComm,
    ) -> Result<()> {
        let ret = unsafe {
            ffi::tclmpi_shim_reduce(
                send.as_ptr().cast::<c_void>(),
                recv.as_mut_ptr().cast::<c_void>(),
                count_of(send, kind),
                kind as i32,
                op as i32,
                root,
                comm.0,
            )
        };
        check(ret)
    }

    fn allreduce(
        &mut self,
        send: &[u8],
        recv: &mut [u8],
        kind: ElementKind,
        op: ReduceOp,
        comm: MpiComm,
    ) -> Result<()> {
        let ret = unsafe {
            ffi::tclmpi_shim_allreduce(
                send.as_ptr().cast::<c_void>(),
                recv.as_mut_ptr().cast::<c_void>(),
                count_of(send, kind),
                kind as i32,
                op as i32,
                comm.0,
            )
        };
        check(ret)
    }

    fn scatter(
        &mut self,
        send: &[u8],
        recv: &mut [u8],
        kind: ElementKind,
        root: i32,
        comm: MpiComm,
    ) -> Result<()> {
        let ret = unsafe {
            ffi::tclmpi_shim_scatter(
                send.as_ptr().cast::<c_void>(),
                recv.as_mut_ptr().cast::<c_void>(),
                count_of(recv, kind),
                kind as i32,
                root,
                comm.0,
            )
        };
        check(ret)
    }

    fn gather(
        &mut self,
        send: &[u8],
        recv: &mut [u8],
        kind: ElementKind,
        root: i32,
        comm: MpiComm,
    ) -> Result<()> {
        let ret = unsafe {
            ffi::tclmpi_shim_gather(
                send.as_ptr().cast::<c_void>(),
                recv.as_mut_ptr().cast::<c_void>(),
                count_of(send, kind),
                kind as i32,
                root,
                comm.0,
            )
        };
        check(ret)
    }

    fn allgather(
        &mut self,
        send: &[u8],
        recv: &mut [u8],
        kind: ElementKind,
        comm: MpiComm,
    ) -> Result<()> {
        let ret = unsafe {
            ffi::tclmpi_shim_allgather(
                send.as_ptr().cast::<c_void>(),
                recv.as_mut_ptr().cast::<c_void>(),
                count_of(send, kind),
                kind as i32,
                comm.0,
            )
        };
        check(ret)
    }
}
