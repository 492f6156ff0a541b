//! Raw FFI bindings to the C shim in `csrc/tclmpi_shim.c`.
//!
//! These are low-level unsafe functions. Use [`MpiSubstrate`](crate::MpiSubstrate).
//! Groups are small integer slots and requests are 64-bit slots, both
//! allocated by the shim; every function returns an MPI error code.

#![allow(non_camel_case_types)]

use std::os::raw::{c_char, c_int, c_void};

// Type aliases matching the C header
pub type int32_t = i32;
pub type int64_t = i64;

extern "C" {
    // ============================================================
    // Initialization and Finalization
    // ============================================================

    pub fn tclmpi_shim_init() -> c_int;
    pub fn tclmpi_shim_finalize() -> c_int;
    pub fn tclmpi_shim_abort(comm: int32_t, errorcode: int32_t) -> c_int;

    // ============================================================
    // Communicator Operations
    // ============================================================

    pub fn tclmpi_shim_comm_world() -> int32_t;
    pub fn tclmpi_shim_comm_self() -> int32_t;
    pub fn tclmpi_shim_comm_null() -> int32_t;
    pub fn tclmpi_shim_comm_rank(comm: int32_t, rank: *mut int32_t) -> c_int;
    pub fn tclmpi_shim_comm_size(comm: int32_t, size: *mut int32_t) -> c_int;
    pub fn tclmpi_shim_comm_free(comm: int32_t) -> c_int;
    /// `undefined != 0` excludes the caller; `newcomm` is then the null slot.
    pub fn tclmpi_shim_comm_split(
        comm: int32_t,
        color: int32_t,
        undefined: int32_t,
        key: int32_t,
        newcomm: *mut int32_t,
    ) -> c_int;

    pub fn tclmpi_shim_barrier(comm: int32_t) -> c_int;

    // ============================================================
    // Point-to-Point Communication
    // ============================================================

    pub fn tclmpi_shim_send(
        buf: *const c_void,
        count: int64_t,
        datatype_tag: int32_t,
        dest: int32_t,
        tag: int32_t,
        comm: int32_t,
    ) -> c_int;

    pub fn tclmpi_shim_recv(
        buf: *mut c_void,
        count: int64_t,
        datatype_tag: int32_t,
        source: int32_t,
        tag: int32_t,
        comm: int32_t,
        actual_source: *mut int32_t,
        actual_tag: *mut int32_t,
        actual_bytes: *mut int64_t,
    ) -> c_int;

    pub fn tclmpi_shim_probe(
        source: int32_t,
        tag: int32_t,
        comm: int32_t,
        actual_source: *mut int32_t,
        actual_tag: *mut int32_t,
        actual_bytes: *mut int64_t,
    ) -> c_int;

    pub fn tclmpi_shim_iprobe(
        source: int32_t,
        tag: int32_t,
        comm: int32_t,
        flag: *mut int32_t,
        actual_source: *mut int32_t,
        actual_tag: *mut int32_t,
        actual_bytes: *mut int64_t,
    ) -> c_int;

    pub fn tclmpi_shim_isend(
        buf: *const c_void,
        count: int64_t,
        datatype_tag: int32_t,
        dest: int32_t,
        tag: int32_t,
        comm: int32_t,
        request: *mut int64_t,
    ) -> c_int;

    pub fn tclmpi_shim_irecv(
        buf: *mut c_void,
        count: int64_t,
        datatype_tag: int32_t,
        source: int32_t,
        tag: int32_t,
        comm: int32_t,
        request: *mut int64_t,
    ) -> c_int;

    pub fn tclmpi_shim_wait(
        request: int64_t,
        actual_source: *mut int32_t,
        actual_tag: *mut int32_t,
        actual_bytes: *mut int64_t,
    ) -> c_int;

    // ============================================================
    // Collective Operations
    // ============================================================

    pub fn tclmpi_shim_bcast(
        buf: *mut c_void,
        count: int64_t,
        datatype_tag: int32_t,
        root: int32_t,
        comm: int32_t,
    ) -> c_int;

    pub fn tclmpi_shim_reduce(
        sendbuf: *const c_void,
        recvbuf: *mut c_void,
        count: int64_t,
        datatype_tag: int32_t,
        op: int32_t,
        root: int32_t,
        comm: int32_t,
    ) -> c_int;

    pub fn tclmpi_shim_allreduce(
        sendbuf: *const c_void,
        recvbuf: *mut c_void,
        count: int64_t,
        datatype_tag: int32_t,
        op: int32_t,
        comm: int32_t,
    ) -> c_int;

    pub fn tclmpi_shim_scatter(
        sendbuf: *const c_void,
        recvbuf: *mut c_void,
        count: int64_t,
        datatype_tag: int32_t,
        root: int32_t,
        comm: int32_t,
    ) -> c_int;

    pub fn tclmpi_shim_gather(
        sendbuf: *const c_void,
        recvbuf: *mut c_void,
        count: int64_t,
        datatype_tag: int32_t,
        root: int32_t,
        comm: int32_t,
    ) -> c_int;

    pub fn tclmpi_shim_allgather(
        sendbuf: *const c_void,
        recvbuf: *mut c_void,
        count: int64_t,
        datatype_tag: int32_t,
        comm: int32_t,
    ) -> c_int;

    // ============================================================
    // Error Information
    // ============================================================

    pub fn tclmpi_shim_error_info(
        code: c_int,
        error_class: *mut int32_t,
        message: *mut c_char,
        msg_len: *mut int32_t,
    ) -> c_int;
}
