//! Error types for tclmpi

use thiserror::Error;

use crate::datatype::ElementKind;

/// Result type for tclmpi operations
pub type Result<T> = std::result::Result<T, Error>;

/// MPI error classes.
///
/// The discriminants must stay in sync with the `TCLMPI_ERR_*` defines in
/// `csrc/tclmpi_shim.h`; the shim maps the library's own `MPI_ERR_*`
/// constants onto them, since MPICH and Open MPI number classes differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorClass {
    /// Invalid buffer pointer
    Buffer = 1,
    /// Invalid count argument
    Count = 2,
    /// Invalid datatype argument
    Type = 3,
    /// Invalid tag argument
    Tag = 4,
    /// Invalid communicator
    Comm = 5,
    /// Invalid rank
    Rank = 6,
    /// Invalid request handle
    Request = 7,
    /// Invalid root
    Root = 8,
    /// Invalid group
    Group = 9,
    /// Invalid operation
    Op = 10,
    /// Invalid argument of some other kind
    Arg = 12,
    /// Unknown error
    Unknown = 13,
    /// Message truncated on receive
    Truncate = 14,
    /// Known error not in this list
    Other = 15,
    /// Internal MPI (implementation) error
    Intern = 16,
    /// Error code is in status
    InStatus = 17,
    /// Pending request
    Pending = 18,
}

impl ErrorClass {
    /// Map a shim class tag to an [`ErrorClass`].
    ///
    /// Unknown tags map to [`ErrorClass::Unknown`].
    pub fn from_raw(class: i32) -> Self {
        match class {
            1 => ErrorClass::Buffer,
            2 => ErrorClass::Count,
            3 => ErrorClass::Type,
            4 => ErrorClass::Tag,
            5 => ErrorClass::Comm,
            6 => ErrorClass::Rank,
            7 => ErrorClass::Request,
            8 => ErrorClass::Root,
            9 => ErrorClass::Group,
            10 => ErrorClass::Op,
            12 => ErrorClass::Arg,
            14 => ErrorClass::Truncate,
            15 => ErrorClass::Other,
            16 => ErrorClass::Intern,
            17 => ErrorClass::InStatus,
            18 => ErrorClass::Pending,
            _ => ErrorClass::Unknown,
        }
    }

    /// Readable description in the style of `MPI_Error_string`.
    pub fn description(self) -> &'static str {
        match self {
            ErrorClass::Buffer => "MPI_ERR_BUFFER: invalid buffer pointer",
            ErrorClass::Count => "MPI_ERR_COUNT: invalid count argument",
            ErrorClass::Type => "MPI_ERR_TYPE: invalid datatype",
            ErrorClass::Tag => "MPI_ERR_TAG: invalid tag",
            ErrorClass::Comm => "MPI_ERR_COMM: invalid communicator",
            ErrorClass::Rank => "MPI_ERR_RANK: invalid rank",
            ErrorClass::Request => "MPI_ERR_REQUEST: invalid request",
            ErrorClass::Root => "MPI_ERR_ROOT: invalid root",
            ErrorClass::Group => "MPI_ERR_GROUP: invalid group",
            ErrorClass::Op => "MPI_ERR_OP: invalid reduce operation",
            ErrorClass::Arg => "MPI_ERR_ARG: invalid argument of some other kind",
            ErrorClass::Unknown => "MPI_ERR_UNKNOWN: unknown error",
            ErrorClass::Truncate => "MPI_ERR_TRUNCATE: message truncated",
            ErrorClass::Other => "MPI_ERR_OTHER: known error not in list",
            ErrorClass::Intern => "MPI_ERR_INTERN: internal error",
            ErrorClass::InStatus => "MPI_ERR_IN_STATUS: error code is in status",
            ErrorClass::Pending => "MPI_ERR_PENDING: pending request",
        }
    }
}

/// Error types for tclmpi operations
#[derive(Error, Debug)]
pub enum Error {
    /// `init` was called a second time (or after `finalize`)
    #[error("calling init multiple times is erroneous")]
    AlreadyInitialized,

    /// An operation was attempted before `init`
    #[error("MPI has not been initialized")]
    NotInitialized,

    /// `finalize` was called before `init`
    #[error("calling finalize before init is erroneous")]
    FinalizeBeforeInit,

    /// `finalize` was called twice, or an operation was attempted after it
    #[error("MPI has already been finalized")]
    AlreadyFinalized,

    /// No live group is registered under this label
    #[error("unknown communicator: {0}")]
    UnknownCommunicator(String),

    /// The group exists but cannot be used for this operation
    #[error("invalid communicator: {0}")]
    InvalidCommunicator(String),

    /// Element kind name not recognized
    #[error("invalid data type: {0}")]
    UnknownDatatype(String),

    /// Element kind not usable with this operation
    #[error("{command}: does not support data type {kind}")]
    UnsupportedDatatype {
        /// Operation that rejected the kind
        command: &'static str,
        /// The rejected kind
        kind: ElementKind,
    },

    /// Reduction operator name not recognized
    #[error("unknown reduction operator: {0}")]
    UnknownOperator(String),

    /// Conversion policy name not recognized
    #[error("unknown conversion policy: {0}")]
    UnknownPolicy(String),

    /// Split color is negative and not the undefined sentinel
    #[error("invalid color argument: {0}")]
    InvalidColor(i32),

    /// Rank or tag argument could not be parsed
    #[error("expected integer but got \"{0}\"")]
    InvalidInteger(String),

    /// One element of a numeric sequence could not be converted
    #[error("expected {expected} but got \"{value}\" at position {index}")]
    Conversion {
        /// Position of the failing element
        index: usize,
        /// Text of the failing element
        value: String,
        /// Kind that was requested
        expected: ElementKind,
    },

    /// A pair-kind element did not have exactly two members
    #[error("element {index} must be a pair but has {len} entries")]
    PairArity {
        /// Position of the malformed element
        index: usize,
        /// Number of entries it had
        len: usize,
    },

    /// Scatter count not divisible by the group size
    #[error("number of data items ({total}) must be divisible by the number of processes ({size})")]
    ScatterCount {
        /// Total element count at the root
        total: usize,
        /// Group size
        size: usize,
    },

    /// Gather/allgather participants contributed different counts
    #[error("number of data items must be the same on all processes (min {min}, max {max})")]
    GatherCount {
        /// Smallest contribution
        min: i32,
        /// Largest contribution
        max: i32,
    },

    /// Message byte length is not a whole number of elements
    #[error("message of {bytes} bytes is not a whole number of {kind} elements")]
    PartialElement {
        /// Byte length of the message
        bytes: usize,
        /// Kind it was received as
        kind: ElementKind,
    },

    /// The substrate reported a failure
    #[error("{message}")]
    Substrate {
        /// MPI error class
        class: ErrorClass,
        /// Message from the substrate
        message: String,
    },

    /// The distributed computation was aborted
    #[error("job aborted with error code {0}")]
    Aborted(i32),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a substrate error carrying the standard description of `class`.
    pub fn from_class(class: ErrorClass) -> Self {
        Error::Substrate {
            class,
            message: class.description().to_string(),
        }
    }

    /// Create a substrate error with a custom detail appended to the
    /// class description.
    pub fn substrate(class: ErrorClass, detail: impl std::fmt::Display) -> Self {
        Error::Substrate {
            class,
            message: format!("{}: {detail}", class.description()),
        }
    }

    /// Error class for substrate failures, `None` for local errors.
    pub fn class(&self) -> Option<ErrorClass> {
        match self {
            Error::Substrate { class, .. } => Some(*class),
            _ => None,
        }
    }

    /// True for errors detected before any substrate call was made.
    pub fn is_usage(&self) -> bool {
        !matches!(
            self,
            Error::Substrate { .. } | Error::Aborted(_) | Error::Internal(_)
        )
    }
}
