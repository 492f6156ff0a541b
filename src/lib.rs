//! # tclmpi
//!
//! MPI message passing for dynamically typed scripting hosts.
//!
//! Script values have no fixed size, while MPI receivers must know how much
//! data is coming. This crate bridges the two:
//! - Groups and requests are plain string labels (`tclmpi::comm_world`,
//!   `tclmpi::req3`) that the host can store in ordinary values
//! - Values are marshaled to one of five element kinds on the way out and
//!   back to dynamic values on the way in
//! - Broadcasts announce their size first, receives probe before they
//!   allocate, and non-blocking receives defer posting until the size is known
//! - Scatter and gather check group-wide count agreement before moving data
//!
//! ## Quick Start
//!
//! ```
//! use tclmpi::{Context, ElementKind, LocalUniverse, ReduceOp, Value};
//!
//! fn main() -> Result<(), tclmpi::Error> {
//!     let universe = LocalUniverse::new(4);
//!     let results = universe.run(|endpoint| -> Result<Value, tclmpi::Error> {
//!         let mut ctx = Context::new(endpoint);
//!         ctx.init()?;
//!         let world = ctx.world_label().to_string();
//!         let rank = ctx.comm_rank(&world)?;
//!
//!         // The root's list reaches everybody, whatever its length
//!         let data = if rank == 0 { Value::from("1 2 3") } else { Value::empty() };
//!         let data = ctx.bcast(&data, ElementKind::Int, 0, &world)?;
//!
//!         let sum = ctx.allreduce(&data, ElementKind::Int, ReduceOp::Sum, &world)?;
//!         ctx.finalize()?;
//!         Ok(sum)
//!     });
//!     for sum in results {
//!         assert_eq!(sum?, Value::list([4, 8, 12]));
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Description | Dependencies |
//! |---------|-------------|--------------|
//! | `mpi`   | Real MPI backend ([`MpiSubstrate`]) through the C shim in `csrc/` | an MPI installation |
//!
//! Without features the crate runs on [`LocalUniverse`], an in-process
//! backend where every rank is a thread.
//!
//! ## Logging
//!
//! Diagnostics go through [`tracing`]; install any subscriber to see them.

#![warn(missing_docs)]
#![warn(clippy::all)]
// Allow certain pedantic lints for existing code
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::similar_names)]

mod collective;
mod comm;
mod config;
mod context;
mod datatype;
mod error;
mod local;
mod marshal;
mod registry;
mod request;
mod status;
mod substrate;
mod transfer;
mod value;

#[cfg(feature = "mpi")]
mod ffi;
#[cfg(feature = "mpi")]
mod mpi;

pub use comm::parse_color;
pub use config::{Config, CONVERSION_VAR, NAMESPACE_VAR};
pub use context::{Context, CONVERSION_ABORT_CODE};
pub use datatype::ElementKind;
pub use error::{Error, ErrorClass, Result};
pub use local::{LocalComm, LocalRequest, LocalSubstrate, LocalUniverse};
pub use marshal::{decode, encode, Buffer, ConversionPolicy};
pub use registry::{CommRegistry, RequestPhase};
pub use request::Completion;
pub use status::Status;
pub use substrate::{Substrate, ANY_SOURCE, ANY_TAG};
pub use transfer::{parse_source, parse_tag};
pub use value::Value;

#[cfg(feature = "mpi")]
pub use mpi::{MpiComm, MpiRequest, MpiSubstrate};

use std::fmt;
use std::str::FromStr;

use datatype::strip_prefix;

/// Reduction operations
///
/// The discriminants must stay in sync with the `TCLMPI_OP_*` defines in
/// `csrc/tclmpi_shim.h`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ReduceOp {
    /// Maximum value
    Max = 0,
    /// Minimum value
    Min = 1,
    /// Sum of values
    Sum = 2,
    /// Product of values
    Prod = 3,
    /// Logical and
    LogicalAnd = 4,
    /// Bitwise and
    BitAnd = 5,
    /// Logical or
    LogicalOr = 6,
    /// Bitwise or
    BitOr = 7,
    /// Logical exclusive or
    LogicalXor = 8,
    /// Bitwise exclusive or
    BitXor = 9,
    /// Maximum value and its location
    MaxLoc = 10,
    /// Minimum value and its location
    MinLoc = 11,
}

impl ReduceOp {
    /// All operators, in tag order.
    pub const ALL: [ReduceOp; 12] = [
        ReduceOp::Max,
        ReduceOp::Min,
        ReduceOp::Sum,
        ReduceOp::Prod,
        ReduceOp::LogicalAnd,
        ReduceOp::BitAnd,
        ReduceOp::LogicalOr,
        ReduceOp::BitOr,
        ReduceOp::LogicalXor,
        ReduceOp::BitXor,
        ReduceOp::MaxLoc,
        ReduceOp::MinLoc,
    ];

    /// Script-level name, e.g. `tclmpi::sum`.
    pub const fn name(self) -> &'static str {
        match self {
            ReduceOp::Max => "tclmpi::max",
            ReduceOp::Min => "tclmpi::min",
            ReduceOp::Sum => "tclmpi::sum",
            ReduceOp::Prod => "tclmpi::prod",
            ReduceOp::LogicalAnd => "tclmpi::land",
            ReduceOp::BitAnd => "tclmpi::band",
            ReduceOp::LogicalOr => "tclmpi::lor",
            ReduceOp::BitOr => "tclmpi::bor",
            ReduceOp::LogicalXor => "tclmpi::lxor",
            ReduceOp::BitXor => "tclmpi::bxor",
            ReduceOp::MaxLoc => "tclmpi::maxloc",
            ReduceOp::MinLoc => "tclmpi::minloc",
        }
    }

    /// Look an operator up by name; the `tclmpi::` prefix is optional.
    pub fn from_name(name: &str) -> Result<Self> {
        let bare = strip_prefix(name);
        Self::ALL
            .into_iter()
            .find(|op| strip_prefix(op.name()) == bare)
            .ok_or_else(|| Error::UnknownOperator(name.to_string()))
    }

    /// True if the operator is defined for `kind`.
    pub const fn supports(self, kind: ElementKind) -> bool {
        match kind {
            ElementKind::Bytes => false,
            ElementKind::Int => !matches!(self, ReduceOp::MaxLoc | ReduceOp::MinLoc),
            ElementKind::Float => {
                matches!(self, ReduceOp::Max | ReduceOp::Min | ReduceOp::Sum | ReduceOp::Prod)
            }
            ElementKind::IntPair | ElementKind::FloatInt => {
                matches!(self, ReduceOp::MaxLoc | ReduceOp::MinLoc)
            }
        }
    }
}

impl fmt::Display for ReduceOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ReduceOp {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_name(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operator_names_parse_back() {
        for op in ReduceOp::ALL {
            assert_eq!(ReduceOp::from_name(op.name()).unwrap(), op);
        }
        assert_eq!("maxloc".parse::<ReduceOp>().unwrap(), ReduceOp::MaxLoc);
        assert!(matches!(
            ReduceOp::from_name("tclmpi::avg"),
            Err(Error::UnknownOperator(_))
        ));
    }

    #[test]
    fn tag_values_are_dense() {
        for (i, op) in ReduceOp::ALL.into_iter().enumerate() {
            assert_eq!(op as i32, i as i32);
        }
    }

    #[test]
    fn operator_kind_table() {
        assert!(ReduceOp::BitXor.supports(ElementKind::Int));
        assert!(!ReduceOp::BitXor.supports(ElementKind::Float));
        assert!(ReduceOp::Prod.supports(ElementKind::Float));
        assert!(ReduceOp::MinLoc.supports(ElementKind::FloatInt));
        assert!(!ReduceOp::MinLoc.supports(ElementKind::Int));
        assert!(!ReduceOp::Max.supports(ElementKind::IntPair));
        assert!(ReduceOp::ALL.iter().all(|op| !op.supports(ElementKind::Bytes)));
    }
}
