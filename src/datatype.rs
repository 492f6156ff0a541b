//! Element kinds and their binary layout.
//!
//! This module provides [`ElementKind`], the closed set of element types a
//! dynamic value can be transported as. Each kind has a fixed width in the
//! binary buffer and a tag value understood by the C shim.
//!
//! # Supported Kinds
//!
//! | Kind       | Script name       | Width | MPI Equivalent    | Tag |
//! |------------|-------------------|-------|-------------------|-----|
//! | `Bytes`    | `tclmpi::auto`    | 1     | `MPI_CHAR`        | 0   |
//! | `Int`      | `tclmpi::int`     | 4     | `MPI_INT`         | 1   |
//! | `Float`    | `tclmpi::double`  | 8     | `MPI_DOUBLE`      | 2   |
//! | `IntPair`  | `tclmpi::intint`  | 8     | `MPI_2INT`        | 3   |
//! | `FloatInt` | `tclmpi::dblint`  | 16    | `MPI_DOUBLE_INT`  | 4   |
//!
//! Message sizes reported by probes count bytes on the wire, where padding
//! is not transmitted: a `FloatInt` element occupies 16 bytes in a buffer
//! but only 12 in a message.

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Prefix shared by all script-level names of kinds, operators and policies.
pub(crate) const NAME_PREFIX: &str = "tclmpi::";

/// Strip the optional `tclmpi::` (or `::tclmpi::`) prefix from a token.
pub(crate) fn strip_prefix(name: &str) -> &str {
    let name = name.strip_prefix("::").unwrap_or(name);
    name.strip_prefix(NAME_PREFIX).unwrap_or(name)
}

/// Element kind of a transported value.
///
/// The discriminants must stay in sync with the `TCLMPI_*` type defines in
/// `csrc/tclmpi_shim.h`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ElementKind {
    /// Opaque byte sequence (the value's textual form)
    Bytes = 0,
    /// 32-bit signed integer
    Int = 1,
    /// 64-bit floating point
    Float = 2,
    /// Pair of 32-bit integers (value, index)
    IntPair = 3,
    /// 64-bit float with a 32-bit integer index, padded to 16 bytes
    FloatInt = 4,
}

impl ElementKind {
    /// All kinds, in tag order.
    pub const ALL: [ElementKind; 5] = [
        ElementKind::Bytes,
        ElementKind::Int,
        ElementKind::Float,
        ElementKind::IntPair,
        ElementKind::FloatInt,
    ];

    /// Width of one element in the binary buffer, in bytes.
    pub const fn width(self) -> usize {
        match self {
            ElementKind::Bytes => 1,
            ElementKind::Int => 4,
            ElementKind::Float => 8,
            ElementKind::IntPair => 8,
            ElementKind::FloatInt => 16,
        }
    }

    /// Size of one element inside a message, without padding.
    pub const fn wire_width(self) -> usize {
        match self {
            ElementKind::FloatInt => 12,
            other => other.width(),
        }
    }

    /// Script-level name, e.g. `tclmpi::int`.
    pub const fn name(self) -> &'static str {
        match self {
            ElementKind::Bytes => "tclmpi::auto",
            ElementKind::Int => "tclmpi::int",
            ElementKind::Float => "tclmpi::double",
            ElementKind::IntPair => "tclmpi::intint",
            ElementKind::FloatInt => "tclmpi::dblint",
        }
    }

    /// True for the two pair kinds.
    pub const fn is_pair(self) -> bool {
        matches!(self, ElementKind::IntPair | ElementKind::FloatInt)
    }

    /// Number of whole elements in `bytes` bytes, `None` if there is a remainder.
    pub fn elements_in(self, bytes: usize) -> Option<usize> {
        let width = self.width();
        if bytes % width == 0 {
            Some(bytes / width)
        } else {
            None
        }
    }

    /// Number of whole elements in a message of `bytes` wire bytes, `None`
    /// if there is a remainder.
    pub fn elements_on_wire(self, bytes: usize) -> Option<usize> {
        let width = self.wire_width();
        if bytes % width == 0 {
            Some(bytes / width)
        } else {
            None
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ElementKind {
    type Err = Error;

    /// Parse a kind name. The `tclmpi::` prefix is optional.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match strip_prefix(s) {
            "auto" => Ok(ElementKind::Bytes),
            "int" => Ok(ElementKind::Int),
            "double" => Ok(ElementKind::Float),
            "intint" => Ok(ElementKind::IntPair),
            "dblint" => Ok(ElementKind::FloatInt),
            _ => Err(Error::UnknownDatatype(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_values_match_c_defines() {
        assert_eq!(ElementKind::Bytes as i32, 0);
        assert_eq!(ElementKind::Int as i32, 1);
        assert_eq!(ElementKind::Float as i32, 2);
        assert_eq!(ElementKind::IntPair as i32, 3);
        assert_eq!(ElementKind::FloatInt as i32, 4);
    }

    #[test]
    fn names_parse_back() {
        for kind in ElementKind::ALL {
            assert_eq!(kind.name().parse::<ElementKind>().unwrap(), kind);
            assert_eq!(format!("::{}", kind.name()).parse::<ElementKind>().unwrap(), kind);
        }
        assert_eq!("int".parse::<ElementKind>().unwrap(), ElementKind::Int);
    }

    #[test]
    fn padding_is_not_on_the_wire() {
        assert_eq!(ElementKind::FloatInt.width(), 16);
        assert_eq!(ElementKind::FloatInt.wire_width(), 12);
        assert_eq!(ElementKind::FloatInt.elements_on_wire(36), Some(3));
        assert_eq!(ElementKind::FloatInt.elements_on_wire(32), None);
        assert_eq!(ElementKind::IntPair.elements_on_wire(16), Some(2));
        assert_eq!(ElementKind::Int.elements_on_wire(3), None);
    }

    #[test]
    fn unknown_name_is_rejected() {
        let err = "tclmpi::float".parse::<ElementKind>().unwrap_err();
        assert_eq!(err.to_string(), "invalid data type: tclmpi::float");
    }

    #[test]
    fn widths_and_element_counts() {
        assert_eq!(ElementKind::Int.elements_in(12), Some(3));
        assert_eq!(ElementKind::Int.elements_in(13), None);
        assert_eq!(ElementKind::FloatInt.elements_in(32), Some(2));
        assert_eq!(ElementKind::Bytes.elements_in(7), Some(7));
        assert_eq!(ElementKind::Float.elements_in(0), Some(0));
    }

    #[test]
    fn pair_kinds() {
        let pairs: Vec<_> = ElementKind::ALL.iter().filter(|k| k.is_pair()).collect();
        assert_eq!(pairs, [&ElementKind::IntPair, &ElementKind::FloatInt]);
    }
}
