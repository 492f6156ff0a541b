//! Build script for tclmpi
//!
//! The local backend needs no native code, so nothing happens unless the
//! `mpi` feature is enabled. With it, the MPI installation is located, the
//! shim in `csrc/` is compiled against its headers and libmpi is linked.
//!
//! Lookup order:
//! 1. `TCLMPI_PKG_CONFIG`, a pkg-config package name
//! 2. the pkg-config packages shipped by MPICH and Open MPI
//! 3. the compiler wrapper (`MPICC`, default `mpicc`), asked for its flags

use std::env;
use std::path::PathBuf;
use std::process::Command;

const SHIM_SOURCES: [&str; 2] = ["csrc/tclmpi_shim.c", "csrc/tclmpi_shim.h"];
const PKG_CANDIDATES: [&str; 3] = ["mpich", "ompi", "mpi"];

/// Flags needed to compile and link against MPI.
struct MpiFlags {
    origin: String,
    include_paths: Vec<PathBuf>,
    link_paths: Vec<PathBuf>,
    libs: Vec<String>,
}

fn main() {
    for source in SHIM_SOURCES {
        println!("cargo:rerun-if-changed={source}");
    }
    println!("cargo:rerun-if-env-changed=TCLMPI_PKG_CONFIG");
    println!("cargo:rerun-if-env-changed=MPICC");

    if env::var_os("CARGO_FEATURE_MPI").is_none() {
        return;
    }

    let flags = match locate_mpi() {
        Ok(flags) => flags,
        Err(tried) => panic!(
            "the `mpi` feature needs an MPI installation; tried {}. \
             Set TCLMPI_PKG_CONFIG to a pkg-config package or MPICC to a compiler wrapper.",
            tried.join(", ")
        ),
    };
    println!("cargo:warning=tclmpi: using MPI from {}", flags.origin);

    let mut build = cc::Build::new();
    build.file(SHIM_SOURCES[0]).include("csrc").warnings(true);
    build.includes(&flags.include_paths);
    build.compile("tclmpi_shim");

    for path in &flags.link_paths {
        println!("cargo:rustc-link-search=native={}", path.display());
        println!("cargo:rustc-link-arg=-Wl,-rpath,{}", path.display());
    }
    for lib in &flags.libs {
        println!("cargo:rustc-link-lib={lib}");
    }
}

/// Try every lookup in order; on failure return what was tried.
fn locate_mpi() -> Result<MpiFlags, Vec<String>> {
    let mut tried = Vec::new();

    let explicit = env::var("TCLMPI_PKG_CONFIG").ok();
    let packages = explicit
        .iter()
        .map(String::as_str)
        .chain(PKG_CANDIDATES.iter().copied());
    for package in packages {
        match from_pkg_config(package) {
            Some(flags) => return Ok(flags),
            None => tried.push(format!("pkg-config {package}")),
        }
    }

    let wrapper = env::var("MPICC").unwrap_or_else(|_| "mpicc".to_string());
    // MPICH spells it -show, Open MPI --showme
    for query in ["-show", "--showme"] {
        match from_wrapper(&wrapper, query) {
            Some(flags) => return Ok(flags),
            None => tried.push(format!("{wrapper} {query}")),
        }
    }
    Err(tried)
}

fn from_pkg_config(package: &str) -> Option<MpiFlags> {
    let lib = pkg_config::Config::new()
        .cargo_metadata(false)
        .probe(package)
        .ok()?;
    Some(MpiFlags {
        origin: format!("pkg-config {package} {}", lib.version),
        include_paths: lib.include_paths,
        link_paths: lib.link_paths,
        libs: lib.libs,
    })
}

fn from_wrapper(wrapper: &str, query: &str) -> Option<MpiFlags> {
    let output = Command::new(wrapper).arg(query).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let mut flags = MpiFlags {
        origin: format!("{wrapper} {query}"),
        include_paths: Vec::new(),
        link_paths: Vec::new(),
        libs: Vec::new(),
    };
    // first word is the underlying compiler
    for word in String::from_utf8_lossy(&output.stdout).split_whitespace().skip(1) {
        if let Some(path) = word.strip_prefix("-I") {
            flags.include_paths.push(PathBuf::from(path));
        } else if let Some(path) = word.strip_prefix("-L") {
            flags.link_paths.push(PathBuf::from(path));
        } else if let Some(lib) = word.strip_prefix("-l") {
            flags.libs.push(lib.to_string());
        }
    }
    if flags.libs.is_empty() {
        flags.libs.push("mpi".to_string());
    }
    Some(flags)
}
