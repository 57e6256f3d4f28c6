//! Readers and writers for everything a registration run consumes or
//! produces: meshes (legacy VTK, Wavefront OBJ), per-vertex properties,
//! landmarks and run manifests.

pub mod inputs;
pub mod landmark;
pub mod obj;
pub mod property;
pub mod vtk;

use crate::deform::CoefficientError;
use crate::sphere::{MeshError, TriangleMesh};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub use inputs::{RunManifest, SubjectEntry};

#[derive(Error, Debug)]
pub enum InputError {
    #[error("Failed to read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Unsupported mesh format for '{0}' (expected .vtk or .obj)")]
    UnknownFormat(PathBuf),
    #[error("{path}:{line}: {message}")]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },
    #[error("Invalid mesh in '{path}': {source}")]
    Mesh {
        path: PathBuf,
        #[source]
        source: MeshError,
    },
    #[error("'{path}' has no point data array named '{name}'")]
    MissingArray { path: PathBuf, name: String },
    #[error("'{path}' holds {found} values, but the mesh has {expected} vertices")]
    ValueCount {
        path: PathBuf,
        expected: usize,
        found: usize,
    },
    #[error("Failed to parse landmark file '{path}': {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("Failed to parse manifest '{path}': {source}")]
    Manifest {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Failed to load coefficients '{path}': {source}")]
    Coefficients {
        path: PathBuf,
        #[source]
        source: CoefficientError,
    },
    #[error("No {1} files found in '{0}'")]
    EmptyDirectory(PathBuf, &'static str),
    #[error("Found {found} {what} files, expected one per subject ({expected})")]
    CountMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },
}

impl InputError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        InputError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn parse(path: &Path, line: usize, message: impl Into<String>) -> Self {
        InputError::Parse {
            path: path.to_path_buf(),
            line,
            message: message.into(),
        }
    }
}

/// Mesh file formats recognized by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshFormat {
    Vtk,
    Obj,
}

impl MeshFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "vtk" => Some(Self::Vtk),
            "obj" => Some(Self::Obj),
            _ => None,
        }
    }
}

/// Loads a triangle mesh, choosing the reader by file extension.
pub fn load_mesh(path: &Path) -> Result<TriangleMesh, InputError> {
    match MeshFormat::from_path(path) {
        Some(MeshFormat::Vtk) => Ok(vtk::read_vtk(path)?.mesh),
        Some(MeshFormat::Obj) => obj::read_obj(path),
        None => Err(InputError::UnknownFormat(path.to_path_buf())),
    }
}

/// Writes a triangle mesh, choosing the writer by file extension.
pub fn save_mesh(mesh: &TriangleMesh, path: &Path) -> Result<(), InputError> {
    match MeshFormat::from_path(path) {
        Some(MeshFormat::Vtk) => vtk::write_vtk(path, mesh, &[]),
        Some(MeshFormat::Obj) => obj::write_obj(path, mesh),
        None => Err(InputError::UnknownFormat(path.to_path_buf())),
    }
}

// Splits a data line into tokens the way every text reader here does:
// whitespace or commas separate values.
pub(crate) fn tokens(line: &str) -> impl Iterator<Item = &str> {
    line.split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty())
}
