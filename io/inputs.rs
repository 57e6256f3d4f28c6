//! Run manifests and directory discovery.
//!
//! Both routes end in the same place: a [`RunManifest`] whose subjects are
//! loaded into [`SubjectData`] records for the registration engine.

use super::landmark::{landmarks_from_point_data, read_landmarks};
use super::property::{load_properties, properties_from_point_data};
use super::vtk::{VtkPolyData, read_vtk};
use super::{InputError, MeshFormat, load_mesh};
use crate::deform::SpharmCoefficients;
use crate::register::config::RegistrationSettings;
use crate::register::subject::SubjectData;
use crate::sphere::TriangleMesh;
use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Extension of coefficient files written when no output path is given.
pub const COEFFICIENT_EXTENSION: &str = "coeff";

const MESH_EXTENSIONS: &[&str] = &["vtk", "obj"];

/// Files of one subject.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubjectEntry {
    /// Defaults to the file stem of the first property file, else of the
    /// surface, else of the landmark file, else of the sphere.
    pub name: Option<String>,
    pub sphere: PathBuf,
    pub surface: Option<PathBuf>,
    #[serde(default)]
    pub properties: Vec<PathBuf>,
    pub landmarks: Option<PathBuf>,
    pub coefficients: Option<PathBuf>,
    pub output: Option<PathBuf>,
}

impl SubjectEntry {
    pub fn display_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        self.properties
            .first()
            .or(self.surface.as_ref())
            .or(self.landmarks.as_ref())
            .unwrap_or(&self.sphere)
            .file_stem()
            .map_or_else(|| "subject".to_string(), |s| s.to_string_lossy().into_owned())
    }

    /// Where the final coefficients go: the explicit output path, else the
    /// sphere path with the coefficient extension.
    pub fn output_path(&self) -> PathBuf {
        self.output
            .clone()
            .unwrap_or_else(|| self.sphere.with_extension(COEFFICIENT_EXTENSION))
    }
}

/// Everything a registration run reads, as stored in a TOML manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunManifest {
    /// One weight per property; all ones when empty.
    #[serde(default)]
    pub weights: Vec<f64>,
    /// Lines skipped at the top of every property file.
    #[serde(default)]
    pub header_lines: usize,
    /// Point-data arrays of the surface (or sphere) VTK file used as
    /// properties instead of property files.
    #[serde(default)]
    pub property_arrays: Vec<String>,
    /// Reads landmarks from the `Landmarks` point-data array instead of
    /// landmark files.
    #[serde(default)]
    pub landmarks_on_surface: bool,
    #[serde(default)]
    pub settings: RegistrationSettings,
    pub subjects: Vec<SubjectEntry>,
}

/// Directories scanned by [`RunManifest::from_directories`].
#[derive(Debug, Clone, Default)]
pub struct DirectoryLayout {
    /// Spheres, one per subject, or a single sphere shared by all subjects.
    pub spheres: PathBuf,
    /// One directory per property, each with one file per subject.
    pub properties: Vec<PathBuf>,
    pub surfaces: Option<PathBuf>,
    pub landmarks: Option<PathBuf>,
    pub coefficients: Option<PathBuf>,
    /// Output coefficients are written here as `<subject>.coeff`.
    pub output: Option<PathBuf>,
}

impl RunManifest {
    /// Reads a manifest; relative paths are taken relative to its directory.
    pub fn load(path: &Path) -> Result<Self, InputError> {
        let content = fs::read_to_string(path).map_err(|e| InputError::io(path, e))?;
        let mut manifest: Self = toml::from_str(&content).map_err(|source| InputError::Manifest {
            path: path.to_path_buf(),
            source,
        })?;
        if let Some(base) = path.parent() {
            manifest.rebase(base);
        }
        Ok(manifest)
    }

    fn rebase(&mut self, base: &Path) {
        let join = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        for entry in &mut self.subjects {
            join(&mut entry.sphere);
            entry.properties.iter_mut().for_each(join);
            for p in [
                &mut entry.surface,
                &mut entry.landmarks,
                &mut entry.coefficients,
                &mut entry.output,
            ]
            .into_iter()
            .flatten()
            {
                join(p);
            }
        }
    }

    /// Builds a manifest by pairing files across directories in natural order.
    pub fn from_directories(layout: &DirectoryLayout) -> Result<Self, InputError> {
        let spheres = discover(&layout.spheres, MESH_EXTENSIONS, "sphere")?;
        let property_lists = layout
            .properties
            .iter()
            .map(|dir| discover(dir, &[], "property"))
            .collect::<Result<Vec<_>, _>>()?;

        let surface_files = layout
            .surfaces
            .as_ref()
            .map(|d| discover(d, MESH_EXTENSIONS, "surface"))
            .transpose()?;

        let landmark_files = layout
            .landmarks
            .as_ref()
            .map(|d| discover(d, &[], "landmark"))
            .transpose()?;

        // A single sphere is shared; the subject count then comes from the
        // property, surface or landmark files.
        let count = match (
            spheres.len(),
            property_lists.first(),
            &surface_files,
            &landmark_files,
        ) {
            (1, Some(first), _, _) => first.len(),
            (1, None, Some(surfaces), _) => surfaces.len(),
            (1, None, None, Some(landmarks)) => landmarks.len(),
            (n, ..) => n,
        };
        for list in &property_lists {
            expect_count("property", count, list.len())?;
        }
        if spheres.len() != 1 {
            expect_count("sphere", count, spheres.len())?;
        }
        if let Some(files) = &surface_files {
            expect_count("surface", count, files.len())?;
        }
        if let Some(files) = &landmark_files {
            expect_count("landmark", count, files.len())?;
        }
        let optional = |dir: &Option<PathBuf>, what: &'static str| {
            dir.as_ref()
                .map(|d| {
                    let files = discover(d, &[], what)?;
                    expect_count(what, count, files.len())?;
                    Ok::<_, InputError>(files)
                })
                .transpose()
        };
        let coefficients = optional(&layout.coefficients, "coefficient")?;

        let subjects = (0..count)
            .map(|i| {
                let mut entry = SubjectEntry {
                    name: None,
                    sphere: spheres[if spheres.len() == 1 { 0 } else { i }].clone(),
                    surface: surface_files.as_ref().map(|s| s[i].clone()),
                    properties: property_lists.iter().map(|list| list[i].clone()).collect(),
                    landmarks: landmark_files.as_ref().map(|s| s[i].clone()),
                    coefficients: coefficients.as_ref().map(|s| s[i].clone()),
                    output: None,
                };
                let name = entry.display_name();
                entry.output = layout
                    .output
                    .as_ref()
                    .map(|dir| dir.join(format!("{name}.{COEFFICIENT_EXTENSION}")));
                entry.name = Some(name);
                entry
            })
            .collect();

        Ok(Self {
            subjects,
            ..Self::default()
        })
    }

    pub fn property_count(&self) -> usize {
        if self.property_arrays.is_empty() {
            self.subjects.first().map_or(0, |s| s.properties.len())
        } else {
            self.property_arrays.len()
        }
    }

    /// The configured weights, or a weight of one for every property.
    pub fn property_weights(&self) -> Vec<f64> {
        if self.weights.is_empty() {
            vec![1.0; self.property_count()]
        } else {
            self.weights.clone()
        }
    }

    pub fn output_paths(&self) -> Vec<PathBuf> {
        self.subjects.iter().map(SubjectEntry::output_path).collect()
    }

    /// Loads every subject. Meshes referenced by several subjects are read once.
    pub fn load_subjects(&self) -> Result<Vec<SubjectData>, InputError> {
        let mut meshes: AHashMap<PathBuf, TriangleMesh> = AHashMap::new();
        let mut subjects = Vec::with_capacity(self.subjects.len());
        for entry in &self.subjects {
            let data = self.load_subject(entry, &mut meshes)?;
            log::info!(
                "Loaded subject '{}': {} vertices, {} properties, {} landmarks",
                data.name,
                data.sphere.vertex_count(),
                data.properties.ncols(),
                data.landmarks.len()
            );
            subjects.push(data);
        }
        Ok(subjects)
    }

    fn load_subject(
        &self,
        entry: &SubjectEntry,
        meshes: &mut AHashMap<PathBuf, TriangleMesh>,
    ) -> Result<SubjectData, InputError> {
        let sphere = match meshes.get(&entry.sphere) {
            Some(mesh) => mesh.clone(),
            None => {
                let mesh = load_mesh(&entry.sphere)?;
                meshes.insert(entry.sphere.clone(), mesh.clone());
                mesh
            }
        };

        // Point data comes from the surface when there is one, else from the sphere.
        let needs_point_data = !self.property_arrays.is_empty() || self.landmarks_on_surface;
        let point_source = entry.surface.as_ref().unwrap_or(&entry.sphere);
        let point_data: Option<VtkPolyData> = if needs_point_data {
            if MeshFormat::from_path(point_source) != Some(MeshFormat::Vtk) {
                return Err(InputError::UnknownFormat(point_source.clone()));
            }
            Some(read_vtk(point_source)?)
        } else {
            None
        };

        let surface = match (&entry.surface, &point_data) {
            (Some(_), Some(data)) => Some(data.mesh.clone()),
            (Some(path), None) => Some(load_mesh(path)?),
            (None, _) => None,
        };

        let properties = match &point_data {
            Some(data) if !self.property_arrays.is_empty() => {
                properties_from_point_data(point_source, data, &self.property_arrays)?
            }
            _ => load_properties(&entry.properties, self.header_lines, sphere.vertex_count())?,
        };

        let landmarks = match (&point_data, &entry.landmarks) {
            (Some(data), _) if self.landmarks_on_surface => {
                landmarks_from_point_data(point_source, data)?
            }
            (_, Some(path)) => read_landmarks(path)?,
            _ => Vec::new(),
        };

        let initial_coefficients = entry
            .coefficients
            .as_ref()
            .map(|path| {
                SpharmCoefficients::load(path).map_err(|source| InputError::Coefficients {
                    path: path.clone(),
                    source,
                })
            })
            .transpose()?;

        Ok(SubjectData {
            name: entry.display_name(),
            sphere,
            surface,
            properties,
            landmarks,
            initial_coefficients,
        })
    }
}

/// Files of a directory in natural order, optionally filtered by extension.
/// Hidden files are skipped.
pub fn discover(
    dir: &Path,
    extensions: &[&str],
    what: &'static str,
) -> Result<Vec<PathBuf>, InputError> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| InputError::io(dir, e))? {
        let path = entry.map_err(|e| InputError::io(dir, e))?.path();
        let hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_none_or(|n| n.starts_with('.'));
        if hidden || !path.is_file() {
            continue;
        }
        let matches = extensions.is_empty()
            || path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| extensions.iter().any(|x| x.eq_ignore_ascii_case(e)));
        if matches {
            files.push(path);
        }
    }
    if files.is_empty() {
        return Err(InputError::EmptyDirectory(dir.to_path_buf(), what));
    }
    files.sort_by(|a, b| natord::compare(&a.to_string_lossy(), &b.to_string_lossy()));
    Ok(files)
}

fn expect_count(what: &'static str, expected: usize, found: usize) -> Result<(), InputError> {
    if expected == found {
        Ok(())
    } else {
        Err(InputError::CountMismatch {
            what,
            expected,
            found,
        })
    }
}
