#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process;

use groups::deform::{SpharmCoefficients, deform_mesh};
use groups::io::inputs::DirectoryLayout;
use groups::io::{RunManifest, load_mesh, save_mesh};
use groups::{
    GroupwiseRegistration, LandmarkCentering, OptimizerConfig, RegistrationSettings,
    RigidSettings, align_subjects,
};

#[derive(Clone, Copy, ValueEnum)]
pub enum OptimizerCli {
    Pattern,
    Bfgs,
}

/// Settings shared by `run` and `manifest`; unset flags keep the
/// configured value.
#[derive(Args)]
pub struct SettingsArgs {
    /// Final harmonic degree of the deformation fields
    #[arg(long)]
    pub degree: Option<usize>,

    /// Harmonic degree of the first coarse-to-fine stage
    #[arg(long, value_name = "DEGREE")]
    pub initial_degree: Option<usize>,

    /// Cost evaluations allowed per degree stage
    #[arg(long = "max-iter", value_name = "N")]
    pub max_iterations: Option<usize>,

    /// Icosphere subdivision level of the sampling grid
    #[arg(long, value_name = "LEVEL")]
    pub sampling_level: Option<u32>,

    /// Weight of the landmark term against the property entropy
    #[arg(long = "weight-loc", value_name = "WEIGHT")]
    pub landmark_weight: Option<f64>,

    /// Center landmarks on the coordinate-wise median instead of the mean
    #[arg(long)]
    pub median_landmarks: bool,

    #[arg(long, value_enum)]
    pub optimizer: Option<OptimizerCli>,

    /// Worker threads (defaults to every core)
    #[arg(long)]
    pub threads: Option<usize>,

    /// Hide the progress bar
    #[arg(long)]
    pub no_progress: bool,

    /// Also write every deformed sphere to this directory as VTK
    #[arg(long, value_name = "DIR")]
    pub deformed_dir: Option<PathBuf>,
}

impl SettingsArgs {
    fn apply(&self, settings: &mut RegistrationSettings) {
        if let Some(degree) = self.degree {
            settings.degree = degree;
        }
        if let Some(initial) = self.initial_degree {
            settings.initial_degree = initial;
        }
        if let Some(max) = self.max_iterations {
            settings.max_iterations = max;
        }
        if let Some(level) = self.sampling_level {
            settings.sampling_level = level;
        }
        if let Some(weight) = self.landmark_weight {
            settings.landmark_weight = weight;
        }
        if self.median_landmarks {
            settings.landmark_centering = LandmarkCentering::Median;
        }
        match self.optimizer {
            Some(OptimizerCli::Pattern) => {
                if !matches!(settings.optimizer, OptimizerConfig::PatternSearch { .. }) {
                    settings.optimizer = OptimizerConfig::default();
                }
            }
            Some(OptimizerCli::Bfgs) => {
                if !matches!(settings.optimizer, OptimizerConfig::Bfgs { .. }) {
                    settings.optimizer = OptimizerConfig::Bfgs {
                        tolerance: 1e-6,
                        gradient_step: 1e-5,
                    };
                }
            }
            None => {}
        }
        if let Some(threads) = self.threads {
            settings.threads = threads;
        }
        if self.no_progress {
            settings.progress = false;
        }
    }
}

#[derive(Args)]
pub struct RunArgs {
    /// Directory of sphere meshes, one per subject, or a single common sphere
    #[arg(long, value_name = "DIR")]
    pub sphere_dir: PathBuf,

    /// Directory of property files, one per subject; repeat for several properties
    #[arg(long = "property-dir", value_name = "DIR")]
    pub property_dirs: Vec<PathBuf>,

    /// Point-data arrays of the surface meshes used as properties; repeatable
    #[arg(long = "property-array", value_name = "NAME", conflicts_with = "property_dirs")]
    pub property_arrays: Vec<String>,

    /// Directory of original surface meshes sharing the spheres' vertex indexing
    #[arg(long, value_name = "DIR")]
    pub surface_dir: Option<PathBuf>,

    /// Directory of landmark files (.fcsv or text)
    #[arg(long, value_name = "DIR")]
    pub landmark_dir: Option<PathBuf>,

    /// Read landmarks from the `Landmarks` point-data array of the surfaces
    #[arg(long, conflicts_with = "landmark_dir")]
    pub landmarks_on_surface: bool,

    /// Directory of starting coefficient files
    #[arg(long, value_name = "DIR")]
    pub coeff_dir: Option<PathBuf>,

    /// Directory the final coefficients are written to
    #[arg(long, value_name = "DIR")]
    pub output_dir: PathBuf,

    /// Property weights, one per property (default: all ones)
    #[arg(long, value_delimiter = ',')]
    pub weights: Vec<f64>,

    /// Header lines skipped in every property file
    #[arg(long, default_value = "0")]
    pub header_lines: usize,

    #[command(flatten)]
    pub settings: SettingsArgs,
}

#[derive(Args)]
pub struct ManifestArgs {
    /// Run manifest (.toml)
    pub manifest: PathBuf,

    #[command(flatten)]
    pub settings: SettingsArgs,
}

#[derive(Args)]
pub struct ApplyArgs {
    /// Sphere mesh (.vtk or .obj)
    #[arg(long)]
    pub sphere: PathBuf,

    /// Coefficient file (.coeff text or .toml)
    #[arg(long)]
    pub coeff: PathBuf,

    /// Output mesh (.vtk or .obj)
    #[arg(long)]
    pub output: PathBuf,
}

#[derive(Args)]
pub struct RigidArgs {
    /// Directory of sphere meshes, one per subject, or a single common sphere
    #[arg(long, value_name = "DIR")]
    pub sphere_dir: PathBuf,

    /// Directory of original surface meshes the landmarks were placed on
    #[arg(long, value_name = "DIR")]
    pub surface_dir: Option<PathBuf>,

    /// Directory of landmark files (.fcsv or text)
    #[arg(long, value_name = "DIR")]
    pub landmark_dir: PathBuf,

    /// Directory the rotated spheres are written to as <subject>.vtk
    #[arg(long, value_name = "DIR")]
    pub output_dir: PathBuf,

    /// Template refinements before giving up on convergence
    #[arg(long = "max-iter", value_name = "N")]
    pub max_iterations: Option<usize>,

    /// Largest template move that counts as converged
    #[arg(long)]
    pub tolerance: Option<f64>,
}

#[derive(Parser)]
#[command(
    name = "groups",
    about = "Groupwise registration of spherical surface meshes",
    long_about = "Aligns a population of spherical surface parameterizations by deforming each sphere \
                 with a spherical harmonic field, minimizing the entropy of per-vertex properties \
                 across subjects."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Register subjects discovered in directories
    #[command(about = "Register subjects discovered in directories (outputs: <subject>.coeff)")]
    Run(RunArgs),

    /// Register the subjects listed in a manifest
    #[command(about = "Register the subjects listed in a TOML manifest")]
    Manifest(ManifestArgs),

    /// Rotate every sphere onto the common landmark template
    #[command(about = "Rigidly align spheres on their landmarks (outputs: <subject>.vtk)")]
    Rigid(RigidArgs),

    /// Deform a sphere with a coefficient file
    #[command(about = "Deform a sphere with a coefficient file (outputs: a mesh)")]
    Apply(ApplyArgs),

    /// Display version information
    #[command(about = "Display version information")]
    Version,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let Cli { command } = Cli::parse();
    let result = match command {
        Some(Commands::Run(args)) => run_directories(args),
        Some(Commands::Manifest(args)) => run_manifest(args),
        Some(Commands::Rigid(args)) => rigid(args),
        Some(Commands::Apply(args)) => apply(args),
        Some(Commands::Version) => {
            println!("groups {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        None => Cli::command().print_help().map_err(Into::into),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run_directories(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let layout = DirectoryLayout {
        spheres: args.sphere_dir,
        properties: args.property_dirs,
        surfaces: args.surface_dir,
        landmarks: args.landmark_dir,
        coefficients: args.coeff_dir,
        output: Some(args.output_dir.clone()),
    };
    let mut manifest = RunManifest::from_directories(&layout)?;
    manifest.weights = args.weights;
    manifest.header_lines = args.header_lines;
    manifest.property_arrays = args.property_arrays;
    manifest.landmarks_on_surface = args.landmarks_on_surface;
    std::fs::create_dir_all(&args.output_dir)?;
    register(manifest, &args.settings)
}

fn run_manifest(args: ManifestArgs) -> Result<(), Box<dyn std::error::Error>> {
    let manifest = RunManifest::load(&args.manifest)?;
    register(manifest, &args.settings)
}

fn register(
    mut manifest: RunManifest,
    overrides: &SettingsArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    overrides.apply(&mut manifest.settings);
    let subjects = manifest.load_subjects()?;
    let outputs = manifest.output_paths();
    let weights = manifest.property_weights();

    let mut registration = GroupwiseRegistration::new(subjects, weights, manifest.settings)?;
    let summary = registration.run()?;
    println!(
        "Registered {} subjects in {} cost evaluations: cost {:.6} -> {:.6}",
        registration.subject_count(),
        summary.evaluations,
        summary.initial_cost,
        summary.final_cost
    );
    for stage in &summary.stages {
        println!(
            "  degree {}: {} evaluations, cost {:.6}{}",
            stage.degree,
            stage.evaluations,
            stage.cost,
            if stage.converged { "" } else { " (budget exhausted)" }
        );
    }

    registration.save_all(&outputs)?;
    for path in &outputs {
        println!("Wrote {}", path.display());
    }

    if let Some(dir) = &overrides.deformed_dir {
        std::fs::create_dir_all(dir)?;
        let names: Vec<String> = registration.subject_names().map(str::to_owned).collect();
        for (i, name) in names.iter().enumerate() {
            let path = dir.join(format!("{name}.vtk"));
            save_mesh(&registration.deformed_sphere(i)?, &path)?;
            println!("Wrote {}", path.display());
        }
    }
    Ok(())
}

fn rigid(args: RigidArgs) -> Result<(), Box<dyn std::error::Error>> {
    let layout = DirectoryLayout {
        spheres: args.sphere_dir,
        surfaces: args.surface_dir,
        landmarks: Some(args.landmark_dir),
        ..DirectoryLayout::default()
    };
    let subjects = RunManifest::from_directories(&layout)?.load_subjects()?;
    let defaults = RigidSettings::default();
    let settings = RigidSettings {
        max_iterations: args.max_iterations.unwrap_or(defaults.max_iterations),
        tolerance: args.tolerance.unwrap_or(defaults.tolerance),
    };
    let (alignment, spheres) = align_subjects(&subjects, &settings)?;
    println!(
        "Aligned {} subjects in {} iterations: landmark RMS {:.6}{}",
        subjects.len(),
        alignment.iterations,
        alignment.rms,
        if alignment.converged { "" } else { " (not converged)" }
    );

    std::fs::create_dir_all(&args.output_dir)?;
    for (subject, sphere) in subjects.iter().zip(&spheres) {
        let path = args.output_dir.join(format!("{}.vtk", subject.name));
        save_mesh(sphere, &path)?;
        println!("Wrote {}", path.display());
    }
    Ok(())
}

fn apply(args: ApplyArgs) -> Result<(), Box<dyn std::error::Error>> {
    let sphere = load_mesh(&args.sphere)?.into_unit_sphere()?;
    let coeff = SpharmCoefficients::load(&args.coeff)?;
    let deformed = deform_mesh(&sphere, &coeff)
        .ok_or_else(|| format!("'{}' stores a zero pole", args.coeff.display()))?;
    save_mesh(&deformed, &args.output)?;
    println!("Wrote {}", args.output.display());
    Ok(())
}
