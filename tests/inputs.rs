use std::fs;

use groups::GroupwiseRegistration;
use groups::deform::SpharmCoefficients;
use groups::io::vtk::write_vtk;
use groups::io::{InputError, RunManifest, save_mesh};
use groups::sphere::{TriangleMesh, icosphere};
use tempfile::tempdir;

// An inflated copy of the sphere standing in for an original surface.
fn surface_of(sphere: &TriangleMesh, scale: f64) -> TriangleMesh {
    TriangleMesh::new(
        sphere.vertices.iter().map(|v| v * scale).collect(),
        sphere.triangles.clone(),
    )
    .expect("surface mesh")
}

#[test]
fn manifest_drives_a_full_registration() {
    let tmp = tempdir().expect("temporary directory");
    let root = tmp.path();
    let sphere = icosphere(2);
    save_mesh(&sphere, &root.join("sphere.obj")).expect("write sphere");

    for (name, shift) in [("left", 0.0), ("right", 0.5)] {
        let surface = surface_of(&sphere, 60.0);
        let sulc: Vec<f64> = sphere
            .vertices
            .iter()
            .map(|v| (2.0 * v.y + shift).cos())
            .collect();
        write_vtk(
            &root.join(format!("{name}_surf.vtk")),
            &surface,
            &[("sulc", sulc.as_slice())],
        )
        .expect("write surface");

        // Landmarks given in surface coordinates.
        let marks: String = [5usize, 60, 120]
            .iter()
            .map(|&v| {
                let p = surface.vertices[v];
                format!("{} {} {}\n", p.x, p.y, p.z)
            })
            .collect();
        fs::write(root.join(format!("{name}.lm")), marks).expect("write landmarks");
    }

    // Resuming from a degree-0 file exercises the resize path.
    SpharmCoefficients::zeros(0, [0.0, 0.0, 1.0])
        .save(&root.join("start.coeff"))
        .expect("write coefficients");

    fs::write(
        root.join("run.toml"),
        r#"
property_arrays = ["sulc"]

[settings]
degree = 1
max_iterations = 20
sampling_level = 1
landmark_weight = 0.25
threads = 2
progress = false

[settings.optimizer]
method = "pattern_search"
rho_begin = 0.01
rho_end = 0.0001

[[subjects]]
name = "left"
sphere = "sphere.obj"
surface = "left_surf.vtk"
landmarks = "left.lm"
coefficients = "start.coeff"
output = "out/left.toml"

[[subjects]]
name = "right"
sphere = "sphere.obj"
surface = "right_surf.vtk"
landmarks = "right.lm"
output = "out/right.coeff"
"#,
    )
    .expect("write manifest");

    let manifest = RunManifest::load(&root.join("run.toml")).expect("manifest");
    assert_eq!(manifest.property_weights(), vec![1.0]);
    let subjects = manifest.load_subjects().expect("subjects");
    assert_eq!(subjects.len(), 2);
    assert_eq!(subjects[0].landmarks.len(), 3);
    assert!(subjects[0].surface.is_some());

    let outputs = manifest.output_paths();
    let weights = manifest.property_weights();
    let mut reg = GroupwiseRegistration::new(subjects, weights, manifest.settings)
        .expect("registration");
    let summary = reg.run().expect("run");
    assert!(summary.final_cost <= summary.initial_cost);

    fs::create_dir_all(root.join("out")).expect("output dir");
    reg.save_all(&outputs).expect("save");
    let left = SpharmCoefficients::load(&root.join("out").join("left.toml")).expect("left");
    let right = SpharmCoefficients::load(&root.join("out").join("right.coeff")).expect("right");
    assert_eq!(left.degree, 1);
    assert_eq!(right.coefficients.dim(), (3, 4));
}

#[test]
fn missing_point_array_is_reported() {
    let tmp = tempdir().expect("temporary directory");
    let root = tmp.path();
    write_vtk(&root.join("s.vtk"), &icosphere(1), &[]).expect("write sphere");
    fs::write(
        root.join("run.toml"),
        "property_arrays = [\"thickness\"]\n\n[[subjects]]\nsphere = \"s.vtk\"\n",
    )
    .expect("write manifest");
    let manifest = RunManifest::load(&root.join("run.toml")).expect("manifest");
    let err = manifest.load_subjects().expect_err("array is missing");
    assert!(matches!(err, InputError::MissingArray { ref name, .. } if name == "thickness"));
}
