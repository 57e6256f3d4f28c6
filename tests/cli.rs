use std::fs;
use std::path::Path;
use std::process::Command;

use approx::assert_abs_diff_eq;
use groups::io::load_mesh;
use groups::io::vtk::{read_vtk, write_vtk};
use groups::register::rigid::rotate_mesh;
use groups::sphere::icosphere;
use nalgebra::{Rotation3, Unit, Vector3};
use tempfile::tempdir;

fn write_subject_files(root: &Path) {
    let mesh = icosphere(2);
    fs::create_dir_all(root.join("spheres")).expect("sphere dir");
    fs::create_dir_all(root.join("curv")).expect("property dir");
    fs::create_dir_all(root.join("landmarks")).expect("landmark dir");
    write_vtk(&root.join("spheres").join("common.vtk"), &mesh, &[]).expect("write sphere");

    for (s, shift) in [(1, 0.0), (2, 0.3), (10, 0.6)] {
        let mut text = String::from("curvature\n");
        for v in &mesh.vertices {
            text.push_str(&format!("{}\n", (3.0 * v.z + shift).sin() + v.x));
        }
        fs::write(root.join("curv").join(format!("s{s}.txt")), text).expect("write property");

        let mut fcsv = String::from("# Markups fiducial file version = 4.10\n");
        for (k, vertex) in [3usize, 40, 77].into_iter().enumerate() {
            let v = mesh.vertices[vertex + s];
            fcsv.push_str(&format!("F_{k},{},{},{},0,0,0,1,1,1,0,F-{k},,\n", v.x, v.y, v.z));
        }
        fs::write(root.join("landmarks").join(format!("s{s}.fcsv")), fcsv)
            .expect("write landmarks");
    }
}

#[test]
fn run_then_apply_reproduces_the_deformed_sphere() {
    let tmp = tempdir().expect("temporary directory");
    let root = tmp.path();
    write_subject_files(root);

    let exe = env!("CARGO_BIN_EXE_groups");
    let status = Command::new(exe)
        .current_dir(root)
        .args([
            "run",
            "--sphere-dir",
            "spheres",
            "--property-dir",
            "curv",
            "--landmark-dir",
            "landmarks",
            "--output-dir",
            "out",
            "--header-lines",
            "1",
            "--degree",
            "1",
            "--max-iter",
            "15",
            "--sampling-level",
            "1",
            "--weight-loc",
            "0.5",
            "--threads",
            "2",
            "--no-progress",
            "--deformed-dir",
            "deformed",
        ])
        .status()
        .expect("run groups cli");
    assert!(status.success(), "CLI exited with status {status:?}");
    for name in ["s1", "s2", "s10"] {
        assert!(root.join("out").join(format!("{name}.coeff")).exists());
        assert!(root.join("deformed").join(format!("{name}.vtk")).exists());
    }

    let status = Command::new(exe)
        .current_dir(root)
        .args([
            "apply",
            "--sphere",
            "spheres/common.vtk",
            "--coeff",
            "out/s10.coeff",
            "--output",
            "applied.obj",
        ])
        .status()
        .expect("run groups apply");
    assert!(status.success(), "apply exited with status {status:?}");

    let applied = load_mesh(&root.join("applied.obj")).expect("applied mesh");
    let deformed = read_vtk(&root.join("deformed").join("s10.vtk")).expect("deformed mesh");
    assert_eq!(applied.triangles, deformed.mesh.triangles);
    for (a, b) in applied.vertices.iter().zip(&deformed.mesh.vertices) {
        assert_abs_diff_eq!((a - b).norm(), 0.0, epsilon = 1e-12);
    }
}

#[test]
fn rigid_alignment_undoes_a_turned_sphere() {
    let tmp = tempdir().expect("temporary directory");
    let root = tmp.path();
    let mesh = icosphere(2);
    let axis = Unit::new_normalize(Vector3::new(0.3, -1.0, 0.4));
    let turn = Rotation3::from_axis_angle(&axis, 0.8);
    fs::create_dir_all(root.join("spheres")).expect("sphere dir");
    fs::create_dir_all(root.join("marks")).expect("landmark dir");
    write_vtk(&root.join("spheres").join("a.vtk"), &mesh, &[]).expect("write sphere");
    write_vtk(&root.join("spheres").join("b.vtk"), &rotate_mesh(&mesh, &turn), &[])
        .expect("write turned sphere");
    for name in ["a", "b"] {
        fs::write(root.join("marks").join(format!("{name}.txt")), "2\n33\n90\n141\n")
            .expect("write landmarks");
    }

    let output = Command::new(env!("CARGO_BIN_EXE_groups"))
        .current_dir(root)
        .args([
            "rigid",
            "--sphere-dir",
            "spheres",
            "--landmark-dir",
            "marks",
            "--output-dir",
            "aligned",
        ])
        .output()
        .expect("run groups rigid");
    assert!(output.status.success(), "rigid failed: {output:?}");

    let aligned = read_vtk(&root.join("aligned").join("b.vtk")).expect("aligned sphere");
    assert_eq!(aligned.mesh.triangles, mesh.triangles);
    for (a, b) in aligned.mesh.vertices.iter().zip(&mesh.vertices) {
        assert_abs_diff_eq!((a - b).norm(), 0.0, epsilon = 1e-9);
    }
    assert!(root.join("aligned").join("a.vtk").exists());
}

#[test]
fn missing_inputs_exit_with_an_error() {
    let tmp = tempdir().expect("temporary directory");
    let output = Command::new(env!("CARGO_BIN_EXE_groups"))
        .current_dir(tmp.path())
        .args(["run", "--sphere-dir", "nowhere", "--output-dir", "out"])
        .output()
        .expect("run groups cli");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Error:"), "stderr was: {stderr}");
}
