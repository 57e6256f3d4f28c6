// Measures one cost evaluation of the registration engine: deformation,
// flip validation, resampling and the entropy reduction over the sample grid.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use groups::sphere::icosphere;
use groups::{GroupwiseRegistration, RegistrationSettings, SubjectData};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const SUBJECTS: usize = 8;
const PROPERTIES: usize = 2;

fn subjects(level: u32, rng: &mut StdRng) -> Vec<SubjectData> {
    (0..SUBJECTS)
        .map(|s| {
            let sphere = icosphere(level);
            let phase: f64 = rng.gen_range(0.0..1.0);
            let properties = Array2::from_shape_fn((sphere.vertex_count(), PROPERTIES), |(i, k)| {
                let v = sphere.vertices[i];
                ((k + 2) as f64 * v.z + phase).sin() + 0.3 * v.x * v.y
            });
            SubjectData {
                name: format!("subject{s}"),
                sphere,
                surface: None,
                properties,
                landmarks: Vec::new(),
                initial_coefficients: None,
            }
        })
        .collect()
}

fn cost_evaluation(c: &mut Criterion) {
    let mut group = c.benchmark_group("cost_evaluation");
    group.sample_size(20);
    for degree in [2usize, 5] {
        let mut rng = StdRng::seed_from_u64(7);
        let settings = RegistrationSettings {
            degree,
            initial_degree: degree,
            progress: false,
            ..Default::default()
        };
        let mut reg = GroupwiseRegistration::new(
            subjects(4, &mut rng),
            vec![1.0; PROPERTIES],
            settings,
        )
        .expect("registration");
        let base = reg.coefficient_vector();
        let proposals: Vec<Vec<f64>> = (0..16)
            .map(|_| base.iter().map(|_| rng.gen_range(-1e-3..1e-3)).collect())
            .collect();

        group.bench_with_input(BenchmarkId::new("degree", degree), &proposals, |b, proposals| {
            let mut i = 0;
            b.iter(|| {
                i = (i + 1) % proposals.len();
                black_box(reg.cost(black_box(&proposals[i])))
            });
        });
    }
    group.finish();
}

criterion_group!(benches, cost_evaluation);
criterion_main!(benches);
