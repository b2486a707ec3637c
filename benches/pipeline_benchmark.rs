use alstructure::correction::corrected_gram;
use alstructure::{AlsOptions, SvdMethod, estimate_subspace, run_alstructure, simulate_admixture};
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use ndarray::Array2;

const N_MARKERS: usize = 2_000;
const N_POPULATIONS: usize = 3;

fn genotypes(n_individuals: usize) -> Array2<f64> {
    simulate_admixture(N_MARKERS, n_individuals, N_POPULATIONS, 0.3, 0x5EED + n_individuals as u64)
        .map(|sim| sim.genotypes)
        .unwrap_or_else(|err| panic!("simulation failed: {err}"))
}

fn benchmark_subspace(c: &mut Criterion) {
    let sizes = [100_usize, 200, 400];
    let data: Vec<_> = sizes.iter().map(|&n| (n, genotypes(n))).collect();

    let mut group = c.benchmark_group("latent_subspace");
    for (n, x) in data.iter() {
        group.throughput(Throughput::Elements((N_MARKERS * *n) as u64));

        group.bench_with_input(BenchmarkId::new("corrected_gram", n), x, |b, input| {
            b.iter(|| black_box(corrected_gram(black_box(input.view())).map(|g| g.gram)));
        });

        for method in [SvdMethod::Exact, SvdMethod::Truncated] {
            let label = format!("{method:?}").to_lowercase();
            group.bench_with_input(BenchmarkId::new(label, n), x, |b, input| {
                b.iter(|| {
                    black_box(estimate_subspace(black_box(input.view()), N_POPULATIONS, method))
                });
            });
        }
    }
    group.finish();
}

fn benchmark_full_fit(c: &mut Criterion) {
    let x = genotypes(200);
    let options = AlsOptions::default().with_dimension(N_POPULATIONS);

    let mut group = c.benchmark_group("alstructure");
    group.sample_size(10);
    group.bench_function("fit_2000x200_d3", |b| {
        b.iter(|| black_box(run_alstructure(black_box(x.view()), &options)));
    });
    group.finish();
}

criterion_group!(benches, benchmark_subspace, benchmark_full_fit);
criterion_main!(benches);
