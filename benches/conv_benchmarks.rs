use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::prelude::*;
use rand_distr::{Distribution, Normal};

use conv_kernel::{
    kernel_for, run_kernel, simd::scalar::ScalarF32x8, Conv2DKernel, ConvParams, ReferenceKernel,
    Tensor, Vectorized5x5,
};

// =====================================================================
// Benchmark Data
// =====================================================================

struct ConvCase {
    name: &'static str,
    params: ConvParams,
    batch: usize,
}

fn conv_cases() -> Vec<ConvCase> {
    let lenet = ConvParams::builder().input(32, 32, 1).window(5, 5).out_channels(6).build();
    let deep = ConvParams::builder().input(14, 14, 6).window(5, 5).out_channels(16).build();
    let strided = ConvParams::builder()
        .input(64, 64, 3)
        .window(5, 5)
        .out_channels(8)
        .stride(2, 2)
        .build();

    [("lenet_c1", lenet, 8), ("lenet_c3", deep, 8), ("strided_64", strided, 4)]
        .into_iter()
        .filter_map(|(name, params, batch)| {
            params.ok().map(|params| ConvCase { name, params, batch })
        })
        .collect()
}

fn random_tensor(rng: &mut StdRng, shape: &[usize]) -> Tensor<f32> {
    let normal = Normal::new(0.0f32, 1.0).unwrap();
    let len = shape.iter().product();
    Tensor::from_vec(shape, (0..len).map(|_| normal.sample(rng)).collect()).unwrap()
}

// =====================================================================
// Benchmarks
// =====================================================================

fn bench_kernels(c: &mut Criterion) {
    let mut group = c.benchmark_group("conv2d_kernels");
    let mut rng = StdRng::seed_from_u64(42);
    let emulated = Vectorized5x5::<ScalarF32x8>::emulated();

    for case in conv_cases() {
        let p = &case.params;
        let (padded, out) = (p.in_padded, p.output);
        let input_shape = [case.batch, padded.depth, padded.height, padded.width];
        let input = random_tensor(&mut rng, &input_shape);
        let weights = random_tensor(&mut rng, &[out.depth, p.input.depth, 5, 5]);
        let bias = random_tensor(&mut rng, &[out.depth]);
        let mut output = Tensor::<f32>::zeros(&[case.batch, out.depth, out.height, out.width]);

        let macs = case.batch * p.output.size() * p.input.depth * 25;
        group.throughput(Throughput::Elements(macs as u64));

        let kernels: [(&str, &dyn Conv2DKernel<f32>); 3] = [
            ("reference", &ReferenceKernel),
            ("emulated", &emulated),
            ("dispatched", kernel_for::<f32>(p)),
        ];
        for (label, kernel) in kernels {
            group.bench_with_input(BenchmarkId::new(label, case.name), &case.params, |b, params| {
                b.iter(|| {
                    run_kernel(kernel, &input, &weights, &bias, &mut output, params, false)
                        .unwrap();
                    black_box(output.as_slice());
                })
            });
        }

        let id = BenchmarkId::new("dispatched_parallel", case.name);
        group.bench_with_input(id, &case.params, |b, params| {
            let kernel = kernel_for::<f32>(params);
            b.iter(|| {
                run_kernel(kernel, &input, &weights, &bias, &mut output, params, true).unwrap();
                black_box(output.as_slice());
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_kernels);
criterion_main!(benches);
