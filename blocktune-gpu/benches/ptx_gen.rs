//! PTX Generation Benchmarks
//!
//! Run with: cargo bench -p blocktune-gpu

use std::hint::black_box;

use blocktune_gpu::driver::LaunchConfig;
use blocktune_gpu::kernels::{GemmKernel, Kernel, UnitIndex};
use blocktune_gpu::ptx::{validate_ptx, PtxModule};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

fn bench_gemm_build(c: &mut Criterion) {
    let kernel = GemmKernel::naive(64, 64, 64);
    c.bench_function("gemm_build_ptx", |b| b.iter(|| black_box(kernel.build_ptx())));
}

fn bench_gemm_emit(c: &mut Criterion) {
    let module = GemmKernel::naive(64, 64, 64).as_module();
    c.bench_function("gemm_module_emit", |b| b.iter(|| black_box(module.emit())));
}

fn bench_validate(c: &mut Criterion) {
    let ptx = GemmKernel::naive(64, 64, 64).emit_ptx();
    c.bench_function("validate_ptx", |b| b.iter(|| black_box(validate_ptx(&ptx))));
}

fn bench_module_builder(c: &mut Criterion) {
    c.bench_function("ptx_module_build", |b| {
        b.iter(|| {
            black_box(
                PtxModule::new()
                    .version(8, 0)
                    .target("sm_70")
                    .address_size(64),
            )
        })
    });
}

fn bench_launch_config(c: &mut Criterion) {
    c.bench_function("launch_config_grid_2d", |b| {
        b.iter(|| {
            let config = LaunchConfig::grid_2d(black_box(4), black_box(4), 16, 16);
            black_box(config.total_threads())
        })
    });
}

fn bench_execute_units(c: &mut Criterion) {
    let mut group = c.benchmark_group("gemm_execute_units");

    for size in [16u32, 32, 64] {
        let kernel = GemmKernel::naive(size, size, size);
        let len = (size * size) as usize;
        let a = vec![1.0f32; len];
        let b = vec![1.0f32; len];
        let mut out = vec![0.0f32; len];

        group.throughput(Throughput::Elements(len as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |bench, &n| {
            bench.iter(|| {
                for ty in 0..n {
                    for tx in 0..n {
                        let unit = UnitIndex {
                            block_idx: (tx / 16, ty / 16),
                            block_dim: (16, 16),
                            thread_idx: (tx % 16, ty % 16),
                        };
                        kernel.execute_unit(&a, &b, &mut out, unit);
                    }
                }
                black_box(&out);
            })
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_gemm_build,
    bench_gemm_emit,
    bench_validate,
    bench_module_builder,
    bench_launch_config,
    bench_execute_units,
);
criterion_main!(benches);
