use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};
use whex_core::{Side, StimulusDisplay, StimulusGeometry};
use whex_render::StimulusRenderer;

fn harness() -> StimulusRenderer {
    let geometry = StimulusGeometry {
        screen_width: 1920,
        screen_height: 480,
        ..StimulusGeometry::default()
    };
    let mut r = StimulusRenderer::new(geometry, 90.0).unwrap();
    r.present_stimulus(Side::Right);
    r.start_open_loop();
    r.render();
    r
}

pub fn bench_open_loop_frame(c: &mut Criterion) {
    let mut g = c.benchmark_group("render_frame");
    g.sample_size(40);

    g.bench_function("open_loop_frame", |b| {
        b.iter_batched(
            harness,
            |mut r| {
                r.update_position(black_box(12.5));
                black_box(r.render());
            },
            BatchSize::LargeInput,
        )
    });

    g.bench_function("open_loop_sweep", |b| {
        let mut r = harness();
        let mut deg = -90.0f32;
        b.iter(|| {
            deg = if deg >= 90.0 { -90.0 } else { deg + 0.5 };
            r.update_position(deg);
            black_box(r.render());
        })
    });

    g.finish();
}

criterion_group!(benches, bench_open_loop_frame);
criterion_main!(benches);
