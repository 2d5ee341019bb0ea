use cogloop_core::{ArrowDirection, Display, Stimulus, StimulusType};
use cogloop_render::{PixmapDisplay, rasterize};
use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};
use tiny_skia::Pixmap;

fn probe_frame() -> Vec<(&'static str, Stimulus)> {
    let white = [255, 255, 255, 255];
    let shapes = [
        (
            "fixation",
            StimulusType::Cross {
                size: 40.0,
                thickness: 2.0,
                color: white,
            },
            (0.0, 0.0),
        ),
        (
            "probe",
            StimulusType::Circle {
                radius: 12.0,
                color: [255, 80, 80, 255],
            },
            (-180.0, 40.0),
        ),
        (
            "cue",
            StimulusType::Arrow {
                direction: ArrowDirection::Left,
                size: 24.0,
                color: white,
            },
            (0.0, -80.0),
        ),
        ("prompt", StimulusType::text("left or right?"), (0.0, 200.0)),
    ];
    shapes
        .into_iter()
        .map(|(name, shape, position)| {
            (
                name,
                Stimulus {
                    shape,
                    position,
                    visible: true,
                },
            )
        })
        .collect()
}

fn bench_rasterize(c: &mut Criterion) {
    let frame = probe_frame();
    let mut pixmap = Pixmap::new(1280, 720).unwrap();

    c.bench_function("rasterize_probe_frame", |b| {
        b.iter(|| {
            for (name, s) in &frame {
                rasterize(&mut pixmap, name, &s.shape, black_box((640.0, 360.0))).unwrap();
            }
        })
    });
}

fn bench_draw_present(c: &mut Criterion) {
    let frame = probe_frame();

    // Unpaced: a very high refresh rate keeps present from sleeping.
    c.bench_function("draw_and_present", |b| {
        b.iter_batched(
            || PixmapDisplay::new(1280, 720, 1.0e6).unwrap(),
            |mut display| {
                for (name, s) in &frame {
                    display.draw(name, s).unwrap();
                }
                black_box(display.present().unwrap());
            },
            BatchSize::LargeInput,
        )
    });
}

criterion_group!(benches, bench_rasterize, bench_draw_present);
criterion_main!(benches);
