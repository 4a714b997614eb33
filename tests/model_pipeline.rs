use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::NamedTempFile;

use rt_classify::engine::{ElementType, Quantization, StubEngine, TensorBuffer};
use rt_classify::{
    CameraConfig, CameraSource, FrameGeometry, FrameOutcome, FrameSink, Model, ModelConfig,
    TensorSelector,
};

const LABELS: [&str; 4] = ["cat", "dog", "fox", "owl"];

const Q: Quantization = Quantization {
    zero_point: 0,
    scale: 1.0 / 256.0,
};

const GEOMETRY: FrameGeometry = FrameGeometry {
    width: 8,
    height: 8,
    channels: 4,
};

fn label_file() -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp labels");
    for label in LABELS {
        writeln!(file, "{}", label).expect("write label");
    }
    file
}

/// Class `k` scores `input[0] + k`; the overlay plane is a 2x2 ramp.
fn engine() -> StubEngine {
    StubEngine::builder()
        .input("input", ElementType::Quantized(Q), &[1, 2, 2, 3])
        .output("mask", ElementType::Quantized(Q), &[1, 2, 2, 1])
        .output("scores", ElementType::Quantized(Q), &[1, 4])
        .on_invoke(|tensors| {
            let seed = match &tensors[0].buffer {
                TensorBuffer::U8(data) => data[0],
                TensorBuffer::F32(_) => 0,
            };
            tensors[1].buffer = TensorBuffer::U8(vec![0, 85, 170, 255]);
            tensors[2].buffer = TensorBuffer::U8((0..4).map(|k| seed.saturating_add(k)).collect());
            Ok(())
        })
        .build()
}

fn model(labels: &NamedTempFile) -> Arc<Model> {
    let mut cfg = ModelConfig::new("stub.onnx", labels.path());
    cfg.frame = GEOMETRY;
    cfg.overlay = TensorSelector::parse("mask");
    cfg.ranking.threshold = 0.0;
    Arc::new(Model::with_engine(cfg, Box::new(engine())).expect("model"))
}

fn camera() -> CameraSource {
    CameraSource::new(CameraConfig {
        device: "stub://pipeline".to_string(),
        frame: GEOMETRY,
        target_fps: 200,
        ..CameraConfig::default()
    })
    .expect("camera")
}

fn is_well_formed(label: &str) -> bool {
    if label.is_empty() {
        return true;
    }
    let Some((name, confidence)) = label.split_once(" - ") else {
        return false;
    };
    LABELS.contains(&name) && confidence.len() == 4 && confidence.parse::<f32>().is_ok()
}

fn wait_for_published(model: &Model, count: u64) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while model.stats().frames_published < count && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn camera_frames_reach_the_label() {
    let labels = label_file();
    let model = model(&labels);
    assert_eq!(model.current_label(), "");

    let mut source = camera();
    source
        .start(Arc::clone(&model) as Arc<dyn FrameSink>)
        .expect("start camera");
    wait_for_published(&model, 5);
    source.set_label_text(&model.current_label());
    source.stop();

    assert!(model.stats().frames_published >= 5);
    let label = model.current_label();
    // Class 3 always wins with this engine.
    assert!(label.starts_with("owl - "), "unexpected label {:?}", label);
    assert!(is_well_formed(&label));

    let overlay = model.current_overlay().expect("overlay");
    assert_eq!(overlay.width(), 2);
    assert_eq!(overlay.as_bytes(), &[0, 85, 170, 255]);
    assert_eq!(overlay.tinted_rgba([255, 0, 0])[3], 0);
}

#[test]
fn readers_never_see_torn_results() {
    let labels = label_file();
    let model = model(&labels);
    let mut source = camera();
    source
        .start(Arc::clone(&model) as Arc<dyn FrameSink>)
        .expect("start camera");

    let done = Arc::new(AtomicBool::new(false));
    let readers: Vec<_> = (0..3)
        .map(|_| {
            let model = Arc::clone(&model);
            let done = Arc::clone(&done);
            std::thread::spawn(move || {
                let mut last_sequence = 0;
                while !done.load(Ordering::SeqCst) {
                    let label = model.current_label();
                    assert!(is_well_formed(&label), "torn label {:?}", label);
                    let snapshot = model.snapshot();
                    assert!(snapshot.sequence >= last_sequence);
                    if snapshot.sequence > 0 {
                        assert!(snapshot.classification.is_some());
                        assert!(snapshot.overlay.is_some());
                    }
                    last_sequence = snapshot.sequence;
                }
            })
        })
        .collect();

    wait_for_published(&model, 20);
    done.store(true, Ordering::SeqCst);
    for reader in readers {
        reader.join().expect("reader panicked");
    }
    source.stop();
    assert!(model.stats().frames_published >= 20);
}

#[test]
fn concurrent_pushes_are_serialized() {
    let labels = label_file();
    let model = model(&labels);

    let writers: Vec<_> = (0..4u8)
        .map(|worker| {
            let model = Arc::clone(&model);
            std::thread::spawn(move || {
                let frame = vec![worker * 10 + 1; 8 * 8 * 4];
                (0..25)
                    .map(|_| model.on_new_frame(&frame))
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut sequences = Vec::new();
    for writer in writers {
        for outcome in writer.join().expect("writer panicked") {
            match outcome {
                FrameOutcome::Published(sequence) => sequences.push(sequence),
                other => panic!("unexpected outcome {:?}", other),
            }
        }
    }
    sequences.sort_unstable();
    assert_eq!(sequences, (1..=100).collect::<Vec<u64>>());
    assert_eq!(model.snapshot().sequence, 100);
}

#[test]
fn short_frames_are_discarded_without_clearing_the_label() {
    let labels = label_file();
    let model = model(&labels);
    assert_eq!(
        model.on_new_frame(&vec![64; 8 * 8 * 4]),
        FrameOutcome::Published(1)
    );
    let label = model.current_label();
    assert_eq!(label, "owl - 0.26");

    assert_eq!(model.on_new_frame(&[0; 10]), FrameOutcome::Discarded);
    assert_eq!(model.current_label(), label);
}
