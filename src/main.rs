// Example runner for the `coverage_vision` library: sweeps a virtual camera across a
// synthetic undercarriage texture and logs what the analyzer reports.
//
// Run with `RUST_LOG=info` (or `debug` for per-frame motion).

use anyhow::Context;
use coverage_vision::{AnalyzerConfig, CoverageAnalyzer, Frame, StabilityMode};
use image::{GrayImage, Luma, imageops};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;

const SURFACE_WIDTH: u32 = 960;
const SURFACE_HEIGHT: u32 = 480;
const VIEW_WIDTH: u32 = 320;
const VIEW_HEIGHT: u32 = 240;
const TEXTURE_BLOCK: u32 = 8;

/// Blocky random texture standing in for a vehicle underside.
fn synthetic_surface(seed: u64) -> GrayImage {
    let mut rng = Pcg64::seed_from_u64(seed);
    let blocks_x = SURFACE_WIDTH / TEXTURE_BLOCK + 1;
    let blocks_y = SURFACE_HEIGHT / TEXTURE_BLOCK + 1;
    let levels: Vec<u8> = (0..blocks_x * blocks_y).map(|_| rng.r#gen()).collect();
    GrayImage::from_fn(SURFACE_WIDTH, SURFACE_HEIGHT, |x, y| {
        Luma([levels[((y / TEXTURE_BLOCK) * blocks_x + x / TEXTURE_BLOCK) as usize]])
    })
}

/// Camera positions: a left-to-right pass along the top edge, then down the right side.
/// Each horizontal step leaves a strip unseen, so the pass captures until the
/// vertical steps fill the remaining area.
fn sweep_path() -> Vec<(u32, u32)> {
    let mut path: Vec<_> = (0..=SURFACE_WIDTH - VIEW_WIDTH)
        .step_by(60)
        .map(|x| (x, 0))
        .collect();
    let (last_x, _) = path.last().copied().unwrap_or((0, 0));
    path.extend(
        (30..=SURFACE_HEIGHT - VIEW_HEIGHT)
            .step_by(30)
            .map(|y| (last_x, y)),
    );
    path
}

fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();

    let config = AnalyzerConfig {
        stability: StabilityMode::PerAxis {
            max_translation_px: 70.0,
            max_rotation_deg: 2.0,
        },
        ..AnalyzerConfig::default()
    };
    let mut analyzer = CoverageAnalyzer::new(config).context("building analyzer")?;
    let surface = synthetic_surface(7);

    let mut captures = 0;
    for (sequence, (x, y)) in sweep_path().into_iter().enumerate() {
        let view = imageops::crop_imm(&surface, x, y, VIEW_WIDTH, VIEW_HEIGHT).to_image();
        let frame = Frame::from_image(view).with_sequence(sequence as u64);
        let result = analyzer.analyze(&frame);

        log::info!(
            "frame {:>3} at ({:>3}, {:>3}): motion ({:>6.1}, {:>6.1}) conf {:.2}, {:>5.1}% covered, {} gaps",
            sequence,
            x,
            y,
            result.motion.delta_x,
            result.motion.delta_y,
            result.motion.confidence,
            result.coverage_percent(),
            result.gaps.len()
        );
        if let Some(signal) = result.capture_signal() {
            captures += 1;
            log::info!("capture #{captures} at frame {}", signal.frame_sequence);
        }
        if result.is_complete {
            log::info!("coverage complete at frame {sequence}");
            break;
        }
    }

    let heatmap = analyzer.heatmap().context("no frame was analyzed")?;
    log::info!(
        "session {} finished: {:.1}% covered, {} captures, heatmap {}x{}",
        analyzer.session_id(),
        analyzer.coverage_ratio() * 100.0,
        captures,
        heatmap.width(),
        heatmap.height()
    );
    analyzer.shutdown();
    Ok(())
}
