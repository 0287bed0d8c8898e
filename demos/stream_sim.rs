//! Example: Simulated streaming session with irregular chunk sizes
//!
//! Usage: cargo run --example stream_sim -- [seconds]
//!
//! Synthesizes a test tone, feeds it to the pipeline in deliberately uneven
//! chunks and drains spliced vectors incrementally, the way a spotter
//! polls a live capture stream. No audio hardware needed.

use kws_frontend_rt::{Cmvn, FeaturePipeline, PipelineConfig};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let seconds: f32 = std::env::args()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(3.0);

    let config = PipelineConfig::default();
    let sample_rate = config.sample_rate;

    // Identity stats keep the demo self-contained; real deployments load
    // trained stats with FeaturePipeline::from_cmvn_file
    let cmvn = Cmvn::from_stats(vec![0.0; config.num_bins], vec![1.0; config.num_bins])?;
    let mut pipeline = FeaturePipeline::new(config, cmvn)?;

    // A slow sweep plus a steady tone, so the features move over time
    let total = (seconds * sample_rate as f32) as usize;
    let wave: Vec<f32> = (0..total)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            let sweep = 200.0 + 1800.0 * (t / seconds);
            (2.0 * std::f32::consts::PI * sweep * t).sin() * 0.4
                + (2.0 * std::f32::consts::PI * 440.0 * t).sin() * 0.2
        })
        .collect();

    println!(
        "Streaming {:.1}s of audio ({} samples), feature dim {}",
        seconds,
        total,
        pipeline.feature_dim()
    );

    // Chunk sizes a real capture path might produce: steady buffers mixed
    // with tiny leftovers and one oversized burst
    let chunk_sizes = [160usize, 480, 23, 1600, 7, 400];
    let mut sizes = chunk_sizes.iter().cycle();

    let start = std::time::Instant::now();
    let mut offset = 0;
    let mut next_frame = 0;
    let mut consumed = Vec::new();
    let mut vectors = Vec::new();
    while offset < wave.len() {
        let len = (*sizes.next().unwrap()).min(wave.len() - offset);
        pipeline.accept_waveform(&wave[offset..offset + len])?;
        offset += len;

        // Drain whatever became ready since the last poll
        if pipeline.num_frames_ready() > next_frame {
            let n = pipeline.read_frames(next_frame, &mut vectors)?;
            consumed.extend_from_slice(&vectors);
            next_frame += n;
        }
    }

    let live_frames = next_frame;
    pipeline.finalize()?;
    if pipeline.num_frames_ready() > next_frame {
        let n = pipeline.read_frames(next_frame, &mut vectors)?;
        consumed.extend_from_slice(&vectors);
        next_frame += n;
    }

    let elapsed = start.elapsed();
    let rtf = elapsed.as_secs_f32() / seconds;
    println!(
        "Live: {} vectors, finalize released {} more (right context tail)",
        live_frames,
        next_frame - live_frames
    );
    println!(
        "Total: {} vectors x {} values in {:.2?} (RTF: {:.4}x realtime)",
        next_frame,
        pipeline.feature_dim(),
        elapsed,
        rtf
    );
    assert_eq!(consumed.len(), next_frame * pipeline.feature_dim());

    Ok(())
}
