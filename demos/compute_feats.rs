//! Example: Compute KWS features for a WAV file with the streaming pipeline
//!
//! Usage: cargo run --example compute_feats -- input.wav [cmvn.bin] [feats.bin]
//!
//! Without a stats file, per-utterance stats are estimated from the input
//! itself. With a third argument the spliced vectors are written out in the
//! same little-endian rows/cols binary layout the stats file uses.

use byteorder::{LittleEndian, WriteBytesExt};
use kws_frontend_rt::{Cmvn, Fbank, FeaturePipeline, PipelineConfig};
use std::io::BufWriter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <input.wav> [cmvn.bin] [feats.bin]", args[0]);
        std::process::exit(1);
    }
    let input_path = &args[1];
    let cmvn_path = args.get(2);
    let feats_path = args.get(3);

    let config = PipelineConfig::default();

    // Read input audio
    let mut reader = hound::WavReader::open(input_path)?;
    let spec = reader.spec();
    println!(
        "Input: {} Hz, {} channels, {:?}",
        spec.sample_rate, spec.channels, spec.sample_format
    );
    if spec.sample_rate != config.sample_rate as u32 {
        eprintln!(
            "Warning: Input sample rate {} != expected {}. Resample first!",
            spec.sample_rate, config.sample_rate
        );
    }

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().map(|s| s.unwrap()).collect(),
        hound::SampleFormat::Int => match spec.bits_per_sample {
            16 => reader
                .samples::<i16>()
                .map(|s| s.unwrap() as f32 / 32768.0)
                .collect(),
            24 | 32 => reader
                .samples::<i32>()
                .map(|s| s.unwrap() as f32 / 2147483648.0)
                .collect(),
            _ => {
                eprintln!("Unsupported bits per sample: {}", spec.bits_per_sample);
                std::process::exit(1);
            }
        },
    };

    // Convert to mono if stereo
    let mono: Vec<f32> = if spec.channels == 2 {
        samples.chunks(2).map(|c| (c[0] + c[1]) / 2.0).collect()
    } else if spec.channels == 1 {
        samples
    } else {
        // Take first channel for multi-channel
        samples.chunks(spec.channels as usize).map(|c| c[0]).collect()
    };

    let cmvn = match cmvn_path {
        Some(path) => {
            println!("Loading cmvn stats from {}...", path);
            Cmvn::from_file(path)?
        }
        None => {
            // No trained stats: estimate per-utterance stats from the raw
            // filterbank output of this file
            println!("No cmvn stats given, estimating from the input");
            let mut fbank = Fbank::new(
                config.num_bins,
                config.sample_rate,
                config.frame_length,
                config.frame_shift,
            );
            let mut raw = Vec::new();
            fbank.compute(&mono, &mut raw);
            Cmvn::estimate(&raw, config.num_bins)?
        }
    };

    let mut pipeline = FeaturePipeline::new(config.clone(), cmvn)?;
    println!(
        "Processing {} samples ({:.2}s)...",
        mono.len(),
        mono.len() as f32 / config.sample_rate as f32
    );

    // Stream in 100 ms chunks the way a capture callback would deliver them
    let chunk = config.sample_rate / 10;
    let start = std::time::Instant::now();
    for piece in mono.chunks(chunk) {
        pipeline.accept_waveform(piece)?;
    }
    pipeline.finalize()?;

    let mut feats = Vec::new();
    let num_vectors = if pipeline.num_frames() > 0 {
        pipeline.read_all(&mut feats)?
    } else {
        0
    };

    let elapsed = start.elapsed();
    let rtf = elapsed.as_secs_f32() / (mono.len() as f32 / config.sample_rate as f32);
    println!(
        "Done: {} vectors x {} dims in {:.2?} (RTF: {:.4}x realtime)",
        num_vectors,
        pipeline.feature_dim(),
        elapsed,
        rtf
    );

    if let Some(path) = feats_path {
        let mut writer = BufWriter::new(std::fs::File::create(path)?);
        writer.write_i32::<LittleEndian>(num_vectors as i32)?;
        writer.write_i32::<LittleEndian>(pipeline.feature_dim() as i32)?;
        for &v in &feats {
            writer.write_f32::<LittleEndian>(v)?;
        }
        println!("Wrote {} x {} matrix to {}", num_vectors, pipeline.feature_dim(), path);
    }

    Ok(())
}
