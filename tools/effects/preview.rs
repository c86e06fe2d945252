#![cfg(feature = "preview-tool")]
//! Render a masking effect over a time range of a WAV file.
//!
//! `effect_preview <in.wav> <out.wav> <start_s> <end_s> [effect-json] [mix %]`
//!
//! The file is pushed through the same delay buffer and renderer the plugin
//! uses, then re-aligned so the output lines up with the input.

use anyhow::{bail, Context, Result};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::path::PathBuf;
use vxbleep::dsp::delay_line::DelayBuffer;
use vxbleep::dsp::effects::{EffectRenderer, MaskEffect};
use vxbleep::types::PendingMatch;

const BLOCK: usize = 512;
const PREVIEW_DELAY_SECONDS: f32 = 0.5;

fn read_channels(input: &PathBuf) -> Result<(WavSpec, Vec<Vec<f32>>)> {
    let mut reader = WavReader::open(input)
        .with_context(|| format!("failed to open input WAV '{}'", input.display()))?;
    let spec = reader.spec();
    let interleaved: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Float, 32) => reader.samples::<f32>().collect::<Result<_, _>>()?,
        (SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .map(|s| s.map(|v| v as f32 / i16::MAX as f32))
            .collect::<Result<_, _>>()?,
        (SampleFormat::Int, 24) => reader
            .samples::<i32>()
            .map(|s| s.map(|v| v as f32 / 8_388_607.0))
            .collect::<Result<_, _>>()?,
        _ => bail!("only 16/24-bit integer and 32-bit float WAV input is supported"),
    };

    let n = spec.channels.max(1) as usize;
    let mut channels = vec![Vec::with_capacity(interleaved.len() / n); n];
    for frame in interleaved.chunks(n) {
        for (ch, &s) in channels.iter_mut().zip(frame) {
            ch.push(s);
        }
    }
    Ok((spec, channels))
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() < 4 {
        bail!("usage: effect_preview <in.wav> <out.wav> <start_s> <end_s> [effect-json] [mix %]");
    }
    let input = PathBuf::from(&args[0]);
    let output = PathBuf::from(&args[1]);
    let start_s: f64 = args[2].parse().context("start must be seconds")?;
    let end_s: f64 = args[3].parse().context("end must be seconds")?;
    let effect: MaskEffect = match args.get(4) {
        Some(json) => serde_json::from_str(json).context("effect must be tagged JSON")?,
        None => MaskEffect::default(),
    };
    let mix: u32 = match args.get(5) {
        Some(m) => m.parse().context("mix must be a percentage")?,
        None => 100,
    };

    let (spec, mut channels) = read_channels(&input)?;
    let sr = spec.sample_rate;
    let frames = channels.first().map_or(0, Vec::len);

    let mut delay = DelayBuffer::new(PREVIEW_DELAY_SECONDS);
    delay.prepare(channels.len(), sr, PREVIEW_DELAY_SECONDS);
    let lag = delay.delay_samples();
    let renderer = EffectRenderer::new(effect.sanitized(), mix, sr);

    let start = (start_s.max(0.0) * sr as f64) as u64;
    let end = (end_s.max(0.0) * sr as f64) as u64;
    let mut pending = vec![PendingMatch::new(start, end)];
    if pending[0].is_empty() {
        bail!("empty range {start_s}..{end_s}");
    }

    // Trailing silence flushes the delayed tail.
    for ch in channels.iter_mut() {
        ch.resize(frames + lag, 0.0);
    }

    let mut rendered: Vec<Vec<f32>> = vec![Vec::with_capacity(frames + lag); channels.len()];
    let mut block: Vec<Vec<f32>> = vec![vec![0.0; BLOCK]; channels.len()];
    let mut pos = 0;
    while pos < frames + lag {
        let len = BLOCK.min(frames + lag - pos);
        let mut slices: Vec<&mut [f32]> = block
            .iter_mut()
            .zip(channels.iter())
            .map(|(buf, src)| {
                buf[..len].copy_from_slice(&src[pos..pos + len]);
                &mut buf[..len]
            })
            .collect();

        delay.write(&slices);
        delay.apply_pending(&mut pending, &renderer, |m, head| {
            eprintln!(
                "range {}..{} fell behind the play head at {}",
                m.start_sample, m.end_sample, head
            );
        });
        delay.read_delayed(&mut slices);
        for (out, s) in rendered.iter_mut().zip(slices.iter()) {
            out.extend_from_slice(s);
        }
        pos += len;
    }

    let out_spec = WavSpec {
        channels: spec.channels,
        sample_rate: sr,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    let mut writer = WavWriter::create(&output, out_spec)
        .with_context(|| format!("failed to create output WAV '{}'", output.display()))?;
    for i in lag..lag + frames {
        for ch in &rendered {
            writer.write_sample(ch[i])?;
        }
    }
    writer.finalize()?;

    println!("Preview written to '{}':", output.display());
    println!("  effect  : {:?}", renderer.effect());
    println!("  mix     : {:.0} %", renderer.mix() * 100.0);
    println!("  range   : {start_s:.3}s .. {end_s:.3}s ({} frames)", end.saturating_sub(start));
    Ok(())
}
