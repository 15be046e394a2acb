//! Audio feature vectorization.
//!
//! Produces the fixed 20-dimensional vector the classifier was trained on:
//! 13 mean Mel-cepstral coefficients, mean spectral centroid, mean spectral
//! rolloff, and the first 5 mean spectral-contrast bands. The DSP is
//! self-contained (Hann window + radix-2 FFT over 1024-sample frames) —
//! transparent arithmetic, no black boxes.
//!
//! When the audio track is missing or undecodable the extractor substitutes
//! [`fallback_vector`], seeded from the content digest so the same video
//! always produces the same vector.

use rand::{Rng, SeedableRng};

use crate::content_key::ContentKey;

/// Dimensionality of the audio feature vector fed to the classifier.
pub const AUDIO_FEATURE_DIM: usize = 20;

/// Sample rate the decoder normalizes audio to before analysis.
pub const FEATURE_SAMPLE_RATE: u32 = 16_000;

/// Analysis frame length (power of two for the FFT).
const FFT_SIZE: usize = 1024;

/// Hop between analysis frames.
const HOP_SIZE: usize = 512;

/// Number of Mel-cepstral coefficients kept per frame.
const MEL_COEFFS: usize = 13;

/// Number of triangular Mel filters.
const MEL_FILTERS: usize = 26;

/// Fraction of spectral energy below the rolloff frequency.
const ROLLOFF_FRACTION: f64 = 0.85;

/// Spectral-contrast band edges in Hz (6 bands, truncated to 5 features).
const CONTRAST_EDGES: [f64; 7] = [0.0, 200.0, 400.0, 800.0, 1600.0, 3200.0, 8000.0];

/// Number of contrast bands kept in the output vector.
const CONTRAST_FEATURES: usize = 5;

// ═══════════════════════════════════════════════════════════
// Public entry points
// ═══════════════════════════════════════════════════════════

/// Compute the spectral feature vector for mono samples at `sample_rate` Hz.
///
/// Returns `None` when there is not even one full analysis frame — the
/// caller falls back to the deterministic vector in that case.
pub fn spectral_features(samples: &[f32], sample_rate: u32) -> Option<Vec<f32>> {
    if samples.len() < FFT_SIZE || sample_rate == 0 {
        return None;
    }

    let filterbank = mel_filterbank(MEL_FILTERS, FFT_SIZE / 2 + 1, sample_rate);
    let bin_hz = sample_rate as f64 / FFT_SIZE as f64;

    let mut mfcc_sums = vec![0.0f64; MEL_COEFFS];
    let mut centroid_sum = 0.0f64;
    let mut rolloff_sum = 0.0f64;
    let mut contrast_sums = vec![0.0f64; CONTRAST_EDGES.len() - 1];
    let mut frames = 0usize;

    let mut start = 0;
    while start + FFT_SIZE <= samples.len() {
        let power = power_spectrum(&samples[start..start + FFT_SIZE]);

        let mel_energies: Vec<f64> = filterbank
            .iter()
            .map(|filter| {
                filter
                    .iter()
                    .map(|&(bin, weight)| power[bin] * weight)
                    .sum::<f64>()
                    .max(1e-10)
                    .ln()
            })
            .collect();
        for (sum, c) in mfcc_sums.iter_mut().zip(dct_ii(&mel_energies, MEL_COEFFS)) {
            *sum += c;
        }

        centroid_sum += spectral_centroid(&power, bin_hz);
        rolloff_sum += spectral_rolloff(&power, bin_hz);
        for (sum, c) in contrast_sums
            .iter_mut()
            .zip(spectral_contrast(&power, bin_hz))
        {
            *sum += c;
        }

        frames += 1;
        start += HOP_SIZE;
    }

    let n = frames as f64;
    let mut features = Vec::with_capacity(AUDIO_FEATURE_DIM);
    features.extend(mfcc_sums.iter().map(|s| (s / n) as f32));
    features.push((centroid_sum / n) as f32);
    features.push((rolloff_sum / n) as f32);
    features.extend(
        contrast_sums
            .iter()
            .take(CONTRAST_FEATURES)
            .map(|s| (s / n) as f32),
    );

    Some(force_dimension(features, AUDIO_FEATURE_DIM))
}

/// Truncate or zero-pad a vector to exactly `dim` entries.
pub fn force_dimension(mut v: Vec<f32>, dim: usize) -> Vec<f32> {
    v.truncate(dim);
    v.resize(dim, 0.0);
    v
}

/// Deterministic fallback vector for videos without usable audio.
///
/// Seeded from the content digest — never a free-running draw, so the
/// verdict cache stays idempotent across misses.
pub fn fallback_vector(key: &ContentKey) -> Vec<f32> {
    let mut rng = rand::rngs::StdRng::from_seed(key.seed());
    (0..AUDIO_FEATURE_DIM).map(|_| rng.gen::<f32>()).collect()
}

// ═══════════════════════════════════════════════════════════
// Frame-level spectral analysis
// ═══════════════════════════════════════════════════════════

/// Hann-windowed power spectrum of one frame (bins 0..=FFT_SIZE/2).
fn power_spectrum(frame: &[f32]) -> Vec<f64> {
    debug_assert_eq!(frame.len(), FFT_SIZE);

    let mut re = vec![0.0f64; FFT_SIZE];
    let mut im = vec![0.0f64; FFT_SIZE];
    for (i, &s) in frame.iter().enumerate() {
        let w = 0.5
            - 0.5 * (2.0 * std::f64::consts::PI * i as f64 / (FFT_SIZE - 1) as f64).cos();
        re[i] = s as f64 * w;
    }

    fft_in_place(&mut re, &mut im);

    (0..=FFT_SIZE / 2)
        .map(|k| re[k] * re[k] + im[k] * im[k])
        .collect()
}

/// In-place iterative radix-2 Cooley-Tukey FFT. Length must be a power of two.
fn fft_in_place(re: &mut [f64], im: &mut [f64]) {
    let n = re.len();
    debug_assert!(n.is_power_of_two());

    // Bit-reversal permutation
    let mut j = 0usize;
    for i in 1..n {
        let mut bit = n >> 1;
        while j & bit != 0 {
            j ^= bit;
            bit >>= 1;
        }
        j |= bit;
        if i < j {
            re.swap(i, j);
            im.swap(i, j);
        }
    }

    let mut len = 2;
    while len <= n {
        let ang = -2.0 * std::f64::consts::PI / len as f64;
        let (wr, wi) = (ang.cos(), ang.sin());
        let mut block = 0;
        while block < n {
            let (mut cr, mut ci) = (1.0f64, 0.0f64);
            for k in 0..len / 2 {
                let (ur, ui) = (re[block + k], im[block + k]);
                let (tr, ti) = (re[block + k + len / 2], im[block + k + len / 2]);
                let (vr, vi) = (tr * cr - ti * ci, tr * ci + ti * cr);
                re[block + k] = ur + vr;
                im[block + k] = ui + vi;
                re[block + k + len / 2] = ur - vr;
                im[block + k + len / 2] = ui - vi;
                let next_cr = cr * wr - ci * wi;
                ci = cr * wi + ci * wr;
                cr = next_cr;
            }
            block += len;
        }
        len <<= 1;
    }
}

/// Energy-weighted mean frequency in Hz.
fn spectral_centroid(power: &[f64], bin_hz: f64) -> f64 {
    let total: f64 = power.iter().sum();
    if total < 1e-12 {
        return 0.0;
    }
    power
        .iter()
        .enumerate()
        .map(|(k, &p)| k as f64 * bin_hz * p)
        .sum::<f64>()
        / total
}

/// Frequency below which [`ROLLOFF_FRACTION`] of the energy lies, in Hz.
fn spectral_rolloff(power: &[f64], bin_hz: f64) -> f64 {
    let total: f64 = power.iter().sum();
    if total < 1e-12 {
        return 0.0;
    }
    let target = total * ROLLOFF_FRACTION;
    let mut acc = 0.0;
    for (k, &p) in power.iter().enumerate() {
        acc += p;
        if acc >= target {
            return k as f64 * bin_hz;
        }
    }
    (power.len() - 1) as f64 * bin_hz
}

/// Per-band log peak-to-valley contrast over [`CONTRAST_EDGES`].
///
/// Peak and valley are the means of the top and bottom quintiles of the
/// band's bin energies; contrast is their log ratio.
fn spectral_contrast(power: &[f64], bin_hz: f64) -> Vec<f64> {
    CONTRAST_EDGES
        .windows(2)
        .map(|edge| {
            let lo = (edge[0] / bin_hz).floor() as usize;
            let hi = ((edge[1] / bin_hz).ceil() as usize).min(power.len());
            if hi <= lo + 1 {
                return 0.0;
            }
            let mut band: Vec<f64> = power[lo..hi].to_vec();
            band.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            let quintile = (band.len() / 5).max(1);
            let valley: f64 = band[..quintile].iter().sum::<f64>() / quintile as f64;
            let peak: f64 =
                band[band.len() - quintile..].iter().sum::<f64>() / quintile as f64;
            ((peak + 1e-10) / (valley + 1e-10)).ln()
        })
        .collect()
}

/// Triangular Mel filterbank as sparse (bin, weight) rows.
fn mel_filterbank(n_filters: usize, n_bins: usize, sample_rate: u32) -> Vec<Vec<(usize, f64)>> {
    let hz_to_mel = |hz: f64| 2595.0 * (1.0 + hz / 700.0).log10();
    let mel_to_hz = |mel: f64| 700.0 * (10.0f64.powf(mel / 2595.0) - 1.0);

    let max_mel = hz_to_mel(sample_rate as f64 / 2.0);
    let bin_hz = sample_rate as f64 / FFT_SIZE as f64;

    // n_filters + 2 equally spaced mel points, converted to FFT bin indices
    let points: Vec<f64> = (0..n_filters + 2)
        .map(|i| mel_to_hz(max_mel * i as f64 / (n_filters + 1) as f64) / bin_hz)
        .collect();

    (0..n_filters)
        .map(|f| {
            let (left, center, right) = (points[f], points[f + 1], points[f + 2]);
            let mut row = Vec::new();
            let lo = left.floor() as usize;
            let hi = (right.ceil() as usize).min(n_bins.saturating_sub(1));
            for bin in lo..=hi {
                let b = bin as f64;
                let weight = if b < center {
                    (b - left) / (center - left).max(1e-9)
                } else {
                    (right - b) / (right - center).max(1e-9)
                };
                if weight > 0.0 {
                    row.push((bin, weight));
                }
            }
            row
        })
        .collect()
}

/// DCT-II of `input`, keeping the first `n_out` coefficients.
fn dct_ii(input: &[f64], n_out: usize) -> Vec<f64> {
    let n = input.len() as f64;
    (0..n_out)
        .map(|k| {
            input
                .iter()
                .enumerate()
                .map(|(i, &x)| {
                    x * (std::f64::consts::PI * k as f64 * (i as f64 + 0.5) / n).cos()
                })
                .sum()
        })
        .collect()
}
