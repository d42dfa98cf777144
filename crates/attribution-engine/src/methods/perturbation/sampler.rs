//! Perturbed variants of a sentence and their proximity weights.

use rand::seq::index;
use rand::Rng;

use crate::error::{AttributionError, AttributionResult};
use crate::tokenize::CONTINUATION_PREFIX;

/// Unit label: the word piece without its continuation marker.
pub fn unit_label(token: &str) -> &str {
    token.strip_prefix(CONTINUATION_PREFIX).unwrap_or(token)
}

/// Binary keep-masks over `units` positions.
///
/// Row 0 keeps everything. Every other row removes `k` distinct units with
/// `k` uniform in `[1, units]`. All sizes are drawn before any subset.
pub fn sample_masks<R: Rng + ?Sized>(units: usize, num_samples: usize, rng: &mut R) -> Vec<Vec<bool>> {
    let sizes: Vec<usize> = (1..num_samples).map(|_| rng.gen_range(1..=units)).collect();

    let mut masks = Vec::with_capacity(num_samples);
    masks.push(vec![true; units]);
    for size in sizes {
        let mut mask = vec![true; units];
        for removed in index::sample(rng, units, size) {
            mask[removed] = false;
        }
        masks.push(mask);
    }
    masks
}

/// Rebuild `text` with every removed unit's byte span replaced by `mask_token`.
pub fn render(
    text: &str,
    spans: &[(usize, usize)],
    keep: &[bool],
    mask_token: &str,
) -> AttributionResult<String> {
    let mut out = String::with_capacity(text.len() + mask_token.len() * spans.len());
    let mut cursor = 0;
    for (&(start, end), &kept) in spans.iter().zip(keep) {
        if kept || start < cursor {
            continue;
        }
        let before = text.get(cursor..start).ok_or_else(|| span_err(text, start, end))?;
        out.push_str(before);
        out.push_str(mask_token);
        cursor = end;
    }
    let rest = text.get(cursor..).ok_or_else(|| span_err(text, cursor, text.len()))?;
    out.push_str(rest);
    Ok(out)
}

fn span_err(text: &str, start: usize, end: usize) -> AttributionError {
    AttributionError::Tokenization {
        message: format!("offset {}..{} is not a valid span of '{}'", start, end, text),
    }
}

/// Cosine distance between a mask and the all-kept row, times 100.
///
/// An all-removed mask has distance 100.
pub fn distance(keep: &[bool]) -> f64 {
    let kept = keep.iter().filter(|&&k| k).count() as f64;
    let total = keep.len() as f64;
    if kept == 0.0 || total == 0.0 {
        return 100.0;
    }
    // <m, 1> / (|m| |1|) with binary m
    let cosine = kept / (kept.sqrt() * total.sqrt());
    (1.0 - cosine) * 100.0
}

/// `sqrt(exp(-d^2 / width^2))`
pub fn kernel(distance: f64, width: f64) -> f64 {
    (-(distance * distance) / (width * width)).exp().sqrt()
}
