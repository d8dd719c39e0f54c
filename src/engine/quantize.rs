//! Quantization type names understood by the backend's quantizer.
//!
//! Only parsing lives here. Requantizing a model is a backend operation; the
//! engine validates the requested type up front so a typo is rejected before
//! any file is touched.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use super::error::InferenceError;

/// A named quantization target with its llama.cpp file-type id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuantType {
    pub name: &'static str,
    pub ftype: u32,
    pub description: &'static str,
}

/// Known targets. Aliases share an id with their canonical entry; `COPY`
/// must stay after `F32` so id 0 resolves to `F32`.
pub const QUANT_TYPES: &[QuantType] = &[
    q("Q4_0", 2, "4.34G, +0.4685 ppl @ Llama-3-8B"),
    q("Q4_1", 3, "4.78G, +0.4511 ppl @ Llama-3-8B"),
    q("Q5_0", 8, "5.21G, +0.1316 ppl @ Llama-3-8B"),
    q("Q5_1", 9, "5.65G, +0.1062 ppl @ Llama-3-8B"),
    q("IQ2_XXS", 19, "2.06 bpw quantization"),
    q("IQ2_XS", 20, "2.31 bpw quantization"),
    q("IQ2_S", 28, "2.5 bpw quantization"),
    q("IQ2_M", 29, "2.7 bpw quantization"),
    q("IQ1_S", 24, "1.56 bpw quantization"),
    q("IQ1_M", 31, "1.75 bpw quantization"),
    q("TQ1_0", 36, "1.69 bpw ternarization"),
    q("TQ2_0", 37, "2.06 bpw ternarization"),
    q("Q2_K", 10, "2.96G, +3.5199 ppl @ Llama-3-8B"),
    q("Q2_K_S", 21, "2.96G, +3.1836 ppl @ Llama-3-8B"),
    q("IQ3_XXS", 23, "3.06 bpw quantization"),
    q("IQ3_S", 26, "3.44 bpw quantization"),
    q("IQ3_M", 27, "3.66 bpw quantization mix"),
    q("Q3_K", 12, "alias for Q3_K_M"),
    q("IQ3_XS", 22, "3.3 bpw quantization"),
    q("Q3_K_S", 11, "3.41G, +1.6321 ppl @ Llama-3-8B"),
    q("Q3_K_M", 12, "3.74G, +0.6569 ppl @ Llama-3-8B"),
    q("Q3_K_L", 13, "4.03G, +0.5562 ppl @ Llama-3-8B"),
    q("IQ4_NL", 25, "4.50 bpw non-linear quantization"),
    q("IQ4_XS", 30, "4.25 bpw non-linear quantization"),
    q("Q4_K", 15, "alias for Q4_K_M"),
    q("Q4_K_S", 14, "4.37G, +0.2689 ppl @ Llama-3-8B"),
    q("Q4_K_M", 15, "4.58G, +0.1754 ppl @ Llama-3-8B"),
    q("Q5_K", 17, "alias for Q5_K_M"),
    q("Q5_K_S", 16, "5.21G, +0.1049 ppl @ Llama-3-8B"),
    q("Q5_K_M", 17, "5.33G, +0.0569 ppl @ Llama-3-8B"),
    q("Q6_K", 18, "6.14G, +0.0217 ppl @ Llama-3-8B"),
    q("Q8_0", 7, "7.96G, +0.0026 ppl @ Llama-3-8B"),
    q("F16", 1, "14.00G, +0.0020 ppl @ Mistral-7B"),
    q("BF16", 32, "14.00G, -0.0050 ppl @ Mistral-7B"),
    q("F32", 0, "26.00G @ 7B"),
    q("COPY", 0, "only copy tensors, no quantizing"),
];

const fn q(name: &'static str, ftype: u32, description: &'static str) -> QuantType {
    QuantType { name, ftype, description }
}

impl QuantType {
    /// Look up by file-type id. The first table entry with that id wins.
    pub fn from_ftype(ftype: u32) -> Option<Self> {
        QUANT_TYPES.iter().copied().find(|t| t.ftype == ftype)
    }
}

impl FromStr for QuantType {
    type Err = InferenceError;

    /// Case-insensitive name lookup, then numeric id fallback.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        if let Some(found) = QUANT_TYPES.iter().find(|t| t.name.eq_ignore_ascii_case(wanted)) {
            return Ok(*found);
        }
        wanted
            .parse::<u32>()
            .ok()
            .and_then(Self::from_ftype)
            .ok_or_else(|| InferenceError::InvalidQuantType(wanted.to_string()))
    }
}

impl fmt::Display for QuantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (ftype {})", self.name, self.ftype)
    }
}
