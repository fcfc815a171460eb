//! Memory quantities.
//!
//! Endpoints carry memory as whole mebibytes. Providers take and report
//! Kubernetes-style quantities, which default to decimal SI units, so the
//! binary suffix must always be spelled out.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Error, Result};

/// Memory assigned when an endpoint does not specify any.
pub const DEFAULT_MEMORY_MB: u32 = 256;

/// Memory sizes an endpoint may request, in MiB.
pub const MEMORY_OPTIONS: [u32; 9] = [128, 256, 512, 1024, 2048, 4096, 8192, 16384, 32768];

static QUANTITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9]+(?:\.[0-9]*)?)(?:(Ki|Mi|Gi|Ti|k|M|G|T)|[eE]([0-9]+))?$")
        .expect("memory quantity regex is valid")
});

const MEBIBYTE: f64 = 1_048_576.0;

fn bytes_per_unit(suffix: &str) -> f64 {
    match suffix {
        "k" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "Ki" => 1024.0,
        "Mi" => MEBIBYTE,
        "Gi" => 1_073_741_824.0,
        "Ti" => 1_099_511_627_776.0,
        _ => 1.0,
    }
}

/// Whether `mb` is one of [`MEMORY_OPTIONS`].
#[must_use]
pub fn is_valid_memory_option(mb: u32) -> bool {
    MEMORY_OPTIONS.contains(&mb)
}

/// Human-readable name of a memory option (`"256MB"`, `"2GB"`).
#[must_use]
pub fn memory_option_display_name(mb: u32) -> String {
    if mb >= 1024 && mb % 1024 == 0 {
        format!("{}GB", mb / 1024)
    } else {
        format!("{mb}MB")
    }
}

/// CPU the managed-functions platform allocates for a memory size.
///
/// Sizes between options get the CPU of the next larger option.
#[must_use]
pub fn memory_to_gen2_cpu(mb: u32) -> f64 {
    match mb {
        0..=128 => 0.083,
        129..=256 => 0.167,
        257..=512 => 0.333,
        513..=1024 => 0.583,
        1025..=2048 => 1.0,
        2049..=8192 => 2.0,
        8193..=16384 => 4.0,
        _ => 8.0,
    }
}

/// Render whole mebibytes as a binary-suffixed quantity.
///
/// Sizes above 1 GiB that are whole gibibytes use `Gi`, everything else `Mi`.
#[must_use]
pub fn render_memory(mb: u32) -> String {
    if mb > 1024 && mb % 1024 == 0 {
        format!("{}Gi", mb / 1024)
    } else {
        format!("{mb}Mi")
    }
}

/// Parse a quantity (`"256Mi"`, `"1G"`, `"1.5e9"`, `"268435456"`) into MiB.
///
/// # Errors
/// Returns [`Error::MalformedProviderData`] when the quantity cannot be parsed.
pub fn mebibytes(quantity: &str) -> Result<f64> {
    let malformed = || Error::MalformedProviderData(format!("invalid memory quantity {quantity:?}"));

    let caps = QUANTITY.captures(quantity).ok_or_else(malformed)?;
    let amount: f64 = caps[1].parse().map_err(|_| malformed())?;

    let bytes = if let Some(exponent) = caps.get(3) {
        let exponent: i32 = exponent.as_str().parse().map_err(|_| malformed())?;
        amount * 10f64.powi(exponent)
    } else {
        amount * bytes_per_unit(caps.get(2).map_or("", |m| m.as_str()))
    };

    if !bytes.is_finite() {
        return Err(malformed());
    }
    Ok(bytes / MEBIBYTE)
}

/// Parse a quantity into MiB, as stored on an endpoint.
///
/// Decimal quantities are rounded to the nearest MiB, so `"1G"` is 954.
///
/// # Errors
/// Returns [`Error::MalformedProviderData`] when the quantity is malformed or
/// does not fit in 32 bits of MiB.
pub fn parse_memory(quantity: &str) -> Result<u32> {
    let mb = mebibytes(quantity)?.round();
    if mb > f64::from(u32::MAX) {
        return Err(Error::MalformedProviderData(format!(
            "memory quantity {quantity:?} is out of range"
        )));
    }
    // Non-negative and range checked above.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    Ok(mb as u32)
}
