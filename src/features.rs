//! Model-family detection and provider parameter tuning.
//!
//! All checks are case-insensitive substring matches and treat `None` as "no match".

use rand::Rng;

fn contains(haystack: Option<&str>, needle: &str) -> bool {
    haystack.is_some_and(|h| h.to_lowercase().contains(needle))
}

pub fn is_flux_model(url: Option<&str>) -> bool {
    contains(url, "flux")
}

pub fn is_sdxl_model(url: Option<&str>) -> bool {
    contains(url, "sdxl")
}

pub fn is_lightning_model(url: Option<&str>, model: Option<&str>) -> bool {
    contains(url, "lightning") || contains(model, "lightning")
}

pub fn is_redshift_model(model: Option<&str>) -> bool {
    contains(model, "redshift")
}

pub fn is_abyss_model(model: Option<&str>) -> bool {
    contains(model, "abyss")
}

pub const LIGHTNING_GUIDANCE: f64 = 1.0;
pub const REDSHIFT_DEFAULT_GUIDANCE: f64 = 5.0;
pub const REDSHIFT_MAX_GUIDANCE: f64 = 15.0;
pub const DEFAULT_GUIDANCE: f64 = 7.5;
pub const MAX_GUIDANCE: f64 = 20.0;
pub const MIN_GUIDANCE: f64 = 1.0;

/// Guidance scale Dezgo accepts for this model family.
/// Lightning distillations only behave at 1; Redshift degrades above 15.
pub fn compute_dezgo_guidance(url: Option<&str>, model: Option<&str>, requested: Option<f64>) -> f64 {
    let requested = requested.filter(|g| g.is_finite());

    if is_lightning_model(url, model) {
        return LIGHTNING_GUIDANCE;
    }

    if is_redshift_model(model) {
        return requested
            .unwrap_or(REDSHIFT_DEFAULT_GUIDANCE)
            .clamp(MIN_GUIDANCE, REDSHIFT_MAX_GUIDANCE);
    }

    // SDXL and everything else share the wide range.
    requested
        .unwrap_or(DEFAULT_GUIDANCE)
        .clamp(MIN_GUIDANCE, MAX_GUIDANCE)
}

pub fn generate_random_nine_digit_number() -> u64 {
    rand::thread_rng().gen_range(100_000_000..=999_999_999)
}
