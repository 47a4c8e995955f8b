use schemars::JsonSchema;
use serde::Deserialize;

use crate::dispatch::GenerateOptions;

/// Knobs shared by every generation tool. Providers ignore what they cannot use.
#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct ImageSettings {
    /// Classifier-free guidance. Accepted range 0-20; Dezgo clamps further per model family.
    pub guidance: Option<f64>,
    /// Caller identifier forwarded to vendors that accept one (OpenAI `user`).
    pub user_id: Option<String>,
    /// Output size as WIDTHxHEIGHT (OpenAI, Google). Overrides the catalog default.
    pub size: Option<String>,
    /// "standard" or "hd" (OpenAI); "hd"/"high" requests 2K output on Google.
    pub quality: Option<String>,
    /// Fixed seed for reproducible output (Dezgo, Google).
    pub seed: Option<u64>,
    /// Pixel width (Dezgo).
    pub width: Option<u32>,
    /// Pixel height (Dezgo).
    pub height: Option<u32>,
    /// Things to keep out of the image (Dezgo, Google).
    pub negative_prompt: Option<String>,
    /// Sampling steps (Dezgo).
    pub steps: Option<u32>,
}

impl ImageSettings {
    pub fn to_options(&self) -> GenerateOptions {
        GenerateOptions {
            size: self.size.clone(),
            quality: self.quality.clone(),
            seed: self.seed,
            width: self.width,
            height: self.height,
            negative_prompt: self.negative_prompt.clone(),
            steps: self.steps,
            ..Default::default()
        }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GenerateImageRequest {
    /// Provider key from `list_providers` (a catalog entry, not a vendor name).
    pub provider: String,
    /// Text description of the image.
    pub prompt: String,
    #[serde(flatten)]
    pub settings: ImageSettings,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GenerateMultipleRequest {
    /// Provider keys to run concurrently. One result per key, in order.
    pub providers: Vec<String>,
    pub prompt: String,
    #[serde(flatten)]
    pub settings: ImageSettings,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GenerateRandomRequest {
    /// Candidate provider keys. With `seed`, the pick is `seed % len`.
    pub providers: Vec<String>,
    pub prompt: String,
    #[serde(flatten)]
    pub settings: ImageSettings,
}
