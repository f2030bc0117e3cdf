//! Generation parameters and their binding onto prompt templates.
//!
//! Templates are exported from the server after a manual run, so node IDs
//! are stable per template. Each role has a default ID; when that ID is
//! absent the node is found by class type instead.

use std::path::Path;

use rand::Rng;
use serde_json::Value;

use crate::api_prompt::{ApiNode, ApiPrompt};
use crate::error::CoreError;
use crate::naming;

/// Upper bound (inclusive) for random noise seeds.
pub const MAX_SEED: u64 = 1 << 48;

/// Default clip size.
pub const DEFAULT_WIDTH: u32 = 832;
pub const DEFAULT_HEIGHT: u32 = 1216;
pub const DEFAULT_I2V_FRAMES: u32 = 25;
pub const DEFAULT_S2V_FRAMES: u32 = 77;

/// Frame count at which image-to-video switches to the long timeout.
pub const LONG_CLIP_FRAMES: u32 = 80;

/// A node role in a prompt template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    ImageLoader,
    LatentSize,
    Save,
    Sampler,
    PositiveText,
    NegativeText,
    AudioLoader,
    AudioTrim,
    AudioEncoder,
    VideoCombiner,
}

impl Role {
    /// Template node ID used when nothing overrides it.
    pub fn default_id(self) -> &'static str {
        match self {
            Role::ImageLoader => "97",
            Role::LatentSize => "98",
            Role::Save => "108",
            Role::Sampler => "86",
            Role::PositiveText => "93",
            Role::NegativeText => "89",
            Role::AudioLoader => "119",
            Role::AudioTrim => "121",
            Role::AudioEncoder => "122",
            Role::VideoCombiner => "94",
        }
    }

    /// Class types that can play this role, for discovery by type.
    fn class_types(self) -> &'static [&'static str] {
        match self {
            Role::ImageLoader => &["LoadImage"],
            Role::LatentSize => &["WanImageToVideo", "WanSoundImageToVideo", "EmptyLatentImage"],
            Role::Save => &["SaveVideo", "VHS_VideoCombine"],
            Role::Sampler => &["KSamplerAdvanced", "KSampler", "SamplerCustomAdvanced"],
            // Positive and negative both use the text encoder; by type, the
            // first one found is positive and the second negative.
            Role::PositiveText | Role::NegativeText => &["CLIPTextEncode"],
            Role::AudioLoader => &["LoadAudio"],
            Role::AudioTrim => &["TrimAudioDuration"],
            Role::AudioEncoder => &["AudioEncoderEncode"],
            Role::VideoCombiner => &["CreateVideo"],
        }
    }

    /// Roles the binder adds itself when a template lacks them.
    fn inserted_when_missing(self) -> bool {
        matches!(self, Role::AudioTrim)
    }

    fn name(self) -> &'static str {
        match self {
            Role::ImageLoader => "image loader",
            Role::LatentSize => "latent/size node",
            Role::Save => "save node",
            Role::Sampler => "sampler",
            Role::PositiveText => "positive prompt",
            Role::NegativeText => "negative prompt",
            Role::AudioLoader => "audio loader",
            Role::AudioTrim => "audio trim node",
            Role::AudioEncoder => "audio encoder",
            Role::VideoCombiner => "video combiner",
        }
    }
}

/// Resolve the node ID playing `role` in `prompt`.
pub fn resolve_role(prompt: &ApiPrompt, role: Role) -> Option<String> {
    let default = role.default_id();
    if prompt
        .node(default)
        .is_some_and(|n| role.class_types().contains(&n.class_type.as_str()))
    {
        return Some(default.to_string());
    }

    let candidates: Vec<&str> = role
        .class_types()
        .iter()
        .flat_map(|c| prompt.find_by_class(c))
        .collect();
    let pick = match role {
        Role::NegativeText => candidates.get(1),
        _ => candidates.first(),
    };
    match pick {
        Some(id) => {
            tracing::debug!(role = role.name(), node_id = *id, "Resolved role by class type");
            Some(id.to_string())
        }
        // Custom templates may use a different class at the default ID.
        None if prompt.contains(default) && !role.inserted_when_missing() => Some(default.to_string()),
        None => None,
    }
}

fn require_role(prompt: &ApiPrompt, role: Role) -> Result<String, CoreError> {
    resolve_role(prompt, role).ok_or_else(|| {
        CoreError::Validation(format!("Prompt template has no {}", role.name()))
    })
}

/// Random seed in `[0, 2^48]`.
pub fn random_seed() -> u64 {
    rand::rng().random_range(0..=MAX_SEED)
}

fn absolute(path: &Path) -> Result<String, CoreError> {
    let abs = std::path::absolute(path).map_err(|e| CoreError::io(path, e))?;
    Ok(abs.to_string_lossy().into_owned())
}

// ---------------------------------------------------------------------------
// Image-to-video
// ---------------------------------------------------------------------------

/// Parameters for an image-to-video job.
#[derive(Debug, Clone, PartialEq)]
pub struct I2vParams {
    pub image: std::path::PathBuf,
    pub width: u32,
    pub height: u32,
    pub frames: u32,
    pub positive: Option<String>,
    pub negative: Option<String>,
    /// Settings tag embedded in the output filename.
    pub settings: String,
    /// Fixed seed; random when `None`.
    pub seed: Option<u64>,
}

impl I2vParams {
    pub fn new(image: impl Into<std::path::PathBuf>) -> Self {
        Self {
            image: image.into(),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            frames: DEFAULT_I2V_FRAMES,
            positive: None,
            negative: None,
            settings: "4step_nosage".to_string(),
            seed: None,
        }
    }

    pub fn source_name(&self) -> String {
        naming::source_name(&self.image)
    }

    /// Default wall-clock timeout: longer clips get more time.
    pub fn default_timeout_secs(&self) -> u64 {
        if self.frames >= LONG_CLIP_FRAMES {
            720
        } else {
            600
        }
    }
}

/// Outcome of binding parameters onto a template.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundPrompt {
    pub prompt: ApiPrompt,
    pub seed: u64,
    pub filename_prefix: String,
    pub source_name: String,
}

/// Bind image-to-video parameters onto a template.
pub fn apply_i2v(mut prompt: ApiPrompt, params: &I2vParams) -> Result<BoundPrompt, CoreError> {
    if params.frames == 0 {
        return Err(CoreError::Validation("Frame count must be positive".to_string()));
    }
    let source_name = params.source_name();
    let filename_prefix =
        naming::video_filename_prefix(&source_name, params.frames, &[params.settings.as_str()]);
    let seed = params.seed.unwrap_or_else(random_seed);

    let image = require_role(&prompt, Role::ImageLoader)?;
    let latent = require_role(&prompt, Role::LatentSize)?;
    let save = require_role(&prompt, Role::Save)?;
    let sampler = require_role(&prompt, Role::Sampler)?;

    prompt.set_input(&image, "image", absolute(&params.image)?)?;
    set_size(&mut prompt, &latent, params.width, params.height, params.frames)?;
    prompt.set_input(&save, "filename_prefix", filename_prefix.clone())?;
    set_seed(&mut prompt, &sampler, seed)?;
    set_texts(&mut prompt, params.positive.as_deref(), params.negative.as_deref())?;

    prompt.validate_references()?;
    tracing::info!(
        source = %source_name,
        width = params.width,
        height = params.height,
        frames = params.frames,
        seed,
        "Bound image-to-video parameters",
    );
    Ok(BoundPrompt {
        prompt,
        seed,
        filename_prefix,
        source_name,
    })
}

fn set_size(prompt: &mut ApiPrompt, id: &str, width: u32, height: u32, frames: u32) -> Result<(), CoreError> {
    prompt.set_input(id, "width", width)?;
    prompt.set_input(id, "height", height)?;
    prompt.set_input(id, "length", frames)
}

/// Samplers name the seed input differently.
fn set_seed(prompt: &mut ApiPrompt, id: &str, seed: u64) -> Result<(), CoreError> {
    let name = match prompt.node(id) {
        Some(n) if n.inputs.contains_key("seed") => "seed",
        _ => "noise_seed",
    };
    prompt.set_input(id, name, seed)
}

fn set_texts(prompt: &mut ApiPrompt, positive: Option<&str>, negative: Option<&str>) -> Result<(), CoreError> {
    if let Some(text) = positive {
        let id = require_role(prompt, Role::PositiveText)?;
        prompt.set_input(&id, "text", text)?;
    }
    if let Some(text) = negative {
        let id = require_role(prompt, Role::NegativeText)?;
        prompt.set_input(&id, "text", text)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Sound-to-video
// ---------------------------------------------------------------------------

/// Parameters for a sound-to-video job.
#[derive(Debug, Clone, PartialEq)]
pub struct S2vParams {
    pub audio: std::path::PathBuf,
    pub ref_image: Option<std::path::PathBuf>,
    pub width: u32,
    pub height: u32,
    pub frames: u32,
    pub positive: Option<String>,
    pub negative: Option<String>,
    pub settings: String,
    pub seed: Option<u64>,
    /// Start offset into the audio, seconds.
    pub audio_start: f64,
    /// Audio length to use, seconds; `frames / 16` when `None`.
    pub audio_duration: Option<f64>,
}

impl S2vParams {
    pub fn new(audio: impl Into<std::path::PathBuf>) -> Self {
        Self {
            audio: audio.into(),
            ref_image: None,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            frames: DEFAULT_S2V_FRAMES,
            positive: None,
            negative: None,
            settings: "s2v".to_string(),
            seed: None,
            audio_start: 0.0,
            audio_duration: None,
        }
    }

    pub fn source_name(&self) -> String {
        naming::source_name(&self.audio)
    }

    pub fn effective_audio_duration(&self) -> f64 {
        self.audio_duration
            .unwrap_or(self.frames as f64 / naming::MODEL_FPS as f64)
    }

    pub fn default_timeout_secs(&self) -> u64 {
        1200
    }
}

/// Audio container formats the server's loader accepts.
pub const SUPPORTED_AUDIO_EXTENSIONS: &[&str] = &["wav", "mp3", "m4a", "aac", "flac", "ogg", "opus", "wma"];

pub fn is_supported_audio(path: &Path) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .is_some_and(|e| SUPPORTED_AUDIO_EXTENSIONS.contains(&e.as_str()))
}

/// Bind sound-to-video parameters onto a template.
///
/// Audio always passes through a trim node; one is added when the
/// template lacks it, and the encoder and video combiner are rewired to
/// read from it.
pub fn apply_s2v(mut prompt: ApiPrompt, params: &S2vParams) -> Result<BoundPrompt, CoreError> {
    if params.frames == 0 {
        return Err(CoreError::Validation("Frame count must be positive".to_string()));
    }
    if params.audio_start < 0.0 {
        return Err(CoreError::Validation("Audio start must not be negative".to_string()));
    }

    let source_name = params.source_name();
    let ref_tag = if params.ref_image.is_some() { "with_ref" } else { "no_ref" };
    let filename_prefix = naming::video_filename_prefix(
        &source_name,
        params.frames,
        &[ref_tag, params.settings.as_str()],
    );
    let seed = params.seed.unwrap_or_else(random_seed);

    let audio = require_role(&prompt, Role::AudioLoader)?;
    let latent = require_role(&prompt, Role::LatentSize)?;
    let save = require_role(&prompt, Role::Save)?;
    let sampler = require_role(&prompt, Role::Sampler)?;

    prompt.set_input(&audio, "audio", absolute(&params.audio)?)?;

    let trim = match resolve_role(&prompt, Role::AudioTrim) {
        Some(id) => id,
        None => {
            let id = prompt.free_id(Role::AudioTrim.default_id());
            prompt.insert_node(id.clone(), ApiNode::new("TrimAudioDuration", Some("Trim Audio")));
            id
        }
    };
    prompt.connect(&trim, "audio", &audio, 0)?;
    prompt.set_input(&trim, "start_index", params.audio_start)?;
    prompt.set_input(&trim, "duration", params.effective_audio_duration())?;

    for role in [Role::AudioEncoder, Role::VideoCombiner] {
        match resolve_role(&prompt, role) {
            Some(id) => prompt.connect(&id, "audio", &trim, 0)?,
            None => tracing::warn!(role = role.name(), "Template has no node for role, audio not rewired"),
        }
    }

    match &params.ref_image {
        Some(image) => {
            let loader = require_role(&prompt, Role::ImageLoader)?;
            prompt.set_input(&loader, "image", absolute(image)?)?;
            prompt.connect(&latent, "ref_image", &loader, 0)?;
        }
        None => {
            prompt.remove_input(&latent, "ref_image")?;
        }
    }

    set_size(&mut prompt, &latent, params.width, params.height, params.frames)?;
    prompt.set_input(&save, "filename_prefix", filename_prefix.clone())?;
    set_seed(&mut prompt, &sampler, seed)?;
    set_texts(&mut prompt, params.positive.as_deref(), params.negative.as_deref())?;

    prompt.validate_references()?;
    tracing::info!(
        source = %source_name,
        frames = params.frames,
        audio_start = params.audio_start,
        audio_duration = params.effective_audio_duration(),
        with_ref = params.ref_image.is_some(),
        seed,
        "Bound sound-to-video parameters",
    );
    Ok(BoundPrompt {
        prompt,
        seed,
        filename_prefix,
        source_name,
    })
}

/// Literal value of an input, for display.
pub fn input_value<'a>(prompt: &'a ApiPrompt, id: &str, name: &str) -> Option<&'a Value> {
    prompt.node(id)?.inputs.get(name)
}
