use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use comfyctl_core::edit::TypeMatcher;
use comfyctl_core::types::{NodeId, SlotIndex};
use comfyctl_pipeline::interpolate::Method;

#[derive(Debug, Parser)]
#[command(name = "comfyctl")]
#[command(version, about = "Edit ComfyUI workflows, drive its job queue and post-process videos", long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Args)]
pub struct GlobalArgs {
    /// Server base URL (overrides COMFYUI_URL)
    #[arg(long, global = true)]
    pub url: Option<String>,

    /// Server output directory (overrides COMFYUI_OUTPUT_DIR)
    #[arg(long, global = true)]
    pub output_dir: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Insert a node into an existing link
    Splice(SpliceArgs),

    /// Insert GPU-unload nodes between the two sampler passes
    InsertUnload(InsertUnloadArgs),

    /// Remove pass-through nodes, reconnecting their neighbours
    RemoveNode(RemoveNodeArgs),

    /// Set the mode (active, muted, bypass) of matching nodes
    SetMode(SetModeArgs),

    /// Set one widget value on matching nodes
    SetWidget(SetWidgetArgs),

    /// Check workflow files for referential-integrity problems
    Validate(ValidateArgs),

    /// Summarise a workflow's nodes, loaders and samplers
    Inspect(InspectArgs),

    /// Compare the node make-up of two workflows
    Compare(CompareArgs),

    /// Extract a workflow embedded in a saved web page
    ExtractHtml(ExtractHtmlArgs),

    /// Report node types the server does not have installed
    CheckNodes(CheckNodesArgs),

    /// Queue an API-format prompt
    Submit(SubmitArgs),

    /// Show a prompt's state, or the queue when no ID is given
    Status(StatusArgs),

    /// Generate a video from an image
    Generate(GenerateArgs),

    /// Generate a video driven by an audio track
    SoundVideo(SoundVideoArgs),

    /// Raise a video's frame rate with the external interpolator
    Interpolate(InterpolateArgs),

    /// Re-encode videos as H.264
    Reencode(ReencodeArgs),

    /// Time image-to-video generation across frame counts
    Benchmark(BenchmarkArgs),
}

// ---------------------------------------------------------------------------
// Shared argument groups
// ---------------------------------------------------------------------------

/// Workflow file in, optional file out.
#[derive(Debug, Clone, Args)]
pub struct EditIo {
    /// Workflow JSON file
    pub input: PathBuf,

    /// Where to write the result (defaults to overwriting the input)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Pretty-print the written JSON
    #[arg(long)]
    pub pretty: bool,

    /// Give the written workflow a fresh document ID
    #[arg(long)]
    pub new_id: bool,

    /// Show what would change without writing
    #[arg(long)]
    pub dry_run: bool,
}

/// Selects nodes by type.
#[derive(Debug, Clone, Args)]
#[group(required = true, multiple = false)]
pub struct MatcherArgs {
    /// Exact node type
    #[arg(long = "type", value_name = "TYPE")]
    pub exact: Option<String>,

    /// Substring of the node type
    #[arg(long, value_name = "TEXT")]
    pub type_contains: Option<String>,
}

impl MatcherArgs {
    pub fn matcher(&self) -> TypeMatcher {
        match (&self.exact, &self.type_contains) {
            (Some(t), _) => TypeMatcher::Exact(t.clone()),
            (None, Some(s)) => TypeMatcher::Contains(s.clone()),
            // The argument group guarantees one of the two.
            (None, None) => TypeMatcher::Contains(String::new()),
        }
    }
}

/// Addresses a link by ID or by its endpoints.
#[derive(Debug, Clone, Args)]
pub struct LinkTarget {
    /// Link ID to splice into
    #[arg(long, conflicts_with = "between")]
    pub link: Option<i64>,

    /// Source and destination node IDs of the link
    #[arg(long, num_args = 2, value_names = ["SRC", "DST"])]
    pub between: Option<Vec<NodeId>>,

    /// Destination input slot, when several links join the two nodes
    #[arg(long, requires = "between")]
    pub slot: Option<SlotIndex>,
}

/// `NAME:TYPE:NODE[:SLOT]` auxiliary input wired from an existing output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuxArg {
    pub name: String,
    pub slot_type: String,
    pub source: (NodeId, SlotIndex),
}

pub fn parse_aux(s: &str) -> Result<AuxArg, String> {
    let parts: Vec<&str> = s.split(':').collect();
    let (name, slot_type, node, slot) = match parts.as_slice() {
        [name, ty, node] => (*name, *ty, *node, "0"),
        [name, ty, node, slot] => (*name, *ty, *node, *slot),
        _ => return Err(format!("expected NAME:TYPE:NODE[:SLOT], got '{s}'")),
    };
    let node = node.parse().map_err(|_| format!("invalid node ID '{node}'"))?;
    let slot = slot.parse().map_err(|_| format!("invalid slot '{slot}'"))?;
    Ok(AuxArg {
        name: name.to_string(),
        slot_type: slot_type.to_string(),
        source: (node, slot),
    })
}

/// `NODE[:SLOT]` output reference.
pub fn parse_output_ref(s: &str) -> Result<(NodeId, SlotIndex), String> {
    let (node, slot) = s.split_once(':').unwrap_or((s, "0"));
    let node = node.parse().map_err(|_| format!("invalid node ID '{node}'"))?;
    let slot = slot.parse().map_err(|_| format!("invalid slot '{slot}'"))?;
    Ok((node, slot))
}

/// H.264 output options.
#[derive(Debug, Clone, Args)]
pub struct EncodeArgs {
    /// Constant rate factor (lower is better quality)
    #[arg(long)]
    pub crf: Option<u8>,

    /// x264 preset
    #[arg(long, default_value = "medium", value_parser = clap::builder::PossibleValuesParser::new(comfyctl_core::ffmpeg::PRESETS.iter().copied()))]
    pub preset: String,

    /// Target bitrate such as 2M; overrides --crf
    #[arg(long)]
    pub bitrate: Option<String>,
}

/// Options shared by the generation commands.
#[derive(Debug, Clone, Args)]
pub struct RenderArgs {
    #[arg(long, default_value_t = comfyctl_core::generation::DEFAULT_WIDTH)]
    pub width: u32,

    #[arg(long, default_value_t = comfyctl_core::generation::DEFAULT_HEIGHT)]
    pub height: u32,

    /// Positive prompt text
    #[arg(long)]
    pub positive: Option<String>,

    /// Negative prompt text
    #[arg(long)]
    pub negative: Option<String>,

    /// Fixed seed (random when omitted)
    #[arg(long)]
    pub seed: Option<u64>,

    /// Wall-clock limit in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Save the bound prompt to this file instead of submitting it
    #[arg(long, value_name = "FILE")]
    pub dump_prompt: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Graph commands
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Args)]
pub struct SpliceArgs {
    #[command(flatten)]
    pub io: EditIo,

    #[command(flatten)]
    pub target: LinkTarget,

    /// Built-in node preset
    #[arg(long, conflicts_with = "node_type",
          value_parser = clap::builder::PossibleValuesParser::new(comfyctl_core::presets::PRESET_NAMES.iter().copied()))]
    pub preset: Option<String>,

    /// Type of a custom node to insert
    #[arg(long)]
    pub node_type: Option<String>,

    #[arg(long)]
    pub title: Option<String>,

    /// Node ID to use instead of the next free one
    #[arg(long)]
    pub id: Option<NodeId>,

    /// Primary input slot as NAME:TYPE
    #[arg(long, default_value = "anything:*")]
    pub input_slot: String,

    /// Output slot as NAME:TYPE
    #[arg(long, default_value = "output:*")]
    pub output_slot: String,

    /// Extra input wired from an existing output, NAME:TYPE:NODE[:SLOT]
    #[arg(long = "aux", value_parser = parse_aux)]
    pub aux: Vec<AuxArg>,

    /// Widget values as a JSON array
    #[arg(long)]
    pub widgets: Option<String>,
}

#[derive(Debug, Clone, Args)]
pub struct InsertUnloadArgs {
    #[command(flatten)]
    pub io: EditIo,

    #[command(flatten)]
    pub target: LinkTarget,

    /// Insert a delete-model pass-through fed from NODE[:SLOT] instead of
    /// the unload/clear-cache pair
    #[arg(long, value_name = "NODE[:SLOT]", value_parser = parse_output_ref)]
    pub delete_model: Option<(NodeId, SlotIndex)>,
}

#[derive(Debug, Clone, Args)]
pub struct RemoveNodeArgs {
    #[command(flatten)]
    pub io: EditIo,

    /// Node ID to remove (repeatable)
    #[arg(long = "id")]
    pub ids: Vec<NodeId>,

    /// Remove every node of exactly this type
    #[arg(long = "type", value_name = "TYPE")]
    pub exact: Option<String>,

    /// Remove every node whose type contains this text
    #[arg(long, value_name = "TEXT")]
    pub type_contains: Option<String>,
}

#[derive(Debug, Clone, Args)]
pub struct SetModeArgs {
    #[command(flatten)]
    pub io: EditIo,

    #[command(flatten)]
    pub matcher: MatcherArgs,

    /// active, muted or bypass (or 0, 2, 4)
    #[arg(long)]
    pub mode: String,
}

#[derive(Debug, Clone, Args)]
pub struct SetWidgetArgs {
    #[command(flatten)]
    pub io: EditIo,

    #[command(flatten)]
    pub matcher: MatcherArgs,

    /// Position in widgets_values
    #[arg(long)]
    pub index: usize,

    /// New value; parsed as JSON, otherwise taken as a string
    #[arg(long, allow_hyphen_values = true)]
    pub value: String,
}

#[derive(Debug, Clone, Args)]
pub struct ValidateArgs {
    /// Workflow or API-format prompt files
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
}

#[derive(Debug, Clone, Args)]
pub struct InspectArgs {
    pub input: PathBuf,

    /// Print the summary as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Clone, Args)]
pub struct CompareArgs {
    pub left: PathBuf,
    pub right: PathBuf,

    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Clone, Args)]
pub struct ExtractHtmlArgs {
    /// Saved HTML page
    pub input: PathBuf,

    /// Output JSON file (defaults to the page name with .json)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Queue commands
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Args)]
pub struct CheckNodesArgs {
    /// Workflow or API-format prompt file
    pub input: PathBuf,
}

#[derive(Debug, Clone, Args)]
pub struct SubmitArgs {
    /// API-format prompt file
    pub input: PathBuf,

    /// Wait for completion and print the output path
    #[arg(long)]
    pub wait: bool,

    /// Wall-clock limit in seconds when waiting
    #[arg(long, default_value_t = 600)]
    pub timeout: u64,
}

#[derive(Debug, Clone, Args)]
pub struct StatusArgs {
    pub prompt_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Generation commands
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Args)]
pub struct GenerateArgs {
    /// Source image
    pub image: PathBuf,

    /// API-format image-to-video template
    #[arg(long, env = "I2V_TEMPLATE")]
    pub template: PathBuf,

    #[arg(long, default_value_t = comfyctl_core::generation::DEFAULT_I2V_FRAMES)]
    pub frames: u32,

    /// Settings tag embedded in the output name
    #[arg(long, default_value = "4step_nosage")]
    pub settings: String,

    #[command(flatten)]
    pub render: RenderArgs,

    /// Interpolate the result afterwards
    #[arg(long)]
    pub interpolate: bool,

    #[arg(long, default_value = "film")]
    pub method: Method,

    #[command(flatten)]
    pub encode: EncodeArgs,
}

#[derive(Debug, Clone, Args)]
pub struct SoundVideoArgs {
    /// Audio track
    pub audio: PathBuf,

    /// API-format sound-to-video template
    #[arg(long, env = "S2V_TEMPLATE")]
    pub template: PathBuf,

    /// Reference image
    #[arg(long)]
    pub ref_image: Option<PathBuf>,

    #[arg(long, default_value_t = comfyctl_core::generation::DEFAULT_S2V_FRAMES)]
    pub frames: u32,

    /// Audio start offset in seconds
    #[arg(long, default_value_t = 0.0)]
    pub audio_start: f64,

    /// Audio length in seconds (defaults to frames / 16)
    #[arg(long)]
    pub audio_duration: Option<f64>,

    #[arg(long, default_value = "s2v")]
    pub settings: String,

    #[command(flatten)]
    pub render: RenderArgs,
}

#[derive(Debug, Clone, Args)]
pub struct BenchmarkArgs {
    /// Test image
    #[arg(long)]
    pub image: PathBuf,

    #[arg(long, env = "I2V_TEMPLATE")]
    pub template: PathBuf,

    /// Comma-separated frame counts
    #[arg(long, default_value = "25,49,81")]
    pub frames: String,

    #[arg(long, default_value_t = comfyctl_core::generation::DEFAULT_WIDTH)]
    pub width: u32,

    #[arg(long, default_value_t = comfyctl_core::generation::DEFAULT_HEIGHT)]
    pub height: u32,

    #[arg(long, default_value = "4step_nosage")]
    pub settings: String,

    /// Per-run limit in seconds
    #[arg(long, default_value_t = 600)]
    pub timeout: u64,

    /// Report path (defaults to benchmarks/benchmark_<timestamp>.json)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Media commands
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Args)]
pub struct InterpolateArgs {
    pub input: PathBuf,

    #[arg(short, long)]
    pub output: Option<PathBuf>,

    #[arg(long, default_value = "film")]
    pub method: Method,

    /// Frame-rate multiplier
    #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(u32).range(2..))]
    pub multiplier: u32,

    /// Keep the extracted and interpolated frames
    #[arg(long)]
    pub keep_frames: bool,

    /// Drop the source's audio track
    #[arg(long)]
    pub no_audio: bool,

    /// Attempts for the interpolation step
    #[arg(long, default_value_t = 3)]
    pub attempts: u32,

    /// Limit for the interpolator process, seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    #[command(flatten)]
    pub encode: EncodeArgs,
}

#[derive(Debug, Clone, Args)]
pub struct ReencodeArgs {
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,

    /// Output file (single input only)
    #[arg(short, long, conflicts_with = "in_place")]
    pub output: Option<PathBuf>,

    /// Replace each input with its re-encoded version
    #[arg(long)]
    pub in_place: bool,

    #[command(flatten)]
    pub encode: EncodeArgs,
}
