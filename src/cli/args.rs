use crate::core::types::OutputFormat;
use crate::core::yaml_layer::{Dialect, ReportFormat};
use clap::{Args, Subcommand};
use std::path::PathBuf;

#[derive(Args, Clone, Debug)]
pub struct GlobalArgs {
    /// Workspace holding stepline.toml and the .stepline/ state directory
    #[arg(long, global = true, default_value = ".", value_name = "PATH")]
    pub workspace: PathBuf,

    /// Explicit configuration file (default: <workspace>/stepline.toml)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Emit either terminal-friendly text or machine-readable JSON
    #[arg(long, global = true, value_name = "FORMAT")]
    pub format: Option<FormatArg>,
}

#[derive(Clone, Copy, clap::ValueEnum, Debug, PartialEq, Eq)]
pub enum FormatArg {
    /// Human-readable summary
    Text,
    /// JSON payload suitable for downstream tooling
    Json,
}

impl From<FormatArg> for OutputFormat {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::Text => OutputFormat::Text,
            FormatArg::Json => OutputFormat::Json,
        }
    }
}

#[derive(Clone, Copy, clap::ValueEnum, Debug, PartialEq, Eq)]
pub enum DialectArg {
    /// `test:`/`do:` with abbreviated action keys
    Compact,
    /// `name:`/`steps:` with full action names
    Simplified,
    /// Typed steps (`type`/`command`/`target`/`value`) with checkpoints
    Extended,
}

impl From<DialectArg> for Dialect {
    fn from(value: DialectArg) -> Self {
        match value {
            DialectArg::Compact => Dialect::Compact,
            DialectArg::Simplified => Dialect::Simplified,
            DialectArg::Extended => Dialect::Extended,
        }
    }
}

#[derive(Clone, Copy, clap::ValueEnum, Debug, PartialEq, Eq)]
pub enum ReportArg {
    Json,
    Html,
    Text,
}

impl From<ReportArg> for ReportFormat {
    fn from(value: ReportArg) -> Self {
        match value {
            ReportArg::Json => ReportFormat::Json,
            ReportArg::Html => ReportFormat::Html,
            ReportArg::Text => ReportFormat::Text,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum YamlCommand {
    #[command(
        about = "Report which dialect a document is written in",
        long_about = "Detect scores the document against every dialect and prints the winner, its confidence, all scores, and the structural signals that voted.",
        after_help = "Example:\n    stepline yaml detect tests/login.yaml --format json"
    )]
    Detect(DetectArgs),
    #[command(
        about = "Check a document and list every problem found",
        long_about = "Validate runs schema, semantic, cross-reference and best-practice checks and reports every issue with its code, path, suggestion and a fix example in the document's own dialect.",
        after_help = "Example:\n    stepline yaml validate tests/login.yaml --strict"
    )]
    Validate(ValidateArgs),
    #[command(
        about = "Compile a document into positioned instructions",
        long_about = "Compile validates the document, expands loops, blocks and static conditions, resolves variables and assigns checkpoint positions without contacting the step API.",
        after_help = "Example:\n    stepline yaml compile tests/login.yaml --target-checkpoint 1680"
    )]
    Compile(CompileArgs),
    #[command(
        about = "Compile documents and create their steps remotely",
        long_about = "Run compiles each document and dispatches the instructions in order to the step API, continuing from the session's next position. Documents appending to the same checkpoint run one after another, each continuing where the previous one stopped; documents bound to different checkpoints run side by side. Quoted wildcards such as 'tests/*.yaml' are expanded.",
        after_help = "Examples:\n    stepline yaml run tests/login.yaml\n    stepline yaml run 'tests/**/*.yaml' --report html\n    stepline yaml run tests/login.yaml --checkpoint 1680 --dry-run"
    )]
    Run(RunArgs),
    #[command(
        about = "Rewrite a document in another dialect",
        long_about = "Convert re-serializes the document in the target dialect and warns about fields the target cannot express.",
        after_help = "Example:\n    stepline yaml convert --from tests/login.yaml --to-format extended --output login.extended.yaml"
    )]
    Convert(ConvertArgs),
    #[command(
        about = "Write a compact test skeleton from a short description",
        long_about = "Generate picks a template whose keywords appear in the prompt (or the one named with --template), titles it with the prompt and validates the result. Templates in .stepline/templates/*.yaml extend or replace the built-in ones: login, purchase, search, form, navigation, data-driven, error-handling, conditional, api-setup, responsive, accessibility, performance.",
        after_help = "Examples:\n    stepline yaml generate \"user registration flow\" > registration.yaml\n    stepline yaml generate \"checkout as guest\" --template purchase --strict"
    )]
    Generate(GenerateArgs),
}

#[derive(Args, Debug)]
pub struct DetectArgs {
    /// YAML document to inspect
    #[arg(value_name = "FILE")]
    pub file: PathBuf,
}

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// YAML document to validate
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Skip detection and parse with this dialect
    #[arg(long, value_name = "DIALECT")]
    pub dialect: Option<DialectArg>,

    /// Treat best-practice warnings as failures
    #[arg(long)]
    pub strict: bool,
}

#[derive(Args, Debug)]
pub struct CompileArgs {
    /// YAML document to compile
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Skip detection and parse with this dialect
    #[arg(long, value_name = "DIALECT")]
    pub dialect: Option<DialectArg>,

    /// Remote checkpoint id for every checkpoint without an explicit one
    #[arg(long, value_name = "ID")]
    pub target_checkpoint: Option<String>,

    /// Number positions from the stored session instead of 1
    #[arg(long)]
    pub from_session: bool,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// One or more YAML documents to run
    #[arg(value_name = "FILE", required = true)]
    pub files: Vec<PathBuf>,

    /// Skip detection and parse with this dialect
    #[arg(long, value_name = "DIALECT")]
    pub dialect: Option<DialectArg>,

    /// Append to this checkpoint for this run only; the session file is not updated
    #[arg(long, value_name = "ID")]
    pub checkpoint: Option<String>,

    /// Keep going after a step exhausts its retries
    #[arg(long)]
    pub continue_on_error: bool,

    /// Print the resolved payloads instead of calling the step API
    #[arg(long)]
    pub dry_run: bool,

    /// Also write test-results.<ext> into the workspace
    #[arg(long, value_name = "FORMAT")]
    pub report: Option<ReportArg>,
}

#[derive(Args, Debug)]
pub struct GenerateArgs {
    /// What the test should cover, e.g. "login with a wrong password"
    #[arg(value_name = "PROMPT")]
    pub prompt: String,

    /// Use this template instead of matching the prompt
    #[arg(long, value_name = "NAME")]
    pub template: Option<String>,

    /// Fail when the generated document has best-practice warnings
    #[arg(long)]
    pub strict: bool,

    /// Write the document here instead of stdout
    #[arg(long, value_name = "FILE")]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct ConvertArgs {
    /// Document to convert
    #[arg(long = "from", value_name = "FILE")]
    pub from: PathBuf,

    /// Dialect to write
    #[arg(long = "to-format", value_name = "DIALECT")]
    pub to_format: DialectArg,

    /// Write the converted document here instead of stdout
    #[arg(long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Skip detection and parse the source with this dialect
    #[arg(long, value_name = "DIALECT")]
    pub dialect: Option<DialectArg>,
}

#[derive(Subcommand, Debug)]
pub enum SessionCommand {
    #[command(about = "Print the stored session")]
    Show,
    #[command(
        about = "Point the session at a checkpoint",
        after_help = "Example:\n    stepline session set --checkpoint 1680 --position 4"
    )]
    Set(SessionSetArgs),
    #[command(about = "Forget the checkpoint, position and captured values")]
    Reset,
}

#[derive(Args, Debug)]
pub struct SessionSetArgs {
    /// Remote checkpoint id new steps are appended to
    #[arg(long, value_name = "ID")]
    pub checkpoint: String,

    /// Position of the next step (default: 1)
    #[arg(long, value_name = "N")]
    pub position: Option<u32>,

    /// Keep the position fixed after each created step
    #[arg(long)]
    pub no_auto_increment: bool,
}
