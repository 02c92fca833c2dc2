pub mod args;
pub mod commands;

pub use args::{
    CompileArgs, ConvertArgs, DetectArgs, DialectArg, FormatArg, GenerateArgs, GlobalArgs,
    ReportArg, RunArgs, SessionCommand, SessionSetArgs, ValidateArgs, YamlCommand,
};
use clap::{Parser, Subcommand};

const HELP_TEMPLATE: &str = "\
{name} {version}\n\
{about-with-newline}\n\
USAGE:\n    {usage}\n\
\nOPTIONS:\n{options}\n\
COMMANDS:\n{subcommands}\n";

#[derive(Parser, Debug)]
#[command(name = "stepline")]
#[command(version = crate::VERSION)]
#[command(about = "Detect, validate, compile and run YAML browser-automation tests")]
#[command(help_template = HELP_TEMPLATE)]
#[command(
    after_long_help = "Typical flow: validate a document, set the session checkpoint, then run it; rerunning continues from the session's next position."
)]
pub struct Args {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    #[command(
        about = "Work with YAML test documents",
        long_about = "Yaml commands detect the dialect of a document, validate it, compile it into positioned instructions, run it against the step API, convert it to another dialect, or generate a new one from a prompt."
    )]
    Yaml {
        #[command(subcommand)]
        command: YamlCommand,
    },
    #[command(
        about = "Inspect or change where new steps are appended",
        long_about = "Session commands show, set or reset the checkpoint and next position stored in .stepline/session.json.",
        after_help = "Examples:\n    stepline session set --checkpoint 1680\n    stepline session show --format json"
    )]
    Session {
        #[command(subcommand)]
        command: SessionCommand,
    },
}

/// Process exit status for a finished command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    Success,
    /// The command ran but something it did failed (a step, a connection).
    Failure,
    /// The input was rejected (validation, detection, usage).
    Invalid,
}

impl Exit {
    pub fn code(self) -> i32 {
        match self {
            Exit::Success => 0,
            Exit::Failure => 1,
            Exit::Invalid => 2,
        }
    }
}

impl Args {
    /// JSON output was requested on the command line or through STEPLINE_OUTPUT_FORMAT.
    pub fn machine_output(&self) -> bool {
        match self.global.format {
            Some(format) => format == FormatArg::Json,
            None => std::env::var("STEPLINE_OUTPUT_FORMAT")
                .map(|value| value.trim().eq_ignore_ascii_case("json"))
                .unwrap_or(false),
        }
    }
}

pub async fn run(args: Args) -> crate::Result<Exit> {
    let global = args.global;
    match args.command {
        Command::Yaml { command } => match command {
            YamlCommand::Detect(detect_args) => commands::detect(&global, detect_args).await,
            YamlCommand::Validate(validate_args) => commands::validate(&global, validate_args).await,
            YamlCommand::Compile(compile_args) => commands::compile(&global, compile_args).await,
            YamlCommand::Run(run_args) => commands::run(&global, run_args).await,
            YamlCommand::Convert(convert_args) => commands::convert(&global, convert_args).await,
            YamlCommand::Generate(generate_args) => commands::generate(&global, generate_args).await,
        },
        Command::Session { command } => commands::session(&global, command).await,
    }
}
