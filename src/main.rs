use clap::Parser;
use serde_json::json;
use stepline::cli::{self, Args, Exit};
use stepline::core::{AppError, ErrorCategory};
use std::process::ExitCode;

fn exit_for(err: &anyhow::Error) -> Exit {
    match err.downcast_ref::<AppError>().map(|err| err.category) {
        Some(
            ErrorCategory::DetectionError
            | ErrorCategory::NormalizationError
            | ErrorCategory::ValidationError
            | ErrorCategory::CompilationError
            | ErrorCategory::ConfigError,
        ) => Exit::Invalid,
        _ => Exit::Failure,
    }
}

fn report_error(err: &anyhow::Error, machine_output: bool) {
    match err.downcast_ref::<AppError>() {
        Some(app) if machine_output => {
            let payload = json!({
                "error": {
                    "code": app.code,
                    "category": app.category,
                    "message": app.message,
                    "context": app.context,
                    "suggestions": app.recovery_suggestions,
                }
            });
            println!("{}", serde_json::to_string_pretty(&payload).unwrap_or_default());
        }
        Some(app) => {
            eprintln!("error: {}", app);
            for (key, value) in &app.context {
                if key == "path" {
                    continue;
                }
                for (index, line) in value.lines().enumerate() {
                    if index == 0 {
                        eprintln!("  {}: {}", key, line);
                    } else {
                        eprintln!("    {}", line);
                    }
                }
            }
            for suggestion in &app.recovery_suggestions {
                eprintln!("  hint: {}", suggestion);
            }
        }
        None if machine_output => {
            let payload = json!({"error": {"message": format!("{:#}", err)}});
            println!("{}", serde_json::to_string_pretty(&payload).unwrap_or_default());
        }
        None => eprintln!("error: {:#}", err),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let machine_output = args.machine_output();

    let _logging = match stepline::logging::init(Some(&args.global.workspace), machine_output) {
        Ok(guard) => Some(guard),
        Err(err) => {
            eprintln!("warning: logging disabled: {:#}", err);
            None
        }
    };

    let exit = match cli::run(args).await {
        Ok(exit) => exit,
        Err(err) => {
            tracing::error!("command failed: {:#}", err);
            report_error(&err, machine_output);
            exit_for(&err)
        }
    };
    ExitCode::from(exit.code() as u8)
}
