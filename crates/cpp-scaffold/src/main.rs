//! cpp-scaffold - create C/C++ projects from archives and git repositories

mod cli;
mod display;
mod hook;

use anyhow::Result;
use clap::Parser;
use cli::{Args, Command, PostArgs};
use colored::Colorize;
use display::SharedProgress;
use hook::GitignoreHook;
use scaffold_acquire::{
    AcquireConfig, AcquireRequest, AcquisitionPipeline, ErrorKind, Materialized, NameAdaptation,
    ToolTable,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Spinner refresh rate
const REFRESH: Duration = Duration::from_millis(100);

/// Exit status after Ctrl+C, as shells report SIGINT
const EXIT_CANCELLED: i32 = 130;

#[tokio::main]
async fn main() -> Result<()> {
    // Ensure terminal cursor is restored on panic
    let default_panic = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let _ = console::Term::stderr().show_cursor();
        default_panic(info);
    }));

    init_logging();

    // First Ctrl+C cancels the run cooperatively, a second one exits at once
    let cancel = CancellationToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || {
        if handler_token.is_cancelled() {
            let _ = console::Term::stderr().show_cursor();
            std::process::exit(EXIT_CANCELLED);
        }
        handler_token.cancel();
    })
    .ok();

    let args = Args::parse();
    let tools = ToolTable::probe();

    let result = match args.command {
        Command::Archive(archive_args) => {
            let request = archive_args.request()?;
            create(&tools, request, &archive_args.post, &cancel).await
        }
        Command::Git(git_args) => {
            let request = git_args.request()?;
            create(&tools, request, &git_args.post, &cancel).await
        }
        Command::Tools => {
            show_tools(&tools);
            Ok(())
        }
    };

    // Ensure cursor is visible on normal exit
    let _ = console::Term::stderr().show_cursor();

    result
}

/// Structured logs go to stderr; `RUST_LOG` overrides the default `warn`
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();
}

async fn create(
    tools: &ToolTable,
    request: AcquireRequest,
    post: &PostArgs,
    cancel: &CancellationToken,
) -> Result<()> {
    cliclack::intro("cpp-scaffold")?;

    let mut pipeline = AcquisitionPipeline::from_tools(tools, AcquireConfig::from_env())?;
    if !post.no_gitignore {
        pipeline = pipeline.with_hook(Arc::new(GitignoreHook));
    }

    let progress = SharedProgress::new(!request.source.is_git());
    let spinner = cliclack::spinner();
    spinner.start(progress.message());

    let run = pipeline.run(&request, &progress, cancel);
    tokio::pin!(run);
    let mut ticker = tokio::time::interval(REFRESH);

    let outcome = loop {
        tokio::select! {
            outcome = &mut run => break outcome,
            _ = ticker.tick() => spinner.set_message(progress.message()),
        }
    };

    match outcome {
        Ok(done) => {
            spinner.stop(format!(
                "Created {} ({} files)",
                done.project_root.display(),
                done.units
            ));
            report(&done)?;
            print_next_steps(&done.project_root)?;
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::Cancelled => {
            spinner.stop("Cancelled");
            cliclack::outro_cancel("No project was created")?;
            let _ = console::Term::stderr().show_cursor();
            std::process::exit(EXIT_CANCELLED);
        }
        Err(e) => {
            spinner.stop(format!("Failed ({})", e.kind()));
            cliclack::outro_cancel(format!(
                "{} was not created",
                request.destination.final_path().display()
            ))?;
            Err(e.into())
        }
    }
}

fn report(done: &Materialized) -> Result<()> {
    match &done.name_adaptation {
        Some(NameAdaptation::Renamed { from, to }) => {
            cliclack::log::info(format!("Renamed CMake project '{}' to '{}'", from, to))?;
        }
        Some(NameAdaptation::NotApplicable) => {
            cliclack::log::info("No CMake project() declaration to rename")?;
        }
        Some(NameAdaptation::Unchanged) | None => {}
    }

    for warning in &done.warnings {
        cliclack::log::warning(warning.to_string())?;
    }
    Ok(())
}

fn print_next_steps(project_dir: &Path) -> Result<()> {
    let mut steps = Vec::new();
    if std::env::current_dir().ok().as_deref() != Some(project_dir) {
        steps.push(format!("cd {}", project_dir.display()));
    }
    if project_dir.join("CMakeLists.txt").is_file() {
        steps.push("cmake -S . -B build".to_string());
        steps.push("cmake --build build".to_string());
    } else {
        steps.push("Open README.md to get started".to_string());
    }

    println!();
    println!("  Next steps");
    println!();

    for (i, step) in steps.iter().enumerate() {
        println!("  {}.  {}", i + 1, step);
    }

    cliclack::outro("Happy coding!")?;
    Ok(())
}

fn show_tools(tools: &ToolTable) {
    println!("{}", "Host tools".bold());
    println!();

    for info in tools.report() {
        let name = format!("{:<6}", info.tool.display_name());
        match (&info.path, info.available) {
            (Some(path), true) => {
                let version = info.version.unwrap_or_default();
                println!(
                    "  {} {} {} {}",
                    "✓".green(),
                    name,
                    version,
                    path.display().to_string().dimmed()
                );
            }
            _ => println!("  {} {} {}", "✗".red(), name, "not found".dimmed()),
        }
    }

    println!();
}
