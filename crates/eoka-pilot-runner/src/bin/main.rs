use clap::Parser;
use eoka_pilot_core::ActionKind;
use eoka_pilot_runner::{GoalConfig, Params, Runner};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "eoka-pilot-runner")]
#[command(about = "Goal-driven browser automation")]
#[command(version)]
struct Cli {
    /// Goal file to run
    config: PathBuf,

    /// Run in headless mode (overrides config)
    #[arg(long)]
    headless: bool,

    /// Set a parameter (can be used multiple times)
    #[arg(short = 'P', long = "param", value_name = "KEY=VALUE")]
    params: Vec<String>,

    /// Execute a single natural-language command instead of the goal
    #[arg(long, value_name = "TEXT")]
    command: Option<String>,

    /// Do not write the replay script
    #[arg(long)]
    no_artifact: bool,

    /// Verbose output (-v for info, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Validate config without running
    #[arg(long)]
    check: bool,

    /// Quiet mode (only errors)
    #[arg(short, long)]
    quiet: bool,
}

fn print_check(config: &GoalConfig) {
    let pilot = config.pilot_config();
    println!("Config valid: {}", config.name);
    println!("  Goal: {}", config.goal);
    if let Some(ref url) = config.start_url {
        println!("  Start: {}", url);
    }
    println!("  Mode: {:?}", pilot.mode);
    println!("  Max steps: {}", pilot.max_steps);
    println!("  Retry attempts: {}", pilot.retry_attempts);
    println!("  Oracle: {} ({})", config.oracle.model, config.oracle.endpoint);
    if !config.params.is_empty() {
        println!("  Parameters: {}", config.params.len());
        let mut names: Vec<_> = config.params.iter().collect();
        names.sort_by(|a, b| a.0.cmp(b.0));
        for (name, def) in names {
            let req = if def.required { " (required)" } else { "" };
            let desc = def.description.as_deref().unwrap_or("");
            println!("    - {}{}: {}", name, req, desc);
        }
    }
}

#[tokio::main]
async fn main() -> eoka_pilot_runner::Result<()> {
    let cli = Cli::parse();

    let level = if cli.quiet {
        Level::ERROR
    } else {
        match cli.verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            _ => Level::DEBUG,
        }
    };

    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    let params = Params::from_args(&cli.params)?;
    let mut config = GoalConfig::load_with_params(&cli.config, &params)?;

    if cli.check {
        print_check(&config);
        return Ok(());
    }

    if cli.headless {
        config.browser.headless = true;
    }

    let mut runner = Runner::new(&config).await?;
    if cli.no_artifact {
        runner = runner.without_artifacts();
    }

    let success = if let Some(ref command) = cli.command {
        println!("Command: {}", command);
        let outcome = runner.run_command(&config, command).await;
        match outcome {
            Ok((translation, None)) => {
                println!("✗ Not understood: {}", command);
                println!("  Parsed as: {}", translation.decision.summary());
                false
            }
            Ok((translation, Some(result))) => {
                println!();
                println!(
                    "{} {}",
                    if result.success { "✓" } else { "✗" },
                    translation.decision.summary()
                );
                if !result.success {
                    println!("  Error: {}", result.error);
                }
                if let Some(ref png) = result.screenshot {
                    match runner.save_screenshot(&config, png) {
                        Ok(path) => println!("  Screenshot: {}", path.display()),
                        Err(e) => println!("  Screenshot not saved: {}", e),
                    }
                }
                if result.action == ActionKind::GenerateTest {
                    println!();
                    print!("{}", runner.replay_script());
                }
                result.success
            }
            Err(e) => {
                println!("✗ Failed");
                println!("  Error: {}", e);
                false
            }
        }
    } else {
        println!("Running: {}", config.name);
        let outcome = runner.run(&config).await;
        match outcome {
            Ok(result) => {
                let summary = &result.report.execution_summary;
                println!();
                if result.report.success {
                    println!("✓ Goal reached");
                } else {
                    println!("✗ Goal not reached ({:?})", result.report.outcome);
                }
                println!(
                    "  Steps: {} ({} ok, {} failed)",
                    summary.total_steps, summary.successful_steps, summary.failed_steps
                );
                println!("  Duration: {}ms", result.duration_ms);
                if let Some(ref path) = result.artifact {
                    println!("  Replay: {}", path.display());
                }
                result.report.success
            }
            Err(e) => {
                println!("✗ Failed");
                println!("  Error: {}", e);
                false
            }
        }
    };

    runner.close().await;

    if !success {
        std::process::exit(1);
    }

    Ok(())
}
