use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use helpers::KubeCluster;
use log::info;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use types::config::DEFAULT_CONFIG_FILE;
use types::{load_config, ClusterProfile, Config, InstallMode};

mod demo;
mod doctor;
mod init;
mod install;
mod render;
#[cfg(test)]
mod testing;
mod verify;

const DEFAULT_REPORT: &str = "kubac-verify-report.json";

#[derive(Parser, Debug)]
#[command(name = "kubac", author, version, about, long_about = None)]
struct Cmd {
    /// Path to the kubac configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Output format for reports
    #[arg(long, global = true, value_enum, default_value_t = Output::Text)]
    output: Output,

    /// Installation mode, overriding the config file (direct or gitops)
    #[arg(long, global = true)]
    mode: Option<InstallMode>,

    /// Cluster profile, overriding the config file (local, managed or onprem)
    #[arg(long, global = true)]
    cluster_profile: Option<ClusterProfile>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
enum Commands {
    /// Creates kubac.yaml with defaults for the cluster profile
    Init,

    /// Installs the platform components, directly or as a GitOps tree
    Install,

    /// Runs the verification suite against the cluster
    Verify(VerifyArgs),

    /// Checks that the cluster is reachable and usable
    Doctor,

    /// Removes the namespaces kubac created
    Uninstall(UninstallArgs),

    /// Manages the demo application
    #[command(subcommand)]
    Demo(DemoCommands),

    /// Prints the kubac version
    Version,
}

#[derive(Args, Debug, Clone)]
struct VerifyArgs {
    /// Where to write the JSON report
    #[arg(long, default_value = DEFAULT_REPORT)]
    report: PathBuf,
}

#[derive(Args, Debug, Clone)]
struct UninstallArgs {
    /// Skip the confirmation prompt
    #[arg(long)]
    force: bool,
}

#[derive(Subcommand, Debug, Clone)]
enum DemoCommands {
    /// Deploys the demo application
    Deploy,

    /// Starts a load test against the demo application
    Load(LoadArgs),

    /// Deletes a demo pod to exercise self-healing
    Chaos,

    /// Removes the demo application
    Cleanup,
}

#[derive(Args, Debug, Clone)]
struct LoadArgs {
    /// How long to generate load, e.g. 60s or 2m
    #[arg(long, default_value = "60s")]
    duration: String,

    /// Number of requests to send
    #[arg(long, default_value_t = 100)]
    requests: u32,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
enum Output {
    Text,
    Json,
}

impl Cmd {
    /// Loads the config file and applies the command line overrides.
    fn load_config(&self) -> Result<Config> {
        let mut config = load_config(&self.config)
            .with_context(|| format!("failed to load config {}", self.config.display()))?;
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if let Some(profile) = self.cluster_profile {
            config.cluster_profile = profile;
        }
        Ok(config)
    }
}

async fn connect() -> Result<KubeCluster> {
    KubeCluster::try_default()
        .await
        .context("failed to connect to the cluster")
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{prompt} [y/N]: ");
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

fn succeeded(ok: bool) -> ExitCode {
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

async fn run(cli: &Cmd) -> Result<ExitCode> {
    match &cli.command {
        Commands::Init => {
            let profile = cli.cluster_profile.unwrap_or_default();
            let mode = cli.mode.unwrap_or_default();
            init::init_project(&cli.config, Path::new("."), profile, mode)?;
            println!("\nNext steps:");
            println!("  1. Review and customize {}", cli.config.display());
            println!("  2. Run 'kubac doctor' to verify cluster access");
            println!("  3. Run 'kubac install' to deploy the platform");
        }
        Commands::Install => {
            let config = cli.load_config()?;
            println!(
                "Installing kubac platform (profile: {}, mode: {})",
                config.cluster_profile, config.mode
            );
            match config.mode {
                InstallMode::Direct => {
                    let cluster = connect().await?;
                    let ran = install::install_direct(&cluster, &config).await?;
                    info!("{ran} install steps completed");
                }
                InstallMode::Gitops => {
                    let root = install::install_gitops(&config, Path::new(".")).await?;
                    println!("  ✓ GitOps manifests generated at {}", root.display());
                    println!("\nNext steps for GitOps mode:");
                    println!("  1. Commit the generated manifests to your Git repository");
                    println!(
                        "  2. Bootstrap Flux: flux bootstrap github --owner=<org> --repository=<repo> --path={}",
                        config.gitops.cluster_path()
                    );
                    println!("  3. Flux will automatically sync and apply the manifests");
                }
            }
            println!("\n✓ kubac installation complete");
        }
        Commands::Verify(args) => {
            let config = cli.load_config()?;
            let cluster = connect().await?;
            let verifier = verify::Verifier::new(&cluster, &config)?;

            println!("Running kubac verification suite...");
            let report = verifier.run_all(&config.verify.tests).await;
            report
                .write_report(&args.report)
                .context("failed to write report")?;

            let mut stdout = io::stdout().lock();
            match cli.output {
                Output::Json => writeln!(stdout, "{}", report.to_json()?)?,
                Output::Text => {
                    report.print_summary(&mut stdout)?;
                    writeln!(stdout, "\n✓ Full report written to: {}", args.report.display())?;
                }
            }
            return Ok(succeeded(report.all_passed()));
        }
        Commands::Doctor => {
            let report = doctor::run_checks().await;
            let mut stdout = io::stdout().lock();
            match cli.output {
                Output::Json => report.print_json(&mut stdout)?,
                Output::Text => report.print_text(&mut stdout)?,
            }
            return Ok(succeeded(report.all_passed()));
        }
        Commands::Uninstall(args) => {
            let config = cli.load_config()?;
            if !args.force && !confirm("This will remove all kubac components. Continue?")? {
                println!("Uninstall cancelled");
                return Ok(ExitCode::SUCCESS);
            }
            let cluster = connect().await?;
            println!("\n→ Removing kubac components...");
            install::uninstall(&cluster, &config).await;
            println!("\n✓ kubac uninstalled");
        }
        Commands::Demo(command) => {
            let config = cli.load_config()?;
            let cluster = connect().await?;
            match command {
                DemoCommands::Deploy => demo::deploy(&cluster, &config.demo).await?,
                DemoCommands::Load(args) => {
                    demo::load(&cluster, &config.demo, &args.duration, args.requests).await?;
                }
                DemoCommands::Chaos => {
                    demo::chaos(&cluster, &config.demo).await?;
                }
                DemoCommands::Cleanup => {
                    demo::cleanup(&cluster, &config.demo).await?;
                    println!("  ✓ Demo application removed");
                }
            }
        }
        Commands::Version => {
            println!("kubac version {}", env!("CARGO_PKG_VERSION"));
        }
    }
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();

    let cli = Cmd::parse();
    match run(&cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cmd::command().debug_assert();
    }

    #[test]
    fn global_flags_reach_subcommands() {
        let cli = Cmd::try_parse_from([
            "kubac",
            "verify",
            "--output",
            "json",
            "--mode",
            "gitops",
            "--report",
            "out.json",
        ])
        .unwrap();

        assert_eq!(cli.output, Output::Json);
        assert_eq!(cli.mode, Some(InstallMode::Gitops));
        assert_eq!(cli.config, PathBuf::from("kubac.yaml"));
        match cli.command {
            Commands::Verify(args) => assert_eq!(args.report, PathBuf::from("out.json")),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn demo_load_defaults() {
        let cli = Cmd::try_parse_from(["kubac", "demo", "load"]).unwrap();
        match cli.command {
            Commands::Demo(DemoCommands::Load(args)) => {
                assert_eq!(args.duration, "60s");
                assert_eq!(args.requests, 100);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_profile() {
        let err = Cmd::try_parse_from(["kubac", "--cluster-profile", "cloud", "init"]).unwrap_err();
        assert!(err.to_string().contains("cloud"));
    }

    #[test]
    fn overrides_apply_on_top_of_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kubac.yaml");
        std::fs::write(&path, "mode: direct\nclusterProfile: managed\n").unwrap();
        let cli = Cmd::try_parse_from([
            "kubac",
            "--config",
            path.to_str().unwrap(),
            "--mode",
            "gitops",
            "install",
        ])
        .unwrap();

        let config = cli.load_config().unwrap();

        assert_eq!(config.mode, InstallMode::Gitops);
        assert_eq!(config.cluster_profile, ClusterProfile::Managed);
    }
}
