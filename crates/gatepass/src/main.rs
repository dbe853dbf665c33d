//! gatepass - prepare a macOS app bundle for Gatekeeper and
//! notarization: inspect, fix load commands, and sign in dependency
//! order, emitting a replayable script of every mutation.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use gatepass_analyzer::{
    build_graph, plan_fixes, plan_signing, run_check, CheckConfig, EntitlementRule,
    EntitlementsMapFile, ExemptionTable, FixRules, SignConfig,
};
use gatepass_bundle::{validate_report, ScannedBundle, Severity};
use gatepass_macho::{
    runner, write_json, write_sh, ActionExecutor, BundleLock, BundleScanner, ExecutionMode,
    ScanConfig, ToolInspector,
};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "gatepass")]
#[command(
    author,
    version,
    about = "Inspect, fix and sign a macOS .app bundle so Gatekeeper accepts it"
)]
struct Cli {
    /// Increase log verbosity (-v warnings, -vv info, -vvv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Staging directory for archive extraction (jar extraction may
    /// require a case-sensitive volume)
    #[arg(long, global = true)]
    temp_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct RunArgs {
    /// Record commands and outcomes without mutating anything
    #[arg(long)]
    dry_run: bool,

    /// Write the replayable shell script here
    #[arg(long)]
    sh_output: Option<PathBuf>,

    /// Write the command sequence as a JSON array here
    #[arg(long)]
    json_output: Option<PathBuf>,
}

#[derive(Args)]
struct FixArgs {
    /// Delete rpaths that point outside the bundle. Use with care
    #[arg(long)]
    rc_path_delete: bool,
}

#[derive(Args)]
struct SignArgs {
    /// Baseline entitlements file
    entitlement_file: PathBuf,

    /// Signing identity, e.g. "Developer ID Application: ..."
    identity: String,

    /// YAML file mapping path globs to entitlements files
    #[arg(long)]
    entitlements_map: Option<PathBuf>,

    /// Sign without the hardened runtime (rarely what notarization
    /// wants)
    #[arg(long)]
    no_hardened_runtime: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Read-only report of issues; exit code is non-zero when blocking
    /// findings exist
    Check {
        app_bundle: PathBuf,

        /// Write the structured JSON report here
        #[arg(long)]
        report: Option<PathBuf>,

        #[command(flatten)]
        fix: FixArgs,
    },

    /// Apply fix rules to the bundle's load commands
    Fix {
        app_bundle: PathBuf,

        #[command(flatten)]
        fix: FixArgs,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Sign every binary in dependency order
    Sign {
        app_bundle: PathBuf,

        #[command(flatten)]
        sign: SignArgs,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Fix, then sign, sharing one scan and one command log
    Fixsign {
        app_bundle: PathBuf,

        #[command(flatten)]
        sign: SignArgs,

        #[command(flatten)]
        fix: FixArgs,

        #[command(flatten)]
        run: RunArgs,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "error",
        1 => "warn",
        2 => "info",
        _ => "debug",
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(EnvFilter::new(filter))
        .init();

    let temp_dir = cli.temp_dir.clone();
    let failed = match cli.command {
        Commands::Check {
            app_bundle,
            report,
            fix,
        } => cmd_check(&app_bundle, report.as_deref(), &fix, temp_dir)?,
        Commands::Fix {
            app_bundle,
            fix,
            run,
        } => cmd_fix(&app_bundle, &fix, &run, temp_dir)?,
        Commands::Sign {
            app_bundle,
            sign,
            run,
        } => cmd_sign(&app_bundle, &sign, &run, temp_dir)?,
        Commands::Fixsign {
            app_bundle,
            sign,
            fix,
            run,
        } => cmd_fixsign(&app_bundle, &sign, &fix, &run, temp_dir)?,
    };

    if failed {
        std::process::exit(1);
    }
    Ok(())
}

fn scan_bundle(bundle: &Path, temp_dir: Option<PathBuf>) -> anyhow::Result<ScannedBundle> {
    let inspector = ToolInspector::new();
    let scanner = BundleScanner::new(&inspector, ScanConfig { temp_dir });
    Ok(scanner.scan(bundle)?)
}

fn cmd_check(
    bundle: &Path,
    report_path: Option<&Path>,
    fix: &FixArgs,
    temp_dir: Option<PathBuf>,
) -> anyhow::Result<bool> {
    runner::ensure_tools(&["file", "otool", "codesign"])?;
    let scan = scan_bundle(bundle, temp_dir)?;

    let config = CheckConfig {
        exemptions: ExemptionTable::default(),
        rules: FixRules {
            delete_external_rpaths: fix.rc_path_delete,
            ..Default::default()
        },
    };
    let run_id = uuid::Uuid::new_v4().to_string();
    let report = run_check(&scan, &config, &run_id);

    for finding in &report.findings {
        let tag = match finding.severity {
            Severity::Blocking => "BLOCKING",
            Severity::Advisory => "advisory",
        };
        println!("[{tag}] {}: {}", finding.entry, finding.details);
    }
    println!(
        "Found {} issue(s) in {} entries, {} blocking, {} fixable.",
        report.findings.len(),
        report.entries.len(),
        report.blocking().count(),
        report.fixable_count(),
    );

    if let Some(path) = report_path {
        let value = serde_json::to_value(&report)?;
        let validation = validate_report(&value).map_err(anyhow::Error::from)?;
        if !validation.is_valid() {
            anyhow::bail!("report failed schema validation: {:?}", validation.errors);
        }
        std::fs::write(path, serde_json::to_string_pretty(&value)?)
            .with_context(|| format!("writing report to {}", path.display()))?;
        info!(report = %path.display(), "report written");
    }

    Ok(report.has_blocking())
}

fn cmd_fix(
    bundle: &Path,
    fix: &FixArgs,
    run: &RunArgs,
    temp_dir: Option<PathBuf>,
) -> anyhow::Result<bool> {
    let mode = execution_mode(run);
    ensure_mutation_tools(mode)?;
    let _lock = acquire_lock(bundle, mode)?;

    let scan = scan_bundle(bundle, temp_dir)?;
    let exemptions = ExemptionTable::default();
    let build = build_graph(&scan, &exemptions);
    build.require_resolved()?;

    let rules = FixRules {
        delete_external_rpaths: fix.rc_path_delete,
        ..Default::default()
    };
    let evaluations = plan_fixes(&scan, &exemptions, &rules);

    let mut executor = ActionExecutor::new(mode)?;
    executor.run_fixes(&evaluations);

    finish_run(&executor, &scan, run)
}

fn cmd_sign(
    bundle: &Path,
    sign: &SignArgs,
    run: &RunArgs,
    temp_dir: Option<PathBuf>,
) -> anyhow::Result<bool> {
    let mode = execution_mode(run);
    ensure_mutation_tools(mode)?;
    let _lock = acquire_lock(bundle, mode)?;

    let scan = scan_bundle(bundle, temp_dir)?;
    let exemptions = ExemptionTable::default();
    let build = build_graph(&scan, &exemptions);
    build.require_resolved()?;

    let config = load_sign_config(sign)?;
    let plan = plan_signing(&scan, &build.graph, &config);

    let mut executor = ActionExecutor::new(mode)?;
    let sign_result = executor.run_signing(&scan, &build.graph, &plan);
    let failed = finish_run(&executor, &scan, run)?;
    sign_result?;
    Ok(failed)
}

fn cmd_fixsign(
    bundle: &Path,
    sign: &SignArgs,
    fix: &FixArgs,
    run: &RunArgs,
    temp_dir: Option<PathBuf>,
) -> anyhow::Result<bool> {
    let mode = execution_mode(run);
    ensure_mutation_tools(mode)?;
    let _lock = acquire_lock(bundle, mode)?;

    // One scan, one graph build, one log for both phases.
    let scan = scan_bundle(bundle, temp_dir)?;
    let exemptions = ExemptionTable::default();
    let build = build_graph(&scan, &exemptions);
    build.require_resolved()?;

    let rules = FixRules {
        delete_external_rpaths: fix.rc_path_delete,
        ..Default::default()
    };
    let evaluations = plan_fixes(&scan, &exemptions, &rules);
    let config = load_sign_config(sign)?;
    let plan = plan_signing(&scan, &build.graph, &config);

    let mut executor = ActionExecutor::new(mode)?;
    executor.run_fixes(&evaluations);
    let sign_result = executor.run_signing(&scan, &build.graph, &plan);
    let failed = finish_run(&executor, &scan, run)?;
    sign_result?;
    Ok(failed)
}

fn execution_mode(run: &RunArgs) -> ExecutionMode {
    if run.dry_run {
        ExecutionMode::DryRun
    } else {
        ExecutionMode::Apply
    }
}

fn ensure_mutation_tools(mode: ExecutionMode) -> anyhow::Result<()> {
    let mut tools = vec!["file", "otool", "codesign"];
    if mode.is_apply() {
        tools.extend(["install_name_tool", "vtool", "ditto"]);
    }
    runner::ensure_tools(&tools)?;
    Ok(())
}

fn acquire_lock(bundle: &Path, mode: ExecutionMode) -> anyhow::Result<Option<BundleLock>> {
    if mode.is_apply() {
        Ok(Some(BundleLock::acquire(bundle)?))
    } else {
        Ok(None)
    }
}

fn load_sign_config(args: &SignArgs) -> anyhow::Result<SignConfig> {
    let mut config = SignConfig::new(args.identity.clone());
    config.default_entitlements = Some(args.entitlement_file.clone());
    config.hardened_runtime = !args.no_hardened_runtime;

    if let Some(path) = &args.entitlements_map {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading entitlements map {}", path.display()))?;
        let file: EntitlementsMapFile =
            serde_yaml::from_str(&text).context("parsing entitlements map")?;
        config.rules = file
            .rules
            .iter()
            .map(EntitlementRule::compile)
            .collect::<Result<Vec<_>, _>>()?;
    }
    Ok(config)
}

fn finish_run(
    executor: &ActionExecutor,
    scan: &ScannedBundle,
    run: &RunArgs,
) -> anyhow::Result<bool> {
    if let Some(path) = &run.sh_output {
        write_sh(executor.log(), path)?;
        info!(script = %path.display(), "shell script written");
    }
    if let Some(path) = &run.json_output {
        write_json(executor.log(), path)?;
        info!(json = %path.display(), "command JSON written");
    }

    let summary = executor.summary(scan);
    println!("Summary for {}", scan.root.display());
    print!("{summary}");
    let errors = summary.error_count();
    if errors > 0 {
        println!("{errors} entr(y/ies) finished with errors; see the log above.");
    }
    Ok(errors > 0)
}
