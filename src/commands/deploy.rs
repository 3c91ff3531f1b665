use anyhow::Result;
use colored::Colorize;
use confkit::compliance::{self, ValidationReport};
use confkit::diff;
use confkit::{ConfigSnapshot, DeploymentJob, Error, JobState, Orchestrator};
use dialoguer::Confirm;

use crate::Context;
use crate::cli::DeployArgs;
use crate::progress;
use crate::store::Store;
use crate::ui;

/// Target lines shown in a dry run
const PREVIEW_LINES: usize = 10;

pub fn run(ctx: &Context, args: &DeployArgs) -> Result<u8> {
    let inventory = super::load_inventory(ctx)?;
    let device = inventory
        .find_device(&args.device)
        .cloned()
        .ok_or_else(|| Error::UnknownDevice(args.device.clone()))?;

    let rules = match args.rules.clone().or_else(|| inventory.rules_path()) {
        Some(path) => compliance::load_rules(&path)?,
        None => {
            log::info!("No compliance rules configured; skipping validation rules");
            Vec::new()
        }
    };

    let text = super::read_config_file(&args.file)?;
    let mut job = DeploymentJob::new(&device.name, &text, args.dry_run);
    if job.target().is_empty() {
        anyhow::bail!("Configuration file is empty: {}", args.file.display());
    }
    let store = super::open_store(&inventory)?;

    if !ctx.quiet {
        ui::header(if args.dry_run { "Deploy (dry run)" } else { "Deploy" });
        ui::kv("Device", &format!("{} ({})", device.name, device.address));
        ui::kv("Job", job.id());
        ui::kv("Rules", &rules.len().to_string());
    }

    if args.dry_run {
        preview(&store, &job, &args.file.display().to_string())?;
    } else if !args.yes {
        if !console::Term::stderr().is_term() {
            anyhow::bail!("Refusing to deploy without confirmation on a non-interactive terminal (pass --yes)");
        }
        if !confirm(&device.name, job.target().len())? {
            job.cancel_token().cancel()?;
        }
    }

    let manager = super::connection_manager(&inventory)?;
    let orchestrator = Orchestrator::new(&manager, &rules, inventory.deploy_settings());

    let spinner = (!args.dry_run && !ctx.quiet)
        .then(|| progress::spinner(&format!("Deploying to {}...", device.name)));
    let outcome = orchestrator.run(&mut job);
    if let Some(pb) = &spinner {
        progress::finish_clear(pb);
    }

    let record = store.save_job(&job)?;
    log::info!("Job record written to {}", record.display());
    let baseline_path = match job.baseline() {
        Some(baseline) => Some(store.save_snapshot(baseline)?),
        None => None,
    };

    let report = ValidationReport::new(job.validation().to_vec());
    if !report.results.is_empty() && (report.has_blocking_failures() || ctx.verbose > 0) {
        super::validate::print_report(&report, ctx.quiet);
    }

    if !ctx.quiet {
        let history: Vec<String> = job.state_history().iter().map(ToString::to_string).collect();
        println!();
        ui::kv("States", &history.join(" → "));
    }

    match outcome {
        Ok(JobState::Committed) => {
            ui::success(&format!("Deployed {} lines to {}", job.target().len(), device.name));
            Ok(0)
        }
        Ok(JobState::DryRunValidated) => {
            ui::success("Dry run passed validation; nothing was sent to the device");
            Ok(0)
        }
        Ok(state) => {
            ui::error(&format!(
                "Deployment {}: {}",
                state,
                job.failure().unwrap_or("validation failed")
            ));
            Ok(1)
        }
        Err(e) => {
            if let (Error::RollbackFailure { .. }, Some(path)) = (&e, &baseline_path) {
                ui::warn(&format!("Baseline saved to {}", path.display()));
            }
            Err(anyhow::Error::new(e).context(format!("Deployment job {} ended {}", job.id(), job.state())))
        }
    }
}

/// Show the target and its difference from the latest stored snapshot.
fn preview(store: &Store, job: &DeploymentJob, label: &str) -> Result<()> {
    let target = job.target();
    ui::section("Target Configuration");
    println!("  {} lines", target.len());
    for line in target.iter().take(PREVIEW_LINES) {
        println!("    {}", line.dimmed());
    }
    if target.len() > PREVIEW_LINES {
        ui::dim(&format!("... {} more", target.len() - PREVIEW_LINES));
    }

    ui::section("Changes Against Latest Snapshot");
    let Some(latest) = store.latest_snapshot(job.device())? else {
        ui::info("No stored snapshot; run `netkeep backup` first to compare");
        return Ok(());
    };

    let proposed = ConfigSnapshot::new(job.device(), job.created_at(), target.to_vec());
    let result = diff::diff(&latest, &proposed);
    if result.is_empty() {
        ui::info("Target matches the latest snapshot");
        return Ok(());
    }

    let from = format!(
        "{}@{}",
        job.device(),
        latest.captured_at().format("%Y-%m-%dT%H:%M:%SZ")
    );
    for line in diff::unified(&result, &from, label, 3).lines() {
        ui::diff_line(line);
    }
    let summary = result.summary();
    ui::dim(&format!(
        "{} added, {} removed, {} changed",
        summary.added, summary.removed, summary.changed
    ));
    Ok(())
}

fn confirm(device: &str, lines: usize) -> Result<bool> {
    let confirmed = Confirm::new()
        .with_prompt(format!("Push {lines} lines to {device}?"))
        .default(false)
        .interact()?;
    Ok(confirmed)
}
