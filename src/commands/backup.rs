use anyhow::Result;
use colored::Colorize;
use confkit::{ErrorCategory, backup};

use crate::Context;
use crate::cli::BackupArgs;
use crate::progress;
use crate::ui;

pub fn run(ctx: &Context, args: &BackupArgs) -> Result<u8> {
    let inventory = super::load_inventory(ctx)?;
    let store = super::open_store(&inventory)?;
    let manager = super::connection_manager(&inventory)?;

    let devices = match &args.device {
        Some(name) => {
            manager.registry().require(name)?;
            vec![name.clone()]
        }
        None => manager.registry().names(),
    };
    if devices.is_empty() {
        ui::warn("No devices in inventory");
        return Ok(0);
    }

    if !ctx.quiet {
        ui::header("Configuration Backup");
    }

    let pb = progress::bar(devices.len() as u64, "Backup");
    let results = backup::backup_all(&manager, &devices, args.jobs, |name, result| {
        if let Err(e) = result {
            log::info!("{name}: {e}");
        }
        pb.set_message(name.to_string());
        pb.inc(1);
    })?;
    progress::finish_clear(&pb);

    let mut saved = 0;
    let mut first_failure = None;
    for (name, result) in results {
        match result {
            Ok(snapshot) => {
                let path = match store.save_snapshot(&snapshot) {
                    Ok(path) => path,
                    Err(e) => {
                        println!("  {} {} {}", "✗".red(), name, format!("{e:#}").red());
                        first_failure.get_or_insert(ErrorCategory::Io.exit_code());
                        continue;
                    }
                };
                saved += 1;
                if !ctx.quiet {
                    println!(
                        "  {} {} {}",
                        "✓".green(),
                        name,
                        format!(
                            "{} lines, {}",
                            snapshot.lines().len(),
                            &snapshot.checksum()[..12]
                        )
                        .dimmed()
                    );
                    if ctx.verbose > 0 {
                        ui::dim(&path.display().to_string());
                    }
                }
            }
            Err(e) => {
                println!("  {} {} {}", "✗".red(), name, e.to_string().red());
                first_failure.get_or_insert(e.category().exit_code());
            }
        }
    }

    println!();
    let failed = devices.len() - saved;
    if failed == 0 {
        ui::success(&format!("Backed up {saved} device(s)"));
    } else {
        ui::warn(&format!("Backed up {saved} device(s), {failed} failed"));
    }

    Ok(first_failure.unwrap_or(0))
}
