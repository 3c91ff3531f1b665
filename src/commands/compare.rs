use anyhow::Result;
use chrono::Utc;
use colored::Colorize;
use confkit::ConfigSnapshot;
use confkit::diff;

use crate::Context;
use crate::cli::CompareArgs;
use crate::ui;

pub fn run(ctx: &Context, args: &CompareArgs) -> Result<u8> {
    let old_text = super::read_config_file(&args.file1)?;
    let new_text = super::read_config_file(&args.file2)?;

    let label1 = args.file1.display().to_string();
    let label2 = args.file2.display().to_string();
    let old = ConfigSnapshot::from_text(&label1, Utc::now(), &old_text);
    let new = ConfigSnapshot::from_text(&label2, Utc::now(), &new_text);

    let result = diff::diff(&old, &new);
    if result.is_empty() {
        if !ctx.quiet {
            ui::success("Configurations are identical");
        }
        return Ok(0);
    }

    if !args.summary {
        for line in diff::unified(&result, &label1, &label2, args.context).lines() {
            ui::diff_line(line);
        }
        println!();
    }

    let summary = result.summary();
    println!(
        "{} added, {} removed, {} changed, {} unchanged",
        summary.added.to_string().green(),
        summary.removed.to_string().red(),
        summary.changed.to_string().yellow(),
        summary.kept
    );

    Ok(1)
}
