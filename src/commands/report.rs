use anyhow::{Context as _, Result};
use confkit::{DeviceDescriptor, Error};
use std::fmt::Write as _;

use crate::Context;
use crate::cli::ReportArgs;
use crate::schema::Inventory;
use crate::store::Store;
use crate::ui;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

pub fn run(ctx: &Context, args: &ReportArgs) -> Result<u8> {
    let inventory = super::load_inventory(ctx)?;
    let store = super::open_store(&inventory)?;

    let devices: Vec<&DeviceDescriptor> = match &args.device {
        Some(name) => vec![
            inventory
                .find_device(name)
                .ok_or_else(|| Error::UnknownDevice(name.clone()))?,
        ],
        None => inventory.devices.iter().collect(),
    };

    let text = render(&inventory, &store, &devices, args.device.is_some())?;

    match &args.output {
        Some(path) => {
            std::fs::write(path, &text)
                .with_context(|| format!("Failed to write report: {}", path.display()))?;
            if !ctx.quiet {
                ui::success(&format!("Report written to {}", path.display()));
            }
        }
        None => print!("{text}"),
    }
    Ok(0)
}

fn render(
    inventory: &Inventory,
    store: &Store,
    devices: &[&DeviceDescriptor],
    with_history: bool,
) -> Result<String> {
    let mut out = String::new();
    writeln!(out, "netkeep report")?;
    writeln!(out, "State directory: {}", store.root().display())?;
    writeln!(out, "Devices: {}", inventory.devices.len())?;

    for device in devices {
        writeln!(out)?;
        writeln!(out, "{}", device.name)?;
        writeln!(out, "  address: {}", device.address)?;
        writeln!(out, "  type: {}", device.device_type)?;

        let snapshots = store.snapshots(&device.name)?;
        writeln!(out, "  snapshots: {}", snapshots.len())?;
        match store.latest_snapshot(&device.name)? {
            Some(latest) => {
                let size = snapshots.last().map_or(0, |e| e.size);
                writeln!(
                    out,
                    "  latest snapshot: {} ({}, {} lines, {})",
                    latest.captured_at().format(TIME_FORMAT),
                    ui::format_size(size),
                    latest.lines().len(),
                    latest.checksum()
                )?;
            }
            None => writeln!(out, "  latest snapshot: none")?,
        }

        match store.latest_job(&device.name)? {
            Some(job) => {
                write!(out, "  latest deployment: {} {}", job.id(), job.state())?;
                if let Some(failure) = job.failure() {
                    write!(out, " ({failure})")?;
                }
                writeln!(out)?;
            }
            None => writeln!(out, "  latest deployment: none")?,
        }

        if with_history && !snapshots.is_empty() {
            writeln!(out, "  history:")?;
            for entry in snapshots.iter().rev() {
                writeln!(
                    out,
                    "    {}  {:>10}  {}",
                    entry.captured_at.format(TIME_FORMAT),
                    ui::format_size(entry.size),
                    entry.path.display()
                )?;
            }
        }
    }
    Ok(out)
}
