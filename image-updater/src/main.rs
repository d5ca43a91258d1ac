use anyhow::{anyhow, Result};
use crossterm::{
    style::{self, Colorize, Styler},
    QueueableCommand,
};
use log::info;
use std::{
    io::{stderr, stdout, Write},
    path::PathBuf,
};
use structopt::StructOpt;

use backends::DockerBackend;
use controller::{Controller, RebuildPolicy};
use frontends::ImageConfigFrontend;
use models::{BuildOutcome, Decision, Report};
use services::ConfigFrontend;

mod backends;
mod controller;
mod dockerfile;
mod errors;
mod frontends;
mod graph;
mod models;
mod services;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "image-updater",
    about = "Rebuilds docker images whose base image has changed."
)]
struct Opt {
    #[structopt(long, parse(from_os_str))]
    /// Path to the configuration file.
    file: PathBuf,

    #[structopt(long)]
    /// Rebuild every image, even the ones that are up to date.
    force: bool,

    #[structopt(long, default_value = "1.30")]
    /// Docker API version.
    api: String,

    #[structopt(long)]
    /// Check the children of a rebuilt image instead of rebuilding them all.
    propagate_after_rebuild: bool,

    #[structopt(long)]
    /// When rebuilding the children of a rebuilt image, only rebuild the first one.
    first_child_only: bool,

    #[structopt(long, default_value = "docker", parse(from_os_str))]
    /// The docker executable to use.
    docker: PathBuf,
}

fn main() -> Result<()> {
    pretty_env_logger::init_custom_env("LOG");

    let opt = Opt::from_args();
    let mut stdout = stdout();
    let mut stderr = stderr();

    let mut frontend = ImageConfigFrontend::new();
    let specs = frontend.image_specs(&opt.file)?;
    info!("parsed {} image definition(s)", specs.len());

    for warning in frontend.warnings() {
        stderr
            .queue(style::PrintStyledContent("WARN: ".yellow().bold()))?
            .queue(style::Print(format!("{}\n", warning)))?;
    }
    stderr.flush()?;

    let forest = graph::build_forest(&specs)?;
    info!("found {} base image(s)", forest.groups.len());

    let policy = RebuildPolicy {
        force: opt.force,
        propagate_after_rebuild: opt.propagate_after_rebuild,
        build_all_children: !opt.first_child_only,
    };
    let backend = DockerBackend::new(opt.docker, opt.api);
    let mut controller = Controller::new(backend, policy).with_progress(std::io::stdout());

    let report = controller.update(&forest);
    info!("rebuilt {} image(s)", report.built().len());
    print_report(&mut stdout, &mut stderr, &report)?;

    if !report.failed_groups.is_empty() {
        let bases = report
            .failed_groups
            .iter()
            .map(|(base, _)| base.0.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        return Err(anyhow!("couldn't update images based on {}", bases));
    }

    Ok(())
}

/// Prints one line per image that was checked or built, then the errors.
fn print_report(
    stdout: &mut impl Write,
    stderr: &mut impl Write,
    report: &Report,
) -> Result<()> {
    let mut lines = Vec::new();

    for (image, decision) in report.decisions.iter() {
        if *decision == Decision::Skip {
            lines.push((image.0.as_str(), "up to date".green().bold()));
        }
    }

    for (image, outcome) in report.builds.iter() {
        let status = match outcome {
            BuildOutcome::Rebuilt(_) => "rebuilt".green().bold(),
            BuildOutcome::Cascaded(_) => "rebuilt (base rebuilt)".green().bold(),
            BuildOutcome::Failed(_) => "failed".red().bold(),
        };
        lines.push((image.0.as_str(), status));
    }

    let longest_line = lines.iter().map(|(image, _)| image.len()).max().unwrap_or(0);

    for (image, status) in lines {
        stdout
            .queue(style::Print(format!("{:width$} ", image, width = longest_line)))?
            .queue(style::PrintStyledContent(status))?
            .queue(style::Print("\n"))?;
    }

    if report.decisions.is_empty() && report.builds.is_empty() {
        stdout
            .queue(style::PrintStyledContent("INFO: ".cyan().bold()))?
            .queue(style::Print("no images were checked.\n"))?;
    }
    stdout.flush()?;

    for (image, reason) in report.build_failures() {
        stderr
            .queue(style::PrintStyledContent("ERROR: ".red().bold()))?
            .queue(style::Print(format!("error during {}\n\t{}\n", image, reason)))?;
    }

    for (base, reason) in report.failed_groups.iter() {
        stderr
            .queue(style::PrintStyledContent("ERROR: ".red().bold()))?
            .queue(style::Print(format!(
                "couldn't update images based on {}\n\t{}\n",
                base, reason
            )))?;
    }
    stderr.flush()?;

    Ok(())
}
