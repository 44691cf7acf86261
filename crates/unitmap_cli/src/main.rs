//! `unitmap` command-line entry point.
//!
//! # Responsibility
//! - Parse arguments, open the working store, dispatch to core services.
//! - Print results as JSON on stdout; errors go to stderr with exit code 1.

mod args;

use anyhow::{Context, Result};
use args::{BuildArgs, Cli, Command};
use clap::Parser;
use serde_json::json;
use std::path::Path;
use unitmap_core::repo::codec::PolygonRecord;
use unitmap_core::{
    default_log_level, init_logging, next_available_name, next_name, open_workspace, DatasetFile,
    DatasetService, FeatureRepository, LogSettings, PipelineConfig, PipelineService,
    SqliteFeatureRepository, SqliteUnitRepository, UnitRepository, ValidUnit, WorkspaceContext,
};

fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    if let Some(log_dir) = &cli.log_dir {
        let level = cli.log_level.as_deref().unwrap_or(default_log_level());
        init_logging(&LogSettings::new(level, log_dir)?)?;
    }

    let mut context = WorkspaceContext::new(&cli.db);
    if let Some(crs) = &cli.crs {
        context = context.with_crs(crs.clone());
    }
    let conn = open_workspace(&context)
        .with_context(|| format!("failed to open working store '{}'", cli.db.display()))?;
    let features = SqliteFeatureRepository::new(&conn);
    let units = SqliteUnitRepository::new(&conn);

    match cli.command {
        Command::Init => {
            let datasets: Vec<_> = features
                .list_datasets()?
                .into_iter()
                .map(|dataset| {
                    json!({
                        "name": dataset.name,
                        "kind": dataset.kind.as_str(),
                        "crs": dataset.crs,
                    })
                })
                .collect();
            print_json(&json!({
                "db": cli.db.display().to_string(),
                "datasets": datasets,
            }))
        }
        Command::Import { name, file } => {
            let parsed = read_dataset_file(&file)?;
            let summary = DatasetService::new(features, units).import(
                &name,
                &parsed,
                context.crs.as_deref(),
            )?;
            print_json(&json!({
                "dataset": name,
                "kind": summary.kind.as_str(),
                "created": summary.created,
                "features": summary.features,
            }))
        }
        Command::AddUnit { code, name } => {
            units.add_unit(&ValidUnit {
                unit_code: code,
                unit_name: name,
            })?;
            print_json(&json!({ "valid_units": units.list_units()? }))
        }
        Command::Build(build) => run_build(&build, &context, features, units),
        Command::Export { name } => {
            let file = DatasetService::new(features, units).export(&name)?;
            print_json(&file)
        }
        Command::NextName { name, available } => {
            let next = if available {
                next_available_name(&name, |candidate| {
                    features
                        .get_dataset(candidate)
                        .map(|found| found.is_some())
                })?
            } else {
                next_name(&name)
            };
            println!("{next}");
            Ok(())
        }
    }
}

fn run_build(
    build: &BuildArgs,
    context: &WorkspaceContext,
    features: SqliteFeatureRepository<'_>,
    units: SqliteUnitRepository<'_>,
) -> Result<()> {
    let mut config = match &build.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    build.apply(&mut config);
    if config.crs.is_none() {
        config.crs = context.crs.clone();
    }
    config.validate()?;

    let report = PipelineService::new(features, units).run(&config)?;
    let polygons: Vec<PolygonRecord> = report
        .polygons
        .iter()
        .map(|polygon| PolygonRecord::new(&polygon.geometry, polygon.unit_code))
        .collect();
    print_json(&json!({
        "run_id": report.run_id,
        "output_dataset": report.output_dataset,
        "prior_dataset": report.prior_dataset,
        "tolerance": report.tolerance,
        "snap": report.snap,
        "polygons": polygons,
        "warnings": report.warnings,
    }))
}

fn read_dataset_file(path: &Path) -> Result<DatasetFile> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read dataset file '{}'", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("failed to parse dataset file '{}'", path.display()))
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
