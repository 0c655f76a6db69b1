mod config;
mod console;

use std::{path::PathBuf, sync::Arc};

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use packaging_core::{
    lifecycle::ProcessField, steps::WizardStep, HttpGateway, PackagingWorkflow,
};
use shared::domain::{ContainerKey, PackageId, PlantId, SampleId};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::{config::load_settings, console::ConsolePresenter};

#[derive(Parser, Debug)]
#[command(about = "Sample container packaging against the OData service")]
struct Args {
    #[arg(long, default_value = config::DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Lists plants and the plant assigned to the current user.
    Plants,
    AssignPlant {
        plant: String,
    },
    Containers {
        #[arg(long)]
        account: Option<String>,
    },
    Samples {
        #[arg(value_parser = parse_container_key)]
        container: ContainerKey,
    },
    /// Creates a proposal from containers given as `ID/INSTANCE`.
    Create {
        #[arg(required = true, value_parser = parse_container_key)]
        containers: Vec<ContainerKey>,
    },
    Process {
        package_id: String,
        #[arg(long)]
        plant: Option<String>,
        #[arg(long)]
        gross: Option<String>,
        #[arg(long)]
        dry_ice: Option<String>,
        #[arg(long)]
        units: Option<String>,
        #[arg(long)]
        material: Option<String>,
        #[arg(long)]
        comments: Option<String>,
    },
    Unassign {
        package_id: String,
        #[arg(long)]
        plant: Option<String>,
        #[arg(required = true, value_parser = parse_container_key)]
        containers: Vec<ContainerKey>,
    },
    Add {
        package_id: String,
        #[arg(long)]
        plant: Option<String>,
        #[arg(required = true, value_parser = parse_container_key)]
        containers: Vec<ContainerKey>,
    },
    Abandon {
        #[arg(required = true, value_parser = parse_container_key)]
        containers: Vec<ContainerKey>,
    },
    PullSample {
        #[arg(value_parser = parse_container_key)]
        container: ContainerKey,
        sample: String,
        #[arg(long)]
        comments: String,
    },
    Materials {
        query: Option<String>,
    },
    Proposals {
        #[arg(long)]
        plant: Option<String>,
    },
}

fn parse_container_key(raw: &str) -> Result<ContainerKey, String> {
    match raw.split_once('/') {
        Some((id, instance)) if !id.trim().is_empty() && !instance.trim().is_empty() => {
            Ok(ContainerKey::new(id.trim(), instance.trim()))
        }
        _ => Err(format!("expected CONTAINER/INSTANCE, got '{raw}'")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let settings = load_settings(&args.config);
    let gateway = HttpGateway::new(settings.gateway_config()?)?;
    info!(service_url = %settings.service_url, "packer: gateway ready");
    let workflow = PackagingWorkflow::new(
        Arc::new(gateway),
        Arc::new(ConsolePresenter),
        settings.workflow_config(),
    );

    run(&workflow, args.command).await
}

async fn require_plant(workflow: &PackagingWorkflow) -> Result<PlantId> {
    match workflow.load_plants().await? {
        Some(plant) => Ok(plant),
        None => bail!("no plant assigned to the current user; run `assign-plant` first"),
    }
}

async fn plant_or_assigned(
    workflow: &PackagingWorkflow,
    plant: Option<String>,
) -> Result<PlantId> {
    match plant.filter(|p| !p.trim().is_empty()) {
        Some(plant) => Ok(PlantId::new(plant)),
        None => require_plant(workflow).await,
    }
}

async fn run(workflow: &PackagingWorkflow, command: Command) -> Result<()> {
    match command {
        Command::Plants => {
            let assigned = workflow.load_plants().await?;
            for plant in workflow.snapshot().await.plants {
                let marker = if Some(&plant.plant) == assigned.as_ref() { "*" } else { " " };
                println!("{marker} {} {}", plant.plant, plant.name);
            }
        }
        Command::AssignPlant { plant } => {
            let assigned = workflow.assign_plant(PlantId::new(plant)).await?;
            println!("assigned plant={assigned}");
        }
        Command::Containers { account } => {
            require_plant(workflow).await?;
            workflow.set_account_filter(account.as_deref()).await;
            for container in workflow.snapshot().await.containers {
                println!(
                    "{} {} {} ({} / {}){}",
                    container.key(),
                    container.account_name,
                    container.status,
                    container.samples_received,
                    container.container_total,
                    if container.is_ready() { "" } else { " not ready" }
                );
            }
        }
        Command::Samples { container } => {
            require_plant(workflow).await?;
            workflow.select_containers([container]).await;
            workflow.open_samples().await?;
            if let Some(dialog) = workflow.samples_dialog().await {
                println!("{}", dialog.title);
                for sample in dialog.samples {
                    println!("  {}", sample.sample_id);
                }
            }
        }
        Command::Create { containers } => {
            require_plant(workflow).await?;
            workflow.select_containers(containers).await;
            workflow.go_to_step(WizardStep::ProposalCreation).await;
            let package_id = workflow.create_proposal().await?;
            println!("created package_id={package_id}");
        }
        Command::Process {
            package_id,
            plant,
            gross,
            dry_ice,
            units,
            material,
            comments,
        } => {
            let plant = plant_or_assigned(workflow, plant).await?;
            workflow
                .open_proposal(PackageId::new(package_id), Some(plant))
                .await?;
            let fields = [
                (ProcessField::WeightGross, gross),
                (ProcessField::WeightDryIce, dry_ice),
                (ProcessField::WeightUnits, units),
                (ProcessField::Comments, comments),
            ];
            for (field, value) in fields {
                if let Some(value) = value {
                    workflow.update_form(field, value).await;
                }
            }
            if let Some(material) = material {
                workflow.load_packaging_materials().await?;
                workflow.choose_material(&material).await;
            }
            workflow.process_proposal().await?;
        }
        Command::Unassign {
            package_id,
            plant,
            containers,
        } => {
            let plant = plant_or_assigned(workflow, plant).await?;
            workflow
                .open_proposal(PackageId::new(package_id), Some(plant))
                .await?;
            let indices: Vec<usize> = workflow
                .snapshot()
                .await
                .proposal
                .items()
                .iter()
                .enumerate()
                .filter(|(_, item)| containers.contains(&item.key()))
                .map(|(index, _)| index)
                .collect();
            workflow.select_proposal_items(&indices).await;
            workflow.unassign_containers().await?;
        }
        Command::Add {
            package_id,
            plant,
            containers,
        } => {
            let plant = plant_or_assigned(workflow, plant).await?;
            workflow
                .open_proposal(PackageId::new(package_id), Some(plant))
                .await?;
            workflow.add_containers(containers).await?;
        }
        Command::Abandon { containers } => {
            require_plant(workflow).await?;
            workflow.select_containers(containers).await;
            let report = workflow.abandon_selected().await?;
            info!(aggregate = ?report.aggregate(), "abandon: finished");
            if !report.any_succeeded() {
                bail!("no container was abandoned");
            }
        }
        Command::PullSample {
            container,
            sample,
            comments,
        } => {
            require_plant(workflow).await?;
            workflow.select_containers([container]).await;
            workflow.open_samples().await?;
            let actions = workflow.container_actions();
            if !actions.select_sample(&SampleId::new(sample.clone())).await? {
                bail!("sample {sample} is not in the container");
            }
            actions.set_pull_comments(comments).await?;
            let pulled = workflow.pull_sample().await;
            if let Some(dialog) = workflow.samples_dialog().await {
                if dialog.message.visible {
                    println!("{}", dialog.message.text);
                }
            }
            pulled?;
        }
        Command::Materials { query } => {
            workflow.load_packaging_materials().await?;
            for material in workflow.search_materials(query.as_deref().unwrap_or("")).await {
                println!("{} {}", material.code, material.description);
            }
        }
        Command::Proposals { plant } => {
            let plant = plant_or_assigned(workflow, plant).await?;
            for header in workflow.list_proposals(&plant).await? {
                println!(
                    "{} {} {}",
                    header.package_id,
                    header.status,
                    if header.can_open() { "open" } else { "" }
                );
            }
        }
    }

    Ok(())
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
