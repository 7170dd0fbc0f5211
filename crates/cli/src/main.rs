use anyhow::Context;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use seqvault_core::{
    constants::DEFAULT_CONFIG_FILE, Entity, EntityKind, PublicFileFilter, StorageConfig,
    StorageService, UploadCleaner,
};
use std::{
    ops::Bound,
    path::PathBuf,
    sync::Arc,
    time::SystemTime,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "seqvault")]
#[command(about = "seqvault dataset and sample file storage CLI")]
struct Cli {
    /// Storage configuration file
    #[arg(long, env = "SEQVAULT_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    /// Folder holding the entity and grant catalogs
    #[arg(long, env = "SEQVAULT_STATE_DIR", default_value = ".")]
    state_dir: PathBuf,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Kind {
    Dataset,
    Sample,
}

impl From<Kind> for EntityKind {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Dataset => EntityKind::Dataset,
            Kind::Sample => EntityKind::Sample,
        }
    }
}

#[derive(Args)]
struct EntityArg {
    /// Entity kind
    #[arg(value_enum)]
    kind: Kind,
    /// Entity name
    name: String,
}

#[derive(Args, Default)]
struct FilterArgs {
    /// Keep files whose path contains this text
    #[arg(long)]
    filename: Option<String>,
    /// Keep files whose entity name contains this text
    #[arg(long)]
    entity: Option<String>,
    /// Keep files whose owner email or name contains this text
    #[arg(long)]
    owner: Option<String>,
    /// Keep grants expiring on or after this date (YYYY-MM-DD)
    #[arg(long)]
    expires_from: Option<NaiveDate>,
    /// Keep grants expiring on or before this date (YYYY-MM-DD)
    #[arg(long)]
    expires_to: Option<NaiveDate>,
}

impl From<FilterArgs> for PublicFileFilter {
    fn from(args: FilterArgs) -> Self {
        let bound = |date: Option<NaiveDate>| date.map_or(Bound::Unbounded, Bound::Included);
        PublicFileFilter {
            filename_contains: args.filename,
            entity_name_contains: args.entity,
            owner_contains: args.owner,
            expiry_range: (bound(args.expires_from), bound(args.expires_to)),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Register a new entity and create its primary folder
    Create {
        #[command(flatten)]
        entity: EntityArg,
        /// Entity date (YYYY-MM-DD), selects the year folder
        date: NaiveDate,
    },
    /// List the files of an entity across every location
    Files {
        #[command(flatten)]
        entity: EntityArg,
    },
    /// List the upload area files of an entity
    Uploads {
        #[command(flatten)]
        entity: EntityArg,
    },
    /// Rename an entity and synchronise its folders and files
    Rename {
        #[command(flatten)]
        entity: EntityArg,
        /// New entity name
        new_name: String,
        /// New entity date (YYYY-MM-DD)
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Check primary files against their .md5 sidecars
    Verify {
        #[command(flatten)]
        entity: EntityArg,
    },
    /// Delete a file from the primary folder and record it in the ledger
    DeleteFile {
        #[command(flatten)]
        entity: EntityArg,
        /// File name or path inside the primary folder
        file: PathBuf,
    },
    /// Show the deletion ledger of an entity
    Deleted {
        #[command(flatten)]
        entity: EntityArg,
    },
    /// Copy files into the primary folder of an entity
    SaveFiles {
        #[command(flatten)]
        entity: EntityArg,
        /// Files to copy
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Grant public access to a file until a date
    Grant {
        #[command(flatten)]
        entity: EntityArg,
        /// File inside the entity folder
        file: PathBuf,
        /// Last day of public access (YYYY-MM-DD)
        expiry: NaiveDate,
    },
    /// Revoke public access to a file
    Revoke {
        #[command(flatten)]
        entity: EntityArg,
        /// File inside the entity folder
        file: PathBuf,
    },
    /// List public files
    PublicFiles {
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Print download links of public files, one per line
    Links {
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Delete upload area entries older than the configured age
    CleanupUploads,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("seqvault_core=warn".parse()?),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let Some(command) = cli.command else {
        println!("Use 'seqvault --help' for commands");
        return Ok(());
    };

    let cfg = Arc::new(
        StorageConfig::load(&cli.config)
            .with_context(|| format!("loading {}", cli.config.display()))?,
    );
    let service = StorageService::with_state_dir(cfg, &cli.state_dir);
    run(&service, command).await
}

async fn run(service: &StorageService, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Create { entity, date } => {
            let kind = EntityKind::from(entity.kind);
            if service.entities().exists(kind, &entity.name)? {
                anyhow::bail!("{} {} already exists", kind, entity.name);
            }
            let saved = service.save(Entity::new(kind, entity.name, date))?.entity;
            let folder = service.create_folder(&saved)?;
            println!("Created {} in {}", saved, folder.display());
        }
        Commands::Files { entity } => {
            let entity = find(service, &entity)?;
            let files = service.files(&entity);
            if files.is_empty() {
                println!("No files found.");
            }
            for file in files {
                let location = if file.is_primary() { "primary" } else { "archive" };
                println!("{}\t{}", location, file.path.display());
            }
        }
        Commands::Uploads { entity } => {
            let entity = find(service, &entity)?;
            for file in service.upload_files(&entity) {
                println!("{}", file.display());
            }
        }
        Commands::Rename {
            entity,
            new_name,
            date,
        } => {
            let mut entity = find(service, &entity)?;
            if entity.metadata.canonical_token().is_some() {
                anyhow::bail!("name of {} is generated from its metadata", entity);
            }
            entity.name = new_name;
            if let Some(date) = date {
                entity.date = date;
            }
            let saved = service.save(entity)?;
            println!("Saved {}", saved.entity);
            for failure in saved.rename.iter().flat_map(|report| &report.failures) {
                eprintln!(
                    "Archive {} not synchronised: {}",
                    failure.root.display(),
                    failure.error
                );
            }
        }
        Commands::Verify { entity } => {
            let entity = find(service, &entity)?;
            let mut failed = 0;
            for check in service.verify_checksums(&entity) {
                let status = match &check.result {
                    Ok(true) => "ok",
                    Ok(false) => "MISMATCH",
                    Err(_) => "ERROR",
                };
                if !matches!(check.result, Ok(true)) {
                    failed += 1;
                }
                println!("{}\t{}", status, check.path.display());
            }
            if failed > 0 {
                anyhow::bail!("{} file(s) failed verification", failed);
            }
        }
        Commands::DeleteFile { entity, file } => {
            let entity = find(service, &entity)?;
            let outcome = service.delete_file(&entity, &file)?;
            println!("Deleted {}", outcome.entry.filename);
            if let Some(warning) = outcome.ledger_warning {
                eprintln!("Ledger not updated: {}", warning);
            }
        }
        Commands::Deleted { entity } => {
            let entity = find(service, &entity)?;
            for entry in service.deleted_files(&entity)? {
                println!(
                    "{}\tmodified {}\tdeleted {}",
                    entry.filename, entry.last_modified, entry.deleted_at
                );
            }
        }
        Commands::SaveFiles { entity, files } => {
            let entity = find(service, &entity)?;
            let report = service.save_files(&entity, files, None)?.wait().await?;
            for saved in &report.saved {
                println!("Saved {}", saved.display());
            }
        }
        Commands::Grant {
            entity,
            file,
            expiry,
        } => {
            let entity = find(service, &entity)?;
            service.allow_public_file_access(&entity, &file, expiry)?;
            println!("{} is public until {}", file.display(), expiry);
        }
        Commands::Revoke { entity, file } => {
            let entity = find(service, &entity)?;
            service.revoke_public_file_access(&entity, &file)?;
            println!("{} is no longer public", file.display());
        }
        Commands::PublicFiles { filter } => {
            let files = PublicFileFilter::from(filter).apply(service.public_files()?);
            if files.is_empty() {
                println!("No public files found.");
            }
            for file in files {
                println!(
                    "{}\t{}\t{}\tuntil {}",
                    file.entity_kind, file.entity_name, file.path, file.expiry_date
                );
            }
        }
        Commands::Links { filter } => {
            let links = service.download_links(&PublicFileFilter::from(filter))?;
            if !links.is_empty() {
                println!("{}", links);
            }
        }
        Commands::CleanupUploads => {
            let report =
                UploadCleaner::new(service.config().clone()).delete_old_upload_folders(SystemTime::now());
            for deleted in &report.deleted {
                println!("Deleted {}", deleted.display());
            }
            if !report.failed.is_empty() {
                anyhow::bail!("could not delete {} upload entries", report.failed.len());
            }
        }
    }
    Ok(())
}

fn find(service: &StorageService, arg: &EntityArg) -> anyhow::Result<Entity> {
    let kind = EntityKind::from(arg.kind);
    service
        .entities()
        .find_by_name(kind, &arg.name)?
        .with_context(|| format!("{} {} not found", kind, arg.name))
}
