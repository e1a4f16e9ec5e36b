use clap::{Args, Parser, Subcommand};
use db_vault::backup::compress::decompress_file;
use db_vault::backup::crypto::{decrypt_file, generate_key, EncryptionKey};
use db_vault::backup::execution::run_jobs;
use db_vault::backup::job_config::JobConfig;
use db_vault::backup::manager::{BackupManager, DatabaseKind};
use db_vault::backup::pipeline::{BackupReport, BackupTarget, PipelineOptions};
use db_vault::backup::result_error::error::Error;
use db_vault::backup::result_error::result::Result;
use db_vault::backup::upload::ProviderCredentials;
use rayon::ThreadPoolBuilder;
use std::path::PathBuf;
use std::process::exit;
use tracing::{error, info, warn};

/// Back up databases: dump, validate, compress, encrypt, upload
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Back up one database
    Backup(BackupArgs),
    /// Run every job of a job file in parallel
    Run {
        /// Location of the YAML job file
        #[arg(short, long)]
        config: PathBuf,
        /// Worker threads, defaults to the number of cores
        #[arg(long)]
        threads: Option<usize>,
    },
    /// Print a fresh encryption key
    Keygen,
    /// Decrypt an `.enc` artifact
    Decrypt {
        #[arg(long)]
        file: PathBuf,
        #[arg(long, env = "DB_VAULT_KEY", hide_env_values = true)]
        key: String,
        /// Also strip the `.xz` layer
        #[arg(long)]
        decompress: bool,
    },
}

#[derive(Args, Debug)]
struct BackupArgs {
    /// mysql, postgres, mongo, redis, sqlite or db2
    #[arg(long)]
    db: String,
    #[arg(long, default_value = "localhost")]
    host: String,
    #[arg(long, default_value = "")]
    user: String,
    #[arg(long, env = "DB_VAULT_PASSWORD", hide_env_values = true, default_value = "")]
    password: String,
    /// Database name, or the file path for sqlite
    #[arg(long)]
    database: String,
    /// Destination directory
    #[arg(long)]
    output: Option<PathBuf>,
    #[arg(long)]
    encrypt: bool,
    /// Encryption key; generated and printed when omitted with --encrypt
    #[arg(long, env = "DB_VAULT_KEY", hide_env_values = true)]
    key: Option<String>,
    /// s3, azure, gcs or minio
    #[arg(long)]
    cloud: Option<String>,
    #[arg(long)]
    s3_bucket: Option<String>,
    #[arg(long)]
    s3_key: Option<String>,
    /// AWS account id owning the bucket
    #[arg(long)]
    s3_owner: Option<String>,
    #[arg(long, env = "AZURE_STORAGE_CONNECTION_STRING", hide_env_values = true)]
    azure_conn_str: Option<String>,
    #[arg(long)]
    azure_container: Option<String>,
    #[arg(long)]
    azure_blob: Option<String>,
    #[arg(long)]
    gcs_bucket: Option<String>,
    #[arg(long)]
    gcs_blob: Option<String>,
    #[arg(long)]
    gcs_credentials: Option<PathBuf>,
    #[arg(long)]
    minio_endpoint: Option<String>,
    #[arg(long)]
    minio_access_key: Option<String>,
    #[arg(long, env = "MINIO_SECRET_KEY", hide_env_values = true)]
    minio_secret_key: Option<String>,
    #[arg(long)]
    minio_bucket: Option<String>,
    #[arg(long)]
    minio_object: Option<String>,
    /// Talk plain http to MinIO
    #[arg(long)]
    minio_insecure: bool,
    /// Run the pipeline on a blocking worker of an async runtime
    #[arg(long)]
    async_mode: bool,
}

impl BackupArgs {
    fn target(&self) -> BackupTarget {
        BackupTarget::builder()
            .host(self.host.as_str())
            .user(self.user.as_str())
            .password(self.password.as_str())
            .database(self.database.as_str())
            .build()
    }

    fn credentials(&self) -> ProviderCredentials {
        ProviderCredentials::builder()
            .maybe_s3_bucket(self.s3_bucket.clone())
            .maybe_s3_key(self.s3_key.clone())
            .maybe_s3_expected_owner(self.s3_owner.clone())
            .maybe_azure_conn_str(self.azure_conn_str.clone())
            .maybe_azure_container(self.azure_container.clone())
            .maybe_azure_blob_name(self.azure_blob.clone())
            .maybe_gcs_bucket(self.gcs_bucket.clone())
            .maybe_gcs_blob_name(self.gcs_blob.clone())
            .maybe_gcs_credentials(self.gcs_credentials.clone())
            .maybe_minio_endpoint(self.minio_endpoint.clone())
            .maybe_minio_access_key(self.minio_access_key.clone())
            .maybe_minio_secret_key(self.minio_secret_key.clone())
            .maybe_minio_bucket(self.minio_bucket.clone())
            .maybe_minio_object_name(self.minio_object.clone())
            .maybe_minio_secure(self.minio_insecure.then_some(false))
            .build()
    }

    fn encryption_key(&self) -> Result<Option<EncryptionKey>> {
        match (&self.key, self.encrypt) {
            (Some(key), _) => Ok(Some(EncryptionKey::from(key.as_str()))),
            (None, true) => {
                let key = generate_key()?;
                warn!("Generated a new encryption key; store it, backups cannot be decrypted without it");
                println!("{}", key.expose());
                Ok(Some(key))
            }
            (None, false) => Ok(None),
        }
    }
}

fn backup(args: BackupArgs) -> Result<BackupReport> {
    let kind: DatabaseKind = args.db.parse()?;
    let options = PipelineOptions::builder()
        .maybe_destination_dir(args.output.clone())
        .maybe_encryption_key(args.encryption_key()?)
        .maybe_cloud_provider(args.cloud.clone())
        .provider_credentials(args.credentials())
        .build();
    let target = args.target();
    let mut manager = BackupManager::new(kind);

    if args.async_mode {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        runtime.block_on(manager.perform_pipeline_async(target, options))
    } else {
        manager.perform_pipeline(&target, &options)
    }
}

fn run(config: PathBuf, threads: Option<usize>) -> Result<()> {
    let config = JobConfig::load(&config)?;
    let mut pool = ThreadPoolBuilder::new();
    if let Some(threads) = threads {
        pool = pool.num_threads(threads);
    }
    let pool = pool.build()?;

    let outcomes = run_jobs(&pool, &config.jobs, |kind| config.new_manager(kind));
    let failed = outcomes.iter().filter(|o| !o.is_success()).count();
    info!("{} of {} jobs succeeded", outcomes.len() - failed, outcomes.len());
    if failed > 0 {
        return Err(Error::backup(format!("{failed} of {} jobs failed", outcomes.len())));
    }
    Ok(())
}

fn decrypt(file: PathBuf, key: String, decompress: bool) -> Result<PathBuf> {
    let plain = decrypt_file(&file, &EncryptionKey::from(key))?;
    if decompress {
        decompress_file(&plain)
    } else {
        Ok(plain)
    }
}

fn main() {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let res = match cli.command {
        Command::Backup(args) => backup(args).map(|report| {
            info!("Backup written to {:?}", report.artifact);
            if let Some(remote) = report.remote {
                info!("Uploaded to {remote}");
            }
        }),
        Command::Run { config, threads } => run(config, threads),
        Command::Keygen => generate_key().map(|key| println!("{}", key.expose())),
        Command::Decrypt {
            file,
            key,
            decompress,
        } => decrypt(file, key, decompress).map(|path| info!("Restored {:?}", path)),
    };

    if let Err(e) = res {
        error!("{e}");
        exit(1);
    }
}
