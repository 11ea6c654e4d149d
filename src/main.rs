//! Binary entry point for the hostdrive CLI.

mod cli;

use std::io::{self, Write};
use std::process;
use std::sync::Arc;

use clap::Parser;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use cli::{
    AllocateCommand, CacheImageCommand, Cli, DeallocateCommand, ResizeCommand,
    ValidateDiskSizeCommand,
};
use hostdrive::{
    CachedImageRegistry, Disk, DiskStore, DriverConfig, DriverContext, DriverError,
    DriverRegistry, HOST_TYPE_SCALEWAY, Host, HostDriver, InMemoryCachedImageRegistry,
    InMemoryDiskStore, Principal, ResultDocument, ScalewayClient, ScalewayConfig, Storage,
    StorageCache, Task, TaskError, TaskReceipt, TaskRunner,
};

const CLI_USER: &str = "hostdrive-cli";
const CLI_STORAGE_ID: &str = "scaleway-storage";
const CLI_STORAGE_CACHE_ID: &str = "scaleway-cache";

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("backend error: {0}")]
    Backend(String),
    #[error(transparent)]
    Driver(#[from] DriverError),
    #[error(transparent)]
    Task(#[from] TaskError),
    #[error("failed to write output: {0}")]
    Output(String),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let exit_code = match run(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config =
        DriverConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;
    config
        .validate()
        .map_err(|err| CliError::Config(err.to_string()))?;
    init_tracing(&config.log_filter);

    let document = dispatch(cli, &config).await?;
    write_document(io::stdout().lock(), &document)
}

fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init()
        .ok();
}

async fn dispatch(cli: Cli, config: &DriverConfig) -> Result<Value, CliError> {
    match cli {
        Cli::HostTypes => host_types(config),
        Cli::ValidateDiskSize(args) => validate_disk_size(config, &args),
        Cli::Allocate(args) => Session::open(config)?.allocate(&args).await,
        Cli::Deallocate(args) => Session::open(config)?.deallocate(&args).await,
        Cli::Resize(args) => Session::open(config)?.resize(&args).await,
        Cli::CacheImage(args) => Session::open(config)?.cache_image(&args).await,
    }
}

fn runner(config: &DriverConfig) -> TaskRunner {
    TaskRunner::new(config.worker_count, config.queue_depth)
}

fn local_registry(config: &DriverConfig) -> Result<DriverRegistry, CliError> {
    let context = DriverContext::in_memory(runner(config), config.staging_area());
    Ok(DriverRegistry::with_builtin(&context)?)
}

fn host_types(config: &DriverConfig) -> Result<Value, CliError> {
    let registry = local_registry(config)?;
    Ok(Value::from(registry.host_types().collect::<Vec<_>>()))
}

fn validate_disk_size(
    config: &DriverConfig,
    args: &ValidateDiskSizeCommand,
) -> Result<Value, CliError> {
    let driver = local_registry(config)?.get(&args.host_type)?;
    driver.validate_disk_size(&args.storage_type, args.size_gb)?;
    Ok(json!({
        "host_type": driver.host_type(),
        "storage_type": args.storage_type,
        "size_gb": args.size_gb,
        "valid": true,
    }))
}

/// Scaleway driver wired to in-memory records for one CLI invocation.
struct Session {
    driver: Arc<dyn HostDriver>,
    disks: Arc<InMemoryDiskStore>,
    client: ScalewayClient,
    host: Host,
}

impl Session {
    fn open(config: &DriverConfig) -> Result<Self, CliError> {
        let scaleway = ScalewayConfig::load_without_cli_args()
            .map_err(|err| CliError::Config(err.to_string()))?;
        let client =
            ScalewayClient::new(scaleway).map_err(|err| CliError::Backend(err.to_string()))?;
        let disks = Arc::new(InMemoryDiskStore::new());
        let context = DriverContext::new(
            runner(config),
            Arc::new(InMemoryCachedImageRegistry::new()) as Arc<dyn CachedImageRegistry>,
            Arc::clone(&disks) as Arc<dyn DiskStore>,
            config.staging_area(),
        );
        let driver = DriverRegistry::with_builtin(&context)?.get(HOST_TYPE_SCALEWAY)?;
        let host = Host {
            id: client.config().default_zone.clone(),
            name: format!("scaleway-{}", client.config().default_zone),
            host_type: String::from(HOST_TYPE_SCALEWAY),
        };
        Ok(Self {
            driver,
            disks,
            client,
            host,
        })
    }

    fn storage(&self, storage_type: &str) -> Storage {
        Storage {
            id: String::from(CLI_STORAGE_ID),
            name: self.host.name.clone(),
            storage_type: storage_type.to_owned(),
            cache: Some(self.storage_cache()),
            backend: Arc::new(self.client.storage(storage_type)),
        }
    }

    fn storage_cache(&self) -> StorageCache {
        StorageCache {
            id: String::from(CLI_STORAGE_CACHE_ID),
            storage_id: String::from(CLI_STORAGE_ID),
            backend: Arc::new(self.client.storage_cache()),
        }
    }

    fn task(&self, params: ResultDocument) -> (Task, TaskReceipt) {
        Task::new(
            params,
            Principal::new(CLI_USER, self.client.config().default_project_id.clone()),
        )
    }

    fn track(&self, name: &str, external_id: Option<&str>, size_mb: u64) -> Disk {
        let mut disk = Disk::new(Uuid::new_v4().to_string(), CLI_STORAGE_ID, name, size_mb);
        disk.external_id = external_id.map(str::to_owned);
        self.disks.insert(disk.clone());
        disk
    }

    async fn allocate(&self, args: &AllocateCommand) -> Result<Value, CliError> {
        let storage = self.storage(&args.storage_type);
        let disk = self.track(&args.name, None, 0);
        let (task, receipt) = self.task(ResultDocument::new());
        self.driver
            .request_allocate_disk_on_storage(&self.host, &storage, &disk, args.size_mb, task)
            .await?;
        let mut document = finish(receipt).await?;
        let stored = self.disks.get(&disk.id).map_err(DriverError::from)?;
        if let Some(external_id) = stored.external_id {
            document.insert(String::from("external_id"), Value::from(external_id));
        }
        Ok(Value::Object(document))
    }

    async fn deallocate(&self, args: &DeallocateCommand) -> Result<Value, CliError> {
        let storage = self.storage("b_ssd");
        let disk = self.track(&args.external_id, Some(&args.external_id), 0);
        let (task, receipt) = self.task(ResultDocument::new());
        self.driver
            .request_deallocate_disk_on_host(&self.host, &storage, &disk, task)
            .await?;
        finish(receipt).await?;
        info!(external_id = %args.external_id, "volume released");
        Ok(json!({ "external_id": args.external_id, "deleted": true }))
    }

    async fn resize(&self, args: &ResizeCommand) -> Result<Value, CliError> {
        let storage = self.storage(&args.storage_type);
        let disk = self.track(&args.external_id, Some(&args.external_id), 0);
        let (task, receipt) = self.task(ResultDocument::new());
        if args.online {
            self.driver
                .request_resize_disk_on_host_online(
                    &self.host,
                    &storage,
                    &disk,
                    args.size_mb,
                    task,
                )
                .await?;
        } else {
            self.driver
                .request_resize_disk_on_host(&self.host, &storage, &disk, args.size_mb, task)
                .await?;
        }
        Ok(Value::Object(finish(receipt).await?))
    }

    async fn cache_image(&self, args: &CacheImageCommand) -> Result<Value, CliError> {
        let mut params = ResultDocument::new();
        params.insert(String::from("image_id"), Value::from(args.image.as_str()));
        params.insert(String::from("is_force"), Value::from(args.force));
        if let Some(arch) = &args.arch {
            params.insert(String::from("os_arch"), Value::from(arch.as_str()));
        }
        let cache = self.storage_cache();
        let (task, receipt) = self.task(params);
        self.driver
            .check_and_set_cache_image(&self.host, &cache, task)
            .await?;
        Ok(Value::Object(finish(receipt).await?))
    }
}

async fn finish(receipt: TaskReceipt) -> Result<ResultDocument, CliError> {
    Ok(receipt.wait().await??)
}

fn write_document(mut target: impl Write, document: &Value) -> Result<(), CliError> {
    serde_json::to_writer_pretty(&mut target, document)
        .map_err(|err| CliError::Output(err.to_string()))?;
    writeln!(target).map_err(|err| CliError::Output(err.to_string()))
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(test)]
mod tests {
    use hostdrive::DEFAULT_STAGING_PATH;

    use super::*;

    fn config() -> DriverConfig {
        DriverConfig {
            staging_path: String::from(DEFAULT_STAGING_PATH),
            worker_count: 1,
            queue_depth: 4,
            log_filter: String::from("info"),
        }
    }

    #[tokio::test]
    async fn host_types_lists_builtin_drivers() {
        let document = dispatch(Cli::HostTypes, &config())
            .await
            .expect("host types");
        assert_eq!(document, json!(["aws", "scaleway"]));
    }

    #[tokio::test]
    async fn validate_disk_size_reports_valid_sizes() {
        let cli = Cli::ValidateDiskSize(ValidateDiskSizeCommand {
            host_type: String::from("aws"),
            storage_type: String::from("gp2"),
            size_gb: 100,
        });
        let document = dispatch(cli, &config()).await.expect("valid size");
        assert_eq!(document.get("valid"), Some(&Value::Bool(true)));
    }

    #[tokio::test]
    async fn validate_disk_size_rejects_unknown_host_types() {
        let cli = Cli::ValidateDiskSize(ValidateDiskSizeCommand {
            host_type: String::from("openstack"),
            storage_type: String::from("gp2"),
            size_gb: 100,
        });
        let err = dispatch(cli, &config()).await.expect_err("unknown host");
        assert!(
            matches!(err, CliError::Driver(DriverError::NotFound { .. })),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn write_document_emits_pretty_json_line() {
        let mut buf = Vec::new();
        write_document(&mut buf, &json!({ "valid": true })).expect("written");
        let rendered = String::from_utf8(buf).expect("utf8");
        assert_eq!(rendered, "{\n  \"valid\": true\n}\n");
    }

    #[test]
    fn write_error_writes_cli_error() {
        let mut buf = Vec::new();
        let err = CliError::Config(String::from("missing secret"));
        write_error(&mut buf, &err);
        let rendered = String::from_utf8(buf).expect("utf8");
        assert!(
            rendered.contains("configuration error: missing secret"),
            "rendered: {rendered}"
        );
    }
}
