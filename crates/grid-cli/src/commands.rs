use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use grid_domain::{Atom, Bundle, BundleMetadata, CloudProvider, PackageSpec, PortageConfig, UseFlag};
use grid_driver::{
    AliyunDriver, AliyunDriverConfig, AwsDriver, AwsDriverConfig, DriverRegistry, GcpDriver,
    GcpDriverConfig, IacRunner, LocalDriver, PveDriver, PveDriverConfig,
};
use grid_scheduler::{CapacityConfig, CapacityManager, ProvisioningTemplate, Scheduler, SchedulerConfig};
use grid_sinks::{Ed25519Signer, FsBlobStore, LogNotifier};
use grid_store::{
    BuilderRegistry, InMemoryEventLog, InMemoryInstanceStore, InMemoryJobStore, JobStore,
    RedbJobStore,
};
use serde_json::Value;
use uuid::Uuid;

use crate::cli::CloudArg;
use crate::output;

/// Outcome of a client subcommand, carrying the process exit code per
/// spec.md §6: 0 success, 1 usage/validation, 2 submission/transport error,
/// 3 build failed.
pub enum CliExit {
    Success,
    Usage(String),
    Transport(String),
    BuildFailed(String),
}

impl CliExit {
    pub fn code(&self) -> i32 {
        match self {
            CliExit::Success => 0,
            CliExit::Usage(_) => 1,
            CliExit::Transport(_) => 2,
            CliExit::BuildFailed(_) => 3,
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            CliExit::Success => None,
            CliExit::Usage(m) | CliExit::Transport(m) | CliExit::BuildFailed(m) => Some(m),
        }
    }
}

// ── Bootstrap ─────────────────────────────────────────────────────────────────

#[allow(clippy::too_many_arguments)]
pub async fn bootstrap(
    bind: String,
    port: u16,
    token: Option<String>,
    rotate_token: bool,
    ephemeral: bool,
    store_path: Option<String>,
    cloud: CloudArg,
    cloud_config: Option<PathBuf>,
) -> Result<()> {
    let token_path = default_token_path();
    let token = if let Some(t) = token {
        t
    } else if rotate_token {
        let t = generate_token();
        write_token(&token_path, &t)?;
        println!("Rotated token (written to {})", token_path.display());
        t
    } else if let Ok(existing) =
        std::fs::read_to_string(&token_path).map(|s| s.trim().to_string())
    {
        if existing.is_empty() {
            let t = generate_token();
            write_token(&token_path, &t)?;
            t
        } else {
            println!("Reusing existing token from {}", token_path.display());
            existing
        }
    } else {
        let t = generate_token();
        write_token(&token_path, &t)?;
        println!("Generated new token (written to {})", token_path.display());
        t
    };

    let job_store: Arc<dyn JobStore> = if ephemeral {
        println!("Using in-memory (ephemeral) job store — state will be lost on server stop");
        Arc::new(InMemoryJobStore::new())
    } else {
        let path = resolve_store_path(store_path);
        println!("Using persistent job store at {}", path.display());
        Arc::new(
            RedbJobStore::open(&path)
                .with_context(|| format!("Failed to open job store at {}", path.display()))?,
        )
    };
    let instance_store = Arc::new(InMemoryInstanceStore::new());
    let registry = Arc::new(BuilderRegistry::new());
    registry.clone().spawn_sweep(Duration::from_secs(30));
    let events = Arc::new(InMemoryEventLog::new());

    let scheduler = Arc::new(Scheduler::new(
        job_store.clone(),
        registry.clone(),
        events.clone(),
        SchedulerConfig::default(),
    ));
    tokio::spawn(scheduler.clone().run());

    let (default_provider, drivers) = register_driver(cloud, cloud_config)?;
    let iac_root = default_iac_workspace_root();
    let capacity = Arc::new(CapacityManager::new(
        job_store.clone(),
        instance_store.clone(),
        registry.clone(),
        Arc::new(drivers),
        Arc::new(IacRunner::new("true", iac_root)),
        events.clone(),
        ProvisioningTemplate {
            container_image: "registry.example/grid-builder:latest".into(),
            package_tree_mirror: None,
            binary_package_host: None,
            builder_port: 9000,
            swap_gb: 0,
            firewall_enabled: true,
            allowed_cidrs: vec![],
            extra_os_packages: vec![],
            ssh_public_key: String::new(),
            callback_base_url: format!("http://127.0.0.1:{port}"),
        },
        CapacityConfig { default_provider, ..CapacityConfig::default() },
    ));
    tokio::spawn(capacity.run());

    let artifacts_root = default_artifacts_root();
    let blobs = Arc::new(FsBlobStore::new(artifacts_root));
    let signer = Arc::new(Ed25519Signer::generate());
    let notifier = Arc::new(LogNotifier);

    let addr = format!("{bind}:{port}");
    println!("Starting grid API server on http://{addr}");
    let app = grid_api::build_app(
        job_store,
        instance_store,
        registry,
        events,
        scheduler,
        blobs,
        signer,
        notifier,
        Arc::new(token),
    );
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;
    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}

/// Registers the driver for `cloud` and returns the matching
/// [`CloudProvider`] tag for [`CapacityConfig::default_provider`].
/// Non-local providers read their static config from `cloud_config`
/// (required in that case) since each has distinct required fields
/// (region, project, node, …) with no sensible default.
fn register_driver(
    cloud: CloudArg,
    cloud_config: Option<PathBuf>,
) -> Result<(CloudProvider, DriverRegistry)> {
    let mut drivers = DriverRegistry::new();
    if cloud == CloudArg::Local {
        drivers.register(Arc::new(LocalDriver::new()));
        return Ok((CloudProvider::Aws, drivers));
    }

    let Some(path) = cloud_config else {
        bail!("--cloud-config is required when --cloud is not \"local\"");
    };
    let bytes = std::fs::read(&path)
        .with_context(|| format!("reading cloud config at {}", path.display()))?;

    let provider = match cloud {
        CloudArg::Local => unreachable!(),
        CloudArg::Aws => {
            let config: AwsDriverConfig = serde_json::from_slice(&bytes)
                .with_context(|| format!("parsing AWS driver config at {}", path.display()))?;
            drivers.register(Arc::new(AwsDriver::new(config)));
            CloudProvider::Aws
        }
        CloudArg::Gcp => {
            let config: GcpDriverConfig = serde_json::from_slice(&bytes)
                .with_context(|| format!("parsing GCP driver config at {}", path.display()))?;
            drivers.register(Arc::new(GcpDriver::new(config)));
            CloudProvider::Gcp
        }
        CloudArg::Aliyun => {
            let config: AliyunDriverConfig = serde_json::from_slice(&bytes)
                .with_context(|| format!("parsing Aliyun driver config at {}", path.display()))?;
            drivers.register(Arc::new(AliyunDriver::new(config)));
            CloudProvider::Aliyun
        }
        CloudArg::Pve => {
            let config: PveDriverConfig = serde_json::from_slice(&bytes)
                .with_context(|| format!("parsing PVE driver config at {}", path.display()))?;
            drivers.register(Arc::new(PveDriver::new(config)));
            CloudProvider::Pve
        }
    };
    Ok((provider, drivers))
}

fn default_iac_workspace_root() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
    PathBuf::from(home).join(".grid").join("iac")
}

fn default_artifacts_root() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
    PathBuf::from(home).join(".grid").join("artifacts")
}

// ── Submit ────────────────────────────────────────────────────────────────────

fn split_csv(s: &Option<String>) -> Vec<String> {
    s.as_deref()
        .map(|s| s.split(',').map(|t| t.trim().to_string()).filter(|t| !t.is_empty()).collect())
        .unwrap_or_default()
}

/// Build a [`Bundle`] from exactly one of `--package`, `--config`, or
/// `--portage-dir`. Returns [`CliExit::Usage`] if zero or more than one is
/// given, or if any flag fails to parse.
fn build_bundle(
    package: Option<String>,
    version: Option<String>,
    config: Option<PathBuf>,
    portage_dir: Option<PathBuf>,
    use_flags: Option<String>,
    keywords: Option<String>,
    arch: String,
    profile: String,
) -> Result<Bundle, CliExit> {
    let given = [package.is_some(), config.is_some(), portage_dir.is_some()]
        .iter()
        .filter(|b| **b)
        .count();
    if given != 1 {
        return Err(CliExit::Usage(
            "exactly one of --package, --config, --portage-dir is required".into(),
        ));
    }

    if let Some(config_path) = config {
        let bytes = std::fs::read(&config_path)
            .map_err(|e| CliExit::Usage(format!("reading {}: {e}", config_path.display())))?;
        return serde_json::from_slice(&bytes)
            .map_err(|e| CliExit::Usage(format!("parsing bundle json: {e}")));
    }

    if let Some(root) = portage_dir {
        let config = grid_bundle::read_system_config(&root)
            .map_err(|e| CliExit::Usage(format!("reading portage dir: {e}")))?;
        // The system-config tree has no dedicated "packages to build" file;
        // its package.use keys are the closest proxy for "atoms this
        // profile cares about", so that's what a --portage-dir submission
        // builds from. Sorted for a deterministic bundle across runs.
        let mut atoms: Vec<&String> = config.package_use.keys().collect();
        atoms.sort();
        let packages = atoms
            .into_iter()
            .map(|atom| Atom::parse(atom.clone()).map(PackageSpec::new))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| CliExit::Usage(format!("{e}")))?;
        if packages.is_empty() {
            return Err(CliExit::Usage(
                "--portage-dir produced an empty package list; use --package to name one explicitly".into(),
            ));
        }
        return Ok(Bundle {
            config,
            packages,
            metadata: BundleMetadata {
                user_id: whoami(),
                target_arch: arch,
                profile,
                created_at: Utc::now(),
                description: "submitted via grid-cli --portage-dir".into(),
            },
        });
    }

    let atom = Atom::parse(package.expect("given == 1 implies package is Some"))
        .map_err(|e| CliExit::Usage(format!("{e}")))?;
    let mut spec = PackageSpec::new(atom);
    spec.version = version;
    for token in split_csv(&use_flags) {
        spec.use_flags.push(UseFlag::parse(token).map_err(|e| CliExit::Usage(format!("{e}")))?);
    }
    spec.keywords = split_csv(&keywords);

    Ok(Bundle {
        config: PortageConfig::default(),
        packages: vec![spec],
        metadata: BundleMetadata {
            user_id: whoami(),
            target_arch: arch,
            profile,
            created_at: Utc::now(),
            description: "submitted via grid-cli --package".into(),
        },
    })
}

fn whoami() -> String {
    std::env::var("USER").unwrap_or_else(|_| "unknown".into())
}

#[allow(clippy::too_many_arguments)]
pub async fn submit(
    package: Option<String>,
    version: Option<String>,
    config: Option<PathBuf>,
    portage_dir: Option<PathBuf>,
    use_flags: Option<String>,
    keywords: Option<String>,
    arch: String,
    profile: String,
    server: String,
    output_path: Option<PathBuf>,
    token: Option<String>,
) -> Result<CliExit> {
    let bundle = match build_bundle(package, version, config, portage_dir, use_flags, keywords, arch, profile) {
        Ok(b) => b,
        Err(exit) => return Ok(exit),
    };

    if let Some(path) = output_path {
        grid_bundle::write_to_path(&bundle, &path)
            .with_context(|| format!("writing bundle to {}", path.display()))?;
        println!("Wrote bundle to {}", path.display());
        return Ok(CliExit::Success);
    }

    let token = match resolve_token(token) {
        Ok(t) => t,
        Err(e) => return Ok(CliExit::Usage(e.to_string())),
    };
    let archive = grid_bundle::encode(&bundle).context("encoding bundle")?;

    let base = server.trim_end_matches('/').to_string();
    let resp = authed_client(&token)
        .post(format!("{base}/api/v1/builds"))
        .body(archive)
        .send()
        .await;
    let resp = match resp {
        Ok(r) => r,
        Err(e) => return Ok(CliExit::Transport(format!("failed to reach server at {server}: {e}"))),
    };
    if !resp.status().is_success() {
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(Value::Null);
        let msg = body.get("error").and_then(|v| v.as_str()).unwrap_or("unknown error");
        return Ok(CliExit::Transport(format!("server returned {status}: {msg}")));
    }
    let body: Value = match resp.json().await {
        Ok(b) => b,
        Err(e) => return Ok(CliExit::Transport(format!("malformed response: {e}"))),
    };
    let job_id = body["job_id"].as_str().unwrap_or_default().to_string();
    println!("Submitted job {job_id}");

    // Poll until the job reaches a terminal state.
    loop {
        tokio::time::sleep(Duration::from_secs(2)).await;
        let job: Value = match authed_client(&token)
            .get(format!("{base}/api/v1/builds/status?job_id={job_id}"))
            .send()
            .await
        {
            Ok(r) => match r.json().await {
                Ok(j) => j,
                Err(e) => return Ok(CliExit::Transport(format!("malformed status response: {e}"))),
            },
            Err(e) => return Ok(CliExit::Transport(format!("failed to poll status: {e}"))),
        };
        let status = job["status"].as_str().unwrap_or("");
        match status {
            "success" => {
                println!("{}", output::render_job(&job));
                return Ok(CliExit::Success);
            }
            "failed" | "cancelled" => {
                println!("{}", output::render_job(&job));
                let reason = job["error"].as_str().unwrap_or(status).to_string();
                return Ok(CliExit::BuildFailed(reason));
            }
            _ => continue,
        }
    }
}

// ── Status / logs / list / cancel ────────────────────────────────────────────

pub async fn status(job_id: String, server: String, token: Option<String>) -> Result<CliExit> {
    let token = match resolve_token(token) {
        Ok(t) => t,
        Err(e) => return Ok(CliExit::Usage(e.to_string())),
    };
    let base = server.trim_end_matches('/');
    let resp = authed_client(&token)
        .get(format!("{base}/api/v1/builds/status?job_id={job_id}"))
        .send()
        .await;
    let resp = match resp {
        Ok(r) => r,
        Err(e) => return Ok(CliExit::Transport(format!("failed to reach server at {server}: {e}"))),
    };
    if resp.status() == reqwest::StatusCode::NOT_FOUND {
        return Ok(CliExit::Transport(format!("no such job: {job_id}")));
    }
    let job: Value = match resp.json().await {
        Ok(j) => j,
        Err(e) => return Ok(CliExit::Transport(format!("malformed response: {e}"))),
    };
    println!("{}", output::render_job(&job));
    Ok(CliExit::Success)
}

pub async fn logs(job_id: String, server: String, token: Option<String>) -> Result<CliExit> {
    let token = match resolve_token(token) {
        Ok(t) => t,
        Err(e) => return Ok(CliExit::Usage(e.to_string())),
    };
    let base = server.trim_end_matches('/');
    let resp = authed_client(&token)
        .get(format!("{base}/api/v1/builds/logs?job_id={job_id}"))
        .send()
        .await;
    let resp = match resp {
        Ok(r) => r,
        Err(e) => return Ok(CliExit::Transport(format!("failed to reach server at {server}: {e}"))),
    };
    if resp.status() == reqwest::StatusCode::NOT_FOUND {
        return Ok(CliExit::Transport(format!("no such job: {job_id}")));
    }
    let body: Value = match resp.json().await {
        Ok(b) => b,
        Err(e) => return Ok(CliExit::Transport(format!("malformed response: {e}"))),
    };
    let log = body["logs"].as_str().unwrap_or("");
    print!("{log}");
    if !log.ends_with('\n') {
        println!();
    }
    Ok(CliExit::Success)
}

pub async fn list(limit: Option<u32>, server: String, token: Option<String>) -> Result<CliExit> {
    let token = match resolve_token(token) {
        Ok(t) => t,
        Err(e) => return Ok(CliExit::Usage(e.to_string())),
    };
    let base = server.trim_end_matches('/');
    let mut url = format!("{base}/api/v1/builds/list");
    if let Some(limit) = limit {
        url.push_str(&format!("?limit={limit}"));
    }
    let resp = authed_client(&token).get(&url).send().await;
    let resp = match resp {
        Ok(r) => r,
        Err(e) => return Ok(CliExit::Transport(format!("failed to reach server at {server}: {e}"))),
    };
    let jobs: Vec<Value> = match resp.json().await {
        Ok(j) => j,
        Err(e) => return Ok(CliExit::Transport(format!("malformed response: {e}"))),
    };
    print!("{}", output::render_job_list(&jobs));
    Ok(CliExit::Success)
}

pub async fn cancel(job_id: String, server: String, token: Option<String>) -> Result<CliExit> {
    let token = match resolve_token(token) {
        Ok(t) => t,
        Err(e) => return Ok(CliExit::Usage(e.to_string())),
    };
    let base = server.trim_end_matches('/');
    let body = serde_json::json!({ "job_id": job_id });
    let resp = authed_client(&token)
        .post(format!("{base}/api/v1/builds/cancel"))
        .json(&body)
        .send()
        .await;
    let resp = match resp {
        Ok(r) => r,
        Err(e) => return Ok(CliExit::Transport(format!("failed to reach server at {server}: {e}"))),
    };
    if !resp.status().is_success() {
        let status = resp.status();
        return Ok(CliExit::Transport(format!("server returned {status}")));
    }
    let body: Value = resp.json().await.unwrap_or(Value::Null);
    println!("job {job_id} is now {}", body["status"].as_str().unwrap_or("unknown"));
    Ok(CliExit::Success)
}

// ── Token helpers ─────────────────────────────────────────────────────────────

fn generate_token() -> String {
    let a = Uuid::new_v4().to_string().replace('-', "");
    let b = Uuid::new_v4().to_string().replace('-', "");
    format!("{a}{b}")
}

fn resolve_token(explicit: Option<String>) -> Result<String> {
    if let Some(t) = explicit {
        return Ok(t);
    }
    let path = default_token_path();
    std::fs::read_to_string(&path).map(|s| s.trim().to_string()).with_context(|| {
        format!(
            "No token provided and could not read token file at {}. \
             Use --token, GRID_TOKEN, or run `grid bootstrap` first.",
            path.display()
        )
    })
}

fn write_token(path: &PathBuf, token: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    std::fs::write(path, token)
        .with_context(|| format!("Failed to write token to {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .with_context(|| format!("Failed to set permissions on {}", path.display()))?;
    }
    Ok(())
}

fn default_token_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
    PathBuf::from(home).join(".grid").join("token")
}

fn resolve_store_path(store_path: Option<String>) -> PathBuf {
    if let Some(p) = store_path {
        return PathBuf::from(p);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
    PathBuf::from(home).join(".grid").join("jobs.redb")
}

fn authed_client(token: &str) -> reqwest::Client {
    let mut headers = reqwest::header::HeaderMap::new();
    let bearer = format!("Bearer {token}");
    headers.insert(
        reqwest::header::AUTHORIZATION,
        reqwest::header::HeaderValue::from_str(&bearer).expect("token contains invalid header characters"),
    );
    reqwest::Client::builder()
        .default_headers(headers)
        .build()
        .expect("failed to build HTTP client")
}
