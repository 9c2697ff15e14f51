use std::io::Write;
use std::path::Path;

use sha2::{Digest, Sha256};
use url::Url;

use depot_config::Config;
use depot_consts::consts;
use depot_utils::{persist_temp_file, temp_file_for};

use super::FetchError;
use crate::source::ObjectStoreCoords;

/// What a transport did for a destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportOutcome {
    /// Bytes were moved and the destination now exists.
    Downloaded,
    /// The destination already existed; nothing was transferred.
    AlreadyPresent,
}

/// Flags and environment handed to the object-store transport, assembled
/// from the provider configuration and an unsigned probe of the object.
#[derive(Debug, Clone, Default)]
pub struct TransportOptions {
    pub endpoint_url: Option<Url>,
    pub region: Option<String>,
    pub no_sign_request: bool,
    pub show_progress: bool,
    /// Extra environment entries for the copy tool, on top of the
    /// inherited process environment. Credential material arrives here;
    /// resolving it is the caller's business.
    pub extra_env: Vec<(String, String)>,
}

impl TransportOptions {
    /// Assemble options for an object-store copy. When the configuration
    /// does not already demand unsigned requests, a single unsigned HEAD
    /// decides whether the object is public.
    pub async fn for_coords(
        coords: &ObjectStoreCoords,
        config: &Config,
        client: &reqwest::Client,
        show_progress: bool,
    ) -> TransportOptions {
        let declared = config
            .s3_options(&coords.provider)
            .is_some_and(|options| options.no_sign_request);
        let no_sign_request = declared || object_is_public(coords, client).await;

        TransportOptions {
            endpoint_url: coords.endpoint.clone(),
            region: coords.region.clone(),
            no_sign_request,
            show_progress,
            extra_env: Vec::new(),
        }
    }
}

async fn object_is_public(coords: &ObjectStoreCoords, client: &reqwest::Client) -> bool {
    let Some(url) = coords.object_url() else {
        return false;
    };
    match client.head(url).send().await {
        Ok(response) => response.status().is_success(),
        Err(_) => false,
    }
}

/// Moves object-store objects to local destinations.
#[async_trait::async_trait]
pub trait ObjectStoreTransport: Send + Sync {
    async fn copy(
        &self,
        coords: &ObjectStoreCoords,
        destination: &Path,
        options: &TransportOptions,
    ) -> Result<TransportOutcome, FetchError>;
}

/// Downloads plain URLs to local destinations.
#[async_trait::async_trait]
pub trait UrlTransport: Send + Sync {
    async fn download(
        &self,
        url: &str,
        destination: &Path,
        expected_sha_prefix: Option<&str>,
        show_progress: bool,
    ) -> Result<TransportOutcome, FetchError>;
}

/// Default object-store transport: shells out to the external copy tool
/// (`s5cmd`), which owns multipart transfers and credential handling.
#[derive(Debug, Default)]
pub struct CopyToolTransport;

#[async_trait::async_trait]
impl ObjectStoreTransport for CopyToolTransport {
    async fn copy(
        &self,
        coords: &ObjectStoreCoords,
        destination: &Path,
        options: &TransportOptions,
    ) -> Result<TransportOutcome, FetchError> {
        if destination_is_populated(destination) {
            return Ok(TransportOutcome::AlreadyPresent);
        }

        let tool = which::which(consts::COPY_TOOL)
            .map_err(|e| FetchError::CopyToolMissing(consts::COPY_TOOL.to_string(), e))?;
        let args = copy_tool_args(coords, destination, options);
        let rendered = format!("{} {}", consts::COPY_TOOL, args.join(" "));
        tracing::debug!("executing: {rendered}");

        let output = tokio::process::Command::new(&tool)
            .args(&args)
            .envs(copy_tool_env(options))
            .output()
            .await
            .map_err(|e| FetchError::IoError("spawning".to_string(), tool.clone(), e))?;

        let code = output.status.code().unwrap_or(-1);
        tracing::debug!("{} finished with return code {code}", consts::COPY_TOOL);
        if !output.status.success() {
            return Err(FetchError::TransportFailure {
                command: rendered,
                code,
                diagnostic: diagnostic_from_output(&output),
            });
        }

        Ok(TransportOutcome::Downloaded)
    }
}

/// Command line for a single copy, in the tool's expected flag order.
fn copy_tool_args(
    coords: &ObjectStoreCoords,
    destination: &Path,
    options: &TransportOptions,
) -> Vec<String> {
    let mut args = Vec::new();
    if options.no_sign_request {
        args.push("--no-sign-request".to_string());
    }
    if let Some(endpoint) = &options.endpoint_url {
        args.push("--endpoint-url".to_string());
        args.push(endpoint.as_str().trim_end_matches('/').to_string());
    }
    args.push("cp".to_string());
    if options.show_progress {
        args.push("--show-progress".to_string());
    }
    args.push(coords.normalized_uri());
    args.push(destination.display().to_string());
    args
}

fn copy_tool_env(options: &TransportOptions) -> Vec<(String, String)> {
    let mut env = Vec::new();
    if let Some(region) = &options.region {
        env.push(("AWS_REGION".to_string(), region.clone()));
    }
    env.extend(options.extra_env.iter().cloned());
    env
}

/// A non-empty destination is final. Zero-length files are debris from an
/// interrupted transfer and get overwritten.
fn destination_is_populated(path: &Path) -> bool {
    fs_err::metadata(path)
        .map(|metadata| metadata.is_file() && metadata.len() > 0)
        .unwrap_or(false)
}

fn diagnostic_from_output(output: &std::process::Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    if stderr.trim().is_empty() {
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    } else {
        stderr.trim().to_string()
    }
}

/// Default URL transport: streams the body through reqwest into a sibling
/// temp file, hashing while writing, and renames into place only after the
/// stream (and the optional hash check) completed. A crashed download never
/// leaves a partial destination behind.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl UrlTransport for ReqwestTransport {
    async fn download(
        &self,
        url: &str,
        destination: &Path,
        expected_sha_prefix: Option<&str>,
        show_progress: bool,
    ) -> Result<TransportOutcome, FetchError> {
        if destination_is_populated(destination) {
            return Ok(TransportOutcome::AlreadyPresent);
        }

        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| unreachable(url, &e))?;

        let temp = temp_file_for(destination).map_err(|e| {
            FetchError::IoError(
                "creating a temporary file for".to_string(),
                destination.to_path_buf(),
                e,
            )
        })?;

        let name = destination
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| url.to_string());
        let progress = show_progress
            .then(|| depot_progress::transfer_progress_bar(response.content_length(), &name));

        let mut hasher = expected_sha_prefix.map(|_| Sha256::new());
        let streamed = stream_to_temp(
            &mut response,
            url,
            destination,
            &temp,
            &mut hasher,
            progress.as_ref(),
        )
        .await;
        if let Some(bar) = &progress {
            bar.finish_and_clear();
        }
        streamed?;

        if let (Some(prefix), Some(hasher)) = (expected_sha_prefix, hasher) {
            let computed = format!("{:x}", hasher.finalize());
            if !computed.starts_with(prefix) {
                // temp file is discarded on drop
                return Err(FetchError::IntegrityMismatch {
                    path: destination.to_path_buf(),
                    expected: prefix.to_string(),
                    computed,
                });
            }
        }

        persist_temp_file(temp.into_temp_path(), destination).map_err(|e| {
            FetchError::IoError("persisting".to_string(), destination.to_path_buf(), e)
        })?;

        Ok(TransportOutcome::Downloaded)
    }
}

async fn stream_to_temp(
    response: &mut reqwest::Response,
    url: &str,
    destination: &Path,
    temp: &tempfile::NamedTempFile,
    hasher: &mut Option<Sha256>,
    progress: Option<&indicatif::ProgressBar>,
) -> Result<(), FetchError> {
    while let Some(chunk) = response.chunk().await.map_err(|e| unreachable(url, &e))? {
        temp.as_file()
            .write_all(&chunk)
            .map_err(|e| FetchError::IoError("writing".to_string(), destination.to_path_buf(), e))?;
        if let Some(hasher) = hasher {
            hasher.update(&chunk);
        }
        if let Some(bar) = progress {
            bar.inc(chunk.len() as u64);
        }
    }
    Ok(())
}

fn unreachable(url: &str, error: &reqwest::Error) -> FetchError {
    let reason = match error.status() {
        Some(status) => status.to_string(),
        None => error.to_string(),
    };
    FetchError::Unreachable {
        url: url.to_string(),
        reason,
    }
}
