//! Bucket management through the AWS CLI

use std::path::PathBuf;

use anyhow::Result;
use slog::{error, info, o, Logger};
use tokio::process::Command;

use crate::command::run_logged;
use crate::config::AwsSettings;

/// Region in which S3 rejects an explicit location constraint
const DEFAULT_S3_REGION: &str = "us-east-1";

/// Parameters for `aws s3api create-bucket`
#[derive(Debug, Clone, Default)]
pub struct BucketSpec {
    pub name: String,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub profile: Option<String>,
}

/// Wrapper around the `aws` CLI
pub struct Aws<'a> {
    settings: &'a AwsSettings,
    logger: Logger,
    log_path: PathBuf,
}

impl<'a> Aws<'a> {
    pub fn new(settings: &'a AwsSettings, logger: &Logger, log_path: PathBuf) -> Aws<'a> {
        Aws {
            settings,
            logger: logger.new(o!("tool" => "aws")),
            log_path,
        }
    }

    /// Builds the `create-bucket` command line, filling in the configured default region and endpoint.
    pub fn create_bucket_command(&self, spec: &BucketSpec) -> Command {
        let region = non_empty(&spec.region).unwrap_or(self.settings.default_region.as_str());
        let endpoint = non_empty(&spec.endpoint).or_else(|| non_empty_str(&self.settings.default_endpoint));

        let mut cmd = Command::new(&self.settings.binary);
        cmd.arg("s3api")
            .arg("create-bucket")
            .arg("--bucket")
            .arg(&spec.name)
            .arg("--region")
            .arg(region);

        if region != DEFAULT_S3_REGION {
            cmd.arg("--create-bucket-configuration")
                .arg(format!("LocationConstraint={}", region));
        }

        if let Some(endpoint) = endpoint {
            if endpoint.contains("://") {
                cmd.arg("--endpoint-url").arg(endpoint);
            } else {
                cmd.arg("--endpoint-url").arg(format!("https://{}", endpoint));
            }
        }

        if let Some(profile) = non_empty(&spec.profile) {
            cmd.arg("--profile").arg(profile);
        }

        cmd
    }

    /// Creates a bucket, failing with the CLI's stderr if `aws` exits unsuccessfully.
    pub async fn create_bucket(&self, spec: &BucketSpec) -> Result<()> {
        let mut cmd = self.create_bucket_command(spec);
        info!(self.logger, "Creating bucket"; "bucket" => &spec.name);

        let output = run_logged(&mut cmd, &self.log_path, &self.logger).await?;
        if output.success() {
            info!(self.logger, "Bucket created"; "bucket" => &spec.name);
            Ok(())
        } else {
            error!(self.logger, "Creating bucket failed"; "bucket" => &spec.name, "status" => %output.status);
            Err(output.failure("aws create-bucket"))
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().and_then(non_empty_str)
}

fn non_empty_str(value: &str) -> Option<&str> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}
