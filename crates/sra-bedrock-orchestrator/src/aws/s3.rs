//! Code staging in the staging bucket
//!
//! The repository archive is downloaded over HTTPS only when the staged copy
//! is missing. Rule packages are read from a fixed prefix of the same bucket.

use super::error::{AwsResultExt, ignore_absent, ignore_not_found};
use super::provider::AwsProvider;
use crate::reconcile::kinds::CodeArchiveSpec;
use crate::reconcile::{Capability, Existing, Scope};
use anyhow::{Context, Result};
use aws_sdk_s3::primitives::ByteStream;
use tracing::{debug, info};

/// Zip local file header magic
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

/// Object key of the staged repository archive
pub fn staged_code_key(solution: &str, source_url: &str) -> Result<String> {
    let file = source_url
        .rsplit('/')
        .next()
        .filter(|f| f.ends_with(".zip"))
        .with_context(|| format!("Repository URL does not name a zip archive: {source_url}"))?;
    Ok(format!("{solution}/code/{file}"))
}

/// Object key of a rule's Lambda package
pub fn rule_package_key(solution: &str, rule: &str) -> String {
    format!("{solution}/rules/{rule}/{rule}.zip")
}

/// Source of archive bytes
#[allow(async_fn_in_trait)]
#[cfg_attr(test, mockall::automock)]
pub trait CodeFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

impl CodeFetcher for reqwest::Client {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .get(url)
            .send()
            .await
            .context("Failed to download repository archive")?
            .error_for_status()
            .context("Repository archive download was rejected")?;
        let bytes = response
            .bytes()
            .await
            .context("Failed to read repository archive")?;
        Ok(bytes.to_vec())
    }
}

/// Download an archive and check that it is a zip file
pub async fn download_archive<F: CodeFetcher>(fetcher: &F, url: &str) -> Result<Vec<u8>> {
    if !url.starts_with("https://") {
        anyhow::bail!("Refusing to download repository archive over plain HTTP: {url}");
    }
    let bytes = fetcher.fetch(url).await?;
    if !bytes.starts_with(ZIP_MAGIC) {
        anyhow::bail!("Downloaded repository archive is not a zip file ({} bytes)", bytes.len());
    }
    debug!(url = %url, size = bytes.len(), "Downloaded repository archive");
    Ok(bytes)
}

fn object_arn(partition: &str, bucket: &str, key: &str) -> String {
    format!("arn:{partition}:s3:::{bucket}/{key}")
}

impl Capability<CodeArchiveSpec> for AwsProvider {
    async fn find(&self, scope: &Scope, desired: &CodeArchiveSpec) -> Result<Option<Existing>> {
        let s3 = self.context(scope).await?.s3_client();
        let head = ignore_not_found(
            s3.head_object()
                .bucket(&desired.bucket)
                .key(&desired.object_key)
                .send()
                .await,
        )
        .aws_context("Failed to check staged code")?;

        Ok(head.map(|_| {
            Existing::new(
                object_arn(self.partition(), &desired.bucket, &desired.object_key),
                &desired.object_key,
            )
        }))
    }

    async fn create(&self, scope: &Scope, desired: &CodeArchiveSpec) -> Result<Existing> {
        info!(
            bucket = %desired.bucket,
            key = %desired.object_key,
            url = %desired.source_url,
            "Staging repository archive"
        );
        let bytes = download_archive(self.http(), &desired.source_url).await?;

        let s3 = self.context(scope).await?.s3_client();
        s3.put_object()
            .bucket(&desired.bucket)
            .key(&desired.object_key)
            .body(ByteStream::from(bytes))
            .content_type("application/zip")
            .send()
            .await
            .aws_context("Failed to upload staged code")?;

        Ok(Existing::new(
            object_arn(self.partition(), &desired.bucket, &desired.object_key),
            &desired.object_key,
        ))
    }

    async fn delete(&self, scope: &Scope, existing: &Existing) -> Result<()> {
        let Some((bucket, key)) = existing
            .arn
            .split_once(":::")
            .and_then(|(_, path)| path.split_once('/'))
        else {
            anyhow::bail!("Malformed staged object ARN: {}", existing.arn);
        };
        let s3 = self.context(scope).await?.s3_client();
        ignore_absent(s3.delete_object().bucket(bucket).key(key).send().await)
            .aws_context("Failed to delete staged code")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staged_code_key() {
        assert_eq!(
            staged_code_key(
                "sra-bedrock-org",
                "https://github.com/aws-samples/aws-security-reference-architecture-examples/archive/refs/heads/main.zip"
            )
            .unwrap(),
            "sra-bedrock-org/code/main.zip"
        );
        assert!(staged_code_key("sra-bedrock-org", "https://example.com/archive.tar").is_err());
    }

    #[test]
    fn test_rule_package_key() {
        assert_eq!(
            rule_package_key("sra-bedrock-org", "sra-bedrock-check-guardrails"),
            "sra-bedrock-org/rules/sra-bedrock-check-guardrails/sra-bedrock-check-guardrails.zip"
        );
    }

    #[tokio::test]
    async fn test_download_accepts_zip() {
        let mut fetcher = MockCodeFetcher::new();
        fetcher
            .expect_fetch()
            .times(1)
            .returning(|_| Ok(b"PK\x03\x04rest".to_vec()));

        let bytes = download_archive(&fetcher, "https://example.com/main.zip")
            .await
            .unwrap();
        assert_eq!(bytes.len(), 8);
    }

    #[tokio::test]
    async fn test_download_rejects_non_zip() {
        let mut fetcher = MockCodeFetcher::new();
        fetcher
            .expect_fetch()
            .returning(|_| Ok(b"<html>not found</html>".to_vec()));

        let err = download_archive(&fetcher, "https://example.com/main.zip")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not a zip file"));
    }

    #[tokio::test]
    async fn test_download_requires_https() {
        let mut fetcher = MockCodeFetcher::new();
        fetcher.expect_fetch().never();

        assert!(
            download_archive(&fetcher, "http://example.com/main.zip")
                .await
                .is_err()
        );
    }
}
