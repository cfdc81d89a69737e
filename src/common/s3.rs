//! Helper code for working with S3.

use std::path::Path;

use crate::common::SourceName;

/// Return the S3 configuration from environment variables.
pub async fn config_from_env() -> Result<aws_sdk_s3::config::Config, anyhow::Error> {
    let config = aws_config::from_env().load().await;
    match std::env::var("AWS_ENDPOINT_URL") {
        Ok(endpoint_url) => {
            tracing::trace!("will use endpoint url {:?}", &endpoint_url);
            Ok(aws_sdk_s3::config::Builder::from(&config)
                .endpoint_url(endpoint_url)
                .force_path_style(true)
                .build())
        }
        Err(_) => Ok(aws_sdk_s3::config::Builder::from(&config).build()),
    }
}

/// Split an `<bucket>/<key prefix>` S3 path into its parts.
fn split_bucket_path(s3_path: &str) -> Result<(String, String), anyhow::Error> {
    if let Some((bucket, key)) = s3_path.split_once('/') {
        Ok((bucket.to_string(), key.to_string()))
    } else {
        anyhow::bail!("invalid S3 path: {}", s3_path);
    }
}

/// Download the most recent CDM artifact for each source from the given
/// `<bucket>/<prefix>` location into the local data directory layout.
///
/// Objects are expected to be named `<source>_cdm_<YYYYMMDD>.json`, so the
/// lexicographic maximum per source is the most recent one.  Returns the
/// local paths of the downloaded artifacts.
pub async fn download_latest_cdms(
    s3_path: &str,
    data_dir: &Path,
    sources: &[SourceName],
) -> Result<Vec<std::path::PathBuf>, anyhow::Error> {
    let client = aws_sdk_s3::Client::from_conf(config_from_env().await?);
    let (bucket, prefix) = split_bucket_path(s3_path)?;

    let listing = client
        .list_objects_v2()
        .bucket(&bucket)
        .prefix(&prefix)
        .send()
        .await
        .map_err(|e| anyhow::anyhow!("could not list objects in {:?}: {}", s3_path, e))?;
    let keys = listing
        .contents()
        .iter()
        .filter_map(|obj| obj.key().map(|k| k.to_string()))
        .collect::<Vec<_>>();

    let mut result = Vec::new();
    for source in sources {
        let infix = format!("{}_cdm_", source);
        let latest = keys
            .iter()
            .filter(|key| {
                key.rsplit('/')
                    .next()
                    .map(|name| name.starts_with(&infix) && name.ends_with(".json"))
                    .unwrap_or(false)
            })
            .max()
            .ok_or_else(|| {
                anyhow::anyhow!("no {}*.json object found in {:?}", &infix, s3_path)
            })?;

        let file_name = latest
            .rsplit('/')
            .next()
            .expect("rsplit yields at least one element");
        let dst = data_dir
            .join(source.to_string())
            .join("transform")
            .join(file_name);
        if let Some(parent) = dst.parent() {
            std::fs::create_dir_all(parent)?;
        }

        tracing::debug!("will download {:?} to {:?}", &latest, &dst);
        let object = client
            .get_object()
            .bucket(&bucket)
            .key(latest)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("could not fetch object {:?}: {}", latest, e))?;
        let bytes = object
            .body
            .collect()
            .await
            .map_err(|e| anyhow::anyhow!("could not read object body {:?}: {}", latest, e))?;
        std::fs::write(&dst, bytes.into_bytes())
            .map_err(|e| anyhow::anyhow!("could not write file {:?}: {}", &dst, e))?;

        result.push(dst);
    }

    Ok(result)
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    #[test]
    fn split_bucket_path() -> Result<(), anyhow::Error> {
        let (bucket, key) = super::split_bucket_path("vicc-metakb/cdm")?;
        assert_eq!(bucket, "vicc-metakb");
        assert_eq!(key, "cdm");

        assert!(super::split_bucket_path("no-slash").is_err());

        Ok(())
    }
}
