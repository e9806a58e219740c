use crate::error::LoadError;
use std::{future::Future, path::Path};
use tokio::io::AsyncReadExt;

/// Reads the model asset at `path` in `chunk_size` pieces, reporting the
/// fraction read after every chunk.
///
/// Reported fractions never decrease and the last one is exactly `1.0`, also
/// for an empty asset.
pub async fn fetch_asset<F, Fut>(
    path: &Path,
    chunk_size: usize,
    mut on_progress: F,
) -> Result<Vec<u8>, LoadError>
where
    F: FnMut(f32) -> Fut,
    Fut: Future<Output = ()>,
{
    let fetch_error = |source| LoadError::Fetch {
        path: path.to_path_buf(),
        source,
    };

    let mut file = tokio::fs::File::open(path).await.map_err(fetch_error)?;
    let total = file.metadata().await.map_err(fetch_error)?.len() as usize;

    let mut bytes = Vec::with_capacity(total);
    let mut chunk = vec![0u8; chunk_size.max(1)];
    let mut last = 0.0f32;

    loop {
        let read = file.read(&mut chunk).await.map_err(fetch_error)?;
        if read == 0 {
            break;
        }
        bytes.extend_from_slice(&chunk[..read]);

        let frac = if total == 0 {
            1.0
        } else {
            (bytes.len() as f64 / total as f64).min(1.0) as f32
        };
        if frac >= last {
            last = frac;
            on_progress(frac).await;
        }
    }

    if last < 1.0 || bytes.is_empty() {
        on_progress(1.0).await;
    }

    tracing::debug!("Fetched {} bytes from {:?}", bytes.len(), path);
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_progress_is_monotonic_and_ends_at_one() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[7u8; 10]).unwrap();

        let mut seen = Vec::new();
        let bytes = fetch_asset(file.path(), 3, |frac| {
            seen.push(frac);
            async {}
        })
        .await
        .unwrap();

        assert_eq!(bytes, vec![7u8; 10]);
        assert_eq!(seen.len(), 4);
        assert!(seen.windows(2).all(|pair| pair[0] <= pair[1]));
        assert_eq!(*seen.last().unwrap(), 1.0);
    }

    #[tokio::test]
    async fn test_empty_asset_reports_completion_once() {
        let file = tempfile::NamedTempFile::new().unwrap();

        let mut seen = Vec::new();
        let bytes = fetch_asset(file.path(), 16, |frac| {
            seen.push(frac);
            async {}
        })
        .await
        .unwrap();

        assert!(bytes.is_empty());
        assert_eq!(seen, vec![1.0]);
    }

    #[tokio::test]
    async fn test_missing_asset_is_a_fetch_error() {
        let result = fetch_asset(Path::new("/nonexistent/model.onnx"), 16, |_| async {}).await;
        assert!(matches!(result, Err(LoadError::Fetch { .. })));
    }
}
