use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use tracing::info;
use uuid::Uuid;

use crate::errors::AppError;

/// Object key for an uploaded resume. The owner id is part of the key so every
/// object can be traced back to its uploader.
pub fn resume_object_key(owner_id: Uuid, resume_id: Uuid, file_name: &str) -> String {
    format!(
        "resumes/{owner_id}/{resume_id}/{}",
        sanitize_file_name(file_name)
    )
}

/// Drops any client-supplied directory part and replaces unsafe characters.
pub fn sanitize_file_name(file_name: &str) -> String {
    let base = file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "resume".to_string()
    } else {
        cleaned.to_string()
    }
}

pub async fn put_resume_object(
    s3: &aws_sdk_s3::Client,
    bucket: &str,
    key: &str,
    body: Bytes,
    content_type: &str,
) -> Result<(), AppError> {
    s3.put_object()
        .bucket(bucket)
        .key(key)
        .body(ByteStream::from(body))
        .content_type(content_type)
        .send()
        .await
        .map_err(|e| AppError::Storage(format!("S3 upload failed: {e}")))?;

    info!("Uploaded resume to s3://{}/{}", bucket, key);
    Ok(())
}

pub async fn delete_resume_object(
    s3: &aws_sdk_s3::Client,
    bucket: &str,
    key: &str,
) -> Result<(), AppError> {
    s3.delete_object()
        .bucket(bucket)
        .key(key)
        .send()
        .await
        .map_err(|e| AppError::Storage(format!("S3 delete failed: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_contains_owner_and_resume() {
        let owner = Uuid::new_v4();
        let resume = Uuid::new_v4();
        let key = resume_object_key(owner, resume, "cv.pdf");
        assert_eq!(key, format!("resumes/{owner}/{resume}/cv.pdf"));
    }

    #[test]
    fn test_sanitize_strips_directories() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\Users\\me\\My CV.pdf"), "My_CV.pdf");
    }

    #[test]
    fn test_sanitize_hidden_and_empty_names() {
        assert_eq!(sanitize_file_name(".bashrc"), "bashrc");
        assert_eq!(sanitize_file_name(""), "resume");
        assert_eq!(sanitize_file_name("folder/"), "resume");
    }
}
