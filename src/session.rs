use std::{fmt::Display, time::SystemTime};

use url::Url;

use crate::error::{UploadError, UploadResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTarget {
    pub bucket: String,
    pub key: String,
}

impl UploadTarget {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> UploadResult<Self> {
        let target = Self {
            bucket: bucket.into(),
            key: key.into(),
        };
        target.validate()?;
        Ok(target)
    }

    pub fn validate(&self) -> UploadResult<()> {
        if self.bucket.is_empty() {
            return Err(UploadError::InvalidTarget("bucket name is empty".to_string()));
        }
        if self.key.is_empty() {
            return Err(UploadError::InvalidTarget("object key is empty".to_string()));
        }
        Ok(())
    }
}

impl Display for UploadTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

/// A multipart upload opened on the backend.
///
/// Not `Clone`: completing or aborting takes the session by
/// value, so nothing can reference it afterwards.
#[derive(Debug, PartialEq, Eq)]
pub struct UploadSession {
    upload_id: String,
    target: UploadTarget,
}

impl UploadSession {
    pub(crate) fn new(upload_id: String, target: UploadTarget) -> Self {
        Self { upload_id, target }
    }

    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }

    pub fn target(&self) -> &UploadTarget {
        &self.target
    }
}

/// Presigned permission to PUT one part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizedPart {
    pub part_number: u32,
    pub url: Url,
    pub expires_at: SystemTime,
}

/// Opaque per-part checksum returned by the backend (an S3 `ETag`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IntegrityTag(pub String);

impl Display for IntegrityTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: u32,
    pub tag: IntegrityTag,
}

/// Parts ready to be committed: sorted, numbered `1..=N`, no gaps or duplicates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartList(Vec<CompletedPart>);

impl PartList {
    pub fn new(mut parts: Vec<CompletedPart>) -> UploadResult<Self> {
        if parts.is_empty() {
            return Err(UploadError::InvalidPartList(
                "at least one part is required".to_string(),
            ));
        }

        parts.sort_by_key(|part| part.part_number);

        for (index, part) in parts.iter().enumerate() {
            let expected = index as u32 + 1;
            if part.part_number != expected {
                return Err(UploadError::InvalidPartList(if part.part_number < expected {
                    format!("part {} appears more than once", part.part_number)
                } else {
                    format!("part {} is missing", expected)
                }));
            }
        }

        Ok(Self(parts))
    }

    pub fn parts(&self) -> &[CompletedPart] {
        &self.0
    }
}

/// Backend acknowledgement of a committed upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedUpload {
    pub upload_id: String,
    pub target: UploadTarget,
    pub part_count: u32,
    pub location: Option<String>,
    pub etag: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part(part_number: u32) -> CompletedPart {
        CompletedPart {
            part_number,
            tag: IntegrityTag(format!("\"etag-{}\"", part_number)),
        }
    }

    #[test]
    fn test_part_list_sorts_any_completion_order() {
        let list = PartList::new(vec![part(3), part(1), part(2)]).unwrap();
        let numbers: Vec<u32> = list.parts().iter().map(|p| p.part_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(list.parts()[0].tag, IntegrityTag("\"etag-1\"".to_string()));
    }

    #[test]
    fn test_part_list_rejects_gap() {
        let err = PartList::new(vec![part(1), part(3)]).unwrap_err();
        assert!(err.to_string().contains("part 2 is missing"));
    }

    #[test]
    fn test_part_list_rejects_duplicate() {
        let err = PartList::new(vec![part(1), part(2), part(2)]).unwrap_err();
        assert!(err.to_string().contains("part 2 appears more than once"));
    }

    #[test]
    fn test_part_list_must_start_at_one() {
        assert!(PartList::new(vec![part(2), part(3)]).is_err());
        assert!(PartList::new(vec![]).is_err());
    }

    #[test]
    fn test_target_rejects_empty_names() {
        assert!(matches!(
            UploadTarget::new("", "key"),
            Err(UploadError::InvalidTarget(_))
        ));
        assert!(matches!(
            UploadTarget::new("bucket", ""),
            Err(UploadError::InvalidTarget(_))
        ));
        assert_eq!(
            UploadTarget::new("bucket", "data.bin").unwrap().to_string(),
            "s3://bucket/data.bin"
        );
    }
}
