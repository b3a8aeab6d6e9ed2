// ABOUTME: Resolves user-supplied container references to runtime records.
// ABOUTME: Exact id, then exact name, then unique id prefix.

use crate::error::ErrorKind;
use crate::runtime::{ContainerOps, ContainerRecord, RuntimeServiceError};
use crate::types::ContainerId;

use super::labels::keys;

#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("no such container: {0}")]
    NotFound(String),

    #[error("multiple IDs found with provided prefix: {0}")]
    Ambiguous(String),

    #[error(transparent)]
    Runtime(#[from] RuntimeServiceError),
}

impl LookupError {
    /// Returns the error kind for programmatic handling.
    pub fn kind(&self) -> ErrorKind {
        match self {
            LookupError::NotFound(_) => ErrorKind::NotFound,
            LookupError::Ambiguous(_) => ErrorKind::InvalidArgument,
            LookupError::Runtime(e) => e.kind(),
        }
    }
}

/// Find the container `reference` names in `namespace`.
pub async fn find_container<R>(
    runtime: &R,
    namespace: &str,
    reference: &str,
) -> Result<ContainerRecord, LookupError>
where
    R: ContainerOps + ?Sized,
{
    if reference.is_empty() {
        return Err(LookupError::NotFound(String::new()));
    }

    match runtime
        .get_container(namespace, &ContainerId::new(reference))
        .await
    {
        Ok(record) => return Ok(record),
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e.into()),
    }

    let records = runtime.list_containers(namespace).await?;

    if let Some(record) = records
        .iter()
        .find(|r| r.labels.get(keys::NAME).map(String::as_str) == Some(reference))
    {
        return Ok(record.clone());
    }

    let mut matches = records
        .into_iter()
        .filter(|r| r.id.as_str().starts_with(reference));
    match (matches.next(), matches.next()) {
        (Some(record), None) => Ok(record),
        (Some(_), Some(_)) => Err(LookupError::Ambiguous(reference.to_string())),
        (None, _) => Err(LookupError::NotFound(reference.to_string())),
    }
}
