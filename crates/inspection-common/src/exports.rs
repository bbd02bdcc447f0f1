//! Typed cross-stack export lookup.
//!
//! One stack publishes a named value (e.g. the workload transit gateway route
//! table id) and another consumes it without a direct reference. Lookups go
//! through [`ExportKey<T>`] so the consumer gets a parsed `T` and an explicit
//! distinction between "not published yet" and "published but empty".

use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;

use async_trait::async_trait;
use inspection_types::ParseError;
use tracing::debug;

use crate::cloud::CloudResult;
use crate::error::{InspectionError, InspectionResult};
use crate::retry::{retry_with_backoff, RetryPolicy};

/// Export carrying the workload transit gateway route table id.
pub const WORKLOAD_ROUTE_TABLE_EXPORT: &str = "WorkloadRouteTableId";

/// Export carrying the inspection transit gateway route table id.
pub const INSPECTION_ROUTE_TABLE_EXPORT: &str = "InspectionRouteTableId";

/// Name → value registry of published exports.
#[async_trait]
pub trait ExportRegistry: Send + Sync {
    /// Returns the raw value of a named export, `None` if not published.
    async fn get_export(&self, name: &str) -> CloudResult<Option<String>>;
}

/// Name of an export together with the type its value parses into.
pub struct ExportKey<T> {
    name: String,
    _value: PhantomData<fn() -> T>,
}

impl<T> ExportKey<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            _value: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<T> Clone for ExportKey<T> {
    fn clone(&self) -> Self {
        Self::new(self.name.clone())
    }
}

impl<T> fmt::Debug for ExportKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ExportKey").field(&self.name).finish()
    }
}

/// Outcome of a single export lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Export<T> {
    Found(T),
    /// Published with a blank value.
    Empty,
    /// Not published (yet).
    Missing,
}

/// Looks an export up once.
pub async fn lookup_export<T, R>(registry: &R, key: &ExportKey<T>) -> InspectionResult<Export<T>>
where
    R: ExportRegistry + ?Sized,
    T: FromStr<Err = ParseError>,
{
    match registry.get_export(key.name()).await? {
        None => Ok(Export::Missing),
        Some(raw) if raw.trim().is_empty() => Ok(Export::Empty),
        Some(raw) => raw
            .parse::<T>()
            .map(Export::Found)
            .map_err(|e| InspectionError::malformed(key.name(), e.to_string())),
    }
}

/// Looks an export up, polling with backoff while it is not published.
///
/// Export publication and the events that need it are not ordered, so a
/// missing export is treated as transient. An empty export is a broken
/// deployment and fails immediately.
pub async fn require_export<T, R>(
    registry: &R,
    key: &ExportKey<T>,
    policy: &RetryPolicy,
) -> InspectionResult<T>
where
    R: ExportRegistry + ?Sized,
    T: FromStr<Err = ParseError>,
{
    let operation = format!("ListExports({})", key.name());
    retry_with_backoff(policy, &operation, || async {
        match lookup_export(registry, key).await? {
            Export::Found(value) => {
                debug!(export = %key.name(), "Resolved export");
                Ok(value)
            }
            Export::Empty => Err(InspectionError::malformed(
                key.name(),
                "export is published but empty",
            )),
            Export::Missing => Err(InspectionError::retryable(
                operation.clone(),
                format!("export '{}' is not published yet", key.name()),
            )),
        }
    })
    .await
}
