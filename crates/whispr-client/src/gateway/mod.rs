//! Data access gateway: the one door every component goes through to reach the store.
//!
//! [`Gateway`] speaks the REST-like table boundary plus named procedures. Two
//! implementations ship: [`HttpGateway`] for a remote server and [`LocalGateway`]
//! for an in-process database. Neither caches anything.

mod http;
mod local;

pub use http::HttpGateway;
pub(crate) use http::{decode, refusal};
pub use local::LocalGateway;

use std::future::Future;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use whispr_types::api::{Filter, Select};

use crate::error::{ClientError, Result};

pub trait Gateway: Send + Sync {
    /// Rows matching every filter, in the requested order.
    fn query(&self, table: &str, select: &Select) -> impl Future<Output = Result<Vec<Value>>> + Send;

    /// Insert one object or an array of objects; returns the stored rows.
    fn insert(&self, table: &str, rows: Value) -> impl Future<Output = Result<Vec<Value>>> + Send;

    /// Patch matching rows; returns how many were touched.
    fn update(
        &self,
        table: &str,
        filters: &[Filter],
        patch: Value,
    ) -> impl Future<Output = Result<usize>> + Send;

    fn delete(&self, table: &str, filters: &[Filter]) -> impl Future<Output = Result<usize>> + Send;

    /// Run a named procedure. Procedures are atomic on the store side.
    fn call(&self, procedure: &str, params: Value) -> impl Future<Output = Result<Value>> + Send;

    /// Cheap reachability check.
    fn health(&self) -> impl Future<Output = Result<()>> + Send;
}

/// Query and decode rows.
pub async fn fetch<T, G>(gateway: &G, table: &str, select: &Select) -> Result<Vec<T>>
where
    T: DeserializeOwned,
    G: Gateway + ?Sized,
{
    let rows = gateway.query(table, select).await?;
    rows.into_iter()
        .map(|row| serde_json::from_value(row).map_err(ClientError::from))
        .collect()
}

pub async fn fetch_one<T, G>(gateway: &G, table: &str, select: Select) -> Result<Option<T>>
where
    T: DeserializeOwned,
    G: Gateway + ?Sized,
{
    Ok(fetch(gateway, table, &select.limit(1)).await?.into_iter().next())
}

/// Insert and decode the stored rows.
pub async fn create<T, R, G>(gateway: &G, table: &str, row: &R) -> Result<Vec<T>>
where
    T: DeserializeOwned,
    R: Serialize + ?Sized,
    G: Gateway + ?Sized,
{
    let body = serde_json::to_value(row)?;
    let rows = gateway.insert(table, body).await?;
    rows.into_iter()
        .map(|row| serde_json::from_value(row).map_err(ClientError::from))
        .collect()
}

/// Call a procedure with typed parameters and result.
pub async fn invoke<T, P, G>(gateway: &G, procedure: &str, params: &P) -> Result<T>
where
    T: DeserializeOwned,
    P: Serialize + ?Sized,
    G: Gateway + ?Sized,
{
    let params = serde_json::to_value(params)?;
    let result = gateway.call(procedure, params).await?;
    Ok(serde_json::from_value(result)?)
}
