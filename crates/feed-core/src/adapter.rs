//! Upstream data source abstraction.

use async_trait::async_trait;
use std::fmt::Debug;

use crate::{
    error::AdapterResult,
    key::DataType,
    request::FetchParams,
    types::{Payload, Symbol},
};

/// Wrapper around one upstream market-data provider.
///
/// The fallback facade only talks to providers through this trait. `fetch`
/// must not touch state shared with other adapters, so a failed attempt never
/// affects the next source in the chain.
#[async_trait]
pub trait SourceAdapter: Send + Sync + Debug {
    /// Returns the registry name of this source (e.g. `"tushare"`).
    fn name(&self) -> &str;

    /// Priority used when the configuration does not set one.
    fn default_priority(&self) -> i32 {
        0
    }

    /// Cheap connectivity/credential check.
    ///
    /// Must not fail; any problem is reported as `false`. Callers bound the call
    /// with a timeout.
    async fn is_available(&self) -> bool;

    /// Fetches fresh data for a symbol.
    ///
    /// Data types the source does not provide are reported as
    /// [`AdapterError::NotFound`](crate::error::AdapterError::NotFound).
    async fn fetch(
        &self,
        symbol: &Symbol,
        data_type: DataType,
        params: &FetchParams,
    ) -> AdapterResult<Payload>;
}
