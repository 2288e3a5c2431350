// Copyright 2025 Anapaya Systems
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! PAN stack builder.

use std::sync::Arc;

use crate::{
    address::IsdAsn,
    fabrid::ControlPlaneConnector,
    path::{
        fetcher::PathFetcher,
        pool::{DefaultPathPool, PathPool, PathPoolConfig, PoolRefresherTask},
        stats::{DefaultPathStats, PathDownReceiver, PathStats},
    },
    stack::{PanStack, transport::PacketConnOpener},
};

/// Creates a pool with a running refresher from the local ISD-AS and the pool configuration.
type PoolFactory = Box<
    dyn FnOnce(IsdAsn, PathPoolConfig) -> Result<(Arc<dyn PathPool>, PoolHandle), &'static str>
        + Send,
>;

/// The default pool seen as a down receiver, and its refresher.
struct PoolHandle {
    down_receiver: Arc<dyn PathDownReceiver>,
    refresher: PoolRefresherTask,
}

enum PathSource {
    Pool(Arc<dyn PathPool>, Arc<dyn PathDownReceiver>),
    Factory(PoolFactory),
}

/// Builder for creating a [PanStack].
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
///
/// use scion_pan::{
///     address::IsdAsn,
///     path::fetcher::PathFetcher,
///     stack::{PanStackBuilder, transport::PacketConnOpener},
/// };
///
/// async fn setup(
///     local_ia: IsdAsn,
///     transport: Arc<dyn PacketConnOpener>,
///     fetcher: impl PathFetcher,
/// ) {
///     let stack = PanStackBuilder::new(local_ia, transport)
///         .with_path_fetcher(fetcher)
///         .build()
///         .await
///         .unwrap();
/// }
/// ```
pub struct PanStackBuilder {
    local_ia: IsdAsn,
    transport: Arc<dyn PacketConnOpener>,
    paths: Option<PathSource>,
    pool_config: PathPoolConfig,
    stats: Option<Arc<dyn PathStats>>,
    control_plane: Option<Arc<dyn ControlPlaneConnector>>,
}

impl PanStackBuilder {
    /// Create a new [PanStackBuilder] for an endhost in `local_ia`.
    pub fn new(local_ia: IsdAsn, transport: Arc<dyn PacketConnOpener>) -> Self {
        Self {
            local_ia,
            transport,
            paths: None,
            pool_config: PathPoolConfig::default(),
            stats: None,
            control_plane: None,
        }
    }

    /// Fetch paths with `fetcher` into a [DefaultPathPool] that is refreshed in the background.
    pub fn with_path_fetcher<F: PathFetcher>(mut self, fetcher: F) -> Self {
        self.paths = Some(PathSource::Factory(Box::new(move |local_ia, config| {
            let pool = Arc::new(DefaultPathPool::new(local_ia, config, fetcher)?);
            let refresher = pool.spawn_refresher();
            let handle = PoolHandle {
                down_receiver: pool.clone(),
                refresher,
            };
            Ok((pool as Arc<dyn PathPool>, handle))
        })));
        self
    }

    /// Use an existing path pool.
    ///
    /// The pool is subscribed to the down notifications of the registry, which it must forward to
    /// its subscribers. It is not refreshed by the stack.
    pub fn with_path_pool<P>(mut self, pool: Arc<P>) -> Self
    where
        P: PathPool + PathDownReceiver + 'static,
    {
        self.paths = Some(PathSource::Pool(pool.clone(), pool));
        self
    }

    /// Set the configuration of the default path pool.
    pub fn with_pool_config(mut self, config: PathPoolConfig) -> Self {
        self.pool_config = config;
        self
    }

    /// Use an existing liveness and latency registry instead of a [DefaultPathStats].
    pub fn with_path_stats(mut self, stats: Arc<dyn PathStats>) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Set the connector used to reach the control service for FABRID connections.
    pub fn with_control_plane(mut self, connector: Arc<dyn ControlPlaneConnector>) -> Self {
        self.control_plane = Some(connector);
        self
    }

    /// Build the PAN stack.
    ///
    /// Must be called within a tokio runtime if the default path pool is used.
    pub async fn build(self) -> Result<PanStack, BuildPanStackError> {
        let stats = self
            .stats
            .unwrap_or_else(|| Arc::new(DefaultPathStats::new()));
        let (pool, handle) = match self.paths.ok_or(BuildPanStackError::MissingPathSource)? {
            PathSource::Pool(pool, down_receiver) => {
                stats.subscribe(down_receiver);
                (pool, None)
            }
            PathSource::Factory(factory) => {
                let (pool, handle) = factory(self.local_ia, self.pool_config)
                    .map_err(BuildPanStackError::InvalidConfig)?;
                stats.subscribe(handle.down_receiver.clone());
                (pool, Some(handle))
            }
        };
        tracing::debug!(local_ia = %self.local_ia, "Built PAN stack");
        Ok(PanStack::new(
            pool,
            stats,
            self.transport,
            self.control_plane,
            handle.map(|h| h.refresher),
        ))
    }
}

/// Build PAN stack errors.
#[derive(Debug, thiserror::Error)]
pub enum BuildPanStackError {
    /// Neither a path fetcher nor a path pool was configured.
    #[error("no path fetcher or path pool configured")]
    MissingPathSource,
    /// The configuration is invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}
