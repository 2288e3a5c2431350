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

//! A [PathFetcher] provides paths between two ISD-ASes.
//!
//! Path discovery itself happens elsewhere, the pool only consumes this trait.

use std::borrow::Cow;

use crate::{address::IsdAsn, path::Path, types::ResFut};

/// Path fetcher trait.
pub trait PathFetcher: Send + Sync + 'static {
    /// Fetch paths between source and destination ISD-AS.
    fn fetch_paths(&self, src: IsdAsn, dst: IsdAsn) -> impl ResFut<'_, Vec<Path>, PathFetchError>;
}

/// Path fetch errors.
#[derive(Debug, thiserror::Error)]
pub enum PathFetchError {
    /// The path service could not be reached.
    #[error("path service unavailable: {0}")]
    Unavailable(Cow<'static, str>),

    /// No paths found.
    #[error("no paths found")]
    NoPathsFound,

    /// Non network related internal error.
    #[error("internal error: {0}")]
    InternalError(Cow<'static, str>),
}
