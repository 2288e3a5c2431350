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

//! # Path selection for SCION endhosts.
//!
//! This crate chooses which SCION path a socket uses, adapts the choice when paths go down or
//! get slow, and remembers reply paths for listening sockets.
//!
//! The building blocks are:
//! - [selector::Selector] strategies owning the path choice of one dialed connection.
//! - [selector::ReplySelector] choosing reply paths of a listening connection.
//! - [path::subscriber::PathRefreshSubscriber] binding a selector to the shared
//!   [path::pool::PathPool].
//! - [pinger::engine] probing paths and feeding [path::stats::PathStats].
//! - [fabrid] adding per-hop validation state to paths.
//! - [stack::PanStack] tying them together into dialed and listening connections.

pub mod address;
pub mod fabrid;
pub mod path;
pub mod pinger;
pub mod selector;
pub mod stack;
pub mod types;
