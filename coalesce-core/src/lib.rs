// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

#![doc = include_str!("../README.md")]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub use crate::apply::{ApplyBatch, ApplyReport};
pub use crate::counts::Counts;
pub use crate::key::{DomainId, PasteId, ShortUrlId};
pub use crate::store::{CounterStore, StoreError};

pub mod apply;
pub mod counts;
pub mod key;
pub mod store;

#[cfg(feature = "test-util")]
#[cfg_attr(docsrs, doc(cfg(feature = "test-util")))]
pub mod test_util;
