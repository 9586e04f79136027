// Copyright (C) 2025 Ponder Software Co., Ltd.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Built-in handler variants

mod forward;
mod generic;

pub use forward::ForwardHandler;
pub use generic::GenericHandler;
